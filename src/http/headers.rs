/// Ordered HTTP header list with case-insensitive lookup.
///
/// Header order and repeated fields are preserved so requests and
/// responses can be relayed without reshuffling them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

/// Connection-scoped headers that must not be relayed by a proxy.
pub const HOP_BY_HOP: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "TE",
    "Trailer",
    "Upgrade",
];

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether any `name` header lists `token` in its comma-separated value.
    ///
    /// ```
    /// # use wsgate::http::headers::Headers;
    /// let mut h = Headers::new();
    /// h.append("Connection", "keep-alive, Upgrade");
    /// assert!(h.has_token("connection", "upgrade"));
    /// ```
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Add a header, keeping existing ones with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Set a header, replacing every existing value with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        match self.entries.iter().position(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(idx) => {
                self.entries[idx] = (name.clone(), value);
                let mut i = idx + 1;
                while i < self.entries.len() {
                    if self.entries[i].0.eq_ignore_ascii_case(&name) {
                        self.entries.remove(i);
                    } else {
                        i += 1;
                    }
                }
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Remove every value for `name`, returning the first one.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let mut removed = None;
        self.entries.retain(|(k, v)| {
            if k.eq_ignore_ascii_case(name) {
                if removed.is_none() {
                    removed = Some(v.clone());
                }
                false
            } else {
                true
            }
        });
        removed
    }

    /// Strip hop-by-hop headers, including any named in `Connection`.
    pub fn remove_hop_by_hop(&mut self) {
        let listed: Vec<String> = self
            .get_all("Connection")
            .flat_map(|v| v.split(','))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        for name in listed.iter().map(String::as_str).chain(HOP_BY_HOP.iter().copied()) {
            self.remove(name);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_all_values() {
        let mut h = Headers::new();
        h.append("Set-Cookie", "a=1");
        h.append("set-cookie", "b=2");
        h.insert("Set-Cookie", "c=3");

        assert_eq!(h.get_all("set-cookie").collect::<Vec<_>>(), vec!["c=3"]);
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn hop_by_hop_includes_connection_tokens() {
        let mut h = Headers::new();
        h.append("Connection", "close, X-Private");
        h.append("X-Private", "secret");
        h.append("Keep-Alive", "timeout=5");
        h.append("Content-Type", "text/plain");

        h.remove_hop_by_hop();

        assert!(!h.contains("connection"));
        assert!(!h.contains("x-private"));
        assert!(!h.contains("keep-alive"));
        assert_eq!(h.get("content-type"), Some("text/plain"));
    }
}
