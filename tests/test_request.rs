//! Tests for the request model

use wsgate::http::request::{Method, RequestBuilder};

#[test]
fn test_method_round_trip() {
    for name in ["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH"] {
        let method = Method::from_str(name).unwrap();
        assert_eq!(method.as_str(), name);
        assert_eq!(method.to_string(), name);
    }
    assert!(Method::from_str("get").is_none());
}

#[test]
fn test_builder_defaults() {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/ws")
        .build()
        .unwrap();

    assert_eq!(request.version, "HTTP/1.1");
    assert!(request.headers.is_empty());
    assert!(request.body.is_empty());
}

#[test]
fn test_builder_requires_method_and_path() {
    assert!(RequestBuilder::new().path("/").build().is_err());
    assert!(RequestBuilder::new().method(Method::GET).build().is_err());
}

#[test]
fn test_headers_are_case_insensitive() {
    let request = RequestBuilder::new()
        .method(Method::POST)
        .path("/ws/api")
        .header("Content-Length", "12")
        .build()
        .unwrap();

    assert_eq!(request.header("content-length"), Some("12"));
    assert_eq!(request.header("CONTENT-LENGTH"), Some("12"));
}

#[test]
fn test_path_only_strips_query() {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/ws/chat?room=1&user=a")
        .build()
        .unwrap();

    assert_eq!(request.path_only(), "/ws/chat");
}

#[test]
fn test_websocket_upgrade_detection() {
    let upgrade = RequestBuilder::new()
        .method(Method::GET)
        .path("/ws")
        .header("Connection", "keep-alive, Upgrade")
        .header("Upgrade", "WebSocket")
        .build()
        .unwrap();
    assert!(upgrade.is_websocket_upgrade());

    let h2c = RequestBuilder::new()
        .method(Method::GET)
        .path("/ws")
        .header("Upgrade", "h2c")
        .build()
        .unwrap();
    assert!(!h2c.is_websocket_upgrade());
}

#[test]
fn test_keep_alive_rules() {
    let http11 = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .build()
        .unwrap();
    assert!(http11.keep_alive());

    let http10 = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .version("HTTP/1.0")
        .build()
        .unwrap();
    assert!(!http10.keep_alive());

    let http10_keep = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .version("HTTP/1.0")
        .header("Connection", "Keep-Alive")
        .build()
        .unwrap();
    assert!(http10_keep.keep_alive());

    let close = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .header("Connection", "close")
        .build()
        .unwrap();
    assert!(!close.keep_alive());
}
