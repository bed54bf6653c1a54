//! HTTP/1.1 front end.
//!
//! This module implements the client-facing side of the proxy: parsing
//! requests, writing responses and driving each accepted connection.
//!
//! # Architecture
//!
//! - **`connection`**: per-connection state machine
//! - **`parser`**: request parser and backend response-head parser
//! - **`headers`**: ordered, case-insensitive header list
//! - **`request`** / **`response`**: message types and builders
//! - **`writer`**: serialises responses onto any `AsyncWrite`
//! - **`cors`**: CORS decoration and preflight answers
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Route the request
//!        └──┬─────┬──────┬──┘
//!   local   │     │      │ Upgrade: websocket
//!           ▼     │      ▼
//!   ┌────────────┐│  ┌────────────┐
//!   │  Writing   ││  │ Upgrading  │ ← Connection handed to the splicer
//!   └─────┬──────┘│  └────────────┘
//!         │       ▼
//!         │  ┌────────────┐
//!         │  │ Forwarding │ ← Relay to backend, stream response back
//!         │  └─────┬──────┘
//!         ├────────┘
//!         ├─ Keep-Alive → Reading (same connection)
//!         └─ Close → Closed
//! ```

pub mod connection;
pub mod cors;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
