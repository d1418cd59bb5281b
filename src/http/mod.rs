//! HTTP/1.x protocol layer.
//!
//! Everything needed to carry one request/response exchange at a time over
//! an accepted socket.
//!
//! # Architecture
//!
//! - **`connection`**: Buffered socket halves, request receipt and per-exchange reset
//! - **`parser`**: Parses request heads from byte buffers
//! - **`codec`**: Body framing (chunked, content-length, until-close) in both directions
//! - **`request`** / **`response`**: Message heads and the views handed to workers
//! - **`headers`**: Ordered, case-insensitive header multimap
//! - **`interceptor`**: Request and response interceptor chains
//! - **`context`**: Per-exchange attribute store
//! - **`writer`**: Serializes response heads and buffers output
//!
//! # Exchange Lifecycle
//!
//! ```text
//!        ┌──────────────────┐
//!        │   AwaitRequest   │ ← Wait for request bytes
//!        └──────┬───────────┘
//!               │ Head parsed, decoder installed
//!               ▼
//!        ┌──────────────────┐
//!        │ RequestReceived  │ ← 100 Continue if expected
//!        └──────┬───────────┘
//!               │ Request interceptors
//!               ▼
//!        ┌──────────────────┐
//!        │  WorkerInvoked   │ ← Worker reads body, fills response
//!        └──────┬───────────┘
//!               │ Response interceptors, head written
//!               ▼
//!        ┌──────────────────┐
//!        │ResponseCommitted │ ← Body encoded and terminated
//!        └──────┬───────────┘
//!               │ Reset
//!               ├─ Keep-Alive → AwaitRequest (same connection)
//!               └─ Close → Closed
//! ```

pub mod codec;
pub mod connection;
pub mod context;
pub mod headers;
pub mod interceptor;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
