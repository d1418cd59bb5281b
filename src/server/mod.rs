//! Server side of the transport.
//!
//! ```text
//! Listener ─accept─▶ ConnectionManager ─spawn─▶ ConnectionProcessor
//!                         │                          │ loop
//!                    TaskExecutor                    ▼
//!                  (bounded, 503)              HttpService ─▶ Worker
//! ```

pub mod dispatcher;
pub mod executor;
pub mod failure;
pub mod http_server;
pub mod listener;
pub mod manager;
pub mod processor;
pub mod reuse;
pub mod service;
pub mod session;
pub mod worker;

pub use dispatcher::{Exchange, HttpService, ServiceContext};
pub use http_server::{ServerError, SimpleHttpServer};
pub use worker::{EchoWorker, MessageContext, Worker, WorkerError, WorkerKind};
