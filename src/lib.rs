//! Conduit - embedded HTTP/1.1 transport
//!
//! Connection handling, transfer codecs, the protocol interceptor chain and
//! the server lifecycle that sit underneath a message-processing worker.

pub mod config;
pub mod error;
pub mod http;
pub mod server;
