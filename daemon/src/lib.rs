//! Procyon daemon library
//!
//! Hosts the pieces around the supervision engine: the SQLite crash sink,
//! the axum HTTP/JSON control surface, and the bootstrap wiring that ties
//! configuration, storage, and the supervisor together.

pub mod bootstrap;
pub mod error;
pub mod http;
pub mod storage;

pub use error::{DaemonError, Result};
