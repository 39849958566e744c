//! Core supervision engine for Procyon
//!
//! This crate owns the lifecycle of every supervised child process: spawning,
//! output capture into the bounded log ring, crash classification and
//! forensics, restart throttling, and the command surface the daemon exposes
//! over HTTP.

pub mod config;
pub mod error;
pub mod logring;
#[cfg(unix)]
pub mod process;
pub mod runtime;
pub mod storage;
pub mod supervisor;

// Re-export schema types for convenience
pub use schema::*;

pub use error::{CoreError, Result};
pub use logring::LogRing;
pub use runtime::{ExitReport, ManagedProcess, MockProcessAdapter, ProcessAdapter, RunningHandle};
#[cfg(unix)]
pub use runtime::UnixProcessAdapter;
pub use storage::{CrashStore, MemoryStore};
pub use supervisor::Supervisor;
