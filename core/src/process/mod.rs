//! Platform process management

#[cfg(unix)]
pub mod unix;
