//! Shared data types for the Procyon process supervisor
//!
//! This crate contains the wire-visible shapes exchanged between the
//! supervision engine, the persistence sink, and the HTTP surface:
//! process specifications and states, log entries, crash forensics,
//! and settings. All types here implement JSON Schema generation for
//! external consumption.

pub mod process;
pub mod records;

#[cfg(test)]
mod json_roundtrip_tests;

pub use process::{LastExit, ProcessSpec, ProcessState, ProcessSummary};
pub use records::{
    current_timestamp, format_uptime, timestamp_for, CrashRecord, CrashStat, ErrorRecord,
    LogEntry, LogLevel, Setting,
};
