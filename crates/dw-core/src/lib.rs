//! dw-core: Denial watching pipeline for denialwatch.
//!
//! Follows the audit log, picks out denial records, asks the configured
//! backend for a rule, and presents the result. Exposed as a library for
//! integration testing.

pub mod config;
pub mod monitor;
pub mod present;
pub mod record;
pub mod style;
pub mod watcher;

pub use monitor::{Monitor, MonitorError};
pub use watcher::{watch, Tail, WatchError, Watcher};
