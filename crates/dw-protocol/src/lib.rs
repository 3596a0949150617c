//! dw-protocol: Shared types for denialwatch.
//!
//! This crate defines the values that flow between the log watcher, the
//! suggestion backends, and the presentation layer.

pub mod denial;
pub mod line;
pub mod suggestion;

pub use denial::{AvcDetails, DenialEvent, DEFAULT_MARKER};
pub use line::LogLine;
pub use suggestion::Suggestion;
