//! Rule text returned by a suggestion backend.

use serde::Serialize;

/// A policy rule proposed for a denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    /// Rule text, trimmed. Not parsed or validated.
    pub rule: String,
    /// Name of the backend that produced it (e.g. "openai").
    pub backend: String,
}

impl Suggestion {
    pub fn new(rule: impl AsRef<str>, backend: impl Into<String>) -> Self {
        Self {
            rule: rule.as_ref().trim().to_string(),
            backend: backend.into(),
        }
    }
}
