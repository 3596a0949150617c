//! A single line read from the followed log.

use std::fmt;

use serde::Serialize;

/// One complete line appended to the followed file, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct LogLine(String);

impl LogLine {
    /// Build a line from raw bytes, dropping a trailing `\n` or `\r\n`.
    /// Invalid UTF-8 is replaced rather than rejected.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut end = bytes.len();
        if end > 0 && bytes[end - 1] == b'\n' {
            end -= 1;
        }
        if end > 0 && bytes[end - 1] == b'\r' {
            end -= 1;
        }
        Self(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Plain, case-sensitive substring test.
    pub fn contains(&self, marker: &str) -> bool {
        self.0.contains(marker)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for LogLine {
    fn from(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }
}

impl From<String> for LogLine {
    fn from(s: String) -> Self {
        Self::from_bytes(s.as_bytes())
    }
}

impl AsRef<str> for LogLine {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
