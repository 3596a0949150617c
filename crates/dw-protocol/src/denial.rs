//! Denial events and best-effort AVC record parsing.

use serde::Serialize;

use crate::line::LogLine;

/// Marker the kernel audit subsystem writes into every AVC denial record.
pub const DEFAULT_MARKER: &str = "avc:  denied";

/// A log line that contained the denial marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DenialEvent {
    /// Position among matches of one watch, starting at 1.
    pub sequence: u64,
    /// The line exactly as read, minus its terminator.
    pub line: LogLine,
    /// Fields lifted out of the record for display and logging.
    pub details: AvcDetails,
}

impl DenialEvent {
    /// Classify `line`: returns an event only when it contains `marker`.
    pub fn from_line(line: LogLine, marker: &str, sequence: u64) -> Option<Self> {
        if !line.contains(marker) {
            return None;
        }
        let details = AvcDetails::parse(line.as_str());
        Some(Self {
            sequence,
            line,
            details,
        })
    }

    pub fn text(&self) -> &str {
        self.line.as_str()
    }
}

/// Fields of an AVC record. Every field is optional; parsing never fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AvcDetails {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scontext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcontext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tclass: Option<String>,
}

impl AvcDetails {
    pub fn parse(text: &str) -> Self {
        let mut details = Self::default();

        if let Some(open) = text.find('{') {
            if let Some(close) = text[open..].find('}') {
                details.permissions = text[open + 1..open + close]
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
            }
        }

        for (key, value) in key_values(text) {
            match key {
                "pid" => details.pid = value.parse().ok(),
                "comm" => details.comm = Some(value),
                "name" => details.name = Some(value),
                "scontext" => details.scontext = Some(value),
                "tcontext" => details.tcontext = Some(value),
                "tclass" => details.tclass = Some(value),
                _ => {}
            }
        }

        details
    }

    /// Source and target types, e.g. `httpd_t` from `system_u:system_r:httpd_t:s0`.
    pub fn source_type(&self) -> Option<&str> {
        self.scontext.as_deref().and_then(context_type)
    }

    pub fn target_type(&self) -> Option<&str> {
        self.tcontext.as_deref().and_then(context_type)
    }
}

fn context_type(context: &str) -> Option<&str> {
    context.split(':').nth(2)
}

/// Split `key=value` tokens on whitespace, honouring double quotes in values.
fn key_values(text: &str) -> Vec<(&str, String)> {
    let mut pairs = Vec::new();
    let mut rest = text;

    while let Some(eq) = rest.find('=') {
        let key_start = rest[..eq]
            .rfind(char::is_whitespace)
            .map(|i| i + rest[i..].chars().next().map_or(1, char::len_utf8))
            .unwrap_or(0);
        let key = &rest[key_start..eq];
        let after = &rest[eq + 1..];

        let (value, consumed) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (quoted[..end].to_string(), end + 2),
                None => (quoted.to_string(), after.len()),
            }
        } else {
            let end = after.find(char::is_whitespace).unwrap_or(after.len());
            (after[..end].to_string(), end)
        };

        if !key.is_empty() {
            pairs.push((key, value));
        }
        rest = &after[consumed..];
    }

    pairs
}
