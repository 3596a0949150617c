//! Append-only JSONL record of denials and their suggested rules.
//!
//! Writes one JSON object per line, so the operator can review every
//! suggestion a session produced after the fact.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use dw_protocol::{DenialEvent, Suggestion};

/// Append-only JSONL suggestion record.
pub struct SuggestionRecord {
    writer: Option<BufWriter<File>>,
    session_id: String,
}

impl SuggestionRecord {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Some(BufWriter::new(file)),
            session_id: generate_session_id(),
        })
    }

    /// Create a no-op record that discards all entries.
    pub fn noop() -> Self {
        Self {
            writer: None,
            session_id: generate_session_id(),
        }
    }

    pub fn log_suggestion(&mut self, event: &DenialEvent, suggestion: &Suggestion) {
        self.write_entry(serde_json::json!({
            "ts": epoch_secs(),
            "session": self.session_id,
            "type": "suggestion",
            "sequence": event.sequence,
            "line": event.text(),
            "backend": suggestion.backend,
            "rule": suggestion.rule,
        }));
    }

    pub fn log_failure(&mut self, event: &DenialEvent, error: &str) {
        self.write_entry(serde_json::json!({
            "ts": epoch_secs(),
            "session": self.session_id,
            "type": "failure",
            "sequence": event.sequence,
            "line": event.text(),
            "error": error,
        }));
    }

    fn write_entry(&mut self, value: serde_json::Value) {
        let Some(ref mut writer) = self.writer else {
            return;
        };
        let result = serde_json::to_string(&value)
            .map_err(io::Error::from)
            .and_then(|line| {
                writeln!(writer, "{line}")?;
                writer.flush()
            });
        if let Err(e) = result {
            // Record failures are logged, never fatal.
            warn!(error = %e, "failed to write suggestion record");
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn generate_session_id() -> String {
    let pid = std::process::id();
    let ts = epoch_secs();
    format!("s{:x}", pid ^ (ts as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dw_protocol::{LogLine, DEFAULT_MARKER};

    fn read_record_lines(path: &Path) -> Vec<serde_json::Value> {
        let content = std::fs::read_to_string(path).unwrap();
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn event(sequence: u64) -> DenialEvent {
        DenialEvent::from_line(
            LogLine::from("avc:  denied  { read } for pid=1"),
            DEFAULT_MARKER,
            sequence,
        )
        .unwrap()
    }

    #[test]
    fn new_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("dir").join("suggestions.jsonl");
        let _record = SuggestionRecord::new(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn noop_record_discards() {
        let mut record = SuggestionRecord::noop();
        record.log_failure(&event(1), "boom");
    }

    #[test]
    fn suggestion_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suggestions.jsonl");
        let mut record = SuggestionRecord::new(&path).unwrap();

        record.log_suggestion(&event(1), &Suggestion::new("allow a b:file read;", "openai"));

        let lines = read_record_lines(&path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["type"], "suggestion");
        assert_eq!(lines[0]["sequence"], 1);
        assert_eq!(lines[0]["line"], "avc:  denied  { read } for pid=1");
        assert_eq!(lines[0]["backend"], "openai");
        assert_eq!(lines[0]["rule"], "allow a b:file read;");
        assert!(lines[0]["ts"].as_u64().unwrap() > 0);
    }

    #[test]
    fn failure_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suggestions.jsonl");
        let mut record = SuggestionRecord::new(&path).unwrap();

        record.log_failure(&event(2), "API error: 401");

        let lines = read_record_lines(&path);
        assert_eq!(lines[0]["type"], "failure");
        assert_eq!(lines[0]["error"], "API error: 401");
    }

    #[test]
    fn entries_append_with_same_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suggestions.jsonl");
        let mut record = SuggestionRecord::new(&path).unwrap();

        record.log_suggestion(&event(1), &Suggestion::new("allow a b:c d;", "mock"));
        record.log_failure(&event(2), "timeout");

        let lines = read_record_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["session"], lines[1]["session"]);
        assert_eq!(lines[1]["sequence"], 2);
    }
}
