//! Fixed instruction context sent with every denial.

/// System prompt shared by all providers.
pub const SYSTEM_PROMPT: &str = "You are a professional Linux security engineer. \
For each SELinux denial log provided, output ONLY the 'allow' rule required in \
audit2allow syntax. No explanations.";

/// The user turn is the raw record, trimmed of surrounding whitespace.
pub fn user_message(line: &str) -> &str {
    line.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_asks_for_allow_rule_only() {
        assert!(SYSTEM_PROMPT.contains("'allow' rule"));
        assert!(SYSTEM_PROMPT.contains("audit2allow"));
        assert!(SYSTEM_PROMPT.contains("No explanations."));
    }

    #[test]
    fn user_message_is_raw_line() {
        let line = "type=AVC msg=audit(1:2): avc:  denied  { read } for pid=1\n";
        assert_eq!(
            user_message(line),
            "type=AVC msg=audit(1:2): avc:  denied  { read } for pid=1"
        );
    }
}
