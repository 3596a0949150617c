//! Terminal styling helpers with NO_COLOR support.

use std::io::IsTerminal;

/// Check if color output is enabled: stdout is a terminal and `NO_COLOR` is unset.
pub fn color_enabled() -> bool {
    std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
}

/// Terminal style helper that respects NO_COLOR.
#[derive(Debug, Clone, Copy)]
pub struct Style {
    enabled: bool,
}

impl Default for Style {
    fn default() -> Self {
        Self::new()
    }
}

impl Style {
    pub fn new() -> Self {
        Self {
            enabled: color_enabled(),
        }
    }

    /// Create a style with colors explicitly enabled (for tests).
    pub fn force_enabled() -> Self {
        Self { enabled: true }
    }

    /// Create a style with colors explicitly disabled.
    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    fn code(&self, code: &'static str) -> &'static str {
        if self.enabled {
            code
        } else {
            ""
        }
    }

    pub fn bold_start(&self) -> &'static str {
        self.code("\x1b[1m")
    }

    pub fn red_start(&self) -> &'static str {
        self.code("\x1b[31m")
    }

    pub fn yellow_start(&self) -> &'static str {
        self.code("\x1b[33m")
    }

    pub fn green_start(&self) -> &'static str {
        self.code("\x1b[32m")
    }

    pub fn cyan_start(&self) -> &'static str {
        self.code("\x1b[36m")
    }

    pub fn reset(&self) -> &'static str {
        self.code("\x1b[0m")
    }
}
