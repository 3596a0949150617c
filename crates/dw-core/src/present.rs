//! Operator-facing output for denials and their suggested rules.

use std::io::{self, Write};

use serde::Serialize;

use dw_protocol::{DenialEvent, Suggestion};

use crate::style::Style;

const DIVIDER_WIDTH: usize = 80;

/// Receives each denial, then exactly one of its suggestion or failure.
pub trait Presenter: Send {
    fn denial(&mut self, event: &DenialEvent) -> io::Result<()>;
    fn suggestion(&mut self, event: &DenialEvent, suggestion: &Suggestion) -> io::Result<()>;
    fn failure(&mut self, event: &DenialEvent, error: &str) -> io::Result<()>;
}

/// Human-readable blocks, colored unless NO_COLOR is set.
pub struct TerminalPresenter<W> {
    out: W,
    style: Style,
}

impl TerminalPresenter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout(), Style::new())
    }
}

impl<W: Write> TerminalPresenter<W> {
    pub fn new(out: W, style: Style) -> Self {
        Self { out, style }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn divider(&mut self) -> io::Result<()> {
        writeln!(self.out, "{}", "=".repeat(DIVIDER_WIDTH))?;
        self.out.flush()
    }
}

impl<W: Write + Send> Presenter for TerminalPresenter<W> {
    fn denial(&mut self, event: &DenialEvent) -> io::Result<()> {
        let s = self.style;
        writeln!(
            self.out,
            "{}{}AVC DENIAL DETECTED{} #{}",
            s.bold_start(),
            s.red_start(),
            s.reset(),
            event.sequence
        )?;
        writeln!(self.out, "{}", event.text().trim())?;
        self.out.flush()
    }

    fn suggestion(&mut self, _event: &DenialEvent, suggestion: &Suggestion) -> io::Result<()> {
        let s = self.style;
        writeln!(
            self.out,
            "{}{}--- suggested rule ({}) ---{}",
            s.bold_start(),
            s.cyan_start(),
            suggestion.backend,
            s.reset()
        )?;
        writeln!(self.out, "{}{}{}", s.green_start(), suggestion.rule, s.reset())?;
        self.divider()
    }

    fn failure(&mut self, _event: &DenialEvent, error: &str) -> io::Result<()> {
        let s = self.style;
        writeln!(
            self.out,
            "{}suggestion failed: {}{}",
            s.yellow_start(),
            error,
            s.reset()
        )?;
        self.divider()
    }
}

/// One JSON object per denial, written once its outcome is known.
pub struct JsonPresenter<W> {
    out: W,
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    #[serde(flatten)]
    event: &'a DenialEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'a Suggestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl JsonPresenter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> JsonPresenter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, record: &JsonRecord<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        writeln!(self.out)?;
        self.out.flush()
    }
}

impl<W: Write + Send> Presenter for JsonPresenter<W> {
    fn denial(&mut self, _event: &DenialEvent) -> io::Result<()> {
        Ok(())
    }

    fn suggestion(&mut self, event: &DenialEvent, suggestion: &Suggestion) -> io::Result<()> {
        self.write(&JsonRecord {
            event,
            suggestion: Some(suggestion),
            error: None,
        })
    }

    fn failure(&mut self, event: &DenialEvent, error: &str) -> io::Result<()> {
        self.write(&JsonRecord {
            event,
            suggestion: None,
            error: Some(error),
        })
    }
}
