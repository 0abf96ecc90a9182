//! Tracing setup and plain-text formatting for events and errors.

use std::io::IsTerminal;

use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::channels::errors::{ErrorChain, ErrorEvent, ErrorScope};
use crate::event_bus::Event;

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta
pub const RESET_COLOR: &str = "\x1b[0m";

/// Install the global tracing subscriber: env-filtered fmt layer plus the
/// span-trace error layer. Safe to call more than once; later calls are
/// no-ops.
///
/// Filtering follows `RUST_LOG`, defaulting to `info` for this crate.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("loomflow=info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(ErrorLayer::default())
        .try_init();
}

/// Formatter color mode for telemetry output.
///
/// - [`FormatterMode::Auto`]: detects TTY capability via `stderr`
/// - [`FormatterMode::Colored`]: always include color codes
/// - [`FormatterMode::Plain`]: never include color codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatterMode {
    #[default]
    Auto,
    Colored,
    Plain,
}

impl FormatterMode {
    /// Auto-detect mode based on stderr TTY capability.
    pub fn auto_detect() -> Self {
        if std::io::stderr().is_terminal() {
            FormatterMode::Colored
        } else {
            FormatterMode::Plain
        }
    }

    /// Returns true if this mode should use colored output.
    pub fn is_colored(&self) -> bool {
        match self {
            FormatterMode::Auto => std::io::stderr().is_terminal(),
            FormatterMode::Colored => true,
            FormatterMode::Plain => false,
        }
    }
}

/// Rendered output for a telemetry item that can be consumed by sinks.
#[derive(Clone, Debug, Default)]
pub struct EventRender {
    pub context: Option<String>,
    pub lines: Vec<String>,
}

impl EventRender {
    pub fn join_lines(&self) -> String {
        self.lines.join("")
    }
}

pub trait TelemetryFormatter: Send + Sync {
    fn render_event(&self, event: &Event) -> EventRender;
    fn render_errors(&self, errors: &[ErrorEvent]) -> Vec<EventRender>;
}

/// Plain text formatter with optional ANSI color codes.
pub struct PlainFormatter {
    mode: FormatterMode,
}

impl PlainFormatter {
    /// Create a new formatter with auto-detected color mode.
    pub fn new() -> Self {
        Self {
            mode: FormatterMode::Auto,
        }
    }

    /// Create a new formatter with explicit color mode.
    pub fn with_mode(mode: FormatterMode) -> Self {
        Self { mode }
    }

    fn color<'a>(&self, ansi_code: &'a str) -> &'a str {
        if self.mode.is_colored() { ansi_code } else { "" }
    }

    fn reset(&self) -> &str {
        if self.mode.is_colored() {
            RESET_COLOR
        } else {
            ""
        }
    }
}

impl Default for PlainFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn format_error_chain(error: &ErrorChain, indent: usize, use_color: bool) -> Vec<String> {
    let pad = "  ".repeat(indent);
    let (line_color, reset) = if use_color {
        (LINE_COLOR, RESET_COLOR)
    } else {
        ("", "")
    };
    let mut lines = vec![format!("{pad}{line_color}{}{reset}\n", error.message)];
    if !error.details.is_null() {
        lines.push(format!("{pad}  details: {}\n", error.details));
    }
    if let Some(cause) = &error.cause {
        lines.push(format!("{pad}  caused by:\n"));
        lines.extend(format_error_chain(cause, indent + 2, use_color));
    }
    lines
}

fn scope_header(scope: &ErrorScope) -> String {
    match scope {
        ErrorScope::Node { kind, step } => format!("node {kind} (step {step})"),
        ErrorScope::Scheduler { step } => format!("scheduler (step {step})"),
        ErrorScope::Runner { session, step } => format!("runner {session} (step {step})"),
        ErrorScope::App => "app".to_string(),
    }
}

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &Event) -> EventRender {
        let scope = event.scope_label().unwrap_or("event");
        EventRender {
            context: Some(scope.to_string()),
            lines: vec![format!(
                "{}[{scope}]{} {}\n",
                self.color(CONTEXT_COLOR),
                self.reset(),
                event.message()
            )],
        }
    }

    fn render_errors(&self, errors: &[ErrorEvent]) -> Vec<EventRender> {
        errors
            .iter()
            .map(|event| {
                let mut lines = vec![format!(
                    "{}{}{} at {}\n",
                    self.color(CONTEXT_COLOR),
                    scope_header(&event.scope),
                    self.reset(),
                    event.when.to_rfc3339()
                )];
                lines.extend(format_error_chain(
                    &event.error,
                    1,
                    self.mode.is_colored(),
                ));
                if !event.tags.is_empty() {
                    lines.push(format!("  tags: {}\n", event.tags.join(", ")));
                }
                EventRender {
                    context: Some(scope_header(&event.scope)),
                    lines,
                }
            })
            .collect()
    }
}
