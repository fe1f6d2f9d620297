//! Terminal colors for CLI messages and result scores.
//!
//! Whether to color is decided once per process: `NO_COLOR` or a stdout
//! that is not a terminal turns every style into plain text.

use std::sync::LazyLock;

use comfy_table::Color;
use console::Style;
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

/// Theme for the running process.
pub static THEME: LazyLock<Theme> = LazyLock::new(Theme::detect);

/// Similarity from which a result is shown as a strong match.
const STRONG_MATCH: f32 = 0.75;
/// Similarity from which a result is shown as a fair match.
const FAIR_MATCH: f32 = 0.6;

/// Outcome a status line reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Failure,
    Caution,
}

impl Tone {
    fn icon(self) -> &'static str {
        match self {
            Tone::Success => "✓",
            Tone::Failure => "✗",
            Tone::Caution => "⚠",
        }
    }

    fn style(self) -> Style {
        match self {
            Tone::Success => Style::new().green().bright(),
            Tone::Failure => Style::new().red().bright(),
            Tone::Caution => Style::new().yellow().bright(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Theme {
    colored: bool,
    header: Style,
    muted: Style,
}

impl Theme {
    /// Colors when stdout is a terminal and `NO_COLOR` is unset.
    pub fn detect() -> Self {
        let colored = std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal();
        Self::with_colors(colored)
    }

    /// A theme that never emits escape codes.
    pub fn plain() -> Self {
        Self::with_colors(false)
    }

    fn with_colors(colored: bool) -> Self {
        Self {
            colored,
            header: Style::new().cyan().bold(),
            muted: Style::new().dim(),
        }
    }

    pub fn colored(&self) -> bool {
        self.colored
    }

    /// One status line: icon, then the message in the tone's color.
    pub fn status(&self, tone: Tone, text: &str) -> String {
        let icon = tone.icon();
        if !self.colored {
            return format!("{icon} {text}");
        }
        let icon = match tone {
            Tone::Success => icon.green().to_string(),
            Tone::Failure => icon.red().to_string(),
            Tone::Caution => icon.yellow().to_string(),
        };
        format!("{icon} {}", tone.style().apply_to(text))
    }

    pub fn header(&self, text: &str) -> String {
        self.paint(&self.header, text)
    }

    /// Secondary text such as recovery hints.
    pub fn muted(&self, text: &str) -> String {
        self.paint(&self.muted, text)
    }

    /// Table color for a result with `similarity` in `[0, 1]`.
    pub fn score_color(&self, similarity: f32) -> Color {
        if !self.colored {
            Color::Reset
        } else if similarity >= STRONG_MATCH {
            Color::Green
        } else if similarity >= FAIR_MATCH {
            Color::Yellow
        } else {
            Color::Reset
        }
    }

    fn paint(&self, style: &Style, text: &str) -> String {
        if self.colored {
            style.apply_to(text).to_string()
        } else {
            text.to_string()
        }
    }
}
