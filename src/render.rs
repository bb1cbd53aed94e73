//! Output rendering for chat turns.
//!
//! The session driver reports each turn to a [`Renderer`] as it streams, so
//! the same session logic can print to a terminal or be captured in tests.

use std::io::{self, Stdout, Write};

/// ANSI escape code for dim text (used for informational lines).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the reply label).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for rendering a streaming reply.
pub trait Renderer: Send {
    /// Called once a reply starts streaming.
    fn start_response(&mut self, model: &str) {
        _ = model;
    }

    /// Print a fragment of the reply.
    ///
    /// Called incrementally, in arrival order, as content frames are decoded.
    fn print_text(&mut self, text: &str);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Called when a reply is complete.
    fn finish_response(&mut self);

    /// Called when the reply is cancelled by the user.
    fn print_interrupted(&mut self) {}
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
    line_start: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            line_start: true,
        }
    }

    /// Flushes stdout to ensure immediate display of streamed content.
    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn write(&mut self, text: &str) {
        print!("{text}");
        if let Some(last) = text.chars().last() {
            self.line_start = last == '\n';
        }
        self.flush();
    }

    /// Ends a partially written line so the next message starts cleanly.
    fn break_line(&mut self) {
        if !self.line_start {
            self.write("\n");
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn start_response(&mut self, model: &str) {
        self.break_line();
        if self.use_color {
            self.write(&format!("{ANSI_CYAN}[{model}]{ANSI_RESET} "));
        } else {
            self.write(&format!("[{model}] "));
        }
    }

    fn print_text(&mut self, text: &str) {
        self.write(text);
    }

    fn print_error(&mut self, error: &str) {
        self.break_line();
        if self.use_color {
            eprintln!("{ANSI_RED}Error: {error}{ANSI_RESET}");
        } else {
            eprintln!("Error: {error}");
        }
    }

    fn print_info(&mut self, info: &str) {
        self.break_line();
        if self.use_color {
            self.write(&format!("{ANSI_DIM}{info}{ANSI_RESET}\n"));
        } else {
            self.write(&format!("{info}\n"));
        }
    }

    fn finish_response(&mut self) {
        self.break_line();
    }

    fn print_interrupted(&mut self) {
        self.break_line();
        self.write("[interrupted]\n");
    }
}
