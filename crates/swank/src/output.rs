//! Colored terminal output utilities.

use console::{Style, Term};

/// Terminal output formatter.
///
/// Messages go to stderr; the announced URL goes to stdout so it can be
/// piped.
pub(crate) struct Output {
    err: Term,
    out: Term,
    green: Style,
    yellow: Style,
    red: Style,
}

impl Output {
    /// Create a new output formatter.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            err: Term::stderr(),
            out: Term::stdout(),
            green: Style::new().green(),
            yellow: Style::new().yellow(),
            red: Style::new().red(),
        }
    }

    /// Print the URL the server is reachable at (green).
    pub(crate) fn url(&self, url: &str) {
        let line = format!("\n>  {url}\n");
        let _ = self.out.write_line(&self.green.apply_to(line).to_string());
    }

    /// Print a warning message (yellow).
    pub(crate) fn warning(&self, msg: &str) {
        let _ = self
            .err
            .write_line(&self.yellow.apply_to(format!("WARNING: {msg}")).to_string());
    }

    /// Print an error message (red).
    pub(crate) fn error(&self, msg: &str) {
        let _ = self
            .err
            .write_line(&self.red.apply_to(format!("ERROR: {msg}")).to_string());
    }
}
