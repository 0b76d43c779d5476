//! Presentation sinks
//!
//! The trigger handler talks to the host UI only through [`OutputSink`]:
//! a keyed status line and named output panels.

use std::collections::BTreeMap;
use std::io::Write;

/// Host surface that displays run status and details.
pub trait OutputSink {
    /// Replace the status text shown under `key`.
    fn set_status(&mut self, key: &str, text: &str);

    /// Replace the whole content of panel `name` with `text`.
    fn write_panel(&mut self, name: &str, text: &str);

    fn show_panel(&mut self, name: &str);

    fn hide_panel(&mut self, name: &str);
}

/// Prints status changes and visible panels to a writer.
///
/// Repeated identical status updates are collapsed so the poll loop does not
/// flood the terminal.
pub struct TerminalSink<W: Write> {
    out: W,
    statuses: BTreeMap<String, String>,
    panels: BTreeMap<String, String>,
}

impl TerminalSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            statuses: BTreeMap::new(),
            panels: BTreeMap::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> OutputSink for TerminalSink<W> {
    fn set_status(&mut self, key: &str, text: &str) {
        if self.statuses.get(key).map(String::as_str) == Some(text) {
            return;
        }
        self.statuses.insert(key.to_string(), text.to_string());
        let _ = writeln!(self.out, "[{}] {}", key, text.trim_end());
        let _ = self.out.flush();
    }

    fn write_panel(&mut self, name: &str, text: &str) {
        self.panels.insert(name.to_string(), text.to_string());
    }

    fn show_panel(&mut self, name: &str) {
        let Some(text) = self.panels.get(name) else {
            return;
        };
        // A leading line already printed as a status is not repeated.
        let body = match text.split_once('\n') {
            Some((first, rest)) if self.statuses.values().any(|s| s.trim_end() == first) => rest,
            _ => text.as_str(),
        };
        if body.is_empty() {
            return;
        }
        let _ = write!(self.out, "{}", body);
        if !body.ends_with('\n') {
            let _ = writeln!(self.out);
        }
        let _ = self.out.flush();
    }

    fn hide_panel(&mut self, _name: &str) {}
}
