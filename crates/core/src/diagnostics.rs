//! Where the engine reports what it is doing.
//!
//! Nothing in this workspace writes to a process-wide logger on the execution path; the engine is
//! handed a [`Diagnostics`] implementation instead. [`LogDiagnostics`] forwards to the `log`
//! facade, and [`CapturingDiagnostics`] keeps every entry in memory so tests can inspect them.

use std::sync::Mutex;

use log::Level;

pub trait Diagnostics: Send + Sync {
    fn log(&self, level: Level, message: &str);

    fn debug(&self, message: &str) {
        self.log(Level::Debug, message)
    }

    fn info(&self, message: &str) {
        self.log(Level::Info, message)
    }

    fn warn(&self, message: &str) {
        self.log(Level::Warn, message)
    }

    fn error(&self, message: &str) {
        self.log(Level::Error, message)
    }
}

/// Forwards every entry to the `log` crate under the `pinion` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn log(&self, level: Level, message: &str) {
        log::log!(target: "pinion", level, "{message}");
    }
}

#[derive(Debug, Default)]
pub struct CapturingDiagnostics {
    entries: Mutex<Vec<(Level, String)>>,
}

impl CapturingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|(l, m)| (l == level).then_some(m))
            .collect()
    }
}

impl Diagnostics for CapturingDiagnostics {
    fn log(&self, level: Level, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, message.to_owned()));
        }
    }
}

#[test]
fn capture_entries() {
    let diag = CapturingDiagnostics::new();
    diag.debug("a");
    diag.warn("b");
    diag.warn("c");
    assert_eq!(diag.entries().len(), 3);
    assert_eq!(diag.messages_at(Level::Warn), vec!["b", "c"]);
    assert!(diag.messages_at(Level::Error).is_empty());
}
