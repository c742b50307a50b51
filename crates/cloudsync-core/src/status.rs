//! Progress narration for multi-step operations.
//!
//! Write operations report each sub-step through a [`StatusSink`] handed to
//! them by the caller. Nothing in the core ever reads these lines back.

use std::sync::Mutex;

use tracing::info;

/// Receiver of human-readable progress lines.
pub trait StatusSink: Send + Sync {
    /// Record that `phase` reached `message`.
    fn update(&self, phase: &str, message: &str);
}

/// A sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl StatusSink for NullSink {
    fn update(&self, _phase: &str, _message: &str) {}
}

/// One recorded progress line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// Phase name, e.g. `UPSERT_LOAD_BALANCER`.
    pub phase: String,
    /// Message.
    pub message: String,
}

/// A sink that keeps every line and mirrors it to `tracing`.
#[derive(Debug, Default)]
pub struct TaskLog {
    lines: Mutex<Vec<StatusLine>>,
}

impl TaskLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the lines recorded so far.
    pub fn lines(&self) -> Vec<StatusLine> {
        self.lines.lock().expect("task log lock poisoned").clone()
    }

    /// Whether any recorded message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .expect("task log lock poisoned")
            .iter()
            .any(|l| l.message.contains(needle))
    }
}

impl StatusSink for TaskLog {
    fn update(&self, phase: &str, message: &str) {
        info!(phase, "{message}");
        self.lines
            .lock()
            .expect("task log lock poisoned")
            .push(StatusLine {
                phase: phase.to_string(),
                message: message.to_string(),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_log_records_in_order() {
        let log = TaskLog::new();
        log.update("UPSERT", "creating listener");
        log.update("UPSERT", "registering targets");

        let lines = log.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].message, "registering targets");
        assert!(log.contains("creating"));
        assert!(!log.contains("deleting"));
    }

    #[test]
    fn null_sink_is_silent() {
        NullSink.update("UPSERT", "ignored");
    }
}
