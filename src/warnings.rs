//! Structured non-fatal warnings.
//!
//! Recoverable conditions are pushed onto a lock-free queue and mirrored
//! to the `tracing` subscriber. The queue makes "reported, non-fatal"
//! observable: hosts and tests drain it instead of scraping log output.

use std::fmt;

use crossbeam::queue::SegQueue;

/// A reported, non-fatal condition. Collection continues after each one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A starting session displaced a live one.
    ActiveTakeover { previous_session: u64, session: u64 },
    /// An observed return did not match a non-escalating expectation.
    ReturnMismatch {
        call_site_id: u64,
        function: String,
        expected: String,
        observed: String,
    },
    /// An iterative expectation ran out of expected values.
    RangeExceeded { call_site_id: u64, function: String },
    /// A trace dump could not be written.
    ExportFailed { path: String, detail: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::ActiveTakeover {
                previous_session,
                session,
            } => write!(
                f,
                "session {session} took over active tracking from session {previous_session}"
            ),
            Warning::ReturnMismatch {
                call_site_id,
                function,
                expected,
                observed,
            } => write!(
                f,
                "return mismatch at site {call_site_id} in {function}: expected {expected}, observed {observed}"
            ),
            Warning::RangeExceeded {
                call_site_id,
                function,
            } => write!(
                f,
                "expected return sequence exhausted at site {call_site_id} in {function}"
            ),
            Warning::ExportFailed { path, detail } => {
                write!(f, "trace export to {path} failed: {detail}")
            }
        }
    }
}

/// Unbounded lock-free warning queue.
///
/// Push is safe from any thread, inside or outside session locks. The
/// queue is unbounded because warnings are rare and dropping them would
/// defeat their purpose.
#[derive(Debug, Default)]
pub struct WarningChannel {
    queue: SegQueue<Warning>,
}

impl WarningChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a warning and mirror it to the log.
    pub fn push(&self, warning: Warning) {
        tracing::warn!("{}", warning);
        self.queue.push(warning);
    }

    /// Take every pending warning in arrival order.
    pub fn drain(&self) -> Vec<Warning> {
        let mut out = Vec::new();
        while let Some(warning) = self.queue.pop() {
            out.push(warning);
        }
        out
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
