//! Append-only store of call records.
//!
//! Records live in a flat arena in the order calls were observed, so the
//! arena index doubles as chronological position. A separate stack tracks
//! records still waiting for their return; pairing is last-in first-out,
//! matching nested call structure on a single thread.

use std::sync::Arc;

use crate::event::Argument;

/// Index of a record inside its ledger. Stable for the ledger's lifetime;
/// records are never reordered or removed individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId(usize);

impl RecordId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One recorded call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub function_name: String,
    /// Source file, when the host knew it. Records without one are kept
    /// but skipped at export.
    pub file: Option<String>,
    pub line: u32,
    /// Captured arguments, shared with hook dispatch.
    pub arguments: Arc<[Argument]>,
    pub thread_id: u64,
    /// Strictly monotonic capture timestamp in nanoseconds.
    pub start_ts: u64,
    /// Wall time between call and return. `None` until the matching
    /// return arrives; stays `None` forever if it never does.
    pub duration: Option<u64>,
}

impl CallRecord {
    /// `function_name (file)`, or `None` when the record has no file and
    /// is therefore invisible to export.
    pub fn display_name(&self) -> Option<String> {
        self.file
            .as_deref()
            .map(|file| format!("{} ({})", self.function_name, file))
    }
}

/// Arena of call records plus the stack of still-open ones.
#[derive(Debug, Default)]
pub struct CallLedger {
    records: Vec<CallRecord>,
    open: Vec<RecordId>,
}

impl CallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record for an observed call and mark it open.
    #[allow(clippy::too_many_arguments)]
    pub fn record_call(
        &mut self,
        function_name: String,
        file: Option<String>,
        line: u32,
        arguments: Arc<[Argument]>,
        thread_id: u64,
        start_ts: u64,
    ) -> RecordId {
        let id = RecordId(self.records.len());
        self.records.push(CallRecord {
            function_name,
            file,
            line,
            arguments,
            thread_id,
            start_ts,
            duration: None,
        });
        self.open.push(id);
        id
    }

    /// Close the most recently opened record that is still open, setting
    /// its duration from `now`.
    ///
    /// # Returns
    ///
    /// The closed record's id and duration, or `None` when no record was
    /// open. A return with nothing open is not an error.
    pub fn record_return(&mut self, now: u64) -> Option<(RecordId, u64)> {
        let id = self.open.pop()?;
        let record = &mut self.records[id.0];
        let duration = now.saturating_sub(record.start_ts);
        record.duration = Some(duration);
        Some((id, duration))
    }

    /// All records in chronological order.
    pub fn records(&self) -> &[CallRecord] {
        &self.records
    }

    pub fn get(&self, id: RecordId) -> Option<&CallRecord> {
        self.records.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records still waiting for a return.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Drop every record and the open stack.
    pub fn clear(&mut self) {
        self.records.clear();
        self.open.clear();
    }
}
