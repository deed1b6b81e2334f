//! Chrome trace-event export.
//!
//! The exporter renders a ledger into the trace-event JSON format that
//! `chrome://tracing` and Perfetto load directly:
//!
//! ```text
//! {
//!   "traceEvents": [
//!     {"name": "process_name", "ph": "M", "pid": 41, "tid": 0,
//!      "args": {"name": "app"}},
//!     {"name": "thread_name", "ph": "M", "pid": 41, "tid": 7,
//!      "args": {"name": "main"}},
//!     {"name": "fetch (src/app.py)", "cat": "call", "ph": "X",
//!      "pid": 41, "tid": 7, "ts": 12.5, "dur": 3.2, "line": 10,
//!      "args": [{"name": "url", "type": "str", "value": "\"/api\""}]}
//!   ]
//! }
//! ```
//!
//! Metadata events come first (the process, then every observed thread in
//! tid order), followed by one complete event per record in chronological
//! order. Records without a source file are skipped outright. `ts` and
//! `dur` are microseconds; a record that never saw its return exports
//! `dur` 0.

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::identity::ProcessResolver;
use crate::ledger::CallRecord;
use crate::threads::ThreadRegistry;

/// Top-level trace document.
#[derive(Debug, Serialize)]
pub struct TraceDocument {
    #[serde(rename = "traceEvents")]
    pub trace_events: Vec<TraceEvent>,
}

/// One event in the document. Untagged: each variant already carries its
/// `ph` discriminator field.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum TraceEvent {
    Metadata(MetadataEvent),
    Complete(CompleteEvent),
}

/// `ph: "M"` naming event for the process or a thread.
#[derive(Debug, Serialize)]
pub struct MetadataEvent {
    pub name: &'static str,
    pub ph: &'static str,
    pub pid: u32,
    pub tid: u64,
    pub args: MetadataArgs,
}

#[derive(Debug, Serialize)]
pub struct MetadataArgs {
    pub name: String,
}

/// `ph: "X"` event for one recorded call.
#[derive(Debug, Serialize)]
pub struct CompleteEvent {
    /// `function_name (file)`.
    pub name: String,
    pub cat: &'static str,
    pub ph: &'static str,
    pub pid: u32,
    pub tid: u64,
    /// Microseconds.
    pub ts: f64,
    /// Microseconds; 0 when the call never returned.
    pub dur: f64,
    pub line: u32,
    /// Ordered argument triples.
    pub args: Vec<ArgEntry>,
}

/// One exported argument.
#[derive(Debug, Serialize)]
pub struct ArgEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub type_label: &'static str,
    pub value: String,
}

/// Why an export failed. Export failures never corrupt the ledger; the
/// caller reports them and keeps collecting.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to serialize trace document: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write trace file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("no output file configured")]
    NoDestination,
}

const NANOS_PER_MICRO: f64 = 1_000.0;

/// Renders ledgers into trace documents.
#[derive(Debug, Clone)]
pub struct TraceExporter {
    pid: u32,
    process_name: String,
}

impl TraceExporter {
    /// Exporter using the resolver's process identity.
    pub fn new(resolver: &dyn ProcessResolver) -> Self {
        let (pid, process_name) = resolver.current_process();
        Self { pid, process_name }
    }

    /// Replace the resolved pid, keeping the process name. Used when the
    /// traced host wants its own pid in the document rather than ours.
    pub fn with_pid_override(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Build the document for the given records and threads.
    pub fn export(&self, records: &[CallRecord], threads: &ThreadRegistry) -> TraceDocument {
        let mut trace_events = Vec::with_capacity(records.len() + threads.len() + 1);

        trace_events.push(TraceEvent::Metadata(MetadataEvent {
            name: "process_name",
            ph: "M",
            pid: self.pid,
            tid: 0,
            args: MetadataArgs {
                name: self.process_name.clone(),
            },
        }));

        for info in threads.sorted() {
            trace_events.push(TraceEvent::Metadata(MetadataEvent {
                name: "thread_name",
                ph: "M",
                pid: self.pid,
                tid: info.thread_id,
                args: MetadataArgs {
                    name: info.display_name,
                },
            }));
        }

        for record in records {
            let file = match record.file.as_deref() {
                Some(file) => file,
                None => continue,
            };
            trace_events.push(TraceEvent::Complete(CompleteEvent {
                name: format!("{} ({})", record.function_name, file),
                cat: "call",
                ph: "X",
                pid: self.pid,
                tid: record.thread_id,
                ts: record.start_ts as f64 / NANOS_PER_MICRO,
                dur: record.duration.unwrap_or(0) as f64 / NANOS_PER_MICRO,
                line: record.line,
                args: record
                    .arguments
                    .iter()
                    .map(|arg| ArgEntry {
                        name: arg.name.clone(),
                        type_label: arg.value.type_label(),
                        value: arg.value.repr(),
                    })
                    .collect(),
            }));
        }

        TraceDocument { trace_events }
    }

    /// Pretty-printed JSON for the document.
    pub fn to_json(
        &self,
        records: &[CallRecord],
        threads: &ThreadRegistry,
    ) -> Result<String, ExportError> {
        let document = self.export(records, threads);
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Serialize and write the document to `path`.
    pub fn dump(
        &self,
        path: &Path,
        records: &[CallRecord],
        threads: &ThreadRegistry,
    ) -> Result<(), ExportError> {
        let json = self.to_json(records, threads)?;
        std::fs::write(path, json).map_err(|source| ExportError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}
