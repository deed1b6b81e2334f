//! Normalized call and return events delivered by the host runtime.
//!
//! The host's native frame layer extracts call metadata into a [`CallEvent`]
//! before it ever reaches the engine. Nothing here touches host frames.

use std::hash::{Hash, Hasher};

use fnv::FnvHasher;

use crate::value::Value;

/// A named argument captured at call time. Order is significant and is
/// preserved through recording and export.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub value: Value,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Whether the event marks entry into or exit from a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Call,
    Return,
}

/// One normalized event from the host runtime.
///
/// `thread_id` of 0 means "resolve from the delivering thread": the session
/// substitutes the id its thread resolver reports. Hosts that already
/// normalize thread identity pass a nonzero id.
#[derive(Debug, Clone)]
pub struct CallEvent {
    /// Stable identifier of the call site. See [`call_site_id`] for hosts
    /// that lack a native one.
    pub call_site_id: u64,
    pub function_name: String,
    pub source_file: Option<String>,
    pub line: u32,
    pub arguments: Vec<Argument>,
    pub kind: EventKind,
    /// Observed return value, present only on `Return` events where the
    /// extractor captured one.
    pub return_value: Option<Value>,
    pub thread_id: u64,
}

impl CallEvent {
    /// An entry event with no location, arguments, or thread set.
    pub fn call(call_site_id: u64, function_name: impl Into<String>) -> Self {
        Self {
            call_site_id,
            function_name: function_name.into(),
            source_file: None,
            line: 0,
            arguments: Vec::new(),
            kind: EventKind::Call,
            return_value: None,
            thread_id: 0,
        }
    }

    /// An exit event carrying the observed return value, if any.
    pub fn ret(
        call_site_id: u64,
        function_name: impl Into<String>,
        return_value: Option<Value>,
    ) -> Self {
        Self {
            call_site_id,
            function_name: function_name.into(),
            source_file: None,
            line: 0,
            arguments: Vec::new(),
            kind: EventKind::Return,
            return_value,
            thread_id: 0,
        }
    }

    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.source_file = Some(file.into());
        self.line = line;
        self
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.push(Argument::new(name, value));
        self
    }

    pub fn with_thread(mut self, thread_id: u64) -> Self {
        self.thread_id = thread_id;
        self
    }

    /// Human-readable name used in trace events and warnings:
    /// `function_name (file)` when the source file is known.
    pub fn display_name(&self) -> String {
        match &self.source_file {
            Some(file) => format!("{} ({})", self.function_name, file),
            None => self.function_name.clone(),
        }
    }
}

/// Derive a stable u64 call-site id from a source location.
///
/// FNV-1a over file and line. Two events from the same location always get
/// the same id, across runs and across threads.
///
/// # Example
///
/// ```
/// use huella::event::call_site_id;
///
/// let a = call_site_id("src/app.py", 42);
/// let b = call_site_id("src/app.py", 42);
/// let c = call_site_id("src/app.py", 43);
/// assert_eq!(a, b);
/// assert_ne!(a, c);
/// ```
pub fn call_site_id(file: &str, line: u32) -> u64 {
    let mut hasher = FnvHasher::default();
    file.hash(&mut hasher);
    line.hash(&mut hasher);
    hasher.finish()
}
