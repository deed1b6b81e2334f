//! Registry of threads observed during a collection run.
//!
//! Every recorded call upserts the producing thread. Entries are never
//! removed while the session lives; the exporter turns them into
//! `thread_name` metadata events.

use std::collections::HashMap;

/// One observed thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub thread_id: u64,
    pub display_name: String,
}

/// Threads seen so far, plus the owner of the most recent record.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: HashMap<u64, ThreadInfo>,
    chain_owner: Option<u64>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `thread_id` just produced a call record. The display
    /// name sticks from the first observation; later observations only
    /// update the chain owner.
    pub fn observe(&mut self, thread_id: u64, display_name: &str) {
        self.threads.entry(thread_id).or_insert_with(|| ThreadInfo {
            thread_id,
            display_name: display_name.to_string(),
        });
        self.chain_owner = Some(thread_id);
    }

    /// Thread that produced the most recent record, if any.
    pub fn chain_owner(&self) -> Option<u64> {
        self.chain_owner
    }

    pub fn get(&self, thread_id: u64) -> Option<&ThreadInfo> {
        self.threads.get(&thread_id)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Snapshot ordered by thread id, for deterministic export.
    pub fn sorted(&self) -> Vec<ThreadInfo> {
        let mut out: Vec<ThreadInfo> = self.threads.values().cloned().collect();
        out.sort_by_key(|info| info.thread_id);
        out
    }

    pub fn clear(&mut self) {
        self.threads.clear();
        self.chain_owner = None;
    }
}
