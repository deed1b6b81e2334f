//! Tracker session: lifecycle, event intake, and the coarse lock.
//!
//! A [`TrackerSession`] owns everything one collection run needs: the
//! record ledger, the hook chain, return expectations, observed threads,
//! the clock, and the warning channel. Hosts feed it normalized events,
//! directly via [`TrackerSession::on_event`] or through a
//! [`TrackerRegistry`](crate::registry::TrackerRegistry) feed.
//!
//! # State machine
//!
//! ```text
//!            start()                pause()
//!   Idle ──────────────▶ Collecting ─────────▶ Paused
//!    ▲                       │  ▲                │
//!    │        stop()         │  └────────────────┘
//!    └───────────────────────┴──────── resume()
//!                stop() from Paused also returns to Idle
//! ```
//!
//! Transitions outside the arrows are silent no-ops. `stop` is
//! idempotent. Fatal faults force the Idle state and park the fault for
//! [`TrackerSession::fault`].
//!
//! # Locking
//!
//! One mutex serializes ledger appends, thread upserts, verification,
//! configuration, and dumps. Hook dispatch deliberately runs after the
//! lock is released: callbacks are arbitrary user code and may feed new
//! events back into the session, which re-enters `on_event` on a free
//! lock instead of deadlocking.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thiserror::Error;

use crate::clock::{MonotonicSource, TimeSource, TraceClock};
use crate::event::{Argument, CallEvent, EventKind};
use crate::export::{ExportError, TraceExporter};
use crate::hooks::{DispatchFault, Hook, HookRegistry};
use crate::identity::{
    ProcessResolver, SystemProcessResolver, SystemThreadResolver, ThreadResolver,
};
use crate::ledger::CallLedger;
use crate::registry::TrackerRegistry;
use crate::threads::ThreadRegistry;
use crate::verifier::{ReturnExpectation, ReturnVerifier, VerifierStats};
use crate::warnings::{Warning, WarningChannel};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Session configuration, replaced wholesale by
/// [`TrackerSession::configure`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Emit one debug log line per recorded call.
    pub log_calls: bool,
    /// Pause the session after any event whose dispatch fired at least
    /// one hook, so the host can inspect state and `resume`.
    pub breakpoint_mode: bool,
    /// Destination for [`TrackerSession::dump_default`].
    pub output_file: Option<PathBuf>,
    /// Events whose source file starts with any of these prefixes are
    /// dropped before recording and before any hook. Events without a
    /// source file never match.
    pub exclude_path_prefixes: Vec<String>,
    /// When set, only events for these function names are processed.
    pub trace_functions: Option<HashSet<String>>,
}

/// Collection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Collecting = 1,
    Paused = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Collecting,
            2 => SessionState::Paused,
            _ => SessionState::Idle,
        }
    }
}

/// Why a session terminated itself. Stored on the session; collection
/// has already stopped by the time one of these is observable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionFault {
    /// A hook callback returned an error.
    #[error("hook '{alias}' failed: {detail}")]
    HookFailed { alias: String, detail: String },
    /// A hook with terminate-after-fire fired.
    #[error("hook '{alias}' requested termination")]
    HookTerminated { alias: String },
    /// An escalated return expectation did not match.
    #[error(
        "return expectation violated at site {call_site_id}: expected {expected}, observed {observed}"
    )]
    ExpectationViolated {
        call_site_id: u64,
        expected: String,
        observed: String,
    },
}

/// Point-in-time session counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerStatus {
    pub state: SessionState,
    pub recorded_calls: usize,
    /// Calls still waiting for their return.
    pub open_calls: usize,
    pub threads: usize,
    /// Thread that produced the most recent record.
    pub chain_owner: Option<u64>,
    pub pending_warnings: usize,
}

/// State behind the session lock.
struct SessionCore {
    state: SessionState,
    ledger: CallLedger,
    threads: ThreadRegistry,
    verifier: ReturnVerifier,
    config: TrackerConfig,
    fault: Option<SessionFault>,
}

/// One call-tracing session.
pub struct TrackerSession {
    id: u64,
    core: Mutex<SessionCore>,
    /// Lock-free mirror of `core.state` for the event fast path.
    state_mirror: AtomicU8,
    hooks: HookRegistry,
    clock: TraceClock,
    warnings: WarningChannel,
    registry: Arc<TrackerRegistry>,
    thread_resolver: Box<dyn ThreadResolver>,
    process_resolver: Box<dyn ProcessResolver>,
    self_handle: Weak<TrackerSession>,
}

impl TrackerSession {
    /// Session with system collaborators.
    pub fn new(registry: Arc<TrackerRegistry>) -> Arc<Self> {
        Self::with_collaborators(
            registry,
            Box::new(MonotonicSource::new()),
            Box::new(SystemThreadResolver),
            Box::new(SystemProcessResolver),
        )
    }

    /// Session with injected collaborators, for hosts with their own
    /// identity scheme and for deterministic tests.
    pub fn with_collaborators(
        registry: Arc<TrackerRegistry>,
        time_source: Box<dyn TimeSource>,
        thread_resolver: Box<dyn ThreadResolver>,
        process_resolver: Box<dyn ProcessResolver>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_handle| Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            core: Mutex::new(SessionCore {
                state: SessionState::Idle,
                ledger: CallLedger::new(),
                threads: ThreadRegistry::new(),
                verifier: ReturnVerifier::new(),
                config: TrackerConfig::default(),
                fault: None,
            }),
            state_mirror: AtomicU8::new(SessionState::Idle as u8),
            hooks: HookRegistry::new(),
            clock: TraceClock::with_source(time_source),
            warnings: WarningChannel::new(),
            registry,
            thread_resolver,
            process_resolver,
            self_handle: self_handle.clone(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current state, readable without the session lock.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state_mirror.load(Ordering::Acquire))
    }

    fn core(&self) -> MutexGuard<'_, SessionCore> {
        // A poisoned lock means a panic mid-update; the inner value is
        // still the best available truth, so recover it.
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, core: &mut SessionCore, state: SessionState) {
        core.state = state;
        self.state_mirror.store(state as u8, Ordering::Release);
    }

    /// Begin (or restart) collecting and claim the active-tracker slot.
    ///
    /// Installation is last-writer-wins: a live session already in the
    /// slot is displaced and an [`Warning::ActiveTakeover`] is reported
    /// on this session's channel. Starting while already collecting is a
    /// no-op; starting from Paused resumes collection. Any stored fault
    /// is discarded.
    pub fn start(&self) {
        {
            let mut core = self.core();
            if core.state == SessionState::Collecting {
                return;
            }
            core.fault = None;
            self.set_state(&mut core, SessionState::Collecting);
        }
        let replaced = self.registry.install(self.id, self.self_handle.clone());
        if let Some(previous) = replaced {
            if previous != self.id {
                self.warnings.push(Warning::ActiveTakeover {
                    previous_session: previous,
                    session: self.id,
                });
            }
        }
        tracing::debug!("session {} collecting", self.id);
    }

    /// Stop collecting and release the active-tracker slot. Idempotent;
    /// safe from any state.
    pub fn stop(&self) {
        {
            let mut core = self.core();
            self.set_state(&mut core, SessionState::Idle);
        }
        self.registry.release(self.id);
    }

    /// Suspend collection. Only meaningful while collecting.
    pub fn pause(&self) {
        let mut core = self.core();
        if core.state == SessionState::Collecting {
            self.set_state(&mut core, SessionState::Paused);
        }
    }

    /// Resume a paused session. Only meaningful while paused.
    pub fn resume(&self) {
        let mut core = self.core();
        if core.state == SessionState::Paused {
            self.set_state(&mut core, SessionState::Collecting);
        }
    }

    /// Terminal path for fatal faults: collection ends, the slot is
    /// released, the fault is parked for the host.
    fn terminate(&self, fault: SessionFault) {
        tracing::error!("session {} terminated: {}", self.id, fault);
        {
            let mut core = self.core();
            core.fault = Some(fault);
            self.set_state(&mut core, SessionState::Idle);
        }
        self.registry.release(self.id);
    }

    /// Replace the whole configuration.
    pub fn configure(&self, config: TrackerConfig) {
        self.core().config = config;
    }

    pub fn config(&self) -> TrackerConfig {
        self.core().config.clone()
    }

    /// Register a hook.
    ///
    /// # Returns
    ///
    /// The effective alias (the hook's own, or a generated `hook-N`).
    pub fn add_hook(&self, hook: Hook) -> String {
        self.hooks.register(hook)
    }

    pub fn add_return_expectation(&self, expectation: ReturnExpectation) {
        self.core().verifier.register(expectation);
    }

    /// Drop every recorded call. Hooks, expectations, and observed
    /// threads are untouched.
    pub fn clear(&self) {
        self.core().ledger.clear();
    }

    pub fn clear_hooks(&self) {
        self.hooks.clear();
    }

    pub fn clear_return_expectations(&self) {
        self.core().verifier.clear();
    }

    pub fn verifier_stats(&self) -> VerifierStats {
        self.core().verifier.stats()
    }

    /// Take every pending warning.
    pub fn drain_warnings(&self) -> Vec<Warning> {
        self.warnings.drain()
    }

    /// Fault that terminated the session, if any.
    pub fn fault(&self) -> Option<SessionFault> {
        self.core().fault.clone()
    }

    pub fn take_fault(&self) -> Option<SessionFault> {
        self.core().fault.take()
    }

    pub fn status(&self) -> TrackerStatus {
        let core = self.core();
        TrackerStatus {
            state: core.state,
            recorded_calls: core.ledger.len(),
            open_calls: core.ledger.open_count(),
            threads: core.threads.len(),
            chain_owner: core.threads.chain_owner(),
            pending_warnings: self.warnings.pending(),
        }
    }

    /// Process one normalized event.
    ///
    /// Callable from any thread. Does nothing unless the session is
    /// collecting. Call events append a record and then dispatch hooks
    /// outside the lock; return events close the newest open record and
    /// run verification.
    pub fn on_event(&self, event: CallEvent) {
        if self.state() != SessionState::Collecting {
            return;
        }
        match event.kind {
            EventKind::Call => self.handle_call(event),
            EventKind::Return => self.handle_return(event),
        }
    }

    fn handle_call(&self, event: CallEvent) {
        let CallEvent {
            call_site_id,
            function_name,
            source_file,
            line,
            arguments,
            thread_id,
            ..
        } = event;
        let args: Arc<[Argument]> = arguments.into();

        let (tid, log_calls, breakpoint_mode) = {
            let mut core = self.core();
            // The lock-free check above raced; this one is authoritative.
            if core.state != SessionState::Collecting {
                return;
            }
            if is_excluded(&core.config, source_file.as_deref()) {
                return;
            }
            if !is_traced(&core.config, &function_name) {
                return;
            }

            let (resolved_id, thread_name) = self.thread_resolver.current_thread();
            let tid = if thread_id == 0 { resolved_id } else { thread_id };
            core.threads.observe(tid, &thread_name);

            // Stamping under the lock keeps ledger order and timestamp
            // order identical.
            let start_ts = self.clock.now();
            core.ledger.record_call(
                function_name.clone(),
                source_file,
                line,
                Arc::clone(&args),
                tid,
                start_ts,
            );
            (tid, core.config.log_calls, core.config.breakpoint_mode)
        };

        if log_calls {
            tracing::debug!(
                "call {} at site {} on thread {}: {}",
                function_name,
                call_site_id,
                tid,
                render_args(&args)
            );
        }

        match self.hooks.dispatch(&args) {
            Ok(outcome) => {
                if breakpoint_mode && outcome.fired > 0 {
                    self.pause();
                    tracing::debug!(
                        "session {} paused after {} hook(s) fired",
                        self.id,
                        outcome.fired
                    );
                }
            }
            Err(DispatchFault::HookFailed { alias, error }) => {
                self.terminate(SessionFault::HookFailed {
                    alias,
                    detail: format!("{error:#}"),
                });
            }
            Err(DispatchFault::Terminated { alias }) => {
                self.terminate(SessionFault::HookTerminated { alias });
            }
        }
    }

    fn handle_return(&self, event: CallEvent) {
        let violation = {
            let mut core = self.core();
            if core.state != SessionState::Collecting {
                return;
            }
            // Filters apply to both event kinds; otherwise a return from
            // a filtered call would close some unrelated open record.
            if is_excluded(&core.config, event.source_file.as_deref()) {
                return;
            }
            if !is_traced(&core.config, &event.function_name) {
                return;
            }

            let now = self.clock.now();
            core.ledger.record_return(now);

            match &event.return_value {
                Some(observed) => match core.verifier.verify(event.call_site_id, observed) {
                    Ok(summary) => {
                        for detail in summary.mismatches {
                            self.warnings.push(Warning::ReturnMismatch {
                                call_site_id: detail.call_site_id,
                                function: event.function_name.clone(),
                                expected: detail.expected,
                                observed: detail.observed,
                            });
                        }
                        for _ in 0..summary.range_exceeded {
                            self.warnings.push(Warning::RangeExceeded {
                                call_site_id: event.call_site_id,
                                function: event.function_name.clone(),
                            });
                        }
                        None
                    }
                    Err(violation) => Some(violation),
                },
                None => None,
            }
        };

        if let Some(violation) = violation {
            self.terminate(SessionFault::ExpectationViolated {
                call_site_id: violation.call_site_id,
                expected: violation.expected,
                observed: violation.observed,
            });
        }
    }

    /// Write the trace document to `path`.
    ///
    /// Reads the ledger under the session lock; never mutates it. A
    /// failure is reported as [`Warning::ExportFailed`] and returned,
    /// and collection continues unaffected.
    pub fn dump(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let path = path.as_ref();
        let exporter = TraceExporter::new(self.process_resolver.as_ref());
        let result = {
            let core = self.core();
            exporter.dump(path, core.ledger.records(), &core.threads)
        };
        if let Err(error) = &result {
            self.warnings.push(Warning::ExportFailed {
                path: path.display().to_string(),
                detail: error.to_string(),
            });
        }
        result
    }

    /// [`TrackerSession::dump`] to the configured `output_file`.
    pub fn dump_default(&self) -> Result<(), ExportError> {
        let path = { self.core().config.output_file.clone() };
        match path {
            Some(path) => self.dump(path),
            None => Err(ExportError::NoDestination),
        }
    }
}

fn is_excluded(config: &TrackerConfig, file: Option<&str>) -> bool {
    match file {
        Some(file) => config
            .exclude_path_prefixes
            .iter()
            .any(|prefix| file.starts_with(prefix.as_str())),
        None => false,
    }
}

fn is_traced(config: &TrackerConfig, function_name: &str) -> bool {
    match &config.trace_functions {
        Some(allowed) => allowed.contains(function_name),
        None => true,
    }
}

fn render_args(args: &[Argument]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&arg.name);
        out.push('=');
        out.push_str(&arg.value.repr());
    }
    out
}
