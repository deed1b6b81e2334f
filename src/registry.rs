//! Active-tracker slot and the host event feed.
//!
//! Hosts with a single global trace callback wire it to
//! [`TrackerRegistry::deliver`] and point sessions at the shared
//! registry. Exactly one session is active at a time; installing a new
//! one displaces the previous holder (last writer wins). The registry
//! holds sessions weakly, so dropping a session never leaks through the
//! slot.
//!
//! # Feed guard
//!
//! `deliver` carries a per-thread self-disabling guard. When the active
//! session is absent or not collecting, the delivering thread disables
//! its own feed and drops the event. The next delivery on that thread
//! re-enables the feed and forwards normally; the session's own state
//! check still decides whether anything records.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use huella::event::CallEvent;
//! use huella::registry::TrackerRegistry;
//! use huella::session::TrackerSession;
//!
//! let registry = Arc::new(TrackerRegistry::new());
//! let session = TrackerSession::new(Arc::clone(&registry));
//! session.start();
//!
//! registry.deliver(CallEvent::call(1, "handler").with_location("src/app.py", 10));
//! assert_eq!(session.status().recorded_calls, 1);
//! ```

use std::cell::Cell;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::event::CallEvent;
use crate::session::{SessionState, TrackerSession};

thread_local! {
    static FEED_DISABLED: Cell<bool> = const { Cell::new(false) };
}

#[derive(Debug)]
struct ActiveEntry {
    session_id: u64,
    session: Weak<TrackerSession>,
}

/// Single-slot registry of the active tracker session.
#[derive(Debug)]
pub struct TrackerRegistry {
    active: Mutex<Option<ActiveEntry>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ActiveEntry>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a session as the active tracker.
    ///
    /// # Returns
    ///
    /// The id of the live session that was displaced, if any.
    pub(crate) fn install(&self, session_id: u64, session: Weak<TrackerSession>) -> Option<u64> {
        let mut slot = self.slot();
        let previous = slot
            .as_ref()
            .and_then(|entry| entry.session.upgrade().map(|live| live.id()));
        *slot = Some(ActiveEntry {
            session_id,
            session,
        });
        tracing::debug!("session {} installed as active tracker", session_id);
        previous
    }

    /// Release the slot, but only if `session_id` still owns it. A
    /// displaced session releasing late must not evict its successor.
    pub(crate) fn release(&self, session_id: u64) {
        let mut slot = self.slot();
        let owned = slot
            .as_ref()
            .map_or(false, |entry| entry.session_id == session_id);
        if owned {
            *slot = None;
            tracing::debug!("session {} released the active tracker", session_id);
        }
    }

    /// The live active session, if any.
    pub fn current(&self) -> Option<Arc<TrackerSession>> {
        self.slot().as_ref().and_then(|entry| entry.session.upgrade())
    }

    /// Empty the slot unconditionally.
    pub fn clear(&self) {
        *self.slot() = None;
    }

    /// Feed one host event to the active session.
    ///
    /// Runs on the delivering thread. A disabled feed is re-enabled by
    /// the delivery itself, then the event is forwarded; the session's
    /// own state check decides whether it records.
    pub fn deliver(&self, event: CallEvent) {
        let was_disabled = FEED_DISABLED.with(|flag| flag.replace(false));
        let session = self.current();
        if !was_disabled {
            let collecting = session
                .as_ref()
                .map_or(false, |live| live.state() == SessionState::Collecting);
            if !collecting {
                FEED_DISABLED.with(|flag| flag.set(true));
                return;
            }
        }
        if let Some(session) = session {
            session.on_event(event);
        }
    }

    /// Whether this thread's feed is currently enabled.
    pub fn feed_enabled(&self) -> bool {
        !FEED_DISABLED.with(Cell::get)
    }
}

impl Default for TrackerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn event(site: u64, name: &str) -> CallEvent {
        CallEvent::call(site, name).with_location("src/app.py", 1)
    }

    #[test]
    fn test_current_is_none_when_empty() {
        let registry = TrackerRegistry::new();
        assert!(registry.current().is_none());
    }

    #[test]
    fn test_install_reports_displaced_live_session() {
        let registry = Arc::new(TrackerRegistry::new());
        let first = TrackerSession::new(Arc::clone(&registry));
        let second = TrackerSession::new(Arc::clone(&registry));

        first.start();
        assert_eq!(registry.current().map(|s| s.id()), Some(first.id()));

        second.start();
        assert_eq!(registry.current().map(|s| s.id()), Some(second.id()));
        let warnings = second.drain_warnings();
        assert!(matches!(
            warnings.as_slice(),
            [crate::warnings::Warning::ActiveTakeover { previous_session, session }]
                if *previous_session == first.id() && *session == second.id()
        ));
    }

    #[test]
    fn test_displaced_session_release_keeps_successor() {
        let registry = Arc::new(TrackerRegistry::new());
        let first = TrackerSession::new(Arc::clone(&registry));
        let second = TrackerSession::new(Arc::clone(&registry));

        first.start();
        second.start();
        first.stop();

        assert_eq!(registry.current().map(|s| s.id()), Some(second.id()));
    }

    #[test]
    fn test_dropped_session_does_not_resurrect() {
        let registry = Arc::new(TrackerRegistry::new());
        {
            let session = TrackerSession::new(Arc::clone(&registry));
            session.start();
            assert!(registry.current().is_some());
        }
        assert!(registry.current().is_none());
        // Delivery into a dead slot is a quiet drop.
        registry.deliver(event(1, "f"));
    }

    #[test]
    fn test_deliver_forwards_to_collecting_session() {
        let registry = Arc::new(TrackerRegistry::new());
        let session = TrackerSession::new(Arc::clone(&registry));
        session.start();

        registry.deliver(event(1, "f"));
        registry.deliver(
            CallEvent::ret(1, "f", Some(Value::Int(2))).with_location("src/app.py", 1),
        );

        let status = session.status();
        assert_eq!(status.recorded_calls, 1);
        assert_eq!(status.open_calls, 0);
    }

    #[test]
    fn test_feed_disables_and_reenables_per_thread() {
        let registry = Arc::new(TrackerRegistry::new());
        let session = TrackerSession::new(Arc::clone(&registry));
        session.start();
        session.pause();

        assert!(registry.feed_enabled());
        registry.deliver(event(1, "f"));
        assert!(!registry.feed_enabled());

        // Second delivery re-enables; the paused session still drops it.
        registry.deliver(event(2, "g"));
        assert!(registry.feed_enabled());
        assert_eq!(session.status().recorded_calls, 0);

        session.resume();
        registry.deliver(event(3, "h"));
        assert_eq!(session.status().recorded_calls, 1);

        session.stop();
    }

    #[test]
    fn test_clear_empties_slot() {
        let registry = Arc::new(TrackerRegistry::new());
        let session = TrackerSession::new(Arc::clone(&registry));
        session.start();

        registry.clear();
        assert!(registry.current().is_none());
    }
}
