//! User hook registration and dispatch.
//!
//! Hooks are callbacks fired against the arguments of each recorded call.
//! Dispatch walks the chain in reverse registration order, so the most
//! recently added hook sees an event first. Each hook can gate itself on
//! argument kinds or argument values; a hook with no trigger fires on
//! every recorded call.
//!
//! # Pipeline semantics
//!
//! Firing hooks form a pipeline. The first hook to fire receives `None`
//! as its piped input; every later firing hook receives the previous
//! firing hook's return value. Hooks that do not fire are invisible to
//! the pipeline.
//!
//! # Re-entrancy
//!
//! The chain is snapshotted behind an `Arc` before any callback runs, and
//! no lock is held during dispatch. A callback may feed new events into
//! the session (and so trigger a nested dispatch) without deadlocking.
//!
//! # Example
//!
//! ```
//! use huella::hooks::{Hook, HookRegistry};
//! use huella::value::{Value, ValueKind};
//!
//! let registry = HookRegistry::new();
//! registry.register(Hook::new(|piped, _args| {
//!     assert!(piped.is_none());
//!     Ok(Value::Int(1))
//! }));
//! let alias = registry.register(
//!     Hook::new(|piped, _args| Ok(piped.unwrap_or(Value::Int(0)))).named("tap"),
//! );
//! assert_eq!(alias, "tap");
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::event::Argument;
use crate::value::{Value, ValueKind};

/// Callback signature: piped output of the previous firing hook (if any)
/// and the recorded call's arguments. Returning `Err` is a contract
/// violation that terminates the session.
pub type HookCallback =
    Box<dyn Fn(Option<Value>, &[Argument]) -> anyhow::Result<Value> + Send + Sync>;

/// A registered callback with its firing conditions.
pub struct Hook {
    callback: HookCallback,
    alias: Option<String>,
    type_trigger: Option<HashSet<ValueKind>>,
    value_trigger: Option<Vec<Value>>,
    terminate_after_fire: bool,
}

impl Hook {
    pub fn new(
        callback: impl Fn(Option<Value>, &[Argument]) -> anyhow::Result<Value>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            callback: Box::new(callback),
            alias: None,
            type_trigger: None,
            value_trigger: None,
            terminate_after_fire: false,
        }
    }

    /// Alias used in logs and faults. Unnamed hooks are assigned
    /// `hook-N` at registration.
    pub fn named(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Fire only when at least one argument has one of these kinds.
    /// Takes precedence over a value trigger if both are set.
    pub fn on_kinds(mut self, kinds: impl IntoIterator<Item = ValueKind>) -> Self {
        self.type_trigger = Some(kinds.into_iter().collect());
        self
    }

    /// Fire only when at least one argument equals one of these values.
    pub fn on_values(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.value_trigger = Some(values.into_iter().collect());
        self
    }

    /// End the whole session immediately after this hook fires.
    pub fn terminate_after_fire(mut self) -> Self {
        self.terminate_after_fire = true;
        self
    }

    /// Whether this hook fires for the given arguments.
    fn matches(&self, args: &[Argument]) -> bool {
        if let Some(kinds) = &self.type_trigger {
            args.iter().any(|arg| kinds.contains(&arg.value.kind()))
        } else if let Some(values) = &self.value_trigger {
            args.iter()
                .any(|arg| values.iter().any(|value| *value == arg.value))
        } else {
            true
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("alias", &self.alias)
            .field("type_trigger", &self.type_trigger)
            .field("value_trigger", &self.value_trigger)
            .field("terminate_after_fire", &self.terminate_after_fire)
            .finish_non_exhaustive()
    }
}

/// A hook with its registration-time alias resolved.
#[derive(Debug)]
struct Registered {
    alias: String,
    hook: Hook,
}

/// Summary of one dispatch pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DispatchOutcome {
    /// Number of hooks that fired.
    pub fired: usize,
    /// Return value of the last firing hook.
    pub last_output: Option<Value>,
}

/// Why a dispatch pass ended abnormally.
#[derive(Debug)]
pub enum DispatchFault {
    /// A firing hook returned `Err`.
    HookFailed {
        alias: String,
        error: anyhow::Error,
    },
    /// A firing hook carried `terminate_after_fire`.
    Terminated { alias: String },
}

/// Hook chain with snapshot-based dispatch.
#[derive(Debug, Default)]
pub struct HookRegistry {
    chain: Mutex<Arc<Vec<Arc<Registered>>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn chain(&self) -> MutexGuard<'_, Arc<Vec<Arc<Registered>>>> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a hook to the chain.
    ///
    /// # Returns
    ///
    /// The effective alias: the hook's own, or a generated `hook-N`.
    pub fn register(&self, hook: Hook) -> String {
        let mut chain = self.chain();
        let alias = match &hook.alias {
            Some(alias) => alias.clone(),
            None => format!("hook-{}", chain.len()),
        };
        let mut next = (**chain).clone();
        next.push(Arc::new(Registered {
            alias: alias.clone(),
            hook,
        }));
        *chain = Arc::new(next);
        alias
    }

    pub fn len(&self) -> usize {
        self.chain().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain().is_empty()
    }

    /// Drop every hook.
    pub fn clear(&self) {
        *self.chain() = Arc::new(Vec::new());
    }

    /// Run the chain against one recorded call's arguments.
    ///
    /// The chain lock is held only long enough to clone the snapshot;
    /// callbacks run lock-free. Hooks registered mid-dispatch are seen by
    /// the next dispatch, not this one.
    pub fn dispatch(&self, args: &[Argument]) -> Result<DispatchOutcome, DispatchFault> {
        let chain = Arc::clone(&self.chain());
        let mut outcome = DispatchOutcome::default();
        for entry in chain.iter().rev() {
            if !entry.hook.matches(args) {
                continue;
            }
            let piped = outcome.last_output.take();
            match (entry.hook.callback)(piped, args) {
                Ok(value) => {
                    outcome.fired += 1;
                    outcome.last_output = Some(value);
                }
                Err(error) => {
                    return Err(DispatchFault::HookFailed {
                        alias: entry.alias.clone(),
                        error,
                    });
                }
            }
            if entry.hook.terminate_after_fire {
                return Err(DispatchFault::Terminated {
                    alias: entry.alias.clone(),
                });
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn args(values: Vec<(&str, Value)>) -> Vec<Argument> {
        values
            .into_iter()
            .map(|(name, value)| Argument::new(name, value))
            .collect()
    }

    #[test]
    fn test_generated_aliases_count_up() {
        let registry = HookRegistry::new();
        assert_eq!(registry.register(Hook::new(|_, _| Ok(Value::Int(0)))), "hook-0");
        assert_eq!(registry.register(Hook::new(|_, _| Ok(Value::Int(0)))), "hook-1");
        assert_eq!(
            registry.register(Hook::new(|_, _| Ok(Value::Int(0))).named("mine")),
            "mine"
        );
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_dispatch_runs_newest_first() {
        let registry = HookRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            registry.register(Hook::new(move |_, _| {
                order.lock().unwrap().push(tag);
                Ok(Value::Int(0))
            }));
        }

        registry.dispatch(&args(vec![("x", Value::Int(1))])).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_type_trigger_gates_firing() {
        let registry = HookRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        registry.register(
            Hook::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Int(0))
            })
            .on_kinds([ValueKind::Text]),
        );

        registry.dispatch(&args(vec![("n", Value::Int(1))])).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        registry
            .dispatch(&args(vec![("s", Value::Text("x".into()))]))
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_value_trigger_compares_by_value() {
        let registry = HookRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        registry.register(
            Hook::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Int(0))
            })
            .on_values([Value::Int(42)]),
        );

        registry.dispatch(&args(vec![("n", Value::Int(41))])).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        registry.dispatch(&args(vec![("n", Value::Int(42))])).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_non_matching_hook_falls_through() {
        // Newest hook gates on Text, the call carries only Int: the older
        // unconditional hook still runs and gets the un-piped input.
        let registry = HookRegistry::new();
        registry.register(Hook::new(|piped, _| {
            assert!(piped.is_none());
            Ok(Value::Int(7))
        }));
        registry.register(
            Hook::new(|_, _| panic!("must not fire")).on_kinds([ValueKind::Text]),
        );

        let outcome = registry.dispatch(&args(vec![("n", Value::Int(1))])).unwrap();
        assert_eq!(outcome.fired, 1);
        assert_eq!(outcome.last_output, Some(Value::Int(7)));
    }

    #[test]
    fn test_pipeline_pipes_between_firing_hooks() {
        let registry = HookRegistry::new();
        // Registered first, fires last: doubles whatever was piped in.
        registry.register(Hook::new(|piped, _| match piped {
            Some(Value::Int(n)) => Ok(Value::Int(n * 2)),
            other => panic!("unexpected piped input {other:?}"),
        }));
        // Registered last, fires first: seeds the pipeline.
        registry.register(Hook::new(|piped, _| {
            assert!(piped.is_none());
            Ok(Value::Int(21))
        }));

        let outcome = registry.dispatch(&args(vec![("x", Value::Int(1))])).unwrap();
        assert_eq!(outcome.fired, 2);
        assert_eq!(outcome.last_output, Some(Value::Int(42)));
    }

    #[test]
    fn test_callback_error_aborts_dispatch() {
        let registry = HookRegistry::new();
        let later = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&later);
        registry.register(Hook::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Int(0))
        }));
        registry.register(Hook::new(|_, _| Err(anyhow::anyhow!("bad payload"))).named("boom"));

        let fault = registry
            .dispatch(&args(vec![("x", Value::Int(1))]))
            .unwrap_err();
        match fault {
            DispatchFault::HookFailed { alias, error } => {
                assert_eq!(alias, "boom");
                assert!(error.to_string().contains("bad payload"));
            }
            other => panic!("unexpected fault {other:?}"),
        }
        // The older hook never ran.
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_terminate_after_fire_stops_chain() {
        let registry = HookRegistry::new();
        let later = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&later);
        registry.register(Hook::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Int(0))
        }));
        registry.register(
            Hook::new(|_, _| Ok(Value::Int(1)))
                .named("stopper")
                .terminate_after_fire(),
        );

        let fault = registry
            .dispatch(&args(vec![("x", Value::Int(1))]))
            .unwrap_err();
        match fault {
            DispatchFault::Terminated { alias } => assert_eq!(alias, "stopper"),
            other => panic!("unexpected fault {other:?}"),
        }
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_terminate_hook_does_not_fire_without_trigger_match() {
        let registry = HookRegistry::new();
        registry.register(
            Hook::new(|_, _| Ok(Value::Int(1)))
                .on_kinds([ValueKind::Bytes])
                .terminate_after_fire(),
        );

        let outcome = registry.dispatch(&args(vec![("n", Value::Int(1))])).unwrap();
        assert_eq!(outcome.fired, 0);
    }

    #[test]
    fn test_clear_empties_chain() {
        let registry = HookRegistry::new();
        registry.register(Hook::new(|_, _| Ok(Value::Int(0))));
        registry.clear();
        assert!(registry.is_empty());
        let outcome = registry.dispatch(&args(vec![("x", Value::Int(1))])).unwrap();
        assert_eq!(outcome.fired, 0);
    }

    #[test]
    fn test_empty_args_with_unconditional_hook() {
        let registry = HookRegistry::new();
        registry.register(Hook::new(|_, _| Ok(Value::Int(5))));
        let outcome = registry.dispatch(&[]).unwrap();
        assert_eq!(outcome.fired, 1);
    }

    #[test]
    fn test_triggered_hook_never_fires_on_empty_args() {
        let registry = HookRegistry::new();
        registry.register(Hook::new(|_, _| panic!("no args to match")).on_kinds([ValueKind::Int]));
        let outcome = registry.dispatch(&[]).unwrap();
        assert_eq!(outcome.fired, 0);
    }
}
