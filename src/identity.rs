//! Thread and process identity collaborators.
//!
//! Naming lives outside the engine: sessions ask a [`ThreadResolver`] for
//! the delivering thread's identity and the exporter asks a
//! [`ProcessResolver`] for the process identity. Hosts with their own
//! notion of thread identity supply their own implementations; tests pin
//! identities with fixed ones.

use std::hash::{Hash, Hasher};

use fnv::FnvHasher;

/// Resolves the identity of the calling thread.
pub trait ThreadResolver: Send + Sync {
    /// Stable numeric id and display name of the current thread.
    fn current_thread(&self) -> (u64, String);
}

/// Resolves the identity of the current process.
pub trait ProcessResolver: Send + Sync {
    /// Process id and display name.
    fn current_process(&self) -> (u32, String);
}

/// Default resolver backed by `std::thread`.
#[derive(Debug, Default)]
pub struct SystemThreadResolver;

impl ThreadResolver for SystemThreadResolver {
    fn current_thread(&self) -> (u64, String) {
        let current = std::thread::current();
        let id = thread_token(current.id());
        let name = match current.name() {
            Some(name) => name.to_string(),
            None => format!("thread-{id}"),
        };
        (id, name)
    }
}

/// Default resolver backed by `std::process` and the executable name.
#[derive(Debug, Default)]
pub struct SystemProcessResolver;

impl ProcessResolver for SystemProcessResolver {
    fn current_process(&self) -> (u32, String) {
        let pid = std::process::id();
        let name = std::env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| format!("process-{pid}"));
        (pid, name)
    }
}

/// Stable u64 token for an opaque [`std::thread::ThreadId`].
///
/// `ThreadId` exposes no integer accessor on stable Rust, so the token is
/// an FNV-1a hash of its debug rendering. Stable within a process run,
/// which is all a trace needs.
fn thread_token(id: std::thread::ThreadId) -> u64 {
    let mut hasher = FnvHasher::default();
    format!("{id:?}").hash(&mut hasher);
    hasher.finish()
}
