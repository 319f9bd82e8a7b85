//! Bounded-wait, method-tagged locks
//!
//! Lifecycle mutations are serialized per module by a reentrant lock that
//! waits at most a configured bound and records which operation holds it,
//! so a timeout can report both sides. The framework-wide wiring lock uses
//! the same primitive. Guards release on drop, on every exit path.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::error::{FrameworkError, Result};

/// The operation a lock is held or requested under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpTag {
    /// Resolving revisions into wirings
    Resolve,
    /// Starting a module
    Start,
    /// Stopping a module
    Stop,
    /// Uninstalling a module
    Uninstall,
    /// Installing a replacement revision
    Update,
    /// The refresh unwire/re-resolve window
    Refresh,
    /// A framework start-level change
    StartLevel,
}

impl fmt::Display for OpTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpTag::Resolve => "RESOLVE",
            OpTag::Start => "START",
            OpTag::Stop => "STOP",
            OpTag::Uninstall => "UNINSTALL",
            OpTag::Update => "UPDATE",
            OpTag::Refresh => "REFRESH",
            OpTag::StartLevel => "STARTLEVEL",
        };
        write!(f, "{name}")
    }
}

#[derive(Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
    method: Option<OpTag>,
}

/// A reentrant lock with a bounded acquisition wait
pub struct BoundedLock {
    name: String,
    state: Mutex<LockState>,
    available: Condvar,
}

impl BoundedLock {
    /// Create a lock named for diagnostics
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(LockState::default()),
            available: Condvar::new(),
        }
    }

    /// Acquire the lock, waiting at most `timeout`
    ///
    /// Reentrant: a thread that already holds the lock acquires again
    /// immediately. On timeout the operation fails without blocking
    /// further; the error names the requesting method and the holder.
    pub fn acquire(&self, method: OpTag, timeout: Duration) -> Result<LockGuard<'_>> {
        let me = thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        if state.owner == Some(me) {
            state.depth += 1;
            return Ok(LockGuard { lock: self });
        }

        while state.owner.is_some() {
            if self.available.wait_until(&mut state, deadline).timed_out() {
                let held_by = state.method;
                drop(state);
                tracing::warn!(
                    "{} could not acquire lock '{}' within {:?} (held under {})",
                    method,
                    self.name,
                    timeout,
                    held_by.map(|t| t.to_string()).unwrap_or_else(|| "?".to_string())
                );
                return Err(FrameworkError::LockTimeout {
                    target: self.name.clone(),
                    method,
                    held_by,
                });
            }
        }

        state.owner = Some(me);
        state.depth = 1;
        state.method = Some(method);
        Ok(LockGuard { lock: self })
    }

    /// The method currently holding the lock, if any
    pub fn held_by(&self) -> Option<OpTag> {
        self.state.lock().method
    }
}

/// RAII guard for a [`BoundedLock`]; releases exactly once, on drop
pub struct LockGuard<'a> {
    lock: &'a BoundedLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            state.method = None;
            self.lock.available.notify_one();
        }
    }
}

/// The set of locks held by one operation
///
/// Locks are pushed in acquisition order (the wiring lock first, then
/// module locks) and released in strict reverse order when the context
/// drops.
#[derive(Default)]
pub struct LockContext<'a> {
    guards: Vec<LockGuard<'a>>,
}

impl<'a> LockContext<'a> {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an acquired lock
    pub fn push(&mut self, guard: LockGuard<'a>) {
        self.guards.push(guard);
    }
}

impl Drop for LockContext<'_> {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reentrant_acquire() {
        let lock = BoundedLock::new("m");
        let _a = lock.acquire(OpTag::Start, Duration::from_millis(50)).unwrap();
        let _b = lock.acquire(OpTag::Stop, Duration::from_millis(50)).unwrap();
    }

    #[test]
    fn test_timeout_reports_both_methods() {
        let lock = Arc::new(BoundedLock::new("m"));
        let guard = lock.acquire(OpTag::Refresh, Duration::from_millis(50)).unwrap();

        let contender = lock.clone();
        let result = thread::spawn(move || {
            contender.acquire(OpTag::Start, Duration::from_millis(50)).map(|_| ())
        })
        .join()
        .unwrap();

        match result {
            Err(FrameworkError::LockTimeout { method, held_by, .. }) => {
                assert_eq!(method, OpTag::Start);
                assert_eq!(held_by, Some(OpTag::Refresh));
            }
            other => panic!("expected lock timeout, got {other:?}"),
        }
        drop(guard);
    }

    #[test]
    fn test_release_wakes_waiter() {
        let lock = Arc::new(BoundedLock::new("m"));
        let guard = lock.acquire(OpTag::Start, Duration::from_millis(50)).unwrap();

        let contender = lock.clone();
        let waiter = thread::spawn(move || {
            contender
                .acquire(OpTag::Stop, Duration::from_secs(5))
                .map(|_| ())
                .is_ok()
        });

        thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_context_releases_in_reverse_order() {
        let outer = BoundedLock::new("wiring");
        let inner = BoundedLock::new("module");
        {
            let mut ctx = LockContext::new();
            ctx.push(outer.acquire(OpTag::Refresh, Duration::from_millis(50)).unwrap());
            ctx.push(inner.acquire(OpTag::Refresh, Duration::from_millis(50)).unwrap());
            assert_eq!(outer.held_by(), Some(OpTag::Refresh));
        }
        assert_eq!(outer.held_by(), None);
        assert_eq!(inner.held_by(), None);
    }
}
