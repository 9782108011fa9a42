use std::{
    collections::HashMap,
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

use log::warn;

use crate::{id_allocator::IdAllocator, rpc::invocation::InvocationOutcome};

/// The shared table of blocking invocations awaiting results.
///
/// Callback ids are the first free slot rather than monotonic, so ids are
/// reused once freed. Waiters park on a condvar and are woken by the receive
/// path when the matching result arrives, by `poison` on disconnect, or by
/// their own timeout, whichever comes first. A disconnect abandons only the
/// calls waiting at that moment; results already delivered and calls
/// registered afterwards are unaffected.
pub struct PendingInvocations {
    inner: Mutex<Inner>,
    woken: Condvar,
}

enum Slot {
    Waiting,
    Ready(InvocationOutcome),
    Abandoned(String),
}

struct Inner {
    ids: IdAllocator,
    slots: HashMap<u32, Slot>,
}

impl Default for PendingInvocations {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingInvocations {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                ids: IdAllocator::new(1),
                slots: HashMap::new(),
            }),
            woken: Condvar::new(),
        }
    }

    /// Allocate a callback id for a new blocking call.
    pub fn register(&self) -> u32 {
        let mut inner = self.lock();
        let id = inner.ids.allocate();
        inner.slots.insert(id, Slot::Waiting);
        id
    }

    /// Deliver a result. Returns false when no caller is waiting on the id
    /// (late result after a timeout, or a bogus id from the peer).
    pub fn complete(&self, id: u32, outcome: InvocationOutcome) -> bool {
        let mut inner = self.lock();
        match inner.slots.get_mut(&id) {
            Some(slot @ Slot::Waiting) => {
                *slot = Slot::Ready(outcome);
                self.woken.notify_all();
                true
            }
            _ => false,
        }
    }

    /// Block until the result for `id` arrives or `timeout` elapses. A
    /// timeout or disconnect yields None; the slot is freed either way.
    pub fn wait(&self, id: u32, timeout: Duration) -> Option<InvocationOutcome> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        let outcome = loop {
            match inner.slots.get(&id) {
                Some(Slot::Ready(_)) => match inner.slots.remove(&id) {
                    Some(Slot::Ready(outcome)) => break Some(outcome),
                    _ => break None,
                },
                Some(Slot::Abandoned(reason)) => {
                    warn!("Blocking invocation {id} abandoned: {reason}");
                    break None;
                }
                Some(Slot::Waiting) => {}
                None => break None,
            }
            let now = Instant::now();
            if now >= deadline {
                warn!("Blocking invocation {id} timed out after {timeout:?}");
                break None;
            }
            let (guard, _) = self
                .woken
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            inner = guard;
        };
        inner.slots.remove(&id);
        inner.ids.free(id);
        outcome
    }

    /// Abandon a blocking call without waiting (fire-and-forget downgrade).
    pub fn discard(&self, id: u32) {
        let mut inner = self.lock();
        inner.slots.remove(&id);
        inner.ids.free(id);
    }

    /// Abandon every call still waiting; used on transport disconnect.
    /// Results already delivered stay deliverable, and the table keeps
    /// serving calls registered later.
    pub fn poison(&self, reason: &str) {
        let mut inner = self.lock();
        for slot in inner.slots.values_mut() {
            if matches!(slot, Slot::Waiting) {
                *slot = Slot::Abandoned(reason.to_string());
            }
        }
        self.woken.notify_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::value::ArgValue;
    use std::sync::Arc;

    #[test]
    fn ids_are_reused_after_free() {
        let pending = PendingInvocations::new();
        let first = pending.register();
        let second = pending.register();
        assert_ne!(first, second);
        pending.discard(first);
        assert_eq!(pending.register(), first);
    }

    #[test]
    fn waiter_receives_completed_result() {
        let pending = Arc::new(PendingInvocations::new());
        let id = pending.register();

        let completer = Arc::clone(&pending);
        let handle = std::thread::spawn(move || {
            completer.complete(id, InvocationOutcome::Success(ArgValue::I32(99)))
        });

        let outcome = pending.wait(id, Duration::from_secs(5));
        assert_eq!(outcome, Some(InvocationOutcome::Success(ArgValue::I32(99))));
        assert!(handle.join().expect("join"));
    }

    #[test]
    fn timeout_yields_none_and_frees_slot() {
        let pending = PendingInvocations::new();
        let id = pending.register();
        assert_eq!(pending.wait(id, Duration::from_millis(10)), None);
        // The slot is gone; late results are reported as unmatched
        assert!(!pending.complete(id, InvocationOutcome::Success(ArgValue::Null)));
    }

    #[test]
    fn poison_wakes_waiters() {
        let pending = Arc::new(PendingInvocations::new());
        let id = pending.register();

        let poisoner = Arc::clone(&pending);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            poisoner.poison("transport closed");
        });

        assert_eq!(pending.wait(id, Duration::from_secs(30)), None);
    }

    #[test]
    fn poison_spares_delivered_results_and_later_calls() {
        let pending = PendingInvocations::new();
        let id = pending.register();
        assert!(pending.complete(id, InvocationOutcome::Success(ArgValue::Bool(true))));
        pending.poison("peer disconnected");

        // The result was in before the disconnect; the waiter still gets it
        assert_eq!(
            pending.wait(id, Duration::from_secs(1)),
            Some(InvocationOutcome::Success(ArgValue::Bool(true)))
        );

        // Calls made after one peer's disconnect still work
        let next = pending.register();
        assert!(pending.complete(next, InvocationOutcome::Success(ArgValue::I32(7))));
        assert_eq!(
            pending.wait(next, Duration::from_secs(1)),
            Some(InvocationOutcome::Success(ArgValue::I32(7)))
        );
    }
}
