//! Instance-scoped single-flight slot.
//!
//! At most one attempt is outstanding per slot. Concurrent callers join the
//! attempt in flight and all observe the same outcome. A failed attempt
//! empties the slot before any caller sees the failure, so the next call
//! starts fresh; a successful one is kept until [`SingleFlight::invalidate`].

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

type SharedAttempt<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct Flight<T, E> {
    /// Generation tag; a finished attempt only clears its own flight.
    id: u64,
    attempt: SharedAttempt<T, E>,
}

/// Guarded slot holding nothing, a pending attempt, or a resolved success.
pub struct SingleFlight<T, E> {
    slot: Arc<Mutex<Option<Flight<T, E>>>>,
    next_id: AtomicU64,
}

impl<T, E> Default for SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an empty slot.
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Join the current attempt, or start one with `make` if the slot is empty.
    ///
    /// `make` runs under the slot lock and must not call back into this slot.
    pub async fn run<F, Fut>(&self, make: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let attempt = {
            let mut slot = self.slot.lock();
            match slot.as_ref() {
                Some(flight) => flight.attempt.clone(),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let attempt = self.wrap_attempt(id, make());
                    *slot = Some(Flight {
                        id,
                        attempt: attempt.clone(),
                    });
                    attempt
                }
            }
        };
        attempt.await
    }

    fn wrap_attempt<Fut>(&self, id: u64, fut: Fut) -> SharedAttempt<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let slot = Arc::downgrade(&self.slot);
        async move {
            let outcome = fut.await;
            if outcome.is_err()
                && let Some(slot) = slot.upgrade()
            {
                let mut guard = slot.lock();
                if guard.as_ref().is_some_and(|flight| flight.id == id) {
                    *guard = None;
                }
            }
            outcome
        }
        .boxed()
        .shared()
    }

    /// Drop whatever the slot holds so the next call starts a new attempt.
    pub fn invalidate(&self) {
        self.slot.lock().take();
    }

    /// True while an attempt has been started but has not resolved.
    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .as_ref()
            .is_some_and(|flight| flight.attempt.peek().is_none())
    }

    /// True when the slot holds neither a pending attempt nor a success.
    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }
}
