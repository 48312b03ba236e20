//! Capacity-bounded, multi-producer/multi-consumer queue with drain-then-stop
//! termination.
//!
//! Producers block while the queue is full and consumers block while it is
//! empty. [`BoundedQueue::terminate`] wakes everyone: further pushes fail at
//! once, while pops keep returning queued items until the queue is empty and
//! only then report [`QueueClosed`].

use std::{
    collections::VecDeque,
    num::NonZeroUsize,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

use log::debug;
use thiserror::Error;

/// Returned when the queue has been terminated.
///
/// On push the rejected item is handed back so the caller can decide what to
/// do with it. On pop the payload is `()`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("queue has been terminated")]
pub struct QueueClosed<T = ()>(pub T);

impl<T> QueueClosed<T> {
    /// Recover the rejected item.
    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Observable lifecycle of a [`BoundedQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Accepting pushes.
    Open,
    /// Terminated with items still waiting to be popped.
    Draining,
    /// Terminated and empty. Every further push and pop fails.
    Closed,
}

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    terminated: bool,
    waiting_pop: usize,
    waiting_push: usize,
}

/// Fixed-capacity FIFO shared between threads.
///
/// # Examples
/// ```
/// use std::num::NonZeroUsize;
/// use geoload_core::{BoundedQueue, QueueClosed};
///
/// let queue = BoundedQueue::new(NonZeroUsize::MIN);
/// queue.push(1).expect("queue is open");
/// queue.terminate();
/// assert_eq!(queue.push(2), Err(QueueClosed(2)));
/// assert_eq!(queue.pop(), Ok(1));
/// assert_eq!(queue.pop(), Err(QueueClosed(())));
/// ```
#[derive(Debug)]
pub struct BoundedQueue<T> {
    capacity: NonZeroUsize,
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create an empty queue holding at most `capacity` items.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity.get().min(1024)),
                terminated: false,
                waiting_pop: 0,
                waiting_push: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    // Every critical section leaves `State` consistent, so a panic in another
    // thread cannot corrupt it.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item`, blocking while the queue is full.
    ///
    /// # Errors
    /// Returns [`QueueClosed`] carrying `item` once the queue has been
    /// terminated, even if space is available.
    pub fn push(&self, item: T) -> Result<(), QueueClosed<T>> {
        let mut state = self.lock();
        while state.items.len() >= self.capacity.get() && !state.terminated {
            state.waiting_push += 1;
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            state.waiting_push -= 1;
        }
        if state.terminated {
            return Err(QueueClosed(item));
        }
        state.items.push_back(item);
        if state.waiting_pop > 0 {
            self.not_empty.notify_one();
        }
        Ok(())
    }

    /// Remove the oldest item, blocking while the queue is empty.
    ///
    /// Queued items are delivered even after termination.
    ///
    /// # Errors
    /// Returns [`QueueClosed`] when the queue is empty and terminated.
    pub fn pop(&self) -> Result<T, QueueClosed> {
        let mut state = self.lock();
        while state.items.is_empty() && !state.terminated {
            state.waiting_pop += 1;
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            state.waiting_pop -= 1;
        }
        let Some(item) = state.items.pop_front() else {
            return Err(QueueClosed(()));
        };
        if state.waiting_push > 0 {
            self.not_full.notify_one();
        }
        Ok(item)
    }

    /// Stop accepting items and wake every blocked thread. Idempotent.
    pub fn terminate(&self) {
        let mut state = self.lock();
        if !state.terminated {
            debug!(
                "terminating queue with {} queued, {} blocked pushers, {} blocked poppers",
                state.items.len(),
                state.waiting_push,
                state.waiting_pop
            );
            state.terminated = true;
        }
        drop(state);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Maximum number of queued items.
    pub const fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    /// Number of queued items at the time of the call.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether the queue held no items at the time of the call.
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Whether [`BoundedQueue::terminate`] has been called.
    pub fn is_terminated(&self) -> bool {
        self.lock().terminated
    }

    /// Current lifecycle state.
    pub fn state(&self) -> QueueState {
        let state = self.lock();
        match (state.terminated, state.items.is_empty()) {
            (false, _) => QueueState::Open,
            (true, false) => QueueState::Draining,
            (true, true) => QueueState::Closed,
        }
    }
}
