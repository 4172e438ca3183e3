//! Mutex-guarded FIFO queues used to pass [`crate::Message`]s between the
//! simulation thread and the script engine thread.
//!
//! [`LockedQueue`] never blocks beyond its internal lock. [`NotifyingQueue`]
//! adds a [`GenerationSignal`] so the consumer can sleep until something new
//! has been sent instead of polling.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

/// Counter that changes every time a [`NotifyingQueue`] receives a message.
///
/// Values run from 1 to [`Generation::MAX`] and then wrap back to 1. Zero is
/// reserved for [`Generation::INITIAL`], the "nothing seen yet" value a
/// consumer passes on its first wait. A consumer that misses exactly
/// `MAX` notifications in a row cannot tell that anything happened; callers
/// always drain the queue completely after each wake-up, so at most the
/// wake-up is lost, never a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Generation(u32);

impl Generation {
    pub const INITIAL: Generation = Generation(0);
    pub const MAX: u32 = 9999;

    pub fn value(self) -> u32 {
        self.0
    }

    /// The generation that follows `self`.
    pub fn next(self) -> Generation {
        if self.0 >= Self::MAX {
            Generation(1)
        } else {
            Generation(self.0 + 1)
        }
    }
}

/// Wait/notify primitive keyed on a [`Generation`].
#[derive(Debug, Default)]
pub struct GenerationSignal {
    current: Mutex<Generation>,
    trigger: Condvar,
}

impl GenerationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Generation {
        *self.current.lock()
    }

    /// Advance the generation and wake one waiter.
    pub fn notify(&self) -> Generation {
        let advanced = {
            let mut current = self.current.lock();
            *current = current.next();
            *current
        };
        self.trigger.notify_one();
        advanced
    }

    /// Block while the generation still equals `known`; return the new value.
    pub fn wait(&self, known: Generation) -> Generation {
        let mut current = self.current.lock();
        while *current == known {
            self.trigger.wait(&mut current);
        }
        *current
    }

    /// Like [`GenerationSignal::wait`] but gives up after `timeout`, returning
    /// `known` unchanged if nothing was sent in the meantime.
    pub fn wait_for(&self, known: Generation, timeout: Duration) -> Generation {
        let deadline = Instant::now() + timeout;
        let mut current = self.current.lock();
        while *current == known {
            if self.trigger.wait_until(&mut current, deadline).timed_out() {
                break;
            }
        }
        *current
    }
}

/// Unbounded FIFO protected by a single lock. `send` and `recv` never block on
/// the queue being empty or full.
#[derive(Debug)]
pub struct LockedQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> Default for LockedQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T> LockedQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, item: T) {
        self.items.lock().push_back(item);
    }

    pub fn recv(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// A [`LockedQueue`] whose consumer can sleep until the next `send`.
#[derive(Debug)]
pub struct NotifyingQueue<T> {
    queue: LockedQueue<T>,
    signal: GenerationSignal,
}

impl<T> Default for NotifyingQueue<T> {
    fn default() -> Self {
        Self {
            queue: LockedQueue::new(),
            signal: GenerationSignal::new(),
        }
    }
}

impl<T> NotifyingQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, item: T) {
        self.queue.send(item);
        self.signal.notify();
    }

    pub fn recv(&self) -> Option<T> {
        self.queue.recv()
    }

    /// Sleep until a message was sent since `known` was observed.
    ///
    /// The returned generation carries no data; drain with [`Self::recv`]
    /// until it returns `None` before waiting again.
    pub fn wait(&self, known: Generation) -> Generation {
        self.signal.wait(known)
    }

    pub fn wait_for(&self, known: Generation, timeout: Duration) -> Generation {
        self.signal.wait_for(known, timeout)
    }

    pub fn generation(&self) -> Generation {
        self.signal.current()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
