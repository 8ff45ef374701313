//! Hand-off structures between the network thread and the simulation thread
//!
//! - [`BlockingQueue`] carries state bundles. FIFO, unbounded unless a
//!   capacity is configured, and `pop` parks the caller until an item or a
//!   shutdown arrives.
//! - [`DrainList`] carries events and messages. Appends are ordered and a
//!   drain swaps the whole list out under one lock, so every entry is
//!   delivered exactly once.
//!
//! Closing either wakes every waiter. Items already queued stay poppable;
//! once the queue is empty and closed, pops report [`QueueClosed`].

use crate::bundles::{EventBundle, MessageBundle, StateBundle};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue closed")]
pub struct QueueClosed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryPushError {
    #[error("queue full")]
    Full,
    #[error("queue closed")]
    Closed,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub struct BlockingQueue<T> {
    inner: Mutex<QueueInner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: Option<usize>,
}

impl<T> BlockingQueue<T> {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.map(|c| c.max(1)),
        }
    }

    /// Appends an item, waiting for room only when a capacity is set.
    pub fn push(&self, item: T) -> Result<(), QueueClosed> {
        let mut inner = self.inner.lock();
        if let Some(capacity) = self.capacity {
            while inner.items.len() >= capacity && !inner.closed {
                self.not_full.wait(&mut inner);
            }
        }
        if inner.closed {
            return Err(QueueClosed);
        }

        inner.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Appends without waiting, failing if the queue is full or closed.
    pub fn try_push(&self, item: T) -> Result<(), TryPushError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(TryPushError::Closed);
        }
        if self.capacity.is_some_and(|capacity| inner.items.len() >= capacity) {
            return Err(TryPushError::Full);
        }

        inner.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    pub fn pop(&self) -> Result<T, QueueClosed> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                self.not_full.notify_one();
                return Ok(item);
            }
            if inner.closed {
                return Err(QueueClosed);
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout` with `Ok(None)`.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>, QueueClosed> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                self.not_full.notify_one();
                return Ok(Some(item));
            }
            if inner.closed {
                return Err(QueueClosed);
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                return match inner.items.pop_front() {
                    Some(item) => {
                        self.not_full.notify_one();
                        Ok(Some(item))
                    }
                    None if inner.closed => Err(QueueClosed),
                    None => Ok(None),
                };
            }
        }
    }

    pub fn try_pop(&self) -> Result<Option<T>, QueueClosed> {
        let mut inner = self.inner.lock();
        match inner.items.pop_front() {
            Some(item) => {
                self.not_full.notify_one();
                Ok(Some(item))
            }
            None if inner.closed => Err(QueueClosed),
            None => Ok(None),
        }
    }

    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}

struct ListInner<T> {
    items: Vec<T>,
    closed: bool,
}

pub struct DrainList<T> {
    inner: Mutex<ListInner<T>>,
}

impl<T> Default for DrainList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DrainList<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ListInner {
                items: Vec::new(),
                closed: false,
            }),
        }
    }

    pub fn push(&self, item: T) -> Result<(), QueueClosed> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(QueueClosed);
        }
        inner.items.push(item);
        Ok(())
    }

    /// Takes everything appended since the last drain, in append order.
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut self.inner.lock().items)
    }

    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}

/// The three queues shared by the hub and the simulation.
pub struct Bundles {
    pub states: BlockingQueue<StateBundle>,
    pub events: DrainList<EventBundle>,
    pub messages: DrainList<MessageBundle>,
}

impl Bundles {
    pub fn new(state_capacity: Option<usize>) -> Self {
        Self {
            states: BlockingQueue::new(state_capacity),
            events: DrainList::new(),
            messages: DrainList::new(),
        }
    }

    pub fn close_all(&self) {
        self.states.close();
        self.events.close();
        self.messages.close();
    }
}
