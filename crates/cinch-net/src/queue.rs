//! Bounded packet delivery queue for pull-mode receives.
//!
//! The reader thread is the producer; `push` blocks while the queue is
//! full, so a slow consumer backpressures the socket instead of
//! dropping packets. Condition variables do the waiting on both sides.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use cinch_core::Packet;

use crate::error::NetError;

struct Inner {
    items: VecDeque<(Packet, usize)>,
    capacity: usize,
    closed: bool,
}

pub struct DeliveryQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue one packet with its on-wire size. Blocks while the queue
    /// is at capacity; fails once the queue is closed.
    pub fn push(&self, packet: Packet, wire_len: usize) -> Result<(), NetError> {
        let mut inner = self.lock();
        while inner.items.len() >= inner.capacity && !inner.closed {
            inner = self
                .not_full
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
        if inner.closed {
            return Err(NetError::Closed);
        }
        inner.items.push_back((packet, wire_len));
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue one packet, waiting up to `timeout` for one to arrive.
    pub fn pop(&self, timeout: Duration) -> Result<(Packet, usize), NetError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                self.not_full.notify_one();
                return Ok(item);
            }
            if inner.closed {
                return Err(NetError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(NetError::RecvTimeout);
            }
            let (guard, _) = self
                .not_empty
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
        }
    }

    /// Remove and return everything currently buffered, in order.
    pub fn drain(&self) -> Vec<(Packet, usize)> {
        let mut inner = self.lock();
        let items = inner.items.drain(..).collect();
        self.not_full.notify_all();
        items
    }

    /// Close the queue and wake every waiter. Buffered items stay
    /// poppable; further pushes fail.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}
