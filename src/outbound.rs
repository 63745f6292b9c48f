// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A bounded single-producer/single-consumer queue between the
//! flusher and a sink, with a drop-oldest backpressure policy: a slow
//! sink loses the stalest batches rather than stalling ingestion or
//! growing without bound.
//!
//! `tokio::sync::mpsc` doesn't expose a way to evict from the front
//! once full, so this is a small ring buffer behind a `std::Mutex`
//! (held only long enough to push or pop, per the locking discipline
//! in the teacher's `flusher::Flusher::flush`) paired with a `Notify`
//! to wake a waiting consumer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

pub struct OutboundBuffer<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl<T> OutboundBuffer<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        OutboundBuffer {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push a batch, evicting the oldest one first if already at
    /// capacity. Returns `true` when an eviction happened.
    pub fn push(&self, item: T) -> bool {
        let evicted = {
            let mut queue = self.queue.lock().expect("lock poisoned");
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(item);
            evicted
        };
        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    /// Wait for and return the oldest queued batch.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.queue.lock().expect("lock poisoned").pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().expect("lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of batches evicted over this buffer's lifetime.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
