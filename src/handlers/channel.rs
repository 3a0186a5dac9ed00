// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Bounded sample channels between the receive task and user threads.
//!
//! The FIFO flavor is a bounded queue whose behavior when full is chosen
//! at construction (`BlockOnFull` suspends the receive task, `DropNew`
//! discards the incoming sample); the ring flavor always accepts and
//! overwrites the oldest queued sample (`DropOldest`).

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::{Notify, Semaphore};
use tracing::debug;

/// Behavior of a bounded channel when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropPolicy {
    /// Suspend the producing task until room frees up.
    #[default]
    BlockOnFull,
    /// Discard the incoming sample.
    DropNew,
    /// Discard the oldest queued sample (ring behavior).
    DropOldest,
}

#[derive(Debug)]
struct Shared<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    closed: AtomicBool,
    /// Wakes receivers when a sample or close arrives.
    recv_notify: Notify,
    /// Free-slot permits for the blocking flavor; `None` otherwise.
    slots: Option<Semaphore>,
}

impl<T> Shared<T> {
    fn push_wake(&self, value: T) {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(value);
        self.recv_notify.notify_one();
    }
}

/// Producing side of a bounded FIFO channel.
#[derive(Debug, Clone)]
pub struct FifoSender<T> {
    shared: Arc<Shared<T>>,
    policy: DropPolicy,
}

/// Consuming side of a bounded FIFO or ring channel.
#[derive(Debug)]
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

/// Producing side of a ring channel (always accepts, drops oldest).
#[derive(Debug, Clone)]
pub struct RingSender<T> {
    shared: Arc<Shared<T>>,
}

fn shared<T>(capacity: usize, blocking: bool) -> Arc<Shared<T>> {
    Arc::new(Shared {
        queue: Mutex::new(VecDeque::with_capacity(capacity)),
        capacity,
        closed: AtomicBool::new(false),
        recv_notify: Notify::new(),
        slots: blocking.then(|| Semaphore::new(capacity)),
    })
}

/// Bounded FIFO channel. `policy` must be `BlockOnFull` or `DropNew`;
/// `DropOldest` callers want [`ring_channel`].
pub fn fifo_channel<T>(capacity: usize, policy: DropPolicy) -> (FifoSender<T>, Receiver<T>) {
    let shared = shared(capacity.max(1), policy == DropPolicy::BlockOnFull);
    (
        FifoSender {
            shared: Arc::clone(&shared),
            policy,
        },
        Receiver { shared },
    )
}

/// Bounded ring channel: a full queue drops its oldest sample.
pub fn ring_channel<T>(capacity: usize) -> (RingSender<T>, Receiver<T>) {
    let shared = shared(capacity.max(1), false);
    (
        RingSender {
            shared: Arc::clone(&shared),
        },
        Receiver { shared },
    )
}

impl<T> FifoSender<T> {
    pub async fn send(&self, value: T) {
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }
        match self.policy {
            DropPolicy::BlockOnFull => {
                if let Some(slots) = &self.shared.slots {
                    // Close forgets the semaphore, failing acquire.
                    let Ok(permit) = slots.acquire().await else {
                        return;
                    };
                    permit.forget();
                }
                self.shared.push_wake(value);
            },
            DropPolicy::DropNew | DropPolicy::DropOldest => {
                let mut queue = self
                    .shared
                    .queue
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if queue.len() >= self.shared.capacity {
                    debug!("fifo channel full, dropping incoming sample");
                    return;
                }
                queue.push_back(value);
                drop(queue);
                self.shared.recv_notify.notify_one();
            },
        }
    }

    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        if let Some(slots) = &self.shared.slots {
            slots.close();
        }
        self.shared.recv_notify.notify_waiters();
    }
}

impl<T> RingSender<T> {
    pub fn send(&self, value: T) {
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }
        let mut queue = self
            .shared
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if queue.len() >= self.shared.capacity {
            let _ = queue.pop_front();
            debug!("ring channel full, dropping oldest sample");
        }
        queue.push_back(value);
        drop(queue);
        self.shared.recv_notify.notify_one();
    }

    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.recv_notify.notify_waiters();
    }
}

impl<T> Receiver<T> {
    /// Await the next sample; `None` once the channel is closed and
    /// drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            {
                let mut queue = self
                    .shared
                    .queue
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Some(value) = queue.pop_front() {
                    if let Some(slots) = &self.shared.slots {
                        slots.add_permits(1);
                    }
                    return Some(value);
                }
                if self.shared.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.shared.recv_notify.notified().await;
        }
    }

    /// Non-blocking variant; `None` when the queue is currently empty.
    pub fn try_recv(&self) -> Option<T> {
        let mut queue = self
            .shared
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let value = queue.pop_front();
        if value.is_some() {
            if let Some(slots) = &self.shared.slots {
                slots.add_permits(1);
            }
        }
        value
    }
}
