// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Handler fabric: the glue between the receive task and user code.
//!
//! A handler is either a callback (plus optional drop notification)
//! invoked synchronously on the receive task, or a bounded channel that
//! carries full ownership of each sample to a user-side receiver.

pub mod channel;

use std::sync::Arc;

use crate::handlers::channel::{FifoSender, RingSender};

/// User callback plus an optional drop notification fired once when the
/// owning entity is undeclared or the session closes.
#[derive(Clone)]
pub struct Callback<T> {
    call: Arc<dyn Fn(T) + Send + Sync>,
    dropper: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl<T> Callback<T> {
    pub fn new(call: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            call: Arc::new(call),
            dropper: None,
        }
    }

    pub fn with_drop(
        call: impl Fn(T) + Send + Sync + 'static,
        dropper: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            call: Arc::new(call),
            dropper: Some(Arc::new(dropper)),
        }
    }
}

impl<T> std::fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Callback")
    }
}

/// How the receive task hands one sample to user code.
#[derive(Debug, Clone)]
pub enum Handler<T> {
    Callback(Callback<T>),
    Fifo(FifoSender<T>),
    Ring(RingSender<T>),
}

impl<T: Send + 'static> Handler<T> {
    pub fn callback(call: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self::Callback(Callback::new(call))
    }

    /// Deliver one sample. Never called with the session lock held; a
    /// `BlockOnFull` channel may suspend the receive task here.
    pub async fn handle(&self, value: T) {
        match self {
            Self::Callback(cb) => (cb.call)(value),
            Self::Fifo(tx) => tx.send(value).await,
            Self::Ring(tx) => tx.send(value),
        }
    }

    /// Tear down the user side: fire the drop notification and wake any
    /// blocked receiver with a closed channel.
    pub fn close(&self) {
        match self {
            Self::Callback(cb) => {
                if let Some(dropper) = &cb.dropper {
                    dropper();
                }
            },
            Self::Fifo(tx) => tx.close(),
            Self::Ring(tx) => tx.close(),
        }
    }
}
