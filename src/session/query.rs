// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Outgoing pending queries and the incoming query handle passed to
//! queryable handlers.

use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::{
    keyexpr::Mapping,
    proto::{
        core::{Channel, WireExpr},
        network::NetworkMessage,
        zenoh::ResponseBody,
    },
    session::{QueryOutcome, Reply, session::Session},
};

/// Book-keeping for one outstanding `get`. The entry owns its callbacks
/// until it is retired by the final response, the deadline or session
/// close.
pub(crate) struct PendingQuery {
    pub key: String,
    pub on_reply: Arc<dyn Fn(Reply) + Send + Sync>,
    pub on_done: Arc<dyn Fn(QueryOutcome) + Send + Sync>,
}

impl std::fmt::Debug for PendingQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingQuery").field("key", &self.key).finish()
    }
}

#[derive(Debug)]
struct QueryInner {
    session: Weak<Session>,
    request_id: u32,
    keyexpr: String,
    parameters: String,
    payload: Option<Bytes>,
    finalized: AtomicBool,
}

/// An incoming query as handed to a queryable handler.
///
/// Every clone shares the same finalization state; the final response is
/// sent exactly once, either by an explicit [`Query::finish`] or when the
/// last clone is dropped.
#[derive(Debug, Clone)]
pub struct Query {
    inner: Arc<QueryInner>,
}

impl Query {
    pub(crate) fn new(
        session: Weak<Session>,
        request_id: u32,
        keyexpr: String,
        parameters: String,
        payload: Option<Bytes>,
    ) -> Self {
        Self {
            inner: Arc::new(QueryInner {
                session,
                request_id,
                keyexpr,
                parameters,
                payload,
                finalized: AtomicBool::new(false),
            }),
        }
    }

    #[inline]
    pub fn keyexpr(&self) -> &str {
        &self.inner.keyexpr
    }

    #[inline]
    pub fn parameters(&self) -> &str {
        &self.inner.parameters
    }

    #[inline]
    pub fn payload(&self) -> Option<&Bytes> {
        self.inner.payload.as_ref()
    }

    /// Send one reply carrying `payload` under `keyexpr`.
    pub async fn reply(&self, keyexpr: &str, payload: Bytes) -> Result<()> {
        let Some(session) = self.inner.session.upgrade() else {
            debug!("reply after session drop");
            return Ok(());
        };
        session
            .send_network(
                &NetworkMessage::Response {
                    id: self.inner.request_id,
                    key: WireExpr::new(0, keyexpr),
                    mapping: Mapping::Local,
                    body: ResponseBody::Reply { payload },
                },
                Channel::Reliable,
            )
            .await
    }

    /// Send an error reply.
    pub async fn reply_err(&self, payload: Bytes) -> Result<()> {
        let Some(session) = self.inner.session.upgrade() else {
            debug!("error reply after session drop");
            return Ok(());
        };
        session
            .send_network(
                &NetworkMessage::Response {
                    id: self.inner.request_id,
                    key: WireExpr::new(0, &self.inner.keyexpr),
                    mapping: Mapping::Local,
                    body: ResponseBody::Err { payload },
                },
                Channel::Reliable,
            )
            .await
    }

    /// Explicitly terminate the query with a final response.
    pub async fn finish(self) -> Result<()> {
        if self.inner.finalized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let Some(session) = self.inner.session.upgrade() else {
            return Ok(());
        };
        session
            .send_network(
                &NetworkMessage::ResponseFinal {
                    id: self.inner.request_id,
                },
                Channel::Reliable,
            )
            .await
    }
}

impl Drop for QueryInner {
    fn drop(&mut self) {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(session) = self.session.upgrade() else {
            return;
        };
        let request_id = self.request_id;
        // Dropping outside a runtime means the session is going away
        // with us; the peer learns about it from the close instead.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = session
                    .send_network(
                        &NetworkMessage::ResponseFinal { id: request_id },
                        Channel::Reliable,
                    )
                    .await
                {
                    warn!("failed to send final response: {e}");
                }
            });
        }
    }
}
