// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The session: entity declarations, sample routing and queries over one
//! client transport.

use std::{
    str::FromStr,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use dashmap::DashMap;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    cfg::config::Config,
    error::ZError,
    handlers::Handler,
    keyexpr::{KeyExpr, Mapping, intersect, resolver},
    proto::{
        core::{Channel, CloseReason, WhatAmI, WireExpr, ZenohId},
        network::{Declaration, NetworkMessage},
        zenoh::{PushBody, RequestBody, ResponseBody},
    },
    session::{
        QueryOutcome, Reply, Sample, SampleKind,
        entity::{LivelinessToken, Publisher, Queryable, Subscriber},
        query::{PendingQuery, Query},
        resource::{DeclTables, PublisherState, QueryableState, SubscriberState},
        scout,
    },
    transport::{link::Locator, unicast::TransportUnicast},
    utils::generate_zid,
};

/// An open session with one peer (usually a router).
///
/// The session exclusively owns its declaration tables and resolution
/// cache behind one mutex; the pending-query table lives in a concurrent
/// map keyed by request id, mirroring how in-flight requests are tracked
/// per tag on the transport side. No lock is ever held across a user
/// callback.
#[derive(Debug)]
pub struct Session {
    pub cfg: Config,
    pub zid: ZenohId,
    transport: Arc<TransportUnicast>,
    state: StdMutex<DeclTables>,
    pending_queries: DashMap<u32, PendingQuery>,
    next_entity_id: AtomicU32,
    next_resource_id: AtomicU32,
    next_request_id: AtomicU32,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Session {
    /// Open a session using the first configured locator, falling back
    /// to scouting when none is configured.
    pub async fn open(cfg: Config) -> Result<Arc<Self>> {
        let (zid, zid_hex) = generate_zid();
        info!(zid = %zid_hex, "opening session");

        let locator = match cfg.session.connect.first() {
            Some(locator) => Locator::from_str(locator)?,
            None => {
                let hello = scout::scout(
                    &cfg,
                    WhatAmI::ROUTER | WhatAmI::PEER,
                    Some(zid),
                )
                .await?
                .ok_or(ZError::Timeout)
                .context("scouting found no peer")?;
                let first = hello
                    .locators
                    .first()
                    .ok_or(ZError::InvalidInput)
                    .context("hello carried no locators")?;
                Locator::from_str(first)?
            },
        };

        let cancel = CancellationToken::new();
        let transport =
            TransportUnicast::open(cfg.clone(), &locator, zid, cancel.clone()).await?;

        let session = Arc::new(Self {
            state: StdMutex::new(DeclTables::new(cfg.runtime.ke_cache_capacity)),
            cfg,
            zid,
            transport: Arc::clone(&transport),
            pending_queries: DashMap::new(),
            next_entity_id: AtomicU32::new(1),
            next_resource_id: AtomicU32::new(1),
            next_request_id: AtomicU32::new(1),
            cancel,
            closed: AtomicBool::new(false),
        });
        transport.bind_session(Arc::downgrade(&session));
        transport.start_tasks();
        Ok(session)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn peer_zid(&self) -> Option<ZenohId> {
        self.transport.peer_zid()
    }

    /// Close the session: the transport sends a best-effort Close, every
    /// pending query is woken with `Closed` and every handler is shut
    /// down. Idempotent.
    pub async fn close(&self) {
        self.transport.close(CloseReason::Generic).await;
    }

    /// Transport teardown notification; also reached through [`Self::close`].
    pub(crate) fn on_transport_closed(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        debug!("session closed, retiring pending state");

        let ids: Vec<u32> = self.pending_queries.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, pq)) = self.pending_queries.remove(&id) {
                (pq.on_done)(QueryOutcome::Closed);
            }
        }

        // Handlers are closed outside the lock; closing may run a user
        // drop callback.
        let mut handlers: Vec<Handler<Sample>> = Vec::new();
        let mut query_handlers: Vec<Handler<Query>> = Vec::new();
        {
            let st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            for (_, sub) in st.local_subscribers.iter() {
                handlers.push(sub.handler.clone());
            }
            for (_, qbl) in st.local_queryables.iter() {
                query_handlers.push(qbl.handler.clone());
            }
        }
        for handler in handlers {
            handler.close();
        }
        for handler in query_handlers {
            handler.close();
        }
    }

    fn alloc_entity_id(&self) -> u32 {
        self.next_entity_id.fetch_add(1, Ordering::Relaxed)
    }

    fn alloc_request_id(&self) -> u32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) async fn send_network(
        &self,
        msg: &NetworkMessage,
        channel: Channel,
    ) -> Result<()> {
        if self.is_closed() {
            bail!(ZError::SessionClosed);
        }
        self.transport.send_network(msg, channel).await
    }

    // ─────────────────────────────────────────────────────────────────
    // Declarations

    /// Declare a numeric alias for a key-expression prefix, reducing the
    /// wire overhead of later publications on expressions under it.
    pub async fn declare_keyexpr(&self, prefix: &str) -> Result<u16> {
        let ke = KeyExpr::new(prefix)?;
        let id = self.next_resource_id.fetch_add(1, Ordering::Relaxed);
        let id = u16::try_from(id).map_err(|_| ZError::Overflow)?;
        {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            st.local_resources.insert(id as u32, ke.suffix.clone())?;
        }
        let declare = NetworkMessage::Declare(Declaration::Resource {
            id,
            key: WireExpr::new(0, &ke.suffix),
        });
        if let Err(e) = self.send_network(&declare, Channel::Reliable).await {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            st.local_resources.remove(&(id as u32));
            return Err(e);
        }
        Ok(id)
    }

    /// Declare a subscriber. The insertion happens under the session
    /// lock before the Declare leaves, so a sample matched right after
    /// cannot miss the new entry.
    pub async fn declare_subscriber(
        self: &Arc<Self>,
        keyexpr: &str,
        handler: Handler<Sample>,
    ) -> Result<Subscriber> {
        let ke = KeyExpr::new(keyexpr)?;
        let id = self.alloc_entity_id();
        {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            st.local_subscribers.insert(
                id,
                SubscriberState {
                    id,
                    key: ke.suffix.clone(),
                    handler,
                },
            )?;
        }
        let declare = NetworkMessage::Declare(Declaration::Subscriber {
            id,
            key: WireExpr::new(0, &ke.suffix),
        });
        if let Err(e) = self.send_network(&declare, Channel::Reliable).await {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            st.local_subscribers.remove(&id);
            return Err(e);
        }
        debug!(id, keyexpr, "declared subscriber");
        Ok(Subscriber {
            session: Arc::downgrade(self),
            id,
        })
    }

    pub(crate) async fn undeclare_subscriber(&self, id: u32) -> Result<()> {
        let removed = {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            st.local_subscribers.remove(&id)
        };
        let Some(sub) = removed else {
            bail!(ZError::EntityUnknown);
        };
        sub.handler.close();
        self.send_network(
            &NetworkMessage::Declare(Declaration::ForgetSubscriber { id }),
            Channel::Reliable,
        )
        .await
    }

    pub async fn declare_publisher(
        self: &Arc<Self>,
        keyexpr: &str,
    ) -> Result<Publisher> {
        let ke = KeyExpr::new(keyexpr)?;
        let id = self.alloc_entity_id();
        {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            st.local_publishers.insert(
                id,
                PublisherState {
                    id,
                    key: ke.suffix.clone(),
                },
            )?;
        }
        let declare = NetworkMessage::Declare(Declaration::Publisher {
            id,
            key: WireExpr::new(0, &ke.suffix),
        });
        if let Err(e) = self.send_network(&declare, Channel::Reliable).await {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            st.local_publishers.remove(&id);
            return Err(e);
        }
        Ok(Publisher {
            session: Arc::downgrade(self),
            id,
            key: ke.suffix,
        })
    }

    pub(crate) async fn undeclare_publisher(&self, id: u32) -> Result<()> {
        let removed = {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            st.local_publishers.remove(&id)
        };
        if removed.is_none() {
            bail!(ZError::EntityUnknown);
        }
        self.send_network(
            &NetworkMessage::Declare(Declaration::ForgetPublisher { id }),
            Channel::Reliable,
        )
        .await
    }

    pub async fn declare_queryable(
        self: &Arc<Self>,
        keyexpr: &str,
        complete: bool,
        handler: Handler<Query>,
    ) -> Result<Queryable> {
        let ke = KeyExpr::new(keyexpr)?;
        let id = self.alloc_entity_id();
        {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            st.local_queryables.insert(
                id,
                QueryableState {
                    id,
                    key: ke.suffix.clone(),
                    complete,
                    distance: 0,
                    handler,
                },
            )?;
        }
        let declare = NetworkMessage::Declare(Declaration::Queryable {
            id,
            key: WireExpr::new(0, &ke.suffix),
            complete,
            distance: 0,
        });
        if let Err(e) = self.send_network(&declare, Channel::Reliable).await {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            st.local_queryables.remove(&id);
            return Err(e);
        }
        debug!(id, keyexpr, "declared queryable");
        Ok(Queryable {
            session: Arc::downgrade(self),
            id,
        })
    }

    pub(crate) async fn undeclare_queryable(&self, id: u32) -> Result<()> {
        let removed = {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            st.local_queryables.remove(&id)
        };
        let Some(qbl) = removed else {
            bail!(ZError::EntityUnknown);
        };
        qbl.handler.close();
        self.send_network(
            &NetworkMessage::Declare(Declaration::ForgetQueryable { id }),
            Channel::Reliable,
        )
        .await
    }

    /// Declare a liveliness token on `keyexpr`.
    pub async fn liveliness_declare_token(
        self: &Arc<Self>,
        keyexpr: &str,
    ) -> Result<LivelinessToken> {
        let ke = KeyExpr::new(keyexpr)?;
        let id = self.alloc_entity_id();
        {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            st.local_tokens.insert(id, ke.suffix.clone())?;
        }
        let declare = NetworkMessage::Declare(Declaration::Token {
            id,
            key: WireExpr::new(0, &ke.suffix),
        });
        if let Err(e) = self.send_network(&declare, Channel::Reliable).await {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            st.local_tokens.remove(&id);
            return Err(e);
        }
        Ok(LivelinessToken {
            session: Arc::downgrade(self),
            id,
        })
    }

    pub(crate) async fn undeclare_token(&self, id: u32) -> Result<()> {
        let removed = {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            st.local_tokens.remove(&id)
        };
        if removed.is_none() {
            bail!(ZError::EntityUnknown);
        }
        self.send_network(
            &NetworkMessage::Declare(Declaration::ForgetToken { id }),
            Channel::Reliable,
        )
        .await
    }

    // ─────────────────────────────────────────────────────────────────
    // Publication

    pub async fn put(&self, keyexpr: &str, payload: Bytes) -> Result<()> {
        let ke = KeyExpr::new(keyexpr)?;
        self.send_network(
            &NetworkMessage::Push {
                key: WireExpr::new(0, &ke.suffix),
                mapping: Mapping::Local,
                body: PushBody::Put { payload },
            },
            Channel::Reliable,
        )
        .await
    }

    pub async fn delete(&self, keyexpr: &str) -> Result<()> {
        let ke = KeyExpr::new(keyexpr)?;
        self.send_network(
            &NetworkMessage::Push {
                key: WireExpr::new(0, &ke.suffix),
                mapping: Mapping::Local,
                body: PushBody::Del,
            },
            Channel::Reliable,
        )
        .await
    }

    // ─────────────────────────────────────────────────────────────────
    // Queries

    /// Issue a query. `on_reply` runs once per reply; `on_done` exactly
    /// once, with the reason the query ended.
    pub async fn get(
        self: &Arc<Self>,
        keyexpr: &str,
        parameters: &str,
        payload: Option<Bytes>,
        on_reply: impl Fn(Reply) + Send + Sync + 'static,
        on_done: impl Fn(QueryOutcome) + Send + Sync + 'static,
        timeout: Option<Duration>,
    ) -> Result<u32> {
        let ke = KeyExpr::new(keyexpr)?;
        let id = self.alloc_request_id();
        self.pending_queries.insert(
            id,
            PendingQuery {
                key: ke.suffix.clone(),
                on_reply: Arc::new(on_reply),
                on_done: Arc::new(on_done),
            },
        );

        let request = NetworkMessage::Request {
            id,
            key: WireExpr::new(0, &ke.suffix),
            mapping: Mapping::Local,
            body: RequestBody::Query {
                parameters: parameters.to_string(),
                payload,
            },
        };
        if let Err(e) = self.send_network(&request, Channel::Reliable).await {
            let _ = self.pending_queries.remove(&id);
            return Err(e);
        }

        let deadline = timeout.unwrap_or(self.cfg.runtime.query_timeout);
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            sleep(deadline).await;
            let Some(session) = weak.upgrade() else {
                return;
            };
            if let Some((_, pq)) = session.pending_queries.remove(&id) {
                debug!(id, key = %pq.key, "query deadline expired");
                (pq.on_done)(QueryOutcome::Timeout);
            }
        });
        Ok(id)
    }

    // ─────────────────────────────────────────────────────────────────
    // Receive-side routing

    /// React to one network message from the read task. Routing errors
    /// are reported to the caller; they never tear the transport down.
    pub(crate) async fn handle_network_message(
        self: &Arc<Self>,
        msg: NetworkMessage,
    ) -> Result<()> {
        match msg {
            NetworkMessage::Declare(decl) => self.handle_declaration(decl),
            NetworkMessage::Push { key, mapping, body } => {
                self.handle_push(key, mapping, body).await
            },
            NetworkMessage::Request {
                id,
                key,
                mapping,
                body,
            } => self.handle_request(id, key, mapping, body).await,
            NetworkMessage::Response {
                id,
                key,
                mapping,
                body,
            } => self.handle_response(id, key, mapping, body),
            NetworkMessage::ResponseFinal { id } => {
                if let Some((_, pq)) = self.pending_queries.remove(&id) {
                    (pq.on_done)(QueryOutcome::Final);
                } else {
                    debug!(id, "final response for unknown request");
                }
                Ok(())
            },
        }
    }

    /// Mutate the remote tables. Duplicate ids fail the declaration,
    /// unknown ids fail the undeclaration, mirroring the peer contract.
    fn handle_declaration(&self, decl: Declaration) -> Result<()> {
        let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
        match decl {
            Declaration::Resource { id, key } => {
                if st.remote_resources.contains_key(&(id as u32)) {
                    bail!(ZError::EntityDeclarationFailed);
                }
                let expanded = Self::expand_in(&mut st, &key, Mapping::Remote)?;
                st.remote_resources.insert(id as u32, expanded)?;
            },
            Declaration::ForgetResource { id } => {
                if st.remote_resources.remove(&(id as u32)).is_none() {
                    bail!(ZError::EntityUnknown);
                }
                // Cached resolutions may reference the dropped prefix.
                st.ke_cache.clear();
            },
            Declaration::Publisher { id, key } => {
                if st.remote_publishers.contains_key(&id) {
                    bail!(ZError::EntityDeclarationFailed);
                }
                let expanded = Self::expand_in(&mut st, &key, Mapping::Remote)?;
                st.remote_publishers.insert(id, expanded)?;
            },
            Declaration::ForgetPublisher { id } => {
                if st.remote_publishers.remove(&id).is_none() {
                    bail!(ZError::EntityUnknown);
                }
            },
            Declaration::Subscriber { id, key } => {
                if st.remote_subscribers.contains_key(&id) {
                    bail!(ZError::EntityDeclarationFailed);
                }
                let expanded = Self::expand_in(&mut st, &key, Mapping::Remote)?;
                st.remote_subscribers.insert(id, expanded)?;
            },
            Declaration::ForgetSubscriber { id } => {
                if st.remote_subscribers.remove(&id).is_none() {
                    bail!(ZError::EntityUnknown);
                }
            },
            Declaration::Queryable { id, key, .. } => {
                if st.remote_queryables.contains_key(&id) {
                    bail!(ZError::EntityDeclarationFailed);
                }
                let expanded = Self::expand_in(&mut st, &key, Mapping::Remote)?;
                st.remote_queryables.insert(id, expanded)?;
            },
            Declaration::ForgetQueryable { id } => {
                if st.remote_queryables.remove(&id).is_none() {
                    bail!(ZError::EntityUnknown);
                }
            },
            Declaration::Token { id, key } => {
                if st.remote_tokens.contains_key(&id) {
                    bail!(ZError::EntityDeclarationFailed);
                }
                let expanded = Self::expand_in(&mut st, &key, Mapping::Remote)?;
                st.remote_tokens.insert(id, expanded)?;
            },
            Declaration::ForgetToken { id } => {
                if st.remote_tokens.remove(&id).is_none() {
                    bail!(ZError::EntityUnknown);
                }
            },
        }
        Ok(())
    }

    fn expand_in(st: &mut DeclTables, key: &WireExpr, mapping: Mapping) -> Result<String> {
        let ke = KeyExpr {
            scope: key.scope,
            suffix: key.suffix.clone(),
            mapping,
        };
        let resources = match mapping {
            Mapping::Remote => &st.remote_resources,
            Mapping::Local => &st.local_resources,
        };
        resolver::resolve(&ke, resources, &mut st.ke_cache)
    }

    async fn handle_push(
        self: &Arc<Self>,
        key: WireExpr,
        mapping: Mapping,
        body: PushBody,
    ) -> Result<()> {
        let (expanded, targets) = {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            let expanded = Self::expand_in(&mut st, &key, mapping)?;
            let mut targets: Vec<(u32, Handler<Sample>)> = st
                .local_subscribers
                .iter()
                .filter(|(_, sub)| intersect::intersects(&sub.key, &expanded))
                .map(|(id, sub)| (*id, sub.handler.clone()))
                .collect();
            // Fan out in declaration order.
            targets.sort_unstable_by_key(|(id, _)| *id);
            (expanded, targets)
        };
        if targets.is_empty() {
            debug!(key = %expanded, "no local subscriber matches");
            return Ok(());
        }

        let sample = match body {
            PushBody::Put { payload } => Sample {
                keyexpr: expanded,
                payload,
                kind: SampleKind::Put,
            },
            PushBody::Del => Sample {
                keyexpr: expanded,
                payload: Bytes::new(),
                kind: SampleKind::Delete,
            },
        };
        for (_, handler) in targets {
            handler.handle(sample.clone()).await;
        }
        Ok(())
    }

    async fn handle_request(
        self: &Arc<Self>,
        id: u32,
        key: WireExpr,
        mapping: Mapping,
        body: RequestBody,
    ) -> Result<()> {
        let RequestBody::Query {
            parameters,
            payload,
        } = body
        else {
            debug!(id, "ignoring pull request");
            return Ok(());
        };

        let (expanded, handlers) = {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            let expanded = Self::expand_in(&mut st, &key, mapping)?;
            let mut handlers: Vec<(u32, Handler<Query>)> = st
                .local_queryables
                .iter()
                .filter(|(_, qbl)| intersect::intersects(&qbl.key, &expanded))
                .map(|(qid, qbl)| (*qid, qbl.handler.clone()))
                .collect();
            handlers.sort_unstable_by_key(|(qid, _)| *qid);
            (expanded, handlers)
        };

        if handlers.is_empty() {
            debug!(id, key = %expanded, "query matches no local queryable");
            self.send_network(
                &NetworkMessage::ResponseFinal { id },
                Channel::Reliable,
            )
            .await?;
            return Ok(());
        }

        let query = Query::new(
            Arc::downgrade(self),
            id,
            expanded,
            parameters,
            payload,
        );
        for (_, handler) in handlers {
            handler.handle(query.clone()).await;
        }
        Ok(())
    }

    fn handle_response(
        &self,
        id: u32,
        key: WireExpr,
        mapping: Mapping,
        body: ResponseBody,
    ) -> Result<()> {
        let expanded = {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            Self::expand_in(&mut st, &key, mapping)?
        };
        let Some(pq) = self.pending_queries.get(&id) else {
            debug!(id, "response for unknown request");
            return Ok(());
        };
        let on_reply = Arc::clone(&pq.on_reply);
        drop(pq);

        let reply = match body {
            ResponseBody::Reply { payload } => Reply {
                keyexpr: expanded,
                result: Ok(payload),
            },
            ResponseBody::Err { payload } => Reply {
                keyexpr: expanded,
                result: Err(payload),
            },
            ResponseBody::Ack => {
                debug!(id, "acknowledgment received");
                return Ok(());
            },
        };
        on_reply(reply);
        Ok(())
    }
}
