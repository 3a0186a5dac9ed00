// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Unicast client transport: open handshake, framing, defragmentation
//! and lease keeping over a single TCP link.

use std::{
    sync::{Arc, Mutex as StdMutex, Weak},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use bytes::BytesMut;
use once_cell::sync::OnceCell;
use rand::RngExt;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    sync::Mutex,
    time::{Instant, sleep},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    cfg::config::Config,
    codec::buf::{Reader, Writer},
    error::ZError,
    proto::{
        core::{Channel, CloseReason, PROTOCOL_VERSION, Resolution, WhatAmI, ZenohId},
        header,
        network::NetworkMessage,
        transport::{Close, Frame, InitSyn, OpenSyn, SizeParams, TransportMessage},
    },
    session::session::Session,
    transport::{
        common::{io_with_timeout, read_message_direct},
        defrag::{DefragBuffer, StreamDeframer},
        link::Locator,
        sn::{SnCheck, SnGenerator, SnTracker},
    },
};

/// Lifecycle stage of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStage {
    Opening,
    Operational,
    Closing,
    Closed,
}

/// Negotiated parameters and per-channel sequencing state, all behind
/// the transport-state mutex.
#[derive(Debug)]
pub struct TransportState {
    pub stage: TransportStage,
    pub batch_size: u16,
    pub sn_resolution: Resolution,
    pub request_id_resolution: Resolution,
    pub peer_zid: Option<ZenohId>,
    pub peer_whatami: Option<WhatAmI>,
    pub peer_lease: Duration,
    tx_reliable: SnGenerator,
    tx_best_effort: SnGenerator,
    rx_reliable: SnTracker,
    rx_best_effort: SnTracker,
}

impl TransportState {
    fn tx(&mut self, channel: Channel) -> &mut SnGenerator {
        match channel {
            Channel::Reliable => &mut self.tx_reliable,
            Channel::BestEffort => &mut self.tx_best_effort,
        }
    }

    fn rx(&mut self, channel: Channel) -> &mut SnTracker {
        match channel {
            Channel::Reliable => &mut self.rx_reliable,
            Channel::BestEffort => &mut self.rx_best_effort,
        }
    }
}

/// A single client-role transport session over a TCP link.
///
/// The transport owns both socket halves, the negotiated parameters and
/// the per-channel sequence spaces. The receive side runs on a spawned
/// read task; a second lease task emits keep-alives and enforces the
/// peer's lease.
#[derive(Debug)]
pub struct TransportUnicast {
    pub cfg: Config,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    state: StdMutex<TransportState>,
    /// Hard-stop token: aborts both socket directions at once.
    cancel: CancellationToken,
    /// Soft gate: rejects new user writes while close runs.
    stop_writes: CancellationToken,
    /// Back-reference into the owning session for dispatch; does not
    /// extend the session's lifetime.
    session: OnceCell<Weak<Session>>,
    last_rx: StdMutex<Instant>,
}

/// Worst-case framing bytes around one network message: length prefix,
/// frame header and a maximal `vle` sequence number.
const FRAME_OVERHEAD: usize = header::LEN_PREFIX_SIZE + 1 + 10;

impl TransportUnicast {
    /// Dial `locator` and drive the client open handshake to the
    /// operational stage. The returned transport has no tasks running
    /// yet; callers wire the session back-reference first and then call
    /// [`Self::start_tasks`].
    pub async fn open(
        cfg: Config,
        locator: &Locator,
        zid: ZenohId,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        let stream = locator
            .connect_stream(cfg.runtime.connect_timeout)
            .await?;
        let (r, w) = stream.into_split();

        let state = TransportState {
            stage: TransportStage::Opening,
            batch_size: cfg.session.batch_size,
            sn_resolution: cfg.sn_resolution(),
            request_id_resolution: cfg.request_id_resolution(),
            peer_zid: None,
            peer_whatami: None,
            peer_lease: cfg.lease(),
            tx_reliable: SnGenerator::new(0, cfg.sn_resolution()),
            tx_best_effort: SnGenerator::new(0, cfg.sn_resolution()),
            rx_reliable: SnTracker::new(cfg.sn_resolution()),
            rx_best_effort: SnTracker::new(cfg.sn_resolution()),
        };

        let transport = Arc::new(Self {
            cfg,
            reader: Mutex::new(r),
            writer: Mutex::new(w),
            state: StdMutex::new(state),
            cancel,
            stop_writes: CancellationToken::new(),
            session: OnceCell::new(),
            last_rx: StdMutex::new(Instant::now()),
        });

        if let Err(e) = transport.handshake(zid).await {
            transport.close(CloseReason::Generic).await;
            return Err(e.context("open handshake failed"));
        }
        Ok(transport)
    }

    async fn handshake(&self, zid: ZenohId) -> Result<()> {
        let step_timeout = self.cfg.runtime.handshake_timeout;

        let proposed = SizeParams {
            batch_size: self.cfg.session.batch_size,
            sn_resolution: self.cfg.sn_resolution(),
            request_id_resolution: self.cfg.request_id_resolution(),
        };
        self.write_message(&TransportMessage::InitSyn(InitSyn {
            version: PROTOCOL_VERSION,
            whatami: self.cfg.session.mode.whatami(),
            zid,
            params: Some(proposed),
        }))
        .await?;

        let ack = {
            let mut r = self.reader.lock().await;
            read_message_direct(&mut r, step_timeout, &self.cancel).await?
        };
        let TransportMessage::InitAck(init_ack) = ack else {
            bail!(ZError::MalformedPacket);
        };
        if init_ack.version != PROTOCOL_VERSION {
            bail!(ZError::Unsupported);
        }

        let initial_sn = {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(theirs) = init_ack.params {
                st.batch_size = st.batch_size.min(theirs.batch_size);
                st.sn_resolution = st.sn_resolution.min(theirs.sn_resolution);
                st.request_id_resolution =
                    st.request_id_resolution.min(theirs.request_id_resolution);
            }
            st.peer_zid = Some(init_ack.zid);
            st.peer_whatami = Some(init_ack.whatami);

            let res = st.sn_resolution;
            let initial_sn = rand::rng().random::<u64>() & res.mask();
            st.tx_reliable = SnGenerator::new(initial_sn, res);
            st.tx_best_effort = SnGenerator::new(initial_sn, res);
            st.rx_reliable = SnTracker::new(res);
            st.rx_best_effort = SnTracker::new(res);
            initial_sn
        };

        self.write_message(&TransportMessage::OpenSyn(OpenSyn {
            lease_ms: self.cfg.session.lease_ms as u64,
            initial_sn,
            cookie: init_ack.cookie,
        }))
        .await?;

        let ack = {
            let mut r = self.reader.lock().await;
            read_message_direct(&mut r, step_timeout, &self.cancel).await?
        };
        let TransportMessage::OpenAck(open_ack) = ack else {
            bail!(ZError::MalformedPacket);
        };

        let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
        st.peer_lease = Duration::from_millis(open_ack.lease_ms);
        st.rx_reliable.prime(open_ack.initial_sn);
        st.rx_best_effort.prime(open_ack.initial_sn);
        st.stage = TransportStage::Operational;
        debug!(
            peer = %open_ack.initial_sn,
            lease_ms = open_ack.lease_ms,
            "transport operational"
        );
        Ok(())
    }

    /// Late-bind the owning session for receive-side dispatch.
    pub fn bind_session(&self, session: Weak<Session>) {
        let _ = self.session.set(session);
    }

    pub fn stage(&self) -> TransportStage {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).stage
    }

    pub fn peer_zid(&self) -> Option<ZenohId> {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .peer_zid
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(
            self.stage(),
            TransportStage::Closing | TransportStage::Closed
        )
    }

    /// Spawn the read and lease tasks.
    pub fn start_tasks(self: &Arc<Self>) {
        let reader = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = reader.read_loop().await {
                warn!("read loop exited: {e}");
            }
        });
        let lease = Arc::clone(self);
        tokio::spawn(async move {
            lease.lease_loop().await;
        });
    }

    async fn write_all_locked(&self, bytes: &[u8]) -> Result<()> {
        let mut w = self.writer.lock().await;
        let res = io_with_timeout(
            "write message",
            w.write_all(bytes),
            self.cfg.runtime.connect_timeout,
            &self.cancel,
        )
        .await;
        drop(w);
        if res.is_err() {
            // Write errors are fatal to the session.
            self.cancel.cancel();
        }
        res
    }

    async fn write_message(&self, msg: &TransportMessage) -> Result<()> {
        if self.cancel.is_cancelled() {
            bail!(ZError::SessionClosed);
        }
        let mut w = Writer::new();
        msg.encode_on_stream(&mut w)?;
        self.write_all_locked(w.as_slice()).await
    }

    /// Frame one network message onto the given channel, fragmenting it
    /// when it exceeds the negotiated batch size.
    pub async fn send_network(&self, msg: &NetworkMessage, channel: Channel) -> Result<()> {
        if self.stop_writes.is_cancelled() || self.cancel.is_cancelled() {
            bail!(ZError::SessionClosed);
        }

        let mut body = Writer::new();
        msg.encode(&mut body)?;

        // The writer mutex spans sequence-number allocation and the
        // actual write so concurrent publishers cannot reorder the
        // sequence space mid-frame.
        let mut w = self.writer.lock().await;

        let (batch_size, sns) = {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if st.stage != TransportStage::Operational {
                bail!(ZError::SessionClosed);
            }
            let batch_size = st.batch_size as usize;
            let max_payload = batch_size.saturating_sub(FRAME_OVERHEAD).max(1);
            let n_fragments = if body.len() + FRAME_OVERHEAD <= batch_size {
                1
            } else {
                body.len().div_ceil(max_payload)
            };
            let generator = st.tx(channel);
            let sns: Vec<u64> = (0..n_fragments).map(|_| generator.next_sn()).collect();
            (batch_size, sns)
        };

        let mut out = Writer::with_capacity(body.len() + FRAME_OVERHEAD);
        if sns.len() == 1 {
            let frame = frame_bytes(channel, sns[0], body.as_slice())?;
            out.write_slice(&frame);
        } else {
            let max_payload = batch_size.saturating_sub(FRAME_OVERHEAD).max(1);
            for (i, chunk) in body.as_slice().chunks(max_payload).enumerate() {
                let more = i + 1 < sns.len();
                let fragment = fragment_bytes(channel, sns[i], more, chunk)?;
                out.write_slice(&fragment);
            }
        }

        let res = io_with_timeout(
            "write frame",
            w.write_all(out.as_slice()),
            self.cfg.runtime.connect_timeout,
            &self.cancel,
        )
        .await;
        drop(w);
        if res.is_err() {
            self.cancel.cancel();
        }
        res
    }

    /// Send one best-effort keep-alive.
    async fn send_keepalive(&self) -> Result<()> {
        self.write_message(&TransportMessage::KeepAlive).await
    }

    /// Close the transport: best-effort Close message, link release and
    /// session notification. Idempotent.
    pub async fn close(&self, reason: CloseReason) {
        {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if matches!(st.stage, TransportStage::Closing | TransportStage::Closed) {
                return;
            }
            st.stage = TransportStage::Closing;
        }
        self.stop_writes.cancel();
        debug!(?reason, "closing transport");

        let close = TransportMessage::Close(Close {
            reason,
            session: true,
        });
        let mut w = Writer::new();
        if close.encode_on_stream(&mut w).is_ok() {
            let _ = self.write_all_locked(w.as_slice()).await;
        }

        self.cancel.cancel();
        {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            st.stage = TransportStage::Closed;
        }
        if let Some(session) = self.session.get().and_then(Weak::upgrade) {
            session.on_transport_closed();
        }
    }

    fn touch_last_rx(&self) {
        *self.last_rx.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    fn last_rx_elapsed(&self) -> Duration {
        self.last_rx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .elapsed()
    }

    async fn read_loop(self: Arc<Self>) -> Result<()> {
        let max_defrag = self.cfg.session.fragment_reassembly_max_bytes;
        let mut deframer = StreamDeframer::new();
        let mut defrag_reliable = DefragBuffer::new(max_defrag);
        let mut defrag_best_effort = DefragBuffer::new(max_defrag);
        let mut scratch = BytesMut::with_capacity(8192);

        loop {
            if self.cancel.is_cancelled() {
                bail!(ZError::SessionClosed);
            }

            let n = {
                let mut r = self.reader.lock().await;
                tokio::select! {
                    _ = self.cancel.cancelled() => bail!(ZError::SessionClosed),
                    res = r.read_buf(&mut scratch) => res.context("link read failed")?,
                }
            };
            if n == 0 {
                debug!("peer closed the link");
                self.close(CloseReason::Generic).await;
                return Ok(());
            }
            self.touch_last_rx();
            deframer.push(&scratch.split().freeze());

            while let Some(unit) = deframer.next_message() {
                let mut reader = Reader::new(&unit);
                let msg = match TransportMessage::decode(&mut reader) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("malformed transport message: {e}");
                        self.close(CloseReason::Invalid).await;
                        bail!(e);
                    },
                };
                let keep_going = self
                    .handle_transport_message(
                        msg,
                        &mut defrag_reliable,
                        &mut defrag_best_effort,
                    )
                    .await?;
                if !keep_going {
                    return Ok(());
                }
            }
        }
    }

    /// React to one decoded transport message. `Ok(false)` ends the read
    /// loop cleanly (peer close).
    async fn handle_transport_message(
        self: &Arc<Self>,
        msg: TransportMessage,
        defrag_reliable: &mut DefragBuffer,
        defrag_best_effort: &mut DefragBuffer,
    ) -> Result<bool> {
        match msg {
            TransportMessage::KeepAlive => {},
            TransportMessage::Close(close) => {
                debug!(reason = ?close.reason, "peer closed the session");
                {
                    let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
                    st.stage = TransportStage::Closed;
                }
                self.cancel.cancel();
                if let Some(session) = self.session.get().and_then(Weak::upgrade) {
                    session.on_transport_closed();
                }
                return Ok(false);
            },
            TransportMessage::Frame(frame) => {
                let defrag = match frame.channel {
                    Channel::Reliable => defrag_reliable,
                    Channel::BestEffort => defrag_best_effort,
                };
                if defrag.is_active() {
                    // A frame in the middle of a fragmented message means
                    // the sender restarted before completion.
                    warn!("frame interleaved with incomplete fragments");
                    self.close(CloseReason::Invalid).await;
                    bail!(ZError::MalformedPacket);
                }
                if !self.check_sn(frame.channel, frame.sn).await? {
                    return Ok(true);
                }
                self.dispatch_frame(frame).await;
            },
            TransportMessage::Fragment(fragment) => {
                if !self.check_fragment_sn(fragment.channel, fragment.sn).await? {
                    return Ok(true);
                }
                let defrag = match fragment.channel {
                    Channel::Reliable => defrag_reliable,
                    Channel::BestEffort => defrag_best_effort,
                };
                match defrag.push(&fragment.payload, fragment.more) {
                    Ok(None) => {},
                    Ok(Some(complete)) => {
                        let mut reader = Reader::new(&complete);
                        match NetworkMessage::decode(&mut reader) {
                            Ok(network) => self.dispatch_network(network).await,
                            Err(e) => {
                                warn!("malformed defragmented message: {e}");
                                self.close(CloseReason::Invalid).await;
                                bail!(e);
                            },
                        }
                    },
                    Err(e) => {
                        warn!("defragmentation failed: {e}");
                        self.close(CloseReason::Invalid).await;
                        bail!(e);
                    },
                }
            },
            other => {
                // Handshake and Join messages are invalid once the
                // transport is operational.
                warn!("unexpected transport message: {other:?}");
                self.close(CloseReason::Invalid).await;
                bail!(ZError::MalformedPacket);
            },
        }
        Ok(true)
    }

    /// Frame sequence check. `Ok(false)` silently drops the message.
    async fn check_sn(&self, channel: Channel, sn: u64) -> Result<bool> {
        let verdict = {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            st.rx(channel).check(sn)
        };
        match (channel, verdict) {
            (_, SnCheck::InOrder) => Ok(true),
            (Channel::BestEffort, SnCheck::Gap) => Ok(true),
            (Channel::BestEffort, SnCheck::Stale) => {
                debug!(sn, "dropping stale best-effort frame");
                Ok(false)
            },
            (Channel::Reliable, _) => {
                warn!(sn, "reliable sequence number out of order");
                self.close(CloseReason::Invalid).await;
                bail!(ZError::MalformedPacket);
            },
        }
    }

    /// Fragments additionally forbid gaps on either channel: a hole in
    /// the middle of a fragmented message can never reassemble.
    async fn check_fragment_sn(&self, channel: Channel, sn: u64) -> Result<bool> {
        let verdict = {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            st.rx(channel).check(sn)
        };
        match verdict {
            SnCheck::InOrder => Ok(true),
            SnCheck::Gap | SnCheck::Stale => {
                warn!(sn, "fragment sequence number out of order");
                self.close(CloseReason::Invalid).await;
                bail!(ZError::MalformedPacket);
            },
        }
    }

    async fn dispatch_frame(self: &Arc<Self>, frame: Frame) {
        for network in frame.payload {
            self.dispatch_network(network).await;
        }
    }

    async fn dispatch_network(self: &Arc<Self>, msg: NetworkMessage) {
        let Some(session) = self.session.get().and_then(Weak::upgrade) else {
            debug!("no session bound, dropping network message");
            return;
        };
        if let Err(e) = session.handle_network_message(msg).await {
            warn!("network message handling failed: {e}");
        }
    }

    async fn lease_loop(self: Arc<Self>) {
        let keepalive_period = self.cfg.lease() / 4;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = sleep(keepalive_period) => {},
            }
            let peer_lease = {
                let st = self.state.lock().unwrap_or_else(|p| p.into_inner());
                st.peer_lease
            };
            if self.last_rx_elapsed() >= peer_lease {
                warn!("peer lease expired");
                self.close(CloseReason::Expired).await;
                return;
            }
            if let Err(e) = self.send_keepalive().await {
                debug!("keep-alive failed: {e}");
                self.close(CloseReason::Generic).await;
                return;
            }
        }
    }
}

fn frame_bytes(channel: Channel, sn: u64, payload: &[u8]) -> Result<Vec<u8>, ZError> {
    let mut body = Writer::with_capacity(payload.len() + 11);
    let mut h = header::MID_T_FRAME;
    header::with_flag(&mut h, header::FLAG_T_FRAME_R, channel == Channel::Reliable);
    body.write_u8(h);
    crate::codec::prim::write_vle(&mut body, sn);
    body.write_slice(payload);

    prefixed(body)
}

fn fragment_bytes(
    channel: Channel,
    sn: u64,
    more: bool,
    payload: &[u8],
) -> Result<Vec<u8>, ZError> {
    let mut body = Writer::with_capacity(payload.len() + 11);
    let mut h = header::MID_T_FRAGMENT;
    header::with_flag(
        &mut h,
        header::FLAG_T_FRAGMENT_R,
        channel == Channel::Reliable,
    );
    header::with_flag(&mut h, header::FLAG_T_FRAGMENT_M, more);
    body.write_u8(h);
    crate::codec::prim::write_vle(&mut body, sn);
    body.write_slice(payload);

    prefixed(body)
}

fn prefixed(body: Writer) -> Result<Vec<u8>, ZError> {
    if body.len() > u16::MAX as usize {
        return Err(ZError::Overflow);
    }
    let mut out = Writer::with_capacity(body.len() + header::LEN_PREFIX_SIZE);
    crate::codec::prim::write_u16_le(&mut out, body.len() as u16);
    out.write_slice(body.as_slice());
    Ok(out.into_bytes().to_vec())
}
