//! Messages exchanged with a remote endpoint over the reliable channel.

use crate::error::{BusError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::trace;
use uuid::Uuid;

/// Identifier of a negotiated reliable channel.
pub type ReliableChannelId = u16;

/// Channel id carried by messages that have no ordering or delivery guarantee.
pub const UNRELIABLE_CHANNEL_ID: ReliableChannelId = 0;

/// Wire time unit: 100 nanoseconds.
pub const TICKS_PER_SECOND: i64 = 10_000_000;
const NANOS_PER_TICK: u128 = 100;

pub fn ticks_from_duration(duration: Duration) -> i64 {
    (duration.as_nanos() / NANOS_PER_TICK).min(i64::MAX as u128) as i64
}

/// Negative tick counts map to a zero duration.
pub fn duration_from_ticks(ticks: i64) -> Duration {
    let ticks = u64::try_from(ticks).unwrap_or(0);
    Duration::from_nanos(ticks.saturating_mul(NANOS_PER_TICK as u64))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Acknowledgement of everything up to and including `source_message_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckData {
    /// Time the peer sent the ack, in ticks. Acks not newer than the last
    /// accepted one are ignored.
    pub ack_send_time_ticks: i64,
    pub source_message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    /// Liveness only; never handed to the application.
    KeepAlive,
    Event,
    Request,
    Response { request_id: MessageId },
}

/// A message that arrived from the remote peer.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: MessageId,
    pub kind: InboundKind,
    pub channel_id: ReliableChannelId,
    pub order_index: u64,
    pub payload: Bytes,
    /// Earliest time the message may be handed to the application.
    pub not_before: Option<Instant>,
}

impl InboundMessage {
    pub fn reliable(kind: InboundKind, channel_id: ReliableChannelId, order_index: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            message_id: MessageId::new(),
            kind,
            channel_id,
            order_index,
            payload: payload.into(),
            not_before: None,
        }
    }

    pub fn unreliable(kind: InboundKind, payload: impl Into<Bytes>) -> Self {
        Self::reliable(kind, UNRELIABLE_CHANNEL_ID, 0, payload)
    }

    pub fn keep_alive() -> Self {
        Self::unreliable(InboundKind::KeepAlive, Bytes::new())
    }

    pub fn with_id(mut self, message_id: MessageId) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn not_before(mut self, time: Instant) -> Self {
        self.not_before = Some(time);
        self
    }

    pub fn is_reliable(&self) -> bool {
        self.channel_id != UNRELIABLE_CHANNEL_ID
    }

    pub fn is_keep_alive(&self) -> bool {
        self.kind == InboundKind::KeepAlive
    }

    pub fn is_safe_to_handle(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |t| now >= t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundKind {
    Event,
    /// Completes only when the peer's response arrives.
    Request,
    Response { request_id: MessageId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    Pending,
    /// Received by the peer; a request still waits for its response.
    Acknowledged,
    Completed,
    TimedOut,
}

/// Wire view of a pending message, handed to the transport for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub message_id: MessageId,
    pub kind: OutboundKind,
    pub channel_id: ReliableChannelId,
    pub order_index: u64,
    pub payload: Bytes,
}

/// Reliable outbound message kept until the peer completes it.
#[derive(Debug)]
pub struct PendingMessage {
    message_id: MessageId,
    kind: OutboundKind,
    pub(crate) channel_id: ReliableChannelId,
    pub(crate) order_index: u64,
    payload: Bytes,
    state: PendingState,
    pub(crate) last_send_time: Option<Instant>,
    completion: Option<oneshot::Sender<Result<Bytes>>>,
}

impl PendingMessage {
    fn new(kind: OutboundKind, payload: Bytes, completion: Option<oneshot::Sender<Result<Bytes>>>) -> Self {
        Self {
            message_id: MessageId::new(),
            kind,
            channel_id: UNRELIABLE_CHANNEL_ID,
            order_index: 0,
            payload,
            state: PendingState::Pending,
            last_send_time: None,
            completion,
        }
    }

    pub fn event(payload: impl Into<Bytes>) -> Self {
        Self::new(OutboundKind::Event, payload.into(), None)
    }

    /// Creates an event whose completion (or timeout) is reported on the
    /// returned receiver.
    pub fn tracked_event(payload: impl Into<Bytes>) -> (Self, oneshot::Receiver<Result<Bytes>>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(OutboundKind::Event, payload.into(), Some(tx)), rx)
    }

    /// Creates a request; the receiver resolves with the response payload.
    pub fn request(payload: impl Into<Bytes>) -> (Self, oneshot::Receiver<Result<Bytes>>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(OutboundKind::Request, payload.into(), Some(tx)), rx)
    }

    pub fn response(request_id: MessageId, payload: impl Into<Bytes>) -> Self {
        Self::new(OutboundKind::Response { request_id }, payload.into(), None)
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn kind(&self) -> OutboundKind {
        self.kind
    }

    pub fn channel_id(&self) -> ReliableChannelId {
        self.channel_id
    }

    pub fn order_index(&self) -> u64 {
        self.order_index
    }

    pub fn state(&self) -> PendingState {
        self.state
    }

    pub fn last_send_time(&self) -> Option<Instant> {
        self.last_send_time
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, PendingState::Completed | PendingState::TimedOut)
    }

    /// Records that the peer received this message.
    pub fn acknowledge(&mut self) {
        if self.state != PendingState::Pending {
            return;
        }
        match self.kind {
            OutboundKind::Request => self.state = PendingState::Acknowledged,
            OutboundKind::Event | OutboundKind::Response { .. } => self.finish(Ok(Bytes::new()), PendingState::Completed),
        }
    }

    /// Completes a request with the peer's response payload.
    pub fn complete(&mut self, response: Bytes) {
        if !self.is_complete() {
            self.finish(Ok(response), PendingState::Completed);
        }
    }

    /// Fails the message; its owner is told it timed out.
    pub fn time_out(&mut self) {
        if !self.is_complete() {
            let id = self.message_id;
            self.finish(Err(BusError::timed_out(id)), PendingState::TimedOut);
        }
    }

    fn finish(&mut self, outcome: Result<Bytes>, state: PendingState) {
        self.state = state;
        if let Some(tx) = self.completion.take() {
            if tx.send(outcome).is_err() {
                trace!(message_id = %self.message_id, "completion receiver dropped");
            }
        }
    }

    pub fn to_frame(&self) -> OutboundFrame {
        OutboundFrame {
            message_id: self.message_id,
            kind: self.kind,
            channel_id: self.channel_id,
            order_index: self.order_index,
            payload: self.payload.clone(),
        }
    }
}
