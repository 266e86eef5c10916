//! Reliable delivery state for a single remote peer.
//!
//! A [`RemoteEndpoint`] is transport agnostic: the owner feeds it frames that
//! arrived from the network and asks it which frames to put on the wire.
//! Reliable messages are numbered per channel, acknowledged cumulatively,
//! deduplicated by id and handed to the application strictly in order.
//!
//! Each endpoint is driven by a single owner; nothing here is shared across
//! threads.
//!
//! Responses travel as ordinary reliable messages. When
//! [`RemoteEndpoint::get_next_message_to_receive`] yields one, pass it to
//! [`RemoteEndpoint::handle_response`] to resolve the originating request.

mod dedup;
mod handshake;
mod message;
mod registry;

pub use dedup::ReceivedMessageCache;
pub use handshake::{HandshakeState, ReliableHandshakeData};
pub use message::{
    duration_from_ticks, ticks_from_duration, AckData, InboundKind, InboundMessage, MessageId,
    OutboundFrame, OutboundKind, PendingMessage, PendingState, ReliableChannelId,
    TICKS_PER_SECOND, UNRELIABLE_CHANNEL_ID,
};
pub use registry::EndpointRegistry;

use crate::context::Address;
use crate::error::{BusError, Result};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Identity of a remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointContext {
    pub address: Address,
    pub name: String,
}

impl EndpointContext {
    pub fn new(address: Address, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
        }
    }
}

pub struct RemoteEndpoint {
    context: EndpointContext,

    // Outbound
    channel_id_to_send: ReliableChannelId,
    next_index_to_send: u64,
    pending_messages: Vec<PendingMessage>,
    last_ack_time_ticks: Option<i64>,
    last_sent_time: Option<Instant>,

    // Inbound
    channel_id_to_receive: ReliableChannelId,
    next_index_to_receive: u64,
    received: ReceivedMessageCache,
    queued_to_receive: VecDeque<InboundMessage>,
    out_of_order: BTreeMap<(ReliableChannelId, u64), InboundMessage>,
    last_delivered: Option<MessageId>,
    ack_to_send: Option<MessageId>,

    // Liveness and registration
    last_received_time: Instant,
    timeout_span: Duration,
    is_registered: bool,
    was_registered: bool,
    pending_resend: bool,
}

impl RemoteEndpoint {
    pub fn new(
        context: EndpointContext,
        channel_id_to_send: ReliableChannelId,
        last_received_time: Instant,
        timeout_span: Duration,
    ) -> Self {
        Self {
            context,
            channel_id_to_send,
            next_index_to_send: 0,
            pending_messages: Vec::new(),
            last_ack_time_ticks: None,
            last_sent_time: None,
            channel_id_to_receive: UNRELIABLE_CHANNEL_ID,
            next_index_to_receive: 0,
            received: ReceivedMessageCache::new(),
            queued_to_receive: VecDeque::new(),
            out_of_order: BTreeMap::new(),
            last_delivered: None,
            ack_to_send: None,
            last_received_time,
            timeout_span,
            is_registered: false,
            was_registered: false,
            pending_resend: false,
        }
    }

    pub fn context(&self) -> &EndpointContext {
        &self.context
    }

    pub fn address(&self) -> Address {
        self.context.address
    }

    pub fn channel_id_to_send(&self) -> ReliableChannelId {
        self.channel_id_to_send
    }

    pub fn channel_id_to_receive(&self) -> ReliableChannelId {
        self.channel_id_to_receive
    }

    pub fn next_index_to_send(&self) -> u64 {
        self.next_index_to_send
    }

    pub fn next_index_to_receive(&self) -> u64 {
        self.next_index_to_receive
    }

    pub fn pending_messages(&self) -> &[PendingMessage] {
        &self.pending_messages
    }

    pub fn last_ack_time_ticks(&self) -> Option<i64> {
        self.last_ack_time_ticks
    }

    pub fn timeout_span(&self) -> Duration {
        self.timeout_span
    }

    pub fn last_received_time(&self) -> Instant {
        self.last_received_time
    }

    pub fn out_of_order_len(&self) -> usize {
        self.out_of_order.len()
    }

    pub fn received_cache_len(&self) -> usize {
        self.received.len()
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Assigns the next order index and the outbound channel to `message` and
    /// appends it to the pending list. Returns its id.
    pub fn queue_message_to_send(&mut self, mut message: PendingMessage) -> MessageId {
        message.channel_id = self.channel_id_to_send;
        message.order_index = self.next_index_to_send;
        message.last_send_time = None;
        self.next_index_to_send += 1;

        let id = message.message_id();
        trace!(
            endpoint = %self.context.name,
            message_id = %id,
            order_index = message.order_index,
            "queued reliable message"
        );
        self.pending_messages.push(message);
        id
    }

    /// Applies a cumulative acknowledgement: the target and everything queued
    /// before it are acknowledged. An ack naming a message that is no longer
    /// pending acknowledges nothing.
    ///
    /// Returns `false` when the ack is not newer than the last accepted one;
    /// such acks change nothing.
    pub fn handle_acknowledgement(&mut self, ack: &AckData) -> bool {
        if self
            .last_ack_time_ticks
            .is_some_and(|last| ack.ack_send_time_ticks <= last)
        {
            return false;
        }
        self.last_ack_time_ticks = Some(ack.ack_send_time_ticks);

        let Some(target) = self
            .pending_messages
            .iter()
            .position(|m| m.message_id() == ack.source_message_id)
        else {
            warn!(
                endpoint = %self.context.name,
                message_id = %ack.source_message_id,
                "Acknowledgement for unknown message"
            );
            return true;
        };

        for message in &mut self.pending_messages[..=target] {
            message.acknowledge();
        }
        self.pending_messages.retain(|m| !m.is_complete());
        true
    }

    /// Resolves the request a response refers to. Returns `false` when the
    /// message is not a response or no matching request is pending.
    pub fn handle_response(&mut self, response: &InboundMessage) -> bool {
        let InboundKind::Response { request_id } = response.kind else {
            return false;
        };

        let Some(pos) = self
            .pending_messages
            .iter()
            .position(|m| m.message_id() == request_id)
        else {
            debug!(
                endpoint = %self.context.name,
                request_id = %request_id,
                "Response for unknown request"
            );
            return false;
        };

        let mut request = self.pending_messages.remove(pos);
        request.complete(response.payload.clone());
        true
    }

    /// Fails every outstanding message. Returns how many were failed.
    pub fn timeout_all_messages(&mut self) -> usize {
        let count = self.pending_messages.len();
        for mut message in self.pending_messages.drain(..) {
            message.time_out();
        }
        if count > 0 {
            debug!(endpoint = %self.context.name, count, "timed out pending messages");
        }
        count
    }

    /// Frames due for (re)transmission at `now`.
    ///
    /// Messages the peer has not acknowledged are sent once, then again every
    /// `resend_interval`. After a reconnection every one of them is sent
    /// immediately.
    pub fn collect_messages_to_send(&mut self, now: Instant, resend_interval: Duration) -> Vec<OutboundFrame> {
        let force = std::mem::take(&mut self.pending_resend);
        let mut frames = Vec::new();

        for message in self
            .pending_messages
            .iter_mut()
            .filter(|m| m.state() == PendingState::Pending)
        {
            let due = force
                || message
                    .last_send_time
                    .map_or(true, |last| now.saturating_duration_since(last) >= resend_interval);
            if due {
                message.last_send_time = Some(now);
                frames.push(message.to_frame());
            }
        }

        if !frames.is_empty() {
            self.last_sent_time = Some(now);
        }
        frames
    }

    /// Whether nothing has been sent for `interval`.
    pub fn needs_keep_alive(&self, now: Instant, interval: Duration) -> bool {
        self.last_sent_time
            .map_or(true, |last| now.saturating_duration_since(last) >= interval)
    }

    /// Records that the transport sent something outside
    /// [`collect_messages_to_send`](Self::collect_messages_to_send).
    pub fn record_sent(&mut self, now: Instant) {
        self.last_sent_time = Some(now);
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Accepts a frame from the transport.
    ///
    /// Every frame refreshes liveness. Keep-alives stop there; reliable
    /// duplicates are dropped.
    pub fn queue_message_to_receive(&mut self, message: InboundMessage, now: Instant) {
        self.last_received_time = now;

        if message.is_keep_alive() {
            return;
        }

        if message.is_reliable() && self.received.check_and_insert(message.message_id, now) {
            trace!(
                endpoint = %self.context.name,
                message_id = %message.message_id,
                "dropping duplicate"
            );
            // The peer missed our ack; send it again
            if let Some(last) = self.last_delivered {
                self.ack_to_send = Some(last);
            }
            return;
        }

        self.queued_to_receive.push_back(message);
    }

    /// Next message the application may handle, in reliable order.
    pub fn get_next_message_to_receive(&mut self, now: Instant) -> Option<InboundMessage> {
        while let Some(message) = self.queued_to_receive.pop_front() {
            if !message.is_reliable() {
                if message.is_safe_to_handle(now) {
                    return Some(message);
                }
                trace!(endpoint = %self.context.name, "dropping early unreliable message");
                continue;
            }

            let on_channel = message.channel_id == self.channel_id_to_receive;
            if on_channel && message.order_index == self.next_index_to_receive && message.is_safe_to_handle(now) {
                self.mark_delivered(&message);
                return Some(message);
            }

            if on_channel && message.order_index < self.next_index_to_receive {
                trace!(
                    endpoint = %self.context.name,
                    order_index = message.order_index,
                    "dropping already delivered index"
                );
                continue;
            }

            debug!(
                endpoint = %self.context.name,
                channel = message.channel_id,
                order_index = message.order_index,
                expected = self.next_index_to_receive,
                "queued out of order"
            );
            self.out_of_order
                .insert((message.channel_id, message.order_index), message);
        }

        let key = (self.channel_id_to_receive, self.next_index_to_receive);
        let message = self.out_of_order.remove(&key)?;
        if message.is_safe_to_handle(now) {
            self.mark_delivered(&message);
            Some(message)
        } else {
            self.out_of_order.insert(key, message);
            None
        }
    }

    fn mark_delivered(&mut self, message: &InboundMessage) {
        self.next_index_to_receive += 1;
        self.last_delivered = Some(message.message_id);
        self.ack_to_send = Some(message.message_id);
    }

    /// Evicts dedup entries older than `max_age`.
    pub fn purge_old_received_messages(&mut self, now: Instant, max_age: Duration) -> usize {
        self.received.purge(now, max_age)
    }

    /// Takes the ack owed to the peer, stamped with `now_ticks`.
    pub fn take_ack_to_send(&mut self, now_ticks: i64) -> Option<AckData> {
        self.ack_to_send.take().map(|source_message_id| AckData {
            ack_send_time_ticks: now_ticks,
            source_message_id,
        })
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    /// Handshake announcing our outbound channel. Unacknowledged messages are
    /// renumbered so the advertised index is the first one resent.
    pub fn make_handshake_request(&mut self) -> ReliableHandshakeData {
        let first = self.renumber_pending();
        ReliableHandshakeData::request(
            self.channel_id_to_send,
            first,
            ticks_from_duration(self.timeout_span),
        )
    }

    /// Gives the unacknowledged messages consecutive indices ending at
    /// `next_index_to_send - 1` and queues them for immediate resend.
    /// Returns the first of those indices.
    fn renumber_pending(&mut self) -> u64 {
        let count = self
            .pending_messages
            .iter()
            .filter(|m| m.state() == PendingState::Pending)
            .count() as u64;
        let first = self.next_index_to_send.saturating_sub(count);

        let channel_id_to_send = self.channel_id_to_send;
        for (index, message) in (first..).zip(
            self.pending_messages
                .iter_mut()
                .filter(|m| m.state() == PendingState::Pending),
        ) {
            message.order_index = index;
            message.channel_id = channel_id_to_send;
            message.last_send_time = None;
        }
        first
    }

    /// Switches inbound state to the peer's channel and numbering.
    fn adopt_peer_channel(&mut self, handshake: &ReliableHandshakeData) {
        let channel = handshake.reliable_channel_id;
        self.channel_id_to_receive = channel;
        self.next_index_to_receive = handshake.next_message_index;
        if handshake.endpoint_timeout_tick > 0 {
            self.timeout_span = duration_from_ticks(handshake.endpoint_timeout_tick);
        }
        self.received.clear();
        self.out_of_order.retain(|(c, _), _| *c == channel);
    }

    /// Accepts a peer's new outbound channel.
    ///
    /// Returns `None` when the peer already uses the accepted channel.
    /// Otherwise inbound state is reset to the peer's numbering, unacknowledged
    /// outbound messages are renumbered to end at `next_index_to_send - 1` and
    /// will be resent, and the response tells the peer where our numbering
    /// resumes.
    pub fn handle_reliable_handshake(&mut self, request: &ReliableHandshakeData) -> Option<ReliableHandshakeData> {
        if request.reliable_channel_id == self.channel_id_to_receive {
            return None;
        }

        self.adopt_peer_channel(request);
        let first = self.renumber_pending();

        info!(
            endpoint = %self.context.name,
            channel = request.reliable_channel_id,
            next_index = request.next_message_index,
            "Accepted reliable channel"
        );

        Some(ReliableHandshakeData {
            handshake_state: HandshakeState::Success,
            reliable_channel_id: self.channel_id_to_send,
            next_message_index: first,
            endpoint_timeout_tick: ticks_from_duration(self.timeout_span),
        })
    }

    /// Applies the peer's answer to our handshake request. An accepted
    /// handshake also carries the peer's outbound channel, which becomes our
    /// inbound one unless we already receive on it.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Protocol`] when the peer did not accept the channel.
    pub fn handle_handshake_response(&mut self, response: &ReliableHandshakeData) -> Result<()> {
        match response.handshake_state {
            HandshakeState::Success => {
                if response.reliable_channel_id != self.channel_id_to_receive {
                    self.adopt_peer_channel(response);
                }
                debug!(
                    endpoint = %self.context.name,
                    channel = response.reliable_channel_id,
                    next_index = response.next_message_index,
                    "Handshake accepted"
                );
                Ok(())
            }
            state => {
                warn!(endpoint = %self.context.name, ?state, "Handshake rejected");
                Err(BusError::protocol(format!(
                    "peer {} answered handshake with {:?}",
                    self.context.name, state
                )))
            }
        }
    }

    // ========================================================================
    // Registration and liveness
    // ========================================================================

    /// Tracks the peer's bus registration. Registering again after an earlier
    /// registration forces every unacknowledged message to be resent.
    pub fn set_registered(&mut self, registered: bool) {
        if registered && !self.is_registered && self.was_registered {
            info!(endpoint = %self.context.name, "Endpoint reconnected, resending pending messages");
            self.pending_resend = true;
        }
        if registered {
            self.was_registered = true;
        }
        self.is_registered = registered;
    }

    pub fn is_registered(&self) -> bool {
        self.is_registered
    }

    pub fn needs_resend(&self) -> bool {
        self.pending_resend
    }

    pub fn is_timed_out(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_received_time) > self.timeout_span
    }
}

impl Drop for RemoteEndpoint {
    fn drop(&mut self) {
        self.timeout_all_messages();
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use bytes::Bytes;

    const TIMEOUT: Duration = Duration::from_secs(15);

    fn endpoint(channel: ReliableChannelId) -> RemoteEndpoint {
        RemoteEndpoint::new(
            EndpointContext::new(Address::new(), "peer"),
            channel,
            Instant::now(),
            TIMEOUT,
        )
    }

    fn accept_channel(ep: &mut RemoteEndpoint, channel: ReliableChannelId, next: u64) {
        let request = ReliableHandshakeData::request(channel, next, ticks_from_duration(TIMEOUT));
        ep.handle_reliable_handshake(&request).expect("new channel");
    }

    fn drain(ep: &mut RemoteEndpoint, now: Instant) -> Vec<InboundMessage> {
        std::iter::from_fn(|| ep.get_next_message_to_receive(now)).collect()
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    #[test]
    fn test_duplicates_delivered_once() {
        let mut ep = endpoint(1);
        accept_channel(&mut ep, 9, 0);
        let now = Instant::now();

        let messages: Vec<_> = (0..5)
            .map(|i| InboundMessage::reliable(InboundKind::Event, 9, i, format!("m{i}")))
            .collect();
        for copy in 0..3 {
            for m in &messages {
                ep.queue_message_to_receive(m.clone(), now);
            }
            if copy == 0 {
                assert_eq!(ep.received_cache_len(), 5);
            }
        }

        let delivered = drain(&mut ep, now);
        let ids: Vec<_> = delivered.iter().map(|m| m.message_id).collect();
        let expected: Vec<_> = messages.iter().map(|m| m.message_id).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_permuted_arrival_delivered_in_order() {
        let mut ep = endpoint(1);
        accept_channel(&mut ep, 3, 10);
        let now = Instant::now();

        for index in [14, 11, 10, 13, 12, 15] {
            ep.queue_message_to_receive(InboundMessage::reliable(InboundKind::Event, 3, index, "x"), now);
        }

        let order: Vec<u64> = drain(&mut ep, now).iter().map(|m| m.order_index).collect();
        assert_eq!(order, vec![10, 11, 12, 13, 14, 15]);
        assert_eq!(ep.next_index_to_receive(), 16);
        assert_eq!(ep.out_of_order_len(), 0);
    }

    #[test]
    fn test_gap_blocks_delivery() {
        let mut ep = endpoint(1);
        accept_channel(&mut ep, 3, 0);
        let now = Instant::now();

        ep.queue_message_to_receive(InboundMessage::reliable(InboundKind::Event, 3, 1, "b"), now);
        assert!(ep.get_next_message_to_receive(now).is_none());
        assert_eq!(ep.out_of_order_len(), 1);

        ep.queue_message_to_receive(InboundMessage::reliable(InboundKind::Event, 3, 0, "a"), now);
        let order: Vec<u64> = drain(&mut ep, now).iter().map(|m| m.order_index).collect();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn test_not_safe_to_handle() {
        let mut ep = endpoint(1);
        accept_channel(&mut ep, 3, 0);
        let now = Instant::now();
        let later = now + Duration::from_millis(20);

        ep.queue_message_to_receive(
            InboundMessage::reliable(InboundKind::Event, 3, 0, "r").not_before(later),
            now,
        );
        ep.queue_message_to_receive(
            InboundMessage::unreliable(InboundKind::Event, "u").not_before(later),
            now,
        );

        // Reliable waits, unreliable is dropped
        assert!(ep.get_next_message_to_receive(now).is_none());
        assert!(ep.get_next_message_to_receive(now).is_none());
        let message = ep.get_next_message_to_receive(later).expect("now safe");
        assert_eq!(message.payload, Bytes::from_static(b"r"));
        assert!(ep.get_next_message_to_receive(later).is_none());
    }

    #[test]
    fn test_keep_alive_only_refreshes_liveness() {
        let start = Instant::now();
        let mut ep = RemoteEndpoint::new(
            EndpointContext::new(Address::new(), "peer"),
            1,
            start,
            Duration::from_millis(100),
        );
        let later = start + Duration::from_millis(90);
        ep.queue_message_to_receive(InboundMessage::keep_alive(), later);

        assert_eq!(ep.last_received_time(), later);
        assert!(ep.get_next_message_to_receive(later).is_none());
        assert!(!ep.is_timed_out(later + Duration::from_millis(100)));
        assert!(ep.is_timed_out(later + Duration::from_millis(101)));
    }

    #[test]
    fn test_unreliable_passes_through() {
        let mut ep = endpoint(1);
        let now = Instant::now();
        let msg = InboundMessage::unreliable(InboundKind::Event, "u");
        ep.queue_message_to_receive(msg.clone(), now);
        ep.queue_message_to_receive(msg, now);

        // Unreliable messages are not deduplicated or acked
        assert_eq!(drain(&mut ep, now).len(), 2);
        assert!(ep.take_ack_to_send(1).is_none());
    }

    #[test]
    fn test_ack_rearmed_by_duplicate() {
        let mut ep = endpoint(1);
        accept_channel(&mut ep, 3, 0);
        let now = Instant::now();
        let msg = InboundMessage::reliable(InboundKind::Event, 3, 0, "x");
        let id = msg.message_id;

        ep.queue_message_to_receive(msg.clone(), now);
        assert!(ep.get_next_message_to_receive(now).is_some());
        let ack = ep.take_ack_to_send(42).expect("ack owed");
        assert_eq!(ack.source_message_id, id);
        assert_eq!(ack.ack_send_time_ticks, 42);
        assert!(ep.take_ack_to_send(43).is_none());

        ep.queue_message_to_receive(msg, now);
        assert_eq!(ep.take_ack_to_send(44).expect("re-armed").source_message_id, id);
    }

    #[test]
    fn test_purge_old_received() {
        let mut ep = endpoint(1);
        accept_channel(&mut ep, 3, 0);
        let start = Instant::now();

        ep.queue_message_to_receive(InboundMessage::reliable(InboundKind::Event, 3, 0, "a"), start);
        ep.queue_message_to_receive(
            InboundMessage::reliable(InboundKind::Event, 3, 1, "b"),
            start + Duration::from_secs(20),
        );

        let purged = ep.purge_old_received_messages(start + Duration::from_secs(35), Duration::from_secs(30));
        assert_eq!(purged, 1);
        assert_eq!(ep.received_cache_len(), 1);
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    #[test]
    fn test_queue_assigns_indices() {
        let mut ep = endpoint(4);
        for i in 0..3 {
            ep.queue_message_to_send(PendingMessage::event(format!("e{i}")));
        }
        let indices: Vec<u64> = ep.pending_messages().iter().map(|m| m.order_index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(ep.pending_messages().iter().all(|m| m.channel_id() == 4));
        assert_eq!(ep.next_index_to_send(), 3);
    }

    #[test]
    fn test_cumulative_ack() {
        let mut ep = endpoint(1);
        let (request, mut request_rx) = PendingMessage::request("q");
        let request_id = ep.queue_message_to_send(request);
        ep.queue_message_to_send(PendingMessage::event("a"));
        let target = ep.queue_message_to_send(PendingMessage::event("b"));
        ep.queue_message_to_send(PendingMessage::event("c"));

        assert!(ep.handle_acknowledgement(&AckData {
            ack_send_time_ticks: 10,
            source_message_id: target,
        }));

        // Request waits for its response, "c" was past the target
        let states: Vec<_> = ep.pending_messages().iter().map(|m| m.state()).collect();
        assert_eq!(states, vec![PendingState::Acknowledged, PendingState::Pending]);

        let response = InboundMessage::reliable(InboundKind::Response { request_id }, 2, 0, "answer");
        assert!(ep.handle_response(&response));
        assert_eq!(ep.pending_messages().len(), 1);
        assert_eq!(
            request_rx.try_recv().expect("resolved").expect("ok"),
            Bytes::from_static(b"answer")
        );
    }

    #[test]
    fn test_stale_ack_has_no_effect() {
        let mut ep = endpoint(1);
        let first = ep.queue_message_to_send(PendingMessage::event("a"));
        let second = ep.queue_message_to_send(PendingMessage::event("b"));

        assert!(ep.handle_acknowledgement(&AckData {
            ack_send_time_ticks: 100,
            source_message_id: first,
        }));
        assert_eq!(ep.pending_messages().len(), 1);

        for ticks in [100, 50] {
            assert!(!ep.handle_acknowledgement(&AckData {
                ack_send_time_ticks: ticks,
                source_message_id: second,
            }));
            assert_eq!(ep.pending_messages().len(), 1);
            assert_eq!(ep.last_ack_time_ticks(), Some(100));
        }
    }

    #[test]
    fn test_unknown_ack_changes_nothing() {
        let mut ep = endpoint(1);
        ep.queue_message_to_send(PendingMessage::event("a"));
        ep.queue_message_to_send(PendingMessage::event("b"));

        assert!(ep.handle_acknowledgement(&AckData {
            ack_send_time_ticks: 1,
            source_message_id: MessageId::new(),
        }));
        assert_eq!(ep.pending_messages().len(), 2);
        assert_eq!(ep.last_ack_time_ticks(), Some(1));
    }

    #[test]
    fn test_resend_schedule() {
        let mut ep = endpoint(1);
        let resend = Duration::from_millis(100);
        let start = Instant::now();
        ep.queue_message_to_send(PendingMessage::event("a"));

        assert!(ep.needs_keep_alive(start, Duration::from_secs(1)));
        assert_eq!(ep.collect_messages_to_send(start, resend).len(), 1);
        assert!(!ep.needs_keep_alive(start, Duration::from_secs(1)));
        assert!(ep.collect_messages_to_send(start + Duration::from_millis(50), resend).is_empty());
        assert_eq!(ep.collect_messages_to_send(start + resend, resend).len(), 1);
        assert!(ep.needs_keep_alive(start + resend + Duration::from_secs(1), Duration::from_secs(1)));
    }

    #[test]
    fn test_drop_times_out_pending() {
        let mut ep = endpoint(1);
        let (request, mut rx) = PendingMessage::request("q");
        ep.queue_message_to_send(request);
        drop(ep);

        assert!(matches!(rx.try_recv().expect("resolved"), Err(BusError::TimedOut { .. })));
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    #[test]
    fn test_handshake_from_unreliable() {
        let mut ep = endpoint(2);
        assert_eq!(ep.channel_id_to_receive(), UNRELIABLE_CHANNEL_ID);

        let response = ep
            .handle_reliable_handshake(&ReliableHandshakeData::request(7, 100, 5000))
            .expect("new channel");

        assert_eq!(response.handshake_state, HandshakeState::Success);
        assert_eq!(response.reliable_channel_id, 2);
        assert_eq!(ep.next_index_to_receive(), 100);
        assert_eq!(ep.channel_id_to_receive(), 7);
        assert_eq!(ep.timeout_span(), duration_from_ticks(5000));

        // Same channel again: nothing to renegotiate
        assert!(ep
            .handle_reliable_handshake(&ReliableHandshakeData::request(7, 100, 5000))
            .is_none());
    }

    #[test]
    fn test_handshake_renumbers_pending() {
        let mut ep = endpoint(2);
        let now = Instant::now();
        let first = ep.queue_message_to_send(PendingMessage::event("a"));
        for i in 0..4 {
            ep.queue_message_to_send(PendingMessage::event(format!("e{i}")));
        }
        ep.collect_messages_to_send(now, Duration::from_secs(1));
        ep.handle_acknowledgement(&AckData {
            ack_send_time_ticks: 1,
            source_message_id: first,
        });
        assert_eq!(ep.pending_messages().len(), 4);

        let response = ep
            .handle_reliable_handshake(&ReliableHandshakeData::request(5, 0, 0))
            .expect("new channel");

        let indices: Vec<u64> = ep.pending_messages().iter().map(|m| m.order_index()).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
        assert_eq!(indices.last().copied(), Some(ep.next_index_to_send() - 1));
        assert_eq!(response.next_message_index, 1);
        assert!(ep.pending_messages().iter().all(|m| m.last_send_time().is_none()));
        assert_eq!(ep.timeout_span(), TIMEOUT, "zero timeout keeps the current one");
    }

    #[test]
    fn test_handshake_clears_other_channels() {
        let mut ep = endpoint(1);
        accept_channel(&mut ep, 3, 0);
        let now = Instant::now();

        let stale = InboundMessage::reliable(InboundKind::Event, 3, 5, "old");
        let early = InboundMessage::reliable(InboundKind::Event, 4, 1, "new");
        ep.queue_message_to_receive(stale.clone(), now);
        ep.queue_message_to_receive(early, now);
        assert!(ep.get_next_message_to_receive(now).is_none());
        assert_eq!(ep.out_of_order_len(), 2);

        accept_channel(&mut ep, 4, 0);
        assert_eq!(ep.out_of_order_len(), 1);
        assert_eq!(ep.received_cache_len(), 0);

        ep.queue_message_to_receive(InboundMessage::reliable(InboundKind::Event, 4, 0, "first"), now);
        let payloads: Vec<Bytes> = drain(&mut ep, now).into_iter().map(|m| m.payload).collect();
        assert_eq!(payloads, vec![Bytes::from_static(b"first"), Bytes::from_static(b"new")]);
    }

    #[test]
    fn test_handshake_response() {
        let mut ep = endpoint(1);
        let mut response = ReliableHandshakeData::request(3, 4, 0);
        assert!(matches!(ep.handle_handshake_response(&response), Err(BusError::Protocol(_))));
        assert_eq!(ep.channel_id_to_receive(), UNRELIABLE_CHANNEL_ID, "rejected answer changes nothing");

        response.handshake_state = HandshakeState::Success;
        assert!(ep.handle_handshake_response(&response).is_ok());
        assert_eq!(ep.channel_id_to_receive(), 3);
        assert_eq!(ep.next_index_to_receive(), 4);

        let now = Instant::now();
        ep.queue_message_to_receive(InboundMessage::reliable(InboundKind::Event, 3, 4, "hello"), now);
        let delivered = ep.get_next_message_to_receive(now).expect("in order on adopted channel");
        assert_eq!(delivered.payload, Bytes::from_static(b"hello"));
        assert_eq!(ep.out_of_order_len(), 0);
    }

    #[test]
    fn test_handshake_response_on_current_channel_keeps_numbering() {
        let mut ep = endpoint(1);
        accept_channel(&mut ep, 3, 0);
        let now = Instant::now();
        ep.queue_message_to_receive(InboundMessage::reliable(InboundKind::Event, 3, 0, "a"), now);
        assert!(ep.get_next_message_to_receive(now).is_some());

        let mut response = ReliableHandshakeData::request(3, 0, 0);
        response.handshake_state = HandshakeState::Success;
        ep.handle_handshake_response(&response).expect("accepted");
        assert_eq!(ep.next_index_to_receive(), 1);
    }

    #[test]
    fn test_handshake_request_renumbers_after_gap() {
        let mut ep = endpoint(2);
        let now = Instant::now();
        ep.queue_message_to_send(PendingMessage::event("e0"));
        let (request, _response_rx) = PendingMessage::request("r1");
        let request_id = ep.queue_message_to_send(request);
        ep.queue_message_to_send(PendingMessage::event("e2"));
        ep.collect_messages_to_send(now, Duration::from_secs(1));

        // r1 answered while e0 and e2 stay unacknowledged
        let reply = InboundMessage::reliable(InboundKind::Response { request_id }, 9, 0, "ok");
        assert!(ep.handle_response(&reply));

        let handshake = ep.make_handshake_request();
        let indices: Vec<u64> = ep.pending_messages().iter().map(|m| m.order_index()).collect();
        assert_eq!(handshake.next_message_index, 1);
        assert_eq!(indices, vec![1, 2]);
        assert!(ep.pending_messages().iter().all(|m| m.last_send_time().is_none()));
    }

    // ========================================================================
    // Registration
    // ========================================================================

    #[test]
    fn test_reconnection_forces_resend() {
        let mut ep = endpoint(1);
        let resend = Duration::from_secs(10);
        let now = Instant::now();
        ep.queue_message_to_send(PendingMessage::event("a"));
        ep.queue_message_to_send(PendingMessage::event("b"));

        ep.set_registered(true);
        assert!(!ep.needs_resend(), "first registration is not a reconnection");
        assert_eq!(ep.collect_messages_to_send(now, resend).len(), 2);
        assert!(ep.collect_messages_to_send(now, resend).is_empty());

        ep.set_registered(false);
        ep.set_registered(true);
        assert!(ep.needs_resend());
        assert_eq!(ep.collect_messages_to_send(now, resend).len(), 2);
        assert!(!ep.needs_resend());
    }
}
