use super::message::{ReliableChannelId, UNRELIABLE_CHANNEL_ID};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HandshakeState {
    #[default]
    None,
    Success,
    Failure,
}

/// Reliable-channel negotiation payload. Travels over the network in both
/// directions: a request announces the sender's outbound channel, a response
/// returns the receiver's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReliableHandshakeData {
    pub handshake_state: HandshakeState,
    pub reliable_channel_id: ReliableChannelId,
    /// Order index of the next message the sender will put on the channel.
    pub next_message_index: u64,
    /// Endpoint timeout in 100 ns ticks.
    pub endpoint_timeout_tick: i64,
}

impl ReliableHandshakeData {
    pub fn request(reliable_channel_id: ReliableChannelId, next_message_index: u64, endpoint_timeout_tick: i64) -> Self {
        Self {
            handshake_state: HandshakeState::None,
            reliable_channel_id,
            next_message_index,
            endpoint_timeout_tick,
        }
    }

    pub fn is_reliable(&self) -> bool {
        self.reliable_channel_id != UNRELIABLE_CHANNEL_ID
    }
}
