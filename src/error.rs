//! Custom error types for topicbus.
//!
//! Routing and the reliable endpoint never surface errors from their
//! processing paths: failures there are dropped, logged, or turned into a
//! terminal message state. `BusError` covers what remains, which is loading
//! configuration and the outcome delivered to callers waiting on a pending
//! outbound message.

use std::io;
use thiserror::Error;

use crate::endpoint::MessageId;

/// Errors surfaced by configuration loading and pending-message outcomes.
#[derive(Error, Debug)]
pub enum BusError {
    /// A configuration value failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration text that is not valid TOML for [`crate::config::Config`]
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Reading the configuration file failed
    #[error("Filesystem error at '{path}': {source}")]
    Filesystem {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Reliable protocol errors reported to the owner of a pending message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A pending outbound message was never completed by the remote peer
    #[error("Message {message_id} timed out")]
    TimedOut {
        /// Identifier of the message that was abandoned
        message_id: MessageId,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BusError>;

impl BusError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn filesystem(path: impl Into<String>, source: io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn timed_out(message_id: MessageId) -> Self {
        Self::TimedOut { message_id }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<anyhow::Error> for BusError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<io::Error> for BusError {
    fn from(err: io::Error) -> Self {
        Self::Filesystem {
            path: String::from("<unknown>"),
            source: err,
        }
    }
}
