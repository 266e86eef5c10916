//! Message envelope and the identifiers the router keys its tables on.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Name of the wildcard message type.
pub const ALL_MESSAGE_TYPES: &str = "*";

/// Key identifying the type of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageType(Arc<str>);

impl MessageType {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The wildcard type. Subscriptions keyed on it see every message type.
    pub fn all() -> Self {
        Self::new(ALL_MESSAGE_TYPES)
    }

    pub fn is_all(&self) -> bool {
        &*self.0 == ALL_MESSAGE_TYPES
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Unique identifier of a message endpoint on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(Uuid);

impl Address {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Visibility of a message, from the narrowest to the widest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum MessageScope {
    None,
    /// Delivered only to subscribers living on the sender's thread.
    Thread,
    Process,
    Network,
    #[default]
    All,
}

/// Inclusive range of scopes a subscription accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeRange {
    lo: MessageScope,
    hi: MessageScope,
}

impl ScopeRange {
    /// Creates a range, swapping the bounds if given in reverse.
    pub fn new(lo: MessageScope, hi: MessageScope) -> Self {
        if lo <= hi {
            Self { lo, hi }
        } else {
            Self { lo: hi, hi: lo }
        }
    }

    pub fn only(scope: MessageScope) -> Self {
        Self { lo: scope, hi: scope }
    }

    pub fn all() -> Self {
        Self {
            lo: MessageScope::None,
            hi: MessageScope::All,
        }
    }

    pub fn contains(&self, scope: MessageScope) -> bool {
        self.lo <= scope && scope <= self.hi
    }
}

impl Default for ScopeRange {
    fn default() -> Self {
        Self::all()
    }
}

/// Logical thread a receiver wants its messages delivered on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum NamedThread {
    /// No preference; the router delivers inline on its own thread.
    #[default]
    Any,
    Named(Arc<str>),
}

impl NamedThread {
    pub fn named(name: impl AsRef<str>) -> Self {
        Self::Named(Arc::from(name.as_ref()))
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl fmt::Display for NamedThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("AnyThread"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// Immutable envelope for a routed message.
///
/// Shared by `Arc` between the router, dispatch tasks and tracers; it is never
/// modified once built.
#[derive(Debug)]
pub struct MessageContext {
    message_type: MessageType,
    payload: Bytes,
    sender: Address,
    recipients: Vec<Address>,
    scope: MessageScope,
    time_sent: Instant,
    sender_thread: NamedThread,
}

impl MessageContext {
    /// Starts building a context for a message of the given type.
    pub fn builder(message_type: impl Into<MessageType>, payload: impl Into<Bytes>) -> MessageContextBuilder {
        MessageContextBuilder {
            message_type: message_type.into(),
            payload: payload.into(),
            sender: Address::new(),
            recipients: Vec::new(),
            scope: MessageScope::All,
            time_sent: None,
            sender_thread: NamedThread::Any,
        }
    }

    /// A context is routable when it names a concrete message type.
    pub fn is_valid(&self) -> bool {
        !self.message_type.as_str().is_empty() && !self.message_type.is_all()
    }

    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    /// Explicit recipients. Empty for published (broadcast) messages.
    pub fn recipients(&self) -> &[Address] {
        &self.recipients
    }

    pub fn is_forwarded_to_recipients(&self) -> bool {
        !self.recipients.is_empty()
    }

    pub fn scope(&self) -> MessageScope {
        self.scope
    }

    pub fn time_sent(&self) -> Instant {
        self.time_sent
    }

    pub fn sender_thread(&self) -> &NamedThread {
        &self.sender_thread
    }
}

pub struct MessageContextBuilder {
    message_type: MessageType,
    payload: Bytes,
    sender: Address,
    recipients: Vec<Address>,
    scope: MessageScope,
    time_sent: Option<Instant>,
    sender_thread: NamedThread,
}

impl MessageContextBuilder {
    pub fn sender(mut self, sender: Address) -> Self {
        self.sender = sender;
        self
    }

    pub fn recipient(mut self, recipient: Address) -> Self {
        self.recipients.push(recipient);
        self
    }

    pub fn recipients(mut self, recipients: impl IntoIterator<Item = Address>) -> Self {
        self.recipients.extend(recipients);
        self
    }

    pub fn scope(mut self, scope: MessageScope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the send time. A time in the future delays delivery until then.
    pub fn time_sent(mut self, time_sent: Instant) -> Self {
        self.time_sent = Some(time_sent);
        self
    }

    pub fn sender_thread(mut self, thread: NamedThread) -> Self {
        self.sender_thread = thread;
        self
    }

    pub fn build(self) -> Arc<MessageContext> {
        Arc::new(MessageContext {
            message_type: self.message_type,
            payload: self.payload,
            sender: self.sender,
            recipients: self.recipients,
            scope: self.scope,
            time_sent: self.time_sent.unwrap_or_else(Instant::now),
            sender_thread: self.sender_thread,
        })
    }
}
