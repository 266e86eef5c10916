//! Mutations funneled to the router's single consumer.
//!
//! Producers on any thread push commands without blocking; the router drains
//! them in FIFO order at the start of every tick.

use crate::context::{Address, MessageContext, MessageType};
use crate::receiver::{BusListener, Interceptor, Receiver};
use crate::subscription::Subscription;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

pub enum Command {
    AddInterceptor {
        interceptor: Arc<dyn Interceptor>,
        message_type: MessageType,
    },
    RemoveInterceptor {
        interceptor: Arc<dyn Interceptor>,
        message_type: MessageType,
    },
    AddRecipient {
        address: Address,
        receiver: Weak<dyn Receiver>,
    },
    RemoveRecipient {
        address: Address,
    },
    AddSubscription(Arc<Subscription>),
    RemoveSubscription {
        subscriber: Weak<dyn Receiver>,
        message_type: MessageType,
    },
    RouteMessage(Arc<MessageContext>),
    AddListener(Weak<dyn BusListener>),
    RemoveListener(Weak<dyn BusListener>),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddInterceptor { .. } => "AddInterceptor",
            Self::RemoveInterceptor { .. } => "RemoveInterceptor",
            Self::AddRecipient { .. } => "AddRecipient",
            Self::RemoveRecipient { .. } => "RemoveRecipient",
            Self::AddSubscription(_) => "AddSubscription",
            Self::RemoveSubscription { .. } => "RemoveSubscription",
            Self::RouteMessage(_) => "RouteMessage",
            Self::AddListener(_) => "AddListener",
            Self::RemoveListener(_) => "RemoveListener",
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type CommandSender = mpsc::UnboundedSender<Command>;
pub type CommandReceiver = mpsc::UnboundedReceiver<Command>;

/// Creates the unbounded multi-producer, single-consumer command queue.
pub fn command_queue() -> (CommandSender, CommandReceiver) {
    mpsc::unbounded_channel()
}
