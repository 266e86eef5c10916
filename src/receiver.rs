//! Capabilities the router consumes from the host application.
//!
//! The router only ever holds receivers and listeners by `Weak` reference, so
//! registering a component never extends its lifetime. Dropping the last
//! `Arc` is enough to unregister it; the router notices on next use.

use crate::context::{Address, MessageContext, NamedThread};
use std::sync::Arc;

/// Anything that can be registered as a recipient or a subscriber.
pub trait Receiver: Send + Sync {
    /// Handles a message. Called on the thread returned by
    /// [`Receiver::recipient_thread`].
    fn receive_message(&self, context: &Arc<MessageContext>);

    /// Thread this receiver wants messages delivered on.
    fn recipient_thread(&self) -> NamedThread {
        NamedThread::Any
    }
}

/// Change in the registration of an address on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationKind {
    Registered,
    Unregistered,
}

/// Observer of recipient registrations.
pub trait BusListener: Send + Sync {
    fn listener_thread(&self) -> NamedThread {
        NamedThread::Any
    }

    fn notify_registration(&self, address: Address, kind: RegistrationKind);
}

/// Pre-delivery veto hook.
pub trait Interceptor: Send + Sync {
    /// Returns `true` to claim the message. A claimed message is not
    /// delivered to any recipient.
    fn intercept_message(&self, context: &Arc<MessageContext>) -> bool;
}
