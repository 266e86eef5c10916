//! Diagnostics hooks for the routing lifecycle.
//!
//! A tracer is a pure observer: none of its methods can influence whether or
//! where a message is delivered.

use crate::context::{Address, MessageContext, MessageType, NamedThread};
use std::sync::Arc;
use tracing::trace;

pub trait MessageTracer: Send + Sync {
    /// A producer handed the message to the router.
    fn trace_sent_message(&self, _context: &Arc<MessageContext>) {}

    /// The router picked the message up from its command queue.
    fn trace_routed_message(&self, _context: &Arc<MessageContext>) {}

    /// The message was parked until its send time.
    fn trace_delayed_message(&self, _context: &Arc<MessageContext>) {}

    fn trace_dispatched_message(&self, _context: &Arc<MessageContext>, _thread: &NamedThread, _inline: bool) {}

    fn trace_handled_message(&self, _context: &Arc<MessageContext>, _thread: &NamedThread) {}

    fn trace_intercepted_message(&self, _context: &Arc<MessageContext>) {}

    fn trace_discarded_message(&self, _context: &Arc<MessageContext>, _reason: &str) {}

    fn trace_added_interceptor(&self, _message_type: &MessageType) {}

    fn trace_removed_interceptor(&self, _message_type: &MessageType) {}

    fn trace_added_recipient(&self, _address: Address) {}

    fn trace_removed_recipient(&self, _address: Address) {}

    fn trace_added_subscription(&self, _message_type: &MessageType) {}

    fn trace_removed_subscription(&self, _message_type: &MessageType) {}
}

/// Tracer that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTracer;

impl MessageTracer for NullTracer {}

/// Tracer that forwards every lifecycle event to `tracing` at TRACE level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

impl MessageTracer for LogTracer {
    fn trace_sent_message(&self, context: &Arc<MessageContext>) {
        trace!(message_type = %context.message_type(), sender = %context.sender(), "sent");
    }

    fn trace_routed_message(&self, context: &Arc<MessageContext>) {
        trace!(message_type = %context.message_type(), "routed");
    }

    fn trace_delayed_message(&self, context: &Arc<MessageContext>) {
        trace!(message_type = %context.message_type(), "delayed until send time");
    }

    fn trace_dispatched_message(&self, context: &Arc<MessageContext>, thread: &NamedThread, inline: bool) {
        trace!(message_type = %context.message_type(), thread = %thread, inline, "dispatched");
    }

    fn trace_handled_message(&self, context: &Arc<MessageContext>, thread: &NamedThread) {
        trace!(message_type = %context.message_type(), thread = %thread, "handled");
    }

    fn trace_intercepted_message(&self, context: &Arc<MessageContext>) {
        trace!(message_type = %context.message_type(), "intercepted");
    }

    fn trace_discarded_message(&self, context: &Arc<MessageContext>, reason: &str) {
        trace!(message_type = %context.message_type(), reason, "discarded");
    }

    fn trace_added_interceptor(&self, message_type: &MessageType) {
        trace!(message_type = %message_type, "interceptor added");
    }

    fn trace_removed_interceptor(&self, message_type: &MessageType) {
        trace!(message_type = %message_type, "interceptor removed");
    }

    fn trace_added_recipient(&self, address: Address) {
        trace!(address = %address, "recipient added");
    }

    fn trace_removed_recipient(&self, address: Address) {
        trace!(address = %address, "recipient removed");
    }

    fn trace_added_subscription(&self, message_type: &MessageType) {
        trace!(message_type = %message_type, "subscription added");
    }

    fn trace_removed_subscription(&self, message_type: &MessageType) {
        trace!(message_type = %message_type, "subscription removed");
    }
}
