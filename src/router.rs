//! The message router: sole owner of the routing tables.
//!
//! Producers talk to the router through a cloneable [`RouterHandle`], which
//! only ever enqueues [`Command`]s. The [`MessageRouter`] drains those commands
//! on a single logical thread, either its own async loop ([`MessageRouter::run`])
//! or a host that calls [`MessageRouter::tick`] cooperatively. No table is
//! ever touched from anywhere else, so none of them need a lock.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use topicbus::config::GeneralConfig;
//! use topicbus::context::{MessageContext, ScopeRange};
//! use topicbus::dispatch::InlineDispatcher;
//! use topicbus::receiver::Receiver;
//! use topicbus::router::MessageRouter;
//! use topicbus::tracer::NullTracer;
//!
//! struct Printer;
//!
//! impl Receiver for Printer {
//!     fn receive_message(&self, context: &Arc<MessageContext>) {
//!         println!("got {}", context.message_type());
//!     }
//! }
//!
//! let (mut router, handle) = MessageRouter::new(
//!     &GeneralConfig::default(),
//!     Arc::new(InlineDispatcher),
//!     Arc::new(NullTracer),
//! );
//!
//! let printer: Arc<dyn Receiver> = Arc::new(Printer);
//! handle.add_subscription(Arc::downgrade(&printer), "Greeting", ScopeRange::all());
//! handle.route_message(MessageContext::builder("Greeting", "hello").build());
//! router.tick();
//! ```

use crate::command::{command_queue, Command, CommandReceiver, CommandSender};
use crate::config::GeneralConfig;
use crate::context::{Address, MessageContext, MessageType, ScopeRange};
use crate::delayed::DelayedQueue;
use crate::dispatch::{DispatchTask, Dispatcher};
use crate::interceptors::InterceptorTable;
use crate::receiver::{BusListener, Interceptor, Receiver, RegistrationKind};
use crate::recipients::RecipientTable;
use crate::stats::{unix_timestamp_secs, RouterStats};
use crate::subscription::{Subscription, SubscriptionTable};
use crate::tracer::MessageTracer;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Thread-safe, non-blocking front end of a [`MessageRouter`].
#[derive(Clone)]
pub struct RouterHandle {
    commands: CommandSender,
    tracer: Arc<dyn MessageTracer>,
    stats: Arc<RwLock<RouterStats>>,
}

impl RouterHandle {
    fn enqueue(&self, command: Command) {
        if let Err(e) = self.commands.send(command) {
            debug!("Router has shut down, dropping {:?} command", e.0);
        }
    }

    pub fn add_interceptor(&self, interceptor: Arc<dyn Interceptor>, message_type: impl Into<MessageType>) {
        self.enqueue(Command::AddInterceptor {
            interceptor,
            message_type: message_type.into(),
        });
    }

    /// Removes the interceptor from one type, or from all types with
    /// [`MessageType::all`].
    pub fn remove_interceptor(&self, interceptor: Arc<dyn Interceptor>, message_type: impl Into<MessageType>) {
        self.enqueue(Command::RemoveInterceptor {
            interceptor,
            message_type: message_type.into(),
        });
    }

    pub fn add_recipient(&self, address: Address, receiver: Weak<dyn Receiver>) {
        self.enqueue(Command::AddRecipient { address, receiver });
    }

    pub fn remove_recipient(&self, address: Address) {
        self.enqueue(Command::RemoveRecipient { address });
    }

    /// Subscribes `subscriber` and returns the subscription, which the caller
    /// may keep to enable or disable it later.
    pub fn add_subscription(
        &self,
        subscriber: Weak<dyn Receiver>,
        message_type: impl Into<MessageType>,
        scope_range: ScopeRange,
    ) -> Arc<Subscription> {
        let subscription = Arc::new(Subscription::new(subscriber, message_type.into(), scope_range));
        self.enqueue(Command::AddSubscription(subscription.clone()));
        subscription
    }

    /// Unsubscribes from one type, or from all types with [`MessageType::all`].
    pub fn remove_subscription(&self, subscriber: Weak<dyn Receiver>, message_type: impl Into<MessageType>) {
        self.enqueue(Command::RemoveSubscription {
            subscriber,
            message_type: message_type.into(),
        });
    }

    pub fn route_message(&self, context: Arc<MessageContext>) {
        self.tracer.trace_sent_message(&context);
        self.enqueue(Command::RouteMessage(context));
    }

    pub fn add_notification_listener(&self, listener: Weak<dyn BusListener>) {
        self.enqueue(Command::AddListener(listener));
    }

    pub fn remove_notification_listener(&self, listener: Weak<dyn BusListener>) {
        self.enqueue(Command::RemoveListener(listener));
    }

    /// Latest statistics published by the router.
    pub fn stats(&self) -> RouterStats {
        self.stats.read().clone()
    }

    /// Returns `true` once the router has been dropped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Single-threaded worker that owns and mutates all routing state.
pub struct MessageRouter {
    commands: CommandReceiver,
    interceptors: InterceptorTable,
    recipients: RecipientTable,
    subscriptions: SubscriptionTable,
    listeners: Vec<Weak<dyn BusListener>>,
    delayed: DelayedQueue,
    dispatcher: Arc<dyn Dispatcher>,
    tracer: Arc<dyn MessageTracer>,
    allow_delayed_messaging: bool,
    poll_interval: Duration,
    routed_messages: u64,
    dispatched_messages: u64,
    intercepted_messages: u64,
    stats: Arc<RwLock<RouterStats>>,
}

impl MessageRouter {
    /// Creates a router and the handle producers use to reach it.
    pub fn new(
        config: &GeneralConfig,
        dispatcher: Arc<dyn Dispatcher>,
        tracer: Arc<dyn MessageTracer>,
    ) -> (Self, RouterHandle) {
        let (tx, rx) = command_queue();
        let stats = Arc::new(RwLock::new(RouterStats::default()));

        let router = Self {
            commands: rx,
            interceptors: InterceptorTable::new(),
            recipients: RecipientTable::new(),
            subscriptions: SubscriptionTable::new(),
            listeners: Vec::new(),
            delayed: DelayedQueue::new(),
            dispatcher,
            tracer: tracer.clone(),
            allow_delayed_messaging: config.delayed_messaging,
            poll_interval: config.poll_interval(),
            routed_messages: 0,
            dispatched_messages: 0,
            intercepted_messages: 0,
            stats: stats.clone(),
        };

        let handle = RouterHandle {
            commands: tx,
            tracer,
            stats,
        };

        (router, handle)
    }

    /// Runs one iteration at the current time.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Runs one iteration: executes every queued command in FIFO order, then
    /// dispatches every delayed message due at `now` in send-time order.
    pub fn tick_at(&mut self, now: Instant) {
        while let Ok(command) = self.commands.try_recv() {
            self.execute(command, now);
        }
        self.process_delayed(now);
        self.publish_stats();
    }

    /// How long the loop may sleep before the next iteration is needed.
    pub fn next_wait(&self, now: Instant) -> Duration {
        match self.delayed.next_due() {
            Some(due) => due.saturating_duration_since(now).min(self.poll_interval),
            None => self.poll_interval,
        }
    }

    /// Drives the router until `cancel_token` fires or every handle is dropped.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        info!("Message router started");
        loop {
            self.tick();
            let wait = self.next_wait(Instant::now());

            tokio::select! {
                _ = cancel_token.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.execute(command, Instant::now()),
                    None => {
                        debug!("All router handles dropped");
                        break;
                    }
                },
                _ = tokio::time::sleep(wait) => {}
            }
        }
        self.publish_stats();
        info!("Message router stopped");
    }

    fn execute(&mut self, command: Command, now: Instant) {
        match command {
            Command::AddInterceptor {
                interceptor,
                message_type,
            } => {
                if self.interceptors.add(interceptor, message_type.clone()) {
                    self.tracer.trace_added_interceptor(&message_type);
                }
            }
            Command::RemoveInterceptor {
                interceptor,
                message_type,
            } => {
                if self.interceptors.remove(&interceptor, &message_type) > 0 {
                    self.tracer.trace_removed_interceptor(&message_type);
                }
            }
            Command::AddRecipient { address, receiver } => {
                self.recipients.add(address, receiver);
                self.tracer.trace_added_recipient(address);
                self.notify_listeners(address, RegistrationKind::Registered);
            }
            Command::RemoveRecipient { address } => {
                if self.recipients.remove(&address) {
                    self.tracer.trace_removed_recipient(address);
                    self.notify_listeners(address, RegistrationKind::Unregistered);
                }
            }
            Command::AddSubscription(subscription) => {
                let message_type = subscription.message_type().clone();
                self.subscriptions.add(subscription);
                self.tracer.trace_added_subscription(&message_type);
            }
            Command::RemoveSubscription {
                subscriber,
                message_type,
            } => {
                if self.subscriptions.remove(&subscriber, &message_type) > 0 {
                    self.tracer.trace_removed_subscription(&message_type);
                }
            }
            Command::RouteMessage(context) => self.handle_route_message(context, now),
            Command::AddListener(listener) => {
                if !self.listeners.iter().any(|l| Weak::ptr_eq(l, &listener)) {
                    self.listeners.push(listener);
                }
            }
            Command::RemoveListener(listener) => {
                self.listeners.retain(|l| !Weak::ptr_eq(l, &listener));
            }
        }
    }

    fn handle_route_message(&mut self, context: Arc<MessageContext>, now: Instant) {
        self.routed_messages += 1;
        self.tracer.trace_routed_message(&context);

        if !context.is_valid() {
            debug!(message_type = %context.message_type(), "Discarding invalid message context");
            self.tracer.trace_discarded_message(&context, "invalid context");
            return;
        }

        if self.interceptors.intercepts(&context) {
            self.intercepted_messages += 1;
            self.tracer.trace_intercepted_message(&context);
            return;
        }

        if self.allow_delayed_messaging && context.time_sent() > now {
            self.tracer.trace_delayed_message(&context);
            self.delayed.push(context);
            return;
        }

        self.dispatch_message(context);
    }

    fn process_delayed(&mut self, now: Instant) {
        while let Some(context) = self.delayed.pop_due(now) {
            self.dispatch_message(context);
        }
    }

    fn dispatch_message(&mut self, context: Arc<MessageContext>) {
        let mut recipients: Vec<Arc<dyn Receiver>> = Vec::new();

        if context.is_forwarded_to_recipients() {
            for address in context.recipients() {
                if let Some(receiver) = self.recipients.resolve(address) {
                    if !recipients.iter().any(|r| Arc::ptr_eq(r, &receiver)) {
                        recipients.push(receiver);
                    }
                }
            }
        } else {
            self.subscriptions.collect(&context, &mut recipients);
        }

        if recipients.is_empty() {
            trace!(message_type = %context.message_type(), "No recipients");
            self.tracer.trace_discarded_message(&context, "no recipients");
            return;
        }

        for recipient in recipients {
            self.dispatched_messages += 1;
            let thread = recipient.recipient_thread();

            if thread.is_any() {
                self.tracer.trace_dispatched_message(&context, &thread, true);
                recipient.receive_message(&context);
                self.tracer.trace_handled_message(&context, &thread);
            } else {
                let task = DispatchTask::message(
                    context.clone(),
                    Arc::downgrade(&recipient),
                    Arc::downgrade(&self.tracer),
                );
                self.dispatcher.dispatch(&thread, task);
            }
        }
    }

    fn notify_listeners(&mut self, address: Address, kind: RegistrationKind) {
        let mut live = Vec::with_capacity(self.listeners.len());
        self.listeners.retain(|listener| match listener.upgrade() {
            Some(l) => {
                live.push(l);
                true
            }
            None => false,
        });

        for listener in live {
            let thread = listener.listener_thread();
            if thread.is_any() {
                listener.notify_registration(address, kind);
            } else {
                let task = DispatchTask::notification(address, kind, Arc::downgrade(&listener));
                self.dispatcher.dispatch(&thread, task);
            }
        }
    }

    /// Current statistics snapshot.
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            recipients: self.recipients.len(),
            subscriptions: self.subscriptions.len(),
            interceptors: self.interceptors.len(),
            delayed_messages: self.delayed.len(),
            routed_messages: self.routed_messages,
            dispatched_messages: self.dispatched_messages,
            intercepted_messages: self.intercepted_messages,
            timestamp: unix_timestamp_secs(),
        }
    }

    fn publish_stats(&self) {
        *self.stats.write() = self.stats();
    }
}
