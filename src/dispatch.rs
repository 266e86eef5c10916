//! Cross-thread delivery of messages and registration notifications.
//!
//! The router hands a [`DispatchTask`] to a [`Dispatcher`] whenever a receiver
//! or listener asked to be called on a named thread. The router does not wait
//! for tasks to run. Tasks queued for the same thread run in submission order.

use crate::context::{Address, MessageContext, NamedThread};
use crate::error::{BusError, Result};
use crate::receiver::{BusListener, Receiver, RegistrationKind};
use crate::tracer::MessageTracer;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// A single delivery carried across a thread boundary.
///
/// The target is held weakly and re-resolved when the task runs; if it has
/// gone away in the meantime the task does nothing.
pub enum DispatchTask {
    Message {
        context: Arc<MessageContext>,
        recipient: Weak<dyn Receiver>,
        tracer: Weak<dyn MessageTracer>,
    },
    Notification {
        address: Address,
        kind: RegistrationKind,
        listener: Weak<dyn BusListener>,
    },
}

impl DispatchTask {
    pub fn message(
        context: Arc<MessageContext>,
        recipient: Weak<dyn Receiver>,
        tracer: Weak<dyn MessageTracer>,
    ) -> Self {
        Self::Message {
            context,
            recipient,
            tracer,
        }
    }

    pub fn notification(address: Address, kind: RegistrationKind, listener: Weak<dyn BusListener>) -> Self {
        Self::Notification {
            address,
            kind,
            listener,
        }
    }

    /// Other work may be chained on the completion of a dispatch task.
    pub fn tracks_subsequents(&self) -> bool {
        true
    }

    /// Runs the delivery on the calling thread, which is `thread`.
    pub fn execute(self, thread: &NamedThread) {
        match self {
            Self::Message {
                context,
                recipient,
                tracer,
            } => {
                let Some(recipient) = recipient.upgrade() else {
                    trace!(message_type = %context.message_type(), "recipient expired before dispatch");
                    return;
                };
                let tracer = tracer.upgrade();

                if let Some(tracer) = &tracer {
                    tracer.trace_dispatched_message(&context, thread, false);
                }
                recipient.receive_message(&context);
                if let Some(tracer) = &tracer {
                    tracer.trace_handled_message(&context, thread);
                }
            }
            Self::Notification {
                address,
                kind,
                listener,
            } => {
                if let Some(listener) = listener.upgrade() {
                    listener.notify_registration(address, kind);
                }
            }
        }
    }
}

/// Scheduler that runs dispatch tasks on named threads.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, thread: &NamedThread, task: DispatchTask);
}

/// Runs every task immediately on the router's thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, thread: &NamedThread, task: DispatchTask) {
        task.execute(thread);
    }
}

/// Per-thread queues that the host drains from its own threads.
///
/// Used when the host owns its named threads (for example a main loop that
/// also pumps the router with [`crate::router::MessageRouter::tick`]).
#[derive(Default)]
pub struct PumpedDispatcher {
    queues: Mutex<AHashMap<NamedThread, VecDeque<DispatchTask>>>,
}

impl PumpedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting for `thread`.
    pub fn pending(&self, thread: &NamedThread) -> usize {
        self.queues.lock().get(thread).map_or(0, VecDeque::len)
    }

    /// Runs queued tasks for `thread` until its queue is empty and returns how
    /// many ran. Tasks queued while draining are run as well.
    pub fn process_until_idle(&self, thread: &NamedThread) -> usize {
        let mut processed = 0;
        loop {
            // Release the lock before running the task so it can dispatch more work
            let task = self.queues.lock().get_mut(thread).and_then(VecDeque::pop_front);
            match task {
                Some(task) => {
                    task.execute(thread);
                    processed += 1;
                }
                None => return processed,
            }
        }
    }
}

impl Dispatcher for PumpedDispatcher {
    fn dispatch(&self, thread: &NamedThread, task: DispatchTask) {
        self.queues.lock().entry(thread.clone()).or_default().push_back(task);
    }
}

/// Runs each named thread as a lane: one tokio task fed by its own channel.
///
/// Lanes are spawned on first use and stop when the cancellation token fires.
/// Receivers run on the runtime's worker threads and should not block.
pub struct LaneDispatcher {
    lanes: Mutex<AHashMap<NamedThread, mpsc::UnboundedSender<DispatchTask>>>,
    runtime: Handle,
    cancel_token: CancellationToken,
}

impl LaneDispatcher {
    pub fn new(runtime: Handle, cancel_token: CancellationToken) -> Self {
        Self {
            lanes: Mutex::new(AHashMap::new()),
            runtime,
            cancel_token,
        }
    }

    /// Creates a dispatcher on the runtime of the calling context.
    ///
    /// # Errors
    ///
    /// Fails when called outside a tokio runtime.
    pub fn current(cancel_token: CancellationToken) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| BusError::internal(e.to_string()))?;
        Ok(Self::new(runtime, cancel_token))
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.lock().len()
    }

    fn spawn_lane(&self, thread: &NamedThread) -> mpsc::UnboundedSender<DispatchTask> {
        let (tx, mut rx) = mpsc::unbounded_channel::<DispatchTask>();
        let token = self.cancel_token.child_token();
        let thread = thread.clone();

        debug!("Starting dispatch lane {}", thread);
        self.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    task = rx.recv() => match task {
                        Some(task) => task.execute(&thread),
                        None => break,
                    }
                }
            }
            debug!("Dispatch lane {} stopped", thread);
        });

        tx
    }
}

impl Dispatcher for LaneDispatcher {
    fn dispatch(&self, thread: &NamedThread, task: DispatchTask) {
        let mut lanes = self.lanes.lock();
        let lane = lanes
            .entry(thread.clone())
            .or_insert_with(|| self.spawn_lane(thread));

        if lane.send(task).is_err() {
            // Lane stopped; the delivery is dropped like any expired target
            debug!("Dispatch lane {} is closed, dropping task", thread);
            lanes.remove(thread);
        }
    }
}
