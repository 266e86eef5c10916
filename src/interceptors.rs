use crate::context::{MessageContext, MessageType};
use crate::receiver::Interceptor;
use ahash::AHashMap;
use std::sync::Arc;

/// Interceptors keyed by the message type they watch.
#[derive(Default)]
pub struct InterceptorTable {
    by_type: AHashMap<MessageType, Vec<Arc<dyn Interceptor>>>,
}

impl InterceptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the interceptor was already registered for the type.
    pub fn add(&mut self, interceptor: Arc<dyn Interceptor>, message_type: MessageType) -> bool {
        let list = self.by_type.entry(message_type).or_default();
        if list.iter().any(|i| Arc::ptr_eq(i, &interceptor)) {
            return false;
        }
        list.push(interceptor);
        true
    }

    /// Removes the interceptor from `message_type`, or from every type when
    /// `message_type` is the wildcard. Returns the number of registrations removed.
    pub fn remove(&mut self, interceptor: &Arc<dyn Interceptor>, message_type: &MessageType) -> usize {
        let mut removed = 0;
        for (ty, list) in self.by_type.iter_mut() {
            if message_type.is_all() || ty == message_type {
                let before = list.len();
                list.retain(|i| !Arc::ptr_eq(i, interceptor));
                removed += before - list.len();
            }
        }
        self.by_type.retain(|_, list| !list.is_empty());
        removed
    }

    /// Asks the interceptors registered for the message's exact type; the
    /// first one to claim the message wins.
    pub fn intercepts(&self, context: &Arc<MessageContext>) -> bool {
        self.by_type
            .get(context.message_type())
            .is_some_and(|list| list.iter().any(|i| i.intercept_message(context)))
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}
