use crate::context::{MessageContext, MessageType};
use crate::receiver::Interceptor;
use ahash::AHashSet;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TypeFilterConfig {
    #[serde(default)]
    pub block_types: Vec<String>,
}

/// Interceptor that swallows every message of a blocked type.
#[derive(Debug, Default)]
pub struct TypeFilter {
    blocked: AHashSet<MessageType>,
}

impl TypeFilter {
    pub fn new(blocked: impl IntoIterator<Item = MessageType>) -> Self {
        Self {
            blocked: blocked.into_iter().collect(),
        }
    }

    pub fn from_config(config: &TypeFilterConfig) -> Self {
        Self::new(config.block_types.iter().map(MessageType::new))
    }

    pub fn is_blocked(&self, message_type: &MessageType) -> bool {
        self.blocked.contains(message_type)
    }

    /// Types this filter must be registered for.
    pub fn blocked_types(&self) -> impl Iterator<Item = &MessageType> {
        self.blocked.iter()
    }
}

impl Interceptor for TypeFilter {
    fn intercept_message(&self, context: &Arc<MessageContext>) -> bool {
        self.is_blocked(context.message_type())
    }
}
