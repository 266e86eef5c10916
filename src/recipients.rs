//! Address book for directly addressed messages.

use crate::context::Address;
use crate::receiver::Receiver;
use ahash::AHashMap;
use std::sync::{Arc, Weak};
use tracing::trace;

/// Maps each address to at most one weakly held receiver.
#[derive(Default)]
pub struct RecipientTable {
    recipients: AHashMap<Address, Weak<dyn Receiver>>,
}

impl RecipientTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `receiver` at `address`, silently replacing any previous one.
    pub fn add(&mut self, address: Address, receiver: Weak<dyn Receiver>) {
        self.recipients.insert(address, receiver);
    }

    /// Returns `true` if the address was registered.
    pub fn remove(&mut self, address: &Address) -> bool {
        self.recipients.remove(address).is_some()
    }

    /// Looks up the receiver at `address`, pruning the entry if it expired.
    pub fn resolve(&mut self, address: &Address) -> Option<Arc<dyn Receiver>> {
        let receiver = self.recipients.get(address)?.upgrade();
        if receiver.is_none() {
            trace!(address = %address, "pruning expired recipient");
            self.recipients.remove(address);
        }
        receiver
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.recipients.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}
