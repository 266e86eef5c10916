use super::message::{ReliableChannelId, UNRELIABLE_CHANNEL_ID};
use super::{EndpointContext, RemoteEndpoint};
use crate::config::ReliabilityConfig;
use crate::context::Address;
use ahash::AHashMap;
use std::collections::hash_map::Entry;
use std::time::{Duration, Instant};
use tracing::info;

/// Remote endpoints known to this process, keyed by address.
pub struct EndpointRegistry {
    endpoints: AHashMap<Address, RemoteEndpoint>,
    last_channel_id: ReliableChannelId,
    endpoint_timeout: Duration,
}

fn allocate_channel_id(last: &mut ReliableChannelId) -> ReliableChannelId {
    *last = last.wrapping_add(1);
    if *last == UNRELIABLE_CHANNEL_ID {
        *last = last.wrapping_add(1);
    }
    *last
}

impl EndpointRegistry {
    pub fn new(endpoint_timeout: Duration) -> Self {
        Self {
            endpoints: AHashMap::new(),
            last_channel_id: UNRELIABLE_CHANNEL_ID,
            endpoint_timeout,
        }
    }

    pub fn from_config(config: &ReliabilityConfig) -> Self {
        Self::new(config.endpoint_timeout())
    }

    /// Returns the endpoint for `context.address`, creating it with a fresh
    /// outbound channel if it is unknown.
    pub fn find_or_add(&mut self, context: EndpointContext, now: Instant) -> &mut RemoteEndpoint {
        match self.endpoints.entry(context.address) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let channel = allocate_channel_id(&mut self.last_channel_id);
                info!("New endpoint {} ({}) on channel {}", context.name, context.address, channel);
                entry.insert(RemoteEndpoint::new(context, channel, now, self.endpoint_timeout))
            }
        }
    }

    pub fn get(&self, address: &Address) -> Option<&RemoteEndpoint> {
        self.endpoints.get(address)
    }

    pub fn get_mut(&mut self, address: &Address) -> Option<&mut RemoteEndpoint> {
        self.endpoints.get_mut(address)
    }

    /// Removes an endpoint; its pending messages time out.
    pub fn remove(&mut self, address: &Address) -> bool {
        self.endpoints.remove(address).is_some()
    }

    /// Drops every endpoint that has been silent past its timeout.
    pub fn remove_timed_out(&mut self, now: Instant) -> Vec<Address> {
        let expired: Vec<Address> = self
            .endpoints
            .iter()
            .filter(|(_, endpoint)| endpoint.is_timed_out(now))
            .map(|(address, _)| *address)
            .collect();

        for address in &expired {
            if let Some(endpoint) = self.endpoints.remove(address) {
                info!("Endpoint {} ({}) timed out", endpoint.context().name, address);
            }
        }
        expired
    }

    /// Purges the dedup caches of every endpoint.
    pub fn purge_received(&mut self, now: Instant, max_age: Duration) -> usize {
        self.endpoints
            .values_mut()
            .map(|endpoint| endpoint.purge_old_received_messages(now, max_age))
            .sum()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RemoteEndpoint> {
        self.endpoints.values_mut()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
