//! High-level API for starting and managing a message bus.
//!
//! This module provides a simplified interface for applications that want a
//! bus running on their tokio runtime without wiring the router, dispatcher
//! and interceptors by hand.
//!
//! # Example
//!
//! ```no_run
//! use topicbus::Bus;
//!
//! # async fn example() -> Result<(), topicbus::error::BusError> {
//! let toml = r#"
//! [general]
//! poll_interval_ms = 50
//!
//! [filter]
//! block_types = ["Debug.Verbose"]
//! "#;
//!
//! let bus = Bus::from_str(toml).await?;
//! let handle = bus.handle();
//! // ... register receivers and route messages through `handle`
//! bus.stop().await;
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::context::MessageType;
use crate::dispatch::LaneDispatcher;
use crate::error::Result;
use crate::filter::TypeFilter;
use crate::receiver::Interceptor;
use crate::router::{MessageRouter, RouterHandle};
use crate::tracer::{LogTracer, MessageTracer};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A handle to a message router running on the tokio runtime.
///
/// Named-thread deliveries run on lanes of a [`LaneDispatcher`]. Call
/// [`Bus::stop`] to shut the router and its lanes down.
pub struct Bus {
    cancel_token: CancellationToken,
    router_task: JoinHandle<()>,
    handle: RouterHandle,
    config: Config,
}

impl Bus {
    /// Starts a bus from a [`Config`] instance using the given tracer.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside a tokio runtime.
    pub async fn start_with_tracer(config: Config, tracer: Arc<dyn MessageTracer>) -> Result<Self> {
        let cancel_token = CancellationToken::new();
        let dispatcher = Arc::new(LaneDispatcher::current(cancel_token.child_token())?);
        let (router, handle) = MessageRouter::new(&config.general, dispatcher, tracer);

        let filter = TypeFilter::from_config(&config.filter);
        let blocked: Vec<MessageType> = filter.blocked_types().cloned().collect();
        if !blocked.is_empty() {
            let filter: Arc<dyn Interceptor> = Arc::new(filter);
            for message_type in blocked {
                info!("Blocking message type {}", message_type);
                handle.add_interceptor(filter.clone(), message_type);
            }
        }

        let router_task = tokio::spawn(router.run(cancel_token.child_token()));

        info!(
            "Bus started (delayed messaging {}, poll interval {:?})",
            if config.general.delayed_messaging { "on" } else { "off" },
            config.general.poll_interval()
        );

        Ok(Self {
            cancel_token,
            router_task,
            handle,
            config,
        })
    }

    /// Starts a bus that logs its lifecycle events with [`LogTracer`].
    pub async fn start(config: Config) -> Result<Self> {
        Self::start_with_tracer(config, Arc::new(LogTracer)).await
    }

    /// Starts a bus from a TOML configuration string.
    pub async fn from_str(toml: &str) -> Result<Self> {
        let config = Config::parse(toml)?;
        Self::start(config).await
    }

    /// Starts a bus by loading configuration from a file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = Config::load(path).await?;
        Self::start(config).await
    }

    /// Stops the router and all dispatch lanes.
    pub async fn stop(self) {
        info!("Bus stopping...");
        self.cancel_token.cancel();

        match tokio::time::timeout(Duration::from_secs(5), self.router_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Router task ended abnormally: {}", e),
            Err(_) => warn!("Router task did not stop within 5s"),
        }

        info!("Bus stopped");
    }

    /// Handle used to register receivers and route messages.
    pub fn handle(&self) -> RouterHandle {
        self.handle.clone()
    }

    /// Token that stops the router when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns `false` once [`Bus::stop`] has been called or the token fired.
    pub fn is_running(&self) -> bool {
        !self.cancel_token.is_cancelled() && !self.router_task.is_finished()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bus_start_and_stop() {
        let bus = Bus::from_str("").await.expect("should start");
        assert!(bus.is_running());
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_bus_rejects_bad_config() {
        let result = Bus::from_str("[general]\npoll_interval_ms = 0").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_bus_registers_filter() {
        let bus = Bus::from_str("[filter]\nblock_types = [\"A\", \"B\"]")
            .await
            .expect("should start");
        let handle = bus.handle();

        let mut interceptors = 0;
        for _ in 0..100 {
            interceptors = handle.stats().interceptors;
            if interceptors == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(interceptors, 2);
        bus.stop().await;
    }
}
