#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]

pub mod command;
pub mod config;
pub mod context;
pub mod delayed;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod high_level;
pub mod interceptors;
pub mod receiver;
pub mod recipients;
pub mod router;
pub mod stats;
pub mod subscription;
pub mod tracer;

pub use high_level::Bus;
