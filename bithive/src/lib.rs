//! BitHive: a fleet monitor for network-attached Bitaxe miners.
//!
//! The library polls every registered device on a shared refresh clock,
//! folds the per-device results into a fleet summary, and keeps a rolling
//! 24-hour history per device in a key-value store. Presentation layers
//! (the `bithive` CLI included) talk to a running [`monitor::Monitor`]
//! through its [`monitor::MonitorHandle`].

pub mod aggregator;
pub mod api_client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod poller;
pub mod registry;
pub mod scheduler;
pub mod settings;
pub mod storage;
pub mod timeseries;
pub mod tracing;
pub mod types;
