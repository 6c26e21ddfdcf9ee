//! Nuki Activity Bridge - activity log polling with keypad user attribution.
//!
//! This library polls the activity log of Nuki smart locks through the Nuki
//! Web API, turns every new log entry into an access event and works out
//! which person used the keypad when the API only reports "Nuki Keypad".
//!
//! # Guarantees
//!
//! - **At most once**: an entry id is never emitted twice
//! - **No history replay**: entries present at startup are recorded, not emitted
//! - **Chronological**: events of one lock are emitted oldest first
//! - **Isolated**: one lock's failures never affect another lock
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Nuki Activity Bridge                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │  Nuki Web   │──▶│ LockPoller  │──▶│ Attributor  │       │
//! │  │  API client │   │ (per lock)  │   │ (rule chain)│       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                           │                 │               │
//! │                           ▼                 ▼               │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Bridge    │◀──│  Registry   │   │ EventSink   │       │
//! │  │   Stats     │   │ (+ server)  │   │ (channel)   │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use nuki_activity_bridge::{ChannelSink, Config, LockPoller, MemoryLockApi};
//!
//! # async fn demo() {
//! let config = Config::default();
//! let api = MemoryLockApi::new().with_lock(1, "Front Door");
//! let (sink, events) = ChannelSink::unbounded();
//!
//! let mut poller = LockPoller::new(1, "Front Door", &config);
//! poller.tick(&api, &sink).await.ok(); // first tick only records the log
//! poller.tick(&api, &sink).await.ok(); // later ticks emit new entries
//!
//! for event in events.try_iter() {
//!     println!("{}", event.summary());
//! }
//! # }
//! ```

pub mod api;
pub mod commands;
pub mod config;
pub mod core;
pub mod export;
pub mod registry;
pub mod replay;
pub mod scheduler;
pub mod sink;
pub mod stats;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use api::{ApiError, LockApi, LockCommand, LockState, MemoryLockApi, NukiClient, NukiClientConfig};
pub use config::{Config, ConfigError, FallbackMode, FingerprintUserMap};
pub use crate::core::{AccessEvent, AttributionResult, Attributor, DetectionReason, LockPoller, PollError};
pub use registry::{LockRegistry, SharedRegistry};
pub use sink::{ChannelSink, EventSink, SinkError};
pub use stats::{BridgeStats, SharedBridgeStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
