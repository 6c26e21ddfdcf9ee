//! Access to the remote lock API.
//!
//! The poller only talks to the [`LockApi`] trait. [`NukiClient`] implements
//! it over HTTPS; [`MemoryLockApi`] serves scripted data for tests and dry
//! runs.

pub mod error;
pub mod memory;
pub mod nuki;
pub mod types;

use std::future::Future;

pub use error::ApiError;
pub use memory::MemoryLockApi;
pub use nuki::{NukiClient, NukiClientConfig};
pub use types::{
    ActivityLogEntry, DoorState, LockAction, LockCommand, LockMode, LockSettings, LockState,
    LockStatus, SmartlockSummary, Trigger,
};

/// Remote lock API used by the poller, the scheduler and the commands.
pub trait LockApi: Send + Sync {
    /// List the smart locks of the account.
    fn list_locks(&self) -> impl Future<Output = Result<Vec<SmartlockSummary>, ApiError>> + Send;

    /// Fetch the current status of one lock.
    fn get_lock_status(
        &self,
        lock_id: u64,
    ) -> impl Future<Output = Result<LockState, ApiError>> + Send;

    /// Fetch up to `limit` of the most recent activity log entries.
    fn get_activity_log(
        &self,
        lock_id: u64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ActivityLogEntry>, ApiError>> + Send;

    /// Send a single action to a lock.
    fn send_action(
        &self,
        lock_id: u64,
        command: LockCommand,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}
