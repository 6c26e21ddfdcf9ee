//! Lock commands sent on behalf of the host.

use crate::api::error::ApiError;
use crate::api::types::LockCommand;
use crate::api::LockApi;

/// Send one action to a lock. No retry; the error goes back to the caller.
pub async fn send_command<A: LockApi>(
    api: &A,
    lock_id: u64,
    command: LockCommand,
) -> Result<(), ApiError> {
    tracing::info!("Sending {} to lock {}", command.name(), lock_id);
    match api.send_action(lock_id, command).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!("Failed to send {} to lock {}: {}", command.name(), lock_id, e);
            Err(e)
        }
    }
}

/// Open the door (action 3).
pub async fn unlatch<A: LockApi>(api: &A, lock_id: u64) -> Result<(), ApiError> {
    send_command(api, lock_id, LockCommand::Unlatch).await
}

/// Lock 'n' go (action 4), or lock 'n' go with unlatch (action 5).
pub async fn lock_n_go<A: LockApi>(api: &A, lock_id: u64, with_unlatch: bool) -> Result<(), ApiError> {
    let command = if with_unlatch {
        LockCommand::LockNGoWithUnlatch
    } else {
        LockCommand::LockNGo
    };
    send_command(api, lock_id, command).await
}

pub async fn lock<A: LockApi>(api: &A, lock_id: u64) -> Result<(), ApiError> {
    send_command(api, lock_id, LockCommand::Lock).await
}

pub async fn unlock<A: LockApi>(api: &A, lock_id: u64) -> Result<(), ApiError> {
    send_command(api, lock_id, LockCommand::Unlock).await
}
