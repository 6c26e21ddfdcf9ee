//! Core polling and attribution logic.
//!
//! Everything here is independent of the transport: the poller talks to any
//! [`crate::api::LockApi`] and hands events to any [`crate::sink::EventSink`].

pub mod attribution;
pub mod event;
pub mod poller;
pub mod seen;
pub mod sequencing;

pub use attribution::{
    AccessMethod, AttributionInput, AttributionResult, Attributor, DetectionReason, Rule, RULES,
    UNKNOWN_USER,
};
pub use event::{AccessEvent, ManualType, EVENT_KEYPAD_ACTION, EVENT_LOCK_ACTION, EVENT_MANUAL_ACTION};
pub use poller::{LockPoller, PollError, PollerSettings, TickReport};
pub use seen::SeenEntrySet;
pub use sequencing::{sequence_batches, BatchPosition};
