//! Batch numbering for near-simultaneous log entries.
//!
//! A single physical access often shows up as several entries (a PIN entry
//! and a fingerprint entry with the same timestamp, for instance). Entries
//! with the same trigger whose timestamps lie within `epsilon` of the first
//! entry of a batch are numbered 1..K in discovery order, so consumers can
//! collapse them.

use chrono::{DateTime, Duration, Utc};

/// Position of one entry inside its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPosition {
    pub sequence_number: usize,
    pub total_events: usize,
}

/// Number the given `(timestamp, trigger)` keys, returned in input order.
pub fn sequence_batches(keys: &[(DateTime<Utc>, u8)], epsilon: Duration) -> Vec<BatchPosition> {
    struct Batch {
        anchor: DateTime<Utc>,
        trigger: u8,
        members: Vec<usize>,
    }

    let mut batches: Vec<Batch> = Vec::new();
    for (index, (timestamp, trigger)) in keys.iter().enumerate() {
        let existing = batches.iter_mut().find(|batch| {
            let distance = if *timestamp >= batch.anchor {
                *timestamp - batch.anchor
            } else {
                batch.anchor - *timestamp
            };
            batch.trigger == *trigger && distance <= epsilon
        });
        match existing {
            Some(batch) => batch.members.push(index),
            None => batches.push(Batch {
                anchor: *timestamp,
                trigger: *trigger,
                members: vec![index],
            }),
        }
    }

    let mut positions = vec![
        BatchPosition {
            sequence_number: 1,
            total_events: 1,
        };
        keys.len()
    ];
    for batch in &batches {
        for (position, &index) in batch.members.iter().enumerate() {
            positions[index] = BatchPosition {
                sequence_number: position + 1,
                total_events: batch.members.len(),
            };
        }
    }
    positions
}
