//! Console output and JSON Lines export of access events.

use crate::core::event::AccessEvent;
use chrono_tz::Tz;
use crossbeam_channel::Receiver;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

/// File name of the event export inside the export directory.
pub const EVENTS_FILE: &str = "events.jsonl";

/// One console line for an event, with its time in `tz`.
pub fn format_event(event: &AccessEvent, tz: Tz) -> String {
    let local = event.timestamp.with_timezone(&tz);
    let mut line = format!(
        "[{}] {} {} by {} via {}",
        local.format("%Y-%m-%d %H:%M:%S %Z"),
        event.entity_id,
        event.action_name,
        event.user,
        event.access_method
    );
    if event.user != event.original_user_name && !event.original_user_name.is_empty() {
        line.push_str(&format!(" (reported as {})", event.original_user_name));
    }
    line.push_str(&format!(" [{}]", event.detection_reason));
    if event.total_events > 1 {
        line.push_str(&format!(
            " {}/{}",
            event.sequence_number, event.total_events
        ));
    }
    if let Some(manual) = event.manual_type {
        line.push_str(&format!(" {}", manual.as_str()));
    }
    line
}

/// Appends events as JSON lines.
pub struct JsonlWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlWriter {
    /// Open (or create) `events.jsonl` in `dir`.
    pub fn open(dir: &Path) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(EVENTS_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, event: &AccessEvent) -> Result<(), std::io::Error> {
        let line = serde_json::to_string(event).map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()
    }
}

/// Drain the event channel on a dedicated thread until every sender is gone.
///
/// Each event is printed in `tz` and, when a writer is given, appended to
/// the export file. Returns the number of events handled.
pub fn spawn_event_consumer(
    receiver: Receiver<AccessEvent>,
    tz: Tz,
    mut writer: Option<JsonlWriter>,
) -> JoinHandle<u64> {
    thread::spawn(move || {
        let mut handled = 0;
        for event in receiver.iter() {
            println!("{}", format_event(&event, tz));
            if let Some(ref mut w) = writer {
                if let Err(e) = w.append(&event) {
                    tracing::warn!("Could not export event to {:?}: {}", w.path(), e);
                }
            }
            handled += 1;
        }
        handled
    })
}
