use std::io::{self, Write};
use std::sync::Mutex;

use crate::types::Phase;
use crate::utils::osc8_link;

/// One progress update: a fraction in `[0, 1]` plus a status line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub fraction: f64,
    pub status: String,
    /// Reference that just finished, during downloads
    pub reference: Option<String>,
}

/// Receives progress from the batch. Called from worker threads.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Discards everything
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Single-line terminal progress, one line per phase
#[derive(Default)]
pub struct ConsoleProgress {
    last_phase: Mutex<Option<Phase>>,
}

impl ProgressSink for ConsoleProgress {
    fn report(&self, event: &ProgressEvent) {
        let mut stdout = io::stdout();
        let mut last = self.last_phase.lock().unwrap_or_else(|e| e.into_inner());
        if *last != Some(event.phase) {
            if last.is_some() {
                println!();
            }
            *last = Some(event.phase);
        }
        match &event.reference {
            Some(reference) => print!(
                "\r\x1b[2K[{:>3.0}%] {} {}",
                event.fraction * 100.0,
                event.status,
                osc8_link(reference, reference)
            ),
            None => print!("\r\x1b[2K[{:>3.0}%] {}", event.fraction * 100.0, event.status),
        }
        let _ = stdout.flush();
    }
}

/// Keeps every event, for assertions
#[cfg(test)]
#[derive(Default)]
pub struct RecordingProgress {
    pub events: Mutex<Vec<ProgressEvent>>,
}

#[cfg(test)]
impl ProgressSink for RecordingProgress {
    fn report(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
