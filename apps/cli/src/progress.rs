//! Progress bar for a segmented download

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use pget_types::TransferEvent;
use std::collections::HashMap;
use uuid::Uuid;

/// One bar covering the whole file, fed by transfer events
pub struct TransferProgress {
    id: Uuid,
    bar: ProgressBar,
    /// Bytes received so far, per segment
    received: HashMap<u32, u64>,
    segments: usize,
    /// Segments whose worker has succeeded or failed
    settled: usize,
}

impl TransferProgress {
    pub fn new(id: Uuid, name: &str) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );
        bar.set_message(name.to_string());

        Self {
            id,
            bar,
            received: HashMap::new(),
            segments: 0,
            settled: 0,
        }
    }

    /// Update the bar; returns true once the download has finished
    pub fn handle_event(&mut self, event: &TransferEvent) -> bool {
        match event {
            TransferEvent::Started {
                id,
                total_size,
                segments,
            } if *id == self.id => {
                self.bar.set_length(*total_size);
                self.segments = segments.len();
            }

            TransferEvent::SegmentStateChanged { id, state, .. }
                if *id == self.id && state.is_terminal() =>
            {
                self.settled += 1;
                self.bar
                    .set_message(format!("{}/{} segments", self.settled, self.segments));
            }

            TransferEvent::SegmentProgress {
                id,
                index,
                received,
                ..
            } if *id == self.id => {
                self.received.insert(*index, *received);
                self.bar.set_position(self.received.values().sum());
            }

            TransferEvent::SegmentWritten { id, index, length, .. } if *id == self.id => {
                self.received.insert(*index, *length);
                self.bar.set_position(self.received.values().sum());
            }

            TransferEvent::Completed { report } if report.id == self.id => {
                self.bar.finish_with_message(format!(
                    "{} Download complete",
                    style("✓").green().bold()
                ));
                return true;
            }

            TransferEvent::Failed { id, error } if *id == self.id => {
                self.bar.abandon_with_message(format!(
                    "{} Failed: {}",
                    style("✗").red().bold(),
                    error
                ));
                return true;
            }

            _ => {}
        }
        false
    }

    pub fn clear(&self) {
        self.bar.finish_and_clear();
    }
}
