//! Append-only scalar event stream (`events.jsonl`).

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// File name of the event stream inside the log directory.
pub const EVENTS_FILE: &str = "events.jsonl";

/// One scalar observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub step: usize,
    pub tag: String,
    pub value: f64,
}

/// Writes one JSON object per line.
pub struct SummaryWriter {
    writer: BufWriter<File>,
}

impl SummaryWriter {
    /// Open `path` for appending, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn add_scalar(&mut self, step: usize, tag: &str, value: f64) -> Result<()> {
        let event = ScalarEvent {
            step,
            tag: tag.to_string(),
            value,
        };
        serde_json::to_writer(&mut self.writer, &event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn add_scalars(&mut self, step: usize, scalars: &[(&str, f64)]) -> Result<()> {
        for (tag, value) in scalars {
            self.add_scalar(step, tag, *value)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for SummaryWriter {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!(error = %e, "Failed to flush event stream");
        }
    }
}

/// Read every event back, skipping lines that do not parse.
pub fn read_events(path: &Path) -> Result<Vec<ScalarEvent>> {
    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        match serde_json::from_str(&line) {
            Ok(event) => events.push(event),
            Err(e) => tracing::debug!(error = %e, "Skipping malformed event line"),
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_append_across_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join(EVENTS_FILE);

        {
            let mut writer = SummaryWriter::open(&path).unwrap();
            writer.add_scalars(1, &[("d_loss", 0.5), ("g_loss", 2.0)]).unwrap();
        }
        {
            let mut writer = SummaryWriter::open(&path).unwrap();
            writer.add_scalar(2, "d_loss", 0.25).unwrap();
            writer.flush().unwrap();
        }

        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1], ScalarEvent { step: 1, tag: "g_loss".into(), value: 2.0 });
        assert_eq!(events[2].step, 2);
    }
}
