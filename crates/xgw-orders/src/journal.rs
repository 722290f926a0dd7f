//! Reconciliation log: evicted terminal records as JSON Lines.
//!
//! One file per UTC day, `orders_{YYYY-MM-DD}.jsonl`, opened in append mode
//! so a restart adds to the same day's file. Each line is one complete
//! [`OrderRecord`]; partial corruption only affects individual lines.

use crate::error::JournalResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use xgw_core::OrderRecord;

/// `[journal]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    /// Records buffered before an automatic flush.
    #[serde(default = "default_max_buffer")]
    pub max_buffer: usize,
}

fn default_dir() -> PathBuf {
    PathBuf::from("data/journal")
}

fn default_max_buffer() -> usize {
    64
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            max_buffer: default_max_buffer(),
        }
    }
}

struct ActiveFile {
    writer: BufWriter<File>,
    date: String,
    records_written: usize,
}

/// Append-only daily JSON Lines writer for evicted order records.
pub struct JournalWriter {
    dir: PathBuf,
    buffer: Vec<OrderRecord>,
    max_buffer: usize,
    active: Option<ActiveFile>,
}

impl JournalWriter {
    pub fn new(config: &JournalConfig) -> Self {
        if let Err(e) = std::fs::create_dir_all(&config.dir) {
            warn!(?e, dir = %config.dir.display(), "Failed to create journal directory");
        }
        let max_buffer = config.max_buffer.max(1);
        Self {
            dir: config.dir.clone(),
            buffer: Vec::with_capacity(max_buffer),
            max_buffer,
            active: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Buffer one record, flushing when the buffer is full.
    pub fn append(&mut self, record: OrderRecord) -> JournalResult<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.max_buffer {
            self.flush()?;
        }
        Ok(())
    }

    pub fn append_all(&mut self, records: Vec<OrderRecord>) -> JournalResult<()> {
        self.buffer.extend(records);
        if self.buffer.len() >= self.max_buffer {
            self.flush()?;
        }
        Ok(())
    }

    fn close_active(&mut self) {
        if let Some(mut active) = self.active.take() {
            if let Err(e) = active.writer.flush() {
                warn!(?e, "Failed to flush journal on close");
            }
            info!(
                date = %active.date,
                records = active.records_written,
                "Closed order journal"
            );
        }
    }

    fn open_for(&mut self, date: &str) -> JournalResult<&mut ActiveFile> {
        if self.active.as_ref().is_some_and(|a| a.date != date) {
            self.close_active();
        }
        let active = match self.active.take() {
            Some(active) => active,
            None => {
                let path = self.dir.join(format!("orders_{date}.jsonl"));
                info!(path = %path.display(), "Opening order journal (append mode)");
                let file = OpenOptions::new().create(true).append(true).open(&path)?;
                ActiveFile {
                    writer: BufWriter::new(file),
                    date: date.to_string(),
                    records_written: 0,
                }
            }
        };
        Ok(self.active.insert(active))
    }

    /// Write buffered records to today's file.
    ///
    /// Records leave the buffer only once the whole batch reached the file;
    /// on any error they stay buffered for the next flush.
    pub fn flush(&mut self) -> JournalResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut lines = String::new();
        for record in &self.buffer {
            lines.push_str(&serde_json::to_string(record)?);
            lines.push('\n');
        }
        let count = self.buffer.len();

        let active = self.open_for(&today)?;
        match active
            .writer
            .write_all(lines.as_bytes())
            .and_then(|()| active.writer.flush())
        {
            Ok(()) => active.records_written += count,
            Err(e) => {
                // Reopen on the next flush; a partial write may repeat lines.
                self.active = None;
                warn!(?e, records = count, "Journal write failed, records kept");
                return Err(e.into());
            }
        }
        self.buffer.clear();

        debug!(date = %today, records = count, "Flushed order journal");
        Ok(())
    }

    /// Records waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Flush pending records and close the file.
    pub fn close(&mut self) -> JournalResult<()> {
        self.flush()?;
        self.close_active();
        Ok(())
    }
}

impl Drop for JournalWriter {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(?e, "Failed to flush journal on drop");
        }
        self.close_active();
    }
}
