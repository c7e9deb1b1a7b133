//! Append-only ledger of deployment records.
//!
//! Each deployed item becomes one line of newline-delimited JSON, tagged
//! with the run it belongs to. Writers take an exclusive lock on the file
//! so concurrent runs never interleave partial lines.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{DeploymentRecord, DeploymentRun, Strategy};

/// One line of the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub ts: DateTime<Utc>,
    pub run_id: Uuid,
    pub strategy: Strategy,

    #[serde(flatten)]
    pub record: DeploymentRecord,
}

/// JSONL file of deployment records
#[derive(Debug, Clone)]
pub struct RecordLog {
    path: PathBuf,
}

impl RecordLog {
    /// Open (and create the parent directory of) a ledger file
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }
        Ok(Self { path })
    }

    /// Append every record of a run
    pub fn append_run(&self, run: &DeploymentRun) -> Result<usize> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open record log: {}", self.path.display()))?;

        file.lock_exclusive()
            .with_context(|| format!("Failed to lock record log: {}", self.path.display()))?;

        let ts = run.completed_at.unwrap_or_else(Utc::now);
        let mut file = file;
        for record in &run.records {
            let entry = RecordEntry {
                ts,
                run_id: run.id,
                strategy: run.strategy,
                record: record.clone(),
            };
            let json = serde_json::to_string(&entry).context("Failed to serialize record")?;
            writeln!(file, "{}", json).context("Failed to write record")?;
        }
        file.flush().context("Failed to flush record log")?;

        // Lock is released when file is dropped
        Ok(run.records.len())
    }

    /// Read all entries back in file order
    pub fn replay(&self) -> Result<Vec<RecordEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open record log: {}", self.path.display()))?;

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.context("Failed to read record log")?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: RecordEntry = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse record: {}", line))?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Entries belonging to one run
    pub fn run_entries(&self, run_id: Uuid) -> Result<Vec<RecordEntry>> {
        Ok(self
            .replay()?
            .into_iter()
            .filter(|e| e.run_id == run_id)
            .collect())
    }
}
