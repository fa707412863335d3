//! Dead-letter log for push deliveries that exhausted their retries

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dora_domain::{Indicator, MetricResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{error, warn};
use uuid::Uuid;

/// A result that could not be delivered to a sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub sink: String,
    pub definition: String,
    pub indicator: Indicator,
    pub run_id: Uuid,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    pub result: MetricResult,
}

impl DeadLetter {
    pub fn new(sink: impl Into<String>, result: &MetricResult, attempts: u32, error: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            definition: result.definition.clone(),
            indicator: result.indicator,
            run_id: result.run_id,
            attempts,
            error: error.into(),
            failed_at: Utc::now(),
            result: result.clone(),
        }
    }
}

/// Bounded in-memory ring of dead letters, optionally mirrored to a
/// JSON-lines file
#[derive(Debug)]
pub struct DeadLetterLog {
    entries: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
    path: Option<PathBuf>,
    total: AtomicU64,
}

impl DeadLetterLog {
    pub fn new(capacity: usize, path: Option<PathBuf>) -> Self {
        Self { entries: Mutex::new(VecDeque::new()), capacity: capacity.max(1), path, total: AtomicU64::new(0) }
    }

    /// Record a failed delivery; the oldest entry is evicted when full
    pub async fn record(&self, letter: DeadLetter) {
        error!(
            sink = %letter.sink,
            definition = %letter.definition,
            indicator = %letter.indicator,
            run_id = %letter.run_id,
            attempts = letter.attempts,
            error = %letter.error,
            "export delivery dead-lettered"
        );
        self.total.fetch_add(1, Ordering::Relaxed);

        if let Some(path) = &self.path {
            if let Err(e) = append_line(path, &letter).await {
                warn!(path = %path.display(), error = %e, "failed to append dead letter file");
            }
        }

        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(letter);
    }

    /// Retained entries, oldest first
    pub fn entries(&self) -> Vec<DeadLetter> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Dead letters recorded since startup, including evicted ones
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

async fn append_line(path: &PathBuf, letter: &DeadLetter) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(letter).map_err(std::io::Error::other)?;
    line.push(b'\n');
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(&line).await?;
    file.flush().await
}
