//! Schedule entry identity and execution state

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Indicator;

/// Identity of a schedule entry: one per (definition, indicator)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryKey {
    pub definition: String,
    pub indicator: Indicator,
}

impl EntryKey {
    pub fn new(definition: impl Into<String>, indicator: Indicator) -> Self {
        Self { definition: definition.into(), indicator }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.definition, self.indicator)
    }
}

/// Execution state of a schedule entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    #[default]
    Idle,
    Running,
    Backoff,
}

/// Read-only view of a schedule entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntryInfo {
    pub key: EntryKey,
    pub schedule: String,
    pub state: ExecutionState,
    pub next_due: Option<DateTime<Utc>>,
    pub last_fired: Option<DateTime<Utc>>,
    pub attempt: u32,
    pub rerun_requested: bool,
}
