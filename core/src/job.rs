use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Queue-assigned job identifier: monotonically allocated from a store
/// counter, immutable once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        raw.parse::<u64>().map(JobId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "WAITING",
            JobState::Active => "ACTIVE",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "WAITING" => Some(JobState::Waiting),
            "ACTIVE" => Some(JobState::Active),
            "COMPLETED" => Some(JobState::Completed),
            "FAILED" => Some(JobState::Failed),
            _ => None,
        }
    }

    /// Completed and dead-lettered Failed are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// A job record as stored in the per-job hash. Owned by the queue; the
/// worker runtime only holds it while the job is Active.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub payload: String,
    pub state: JobState,
    /// Processing attempts started so far.
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Earliest time a retrying job may be promoted back to Waiting.
    pub retry_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub last_error: Option<String>,
}

impl Job {
    pub fn new(id: JobId, payload: &str, max_attempts: u32) -> Self {
        Self {
            id,
            payload: payload.to_string(),
            state: JobState::Waiting,
            attempts: 0,
            max_attempts,
            created_at: Utc::now(),
            retry_at: None,
            claimed_by: None,
            finished_at: None,
            result: None,
            last_error: None,
        }
    }

    /// Field mapping for the per-job store hash.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("id".to_string(), self.id.to_string()),
            ("payload".to_string(), self.payload.clone()),
            ("state".to_string(), self.state.as_str().to_string()),
            ("attempts".to_string(), self.attempts.to_string()),
            ("max_attempts".to_string(), self.max_attempts.to_string()),
            ("created_at".to_string(), self.created_at.to_rfc3339()),
        ];
        if let Some(value) = self.retry_at {
            fields.push(("retry_at".to_string(), value.to_rfc3339()));
        }
        if let Some(value) = self.claimed_by.as_ref() {
            fields.push(("claimed_by".to_string(), value.clone()));
        }
        if let Some(value) = self.finished_at {
            fields.push(("finished_at".to_string(), value.to_rfc3339()));
        }
        if let Some(value) = self.result.as_ref() {
            fields.push(("result".to_string(), value.clone()));
        }
        if let Some(value) = self.last_error.as_ref() {
            fields.push(("last_error".to_string(), value.clone()));
        }
        fields
    }

    pub fn from_fields(raw: HashMap<String, String>) -> Result<Self, StoreError> {
        let id = raw
            .get("id")
            .and_then(|value| value.parse::<u64>().ok())
            .map(JobId)
            .ok_or_else(|| StoreError::Corrupt("job record missing id".to_string()))?;
        let state = raw
            .get("state")
            .and_then(|value| JobState::parse(value))
            .ok_or_else(|| StoreError::Corrupt(format!("job {id} has an invalid state")))?;
        let created_at = raw
            .get("created_at")
            .and_then(|value| parse_datetime(value))
            .ok_or_else(|| StoreError::Corrupt(format!("job {id} missing created_at")))?;

        Ok(Self {
            id,
            payload: raw.get("payload").cloned().unwrap_or_default(),
            state,
            attempts: raw
                .get("attempts")
                .and_then(|value| value.parse().ok())
                .unwrap_or(0),
            max_attempts: raw
                .get("max_attempts")
                .and_then(|value| value.parse().ok())
                .unwrap_or(1),
            created_at,
            retry_at: raw.get("retry_at").and_then(|value| parse_datetime(value)),
            claimed_by: raw.get("claimed_by").cloned(),
            finished_at: raw
                .get("finished_at")
                .and_then(|value| parse_datetime(value)),
            result: raw.get("result").cloned(),
            last_error: raw.get("last_error").cloned(),
        })
    }
}

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Best-effort snapshot of per-state job counts. Derived on demand, may
/// race with concurrent mutations; never used for correctness decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueCounts {
    /// Jobs the producer counts against its in-flight cap.
    pub fn in_flight(&self) -> u64 {
        self.waiting + self.active
    }
}
