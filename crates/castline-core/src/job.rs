//! Publish job status and per-provider results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Summary written to the job and post when any provider fails.
pub const PROVIDERS_FAILED: &str = "one_or_more_providers_failed";

/// Status of a publish job.
///
/// `Queued -> Running -> {Completed | Failed}`; a job never leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// Outcome of one provider within a job, as stored in `result_json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub posted: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl ProviderResult {
    pub fn succeeded(posted: u32, details: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            ok: true,
            posted,
            error: None,
            details,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            posted: 0,
            error: Some(error.into()),
            details: serde_json::Map::new(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Map<String, serde_json::Value>) -> Self {
        self.details = details;
        self
    }
}
