//! Realtime event payloads pushed to live client connections.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobStatus};

/// A transient lifecycle event. Never persisted; offline clients simply miss it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub user_id: String,
    #[serde(rename = "postId", skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(rename = "jobId", skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Wall-clock `HH:MM:SS`, only on `clock` heartbeats.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub now: Option<String>,
    pub at: String,
}

impl RealtimeEvent {
    pub const HELLO: &'static str = "hello";
    pub const CLOCK: &'static str = "clock";
    pub const POST_UPDATED: &'static str = "post.updated";
    pub const POST_PUBLISH: &'static str = "post.publish";
    pub const JOB_UPDATED: &'static str = "job.updated";
    pub const JOB_PUBLISH: &'static str = "job.publish";

    pub fn new(kind: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            user_id: user_id.into(),
            post_id: None,
            job_id: None,
            status: None,
            now: None,
            at: format_at(Utc::now()),
        }
    }

    /// Lifecycle transition of a job, attributed to its post when there is one.
    ///
    /// Terminal statuses use the `*.publish` type so clients can tell a finished
    /// action apart from intermediate progress.
    pub fn job_transition(
        user_id: &str,
        job_id: &JobId,
        post_id: Option<&str>,
        status: JobStatus,
    ) -> Self {
        let kind = match (post_id.is_some(), status.is_terminal()) {
            (true, false) => Self::POST_UPDATED,
            (true, true) => Self::POST_PUBLISH,
            (false, false) => Self::JOB_UPDATED,
            (false, true) => Self::JOB_PUBLISH,
        };
        let mut event = Self::new(kind, user_id);
        event.post_id = post_id.map(str::to_string);
        event.job_id = Some(job_id.to_string());
        event.status = Some(status.as_str().to_string());
        event
    }

    pub fn clock(user_id: &str, at: DateTime<Utc>) -> Self {
        let mut event = Self::new(Self::CLOCK, user_id);
        event.now = Some(at.format("%H:%M:%S").to_string());
        event.at = format_at(at);
        event
    }
}

pub fn format_at(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_job_transition_wire_shape() {
        let job = JobId::from_string("pub_1");
        let mut event = RealtimeEvent::job_transition("u1", &job, Some("p1"), JobStatus::Running);
        event.at = "2024-01-01T00:00:00Z".to_string();
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "post.updated",
                "user_id": "u1",
                "postId": "p1",
                "jobId": "pub_1",
                "status": "running",
                "at": "2024-01-01T00:00:00Z"
            })
        );
    }

    #[test]
    fn test_terminal_types() {
        let job = JobId::from_string("pub_1");
        let e = RealtimeEvent::job_transition("u1", &job, Some("p1"), JobStatus::Failed);
        assert_eq!(e.kind, RealtimeEvent::POST_PUBLISH);
        let e = RealtimeEvent::job_transition("u1", &job, None, JobStatus::Completed);
        assert_eq!(e.kind, RealtimeEvent::JOB_PUBLISH);
        assert!(e.post_id.is_none());
    }

    #[test]
    fn test_clock_event() {
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let e = RealtimeEvent::clock("u1", at);
        assert_eq!(e.now.as_deref(), Some("07:08:09"));
        assert_eq!(e.at, "2024-05-06T07:08:09Z");
    }
}
