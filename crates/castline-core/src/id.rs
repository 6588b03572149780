//! Publish job identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const PREFIX: &str = "pub_";
const RANDOM_BYTES: usize = 12;

/// Identifier of a publish job.
///
/// Generated once per successful claim and written into the post's
/// `last_publish_job_id` column, so it doubles as the claim token.
/// Format: `pub_` followed by 24 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random job ID.
    pub fn generate() -> Self {
        let uuid = Uuid::new_v4();
        Self(format!(
            "{PREFIX}{}",
            hex::encode(&uuid.as_bytes()[..RANDOM_BYTES])
        ))
    }

    /// Wrap an ID read back from storage or a request path.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_format() {
        let id = JobId::generate();
        let s = id.as_str();
        assert!(s.starts_with("pub_"));
        assert_eq!(s.len(), 4 + 24);
        assert!(s[4..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_generate_is_unique() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = JobId::from_string("pub_abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"pub_abc\"");
        assert_eq!(id.to_string(), "pub_abc");
    }
}
