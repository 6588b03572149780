//! Adapter that never leaves the process.

use async_trait::async_trait;
use castline_core::{Provider, ProviderAdapter, ProviderFailure, PublishRequest, Published};
use serde_json::{Map, Value, json};

/// Reports what would have been published.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunAdapter;

impl DryRunAdapter {
    pub fn new() -> Self {
        Self
    }
}

/// The result every adapter returns for a dry-run request.
pub fn dry_run_result(provider: Provider, request: &PublishRequest<'_>) -> Published {
    let media: Vec<&str> = request.media.iter().map(|m| m.path.as_str()).collect();
    let mut details = Map::new();
    details.insert("dryRun".to_string(), Value::Bool(true));
    details.insert("provider".to_string(), json!(provider.as_str()));
    details.insert("media".to_string(), json!(media));
    Published {
        posted: u32::try_from(request.media.len().max(1)).unwrap_or(u32::MAX),
        details,
    }
}

#[async_trait]
impl ProviderAdapter for DryRunAdapter {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn publish(
        &self,
        provider: Provider,
        request: PublishRequest<'_>,
    ) -> Result<Published, ProviderFailure> {
        Ok(dry_run_result(provider, &request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castline_core::MediaRef;

    #[tokio::test]
    async fn test_dry_run_counts_media() {
        let media = vec![
            MediaRef::new("/media/a.png", None),
            MediaRef::new("/media/b.jpg", None),
        ];
        let request = PublishRequest {
            user_id: "u1",
            caption: "hello",
            media: &media,
            dry_run: false,
        };
        let published = DryRunAdapter::new()
            .publish(Provider::Facebook, request)
            .await
            .unwrap();
        assert_eq!(published.posted, 2);
        assert_eq!(published.details["dryRun"], json!(true));
        assert_eq!(published.details["provider"], json!("facebook"));
        assert_eq!(published.details["media"], json!(["/media/a.png", "/media/b.jpg"]));
    }

    #[tokio::test]
    async fn test_caption_only_counts_one() {
        let request = PublishRequest {
            user_id: "u1",
            caption: "hello",
            media: &[],
            dry_run: true,
        };
        let published = DryRunAdapter::new()
            .publish(Provider::Facebook, request)
            .await
            .unwrap();
        assert_eq!(published.posted, 1);
    }
}
