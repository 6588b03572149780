//! HTTP relay adapter.
//!
//! Forwards publish requests to a relay service that owns the provider's OAuth
//! tokens and wire protocol. The relay answers `{posted, details}` on success.
//! Anything else becomes a short error code; response bodies are never surfaced.

use async_trait::async_trait;
use castline_core::{MediaRef, Provider, ProviderAdapter, ProviderFailure, PublishRequest, Published};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::ProviderError;
use crate::dry_run::dry_run_result;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest<'a> {
    provider: &'a str,
    user_id: &'a str,
    caption: &'a str,
    media: &'a [MediaRef],
}

#[derive(Deserialize)]
struct RelayResponse {
    #[serde(default)]
    posted: u32,
    #[serde(default)]
    details: Map<String, Value>,
}

/// Publishes through an HTTP relay endpoint.
pub struct RelayAdapter {
    http: Client,
    endpoint: Url,
    token: Option<String>,
}

impl RelayAdapter {
    pub fn new(endpoint: Url, token: Option<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint,
            token,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ProviderAdapter for RelayAdapter {
    fn name(&self) -> &str {
        "relay"
    }

    async fn publish(
        &self,
        provider: Provider,
        request: PublishRequest<'_>,
    ) -> Result<Published, ProviderFailure> {
        if request.dry_run {
            return Ok(dry_run_result(provider, &request));
        }

        let body = RelayRequest {
            provider: provider.as_str(),
            user_id: request.user_id,
            caption: request.caption,
            media: request.media,
        };
        let mut call = self.http.post(self.endpoint.clone()).json(&body);
        if let Some(token) = &self.token {
            call = call.bearer_auth(token);
        }

        let response = call.send().await.map_err(|e| {
            warn!(provider = %provider, error = %e, "Relay request failed");
            if e.is_timeout() {
                ProviderFailure::new("timeout")
            } else {
                ProviderFailure::new("relay_unreachable")
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            debug!(provider = %provider, status = %status, "Relay rejected publish");
            return Err(ProviderFailure::new(format!("http_{}", status.as_u16())));
        }

        let parsed: RelayResponse = response.json().await.map_err(|e| {
            warn!(provider = %provider, error = %e, "Relay returned an unreadable body");
            ProviderFailure::new("invalid_response")
        })?;
        Ok(Published {
            posted: parsed.posted,
            details: parsed.details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> RelayAdapter {
        let endpoint = Url::parse(&format!("{}/publish/facebook", server.uri())).unwrap();
        RelayAdapter::new(endpoint, Some("secret".to_string()), Duration::from_secs(5)).unwrap()
    }

    fn request(media: &[MediaRef], dry_run: bool) -> PublishRequest<'_> {
        PublishRequest {
            user_id: "u1",
            caption: "hello",
            media,
            dry_run,
        }
    }

    #[tokio::test]
    async fn test_publish_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/publish/facebook"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({
                "provider": "facebook",
                "userId": "u1",
                "caption": "hello",
                "media": [{"path": "/media/a.png", "kind": "image"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "posted": 1,
                "details": {"postId": "fb_123"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let media = vec![MediaRef::new("/media/a.png", None)];
        let published = adapter(&server)
            .publish(Provider::Facebook, request(&media, false))
            .await
            .unwrap();
        assert_eq!(published.posted, 1);
        assert_eq!(published.details["postId"], json!("fb_123"));
    }

    #[tokio::test]
    async fn test_error_status_hides_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(502).set_body_string("<html>upstream token=abc</html>"),
            )
            .mount(&server)
            .await;

        let failure = adapter(&server)
            .publish(Provider::Facebook, request(&[], false))
            .await
            .unwrap_err();
        assert_eq!(failure.error, "http_502");
        assert!(failure.details.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let failure = adapter(&server)
            .publish(Provider::Facebook, request(&[], false))
            .await
            .unwrap_err();
        assert_eq!(failure.error, "invalid_response");
    }

    #[tokio::test]
    async fn test_dry_run_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let published = adapter(&server)
            .publish(Provider::Facebook, request(&[], true))
            .await
            .unwrap();
        assert_eq!(published.details["dryRun"], json!(true));
    }
}
