//! CLI command implementations.

pub mod jobs;
pub mod posts;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Value, json};
use url::Url;

/// Thin JSON client for the Castline API.
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(api_url: &str) -> Result<Self> {
        let base = Url::parse(api_url).with_context(|| format!("Invalid API URL: {}", api_url))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    /// Build an endpoint URL, percent-encoding each path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("API URL cannot have a path: {}", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn get(&self, segments: &[&str]) -> Result<Value> {
        let url = self.endpoint(segments)?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        read_json(response).await
    }

    pub async fn post(&self, segments: &[&str], body: &Value) -> Result<Value> {
        let url = self.endpoint(segments)?;
        let response = self
            .http
            .post(url.clone())
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;
        read_json(response).await
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        let message = body["error"].as_str().unwrap_or("request failed");
        bail!("{} ({})", message, status);
    }
    Ok(body)
}

pub async fn publish(
    client: &ApiClient,
    user: &str,
    caption: &str,
    providers: Vec<String>,
    media: Vec<String>,
    dry_run: bool,
) -> Result<()> {
    let body = json!({
        "caption": caption,
        "providers": providers,
        "media": media,
        "dryRun": dry_run,
    });
    let response = client
        .post(&["api", "social", "publish-async", "user", user], &body)
        .await?;
    println!(
        "Queued job {}",
        response["jobId"].as_str().unwrap_or("<unknown>")
    );
    Ok(())
}

pub fn validate(path: &str) -> Result<()> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    let config = castline_config::parse_config(&content)
        .with_context(|| format!("Configuration error in {}", path))?;

    println!("Configuration is valid");
    println!("  bind: {}", config.server.bind);
    println!(
        "  sweeper: {} (every {:?}, batch {})",
        if config.sweeper.enabled { "enabled" } else { "disabled" },
        config.sweeper.interval,
        config.sweeper.batch_limit
    );
    let providers: Vec<&str> = config.providers.iter().map(|p| p.name.as_str()).collect();
    println!("  providers: {}", providers.join(", "));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_endpoint_encodes_segments() {
        let client = ApiClient::new("http://localhost:3000/").unwrap();
        let url = client.endpoint(&["api", "posts", "a/b", "publish-now"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/posts/a%2Fb/publish-now");
    }

    #[tokio::test]
    async fn test_publish_posts_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/social/publish-async/user/u1"))
            .and(body_json(json!({
                "caption": "hello",
                "providers": ["facebook"],
                "media": [],
                "dryRun": true,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "jobId": "pub_1",
                "status": "queued",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        publish(&client, "u1", "hello", vec!["facebook".into()], vec![], true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_error_body_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/social/publish-jobs/pub_x"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({ "error": "not_found" })),
            )
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let err = client
            .get(&["api", "social", "publish-jobs", "pub_x"])
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("not_found"));
    }

    #[test]
    fn test_validate_reports_errors() {
        let dir = std::env::temp_dir().join(format!("castline-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let good = dir.join("good.kdl");
        std::fs::write(&good, "runner { max-concurrent-jobs 4 }\n").unwrap();
        assert!(validate(good.to_str().unwrap()).is_ok());

        let bad = dir.join("bad.kdl");
        std::fs::write(&bad, "runner { max-concurrent-jobs 0 }\n").unwrap();
        assert!(validate(bad.to_str().unwrap()).is_err());

        assert!(validate(dir.join("missing.kdl").to_str().unwrap()).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
