//! Post commands.

use anyhow::Result;
use serde_json::json;

use super::ApiClient;

pub async fn publish_now(client: &ApiClient, post_id: &str, user: &str) -> Result<()> {
    let response = client
        .post(&["api", "posts", post_id, "publish-now", "user", user], &json!({}))
        .await?;
    println!(
        "Post {} queued as job {}",
        post_id,
        response["jobId"].as_str().unwrap_or("<unknown>")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_conflict_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/posts/p1/publish-now/user/u1"))
            .respond_with(
                ResponseTemplate::new(409).set_body_json(json!({ "error": "already_queued" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let err = publish_now(&client, "p1", "u1").await.unwrap_err();
        assert!(err.to_string().contains("already_queued"));
    }
}
