//! Job commands.

use anyhow::Result;
use serde_json::Value;
use std::fmt::Write;

use super::ApiClient;

pub async fn show(client: &ApiClient, id: &str) -> Result<()> {
    let job = client.get(&["api", "social", "publish-jobs", id]).await?;
    print!("{}", format_job(&job));
    Ok(())
}

/// Render a job status response for the terminal.
pub fn format_job(job: &Value) -> String {
    let text = |key: &str| job[key].as_str().unwrap_or("-").to_string();
    let providers: Vec<&str> = job["providers"]
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut out = String::new();
    let _ = writeln!(out, "Job {} ({})", text("jobId"), text("status"));
    let _ = writeln!(out, "  user:      {}", text("userId"));
    let _ = writeln!(out, "  providers: {}", providers.join(", "));
    let _ = writeln!(out, "  created:   {}", text("createdAt"));
    let _ = writeln!(out, "  started:   {}", text("startedAt"));
    let _ = writeln!(out, "  finished:  {}", text("finishedAt"));
    if let Some(error) = job["error"].as_str() {
        let _ = writeln!(out, "  error:     {}", error);
    }

    if let Some(results) = job["result"]["results"].as_object() {
        let _ = writeln!(out, "Results:");
        for (provider, result) in results {
            if result["ok"].as_bool().unwrap_or(false) {
                let posted = result["posted"].as_u64().unwrap_or(0);
                let _ = writeln!(out, "  {:<10} ok ({} posted)", provider, posted);
            } else {
                let error = result["error"].as_str().unwrap_or("failed");
                let _ = writeln!(out, "  {:<10} {}", provider, error);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_finished_job() {
        let job = json!({
            "ok": true,
            "jobId": "pub_1",
            "userId": "u1",
            "status": "failed",
            "providers": ["facebook", "tiktok"],
            "createdAt": "2024-03-01T10:00:00Z",
            "startedAt": "2024-03-01T10:00:01Z",
            "finishedAt": "2024-03-01T10:00:05Z",
            "error": "one_or_more_providers_failed",
            "result": {
                "results": {
                    "facebook": { "ok": true, "posted": 2 },
                    "tiktok": { "ok": false, "error": "tiktok_requires_video" }
                }
            }
        });

        let out = format_job(&job);
        assert!(out.starts_with("Job pub_1 (failed)\n"));
        assert!(out.contains("providers: facebook, tiktok"));
        assert!(out.contains("error:     one_or_more_providers_failed"));
        assert!(out.contains("facebook   ok (2 posted)"));
        assert!(out.contains("tiktok     tiktok_requires_video"));
    }

    #[test]
    fn test_format_queued_job() {
        let job = json!({
            "jobId": "pub_2",
            "status": "queued",
            "providers": [],
            "startedAt": null,
            "result": {}
        });

        let out = format_job(&job);
        assert!(out.contains("started:   -"));
        assert!(!out.contains("Results:"));
        assert!(!out.contains("error:"));
    }
}
