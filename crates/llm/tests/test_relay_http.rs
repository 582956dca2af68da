//! End-to-end tests of the relay against a mocked Gemini REST API

use llm::{
    CallContext, CreateCacheRequest, GeminiRelay, QueryRequest, RelayConfig, RelayError,
    RetryConfig, UploadRequest,
};
use mockito::{Matcher, Server, ServerGuard};
use std::io::Write;
use std::time::Duration;

const FILE_JSON: &str = r#"{
    "name": "files/doc1",
    "displayName": "report.pdf",
    "mimeType": "application/pdf",
    "sizeBytes": "11",
    "createTime": "2025-03-01T09:00:00Z",
    "expirationTime": "2025-03-03T09:00:00Z",
    "uri": "https://generativelanguage.googleapis.com/v1beta/files/doc1",
    "state": "ACTIVE"
}"#;

const CACHE_JSON: &str = r#"{
    "name": "cachedContents/cache1",
    "displayName": "quarterly",
    "model": "models/gemini-2.5-flash",
    "createTime": "2025-03-01T09:05:00Z",
    "expireTime": "2025-03-01T09:15:00Z",
    "usageMetadata": {"totalTokenCount": 2048}
}"#;

fn relay_for(server: &ServerGuard, max_attempts: u32) -> GeminiRelay {
    let mut config = RelayConfig::new("test-key");
    config.base_url = server.url();
    config.retry = RetryConfig::new()
        .with_max_attempts(max_attempts)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5));
    GeminiRelay::from_config(config).expect("relay")
}

#[tokio::test]
async fn test_upload_then_get_is_served_locally() {
    let mut server = Server::new_async().await;
    let upload = server
        .mock("POST", "/upload/v1beta/files")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(format!(r#"{{"file": {FILE_JSON}}}"#))
        .create_async()
        .await;
    let lookup = server
        .mock("GET", "/v1beta/files/doc1")
        .expect(0)
        .create_async()
        .await;

    let relay = relay_for(&server, 3);
    let ctx = CallContext::background();
    let uploaded = relay
        .upload_file(
            &ctx,
            UploadRequest::new("report.pdf", "application/pdf", b"%PDF-report".to_vec()),
        )
        .await
        .expect("upload");
    let fetched = relay.get_file(&ctx, "doc1").await.expect("get");

    upload.assert_async().await;
    lookup.assert_async().await;
    assert_eq!(uploaded.id, "doc1");
    assert_eq!(fetched.mime_type, "application/pdf");
    assert_eq!(fetched.size_bytes, 11);
    assert_eq!(fetched.expires_at.to_rfc3339(), "2025-03-03T09:00:00+00:00");
}

#[tokio::test]
async fn test_cache_create_and_cached_query() {
    let mut server = Server::new_async().await;
    let create = server
        .mock("POST", "/v1beta/cachedContents")
        .match_body(Matcher::PartialJsonString(
            r#"{"model": "models/gemini-2.5-flash", "ttl": "600s", "displayName": "quarterly"}"#
                .to_string(),
        ))
        .with_status(200)
        .with_body(CACHE_JSON)
        .create_async()
        .await;
    let generate = server
        .mock("POST", "/v1beta/models/gemini-2.5-flash:generateContent")
        .match_body(Matcher::PartialJsonString(
            r#"{"cachedContent": "cachedContents/cache1"}"#.to_string(),
        ))
        .with_status(200)
        .with_body(
            r#"{
                "candidates": [{"content": {"role": "model", "parts": [{"text": "Revenue grew "}, {"text": "12%."}]}, "finishReason": "STOP"}],
                "usageMetadata": {"promptTokenCount": 2060, "candidatesTokenCount": 4, "cachedContentTokenCount": 2048, "totalTokenCount": 2064}
            }"#,
        )
        .create_async()
        .await;

    let relay = relay_for(&server, 3);
    let ctx = CallContext::background();
    let cache = relay
        .create_cache(
            &ctx,
            CreateCacheRequest::new("gemini-2.5-flash")
                .with_content("Q1 revenue: 10M. Q2 revenue: 11.2M.")
                .with_display_name("quarterly")
                .with_ttl("10m"),
        )
        .await
        .expect("cache created");

    assert_eq!(cache.id, "cache1");
    assert_eq!(cache.model, "gemini-2.5-flash");
    assert_eq!(cache.token_count, Some(2048));
    assert_eq!(cache.expires_at.to_rfc3339(), "2025-03-01T09:15:00+00:00");

    let answer = relay
        .query(&ctx, QueryRequest::new("How much did revenue grow?").with_cache("cache1"))
        .await
        .expect("cached query");

    create.assert_async().await;
    generate.assert_async().await;
    assert_eq!(answer.text, "Revenue grew 12%.");
    assert_eq!(answer.finish_reason.as_deref(), Some("STOP"));
    assert_eq!(answer.usage.map(|u| u.cached_content_token_count), Some(2048));
}

#[tokio::test]
async fn test_transient_errors_exhaust_attempt_budget() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/v1beta/cachedContents/busy")
        .with_status(503)
        .with_body(r#"{"error": {"code": 503, "message": "overloaded", "status": "UNAVAILABLE"}}"#)
        .expect(3)
        .create_async()
        .await;

    let relay = relay_for(&server, 3);
    let error = relay
        .get_cache(&CallContext::background(), "busy")
        .await
        .expect_err("always unavailable");

    mock.assert_async().await;
    assert_eq!(error.status_code(), Some(503));
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/v1beta/cachedContents/expired")
        .with_status(404)
        .with_body(r#"{"error": {"code": 404, "message": "not found", "status": "NOT_FOUND"}}"#)
        .expect(1)
        .create_async()
        .await;

    let relay = relay_for(&server, 5);
    let error = relay
        .get_cache(&CallContext::background(), "cachedContents/expired")
        .await
        .expect_err("expired cache");

    mock.assert_async().await;
    assert!(error.is_not_found());
}

#[tokio::test]
async fn test_bad_request_is_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1beta/cachedContents")
        .with_status(400)
        .with_body(r#"{"error": {"code": 400, "message": "Cached content is too small", "status": "INVALID_ARGUMENT"}}"#)
        .expect(1)
        .create_async()
        .await;

    let relay = relay_for(&server, 4);
    let error = relay
        .create_cache(
            &CallContext::background(),
            CreateCacheRequest::new("gemini-2.5-pro").with_content("tiny"),
        )
        .await
        .expect_err("too small");

    mock.assert_async().await;
    assert_eq!(error.status_code(), Some(400));
    assert!(error.to_string().contains("Cached content is too small"));
}

#[tokio::test]
async fn test_delete_file_confirms_remotely_first() {
    let mut server = Server::new_async().await;
    let lookup = server
        .mock("GET", "/v1beta/files/doc1")
        .with_status(200)
        .with_body(FILE_JSON)
        .create_async()
        .await;
    let delete = server
        .mock("DELETE", "/v1beta/files/doc1")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let relay = relay_for(&server, 3);
    relay
        .delete_file(&CallContext::background(), "files/doc1")
        .await
        .expect("deleted");

    lookup.assert_async().await;
    delete.assert_async().await;
}

#[tokio::test]
async fn test_bootstrap_merges_remote_models() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v1beta/models")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            r#"{"models": [
                {"name": "models/gemini-2.5-flash", "supportedGenerationMethods": ["generateContent", "createCachedContent"]},
                {"name": "models/gemini-2.5-flash-preview-09-2025", "displayName": "Flash Preview", "supportedGenerationMethods": ["generateContent", "createCachedContent"]},
                {"name": "models/embedding-001", "supportedGenerationMethods": ["embedContent"]}
            ]}"#,
        )
        .create_async()
        .await;

    let relay = relay_for(&server, 1);
    assert!(relay.bootstrap(&CallContext::background()).await);

    let resolved = relay.resolve_model(Some("gemini-2.5-flash-preview-09-2025"));
    assert_eq!(resolved.version, "gemini-2.5-flash-preview-09-2025");
    assert_eq!(resolved.family.map(|f| f.id).as_deref(), Some("gemini-2.5-flash"));
    assert!(relay.resolve_model(Some("embedding-001")).family.is_none());
}

#[tokio::test]
async fn test_failed_bootstrap_keeps_fallback() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v1beta/models")
        .match_query(Matcher::Any)
        .with_status(500)
        .create_async()
        .await;

    let relay = relay_for(&server, 1);
    assert!(!relay.bootstrap(&CallContext::background()).await);
    assert!(!relay.catalog().is_populated());
    assert_eq!(relay.resolve_model(Some("gemini-2.0-flash")).version, "gemini-2.0-flash-001");
}

#[tokio::test]
async fn test_deadline_cuts_slow_request() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v1beta/files/slow")
        .with_status(200)
        .with_chunked_body(|writer| {
            std::thread::sleep(Duration::from_millis(500));
            writer.write_all(FILE_JSON.as_bytes())
        })
        .create_async()
        .await;

    let relay = relay_for(&server, 3);
    let ctx = CallContext::with_timeout(Duration::from_millis(50));
    let error = relay.get_file(&ctx, "slow").await.expect_err("deadline");

    assert!(error.is_context(), "{error}");
    assert!(matches!(error.root(), RelayError::Context(_)));
}
