//! In-memory [`GenerativeBackend`] for tests
//!
//! Keeps remote state in maps, counts calls per operation and lets tests queue
//! failures that are returned (in order) before the real behaviour resumes.

use crate::backend::{
    cache_resource_name, file_resource_name, Candidate, CachedContentUsage, Content,
    CreateCachedContentRequest, FileState, FileUpload, GenerateContentRequest,
    GenerateContentResponse, GenerativeBackend, RemoteCachedContent, RemoteFile, RemoteModel,
    UsageMetadata,
};
use crate::error::{RelayError, ResourceKind, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

pub const FAKE_FILE_RETENTION_HOURS: i64 = 48;

#[derive(Default)]
struct FakeState {
    files: BTreeMap<String, RemoteFile>,
    caches: BTreeMap<String, RemoteCachedContent>,
    models: Vec<RemoteModel>,
    failures: HashMap<&'static str, VecDeque<RelayError>>,
    calls: HashMap<&'static str, usize>,
    cache_requests: Vec<CreateCachedContentRequest>,
    generate_requests: Vec<(String, GenerateContentRequest)>,
    reply: Option<String>,
    latency: Option<Duration>,
    next_id: u64,
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next call of `operation` (trait method name).
    pub fn fail_next(&self, operation: &'static str, error: RelayError) {
        self.state
            .lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Queue `count` transient 503s for `operation`.
    pub fn fail_transient(&self, operation: &'static str, count: usize) {
        for _ in 0..count {
            self.fail_next(
                operation,
                RelayError::Api {
                    status: 503,
                    message: "UNAVAILABLE: backend overloaded".to_string(),
                },
            );
        }
    }

    /// Delay every call, to exercise cancellation.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    pub fn set_models(&self, models: Vec<RemoteModel>) {
        self.state.lock().models = models;
    }

    pub fn set_reply(&self, reply: impl Into<String>) {
        self.state.lock().reply = Some(reply.into());
    }

    pub fn insert_file(&self, file: RemoteFile) {
        self.state.lock().files.insert(file.name.clone(), file);
    }

    pub fn insert_cache(&self, cache: RemoteCachedContent) {
        self.state.lock().caches.insert(cache.name.clone(), cache);
    }

    /// Drop a file remotely without telling the store, as expiry would.
    pub fn expire_file(&self, id: &str) {
        self.state.lock().files.remove(&file_resource_name(id));
    }

    pub fn expire_cache(&self, id: &str) {
        self.state.lock().caches.remove(&cache_resource_name(id));
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.state.lock().calls.get(operation).copied().unwrap_or(0)
    }

    pub fn remote_file_count(&self) -> usize {
        self.state.lock().files.len()
    }

    pub fn remote_cache_count(&self) -> usize {
        self.state.lock().caches.len()
    }

    pub fn cache_requests(&self) -> Vec<CreateCachedContentRequest> {
        self.state.lock().cache_requests.clone()
    }

    pub fn generate_requests(&self) -> Vec<(String, GenerateContentRequest)> {
        self.state.lock().generate_requests.clone()
    }

    async fn enter(&self, operation: &'static str) -> Result<()> {
        let (latency, failure) = {
            let mut state = self.state.lock();
            *state.calls.entry(operation).or_default() += 1;
            let failure = state
                .failures
                .get_mut(operation)
                .and_then(|queue| queue.pop_front());
            (state.latency, failure)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut state = self.state.lock();
        state.next_id += 1;
        format!("{prefix}-{:04}", state.next_id)
    }
}

fn parse_ttl_seconds(ttl: &str) -> i64 {
    ttl.trim_end_matches('s').parse::<f64>().map(|s| s as i64).unwrap_or(3600)
}

#[async_trait]
impl GenerativeBackend for FakeBackend {
    async fn upload_file(&self, upload: FileUpload) -> Result<RemoteFile> {
        self.enter("upload_file").await?;
        let id = self.next_id("fake-file");
        let now = Utc::now();
        let file = RemoteFile {
            name: file_resource_name(&id),
            display_name: Some(upload.display_name),
            mime_type: Some(upload.mime_type),
            size_bytes: Some(upload.content.len().to_string()),
            create_time: Some(now),
            expiration_time: Some(now + ChronoDuration::hours(FAKE_FILE_RETENTION_HOURS)),
            uri: Some(format!("https://fake.googleapis.com/v1beta/files/{id}")),
            state: Some(FileState::Active),
        };
        self.insert_file(file.clone());
        Ok(file)
    }

    async fn get_file(&self, name: &str) -> Result<RemoteFile> {
        self.enter("get_file").await?;
        let name = file_resource_name(name);
        self.state
            .lock()
            .files
            .get(&name)
            .cloned()
            .ok_or_else(|| RelayError::not_found(ResourceKind::File, name))
    }

    async fn delete_file(&self, name: &str) -> Result<()> {
        self.enter("delete_file").await?;
        let name = file_resource_name(name);
        match self.state.lock().files.remove(&name) {
            Some(_) => Ok(()),
            None => Err(RelayError::not_found(ResourceKind::File, name)),
        }
    }

    async fn list_files(&self) -> Result<Vec<RemoteFile>> {
        self.enter("list_files").await?;
        Ok(self.state.lock().files.values().cloned().collect())
    }

    async fn create_cached_content(
        &self,
        request: CreateCachedContentRequest,
    ) -> Result<RemoteCachedContent> {
        self.enter("create_cached_content").await?;
        let id = self.next_id("fake-cache");
        let now = Utc::now();
        let tokens = request
            .contents
            .iter()
            .flat_map(|content| content.parts.iter())
            .filter_map(|part| part.text.as_ref())
            .map(|text| text.split_whitespace().count() as u64)
            .sum();
        let cache = RemoteCachedContent {
            name: cache_resource_name(&id),
            display_name: request.display_name.clone(),
            model: Some(request.model.clone()),
            create_time: Some(now),
            expire_time: Some(now + ChronoDuration::seconds(parse_ttl_seconds(&request.ttl))),
            usage_metadata: Some(CachedContentUsage {
                total_token_count: Some(tokens),
            }),
        };
        {
            let mut state = self.state.lock();
            state.cache_requests.push(request);
            state.caches.insert(cache.name.clone(), cache.clone());
        }
        Ok(cache)
    }

    async fn get_cached_content(&self, name: &str) -> Result<RemoteCachedContent> {
        self.enter("get_cached_content").await?;
        let name = cache_resource_name(name);
        self.state
            .lock()
            .caches
            .get(&name)
            .cloned()
            .ok_or_else(|| RelayError::not_found(ResourceKind::Cache, name))
    }

    async fn delete_cached_content(&self, name: &str) -> Result<()> {
        self.enter("delete_cached_content").await?;
        let name = cache_resource_name(name);
        match self.state.lock().caches.remove(&name) {
            Some(_) => Ok(()),
            None => Err(RelayError::not_found(ResourceKind::Cache, name)),
        }
    }

    async fn list_cached_contents(&self) -> Result<Vec<RemoteCachedContent>> {
        self.enter("list_cached_contents").await?;
        Ok(self.state.lock().caches.values().cloned().collect())
    }

    async fn list_models(&self) -> Result<Vec<RemoteModel>> {
        self.enter("list_models").await?;
        Ok(self.state.lock().models.clone())
    }

    async fn generate_content(
        &self,
        model: &str,
        request: GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        self.enter("generate_content").await?;
        let mut state = self.state.lock();
        let reply = state.reply.clone().unwrap_or_else(|| "ok".to_string());
        let cached = if request.cached_content.is_some() { 100 } else { 0 };
        state.generate_requests.push((model.to_string(), request));
        Ok(GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content {
                    role: Some("model".to_string()),
                    parts: vec![crate::backend::Part::text(reply)],
                }),
                finish_reason: Some("STOP".to_string()),
            }],
            usage_metadata: Some(UsageMetadata {
                prompt_token_count: 10 + cached,
                candidates_token_count: 5,
                cached_content_token_count: cached,
                total_token_count: 15 + cached,
            }),
        })
    }
}
