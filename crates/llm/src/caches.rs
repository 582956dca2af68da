//! Local mirror of Gemini cached contents
//!
//! A cache is bound to one concrete model version and lives until its TTL
//! runs out remotely or it is deleted. Expiry is only discovered when a later
//! `get`/`list` against the backend no longer returns it.

use crate::backend::{
    model_resource_name, strip_resource_prefix, Content, CreateCachedContentRequest, FileState,
    GenerativeBackend, Part, RemoteCachedContent, CACHE_NAME_PREFIX, MODEL_NAME_PREFIX,
};
use crate::context::CallContext;
use crate::error::{RelayError, Result};
use crate::files::FileStore;
use crate::models::{ModelCatalog, ModelValidation};
use crate::retry::{execute_with_retry, RetryConfig, RetryableError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::OperationTimer;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCacheRequest {
    /// Family or version id
    pub model: String,
    pub display_name: Option<String>,
    pub system_prompt: Option<String>,
    /// Inline text to cache
    pub content: Option<String>,
    pub file_ids: Vec<String>,
    /// Duration string such as `"90m"`, `"2h"` or `"3600s"`
    pub ttl: Option<String>,
}

impl CreateCacheRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_file(mut self, file_id: impl Into<String>) -> Self {
        self.file_ids.push(file_id.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_ttl(mut self, ttl: impl Into<String>) -> Self {
        self.ttl = Some(ttl.into());
        self
    }

    fn inline_content(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub id: String,
    pub name: String,
    pub display_name: String,
    /// Concrete model version the cache is bound to
    pub model: String,
    /// Empty when the cache was discovered remotely
    pub file_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub token_count: Option<u64>,
}

impl CacheInfo {
    pub fn from_remote(
        remote: RemoteCachedContent,
        bound_model: Option<&str>,
        file_ids: Vec<String>,
        ttl: Option<Duration>,
    ) -> Self {
        let id = strip_resource_prefix(&remote.name, CACHE_NAME_PREFIX).to_string();
        let model = remote
            .model
            .as_deref()
            .map(|m| strip_resource_prefix(m, MODEL_NAME_PREFIX).to_string())
            .or_else(|| bound_model.map(str::to_string))
            .unwrap_or_default();
        let created_at = remote.create_time.unwrap_or_else(Utc::now);
        let expires_at = remote.expire_time.unwrap_or_else(|| {
            ttl.and_then(|ttl| ChronoDuration::from_std(ttl).ok())
                .map(|ttl| created_at + ttl)
                .unwrap_or(created_at)
        });

        Self {
            display_name: remote.display_name.unwrap_or_else(|| id.clone()),
            token_count: remote.usage_metadata.and_then(|u| u.total_token_count),
            name: remote.name,
            id,
            model,
            file_ids,
            created_at,
            expires_at,
        }
    }
}

/// Parse a cache TTL. Accepts humantime strings (`"90m"`, `"1h 30m"`,
/// `"3600s"`) and bare integers as seconds. Zero and fractional seconds are
/// rejected since the wire format only carries whole seconds.
pub fn parse_ttl(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let parsed = if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        raw.parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| e.to_string())
    } else {
        humantime::parse_duration(raw).map_err(|e| e.to_string())
    };

    let ttl = parsed.map_err(|e| RelayError::validation("ttl", format!("invalid duration '{raw}': {e}")))?;
    if ttl.as_secs() == 0 {
        return Err(RelayError::validation("ttl", "TTL must be at least one second"));
    }
    if ttl.subsec_nanos() != 0 {
        return Err(RelayError::validation(
            "ttl",
            format!("TTL '{raw}' must be a whole number of seconds"),
        ));
    }
    Ok(ttl)
}

/// Wire format expected by the API, whole seconds with an `s` suffix.
pub fn format_ttl(ttl: Duration) -> String {
    format!("{}s", ttl.as_secs())
}

pub struct CacheStore {
    backend: Arc<dyn GenerativeBackend>,
    catalog: Arc<ModelCatalog>,
    files: Arc<FileStore>,
    retry: RetryConfig,
    default_ttl: Duration,
    caches: RwLock<HashMap<String, CacheInfo>>,
}

impl CacheStore {
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        catalog: Arc<ModelCatalog>,
        files: Arc<FileStore>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            backend,
            catalog,
            files,
            retry,
            default_ttl: DEFAULT_CACHE_TTL,
            caches: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub async fn create(&self, ctx: &CallContext, request: CreateCacheRequest) -> Result<CacheInfo> {
        let model = request.model.trim();
        if model.is_empty() {
            return Err(RelayError::validation("model", "model id is required"));
        }
        if request.file_ids.is_empty() && request.inline_content().is_none() {
            return Err(RelayError::validation(
                "content",
                "a cache needs at least one file id or non-empty content",
            ));
        }
        let ttl = match request.ttl.as_deref() {
            Some(raw) if !raw.trim().is_empty() => parse_ttl(raw)?,
            _ => self.default_ttl,
        };

        match self.catalog.validate(model) {
            ModelValidation::Unknown { warning } => warn!(model, "{}", warning),
            ModelValidation::Experimental => debug!(model, "using experimental model for cache"),
            ModelValidation::Known => {}
        }
        let version = self.catalog.resolve_caching_version(model);

        let mut parts = Vec::with_capacity(request.file_ids.len() + 1);
        for file_id in &request.file_ids {
            let file = self
                .files
                .get(ctx, file_id)
                .await
                .map_err(|e| e.context("resolve cache files"))?;
            match file.state {
                FileState::Failed => {
                    return Err(RelayError::validation(
                        "file_ids",
                        format!("file '{}' failed processing", file.id),
                    ))
                }
                FileState::Processing => {
                    warn!(file_id = %file.id, "caching a file that is still processing")
                }
                _ => {}
            }
            parts.push(Part::file(file.uri, file.mime_type));
        }
        if let Some(text) = request.inline_content() {
            parts.push(Part::text(text));
        }

        let display_name = request
            .display_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("gemrelay-cache-{}", Uuid::new_v4().simple()));
        let remote_request = CreateCachedContentRequest {
            model: model_resource_name(&version),
            display_name: Some(display_name),
            system_instruction: request
                .system_prompt
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .map(Content::system),
            contents: vec![Content::user(parts)],
            ttl: format_ttl(ttl),
        };

        let mut timer = OperationTimer::new("cache_create");
        timer.add_field("model", &version);
        timer.add_field("ttl_secs", ttl.as_secs());
        timer.add_field("files", request.file_ids.len());
        let result = execute_with_retry(
            ctx,
            &self.retry,
            "create cache",
            || self.backend.create_cached_content(remote_request.clone()),
            RetryableError::is_retryable,
        )
        .await
        .map_err(|e| e.context(format!("create cache for model '{version}'")));
        timer.finish_with_result(&result);

        let info = CacheInfo::from_remote(
            result?,
            Some(&version),
            request.file_ids.clone(),
            Some(ttl),
        );
        self.caches.write().insert(info.id.clone(), info.clone());
        info!(
            cache_id = %info.id,
            model = %info.model,
            expires_at = %info.expires_at,
            "created cache"
        );
        Ok(info)
    }

    pub async fn get(&self, ctx: &CallContext, id: &str) -> Result<CacheInfo> {
        let id = normalize_id(id)?;
        let mirrored = self.caches.read().get(id).cloned();
        if let Some(info) = mirrored {
            debug!(cache_id = id, "cache served from local mirror");
            return Ok(info);
        }

        let result = execute_with_retry(
            ctx,
            &self.retry,
            "get cache",
            || self.backend.get_cached_content(id),
            RetryableError::is_retryable,
        )
        .await;

        match result {
            Ok(remote) => {
                let info = CacheInfo::from_remote(remote, None, Vec::new(), None);
                self.caches.write().insert(info.id.clone(), info.clone());
                Ok(info)
            }
            Err(e) => {
                if e.is_not_found() && self.caches.write().remove(id).is_some() {
                    warn!(cache_id = id, "purged stale local cache entry");
                }
                Err(e.context(format!("get cache '{id}'")))
            }
        }
    }

    pub async fn delete(&self, ctx: &CallContext, id: &str) -> Result<()> {
        let info = self.get(ctx, id).await?;

        execute_with_retry(
            ctx,
            &self.retry,
            "delete cache",
            || self.backend.delete_cached_content(&info.name),
            RetryableError::is_retryable,
        )
        .await
        .map_err(|e| e.context(format!("delete cache '{}'", info.id)))?;

        self.caches.write().remove(&info.id);
        info!(cache_id = %info.id, "deleted cache");
        Ok(())
    }

    /// Fresh remote enumeration. File ids of locally created caches carry
    /// over; everything else comes back with an empty list.
    pub async fn list(&self, ctx: &CallContext) -> Result<Vec<CacheInfo>> {
        let remote = execute_with_retry(
            ctx,
            &self.retry,
            "list caches",
            || self.backend.list_cached_contents(),
            RetryableError::is_retryable,
        )
        .await
        .map_err(|e| e.context("list caches"))?;

        let mut caches = self.caches.write();
        let listed: Vec<CacheInfo> = remote
            .into_iter()
            .map(|cache| {
                let id = strip_resource_prefix(&cache.name, CACHE_NAME_PREFIX);
                let file_ids = caches
                    .get(id)
                    .map(|known| known.file_ids.clone())
                    .unwrap_or_default();
                CacheInfo::from_remote(cache, None, file_ids, None)
            })
            .collect();
        *caches = listed
            .iter()
            .map(|info| (info.id.clone(), info.clone()))
            .collect();
        debug!(count = listed.len(), "refreshed local cache mirror");
        Ok(listed)
    }

    /// Local entries only, no remote call.
    pub fn cached(&self) -> Vec<CacheInfo> {
        self.caches.read().values().cloned().collect()
    }
}

fn normalize_id(id: &str) -> Result<&str> {
    let id = strip_resource_prefix(id.trim(), CACHE_NAME_PREFIX);
    if id.is_empty() {
        return Err(RelayError::validation("cache_id", "cache id must not be empty"));
    }
    Ok(id)
}
