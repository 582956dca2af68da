//! Facade wiring the backend, model catalog and resource stores together

use crate::backend::{
    Content, GenerateContentRequest, GeminiBackend, GenerativeBackend, Part,
};
use crate::caches::{CacheInfo, CacheStore, CreateCacheRequest};
use crate::config::RelayConfig;
use crate::context::CallContext;
use crate::error::{RelayError, Result};
use crate::files::{FileInfo, FileStore, UploadRequest};
use crate::models::{ModelCatalog, ModelFamily, ModelValidation, TaskKind};
use crate::query::{QueryRequest, QueryResponse};
use crate::retry::{execute_with_retry, RetryableError};
use common::OperationTimer;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of resolving a user-supplied model id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedModel {
    pub requested: String,
    /// Concrete id to call
    pub version: String,
    pub family: Option<ModelFamily>,
    pub warning: Option<String>,
}

pub struct GeminiRelay {
    config: RelayConfig,
    backend: Arc<dyn GenerativeBackend>,
    catalog: Arc<ModelCatalog>,
    files: Arc<FileStore>,
    caches: CacheStore,
}

impl GeminiRelay {
    pub fn new(config: RelayConfig, backend: Arc<dyn GenerativeBackend>) -> Self {
        Self::with_catalog(config, backend, Arc::new(ModelCatalog::new()))
    }

    pub fn with_catalog(
        config: RelayConfig,
        backend: Arc<dyn GenerativeBackend>,
        catalog: Arc<ModelCatalog>,
    ) -> Self {
        let files = Arc::new(FileStore::new(backend.clone(), config.retry.clone()));
        let caches = CacheStore::new(
            backend.clone(),
            catalog.clone(),
            files.clone(),
            config.retry.clone(),
        )
        .with_default_ttl(config.default_cache_ttl);
        Self {
            config,
            backend,
            catalog,
            files,
            caches,
        }
    }

    /// Relay talking to the Gemini REST API.
    pub fn from_config(config: RelayConfig) -> Result<Self> {
        let backend = GeminiBackend::new(config.api_key.clone())?
            .with_base_url(config.base_url.clone())
            .with_timeout(config.request_timeout)?;
        Ok(Self::new(config, Arc::new(backend)))
    }

    /// Best-effort catalog refresh. Returns whether the remote list was used.
    pub async fn bootstrap(&self, ctx: &CallContext) -> bool {
        if !self.config.refresh_models {
            info!("model refresh disabled, using curated model list");
            return false;
        }
        self.catalog
            .refresh_best_effort(ctx, self.backend.as_ref(), &self.config.retry)
            .await
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn list_models(&self) -> Vec<ModelFamily> {
        self.catalog.list_available()
    }

    /// Resolve `model`, or the configured default when `None`.
    pub fn resolve_model(&self, model: Option<&str>) -> ResolvedModel {
        let requested = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.config.default_model)
            .to_string();
        let warning = match self.catalog.validate(&requested) {
            ModelValidation::Unknown { warning } => Some(warning),
            _ => None,
        };
        ResolvedModel {
            version: self.catalog.resolve_to_callable_version(&requested),
            family: self.catalog.resolve_family_or_version(&requested),
            requested,
            warning,
        }
    }

    /// Callable version of the family preferred for `task`.
    pub fn select_model_for(&self, task: TaskKind) -> Option<String> {
        match task {
            TaskKind::Caching => self.catalog.preferred_caching_version(),
            _ => self
                .catalog
                .select_preferred_for(task)
                .map(|family| self.catalog.resolve_to_callable_version(&family.id)),
        }
    }

    pub async fn upload_file(&self, ctx: &CallContext, request: UploadRequest) -> Result<FileInfo> {
        self.files.upload(ctx, request).await
    }

    pub async fn get_file(&self, ctx: &CallContext, id: &str) -> Result<FileInfo> {
        self.files.get(ctx, id).await
    }

    pub async fn list_files(&self, ctx: &CallContext) -> Result<Vec<FileInfo>> {
        self.files.list(ctx).await
    }

    pub async fn delete_file(&self, ctx: &CallContext, id: &str) -> Result<()> {
        self.files.delete(ctx, id).await
    }

    pub async fn create_cache(
        &self,
        ctx: &CallContext,
        request: CreateCacheRequest,
    ) -> Result<CacheInfo> {
        if !self.config.enable_caching {
            return Err(RelayError::Configuration(
                "context caching is disabled (GEMINI_ENABLE_CACHING=false)".to_string(),
            ));
        }
        self.caches.create(ctx, request).await
    }

    pub async fn get_cache(&self, ctx: &CallContext, id: &str) -> Result<CacheInfo> {
        self.caches.get(ctx, id).await
    }

    pub async fn list_caches(&self, ctx: &CallContext) -> Result<Vec<CacheInfo>> {
        self.caches.list(ctx).await
    }

    pub async fn delete_cache(&self, ctx: &CallContext, id: &str) -> Result<()> {
        self.caches.delete(ctx, id).await
    }

    /// Send a prompt, through a cache when one is named.
    ///
    /// A cached query always runs on the cache's bound model; a differing
    /// requested model is ignored with a warning.
    pub async fn query(&self, ctx: &CallContext, request: QueryRequest) -> Result<QueryResponse> {
        request.validate()?;

        let cache = match request.cache_id.as_deref() {
            Some(id) => Some(self.caches.get(ctx, id).await?),
            None => None,
        };
        let model = match &cache {
            Some(cache) => {
                if let Some(requested) = request.model.as_deref() {
                    let requested = self.catalog.resolve_to_callable_version(requested);
                    if requested != cache.model {
                        warn!(
                            cache_id = %cache.id,
                            requested = %requested,
                            bound = %cache.model,
                            "cached query runs on the cache's model"
                        );
                    }
                }
                cache.model.clone()
            }
            None => {
                let resolved = self.resolve_model(request.model.as_deref());
                if let Some(warning) = &resolved.warning {
                    warn!(model = %resolved.requested, "{}", warning);
                }
                resolved.version
            }
        };

        let mut parts = Vec::with_capacity(request.file_ids.len() + 1);
        for file_id in &request.file_ids {
            let file = self.files.get(ctx, file_id).await?;
            parts.push(Part::file(file.uri, file.mime_type));
        }
        parts.push(Part::text(request.prompt.clone()));

        let generate = GenerateContentRequest {
            contents: vec![Content::user(parts)],
            system_instruction: request
                .system_prompt
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .map(Content::system),
            cached_content: cache.as_ref().map(|c| c.name.clone()),
        };

        let mut timer = OperationTimer::new("query");
        timer.add_field("model", &model);
        timer.add_field("cached", cache.is_some());
        let result = execute_with_retry(
            ctx,
            &self.config.retry,
            "generate content",
            || self.backend.generate_content(&model, generate.clone()),
            RetryableError::is_retryable,
        )
        .await
        .map_err(|e| e.context(format!("query model '{model}'")));
        timer.finish_with_result(&result);
        let response = result?;

        let finish_reason = response
            .candidates
            .first()
            .and_then(|c| c.finish_reason.clone());
        let text = response.text().ok_or_else(|| {
            RelayError::Decode(format!(
                "response contained no text (finish reason: {})",
                finish_reason.as_deref().unwrap_or("unknown")
            ))
        })?;

        Ok(QueryResponse {
            text,
            model,
            cache_id: cache.map(|c| c.id),
            finish_reason,
            usage: response.usage_metadata,
        })
    }
}
