//! Model catalog: Gemini families, their callable versions and preferences
//!
//! Callers may address a model by family id (`gemini-2.5-flash`) or by a
//! concrete version id (`gemini-2.5-flash-preview-05-20`). The catalog
//! resolves either form and is explicit about which one it returns.

mod fallback;

pub use fallback::fallback_models;

use crate::backend::{strip_resource_prefix, GenerativeBackend, RemoteModel, MODEL_NAME_PREFIX};
use crate::context::CallContext;
use crate::error::{RelayError, Result};
use crate::retry::{execute_with_retry, RetryConfig, RetryableError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

const GENERATE_METHOD: &str = "generateContent";
const CACHE_METHOD: &str = "createCachedContent";

/// A concrete, API-callable model identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub id: String,
    pub name: String,
    pub supports_caching: bool,
    pub is_preferred: bool,
}

impl ModelVersion {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            supports_caching: false,
            is_preferred: false,
        }
    }

    pub fn caching(mut self) -> Self {
        self.supports_caching = true;
        self
    }

    pub fn preferred(mut self) -> Self {
        self.is_preferred = true;
        self
    }
}

/// A logical model line with its versions in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFamily {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub context_window: u64,
    pub supports_thinking: bool,
    /// True when any version supports caching; overridden by the version's
    /// own flag when the family was resolved through a version id
    pub supports_caching: bool,
    pub preferred_for_thinking: bool,
    pub preferred_for_caching: bool,
    pub preferred_for_search: bool,
    pub versions: Vec<ModelVersion>,
}

impl ModelFamily {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
        context_window: u64,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            description: description.into(),
            context_window,
            supports_thinking: false,
            supports_caching: false,
            preferred_for_thinking: false,
            preferred_for_caching: false,
            preferred_for_search: false,
            versions: Vec::new(),
        }
    }

    pub fn thinking(mut self) -> Self {
        self.supports_thinking = true;
        self
    }

    pub fn preferred_for_thinking(mut self) -> Self {
        self.preferred_for_thinking = true;
        self
    }

    pub fn preferred_for_caching(mut self) -> Self {
        self.preferred_for_caching = true;
        self
    }

    pub fn preferred_for_search(mut self) -> Self {
        self.preferred_for_search = true;
        self
    }

    pub fn with_version(mut self, version: ModelVersion) -> Self {
        self.push_version(version);
        self
    }

    fn push_version(&mut self, version: ModelVersion) {
        self.supports_caching |= version.supports_caching;
        self.versions.push(version);
    }

    pub fn version(&self, id: &str) -> Option<&ModelVersion> {
        self.versions.iter().find(|v| v.id == id)
    }

    /// Preferred version, else the first declared one.
    pub fn default_version(&self) -> Option<&ModelVersion> {
        self.versions
            .iter()
            .find(|v| v.is_preferred)
            .or_else(|| self.versions.first())
    }

    /// Preferred caching-capable version, else the first caching-capable one.
    pub fn caching_version(&self) -> Option<&ModelVersion> {
        self.versions
            .iter()
            .find(|v| v.is_preferred && v.supports_caching)
            .or_else(|| self.versions.iter().find(|v| v.supports_caching))
    }

    fn is_preferred_for(&self, task: TaskKind) -> bool {
        match task {
            TaskKind::Thinking => self.preferred_for_thinking,
            TaskKind::Caching => self.preferred_for_caching,
            TaskKind::Search => self.preferred_for_search,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Thinking,
    Caching,
    Search,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Thinking => "thinking",
            TaskKind::Caching => "caching",
            TaskKind::Search => "search",
        };
        f.write_str(name)
    }
}

impl FromStr for TaskKind {
    type Err = RelayError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "thinking" => Ok(TaskKind::Thinking),
            "caching" => Ok(TaskKind::Caching),
            "search" => Ok(TaskKind::Search),
            other => Err(RelayError::validation(
                "task",
                format!("unknown task kind '{other}', expected thinking, caching or search"),
            )),
        }
    }
}

/// Outcome of lenient model validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelValidation {
    Known,
    /// Not in the catalog but looks like a preview/experimental id
    Experimental,
    /// Not in the catalog; callers proceed anyway
    Unknown { warning: String },
}

impl ModelValidation {
    pub fn warning(&self) -> Option<&str> {
        match self {
            ModelValidation::Unknown { warning } => Some(warning),
            _ => None,
        }
    }
}

/// Process-lifetime registry of model metadata.
///
/// Constructed once and shared as `Arc<ModelCatalog>`. Until a refresh
/// succeeds, every lookup runs against the curated fallback list.
#[derive(Debug)]
pub struct ModelCatalog {
    models: RwLock<Option<Vec<ModelFamily>>>,
    fallback: Vec<ModelFamily>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self {
            models: RwLock::new(None),
            fallback: fallback_models(),
        }
    }

    /// Catalog pre-populated with `models`, fallback kept for merging.
    pub fn with_models(models: Vec<ModelFamily>) -> Self {
        Self {
            models: RwLock::new(Some(models)),
            fallback: fallback_models(),
        }
    }

    pub fn is_populated(&self) -> bool {
        self.models.read().is_some()
    }

    pub fn replace(&self, models: Vec<ModelFamily>) {
        *self.models.write() = Some(models);
    }

    fn read<R>(&self, f: impl FnOnce(&[ModelFamily]) -> R) -> R {
        let guard = self.models.read();
        f(guard.as_deref().unwrap_or(&self.fallback))
    }

    pub fn list_available(&self) -> Vec<ModelFamily> {
        self.read(|models| models.to_vec())
    }

    /// Family and version ids, in catalog order.
    pub fn known_ids(&self) -> Vec<String> {
        self.read(|models| {
            let mut ids = Vec::new();
            for family in models {
                ids.push(family.id.clone());
                for version in &family.versions {
                    if version.id != family.id {
                        ids.push(version.id.clone());
                    }
                }
            }
            ids
        })
    }

    /// Owning family of a family id or any nested version id.
    pub fn resolve_family_or_version(&self, id: &str) -> Option<ModelFamily> {
        let id = normalize_model_id(id);
        self.read(|models| {
            if let Some(family) = models.iter().find(|f| f.id == id) {
                return Some(family.clone());
            }
            models.iter().find_map(|family| {
                family.version(id).map(|version| {
                    let mut resolved = family.clone();
                    resolved.supports_caching = version.supports_caching;
                    resolved
                })
            })
        })
    }

    /// Concrete id to send to the API.
    ///
    /// Known versions come back unchanged; a family yields its preferred
    /// version, else its first version, else the family id itself (only
    /// valid when the backend accepts bare family ids). Unknown ids pass
    /// through untouched.
    pub fn resolve_to_callable_version(&self, id: &str) -> String {
        let id = normalize_model_id(id);
        self.read(|models| {
            if models.iter().any(|f| f.version(id).is_some()) {
                return id.to_string();
            }
            match models.iter().find(|f| f.id == id) {
                Some(family) => family
                    .default_version()
                    .map(|v| v.id.clone())
                    .unwrap_or_else(|| family.id.clone()),
                None => id.to_string(),
            }
        })
    }

    /// Version a cache should be bound to.
    ///
    /// A family binds to its preferred caching-capable version, falling back
    /// to the family id itself when none of its versions supports caching.
    /// Version ids and unknown ids pass through unchanged; the backend has
    /// the final say.
    pub fn resolve_caching_version(&self, id: &str) -> String {
        let id = normalize_model_id(id);
        let family = self.read(|models| {
            if models.iter().any(|f| f.version(id).is_some()) {
                return None;
            }
            models.iter().find(|f| f.id == id).cloned()
        });

        match family {
            Some(family) => {
                if let Some(version) = family.caching_version() {
                    return version.id.clone();
                }
                if !family.versions.is_empty() || !family.supports_caching {
                    warn!(
                        model = %family.id,
                        "no caching-capable version found for '{}', binding the family id",
                        family.id
                    );
                }
                family.id
            }
            None => {
                if let Some(owner) = self.resolve_family_or_version(id) {
                    if !owner.supports_caching {
                        warn!(model = %id, "model '{}' is not marked as caching-capable", id);
                    }
                }
                id.to_string()
            }
        }
    }

    /// Lenient validation: unknown ids never fail.
    pub fn validate(&self, id: &str) -> ModelValidation {
        let id = normalize_model_id(id);
        let known = self.read(|models| {
            models
                .iter()
                .any(|f| f.id == id || f.version(id).is_some())
        });
        if known {
            return ModelValidation::Known;
        }
        if looks_experimental(id) {
            debug!(model = id, "accepting unlisted preview/experimental model");
            return ModelValidation::Experimental;
        }
        ModelValidation::Unknown {
            warning: format!(
                "Model '{}' is not in the known model list; proceeding anyway. Known models: {}",
                id,
                self.known_ids().join(", ")
            ),
        }
    }

    /// First family flagged for `task`. For caching, the returned family's
    /// versions are narrowed to the caching-capable ones (possibly none).
    pub fn select_preferred_for(&self, task: TaskKind) -> Option<ModelFamily> {
        let mut family = self.read(|models| {
            models
                .iter()
                .find(|f| f.is_preferred_for(task))
                .cloned()
        })?;
        if task == TaskKind::Caching {
            family.versions.retain(|v| v.supports_caching);
        }
        Some(family)
    }

    /// Caching version of the caching-preferred family, if any.
    pub fn preferred_caching_version(&self) -> Option<String> {
        self.select_preferred_for(TaskKind::Caching)
            .and_then(|family| family.caching_version().map(|v| v.id.clone()))
    }

    /// Fetch the remote model list and merge it into the curated fallback.
    ///
    /// On error the registry is left untouched.
    pub async fn refresh(
        &self,
        ctx: &CallContext,
        backend: &dyn GenerativeBackend,
        retry: &RetryConfig,
    ) -> Result<usize> {
        let remote = execute_with_retry(
            ctx,
            retry,
            "list models",
            || backend.list_models(),
            RetryableError::is_retryable,
        )
        .await
        .map_err(|e| e.context("refresh model catalog"))?;

        let merged = merge_remote_models(self.fallback.clone(), &remote);
        let count = merged.len();
        self.replace(merged);
        info!(
            families = count,
            remote_models = remote.len(),
            "model catalog refreshed"
        );
        Ok(count)
    }

    /// [`Self::refresh`] that logs failures instead of returning them.
    pub async fn refresh_best_effort(
        &self,
        ctx: &CallContext,
        backend: &dyn GenerativeBackend,
        retry: &RetryConfig,
    ) -> bool {
        match self.refresh(ctx, backend, retry).await {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    populated = self.is_populated(),
                    "keeping existing model catalog: {}",
                    e
                );
                false
            }
        }
    }
}

/// Merge API-listed models into `base`, keeping curated entries intact.
///
/// Unknown generate-capable models are attached as versions to the family
/// whose id is their longest prefix, but only when the remainder is a
/// snapshot or variant suffix (`001`, `preview-..`, `exp-..`, `latest`).
/// Anything else, such as `gemini-2.5-flash-lite`, is a separate model line
/// and becomes a new family without versions.
pub fn merge_remote_models(mut base: Vec<ModelFamily>, remote: &[RemoteModel]) -> Vec<ModelFamily> {
    for model in remote {
        if !model.supports(GENERATE_METHOD) {
            continue;
        }
        let id = model.id();
        let known = base
            .iter()
            .any(|f| f.id == id || f.version(id).is_some());
        if known {
            continue;
        }

        let supports_caching = model.supports(CACHE_METHOD);
        let owner = base
            .iter_mut()
            .filter(|f| {
                id.strip_prefix(f.id.as_str())
                    .and_then(|rest| rest.strip_prefix('-'))
                    .is_some_and(is_version_suffix)
            })
            .max_by_key(|f| f.id.len());

        match owner {
            Some(family) => {
                let mut version = ModelVersion::new(
                    id,
                    model.display_name.clone().unwrap_or_else(|| id.to_string()),
                );
                version.supports_caching = supports_caching;
                family.push_version(version);
            }
            None => {
                let mut family = ModelFamily::new(
                    id,
                    model.display_name.clone().unwrap_or_else(|| id.to_string()),
                    model.description.clone().unwrap_or_default(),
                    model.input_token_limit.unwrap_or(0),
                );
                family.supports_caching = supports_caching;
                base.push(family);
            }
        }
    }
    base
}

fn is_version_suffix(rest: &str) -> bool {
    let segment = rest.split('-').next().unwrap_or_default();
    (!segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
        || ["preview", "exp", "latest"]
            .iter()
            .any(|marker| segment.starts_with(marker))
}

fn normalize_model_id(id: &str) -> &str {
    strip_resource_prefix(id.trim(), MODEL_NAME_PREFIX)
}

fn looks_experimental(id: &str) -> bool {
    let lowered = id.to_lowercase();
    lowered.contains("preview") || lowered.contains("exp") || lowered.ends_with("-dev")
}
