//! Gemini resource relay
//!
//! Mirrors the lifecycle of remote, TTL-bound Gemini resources (uploaded
//! files and cached contents) in local concurrent maps, runs every outbound
//! call through a cancellable retry executor and resolves model families to
//! callable versions.

pub mod backend;
pub mod caches;
pub mod config;
pub mod context;
pub mod error;
pub mod files;
pub mod models;
pub mod query;
pub mod relay;
pub mod retry;

#[cfg(test)]
pub mod testing;

pub use backend::{GeminiBackend, GenerativeBackend};
pub use caches::{CacheInfo, CacheStore, CreateCacheRequest};
pub use config::RelayConfig;
pub use context::{CallContext, ContextError};
pub use error::{RelayError, ResourceKind, Result};
pub use files::{FileInfo, FileStore, UploadRequest};
pub use models::{ModelCatalog, ModelFamily, ModelValidation, ModelVersion, TaskKind};
pub use query::{QueryRequest, QueryResponse};
pub use relay::{GeminiRelay, ResolvedModel};
pub use retry::{execute_with_retry, RetryConfig, RetryableError};
