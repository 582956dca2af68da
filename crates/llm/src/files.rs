//! Local mirror of uploaded Gemini files
//!
//! The remote service is the source of truth. The map here answers repeated
//! lookups without a round trip and is refreshed in place whenever a remote
//! call returns fresher data. Remote expiry is only noticed reactively.

use crate::backend::{
    strip_resource_prefix, FileState, FileUpload, GenerativeBackend, RemoteFile, FILE_NAME_PREFIX,
};
use crate::context::CallContext;
use crate::error::{RelayError, Result};
use crate::retry::{execute_with_retry, RetryConfig, RetryableError};
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::OperationTimer;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Gemini keeps uploaded files for 48 hours.
pub const FILE_RETENTION_HOURS: i64 = 48;

#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Local file name, used as display name unless one is given
    pub name: String,
    pub mime_type: String,
    pub content: Bytes,
    pub display_name: Option<String>,
}

impl UploadRequest {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            content: content.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RelayError::validation("name", "file name must not be empty"));
        }
        if self.mime_type.trim().is_empty() {
            return Err(RelayError::validation("mime_type", "MIME type must not be empty"));
        }
        if self.content.is_empty() {
            return Err(RelayError::validation("content", "file content must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: String,
    pub name: String,
    pub uri: String,
    pub display_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: FileState,
}

impl FileInfo {
    /// Build from a remote record. Fields the backend omitted are taken from
    /// the originating upload when there is one.
    pub fn from_remote(remote: RemoteFile, upload: Option<&UploadRequest>) -> Self {
        let id = strip_resource_prefix(&remote.name, FILE_NAME_PREFIX).to_string();
        let size_bytes = match (remote.size(), upload) {
            (0, Some(upload)) => upload.content.len() as u64,
            (size, _) => size,
        };
        let created_at = remote.create_time.unwrap_or_else(Utc::now);
        let expires_at = remote
            .expiration_time
            .unwrap_or_else(|| created_at + ChronoDuration::hours(FILE_RETENTION_HOURS));
        let display_name = remote
            .display_name
            .or_else(|| upload.map(|u| u.display_name.clone().unwrap_or_else(|| u.name.clone())))
            .unwrap_or_else(|| id.clone());
        let mime_type = remote
            .mime_type
            .or_else(|| upload.map(|u| u.mime_type.clone()))
            .unwrap_or_default();

        Self {
            uri: remote.uri.unwrap_or_default(),
            state: remote.state.unwrap_or(FileState::StateUnspecified),
            name: remote.name,
            id,
            display_name,
            mime_type,
            size_bytes,
            created_at,
            expires_at,
        }
    }
}

pub struct FileStore {
    backend: Arc<dyn GenerativeBackend>,
    retry: RetryConfig,
    files: RwLock<HashMap<String, FileInfo>>,
}

impl FileStore {
    pub fn new(backend: Arc<dyn GenerativeBackend>, retry: RetryConfig) -> Self {
        Self {
            backend,
            retry,
            files: RwLock::new(HashMap::new()),
        }
    }

    pub async fn upload(&self, ctx: &CallContext, request: UploadRequest) -> Result<FileInfo> {
        request.validate()?;

        let mut timer = OperationTimer::new("file_upload");
        timer.add_field("mime_type", &request.mime_type);
        timer.add_field("size_bytes", request.content.len());

        let display_name = request
            .display_name
            .clone()
            .unwrap_or_else(|| request.name.clone());
        let result = execute_with_retry(
            ctx,
            &self.retry,
            "upload file",
            || {
                self.backend.upload_file(FileUpload {
                    content: request.content.clone(),
                    mime_type: request.mime_type.clone(),
                    display_name: display_name.clone(),
                })
            },
            RetryableError::is_retryable,
        )
        .await
        .map_err(|e| e.context(format!("upload file '{}'", request.name)));
        timer.finish_with_result(&result);

        let info = FileInfo::from_remote(result?, Some(&request));
        self.files.write().insert(info.id.clone(), info.clone());
        info!(file_id = %info.id, uri = %info.uri, "uploaded file");
        Ok(info)
    }

    /// Local entry if present, otherwise a remote lookup that repopulates it.
    pub async fn get(&self, ctx: &CallContext, id: &str) -> Result<FileInfo> {
        let id = normalize_id(id)?;
        let mirrored = self.files.read().get(id).cloned();
        if let Some(info) = mirrored {
            debug!(file_id = id, "file served from local mirror");
            return Ok(info);
        }
        self.fetch_remote(ctx, id).await
    }

    async fn fetch_remote(&self, ctx: &CallContext, id: &str) -> Result<FileInfo> {
        let result = execute_with_retry(
            ctx,
            &self.retry,
            "get file",
            || self.backend.get_file(id),
            RetryableError::is_retryable,
        )
        .await;

        match result {
            Ok(remote) => {
                let info = FileInfo::from_remote(remote, None);
                self.files.write().insert(info.id.clone(), info.clone());
                Ok(info)
            }
            Err(e) => {
                if e.is_not_found() && self.files.write().remove(id).is_some() {
                    warn!(file_id = id, "purged stale local file entry");
                }
                Err(e.context(format!("get file '{id}'")))
            }
        }
    }

    /// Remote lookup, remote delete, then local removal. A failed remote
    /// delete leaves the local entry in place.
    pub async fn delete(&self, ctx: &CallContext, id: &str) -> Result<()> {
        let id = normalize_id(id)?;
        let info = self.fetch_remote(ctx, id).await?;

        execute_with_retry(
            ctx,
            &self.retry,
            "delete file",
            || self.backend.delete_file(&info.name),
            RetryableError::is_retryable,
        )
        .await
        .map_err(|e| e.context(format!("delete file '{id}'")))?;

        self.files.write().remove(id);
        info!(file_id = id, "deleted file");
        Ok(())
    }

    /// Fresh remote enumeration; replaces the whole local mirror.
    pub async fn list(&self, ctx: &CallContext) -> Result<Vec<FileInfo>> {
        let remote = execute_with_retry(
            ctx,
            &self.retry,
            "list files",
            || self.backend.list_files(),
            RetryableError::is_retryable,
        )
        .await
        .map_err(|e| e.context("list files"))?;

        let files: Vec<FileInfo> = remote
            .into_iter()
            .map(|file| FileInfo::from_remote(file, None))
            .collect();
        let mirror = files
            .iter()
            .map(|info| (info.id.clone(), info.clone()))
            .collect();
        *self.files.write() = mirror;
        debug!(count = files.len(), "refreshed local file mirror");
        Ok(files)
    }

    /// Local entries only, no remote call.
    pub fn cached(&self) -> Vec<FileInfo> {
        self.files.read().values().cloned().collect()
    }
}

fn normalize_id(id: &str) -> Result<&str> {
    let id = strip_resource_prefix(id.trim(), FILE_NAME_PREFIX);
    if id.is_empty() {
        return Err(RelayError::validation("file_id", "file id must not be empty"));
    }
    Ok(id)
}
