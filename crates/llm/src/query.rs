use crate::backend::UsageMetadata;
use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};

/// A text query, optionally grounded on uploaded files or an existing cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub prompt: String,
    /// Family or version id; ignored when a cache is given
    pub model: Option<String>,
    pub cache_id: Option<String>,
    pub file_ids: Vec<String>,
    pub system_prompt: Option<String>,
}

impl QueryRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_cache(mut self, cache_id: impl Into<String>) -> Self {
        self.cache_id = Some(cache_id.into());
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

    pub(crate) fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(RelayError::validation("prompt", "prompt must not be empty"));
        }
        let has_system_prompt = self
            .system_prompt
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty());
        if self.cache_id.is_some() && has_system_prompt {
            // The cached content carries its own system instruction.
            return Err(RelayError::validation(
                "system_prompt",
                "a system prompt cannot be combined with a cache",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub text: String,
    /// Version the request was sent to
    pub model: String,
    pub cache_id: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<UsageMetadata>,
}
