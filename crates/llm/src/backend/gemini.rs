use super::{
    cache_resource_name, file_resource_name, model_resource_name, CreateCachedContentRequest,
    FileUpload, GenerateContentRequest, GenerateContentResponse, GenerativeBackend,
    RemoteCachedContent, RemoteFile, RemoteModel,
};
use crate::error::{RelayError, ResourceKind, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

pub const GEMINI_DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const API_KEY_HEADER: &str = "x-goog-api-key";
const LIST_PAGE_SIZE: &str = "100";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Gemini REST implementation of [`GenerativeBackend`].
///
/// Transport only: no retries here, the stores wrap each call in the retry
/// executor.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    api_key: String,
    base_url: String,
    client: Client,
    timeout: Duration,
}

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RelayError::Configuration(
                "Gemini API key cannot be empty".to_string(),
            ));
        }
        let timeout = DEFAULT_REQUEST_TIMEOUT;
        Ok(Self {
            api_key,
            base_url: GEMINI_DEFAULT_BASE_URL.to_string(),
            client: build_client(timeout)?,
            timeout,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let trimmed = base_url.trim().trim_end_matches('/');
        if !trimmed.is_empty() {
            self.base_url = trimmed.to_string();
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = build_client(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/v1beta/{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(API_KEY_HEADER, &self.api_key)
    }

    async fn send(
        &self,
        request: RequestBuilder,
        missing: Option<(ResourceKind, &str)>,
    ) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(RelayError::from_reqwest_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 404 {
            if let Some((kind, id)) = missing {
                return Err(RelayError::not_found(kind, id));
            }
        }
        Err(RelayError::Api {
            status: status.as_u16(),
            message: extract_error_message(&body),
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        missing: Option<(ResourceKind, &str)>,
    ) -> Result<T> {
        let response = self.send(request, missing).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RelayError::Decode(e.to_string()))
    }

    async fn list_all<P>(&self, path: &str) -> Result<Vec<P::Item>>
    where
        P: Page + DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .get(self.api_url(path))
                .query(&[("pageSize", LIST_PAGE_SIZE)]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let page: P = self.send_json(request, None).await?;
            let (mut page_items, next) = page.into_parts();
            items.append(&mut page_items);
            match next.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        debug!(path, count = items.len(), "listed Gemini resources");
        Ok(items)
    }
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RelayError::Configuration(format!("Failed to create HTTP client: {e}")))
}

/// Body for a single-request `multipart/related` media upload.
fn multipart_related_body(upload: &FileUpload, boundary: &str) -> Vec<u8> {
    let metadata = serde_json::json!({ "file": { "displayName": upload.display_name } });
    let mut body = Vec::with_capacity(upload.content.len() + 512);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: {}\r\n\r\n", upload.mime_type).as_bytes(),
    );
    body.extend_from_slice(&upload.content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[async_trait]
impl GenerativeBackend for GeminiBackend {
    async fn upload_file(&self, upload: FileUpload) -> Result<RemoteFile> {
        let boundary = format!("gemrelay-{}", Uuid::new_v4().simple());
        let body = multipart_related_body(&upload, &boundary);
        let request = self
            .client
            .post(format!(
                "{}/upload/v1beta/files?uploadType=multipart",
                self.base_url
            ))
            .header("X-Goog-Upload-Protocol", "multipart")
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body);

        let response: UploadFileResponse = self.send_json(request, None).await?;
        Ok(response.file)
    }

    async fn get_file(&self, name: &str) -> Result<RemoteFile> {
        let name = file_resource_name(name);
        let request = self.client.get(self.api_url(&name));
        self.send_json(request, Some((ResourceKind::File, &name)))
            .await
    }

    async fn delete_file(&self, name: &str) -> Result<()> {
        let name = file_resource_name(name);
        let request = self.client.delete(self.api_url(&name));
        self.send(request, Some((ResourceKind::File, &name))).await?;
        Ok(())
    }

    async fn list_files(&self) -> Result<Vec<RemoteFile>> {
        self.list_all::<ListFilesResponse>("files").await
    }

    async fn create_cached_content(
        &self,
        request: CreateCachedContentRequest,
    ) -> Result<RemoteCachedContent> {
        let http = self
            .client
            .post(self.api_url("cachedContents"))
            .json(&request);
        self.send_json(http, None).await
    }

    async fn get_cached_content(&self, name: &str) -> Result<RemoteCachedContent> {
        let name = cache_resource_name(name);
        let request = self.client.get(self.api_url(&name));
        self.send_json(request, Some((ResourceKind::Cache, &name)))
            .await
    }

    async fn delete_cached_content(&self, name: &str) -> Result<()> {
        let name = cache_resource_name(name);
        let request = self.client.delete(self.api_url(&name));
        self.send(request, Some((ResourceKind::Cache, &name)))
            .await?;
        Ok(())
    }

    async fn list_cached_contents(&self) -> Result<Vec<RemoteCachedContent>> {
        self.list_all::<ListCachedContentsResponse>("cachedContents")
            .await
    }

    async fn list_models(&self) -> Result<Vec<RemoteModel>> {
        self.list_all::<ListModelsResponse>("models").await
    }

    async fn generate_content(
        &self,
        model: &str,
        request: GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        let model = model_resource_name(model);
        let http = self
            .client
            .post(self.api_url(&format!("{model}:generateContent")))
            .json(&request);
        self.send_json(http, Some((ResourceKind::Model, &model)))
            .await
    }
}

trait Page {
    type Item;

    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

#[derive(Debug, Deserialize)]
struct UploadFileResponse {
    file: RemoteFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFilesResponse {
    #[serde(default)]
    files: Vec<RemoteFile>,
    next_page_token: Option<String>,
}

impl Page for ListFilesResponse {
    type Item = RemoteFile;

    fn into_parts(self) -> (Vec<RemoteFile>, Option<String>) {
        (self.files, self.next_page_token)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListCachedContentsResponse {
    #[serde(default)]
    cached_contents: Vec<RemoteCachedContent>,
    next_page_token: Option<String>,
}

impl Page for ListCachedContentsResponse {
    type Item = RemoteCachedContent;

    fn into_parts(self) -> (Vec<RemoteCachedContent>, Option<String>) {
        (self.cached_contents, self.next_page_token)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<RemoteModel>,
    next_page_token: Option<String>,
}

impl Page for ListModelsResponse {
    type Item = RemoteModel;

    fn into_parts(self) -> (Vec<RemoteModel>, Option<String>) {
        (self.models, self.next_page_token)
    }
}

#[derive(Debug, Deserialize)]
struct GeminiErrorEnvelope {
    error: Option<GeminiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    message: Option<String>,
    status: Option<String>,
}

fn extract_error_message(body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<GeminiErrorEnvelope>(body) {
        if let Some(error) = envelope.error {
            match (error.status, error.message) {
                (Some(status), Some(message)) => return format!("{status}: {message}"),
                (None, Some(message)) => return message,
                (Some(status), None) => return status,
                (None, None) => {}
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty error response from Gemini".to_string()
    } else {
        truncate_message(trimmed)
    }
}

fn truncate_message(message: &str) -> String {
    const MAX_LEN: usize = 512;
    if message.chars().count() <= MAX_LEN {
        return message.to_string();
    }
    let prefix: String = message.chars().take(MAX_LEN).collect();
    format!("{prefix}...")
}
