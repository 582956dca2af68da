use crate::output::Output;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use llm::{
    CallContext, CreateCacheRequest, GeminiRelay, QueryRequest, TaskKind, UploadRequest,
};
use std::path::Path;
use std::time::Duration;

pub struct CacheArgs {
    pub model: Option<String>,
    pub files: Vec<String>,
    pub content: Option<String>,
    pub content_file: Option<String>,
    pub system: Option<String>,
    pub ttl: Option<String>,
    pub display_name: Option<String>,
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
            .template("{spinner:.cyan} {msg}")?,
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    Ok(spinner)
}

/// Model listing reads the catalog only, so refresh it first.
pub async fn models(
    relay: &GeminiRelay,
    ctx: &CallContext,
    out: &Output,
    task: Option<TaskKind>,
) -> Result<()> {
    relay.bootstrap(ctx).await;
    let families = match task {
        Some(task) => relay.catalog().select_preferred_for(task).into_iter().collect(),
        None => relay.list_models(),
    };
    out.models(&families)
}

pub async fn resolve(relay: &GeminiRelay, ctx: &CallContext, out: &Output, model: &str) -> Result<()> {
    relay.bootstrap(ctx).await;
    out.resolved(&relay.resolve_model(Some(model)))
}

pub async fn upload(
    relay: &GeminiRelay,
    ctx: &CallContext,
    out: &Output,
    path: &str,
    mime: Option<String>,
    display_name: Option<String>,
) -> Result<()> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {path}"))?;
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());
    let mime = mime.unwrap_or_else(|| guess_mime(path).to_string());

    let mut request = UploadRequest::new(name, mime, content);
    if let Some(display_name) = display_name {
        request = request.with_display_name(display_name);
    }

    let progress = spinner("Uploading...")?;
    let result = relay.upload_file(ctx, request).await;
    progress.finish_and_clear();
    out.file(&result?)
}

pub async fn files(relay: &GeminiRelay, ctx: &CallContext, out: &Output) -> Result<()> {
    out.files(&relay.list_files(ctx).await?)
}

pub async fn delete_file(relay: &GeminiRelay, ctx: &CallContext, out: &Output, id: &str) -> Result<()> {
    relay.delete_file(ctx, id).await?;
    out.deleted("file", id)
}

pub async fn cache_create(
    relay: &GeminiRelay,
    ctx: &CallContext,
    out: &Output,
    args: CacheArgs,
) -> Result<()> {
    relay.bootstrap(ctx).await;

    let content = match args.content_file {
        Some(path) => Some(
            tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {path}"))?,
        ),
        None => args.content,
    };
    let model = args
        .model
        .or_else(|| relay.select_model_for(TaskKind::Caching))
        .unwrap_or_else(|| relay.config().default_model.clone());

    let request = CreateCacheRequest {
        model,
        display_name: args.display_name,
        system_prompt: args.system,
        content,
        file_ids: args.files,
        ttl: args.ttl,
    };

    let progress = spinner("Creating cache...")?;
    let result = relay.create_cache(ctx, request).await;
    progress.finish_and_clear();
    out.cache(&result?)
}

pub async fn caches(relay: &GeminiRelay, ctx: &CallContext, out: &Output) -> Result<()> {
    out.caches(&relay.list_caches(ctx).await?)
}

pub async fn delete_cache(relay: &GeminiRelay, ctx: &CallContext, out: &Output, id: &str) -> Result<()> {
    relay.delete_cache(ctx, id).await?;
    out.deleted("cache", id)
}

#[allow(clippy::too_many_arguments)]
pub async fn ask(
    relay: &GeminiRelay,
    ctx: &CallContext,
    out: &Output,
    prompt: String,
    model: Option<String>,
    cache: Option<String>,
    files: Vec<String>,
    system: Option<String>,
) -> Result<()> {
    relay.bootstrap(ctx).await;

    let request = QueryRequest {
        prompt,
        model,
        cache_id: cache,
        file_ids: files,
        system_prompt: system,
    };

    let progress = spinner("Thinking...")?;
    let result = relay.query(ctx, request).await;
    progress.finish_and_clear();
    out.answer(&result?)
}

/// Extension-based MIME guess for the formats Gemini accepts most often.
fn guess_mime(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "py" => "text/x-python",
        "rs" => "text/x-rust",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime("report.PDF"), "application/pdf");
        assert_eq!(guess_mime("notes/readme.md"), "text/markdown");
        assert_eq!(guess_mime("archive"), "application/octet-stream");
    }
}
