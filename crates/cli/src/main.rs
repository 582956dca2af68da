use anyhow::Result;
use clap::{Parser, Subcommand};
use common::{init_structured_logging, LoggingConfig};
use llm::{CallContext, GeminiRelay, RelayConfig, TaskKind};
use std::time::Duration;
use tracing::Level;

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "gemrelay")]
#[command(about = "Gemini file, cache and model relay")]
#[command(version)]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Overall deadline for the command, in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List known model families
    Models {
        /// Only show the family preferred for this task (thinking, caching, search)
        #[arg(long)]
        task: Option<TaskKind>,
    },
    /// Resolve a family or version id to the callable version
    Resolve {
        model: String,
    },
    /// Upload a local file
    Upload {
        path: String,
        /// MIME type; guessed from the extension when omitted
        #[arg(long)]
        mime: Option<String>,
        #[arg(long)]
        display_name: Option<String>,
    },
    /// List uploaded files
    Files,
    /// Delete an uploaded file
    DeleteFile {
        id: String,
    },
    /// Create a cached context from files and/or text
    CacheCreate {
        #[arg(long)]
        model: Option<String>,
        /// File id to include (repeatable)
        #[arg(long = "file")]
        files: Vec<String>,
        /// Inline text to cache
        #[arg(long, conflicts_with = "content_file")]
        content: Option<String>,
        /// Read the inline text from a local file
        #[arg(long)]
        content_file: Option<String>,
        #[arg(long)]
        system: Option<String>,
        /// TTL such as 30m or 2h
        #[arg(long)]
        ttl: Option<String>,
        #[arg(long)]
        display_name: Option<String>,
    },
    /// List cached contexts
    Caches,
    /// Delete a cached context
    DeleteCache {
        id: String,
    },
    /// Send a prompt, optionally through a cache or with files attached
    Ask {
        prompt: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        cache: Option<String>,
        /// File id to attach (repeatable)
        #[arg(long = "file")]
        files: Vec<String>,
        #[arg(long)]
        system: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RelayConfig::from_env()?;

    init_structured_logging(LoggingConfig {
        level: if cli.verbose { Level::DEBUG } else { Level::WARN },
        json_output: config.log_json,
        ..LoggingConfig::default()
    })?;

    let ctx = match cli.timeout {
        Some(secs) => CallContext::with_timeout(Duration::from_secs(secs)),
        None => CallContext::background(),
    };
    let interrupt = ctx.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let relay = GeminiRelay::from_config(config)?;
    let out = output::Output::new(cli.json);

    match cli.command {
        Commands::Models { task } => commands::models(&relay, &ctx, &out, task).await,
        Commands::Resolve { model } => commands::resolve(&relay, &ctx, &out, &model).await,
        Commands::Upload {
            path,
            mime,
            display_name,
        } => commands::upload(&relay, &ctx, &out, &path, mime, display_name).await,
        Commands::Files => commands::files(&relay, &ctx, &out).await,
        Commands::DeleteFile { id } => commands::delete_file(&relay, &ctx, &out, &id).await,
        Commands::CacheCreate {
            model,
            files,
            content,
            content_file,
            system,
            ttl,
            display_name,
        } => {
            let request = commands::CacheArgs {
                model,
                files,
                content,
                content_file,
                system,
                ttl,
                display_name,
            };
            commands::cache_create(&relay, &ctx, &out, request).await
        }
        Commands::Caches => commands::caches(&relay, &ctx, &out).await,
        Commands::DeleteCache { id } => commands::delete_cache(&relay, &ctx, &out, &id).await,
        Commands::Ask {
            prompt,
            model,
            cache,
            files,
            system,
        } => commands::ask(&relay, &ctx, &out, prompt, model, cache, files, system).await,
    }
}
