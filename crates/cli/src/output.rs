use anyhow::Result;
use console::style;
use llm::{CacheInfo, FileInfo, ModelFamily, QueryResponse, ResolvedModel};
use serde::Serialize;

/// Renders command results either as JSON or as styled text
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    fn emit_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    pub fn models(&self, families: &[ModelFamily]) -> Result<()> {
        if self.json {
            return self.emit_json(families);
        }
        for family in families {
            let mut tags = Vec::new();
            if family.preferred_for_thinking {
                tags.push("thinking");
            }
            if family.preferred_for_caching {
                tags.push("caching");
            }
            if family.preferred_for_search {
                tags.push("search");
            }
            println!(
                "{} {} {}",
                style(&family.id).cyan().bold(),
                style(format!("({} tokens)", family.context_window)).dim(),
                if tags.is_empty() {
                    String::new()
                } else {
                    style(format!("preferred: {}", tags.join(", "))).green().to_string()
                }
            );
            if !family.description.is_empty() {
                println!("    {}", family.description);
            }
            for version in &family.versions {
                println!(
                    "    - {}{}{}",
                    version.id,
                    if version.is_preferred { " *" } else { "" },
                    if version.supports_caching {
                        style(" [cache]").yellow().to_string()
                    } else {
                        String::new()
                    }
                );
            }
        }
        Ok(())
    }

    pub fn resolved(&self, resolved: &ResolvedModel) -> Result<()> {
        if self.json {
            return self.emit_json(resolved);
        }
        println!("{} -> {}", resolved.requested, style(&resolved.version).cyan().bold());
        if let Some(family) = &resolved.family {
            println!("    family: {}", family.id);
        }
        if let Some(warning) = &resolved.warning {
            println!("    {}", style(warning).yellow());
        }
        Ok(())
    }

    pub fn file(&self, file: &FileInfo) -> Result<()> {
        if self.json {
            return self.emit_json(file);
        }
        println!(
            "{} {} {} bytes, {:?}",
            style(&file.id).cyan().bold(),
            file.mime_type,
            file.size_bytes,
            file.state
        );
        println!("    uri: {}", file.uri);
        println!("    expires: {}", file.expires_at.to_rfc3339());
        Ok(())
    }

    pub fn files(&self, files: &[FileInfo]) -> Result<()> {
        if self.json {
            return self.emit_json(files);
        }
        if files.is_empty() {
            println!("{}", style("no files").dim());
        }
        for file in files {
            println!(
                "{}  {:<32} {:<24} {:>10}  expires {}",
                style(&file.id).cyan(),
                file.display_name,
                file.mime_type,
                file.size_bytes,
                file.expires_at.format("%Y-%m-%d %H:%M")
            );
        }
        Ok(())
    }

    pub fn cache(&self, cache: &CacheInfo) -> Result<()> {
        if self.json {
            return self.emit_json(cache);
        }
        println!("{} {}", style(&cache.id).cyan().bold(), cache.display_name);
        println!("    model: {}", cache.model);
        if !cache.file_ids.is_empty() {
            println!("    files: {}", cache.file_ids.join(", "));
        }
        if let Some(tokens) = cache.token_count {
            println!("    tokens: {tokens}");
        }
        println!("    expires: {}", cache.expires_at.to_rfc3339());
        Ok(())
    }

    pub fn caches(&self, caches: &[CacheInfo]) -> Result<()> {
        if self.json {
            return self.emit_json(caches);
        }
        if caches.is_empty() {
            println!("{}", style("no caches").dim());
        }
        for cache in caches {
            println!(
                "{}  {:<32} {:<28} expires {}",
                style(&cache.id).cyan(),
                cache.display_name,
                cache.model,
                cache.expires_at.format("%Y-%m-%d %H:%M")
            );
        }
        Ok(())
    }

    pub fn deleted(&self, kind: &str, id: &str) -> Result<()> {
        if self.json {
            return self.emit_json(&serde_json::json!({ "deleted": kind, "id": id }));
        }
        println!("{} deleted {} {}", style("✓").green(), kind, id);
        Ok(())
    }

    pub fn answer(&self, response: &QueryResponse) -> Result<()> {
        if self.json {
            return self.emit_json(response);
        }
        println!("{}", response.text);
        if let Some(usage) = &response.usage {
            println!(
                "{}",
                style(format!(
                    "[{}] {} prompt / {} cached / {} output tokens",
                    response.model,
                    usage.prompt_token_count,
                    usage.cached_content_token_count,
                    usage.candidates_token_count
                ))
                .dim()
            );
        }
        Ok(())
    }
}
