//! Cache command handlers.

use std::path::PathBuf;

use anyhow::{Context, Result};

use tokenwise::cache::{StoreOptions, StoreOutcome};
use tokenwise::{Config, Engine};

use super::CacheAction;

/// Handle `tokenwise cache` subcommands.
pub(crate) async fn cmd_cache(action: CacheAction, config: Config) -> Result<()> {
    let engine = Engine::start(config)
        .await
        .with_context(|| "Failed to start cache engine")?;
    let cache = engine.cache();

    match action {
        CacheAction::Stats { json } => {
            let stats = cache.stats();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }
            println!("Entries:        {}", stats.total_entries);
            println!("Indexed words:  {}", stats.indexed_words);
            println!("Hits:           {}", stats.total_hits);
            println!("Tokens saved:   {}", stats.total_tokens_saved);
            if !stats.per_strategy.is_empty() {
                println!();
                println!("{:<24} {:>8}", "Strategy", "Entries");
                println!("{}", "-".repeat(33));
                for (strategy, count) in &stats.per_strategy {
                    println!("{:<24} {:>8}", strategy, count);
                }
            }
        }
        CacheAction::Lookup {
            prompt,
            context,
            tags,
        } => {
            let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
            match cache.lookup(&prompt, &context, &tags) {
                Some(hit) => {
                    println!(
                        "{} hit ({:.2}, strategy {}, ~{} tokens saved)",
                        match hit.kind {
                            tokenwise::cache::HitKind::Exact => "Exact",
                            tokenwise::cache::HitKind::Approximate => "Approximate",
                        },
                        hit.confidence,
                        hit.strategy_id,
                        hit.tokens_saved
                    );
                    println!("{}", hit.response);
                }
                None => println!("No cached response."),
            }
            // Hit counts changed.
            engine.shutdown().await?;
        }
        CacheAction::Store {
            prompt,
            response,
            context,
            tags,
            tokens,
        } => {
            let mut options = StoreOptions::default()
                .with_context(context)
                .with_tags(tags);
            if let Some(tokens) = tokens {
                options = options.with_tokens_saved(tokens);
            }
            match cache.store(&prompt, &response, options) {
                StoreOutcome::Stored { key, strategy_id } => {
                    println!("Stored under {} ({})", &key[..12.min(key.len())], strategy_id);
                    engine.shutdown().await?;
                }
                StoreOutcome::Rejected => {
                    println!("Not cached: no strategy admits this request.");
                }
                StoreOutcome::Disabled => {
                    println!("Not cached: the cache is disabled.");
                }
            }
        }
        CacheAction::Clear => {
            let removed = cache.clear();
            engine.shutdown().await?;
            println!("Removed {} entries.", removed);
        }
        CacheAction::Prune => {
            let removed = cache.sweep();
            engine.shutdown().await?;
            println!("Evicted {} entries.", removed);
        }
        CacheAction::Export { output } => {
            let json = serde_json::to_string_pretty(&cache.entries())?;
            write_output(output, &json)?;
        }
    }

    Ok(())
}

fn write_output(output: Option<PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(&path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}
