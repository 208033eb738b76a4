//! Strategy command handlers.

use anyhow::{Context, Result};

use tokenwise::cache::request_kind;
use tokenwise::Config;

use super::StrategyAction;

/// Handle `tokenwise strategy` subcommands.
pub(crate) fn cmd_strategy(action: StrategyAction, config: Config) -> Result<()> {
    let registry = config
        .registry()
        .with_context(|| "Configured strategies are invalid")?;

    match action {
        StrategyAction::List => {
            println!(
                "{:<22} {:<8} {:>9} {:>8} {:>9} {:>8}",
                "Strategy", "Enabled", "Max age", "Size", "Threshold", "Priority"
            );
            println!("{}", "-".repeat(69));
            for s in registry.iter() {
                println!(
                    "{:<22} {:<8} {:>9} {:>8} {:>9.2} {:>8}",
                    s.id,
                    if s.enabled { "yes" } else { "no" },
                    format_age(s.max_age_secs),
                    s.max_size,
                    s.similarity_threshold,
                    s.priority
                );
            }
        }
        StrategyAction::Classify { text, context } => {
            let kind = request_kind::detect(&text);
            let cache = tokenwise::ResponseCache::new(config.cache.clone(), registry);
            match cache.classify(&text, &context) {
                Some(id) => println!("Request kind: {kind}\nStrategy:     {id}"),
                None => println!("Request kind: {kind}\nStrategy:     (none, would not be cached)"),
            }
        }
    }
    Ok(())
}

fn format_age(secs: u64) -> String {
    match secs {
        s if s >= 86_400 && s % 86_400 == 0 => format!("{}d", s / 86_400),
        s if s >= 3600 && s % 3600 == 0 => format!("{}h", s / 3600),
        s if s >= 60 && s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(12 * 3600), "12h");
        assert_eq!(format_age(7 * 86_400), "7d");
        assert_eq!(format_age(90), "90s");
        assert_eq!(format_age(120), "2m");
    }

    #[test]
    fn test_list_defaults_runs() {
        cmd_strategy(StrategyAction::List, Config::default()).unwrap();
    }
}
