use std::env;
use std::str::FromStr;

use anyhow::{bail, Context};

const DEFAULT_OBJECT_URL_TEMPLATE: &str = "https://realt.by/rent-flat-for-long/object/{code}/";

#[derive(Debug, Clone)]
pub struct Config {
    /// Base listing links, one crawl root each.
    pub links: Vec<String>,
    /// Detail-page URL template; must contain a `{code}` placeholder.
    pub object_url_template: String,
    pub page_concurrency: usize,
    pub detail_concurrency: usize,
    pub save_batch_size: usize,
    pub throttle_min_ms: u64,
    pub throttle_max_ms: u64,
    /// Skip rewriting a stored record whose `updated_at` matches the
    /// incoming one. Best-effort: an upstream edit that does not bump
    /// `updated_at` is skipped too.
    pub skip_unchanged: bool,
    pub database_url: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let links: Vec<String> = env::var("LINKS")
            .context("LINKS is not set")?
            .split(',')
            .map(str::trim)
            .filter(|link| !link.is_empty())
            .map(str::to_string)
            .collect();

        let object_url_template = env::var("OBJECT_URL_TEMPLATE")
            .unwrap_or_else(|_| DEFAULT_OBJECT_URL_TEMPLATE.to_string());
        if !object_url_template.contains("{code}") {
            bail!("OBJECT_URL_TEMPLATE must contain a {{code}} placeholder");
        }

        Ok(Self {
            links,
            object_url_template,
            page_concurrency: parse_or("PAGE_CONCURRENCY", 6)?,
            detail_concurrency: parse_or("DETAIL_CONCURRENCY", 32)?,
            save_batch_size: parse_or("SAVE_BATCH_SIZE", 400)?,
            throttle_min_ms: parse_or("THROTTLE_MIN_MS", 50)?,
            throttle_max_ms: parse_or("THROTTLE_MAX_MS", 150)?,
            skip_unchanged: parse_or("SKIP_UNCHANGED", true)?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL is not set")?,
        })
    }

    /// Randomized pre-fetch delay bounds in milliseconds; a zero bound
    /// disables throttling.
    pub fn throttle(&self) -> Option<(u64, u64)> {
        if self.throttle_min_ms == 0 || self.throttle_max_ms == 0 {
            return None;
        }
        let min = self.throttle_min_ms.min(self.throttle_max_ms);
        let max = self.throttle_min_ms.max(self.throttle_max_ms);
        Some((min, max))
    }
}

fn parse_or<T: FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid {name}")),
        Err(_) => Ok(default),
    }
}
