use std::collections::HashSet;
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod fetcher;
pub mod models;
pub mod parser;
pub mod service;

use crate::crawler::models::{Listing, ListingsPage};

/// Item count of every listing page after the first. Page 1 is larger and
/// its actual item count is read from the response instead.
pub const OTHER_PAGES_SIZE: u32 = 30;

#[async_trait]
pub trait ListingPageProvider: Send + Sync {
    /// Fetches one listing-index page. Transport and parse failures are
    /// recoverable and come back as `None`.
    async fn fetch_page(&self, base_link: &str, page: u32) -> Option<ListingsPage>;
}

#[async_trait]
pub trait ObjectProvider: Send + Sync {
    /// Fetches and decodes one object page by its listing code. Transport
    /// and parse failures are recoverable and come back as `None`.
    async fn fetch_object(&self, code: i32) -> Option<Listing>;
}

/// Pages still to fetch after page 1, given the reported total.
pub fn additional_pages(total_count: i32, first_page_len: usize) -> u32 {
    let first = first_page_len as i32;
    if total_count <= first {
        return 0;
    }
    ((total_count - first) as u32).div_ceil(OTHER_PAGES_SIZE)
}

/// Walks every configured base link and accumulates the deduplicated set of
/// listing codes. Page 1 drives the page count per link; pages 2..=N are
/// fetched under `page_concurrency`. A failed first page skips the link,
/// a failed later page only loses that page's codes for this run.
pub async fn collect_codes(
    provider: Arc<dyn ListingPageProvider>,
    links: &[String],
    page_concurrency: usize,
    cancel: &CancellationToken,
) -> anyhow::Result<HashSet<i32>> {
    let mut codes = HashSet::new();
    let semaphore = Arc::new(Semaphore::new(page_concurrency.max(1)));
    let mut seen_links = HashSet::new();

    for link in links {
        let link = link.trim();
        if link.is_empty() || !seen_links.insert(link) {
            continue;
        }
        if cancel.is_cancelled() {
            bail!("code discovery cancelled");
        }

        let first = tokio::select! {
            _ = cancel.cancelled() => bail!("code discovery cancelled"),
            page = provider.fetch_page(link, 1) => page,
        };
        let Some(first) = first else {
            warn!(link, "first listings page unavailable, skipping link");
            continue;
        };
        add_codes(&mut codes, &first.items);

        let more = additional_pages(first.pagination.total_count, first.items.len());
        if more == 0 {
            debug!(link, "single page covers the link");
            continue;
        }
        info!(
            link,
            total = first.pagination.total_count,
            pages = 1 + more,
            "paginating listings"
        );

        let mut workers = JoinSet::new();
        for page in 2..=(1 + more) {
            if cancel.is_cancelled() {
                break;
            }
            let permit = semaphore.clone().acquire_owned().await?;
            let provider = provider.clone();
            let link = link.to_string();
            let cancel = cancel.clone();
            workers.spawn(async move {
                let _permit = permit;
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    page = provider.fetch_page(&link, page) => page,
                }
            });
        }
        while let Some(joined) = workers.join_next().await {
            if let Ok(Some(page)) = joined {
                add_codes(&mut codes, &page.items);
            }
        }
        if cancel.is_cancelled() {
            bail!("code discovery cancelled");
        }
    }

    Ok(codes)
}

fn add_codes(codes: &mut HashSet<i32>, items: &[Listing]) {
    codes.extend(items.iter().filter_map(|item| item.code));
}
