use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use rand::Rng;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::crawler::models::{merge, Listing};
use crate::crawler::{self, ListingPageProvider, ObjectProvider};
use crate::storage::ListingStore;

const MIN_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct FetchCounters {
    attempted: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Runs one crawl-and-synchronize pass: code discovery, concurrent detail
/// fetching bridged into batched storage writes, then the delete sweep.
pub struct SyncService {
    cfg: Config,
    pages: Arc<dyn ListingPageProvider>,
    objects: Arc<dyn ObjectProvider>,
    store: Arc<dyn ListingStore>,
}

impl SyncService {
    pub fn new(
        cfg: Config,
        pages: Arc<dyn ListingPageProvider>,
        objects: Arc<dyn ObjectProvider>,
        store: Arc<dyn ListingStore>,
    ) -> Self {
        Self {
            cfg,
            pages,
            objects,
            store,
        }
    }

    /// Returns all stored codes after reconciliation, most recently touched
    /// first.
    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<Vec<i32>> {
        if self.cfg.links.iter().all(|link| link.trim().is_empty()) {
            bail!("no usable base links configured");
        }

        let codes = crawler::collect_codes(
            self.pages.clone(),
            &self.cfg.links,
            self.cfg.page_concurrency,
            &cancel,
        )
        .await?;
        info!(count = codes.len(), "collected unique codes from listings");

        if codes.is_empty() {
            // deleting everything on an upstream outage is never correct
            warn!("no codes discovered, skipping reconciliation");
            return self.store.all_codes().await;
        }

        let capacity = (2 * self.cfg.detail_concurrency).max(MIN_CHANNEL_CAPACITY);
        let (tx, rx) = mpsc::channel::<Listing>(capacity);

        let consumer = tokio::spawn(consume(
            rx,
            self.store.clone(),
            self.cfg.save_batch_size,
            self.cfg.skip_unchanged,
        ));

        let counters = Arc::new(FetchCounters::default());
        let semaphore = Arc::new(Semaphore::new(self.cfg.detail_concurrency.max(1)));
        let throttle = self.cfg.throttle();

        let mut workers = JoinSet::new();
        for code in codes.iter().copied() {
            if cancel.is_cancelled() {
                break;
            }
            let permit = semaphore.clone().acquire_owned().await?;
            let objects = self.objects.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            let counters = counters.clone();
            workers.spawn(async move {
                let _permit = permit;
                counters.attempted.fetch_add(1, Ordering::Relaxed);
                let work = async {
                    if let Some((min, max)) = throttle {
                        let delay = rand::rng().random_range(min..=max);
                        sleep(Duration::from_millis(delay)).await;
                    }
                    let Some(listing) = objects.fetch_object(code).await else {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        return;
                    };
                    if listing.code.is_none() {
                        warn!(code, "decoded object carries no code, dropping");
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    // blocks under backpressure when the consumer lags
                    if tx.send(listing).await.is_err() {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    counters.succeeded.fetch_add(1, Ordering::Relaxed);
                };
                tokio::select! {
                    _ = cancel.cancelled() => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                    }
                    _ = work => {}
                }
            });
        }
        drop(tx);
        while workers.join_next().await.is_some() {}

        let stats = consumer.await??;

        info!(
            attempted = counters.attempted.load(Ordering::Relaxed),
            succeeded = counters.succeeded.load(Ordering::Relaxed),
            failed = counters.failed.load(Ordering::Relaxed),
            inserted = stats.inserted,
            updated = stats.updated,
            skipped = stats.skipped,
            "detail pipeline finished"
        );

        if cancel.is_cancelled() {
            bail!("crawl run cancelled");
        }

        // one sweep per run, keyed on the discovered set: a code whose detail
        // fetch failed was still seen upstream and must not be deleted
        let doomed = self.store.codes_absent_from(&codes).await?;
        if !doomed.is_empty() {
            info!(count = doomed.len(), codes = ?doomed, "deleting records absent from this run");
            let deleted = self.store.delete_by_codes(&doomed).await?;
            info!(deleted, "delete sweep finished");
        }

        self.store.all_codes().await
    }
}

/// Drains the hand-off queue into fixed-size batches and flushes each one.
/// The final partial batch flushes when the channel closes.
async fn consume(
    mut rx: mpsc::Receiver<Listing>,
    store: Arc<dyn ListingStore>,
    batch_size: usize,
    skip_unchanged: bool,
) -> anyhow::Result<WriteStats> {
    let batch_size = batch_size.max(1);
    let mut stats = WriteStats::default();
    let mut batch: Vec<Listing> = Vec::with_capacity(batch_size);

    while let Some(listing) = rx.recv().await {
        batch.push(listing);
        if batch.len() >= batch_size {
            flush(&*store, &mut batch, skip_unchanged, &mut stats).await?;
        }
    }
    if !batch.is_empty() {
        flush(&*store, &mut batch, skip_unchanged, &mut stats).await?;
    }

    Ok(stats)
}

async fn flush(
    store: &dyn ListingStore,
    batch: &mut Vec<Listing>,
    skip_unchanged: bool,
    stats: &mut WriteStats,
) -> anyhow::Result<()> {
    // last record per code wins; codeless records never reach the writer
    let mut by_code: HashMap<i32, Listing> = HashMap::new();
    for listing in batch.drain(..) {
        if let Some(code) = listing.code {
            by_code.insert(code, listing);
        }
    }
    if by_code.is_empty() {
        return Ok(());
    }

    let codes: Vec<i32> = by_code.keys().copied().collect();
    let existing: HashMap<i32, Listing> = store
        .load_by_codes(&codes)
        .await?
        .into_iter()
        .filter_map(|listing| listing.code.map(|code| (code, listing)))
        .collect();

    let mut inserts = Vec::new();
    let mut updates = Vec::new();
    for (code, incoming) in by_code {
        match existing.get(&code) {
            Some(stored) => {
                if skip_unchanged
                    && incoming.updated_at.is_some()
                    && stored.updated_at.is_some()
                    && incoming.updated_at == stored.updated_at
                {
                    stats.skipped += 1;
                    continue;
                }
                debug!(code, "updating stored listing");
                updates.push(merge(stored, &incoming));
            }
            None => {
                debug!(code, "inserting new listing");
                inserts.push(incoming);
            }
        }
    }

    stats.inserted += inserts.len();
    stats.updated += updates.len();
    store.write_batch(&inserts, &updates).await?;

    Ok(())
}
