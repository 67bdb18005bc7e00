use std::collections::HashSet;

use async_trait::async_trait;

use crate::crawler::models::Listing;

pub mod postgres;

/// Storage seam for the reconciliation writer. The crawl pipeline only ever
/// touches storage through this trait, from a single consumer task.
#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Bulk-loads stored records whose code is in `codes`.
    async fn load_by_codes(&self, codes: &[i32]) -> anyhow::Result<Vec<Listing>>;

    /// Commits a batch's inserts and updates as one write operation.
    /// Updates are matched by code; `id` is never touched.
    async fn write_batch(&self, inserts: &[Listing], updates: &[Listing]) -> anyhow::Result<()>;

    /// Stored codes that are absent from `keep` — the delete-sweep candidates.
    async fn codes_absent_from(&self, keep: &HashSet<i32>) -> anyhow::Result<Vec<i32>>;

    /// Bulk-deletes stored records by code, returning the number removed.
    async fn delete_by_codes(&self, codes: &[i32]) -> anyhow::Result<u64>;

    /// All stored codes, most recently touched first.
    async fn all_codes(&self) -> anyhow::Result<Vec<i32>>;
}
