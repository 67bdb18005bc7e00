mod config;
mod crawler;
mod storage;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use config::Config;
use crawler::fetcher::RealtClient;
use crawler::service::SyncService;
use storage::postgres::{ListingQuery, SortBy, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config::from_env()?;

    let storage = Storage::connect(&cfg.database_url).await?;
    let client = Arc::new(RealtClient::new(cfg.object_url_template.clone()));
    let service = SyncService::new(
        cfg,
        client.clone(),
        client,
        Arc::new(storage.clone()),
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let codes = service.run(cancel).await?;

    println!("\n==============================");
    println!("TOTAL LISTINGS STORED: {}", codes.len());
    println!("==============================\n");

    let query = ListingQuery {
        sort_by: SortBy::PriceUsd,
        descending: true,
        limit: 20,
        ..ListingQuery::default()
    };
    let (priciest, _) = storage.find(&query).await?;
    for listing in &priciest {
        println!(
            "{:>9}  {:>12}  {}",
            listing.code.unwrap_or_default(),
            listing
                .price_usd
                .map(|p| format!("{p} USD"))
                .unwrap_or_else(|| "-".to_string()),
            listing.title.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}
