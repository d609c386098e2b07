//! Shared fixtures for the end-to-end tests

use civicpulse::core::config::Config;
use civicpulse::core::context::CoreContext;
use civicpulse::core::db::Store;
use civicpulse::core::executor::ExecutorPool;
use civicpulse::core::progress::ProgressTracker;
use civicpulse::core::registry::ScraperRegistry;
use civicpulse::core::scrapers::rate_limiter::RateLimiter;
use civicpulse::core::scrapers::Scraper;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A scraper directory on disk, with or without an entry-point file
pub struct ScraperDir<'a> {
    pub id: &'a str,
    pub category: &'a str,
    pub kind: &'a str,
    pub code: &'a str,
    pub name: &'a str,
    /// `endpoints.json` contents; None leaves the entry point missing
    pub endpoints: Option<String>,
}

pub fn write_scraper_dir(root: &Path, scraper: &ScraperDir<'_>) {
    let dir = root.join(scraper.id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("scraper.json"),
        format!(
            r#"{{
                "id": "{}",
                "category": "{}",
                "jurisdiction": {{"code": "{}", "kind": "{}", "name": "{}"}},
                "timeout_seconds": 60,
                "capabilities": {{"representatives": true}},
                "schedule": "manual"
            }}"#,
            scraper.id, scraper.category, scraper.code, scraper.kind, scraper.name
        ),
    )
    .unwrap();
    if let Some(endpoints) = &scraper.endpoints {
        std::fs::write(dir.join("endpoints.json"), endpoints).unwrap();
    }
}

pub struct Harness {
    pub ctx: CoreContext,
    pub pool: ExecutorPool,
    pub registry: Arc<ScraperRegistry>,
    pub _scrapers_dir: tempfile::TempDir,
    pub _progress_dir: tempfile::TempDir,
}

/// Build the full stack over a set of scraper directories and optional
/// in-process bindings
pub async fn harness(
    scrapers: &[ScraperDir<'_>],
    bindings: HashMap<String, Arc<dyn Scraper>>,
) -> Harness {
    let scrapers_dir = tempfile::tempdir().unwrap();
    let progress_dir = tempfile::tempdir().unwrap();

    for scraper in scrapers {
        write_scraper_dir(scrapers_dir.path(), scraper);
    }

    let store = Store::connect_memory().await.unwrap();
    store.migrate().await.unwrap();

    let limiter = RateLimiter::new(1_000.0, 100);
    let registry =
        Arc::new(ScraperRegistry::load(scrapers_dir.path(), &limiter, bindings).unwrap());
    for jurisdiction in registry.jurisdictions() {
        store.upsert_jurisdiction(&jurisdiction).await.unwrap();
    }
    store.insert_issues(registry.load_issues()).await.unwrap();

    let tracker = Arc::new(ProgressTracker::new(progress_dir.path(), store.clone()).unwrap());
    let ctx = CoreContext::new(
        Arc::new(Config::default()),
        store,
        registry.clone(),
        tracker,
        limiter,
    );
    let pool = ExecutorPool::start(ctx.clone());

    Harness {
        ctx,
        pool,
        registry,
        _scrapers_dir: scrapers_dir,
        _progress_dir: progress_dir,
    }
}
