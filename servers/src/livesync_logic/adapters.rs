//! Simulated upstream services for the demo host. Each adapter answers after
//! a random latency; `admin-metrics` also fails now and then so the
//! keep-last-value path can be watched from the console.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use lib_livesync::{FeedId, SyncConfig, SyncCore};
use rand::Rng;
use serde_json::{Value, json};

const ADMIN_FAILURE_RATE: f64 = 0.1;

fn latency() -> Duration {
    Duration::from_millis(rand::rng().random_range(50..300))
}

async fn notifications(served: Arc<AtomicU64>, force: bool) -> Result<Value> {
    let delay = latency();
    tokio::time::sleep(delay).await;
    let serial = served.fetch_add(1, Ordering::Relaxed) + 1;
    let count = rand::rng().random_range(0..10u32);
    Ok(json!({
        "count": count,
        "latestId": serial,
        "forced": force,
    }))
}

async fn kids_progress(_force: bool) -> Result<Value> {
    let delay = latency();
    tokio::time::sleep(delay).await;
    let (ana, ben) = {
        let mut rng = rand::rng();
        (rng.random_range(0..=100u32), rng.random_range(0..=100u32))
    };
    Ok(json!({
        "kids": [
            { "name": "Ana", "lessonsCompleted": ana },
            { "name": "Ben", "lessonsCompleted": ben },
        ]
    }))
}

async fn admin_metrics(_force: bool) -> Result<Value> {
    let delay = latency();
    let (fail, cpu, users) = {
        let mut rng = rand::rng();
        (
            rng.random_bool(ADMIN_FAILURE_RATE),
            rng.random_range(0.0..100.0f64),
            rng.random_range(0..5_000u32),
        )
    };
    tokio::time::sleep(delay).await;
    if fail {
        bail!("metrics service returned 503");
    }
    Ok(json!({
        "cpuPercent": (cpu * 10.0).round() / 10.0,
        "activeUsers": users,
    }))
}

/// Registers an adapter for every feed in `config` this host knows how to
/// simulate. Returns the registered feeds.
pub fn register_all(core: &SyncCore, config: &SyncConfig) -> Result<Vec<FeedId>> {
    let mut registered = Vec::new();
    for feed in config.feed_names() {
        let timing = config.feed_config(feed.as_str())?;
        match feed.as_str() {
            "notifications" => {
                let served = Arc::new(AtomicU64::new(0));
                core.register_feed(&feed, timing, move |force: bool| {
                    notifications(Arc::clone(&served), force)
                })?;
            }
            "kids-progress" => core.register_feed(&feed, timing, kids_progress)?,
            "admin-metrics" => core.register_feed(&feed, timing, admin_metrics)?,
            other => {
                tracing::warn!(feed = other, "no simulated adapter for feed; skipping");
                continue;
            }
        }
        registered.push(feed);
    }
    if registered.is_empty() {
        bail!("no feeds to serve");
    }
    Ok(registered)
}
