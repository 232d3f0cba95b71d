use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use futures_util::future::join_all;
use lib_livesync::{
    FeedConfig, FeedId, FeedUpdated, LoggerLocalOptions, SubscribeOptions, SyncCore,
    VisibilityMonitor,
};
use serde_json::json;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Attach many subscribers to one feed at once", long_about = None)]
struct Args {
    /// Number of subscribers attaching simultaneously
    #[clap(short, long, default_value_t = 1000)]
    subscribers: usize,

    /// Number of concurrent refresh calls issued after the subscribers attach
    #[clap(short, long, default_value_t = 100)]
    refreshes: usize,

    /// Simulated adapter latency in milliseconds
    #[clap(short, long, default_value_t = 200)]
    latency_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = lib_livesync::init_tracing(
        "test_livesync_herd",
        &LoggerLocalOptions {
            level: "warn".to_string(),
            ..Default::default()
        },
    )?;

    let core = SyncCore::new(VisibilityMonitor::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let adapter_calls = Arc::clone(&calls);
    let latency = Duration::from_millis(args.latency_ms);
    core.register_feed(
        "notifications",
        FeedConfig::new(Duration::from_secs(30), Duration::from_secs(15)),
        move |_force: bool| {
            let n = adapter_calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                tokio::time::sleep(latency).await;
                Ok::<_, anyhow::Error>(json!({ "count": n }))
            }
        },
    )?;

    let delivered = Arc::new(AtomicUsize::new(0));
    let mut updates = core.updates();
    let started = Instant::now();
    for _ in 0..args.subscribers {
        let delivered = Arc::clone(&delivered);
        core.subscribe(
            "notifications",
            move |_: &FeedUpdated| {
                delivered.fetch_add(1, Ordering::Relaxed);
            },
            SubscribeOptions::default(),
        )?;
    }
    updates.recv().await?;
    let attach_elapsed = started.elapsed();

    let feed = FeedId::new("notifications");
    let refreshes = join_all((0..args.refreshes).map(|_| core.refresh(&feed, true))).await;
    let failed = refreshes.iter().filter(|result| result.is_err()).count();

    println!("subscribers:        {}", args.subscribers);
    println!("first value after:  {:?}", attach_elapsed);
    println!("deliveries:         {}", delivered.load(Ordering::Relaxed));
    println!("forced refreshes:   {} ({} failed)", args.refreshes, failed);
    println!("adapter calls:      {}", calls.load(Ordering::SeqCst));
    println!("status:             {}", serde_json::to_string(&core.status())?);

    core.shutdown();
    Ok(())
}
