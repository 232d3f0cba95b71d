use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::{json, Value};
use tokio::time::{advance, sleep};

use lib_livesync::{
    FeedConfig, FeedFetcher, FeedId, FeedUpdated, PageState, SubscribeOptions, SyncConfig,
    SyncCore, SyncError, VisibilityMonitor,
};

/// Adapter that counts its calls and answers `{"count": <call number>}` after `delay`.
fn counting(calls: &Arc<AtomicUsize>, delay: Duration) -> impl FeedFetcher {
    let calls = Arc::clone(calls);
    move |_force: bool| {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            Ok::<_, anyhow::Error>(json!({ "count": n }))
        }
    }
}

fn recorder() -> (Arc<Mutex<Vec<FeedUpdated>>>, impl Fn(&FeedUpdated) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |update: &FeedUpdated| {
        sink.lock().unwrap().push(update.clone())
    })
}

fn calls(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

fn timing(poll_ms: u64, lifetime_ms: u64) -> FeedConfig {
    FeedConfig::new(Duration::from_millis(poll_ms), Duration::from_millis(lifetime_ms))
}

fn quiet() -> SubscribeOptions {
    SubscribeOptions::new().with_immediate(false)
}

#[tokio::test(start_paused = true)]
async fn concurrent_refreshes_share_one_fetch() {
    let core = SyncCore::new(VisibilityMonitor::default());
    let counter = Arc::new(AtomicUsize::new(0));
    core.register_feed(
        "notifications",
        timing(30_000, 15_000),
        counting(&counter, Duration::from_millis(50)),
    )
    .unwrap();

    let feed = FeedId::new("notifications");
    let results = join_all((0..10).map(|_| core.refresh(&feed, false))).await;

    assert_eq!(calls(&counter), 1);
    for result in results {
        assert_eq!(*result.unwrap(), json!({ "count": 1 }));
    }
    assert!(core.status().in_flight.is_empty());
}

#[tokio::test(start_paused = true)]
async fn simultaneous_subscribers_share_one_fetch() {
    let core = SyncCore::new(VisibilityMonitor::default());
    let counter = Arc::new(AtomicUsize::new(0));
    core.register_feed(
        "kids-progress",
        timing(60_000, 30_000),
        counting(&counter, Duration::from_millis(50)),
    )
    .unwrap();

    let mut updates = core.updates();
    let recorders: Vec<_> = (0..5)
        .map(|_| {
            let (seen, callback) = recorder();
            core.subscribe("kids-progress", callback, SubscribeOptions::default())
                .unwrap();
            seen
        })
        .collect();

    assert_eq!(core.status().in_flight, vec![FeedId::new("kids-progress")]);
    updates.recv().await.unwrap();

    assert_eq!(calls(&counter), 1);
    for seen in recorders {
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn subscribe_delivers_first_value() {
    let core = SyncCore::new(VisibilityMonitor::default());
    core.register_feed("notifications", timing(30_000, 15_000), |_force: bool| async {
        Ok::<_, anyhow::Error>(json!({ "count": 3 }))
    })
    .unwrap();

    let mut updates = core.updates();
    let (seen, callback) = recorder();
    core.subscribe("notifications", callback, SubscribeOptions::default())
        .unwrap();

    let event = updates.recv().await.unwrap();
    assert_eq!(event.feed.as_str(), "notifications");
    assert!(!event.stale);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(*seen[0].value, json!({ "count": 3 }));
    assert_eq!(
        core.get_cached_data(&FeedId::new("notifications")).as_deref(),
        Some(&json!({ "count": 3 }))
    );
}

#[tokio::test(start_paused = true)]
async fn cache_is_fresh_until_lifetime_elapses() {
    let core = SyncCore::new(VisibilityMonitor::default());
    let counter = Arc::new(AtomicUsize::new(0));
    core.register_feed(
        "notifications",
        timing(30_000, 15_000),
        counting(&counter, Duration::ZERO),
    )
    .unwrap();
    let feed = FeedId::new("notifications");

    core.refresh(&feed, false).await.unwrap();
    assert_eq!(calls(&counter), 1);

    advance(Duration::from_millis(14_999)).await;
    assert_eq!(*core.refresh(&feed, false).await.unwrap(), json!({ "count": 1 }));
    assert_eq!(calls(&counter), 1);

    advance(Duration::from_millis(1)).await;
    assert!(core.get_cached_data(&feed).is_none());
    assert_eq!(*core.refresh(&feed, false).await.unwrap(), json!({ "count": 2 }));
    assert_eq!(calls(&counter), 2);
}

#[tokio::test(start_paused = true)]
async fn active_feed_polls_every_interval() {
    let core = SyncCore::new(VisibilityMonitor::default());
    let counter = Arc::new(AtomicUsize::new(0));
    core.register_feed("notifications", timing(1_000, 500), counting(&counter, Duration::ZERO))
        .unwrap();

    core.subscribe("notifications", |_: &FeedUpdated| {}, SubscribeOptions::default())
        .unwrap();
    sleep(Duration::from_millis(3_500)).await;

    // Immediate fetch plus one per tick.
    assert_eq!(calls(&counter), 4);
}

#[tokio::test(start_paused = true)]
async fn long_lifetime_ticks_rebroadcast_cached_value() {
    let core = SyncCore::new(VisibilityMonitor::default());
    let counter = Arc::new(AtomicUsize::new(0));
    core.register_feed("slow", timing(1_000, 10_000), counting(&counter, Duration::ZERO))
        .unwrap();

    let (seen, callback) = recorder();
    core.subscribe("slow", callback, SubscribeOptions::default()).unwrap();
    sleep(Duration::from_millis(3_500)).await;

    assert_eq!(calls(&counter), 1);
    assert_eq!(seen.lock().unwrap().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn hidden_page_suppresses_polling_until_shown() {
    let monitor = VisibilityMonitor::new(PageState {
        visible: false,
        focused: true,
    });
    let core = SyncCore::new(monitor.clone());
    let counter = Arc::new(AtomicUsize::new(0));
    core.register_feed("notifications", timing(1_000, 500), counting(&counter, Duration::ZERO))
        .unwrap();

    core.subscribe("notifications", |_: &FeedUpdated| {}, quiet()).unwrap();
    sleep(Duration::from_millis(5_500)).await;
    assert_eq!(calls(&counter), 0);

    // Becoming visible refreshes right away, not on the next tick.
    monitor.set_visible(true);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(calls(&counter), 1);
}

#[tokio::test(start_paused = true)]
async fn blur_suppresses_polling_and_focus_resumes() {
    let core = SyncCore::new(VisibilityMonitor::default());
    let counter = Arc::new(AtomicUsize::new(0));
    core.register_feed("notifications", timing(1_000, 500), counting(&counter, Duration::ZERO))
        .unwrap();
    core.subscribe("notifications", |_: &FeedUpdated| {}, quiet()).unwrap();

    core.monitor().set_focused(false);
    sleep(Duration::from_millis(3_500)).await;
    assert_eq!(calls(&counter), 0);
    assert!(!core.status().page.focused);

    core.monitor().set_focused(true);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(calls(&counter), 1);
}

#[tokio::test(start_paused = true)]
async fn resume_forces_past_fresh_cache() {
    let core = SyncCore::new(VisibilityMonitor::default());
    let counter = Arc::new(AtomicUsize::new(0));
    core.register_feed(
        "notifications",
        timing(30_000, 60_000),
        counting(&counter, Duration::ZERO),
    )
    .unwrap();
    core.subscribe("notifications", |_: &FeedUpdated| {}, SubscribeOptions::default())
        .unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(calls(&counter), 1);

    core.monitor().set_visible(false);
    sleep(Duration::from_millis(10)).await;
    core.monitor().set_visible(true);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(calls(&counter), 2);
}

#[tokio::test(start_paused = true)]
async fn panicking_callback_does_not_starve_others() {
    let core = SyncCore::new(VisibilityMonitor::default());
    core.register_feed("notifications", timing(30_000, 15_000), |_force: bool| async {
        Ok::<_, anyhow::Error>(json!({ "count": 1 }))
    })
    .unwrap();

    core.subscribe(
        "notifications",
        |_: &FeedUpdated| panic!("view crashed"),
        quiet(),
    )
    .unwrap();
    let (seen, callback) = recorder();
    core.subscribe("notifications", callback, quiet()).unwrap();

    core.refresh(&FeedId::new("notifications"), false).await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);

    // The engine keeps working after the panic.
    core.refresh(&FeedId::new("notifications"), false).await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_is_idempotent_and_stops_polling() {
    let core = SyncCore::new(VisibilityMonitor::default());
    let counter = Arc::new(AtomicUsize::new(0));
    core.register_feed("notifications", timing(1_000, 500), counting(&counter, Duration::ZERO))
        .unwrap();
    let feed = FeedId::new("notifications");

    let id = core.subscribe(&feed, |_: &FeedUpdated| {}, quiet()).unwrap();
    assert_eq!(core.status().active_polling, vec![feed.clone()]);
    assert_eq!(core.status().subscriber_count, 1);

    core.unsubscribe(id);
    core.unsubscribe(id);

    let status = core.status();
    assert!(status.active_polling.is_empty());
    assert_eq!(status.subscriber_count, 0);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(calls(&counter), 0);
}

#[tokio::test(start_paused = true)]
async fn feed_stays_active_while_any_subscriber_remains() {
    let core = SyncCore::new(VisibilityMonitor::default());
    core.register_feed("notifications", timing(1_000, 500), |_force: bool| async {
        Ok::<_, anyhow::Error>(json!(null))
    })
    .unwrap();
    let feed = FeedId::new("notifications");

    let first = core.subscribe(&feed, |_: &FeedUpdated| {}, quiet()).unwrap();
    let second = core.subscribe(&feed, |_: &FeedUpdated| {}, quiet()).unwrap();
    core.unsubscribe(first);
    assert_eq!(core.status().active_polling, vec![feed.clone()]);
    core.unsubscribe(second);
    assert!(core.status().active_polling.is_empty());
}

#[tokio::test(start_paused = true)]
async fn last_unsubscribe_keeps_cached_value() {
    let core = SyncCore::new(VisibilityMonitor::default());
    core.register_feed("notifications", timing(30_000, 15_000), |_force: bool| async {
        Ok::<_, anyhow::Error>(json!({ "count": 7 }))
    })
    .unwrap();
    let feed = FeedId::new("notifications");

    let id = core.subscribe(&feed, |_: &FeedUpdated| {}, quiet()).unwrap();
    core.refresh(&feed, false).await.unwrap();
    core.unsubscribe(id);

    assert_eq!(core.get_cached_data(&feed).as_deref(), Some(&json!({ "count": 7 })));
}

#[tokio::test(start_paused = true)]
async fn shortest_requested_interval_wins() {
    let core = SyncCore::new(VisibilityMonitor::default());
    let counter = Arc::new(AtomicUsize::new(0));
    core.register_feed("notifications", timing(10_000, 1_000), counting(&counter, Duration::ZERO))
        .unwrap();

    core.subscribe("notifications", |_: &FeedUpdated| {}, quiet()).unwrap();
    core.subscribe(
        "notifications",
        |_: &FeedUpdated| {},
        quiet().with_interval(Duration::from_secs(2)),
    )
    .unwrap();

    sleep(Duration::from_millis(6_500)).await;
    assert_eq!(calls(&counter), 3);
}

#[tokio::test(start_paused = true)]
async fn failed_fetch_keeps_last_value_and_reaches_caller_only() {
    let core = SyncCore::new(VisibilityMonitor::default());
    let counter = Arc::new(AtomicUsize::new(0));
    let attempts = Arc::clone(&counter);
    core.register_feed("admin-metrics", timing(30_000, 60_000), move |_force: bool| {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 0 {
                Ok(json!({ "cpu": 12 }))
            } else {
                Err(anyhow::anyhow!("upstream returned 503"))
            }
        }
    })
    .unwrap();
    let feed = FeedId::new("admin-metrics");

    let (seen, callback) = recorder();
    core.subscribe(&feed, callback, quiet()).unwrap();

    core.refresh(&feed, false).await.unwrap();
    let err = core.refresh(&feed, true).await.unwrap_err();
    assert!(matches!(err, SyncError::FetchFailure { ref message, .. } if message.contains("503")));
    assert!(err.is_transient());

    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(core.get_cached_data(&feed).as_deref(), Some(&json!({ "cpu": 12 })));
    assert!(core.status().in_flight.is_empty());
}

#[tokio::test(start_paused = true)]
async fn force_refresh_bypasses_cache() {
    let core = SyncCore::new(VisibilityMonitor::default());
    let counter = Arc::new(AtomicUsize::new(0));
    core.register_feed("notifications", timing(30_000, 15_000), counting(&counter, Duration::ZERO))
        .unwrap();
    let feed = FeedId::new("notifications");

    core.refresh(&feed, false).await.unwrap();
    let value = core.refresh(&feed, true).await.unwrap();
    assert_eq!(*value, json!({ "count": 2 }));
    assert_eq!(calls(&counter), 2);
}

#[tokio::test(start_paused = true)]
async fn clear_cache_forces_next_fetch() {
    let core = SyncCore::new(VisibilityMonitor::default());
    let counter = Arc::new(AtomicUsize::new(0));
    core.register_feed("a", timing(30_000, 15_000), counting(&counter, Duration::ZERO))
        .unwrap();
    core.register_feed("b", timing(30_000, 15_000), |_force: bool| async {
        Ok::<_, anyhow::Error>(json!("b"))
    })
    .unwrap();
    let a = FeedId::new("a");
    let b = FeedId::new("b");

    core.refresh(&a, false).await.unwrap();
    core.refresh(&b, false).await.unwrap();

    core.clear_cache(Some(&a));
    assert!(core.get_cached_data(&a).is_none());
    assert!(core.get_cached_data(&b).is_some());

    core.refresh(&a, false).await.unwrap();
    assert_eq!(calls(&counter), 2);

    core.clear_cache(None);
    assert!(core.get_cached_data(&a).is_none());
    assert!(core.get_cached_data(&b).is_none());
}

#[tokio::test(start_paused = true)]
async fn resubscribe_serves_expired_value_as_stale_then_fresh() {
    let core = SyncCore::new(VisibilityMonitor::default());
    let counter = Arc::new(AtomicUsize::new(0));
    core.register_feed("notifications", timing(60_000, 1_000), counting(&counter, Duration::ZERO))
        .unwrap();
    let feed = FeedId::new("notifications");

    let mut updates = core.updates();
    let first = core
        .subscribe(&feed, |_: &FeedUpdated| {}, SubscribeOptions::default())
        .unwrap();
    updates.recv().await.unwrap();
    core.unsubscribe(first);

    advance(Duration::from_secs(2)).await;

    let (seen, callback) = recorder();
    core.subscribe(&feed, callback, SubscribeOptions::default()).unwrap();
    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].stale);
        assert_eq!(*seen[0].value, json!({ "count": 1 }));
    }

    loop {
        if !updates.recv().await.unwrap().stale {
            break;
        }
    }
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(!seen[1].stale);
    assert_eq!(*seen[1].value, json!({ "count": 2 }));
}

#[tokio::test(start_paused = true)]
async fn cleanup_discards_everything_including_late_results() {
    let core = SyncCore::new(VisibilityMonitor::default());
    let counter = Arc::new(AtomicUsize::new(0));
    core.register_feed(
        "notifications",
        timing(1_000, 15_000),
        counting(&counter, Duration::from_millis(100)),
    )
    .unwrap();
    let feed = FeedId::new("notifications");

    let (seen, callback) = recorder();
    core.subscribe(&feed, callback, SubscribeOptions::default()).unwrap();
    core.cleanup();

    let status = core.status();
    assert!(status.active_polling.is_empty());
    assert!(status.in_flight.is_empty());
    assert_eq!(status.subscriber_count, 0);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(calls(&counter), 1);
    assert!(seen.lock().unwrap().is_empty());
    assert!(core.get_cached_data(&feed).is_none());

    // Feeds stay registered.
    core.refresh(&feed, false).await.unwrap();
    assert_eq!(calls(&counter), 2);
}

#[tokio::test(start_paused = true)]
async fn unknown_and_duplicate_feeds_are_rejected() {
    let core = SyncCore::new(VisibilityMonitor::default());
    let missing = FeedId::new("missing");

    assert_eq!(
        core.subscribe(&missing, |_: &FeedUpdated| {}, SubscribeOptions::default()),
        Err(SyncError::UnknownFeed {
            feed: missing.clone()
        })
    );
    assert!(matches!(
        core.refresh(&missing, false).await,
        Err(SyncError::UnknownFeed { .. })
    ));
    assert!(core.get_cached_data(&missing).is_none());

    let adapter = |_force: bool| async { Ok::<_, anyhow::Error>(Value::Null) };
    core.register_feed("dup", timing(1_000, 500), adapter).unwrap();
    assert!(matches!(
        core.register_feed("dup", timing(1_000, 500), adapter),
        Err(SyncError::DuplicateFeed { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn builds_from_config() {
    let config = SyncConfig::from_json5_str(
        "{ updatesCapacity: 4, feeds: { notifications: { pollIntervalMs: 30000, cacheLifetimeMs: 15000 } } }",
    )
    .unwrap();
    let core = SyncCore::with_config(VisibilityMonitor::default(), &config);
    for feed in config.feed_names() {
        core.register_feed(&feed, config.feed_config(feed.as_str()).unwrap(), |_force: bool| async {
            Ok::<_, anyhow::Error>(json!(true))
        })
        .unwrap();
    }

    let value = core.refresh(&FeedId::new("notifications"), false).await.unwrap();
    assert_eq!(*value, json!(true));
    assert!(serde_json::to_value(core.status()).unwrap()["activePolling"].is_array());
}

#[tokio::test(start_paused = true)]
async fn panicking_adapter_fails_one_fetch_and_releases_the_feed() {
    let core = SyncCore::new(VisibilityMonitor::default());
    let counter = Arc::new(AtomicUsize::new(0));
    let attempts = Arc::clone(&counter);
    core.register_feed("notifications", timing(30_000, 15_000), move |_force: bool| {
        let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n == 1 {
                panic!("adapter bug");
            }
            Ok::<_, anyhow::Error>(json!({ "count": n }))
        }
    })
    .unwrap();
    let feed = FeedId::new("notifications");

    let err = core.refresh(&feed, false).await.unwrap_err();
    assert!(
        matches!(err, SyncError::FetchFailure { ref message, .. } if message.contains("adapter bug"))
    );
    assert!(core.status().in_flight.is_empty());

    sleep(Duration::from_millis(10)).await;
    let value = core.refresh(&feed, true).await.unwrap();
    assert_eq!(*value, json!({ "count": 2 }));
    assert_eq!(calls(&counter), 2);
}

#[tokio::test(start_paused = true)]
async fn back_to_back_hide_and_show_still_resumes() {
    let core = SyncCore::new(VisibilityMonitor::default());
    let counter = Arc::new(AtomicUsize::new(0));
    core.register_feed(
        "notifications",
        timing(30_000, 60_000),
        counting(&counter, Duration::ZERO),
    )
    .unwrap();
    core.subscribe("notifications", |_: &FeedUpdated| {}, SubscribeOptions::default())
        .unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(calls(&counter), 1);

    // No yield between the two signals.
    core.monitor().set_visible(false);
    core.monitor().set_visible(true);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(calls(&counter), 2);
}

#[tokio::test(start_paused = true)]
async fn resume_refreshes_each_active_feed_once_and_skips_idle_feeds() {
    let core = SyncCore::new(VisibilityMonitor::default());
    let a_calls = Arc::new(AtomicUsize::new(0));
    let b_calls = Arc::new(AtomicUsize::new(0));
    let idle_calls = Arc::new(AtomicUsize::new(0));
    core.register_feed("a", timing(30_000, 60_000), counting(&a_calls, Duration::ZERO))
        .unwrap();
    core.register_feed("b", timing(30_000, 60_000), counting(&b_calls, Duration::ZERO))
        .unwrap();
    core.register_feed("idle", timing(30_000, 60_000), counting(&idle_calls, Duration::ZERO))
        .unwrap();

    core.subscribe("a", |_: &FeedUpdated| {}, quiet()).unwrap();
    core.subscribe("b", |_: &FeedUpdated| {}, quiet()).unwrap();

    core.monitor().set_visible(false);
    sleep(Duration::from_millis(10)).await;
    core.monitor().set_visible(true);
    sleep(Duration::from_millis(10)).await;

    assert_eq!(calls(&a_calls), 1);
    assert_eq!(calls(&b_calls), 1);
    assert_eq!(calls(&idle_calls), 0);

    // A second round, with no yield in between, adds exactly one more each.
    core.monitor().set_focused(false);
    core.monitor().set_focused(true);
    sleep(Duration::from_millis(10)).await;

    assert_eq!(calls(&a_calls), 2);
    assert_eq!(calls(&b_calls), 2);
    assert_eq!(calls(&idle_calls), 0);
}
