use anyhow::Result;
use lib_livesync::{FeedUpdated, PageState, SubscribeOptions, SyncCore, VisibilityMonitor};
use tokio::signal;

mod livesync_logic;
use livesync_logic::{adapters, config, console};

fn print_update(update: &FeedUpdated) {
    let marker = if update.stale { " (stale)" } else { "" };
    println!("[{}]{} {}", update.feed, marker, update.value);
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config()?;
    let _log_guard = lib_livesync::init_tracing("server_livesync", &config.logger_options())?;

    let sync_config = config.sync_config()?;
    let monitor = VisibilityMonitor::new(PageState {
        visible: !config.start_hidden.unwrap_or(false),
        focused: true,
    });
    let core = SyncCore::with_config(monitor, &sync_config);

    let feeds = adapters::register_all(&core, &sync_config)?;
    for feed in &feeds {
        core.subscribe(feed, print_update, SubscribeOptions::default())?;
    }
    tracing::info!(feeds = feeds.len(), "server_livesync started");

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let mut console_handle = tokio::spawn(console::run(
        core.clone(),
        console::spawn_stdin_reader(),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = &mut console_handle => {
            tracing::info!("Console closed, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        tracing::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "SIGTERM handler unavailable");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    let _ = shutdown_tx.send(());
    core.shutdown();
    if !console_handle.is_finished() {
        let _ = console_handle.await;
    }

    tracing::info!("Shutdown complete.");
    Ok(())
}
