//! Stdin command loop that drives the visibility monitor and the sync core,
//! standing in for the browser events and view actions of a real host.

use std::io::BufRead;

use anyhow::{Result, anyhow, bail};
use lib_livesync::{FeedId, SyncCore};
use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Hide,
    Show,
    Blur,
    Focus,
    Refresh(FeedId),
    Force(FeedId),
    Clear(Option<FeedId>),
    Status,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Command> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(|| anyhow!("empty command"))?;
        let feed = words.next().map(FeedId::new);
        if words.next().is_some() {
            bail!("too many arguments");
        }

        let command = match (verb.to_ascii_lowercase().as_str(), feed) {
            ("hide", None) => Command::Hide,
            ("show", None) => Command::Show,
            ("blur", None) => Command::Blur,
            ("focus", None) => Command::Focus,
            ("refresh", Some(feed)) => Command::Refresh(feed),
            ("force", Some(feed)) => Command::Force(feed),
            ("clear", feed) => Command::Clear(feed),
            ("status", None) => Command::Status,
            ("help", None) => Command::Help,
            ("quit" | "exit", None) => Command::Quit,
            ("refresh" | "force", None) => bail!("{verb} needs a feed name"),
            (other, _) => bail!("unknown command {other:?}; try help"),
        };
        Ok(command)
    }
}

const HELP: &str = "commands: hide | show | blur | focus | refresh <feed> | force <feed> | clear [feed] | status | quit";

/// Reads stdin on a dedicated thread so a pending read never holds up
/// runtime shutdown.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Runs commands until `quit`, end of input, or shutdown.
pub async fn run(
    core: SyncCore,
    mut lines: mpsc::Receiver<String>,
    mut shutdown: broadcast::Receiver<()>,
) {
    println!("{HELP}");
    loop {
        let line = tokio::select! {
            _ = shutdown.recv() => break,
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        if line.trim().is_empty() {
            continue;
        }
        match Command::parse(&line) {
            Ok(Command::Quit) => break,
            Ok(command) => execute(&core, command).await,
            Err(err) => println!("error: {err}"),
        }
    }
    tracing::info!("console closed");
}

async fn execute(core: &SyncCore, command: Command) {
    let monitor = core.monitor();
    match command {
        Command::Hide => {
            monitor.set_visible(false);
        }
        Command::Show => {
            monitor.set_visible(true);
        }
        Command::Blur => {
            monitor.set_focused(false);
        }
        Command::Focus => {
            monitor.set_focused(true);
        }
        Command::Refresh(feed) => print_refresh(core, &feed, false).await,
        Command::Force(feed) => print_refresh(core, &feed, true).await,
        Command::Clear(feed) => core.clear_cache(feed.as_ref()),
        Command::Status => match serde_json::to_string_pretty(&core.status()) {
            Ok(status) => println!("{status}"),
            Err(err) => println!("error: {err}"),
        },
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
}

async fn print_refresh(core: &SyncCore, feed: &FeedId, force: bool) {
    match core.refresh(feed, force).await {
        Ok(value) => println!("{feed}: {value}"),
        Err(err) => println!("error: {err}"),
    }
}
