use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{info, warn};

use crate::audio::AudioRelay;
use crate::config::Config;
use crate::datastore::DataStore;
use crate::notifier;
use crate::sched::TimerRegistry;

/// How often the loop polls the store watcher.
const TICK_MILLIS: u64 = 500;

/// Runs the reminder daemon: derive timers from the store, re-derive on
/// store changes, present notifications as timers fire.
pub fn run(store: &DataStore, cfg: &Config) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(run_loop(store, cfg))
}

async fn run_loop(store: &DataStore, cfg: &Config) -> anyhow::Result<()> {
    let (fired_tx, mut fired_rx) = unbounded_channel();
    let mut registry = TimerRegistry::new(fired_tx);

    let tasks = store.load_tasks()?;
    registry.sync(&tasks, Utc::now());

    let watcher =
        StoreWatcher::start(&store.data_dir).context("failed to watch the data directory")?;
    let relay = Arc::new(AudioRelay::new());
    let mut tick = tokio::time::interval(Duration::from_millis(TICK_MILLIS));

    info!(timers = registry.len(), "reminder daemon running");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            Some(timer) = fired_rx.recv() => {
                registry.acknowledge(&timer);
                let store = store.clone();
                let cfg = cfg.clone();
                let relay = Arc::clone(&relay);
                tokio::spawn(async move {
                    if let Err(err) = notifier::present(store, cfg, relay, timer).await {
                        warn!(error = %err, "failed to present reminder");
                    }
                });
            }
            _ = tick.tick() => {
                if watcher.drain() {
                    match store.load_tasks() {
                        Ok(tasks) => registry.sync(&tasks, Utc::now()),
                        Err(err) => warn!(error = %err, "failed to reload tasks; keeping current timers"),
                    }
                }
            }
        }
    }

    relay.stop().await;
    Ok(())
}

/// Watches the data directory and reports task-file changes. Events arrive
/// on a plain channel from the watcher's own thread; `drain` is called
/// once per tick from the async loop.
struct StoreWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<()>,
}

impl StoreWatcher {
    fn start(data_dir: &Path) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let Ok(event) = result else { return };

                match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
                    _ => return,
                }

                // Only the task file affects timer state; sound and group
                // changes are read lazily at fire time.
                let relevant = event.paths.iter().any(|path| {
                    path.file_name().and_then(|name| name.to_str())
                        == Some(DataStore::TASKS_FILE)
                });

                if relevant {
                    let _ = tx.send(());
                }
            },
            notify::Config::default(),
        )?;

        watcher.watch(data_dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Non-blocking drain; true if the task file changed since last tick.
    fn drain(&self) -> bool {
        let mut changed = false;
        while self.rx.try_recv().is_ok() {
            changed = true;
        }
        changed
    }
}
