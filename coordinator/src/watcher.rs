use crate::coordinator::{CoordinatorEvent, WatcherCommand};
use redmaster_core::RedisServer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Periodic liveness check of the current master.
///
/// Each tick probes only the watched master. A reachable master resets the
/// retry budget and reports `MasterAvailable`; an unreachable one burns a
/// retry, and once the budget hits zero the watcher reports
/// `MasterUnavailable` and goes dormant until the coordinator rearms it
/// with a fresh command.
pub struct MasterWatcher {
    servers: Vec<Arc<dyn RedisServer>>,
    interval: Duration,
    retry_budget: u32,
    events: mpsc::Sender<CoordinatorEvent>,
    commands: watch::Receiver<WatcherCommand>,
    cancel: CancellationToken,
}

impl MasterWatcher {
    pub fn new(
        servers: Vec<Arc<dyn RedisServer>>,
        interval: Duration,
        retry_budget: u32,
        events: mpsc::Sender<CoordinatorEvent>,
        commands: watch::Receiver<WatcherCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            servers,
            interval,
            retry_budget: retry_budget.max(1),
            events,
            commands,
            cancel,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut remaining = self.retry_budget;
        let mut dormant = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                changed = self.commands.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // Fresh command from the coordinator rearms the watcher.
                    remaining = self.retry_budget;
                    dormant = false;
                }

                _ = ticker.tick() => {
                    if dormant {
                        continue;
                    }
                    let master = match &*self.commands.borrow() {
                        WatcherCommand::Pause => continue,
                        WatcherCommand::Watch(addr) => addr.clone(),
                    };
                    let Some(server) = self.servers.iter().find(|s| s.addr() == &master) else {
                        tracing::error!(master = %master, "Watched master is not in the configured pool");
                        continue;
                    };

                    let status = server.probe().await;
                    if status.available {
                        if remaining < self.retry_budget {
                            tracing::info!(master = %master, "Master reachable again");
                        }
                        remaining = self.retry_budget;
                        let _ = self.events.send(CoordinatorEvent::MasterAvailable).await;
                    } else {
                        remaining = remaining.saturating_sub(1);
                        tracing::warn!(master = %master, remaining, "Master probe failed");
                        if remaining == 0 {
                            dormant = true;
                            let _ = self.events.send(CoordinatorEvent::MasterUnavailable).await;
                        }
                    }
                }
            }
        }
        tracing::debug!("Master watcher shutting down");
    }
}
