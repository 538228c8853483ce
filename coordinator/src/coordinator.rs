use crate::publisher::ControlPublisher;
use chrono::{DateTime, Utc};
use redmaster_core::message::{
    self, InvalidatePayload, ReconfigurePayload, SystemNotificationPayload,
};
use redmaster_core::metrics::METRICS;
use redmaster_core::probe::probe_all;
use redmaster_core::{
    ControlMessage, EndpointAddr, Error, MasterFile, PoolSnapshot, RedisServer, Result, Settings,
    TokenMint,
};
use redmaster_core::ClientRegistry;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything that can wake the coordinator. All state mutation happens in
/// response to one of these, consumed by a single task.
#[derive(Debug)]
pub enum CoordinatorEvent {
    /// Parsed client control message from the bus
    Message(ControlMessage),
    /// Watcher reached the current master
    MasterAvailable,
    /// Watcher exhausted its retry budget
    MasterUnavailable,
    /// The invalidation round tagged with `token` ran out of time
    InvalidationTimeout { token: u64 },
    /// Status snapshot request from the HTTP server
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
}

/// Commands the coordinator sends to the master watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherCommand {
    /// Probe this endpoint every tick
    Watch(EndpointAddr),
    /// Stop probing until further notice
    Pause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    /// Process just started; no master selected yet
    Undecided,
    /// Master known and believed available
    Running,
    /// Master believed unavailable; invalidation round open
    Paused,
}

/// Snapshot served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub configured_client_ids: Vec<String>,
    pub unknown_client_ids: Vec<String>,
    pub unresponsive_clients: Vec<(String, DateTime<Utc>)>,
    pub current_master: Option<String>,
    pub current_token: u64,
    pub state: CoordinatorState,
}

/// The failover state machine.
///
/// Owns every piece of coordination state exclusively; the only way in is
/// the event queue, so handlers never race each other and no locking is
/// needed. Suspension points (probes, publishes, file writes) complete
/// within the handler that started them before the next event is taken.
pub struct Coordinator {
    settings: Settings,
    servers: Vec<Arc<dyn RedisServer>>,
    publisher: Arc<dyn ControlPublisher>,
    master_file: MasterFile,
    registry: ClientRegistry,
    mint: TokenMint,
    state: CoordinatorState,
    current_master: Option<EndpointAddr>,
    last_pool: PoolSnapshot,
    pong_received: HashSet<String>,
    invalidated_received: HashSet<String>,
    /// Candidate set for a switch triggered by a stale master file; the
    /// configured pool minus the recorded endpoint.
    startup_candidates: Option<Vec<EndpointAddr>>,
    invalidation_timer: Option<JoinHandle<()>>,
    event_tx: mpsc::Sender<CoordinatorEvent>,
    watcher_ctl: watch::Sender<WatcherCommand>,
}

impl Coordinator {
    /// Determine the initial master and build the coordinator.
    ///
    /// Consults the master file first, then falls back to pool
    /// auto-detection. When the file names an endpoint that is demoted or
    /// unreachable, the coordinator comes up paused with a master switch
    /// already enqueued as its first event.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error when fewer than two endpoints are
    /// configured, and with `NoRedisMaster` when there is no usable record
    /// and auto-detection is inconclusive.
    pub async fn start(
        settings: Settings,
        servers: Vec<Arc<dyn RedisServer>>,
        publisher: Arc<dyn ControlPublisher>,
        event_tx: mpsc::Sender<CoordinatorEvent>,
        watcher_ctl: watch::Sender<WatcherCommand>,
    ) -> Result<Self> {
        if servers.len() < 2 {
            return Err(Error::configuration(format!(
                "at least 2 redis endpoints are required, got {}",
                servers.len()
            )));
        }

        let master_file = MasterFile::new(&settings.master_file);
        let registry = ClientRegistry::new(
            settings.client_ids.iter().cloned(),
            settings.unknown_client_capacity,
        );

        let pool = probe_all(&servers).await;
        let recorded = master_file.read().await?;

        let mut coordinator = Self {
            registry,
            master_file,
            publisher,
            mint: TokenMint::new(),
            state: CoordinatorState::Undecided,
            current_master: None,
            last_pool: pool.clone(),
            pong_received: HashSet::new(),
            invalidated_received: HashSet::new(),
            startup_candidates: None,
            invalidation_timer: None,
            event_tx,
            watcher_ctl,
            settings,
            servers,
        };

        match recorded {
            Some(recorded) if pool.is_master(&recorded) => {
                tracing::info!(master = %recorded, "Adopted master from master file");
                coordinator.current_master = Some(recorded);
                coordinator.state = CoordinatorState::Running;
                coordinator.rearm_watcher();
            }
            Some(recorded) => {
                let position = if pool.is_slave(&recorded) {
                    "demoted to slave"
                } else {
                    "unreachable"
                };
                tracing::warn!(
                    master = %recorded,
                    position,
                    "Master file is stale, initiating master switch"
                );
                coordinator
                    .publish_system_notification(format!(
                        "Recorded redis master '{}' is {}; initiating master switch",
                        recorded, position
                    ))
                    .await;
                coordinator.startup_candidates = Some(
                    coordinator
                        .settings
                        .redis_servers
                        .iter()
                        .filter(|a| *a != &recorded)
                        .cloned()
                        .collect(),
                );
                coordinator.current_master = Some(recorded);
                // First event on the loop opens the invalidation round, so
                // every state mutation stays on the loop.
                let _ = coordinator
                    .event_tx
                    .send(CoordinatorEvent::MasterUnavailable)
                    .await;
            }
            None => match pool.auto_detect_master() {
                Some(master) => {
                    tracing::info!(master = %master, "Auto-detected single master in pool");
                    if let Err(e) = coordinator.master_file.write(&master).await {
                        METRICS.inc_persistence_failure();
                        tracing::error!("Failed to record adopted master: {}", e);
                        coordinator
                            .publish_system_notification(format!(
                                "Failed to persist adopted redis master '{}': {}",
                                master, e
                            ))
                            .await;
                    }
                    coordinator.current_master = Some(master);
                    coordinator.state = CoordinatorState::Running;
                    coordinator.rearm_watcher();
                }
                None => return Err(Error::NoRedisMaster),
            },
        }

        Ok(coordinator)
    }

    /// Consume events until shutdown. This task is the sole owner of all
    /// coordination state.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<CoordinatorEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                }
            }
        }
        self.abort_invalidation_timer();
        tracing::info!("Coordinator shutting down");
    }

    pub async fn handle_event(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Message(msg) => self.handle_message(msg).await,
            CoordinatorEvent::MasterAvailable => self.on_master_available().await,
            CoordinatorEvent::MasterUnavailable => self.on_master_unavailable().await,
            CoordinatorEvent::InvalidationTimeout { token } => {
                self.on_invalidation_timeout(token).await
            }
            CoordinatorEvent::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    async fn handle_message(&mut self, msg: ControlMessage) {
        METRICS.inc_message();
        let now = Utc::now();
        match msg {
            ControlMessage::ClientStarted { id } => {
                self.note_client(&id, message::CLIENT_STARTED, true, now).await;
            }
            ControlMessage::Heartbeat { id } => {
                self.note_client(&id, message::HEARTBEAT, true, now).await;
            }
            ControlMessage::Pong { id, token } => {
                if !self.redeem(token, message::PONG, &id) {
                    return;
                }
                self.note_client(&id, message::PONG, true, now).await;
                if self.state == CoordinatorState::Paused {
                    self.pong_received.insert(id);
                    if self.fleet_acked(&self.pong_received) {
                        tracing::info!(
                            token,
                            "All clients answered the invalidation broadcast"
                        );
                        // Re-entering the round is a no-op; the round now
                        // waits for client_invalidated acks.
                        self.start_invalidation_round().await;
                    }
                }
            }
            ControlMessage::ClientInvalidated { id, token } => {
                if !self.redeem(token, message::CLIENT_INVALIDATED, &id) {
                    return;
                }
                // No notification for this kind, but the id still lands in
                // the bounded unknown set so its timestamp cannot dangle.
                self.note_client(&id, message::CLIENT_INVALIDATED, false, now)
                    .await;
                self.invalidated_received.insert(id);
                if self.state == CoordinatorState::Paused
                    && self.fleet_acked(&self.invalidated_received)
                {
                    tracing::info!(token, "All clients invalidated, switching master");
                    self.switch_master().await;
                }
            }
        }
    }

    /// Token gate: anything from a closed round is dropped here.
    fn redeem(&self, token: u64, kind: &str, id: &str) -> bool {
        if self.mint.redeem(token) {
            return true;
        }
        METRICS.inc_stale_token();
        tracing::debug!(
            kind,
            id,
            token,
            current = self.mint.current(),
            "Dropping message with stale token"
        );
        false
    }

    async fn note_client(&mut self, id: &str, kind: &str, notify: bool, now: DateTime<Utc>) {
        if self.registry.known(id) {
            self.registry.seen(id, now);
            return;
        }
        let first_occurrence = self.registry.note_unknown(id, now);
        if first_occurrence && notify {
            METRICS.inc_unknown_client();
            tracing::warn!(id, kind, "Message from unknown client");
            self.publish_system_notification(format!(
                "Received {} message from unknown client '{}'",
                kind, id
            ))
            .await;
        }
    }

    fn fleet_acked(&self, acks: &HashSet<String>) -> bool {
        self.registry.expected().iter().all(|id| acks.contains(id))
    }

    async fn on_master_unavailable(&mut self) {
        tracing::warn!(
            master = ?self.current_master.as_ref().map(|m| m.to_string()),
            "Master reported unavailable"
        );
        self.start_invalidation_round().await;
    }

    /// Open an invalidation round. Idempotent: a second call while paused
    /// returns without advancing the token or re-publishing `invalidate`.
    async fn start_invalidation_round(&mut self) {
        if self.state == CoordinatorState::Paused {
            tracing::debug!("Invalidation round already open");
            return;
        }
        self.state = CoordinatorState::Paused;
        let _ = self.watcher_ctl.send(WatcherCommand::Pause);

        let token = self.mint.advance();
        self.pong_received.clear();
        self.invalidated_received.clear();
        METRICS.inc_invalidation_round();

        if self.registry.expected().is_empty() {
            tracing::info!(token, "No clients configured, switching master directly");
            self.switch_master().await;
            return;
        }

        tracing::info!(
            token,
            clients = self.registry.expected().len(),
            "Broadcasting invalidate"
        );
        self.publish(message::INVALIDATE, &InvalidatePayload { token })
            .await;
        self.arm_invalidation_timer(token);
    }

    fn arm_invalidation_timer(&mut self, token: u64) {
        self.abort_invalidation_timer();
        let events = self.event_tx.clone();
        let timeout = self.settings.invalidation_timeout;
        self.invalidation_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events
                .send(CoordinatorEvent::InvalidationTimeout { token })
                .await;
        }));
    }

    fn abort_invalidation_timer(&mut self) {
        if let Some(timer) = self.invalidation_timer.take() {
            timer.abort();
        }
    }

    async fn on_invalidation_timeout(&mut self, token: u64) {
        // The state and token gates make expired timers from closed rounds
        // harmless; the round can only be cancelled once.
        if self.state != CoordinatorState::Paused || !self.mint.redeem(token) {
            tracing::debug!(token, "Ignoring timeout for a closed round");
            return;
        }
        METRICS.inc_invalidation_timeout();
        let missing: Vec<&String> = self
            .registry
            .expected()
            .iter()
            .filter(|id| !self.invalidated_received.contains(*id))
            .collect();
        tracing::warn!(
            token,
            ?missing,
            "Invalidation round timed out, keeping current master"
        );
        self.close_round();
        self.state = CoordinatorState::Running;
        self.rearm_watcher();
    }

    async fn on_master_available(&mut self) {
        match self.state {
            CoordinatorState::Running => self.publish_master_confirmation().await,
            CoordinatorState::Paused => {
                tracing::info!(
                    "Master recovered before the invalidation round completed, cancelling switch"
                );
                self.close_round();
                self.state = CoordinatorState::Running;
                self.rearm_watcher();
            }
            CoordinatorState::Undecided => {}
        }
    }

    /// Re-announce the master so clients that missed a broadcast catch up.
    async fn publish_master_confirmation(&mut self) {
        // The announced address comes from the last pool snapshot's master
        // list rather than from current_master; with several masters in the
        // pool this can announce an address that was never promoted.
        // TODO: announce current_master once deployed clients tolerate it.
        let server = self
            .last_pool
            .masters()
            .into_iter()
            .next()
            .or_else(|| self.current_master.clone());
        if let Some(server) = server {
            self.publish(
                message::RECONFIGURE,
                &ReconfigurePayload::new(&server, self.mint.current()),
            )
            .await;
        }
    }

    /// Promote a replacement for the failed master and broadcast it.
    async fn switch_master(&mut self) {
        self.abort_invalidation_timer();
        let old_master = self.current_master.clone();

        let pool = probe_all(&self.servers).await;
        self.last_pool = pool.clone();

        let Some(new_master) = self.determine_new_master(&pool, old_master.as_ref()) else {
            METRICS.inc_failed_switch();
            let old = old_master
                .map(|m| m.to_string())
                .unwrap_or_else(|| "<none>".to_string());
            tracing::error!(old_master = %old, "No promotable candidate found, keeping old master");
            self.publish_system_notification(format!(
                "Redis master switch failed: no promotable candidate to replace '{}'",
                old
            ))
            .await;
            self.finish_round();
            return;
        };

        let promoted = match self.server_for(&new_master) {
            Some(server) => server.promote_to_master().await,
            None => Err(Error::configuration(format!(
                "candidate '{}' is not in the configured pool",
                new_master
            ))),
        };
        if let Err(e) = promoted {
            METRICS.inc_failed_switch();
            tracing::error!(candidate = %new_master, "Failed to promote candidate: {}", e);
            self.publish_system_notification(format!(
                "Redis master switch failed: could not promote '{}': {}",
                new_master, e
            ))
            .await;
            self.finish_round();
            return;
        }

        self.current_master = Some(new_master.clone());
        self.startup_candidates = None;

        if let Err(e) = self.master_file.write(&new_master).await {
            METRICS.inc_persistence_failure();
            tracing::error!("Failed to persist new master: {}", e);
            self.publish_system_notification(format!(
                "Failed to persist new redis master '{}': {}",
                new_master, e
            ))
            .await;
        }

        // Contain split-brain: every other endpoint still claiming the
        // master role follows the new master.
        for stray in self.last_pool.masters() {
            if stray == new_master {
                continue;
            }
            if let Some(server) = self.server_for(&stray) {
                if let Err(e) = server.follow(&new_master).await {
                    tracing::warn!(stray = %stray, "Failed to demote stray master: {}", e);
                }
            }
        }

        METRICS.inc_master_switch();
        let token = self.mint.current();
        self.publish(
            message::RECONFIGURE,
            &ReconfigurePayload::new(&new_master, token),
        )
        .await;
        tracing::info!(
            old_master = ?old_master.as_ref().map(|m| m.to_string()),
            new_master = %new_master,
            token,
            "Master switch complete"
        );
        self.finish_round();
    }

    /// First reachable slave of the failed master; for a startup-triggered
    /// switch, the recorded stale master's pool-mates instead, preferring
    /// its slaves.
    fn determine_new_master(
        &self,
        pool: &PoolSnapshot,
        old_master: Option<&EndpointAddr>,
    ) -> Option<EndpointAddr> {
        if let Some(candidates) = &self.startup_candidates {
            let reachable: Vec<EndpointAddr> = candidates
                .iter()
                .filter(|a| pool.status_of(a).is_some_and(|s| s.available))
                .cloned()
                .collect();
            if let Some(old) = old_master {
                if let Some(slave) = reachable
                    .iter()
                    .find(|a| pool.status_of(a).is_some_and(|s| s.role.is_slave_of(old)))
                {
                    return Some(slave.clone());
                }
            }
            return reachable.into_iter().next();
        }
        pool.slaves_of(old_master?).into_iter().next()
    }

    fn server_for(&self, addr: &EndpointAddr) -> Option<&Arc<dyn RedisServer>> {
        self.servers.iter().find(|s| s.addr() == addr)
    }

    /// Close the round bookkeeping and resume watching. Exactly one of the
    /// three PAUSED exits (switch, timeout, recovery) gets here per round.
    fn finish_round(&mut self) {
        self.close_round();
        self.state = CoordinatorState::Running;
        self.rearm_watcher();
    }

    fn close_round(&mut self) {
        self.abort_invalidation_timer();
        self.pong_received.clear();
        self.invalidated_received.clear();
    }

    fn rearm_watcher(&self) {
        if let Some(master) = &self.current_master {
            let _ = self.watcher_ctl.send(WatcherCommand::Watch(master.clone()));
        }
    }

    async fn publish<T: Serialize>(&self, routing_key: &str, payload: &T) {
        let value = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(routing_key, "Failed to serialize payload: {}", e);
                return;
            }
        };
        if let Err(e) = self.publisher.publish(routing_key, value).await {
            METRICS.inc_publish_failure();
            tracing::error!(routing_key, "Failed to publish control message: {}", e);
        }
    }

    async fn publish_system_notification(&self, message: String) {
        self.publish(
            message::SYSTEM_NOTIFICATION,
            &SystemNotificationPayload { message },
        )
        .await;
    }

    fn status(&self) -> StatusReport {
        let now = Utc::now();
        StatusReport {
            configured_client_ids: self.registry.expected().iter().cloned().collect(),
            unknown_client_ids: self.registry.unknown_ids(),
            unresponsive_clients: self
                .registry
                .unresponsive(now, self.settings.client_dead_threshold),
            current_master: self.current_master.as_ref().map(|m| m.to_string()),
            current_token: self.mint.current(),
            state: self.state,
        }
    }
}
