mod common;

use common::{cleanup_master_file, test_settings, CapturingBus, ScriptedRedis};
use redmaster_coordinator::{
    Coordinator, CoordinatorEvent, CoordinatorState, MasterWatcher, WatcherCommand,
};
use redmaster_core::{ControlMessage, RedisRole, RedisServer, Settings};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

struct Cluster {
    m1: Arc<ScriptedRedis>,
    m2: Arc<ScriptedRedis>,
    bus: Arc<CapturingBus>,
    events: mpsc::Sender<CoordinatorEvent>,
    watcher_rx: watch::Receiver<WatcherCommand>,
    cancel: CancellationToken,
    settings: Settings,
    run_handle: tokio::task::JoinHandle<()>,
}

impl Cluster {
    /// Start a coordinator over a healthy m1(master)/m2(slave) pair and
    /// spawn its event loop. The master file is seeded with m1 so startup
    /// adopts it.
    async fn start(settings: Settings) -> Self {
        let m1 = ScriptedRedis::master("m1:6379");
        let m2 = ScriptedRedis::slave("m2:6379", "m1:6379");
        tokio::fs::write(&settings.master_file, "m1:6379\n")
            .await
            .unwrap();
        Self::start_with(settings, m1, m2).await
    }

    async fn start_with(
        settings: Settings,
        m1: Arc<ScriptedRedis>,
        m2: Arc<ScriptedRedis>,
    ) -> Self {
        let servers: Vec<Arc<dyn RedisServer>> = vec![m1.clone(), m2.clone()];
        let bus = Arc::new(CapturingBus::default());
        let (event_tx, event_rx) = mpsc::channel(256);
        let (watcher_tx, watcher_rx) = watch::channel(WatcherCommand::Pause);
        let cancel = CancellationToken::new();

        let coordinator = Coordinator::start(
            settings.clone(),
            servers,
            bus.clone(),
            event_tx.clone(),
            watcher_tx,
        )
        .await
        .unwrap();
        let run_handle = tokio::spawn(coordinator.run(event_rx, cancel.clone()));

        Self {
            m1,
            m2,
            bus,
            events: event_tx,
            watcher_rx,
            cancel,
            settings,
            run_handle,
        }
    }

    async fn status(&self) -> redmaster_coordinator::StatusReport {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(CoordinatorEvent::Status { reply: tx })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    async fn send(&self, msg: ControlMessage) {
        self.events
            .send(CoordinatorEvent::Message(msg))
            .await
            .unwrap();
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.run_handle.await;
        cleanup_master_file(&self.settings.master_file).await;
    }
}

#[tokio::test]
async fn test_full_invalidation_round_switches_master() {
    let cluster = Cluster::start(test_settings(&["c1", "c2"])).await;
    let before = cluster.status().await;
    assert_eq!(before.state, CoordinatorState::Running);
    assert_eq!(before.current_master.as_deref(), Some("m1:6379"));

    cluster.m1.set_available(false);
    cluster
        .events
        .send(CoordinatorEvent::MasterUnavailable)
        .await
        .unwrap();

    let invalidates = cluster
        .bus
        .wait_for("invalidate", 1, Duration::from_secs(2))
        .await;
    let token = invalidates[0]["token"].as_u64().unwrap();
    assert!(token > before.current_token);

    for id in ["c1", "c2"] {
        cluster
            .send(ControlMessage::Pong {
                id: id.to_string(),
                token,
            })
            .await;
    }
    for id in ["c1", "c2"] {
        cluster
            .send(ControlMessage::ClientInvalidated {
                id: id.to_string(),
                token,
            })
            .await;
    }

    let reconfigures = cluster
        .bus
        .wait_for("reconfigure", 1, Duration::from_secs(2))
        .await;
    assert_eq!(reconfigures[0]["server"], "m2:6379");
    assert_eq!(reconfigures[0]["token"], token);

    let after = cluster.status().await;
    assert_eq!(after.state, CoordinatorState::Running);
    assert_eq!(after.current_master.as_deref(), Some("m2:6379"));
    assert_eq!(after.current_token, token);
    assert_eq!(cluster.m2.role(), RedisRole::Master);

    // The promotion was persisted for the next startup.
    let recorded = tokio::fs::read_to_string(&cluster.settings.master_file)
        .await
        .unwrap();
    assert_eq!(recorded.trim(), "m2:6379");

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_partial_acks_time_out_and_keep_master() {
    let cluster = Cluster::start(test_settings(&["c1", "c2"])).await;
    cluster.m1.set_available(false);
    cluster
        .events
        .send(CoordinatorEvent::MasterUnavailable)
        .await
        .unwrap();

    let invalidates = cluster
        .bus
        .wait_for("invalidate", 1, Duration::from_secs(2))
        .await;
    let token = invalidates[0]["token"].as_u64().unwrap();

    // Only c1 answers; c2 is dead. The round must not block forever.
    cluster
        .send(ControlMessage::Pong {
            id: "c1".to_string(),
            token,
        })
        .await;
    cluster
        .send(ControlMessage::ClientInvalidated {
            id: "c1".to_string(),
            token,
        })
        .await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let status = cluster.status().await;
        if status.state == CoordinatorState::Running {
            // Old master retained, token not rolled back.
            assert_eq!(status.current_master.as_deref(), Some("m1:6379"));
            assert_eq!(status.current_token, token);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "invalidation round never timed out"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // No switch happened: nothing was promoted, nothing reconfigured.
    assert_ne!(cluster.m2.role(), RedisRole::Master);
    assert!(cluster.bus.published("reconfigure").is_empty());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_empty_fleet_switches_without_invalidation() {
    let cluster = Cluster::start(test_settings(&[])).await;
    cluster.m1.set_available(false);
    cluster
        .events
        .send(CoordinatorEvent::MasterUnavailable)
        .await
        .unwrap();

    let reconfigures = cluster
        .bus
        .wait_for("reconfigure", 1, Duration::from_secs(2))
        .await;
    assert_eq!(reconfigures[0]["server"], "m2:6379");
    assert!(cluster.bus.published("invalidate").is_empty());

    let status = cluster.status().await;
    assert_eq!(status.current_master.as_deref(), Some("m2:6379"));

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_unknown_client_triggers_notification() {
    let cluster = Cluster::start(test_settings(&["c1", "c2"])).await;

    cluster
        .send(ControlMessage::Heartbeat {
            id: "x".to_string(),
        })
        .await;

    let notifications = cluster
        .bus
        .wait_for("system_notification", 1, Duration::from_secs(2))
        .await;
    assert!(notifications[0]["message"].as_str().unwrap().contains("'x'"));

    let status = cluster.status().await;
    assert_eq!(status.unknown_client_ids, vec!["x"]);
    assert_eq!(status.configured_client_ids, vec!["c1", "c2"]);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_watcher_escalation_drives_switch() {
    // Wire the real watcher in: fast ticks, budget of 2, no clients so the
    // switch happens as soon as the watcher escalates.
    let settings = Settings {
        master_retries: 2,
        ..test_settings(&[])
    };
    let m1 = ScriptedRedis::master("m1:6379");
    let m2 = ScriptedRedis::slave("m2:6379", "m1:6379");
    tokio::fs::write(&settings.master_file, "m1:6379\n")
        .await
        .unwrap();
    let cluster = Cluster::start_with(settings.clone(), m1, m2).await;

    let watcher = MasterWatcher::new(
        vec![cluster.m1.clone(), cluster.m2.clone()],
        settings.watcher_interval,
        settings.master_retries,
        cluster.events.clone(),
        cluster.watcher_rx.clone(),
        cluster.cancel.clone(),
    );
    let watcher_handle = watcher.spawn();

    // Healthy master: the watcher keeps confirming it.
    cluster
        .bus
        .wait_for("reconfigure", 1, Duration::from_secs(2))
        .await;

    cluster.m1.set_available(false);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let status = cluster.status().await;
        if status.current_master.as_deref() == Some("m2:6379") {
            assert_eq!(status.state, CoordinatorState::Running);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "watcher never escalated to a switch"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(cluster.m2.role(), RedisRole::Master);

    cluster.cancel.cancel();
    let _ = watcher_handle.await;
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_stray_master_is_demoted_after_switch() {
    // Split brain: m1 dies, m3 also claims the master role. After promoting
    // m2, the coordinator points m3 at the new master.
    let settings = Settings {
        redis_servers: vec![
            "m1:6379".parse().unwrap(),
            "m2:6379".parse().unwrap(),
            "m3:6379".parse().unwrap(),
        ],
        ..test_settings(&[])
    };
    let m1 = ScriptedRedis::master("m1:6379");
    let m2 = ScriptedRedis::slave("m2:6379", "m1:6379");
    let m3 = ScriptedRedis::master("m3:6379");
    let servers: Vec<Arc<dyn RedisServer>> = vec![m1.clone(), m2.clone(), m3.clone()];
    tokio::fs::write(&settings.master_file, "m1:6379\n")
        .await
        .unwrap();

    let bus = Arc::new(CapturingBus::default());
    let (event_tx, event_rx) = mpsc::channel(256);
    let (watcher_tx, _watcher_rx) = watch::channel(WatcherCommand::Pause);
    let cancel = CancellationToken::new();
    let coordinator = Coordinator::start(
        settings.clone(),
        servers,
        bus.clone(),
        event_tx.clone(),
        watcher_tx,
    )
    .await
    .unwrap();
    let handle = tokio::spawn(coordinator.run(event_rx, cancel.clone()));

    m1.set_available(false);
    event_tx
        .send(CoordinatorEvent::MasterUnavailable)
        .await
        .unwrap();

    let reconfigures = bus.wait_for("reconfigure", 1, Duration::from_secs(2)).await;
    assert_eq!(reconfigures[0]["server"], "m2:6379");
    assert_eq!(m2.role(), RedisRole::Master);
    assert_eq!(
        m3.role(),
        RedisRole::Slave {
            master: "m2:6379".parse().unwrap()
        }
    );

    cancel.cancel();
    let _ = handle.await;
    cleanup_master_file(&settings.master_file).await;
}
