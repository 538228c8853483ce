use async_trait::async_trait;
use redmaster_coordinator::ControlPublisher;
use redmaster_core::{EndpointAddr, EndpointStatus, RedisRole, RedisServer, Result, Settings};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Scripted pool member: role and reachability are flipped by the test.
pub struct ScriptedRedis {
    addr: EndpointAddr,
    role: Mutex<RedisRole>,
    available: AtomicBool,
}

impl ScriptedRedis {
    pub fn master(addr: &str) -> Arc<Self> {
        Self::with_role(addr, RedisRole::Master)
    }

    pub fn slave(addr: &str, master: &str) -> Arc<Self> {
        Self::with_role(
            addr,
            RedisRole::Slave {
                master: master.parse().unwrap(),
            },
        )
    }

    pub fn with_role(addr: &str, role: RedisRole) -> Arc<Self> {
        Arc::new(Self {
            addr: addr.parse().unwrap(),
            role: Mutex::new(role),
            available: AtomicBool::new(true),
        })
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn role(&self) -> RedisRole {
        self.role.lock().unwrap().clone()
    }
}

#[async_trait]
impl RedisServer for ScriptedRedis {
    fn addr(&self) -> &EndpointAddr {
        &self.addr
    }

    async fn probe(&self) -> EndpointStatus {
        if !self.available.load(Ordering::SeqCst) {
            return EndpointStatus::unreachable(self.addr.clone());
        }
        EndpointStatus {
            addr: self.addr.clone(),
            role: self.role(),
            available: true,
        }
    }

    async fn promote_to_master(&self) -> Result<()> {
        *self.role.lock().unwrap() = RedisRole::Master;
        Ok(())
    }

    async fn follow(&self, master: &EndpointAddr) -> Result<()> {
        *self.role.lock().unwrap() = RedisRole::Slave {
            master: master.clone(),
        };
        Ok(())
    }
}

/// Captures everything the coordinator broadcasts.
#[derive(Default)]
pub struct CapturingBus {
    messages: Mutex<Vec<(String, serde_json::Value)>>,
}

impl CapturingBus {
    pub fn published(&self, routing_key: &str) -> Vec<serde_json::Value> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key == routing_key)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Poll until at least `count` messages hit `routing_key`.
    pub async fn wait_for(
        &self,
        routing_key: &str,
        count: usize,
        timeout: Duration,
    ) -> Vec<serde_json::Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let published = self.published(routing_key);
            if published.len() >= count {
                return published;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "Timed out waiting for {} '{}' messages, got {}",
                    count,
                    routing_key,
                    published.len()
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl ControlPublisher for CapturingBus {
    async fn publish(&self, routing_key: &str, payload: serde_json::Value) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push((routing_key.to_string(), payload));
        Ok(())
    }
}

/// Settings tuned for fast tests, with an isolated master file.
pub fn test_settings(clients: &[&str]) -> Settings {
    Settings {
        redis_servers: vec![
            "m1:6379".parse().unwrap(),
            "m2:6379".parse().unwrap(),
        ],
        client_ids: clients.iter().map(|s| s.to_string()).collect(),
        invalidation_timeout: Duration::from_millis(200),
        watcher_interval: Duration::from_millis(50),
        master_file: temp_master_file(),
        ..Default::default()
    }
}

pub fn temp_master_file() -> PathBuf {
    std::env::temp_dir().join(format!("redmaster-it-{}", Uuid::new_v4()))
}

pub async fn cleanup_master_file(path: &PathBuf) {
    let _ = tokio::fs::remove_file(path).await;
}
