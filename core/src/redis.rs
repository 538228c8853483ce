use crate::endpoint::{EndpointAddr, EndpointStatus, RedisRole};
use crate::error::{Error, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Value;
use std::time::Duration;
use tokio::sync::Mutex;

/// One member of the configured Redis pool.
///
/// The coordinator only ever talks to a pool member through this trait, so
/// tests can substitute scripted instances for real servers.
#[async_trait]
pub trait RedisServer: Send + Sync {
    fn addr(&self) -> &EndpointAddr;

    /// Classify this instance: role and reachability. Never fails; an
    /// unreachable or confused instance reports `Unknown` / unavailable.
    async fn probe(&self) -> EndpointStatus;

    /// `REPLICAOF NO ONE`
    async fn promote_to_master(&self) -> Result<()>;

    /// `REPLICAOF <master.host> <master.port>`
    async fn follow(&self, master: &EndpointAddr) -> Result<()>;
}

/// Production pool member backed by the `redis` crate.
///
/// The multiplexed connection is established lazily and cached; any command
/// error drops the cached connection so the next probe reconnects from
/// scratch.
pub struct RedisHandle {
    addr: EndpointAddr,
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    timeout: Duration,
}

impl RedisHandle {
    pub fn new(addr: EndpointAddr, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(addr.url())?;
        Ok(Self {
            addr,
            client,
            conn: Mutex::new(None),
            timeout,
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = tokio::time::timeout(
            self.timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| Error::timeout(format!("connect to {} timed out", self.addr)))??;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn drop_connection(&self) {
        *self.conn.lock().await = None;
    }

    async fn command(&self, cmd: &redis::Cmd) -> Result<Value> {
        let mut conn = self.connection().await?;
        let result = tokio::time::timeout(self.timeout, cmd.query_async::<Value>(&mut conn))
            .await
            .map_err(|_| Error::timeout(format!("command to {} timed out", self.addr)));
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.drop_connection().await;
                Err(e.into())
            }
            Err(e) => {
                self.drop_connection().await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl RedisServer for RedisHandle {
    fn addr(&self) -> &EndpointAddr {
        &self.addr
    }

    async fn probe(&self) -> EndpointStatus {
        match self.command(&redis::cmd("ROLE")).await {
            Ok(reply) => EndpointStatus {
                addr: self.addr.clone(),
                role: parse_role_reply(&reply),
                available: true,
            },
            Err(e) => {
                tracing::debug!(addr = %self.addr, "Probe failed: {}", e);
                EndpointStatus::unreachable(self.addr.clone())
            }
        }
    }

    async fn promote_to_master(&self) -> Result<()> {
        self.command(redis::cmd("REPLICAOF").arg("NO").arg("ONE"))
            .await?;
        tracing::info!(addr = %self.addr, "Promoted to master");
        Ok(())
    }

    async fn follow(&self, master: &EndpointAddr) -> Result<()> {
        self.command(
            redis::cmd("REPLICAOF")
                .arg(&master.host)
                .arg(master.port),
        )
        .await?;
        tracing::info!(addr = %self.addr, master = %master, "Reconfigured as slave");
        Ok(())
    }
}

/// Map a `ROLE` reply onto a role.
///
/// `["master", ...]` is a master; `["slave", host, port, ...]` is a slave of
/// `host:port`. Anything else (sentinel, protocol surprises) is `Unknown`.
fn parse_role_reply(value: &Value) -> RedisRole {
    let items = match value {
        Value::Array(items) if !items.is_empty() => items,
        _ => return RedisRole::Unknown,
    };
    match as_string(&items[0]).as_deref() {
        Some("master") => RedisRole::Master,
        Some("slave") => {
            let host = items.get(1).and_then(as_string);
            let port = items.get(2).and_then(as_u16);
            match (host, port) {
                (Some(host), Some(port)) => RedisRole::Slave {
                    master: EndpointAddr::new(host, port),
                },
                _ => RedisRole::Unknown,
            }
        }
        _ => RedisRole::Unknown,
    }
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
        Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

fn as_u16(value: &Value) -> Option<u16> {
    match value {
        Value::Int(n) => u16::try_from(*n).ok(),
        Value::BulkString(bytes) => std::str::from_utf8(bytes).ok()?.parse().ok(),
        _ => None,
    }
}
