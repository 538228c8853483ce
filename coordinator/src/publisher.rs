use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redmaster_core::Result;

/// Publish seam between the coordinator and the control bus.
///
/// The coordinator never aborts on a failed publish; callers log and count
/// the failure and the next round implicitly retries.
#[async_trait]
pub trait ControlPublisher: Send + Sync {
    async fn publish(&self, routing_key: &str, payload: serde_json::Value) -> Result<()>;
}

/// Redis Pub/Sub transport for coordinator broadcasts.
///
/// The connection is acquired once at startup and held for the process
/// lifetime; it is released when the coordinator shuts down and drops the
/// publisher.
pub struct BusPublisher {
    conn: MultiplexedConnection,
}

impl BusPublisher {
    pub async fn connect(bus_url: &str) -> Result<Self> {
        let client = redis::Client::open(bus_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        tracing::info!("Connected publisher to control bus");
        Ok(Self { conn })
    }
}

impl Drop for BusPublisher {
    fn drop(&mut self) {
        tracing::debug!("Control bus publisher released");
    }
}

#[async_trait]
impl ControlPublisher for BusPublisher {
    async fn publish(&self, routing_key: &str, payload: serde_json::Value) -> Result<()> {
        let body = serde_json::to_string(&payload)?;
        let mut conn = self.conn.clone();
        redis::cmd("PUBLISH")
            .arg(routing_key)
            .arg(&body)
            .query_async::<()>(&mut conn)
            .await?;
        tracing::debug!(routing_key, "Published control message");
        Ok(())
    }
}
