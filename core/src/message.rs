use crate::endpoint::EndpointAddr;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Routing keys consumed from the control bus.
pub const PONG: &str = "pong";
pub const CLIENT_INVALIDATED: &str = "client_invalidated";
pub const CLIENT_STARTED: &str = "client_started";
pub const HEARTBEAT: &str = "heartbeat";

/// Routing keys published by the coordinator.
pub const INVALIDATE: &str = "invalidate";
pub const RECONFIGURE: &str = "reconfigure";
pub const SYSTEM_NOTIFICATION: &str = "system_notification";

/// All inbound routing keys, for the bus subscription.
pub const INBOUND_KEYS: [&str; 4] = [PONG, CLIENT_INVALIDATED, CLIENT_STARTED, HEARTBEAT];

/// Inbound control message, demultiplexed by routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Pong { id: String, token: u64 },
    ClientInvalidated { id: String, token: u64 },
    ClientStarted { id: String },
    Heartbeat { id: String },
}

/// JSON body of every inbound control message.
#[derive(Debug, Serialize, Deserialize)]
struct InboundPayload {
    id: String,
    #[serde(default)]
    token: Option<u64>,
}

impl ControlMessage {
    /// Parse a bus message. Token-bearing kinds reject payloads without one.
    pub fn parse(routing_key: &str, payload: &str) -> Result<Self> {
        let body: InboundPayload = serde_json::from_str(payload)?;
        match routing_key {
            PONG => Ok(Self::Pong {
                token: require_token(routing_key, body.token)?,
                id: body.id,
            }),
            CLIENT_INVALIDATED => Ok(Self::ClientInvalidated {
                token: require_token(routing_key, body.token)?,
                id: body.id,
            }),
            CLIENT_STARTED => Ok(Self::ClientStarted { id: body.id }),
            HEARTBEAT => Ok(Self::Heartbeat { id: body.id }),
            other => Err(Error::bus(format!("unknown routing key '{}'", other))),
        }
    }

    pub fn routing_key(&self) -> &'static str {
        match self {
            Self::Pong { .. } => PONG,
            Self::ClientInvalidated { .. } => CLIENT_INVALIDATED,
            Self::ClientStarted { .. } => CLIENT_STARTED,
            Self::Heartbeat { .. } => HEARTBEAT,
        }
    }

    pub fn client_id(&self) -> &str {
        match self {
            Self::Pong { id, .. }
            | Self::ClientInvalidated { id, .. }
            | Self::ClientStarted { id }
            | Self::Heartbeat { id } => id,
        }
    }
}

fn require_token(routing_key: &str, token: Option<u64>) -> Result<u64> {
    token.ok_or_else(|| Error::bus(format!("'{}' payload is missing a token", routing_key)))
}

/// Body of the `invalidate` broadcast.
#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidatePayload {
    pub token: u64,
}

/// Body of the `reconfigure` broadcast.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReconfigurePayload {
    pub server: String,
    pub token: u64,
}

impl ReconfigurePayload {
    pub fn new(server: &EndpointAddr, token: u64) -> Self {
        Self {
            server: server.to_string(),
            token,
        }
    }
}

/// Body of the `system_notification` broadcast.
#[derive(Debug, Serialize, Deserialize)]
pub struct SystemNotificationPayload {
    pub message: String,
}
