//! Core types for the redmaster Redis failover coordinator.
//!
//! This crate carries everything the coordinator state machine builds on:
//! - Endpoint identity and probed role/reachability snapshots
//! - The `RedisServer` trait and its `redis`-crate-backed implementation
//! - The concurrent pool probe and classified pool snapshots
//! - The client registry (expected fleet, unknown ids, liveness)
//! - The monotonic token mint tagging every protocol round
//! - The one-line master file record
//! - The control message model shared with clients on the bus
//! - Settings, errors, and the process-global metrics

pub mod config;
pub mod endpoint;
pub mod error;
pub mod master_file;
pub mod message;
pub mod metrics;
pub mod probe;
pub mod redis;
pub mod registry;
pub mod token;

pub use config::Settings;
pub use endpoint::{EndpointAddr, EndpointStatus, RedisRole};
pub use error::{Error, Result};
pub use master_file::MasterFile;
pub use message::ControlMessage;
pub use probe::{probe_all, PoolSnapshot};
pub use self::redis::{RedisHandle, RedisServer};
pub use registry::ClientRegistry;
pub use token::TokenMint;
