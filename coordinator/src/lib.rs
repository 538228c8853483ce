//! Failover coordination for a pool of Redis instances.
//!
//! This crate provides:
//! - The coordinator state machine: one task owning all coordination state,
//!   fed by a serialized event queue (bus messages, watcher reports, timer
//!   expiries, status queries)
//! - The master watcher: periodic liveness probe of the current master with
//!   a retry budget before escalation
//! - The bus dispatcher: Pub/Sub subscriber demultiplexing client control
//!   messages into the event queue
//! - The bus publisher seam and its Redis Pub/Sub transport
//!
//! # Protocol
//!
//! When the watcher exhausts its retries the coordinator opens an
//! invalidation round: it advances the round token, broadcasts
//! `invalidate`, and collects `pong` and `client_invalidated` acks from
//! every configured client. Only when the whole fleet has acknowledged does
//! it promote a new master, persist it, and broadcast `reconfigure`. A
//! round that cannot complete is bounded by a timeout, after which the old
//! master is retained. Stale tokens never mutate state, so replies from a
//! closed round are harmless.

mod coordinator;
mod dispatcher;
mod publisher;
mod watcher;

pub use coordinator::{
    Coordinator, CoordinatorEvent, CoordinatorState, StatusReport, WatcherCommand,
};
pub use dispatcher::BusListener;
pub use publisher::{BusPublisher, ControlPublisher};
pub use watcher::MasterWatcher;
