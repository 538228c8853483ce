use crate::endpoint::{EndpointAddr, EndpointStatus, RedisRole};
use crate::redis::RedisServer;
use futures_util::future::join_all;
use std::sync::Arc;

/// Classified snapshot of the configured pool, one status per endpoint.
///
/// Every endpoint lands in exactly one partition: master, slave, or unknown
/// (unreachable instances are unknown).
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    statuses: Vec<EndpointStatus>,
}

impl PoolSnapshot {
    pub fn new(statuses: Vec<EndpointStatus>) -> Self {
        Self { statuses }
    }

    pub fn statuses(&self) -> &[EndpointStatus] {
        &self.statuses
    }

    pub fn status_of(&self, addr: &EndpointAddr) -> Option<&EndpointStatus> {
        self.statuses.iter().find(|s| &s.addr == addr)
    }

    /// Endpoints that reported the master role, in configuration order.
    pub fn masters(&self) -> Vec<EndpointAddr> {
        self.statuses
            .iter()
            .filter(|s| s.role.is_master())
            .map(|s| s.addr.clone())
            .collect()
    }

    /// Endpoints that reported the slave role, in configuration order.
    pub fn slaves(&self) -> Vec<EndpointAddr> {
        self.statuses
            .iter()
            .filter(|s| matches!(s.role, RedisRole::Slave { .. }))
            .map(|s| s.addr.clone())
            .collect()
    }

    /// Unreachable or unclassifiable endpoints.
    pub fn unknown(&self) -> Vec<EndpointAddr> {
        self.statuses
            .iter()
            .filter(|s| s.role == RedisRole::Unknown)
            .map(|s| s.addr.clone())
            .collect()
    }

    /// Reachable endpoints currently replicating `master`, in order.
    pub fn slaves_of(&self, master: &EndpointAddr) -> Vec<EndpointAddr> {
        self.statuses
            .iter()
            .filter(|s| s.available && s.role.is_slave_of(master))
            .map(|s| s.addr.clone())
            .collect()
    }

    pub fn is_master(&self, addr: &EndpointAddr) -> bool {
        self.status_of(addr).is_some_and(|s| s.role.is_master())
    }

    pub fn is_slave(&self, addr: &EndpointAddr) -> bool {
        self.status_of(addr)
            .is_some_and(|s| matches!(s.role, RedisRole::Slave { .. }))
    }

    /// The pool's master, iff exactly one endpoint holds the role.
    pub fn auto_detect_master(&self) -> Option<EndpointAddr> {
        let masters = self.masters();
        match masters.as_slice() {
            [single] => Some(single.clone()),
            _ => None,
        }
    }
}

/// Probe every pool member concurrently and build a fresh snapshot.
pub async fn probe_all(servers: &[Arc<dyn RedisServer>]) -> PoolSnapshot {
    let statuses = join_all(servers.iter().map(|s| s.probe())).await;
    let snapshot = PoolSnapshot::new(statuses);
    tracing::debug!(
        masters = snapshot.masters().len(),
        slaves = snapshot.slaves().len(),
        unknown = snapshot.unknown().len(),
        "Probed redis pool"
    );
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(addr: &str, role: RedisRole) -> EndpointStatus {
        EndpointStatus {
            addr: addr.parse().unwrap(),
            available: role != RedisRole::Unknown,
            role,
        }
    }

    fn slave_of(addr: &str, master: &str) -> EndpointStatus {
        status(
            addr,
            RedisRole::Slave {
                master: master.parse().unwrap(),
            },
        )
    }

    #[test]
    fn test_partitions_are_exhaustive_and_disjoint() {
        let pool = PoolSnapshot::new(vec![
            status("a:1", RedisRole::Master),
            slave_of("b:2", "a:1"),
            status("c:3", RedisRole::Unknown),
        ]);
        assert_eq!(pool.masters(), vec!["a:1".parse().unwrap()]);
        assert_eq!(pool.slaves(), vec!["b:2".parse().unwrap()]);
        assert_eq!(pool.unknown(), vec!["c:3".parse().unwrap()]);
    }

    #[test]
    fn test_auto_detect_single_master() {
        let pool = PoolSnapshot::new(vec![
            status("a:1", RedisRole::Master),
            slave_of("b:2", "a:1"),
        ]);
        assert_eq!(pool.auto_detect_master(), Some("a:1".parse().unwrap()));
    }

    #[test]
    fn test_auto_detect_refuses_ambiguity() {
        let none = PoolSnapshot::new(vec![
            slave_of("a:1", "c:9"),
            status("b:2", RedisRole::Unknown),
        ]);
        assert_eq!(none.auto_detect_master(), None);

        let two = PoolSnapshot::new(vec![
            status("a:1", RedisRole::Master),
            status("b:2", RedisRole::Master),
        ]);
        assert_eq!(two.auto_detect_master(), None);
    }

    #[test]
    fn test_slaves_of_filters_by_master_and_reachability() {
        let mut orphan = slave_of("d:4", "a:1");
        orphan.available = false;
        let pool = PoolSnapshot::new(vec![
            status("a:1", RedisRole::Master),
            slave_of("b:2", "a:1"),
            slave_of("c:3", "x:9"),
            orphan,
        ]);
        assert_eq!(pool.slaves_of(&"a:1".parse().unwrap()), vec!["b:2".parse().unwrap()]);
    }
}
