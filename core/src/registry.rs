use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

/// Default cap on the number of unknown client ids retained.
pub const DEFAULT_UNKNOWN_CLIENT_CAPACITY: usize = 100;

/// Tracks the configured client fleet and anything else that talks to us.
///
/// The expected set is fixed at construction. Ids seen on the bus that are
/// not expected are retained in a bounded unknown set; once the cap is
/// reached the oldest unknown id (by last-seen timestamp) is evicted
/// together with its last-seen entry, so the registry cannot grow without
/// bound under a flood of misconfigured clients.
pub struct ClientRegistry {
    expected: BTreeSet<String>,
    last_seen: HashMap<String, DateTime<Utc>>,
    unknown: HashSet<String>,
    unknown_capacity: usize,
}

impl ClientRegistry {
    pub fn new(expected: impl IntoIterator<Item = String>, unknown_capacity: usize) -> Self {
        Self {
            expected: expected.into_iter().collect(),
            last_seen: HashMap::new(),
            unknown: HashSet::new(),
            unknown_capacity: unknown_capacity.max(1),
        }
    }

    /// The configured client ids.
    pub fn expected(&self) -> &BTreeSet<String> {
        &self.expected
    }

    /// True iff `id` is one of the configured clients.
    pub fn known(&self, id: &str) -> bool {
        self.expected.contains(id)
    }

    /// Record a message of any kind from `id`.
    pub fn seen(&mut self, id: &str, now: DateTime<Utc>) {
        self.last_seen.insert(id.to_string(), now);
    }

    pub fn last_seen(&self, id: &str) -> Option<DateTime<Utc>> {
        self.last_seen.get(id).copied()
    }

    /// Expected clients that have never been seen.
    pub fn unseen_clients(&self) -> BTreeSet<String> {
        self.expected
            .iter()
            .filter(|id| !self.last_seen.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Expected clients whose last message is at least `threshold` old.
    pub fn unresponsive(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Vec<(String, DateTime<Utc>)> {
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
        let mut stale: Vec<(String, DateTime<Utc>)> = self
            .expected
            .iter()
            .filter_map(|id| {
                let seen = *self.last_seen.get(id)?;
                (now.signed_duration_since(seen) >= threshold).then(|| (id.clone(), seen))
            })
            .collect();
        stale.sort();
        stale
    }

    /// Record an id that is not part of the configured fleet.
    ///
    /// Returns true if the id was not already in the unknown set, i.e. this
    /// is its first occurrence and a notification should go out.
    pub fn note_unknown(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        let newly_added = self.unknown.insert(id.to_string());
        self.last_seen.insert(id.to_string(), now);

        while self.unknown.len() > self.unknown_capacity {
            let oldest = self
                .unknown
                .iter()
                .min_by_key(|u| self.last_seen.get(*u).copied().unwrap_or(DateTime::<Utc>::MIN_UTC))
                .cloned();
            match oldest {
                Some(evicted) => {
                    self.unknown.remove(&evicted);
                    self.last_seen.remove(&evicted);
                    tracing::debug!(id = %evicted, "Evicted oldest unknown client");
                }
                None => break,
            }
        }
        newly_added
    }

    /// Sorted snapshot of the unknown ids, for the status report.
    pub fn unknown_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.unknown.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn unknown_len(&self) -> usize {
        self.unknown.len()
    }
}
