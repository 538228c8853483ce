// ABOUTME: Global metrics counters for the Prometheus endpoint
// ABOUTME: Atomic counters incremented by the coordinator and read from the HTTP server

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics counters accessible from any crate
pub struct Metrics {
    /// Control messages received from the bus
    pub messages_total: AtomicU64,
    /// Messages dropped because their token belonged to a closed round
    pub stale_tokens_dropped: AtomicU64,
    /// Payloads that failed to parse and were dropped
    pub malformed_messages: AtomicU64,
    /// First occurrences of unknown client ids
    pub unknown_clients_reported: AtomicU64,
    /// Invalidation rounds started
    pub invalidation_rounds: AtomicU64,
    /// Invalidation rounds cancelled by timeout
    pub invalidation_timeouts: AtomicU64,
    /// Master switches completed
    pub master_switches: AtomicU64,
    /// Master switches abandoned for lack of a candidate
    pub failed_switches: AtomicU64,
    /// Bus publishes that failed
    pub publish_failures: AtomicU64,
    /// Master file writes that failed
    pub persistence_failures: AtomicU64,
}

impl Metrics {
    const fn new() -> Self {
        Self {
            messages_total: AtomicU64::new(0),
            stale_tokens_dropped: AtomicU64::new(0),
            malformed_messages: AtomicU64::new(0),
            unknown_clients_reported: AtomicU64::new(0),
            invalidation_rounds: AtomicU64::new(0),
            invalidation_timeouts: AtomicU64::new(0),
            master_switches: AtomicU64::new(0),
            failed_switches: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_message(&self) {
        self.messages_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stale_token(&self) {
        self.stale_tokens_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_malformed(&self) {
        self.malformed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unknown_client(&self) {
        self.unknown_clients_reported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_invalidation_round(&self) {
        self.invalidation_rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_invalidation_timeout(&self) {
        self.invalidation_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_master_switch(&self) {
        self.master_switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed_switch(&self) {
        self.failed_switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Format all metrics as Prometheus text
    pub fn to_prometheus(&self) -> String {
        let counters: [(&str, &str, &AtomicU64); 10] = [
            (
                "redmaster_messages_total",
                "Control messages received from the bus",
                &self.messages_total,
            ),
            (
                "redmaster_stale_tokens_dropped_total",
                "Messages dropped for carrying a token from a closed round",
                &self.stale_tokens_dropped,
            ),
            (
                "redmaster_malformed_messages_total",
                "Bus payloads that failed to parse",
                &self.malformed_messages,
            ),
            (
                "redmaster_unknown_clients_total",
                "First occurrences of unknown client ids",
                &self.unknown_clients_reported,
            ),
            (
                "redmaster_invalidation_rounds_total",
                "Invalidation rounds started",
                &self.invalidation_rounds,
            ),
            (
                "redmaster_invalidation_timeouts_total",
                "Invalidation rounds cancelled by timeout",
                &self.invalidation_timeouts,
            ),
            (
                "redmaster_master_switches_total",
                "Master switches completed",
                &self.master_switches,
            ),
            (
                "redmaster_failed_switches_total",
                "Master switches abandoned for lack of a candidate",
                &self.failed_switches,
            ),
            (
                "redmaster_publish_failures_total",
                "Control bus publishes that failed",
                &self.publish_failures,
            ),
            (
                "redmaster_persistence_failures_total",
                "Master file writes that failed",
                &self.persistence_failures,
            ),
        ];

        let mut output = String::new();
        for (name, help, counter) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n\n", name, counter.load(Ordering::Relaxed)));
        }
        output
    }
}

/// Global metrics instance
pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);
