//! Bridge statistics: lock-free counters the workers bump on their hot
//! paths, and a serializable snapshot the supervisor assembles on demand.
//!
//! The snapshot serializes with serde so the enclosing program can dump it
//! as one JSON document at shutdown (or whenever it likes) without this
//! crate caring where it goes.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::events::CallLogEntry;
use crate::modem::ModemCounters;
use crate::pipeline::buffer::BufferCounters;
use crate::pipeline::scheduler::SchedulerCounters;

/// Counters shared across threads, relaxed ordering throughout - these are
/// statistics, not synchronization.
#[derive(Debug, Default)]
pub struct SharedCounters {
    /// Bytes drained toward the network
    pub s2n_bytes: AtomicU64,
    /// Bytes drained toward the serial line
    pub n2s_bytes: AtomicU64,
    /// ANSI sequences stripped on the S2N path
    pub ansi_dropped: AtomicU64,
    /// Telnet protocol violations observed
    pub telnet_violations: AtomicU64,
    /// Completed TCP connections
    pub connects: AtomicU64,
    /// Connection teardowns of any cause
    pub disconnects: AtomicU64,
}

impl SharedCounters {
    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Point-in-time statistics for one pipeline direction.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DirectionStats {
    pub bytes: u64,
    pub buffer: BufferCounters,
}

/// The full serializable statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// When the snapshot was taken
    pub taken_at: jiff::Timestamp,
    pub serial_to_net: DirectionStats,
    pub net_to_serial: DirectionStats,
    pub ansi_sequences_dropped: u64,
    pub telnet_violations: u64,
    pub connects: u64,
    pub disconnects: u64,
    pub modem: ModemCounters,
    pub scheduler: SchedulerCounters,
    pub supervisor_transitions: u64,
    pub call_log: Vec<CallLogEntry>,
}

impl StatsSnapshot {
    /// Assemble a snapshot from the live counters.
    pub fn collect(
        shared: &SharedCounters,
        s2n_buffer: BufferCounters,
        n2s_buffer: BufferCounters,
        modem: ModemCounters,
        scheduler: SchedulerCounters,
        supervisor_transitions: u64,
        call_log: Vec<CallLogEntry>,
    ) -> Self {
        Self {
            taken_at: jiff::Timestamp::now(),
            serial_to_net: DirectionStats {
                bytes: SharedCounters::get(&shared.s2n_bytes),
                buffer: s2n_buffer,
            },
            net_to_serial: DirectionStats {
                bytes: SharedCounters::get(&shared.n2s_bytes),
                buffer: n2s_buffer,
            },
            ansi_sequences_dropped: SharedCounters::get(&shared.ansi_dropped),
            telnet_violations: SharedCounters::get(&shared.telnet_violations),
            connects: SharedCounters::get(&shared.connects),
            disconnects: SharedCounters::get(&shared.disconnects),
            modem,
            scheduler,
            supervisor_transitions,
            call_log,
        }
    }

    /// One-line JSON rendering for the shutdown log.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_serializes() {
        let shared = SharedCounters::default();
        shared.add(&shared.s2n_bytes, 1234);
        shared.add(&shared.connects, 1);

        let snapshot = StatsSnapshot::collect(
            &shared,
            BufferCounters::default(),
            BufferCounters::default(),
            ModemCounters::default(),
            SchedulerCounters::default(),
            7,
            Vec::new(),
        );

        let json = snapshot.to_json();
        assert!(json.contains("\"bytes\":1234"));
        assert!(json.contains("\"connects\":1"));
        assert!(json.contains("\"supervisor_transitions\":7"));
    }
}
