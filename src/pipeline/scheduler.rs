//! Quantum-based fair scheduling between the two pipelines.
//!
//! The two directions share a half-duplex serial line, so someone has to
//! decide who progresses. Each scheduling decision hands one direction a
//! grant: a time budget (the quantum) plus a byte budget; the direction
//! runs until either expires, its buffer empties, or the peer starves.
//!
//! Selection is weighted round-robin over the directions with pending
//! work, with one override: a direction that has waited longer than the
//! starvation threshold with a non-empty buffer is scheduled
//! unconditionally. The quantum adapts between bounds - shrinking when
//! observed latency overshoots the target, growing when grants go mostly
//! unused and switching overhead is the only thing left to optimize.
//!
//! All decisions take `now` as an argument; nothing in here reads the
//! clock, which keeps every policy branch replayable in tests.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::PipelineConfig;

/// Step by which the adaptive quantum moves.
const QUANTUM_STEP_MS: u64 = 10;
/// A grant that used less than this fraction of its byte budget counts as
/// under-utilized.
const UNDERUSE_RATIO: f64 = 0.25;

/// Pipeline direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Serial ingress toward network egress
    SerialToNet,
    /// Network ingress toward serial egress
    NetToSerial,
}

impl Direction {
    pub fn index(self) -> usize {
        match self {
            Direction::SerialToNet => 0,
            Direction::NetToSerial => 1,
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::SerialToNet => Direction::NetToSerial,
            Direction::NetToSerial => Direction::SerialToNet,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::SerialToNet => write!(f, "serial->net"),
            Direction::NetToSerial => write!(f, "net->serial"),
        }
    }
}

/// One scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    pub direction: Direction,
    /// Time budget for this quantum
    pub quantum: Duration,
    /// Byte budget for this quantum
    pub byte_budget: usize,
    /// True when this grant came from the starvation override
    pub starvation_override: bool,
}

/// Scheduler counters for the stats snapshot.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct SchedulerCounters {
    pub grants: [u64; 2],
    pub bytes: [u64; 2],
    pub starvation_overrides: u64,
    pub quantum_shrinks: u64,
    pub quantum_grows: u64,
}

/// The weighted fair scheduler.
#[derive(Debug)]
pub struct QuantumScheduler {
    weights: [u32; 2],
    quantum_ms: u64,
    min_quantum_ms: u64,
    max_quantum_ms: u64,
    quantum_bytes: usize,
    starvation: Duration,
    latency_target: Duration,
    /// When each direction last made drain progress
    last_progress: [Option<Instant>; 2],
    /// Weighted-round-robin credit per direction
    credit: [f64; 2],
    counters: SchedulerCounters,
}

impl QuantumScheduler {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            weights: [config.serial_weight.max(1), config.telnet_weight.max(1)],
            quantum_ms: config
                .quantum_ms
                .clamp(config.min_quantum_ms, config.max_quantum_ms),
            min_quantum_ms: config.min_quantum_ms,
            max_quantum_ms: config.max_quantum_ms,
            quantum_bytes: config.quantum_bytes,
            starvation: Duration::from_millis(config.starvation_ms),
            latency_target: Duration::from_millis(config.latency_target_ms),
            last_progress: [None; 2],
            credit: [0.0; 2],
            counters: SchedulerCounters::default(),
        }
    }

    /// Current adaptive quantum.
    pub fn current_quantum(&self) -> Duration {
        Duration::from_millis(self.quantum_ms)
    }

    pub fn counters(&self) -> SchedulerCounters {
        self.counters
    }

    /// Pick the next direction to run given which directions have pending
    /// work. Returns `None` when neither does.
    pub fn next_grant(&mut self, pending: [bool; 2], now: Instant) -> Option<Grant> {
        // Starvation override first: longest-waiting starved direction wins
        let mut starved: Option<(Direction, Duration)> = None;
        for dir in [Direction::SerialToNet, Direction::NetToSerial] {
            let i = dir.index();
            if !pending[i] {
                continue;
            }
            let waited = match self.last_progress[i] {
                Some(t) => now.duration_since(t),
                // Never progressed: measure from scheduler start per first use
                None => {
                    self.last_progress[i] = Some(now);
                    Duration::ZERO
                }
            };
            if waited >= self.starvation && starved.is_none_or(|(_, w)| waited > w) {
                starved = Some((dir, waited));
            }
        }
        if let Some((dir, waited)) = starved {
            debug!(%dir, waited_ms = waited.as_millis() as u64, "starvation override");
            self.counters.starvation_overrides += 1;
            return Some(self.grant(dir, true));
        }

        // Weighted round-robin: the pending direction with the most credit
        // (earned proportionally to its weight) runs next
        let total_weight: f64 = pending
            .iter()
            .zip(self.weights)
            .filter(|(p, _)| **p)
            .map(|(_, w)| f64::from(w))
            .sum();
        if total_weight == 0.0 {
            return None;
        }
        for dir in [Direction::SerialToNet, Direction::NetToSerial] {
            let i = dir.index();
            if pending[i] {
                self.credit[i] += f64::from(self.weights[i]) / total_weight;
            }
        }

        let chosen = if pending[0] && (!pending[1] || self.credit[0] >= self.credit[1]) {
            Direction::SerialToNet
        } else {
            Direction::NetToSerial
        };
        self.credit[chosen.index()] -= 1.0;
        Some(self.grant(chosen, false))
    }

    fn grant(&mut self, direction: Direction, starvation_override: bool) -> Grant {
        self.counters.grants[direction.index()] += 1;
        Grant {
            direction,
            quantum: Duration::from_millis(self.quantum_ms),
            byte_budget: self.quantum_bytes,
            starvation_override,
        }
    }

    /// Record drain progress for a direction.
    pub fn report_progress(&mut self, direction: Direction, bytes: usize, now: Instant) {
        let i = direction.index();
        self.last_progress[i] = Some(now);
        self.counters.bytes[i] += bytes as u64;
    }

    /// A direction with no pending work is not starving; keep its clock
    /// fresh so stale timestamps don't trigger spurious overrides later.
    pub fn mark_idle(&mut self, direction: Direction, now: Instant) {
        self.last_progress[direction.index()] = Some(now);
    }

    /// Close out a quantum and adapt its size: overshooting the latency
    /// target shrinks the slice, a mostly-unused byte budget grows it.
    pub fn end_quantum(&mut self, elapsed: Duration, bytes_moved: usize) {
        if elapsed > self.latency_target {
            if self.quantum_ms > self.min_quantum_ms {
                self.quantum_ms =
                    (self.quantum_ms.saturating_sub(QUANTUM_STEP_MS)).max(self.min_quantum_ms);
                self.counters.quantum_shrinks += 1;
            }
        } else if (bytes_moved as f64) < self.quantum_bytes as f64 * UNDERUSE_RATIO
            && self.quantum_ms < self.max_quantum_ms
        {
            self.quantum_ms = (self.quantum_ms + QUANTUM_STEP_MS).min(self.max_quantum_ms);
            self.counters.quantum_grows += 1;
        }
    }

    /// How long a pending direction has been waiting.
    pub fn waiting_for(&self, direction: Direction, now: Instant) -> Duration {
        match self.last_progress[direction.index()] {
            Some(t) => now.duration_since(t),
            None => Duration::ZERO,
        }
    }
}
