//! The enhanced double buffer behind each pipeline.
//!
//! Two byte regions trade roles: writes append to `sub`, reads drain `main`
//! through a cursor, and when `main` runs dry while `sub` holds data the
//! regions swap. The swap happens entirely inside whatever lock the owning
//! pipeline holds, so readers never observe a half-swapped buffer.
//!
//! Fill level drives backpressure through five watermarks. Crossing HIGH
//! blocks the pipeline (further writes are refused) until the level falls
//! back to LOW; at CRITICAL, bytes are dropped and counted instead. The
//! region size itself breathes: sustained high fill grows it in fixed
//! steps up to a bound, sustained low fill shrinks it back.

/// Watermark levels, in ascending fill order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Watermark {
    /// < 5% full: effectively empty
    Empty,
    /// 5-20%: plenty of room
    Low,
    /// 20-80%: normal operation
    Normal,
    /// >= 80%: writes are refused until LOW
    High,
    /// >= 95%: writes are dropped
    Critical,
}

/// What happened to a write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// This many bytes were appended (may be less than offered)
    Accepted(usize),
    /// Blocked by the HIGH/LOW hysteresis; offer again later
    Refused,
    /// At CRITICAL: this many bytes were discarded and counted
    Dropped(usize),
}

/// Fill ratio above which sustained traffic grows the regions.
const GROW_THRESHOLD: f64 = 0.75;
/// Fill ratio below which sustained calm shrinks them.
const SHRINK_THRESHOLD: f64 = 0.30;
/// Consecutive qualifying quanta before a grow step.
const GROW_QUANTA: u32 = 3;
/// Consecutive qualifying quanta before a shrink step.
const SHRINK_QUANTA: u32 = 16;
/// Weight of the newest sample in the fill moving average.
const FILL_EMA_ALPHA: f64 = 0.2;

/// Running counters for the stats snapshot.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct BufferCounters {
    pub bytes_processed: u64,
    pub bytes_dropped: u64,
    pub overflow_events: u64,
    pub swaps: u64,
    pub grows: u64,
    pub shrinks: u64,
}

impl BufferCounters {
    /// Fold another buffer's totals into this one. Used to aggregate the
    /// per-call S2N buffers into one lifetime figure.
    pub fn merge(&mut self, other: BufferCounters) {
        self.bytes_processed += other.bytes_processed;
        self.bytes_dropped += other.bytes_dropped;
        self.overflow_events += other.overflow_events;
        self.swaps += other.swaps;
        self.grows += other.grows;
        self.shrinks += other.shrinks;
    }
}

/// Dynamically-sized double buffer with watermark backpressure.
#[derive(Debug)]
pub struct DoubleBuffer {
    main: Vec<u8>,
    sub: Vec<u8>,
    /// Read cursor into `main`
    read_pos: usize,
    /// Current per-region capacity
    size: usize,
    min_size: usize,
    max_size: usize,
    step: usize,
    /// HIGH was crossed and LOW has not been reached since
    blocked: bool,
    fill_avg: f64,
    above_streak: u32,
    below_streak: u32,
    counters: BufferCounters,
}

impl DoubleBuffer {
    pub fn new(min_size: usize, max_size: usize, step: usize) -> Self {
        let size = min_size.max(1);
        Self {
            main: Vec::with_capacity(size),
            sub: Vec::with_capacity(size),
            read_pos: 0,
            size,
            min_size: size,
            max_size: max_size.max(size),
            step: step.max(1),
            blocked: false,
            fill_avg: 0.0,
            above_streak: 0,
            below_streak: 0,
            counters: BufferCounters::default(),
        }
    }

    /// Bytes currently buffered across both regions.
    pub fn buffered(&self) -> usize {
        (self.main.len() - self.read_pos) + self.sub.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffered() == 0
    }

    /// Total logical capacity (both regions).
    pub fn capacity(&self) -> usize {
        self.size * 2
    }

    pub fn current_region_size(&self) -> usize {
        self.size
    }

    /// Fill ratio in [0, 1].
    pub fn fill_ratio(&self) -> f64 {
        self.buffered() as f64 / self.capacity() as f64
    }

    /// Smoothed fill ratio across quanta.
    pub fn fill_average(&self) -> f64 {
        self.fill_avg
    }

    pub fn watermark(&self) -> Watermark {
        let fill = self.fill_ratio();
        if fill >= 0.95 {
            Watermark::Critical
        } else if fill >= 0.80 {
            Watermark::High
        } else if fill >= 0.20 {
            Watermark::Normal
        } else if fill >= 0.05 {
            Watermark::Low
        } else {
            Watermark::Empty
        }
    }

    /// Whether the HIGH/LOW hysteresis currently refuses writes.
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// How many bytes a write would accept right now. Producers that must
    /// not lose data (pipe drainers) size their reads by this so nothing
    /// is consumed that the buffer would refuse.
    pub fn writable(&self) -> usize {
        if self.blocked || self.watermark() >= Watermark::High {
            0
        } else {
            self.size.saturating_sub(self.sub.len())
        }
    }

    pub fn counters(&self) -> BufferCounters {
        self.counters
    }

    /// Offer bytes to the buffer. See [`WriteOutcome`].
    pub fn write(&mut self, bytes: &[u8]) -> WriteOutcome {
        if bytes.is_empty() {
            return WriteOutcome::Accepted(0);
        }

        if self.watermark() == Watermark::Critical {
            self.counters.overflow_events += 1;
            self.counters.bytes_dropped += bytes.len() as u64;
            return WriteOutcome::Dropped(bytes.len());
        }

        if self.blocked {
            return WriteOutcome::Refused;
        }

        let space = self.size.saturating_sub(self.sub.len());
        let n = space.min(bytes.len());
        self.sub.extend_from_slice(&bytes[..n]);

        if self.watermark() >= Watermark::High {
            self.blocked = true;
        }
        WriteOutcome::Accepted(n)
    }

    /// Drain up to `out.len()` bytes from the read side.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        self.maybe_swap();

        let available = self.main.len() - self.read_pos;
        let n = available.min(out.len());
        out[..n].copy_from_slice(&self.main[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        self.counters.bytes_processed += n as u64;

        if self.read_pos == self.main.len() {
            self.main.clear();
            self.read_pos = 0;
        }

        // Hysteresis release
        if self.blocked && self.fill_ratio() < 0.20 {
            self.blocked = false;
        }
        n
    }

    /// Swap roles when the read side ran dry and the write side has data.
    fn maybe_swap(&mut self) {
        if self.read_pos == self.main.len() && !self.sub.is_empty() {
            self.main.clear();
            self.read_pos = 0;
            std::mem::swap(&mut self.main, &mut self.sub);
            self.counters.swaps += 1;
        }
    }

    /// Per-quantum bookkeeping: update the fill average and apply the
    /// grow/shrink policy.
    pub fn end_quantum(&mut self) {
        let fill = self.fill_ratio();
        self.fill_avg = FILL_EMA_ALPHA * fill + (1.0 - FILL_EMA_ALPHA) * self.fill_avg;

        if fill >= GROW_THRESHOLD {
            self.above_streak += 1;
            self.below_streak = 0;
        } else if fill <= SHRINK_THRESHOLD {
            self.below_streak += 1;
            self.above_streak = 0;
        } else {
            self.above_streak = 0;
            self.below_streak = 0;
        }

        if self.above_streak >= GROW_QUANTA && self.size < self.max_size {
            self.size = (self.size + self.step).min(self.max_size);
            self.counters.grows += 1;
            self.above_streak = 0;
        } else if self.below_streak >= SHRINK_QUANTA && self.size > self.min_size {
            let floor = self.min_size.max(self.buffered());
            self.size = self.size.saturating_sub(self.step).max(floor);
            self.counters.shrinks += 1;
            self.below_streak = 0;
        }
    }

    /// Drop all content (connection teardown).
    pub fn clear(&mut self) {
        self.main.clear();
        self.sub.clear();
        self.read_pos = 0;
        self.blocked = false;
    }
}
