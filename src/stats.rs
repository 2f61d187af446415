//! Statistics accumulation: receiver-local deltas, the shared mount-wide
//! record, and the pre-allocated sample ring.
//!
//! Receivers fold every reply into a thread-local delta and flush it into
//! the shared record at most once per millisecond. The shared record sits
//! behind one short-hold lock: its six counters and the min/max pair must
//! stay mutually consistent, so it is never decomposed into independent
//! atomics. Bounding flushes to ~1 kHz per receiver keeps the contended
//! cache line cold relative to the reply rate.

use parking_lot::Mutex;

use crate::clock;

/// Receiver-local flush period: 1 ms, converted to ticks at first use.
pub const FLUSH_PERIOD_USECS: u64 = 1_000;

/// Mount-wide cumulative counters. All totals are monotonic; min/max cover
/// the interval since the sampler last took them.
#[derive(Copy, Clone, Debug)]
pub struct SharedStats {
    pub latency_cum: u64,
    pub latency_min: u64,
    pub latency_max: u64,
    pub requests: u64,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    /// Number of local-delta flushes folded in.
    pub updates: u64,
    /// Number of status lines the sampler printed.
    pub marks: u64,
}

impl Default for SharedStats {
    fn default() -> SharedStats {
        SharedStats {
            latency_cum: 0,
            latency_min: u64::MAX,
            latency_max: 0,
            requests: 0,
            bytes_sent: 0,
            bytes_recv: 0,
            updates: 0,
            marks: 0,
        }
    }
}

/// The shared record behind its lock.
#[derive(Default)]
pub struct MountStats {
    inner: Mutex<SharedStats>,
}

impl MountStats {
    pub fn new() -> MountStats {
        MountStats::default()
    }

    /// Folds a local delta into the shared record. Min/max take the most
    /// recent single-sample latency, not the local cumulative.
    pub fn flush(&self, local: &LocalStats, last_latency: u64) {
        let mut s = self.inner.lock();
        if last_latency < s.latency_min {
            s.latency_min = last_latency;
        }
        if last_latency > s.latency_max {
            s.latency_max = last_latency;
        }
        s.latency_cum += local.latency_cum;
        s.requests += local.requests;
        s.bytes_sent += local.bytes_sent;
        s.bytes_recv += local.bytes_recv;
        s.updates += 1;
    }

    /// Folds leftover local counters in without a latency observation.
    /// Used when a receiver exits mid-interval.
    pub fn drain(&self, local: &LocalStats) {
        if local.requests == 0 {
            return;
        }
        let mut s = self.inner.lock();
        s.latency_cum += local.latency_cum;
        s.requests += local.requests;
        s.bytes_sent += local.bytes_sent;
        s.bytes_recv += local.bytes_recv;
        s.updates += 1;
    }

    /// Credits elapsed time of an abandoned in-flight request (reconnect).
    pub fn credit_latency(&self, ticks: u64) {
        self.inner.lock().latency_cum += ticks;
    }

    /// Sampler snapshot: copies everything and resets min/max to sentinels.
    pub fn sample(&self) -> SharedStats {
        let mut s = self.inner.lock();
        let snap = *s;
        s.latency_min = u64::MAX;
        s.latency_max = 0;
        snap
    }

    /// Plain copy without resetting anything (final summary).
    pub fn snapshot(&self) -> SharedStats {
        *self.inner.lock()
    }

    /// Counts one printed status line.
    pub fn note_mark(&self) {
        self.inner.lock().marks += 1;
    }
}

/// Per-receiver accumulation between flushes.
pub struct LocalStats {
    pub requests: u64,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub latency_cum: u64,
    flush_deadline: u64,
    flush_period: u64,
}

impl LocalStats {
    pub fn new(now: u64) -> LocalStats {
        let period = clock::usecs_to_ticks(FLUSH_PERIOD_USECS);
        LocalStats {
            requests: 0,
            bytes_sent: 0,
            bytes_recv: 0,
            latency_cum: 0,
            flush_deadline: now + period,
            flush_period: period,
        }
    }

    /// Accounts one dispatched reply; flushes into `shared` when the
    /// millisecond deadline has passed.
    pub fn note_reply(
        &mut self,
        shared: &MountStats,
        latency: u64,
        bytes_sent: u64,
        bytes_recv: u64,
        now: u64,
    ) {
        self.requests += 1;
        self.bytes_sent += bytes_sent;
        self.bytes_recv += bytes_recv;
        self.latency_cum += latency;

        if now >= self.flush_deadline {
            shared.flush(self, latency);
            self.requests = 0;
            self.bytes_sent = 0;
            self.bytes_recv = 0;
            self.latency_cum = 0;

            self.flush_deadline += self.flush_period;
            if self.flush_deadline <= now {
                self.flush_deadline = now + self.flush_period;
            }
        }
    }

    /// Final flush on receiver exit so no reply goes unaccounted.
    pub fn drain(&mut self, shared: &MountStats) {
        shared.drain(self);
        self.requests = 0;
        self.bytes_sent = 0;
        self.bytes_recv = 0;
        self.latency_cum = 0;
    }
}

/// One entry of the sample ring: cumulative counters at a sample instant.
/// Per-sample rates come from subtracting adjacent records.
#[derive(Copy, Clone, Debug, Default)]
pub struct StatsRecord {
    pub sample: u32,
    pub time: u64,
    pub requests: u64,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub latency: u64,
}

/// Pre-allocated ring of sample records. Slot 0 is reserved for the origin
/// timestamp; the sampler writes sequentially and stops tracking when full.
pub struct SampleRing {
    records: Vec<StatsRecord>,
    used: usize,
}

impl SampleRing {
    /// `capacity` counts data slots; one more is added for the origin.
    pub fn new(capacity: usize) -> SampleRing {
        SampleRing { records: vec![StatsRecord::default(); capacity + 1], used: 1 }
    }

    pub fn set_origin(&mut self, time: u64) {
        self.records[0].time = time;
    }

    pub fn origin(&self) -> u64 {
        self.records[0].time
    }

    /// Appends a record. Returns false (and drops the record) once full.
    pub fn push(&mut self, rec: StatsRecord) -> bool {
        if self.used >= self.records.len() {
            return false;
        }
        self.records[self.used] = rec;
        self.used += 1;
        true
    }

    pub fn is_full(&self) -> bool {
        self.used >= self.records.len()
    }

    /// Origin plus every recorded sample.
    pub fn records(&self) -> &[StatsRecord] {
        &self.records[..self.used]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(local: &mut LocalStats, shared: &MountStats, latency: u64, now: u64) {
        local.note_reply(shared, latency, 100, 200, now);
    }

    #[test]
    fn totals_are_monotonic_across_flushes() {
        let shared = MountStats::new();
        let mut local = LocalStats::new(0);
        let period = clock::usecs_to_ticks(FLUSH_PERIOD_USECS);

        let mut last = shared.snapshot();
        for i in 0..10u64 {
            // Every reply lands past the deadline, forcing a flush each time.
            reply(&mut local, &shared, 5, (i + 1) * (period + 1));
            let cur = shared.snapshot();
            assert!(cur.requests >= last.requests);
            assert!(cur.bytes_sent >= last.bytes_sent);
            assert!(cur.bytes_recv >= last.bytes_recv);
            assert!(cur.latency_cum >= last.latency_cum);
            last = cur;
        }
        assert_eq!(last.requests, 10);
        assert_eq!(last.updates, 10);
    }

    #[test]
    fn replies_are_conserved_across_locals_and_drain() {
        let shared = MountStats::new();
        let mut a = LocalStats::new(0);
        let mut b = LocalStats::new(0);

        for _ in 0..7 {
            reply(&mut a, &shared, 3, 1); // before deadline, stays local
        }
        for _ in 0..5 {
            reply(&mut b, &shared, 4, 1);
        }

        let dispatched = 12;
        let in_shared = shared.snapshot().requests;
        assert_eq!(in_shared + a.requests + b.requests, dispatched);

        a.drain(&shared);
        b.drain(&shared);
        assert_eq!(shared.snapshot().requests, dispatched);
    }

    #[test]
    fn sample_resets_minmax_to_sentinels() {
        let shared = MountStats::new();
        let mut local = LocalStats::new(0);
        let period = clock::usecs_to_ticks(FLUSH_PERIOD_USECS);

        reply(&mut local, &shared, 42, period + 1);
        let snap = shared.sample();
        assert_eq!(snap.latency_min, 42);
        assert_eq!(snap.latency_max, 42);

        let next = shared.sample();
        assert_eq!(next.latency_min, u64::MAX);
        assert_eq!(next.latency_max, 0);
        // Totals survive the reset.
        assert_eq!(next.requests, 1);
    }

    #[test]
    fn ring_reserves_origin_and_discards_overflow() {
        let mut ring = SampleRing::new(2);
        ring.set_origin(1000);
        assert_eq!(ring.origin(), 1000);

        assert!(ring.push(StatsRecord { sample: 1, ..Default::default() }));
        assert!(ring.push(StatsRecord { sample: 2, ..Default::default() }));
        assert!(ring.is_full());
        assert!(!ring.push(StatsRecord { sample: 3, ..Default::default() }));

        let recs = ring.records();
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[0].time, 1000);
        assert_eq!(recs[2].sample, 2);
    }
}
