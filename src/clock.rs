//! Tick clock used for all latency timestamps.
//!
//! Latency math stays in ticks everywhere; [`ticks_per_sec`] is the single
//! conversion constant applied at presentation time. On x86-64 Linux the
//! invariant TSC is used when the kernel itself trusts it as a clocksource
//! (its frequency is calibrated once at startup). Everywhere else, ticks are
//! monotonic nanoseconds: `CLOCK_MONOTONIC_RAW` on Linux so NTP slew cannot
//! bend an interval, an `Instant` epoch on other platforms.

use std::sync::OnceLock;

use tracing::debug;

struct Clock {
    have_tsc: bool,
    ticks_per_sec: u64,
}

static CLOCK: OnceLock<Clock> = OnceLock::new();

/// Raw monotonic nanoseconds.
#[inline]
fn monotonic_ns() -> u64 {
    #[cfg(target_os = "linux")]
    {
        let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts);
        }
        (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
    }
    #[cfg(not(target_os = "linux"))]
    {
        use std::time::Instant;
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
fn calibrate_tsc() -> Option<u64> {
    // Only trust the TSC if the kernel selected it as the clocksource;
    // that certifies invariance across cores and frequency states.
    let cur = std::fs::read_to_string(
        "/sys/devices/system/clocksource/clocksource0/current_clocksource",
    )
    .ok()?;
    if cur.trim() != "tsc" {
        return None;
    }

    let ns0 = monotonic_ns();
    let tsc0 = unsafe { core::arch::x86_64::_rdtsc() };
    std::thread::sleep(std::time::Duration::from_millis(20));
    let ns1 = monotonic_ns();
    let tsc1 = unsafe { core::arch::x86_64::_rdtsc() };

    let dns = ns1.saturating_sub(ns0);
    if dns == 0 {
        return None;
    }

    Some((tsc1 - tsc0).saturating_mul(1_000_000_000) / dns)
}

#[cfg(not(all(target_arch = "x86_64", target_os = "linux")))]
fn calibrate_tsc() -> Option<u64> {
    None
}

fn init_clock() -> Clock {
    match calibrate_tsc() {
        Some(freq) => Clock { have_tsc: true, ticks_per_sec: freq },
        None => Clock { have_tsc: false, ticks_per_sec: 1_000_000_000 },
    }
}

/// Calibrates the clock. Called once at process start; later calls and
/// lazy first use are no-ops.
pub fn init() {
    let clock = CLOCK.get_or_init(init_clock);
    debug!(have_tsc = clock.have_tsc, ticks_per_sec = clock.ticks_per_sec, "clock calibrated");
}

/// Current time in ticks.
#[inline]
pub fn now() -> u64 {
    let clock = CLOCK.get_or_init(init_clock);
    if clock.have_tsc {
        #[cfg(all(target_arch = "x86_64", target_os = "linux"))]
        return unsafe { core::arch::x86_64::_rdtsc() };
    }
    monotonic_ns()
}

/// Tick frequency; the unit conversion constant for presentation.
#[inline]
pub fn ticks_per_sec() -> u64 {
    CLOCK.get_or_init(init_clock).ticks_per_sec
}

/// Converts a tick delta to whole microseconds.
#[inline]
pub fn ticks_to_usecs(ticks: u64) -> u64 {
    (ticks as u128 * 1_000_000 / ticks_per_sec() as u128) as u64
}

/// Converts a microsecond count to ticks.
#[inline]
pub fn usecs_to_ticks(usecs: u64) -> u64 {
    (usecs as u128 * ticks_per_sec() as u128 / 1_000_000) as u64
}

/// Ticks in `secs` whole seconds.
#[inline]
pub fn secs_to_ticks(secs: u64) -> u64 {
    secs * ticks_per_sec()
}
