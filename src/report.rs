//! Sampler and reporter.
//!
//! One dedicated loop snapshots the shared stats at a fixed cadence into the
//! pre-allocated sample ring, prints periodic status lines, and at
//! termination turns the ring into the `raw` time-series file, a summary
//! block, and per-metric gnuplot scripts.
//!
//! The cadence uses absolute deadlines (`start + n * period`) so sleep
//! jitter never accumulates into drift, and every sleep leaves 999 µs of
//! slack to absorb wakeup latency.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::clock;
use crate::mount::Mount;
use crate::stats::{SampleRing, SharedStats, StatsRecord};

/// Status-line header reprint interval, in rows.
const HEADER_EVERY: u64 = 22;

/// Per-second aggregates computed while writing the raw file, feeding the
/// final summary. Latency fields are in ticks.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawSummary {
    pub rows: u64,
    pub requests_tot: u64,
    pub send_tot: u64,
    pub recv_tot: u64,
    pub latency_tot: u64,
    pub requests_min: u64,
    pub requests_max: u64,
    pub send_min: u64,
    pub send_max: u64,
    pub recv_min: u64,
    pub recv_max: u64,
    pub latency_min: u64,
    pub latency_max: u64,
}

/// Runs the sampler until the last job concludes.
///
/// `ring` receives up to `duration * samples_per_sec` records; sampling
/// keeps looping for status printing after the ring stops tracking. When
/// `mark` is zero no status lines are printed. Output files are emitted
/// only when `outdir` was given (the process has already chdir'd into it).
pub fn stats_loop(
    mnt: &Arc<Mount>,
    mark: u32,
    sample_period_usec: u64,
    duration: u64,
    mut ring: Option<&mut SampleRing>,
    outdir: Option<&Path>,
    term: &str,
) {
    let samples_per_sec = 1_000_000 / sample_period_usec;
    let sample_period = clock::usecs_to_ticks(sample_period_usec);
    let track_limit = duration * samples_per_sec;

    // Nudge the print deadline half a sample early so a status line never
    // slips a whole sample past its mark.
    let mut print_period = clock::secs_to_ticks(mark as u64);
    if print_period >= sample_period {
        print_period -= sample_period / 2;
    }

    let tsc_start = clock::now();
    if let Some(ring) = ring.as_mut() {
        ring.set_origin(tsc_start);
    }

    let mut tracking = ring.is_some();
    let mut samples_tot: u64 = 0;
    let mut rows: u64 = 0;

    let mut tsc_last = tsc_start;
    let mut reqs_last: u64 = 0;
    let mut sent_last: u64 = 0;
    let mut recv_last: u64 = 0;
    let mut latency_last: u64 = 0;

    loop {
        samples_tot += 1;
        let tgt = tsc_start + samples_tot * sample_period;

        let now = clock::now();
        if tgt > now {
            let delta = clock::ticks_to_usecs(tgt - now);
            if delta > 999 {
                std::thread::sleep(Duration::from_micros(delta - 999));
            }
        }

        let tsc_cur = clock::now();
        let snap = mnt.stats().sample();

        if tracking {
            let ring = ring.as_mut().unwrap();
            let pushed = ring.push(StatsRecord {
                sample: samples_tot as u32,
                time: tsc_cur,
                requests: snap.requests,
                bytes_sent: snap.bytes_sent,
                bytes_recv: snap.bytes_recv,
                latency: snap.latency_cum,
            });
            if !pushed || samples_tot >= track_limit {
                tracking = false;
            }
        }

        if mnt.active_jobs() == 0 {
            break;
        }
        if mark == 0 {
            continue;
        }

        if tsc_cur - tsc_last < print_period {
            continue;
        }

        let interval_usec = clock::ticks_to_usecs(tsc_cur - tsc_last);
        let ops = snap.requests - reqs_last;

        if rows % HEADER_EVERY == 0 {
            println!(
                "\n{:>8} {:>9} {:>8} {:>7} {:>7} {:>7} {:>7} {:>7}",
                "SAMPLES", "DURATION", "OPS", "TXMB", "RXMB", "LATMIN", "LATAVG", "LATMAX"
            );
        }

        if ops > 0 {
            let lat_min = ticks_to_usecs_f(snap.latency_min);
            let lat_max = ticks_to_usecs_f(snap.latency_max);
            let lat_avg = ticks_to_usecs_f((snap.latency_cum - latency_last) / ops);
            let tx_mb = (snap.bytes_sent - sent_last) as f64 / (1024.0 * 1024.0);
            let rx_mb = (snap.bytes_recv - recv_last) as f64 / (1024.0 * 1024.0);

            println!(
                "{:>8} {:>9} {:>8} {:>7.2} {:>7.2} {:>7.1} {:>7.1} {:>7.1}",
                samples_tot, interval_usec, ops, tx_mb, rx_mb, lat_min, lat_avg, lat_max
            );
        } else {
            println!(
                "{:>8} {:>9} {:>8} {:>7.2} {:>7.2} {:>7} {:>10} {:>7}",
                samples_tot, interval_usec, 0, 0.0, 0.0, "-", "stalled", "-"
            );
        }

        rows += 1;
        mnt.stats().note_mark();

        reqs_last = snap.requests;
        sent_last = snap.bytes_sent;
        recv_last = snap.bytes_recv;
        latency_last = snap.latency_cum;
        tsc_last = tsc_cur;
    }

    if outdir.is_none() {
        return;
    }
    let Some(ring) = ring.as_deref() else {
        return;
    };

    let file = match File::create("raw") {
        Ok(file) => file,
        Err(e) => {
            warn!("unable to create raw sample file: {e}");
            return;
        }
    };

    let mut out = BufWriter::new(file);
    let raw = match write_raw(&mut out, ring.records(), samples_per_sec, sample_period_usec) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("unable to write raw sample file: {e}");
            return;
        }
    };
    drop(out);

    let final_stats = mnt.stats().snapshot();
    let mut stdout = std::io::stdout();
    let _ = write_summary(
        &mut stdout,
        &raw,
        samples_per_sec,
        &final_stats,
        mnt.tds_max(),
        mnt.jobs_max(),
    );

    emit_plots(raw.rows + 1, samples_per_sec, term);
}

fn ticks_to_usecs_f(ticks: u64) -> f64 {
    if ticks == u64::MAX {
        return 0.0;
    }
    ticks as f64 * 1_000_000.0 / clock::ticks_per_sec() as f64
}

/// Writes the raw sample table.
///
/// `records[0]` is the origin; the first and last written samples are
/// discarded so every emitted row covers a full interval. Each row carries
/// per-interval deltas plus an n-point running average (n = one second of
/// samples).
pub fn write_raw<W: Write>(
    w: &mut W,
    records: &[StatsRecord],
    samples_per_sec: u64,
    sample_period_usec: u64,
) -> std::io::Result<RawSummary> {
    let mut raw = RawSummary {
        requests_min: u64::MAX,
        send_min: u64::MAX,
        recv_min: u64::MAX,
        latency_min: u64::MAX,
        ..Default::default()
    };

    writeln!(w, "# Created on {}", chrono::Local::now().format("%a %b %e %H:%M:%S %Y"))?;
    writeln!(w, "# {} samples", records.len().saturating_sub(2))?;
    writeln!(w, "# {samples_per_sec} samples/sec")?;
    writeln!(w, "# {sample_period_usec} sample period (usecs)")?;
    writeln!(w, "# time, duration, and latency in usecs")?;
    writeln!(w, "# send and recv in bytes")?;
    writeln!(w, "#")?;
    writeln!(
        w,
        "# {:>8} {:>10} {:>10} {:>8} {:>8} {:>10} {:>10} {:>8} {:>10} {:>10}",
        "SAMPLE", "TIME", "DURATION", "LATENCY", "OPS", "SEND", "RECV", "OPSRA", "SENDRA",
        "RECVRA"
    )?;

    if records.len() < 3 {
        return Ok(raw);
    }

    let origin = records[0].time;
    let window = samples_per_sec as usize;
    let mut tail = 1usize;

    // Discard the final record: its interval may be short.
    for cur in 1..records.len() - 1 {
        let rec = &records[cur];
        let prev = &records[cur - 1];

        let requests = rec.requests - prev.requests;
        let send = rec.bytes_sent - prev.bytes_sent;
        let recv = rec.bytes_recv - prev.bytes_recv;
        let latency = rec.latency - prev.latency;

        raw.requests_tot += requests;
        raw.send_tot += send;
        raw.recv_tot += recv;
        raw.latency_tot += latency;

        if requests > 0 {
            let per_req = latency / requests;
            raw.latency_min = raw.latency_min.min(per_req);
            raw.latency_max = raw.latency_max.max(per_req);
        }

        // n-point running average once a full window is behind us; until
        // then the cumulative counters stand in.
        let (requests_ra, send_ra, recv_ra) = if cur - tail >= window {
            let t = &records[tail];
            let ra = (
                rec.requests - t.requests,
                rec.bytes_sent - t.bytes_sent,
                rec.bytes_recv - t.bytes_recv,
            );
            raw.requests_min = raw.requests_min.min(ra.0);
            raw.requests_max = raw.requests_max.max(ra.0);
            raw.send_min = raw.send_min.min(ra.1);
            raw.send_max = raw.send_max.max(ra.1);
            raw.recv_min = raw.recv_min.min(ra.2);
            raw.recv_max = raw.recv_max.max(ra.2);
            tail += 1;
            ra
        } else {
            (rec.requests, rec.bytes_sent, rec.bytes_recv)
        };

        writeln!(
            w,
            "  {:>8} {:>10} {:>10} {:>8} {:>8} {:>10} {:>10} {:>8} {:>10} {:>10}",
            rec.sample,
            clock::ticks_to_usecs(rec.time - origin),
            clock::ticks_to_usecs(rec.time - prev.time),
            clock::ticks_to_usecs(latency),
            requests,
            send,
            recv,
            requests_ra,
            send_ra,
            recv_ra
        )?;

        raw.rows += 1;
    }

    Ok(raw)
}

/// Writes the MIN/AVG/MAX/TOTAL summary block.
pub fn write_summary<W: Write>(
    w: &mut W,
    raw: &RawSummary,
    samples_per_sec: u64,
    final_stats: &SharedStats,
    tds_max: u32,
    jobs_max: u32,
) -> std::io::Result<()> {
    if raw.rows == 0 {
        return Ok(());
    }

    writeln!(w, "\n{:>12} {:>12} {:>12} {:>15}  {}", "MIN", "AVG", "MAX", "TOTAL", "DESC")?;

    writeln!(
        w,
        "{:>12} {:>12} {:>12} {:>15}  bytes transmitted per second",
        zero_if_unset(raw.send_min),
        raw.send_tot * samples_per_sec / raw.rows,
        raw.send_max,
        final_stats.bytes_sent
    )?;

    writeln!(
        w,
        "{:>12} {:>12} {:>12} {:>15}  bytes received per second",
        zero_if_unset(raw.recv_min),
        raw.recv_tot * samples_per_sec / raw.rows,
        raw.recv_max,
        final_stats.bytes_recv
    )?;

    let latency_avg = if raw.requests_tot > 0 {
        ticks_to_usecs_f(raw.latency_tot / raw.requests_tot)
    } else {
        0.0
    };
    writeln!(
        w,
        "{:>12.1} {:>12.1} {:>12.1} {:>15}  latency per request (usecs)",
        ticks_to_usecs_f(zero_if_unset(raw.latency_min)),
        latency_avg,
        ticks_to_usecs_f(raw.latency_max),
        final_stats.latency_cum
    )?;

    writeln!(
        w,
        "{:>12} {:>12} {:>12} {:>15}  requests per second",
        zero_if_unset(raw.requests_min),
        raw.requests_tot * samples_per_sec / raw.rows,
        raw.requests_max,
        final_stats.requests
    )?;

    writeln!(w, "{:>12} {:>12} {:>12} {:>15}  updates", "-", "-", "-", final_stats.updates)?;
    writeln!(w, "{:>12} {:>12} {:>12} {:>15}  marks", "-", "-", "-", final_stats.marks)?;
    writeln!(w, "{:>12} {:>12} {:>12} {:>15}  threads", "-", "-", "-", tds_max)?;
    writeln!(w, "{:>12} {:>12} {:>12} {:>15}  jobs", "-", "-", "-", jobs_max)?;

    Ok(())
}

fn zero_if_unset(v: u64) -> u64 {
    if v == u64::MAX {
        0
    } else {
        v
    }
}

/// Emits one `<title>.gnuplot` script and runs gnuplot on it. Failures are
/// reported and otherwise ignored.
fn gplot(
    nsamples: u64,
    samples_per_sec: u64,
    term: &str,
    using: &str,
    title: &str,
    xlabel: &str,
    ylabel: &str,
    color: &str,
) {
    let file = format!("{title}.gnuplot");
    let script = match File::create(&file) {
        Ok(f) => f,
        Err(e) => {
            warn!("unable to create {file}: {e}");
            return;
        }
    };

    let mut w = BufWriter::new(script);
    let result = (|| -> std::io::Result<()> {
        writeln!(w, "# Created on {}", chrono::Local::now().format("%a %b %e %H:%M:%S %Y"))?;
        writeln!(w, "# {nsamples} samples")?;
        writeln!(w, "# {samples_per_sec} samples/sec")?;

        writeln!(w, "set title \"{title}\"")?;
        writeln!(w, "set output '{title}.{term}'")?;
        writeln!(w, "set term {term} size 3840,1280")?;
        writeln!(w, "set size 1, 0.76")?;
        writeln!(w, "set origin 0, 0.24")?;
        writeln!(w, "set autoscale")?;
        writeln!(w, "set grid")?;
        writeln!(w, "set ylabel \"{ylabel}\"")?;
        writeln!(w, "set ytics autofreq")?;
        writeln!(w, "set mytics 5")?;
        writeln!(w, "set yrange [0:]")?;
        writeln!(w, "set xlabel \"{xlabel}\"")?;

        // Keep the x axis readable: at most ~30 major tics.
        let secs = nsamples / samples_per_sec.max(1);
        let (major, minor) = match secs / 30 {
            0..=1 => (1, 10),
            2..=3 => (3, 3),
            4..=10 => (10, 5),
            11..=15 => (15, 3),
            16..=60 => (30, 3),
            61..=180 => (60, 6),
            181..=300 => (180, 3),
            _ => (300, 10),
        };
        writeln!(w, "set xtics 0, {major} rotate by -30")?;
        writeln!(w, "set mxtics {minor}")?;

        writeln!(
            w,
            "plot \"raw\" every ::1:::0 using {using} with lines lc rgbcolor \"{color}\" \
             title \"{title}\""
        )?;
        Ok(())
    })();

    if let Err(e) = result {
        warn!("unable to write {file}: {e}");
        return;
    }
    drop(w);

    match Command::new("gnuplot").arg(&file).status() {
        Ok(status) if status.success() => {}
        Ok(status) => warn!("gnuplot {file} exited with {status}"),
        Err(e) => warn!("gnuplot {file} failed to run: {e}"),
    }
}

/// Generates the four per-metric plots off the raw file.
fn emit_plots(nsamples: u64, samples_per_sec: u64, term: &str) {
    gplot(
        nsamples,
        samples_per_sec,
        term,
        "($2 / 1000000):(($10 * 1) / (1024 * 1024))",
        "recv",
        "seconds",
        "MB / second",
        "green",
    );
    gplot(
        nsamples,
        samples_per_sec,
        term,
        "($2 / 1000000):(($9 * 1) / (1024 * 1024))",
        "send",
        "seconds",
        "MB / second",
        "red",
    );
    gplot(
        nsamples,
        samples_per_sec,
        term,
        "($2 / 1000000):($4 / $5)",
        "latency",
        "seconds",
        "usec/request",
        "black",
    );
    gplot(
        nsamples,
        samples_per_sec,
        term,
        "($2 / 1000000):($8 * 1)",
        "requests",
        "seconds",
        "requests / seconds",
        "blue",
    );
}
