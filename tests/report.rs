//! Reporter output against a synthetic stats source: a ring with a known
//! shape must produce a known raw table and summary.

use nfs_stress::clock;
use nfs_stress::report::{write_raw, write_summary};
use nfs_stress::stats::{SharedStats, StatsRecord};

/// Origin plus 100 samples at a 100 ms period, exactly 10 requests each.
fn synthetic_ring() -> Vec<StatsRecord> {
    let tick_period = clock::usecs_to_ticks(100_000);
    let base = clock::usecs_to_ticks(1_000_000);

    let mut records = vec![StatsRecord { time: base, ..Default::default() }];
    for i in 1..=100u64 {
        records.push(StatsRecord {
            sample: i as u32,
            time: base + i * tick_period,
            requests: i * 10,
            bytes_sent: i * 1_000,
            bytes_recv: i * 2_000,
            latency: i * clock::usecs_to_ticks(500),
        });
    }
    records
}

fn data_rows(text: &str) -> Vec<Vec<String>> {
    text.lines()
        .filter(|l| !l.trim_start().starts_with('#') && !l.trim().is_empty())
        .map(|l| l.split_whitespace().map(str::to_string).collect())
        .collect()
}

#[test]
fn raw_table_discards_first_and_last_samples() {
    let records = synthetic_ring();
    let mut out = Vec::new();
    let raw = write_raw(&mut out, &records, 10, 100_000).expect("write raw");

    assert_eq!(raw.rows, 99);
    assert_eq!(raw.requests_tot, 990);

    let rows = data_rows(&String::from_utf8(out).unwrap());
    assert_eq!(rows.len(), 99);

    for row in &rows {
        assert_eq!(row.len(), 10, "malformed row: {row:?}");
        assert_eq!(row[4], "10", "OPS column off in {row:?}");
    }

    // First data row is sample 1, the final written sample is discarded.
    assert_eq!(rows[0][0], "1");
    assert_eq!(rows[98][0], "99");
}

#[test]
fn running_averages_settle_on_the_per_second_rate() {
    let records = synthetic_ring();
    let mut out = Vec::new();
    let raw = write_raw(&mut out, &records, 10, 100_000).expect("write raw");

    // Once a full one-second window exists, every window carries 100
    // requests, so min == max == 100.
    assert_eq!(raw.requests_min, 100);
    assert_eq!(raw.requests_max, 100);
    assert_eq!(raw.send_min, 10_000);
    assert_eq!(raw.recv_min, 20_000);

    let rows = data_rows(&String::from_utf8(out).unwrap());
    let settled = &rows[50];
    assert_eq!(settled[7], "100"); // OPSRA
    assert_eq!(settled[8], "10000"); // SENDRA
    assert_eq!(settled[9], "20000"); // RECVRA
}

#[test]
fn summary_reports_average_request_rate() {
    let records = synthetic_ring();
    let mut raw_out = Vec::new();
    let raw = write_raw(&mut raw_out, &records, 10, 100_000).expect("write raw");

    let final_stats = SharedStats {
        requests: 1_000,
        bytes_sent: 100_000,
        bytes_recv: 200_000,
        latency_cum: 100 * clock::usecs_to_ticks(500),
        updates: 42,
        marks: 7,
        ..Default::default()
    };

    let mut out = Vec::new();
    write_summary(&mut out, &raw, 10, &final_stats, 2, 4).expect("write summary");
    let text = String::from_utf8(out).unwrap();

    let requests_row = text
        .lines()
        .find(|l| l.contains("requests per second"))
        .expect("requests row");
    let cols: Vec<&str> = requests_row.split_whitespace().collect();
    assert_eq!(cols[1], "100", "AVG requests per second in {requests_row:?}");
    assert_eq!(cols[3], "1000", "TOTAL requests in {requests_row:?}");

    let updates_row = text.lines().find(|l| l.contains("updates")).expect("updates row");
    assert!(updates_row.contains("42"));
    let jobs_row = text.lines().find(|l| l.ends_with("jobs")).expect("jobs row");
    assert!(jobs_row.contains('4'));
}

#[test]
fn empty_ring_produces_headers_only() {
    let records = vec![StatsRecord::default(); 2]; // origin + one sample
    let mut out = Vec::new();
    let raw = write_raw(&mut out, &records, 10, 100_000).expect("write raw");

    assert_eq!(raw.rows, 0);
    assert!(data_rows(&String::from_utf8(out).unwrap()).is_empty());
}
