//! Synthetic microbenchmarks over the local client.

use std::path::Path;
use std::time::Instant;

use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::Serialize;

use revcache_client::{CacheOptions, LocalClient};

/// Object population size mix: mostly small states with a tail of
/// multi-KiB ones.
const SIZE_DISTRIBUTION: &[(usize, usize)] = &[
    (100, 800),
    (300, 500),
    (1_024, 300),
    (2_048, 200),
    (4_096, 150),
];

const POPULATE_OPS: usize = 20_000;
const READ_OPS: usize = 100_000;
const MIXED_OPS: usize = 100_000;
const SEED: u64 = 0x5EED_CACE;

#[derive(Debug, Serialize)]
pub struct PhaseReport {
    pub phase: &'static str,
    pub operations: usize,
    pub seconds: f64,
    pub ops_per_sec: f64,
    pub hits: u64,
    pub misses: u64,
    pub cache_bytes: usize,
    pub cache_entries: usize,
}

fn phase_report(
    phase: &'static str,
    operations: usize,
    started: Instant,
    client: &LocalClient,
) -> PhaseReport {
    let seconds = started.elapsed().as_secs_f64();
    let stats = client.stats();
    PhaseReport {
        phase,
        operations,
        seconds,
        ops_per_sec: operations as f64 / seconds.max(f64::EPSILON),
        hits: stats.hits,
        misses: stats.misses,
        cache_bytes: stats.size,
        cache_entries: stats.count,
    }
}

/// One payload per distribution slot, deterministic across runs.
fn payloads() -> Vec<Vec<u8>> {
    let mut rng = SmallRng::seed_from_u64(SEED);
    let mut out = Vec::new();
    for &(size, count) in SIZE_DISTRIBUTION {
        for _ in 0..count {
            let mut payload = vec![0u8; size];
            rng.fill_bytes(&mut payload);
            out.push(payload);
        }
    }
    out
}

/// Populate-only benchmark: unique keys cycling the size distribution.
pub fn populate(client: &LocalClient, reports: &mut Vec<PhaseReport>) {
    let data = payloads();
    let started = Instant::now();
    for n in 0..POPULATE_OPS {
        client.set(n as i64, 1, &data[n % data.len()]);
    }
    reports.push(phase_report("populate", POPULATE_OPS, started, client));
}

/// Read benchmark: uniform random keys over the populated range.
pub fn read(client: &LocalClient, reports: &mut Vec<PhaseReport>) {
    let mut rng = SmallRng::seed_from_u64(SEED ^ 1);
    let started = Instant::now();
    for _ in 0..READ_OPS {
        let key = rng.gen_range(0..POPULATE_OPS as i64);
        client.get(key, 1);
    }
    reports.push(phase_report("read", READ_OPS, started, client));
}

/// Mixed benchmark: 90% reads, 10% re-writes.
pub fn mixed(client: &LocalClient, reports: &mut Vec<PhaseReport>) {
    let data = payloads();
    let mut rng = SmallRng::seed_from_u64(SEED ^ 2);
    let started = Instant::now();
    for n in 0..MIXED_OPS {
        let key = rng.gen_range(0..POPULATE_OPS as i64);
        if n % 10 == 0 {
            client.set(key, 1, &data[key as usize % data.len()]);
        } else {
            client.get(key, 1);
        }
    }
    reports.push(phase_report("mixed", MIXED_OPS, started, client));
}

/// Snapshot save/restore benchmark. `do_stream` additionally times a
/// deduplicated delta save on top of the full one.
pub fn run_io(
    cache_mb: usize,
    temp: &Path,
    do_stream: bool,
) -> anyhow::Result<Vec<PhaseReport>> {
    let options = CacheOptions::default().with_local_mb(cache_mb).with_dir(temp);
    let client = LocalClient::new(options.clone());
    let mut reports = Vec::new();
    populate(&client, &mut reports);

    let started = Instant::now();
    client.save(true)?;
    reports.push(phase_report("save", client.len(), started, &client));

    let restored = LocalClient::new(options);
    let started = Instant::now();
    let count = restored.restore()?;
    reports.push(phase_report("restore", count, started, &restored));

    if do_stream {
        // A handful of fresh entries, then a delta save that should skip
        // everything already on disk.
        for n in 0..100 {
            client.set(1_000_000 + n, 2, &[0u8; 512]);
        }
        let started = Instant::now();
        client.save(false)?;
        reports.push(phase_report("delta_save", 100, started, &client));
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_distribution_counts() {
        let data = payloads();
        assert_eq!(data.len(), 800 + 500 + 300 + 200 + 150);
        assert_eq!(data[0].len(), 100);
        assert_eq!(data.last().unwrap().len(), 4_096);
    }

    #[test]
    fn test_populate_then_read_produces_hits() {
        let client = LocalClient::new(CacheOptions::default().with_local_mb(50));
        let mut reports = Vec::new();
        populate(&client, &mut reports);
        read(&client, &mut reports);
        assert_eq!(reports.len(), 2);
        assert!(reports[1].hits > 0, "a 50 MiB cache should hold the population");
    }
}
