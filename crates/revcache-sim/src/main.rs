//! Benchmark and trace-replay harness for the revcache stack.
//!
//! ```text
//! revcache-sim local --type mixed
//! revcache-sim io --temp /tmp/revcache --do-stream
//! revcache-sim simlocal trace.csv --cache-mb 100,512,1024
//! revcache-sim simstorage trace.csv
//! ```

mod sim;
mod trace;
mod workloads;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use revcache_client::{CacheOptions, LocalClient};

#[derive(Parser)]
#[command(name = "revcache-sim", about = "Cache benchmark and trace-replay harness")]
struct Cli {
    /// Log filter, e.g. `info` or `revcache=debug`.
    #[arg(long, global = true, default_value = "warn")]
    log: String,

    /// Scratch directory for snapshots.
    #[arg(long, global = true)]
    temp: Option<PathBuf>,

    /// Emit the full per-phase JSON breakdown.
    #[arg(long, global = true)]
    profile: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WorkloadKind {
    /// Inserts only.
    Populate,
    /// Populate, then uniform random reads.
    Read,
    /// Populate, reads, then a 90/10 read/write mix.
    Mixed,
}

#[derive(Subcommand)]
enum Command {
    /// Microbenchmark the local client.
    Local {
        #[arg(long = "type", value_enum, default_value_t = WorkloadKind::Mixed)]
        kind: WorkloadKind,
        /// Cache budget in MiB.
        #[arg(long, default_value_t = 100)]
        cache_mb: usize,
    },
    /// Benchmark snapshot save/restore.
    Io {
        /// Also time a deduplicated delta save.
        #[arg(long)]
        do_stream: bool,
        #[arg(long, default_value_t = 100)]
        cache_mb: usize,
    },
    /// Replay a trace file through the bare local client.
    Simlocal {
        file: PathBuf,
        /// Budgets (MiB) to replay at.
        #[arg(long, value_delimiter = ',', default_values_t = vec![100, 512, 1024])]
        cache_mb: Vec<usize>,
    },
    /// Replay a trace through the full storage-cache stack.
    Simstorage {
        file: PathBuf,
        #[arg(long, value_delimiter = ',', default_values_t = vec![100])]
        cache_mb: Vec<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).context("parsing --log filter")?)
        .with_target(false)
        .init();

    match cli.command {
        Command::Local { kind, cache_mb } => {
            let client = LocalClient::new(CacheOptions::default().with_local_mb(cache_mb));
            let mut reports = Vec::new();
            workloads::populate(&client, &mut reports);
            if matches!(kind, WorkloadKind::Read | WorkloadKind::Mixed) {
                workloads::read(&client, &mut reports);
            }
            if matches!(kind, WorkloadKind::Mixed) {
                workloads::mixed(&client, &mut reports);
            }
            print_phases(&reports, cli.profile)?;
        }
        Command::Io { do_stream, cache_mb } => {
            let temp = scratch_dir(cli.temp)?;
            let reports = workloads::run_io(cache_mb, &temp, do_stream)?;
            print_phases(&reports, cli.profile)?;
        }
        Command::Simlocal { file, cache_mb } => {
            let records = trace::read_records(&file)?;
            print_trace_banner(&records, &cache_mb);
            let label = file.display().to_string();
            let reports: Vec<_> = cache_mb
                .iter()
                .map(|&mb| sim::simulate_local(&records, mb, &label))
                .collect();
            print_sim_table(&reports, cli.profile)?;
        }
        Command::Simstorage { file, cache_mb } => {
            let records = trace::read_records(&file)?;
            print_trace_banner(&records, &cache_mb);
            let label = file.display().to_string();
            let reports = cache_mb
                .iter()
                .map(|&mb| sim::simulate_storage(&records, mb, &label))
                .collect::<Result<Vec<_>, _>>()?;
            print_sim_table(&reports, cli.profile)?;
        }
    }
    Ok(())
}

fn scratch_dir(temp: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let dir = temp.unwrap_or_else(|| std::env::temp_dir().join("revcache-sim"));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating scratch directory {}", dir.display()))?;
    Ok(dir)
}

fn print_trace_banner(records: &[trace::Record], cache_mb: &[usize]) {
    let summary = trace::summarize(records);
    println!(
        "Simulating {} operations (reads: {} writes: {}) over {} distinct keys from {} connections at limits {:?} MiB",
        summary.operations,
        summary.reads,
        summary.writes,
        summary.distinct_keys,
        summary.connections,
        cache_mb,
    );
}

fn print_phases(reports: &[workloads::PhaseReport], profile: bool) -> anyhow::Result<()> {
    println!(
        "{:12} {:>10} {:>9} {:>12} {:>10} {:>10}",
        "Phase", "Ops", "Time", "Ops/sec", "Hits", "Misses"
    );
    for r in reports {
        println!(
            "{:12} {:>10} {:>8.2}s {:>12.0} {:>10} {:>10}",
            r.phase, r.operations, r.seconds, r.ops_per_sec, r.hits, r.misses
        );
    }
    if profile {
        println!("{}", serde_json::to_string_pretty(reports)?);
    }
    Ok(())
}

fn print_sim_table(reports: &[sim::SimReport], profile: bool) -> anyhow::Result<()> {
    println!(
        "{:24} {:>6} {:>8} {:>8} {:>6}",
        "File", "Limit", "Size", "Time", "Hits"
    );
    for r in reports {
        let name = std::path::Path::new(&r.file)
            .file_name()
            .map_or_else(|| r.file.clone(), |n| n.to_string_lossy().into_owned());
        println!(
            "{:24} {:>6} {:>7.2}M {:>7.2}s {:>6.3}",
            name, r.limit_mb, r.cached_mb, r.seconds, r.hit_ratio
        );
    }
    if profile {
        println!("{}", serde_json::to_string_pretty(reports)?);
    }
    Ok(())
}
