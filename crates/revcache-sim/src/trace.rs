//! Trace file parsing.
//!
//! Traces are comma-separated records, one operation per line:
//!
//! ```text
//! conn,key,size,op[,timestamp]
//! ```
//!
//! `conn` identifies the originating connection, `key` is the object id,
//! `size` the state size in bytes, `op` is `r` or `w`. A trailing timestamp
//! is accepted and ignored. Blank lines and `#` comments are skipped;
//! malformed lines are counted and reported, not fatal.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::Context;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy)]
pub struct Record {
    pub conn: u32,
    pub key: i64,
    pub size: usize,
    pub op: Op,
}

pub fn read_records(path: &Path) -> anyhow::Result<Vec<Record>> {
    let file = File::open(path).with_context(|| format!("opening trace {}", path.display()))?;
    let mut records = Vec::new();
    let mut malformed = 0usize;
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse_line(trimmed) {
            Some(record) => records.push(record),
            None => {
                malformed += 1;
                if malformed <= 5 {
                    warn!(line = lineno + 1, content = trimmed, "skipping malformed record");
                }
            }
        }
    }
    if malformed > 0 {
        warn!(malformed, total = records.len(), "trace contained malformed lines");
    }
    Ok(records)
}

fn parse_line(line: &str) -> Option<Record> {
    let mut fields = line.split(',').map(str::trim);
    let conn = fields.next()?.parse().ok()?;
    let key = fields.next()?.parse().ok()?;
    let size = fields.next()?.parse().ok()?;
    let op = match fields.next()? {
        "r" | "R" => Op::Read,
        "w" | "W" => Op::Write,
        _ => return None,
    };
    Some(Record { conn, key, size, op })
}

/// Workload facts used by the report headers.
pub struct TraceSummary {
    pub operations: usize,
    pub reads: usize,
    pub writes: usize,
    pub distinct_keys: usize,
    pub connections: usize,
}

pub fn summarize(records: &[Record]) -> TraceSummary {
    let mut keys: Vec<i64> = records.iter().map(|r| r.key).collect();
    keys.sort_unstable();
    keys.dedup();
    let mut conns: Vec<u32> = records.iter().map(|r| r.conn).collect();
    conns.sort_unstable();
    conns.dedup();
    let reads = records.iter().filter(|r| r.op == Op::Read).count();
    TraceSummary {
        operations: records.len(),
        reads,
        writes: records.len() - reads,
        distinct_keys: keys.len(),
        connections: conns.len(),
    }
}
