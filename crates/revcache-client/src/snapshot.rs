//! Persistent cache snapshots.
//!
//! # File format
//!
//! All integers little-endian.
//!
//! ```text
//! header:  magic "RSCACHE\0" | version: u32 | entry_count: u64 | total_bytes: u64
//! entry:   oid: i64 | tid: i64 | frequency: u32 | generation: u8 | value_len: u32 | value bytes
//! trailer: crc32 of the body (everything between header and trailer)
//! ```
//!
//! Entries are written protected, then probation, then eden, each MRU→LRU,
//! so a restore that replays the stream in reverse rebuilds every ring's
//! recency order. `generation` is 0 = protected, 1 = probation, 2 = eden.
//! `value_len == 0` encodes a tombstone; live states always carry at least
//! their codec tag byte. `total_bytes` is the sum of all `value_len`s.
//!
//! Files named `cache.N.rscache` live in the configured directory; the
//! highest `N` is the newest. With on-disk compression enabled the whole
//! stream is deflated and the file is named `cache.N.rscachez`. A
//! non-overwriting save appends a new file holding only entries whose
//! content hash is absent from the newest snapshot; rotation keeps the
//! newest `dir_count` files.
//!
//! Malformed input — bad magic, unknown version, short reads, checksum
//! mismatch, trailing bytes — aborts the restore and leaves the cache
//! empty. No partial restores.

use std::collections::HashSet;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use thiserror::Error;
use tracing::{debug, info, warn};

use revcache::Generation;

pub(crate) const MAGIC: [u8; 8] = *b"RSCACHE\0";
pub(crate) const VERSION: u32 = 1;

const HEADER_LEN: usize = 8 + 4 + 8 + 8;
const ENTRY_FIXED_LEN: usize = 8 + 8 + 4 + 1 + 4;

const PLAIN_EXT: &str = "rscache";
const COMPRESSED_EXT: &str = "rscachez";

/// Snapshot persistence failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("cache persistence directory is not configured")]
    NoDirectory,

    #[error("snapshot format error: {0}")]
    Format(&'static str),

    #[error("snapshot version {0} is not supported")]
    Version(u32),

    #[error("snapshot checksum mismatch: stored {stored:08x}, computed {computed:08x}")]
    Checksum { stored: u32, computed: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One entry as it crosses the snapshot boundary: the stored (possibly
/// compressed) bytes, untouched by the value codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SnapshotRecord {
    pub oid: i64,
    pub tid: i64,
    pub frequency: u32,
    pub generation: Generation,
    /// `None` is a tombstone.
    pub value: Option<Vec<u8>>,
}

impl SnapshotRecord {
    fn content_hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.oid.to_le_bytes());
        hasher.update(&self.tid.to_le_bytes());
        match &self.value {
            Some(bytes) => {
                hasher.update(&[1]);
                hasher.update(bytes);
            }
            None => {
                hasher.update(&[0]);
            }
        }
        *hasher.finalize().as_bytes()
    }
}

/// Write `records` (already in stream order) into `dir` as the newest
/// snapshot file. With `overwrite` false, entries already present in the
/// newest existing snapshot are skipped. Returns the written path.
pub(crate) fn save(
    dir: &Path,
    records: Vec<SnapshotRecord>,
    dir_count: usize,
    dir_compress: bool,
    overwrite: bool,
) -> Result<PathBuf, SnapshotError> {
    fs::create_dir_all(dir)?;

    let existing = list_snapshots(dir)?;
    let records = if overwrite {
        records
    } else {
        dedup_against_newest(&existing, records)?
    };

    let next_index = existing.last().map_or(0, |(index, _)| index + 1);
    let ext = if dir_compress { COMPRESSED_EXT } else { PLAIN_EXT };
    let path = dir.join(format!("cache.{next_index}.{ext}"));

    let stream = serialize(&records);
    let bytes = if dir_compress {
        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(stream.len() / 2 + 1),
            flate2::Compression::default(),
        );
        encoder.write_all(&stream)?;
        encoder.finish()?
    } else {
        stream
    };

    // Write-then-rename so a crash never leaves a half-written newest file.
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, &path)?;

    info!(
        path = %path.display(),
        entries = records.len(),
        bytes = bytes.len(),
        overwrite,
        "snapshot saved"
    );

    rotate(dir, dir_count)?;
    Ok(path)
}

/// Read the newest snapshot in `dir`, fully verified. `Ok(None)` when the
/// directory holds no snapshot at all.
pub(crate) fn load_newest(dir: &Path) -> Result<Option<Vec<SnapshotRecord>>, SnapshotError> {
    let Some((_, path)) = list_snapshots(dir)?.pop() else {
        return Ok(None);
    };
    let raw = fs::read(&path)?;
    let stream = if path.extension().is_some_and(|e| e == COMPRESSED_EXT) {
        let mut inflated = Vec::with_capacity(raw.len() * 2);
        ZlibDecoder::new(raw.as_slice())
            .read_to_end(&mut inflated)
            .map_err(|_| SnapshotError::Format("compressed stream is corrupt"))?;
        inflated
    } else {
        raw
    };
    let records = deserialize(&stream)?;
    debug!(path = %path.display(), entries = records.len(), "snapshot loaded");
    Ok(Some(records))
}

// -------------------------------------------------------------------------
// WIRE FORMAT
// -------------------------------------------------------------------------

fn serialize(records: &[SnapshotRecord]) -> Vec<u8> {
    let total_bytes: u64 = records
        .iter()
        .map(|r| r.value.as_ref().map_or(0, Vec::len) as u64)
        .sum();

    let mut body = Vec::with_capacity(records.len() * ENTRY_FIXED_LEN + total_bytes as usize);
    for record in records {
        body.extend_from_slice(&record.oid.to_le_bytes());
        body.extend_from_slice(&record.tid.to_le_bytes());
        body.extend_from_slice(&record.frequency.to_le_bytes());
        body.push(record.generation as u8);
        match &record.value {
            Some(bytes) => {
                body.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                body.extend_from_slice(bytes);
            }
            None => body.extend_from_slice(&0u32.to_le_bytes()),
        }
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&body);
    let crc = hasher.finalize();

    let mut stream = Vec::with_capacity(HEADER_LEN + body.len() + 4);
    stream.extend_from_slice(&MAGIC);
    stream.extend_from_slice(&VERSION.to_le_bytes());
    stream.extend_from_slice(&(records.len() as u64).to_le_bytes());
    stream.extend_from_slice(&total_bytes.to_le_bytes());
    stream.extend_from_slice(&body);
    stream.extend_from_slice(&crc.to_le_bytes());
    stream
}

fn deserialize(stream: &[u8]) -> Result<Vec<SnapshotRecord>, SnapshotError> {
    let mut cursor = Cursor::new(stream);

    if cursor.take(8)? != MAGIC {
        return Err(SnapshotError::Format("bad magic"));
    }
    let version = cursor.u32()?;
    if version != VERSION {
        return Err(SnapshotError::Version(version));
    }
    let entry_count = cursor.u64()?;
    let total_bytes = cursor.u64()?;

    let body_start = cursor.pos;
    let mut records = Vec::with_capacity(entry_count.min(1 << 20) as usize);
    let mut seen_bytes = 0u64;
    for _ in 0..entry_count {
        let oid = cursor.i64()?;
        let tid = cursor.i64()?;
        let frequency = cursor.u32()?;
        let generation = Generation::from_u8(cursor.u8()?)
            .ok_or(SnapshotError::Format("unknown generation"))?;
        let value_len = cursor.u32()? as usize;
        let value = if value_len == 0 {
            None
        } else {
            Some(cursor.take(value_len)?.to_vec())
        };
        seen_bytes += value_len as u64;
        records.push(SnapshotRecord {
            oid,
            tid,
            frequency,
            generation,
            value,
        });
    }
    if seen_bytes != total_bytes {
        return Err(SnapshotError::Format("total bytes mismatch"));
    }
    let body_end = cursor.pos;

    let stored = cursor.u32()?;
    if cursor.pos != stream.len() {
        return Err(SnapshotError::Format("trailing bytes"));
    }
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&stream[body_start..body_end]);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(SnapshotError::Checksum { stored, computed });
    }

    Ok(records)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SnapshotError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(SnapshotError::Format("truncated"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, SnapshotError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, SnapshotError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64, SnapshotError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

// -------------------------------------------------------------------------
// DIRECTORY MANAGEMENT
// -------------------------------------------------------------------------

/// Snapshot files in `dir`, sorted oldest→newest by index.
fn list_snapshots(dir: &Path) -> Result<Vec<(u64, PathBuf)>, SnapshotError> {
    let mut found = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let path = entry?.path();
        if let Some(index) = snapshot_index(&path) {
            found.push((index, path));
        }
    }
    found.sort_by_key(|&(index, _)| index);
    Ok(found)
}

fn snapshot_index(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let rest = name.strip_prefix("cache.")?;
    let (index, ext) = rest.split_once('.')?;
    if ext != PLAIN_EXT && ext != COMPRESSED_EXT {
        return None;
    }
    index.parse().ok()
}

fn rotate(dir: &Path, dir_count: usize) -> Result<(), SnapshotError> {
    let keep = dir_count.max(1);
    let mut files = list_snapshots(dir)?;
    while files.len() > keep {
        let (index, path) = files.remove(0);
        warn!(path = %path.display(), index, "rotating out old snapshot");
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Drop records whose content already exists in the newest snapshot file.
fn dedup_against_newest(
    existing: &[(u64, PathBuf)],
    records: Vec<SnapshotRecord>,
) -> Result<Vec<SnapshotRecord>, SnapshotError> {
    let Some((_, newest)) = existing.last() else {
        return Ok(records);
    };
    let raw = fs::read(newest)?;
    let stream = if newest.extension().is_some_and(|e| e == COMPRESSED_EXT) {
        let mut inflated = Vec::new();
        ZlibDecoder::new(raw.as_slice())
            .read_to_end(&mut inflated)
            .map_err(|_| SnapshotError::Format("compressed stream is corrupt"))?;
        inflated
    } else {
        raw
    };
    // A malformed previous snapshot just disables dedup for this save.
    let Ok(previous) = deserialize(&stream) else {
        warn!(path = %newest.display(), "previous snapshot unreadable; saving without dedup");
        return Ok(records);
    };
    let seen: HashSet<[u8; 32]> = previous.iter().map(SnapshotRecord::content_hash).collect();
    Ok(records
        .into_iter()
        .filter(|r| !seen.contains(&r.content_hash()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(oid: i64, generation: Generation, bytes: &[u8]) -> SnapshotRecord {
        SnapshotRecord {
            oid,
            tid: oid * 10,
            frequency: 3,
            generation,
            value: Some(bytes.to_vec()),
        }
    }

    #[test]
    fn test_serialize_round_trip() {
        let records = vec![
            record(1, Generation::Protected, b"\x00alpha"),
            record(2, Generation::Probation, b"\x00beta"),
            SnapshotRecord {
                oid: 3,
                tid: 30,
                frequency: 1,
                generation: Generation::Eden,
                value: None,
            },
        ];
        let stream = serialize(&records);
        assert_eq!(&stream[..8], &MAGIC);
        let parsed = deserialize(&stream).unwrap();
        assert_eq!(parsed, records);
    }

    #[test]
    fn test_deserialize_rejects_bad_magic() {
        let mut stream = serialize(&[record(1, Generation::Eden, b"\x00x")]);
        stream[0] = b'X';
        assert!(matches!(
            deserialize(&stream),
            Err(SnapshotError::Format("bad magic"))
        ));
    }

    #[test]
    fn test_deserialize_rejects_future_version() {
        let mut stream = serialize(&[record(1, Generation::Eden, b"\x00x")]);
        stream[8] = 2;
        assert!(matches!(deserialize(&stream), Err(SnapshotError::Version(2))));
    }

    #[test]
    fn test_deserialize_rejects_corrupt_body() {
        let mut stream = serialize(&[record(1, Generation::Eden, b"\x00payload")]);
        let flip = stream.len() - 8;
        stream[flip] ^= 0xFF;
        assert!(matches!(
            deserialize(&stream),
            Err(SnapshotError::Checksum { .. })
        ));
    }

    #[test]
    fn test_deserialize_rejects_truncation() {
        let stream = serialize(&[record(1, Generation::Eden, b"\x00payload")]);
        for cut in [stream.len() - 1, stream.len() - 5, HEADER_LEN + 3, 4] {
            let err = deserialize(&stream[..cut]).unwrap_err();
            assert!(
                matches!(err, SnapshotError::Format(_)),
                "cut at {cut} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_deserialize_rejects_trailing_bytes() {
        let mut stream = serialize(&[record(1, Generation::Eden, b"\x00x")]);
        stream.push(0);
        assert!(matches!(
            deserialize(&stream),
            Err(SnapshotError::Format("trailing bytes"))
        ));
    }

    #[test]
    fn test_content_hash_distinguishes_tombstones() {
        let live = SnapshotRecord {
            oid: 1,
            tid: 1,
            frequency: 1,
            generation: Generation::Eden,
            value: Some(Vec::new()),
        };
        let tombstone = SnapshotRecord {
            value: None,
            ..live.clone()
        };
        assert_ne!(live.content_hash(), tombstone.content_hash());
    }

    #[test]
    fn test_snapshot_index_parsing() {
        assert_eq!(snapshot_index(Path::new("/x/cache.0.rscache")), Some(0));
        assert_eq!(snapshot_index(Path::new("/x/cache.17.rscachez")), Some(17));
        assert_eq!(snapshot_index(Path::new("/x/cache.17.tmp")), None);
        assert_eq!(snapshot_index(Path::new("/x/other.1.rscache")), None);
    }
}
