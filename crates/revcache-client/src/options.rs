//! Client configuration.

use std::path::PathBuf;

use revcache::GenerationWeights;

use crate::compress::Compression;

/// Configuration for a [`crate::LocalClient`].
///
/// Mirrors the storage option set: budget in MiB, a per-object size ceiling,
/// the value codec, and the snapshot directory settings.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Total cache byte budget, in MiB.
    pub local_mb: usize,

    /// Per-value size ceiling in bytes. Writes above it are dropped.
    pub object_max: usize,

    /// Value codec applied on write.
    pub compression: Compression,

    /// Directory for persistent snapshots; `None` disables persistence.
    pub dir: Option<PathBuf>,

    /// Number of snapshot files retained in the directory.
    pub dir_count: usize,

    /// Compress whole snapshot files on disk.
    pub dir_compress: bool,

    /// Generation split of the byte budget.
    pub weights: GenerationWeights,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            local_mb: 10,
            object_max: 16_384,
            compression: Compression::None,
            dir: None,
            dir_count: 1,
            dir_compress: false,
            weights: GenerationWeights::default(),
        }
    }
}

impl CacheOptions {
    /// Sets the byte budget in MiB.
    pub fn with_local_mb(mut self, mb: usize) -> Self {
        self.local_mb = mb;
        self
    }

    /// Sets the per-value size ceiling.
    pub fn with_object_max(mut self, bytes: usize) -> Self {
        self.object_max = bytes;
        self
    }

    /// Sets the value codec.
    pub fn with_compression(mut self, codec: Compression) -> Self {
        self.compression = codec;
        self
    }

    /// Sets the snapshot directory.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Sets how many snapshot files are retained.
    pub fn with_dir_count(mut self, count: usize) -> Self {
        self.dir_count = count;
        self
    }

    /// Compress snapshot files on disk.
    pub fn with_dir_compress(mut self, compress: bool) -> Self {
        self.dir_compress = compress;
        self
    }

    /// Sets the generation split.
    pub fn with_weights(mut self, weights: GenerationWeights) -> Self {
        self.weights = weights;
        self
    }

    /// The budget in bytes.
    pub fn byte_budget(&self) -> usize {
        self.local_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = CacheOptions::default();
        assert_eq!(options.byte_budget(), 10 * 1024 * 1024);
        assert_eq!(options.object_max, 16_384);
        assert_eq!(options.compression, Compression::None);
        assert!(options.dir.is_none());
        assert_eq!(options.dir_count, 1);
    }

    #[test]
    fn test_builders() {
        let options = CacheOptions::default()
            .with_local_mb(100)
            .with_compression(Compression::Zlib)
            .with_dir("/tmp/cache")
            .with_dir_count(3)
            .with_dir_compress(true);
        assert_eq!(options.byte_budget(), 100 * 1024 * 1024);
        assert_eq!(options.dir.as_deref(), Some(std::path::Path::new("/tmp/cache")));
        assert_eq!(options.dir_count, 3);
        assert!(options.dir_compress);
    }
}
