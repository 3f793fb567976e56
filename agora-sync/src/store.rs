//! RocksDB-backed collection store.
//!
//! One [`Collection`] per named collection, each with its own database
//! under `<root>/<name>` — no cross-collection coupling. Records are
//! append-only:
//!
//! ```text
//! key:   sequence number (8 bytes big-endian)
//! value: LZ4-framed bincode record
//! ```
//!
//! Big-endian keys make lexicographic iteration equal insertion order, so
//! `list()` is a single forward scan. The append sequence is recovered
//! from the highest existing key on open.
//!
//! Reference: Kleppmann — DDIA, Chapter 3 (LSM Trees, SSTables)

use rocksdb::{
    BlockBasedOptions, Cache, DBCompressionType, DBWithThreadMode, IteratorMode, Options,
    SingleThreaded, WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory; each collection opens `<path>/<name>`
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("agora_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 2 * 1024 * 1024,
        }
    }
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// The database handle could not be established — fatal at startup
    Unavailable(String),
    /// RocksDB internal error on an individual operation
    DatabaseError(String),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// Compression error
    CompressionError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "Store unavailable: {e}"),
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// An append-only collection of records of one type.
///
/// `open()` establishes the handle, `list()` returns the full sequence in
/// insertion order, `save()` appends one record. There is no filtering,
/// paging, or indexing at this layer.
pub struct Collection<T> {
    /// RocksDB instance (single-threaded mode — concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    name: String,
    path: PathBuf,
    /// Next append sequence
    sequence: AtomicU64,
    sync_writes: bool,
    _record: PhantomData<fn() -> T>,
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Open the collection's database at `<config.path>/<name>`.
    ///
    /// Creates the database if it doesn't exist. Failure means the
    /// collection cannot be served at all; callers propagate it out of
    /// startup rather than retrying.
    pub fn open(name: &str, config: &StoreConfig) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(config.max_open_files);
        opts.set_keep_log_file_num(5);
        opts.increase_parallelism(num_cpus());

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        let path = config.path.join(name);
        let db = DBWithThreadMode::<SingleThreaded>::open(&opts, &path)
            .map_err(|e| StoreError::Unavailable(format!("{name}: {e}")))?;

        let sequence = Self::recover_sequence(&db);

        Ok(Self {
            db,
            name: name.to_string(),
            path,
            sequence: AtomicU64::new(sequence),
            sync_writes: config.sync_writes,
            _record: PhantomData,
        })
    }

    /// Recover the next append sequence from the highest existing key.
    fn recover_sequence(db: &DBWithThreadMode<SingleThreaded>) -> u64 {
        let mut iter = db.iterator(IteratorMode::End);
        match iter.next() {
            Some(Ok((key, _))) => {
                if key.len() >= 8 {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(&key[..8]);
                    u64::from_be_bytes(buf) + 1
                } else {
                    0
                }
            }
            _ => 0,
        }
    }

    /// Append one record. Returns the sequence number assigned.
    ///
    /// Callers that need to observe the record in a subsequent `list()`
    /// must await completion first; nothing else guarantees visibility.
    pub fn save(&self, record: &T) -> Result<u64, StoreError> {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.write_record(seq, record)?;
        Ok(seq)
    }

    /// Reserve the next sequence, build the record from it, and append.
    ///
    /// This is how id-bearing records receive their server-assigned
    /// identity without a read-modify-write race.
    pub fn save_with<F>(&self, build: F) -> Result<(u64, T), StoreError>
    where
        F: FnOnce(u64) -> T,
    {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let record = build(seq);
        self.write_record(seq, &record)?;
        Ok((seq, record))
    }

    fn write_record(&self, seq: u64, record: &T) -> Result<(), StoreError> {
        let encoded = bincode::serde::encode_to_vec(record, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        let compressed = lz4_flex::compress_prepend_size(&encoded);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);
        self.db
            .put_opt(seq.to_be_bytes(), &compressed, &write_opts)?;
        Ok(())
    }

    /// Return the full record sequence in insertion order.
    ///
    /// The sole read path for the collection.
    pub fn list(&self) -> Result<Vec<T>, StoreError> {
        let mut records = Vec::new();

        for item in self.db.iterator(IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            if key.len() < 8 {
                continue;
            }

            let decompressed = lz4_flex::decompress_size_prepended(&value)
                .map_err(|e| StoreError::CompressionError(e.to_string()))?;
            let (record, _) =
                bincode::serde::decode_from_slice(&decompressed, bincode::config::standard())
                    .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
            records.push(record);
        }

        Ok(records)
    }

    /// Number of records appended so far.
    pub fn len(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Whether the collection holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force a flush to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Database path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
