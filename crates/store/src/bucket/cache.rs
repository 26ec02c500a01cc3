//! LRU bucket cache with callback-based (de)serialization.
//!
//! The cache holds at most one in-memory copy of each bucket. A bucket is
//! materialized from its bytes by [`BucketCallbacks::read_bucket`], written
//! back by [`BucketCallbacks::write_bucket`], and a newly added bucket is
//! initialized by [`BucketCallbacks::init_bucket`]. Dirty buckets are written
//! before they are evicted, cleared, or flushed; clean ones are just dropped.

use std::collections::{BTreeMap, HashMap};

use super::{BucketAllocator, BucketFile};
use crate::error::{BucketId, Error, Result};

/// Converts between the raw bytes of a bucket and its in-memory form `P`.
pub trait BucketCallbacks<P> {
    /// Materializes a bucket from its bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes cannot be interpreted.
    fn read_bucket(&self, bytes: &[u8]) -> Result<P>;

    /// Serializes a bucket into `out` (exactly one bucket long).
    fn write_bucket(&self, bucket: &P, out: &mut [u8]);

    /// Creates the contents of a newly added bucket.
    fn init_bucket(&self, bucket_size: usize) -> P;
}

/// Callbacks for buckets kept as plain bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBuckets;

impl BucketCallbacks<Vec<u8>> for RawBuckets {
    fn read_bucket(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn write_bucket(&self, bucket: &Vec<u8>, out: &mut [u8]) {
        out.copy_from_slice(bucket);
    }

    fn init_bucket(&self, bucket_size: usize) -> Vec<u8> {
        vec![0u8; bucket_size]
    }
}

/// Bucket cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached buckets.
    pub size: usize,
    /// Maximum number of cached buckets.
    pub capacity: usize,
    /// Number of dirty cached buckets.
    pub dirty_count: usize,
    /// Bucket accesses since creation.
    pub accesses: u64,
    /// Buckets read from the file.
    pub reads: u64,
    /// Buckets written to the file.
    pub writes: u64,
    /// Buckets initialized by `add_bucket`.
    pub inits: u64,
}

/// Cache entry with recency tracking.
#[derive(Debug)]
struct CacheEntry<P> {
    payload: P,
    dirty: bool,
    /// Tick of the most recent access.
    last_used: u64,
}

/// LRU cache of the buckets of one [`BucketFile`].
#[derive(Debug)]
pub struct BucketCache<P, C> {
    file: BucketFile,
    callbacks: C,
    allocator: BucketAllocator,
    entries: HashMap<BucketId, CacheEntry<P>>,
    /// Recency order: access tick to bucket.
    recency: BTreeMap<u64, BucketId>,
    capacity: usize,
    tick: u64,
    /// The bucket returned by the most recent `get_bucket`.
    active: Option<BucketId>,
    /// Scratch buffer of one bucket.
    scratch: Vec<u8>,
    stats: CacheStats,
}

impl<P, C: BucketCallbacks<P>> BucketCache<P, C> {
    /// Creates a cache over `file` holding at most `capacity` buckets.
    pub fn new(file: BucketFile, callbacks: C, allocator: BucketAllocator, capacity: usize) -> Self {
        let scratch = vec![0u8; file.bucket_size()];
        Self {
            file,
            callbacks,
            allocator,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            capacity: capacity.max(1),
            tick: 0,
            active: None,
            scratch,
            stats: CacheStats::default(),
        }
    }

    /// Size of one bucket in bytes.
    pub fn bucket_size(&self) -> usize {
        self.file.bucket_size()
    }

    /// Number of bucket slots in the file.
    pub fn nr_buckets(&self) -> u64 {
        self.allocator.nr_buckets()
    }

    /// The free list.
    pub fn free_list(&self) -> &[BucketId] {
        self.allocator.free_list()
    }

    /// The underlying bucket file.
    pub fn file_mut(&mut self) -> &mut BucketFile {
        &mut self.file
    }

    /// Returns bucket `bucket`, reading it if it is not cached, and makes it
    /// the active bucket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BucketOutOfRange`] for a bucket beyond the file, or an
    /// I/O error if reading it fails.
    pub fn get_bucket(&mut self, bucket: BucketId) -> Result<&P> {
        self.load(bucket)?;
        self.entry(bucket).map(|e| &e.payload)
    }

    /// Returns bucket `bucket` for modification and marks it dirty.
    ///
    /// # Errors
    ///
    /// See [`get_bucket`](Self::get_bucket).
    pub fn get_bucket_mut(&mut self, bucket: BucketId) -> Result<&mut P> {
        self.load(bucket)?;
        let entry = self.entry_mut(bucket)?;
        entry.dirty = true;
        Ok(&mut entry.payload)
    }

    /// Marks the active bucket dirty.
    pub fn set_dirty(&mut self) {
        if let Some(bucket) = self.active
            && let Some(entry) = self.entries.get_mut(&bucket)
        {
            entry.dirty = true;
        }
    }

    /// Adds a bucket, reusing a freed one if possible, initialized by the
    /// init callback. The new bucket is dirty and active.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if making room in the cache fails; the bucket
    /// then goes back onto the free list.
    pub fn add_bucket(&mut self) -> Result<BucketId> {
        let (bucket, _grew) = self.allocator.allocate();
        let payload = self.callbacks.init_bucket(self.file.bucket_size());
        self.stats.inits += 1;
        if let Err(err) = self.insert(bucket, payload, true) {
            self.allocator.free(bucket);
            return Err(err);
        }
        Ok(bucket)
    }

    /// Removes a bucket: its cached copy is dropped unwritten and the bucket
    /// goes onto the free list.
    pub fn remove_bucket(&mut self, bucket: BucketId) {
        if self.entries.remove(&bucket).is_some() {
            self.recency.retain(|_, b| *b != bucket);
        }
        if self.active == Some(bucket) {
            self.active = None;
        }
        self.allocator.free(bucket);
    }

    /// Writes every dirty bucket, then flushes the file (forcing it to disk
    /// if `sync` is set).
    ///
    /// Returns `true` if any bucket was written.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a write fails.
    pub fn flush(&mut self, sync: bool) -> Result<bool> {
        let mut dirty: Vec<BucketId> =
            self.entries.iter().filter(|(_, e)| e.dirty).map(|(b, _)| *b).collect();
        dirty.sort_unstable();
        for bucket in &dirty {
            self.write_back(*bucket)?;
        }
        self.file.flush(sync)?;
        Ok(!dirty.is_empty())
    }

    /// Writes dirty buckets and empties the cache.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a write fails.
    pub fn clear(&mut self) -> Result<()> {
        self.flush(false)?;
        self.entries.clear();
        self.recency.clear();
        self.active = None;
        Ok(())
    }

    /// Changes the capacity, evicting least recently used buckets as needed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if writing an evicted bucket fails.
    pub fn resize(&mut self, capacity: usize) -> Result<()> {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.evict_one()?;
        }
        Ok(())
    }

    /// Discards every cached bucket without writing and takes over the
    /// allocation state read back from disk.
    pub fn resync(&mut self, allocator: BucketAllocator) {
        self.entries.clear();
        self.recency.clear();
        self.active = None;
        self.allocator = allocator;
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            capacity: self.capacity,
            dirty_count: self.entries.values().filter(|e| e.dirty).count(),
            ..self.stats
        }
    }

    /// Returns `true` if the bucket is cached.
    pub fn contains(&self, bucket: BucketId) -> bool {
        self.entries.contains_key(&bucket)
    }

    fn entry(&self, bucket: BucketId) -> Result<&CacheEntry<P>> {
        self.entries.get(&bucket).ok_or(Error::BucketOutOfRange {
            bucket,
            nr_buckets: self.allocator.nr_buckets(),
        })
    }

    fn entry_mut(&mut self, bucket: BucketId) -> Result<&mut CacheEntry<P>> {
        let nr_buckets = self.allocator.nr_buckets();
        self.entries.get_mut(&bucket).ok_or(Error::BucketOutOfRange { bucket, nr_buckets })
    }

    /// Ensures `bucket` is cached, refreshes its recency and makes it active.
    fn load(&mut self, bucket: BucketId) -> Result<()> {
        self.stats.accesses += 1;
        self.active = Some(bucket);
        if self.entries.contains_key(&bucket) {
            self.touch(bucket);
            return Ok(());
        }
        if bucket >= self.allocator.nr_buckets() {
            return Err(Error::BucketOutOfRange { bucket, nr_buckets: self.allocator.nr_buckets() });
        }
        self.file.read_bucket(bucket, &mut self.scratch)?;
        self.stats.reads += 1;
        let payload = self.callbacks.read_bucket(&self.scratch)?;
        self.insert(bucket, payload, false)
    }

    fn touch(&mut self, bucket: BucketId) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.entries.get_mut(&bucket) {
            self.recency.remove(&entry.last_used);
            entry.last_used = tick;
            self.recency.insert(tick, bucket);
        }
    }

    fn insert(&mut self, bucket: BucketId, payload: P, dirty: bool) -> Result<()> {
        while self.entries.len() >= self.capacity {
            self.evict_one()?;
        }
        self.tick += 1;
        self.recency.insert(self.tick, bucket);
        self.entries.insert(bucket, CacheEntry { payload, dirty, last_used: self.tick });
        self.active = Some(bucket);
        Ok(())
    }

    /// Evicts the least recently used bucket, writing it first if dirty.
    fn evict_one(&mut self) -> Result<()> {
        let Some((_, bucket)) = self.recency.first_key_value().map(|(t, b)| (*t, *b)) else {
            return Ok(());
        };
        self.write_back(bucket)?;
        if let Some(entry) = self.entries.remove(&bucket) {
            self.recency.remove(&entry.last_used);
        }
        if self.active == Some(bucket) {
            self.active = None;
        }
        Ok(())
    }

    /// Writes `bucket` if it is cached and dirty.
    fn write_back(&mut self, bucket: BucketId) -> Result<()> {
        let Some(entry) = self.entries.get_mut(&bucket) else { return Ok(()) };
        if !entry.dirty {
            return Ok(());
        }
        self.callbacks.write_bucket(&entry.payload, &mut self.scratch);
        self.file.write_bucket(bucket, &self.scratch)?;
        entry.dirty = false;
        self.stats.writes += 1;
        Ok(())
    }
}
