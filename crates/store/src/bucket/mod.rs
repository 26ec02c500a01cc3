//! Bucket-organized files.
//!
//! This module handles:
//! - Bucket allocation (free list plus growth)
//! - The bucket region of a stream
//! - LRU caching of bucket contents with dirty tracking

mod allocator;
mod cache;
mod file;

pub use allocator::BucketAllocator;
pub use cache::{BucketCache, BucketCallbacks, CacheStats, RawBuckets};
pub use file::BucketFile;
