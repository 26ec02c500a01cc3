//! Free-list bucket allocator.
//!
//! All buckets of a file have the same size, so a plain LIFO free list is
//! enough: freed buckets are handed out again before the file grows.

use crate::error::BucketId;

/// Free-list based bucket allocator.
///
/// Buckets are allocated from the free list. When the free list is empty,
/// new buckets are allocated by extending the file.
#[derive(Debug, Clone, Default)]
pub struct BucketAllocator {
    /// Freed buckets available for reuse.
    free_buckets: Vec<BucketId>,
    /// Next bucket number to allocate if the free list is empty.
    next_bucket: BucketId,
}

impl BucketAllocator {
    /// Creates an allocator for a file holding `nr_buckets` buckets.
    pub fn new(nr_buckets: u64, free_buckets: Vec<BucketId>) -> Self {
        Self { free_buckets, next_bucket: nr_buckets }
    }

    /// Allocates a bucket, preferring freed ones.
    ///
    /// Returns the bucket number and whether the file grew.
    pub fn allocate(&mut self) -> (BucketId, bool) {
        if let Some(bucket) = self.free_buckets.pop() {
            return (bucket, false);
        }
        let bucket = self.next_bucket;
        self.next_bucket += 1;
        (bucket, true)
    }

    /// Frees a bucket for later reuse.
    pub fn free(&mut self, bucket: BucketId) {
        self.free_buckets.push(bucket);
    }

    /// Number of bucket slots in the file (free ones included).
    pub fn nr_buckets(&self) -> u64 {
        self.next_bucket
    }

    /// The current free list.
    pub fn free_list(&self) -> &[BucketId] {
        &self.free_buckets
    }

    /// Returns `true` if `bucket` exists and is not on the free list.
    pub fn is_allocated(&self, bucket: BucketId) -> bool {
        bucket < self.next_bucket && !self.free_buckets.contains(&bucket)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_new_buckets() {
        let mut allocator = BucketAllocator::default();
        assert_eq!(allocator.allocate(), (0, true));
        assert_eq!(allocator.allocate(), (1, true));
        assert_eq!(allocator.allocate(), (2, true));
        assert_eq!(allocator.nr_buckets(), 3);
    }

    #[test]
    fn test_free_and_reuse() {
        let mut allocator = BucketAllocator::default();
        let _b0 = allocator.allocate();
        let (b1, _) = allocator.allocate();
        let _b2 = allocator.allocate();

        allocator.free(b1);
        assert!(!allocator.is_allocated(b1));

        // Next allocation should reuse the freed bucket
        assert_eq!(allocator.allocate(), (b1, false));
        // Now should grow
        assert_eq!(allocator.allocate(), (3, true));
    }

    #[test]
    fn test_restore_from_persisted_state() {
        let mut allocator = BucketAllocator::new(10, vec![4, 7]);
        assert_eq!(allocator.free_list(), &[4, 7]);
        assert_eq!(allocator.allocate(), (7, false));
        assert_eq!(allocator.allocate(), (4, false));
        assert_eq!(allocator.allocate(), (10, true));
    }
}
