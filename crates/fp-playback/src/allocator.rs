//! Fixed-size segment allocator backing the engine's media buffer.
//!
//! The engine draws one segment per chunk of demuxed media and hands it back
//! when the chunk is consumed. The buffer policy reads
//! [`Allocator::total_bytes_allocated`] to decide whether the byte budget is
//! exhausted.

use bytes::BytesMut;
use parking_lot::Mutex;

/// Size of one buffer segment.
pub const SEGMENT_SIZE: usize = 64 * 1024;

#[derive(Debug, Default)]
struct Pool {
    /// Segments currently handed out.
    allocated: usize,
    /// Released segments kept for reuse.
    available: Vec<BytesMut>,
    target_bytes: usize,
}

/// Pooling allocator of equally sized segments.
#[derive(Debug)]
pub struct Allocator {
    segment_size: usize,
    pool: Mutex<Pool>,
}

impl Allocator {
    pub fn new(segment_size: usize) -> Self {
        Self {
            segment_size,
            pool: Mutex::new(Pool::default()),
        }
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Hand out a zeroed segment, reusing a released one when possible.
    pub fn allocate(&self) -> BytesMut {
        let mut pool = self.pool.lock();
        pool.allocated += 1;
        match pool.available.pop() {
            Some(mut segment) => {
                segment.clear();
                segment.resize(self.segment_size, 0);
                segment
            }
            None => BytesMut::zeroed(self.segment_size),
        }
    }

    /// Return a segment obtained from [`allocate`](Self::allocate).
    pub fn release(&self, segment: BytesMut) {
        let mut pool = self.pool.lock();
        pool.allocated = pool.allocated.saturating_sub(1);
        pool.available.push(segment);
        self.trim_locked(&mut pool);
    }

    /// Bytes held by segments currently handed out.
    pub fn total_bytes_allocated(&self) -> usize {
        self.pool.lock().allocated * self.segment_size
    }

    pub fn target_buffer_size(&self) -> usize {
        self.pool.lock().target_bytes
    }

    /// Set the byte budget, dropping pooled segments beyond it.
    pub fn set_target_buffer_size(&self, bytes: usize) {
        let mut pool = self.pool.lock();
        pool.target_bytes = bytes;
        self.trim_locked(&mut pool);
    }

    /// Forget all outstanding segments and free the pool.
    pub fn reset(&self) {
        let mut pool = self.pool.lock();
        pool.allocated = 0;
        pool.available.clear();
        pool.target_bytes = 0;
    }

    fn trim_locked(&self, pool: &mut Pool) {
        let target_segments = pool.target_bytes.div_ceil(self.segment_size);
        let keep = target_segments.saturating_sub(pool.allocated);
        pool.available.truncate(keep);
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new(SEGMENT_SIZE)
    }
}
