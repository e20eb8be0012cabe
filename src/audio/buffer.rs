//! Lock-free ring buffer for captured audio
//!
//! Single-producer single-consumer queue between the device input
//! callback and the output callback that drives the duplex engine.
//! Sample blocks travel through the queue and come back through a free
//! list, so neither callback allocates once the pool is warm.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Lock-free ring buffer of captured sample blocks
pub struct RingBuffer {
    queue: ArrayQueue<Vec<i32>>,
    /// Emptied blocks waiting to be refilled
    free: ArrayQueue<Vec<i32>>,
    overflow_count: AtomicUsize,
}

impl RingBuffer {
    /// Queue of `capacity` blocks, with the free list pre-filled with
    /// `capacity` blocks of `block_len` samples
    pub fn new(capacity: usize, block_len: usize) -> Self {
        let free = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            let _ = free.push(Vec::with_capacity(block_len));
        }
        Self {
            queue: ArrayQueue::new(capacity),
            free,
            overflow_count: AtomicUsize::new(0),
        }
    }

    /// Empty block from the free list; allocates only when the list is dry
    pub fn take_block(&self, block_len: usize) -> Vec<i32> {
        match self.free.pop() {
            Some(mut block) => {
                block.clear();
                block
            }
            None => Vec::with_capacity(block_len),
        }
    }

    /// Hand a consumed block back for reuse
    pub fn recycle(&self, block: Vec<i32>) {
        // A full free list just lets the block drop
        let _ = self.free.push(block);
    }

    /// Push a block into the buffer.
    /// Returns false if the buffer is full (overflow); the block is recycled.
    pub fn push(&self, block: Vec<i32>) -> bool {
        match self.queue.push(block) {
            Ok(()) => true,
            Err(block) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                self.recycle(block);
                false
            }
        }
    }

    pub fn try_pop(&self) -> Option<Vec<i32>> {
        self.queue.pop()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer
pub fn create_shared_buffer(capacity: usize, block_len: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity, block_len))
}

/// Reassembles captured blocks into blocks of the size the output side asks for.
///
/// Lives on the output callback thread. Samples are never dropped here;
/// only a full [`RingBuffer`] loses capture.
pub struct CaptureAssembler {
    source: SharedRingBuffer,
    pending: Vec<i32>,
    /// Samples already handed out from the front of `pending`
    consumed: usize,
}

impl CaptureAssembler {
    pub fn new(source: SharedRingBuffer, block_hint: usize) -> Self {
        Self {
            source,
            pending: Vec::with_capacity(block_hint * 4),
            consumed: 0,
        }
    }

    /// Up to `want` captured samples, oldest first
    pub fn next_block(&mut self, want: usize) -> &[i32] {
        if self.consumed > 0 {
            self.pending.drain(..self.consumed);
            self.consumed = 0;
        }
        while self.pending.len() < want {
            match self.source.try_pop() {
                Some(block) => {
                    self.pending.extend_from_slice(&block);
                    self.source.recycle(block);
                }
                None => break,
            }
        }
        let n = want.min(self.pending.len());
        self.consumed = n;
        &self.pending[..n]
    }
}
