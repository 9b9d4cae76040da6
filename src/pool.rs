//! Reusable copy buffers.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Size of buffers handed out by [`BufferPool::default`].
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Concurrency-safe pool of fixed-size byte buffers.
///
/// A buffer checked out with [`BufferPool::get`] belongs to its
/// [`PooledBuffer`] until the guard is dropped, which returns it. At most
/// `max_idle` buffers are retained; extra returns are freed.
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    max_idle: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_idle: usize) -> Self {
        assert!(buffer_size > 0, "buffer size must be non-zero");
        Self {
            idle: Mutex::new(Vec::new()),
            buffer_size,
            max_idle,
        }
    }

    /// Check out a buffer, allocating when none is idle.
    ///
    /// The contents are whatever the previous user left; callers only read
    /// bytes they wrote themselves.
    pub fn get(self: &Arc<Self>) -> PooledBuffer {
        let buf = self
            .idle
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_size]);
        PooledBuffer {
            buf,
            pool: Arc::clone(self),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of buffers waiting to be reused
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    fn put(&self, buf: Vec<u8>) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, 64)
    }
}

/// A checked-out buffer, returned to its pool on drop.
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.put(std::mem::take(&mut self.buf));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_are_reused() {
        let pool = Arc::new(BufferPool::new(16, 4));
        let mut a = pool.get();
        a[0] = 42;
        let ptr = a.as_ptr();
        drop(a);
        assert_eq!(pool.idle(), 1);

        let b = pool.get();
        assert_eq!(b.as_ptr(), ptr);
        assert_eq!(b.len(), 16);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_checked_out_buffers_are_distinct() {
        let pool = Arc::new(BufferPool::new(8, 4));
        let a = pool.get();
        let b = pool.get();
        assert_ne!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn test_idle_list_is_bounded() {
        let pool = Arc::new(BufferPool::new(8, 2));
        let held: Vec<_> = (0..5).map(|_| pool.get()).collect();
        drop(held);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_concurrent_checkout() {
        let pool = Arc::new(BufferPool::new(64, 8));
        let handles: Vec<_> = (0..8u8)
            .map(|id| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let mut buf = pool.get();
                        buf.fill(id);
                        assert!(buf.iter().all(|&b| b == id));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.idle() <= 8);
    }
}
