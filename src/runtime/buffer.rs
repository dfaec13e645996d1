//! Reactor buffer pool.
//!
//! Provides fixed-size read buffers without per-read malloc overhead.
//! Each registered connection holds one buffer for its lifetime; received
//! bytes are copied out into a `Bytes` chunk before being handed to the
//! connection's handler, so the buffer is free again for the next read.

/// Fixed-size buffers with a LIFO free list.
pub struct BufferPool {
    /// Actual buffer storage.
    buffers: Vec<Vec<u8>>,
    /// Stack of available buffer indices (LIFO for cache locality).
    free_list: Vec<usize>,
}

impl BufferPool {
    /// Create a new buffer pool.
    ///
    /// # Arguments
    /// * `count` - Number of buffers to pre-allocate
    /// * `size` - Size of each buffer in bytes
    pub fn new(count: usize, size: usize) -> Self {
        let mut buffers = Vec::with_capacity(count);
        let mut free_list = Vec::with_capacity(count);

        for i in 0..count {
            buffers.push(vec![0u8; size]);
            free_list.push(i);
        }

        Self {
            buffers,
            free_list,
        }
    }

    /// Allocate a buffer from the pool.
    ///
    /// Returns `None` if no buffers are available.
    pub fn alloc(&mut self) -> Option<usize> {
        self.free_list.pop()
    }

    /// Return a buffer to the pool.
    pub fn free(&mut self, idx: usize) {
        debug_assert!(idx < self.buffers.len(), "buffer index out of bounds");
        debug_assert!(!self.free_list.contains(&idx), "double free of buffer");
        self.free_list.push(idx);
    }

    /// # Panics
    /// Panics if `idx` is out of bounds.
    pub fn get_mut(&mut self, idx: usize) -> &mut [u8] {
        &mut self.buffers[idx]
    }

    pub fn capacity(&self) -> usize {
        self.buffers.len()
    }

    pub fn available(&self) -> usize {
        self.free_list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_buffer_per_connection() {
        let mut pool = BufferPool::new(2, 16);
        assert_eq!(pool.capacity(), 2);

        let client = pool.alloc().unwrap();
        let server = pool.alloc().unwrap();
        assert_ne!(client, server);
        assert_eq!(pool.get_mut(server).len(), 16);

        // A third connection is rejected until one closes
        assert!(pool.alloc().is_none());
        pool.free(client);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.alloc(), Some(client));
    }

    #[test]
    fn test_buffers_are_independent() {
        let mut pool = BufferPool::new(2, 4);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();

        pool.get_mut(a).copy_from_slice(b"echo");
        assert_eq!(pool.get_mut(b), &[0u8; 4]);
        assert_eq!(pool.get_mut(a), b"echo");
    }
}
