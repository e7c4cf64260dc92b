//! Reusable probe buffers for concurrent reads.
//!
//! Each read takes a buffer from the pool and gives it back when done. An
//! empty pool hands out a freshly allocated buffer, a full pool drops returns.

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

pub(crate) struct BufferPool {
    buffers: ArrayQueue<BytesMut>,
    buffer_size: usize,
}

impl BufferPool {
    /// `capacity` must be non-zero; `Config::validate` guarantees it.
    pub(crate) fn new(capacity: usize, buffer_size: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(capacity),
            buffer_size,
        }
    }

    /// Take a buffer of `buffer_size` bytes; reused buffers keep old contents
    pub(crate) fn take(&self) -> BytesMut {
        self.buffers
            .pop()
            .unwrap_or_else(|| BytesMut::zeroed(self.buffer_size))
    }

    pub(crate) fn give_back(&self, buffer: BytesMut) {
        if buffer.len() == self.buffer_size {
            let _ = self.buffers.push(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returned_buffers_are_reused() {
        let pool = BufferPool::new(2, 64);
        let mut buf = pool.take();
        buf[0] = 7;
        let ptr = buf.as_ptr();
        pool.give_back(buf);

        let again = pool.take();
        assert_eq!(again.as_ptr(), ptr);
        assert_eq!(again.len(), 64);
    }

    #[test]
    fn wrong_sized_buffers_are_dropped() {
        let pool = BufferPool::new(2, 64);
        pool.give_back(BytesMut::zeroed(10));
        assert_eq!(pool.take().len(), 64);
    }
}
