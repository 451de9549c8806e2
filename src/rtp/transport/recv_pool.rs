use std::collections::VecDeque;

use crate::rtp::codec::RecvPool;

/// A fixed-capacity receive buffer. Backed by a `VecDeque` rather than
/// a raw ring of bytes; the "ring" is the abstraction the codec and
/// transport see (bounded capacity, FIFO drain), not the storage.
pub struct RingRecvPool {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl RingRecvPool {
    pub fn new(capacity: usize) -> Self {
        Self { buf: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn free_size(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len())
    }

    /// Appends up to `free_size()` bytes of `data`, returning how many
    /// were actually accepted.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.free_size());
        self.buf.extend(&data[..n]);
        n
    }
}

impl RecvPool for RingRecvPool {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn peek_data_size(&self) -> usize {
        self.buf.len()
    }

    fn peek_data(&self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.buf.len());
        for (dst, src) in buf[..n].iter_mut().zip(self.buf.iter()) {
            *dst = *src;
        }
        n
    }

    fn flush(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.drain(..n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_respects_capacity() {
        let mut pool = RingRecvPool::new(4);
        assert_eq!(pool.push(b"hello"), 4);
        assert_eq!(pool.free_size(), 0);
    }

    #[test]
    fn peek_then_flush_drains_in_order() {
        let mut pool = RingRecvPool::new(8);
        pool.push(b"abcdef");
        let mut out = [0u8; 3];
        assert_eq!(pool.peek_data(&mut out), 3);
        assert_eq!(&out, b"abc");
        pool.flush(3);
        assert_eq!(pool.peek_data_size(), 3);
        let mut out2 = [0u8; 3];
        pool.peek_data(&mut out2);
        assert_eq!(&out2, b"def");
    }
}
