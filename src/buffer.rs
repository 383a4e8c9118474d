//! Bounded sample accumulators used during acquisition. Both buffers are
//! owned by the ingest thread; the double-buffered frame store lives in the
//! demodulator's shared state instead.

use num_complex::Complex32;

/// Keeps the most recent `capacity` samples in arrival order.
#[derive(Debug)]
pub struct CircularAccumulator {
    buf: Vec<Complex32>,
    write_pos: usize,
    len: usize,
}

impl CircularAccumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![Complex32::new(0.0, 0.0); capacity],
            write_pos: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.len = 0;
    }

    /// Append samples, overwriting the oldest once full.
    pub fn push(&mut self, mut x: &[Complex32]) {
        let cap = self.buf.len();
        if x.len() >= cap {
            x = &x[x.len() - cap..];
        }
        let n = x.len();
        let end = self.write_pos + n;
        if end <= cap {
            self.buf[self.write_pos..end].copy_from_slice(x);
        } else {
            let k = cap - self.write_pos;
            self.buf[self.write_pos..].copy_from_slice(&x[..k]);
            self.buf[..end % cap].copy_from_slice(&x[k..]);
        }
        self.write_pos = end % cap;
        self.len = (self.len + n).min(cap);
    }

    /// Copy the held samples into `out`, oldest first. Returns the count.
    pub fn copy_ordered(&self, out: &mut [Complex32]) -> usize {
        debug_assert!(out.len() >= self.len);
        let cap = self.buf.len();
        let start = if self.len < cap { 0 } else { self.write_pos };
        for (i, v) in out.iter_mut().take(self.len).enumerate() {
            *v = self.buf[(start + i) % cap];
        }
        self.len
    }
}

/// Accumulates samples until a fixed target length is reached.
#[derive(Debug)]
pub struct FillBuffer {
    data: Vec<Complex32>,
    len: usize,
}

impl FillBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![Complex32::new(0.0, 0.0); capacity],
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Take as many samples as fit; returns how many were consumed.
    pub fn consume(&mut self, buf: &[Complex32]) -> usize {
        let n = (self.capacity() - self.len).min(buf.len());
        self.data[self.len..self.len + n].copy_from_slice(&buf[..n]);
        self.len += n;
        n
    }

    /// Discard the contents and start over with `src`.
    pub fn fill_from(&mut self, src: &[Complex32]) {
        debug_assert!(src.len() <= self.capacity());
        self.data[..src.len()].copy_from_slice(src);
        self.len = src.len();
    }

    /// The filled prefix.
    pub fn as_slice(&self) -> &[Complex32] {
        &self.data[..self.len]
    }

    /// Raw storage for writers that fill the buffer out of band; pair with
    /// [`FillBuffer::set_len`].
    pub fn storage_mut(&mut self) -> &mut [Complex32] {
        &mut self.data
    }

    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.capacity());
        self.len = len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f32) -> Complex32 {
        Complex32::new(re, 0.0)
    }

    #[test]
    fn circular_keeps_last_capacity_samples() {
        let mut ring = CircularAccumulator::new(4);
        ring.push(&[c(1.0), c(2.0)]);
        assert_eq!(ring.len(), 2);

        let mut out = vec![c(0.0); 4];
        let n = ring.copy_ordered(&mut out);
        assert_eq!(&out[..n], &[c(1.0), c(2.0)]);

        ring.push(&[c(3.0), c(4.0), c(5.0)]);
        assert_eq!(ring.len(), 4);
        let n = ring.copy_ordered(&mut out);
        assert_eq!(&out[..n], &[c(2.0), c(3.0), c(4.0), c(5.0)]);
    }

    #[test]
    fn circular_push_longer_than_capacity() {
        let mut ring = CircularAccumulator::new(3);
        ring.push(&[c(1.0), c(2.0), c(3.0), c(4.0), c(5.0)]);
        let mut out = vec![c(0.0); 3];
        ring.copy_ordered(&mut out);
        assert_eq!(out, &[c(3.0), c(4.0), c(5.0)]);
    }

    #[test]
    fn fill_buffer_consumes_up_to_capacity() {
        let mut buf = FillBuffer::new(3);
        assert_eq!(buf.consume(&[c(1.0), c(2.0)]), 2);
        assert!(!buf.is_full());
        assert_eq!(buf.consume(&[c(3.0), c(4.0)]), 1);
        assert!(buf.is_full());
        assert_eq!(buf.consume(&[c(5.0)]), 0);
        assert_eq!(buf.as_slice(), &[c(1.0), c(2.0), c(3.0)]);

        buf.clear();
        assert_eq!(buf.len(), 0);
    }
}
