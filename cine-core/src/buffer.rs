//! Grow-only staging buffer for compressed frame bytes.

/// Holds the bytes of the frame currently being decoded.
///
/// Capacity never shrinks. When a frame does not fit, the buffer grows to
/// twice the frame's length so a run of slowly growing frames does not
/// reallocate every time.
#[derive(Debug, Default)]
pub struct StagingBuffer {
    data: Vec<u8>,
    len: usize,
}

impl StagingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make room for `len` bytes and return them for filling.
    pub fn prepare(&mut self, len: usize) -> &mut [u8] {
        if self.data.len() < len {
            self.data.resize(len * 2, 0);
        }
        self.len = len;
        &mut self.data[..len]
    }

    /// The bytes of the last prepared frame.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grows_to_twice_required() {
        let mut buf = StagingBuffer::new();
        assert_eq!(buf.capacity(), 0);

        assert_eq!(buf.prepare(10).len(), 10);
        assert_eq!(buf.capacity(), 20);

        buf.prepare(15);
        assert_eq!(buf.capacity(), 20);

        buf.prepare(30);
        assert_eq!(buf.capacity(), 60);
    }

    #[test]
    fn test_never_shrinks() {
        let mut buf = StagingBuffer::new();
        buf.prepare(100);
        buf.prepare(3).copy_from_slice(&[1, 2, 3]);
        assert_eq!(buf.capacity(), 200);
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_zero_length_frame() {
        let mut buf = StagingBuffer::new();
        assert!(buf.prepare(0).is_empty());
        assert_eq!(buf.capacity(), 0);
    }
}
