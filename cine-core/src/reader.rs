//! Shared byte source for both session loops.
//!
//! One reader, one lock. The lock is held for a seek + read and nothing else,
//! so the two loops decode concurrently but never touch the file at once.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::demuxer::FrameRange;

/// Positional reads over a container.
pub trait ByteSource: Send {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

impl<R: Read + Seek + Send> ByteSource for R {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)
    }
}

#[derive(Clone)]
pub struct SharedReader {
    inner: Arc<Mutex<Box<dyn ByteSource>>>,
}

impl SharedReader {
    pub fn new(source: Box<dyn ByteSource>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(source)),
        }
    }

    /// Fill `buf` with the bytes of `range`. `buf` must be exactly `range.len` long.
    pub fn read_frame(&self, range: FrameRange, buf: &mut [u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len() as u64, range.len);
        self.inner.lock().read_at(range.offset, buf)
    }
}

impl std::fmt::Debug for SharedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedReader")
            .field("handles", &Arc::strong_count(&self.inner))
            .finish()
    }
}
