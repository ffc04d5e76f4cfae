//! Read-only windows over backing byte sources

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::rc::Rc;

use crate::error::{Result, WavelineError};

/// Random-access byte source a view can be placed over
///
/// Provider read handles implement this, as does `Vec<u8>` for tests.
/// Sources are shared between views through `Rc`, so any open-stream
/// registration a source holds is released only when the last view over
/// it drops.
pub trait RangeSource {
    /// Read up to `buf.len()` bytes at `offset`, returning the count read
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Current total length of the source in bytes
    fn len(&self) -> io::Result<u64>;
}

impl RangeSource for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.as_slice().len() as u64 {
            return Ok(0);
        }
        let available = &self[offset as usize..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        Ok(count)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.as_slice().len() as u64)
    }
}

/// A read-only, seekable window over `[start, start + length)` of a source
///
/// Reads clamp to the window and never return bytes outside it. Seeks
/// beyond `[0, length]` clamp silently rather than erroring. Write
/// attempts always fail: the view is read-only by construction.
pub struct ByteRangeView {
    source: Rc<dyn RangeSource>,
    start: u64,
    length: u64,
    pos: u64,
}

impl ByteRangeView {
    /// Create a view over `[start, start + length)` of `source`
    ///
    /// # Errors
    /// `OutOfBounds` if `start + length` exceeds the source's current
    /// length.
    pub fn new(source: Rc<dyn RangeSource>, start: u64, length: u64) -> Result<Self> {
        let source_len = source.len().map_err(WavelineError::Io)?;
        let end = start.checked_add(length).ok_or(WavelineError::OutOfBounds {
            what: "view range",
            value: u64::MAX,
            limit: source_len,
        })?;
        if end > source_len {
            return Err(WavelineError::OutOfBounds {
                what: "view range",
                value: end,
                limit: source_len,
            });
        }
        Ok(Self {
            source,
            start,
            length,
            pos: 0,
        })
    }

    /// Length of the window in bytes
    pub fn len(&self) -> u64 {
        self.length
    }

    /// Whether the window is empty
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Current position, relative to the window start
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Set the position relative to the window start, clamping into
    /// `[0, length]`
    pub fn set_position(&mut self, pos: u64) {
        self.pos = pos.min(self.length);
    }

    /// Bytes remaining between the position and the window end
    pub fn remaining(&self) -> u64 {
        self.length - self.pos
    }
}

impl Read for ByteRangeView {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let count = (buf.len() as u64).min(remaining) as usize;
        let read = self.source.read_at(self.start + self.pos, &mut buf[..count])?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl Seek for ByteRangeView {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(offset) => self.length as i128 + offset as i128,
            SeekFrom::Current(offset) => self.pos as i128 + offset as i128,
        };
        // Permissive policy: clamp instead of erroring
        self.pos = target.clamp(0, self.length as i128) as u64;
        Ok(self.pos)
    }
}

impl Write for ByteRangeView {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            WavelineError::Unsupported {
                operation: "write to a ByteRangeView",
            },
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            WavelineError::Unsupported {
                operation: "flush a ByteRangeView",
            },
        ))
    }
}

impl std::fmt::Debug for ByteRangeView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteRangeView")
            .field("start", &self.start)
            .field("length", &self.length)
            .field("pos", &self.pos)
            .finish()
    }
}
