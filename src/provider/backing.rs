//! Pluggable byte storage behind data providers

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// Physical storage for one provider's bytes
///
/// Backings are append-only: bytes already written are never overwritten.
/// `exists` distinguishes "no bytes were ever written" from an empty
/// write, which is what `DataMissing` reports on.
pub trait Backing {
    /// Whether any bytes were ever written
    fn exists(&self) -> bool;

    /// Current length in bytes (0 when nothing was written)
    fn len(&self) -> io::Result<u64>;

    /// Read up to `buf.len()` bytes at `offset`
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Append bytes at the end of data
    fn append(&mut self, data: &[u8]) -> io::Result<()>;

    /// Release the physical storage
    fn release(&mut self) -> io::Result<()>;
}

/// In-memory backing, used by memory-backed managers and tests
#[derive(Debug, Default)]
pub struct MemoryBacking {
    bytes: Option<Vec<u8>>,
}

impl MemoryBacking {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backing for MemoryBacking {
    fn exists(&self) -> bool {
        self.bytes.is_some()
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.bytes.as_ref().map_or(0, |b| b.len() as u64))
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let Some(bytes) = &self.bytes else {
            return Ok(0);
        };
        if offset >= bytes.len() as u64 {
            return Ok(0);
        }
        let available = &bytes[offset as usize..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        Ok(count)
    }

    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.bytes.get_or_insert_with(Vec::new).extend_from_slice(data);
        Ok(())
    }

    fn release(&mut self) -> io::Result<()> {
        self.bytes = None;
        Ok(())
    }
}

/// One file per provider under the manager's data directory
#[derive(Debug)]
pub struct FileBacking {
    path: PathBuf,
}

impl FileBacking {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Path of the backing file
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Backing for FileBacking {
    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn len(&self) -> io::Result<u64> {
        if !self.path.exists() {
            return Ok(0);
        }
        Ok(fs::metadata(&self.path)?.len())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        // read() may return short counts near EOF; a single call is fine
        // because callers loop through std::io::Read
        file.read(buf)
    }

    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(data)
    }

    fn release(&mut self) -> io::Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
