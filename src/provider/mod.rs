//! Data providers: manager-owned handles to stored byte blobs
//!
//! A provider's streams form a mutual-exclusion state machine: while a
//! writer is open no read or second write may open, while any read is
//! open no write may open, and deletion requires the idle state. The
//! machine is tracked at runtime so reentrant single-threaded misuse
//! (opening a writer while a forgotten view is still alive) surfaces as
//! `ResourceBusy` instead of corrupting data.

mod backing;
mod manager;

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use log::debug;
use sha2::{Digest, Sha256};

use crate::error::{Result, WavelineError};
use crate::stream::RangeSource;

pub use backing::{Backing, FileBacking, MemoryBacking};
pub use manager::DataProviderManager;

/// MIME type stamped on WAVE providers
pub const WAV_MIME_TYPE: &str = "audio/x-wav";

/// Stream lifecycle of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// No stream open
    Idle,
    /// `n` read streams open
    Reading(u32),
    /// One write stream open
    Writing,
}

struct ProviderInner {
    backing: Box<dyn Backing>,
    lifecycle: Lifecycle,
}

/// An opaque, manager-owned handle to a mutable byte blob
///
/// Providers are owned exclusively by their [`DataProviderManager`];
/// timelines hold only the uid. Copy, export and deletion go through the
/// manager, never through the handle.
pub struct DataProvider {
    uid: String,
    mime_type: String,
    created_at: DateTime<Utc>,
    inner: Rc<RefCell<ProviderInner>>,
}

impl DataProvider {
    pub(crate) fn new(uid: String, mime_type: String, backing: Box<dyn Backing>) -> Self {
        Self {
            uid,
            mime_type,
            created_at: Utc::now(),
            inner: Rc::new(RefCell::new(ProviderInner {
                backing,
                lifecycle: Lifecycle::Idle,
            })),
        }
    }

    /// Manager-scoped unique id
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// MIME type of the stored bytes
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// When the provider was registered with its manager
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current stream lifecycle
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.borrow().lifecycle
    }

    /// Whether any bytes were ever written to this provider
    pub fn has_data(&self) -> bool {
        self.inner.borrow().backing.exists()
    }

    /// Current byte length of the stored blob
    pub fn len(&self) -> Result<u64> {
        Ok(self.inner.borrow().backing.len()?)
    }

    /// Whether the stored blob is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Open a shared read handle
    ///
    /// The handle registers as an open read stream until the last `Rc`
    /// clone of it drops, so every view built over it stays valid.
    ///
    /// # Errors
    /// * `DataMissing` - no bytes were ever written
    /// * `ResourceBusy` - a write stream is open
    pub fn open_read_stream(&self) -> Result<Rc<ProviderReadHandle>> {
        let mut inner = self.inner.borrow_mut();
        if !inner.backing.exists() {
            return Err(WavelineError::DataMissing {
                uid: self.uid.clone(),
            });
        }
        inner.lifecycle = match inner.lifecycle {
            Lifecycle::Writing => {
                return Err(WavelineError::ResourceBusy {
                    uid: self.uid.clone(),
                    reason: "write stream open",
                })
            }
            Lifecycle::Idle => Lifecycle::Reading(1),
            Lifecycle::Reading(n) => Lifecycle::Reading(n + 1),
        };
        drop(inner);
        debug!("provider {} read stream opened", self.uid);
        Ok(Rc::new(ProviderReadHandle {
            uid: self.uid.clone(),
            inner: Rc::clone(&self.inner),
        }))
    }

    /// Open the write stream, which appends at end-of-data
    ///
    /// # Errors
    /// `ResourceBusy` if any read or write stream is already open.
    pub fn open_write_stream(&self) -> Result<ProviderWriteStream> {
        let mut inner = self.inner.borrow_mut();
        match inner.lifecycle {
            Lifecycle::Idle => inner.lifecycle = Lifecycle::Writing,
            Lifecycle::Reading(_) => {
                return Err(WavelineError::ResourceBusy {
                    uid: self.uid.clone(),
                    reason: "read stream open",
                })
            }
            Lifecycle::Writing => {
                return Err(WavelineError::ResourceBusy {
                    uid: self.uid.clone(),
                    reason: "write stream open",
                })
            }
        }
        drop(inner);
        debug!("provider {} write stream opened", self.uid);
        Ok(ProviderWriteStream {
            uid: self.uid.clone(),
            inner: Rc::clone(&self.inner),
        })
    }

    /// Copy exactly `byte_count` bytes from `source` into the provider
    ///
    /// The source is drained into memory first, so a short source fails
    /// with `SourceTooShort` before any byte becomes visible in the
    /// provider.
    pub fn append_from<R: Read>(&self, source: &mut R, byte_count: u64) -> Result<()> {
        let mut staged = Vec::with_capacity(byte_count.min(16 * 1024 * 1024) as usize);
        let copied = io::copy(&mut source.take(byte_count), &mut staged)?;
        if copied < byte_count {
            return Err(WavelineError::SourceTooShort {
                requested: byte_count,
                available: copied,
            });
        }
        let mut writer = self.open_write_stream()?;
        writer.write_all(&staged)?;
        Ok(())
    }

    /// SHA-256 hash of the stored bytes, hex-encoded
    ///
    /// Used by manifest integrity verification.
    pub fn content_hash(&self) -> Result<String> {
        let handle = self.open_read_stream()?;
        let len = handle.len().map_err(WavelineError::Io)?;
        let mut hasher = Sha256::new();
        let mut offset = 0u64;
        let mut buf = [0u8; 8192];
        while offset < len {
            let read = handle.read_at(offset, &mut buf).map_err(WavelineError::Io)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
            offset += read as u64;
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub(crate) fn release_backing(&self) -> Result<()> {
        self.inner.borrow_mut().backing.release()?;
        Ok(())
    }
}

impl std::fmt::Debug for DataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProvider")
            .field("uid", &self.uid)
            .field("mime_type", &self.mime_type)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

/// A live read registration on a provider
///
/// Implements [`RangeSource`] so any number of [`ByteRangeView`]s can be
/// placed over it via one shared `Rc`; the registration is released when
/// the last clone drops.
///
/// [`ByteRangeView`]: crate::stream::ByteRangeView
pub struct ProviderReadHandle {
    uid: String,
    inner: Rc<RefCell<ProviderInner>>,
}

impl RangeSource for ProviderReadHandle {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.borrow().backing.read_at(offset, buf)
    }

    fn len(&self) -> io::Result<u64> {
        self.inner.borrow().backing.len()
    }
}

impl std::fmt::Debug for ProviderReadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderReadHandle")
            .field("uid", &self.uid)
            .finish()
    }
}

impl Drop for ProviderReadHandle {
    fn drop(&mut self) {
        let mut inner = self.inner.borrow_mut();
        inner.lifecycle = match inner.lifecycle {
            Lifecycle::Reading(1) => Lifecycle::Idle,
            Lifecycle::Reading(n) => Lifecycle::Reading(n - 1),
            // Unreachable while the handle exists
            other => other,
        };
        debug!("provider {} read stream closed", self.uid);
    }
}

/// The provider's single append-only write stream
pub struct ProviderWriteStream {
    uid: String,
    inner: Rc<RefCell<ProviderInner>>,
}

impl Write for ProviderWriteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.borrow_mut().backing.append(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for ProviderWriteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderWriteStream")
            .field("uid", &self.uid)
            .finish()
    }
}

impl Drop for ProviderWriteStream {
    fn drop(&mut self) {
        self.inner.borrow_mut().lifecycle = Lifecycle::Idle;
        debug!("provider {} write stream closed", self.uid);
    }
}
