//! Ownership and lifecycle authority for data providers

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, WavelineError};
use crate::provider::{Backing, DataProvider, FileBacking, Lifecycle, MemoryBacking};
use crate::stream::RangeSource;

/// Where a manager's providers physically live
enum Store {
    Memory,
    FileBacked { data_dir: PathBuf },
}

/// Owns the set of [`DataProvider`]s, assigns identities, and performs
/// physical storage I/O and deletion
///
/// Timelines never own providers; they reference them by uid and resolve
/// through this manager. Deletion is reachability-driven: the surrounding
/// system computes a liveness set (see
/// [`AudioDataManager::used_data_providers`]) and calls
/// [`prune_orphaned`](Self::prune_orphaned).
///
/// [`AudioDataManager::used_data_providers`]: crate::manager::AudioDataManager::used_data_providers
pub struct DataProviderManager {
    providers: BTreeMap<String, DataProvider>,
    store: Store,
}

impl DataProviderManager {
    /// Manager whose providers live in memory
    pub fn in_memory() -> Self {
        Self {
            providers: BTreeMap::new(),
            store: Store::Memory,
        }
    }

    /// Manager whose providers live as one file each under `data_dir`
    pub fn file_backed(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self {
            providers: BTreeMap::new(),
            store: Store::FileBacked { data_dir },
        })
    }

    /// Data directory of a file-backed manager
    pub fn data_dir(&self) -> Option<&Path> {
        match &self.store {
            Store::Memory => None,
            Store::FileBacked { data_dir } => Some(data_dir),
        }
    }

    fn new_backing(&self, uid: &str) -> Box<dyn Backing> {
        match &self.store {
            Store::Memory => Box::new(MemoryBacking::new()),
            Store::FileBacked { data_dir } => {
                Box::new(FileBacking::new(data_dir.join(format!("{}.wav", uid))))
            }
        }
    }

    /// Create and register a fresh provider with the given MIME type
    pub fn create(&mut self, mime_type: &str) -> Result<&DataProvider> {
        let uid = Uuid::new_v4().to_string();
        let backing = self.new_backing(&uid);
        let provider = DataProvider::new(uid.clone(), mime_type.to_string(), backing);
        debug!("created provider {} ({})", uid, mime_type);
        Ok(self
            .providers
            .entry(uid)
            .or_insert(provider))
    }

    /// Look up a provider by uid
    ///
    /// # Errors
    /// `DataMissing` for an unknown uid.
    pub fn get(&self, uid: &str) -> Result<&DataProvider> {
        self.providers.get(uid).ok_or_else(|| WavelineError::DataMissing {
            uid: uid.to_string(),
        })
    }

    /// Whether a provider with this uid is registered
    pub fn contains(&self, uid: &str) -> bool {
        self.providers.contains_key(uid)
    }

    /// All registered uids, in stable order
    pub fn uids(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Iterate over registered providers
    pub fn iter(&self) -> impl Iterator<Item = &DataProvider> {
        self.providers.values()
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no providers are registered
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Deregister a provider, optionally releasing its stored bytes
    ///
    /// # Errors
    /// * `DataMissing` - unknown uid
    /// * `ResourceBusy` - a stream is still open on the provider
    pub fn remove(&mut self, uid: &str, delete_bytes: bool) -> Result<()> {
        let provider = self.get(uid)?;
        if provider.lifecycle() != Lifecycle::Idle {
            return Err(WavelineError::ResourceBusy {
                uid: uid.to_string(),
                reason: "stream open during removal",
            });
        }
        if delete_bytes {
            provider.release_backing()?;
        }
        self.providers.remove(uid);
        debug!("removed provider {} (delete_bytes={})", uid, delete_bytes);
        Ok(())
    }

    /// Duplicate a provider's bytes under a fresh uid
    ///
    /// The copy never aliases storage with the original. A provider that
    /// was never written copies to another never-written provider.
    pub fn copy(&mut self, uid: &str) -> Result<String> {
        let source = self.get(uid)?;
        let mime_type = source.mime_type().to_string();
        let staged = if source.has_data() {
            Some(read_all(source)?)
        } else {
            None
        };

        let copy_uid = self.create(&mime_type)?.uid().to_string();
        if let Some(bytes) = staged {
            let copy = self.get(&copy_uid)?;
            let mut writer = copy.open_write_stream()?;
            writer.write_all(&bytes)?;
        }
        debug!("copied provider {} -> {}", uid, copy_uid);
        Ok(copy_uid)
    }

    /// Register an equivalent provider under another manager
    pub fn export_to(&self, uid: &str, target: &mut DataProviderManager) -> Result<String> {
        let source = self.get(uid)?;
        let mime_type = source.mime_type().to_string();
        let staged = if source.has_data() {
            Some(read_all(source)?)
        } else {
            None
        };

        let export_uid = target.create(&mime_type)?.uid().to_string();
        if let Some(bytes) = staged {
            let exported = target.get(&export_uid)?;
            let mut writer = exported.open_write_stream()?;
            writer.write_all(&bytes)?;
        }
        debug!("exported provider {} -> {}", uid, export_uid);
        Ok(export_uid)
    }

    /// Delete every idle provider not present in `live`
    ///
    /// Providers with open streams are left in place with a warning; a
    /// later pass will collect them once their streams close. Returns the
    /// number of bytes freed.
    pub fn prune_orphaned(&mut self, live: &HashSet<String>) -> Result<u64> {
        let orphans: Vec<String> = self
            .providers
            .keys()
            .filter(|uid| !live.contains(*uid))
            .cloned()
            .collect();

        let mut bytes_freed = 0u64;
        for uid in orphans {
            let provider = &self.providers[&uid];
            if provider.lifecycle() != Lifecycle::Idle {
                warn!("skipping busy orphan provider {}", uid);
                continue;
            }
            bytes_freed += provider.len()?;
            provider.release_backing()?;
            self.providers.remove(&uid);
        }
        if bytes_freed > 0 {
            info!("pruned orphaned providers, {} bytes freed", bytes_freed);
        }
        Ok(bytes_freed)
    }
}

/// Drain a provider's full content into memory through a read handle
fn read_all(provider: &DataProvider) -> Result<Vec<u8>> {
    let handle = provider.open_read_stream()?;
    let len = handle.len().map_err(WavelineError::Io)?;
    let mut bytes = Vec::with_capacity(len as usize);
    let mut offset = 0u64;
    let mut buf = [0u8; 8192];
    while offset < len {
        let read = handle.read_at(offset, &mut buf).map_err(WavelineError::Io)?;
        if read == 0 {
            break;
        }
        bytes.extend_from_slice(&buf[..read]);
        offset += read as u64;
    }
    Ok(bytes)
}
