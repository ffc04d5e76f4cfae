//! Serializable snapshots of timelines and provider storage
//!
//! Timelines serialize as clip lists over provider uids; the manifest
//! records per-provider metadata (size, checksum) so a reloaded store
//! can be verified against what was saved.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WavelineError};
use crate::format::PcmFormat;
use crate::provider::DataProviderManager;
use crate::timeline::{AudioClip, ClipSequenceAudioData};

/// Serialized form of one [`AudioClip`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipRecord {
    pub provider_uid: String,
    pub begin_ms: u64,
    /// `None` means the clip is tied to the end of the provider's audio
    pub end_ms: Option<u64>,
}

/// Serialized form of one [`ClipSequenceAudioData`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineRecord {
    pub uid: String,
    pub format: PcmFormat,
    pub clips: Vec<ClipRecord>,
}

impl TimelineRecord {
    /// Snapshot a timeline
    pub fn from_data(data: &ClipSequenceAudioData) -> Self {
        Self {
            uid: data.uid().to_string(),
            format: *data.format(),
            clips: data
                .clips()
                .iter()
                .map(|c| ClipRecord {
                    provider_uid: c.provider_uid().to_string(),
                    begin_ms: c.begin_ms(),
                    end_ms: c.end_ms(),
                })
                .collect(),
        }
    }

    /// Rebuild the timeline, checking every referenced provider exists
    ///
    /// # Errors
    /// `DataMissing` for the first clip whose provider is not registered
    /// in `providers`; `OutOfBounds` for a record with an inverted
    /// window.
    pub fn into_data(self, providers: &DataProviderManager) -> Result<ClipSequenceAudioData> {
        let mut clips = Vec::with_capacity(self.clips.len());
        for record in self.clips {
            if !providers.contains(&record.provider_uid) {
                return Err(WavelineError::DataMissing {
                    uid: record.provider_uid,
                });
            }
            clips.push(AudioClip::new(
                record.provider_uid,
                record.begin_ms,
                record.end_ms,
            )?);
        }
        Ok(ClipSequenceAudioData::with_clips(
            self.uid,
            self.format,
            clips,
        ))
    }
}

/// Metadata for one stored provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    /// SHA-256 of the stored bytes, lowercase hex
    pub checksum: String,
}

/// Manifest tracking every provider a manager holds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderManifest {
    /// Map of provider uid to its metadata, in stable order
    pub providers: BTreeMap<String, ProviderInfo>,
}

impl ProviderManifest {
    /// Snapshot a manager's current providers
    ///
    /// Skips never-written providers; they have no bytes to verify.
    pub fn from_manager(manager: &DataProviderManager) -> Result<Self> {
        let mut providers = BTreeMap::new();
        for provider in manager.iter() {
            if !provider.has_data() {
                continue;
            }
            providers.insert(
                provider.uid().to_string(),
                ProviderInfo {
                    mime_type: provider.mime_type().to_string(),
                    created_at: provider.created_at(),
                    size_bytes: provider.len()?,
                    checksum: provider.content_hash()?,
                },
            );
        }
        Ok(Self { providers })
    }

    /// Uids whose stored bytes no longer match the manifest
    ///
    /// A missing provider, a size change, or a checksum mismatch all
    /// count; an empty result means the store verifies clean.
    pub fn verify(&self, manager: &DataProviderManager) -> Result<Vec<String>> {
        let mut mismatched = Vec::new();
        for (uid, info) in &self.providers {
            if !manager.contains(uid) {
                warn!("manifest provider {} is missing from the store", uid);
                mismatched.push(uid.clone());
                continue;
            }
            let provider = manager.get(uid)?;
            if provider.len()? != info.size_bytes || provider.content_hash()? != info.checksum {
                warn!("provider {} does not match its manifest entry", uid);
                mismatched.push(uid.clone());
            }
        }
        Ok(mismatched)
    }
}

/// Reads and writes the JSON snapshot files under a store directory
///
/// Layout: `timelines.json` holds the [`TimelineRecord`] list,
/// `manifest.json` the [`ProviderManifest`].
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn timelines_path(&self) -> PathBuf {
        self.dir.join("timelines.json")
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join("manifest.json")
    }

    /// Write the timeline records and provider manifest
    pub fn save(
        &self,
        timelines: &[TimelineRecord],
        manifest: &ProviderManifest,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(
            self.timelines_path(),
            serde_json::to_string_pretty(timelines)?,
        )?;
        fs::write(
            self.manifest_path(),
            serde_json::to_string_pretty(manifest)?,
        )?;
        debug!(
            "saved {} timeline records to {}",
            timelines.len(),
            self.dir.display()
        );
        Ok(())
    }

    /// Load the timeline records, empty when the file is absent
    pub fn load_timelines(&self) -> Result<Vec<TimelineRecord>> {
        let path = self.timelines_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load the provider manifest, default when the file is absent
    pub fn load_manifest(&self) -> Result<ProviderManifest> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(ProviderManifest::default());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// The store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::provider::WAV_MIME_TYPE;

    fn format() -> PcmFormat {
        PcmFormat::new(1, 22050, 16).unwrap()
    }

    fn seeded_timeline(providers: &mut DataProviderManager) -> ClipSequenceAudioData {
        let mut data = ClipSequenceAudioData::new("m-persist".to_string(), format());
        let pcm = vec![0u8; format().bytes_for_ms(500) as usize];
        data.append(&mut pcm.as_slice(), 500, providers).unwrap();
        data
    }

    #[test]
    fn test_timeline_record_round_trip() {
        let mut providers = DataProviderManager::in_memory();
        let data = seeded_timeline(&mut providers);

        let record = TimelineRecord::from_data(&data);
        let json = serde_json::to_string(&record).unwrap();
        let parsed: TimelineRecord = serde_json::from_str(&json).unwrap();
        let restored = parsed.into_data(&providers).unwrap();

        assert_eq!(restored.uid(), data.uid());
        assert_eq!(restored.format(), data.format());
        assert_eq!(restored.clips(), data.clips());
        assert_eq!(
            restored.total_duration_ms(&providers).unwrap(),
            data.total_duration_ms(&providers).unwrap()
        );
    }

    #[test]
    fn test_into_data_rejects_unknown_provider() {
        let providers = DataProviderManager::in_memory();
        let record = TimelineRecord {
            uid: "m-x".to_string(),
            format: format(),
            clips: vec![ClipRecord {
                provider_uid: "gone".to_string(),
                begin_ms: 0,
                end_ms: Some(100),
            }],
        };
        let err = record.into_data(&providers).unwrap_err();
        assert_eq!(err.error_code(), "DATA_MISSING");
    }

    #[test]
    fn test_manifest_verifies_clean_store() {
        let mut providers = DataProviderManager::in_memory();
        let _data = seeded_timeline(&mut providers);

        let manifest = ProviderManifest::from_manager(&providers).unwrap();
        assert_eq!(manifest.providers.len(), 1);
        assert!(manifest.verify(&providers).unwrap().is_empty());
    }

    #[test]
    fn test_manifest_flags_tampered_provider() {
        let mut providers = DataProviderManager::in_memory();
        let _data = seeded_timeline(&mut providers);
        let manifest = ProviderManifest::from_manager(&providers).unwrap();

        // Grow one provider after the snapshot
        let uid = manifest.providers.keys().next().unwrap().clone();
        let mut writer = providers.get(&uid).unwrap().open_write_stream().unwrap();
        writer.write_all(&[0u8; 8]).unwrap();
        drop(writer);

        assert_eq!(manifest.verify(&providers).unwrap(), vec![uid]);
    }

    #[test]
    fn test_manifest_flags_missing_provider() {
        let mut providers = DataProviderManager::in_memory();
        let data = seeded_timeline(&mut providers);
        let manifest = ProviderManifest::from_manager(&providers).unwrap();

        let uid = data.clips()[0].provider_uid().to_string();
        providers.remove(&uid, true).unwrap();
        assert_eq!(manifest.verify(&providers).unwrap(), vec![uid]);
    }

    #[test]
    fn test_snapshot_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut providers = DataProviderManager::in_memory();
        let data = seeded_timeline(&mut providers);

        let store = SnapshotStore::new(dir.path().join("store"));
        let records = vec![TimelineRecord::from_data(&data)];
        let manifest = ProviderManifest::from_manager(&providers).unwrap();
        store.save(&records, &manifest).unwrap();

        let loaded = store.load_timelines().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].uid, data.uid());

        let loaded_manifest = store.load_manifest().unwrap();
        assert_eq!(loaded_manifest.providers.len(), 1);
        assert!(loaded_manifest.verify(&providers).unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_store_absent_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("empty"));
        assert!(store.load_timelines().unwrap().is_empty());
        assert!(store.load_manifest().unwrap().providers.is_empty());
    }

    #[test]
    fn test_manifest_skips_unwritten_providers() {
        let mut providers = DataProviderManager::in_memory();
        providers.create(WAV_MIME_TYPE).unwrap();
        let manifest = ProviderManifest::from_manager(&providers).unwrap();
        assert!(manifest.providers.is_empty());
    }
}
