//! Registry of timelines and the project-wide PCM format policy

use std::collections::{BTreeMap, HashSet};

use log::{debug, info};
use uuid::Uuid;

use crate::error::{Result, WavelineError};
use crate::format::PcmFormat;
use crate::timeline::ClipSequenceAudioData;

/// Anything outside the manager that holds live references to timelines
///
/// Implemented by the surrounding document model so that
/// [`AudioDataManager::used_data_providers_with`] can fold external
/// usage into the provider liveness set before pruning.
pub trait MediaDataUser {
    /// Uids of the timelines this user currently references
    fn used_media_data(&self) -> HashSet<String>;
}

/// Owns the registered [`ClipSequenceAudioData`] timelines and enforces
/// the project-wide format policy
///
/// With `enforce_single_format` on (the default), every registered
/// timeline must carry the manager's `default_format`; either setting
/// can only change while the registry is empty.
pub struct AudioDataManager {
    sequences: BTreeMap<String, ClipSequenceAudioData>,
    default_format: PcmFormat,
    enforce_single_format: bool,
}

impl AudioDataManager {
    /// Manager with the given project format, enforcement on
    pub fn new(default_format: PcmFormat) -> Self {
        Self {
            sequences: BTreeMap::new(),
            default_format,
            enforce_single_format: true,
        }
    }

    /// The project-wide PCM format stamped on new timelines
    pub fn default_format(&self) -> &PcmFormat {
        &self.default_format
    }

    /// Whether registered timelines must all share the default format
    pub fn enforce_single_format(&self) -> bool {
        self.enforce_single_format
    }

    /// Change the project format
    ///
    /// # Errors
    /// `InvalidFormat` if enforcement is on and any registered timeline
    /// carries a format incompatible with the new default.
    pub fn try_set_default_format(&mut self, format: PcmFormat) -> Result<()> {
        if self.enforce_single_format {
            if let Some(conflicting) = self
                .sequences
                .values()
                .find(|s| !s.format().is_compatible_with(&format))
            {
                return Err(WavelineError::InvalidFormat {
                    reason: format!(
                        "timeline {} is {}, incompatible with new default {}",
                        conflicting.uid(),
                        conflicting.format(),
                        format
                    ),
                });
            }
        }
        self.default_format = format;
        Ok(())
    }

    /// Toggle single-format enforcement
    ///
    /// Turning enforcement off always succeeds.
    ///
    /// # Errors
    /// `InvalidFormat` when turning enforcement on while a registered
    /// timeline differs from the default format.
    pub fn try_set_enforce_single_format(&mut self, enforce: bool) -> Result<()> {
        if enforce {
            if let Some(conflicting) = self
                .sequences
                .values()
                .find(|s| !s.format().is_compatible_with(&self.default_format))
            {
                return Err(WavelineError::InvalidFormat {
                    reason: format!(
                        "timeline {} is {}, differing from the default {}",
                        conflicting.uid(),
                        conflicting.format(),
                        self.default_format
                    ),
                });
            }
        }
        self.enforce_single_format = enforce;
        Ok(())
    }

    /// Whether a timeline with this format may be registered
    pub fn can_add(&self, format: &PcmFormat) -> bool {
        !self.enforce_single_format || format.is_compatible_with(&self.default_format)
    }

    /// Create, register, and return a fresh timeline in the project format
    pub fn create_clip_sequence(&mut self) -> &mut ClipSequenceAudioData {
        let uid = Uuid::new_v4().to_string();
        let data = ClipSequenceAudioData::new(uid.clone(), self.default_format);
        info!("registered timeline {}", uid);
        self.sequences.entry(uid).or_insert(data)
    }

    /// Register an externally built timeline
    ///
    /// # Errors
    /// `InvalidFormat` if enforcement is on and the timeline's format
    /// differs from the default.
    pub fn try_add(&mut self, data: ClipSequenceAudioData) -> Result<()> {
        if !self.can_add(data.format()) {
            return Err(WavelineError::InvalidFormat {
                reason: format!(
                    "timeline format {} differs from the enforced default {}",
                    data.format(),
                    self.default_format
                ),
            });
        }
        let uid = data.uid().to_string();
        self.sequences.insert(uid.clone(), data);
        debug!("registered timeline {}", uid);
        Ok(())
    }

    /// Look up a timeline by uid
    pub fn get(&self, uid: &str) -> Result<&ClipSequenceAudioData> {
        self.sequences.get(uid).ok_or_else(|| WavelineError::DataMissing {
            uid: uid.to_string(),
        })
    }

    /// Look up a timeline by uid, mutably
    pub fn get_mut(&mut self, uid: &str) -> Result<&mut ClipSequenceAudioData> {
        self.sequences
            .get_mut(uid)
            .ok_or_else(|| WavelineError::DataMissing {
                uid: uid.to_string(),
            })
    }

    /// Deregister a timeline
    ///
    /// Its providers stay registered until the next orphan prune.
    pub fn remove(&mut self, uid: &str) -> Result<ClipSequenceAudioData> {
        self.sequences
            .remove(uid)
            .ok_or_else(|| WavelineError::DataMissing {
                uid: uid.to_string(),
            })
    }

    /// Iterate over registered timelines
    pub fn iter(&self) -> impl Iterator<Item = &ClipSequenceAudioData> {
        self.sequences.values()
    }

    /// Number of registered timelines
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// Whether no timelines are registered
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Provider uids referenced by any registered timeline
    ///
    /// This is the liveness set for
    /// [`DataProviderManager::prune_orphaned`]; a provider absent from it
    /// is an orphan.
    ///
    /// [`DataProviderManager::prune_orphaned`]: crate::provider::DataProviderManager::prune_orphaned
    pub fn used_data_providers(&self) -> HashSet<String> {
        let mut live = HashSet::new();
        for data in self.sequences.values() {
            live.extend(data.used_providers());
        }
        live
    }

    /// Liveness set restricted to timelines some user still references
    ///
    /// Timelines no user mentions contribute nothing, so their providers
    /// become prunable in the same pass.
    pub fn used_data_providers_with(&self, users: &[&dyn MediaDataUser]) -> HashSet<String> {
        let mut referenced: HashSet<String> = HashSet::new();
        for user in users {
            referenced.extend(user.used_media_data());
        }

        let mut live = HashSet::new();
        for (uid, data) in &self.sequences {
            if referenced.contains(uid) {
                live.extend(data.used_providers());
            }
        }
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::DataProviderManager;

    fn format() -> PcmFormat {
        PcmFormat::new(1, 22050, 16).unwrap()
    }

    #[test]
    fn test_factory_stamps_format_and_uid() {
        let mut manager = AudioDataManager::new(format());
        let uid = manager.create_clip_sequence().uid().to_string();
        let other = manager.create_clip_sequence().uid().to_string();
        assert_ne!(uid, other);
        assert_eq!(manager.get(&uid).unwrap().format(), &format());
    }

    #[test]
    fn test_default_format_change_checked_against_content() {
        let mut manager = AudioDataManager::new(format());
        let stereo = PcmFormat::new(2, 44100, 16).unwrap();
        manager.try_set_default_format(stereo).unwrap();
        assert_eq!(manager.default_format(), &stereo);

        // A registered stereo timeline blocks switching back to mono
        manager.create_clip_sequence();
        let err = manager.try_set_default_format(format()).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_FORMAT");
        // Re-asserting the current format is fine
        manager.try_set_default_format(stereo).unwrap();
    }

    #[test]
    fn test_enforcement_toggle_checked_against_content() {
        let mut manager = AudioDataManager::new(format());
        manager.try_set_enforce_single_format(false).unwrap();

        let stereo = PcmFormat::new(2, 44100, 16).unwrap();
        manager
            .try_add(ClipSequenceAudioData::new("m-st".to_string(), stereo))
            .unwrap();

        // Turning enforcement back on requires every timeline to match
        let err = manager.try_set_enforce_single_format(true).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_FORMAT");
        manager.remove("m-st").unwrap();
        manager.try_set_enforce_single_format(true).unwrap();
    }

    #[test]
    fn test_enforcement_rejects_foreign_format() {
        let mut manager = AudioDataManager::new(format());
        let stereo = PcmFormat::new(2, 44100, 16).unwrap();
        assert!(!manager.can_add(&stereo));

        let foreign = ClipSequenceAudioData::new("m-x".to_string(), stereo);
        let err = manager.try_add(foreign).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_FORMAT");
    }

    #[test]
    fn test_enforcement_can_be_disabled_while_empty() {
        let mut manager = AudioDataManager::new(format());
        manager.try_set_enforce_single_format(false).unwrap();

        let stereo = PcmFormat::new(2, 44100, 16).unwrap();
        assert!(manager.can_add(&stereo));
        manager
            .try_add(ClipSequenceAudioData::new("m-x".to_string(), stereo))
            .unwrap();
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_used_data_providers_spans_timelines() {
        let mut providers = DataProviderManager::in_memory();
        let mut manager = AudioDataManager::new(format());

        let pcm = vec![0u8; format().bytes_for_ms(100) as usize];
        let uid_a = manager.create_clip_sequence().uid().to_string();
        manager
            .get_mut(&uid_a)
            .unwrap()
            .append(&mut pcm.as_slice(), 100, &mut providers)
            .unwrap();
        let uid_b = manager.create_clip_sequence().uid().to_string();
        manager
            .get_mut(&uid_b)
            .unwrap()
            .append(&mut pcm.as_slice(), 100, &mut providers)
            .unwrap();

        assert_eq!(manager.used_data_providers().len(), 2);

        // Dropping a timeline shrinks the liveness set; pruning then
        // frees its provider
        manager.remove(&uid_b).unwrap();
        let live = manager.used_data_providers();
        assert_eq!(live.len(), 1);
        let freed = providers.prune_orphaned(&live).unwrap();
        assert!(freed > 0);
        assert_eq!(providers.len(), 1);
    }

    #[test]
    fn test_used_data_providers_with_users() {
        struct Doc(HashSet<String>);
        impl MediaDataUser for Doc {
            fn used_media_data(&self) -> HashSet<String> {
                self.0.clone()
            }
        }

        let mut providers = DataProviderManager::in_memory();
        let mut manager = AudioDataManager::new(format());
        let pcm = vec![0u8; format().bytes_for_ms(100) as usize];

        let kept = manager.create_clip_sequence().uid().to_string();
        manager
            .get_mut(&kept)
            .unwrap()
            .append(&mut pcm.as_slice(), 100, &mut providers)
            .unwrap();
        let dangling = manager.create_clip_sequence().uid().to_string();
        manager
            .get_mut(&dangling)
            .unwrap()
            .append(&mut pcm.as_slice(), 100, &mut providers)
            .unwrap();

        let doc = Doc([kept.clone()].into_iter().collect());
        let live = manager.used_data_providers_with(&[&doc]);
        assert_eq!(live.len(), 1);
        assert_eq!(
            live,
            manager.get(&kept).unwrap().used_providers()
        );
    }
}
