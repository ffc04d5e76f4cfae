//! waveline: clip-based storage for PCM audio timelines
//!
//! A timeline ([`ClipSequenceAudioData`]) is an ordered list of
//! [`AudioClip`]s, each a time window into the RIFF/WAVE payload of an
//! immutable data provider. Providers are owned by a
//! [`DataProviderManager`], which handles identity, storage I/O, and
//! reachability-driven deletion; timelines reference providers by uid
//! only. Edits splice the clip list instead of rewriting audio bytes,
//! so inserting a correction into an hour-long recording copies at most
//! one clip's worth of data.
//!
//! ```no_run
//! use waveline::{AudioDataManager, DataProviderManager, PcmFormat};
//!
//! # fn main() -> waveline::Result<()> {
//! let mut providers = DataProviderManager::in_memory();
//! let mut media = AudioDataManager::new(PcmFormat::new(1, 22050, 16)?);
//!
//! let pcm = vec![0u8; 44100]; // one second of silence
//! let data = media.create_clip_sequence();
//! data.append(&mut pcm.as_slice(), 1000, &mut providers)?;
//! assert_eq!(data.total_duration_ms(&providers)?, 1000);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod format;
pub mod manager;
pub mod persist;
pub mod provider;
pub mod stream;
pub mod timeline;

pub use error::{Result, WavelineError};
pub use format::{PcmFormat, WaveHeader};
pub use manager::{AudioDataManager, MediaDataUser};
pub use persist::{ProviderManifest, SnapshotStore, TimelineRecord};
pub use provider::{DataProvider, DataProviderManager, WAV_MIME_TYPE};
pub use stream::{ByteRangeView, SequenceStream};
pub use timeline::{AudioClip, ClipSequenceAudioData};
