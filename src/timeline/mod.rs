//! Clip timelines over provider-backed audio
//!
//! An [`AudioClip`] is a time window into one provider's decoded PCM
//! payload; a [`ClipSequenceAudioData`] is an ordered list of clips
//! forming a timeline, together with the splice/append/remove/compact
//! algorithms that mutate it.

mod clip;
mod sequence;

pub use clip::AudioClip;
pub use sequence::ClipSequenceAudioData;
