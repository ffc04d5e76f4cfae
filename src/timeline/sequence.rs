//! The timeline engine: an ordered clip list and its splice algorithms
//!
//! Every mutation is atomic with respect to the clip list: the
//! replacement list (and every new provider it references) is fully
//! built before being swapped in, so a failure partway through leaves
//! the timeline exactly as it was. Providers written for an abandoned
//! mutation are simply never referenced and fall to the orphan pruner.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::{debug, info};
use uuid::Uuid;

use crate::error::{Result, WavelineError};
use crate::format::{payload_len_u32, PcmFormat, WaveHeader};
use crate::provider::{DataProviderManager, WAV_MIME_TYPE};
use crate::stream::SequenceStream;
use crate::timeline::AudioClip;

/// An ordered list of [`AudioClip`]s forming a PCM timeline
///
/// Created by [`AudioDataManager`]'s factory, which stamps the uid and
/// the project-wide format. The sequence may be empty (zero duration);
/// `total_duration_ms` is always the sum of the clip durations in order.
///
/// [`AudioDataManager`]: crate::manager::AudioDataManager
#[derive(Debug)]
pub struct ClipSequenceAudioData {
    uid: String,
    format: PcmFormat,
    clips: Vec<AudioClip>,
}

impl ClipSequenceAudioData {
    /// Create an empty timeline with the given uid and format
    ///
    /// [`AudioDataManager::create_clip_sequence`] is the usual factory;
    /// a directly built timeline is registered through
    /// [`AudioDataManager::try_add`].
    ///
    /// [`AudioDataManager::create_clip_sequence`]: crate::manager::AudioDataManager::create_clip_sequence
    /// [`AudioDataManager::try_add`]: crate::manager::AudioDataManager::try_add
    pub fn new(uid: String, format: PcmFormat) -> Self {
        Self {
            uid,
            format,
            clips: Vec::new(),
        }
    }

    pub(crate) fn with_clips(uid: String, format: PcmFormat, clips: Vec<AudioClip>) -> Self {
        Self { uid, format, clips }
    }

    /// Stable identity within the owning manager
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// The sequence's PCM format
    pub fn format(&self) -> &PcmFormat {
        &self.format
    }

    /// The clips in timeline order
    pub fn clips(&self) -> &[AudioClip] {
        &self.clips
    }

    /// Number of clips in the timeline
    pub fn clip_count(&self) -> usize {
        self.clips.len()
    }

    /// Sum of the clip durations, in order
    pub fn total_duration_ms(&self, providers: &DataProviderManager) -> Result<u64> {
        let mut total = 0u64;
        for clip in &self.clips {
            total += clip.duration_ms(providers)?;
        }
        Ok(total)
    }

    /// Uids of every provider this timeline currently references
    pub fn used_providers(&self) -> HashSet<String> {
        self.clips
            .iter()
            .map(|c| c.provider_uid().to_string())
            .collect()
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Append `duration_ms` worth of PCM bytes at the end of the timeline
    ///
    /// Allocates a fresh provider, writes a header sized for the
    /// duration, copies the payload from `pcm`, and pushes a clip
    /// spanning it.
    ///
    /// # Errors
    /// `SourceTooShort` if `pcm` holds fewer bytes than the duration
    /// requires; the timeline is unchanged on any failure.
    pub fn append<R: Read>(
        &mut self,
        pcm: &mut R,
        duration_ms: u64,
        providers: &mut DataProviderManager,
    ) -> Result<()> {
        let byte_count = self.format.bytes_for_ms(duration_ms);
        let payload = stage_exact(pcm, byte_count)?;
        let clip = self.materialize_clip(&payload, providers)?;
        self.clips.push(clip);
        debug!(
            "timeline {}: appended {} ms ({} bytes), {} clips",
            self.uid,
            duration_ms,
            byte_count,
            self.clips.len()
        );
        Ok(())
    }

    /// Insert `duration_ms` worth of PCM bytes at `insert_ms`
    ///
    /// Walks the clips accumulating elapsed time. Exactly one of three
    /// outcomes occurs:
    /// - the point falls on a clip boundary (including 0 and the total
    ///   duration): the new clip is spliced between the neighbors and no
    ///   existing clip is touched;
    /// - the point falls strictly inside a clip: that clip's two
    ///   sub-ranges are copied into two fresh providers (the original
    ///   provider is never mutated) and the clip is replaced in place by
    ///   the before/new/after triple;
    /// - the point lies beyond the timeline: `OutOfBounds`, nothing
    ///   changes.
    pub fn insert<R: Read>(
        &mut self,
        pcm: &mut R,
        insert_ms: u64,
        duration_ms: u64,
        providers: &mut DataProviderManager,
    ) -> Result<()> {
        let byte_count = self.format.bytes_for_ms(duration_ms);
        let payload = stage_exact(pcm, byte_count)?;

        // Locate the splice point first; mutate only once it is known
        let mut point = None;
        let mut elapsed = 0u64;
        for (index, clip) in self.clips.iter().enumerate() {
            if insert_ms == elapsed {
                point = Some((index, None));
                break;
            }
            let clip_duration = clip.duration_ms(providers)?;
            if insert_ms < elapsed + clip_duration {
                point = Some((index, Some((insert_ms - elapsed, clip_duration))));
                break;
            }
            elapsed += clip_duration;
        }

        match point {
            Some((index, None)) => {
                // Boundary hit: splice without touching any clip
                let new_clip = self.materialize_clip(&payload, providers)?;
                self.clips.insert(index, new_clip);
                debug!(
                    "timeline {}: inserted {} ms at boundary {} (clip {})",
                    self.uid, duration_ms, insert_ms, index
                );
                Ok(())
            }
            Some((index, Some((local, clip_duration)))) => {
                // Strictly inside a clip: split, then splice
                let clip = self.clips[index].clone();
                let before = self.copy_clip_range(&clip, 0, local, providers)?;
                let after = self.copy_clip_range(&clip, local, clip_duration, providers)?;
                let new_clip = self.materialize_clip(&payload, providers)?;

                self.clips
                    .splice(index..=index, [before, new_clip, after]);
                debug!(
                    "timeline {}: split clip {} at {} ms and inserted {} ms",
                    self.uid, index, local, duration_ms
                );
                Ok(())
            }
            None if insert_ms == elapsed => {
                // Exactly at the end of the timeline: equivalent to append
                let new_clip = self.materialize_clip(&payload, providers)?;
                self.clips.push(new_clip);
                debug!(
                    "timeline {}: inserted {} ms at end ({} ms)",
                    self.uid, duration_ms, insert_ms
                );
                Ok(())
            }
            None => Err(WavelineError::OutOfBounds {
                what: "insert point",
                value: insert_ms,
                limit: elapsed,
            }),
        }
    }

    /// Delete the sub-range `[begin_ms, end_ms)` and re-stitch the
    /// neighbors
    ///
    /// The inverse of [`insert`](Self::insert): boundary clips are split
    /// with the same copy-based discipline, fully covered clips are
    /// dropped, and the two remainders become neighbors.
    pub fn remove(
        &mut self,
        begin_ms: u64,
        end_ms: u64,
        providers: &mut DataProviderManager,
    ) -> Result<()> {
        let total = self.total_duration_ms(providers)?;
        check_range(begin_ms, end_ms, total)?;
        if begin_ms == end_ms {
            return Ok(());
        }

        let mut next: Vec<AudioClip> = Vec::with_capacity(self.clips.len());
        let mut elapsed = 0u64;
        for clip in &self.clips {
            let clip_duration = clip.duration_ms(providers)?;
            let clip_end = elapsed + clip_duration;

            if clip_end <= begin_ms || elapsed >= end_ms {
                // Entirely outside the removed range
                next.push(clip.clone());
            } else {
                // Overlapping: keep the uncovered remainders, if any
                if elapsed < begin_ms {
                    next.push(self.copy_clip_range(clip, 0, begin_ms - elapsed, providers)?);
                }
                if end_ms < clip_end {
                    next.push(self.copy_clip_range(
                        clip,
                        end_ms - elapsed,
                        clip_duration,
                        providers,
                    )?);
                }
            }
            elapsed = clip_end;
        }

        self.clips = next;
        debug!(
            "timeline {}: removed [{}, {}) ms, {} clips remain",
            self.uid,
            begin_ms,
            end_ms,
            self.clips.len()
        );
        Ok(())
    }

    /// Replace the sub-range `[begin_ms, end_ms)` with `duration_ms`
    /// worth of new PCM bytes
    ///
    /// Built as remove-then-insert on a scratch timeline and swapped in
    /// as a whole, so a failure in either half leaves the original
    /// untouched.
    pub fn replace<R: Read>(
        &mut self,
        pcm: &mut R,
        begin_ms: u64,
        end_ms: u64,
        duration_ms: u64,
        providers: &mut DataProviderManager,
    ) -> Result<()> {
        let mut scratch = Self {
            uid: self.uid.clone(),
            format: self.format,
            clips: self.clips.clone(),
        };
        scratch.remove(begin_ms, end_ms, providers)?;
        scratch.insert(pcm, begin_ms, duration_ms, providers)?;
        self.clips = scratch.clips;
        Ok(())
    }

    /// Merge the whole timeline into a single backing provider
    ///
    /// Reads the full range, copies it into one fresh provider, and
    /// swaps in a single spanning clip. Idempotent: duration and decoded
    /// content are preserved exactly and the result always has exactly
    /// one clip.
    pub fn compact(&mut self, providers: &mut DataProviderManager) -> Result<()> {
        let total = self.total_duration_ms(providers)?;
        let mut stream = self.read(0, total, providers)?;
        let mut payload = Vec::with_capacity(stream.len() as usize);
        stream.read_to_end(&mut payload)?;
        drop(stream);

        let clip = self.materialize_clip(&payload, providers)?;
        self.clips = vec![clip];
        info!(
            "timeline {}: compacted {} ms into one provider",
            self.uid, total
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Open a stream over the decoded range `[begin_ms, end_ms)`
    ///
    /// Collects a bounded view per intersecting clip, in timeline order;
    /// the returned [`SequenceStream`] reads through them sequentially
    /// and reports the summed byte length up front.
    pub fn read(
        &self,
        begin_ms: u64,
        end_ms: u64,
        providers: &DataProviderManager,
    ) -> Result<SequenceStream> {
        let total = self.total_duration_ms(providers)?;
        check_range(begin_ms, end_ms, total)?;

        let mut segments = Vec::new();
        let mut elapsed = 0u64;
        for clip in &self.clips {
            let clip_duration = clip.duration_ms(providers)?;
            let clip_end = elapsed + clip_duration;

            let overlap_begin = begin_ms.max(elapsed);
            let overlap_end = end_ms.min(clip_end);
            if overlap_begin < overlap_end {
                segments.push(clip.audio_stream(
                    overlap_begin - elapsed,
                    overlap_end - elapsed,
                    providers,
                )?);
            }
            elapsed = clip_end;
        }

        Ok(SequenceStream::new(segments))
    }

    /// Deep-copy the timeline, duplicating every referenced provider
    ///
    /// The copy gets a fresh uid and never shares mutable storage with
    /// the original.
    pub fn deep_copy(&self, providers: &mut DataProviderManager) -> Result<Self> {
        let mut clips = Vec::with_capacity(self.clips.len());
        for clip in &self.clips {
            let copy_uid = providers.copy(clip.provider_uid())?;
            clips.push(AudioClip::new(copy_uid, clip.begin_ms(), clip.end_ms())?);
        }
        Ok(Self {
            uid: Uuid::new_v4().to_string(),
            format: self.format,
            clips,
        })
    }

    // ------------------------------------------------------------------------
    // File import/export
    // ------------------------------------------------------------------------

    /// Append the payload of an external RIFF/WAVE file
    ///
    /// # Errors
    /// `InvalidFormat` if the file's format is not identical to the
    /// sequence's format.
    pub fn append_from_wav_file(
        &mut self,
        path: &Path,
        providers: &mut DataProviderManager,
    ) -> Result<()> {
        let mut reader = BufReader::new(File::open(path)?);
        let header = WaveHeader::parse(&mut reader)?;
        if !header.format.is_compatible_with(&self.format) {
            return Err(WavelineError::InvalidFormat {
                reason: format!(
                    "file {} is {} but the timeline is {}",
                    path.display(),
                    header.format,
                    self.format
                ),
            });
        }

        let payload = stage_exact(&mut reader, header.payload_len as u64)?;
        let clip = self.materialize_clip(&payload, providers)?;
        self.clips.push(clip);
        info!(
            "timeline {}: appended {} ms from {}",
            self.uid,
            header.payload_duration_ms(),
            path.display()
        );
        Ok(())
    }

    /// Stream the full decoded range to an external WAV file
    ///
    /// # Errors
    /// * `EmptyTimeline` - the timeline has zero duration
    /// * `DestinationExists` - `path` exists and `overwrite` is false
    pub fn export_to_file(
        &self,
        path: &Path,
        overwrite: bool,
        providers: &DataProviderManager,
    ) -> Result<()> {
        let total = self.total_duration_ms(providers)?;
        if total == 0 {
            return Err(WavelineError::EmptyTimeline);
        }
        if path.exists() && !overwrite {
            return Err(WavelineError::DestinationExists {
                path: path.display().to_string(),
            });
        }

        let mut stream = self.read(0, total, providers)?;
        let payload_len = payload_len_u32(stream.len())?;
        let mut file = BufWriter::new(File::create(path)?);
        WaveHeader::write(&mut file, &self.format, payload_len)?;
        io::copy(&mut stream, &mut file)?;
        file.flush()?;
        info!(
            "timeline {}: exported {} ms to {}",
            self.uid,
            total,
            path.display()
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------------

    /// Write `payload` into a fresh provider (header + bytes) and return
    /// a clip spanning it
    fn materialize_clip(
        &self,
        payload: &[u8],
        providers: &mut DataProviderManager,
    ) -> Result<AudioClip> {
        let payload_len = payload_len_u32(payload.len() as u64)?;
        let uid = providers.create(WAV_MIME_TYPE)?.uid().to_string();
        let provider = providers.get(&uid)?;
        let mut writer = provider.open_write_stream()?;
        WaveHeader::write(&mut writer, &self.format, payload_len)?;
        writer.write_all(payload)?;
        drop(writer);

        let end = self.format.ms_for_bytes(payload.len() as u64);
        AudioClip::new(uid, 0, Some(end))
    }

    /// Copy a clip's sub-range into a fresh provider, returning the
    /// replacement clip
    ///
    /// Splitting never mutates the original provider.
    fn copy_clip_range(
        &self,
        clip: &AudioClip,
        from_ms: u64,
        to_ms: u64,
        providers: &mut DataProviderManager,
    ) -> Result<AudioClip> {
        let mut view = clip.audio_stream(from_ms, to_ms, providers)?;
        let mut payload = Vec::with_capacity(view.len() as usize);
        view.read_to_end(&mut payload)?;
        drop(view);
        self.materialize_clip(&payload, providers)
    }
}

/// Validate `0 <= begin <= end <= total`
fn check_range(begin_ms: u64, end_ms: u64, total_ms: u64) -> Result<()> {
    if begin_ms > end_ms {
        return Err(WavelineError::OutOfBounds {
            what: "range begin",
            value: begin_ms,
            limit: end_ms,
        });
    }
    if end_ms > total_ms {
        return Err(WavelineError::OutOfBounds {
            what: "range end",
            value: end_ms,
            limit: total_ms,
        });
    }
    Ok(())
}

/// Read exactly `byte_count` bytes into memory
///
/// Fails with `SourceTooShort` before the caller mutates anything.
fn stage_exact<R: Read>(source: &mut R, byte_count: u64) -> Result<Vec<u8>> {
    let mut staged = Vec::with_capacity(byte_count.min(16 * 1024 * 1024) as usize);
    let copied = io::copy(&mut source.take(byte_count), &mut staged)?;
    if copied < byte_count {
        return Err(WavelineError::SourceTooShort {
            requested: byte_count,
            available: copied,
        });
    }
    Ok(staged)
}
