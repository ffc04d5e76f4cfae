//! A time-windowed reference into one data provider's audio

use std::rc::Rc;

use crate::error::{Result, WavelineError};
use crate::format::WaveHeader;
use crate::provider::DataProviderManager;
use crate::stream::{ByteRangeView, RangeSource};

/// A value associating one data provider with a time window
///
/// `begin_ms` and `end_ms` bound the portion of the provider's decoded
/// PCM payload that is in play. `end_ms == None` ties the clip to the end
/// of the underlying audio: the provider's duration is re-derived from
/// its RIFF header on every query rather than cached, so growing the
/// provider's payload automatically grows the clip.
///
/// Clips hold the provider's uid, never the provider itself; all access
/// resolves through the owning [`DataProviderManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    provider_uid: String,
    begin_ms: u64,
    end_ms: Option<u64>,
}

impl AudioClip {
    /// Create a clip over `[begin_ms, end_ms)` of a provider's audio
    ///
    /// # Errors
    /// `OutOfBounds` if an explicit end precedes the begin.
    pub fn new(provider_uid: impl Into<String>, begin_ms: u64, end_ms: Option<u64>) -> Result<Self> {
        if let Some(end) = end_ms {
            if end < begin_ms {
                return Err(WavelineError::OutOfBounds {
                    what: "clip end",
                    value: end,
                    limit: begin_ms,
                });
            }
        }
        Ok(Self {
            provider_uid: provider_uid.into(),
            begin_ms,
            end_ms,
        })
    }

    /// Uid of the referenced provider
    pub fn provider_uid(&self) -> &str {
        &self.provider_uid
    }

    /// Start of the window within the provider's audio
    pub fn begin_ms(&self) -> u64 {
        self.begin_ms
    }

    /// Explicit end of the window, or `None` when tied to the end of the
    /// underlying audio
    pub fn end_ms(&self) -> Option<u64> {
        self.end_ms
    }

    /// Change the end of the window
    ///
    /// `None` ties the clip to the end of the underlying audio.
    ///
    /// # Errors
    /// `OutOfBounds` if an explicit end precedes the begin.
    pub fn set_end_ms(&mut self, end_ms: Option<u64>) -> Result<()> {
        if let Some(end) = end_ms {
            if end < self.begin_ms {
                return Err(WavelineError::OutOfBounds {
                    what: "clip end",
                    value: end,
                    limit: self.begin_ms,
                });
            }
        }
        self.end_ms = end_ms;
        Ok(())
    }

    /// Parse the referenced provider's RIFF header
    ///
    /// Opens a read stream for the duration of the parse. Never cached.
    pub fn provider_header(&self, providers: &DataProviderManager) -> Result<WaveHeader> {
        let provider = providers.get(&self.provider_uid)?;
        let handle = provider.open_read_stream()?;
        let len = handle.len().map_err(WavelineError::Io)?;
        let source: Rc<dyn RangeSource> = handle;
        let mut view = ByteRangeView::new(source, 0, len)?;
        WaveHeader::parse(&mut view)
    }

    /// Effective duration of the clip in milliseconds
    ///
    /// Explicit end: `end - begin`. Tied end: provider payload duration
    /// minus `begin` (zero when the window starts past the payload).
    pub fn duration_ms(&self, providers: &DataProviderManager) -> Result<u64> {
        match self.end_ms {
            Some(end) => Ok(end - self.begin_ms),
            None => {
                let header = self.provider_header(providers)?;
                Ok(header.payload_duration_ms().saturating_sub(self.begin_ms))
            }
        }
    }

    /// Open a bounded view over a sub-range of this clip's audio
    ///
    /// `sub_begin_ms` and `sub_end_ms` are offsets relative to the clip's
    /// own begin and must satisfy `0 <= sub_begin <= sub_end <= duration`.
    /// The returned view covers the corresponding payload byte range of
    /// the provider; the clip's time offsets are converted through the
    /// provider's own PCM byte rate.
    pub fn audio_stream(
        &self,
        sub_begin_ms: u64,
        sub_end_ms: u64,
        providers: &DataProviderManager,
    ) -> Result<ByteRangeView> {
        let duration = self.duration_ms(providers)?;
        if sub_begin_ms > sub_end_ms {
            return Err(WavelineError::OutOfBounds {
                what: "sub-range begin",
                value: sub_begin_ms,
                limit: sub_end_ms,
            });
        }
        if sub_end_ms > duration {
            return Err(WavelineError::OutOfBounds {
                what: "sub-range end",
                value: sub_end_ms,
                limit: duration,
            });
        }

        let provider = providers.get(&self.provider_uid)?;
        let handle = provider.open_read_stream()?;
        let source: Rc<dyn RangeSource> = handle;

        // Re-parse the header through the same open registration
        let len = source.len().map_err(WavelineError::Io)?;
        let mut header_view = ByteRangeView::new(Rc::clone(&source), 0, len)?;
        let header = WaveHeader::parse(&mut header_view)?;
        drop(header_view);

        let format = header.format;
        let payload_end = header.data_offset + header.payload_len as u64;
        let start = header.data_offset + format.bytes_for_ms(self.begin_ms + sub_begin_ms);
        let end = header.data_offset + format.bytes_for_ms(self.begin_ms + sub_end_ms);
        // Rounding may land up to one frame past the payload
        let start = start.min(payload_end);
        let end = end.min(payload_end);

        ByteRangeView::new(source, start, end - start)
    }
}
