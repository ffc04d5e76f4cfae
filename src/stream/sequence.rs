//! Composite reader over an ordered list of range views

use std::io::{self, Read};

use crate::stream::range::ByteRangeView;

/// Reads through an ordered list of [`ByteRangeView`]s sequentially
///
/// Each view is exhausted before the next one is started. The total
/// length is the sum of the view lengths and is known up front, so a
/// caller sizing an output buffer or writing a container header does not
/// need to drain the stream first.
pub struct SequenceStream {
    segments: Vec<ByteRangeView>,
    current: usize,
    total_len: u64,
    position: u64,
}

impl SequenceStream {
    /// Build a stream over `segments`, read in order
    ///
    /// Each segment is rewound to its window start before use.
    pub fn new(mut segments: Vec<ByteRangeView>) -> Self {
        for segment in &mut segments {
            segment.set_position(0);
        }
        let total_len = segments.iter().map(|s| s.len()).sum();
        Self {
            segments,
            current: 0,
            total_len,
            position: 0,
        }
    }

    /// Total byte length across all segments
    pub fn len(&self) -> u64 {
        self.total_len
    }

    /// Whether the stream holds no bytes at all
    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    /// Bytes consumed so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Number of underlying segments
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

impl Read for SequenceStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.current < self.segments.len() {
            let n = self.segments[self.current].read(buf)?;
            if n > 0 {
                self.position += n as u64;
                return Ok(n);
            }
            self.current += 1;
        }
        Ok(0)
    }
}

impl std::fmt::Debug for SequenceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceStream")
            .field("segments", &self.segments.len())
            .field("total_len", &self.total_len)
            .field("position", &self.position)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::stream::range::RangeSource;

    use super::*;

    fn view(bytes: Vec<u8>, start: u64, len: u64) -> ByteRangeView {
        let source: Rc<dyn RangeSource> = Rc::new(bytes);
        ByteRangeView::new(source, start, len).unwrap()
    }

    #[test]
    fn test_reads_segments_in_order() {
        let stream = SequenceStream::new(vec![
            view(vec![1, 2, 3, 4], 0, 4),
            view(vec![5, 6, 7, 8], 2, 2),
            view(vec![9, 10], 0, 2),
        ]);
        assert_eq!(stream.len(), 8);

        let mut out = Vec::new();
        let mut stream = stream;
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 7, 8, 9, 10]);
        assert_eq!(stream.position(), 8);
    }

    #[test]
    fn test_length_known_up_front() {
        let stream = SequenceStream::new(vec![
            view(vec![0; 100], 0, 100),
            view(vec![0; 50], 10, 40),
        ]);
        assert_eq!(stream.len(), 140);
        assert_eq!(stream.segment_count(), 2);
    }

    #[test]
    fn test_skips_empty_segments() {
        let mut stream = SequenceStream::new(vec![
            view(vec![1, 2], 0, 2),
            view(vec![3, 4], 0, 0),
            view(vec![5, 6], 0, 2),
        ]);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![1, 2, 5, 6]);
    }

    #[test]
    fn test_empty_stream() {
        let mut stream = SequenceStream::new(Vec::new());
        assert!(stream.is_empty());
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_rewinds_segments_on_construction() {
        let mut pre_read = view(vec![1, 2, 3, 4], 0, 4);
        let mut buf = [0u8; 2];
        pre_read.read_exact(&mut buf).unwrap();

        let mut stream = SequenceStream::new(vec![pre_read]);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }
}
