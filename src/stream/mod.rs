//! Bounded and composite stream primitives
//!
//! - [`ByteRangeView`]: a read-only, seekable window over a fixed byte
//!   range of a backing source, used to expose provider sub-ranges
//!   without copying.
//! - [`SequenceStream`]: a composite reader that plays an ordered list
//!   of views back to back, reporting its total length up front.

mod range;
mod sequence;

pub use range::{ByteRangeView, RangeSource};
pub use sequence::SequenceStream;
