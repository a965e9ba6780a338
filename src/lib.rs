//! Converts a static ISOBMFF (MP4/M4A/MOV) source asset into HLS
//! deliverables: fragmented-MP4 (fMP4/CMAF) or MPEG-TS segments, each
//! with a conformant media playlist, plus the LL-HLS live pipeline core
//! for partial-segment delivery. See SPEC_FULL.md for the full design.

pub mod binary;
pub mod codec;
pub mod error;
pub mod external;
pub mod isobmff;
pub mod live;
pub mod playlist;
pub mod segmenter;
pub mod ts;
