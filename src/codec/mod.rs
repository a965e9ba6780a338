//! Codec bitstream transformation: AVC Annex-B conversion and AAC ADTS
//! framing. Spec §4.7, §4.8.

pub mod adts;
pub mod annexb;
