//! Trait boundaries for collaborators this crate never implements
//! itself: writing segment bytes somewhere durable, and handing bytes to
//! a managed cloud transcoder. Spec §1 "out of scope: file I/O wrappers
//! ... managed-transcoder cloud providers remain an opaque uploader
//! boundary." Grounded on the teacher's `Egress` trait (`egress/mod.rs`)
//! — a narrow interface plus a result enum, no async machinery baked in.

use crate::error::ContainerError;

/// Where a finished segment's bytes (or init segment) end up. Callers
/// provide a concrete sink (local filesystem, object store, ...); this
/// crate ships only [`InMemorySink`] for tests.
pub trait SegmentSink {
    fn write_segment(&mut self, name: &str, bytes: &[u8]) -> Result<(), ContainerError>;
}

/// Result of handing bytes to a managed transcoder.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadResult {
    pub url: String,
}

/// Opaque boundary to a managed cloud transcoder (Cloudflare Stream,
/// Mux, AWS MediaConvert, ...). This crate never implements a concrete
/// HTTP client for one.
pub trait TranscoderUploader {
    fn upload(&mut self, name: &str, bytes: &[u8]) -> Result<UploadResult, ContainerError>;
}

/// In-memory [`SegmentSink`] used by tests; keeps every written segment
/// by name for later assertion.
#[derive(Debug, Default)]
pub struct InMemorySink {
    pub segments: Vec<(String, Vec<u8>)>,
}

impl SegmentSink for InMemorySink {
    fn write_segment(&mut self, name: &str, bytes: &[u8]) -> Result<(), ContainerError> {
        self.segments.push((name.to_string(), bytes.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_sink_records_writes_in_order() {
        let mut sink = InMemorySink::default();
        sink.write_segment("init.mp4", b"ftyp").unwrap();
        sink.write_segment("segment_0.m4s", b"moof").unwrap();
        assert_eq!(sink.segments[0].0, "init.mp4");
        assert_eq!(sink.segments[1].0, "segment_0.m4s");
    }
}
