//! Structured error types for every component, per spec: "All errors are
//! structured (kind + fields), not free-form strings; a separate
//! human-message method renders them for logs."

use std::fmt;

/// Errors raised by the big-endian binary reader/writer.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum BinaryError {
    #[error("unexpected end of data: needed {needed} bytes, {available} available")]
    EndOfData { needed: usize, available: usize },
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Errors raised while parsing or synthesizing an ISOBMFF box tree.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ContainerError {
    #[error("invalid file: {0}")]
    InvalidFile(String),
    #[error("missing required box: {0}")]
    MissingBox(String),
    #[error("invalid box data in '{box_type}': {reason}")]
    InvalidBoxData { box_type: String, reason: String },
    #[error("file too large: {0} bytes")]
    FileTooLarge(u64),
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("io error: {0}")]
    Io(String),
}

impl ContainerError {
    /// Attach the enclosing box's four-CC to an underlying [`BinaryError`],
    /// per spec §7: "BoxTree converts BinaryError into ContainerError with
    /// the enclosing box's four-CC for context."
    pub fn from_binary(box_type: impl Into<String>, err: BinaryError) -> Self {
        ContainerError::InvalidBoxData {
            box_type: box_type.into(),
            reason: err.to_string(),
        }
    }

    /// Human-readable rendering for logs, separate from the `Display`
    /// impl so structured fields remain queryable via pattern matching.
    pub fn human_message(&self) -> String {
        self.to_string()
    }
}

impl From<std::io::Error> for ContainerError {
    fn from(e: std::io::Error) -> Self {
        ContainerError::Io(e.to_string())
    }
}

/// Errors raised while transforming codec bitstreams (AVC/HEVC, AAC).
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("invalid AVC decoder configuration: {0}")]
    InvalidAvcConfig(String),
    #[error("invalid audio configuration: {0}")]
    InvalidAudioConfig(String),
    #[error("PES packetization error: {0}")]
    PesError(String),
    #[error("TS packet error: {0}")]
    PacketError(String),
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
}

/// Errors raised while parsing or validating an HLS playlist.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum PlaylistError {
    #[error("empty playlist")]
    Empty,
    #[error("missing #EXTM3U header")]
    MissingHeader,
    #[error("playlist is ambiguously both master and media")]
    AmbiguousPlaylistType,
    #[error("missing required tag: {0}")]
    MissingTag(String),
    #[error("missing required attribute '{0}' on tag '{1}'")]
    MissingAttribute(String, String),
    #[error("invalid value for attribute '{attr}' on tag '{tag}': {value}")]
    InvalidAttributeValue {
        tag: String,
        attr: String,
        value: String,
    },
    #[error("invalid tag format at line {0}")]
    InvalidTagFormat(usize),
    #[error("invalid duration at line {0}")]
    InvalidDuration(usize),
    #[error("missing URI for tag '{tag}' at line {line}")]
    MissingUri { tag: String, line: usize },
    #[error("invalid EXT-X-VERSION value")]
    InvalidVersion,
    #[error("parse failed: {reason}{line_suffix}", line_suffix = line.map(|l| format!(" (line {l})")).unwrap_or_default())]
    ParseFailed { reason: String, line: Option<usize> },
    #[error("undefined EXT-X-DEFINE variable '{0}'")]
    UndefinedVariable(String),
}

/// Errors raised by [`crate::live::LiveCore`].
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum LiveError {
    #[error("stream has already ended")]
    StreamAlreadyEnded,
    #[error("partial limit exceeded: max {max} partials per segment")]
    PartialLimitExceeded { max: usize },
    #[error("invalid partial duration: {0}")]
    InvalidPartialDuration(f64),
}

/// Top-level error returned by the [`crate::segmenter::Segmenter`]
/// orchestrator, per spec §4.11: "Segmenter surfaces underlying errors
/// unmodified."
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum SegmenterError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Playlist(#[from] PlaylistError),
    #[error("no video or audio track selected")]
    NoVideoOrAudio,
}

/// Common trait for rendering a human-facing log line without losing the
/// structured representation (`Debug`) used by callers that branch on
/// error kind.
pub trait HumanMessage: fmt::Display {
    fn human_message(&self) -> String {
        self.to_string()
    }
}

impl HumanMessage for BinaryError {}
impl HumanMessage for ContainerError {}
impl HumanMessage for CodecError {}
impl HumanMessage for PlaylistError {}
impl HumanMessage for LiveError {}
impl HumanMessage for SegmenterError {}
