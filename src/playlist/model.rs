//! Versioned, typed model of master and media M3U8 playlists. Spec §3
//! "MasterPlaylist/MediaPlaylist", §4.12, §6.1.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistType {
    Vod,
    Event,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ByteRange {
    pub length: u64,
    pub offset: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Key {
    pub method: String,
    pub uri: Option<String>,
    pub iv: Option<String>,
    pub keyformat: Option<String>,
    pub keyformatversions: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Map {
    pub uri: String,
    pub byte_range: Option<ByteRange>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DateRange {
    pub id: String,
    pub class: Option<String>,
    pub start_date: String,
    pub end_date: Option<String>,
    pub duration: Option<f64>,
    pub planned_duration: Option<f64>,
    pub end_on_next: bool,
}

/// One `EXT-X-PART` entry attached to a media segment, per spec §3
/// "LLPartialSegment".
#[derive(Clone, Debug, PartialEq)]
pub struct PartialSegment {
    pub uri: String,
    pub duration: f64,
    pub independent: bool,
    pub is_gap: bool,
    pub byte_range: Option<ByteRange>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PreloadHint {
    pub hint_type: PreloadHintType,
    pub uri: String,
    pub byte_range: Option<ByteRange>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreloadHintType {
    Part,
    Map,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServerControl {
    pub can_block_reload: bool,
    pub can_skip_until: Option<f64>,
    pub can_skip_date_ranges: bool,
    pub hold_back: Option<f64>,
    pub part_hold_back: Option<f64>,
}

/// One media segment in a [`MediaPlaylist`].
#[derive(Clone, Debug, PartialEq)]
pub struct MediaSegment {
    pub duration: f64,
    pub title: Option<String>,
    pub uri: String,
    pub byte_range: Option<ByteRange>,
    pub discontinuity: bool,
    pub key: Option<Key>,
    pub map: Option<Map>,
    pub program_date_time: Option<String>,
    pub is_gap: bool,
    pub bitrate: Option<u64>,
    pub date_range: Option<DateRange>,
    pub parts: Vec<PartialSegment>,
}

impl MediaSegment {
    pub fn new(duration: f64, uri: impl Into<String>) -> Self {
        Self {
            duration,
            title: None,
            uri: uri.into(),
            byte_range: None,
            discontinuity: false,
            key: None,
            map: None,
            program_date_time: None,
            is_gap: false,
            bitrate: None,
            date_range: None,
            parts: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartInf {
    pub part_target: f64,
}

#[derive(Clone, Debug, Default)]
pub struct MediaPlaylist {
    pub version: u32,
    pub target_duration: u32,
    pub media_sequence: u64,
    pub discontinuity_sequence: u64,
    pub playlist_type: Option<PlaylistType>,
    pub independent_segments: bool,
    pub i_frames_only: bool,
    pub ended: bool,
    pub part_inf: Option<PartInf>,
    pub server_control: Option<ServerControl>,
    pub segments: Vec<MediaSegment>,
    pub preload_hints: Vec<PreloadHint>,
    pub rendition_reports: Vec<(String, BTreeMap<String, String>)>,
    pub skipped_segments: Option<u32>,
}

impl Default for PlaylistType {
    fn default() -> Self {
        PlaylistType::Vod
    }
}

/// One rendition in `EXT-X-MEDIA`.
#[derive(Clone, Debug, PartialEq)]
pub struct Media {
    pub media_type: String,
    pub group_id: String,
    pub name: String,
    pub uri: Option<String>,
    pub language: Option<String>,
    pub default: bool,
    pub autoselect: bool,
    pub channels: Option<String>,
}

/// One variant in `EXT-X-STREAM-INF`.
#[derive(Clone, Debug, PartialEq)]
pub struct Variant {
    pub uri: String,
    pub bandwidth: u64,
    pub average_bandwidth: Option<u64>,
    pub codecs: Option<String>,
    pub resolution: Option<(u32, u32)>,
    pub frame_rate: Option<f64>,
    pub audio_group: Option<String>,
    pub video_group: Option<String>,
    pub subtitles_group: Option<String>,
}

/// One `EXT-X-I-FRAME-STREAM-INF` entry.
#[derive(Clone, Debug, PartialEq)]
pub struct IFrameVariant {
    pub uri: String,
    pub bandwidth: u64,
    pub codecs: Option<String>,
    pub resolution: Option<(u32, u32)>,
}

#[derive(Clone, Debug, Default)]
pub struct MasterPlaylist {
    pub version: u32,
    pub independent_segments: bool,
    pub media: Vec<Media>,
    pub variants: Vec<Variant>,
    pub i_frame_variants: Vec<IFrameVariant>,
    pub session_data: Vec<BTreeMap<String, String>>,
}

/// The two playlist shapes a parsed M3U8 document can take.
#[derive(Clone, Debug)]
pub enum Playlist {
    Master(MasterPlaylist),
    Media(MediaPlaylist),
}
