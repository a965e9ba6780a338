//! LL-HLS live pipeline core: partial-segment ring buffer, sequence
//! tracking, and delta-update generation. Spec §4.13, §5.
//!
//! Kept as a plain struct driven by explicit `&mut self` methods rather
//! than a channel-backed actor, per SPEC_FULL.md §2 ("state machines are
//! plain structs driven by explicit methods, not hidden async
//! machinery"); the caller is responsible for serializing calls onto one
//! logical task, as spec §5 requires.

use std::collections::VecDeque;

use crate::error::LiveError;
use crate::playlist::model::{
    ByteRange, MediaPlaylist, MediaSegment, PartInf, PartialSegment, PlaylistType, PreloadHint,
    PreloadHintType, ServerControl,
};

/// Static configuration for a [`LiveCore`] instance, spec §6.4
/// `LLHLSConfiguration`.
#[derive(Clone, Debug)]
pub struct LLHLSConfiguration {
    pub part_target_duration: f64,
    pub max_partials_per_segment: usize,
    pub segment_target_duration: f64,
    /// How many of the most recent retained segments render their full
    /// `EXT-X-PART` listing in [`LiveCore::render_playlist`]; older
    /// retained segments still appear (as plain `EXTINF`+URI) but their
    /// part-level detail collapses. This does not evict segments from
    /// the buffer — see [`LiveCore::complete_segment`].
    pub retained_partial_segments: usize,
    /// URI template with `{segment}`, `{part}`, `{ext}` placeholders.
    pub partial_uri_template: String,
    pub file_extension: String,
    pub include_program_date_time: bool,
    pub server_control: Option<ServerControl>,
}

impl Default for LLHLSConfiguration {
    fn default() -> Self {
        Self {
            part_target_duration: 0.5,
            max_partials_per_segment: 32,
            segment_target_duration: 6.0,
            retained_partial_segments: 6,
            partial_uri_template: "seg{segment}.{part}.{ext}".to_string(),
            file_extension: "m4s".to_string(),
            include_program_date_time: false,
            server_control: None,
        }
    }
}

/// One `EXT-X-PART` with the index it was assigned within its segment.
#[derive(Clone, Debug, PartialEq)]
pub struct LLPartialSegment {
    pub partial_index: usize,
    pub segment: PartialSegment,
}

/// A completed segment retained in [`LiveCore`]'s ring buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct LiveSegment {
    pub index: u64,
    pub duration: f64,
    pub uri: String,
    pub discontinuity: bool,
    pub program_date_time: Option<String>,
    pub partials: Vec<PartialSegment>,
}

/// Notification emitted by [`LiveCore`] as state changes; drained by the
/// caller via [`LiveCore::drain_events`].
#[derive(Clone, Debug, PartialEq)]
pub enum LiveEvent {
    PartialAdded(LLPartialSegment),
    SegmentCompleted(LiveSegment),
}

fn render_uri_template(template: &str, segment: u64, part: usize, ext: &str) -> String {
    template
        .replace("{segment}", &segment.to_string())
        .replace("{part}", &part.to_string())
        .replace("{ext}", ext)
}

/// Single-writer serial agent holding the in-progress segment's
/// partials, a ring buffer of retained segments, and sequence counters.
/// Spec §4.13.
#[derive(Clone, Debug)]
pub struct LiveCore {
    config: LLHLSConfiguration,
    current_segment_index: u64,
    current_partials: Vec<PartialSegment>,
    /// Every completed segment still part of the live window. Not bounded
    /// by `retained_partial_segments` — that field only gates rendered
    /// part-level detail, per spec §8's delta-playlist scenarios, which
    /// require long segment runs to stay fully addressable.
    retained: VecDeque<LiveSegment>,
    media_sequence: u64,
    discontinuity_sequence: u64,
    ended: bool,
    preload_hint: Option<PreloadHint>,
    events: VecDeque<LiveEvent>,
}

impl LiveCore {
    pub fn new(config: LLHLSConfiguration) -> Self {
        Self {
            config,
            current_segment_index: 0,
            current_partials: Vec::new(),
            retained: VecDeque::new(),
            media_sequence: 0,
            discontinuity_sequence: 0,
            ended: false,
            preload_hint: None,
            events: VecDeque::new(),
        }
    }

    /// Appends a partial to the in-progress segment. Spec §4.13
    /// `add_partial`.
    pub fn add_partial(
        &mut self,
        duration: f64,
        uri: Option<String>,
        independent: bool,
        is_gap: bool,
        byte_range: Option<ByteRange>,
    ) -> Result<LLPartialSegment, LiveError> {
        if self.ended {
            return Err(LiveError::StreamAlreadyEnded);
        }
        if duration < 0.0 {
            return Err(LiveError::InvalidPartialDuration(duration));
        }
        if self.current_partials.len() >= self.config.max_partials_per_segment {
            return Err(LiveError::PartialLimitExceeded {
                max: self.config.max_partials_per_segment,
            });
        }

        let partial_index = self.current_partials.len();
        let uri = uri.unwrap_or_else(|| {
            render_uri_template(
                &self.config.partial_uri_template,
                self.current_segment_index,
                partial_index,
                &self.config.file_extension,
            )
        });
        let part = PartialSegment {
            uri,
            duration,
            independent,
            is_gap,
            byte_range,
        };
        self.current_partials.push(part.clone());

        self.preload_hint = Some(PreloadHint {
            hint_type: PreloadHintType::Part,
            uri: render_uri_template(
                &self.config.partial_uri_template,
                self.current_segment_index,
                partial_index + 1,
                &self.config.file_extension,
            ),
            byte_range: None,
        });

        let emitted = LLPartialSegment {
            partial_index,
            segment: part,
        };
        self.events.push_back(LiveEvent::PartialAdded(emitted.clone()));
        log::debug!(
            "partial {} added to segment {} ({duration:.3}s)",
            emitted.partial_index,
            self.current_segment_index
        );
        Ok(emitted)
    }

    /// Moves the in-progress partials into the retained ring buffer as a
    /// completed segment. Spec §4.13 `complete_segment`.
    pub fn complete_segment(
        &mut self,
        duration: f64,
        uri: String,
        discontinuity: bool,
        program_date_time: Option<String>,
    ) -> Result<LiveSegment, LiveError> {
        if self.ended {
            return Err(LiveError::StreamAlreadyEnded);
        }

        let partials = std::mem::take(&mut self.current_partials);
        let segment = LiveSegment {
            index: self.current_segment_index,
            duration,
            uri,
            discontinuity,
            program_date_time,
            partials,
        };
        self.retained.push_back(segment.clone());

        if discontinuity {
            self.discontinuity_sequence += 1;
        }
        self.current_segment_index += 1;

        self.events.push_back(LiveEvent::SegmentCompleted(segment.clone()));
        log::debug!("segment {} completed ({duration:.3}s)", segment.index);
        Ok(segment)
    }

    pub fn end_stream(&mut self) {
        self.ended = true;
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Drains accumulated [`LiveEvent`]s; the caller must not block the
    /// agent while consuming them, per spec §5.
    pub fn drain_events(&mut self) -> Vec<LiveEvent> {
        self.events.drain(..).collect()
    }

    fn target_duration(&self) -> u32 {
        let max_duration = self
            .retained
            .iter()
            .map(|s| s.duration)
            .fold(self.config.segment_target_duration, f64::max);
        max_duration.ceil() as u32
    }

    /// Renders the full media playlist from current state. Infallible,
    /// per spec §7.
    pub fn render_playlist(&self) -> MediaPlaylist {
        let mut playlist = MediaPlaylist {
            version: 7,
            target_duration: self.target_duration(),
            media_sequence: self.media_sequence,
            discontinuity_sequence: self.discontinuity_sequence,
            playlist_type: None,
            independent_segments: true,
            i_frames_only: false,
            ended: self.ended,
            part_inf: Some(PartInf {
                part_target: self.config.part_target_duration,
            }),
            server_control: Some(self.config.server_control.clone().unwrap_or(ServerControl {
                can_block_reload: true,
                can_skip_until: None,
                can_skip_date_ranges: false,
                hold_back: Some(self.config.segment_target_duration * 3.0),
                part_hold_back: Some(self.config.part_target_duration * 3.0),
            })),
            segments: Vec::new(),
            preload_hints: Vec::new(),
            rendition_reports: Vec::new(),
            skipped_segments: None,
        };

        // Only the trailing `retained_partial_segments` segments render
        // their full EXT-X-PART listing; older ones still appear (as
        // plain EXTINF+URI) with their part-level detail collapsed.
        let detail_threshold = self
            .retained
            .len()
            .saturating_sub(self.config.retained_partial_segments);
        for (idx, segment) in self.retained.iter().enumerate() {
            let mut media_segment = MediaSegment::new(segment.duration, segment.uri.clone());
            media_segment.discontinuity = segment.discontinuity;
            media_segment.program_date_time = segment.program_date_time.clone();
            if idx >= detail_threshold {
                media_segment.parts = segment.partials.clone();
            }
            playlist.segments.push(media_segment);
        }

        if !self.current_partials.is_empty() {
            // In-progress segment: parts only, no EXTINF/URI yet.
            let mut in_progress = MediaSegment::new(0.0, "");
            in_progress.parts = self.current_partials.clone();
            playlist.segments.push(in_progress);
        }

        if let Some(hint) = &self.preload_hint {
            playlist.preload_hints.push(hint.clone());
        }
        if matches!(playlist.playlist_type, Some(PlaylistType::Vod)) {
            playlist.ended = true;
        }

        playlist
    }

    /// Renders a delta update skipping the oldest segments that can be
    /// dropped while the remainder still covers `can_skip_until`
    /// seconds. Returns `None` when no segment can be skipped. Spec
    /// §4.13 `render_delta_playlist`.
    pub fn render_delta_playlist(&self, can_skip_until: f64) -> Option<MediaPlaylist> {
        let total_duration: f64 = self.retained.iter().map(|s| s.duration).sum();
        let mut removed_duration = 0.0;
        let mut skip_count = 0usize;
        for segment in &self.retained {
            let remaining = total_duration - (removed_duration + segment.duration);
            // Strict comparison: keep one segment's worth of margin beyond
            // `can_skip_until` rather than skipping down to the exact
            // boundary, per spec §8's worked delta-playlist scenario.
            if remaining <= can_skip_until {
                break;
            }
            removed_duration += segment.duration;
            skip_count += 1;
        }
        if skip_count == 0 {
            return None;
        }

        let mut playlist = self.render_playlist();
        playlist.segments.drain(0..skip_count);
        playlist.skipped_segments = Some(skip_count as u32);
        Some(playlist)
    }
}
