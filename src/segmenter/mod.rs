//! Offline fMP4/MPEG-TS segmentation orchestrator. Spec §4.11.

use serde::{Deserialize, Serialize};

use crate::codec::adts::{wrap_adts, AudioSpecificConfig};
use crate::codec::annexb::{build_access_unit, AvcDecoderConfig};
use crate::error::SegmenterError;
use crate::isobmff::file_info::{extract_aac_config, extract_avcc, is_cover_art_track, FileInfo, MediaType, TrackInfo};
use crate::isobmff::fmp4_writer::{FMP4Writer, TrafInput};
use crate::isobmff::sample_locator::{SampleLocator, SegmentPlan};
use crate::isobmff::sample_table::SampleTable;
use crate::isobmff::parse_boxes;
use crate::playlist::model::{ByteRange, Map as PlaylistMap, MediaPlaylist, MediaSegment, PlaylistType};
use crate::playlist::writer::write_media_playlist;
use crate::ts::mux::{
    build_pat, build_pmt, mux_pes, mux_psi_section, ContinuityCounters, ElementaryStream, PID_AUDIO, PID_PAT,
    PID_PMT, PID_VIDEO, STREAM_TYPE_AAC, STREAM_TYPE_H264,
};
use crate::ts::pes::{wrap_audio_pes, wrap_video_pes, AUDIO_STREAM_ID, VIDEO_STREAM_ID};

/// The container an offline segmentation run emits. Spec §6.4.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerFormat {
    FragmentedMp4,
    MpegTs,
}

/// Whether each segment is a standalone file, or a byte range within one
/// concatenated output buffer. Spec §6.4.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    SeparateFiles,
    ByteRange,
}

/// Inputs to [`Segmenter::segment`], per spec §6.4.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SegmentationConfig {
    pub container_format: ContainerFormat,
    pub target_segment_duration: f64,
    pub output_mode: OutputMode,
    pub segment_name_pattern: String,
    pub init_segment_name: String,
    pub playlist_name: String,
    pub include_audio: bool,
    pub generate_playlist: bool,
    pub playlist_type: PlaylistType,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            container_format: ContainerFormat::FragmentedMp4,
            target_segment_duration: 6.0,
            output_mode: OutputMode::SeparateFiles,
            segment_name_pattern: "segment_%d".to_string(),
            init_segment_name: "init.mp4".to_string(),
            playlist_name: "playlist.m3u8".to_string(),
            include_audio: true,
            generate_playlist: true,
            playlist_type: PlaylistType::Vod,
        }
    }
}

impl SegmentationConfig {
    fn extension(&self) -> &'static str {
        match self.container_format {
            ContainerFormat::FragmentedMp4 => "m4s",
            ContainerFormat::MpegTs => "ts",
        }
    }

    /// fMP4 output needs EXT-X-MAP (version 7); TS output carries no init
    /// segment and stays at version 3, per spec §6.4.
    fn hls_version(&self) -> u32 {
        match self.container_format {
            ContainerFormat::FragmentedMp4 => 7,
            ContainerFormat::MpegTs => 3,
        }
    }

    fn segment_name(&self, index: usize) -> String {
        let stem = if self.segment_name_pattern.contains("%d") {
            self.segment_name_pattern.replace("%d", &index.to_string())
        } else {
            format!("{}_{index}", self.segment_name_pattern)
        };
        format!("{stem}.{}", self.extension())
    }
}

/// One emitted segment. `bytes` carries the segment's own content in
/// [`OutputMode::SeparateFiles`] mode and is empty in
/// [`OutputMode::ByteRange`] mode, where `offset`/`length` index into
/// [`SegmentationResult::concatenated_bytes`] instead.
#[derive(Clone, Debug)]
pub struct MediaSegmentOutput {
    pub name: String,
    pub bytes: Vec<u8>,
    pub duration_seconds: f64,
    pub offset: Option<u64>,
    pub length: u64,
}

/// Output of [`Segmenter::segment`], per spec §6.4.
#[derive(Clone, Debug)]
pub struct SegmentationResult {
    pub init_segment_bytes: Option<Vec<u8>>,
    pub segments: Vec<MediaSegmentOutput>,
    pub playlist_text: Option<String>,
    pub concatenated_bytes: Option<Vec<u8>>,
}

pub struct Segmenter;

impl Segmenter {
    /// Runs the full pipeline: parse the box tree, select tracks, plan
    /// segments on the driving track, emit each segment, and (optionally)
    /// render the media playlist. Spec §4.11.
    pub fn segment(source: &[u8], config: &SegmentationConfig) -> Result<SegmentationResult, SegmenterError> {
        let boxes = parse_boxes(source, 0, source.len() as u64)?;
        let file_info = FileInfo::parse(&boxes)?;

        let video_track = file_info
            .tracks
            .iter()
            .find(|t| t.media_type == MediaType::Video && !is_cover_art_track(t, file_info.duration));
        let audio_track = file_info.tracks.iter().find(|t| t.media_type == MediaType::Audio);

        // The driving track is always selected[0]: video when present,
        // otherwise the first audio track with every sample treated as a
        // segment boundary candidate.
        let mut selected: Vec<&TrackInfo> = Vec::new();
        if let Some(v) = video_track {
            selected.push(v);
        }
        if config.include_audio {
            if let Some(a) = audio_track {
                selected.push(a);
            }
        }
        if selected.is_empty() {
            return Err(SegmenterError::NoVideoOrAudio);
        }
        log::debug!(
            "driving track id={} type={:?}, {} companion track(s)",
            selected[0].track_id,
            selected[0].media_type,
            selected.len() - 1
        );

        let tables: Vec<SampleTable> = selected
            .iter()
            .map(|t| SampleTable::parse(&t.stbl))
            .collect::<Result<_, _>>()?;
        let locators: Vec<SampleLocator> = tables
            .iter()
            .zip(selected.iter())
            .map(|(table, t)| SampleLocator::new(table, t.timescale))
            .collect();

        let force_all_sync = video_track.is_none();
        let plans = locators[0].plan_segments(config.target_segment_duration, force_all_sync);
        log::debug!(
            "planned {} segment(s) at target {:.3}s",
            plans.len(),
            config.target_segment_duration
        );

        match config.container_format {
            ContainerFormat::FragmentedMp4 => {
                Self::segment_fmp4(&file_info, &selected, &locators, &plans, source, config)
            }
            ContainerFormat::MpegTs => Self::segment_ts(&selected, &locators, &plans, source, config),
        }
    }

    fn segment_fmp4(
        file_info: &FileInfo,
        selected: &[&TrackInfo],
        locators: &[SampleLocator],
        plans: &[SegmentPlan],
        source: &[u8],
        config: &SegmentationConfig,
    ) -> Result<SegmentationResult, SegmenterError> {
        let init_bytes = FMP4Writer::write_init_segment(file_info, selected)?;

        let mut segments = Vec::with_capacity(plans.len());
        let mut concatenated = Vec::new();

        for (i, plan) in plans.iter().enumerate() {
            let (start_time, end_time) = plan_time_window(*plan, locators[0].timescale());

            let mut durations_by_track = Vec::with_capacity(selected.len());
            let mut ranges_by_track = Vec::with_capacity(selected.len());
            let mut track_plans = Vec::with_capacity(selected.len());

            for (track_index, loc) in locators.iter().enumerate() {
                let (first, count) = if track_index == 0 {
                    (plan.first_sample_index, plan.sample_count)
                } else {
                    companion_sample_range(loc, start_time, end_time)
                };
                let durations: Vec<u32> = (first..first + count).map(|idx| loc.sample_duration(idx)).collect();
                let ranges = loc.sample_ranges(first, count);
                track_plans.push(SegmentPlan {
                    first_sample_index: first,
                    sample_count: count,
                    duration_seconds: plan.duration_seconds,
                    start_dts_ticks: loc.dts(first),
                    start_pts_ticks: loc.pts(first).max(0) as u64,
                    starts_with_keyframe: loc.is_sync(first),
                });
                durations_by_track.push(durations);
                ranges_by_track.push(ranges);
            }

            let traf_inputs: Vec<TrafInput> = selected
                .iter()
                .zip(track_plans.iter())
                .zip(durations_by_track.iter())
                .zip(ranges_by_track.iter())
                .map(|(((track, track_plan), durations), ranges)| TrafInput {
                    track_id: track.track_id,
                    plan: *track_plan,
                    sample_durations: durations.as_slice(),
                    sample_ranges: ranges.as_slice(),
                })
                .collect();

            let seg_bytes = FMP4Writer::write_media_segment((i + 1) as u32, &traf_inputs, source)?;
            segments.push(finish_segment(config, i, plan.duration_seconds, seg_bytes, &mut concatenated));
        }

        let playlist = build_playlist(&segments, config, Some(&config.init_segment_name));
        let playlist_text = config.generate_playlist.then(|| write_media_playlist(&playlist));

        Ok(SegmentationResult {
            init_segment_bytes: Some(init_bytes),
            segments,
            playlist_text,
            concatenated_bytes: (config.output_mode == OutputMode::ByteRange).then_some(concatenated),
        })
    }

    fn segment_ts(
        selected: &[&TrackInfo],
        locators: &[SampleLocator],
        plans: &[SegmentPlan],
        source: &[u8],
        config: &SegmentationConfig,
    ) -> Result<SegmentationResult, SegmenterError> {
        let video_index = selected.iter().position(|t| t.media_type == MediaType::Video);
        let audio_index = selected.iter().position(|t| t.media_type == MediaType::Audio);

        let avc_config = video_index
            .map(|i| extract_avcc(selected[i].stsd_payload))
            .transpose()?
            .map(|bytes| AvcDecoderConfig::parse(&bytes))
            .transpose()?;
        let audio_config = audio_index
            .map(|i| extract_aac_config(selected[i].stsd_payload))
            .transpose()?
            .map(|bytes| AudioSpecificConfig::parse(&bytes))
            .transpose()?;

        let pcr_pid = if video_index.is_some() { PID_VIDEO } else { PID_AUDIO };
        let mut streams = Vec::new();
        if video_index.is_some() {
            streams.push(ElementaryStream {
                stream_type: STREAM_TYPE_H264,
                pid: PID_VIDEO,
            });
        }
        if audio_index.is_some() {
            streams.push(ElementaryStream {
                stream_type: STREAM_TYPE_AAC,
                pid: PID_AUDIO,
            });
        }

        let mut segments = Vec::with_capacity(plans.len());
        let mut concatenated = Vec::new();

        for (i, plan) in plans.iter().enumerate() {
            let (start_time, end_time) = plan_time_window(*plan, locators[0].timescale());
            let mut counters = ContinuityCounters::new();
            let mut ts_bytes = Vec::new();

            ts_bytes.extend(mux_psi_section(PID_PAT, &build_pat(1, 1, PID_PMT), &mut counters));
            ts_bytes.extend(mux_psi_section(PID_PMT, &build_pmt(1, pcr_pid, &streams), &mut counters));

            let mut entries = Vec::new();
            if let Some(vi) = video_index {
                let loc = &locators[vi];
                let (first, count) = if vi == 0 {
                    (plan.first_sample_index, plan.sample_count)
                } else {
                    companion_sample_range(loc, start_time, end_time)
                };
                for (k, &(offset, size)) in loc.sample_ranges(first, count).iter().enumerate() {
                    let idx = first + k as u32;
                    let pts90 = to_90khz(loc.pts(idx), loc.timescale());
                    let dts90 = to_90khz(loc.dts(idx) as i64, loc.timescale());
                    entries.push(TsEntry {
                        pts_90k: pts90,
                        dts_90k: if dts90 != pts90 { Some(dts90 as u64) } else { None },
                        is_keyframe: loc.is_sync(idx),
                        is_video: true,
                        offset,
                        size,
                    });
                }
            }
            if let Some(ai) = audio_index {
                let loc = &locators[ai];
                let (first, count) = if ai == 0 {
                    (plan.first_sample_index, plan.sample_count)
                } else {
                    companion_sample_range(loc, start_time, end_time)
                };
                for (k, &(offset, size)) in loc.sample_ranges(first, count).iter().enumerate() {
                    let idx = first + k as u32;
                    let pts90 = to_90khz(loc.pts(idx), loc.timescale());
                    entries.push(TsEntry {
                        pts_90k: pts90,
                        dts_90k: None,
                        is_keyframe: true,
                        is_video: false,
                        offset,
                        size,
                    });
                }
            }
            entries.sort_by_key(|e| e.pts_90k);

            let mut pcr_emitted = false;
            for entry in &entries {
                let start = entry.offset as usize;
                let sample = &source[start..start + entry.size as usize];
                if entry.is_video {
                    let avc_config = avc_config.as_ref().expect("video stream without avcC");
                    let au = build_access_unit(avc_config, sample, entry.is_keyframe);
                    let pes = wrap_video_pes(VIDEO_STREAM_ID, entry.pts_90k as u64, entry.dts_90k, &au);
                    let pcr = if !pcr_emitted {
                        pcr_emitted = true;
                        Some(entry.pts_90k as u64 * 300)
                    } else {
                        None
                    };
                    ts_bytes.extend(mux_pes(PID_VIDEO, &pes, entry.is_keyframe, pcr, &mut counters));
                } else {
                    let audio_config = audio_config.as_ref().expect("audio stream without AudioSpecificConfig");
                    let wrapped = wrap_adts(sample, audio_config);
                    let pes = wrap_audio_pes(AUDIO_STREAM_ID, entry.pts_90k as u64, &wrapped);
                    let pcr = if !pcr_emitted {
                        pcr_emitted = true;
                        Some(entry.pts_90k as u64 * 300)
                    } else {
                        None
                    };
                    ts_bytes.extend(mux_pes(PID_AUDIO, &pes, false, pcr, &mut counters));
                }
            }

            segments.push(finish_segment(config, i, plan.duration_seconds, ts_bytes, &mut concatenated));
        }

        let playlist = build_playlist(&segments, config, None);
        let playlist_text = config.generate_playlist.then(|| write_media_playlist(&playlist));

        Ok(SegmentationResult {
            init_segment_bytes: None,
            segments,
            playlist_text,
            concatenated_bytes: (config.output_mode == OutputMode::ByteRange).then_some(concatenated),
        })
    }
}

struct TsEntry {
    pts_90k: i64,
    dts_90k: Option<u64>,
    is_keyframe: bool,
    is_video: bool,
    offset: u64,
    size: u32,
}

fn to_90khz(ticks: i64, timescale: u32) -> i64 {
    (ticks as i128 * 90_000 / timescale as i128) as i64
}

fn plan_time_window(plan: SegmentPlan, driving_timescale: u32) -> (f64, f64) {
    let start = plan.start_dts_ticks as f64 / driving_timescale as f64;
    (start, start + plan.duration_seconds)
}

/// Slices a companion (non-driving) track to the driving track's
/// `[start_time, end_time)` window, converting seconds into the
/// companion track's own timescale first.
fn companion_sample_range(loc: &SampleLocator, start_time: f64, end_time: f64) -> (u32, u32) {
    let start_ticks = (start_time * loc.timescale() as f64).round() as u64;
    let end_ticks = (end_time * loc.timescale() as f64).round() as u64;
    loc.samples_in_tick_range(start_ticks, end_ticks)
}

fn finish_segment(
    config: &SegmentationConfig,
    index: usize,
    duration_seconds: f64,
    bytes: Vec<u8>,
    concatenated: &mut Vec<u8>,
) -> MediaSegmentOutput {
    let name = config.segment_name(index);
    let length = bytes.len() as u64;
    if config.output_mode == OutputMode::ByteRange {
        let offset = concatenated.len() as u64;
        concatenated.extend_from_slice(&bytes);
        MediaSegmentOutput {
            name,
            bytes: Vec::new(),
            duration_seconds,
            offset: Some(offset),
            length,
        }
    } else {
        MediaSegmentOutput {
            name,
            bytes,
            duration_seconds,
            offset: None,
            length,
        }
    }
}

fn build_playlist(segments: &[MediaSegmentOutput], config: &SegmentationConfig, init_name: Option<&str>) -> MediaPlaylist {
    let target_duration = segments
        .iter()
        .map(|s| s.duration_seconds)
        .fold(0.0_f64, f64::max)
        .ceil() as u32;

    let mut playlist = MediaPlaylist {
        version: config.hls_version(),
        target_duration: target_duration.max(1),
        independent_segments: true,
        playlist_type: Some(config.playlist_type),
        ended: config.playlist_type == PlaylistType::Vod,
        ..Default::default()
    };

    for (i, seg) in segments.iter().enumerate() {
        let mut media_segment = MediaSegment::new(seg.duration_seconds, seg.name.clone());
        if i == 0 {
            if let Some(init) = init_name {
                media_segment.map = Some(PlaylistMap {
                    uri: init.to_string(),
                    byte_range: None,
                });
            }
        }
        if let Some(offset) = seg.offset {
            media_segment.byte_range = Some(ByteRange {
                length: seg.length,
                offset: Some(offset),
            });
        }
        playlist.segments.push(media_segment);
    }
    playlist
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::Writer;
    use crate::isobmff::test_fixtures::ftyp_box;

    /// Builds a minimal single-track AVC mp4 with `sample_count` 1-byte
    /// samples, one keyframe at the start, uniform `sample_delta` ticks
    /// apart at `timescale`. No `mdat` box is included: sample bytes live
    /// directly in `source` at offsets matching `stco`, mirroring how a
    /// real captured file's `mdat` payload would be read without ever
    /// materializing it through the box tree.
    fn build_video_only_fixture(sample_count: u32, timescale: u32, sample_delta: u32) -> Vec<u8> {
        build_video_only_fixture_with_keyframes(sample_count, timescale, sample_delta, sample_count)
    }

    /// Like [`build_video_only_fixture`] but with a sync sample (keyframe)
    /// every `keyframe_interval` samples instead of only at the start.
    fn build_video_only_fixture_with_keyframes(sample_count: u32, timescale: u32, sample_delta: u32, keyframe_interval: u32) -> Vec<u8> {
        let avcc_payload = {
            let mut w = Writer::new();
            w.write_u8(1);
            w.write_u8(0x42);
            w.write_u8(0xC0);
            w.write_u8(0x1E);
            w.write_u8(0xFF); // lengthSizeMinusOne = 3 -> length_size = 4
            w.write_u8(0xE1); // 1 SPS
            w.write_u16(2);
            w.write_bytes(&[0x67, 0x42]);
            w.write_u8(1); // 1 PPS
            w.write_u16(2);
            w.write_bytes(&[0x68, 0xCE]);
            w.into_bytes()
        };
        let mut avcc = Writer::new();
        avcc.write_box("avcC", &avcc_payload);

        let mut avc1_fixed = vec![0u8; 78];
        avc1_fixed[0..6].fill(0); // reserved
        let mut stsd_entry_payload = avc1_fixed;
        stsd_entry_payload.extend_from_slice(&avcc.into_bytes());
        let entry_total = 8 + stsd_entry_payload.len(); // size+codec header + fixed+children

        let mut stsd_entry = Vec::new();
        stsd_entry.extend_from_slice(&(entry_total as u32).to_be_bytes());
        stsd_entry.extend_from_slice(b"avc1");
        stsd_entry.extend_from_slice(&stsd_entry_payload);

        let mut stsd_payload = Writer::new();
        stsd_payload.zeros(4);
        stsd_payload.write_u32(1);
        stsd_payload.write_bytes(&stsd_entry);
        let mut stsd = Writer::new();
        stsd.write_box("stsd", &stsd_payload.into_bytes());

        let mut stts_payload = Writer::new();
        stts_payload.zeros(4);
        stts_payload.write_u32(1);
        stts_payload.write_u32(sample_count);
        stts_payload.write_u32(sample_delta);
        let mut stts = Writer::new();
        stts.write_box("stts", &stts_payload.into_bytes());

        let mut stsc_payload = Writer::new();
        stsc_payload.zeros(4);
        stsc_payload.write_u32(1);
        stsc_payload.write_u32(1);
        stsc_payload.write_u32(sample_count);
        stsc_payload.write_u32(1);
        let mut stsc = Writer::new();
        stsc.write_box("stsc", &stsc_payload.into_bytes());

        let mut stsz_payload = Writer::new();
        stsz_payload.zeros(4);
        stsz_payload.write_u32(1); // uniform_size
        stsz_payload.write_u32(sample_count);
        let mut stsz = Writer::new();
        stsz.write_box("stsz", &stsz_payload.into_bytes());

        // stco offsets are assigned after the full header is laid out
        // below, once we know the mdat-equivalent region's start.
        let sync_samples: Vec<u32> = (0..sample_count).step_by(keyframe_interval as usize).map(|i| i + 1).collect();
        let mut stss_payload = Writer::new();
        stss_payload.zeros(4);
        stss_payload.write_u32(sync_samples.len() as u32);
        for s in &sync_samples {
            stss_payload.write_u32(*s); // 1-based sample index
        }
        let mut stss = Writer::new();
        stss.write_box("stss", &stss_payload.into_bytes());

        let stsd_bytes = stsd.into_bytes();
        let stts_bytes = stts.into_bytes();
        let stsc_bytes = stsc.into_bytes();
        let stsz_bytes = stsz.into_bytes();
        let stss_bytes = stss.into_bytes();

        // mdhd/hdlr/minf wrapping, mirroring parse_track's expectations.
        let mut mdhd_payload = Writer::new();
        mdhd_payload.zeros(4); // version(1) + flags(3)
        mdhd_payload.zeros(8); // creation_time(4) + modification_time(4), version 0
        mdhd_payload.write_u32(timescale);
        mdhd_payload.write_u32(sample_count * sample_delta);
        mdhd_payload.write_u16(0x55C4); // "und"
        mdhd_payload.write_u16(0);
        let mut mdhd = Writer::new();
        mdhd.write_box("mdhd", &mdhd_payload.into_bytes());

        let mut hdlr_payload = Writer::new();
        hdlr_payload.zeros(4); // version(1) + flags(3)
        hdlr_payload.zeros(4); // pre_defined
        hdlr_payload.write_4cc("vide");
        hdlr_payload.zeros(12); // reserved
        hdlr_payload.write_bytes(b"VideoHandler\0");
        let mut hdlr = Writer::new();
        hdlr.write_box("hdlr", &hdlr_payload.into_bytes());

        let mut vmhd_payload = Writer::new();
        vmhd_payload.zeros(8);
        let mut vmhd = Writer::new();
        vmhd.write_box("vmhd", &vmhd_payload.into_bytes());

        let mut dref_payload = Writer::new();
        dref_payload.zeros(4);
        dref_payload.write_u32(0);
        let mut dref = Writer::new();
        dref.write_box("dref", &dref_payload.into_bytes());
        let mut dinf = Writer::new();
        dinf.write_container("dinf", &[dref.into_bytes()]);

        // stco's single chunk-offset value is patched in below, once the
        // absolute file offset of the sample data is known. Patching that
        // 4-byte value never changes any box's size, so every length
        // computed here (and thus the patch position itself) stays valid
        // regardless of the placeholder value used up front.
        let stco_bytes = build_stco(&[0]);

        let vmhd_bytes = vmhd.into_bytes();
        let dinf_bytes = dinf.into_bytes();

        // Absolute offset of the stco payload's single 4-byte chunk-offset
        // value within the final file, computed as a prefix sum through
        // each container's own 8-byte header plus its preceding siblings'
        // bytes. `stco_bytes.len() - 4` is the offset value's position
        // within the stco box itself (full box header(12) + entry(4)).
        let stco_value_in_stbl = 8
            + stsd_bytes.len()
            + stts_bytes.len()
            + stsc_bytes.len()
            + stsz_bytes.len()
            + stss_bytes.len()
            + (stco_bytes.len() - 4);
        let stbl_len = 8 + stsd_bytes.len() + stts_bytes.len() + stsc_bytes.len() + stsz_bytes.len() + stss_bytes.len() + stco_bytes.len();
        let stco_value_in_minf = 8 + vmhd_bytes.len() + dinf_bytes.len() + stco_value_in_stbl;
        let minf_len = 8 + vmhd_bytes.len() + dinf_bytes.len() + stbl_len;

        let mdhd_bytes = mdhd.into_bytes();
        let hdlr_bytes = hdlr.into_bytes();
        let stco_value_in_mdia = 8 + mdhd_bytes.len() + hdlr_bytes.len() + stco_value_in_minf;
        let mdia_len = 8 + mdhd_bytes.len() + hdlr_bytes.len() + minf_len;

        let mut stbl = Writer::new();
        stbl.write_container("stbl", &[stsd_bytes, stts_bytes, stsc_bytes, stsz_bytes, stss_bytes, stco_bytes]);
        let mut minf = Writer::new();
        minf.write_container("minf", &[vmhd_bytes, dinf_bytes, stbl.into_bytes()]);
        let mut mdia = Writer::new();
        mdia.write_container("mdia", &[mdhd_bytes, hdlr_bytes, minf.into_bytes()]);
        let mdia_bytes = mdia.into_bytes();
        assert_eq!(mdia_bytes.len(), mdia_len);

        let mut tkhd_payload = Writer::new();
        tkhd_payload.zeros(4); // version(1) + flags(3)
        tkhd_payload.zeros(8); // creation_time(4) + modification_time(4), version 0
        tkhd_payload.write_u32(1); // track_id
        tkhd_payload.zeros(4);
        tkhd_payload.write_u32(sample_count * sample_delta);
        tkhd_payload.zeros(8);
        tkhd_payload.write_u16(0);
        tkhd_payload.write_u16(0);
        tkhd_payload.write_u16(0);
        tkhd_payload.zeros(2);
        for v in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
            tkhd_payload.write_u32(v);
        }
        tkhd_payload.write_u32(1280 << 16);
        tkhd_payload.write_u32(720 << 16);
        let mut tkhd = Writer::new();
        tkhd.write_box("tkhd", &tkhd_payload.into_bytes());
        let tkhd_bytes = tkhd.into_bytes();

        let stco_value_in_trak = 8 + tkhd_bytes.len() + stco_value_in_mdia;
        let trak_len = 8 + tkhd_bytes.len() + mdia_len;

        let mut trak = Writer::new();
        trak.write_container("trak", &[tkhd_bytes, mdia_bytes]);
        let trak_bytes = trak.into_bytes();
        assert_eq!(trak_bytes.len(), trak_len);

        let mut mvhd_payload = Writer::new();
        mvhd_payload.zeros(4); // version(1) + flags(3)
        mvhd_payload.zeros(8); // creation_time(4) + modification_time(4), version 0
        mvhd_payload.write_u32(timescale);
        mvhd_payload.write_u32(sample_count * sample_delta);
        mvhd_payload.write_u32(0x0001_0000);
        mvhd_payload.write_u16(0x0100);
        mvhd_payload.zeros(10);
        for v in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
            mvhd_payload.write_u32(v);
        }
        mvhd_payload.zeros(24);
        mvhd_payload.write_u32(2);
        let mut mvhd = Writer::new();
        mvhd.write_box("mvhd", &mvhd_payload.into_bytes());
        let mvhd_bytes = mvhd.into_bytes();

        let stco_value_in_moov = 8 + mvhd_bytes.len() + stco_value_in_trak;

        let mut moov = Writer::new();
        moov.write_container("moov", &[mvhd_bytes, trak_bytes]);
        let mut moov_bytes = moov.into_bytes();

        let ftyp_bytes = ftyp_box("isom", &["iso6", "mp41"]);
        let header_len = ftyp_bytes.len() + moov_bytes.len();

        moov_bytes[stco_value_in_moov..stco_value_in_moov + 4].copy_from_slice(&(header_len as u32).to_be_bytes());

        let mut sample_bytes = Vec::with_capacity(sample_count as usize * 5);
        for i in 0..sample_count {
            // 4-byte length prefix (1) + 1 NAL byte, all length_size=4.
            sample_bytes.extend_from_slice(&1u32.to_be_bytes());
            sample_bytes.push(if i == 0 { 0x65 } else { 0x41 });
        }

        let mut out = Vec::new();
        out.extend_from_slice(&ftyp_bytes);
        out.extend_from_slice(&moov_bytes);
        out.extend_from_slice(&sample_bytes);
        out
    }

    fn build_stco(offsets: &[u64]) -> Vec<u8> {
        let mut payload = Writer::new();
        payload.zeros(4);
        payload.write_u32(offsets.len() as u32);
        for &o in offsets {
            payload.write_u32(o as u32);
        }
        let mut w = Writer::new();
        w.write_box("stco", &payload.into_bytes());
        w.into_bytes()
    }

    #[test]
    fn segments_video_only_fmp4_into_multiple_keyframe_aligned_segments() {
        // 90 samples, 3000 ticks/sample @ 90000 timescale = 3s total,
        // a keyframe every 5 samples (1/6s). A 1.0s target accumulates
        // across several keyframe boundaries per segment, yielding more
        // than one segment overall.
        let source = build_video_only_fixture_with_keyframes(90, 90000, 3000, 5);
        let config = SegmentationConfig {
            include_audio: false,
            target_segment_duration: 1.0,
            ..Default::default()
        };
        let result = Segmenter::segment(&source, &config).unwrap();
        assert!(result.init_segment_bytes.is_some());
        assert!(result.segments.len() > 1);
        for seg in &result.segments {
            assert!(seg.duration_seconds >= 1.0 - 1e-9);
        }
        let total: f64 = result.segments.iter().map(|s| s.duration_seconds).sum();
        assert!((total - 3.0).abs() < 1e-6);
        for seg in &result.segments {
            assert!(!seg.bytes.is_empty());
        }
        let playlist_text = result.playlist_text.unwrap();
        assert!(playlist_text.contains("#EXT-X-MAP"));
        assert!(playlist_text.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn byte_range_mode_concatenates_segments_and_omits_per_segment_bytes() {
        let source = build_video_only_fixture(10, 90000, 3000);
        let config = SegmentationConfig {
            include_audio: false,
            target_segment_duration: 10.0,
            output_mode: OutputMode::ByteRange,
            ..Default::default()
        };
        let result = Segmenter::segment(&source, &config).unwrap();
        assert_eq!(result.segments.len(), 1);
        assert!(result.segments[0].bytes.is_empty());
        assert_eq!(result.segments[0].offset, Some(0));
        let concatenated = result.concatenated_bytes.unwrap();
        assert_eq!(concatenated.len() as u64, result.segments[0].length);
    }

    #[test]
    fn no_selectable_track_is_an_error() {
        let ftyp_bytes = ftyp_box("isom", &["iso6"]);
        let mut moov = Writer::new();
        let mut mvhd_payload = Writer::new();
        mvhd_payload.zeros(4); // version(1) + flags(3)
        mvhd_payload.zeros(8); // creation_time(4) + modification_time(4), version 0
        mvhd_payload.write_u32(1000);
        mvhd_payload.write_u32(0);
        mvhd_payload.write_u32(0);
        mvhd_payload.write_u16(0);
        mvhd_payload.zeros(10);
        for v in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
            mvhd_payload.write_u32(v);
        }
        mvhd_payload.zeros(24);
        mvhd_payload.write_u32(1);
        let mut mvhd = Writer::new();
        mvhd.write_box("mvhd", &mvhd_payload.into_bytes());
        moov.write_container("moov", &[mvhd.into_bytes()]);

        let mut source = Vec::new();
        source.extend_from_slice(&ftyp_bytes);
        source.extend_from_slice(&moov.into_bytes());

        let err = Segmenter::segment(&source, &SegmentationConfig::default()).unwrap_err();
        assert_eq!(err, SegmenterError::NoVideoOrAudio);
    }
}
