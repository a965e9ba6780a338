//! Init-segment and media-segment synthesis. Spec §4.6.

use crate::binary::Writer;
use crate::error::ContainerError;
use crate::isobmff::file_info::{FileInfo, MediaType, TrackInfo};
use crate::isobmff::sample_locator::SegmentPlan;

/// Sample flags for sync / non-sync samples in a `trun`, per spec §4.6.
const SAMPLE_FLAGS_SYNC: u32 = 0x0200_0000;
const SAMPLE_FLAGS_NON_SYNC: u32 = 0x0101_0000;

/// One track's contribution to a media segment: the segment plan, each
/// sample's track-tick duration, and each sample's `(file_offset, size)`
/// range in the source buffer. All three per-sample slices have the same
/// length as `plan.sample_count`.
pub struct TrafInput<'a> {
    pub track_id: u32,
    pub plan: SegmentPlan,
    pub sample_durations: &'a [u32],
    pub sample_ranges: &'a [(u64, u32)],
}

pub struct FMP4Writer;

impl FMP4Writer {
    /// Emits the init segment: `ftyp(isom, 0x200, [isom, iso6, mp41]) ||
    /// moov(mvhd, trak+, mvex(trex+))`. `tracks` must already have
    /// cover-art tracks filtered out by the caller (spec §4.11 step 2).
    pub fn write_init_segment(
        file_info: &FileInfo,
        tracks: &[&TrackInfo],
    ) -> Result<Vec<u8>, ContainerError> {
        let mut w = Writer::new();

        let mut ftyp_payload = Writer::new();
        ftyp_payload.write_4cc("isom");
        ftyp_payload.write_u32(0x200);
        ftyp_payload.write_4cc("isom");
        ftyp_payload.write_4cc("iso6");
        ftyp_payload.write_4cc("mp41");
        w.write_box("ftyp", &ftyp_payload.into_bytes());

        let next_track_id = tracks.iter().map(|t| t.track_id).max().unwrap_or(0) + 1;

        let mvhd = build_mvhd(file_info.timescale, next_track_id);
        let mut trak_boxes = Vec::with_capacity(tracks.len());
        for t in tracks {
            trak_boxes.push(build_trak(t));
        }
        let trex_boxes: Vec<Vec<u8>> = tracks.iter().map(|t| build_trex(t.track_id)).collect();
        let mut mvex = Writer::new();
        mvex.write_container("mvex", &trex_boxes);

        let mut moov_children = vec![mvhd];
        moov_children.extend(trak_boxes);
        moov_children.push(mvex.into_bytes());

        let mut moov = Writer::new();
        moov.write_container("moov", &moov_children);
        w.write_bytes(moov.into_bytes().as_slice());

        Ok(w.into_bytes())
    }

    /// Emits one media segment (`moof || mdat`) for `sequence_number`
    /// (1-based `mfhd` sequence), with one `traf` per `TrafInput`. Sample
    /// bytes are concatenated into a single trailing `mdat` in the same
    /// track order as `inputs`, and each traf's `trun.data_offset` is
    /// patched to point at that track's first byte within `mdat`,
    /// relative to the start of the enclosing `moof`, per spec §4.6.
    pub fn write_media_segment(
        sequence_number: u32,
        inputs: &[TrafInput],
        source: &[u8],
    ) -> Result<Vec<u8>, ContainerError> {
        let mut mfhd_payload = Writer::new();
        mfhd_payload.zeros(4);
        mfhd_payload.write_u32(sequence_number);
        let mut mfhd = Writer::new();
        mfhd.write_box("mfhd", &mfhd_payload.into_bytes());

        let mut traf_entries = Vec::with_capacity(inputs.len());
        for input in inputs {
            traf_entries.push(build_traf(input));
        }

        let mut moof_children = vec![mfhd.into_bytes()];
        moof_children.extend(traf_entries.iter().map(|(bytes, _)| bytes.clone()));
        let mut moof = Writer::new();
        moof.write_container("moof", &moof_children);
        let mut moof_bytes = moof.into_bytes();

        let moof_size = moof_bytes.len() as u32;
        let mut running_offset = moof_size + 8; // first mdat payload byte

        let mut mdat_payload = Vec::new();
        let mut traf_abs_start = 8usize; // past moof header
        traf_abs_start += box_total_len(&moof_bytes, traf_abs_start); // skip mfhd

        for (input, (traf_bytes, data_offset_pos)) in inputs.iter().zip(traf_entries.iter()) {
            let abs_patch_pos = traf_abs_start + data_offset_pos;
            moof_bytes[abs_patch_pos..abs_patch_pos + 4].copy_from_slice(&running_offset.to_be_bytes());

            let mut track_bytes = 0u32;
            for &(offset, size) in input.sample_ranges {
                let start = offset as usize;
                let end = start + size as usize;
                let bytes = source.get(start..end).ok_or_else(|| ContainerError::InvalidBoxData {
                    box_type: "mdat".to_string(),
                    reason: "sample range out of bounds".to_string(),
                })?;
                mdat_payload.extend_from_slice(bytes);
                track_bytes += size;
            }
            running_offset += track_bytes;
            traf_abs_start += traf_bytes.len();
        }

        let mut w = Writer::new();
        w.write_bytes(&moof_bytes);
        w.write_box("mdat", &mdat_payload);
        Ok(w.into_bytes())
    }
}

fn box_total_len(buf: &[u8], at: usize) -> usize {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]) as usize
}

fn build_mvhd(timescale: u32, next_track_id: u32) -> Vec<u8> {
    let mut payload = Writer::new();
    payload.zeros(8); // creation + modification time
    payload.write_u32(timescale);
    payload.write_u32(0); // duration, fragmented
    payload.write_u32(0x0001_0000); // rate 1.0
    payload.write_u16(0x0100); // volume 1.0
    payload.zeros(2); // reserved
    payload.zeros(8); // reserved[2]
    for v in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        payload.write_u32(v);
    }
    payload.zeros(24); // pre_defined
    payload.write_u32(next_track_id);
    let mut w = Writer::new();
    w.write_full_box("mvhd", 0, 0, &payload.into_bytes());
    w.into_bytes()
}

fn encode_language(lang: Option<&str>) -> u16 {
    let lang = lang.unwrap_or("und");
    let bytes = lang.as_bytes();
    let c = |i: usize| -> u16 { (*bytes.get(i).unwrap_or(&b'u') as u16).saturating_sub(0x60) & 0x1f };
    (c(0) << 10) | (c(1) << 5) | c(2)
}

fn build_trak(track: &TrackInfo) -> Vec<u8> {
    let tkhd = build_tkhd(track);
    let mdhd = build_mdhd(track);
    let hdlr = build_hdlr(track.media_type);
    let minf = build_minf(track);

    let mut mdia = Writer::new();
    mdia.write_container("mdia", &[mdhd, hdlr, minf]);

    let mut trak = Writer::new();
    trak.write_container("trak", &[tkhd, mdia.into_bytes()]);
    trak.into_bytes()
}

fn build_tkhd(track: &TrackInfo) -> Vec<u8> {
    let mut payload = Writer::new();
    payload.zeros(8); // creation + modification time
    payload.write_u32(track.track_id);
    payload.zeros(4); // reserved
    payload.write_u32(0); // duration, fragmented
    payload.zeros(8); // reserved[2]
    payload.write_u16(0); // layer
    payload.write_u16(0); // alternate_group
    payload.write_u16(if track.media_type == MediaType::Audio { 0x0100 } else { 0 }); // volume
    payload.zeros(2); // reserved
    for v in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        payload.write_u32(v);
    }
    let width = track.width.unwrap_or(0.0);
    let height = track.height.unwrap_or(0.0);
    payload.write_u32((width * 65536.0) as u32);
    payload.write_u32((height * 65536.0) as u32);

    let mut w = Writer::new();
    // flags 0x000003: track_enabled | track_in_movie
    w.write_full_box("tkhd", 0, 0x000003, &payload.into_bytes());
    w.into_bytes()
}

fn build_mdhd(track: &TrackInfo) -> Vec<u8> {
    let mut payload = Writer::new();
    payload.zeros(8); // creation + modification time
    payload.write_u32(track.timescale);
    payload.write_u32(0); // duration, fragmented
    payload.write_u16(encode_language(track.language.as_deref()));
    payload.write_u16(0); // pre_defined
    let mut w = Writer::new();
    w.write_full_box("mdhd", 0, 0, &payload.into_bytes());
    w.into_bytes()
}

fn handler_name(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Video => "VideoHandler",
        MediaType::Audio => "SoundHandler",
        MediaType::Subtitle => "SubtitleHandler",
        MediaType::Text => "TextHandler",
        MediaType::Unknown => "Handler",
    }
}

fn handler_fourcc(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Video => "vide",
        MediaType::Audio => "soun",
        MediaType::Subtitle => "sbtl",
        MediaType::Text => "text",
        MediaType::Unknown => "hdlr",
    }
}

fn build_hdlr(media_type: MediaType) -> Vec<u8> {
    let mut payload = Writer::new();
    payload.zeros(4); // pre_defined
    payload.write_4cc(handler_fourcc(media_type));
    payload.zeros(12); // reserved[3]
    payload.write_bytes(handler_name(media_type).as_bytes());
    payload.write_u8(0); // NUL terminator
    let mut w = Writer::new();
    w.write_full_box("hdlr", 0, 0, &payload.into_bytes());
    w.into_bytes()
}

fn build_minf(track: &TrackInfo) -> Vec<u8> {
    let media_header = match track.media_type {
        MediaType::Video => build_vmhd(),
        _ => build_smhd(),
    };
    let dinf = build_dinf();
    let stbl = build_empty_stbl(track.stsd_payload);

    let mut minf = Writer::new();
    minf.write_container("minf", &[media_header, dinf, stbl]);
    minf.into_bytes()
}

fn build_vmhd() -> Vec<u8> {
    let mut payload = Writer::new();
    payload.zeros(8); // graphicsmode(2) + opcolor(6)
    let mut w = Writer::new();
    w.write_full_box("vmhd", 0, 0x000001, &payload.into_bytes());
    w.into_bytes()
}

fn build_smhd() -> Vec<u8> {
    let mut payload = Writer::new();
    payload.zeros(4); // balance(2) + reserved(2)
    let mut w = Writer::new();
    w.write_full_box("smhd", 0, 0, &payload.into_bytes());
    w.into_bytes()
}

fn build_dinf() -> Vec<u8> {
    let mut url_box = Writer::new();
    url_box.write_full_box("url ", 0, 0x000001, &[]);

    let mut dref_payload = Writer::new();
    dref_payload.zeros(4); // version+flags
    dref_payload.write_u32(1); // entry_count
    dref_payload.write_bytes(&url_box.into_bytes());
    let mut dref = Writer::new();
    dref.write_box("dref", &dref_payload.into_bytes());

    let mut dinf = Writer::new();
    dinf.write_container("dinf", &[dref.into_bytes()]);
    dinf.into_bytes()
}

/// An empty `stbl` for the init segment: preserves the source `stsd`, and
/// otherwise carries zero-entry sample tables, per spec §4.6.
fn build_empty_stbl(stsd_payload: &[u8]) -> Vec<u8> {
    let mut stsd = Writer::new();
    stsd.write_box("stsd", stsd_payload);

    let mut stts_payload = Writer::new();
    stts_payload.zeros(4);
    stts_payload.write_u32(0);
    let mut stts = Writer::new();
    stts.write_box("stts", &stts_payload.into_bytes());

    let mut stsc_payload = Writer::new();
    stsc_payload.zeros(4);
    stsc_payload.write_u32(0);
    let mut stsc = Writer::new();
    stsc.write_box("stsc", &stsc_payload.into_bytes());

    let mut stsz_payload = Writer::new();
    stsz_payload.zeros(4);
    stsz_payload.write_u32(0); // sample_size
    stsz_payload.write_u32(0); // sample_count
    let mut stsz = Writer::new();
    stsz.write_box("stsz", &stsz_payload.into_bytes());

    let mut stco_payload = Writer::new();
    stco_payload.zeros(4);
    stco_payload.write_u32(0);
    let mut stco = Writer::new();
    stco.write_box("stco", &stco_payload.into_bytes());

    let mut stbl = Writer::new();
    stbl.write_container(
        "stbl",
        &[
            stsd.into_bytes(),
            stts.into_bytes(),
            stsc.into_bytes(),
            stsz.into_bytes(),
            stco.into_bytes(),
        ],
    );
    stbl.into_bytes()
}

fn build_trex(track_id: u32) -> Vec<u8> {
    let mut payload = Writer::new();
    payload.write_u32(track_id);
    payload.write_u32(1); // default_sample_description_index
    payload.write_u32(0); // default_sample_duration
    payload.write_u32(0); // default_sample_size
    payload.write_u32(0); // default_sample_flags
    let mut w = Writer::new();
    w.write_full_box("trex", 0, 0, &payload.into_bytes());
    w.into_bytes()
}

/// trun flags: data-offset-present | first-sample-flags-present |
/// sample-duration-present | sample-size-present | sample-flags-present.
const TRUN_FLAGS: u32 = 0x000001 | 0x000004 | 0x000100 | 0x000200 | 0x000400;

/// Builds one `traf` for `input`, returning the traf bytes and the byte
/// offset (relative to the start of this traf) of the `trun.data_offset`
/// field so the caller can patch it once the final moof layout is known.
fn build_traf(input: &TrafInput) -> (Vec<u8>, usize) {
    let mut tfhd_payload = Writer::new();
    tfhd_payload.write_u32(input.track_id);
    let mut tfhd = Writer::new();
    tfhd.write_full_box("tfhd", 0, 0, &tfhd_payload.into_bytes());

    let mut tfdt_payload = Writer::new();
    tfdt_payload.write_u64(input.plan.start_dts_ticks);
    let mut tfdt = Writer::new();
    tfdt.write_full_box("tfdt", 1, 0, &tfdt_payload.into_bytes());

    let mut trun_payload = Writer::new();
    trun_payload.write_u32(input.plan.sample_count);
    let data_offset_pos_in_payload = trun_payload.len();
    trun_payload.write_i32(0); // data_offset placeholder, patched by caller

    let first_sample_flags = if input.plan.starts_with_keyframe {
        SAMPLE_FLAGS_SYNC
    } else {
        SAMPLE_FLAGS_NON_SYNC
    };
    trun_payload.write_u32(first_sample_flags);

    for (i, (&duration, &(_, size))) in input
        .sample_durations
        .iter()
        .zip(input.sample_ranges.iter())
        .enumerate()
    {
        trun_payload.write_u32(duration);
        trun_payload.write_u32(size);
        let flags = if i == 0 {
            first_sample_flags
        } else {
            SAMPLE_FLAGS_NON_SYNC
        };
        trun_payload.write_u32(flags);
    }

    let mut trun = Writer::new();
    trun.write_full_box("trun", 0, TRUN_FLAGS, &trun_payload.into_bytes());

    let traf_header_overhead = 8usize;
    let tfhd_len = tfhd.len();
    let tfdt_len = tfdt.len();
    let trun_box_header_overhead = 12usize; // box header(8) + version/flags(4)
    let data_offset_abs_in_traf =
        traf_header_overhead + tfhd_len + tfdt_len + trun_box_header_overhead + data_offset_pos_in_payload;

    let mut traf = Writer::new();
    traf.write_container("traf", &[tfhd.into_bytes(), tfdt.into_bytes(), trun.into_bytes()]);
    (traf.into_bytes(), data_offset_abs_in_traf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_track() -> TrackInfo<'static> {
        TrackInfo {
            track_id: 1,
            media_type: MediaType::Video,
            timescale: 90000,
            duration: 270000,
            language: None,
            codec: "avc1".to_string(),
            width: Some(1280.0),
            height: Some(720.0),
            stsd_payload: &[0u8; 16],
            has_sync_samples: true,
            stbl: dummy_stbl(),
        }
    }

    fn dummy_stbl() -> crate::isobmff::BBox<'static> {
        crate::isobmff::BBox {
            box_type: "stbl".to_string(),
            total_size: 8,
            header_size: 8,
            file_offset: 0,
            payload: None,
            children: vec![],
        }
    }

    #[test]
    fn init_segment_starts_with_ftyp_then_moov() {
        let file_info = FileInfo {
            timescale: 90000,
            duration: 270000,
            major_brand: "isom".to_string(),
            compatible_brands: vec!["iso6".to_string()],
            tracks: vec![],
        };
        let track = video_track();
        let bytes = FMP4Writer::write_init_segment(&file_info, &[&track]).unwrap();
        assert_eq!(&bytes[4..8], b"ftyp");
        let ftyp_size = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(&bytes[ftyp_size + 4..ftyp_size + 8], b"moov");
    }

    #[test]
    fn media_segment_is_moof_then_mdat_with_patched_data_offset() {
        let plan = SegmentPlan {
            first_sample_index: 0,
            sample_count: 2,
            duration_seconds: 1.0,
            start_dts_ticks: 0,
            start_pts_ticks: 0,
            starts_with_keyframe: true,
        };
        let durations = [3000u32, 3000];
        let ranges = [(0u64, 4u32), (4u64, 4u32)];
        let source = [0xAAu8, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x11, 0x22];
        let input = TrafInput {
            track_id: 1,
            plan,
            sample_durations: &durations,
            sample_ranges: &ranges,
        };
        let bytes = FMP4Writer::write_media_segment(1, &[input], &source).unwrap();
        assert_eq!(&bytes[4..8], b"moof");
        let moof_size = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(&bytes[moof_size + 4..moof_size + 8], b"mdat");
        let mdat_payload = &bytes[moof_size + 8..];
        assert_eq!(mdat_payload, &source[..]);
    }

    #[test]
    fn two_tracks_concatenate_into_one_mdat_in_order() {
        let plan = SegmentPlan {
            first_sample_index: 0,
            sample_count: 1,
            duration_seconds: 1.0,
            start_dts_ticks: 0,
            start_pts_ticks: 0,
            starts_with_keyframe: true,
        };
        let video_durations = [3000u32];
        let video_ranges = [(0u64, 2u32)];
        let audio_durations = [1024u32];
        let audio_ranges = [(2u64, 2u32)];
        let source = [0x01u8, 0x02, 0x03, 0x04];
        let inputs = [
            TrafInput {
                track_id: 1,
                plan,
                sample_durations: &video_durations,
                sample_ranges: &video_ranges,
            },
            TrafInput {
                track_id: 2,
                plan,
                sample_durations: &audio_durations,
                sample_ranges: &audio_ranges,
            },
        ];
        let bytes = FMP4Writer::write_media_segment(1, &inputs, &source).unwrap();
        let moof_size = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let mdat_payload = &bytes[moof_size + 8..];
        assert_eq!(mdat_payload, &source[..]);
    }
}
