//! M3U8 serialization of [`Playlist`] values, spec §4.12. As in
//! `parser.rs`, the core grammar (`EXTINF`, byte ranges, `EXT-X-PART`,
//! preload hints, `EXT-X-STREAM-INF`) is built as typed `m3u8-rs`
//! structs and rendered with its own writer; the LL-HLS/encryption
//! surface it doesn't model is spliced in as plain text lines anchored
//! on the segment/variant boundaries that writer already produced.

use crate::playlist::model::*;
use std::fmt::Write as _;

fn byte_range_attr(br: &ByteRange) -> String {
    match br.offset {
        Some(offset) => format!("{}@{}", br.length, offset),
        None => br.length.to_string(),
    }
}

/// Extra tags attached to one segment that `m3u8-rs`'s `MediaSegment`
/// doesn't carry, rendered as standalone lines inserted before that
/// segment's `#EXTINF`.
fn segment_extension_lines(segment: &MediaSegment) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(dr) = &segment.date_range {
        let mut attrs = format!("ID=\"{}\",START-DATE=\"{}\"", dr.id, dr.start_date);
        if let Some(class) = &dr.class {
            let _ = write!(attrs, ",CLASS=\"{class}\"");
        }
        if let Some(end) = &dr.end_date {
            let _ = write!(attrs, ",END-DATE=\"{end}\"");
        }
        if let Some(d) = dr.duration {
            let _ = write!(attrs, ",DURATION={d:.5}");
        }
        if let Some(pd) = dr.planned_duration {
            let _ = write!(attrs, ",PLANNED-DURATION={pd:.5}");
        }
        if dr.end_on_next {
            attrs.push_str(",END-ON-NEXT=YES");
        }
        lines.push(format!("#EXT-X-DATERANGE:{attrs}"));
    }
    if let Some(key) = &segment.key {
        let mut attrs = format!("METHOD={}", key.method);
        if let Some(uri) = &key.uri {
            let _ = write!(attrs, ",URI=\"{uri}\"");
        }
        if let Some(iv) = &key.iv {
            let _ = write!(attrs, ",IV={iv}");
        }
        if let Some(kf) = &key.keyformat {
            let _ = write!(attrs, ",KEYFORMAT=\"{kf}\"");
        }
        if let Some(kfv) = &key.keyformatversions {
            let _ = write!(attrs, ",KEYFORMATVERSIONS=\"{kfv}\"");
        }
        lines.push(format!("#EXT-X-KEY:{attrs}"));
    }
    if let Some(map) = &segment.map {
        let mut attrs = format!("URI=\"{}\"", map.uri);
        if let Some(br) = &map.byte_range {
            let _ = write!(attrs, ",BYTERANGE=\"{}\"", byte_range_attr(br));
        }
        lines.push(format!("#EXT-X-MAP:{attrs}"));
    }
    if let Some(pdt) = &segment.program_date_time {
        lines.push(format!("#EXT-X-PROGRAM-DATE-TIME:{pdt}"));
    }
    if let Some(bitrate) = segment.bitrate {
        lines.push(format!("#EXT-X-BITRATE:{bitrate}"));
    }
    if segment.is_gap {
        lines.push("#EXT-X-GAP".to_string());
    }
    lines
}

fn to_m3u8_byte_range(br: &ByteRange) -> m3u8_rs::ByteRange {
    m3u8_rs::ByteRange {
        length: br.length,
        offset: br.offset,
    }
}

fn to_m3u8_part(part: &PartialSegment) -> m3u8_rs::Part {
    m3u8_rs::Part {
        uri: part.uri.clone(),
        duration: part.duration,
        independent: part.independent,
        gap: part.is_gap,
        byte_range: part.byte_range.as_ref().map(to_m3u8_byte_range),
    }
}

fn to_m3u8_preload_hint(hint: &PreloadHint) -> m3u8_rs::PreloadHint {
    m3u8_rs::PreloadHint {
        hint_type: match hint.hint_type {
            PreloadHintType::Part => "PART".to_string(),
            PreloadHintType::Map => "MAP".to_string(),
        },
        uri: hint.uri.clone(),
        byte_range_start: hint.byte_range.as_ref().and_then(|br| br.offset),
        byte_range_length: hint.byte_range.as_ref().map(|br| br.length),
    }
}

/// Serializes a [`MediaPlaylist`] to M3U8 text.
pub fn write_media_playlist(playlist: &MediaPlaylist) -> String {
    let mut segments = Vec::new();
    for segment in &playlist.segments {
        for part in &segment.parts {
            segments.push(m3u8_rs::MediaSegmentType::Partial(to_m3u8_part(part)));
        }
        if !segment.uri.is_empty() {
            segments.push(m3u8_rs::MediaSegmentType::Full(m3u8_rs::MediaSegment {
                uri: segment.uri.clone(),
                duration: segment.duration as f32,
                title: segment.title.clone(),
                discontinuity: segment.discontinuity,
                byte_range: segment.byte_range.as_ref().map(to_m3u8_byte_range),
                ..Default::default()
            }));
        }
    }
    for hint in &playlist.preload_hints {
        segments.push(m3u8_rs::MediaSegmentType::PreloadHint(to_m3u8_preload_hint(hint)));
    }

    let m3u8_playlist = m3u8_rs::MediaPlaylist {
        version: Some(playlist.version as usize),
        target_duration: playlist.target_duration as f32,
        media_sequence: playlist.media_sequence,
        end_list: playlist.ended,
        part_inf: playlist.part_inf.as_ref().map(|p| m3u8_rs::PartInf {
            part_target: p.part_target,
        }),
        segments,
        ..Default::default()
    };

    let mut buf = Vec::new();
    m3u8_playlist
        .write_to(&mut buf)
        .expect("writing a playlist into a Vec<u8> is infallible");
    let base = String::from_utf8(buf).expect("m3u8-rs writes valid UTF-8");

    let mut header_extra = String::new();
    if playlist.independent_segments {
        header_extra.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
    }
    if playlist.discontinuity_sequence > 0 {
        let _ = writeln!(
            header_extra,
            "#EXT-X-DISCONTINUITY-SEQUENCE:{}",
            playlist.discontinuity_sequence
        );
    }
    if let Some(pt) = playlist.playlist_type {
        let _ = writeln!(
            header_extra,
            "#EXT-X-PLAYLIST-TYPE:{}",
            match pt {
                PlaylistType::Vod => "VOD",
                PlaylistType::Event => "EVENT",
            }
        );
    }
    if playlist.i_frames_only {
        header_extra.push_str("#EXT-X-I-FRAMES-ONLY\n");
    }
    if let Some(sc) = &playlist.server_control {
        let mut attrs = Vec::new();
        if sc.can_block_reload {
            attrs.push("CAN-BLOCK-RELOAD=YES".to_string());
        }
        if let Some(skip) = sc.can_skip_until {
            attrs.push(format!("CAN-SKIP-UNTIL={skip:.5}"));
        }
        if sc.can_skip_date_ranges {
            attrs.push("CAN-SKIP-DATERANGES=YES".to_string());
        }
        if let Some(hb) = sc.hold_back {
            attrs.push(format!("HOLD-BACK={hb:.5}"));
        }
        if let Some(phb) = sc.part_hold_back {
            attrs.push(format!("PART-HOLD-BACK={phb:.5}"));
        }
        let _ = writeln!(header_extra, "#EXT-X-SERVER-CONTROL:{}", attrs.join(","));
    }
    if let Some(skipped) = playlist.skipped_segments {
        let _ = writeln!(header_extra, "#EXT-X-SKIP:SKIPPED-SEGMENTS={skipped}");
    }

    let mut out = String::with_capacity(base.len() + header_extra.len());
    let mut segment_iter = playlist.segments.iter().filter(|s| !s.uri.is_empty());
    let mut header_written = false;
    for line in base.lines() {
        out.push_str(line);
        out.push('\n');
        if !header_written && line.starts_with("#EXTM3U") {
            out.push_str(&header_extra);
            header_written = true;
        }
        if line.starts_with("#EXTINF:") {
            if let Some(segment) = segment_iter.next() {
                for extra in segment_extension_lines(segment) {
                    out.push_str(&extra);
                    out.push('\n');
                }
            }
        }
    }

    for (uri, attrs) in &playlist.rendition_reports {
        let extra: String = attrs
            .iter()
            .filter(|(k, _)| k.as_str() != "URI")
            .map(|(k, v)| format!(",{k}=\"{v}\""))
            .collect();
        let _ = writeln!(out, "#EXT-X-RENDITION-REPORT:URI=\"{uri}\"{extra}");
    }

    out
}

fn to_m3u8_variant(variant: &Variant) -> m3u8_rs::VariantStream {
    m3u8_rs::VariantStream {
        is_i_frame: false,
        uri: variant.uri.clone(),
        bandwidth: variant.bandwidth,
        average_bandwidth: variant.average_bandwidth,
        codecs: variant.codecs.clone(),
        resolution: variant.resolution.map(|(w, h)| m3u8_rs::Resolution {
            width: w as u64,
            height: h as u64,
        }),
        frame_rate: variant.frame_rate,
        hdcp_level: None,
        audio: variant.audio_group.clone(),
        video: variant.video_group.clone(),
        subtitles: variant.subtitles_group.clone(),
        closed_captions: None,
        other_attributes: None,
    }
}

/// Serializes a [`MasterPlaylist`] to M3U8 text. `EXT-X-MEDIA`,
/// session tags, and `EXT-X-I-FRAME-STREAM-INF` aren't modeled with
/// confidence against `m3u8-rs`'s write format for them, so they're
/// written directly the way the old hand-rolled writer did.
pub fn write_master_playlist(playlist: &MasterPlaylist) -> String {
    let m3u8_playlist = m3u8_rs::MasterPlaylist {
        version: Some(playlist.version as usize),
        variants: playlist.variants.iter().map(to_m3u8_variant).collect(),
        ..Default::default()
    };

    let mut buf = Vec::new();
    m3u8_playlist
        .write_to(&mut buf)
        .expect("writing a playlist into a Vec<u8> is infallible");
    let base = String::from_utf8(buf).expect("m3u8-rs writes valid UTF-8");

    let mut header_extra = String::new();
    if playlist.independent_segments {
        header_extra.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
    }
    for session in &playlist.session_data {
        let attrs: String = session
            .iter()
            .map(|(k, v)| format!("{k}=\"{v}\""))
            .collect::<Vec<_>>()
            .join(",");
        let _ = writeln!(header_extra, "#EXT-X-SESSION-DATA:{attrs}");
    }
    for media in &playlist.media {
        let mut attrs = format!(
            "TYPE={},GROUP-ID=\"{}\",NAME=\"{}\"",
            media.media_type, media.group_id, media.name
        );
        if let Some(uri) = &media.uri {
            let _ = write!(attrs, ",URI=\"{uri}\"");
        }
        if let Some(lang) = &media.language {
            let _ = write!(attrs, ",LANGUAGE=\"{lang}\"");
        }
        if media.default {
            attrs.push_str(",DEFAULT=YES");
        }
        if media.autoselect {
            attrs.push_str(",AUTOSELECT=YES");
        }
        if let Some(ch) = &media.channels {
            let _ = write!(attrs, ",CHANNELS=\"{ch}\"");
        }
        let _ = writeln!(header_extra, "#EXT-X-MEDIA:{attrs}");
    }

    let mut out = String::with_capacity(base.len() + header_extra.len());
    let mut header_written = false;
    for line in base.lines() {
        out.push_str(line);
        out.push('\n');
        if !header_written && line.starts_with("#EXTM3U") {
            out.push_str(&header_extra);
            header_written = true;
        }
    }

    for iframe in &playlist.i_frame_variants {
        let mut attrs = format!("BANDWIDTH={},URI=\"{}\"", iframe.bandwidth, iframe.uri);
        if let Some(codecs) = &iframe.codecs {
            let _ = write!(attrs, ",CODECS=\"{codecs}\"");
        }
        if let Some((w, h)) = iframe.resolution {
            let _ = write!(attrs, ",RESOLUTION={w}x{h}");
        }
        let _ = writeln!(out, "#EXT-X-I-FRAME-STREAM-INF:{attrs}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::parser::parse;

    #[test]
    fn media_playlist_starts_with_header_then_version() {
        let mut playlist = MediaPlaylist {
            version: 3,
            target_duration: 6,
            ..Default::default()
        };
        playlist.segments.push(MediaSegment::new(6.0, "seg0.ts"));
        playlist.ended = true;
        let text = write_media_playlist(&playlist);
        assert!(text.starts_with("#EXTM3U"));
        assert!(text.contains("#EXT-X-VERSION:3"));
        assert!(text.contains("#EXT-X-TARGETDURATION:6"));
        assert!(text.contains("seg0.ts"));
        assert!(text.trim_end().ends_with("#EXT-X-ENDLIST"));
    }

    #[test]
    fn round_trips_through_parser() {
        let mut playlist = MediaPlaylist {
            version: 3,
            target_duration: 6,
            ..Default::default()
        };
        playlist.segments.push(MediaSegment::new(6.0, "seg0.ts"));
        playlist.segments.push(MediaSegment::new(5.5, "seg1.ts"));
        playlist.ended = true;
        let text = write_media_playlist(&playlist);
        let reparsed = parse(&text).unwrap();
        match reparsed {
            crate::playlist::model::Playlist::Media(m) => {
                assert_eq!(m.segments.len(), 2);
                assert_eq!(m.segments[0].uri, "seg0.ts");
                assert!(m.ended);
            }
            crate::playlist::model::Playlist::Master(_) => panic!("expected media"),
        }
    }

    #[test]
    fn segment_extension_tags_are_spliced_before_extinf() {
        let mut playlist = MediaPlaylist {
            target_duration: 6,
            ..Default::default()
        };
        let mut segment = MediaSegment::new(6.0, "seg0.m4s");
        segment.key = Some(Key {
            method: "AES-128".to_string(),
            uri: Some("key0".to_string()),
            iv: None,
            keyformat: None,
            keyformatversions: None,
        });
        playlist.segments.push(segment);
        let text = write_media_playlist(&playlist);
        let key_idx = text.find("#EXT-X-KEY").unwrap();
        let extinf_idx = text.find("#EXTINF").unwrap();
        assert!(key_idx < extinf_idx);
    }

    #[test]
    fn master_playlist_emits_stream_inf_then_uri() {
        let mut playlist = MasterPlaylist {
            version: 7,
            ..Default::default()
        };
        playlist.variants.push(Variant {
            uri: "v0/playlist.m3u8".to_string(),
            bandwidth: 2_000_000,
            average_bandwidth: None,
            codecs: Some("avc1.640028,mp4a.40.2".to_string()),
            resolution: Some((1920, 1080)),
            frame_rate: None,
            audio_group: None,
            video_group: None,
            subtitles_group: None,
        });
        let text = write_master_playlist(&playlist);
        let idx = text.find("#EXT-X-STREAM-INF").unwrap();
        let uri_idx = text.find("v0/playlist.m3u8").unwrap();
        assert!(uri_idx > idx);
    }
}
