//! M3U8 parsing. The core grammar — `EXTM3U` scanning, segment/part/
//! preload-hint modeling, variant streams — is delegated to `m3u8-rs`,
//! the same crate the teacher's HLS egress uses for this. A second,
//! narrower pass over the source text recovers the tags that crate's
//! typed model doesn't carry (`EXT-X-DEFINE`, `EXT-X-SKIP`,
//! `EXT-X-RENDITION-REPORT`, encryption/daterange/map metadata, ...),
//! per spec §4.12.

use crate::error::PlaylistError;
use crate::playlist::model::*;
use std::collections::BTreeMap;

/// Splits an `EXT-X-*` attribute list on top-level commas, respecting
/// double-quoted strings (which may themselves contain commas).
fn split_attributes(rest: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in rest.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                out.push(current.clone());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Parses `NAME=VALUE` pairs from an attribute list into an ordered map,
/// unescaping `\"` inside quoted values.
fn parse_attribute_list(rest: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for entry in split_attributes(rest) {
        let Some(eq) = entry.find('=') else { continue };
        let name = entry[..eq].trim().to_string();
        let mut value = entry[eq + 1..].trim().to_string();
        if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
            value = value[1..value.len() - 1].replace("\\\"", "\"");
        }
        map.insert(name, value);
    }
    map
}

fn require_attr<'a>(
    attrs: &'a BTreeMap<String, String>,
    tag: &str,
    name: &str,
) -> Result<&'a str, PlaylistError> {
    attrs
        .get(name)
        .map(|s| s.as_str())
        .ok_or_else(|| PlaylistError::MissingAttribute(name.to_string(), tag.to_string()))
}

fn parse_f64_attr(attrs: &BTreeMap<String, String>, tag: &str, name: &str) -> Result<f64, PlaylistError> {
    let raw = require_attr(attrs, tag, name)?;
    raw.parse().map_err(|_| PlaylistError::InvalidAttributeValue {
        tag: tag.to_string(),
        attr: name.to_string(),
        value: raw.to_string(),
    })
}

fn parse_u64_attr(attrs: &BTreeMap<String, String>, tag: &str, name: &str) -> Result<u64, PlaylistError> {
    let raw = require_attr(attrs, tag, name)?;
    raw.parse().map_err(|_| PlaylistError::InvalidAttributeValue {
        tag: tag.to_string(),
        attr: name.to_string(),
        value: raw.to_string(),
    })
}

fn parse_bool_attr(attrs: &BTreeMap<String, String>, name: &str, default: bool) -> bool {
    match attrs.get(name).map(|s| s.as_str()) {
        Some("YES") => true,
        Some("NO") => false,
        _ => default,
    }
}

fn parse_byte_range(raw: &str, line: usize) -> Result<ByteRange, PlaylistError> {
    let (len_part, off_part) = match raw.split_once('@') {
        Some((l, o)) => (l, Some(o)),
        None => (raw, None),
    };
    let length = len_part
        .trim()
        .parse()
        .map_err(|_| PlaylistError::InvalidTagFormat(line))?;
    let offset = off_part
        .map(|o| o.trim().parse())
        .transpose()
        .map_err(|_| PlaylistError::InvalidTagFormat(line))?;
    Ok(ByteRange { length, offset })
}

/// Decodes `%XX` escapes in a URL query component.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Extracts a single query parameter from a playlist URL. Hand-rolled
/// rather than pulled in from a URL crate: the only thing `EXT-X-DEFINE`
/// QUERYPARAM needs is one name/value pair out of the query string.
fn extract_query_param(url: &str, name: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    for pair in query.split('&') {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        if k == name {
            return Some(percent_decode(v));
        }
    }
    None
}

/// Captures `EXT-X-DEFINE` variable bindings and resolves `{$NAME}`
/// occurrences in URIs. Spec's variable substitution: NAME/VALUE,
/// QUERYPARAM (extracted from the playlist's own URL), and IMPORT
/// (inherited from a parent resolver, for child/delta playlists).
#[derive(Clone, Debug, Default)]
pub struct VariableDefinitions {
    values: BTreeMap<String, String>,
}

impl VariableDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: String, value: String) {
        self.values.insert(name, value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Replaces every `{$NAME}` in `input`. In strict mode an undefined
    /// name is an error; otherwise the placeholder is passed through
    /// unchanged.
    pub fn resolve(&self, input: &str, strict: bool) -> Result<String, PlaylistError> {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("{$") {
            out.push_str(&rest[..start]);
            let after_marker = &rest[start + 2..];
            match after_marker.find('}') {
                Some(end) => {
                    let name = &after_marker[..end];
                    match self.values.get(name) {
                        Some(value) => out.push_str(value),
                        None if strict => {
                            return Err(PlaylistError::UndefinedVariable(name.to_string()))
                        }
                        None => out.push_str(&rest[start..start + 2 + end + 1]),
                    }
                    rest = &after_marker[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                    break;
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn handle_define(
    rest: &str,
    definitions: &mut VariableDefinitions,
    playlist_url: Option<&str>,
    line_no: usize,
) -> Result<(), PlaylistError> {
    let attrs = parse_attribute_list(rest);
    if let Some(name) = attrs.get("NAME") {
        let value = require_attr(&attrs, "EXT-X-DEFINE", "VALUE")?.to_string();
        definitions.define(name.clone(), value);
    } else if let Some(param) = attrs.get("QUERYPARAM") {
        let url = playlist_url.ok_or(PlaylistError::InvalidTagFormat(line_no))?;
        let value = extract_query_param(url, param)
            .ok_or_else(|| PlaylistError::UndefinedVariable(param.clone()))?;
        definitions.define(param.clone(), value);
    } else if let Some(import_name) = attrs.get("IMPORT") {
        if !definitions.contains(import_name) {
            return Err(PlaylistError::UndefinedVariable(import_name.clone()));
        }
    }
    Ok(())
}

/// Inherits a preceding byte-range segment's contiguous position when a
/// later `EXT-X-BYTERANGE` omits its offset, per spec §3's "MediaPlaylist"
/// invariant. Left unresolved (offset stays `None`) when the previous
/// segment's URI doesn't match, so the validator can flag it.
fn resolve_byte_range_continuity(segments: &mut [MediaSegment]) {
    let mut previous: Option<(String, u64)> = None;
    for seg in segments.iter_mut() {
        match seg.byte_range.as_mut() {
            Some(br) => {
                if br.offset.is_none() {
                    if let Some((prev_uri, end)) = &previous {
                        if *prev_uri == seg.uri {
                            br.offset = Some(*end);
                        }
                    }
                }
                let offset = br.offset.unwrap_or(0);
                previous = Some((seg.uri.clone(), offset + br.length));
            }
            None => previous = None,
        }
    }
}

fn convert_byte_range(br: m3u8_rs::ByteRange) -> ByteRange {
    ByteRange {
        length: br.length,
        offset: br.offset,
    }
}

fn convert_full_segment(seg: m3u8_rs::MediaSegment) -> MediaSegment {
    MediaSegment {
        duration: seg.duration as f64,
        title: seg.title,
        uri: seg.uri,
        byte_range: seg.byte_range.map(convert_byte_range),
        discontinuity: seg.discontinuity,
        key: None,
        map: None,
        program_date_time: seg.program_date_time.map(|t| t.to_rfc3339()),
        is_gap: false,
        bitrate: None,
        date_range: None,
        parts: Vec::new(),
    }
}

fn convert_part(part: m3u8_rs::Part) -> PartialSegment {
    PartialSegment {
        uri: part.uri,
        duration: part.duration,
        independent: part.independent,
        is_gap: part.gap,
        byte_range: part.byte_range.map(convert_byte_range),
    }
}

fn convert_preload_hint(hint: m3u8_rs::PreloadHint) -> PreloadHint {
    let hint_type = if hint.hint_type.eq_ignore_ascii_case("MAP") {
        PreloadHintType::Map
    } else {
        PreloadHintType::Part
    };
    let byte_range = hint.byte_range_length.map(|length| ByteRange {
        length,
        offset: hint.byte_range_start,
    });
    PreloadHint {
        hint_type,
        uri: hint.uri,
        byte_range,
    }
}

fn convert_media_playlist(mp: m3u8_rs::MediaPlaylist) -> MediaPlaylist {
    let mut media = MediaPlaylist {
        version: mp.version.unwrap_or(0) as u32,
        target_duration: mp.target_duration.round() as u32,
        media_sequence: mp.media_sequence,
        ended: mp.end_list,
        part_inf: mp.part_inf.map(|p| PartInf {
            part_target: p.part_target,
        }),
        ..Default::default()
    };

    let mut pending_parts: Vec<PartialSegment> = Vec::new();
    for item in mp.segments {
        match item {
            m3u8_rs::MediaSegmentType::Full(seg) => {
                let mut converted = convert_full_segment(seg);
                converted.parts = std::mem::take(&mut pending_parts);
                media.segments.push(converted);
            }
            m3u8_rs::MediaSegmentType::Partial(part) => {
                pending_parts.push(convert_part(part));
            }
            m3u8_rs::MediaSegmentType::PreloadHint(hint) => {
                media.preload_hints.push(convert_preload_hint(hint));
            }
        }
    }
    if !pending_parts.is_empty() {
        let mut in_progress = MediaSegment::new(0.0, "");
        in_progress.parts = pending_parts;
        media.segments.push(in_progress);
    }

    media
}

fn convert_variant(v: m3u8_rs::VariantStream) -> Variant {
    Variant {
        uri: v.uri,
        bandwidth: v.bandwidth,
        average_bandwidth: v.average_bandwidth,
        codecs: v.codecs,
        resolution: v.resolution.map(|r| (r.width as u32, r.height as u32)),
        frame_rate: v.frame_rate,
        audio_group: v.audio,
        video_group: v.video,
        subtitles_group: v.subtitles,
    }
}

fn convert_master_playlist(mp: m3u8_rs::MasterPlaylist) -> MasterPlaylist {
    let mut master = MasterPlaylist {
        version: mp.version.unwrap_or(0) as u32,
        ..Default::default()
    };
    for v in mp.variants {
        if v.is_i_frame {
            master.i_frame_variants.push(IFrameVariant {
                uri: v.uri,
                bandwidth: v.bandwidth,
                codecs: v.codecs,
                resolution: v.resolution.map(|r| (r.width as u32, r.height as u32)),
            });
        } else {
            master.variants.push(convert_variant(v));
        }
    }
    master
}

/// Recovers the tags `m3u8-rs`'s typed model doesn't carry by scanning
/// the raw text a second time: tags attached to a specific segment
/// (`EXT-X-KEY`, `EXT-X-MAP`, `EXT-X-DATERANGE`, `EXT-X-BITRATE`,
/// `EXT-X-GAP`) are tracked against a running segment index that mirrors
/// how `m3u8-rs` grouped the same lines into `media.segments`.
fn scan_media_extensions(
    text: &str,
    media: &mut MediaPlaylist,
    definitions: &mut VariableDefinitions,
    playlist_url: Option<&str>,
) -> Result<(), PlaylistError> {
    let mut seg_index = 0usize;
    for (line_no, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if !line.starts_with("#EXT") {
            if !line.starts_with('#') {
                seg_index += 1;
            }
            continue;
        }
        let (tag, rest) = line.split_once(':').unwrap_or((line, ""));
        match tag {
            "#EXT-X-INDEPENDENT-SEGMENTS" => media.independent_segments = true,
            "#EXT-X-DISCONTINUITY-SEQUENCE" => {
                media.discontinuity_sequence = rest
                    .trim()
                    .parse()
                    .map_err(|_| PlaylistError::InvalidTagFormat(line_no))?;
            }
            "#EXT-X-PLAYLIST-TYPE" => {
                media.playlist_type = Some(match rest.trim() {
                    "VOD" => PlaylistType::Vod,
                    "EVENT" => PlaylistType::Event,
                    _ => return Err(PlaylistError::InvalidTagFormat(line_no)),
                });
            }
            "#EXT-X-I-FRAMES-ONLY" => media.i_frames_only = true,
            "#EXT-X-KEY" => {
                let attrs = parse_attribute_list(rest);
                let method = require_attr(&attrs, "EXT-X-KEY", "METHOD")?.to_string();
                let key = Key {
                    method,
                    uri: attrs.get("URI").cloned(),
                    iv: attrs.get("IV").cloned(),
                    keyformat: attrs.get("KEYFORMAT").cloned(),
                    keyformatversions: attrs.get("KEYFORMATVERSIONS").cloned(),
                };
                if let Some(seg) = media.segments.get_mut(seg_index) {
                    seg.key = Some(key);
                }
            }
            "#EXT-X-MAP" => {
                let attrs = parse_attribute_list(rest);
                let uri = require_attr(&attrs, "EXT-X-MAP", "URI")?.to_string();
                let byte_range = attrs
                    .get("BYTERANGE")
                    .map(|r| parse_byte_range(r, line_no))
                    .transpose()?;
                if let Some(seg) = media.segments.get_mut(seg_index) {
                    seg.map = Some(Map { uri, byte_range });
                }
            }
            "#EXT-X-DATERANGE" => {
                let attrs = parse_attribute_list(rest);
                let id = require_attr(&attrs, "EXT-X-DATERANGE", "ID")?.to_string();
                let start_date = require_attr(&attrs, "EXT-X-DATERANGE", "START-DATE")?.to_string();
                let date_range = DateRange {
                    id,
                    class: attrs.get("CLASS").cloned(),
                    start_date,
                    end_date: attrs.get("END-DATE").cloned(),
                    duration: attrs.get("DURATION").and_then(|v| v.parse().ok()),
                    planned_duration: attrs.get("PLANNED-DURATION").and_then(|v| v.parse().ok()),
                    end_on_next: parse_bool_attr(&attrs, "END-ON-NEXT", false),
                };
                if let Some(seg) = media.segments.get_mut(seg_index) {
                    seg.date_range = Some(date_range);
                }
            }
            "#EXT-X-BITRATE" => {
                let value: u64 = rest
                    .trim()
                    .parse()
                    .map_err(|_| PlaylistError::InvalidTagFormat(line_no))?;
                if let Some(seg) = media.segments.get_mut(seg_index) {
                    seg.bitrate = Some(value);
                }
            }
            "#EXT-X-GAP" => {
                if let Some(seg) = media.segments.get_mut(seg_index) {
                    seg.is_gap = true;
                }
            }
            "#EXT-X-SERVER-CONTROL" => {
                let attrs = parse_attribute_list(rest);
                media.server_control = Some(ServerControl {
                    can_block_reload: parse_bool_attr(&attrs, "CAN-BLOCK-RELOAD", false),
                    can_skip_until: attrs.get("CAN-SKIP-UNTIL").and_then(|v| v.parse().ok()),
                    can_skip_date_ranges: parse_bool_attr(&attrs, "CAN-SKIP-DATERANGES", false),
                    hold_back: attrs.get("HOLD-BACK").and_then(|v| v.parse().ok()),
                    part_hold_back: attrs.get("PART-HOLD-BACK").and_then(|v| v.parse().ok()),
                });
            }
            "#EXT-X-SKIP" => {
                let attrs = parse_attribute_list(rest);
                media.skipped_segments =
                    Some(parse_u64_attr(&attrs, "EXT-X-SKIP", "SKIPPED-SEGMENTS")? as u32);
            }
            "#EXT-X-RENDITION-REPORT" => {
                let attrs = parse_attribute_list(rest);
                let uri = require_attr(&attrs, "EXT-X-RENDITION-REPORT", "URI")?.to_string();
                media.rendition_reports.push((uri, attrs));
            }
            "#EXT-X-DEFINE" => handle_define(rest, definitions, playlist_url, line_no)?,
            _ => {}
        }
    }
    Ok(())
}

/// Recovers `EXT-X-MEDIA`, session tags, and `EXT-X-DEFINE` for master
/// playlists — the surface `m3u8-rs`'s typed model doesn't carry.
fn scan_master_extensions(
    text: &str,
    master: &mut MasterPlaylist,
    definitions: &mut VariableDefinitions,
    playlist_url: Option<&str>,
) -> Result<(), PlaylistError> {
    for (line_no, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if !line.starts_with("#EXT") {
            continue;
        }
        let (tag, rest) = line.split_once(':').unwrap_or((line, ""));
        match tag {
            "#EXT-X-INDEPENDENT-SEGMENTS" => master.independent_segments = true,
            "#EXT-X-MEDIA" => {
                let attrs = parse_attribute_list(rest);
                master.media.push(Media {
                    media_type: require_attr(&attrs, "EXT-X-MEDIA", "TYPE")?.to_string(),
                    group_id: require_attr(&attrs, "EXT-X-MEDIA", "GROUP-ID")?.to_string(),
                    name: require_attr(&attrs, "EXT-X-MEDIA", "NAME")?.to_string(),
                    uri: attrs.get("URI").cloned(),
                    language: attrs.get("LANGUAGE").cloned(),
                    default: parse_bool_attr(&attrs, "DEFAULT", false),
                    autoselect: parse_bool_attr(&attrs, "AUTOSELECT", false),
                    channels: attrs.get("CHANNELS").cloned(),
                });
            }
            "#EXT-X-SESSION-DATA" | "#EXT-X-SESSION-KEY" | "#EXT-X-CONTENT-STEERING" => {
                master.session_data.push(parse_attribute_list(rest));
            }
            "#EXT-X-DEFINE" => handle_define(rest, definitions, playlist_url, line_no)?,
            _ => {}
        }
    }
    Ok(())
}

fn resolve_variables_in_media(
    media: &mut MediaPlaylist,
    definitions: &VariableDefinitions,
    strict: bool,
) -> Result<(), PlaylistError> {
    for seg in &mut media.segments {
        seg.uri = definitions.resolve(&seg.uri, strict)?;
        if let Some(map) = &mut seg.map {
            map.uri = definitions.resolve(&map.uri, strict)?;
        }
        if let Some(key) = &mut seg.key {
            if let Some(uri) = &key.uri {
                key.uri = Some(definitions.resolve(uri, strict)?);
            }
        }
        for part in &mut seg.parts {
            part.uri = definitions.resolve(&part.uri, strict)?;
        }
    }
    for hint in &mut media.preload_hints {
        hint.uri = definitions.resolve(&hint.uri, strict)?;
    }
    for (uri, _) in &mut media.rendition_reports {
        *uri = definitions.resolve(uri, strict)?;
    }
    Ok(())
}

fn resolve_variables_in_master(
    master: &mut MasterPlaylist,
    definitions: &VariableDefinitions,
    strict: bool,
) -> Result<(), PlaylistError> {
    for variant in &mut master.variants {
        variant.uri = definitions.resolve(&variant.uri, strict)?;
    }
    for iframe in &mut master.i_frame_variants {
        iframe.uri = definitions.resolve(&iframe.uri, strict)?;
    }
    for media in &mut master.media {
        if let Some(uri) = &media.uri {
            media.uri = Some(definitions.resolve(uri, strict)?);
        }
    }
    Ok(())
}

/// Parses M3U8 text into a typed [`Playlist`], per spec §4.12. Equivalent
/// to [`parse_with_context`] with no parent variable scope and lenient
/// `{$NAME}` resolution.
pub fn parse(text: &str) -> Result<Playlist, PlaylistError> {
    parse_with_context(text, None, &BTreeMap::new(), false)
}

/// Parses M3U8 text, seeding `EXT-X-DEFINE:IMPORT` from
/// `parent_definitions` (a parent playlist's own resolver) and resolving
/// `QUERYPARAM` definitions against `playlist_url`. `strict_variables`
/// controls whether an unresolved `{$NAME}` is an error.
pub fn parse_with_context(
    text: &str,
    playlist_url: Option<&str>,
    parent_definitions: &BTreeMap<String, String>,
    strict_variables: bool,
) -> Result<Playlist, PlaylistError> {
    if text.trim().is_empty() {
        return Err(PlaylistError::Empty);
    }
    if !text.trim_start().starts_with("#EXTM3U") {
        return Err(PlaylistError::MissingHeader);
    }

    let (_, parsed) = m3u8_rs::parse_playlist(text.as_bytes()).map_err(|e| PlaylistError::ParseFailed {
        reason: e.to_string(),
        line: None,
    })?;

    let mut definitions = VariableDefinitions::new();
    for (name, value) in parent_definitions {
        definitions.define(name.clone(), value.clone());
    }

    match parsed {
        m3u8_rs::Playlist::MediaPlaylist(mp) => {
            let mut media = convert_media_playlist(mp);
            scan_media_extensions(text, &mut media, &mut definitions, playlist_url)?;
            resolve_byte_range_continuity(&mut media.segments);
            resolve_variables_in_media(&mut media, &definitions, strict_variables)?;
            Ok(Playlist::Media(media))
        }
        m3u8_rs::Playlist::MasterPlaylist(mp) => {
            let mut master = convert_master_playlist(mp);
            scan_master_extensions(text, &mut master, &mut definitions, playlist_url)?;
            resolve_variables_in_master(&mut master, &definitions, strict_variables)?;
            Ok(Playlist::Master(master))
        }
    }
}
