//! Movie/track metadata extraction: timescale, duration, codec, language,
//! dimensions. Spec §3 "TrackInfo"/"FileInfo", §4.4.

use crate::binary::Reader;
use crate::error::ContainerError;
use crate::isobmff::BBox;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
    Text,
    Unknown,
}

impl MediaType {
    fn from_handler(handler: &str) -> MediaType {
        match handler {
            "vide" => MediaType::Video,
            "soun" => MediaType::Audio,
            "sbtl" | "subt" => MediaType::Subtitle,
            "text" => MediaType::Text,
            _ => MediaType::Unknown,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TrackInfo<'a> {
    pub track_id: u32,
    pub media_type: MediaType,
    pub timescale: u32,
    pub duration: u64,
    /// ISO 639-2/T language, `None` when the packed code was `und`.
    pub language: Option<String>,
    /// Codec four-CC, taken from the first `stsd` entry.
    pub codec: String,
    pub width: Option<f64>,
    pub height: Option<f64>,
    /// Raw `stsd` payload, preserved for init-segment synthesis.
    pub stsd_payload: &'a [u8],
    pub has_sync_samples: bool,
    pub stbl: BBox<'a>,
}

#[derive(Clone, Debug)]
pub struct FileInfo<'a> {
    pub timescale: u32,
    pub duration: u64,
    pub major_brand: String,
    pub compatible_brands: Vec<String>,
    pub tracks: Vec<TrackInfo<'a>>,
}

/// Decodes a packed 3x5-bit ISO 639-2/T language code (offset by 0x60 per
/// byte), per spec §4.4. `und` (the all-zero/placeholder code) maps to
/// `None`.
fn decode_language(packed: u16) -> Option<String> {
    let c1 = ((packed >> 10) & 0x1f) as u8 + 0x60;
    let c2 = ((packed >> 5) & 0x1f) as u8 + 0x60;
    let c3 = (packed & 0x1f) as u8 + 0x60;
    let s: String = [c1, c2, c3].iter().map(|&b| b as char).collect();
    if s == "und" {
        None
    } else {
        Some(s)
    }
}

/// Extracts `ftyp` brands: major brand first, then compatible brands,
/// deduplicated in order of appearance, minor version skipped.
fn parse_ftyp(ftyp: &BBox) -> Result<(String, Vec<String>), ContainerError> {
    let mut r = ftyp.reader()?;
    let major = r
        .read_4cc()
        .map_err(|e| ContainerError::from_binary("ftyp", e))?;
    r.skip(4).map_err(|e| ContainerError::from_binary("ftyp", e))?; // minor version
    let major = String::from_utf8_lossy(&major).into_owned();

    let mut compatible = Vec::new();
    let mut seen = vec![major.clone()];
    while r.remaining() >= 4 {
        let cc = r.read_4cc().map_err(|e| ContainerError::from_binary("ftyp", e))?;
        let cc = String::from_utf8_lossy(&cc).into_owned();
        if !seen.contains(&cc) {
            seen.push(cc.clone());
            compatible.push(cc);
        }
    }
    Ok((major, compatible))
}

fn parse_mvhd(mvhd: &BBox) -> Result<(u32, u64), ContainerError> {
    let mut r = mvhd.reader()?;
    let version = r.read_u8().map_err(|e| ContainerError::from_binary("mvhd", e))?;
    r.skip(3).map_err(|e| ContainerError::from_binary("mvhd", e))?;
    if version == 1 {
        r.skip(16).map_err(|e| ContainerError::from_binary("mvhd", e))?; // creation+modification (64-bit each)
        let timescale = r.read_u32().map_err(|e| ContainerError::from_binary("mvhd", e))?;
        let duration = r.read_u64().map_err(|e| ContainerError::from_binary("mvhd", e))?;
        Ok((timescale, duration))
    } else {
        r.skip(8).map_err(|e| ContainerError::from_binary("mvhd", e))?; // creation+modification (32-bit each)
        let timescale = r.read_u32().map_err(|e| ContainerError::from_binary("mvhd", e))?;
        let duration = r.read_u32().map_err(|e| ContainerError::from_binary("mvhd", e))? as u64;
        Ok((timescale, duration))
    }
}

fn parse_tkhd(tkhd: &BBox) -> Result<(u32, u64, f64, f64), ContainerError> {
    let mut r = tkhd.reader()?;
    let version = r.read_u8().map_err(|e| ContainerError::from_binary("tkhd", e))?;
    r.skip(3).map_err(|e| ContainerError::from_binary("tkhd", e))?;
    let (track_id, duration) = if version == 1 {
        r.skip(16).map_err(|e| ContainerError::from_binary("tkhd", e))?;
        let track_id = r.read_u32().map_err(|e| ContainerError::from_binary("tkhd", e))?;
        r.skip(4).map_err(|e| ContainerError::from_binary("tkhd", e))?; // reserved
        let duration = r.read_u64().map_err(|e| ContainerError::from_binary("tkhd", e))?;
        (track_id, duration)
    } else {
        r.skip(8).map_err(|e| ContainerError::from_binary("tkhd", e))?;
        let track_id = r.read_u32().map_err(|e| ContainerError::from_binary("tkhd", e))?;
        r.skip(4).map_err(|e| ContainerError::from_binary("tkhd", e))?;
        let duration = r.read_u32().map_err(|e| ContainerError::from_binary("tkhd", e))? as u64;
        (track_id, duration)
    };
    // reserved(8) + layer(2) + alternate_group(2) + volume(2) + reserved(2) + matrix(36)
    r.skip(8 + 2 + 2 + 2 + 2)
        .map_err(|e| ContainerError::from_binary("tkhd", e))?;
    r.skip(9 * 4).map_err(|e| ContainerError::from_binary("tkhd", e))?; // matrix, we only want the trailer
    let width = r.read_fixed_16_16().map_err(|e| ContainerError::from_binary("tkhd", e))?;
    let height = r.read_fixed_16_16().map_err(|e| ContainerError::from_binary("tkhd", e))?;
    Ok((track_id, duration, width, height))
}

fn parse_mdhd(mdhd: &BBox) -> Result<(u32, u64, Option<String>), ContainerError> {
    let mut r = mdhd.reader()?;
    let version = r.read_u8().map_err(|e| ContainerError::from_binary("mdhd", e))?;
    r.skip(3).map_err(|e| ContainerError::from_binary("mdhd", e))?;
    let (timescale, duration) = if version == 1 {
        r.skip(16).map_err(|e| ContainerError::from_binary("mdhd", e))?;
        let timescale = r.read_u32().map_err(|e| ContainerError::from_binary("mdhd", e))?;
        let duration = r.read_u64().map_err(|e| ContainerError::from_binary("mdhd", e))?;
        (timescale, duration)
    } else {
        r.skip(8).map_err(|e| ContainerError::from_binary("mdhd", e))?;
        let timescale = r.read_u32().map_err(|e| ContainerError::from_binary("mdhd", e))?;
        let duration = r.read_u32().map_err(|e| ContainerError::from_binary("mdhd", e))? as u64;
        (timescale, duration)
    };
    let packed_lang = r.read_u16().map_err(|e| ContainerError::from_binary("mdhd", e))?;
    let language = decode_language(packed_lang);
    Ok((timescale, duration, language))
}

fn parse_hdlr(hdlr: &BBox) -> Result<String, ContainerError> {
    let mut r = hdlr.reader()?;
    r.skip(8).map_err(|e| ContainerError::from_binary("hdlr", e))?; // version+flags(4) + pre_defined(4)
    let handler = r.read_4cc().map_err(|e| ContainerError::from_binary("hdlr", e))?;
    Ok(String::from_utf8_lossy(&handler).into_owned())
}

fn parse_stsd_codec<'a>(stsd: &BBox<'a>) -> Result<(String, &'a [u8]), ContainerError> {
    let payload = stsd.payload.ok_or_else(|| ContainerError::InvalidBoxData {
        box_type: "stsd".to_string(),
        reason: "no payload".to_string(),
    })?;
    let mut r = Reader::new(payload);
    r.skip(8).map_err(|e| ContainerError::from_binary("stsd", e))?; // version+flags(4) + entry_count(4)
    r.skip(4).map_err(|e| ContainerError::from_binary("stsd", e))?; // entry size
    let codec = r.read_4cc().map_err(|e| ContainerError::from_binary("stsd", e))?;
    Ok((String::from_utf8_lossy(&codec).into_owned(), payload))
}

impl<'a> FileInfo<'a> {
    pub fn parse(boxes: &[BBox<'a>]) -> Result<FileInfo<'a>, ContainerError> {
        let ftyp = boxes
            .iter()
            .find(|b| b.box_type == "ftyp")
            .ok_or_else(|| ContainerError::MissingBox("ftyp".to_string()))?;
        let (major_brand, compatible_brands) = parse_ftyp(ftyp)?;

        let moov = boxes
            .iter()
            .find(|b| b.box_type == "moov")
            .ok_or_else(|| ContainerError::MissingBox("moov".to_string()))?;
        let mvhd = moov.require("mvhd")?;
        let (timescale, duration) = parse_mvhd(mvhd)?;

        let mut tracks = Vec::new();
        for trak in moov.find_all("trak") {
            tracks.push(parse_track(trak)?);
        }

        Ok(FileInfo {
            timescale,
            duration,
            major_brand,
            compatible_brands,
            tracks,
        })
    }
}

fn parse_track<'a>(trak: &BBox<'a>) -> Result<TrackInfo<'a>, ContainerError> {
    let tkhd = trak.require("tkhd")?;
    let (track_id, _tkhd_duration, width, height) = parse_tkhd(tkhd)?;

    let mdia = trak.require("mdia")?;
    let mdhd = mdia.require("mdhd")?;
    let (timescale, duration, language) = parse_mdhd(mdhd)?;

    let hdlr = mdia.require("hdlr")?;
    let handler = parse_hdlr(hdlr)?;
    let media_type = MediaType::from_handler(&handler);

    let minf = mdia.require("minf")?;
    let stbl = minf.require("stbl")?;
    let stsd = stbl.require("stsd")?;
    let (codec, stsd_payload) = parse_stsd_codec(stsd)?;

    let has_sync_samples = stbl.find("stss").is_some();

    let (width, height) = if media_type == MediaType::Video {
        (Some(width), Some(height))
    } else {
        (None, None)
    };

    Ok(TrackInfo {
        track_id,
        media_type,
        timescale,
        duration,
        language,
        codec,
        width,
        height,
        stsd_payload,
        has_sync_samples,
        stbl: stbl.clone(),
    })
}

/// Locates and decodes the AAC `AudioSpecificConfig` for an `mp4a` track,
/// per spec §4.4. Handles both the direct `esds` (version 0 sound sample
/// entry) and the QuickTime `wave`-wrapped `esds` (version 1/2 entries),
/// tolerating an intervening `frma` box per spec §9.
pub fn extract_aac_config(stsd_payload: &[u8]) -> Result<Vec<u8>, ContainerError> {
    let mut r = Reader::new(stsd_payload);
    r.skip(8).map_err(|e| ContainerError::from_binary("stsd", e))?; // version+flags + entry_count
    let entry_size = r.read_u32().map_err(|e| ContainerError::from_binary("stsd", e))?;
    let codec = r.read_4cc().map_err(|e| ContainerError::from_binary("stsd", e))?;
    if &codec != b"mp4a" {
        return Err(ContainerError::UnsupportedCodec(
            String::from_utf8_lossy(&codec).into_owned(),
        ));
    }

    let entry_start = r.position();
    // SampleEntry reserved(6) + data_reference_index(2)
    r.skip(8).map_err(|e| ContainerError::from_binary("mp4a", e))?;
    // AudioSampleEntryV0: reserved(8) + channelcount(2) + samplesize(2)
    // + pre_defined(2) + reserved(2) + samplerate(4)
    r.skip(8).map_err(|e| ContainerError::from_binary("mp4a", e))?;
    let version = r.read_u16().map_err(|e| ContainerError::from_binary("mp4a", e))?;
    r.seek(entry_start).map_err(|e| ContainerError::from_binary("mp4a", e))?;
    // version lives at the same spot as channelcount in some writers'
    // layout; the widely-used convention checks the 16-bit value right
    // after reserved(6)+data_ref(2)+reserved(8)=16 bytes in.
    let _ = version;
    r.seek(entry_start + 16)
        .map_err(|e| ContainerError::from_binary("mp4a", e))?;
    let sound_version = r.read_u16().map_err(|e| ContainerError::from_binary("mp4a", e))?;
    r.seek(entry_start + 16 + 2 + 6 + 8)
        .map_err(|e| ContainerError::from_binary("mp4a", e))?; // skip to after samplerate (entry_start+28)

    let trailer_skip = match sound_version {
        1 => 16,
        2 => 36,
        _ => 0,
    };
    r.skip(trailer_skip).map_err(|e| ContainerError::from_binary("mp4a", e))?;

    let remaining_in_entry = (entry_size as usize).saturating_sub(r.position() - entry_start);
    let remaining = r
        .read_bytes(remaining_in_entry.min(r.remaining()))
        .map_err(|e| ContainerError::from_binary("mp4a", e))?;

    let child_boxes = crate::isobmff::parse_boxes(remaining, 0, remaining.len() as u64)?;

    if let Some(esds) = child_boxes.iter().find(|b| b.box_type == "esds") {
        return parse_esds(esds.payload.unwrap_or(&[]));
    }

    // Tolerate an intervening `frma` before `wave`, per spec §9.
    let wave = child_boxes
        .iter()
        .find(|b| b.box_type == "wave")
        .ok_or_else(|| ContainerError::MissingBox("esds/wave".to_string()))?;
    let esds = wave
        .find("esds")
        .ok_or_else(|| ContainerError::MissingBox("esds".to_string()))?;
    parse_esds(esds.payload.unwrap_or(&[]))
}

/// Reads a descriptor's variable-length size: 0x80-continuation bytes
/// followed by a terminal byte without the top bit set.
fn read_descriptor_size(r: &mut Reader) -> Result<u32, ContainerError> {
    let mut size = 0u32;
    for _ in 0..4 {
        let b = r.read_u8().map_err(|e| ContainerError::from_binary("esds", e))?;
        size = (size << 7) | (b & 0x7f) as u32;
        if b & 0x80 == 0 {
            return Ok(size);
        }
    }
    Ok(size)
}

/// Walks ES_Descriptor(0x03) -> DecoderConfigDescriptor(0x04) ->
/// DecoderSpecificInfo(0x05) to extract the raw `AudioSpecificConfig`
/// bytes, per spec §4.4.
fn parse_esds(esds_payload: &[u8]) -> Result<Vec<u8>, ContainerError> {
    let mut r = Reader::new(esds_payload);
    r.skip(4).map_err(|e| ContainerError::from_binary("esds", e))?; // version+flags

    let tag = r.read_u8().map_err(|e| ContainerError::from_binary("esds", e))?;
    if tag != 0x03 {
        return Err(ContainerError::InvalidBoxData {
            box_type: "esds".to_string(),
            reason: format!("expected ES_Descriptor tag 0x03, got {tag:#x}"),
        });
    }
    let _es_size = read_descriptor_size(&mut r)?;
    r.skip(2 + 1).map_err(|e| ContainerError::from_binary("esds", e))?; // ES_ID(2) + priority(1)

    let tag = r.read_u8().map_err(|e| ContainerError::from_binary("esds", e))?;
    if tag != 0x04 {
        return Err(ContainerError::InvalidBoxData {
            box_type: "esds".to_string(),
            reason: format!("expected DecoderConfigDescriptor tag 0x04, got {tag:#x}"),
        });
    }
    let _dc_size = read_descriptor_size(&mut r)?;
    r.skip(13).map_err(|e| ContainerError::from_binary("esds", e))?;

    let tag = r.read_u8().map_err(|e| ContainerError::from_binary("esds", e))?;
    if tag != 0x05 {
        return Err(ContainerError::InvalidBoxData {
            box_type: "esds".to_string(),
            reason: format!("expected DecoderSpecificInfo tag 0x05, got {tag:#x}"),
        });
    }
    let size = read_descriptor_size(&mut r)?;
    let bytes = r
        .read_bytes(size as usize)
        .map_err(|e| ContainerError::from_binary("esds", e))?;
    Ok(bytes.to_vec())
}

/// Locates the raw `avcC` payload inside an `avc1` track's `stsd` entry,
/// per spec §4.7. `entry_size` covers the entry's own 4-byte size field
/// and 4-byte codec four-CC, so the skip below subtracts both from the
/// byte count consumed since `entry_start`.
pub fn extract_avcc(stsd_payload: &[u8]) -> Result<Vec<u8>, ContainerError> {
    let mut r = Reader::new(stsd_payload);
    r.skip(8).map_err(|e| ContainerError::from_binary("stsd", e))?; // version+flags + entry_count
    let entry_size = r.read_u32().map_err(|e| ContainerError::from_binary("stsd", e))?;
    let codec = r.read_4cc().map_err(|e| ContainerError::from_binary("stsd", e))?;
    if &codec != b"avc1" {
        return Err(ContainerError::UnsupportedCodec(
            String::from_utf8_lossy(&codec).into_owned(),
        ));
    }

    let entry_start = r.position();
    // SampleEntry reserved(6) + data_reference_index(2), then
    // VisualSampleEntry's fixed fields through pre_defined(2) = 70 bytes.
    r.skip(78).map_err(|e| ContainerError::from_binary("avc1", e))?;

    let consumed_since_size_field = (r.position() + 8).saturating_sub(entry_start);
    let remaining_in_entry = (entry_size as usize).saturating_sub(consumed_since_size_field);
    let remaining = r
        .read_bytes(remaining_in_entry.min(r.remaining()))
        .map_err(|e| ContainerError::from_binary("avc1", e))?;

    let child_boxes = crate::isobmff::parse_boxes(remaining, 0, remaining.len() as u64)?;
    let avcc = child_boxes
        .iter()
        .find(|b| b.box_type == "avcC")
        .ok_or_else(|| ContainerError::MissingBox("avcC".to_string()))?;
    Ok(avcc.payload.unwrap_or(&[]).to_vec())
}

/// Cover-art track detection per spec §9: a video track whose codec is
/// `jpeg`, OR a `vide`-handler track whose entire duration is a single
/// sample — both signals are treated as equivalent.
pub fn is_cover_art_track(track: &TrackInfo, movie_duration: u64) -> bool {
    if track.media_type != MediaType::Video {
        return false;
    }
    if track.codec == "jpeg" {
        return true;
    }
    track.duration == movie_duration && !track.has_sync_samples
}
