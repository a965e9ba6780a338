//! PES packetization with 33-bit PTS/DTS encoding. Spec §4.9.

/// Default video elementary stream id.
pub const VIDEO_STREAM_ID: u8 = 0xE0;
/// Default audio elementary stream id.
pub const AUDIO_STREAM_ID: u8 = 0xC0;

const MARKER_PTS_ONLY: u8 = 0x20;
const MARKER_PTS_AND_DTS: u8 = 0x30;
const MARKER_DTS: u8 = 0x10;

/// Encodes a 33-bit timestamp into PES's 5-byte representation, per
/// spec §4.9. `marker` is `0x2` for a PTS-only field, `0x3` for the PTS
/// half of a PTS+DTS pair, or `0x1` for the DTS half.
fn encode_timestamp(ts: u64, marker: u8) -> [u8; 5] {
    let ts = ts & 0x1_FFFF_FFFF;
    [
        (marker << 4) | (((ts >> 29) & 0x0E) as u8) | 0x01,
        ((ts >> 22) & 0xFF) as u8,
        (((ts >> 14) & 0xFE) as u8) | 0x01,
        ((ts >> 7) & 0xFF) as u8,
        (((ts << 1) & 0xFE) as u8) | 0x01,
    ]
}

/// Decodes a 5-byte PES timestamp field back into a 33-bit tick count.
/// Inverse of [`encode_timestamp`]; ignores the marker bits.
pub fn decode_timestamp(bytes: &[u8; 5]) -> u64 {
    let b0 = (bytes[0] as u64 & 0x0E) << 29;
    let b1 = (bytes[1] as u64) << 22;
    let b2 = (bytes[2] as u64 & 0xFE) << 14;
    let b3 = (bytes[3] as u64) << 7;
    let b4 = (bytes[4] as u64 & 0xFE) >> 1;
    b0 | b1 | b2 | b3 | b4
}

/// Wraps a video access unit in a PES packet. `pts`/`dts` are 90 kHz
/// ticks; `dts` is `None` when it equals `pts`. Spec §4.9.
pub fn wrap_video_pes(stream_id: u8, pts: u64, dts: Option<u64>, access_unit: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(access_unit.len() + 19);
    out.extend_from_slice(&[0x00, 0x00, 0x01]);
    out.push(stream_id);
    out.extend_from_slice(&0u16.to_be_bytes()); // PES_packet_length = 0 (unbounded)
    out.push(0x80); // flag byte: marker bits only

    let has_dts = dts.is_some();
    out.push(if has_dts { 0xC0 } else { 0x80 });
    out.push(if has_dts { 10 } else { 5 });

    if let Some(dts) = dts {
        out.extend_from_slice(&encode_timestamp(pts, 0x3));
        out.extend_from_slice(&encode_timestamp(dts, 0x1));
    } else {
        out.extend_from_slice(&encode_timestamp(pts, 0x2));
    }

    out.extend_from_slice(access_unit);
    out
}

/// Wraps an ADTS audio frame in a PES packet, per spec §4.9.
pub fn wrap_audio_pes(stream_id: u8, pts: u64, frame: &[u8]) -> Vec<u8> {
    let header_data_length: u16 = 5;
    let data_len = 3 + header_data_length as usize + frame.len();
    let packet_length: u16 = if data_len > 0xFFFF { 0 } else { data_len as u16 };

    let mut out = Vec::with_capacity(frame.len() + 14);
    out.extend_from_slice(&[0x00, 0x00, 0x01]);
    out.push(stream_id);
    out.extend_from_slice(&packet_length.to_be_bytes());
    out.push(0x80);
    out.push(0x80); // PTS flags only
    out.push(header_data_length as u8);
    out.extend_from_slice(&encode_timestamp(pts, 0x2));
    out.extend_from_slice(frame);
    out
}
