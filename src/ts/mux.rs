//! PAT/PMT synthesis, 188-byte TS packet framing with adaptation fields,
//! PCR, and continuity counters. Spec §4.10.

use crate::error::CodecError;
use crc::{Crc, CRC_32_MPEG_2};

pub const TS_PACKET_SIZE: usize = 188;
pub const SYNC_BYTE: u8 = 0x47;

pub const PID_PAT: u16 = 0x0000;
pub const PID_PMT: u16 = 0x0100;
pub const PID_VIDEO: u16 = 0x0101;
pub const PID_AUDIO: u16 = 0x0102;

pub const STREAM_TYPE_H264: u8 = 0x1B;
pub const STREAM_TYPE_H265: u8 = 0x24;
pub const STREAM_TYPE_AAC: u8 = 0x0F;

const CRC32_MPEG2: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// One elementary stream entry for [`build_pmt`].
#[derive(Clone, Copy, Debug)]
pub struct ElementaryStream {
    pub stream_type: u8,
    pub pid: u16,
}

/// Builds the PSI-section bytes (without the leading pointer field) for
/// the Program Association Table. Spec §4.10.
pub fn build_pat(transport_stream_id: u16, program_number: u16, pmt_pid: u16) -> Vec<u8> {
    let mut section = Vec::new();
    section.push(0x00); // table_id
    let section_length_pos = section.len();
    section.extend_from_slice(&[0, 0]); // section_length placeholder
    section.extend_from_slice(&transport_stream_id.to_be_bytes());
    section.push(0xC1); // reserved(2)=11 + version(5)=0 + current_next=1
    section.push(0x00); // section_number
    section.push(0x00); // last_section_number
    section.extend_from_slice(&program_number.to_be_bytes());
    section.extend_from_slice(&(0xE000 | (pmt_pid & 0x1FFF)).to_be_bytes());

    let section_length = (section.len() - section_length_pos - 2 + 4) as u16; // + CRC
    section[section_length_pos..section_length_pos + 2]
        .copy_from_slice(&(0xB000 | (section_length & 0x0FFF)).to_be_bytes());

    append_crc(&mut section);
    section
}

/// Builds the PSI-section bytes (without the leading pointer field) for
/// the Program Map Table. Spec §4.10.
pub fn build_pmt(program_number: u16, pcr_pid: u16, streams: &[ElementaryStream]) -> Vec<u8> {
    let mut section = Vec::new();
    section.push(0x02); // table_id
    let section_length_pos = section.len();
    section.extend_from_slice(&[0, 0]); // section_length placeholder
    section.extend_from_slice(&program_number.to_be_bytes());
    section.push(0xC1);
    section.push(0x00);
    section.push(0x00);
    section.extend_from_slice(&(0xE000 | (pcr_pid & 0x1FFF)).to_be_bytes());
    section.extend_from_slice(&0xF000u16.to_be_bytes()); // program_info_length = 0

    for s in streams {
        section.push(s.stream_type);
        section.extend_from_slice(&(0xE000 | (s.pid & 0x1FFF)).to_be_bytes());
        section.extend_from_slice(&0xF000u16.to_be_bytes()); // ES_info_length = 0
    }

    let section_length = (section.len() - section_length_pos - 2 + 4) as u16;
    section[section_length_pos..section_length_pos + 2]
        .copy_from_slice(&(0xB000 | (section_length & 0x0FFF)).to_be_bytes());

    append_crc(&mut section);
    section
}

fn append_crc(section: &mut Vec<u8>) {
    let crc = CRC32_MPEG2.checksum(section);
    section.extend_from_slice(&crc.to_be_bytes());
}

/// Per-PID continuity counter, incremented modulo 16 on every packet
/// carrying payload, per spec §4.10.
#[derive(Default)]
pub struct ContinuityCounters {
    counters: std::collections::HashMap<u16, u8>,
}

impl ContinuityCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self, pid: u16) -> u8 {
        let counter = self.counters.entry(pid).or_insert(0);
        let value = *counter;
        *counter = (*counter + 1) & 0x0F;
        value
    }
}

/// Packs `psi_section` (with its preceding pointer field) into one or
/// more 188-byte TS packets on `pid`, per spec §4.10.
pub fn mux_psi_section(pid: u16, section: &[u8], counters: &mut ContinuityCounters) -> Vec<u8> {
    let mut with_pointer = Vec::with_capacity(section.len() + 1);
    with_pointer.push(0x00); // pointer_field
    with_pointer.extend_from_slice(section);
    mux_payload(pid, &with_pointer, true, None, counters)
}

/// Packs a PES packet into 188-byte TS packets, per spec §4.10. The
/// first packet carries an adaptation field (with PCR + random_access
/// when `is_keyframe`) when `pcr_27mhz` is provided or `is_keyframe` is
/// set; continuation packets carry no adaptation field except the last,
/// which is padded to exactly fill 184 payload bytes.
pub fn mux_pes(
    pid: u16,
    pes: &[u8],
    is_keyframe: bool,
    pcr_27mhz: Option<u64>,
    counters: &mut ContinuityCounters,
) -> Vec<u8> {
    mux_payload(pid, pes, true, pcr_27mhz.map(|pcr| (is_keyframe, pcr)), counters)
}

fn mux_payload(
    pid: u16,
    data: &[u8],
    pusi_first: bool,
    first_packet_pcr: Option<(bool, u64)>,
    counters: &mut ContinuityCounters,
) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    let mut first = true;

    while pos < data.len() || first {
        let remaining = data.len() - pos;
        let is_last = remaining <= 184;

        let mut packet = vec![0u8; TS_PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        let pusi = first && pusi_first;
        packet[1] = (if pusi { 0x40 } else { 0x00 }) | ((pid >> 8) as u8 & 0x1F);
        packet[2] = (pid & 0xFF) as u8;

        let cc = counters.next(pid);

        let adaptation = if first {
            first_packet_pcr.map(|(is_keyframe, pcr)| build_adaptation_field_pcr(is_keyframe, pcr))
        } else {
            None
        };

        let header_len = 4;
        let mut cursor = header_len;

        if is_last {
            let payload_len = remaining;
            let needed_stuffing_field = TS_PACKET_SIZE - header_len - payload_len;
            let adaptation_bytes = build_adaptation_field_padded(adaptation, needed_stuffing_field);
            packet[3] = 0x10 | cc; // AFC=01 payload only, overwritten below if adaptation present
            if !adaptation_bytes.is_empty() {
                packet[3] = 0x30 | cc; // AFC=11 adaptation + payload
                packet[cursor..cursor + adaptation_bytes.len()].copy_from_slice(&adaptation_bytes);
                cursor += adaptation_bytes.len();
            }
            packet[cursor..cursor + payload_len].copy_from_slice(&data[pos..pos + payload_len]);
            pos += payload_len;
        } else if let Some(af) = &adaptation {
            packet[3] = 0x30 | cc; // AFC=11
            packet[cursor..cursor + af.len()].copy_from_slice(af);
            cursor += af.len();
            let payload_len = TS_PACKET_SIZE - cursor;
            packet[cursor..].copy_from_slice(&data[pos..pos + payload_len]);
            pos += payload_len;
        } else {
            packet[3] = 0x10 | cc; // AFC=01 payload only
            let payload_len = TS_PACKET_SIZE - header_len;
            packet[header_len..].copy_from_slice(&data[pos..pos + payload_len]);
            pos += payload_len;
        }

        out.extend_from_slice(&packet);
        first = false;
    }

    out
}

/// Builds an adaptation field carrying PCR and (optionally) the
/// random_access flag, with no stuffing.
fn build_adaptation_field_pcr(random_access: bool, pcr_27mhz: u64) -> Vec<u8> {
    let mut af = Vec::with_capacity(8);
    af.push(0); // length placeholder
    let mut flags = 0x10; // PCR_flag
    if random_access {
        flags |= 0x40;
    }
    af.push(flags);
    af.extend_from_slice(&encode_pcr(pcr_27mhz));
    af[0] = (af.len() - 1) as u8;
    af
}

/// Pads `base` (or builds a stuffing-only field when `base` is `None`)
/// so the adaptation field occupies exactly `target_len` bytes.
fn build_adaptation_field_padded(base: Option<Vec<u8>>, target_len: usize) -> Vec<u8> {
    if target_len == 0 {
        return Vec::new();
    }
    let mut af = base.unwrap_or_else(|| {
        let mut af = vec![0u8; 2];
        af[0] = 1; // length: flags byte only
        af[1] = 0; // flags: all clear
        af
    });
    if af.is_empty() {
        af = vec![0u8; 2];
        af[0] = 1;
        af[1] = 0;
    }
    while af.len() < target_len {
        af.push(0xFF);
    }
    af[0] = (af.len() - 1) as u8;
    af
}

/// Encodes a 27 MHz PCR value into the 6-byte adaptation-field form:
/// 33-bit `PCR_base = pcr_27mhz / 300`, 6 reserved 1-bits, 9-bit
/// `PCR_ext = pcr_27mhz % 300`. Spec §4.10.
fn encode_pcr(pcr_27mhz: u64) -> [u8; 6] {
    let base = pcr_27mhz / 300;
    let ext = (pcr_27mhz % 300) as u16;

    let mut out = [0u8; 6];
    out[0] = ((base >> 25) & 0xFF) as u8;
    out[1] = ((base >> 17) & 0xFF) as u8;
    out[2] = ((base >> 9) & 0xFF) as u8;
    out[3] = ((base >> 1) & 0xFF) as u8;
    out[4] = (((base & 0x01) as u8) << 7) | 0x7E | (((ext >> 8) & 0x01) as u8);
    out[5] = (ext & 0xFF) as u8;
    out
}

/// Decodes a 6-byte PCR field back into a 27 MHz tick count.
pub fn decode_pcr(bytes: &[u8; 6]) -> Result<u64, CodecError> {
    let base = ((bytes[0] as u64) << 25)
        | ((bytes[1] as u64) << 17)
        | ((bytes[2] as u64) << 9)
        | ((bytes[3] as u64) << 1)
        | ((bytes[4] as u64) >> 7);
    let ext = (((bytes[4] & 0x01) as u64) << 8) | bytes[5] as u64;
    Ok(base * 300 + ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pat_crc_covers_section_and_trails_it() {
        let pat = build_pat(1, 1, PID_PMT);
        let (section, crc_bytes) = pat.split_at(pat.len() - 4);
        let expected = CRC32_MPEG2.checksum(section);
        assert_eq!(u32::from_be_bytes(crc_bytes.try_into().unwrap()), expected);
    }

    #[test]
    fn pmt_lists_every_elementary_stream() {
        let streams = [
            ElementaryStream {
                stream_type: STREAM_TYPE_H264,
                pid: PID_VIDEO,
            },
            ElementaryStream {
                stream_type: STREAM_TYPE_AAC,
                pid: PID_AUDIO,
            },
        ];
        let pmt = build_pmt(1, PID_VIDEO, &streams);
        assert!(pmt.windows(1).any(|w| w[0] == STREAM_TYPE_H264));
        assert!(pmt.windows(1).any(|w| w[0] == STREAM_TYPE_AAC));
        let (section, crc_bytes) = pmt.split_at(pmt.len() - 4);
        let expected = CRC32_MPEG2.checksum(section);
        assert_eq!(u32::from_be_bytes(crc_bytes.try_into().unwrap()), expected);
    }

    #[test]
    fn psi_packet_is_188_bytes_with_sync_and_pointer_field() {
        let mut counters = ContinuityCounters::new();
        let pat = build_pat(1, 1, PID_PMT);
        let packets = mux_psi_section(PID_PAT, &pat, &mut counters);
        assert_eq!(packets.len(), TS_PACKET_SIZE);
        assert_eq!(packets[0], SYNC_BYTE);
        assert_eq!(packets[1] & 0x40, 0x40); // PUSI
        assert_eq!(packets[4], 0x00); // pointer_field
    }

    #[test]
    fn pes_spanning_multiple_packets_has_monotonic_continuity_counters() {
        let mut counters = ContinuityCounters::new();
        let pes = vec![0xABu8; 500];
        let packets = mux_pes(PID_VIDEO, &pes, true, Some(12345), &mut counters);
        assert_eq!(packets.len() % TS_PACKET_SIZE, 0);
        let num_packets = packets.len() / TS_PACKET_SIZE;
        assert!(num_packets >= 3);

        let mut expected_cc = 0u8;
        for i in 0..num_packets {
            let packet = &packets[i * TS_PACKET_SIZE..(i + 1) * TS_PACKET_SIZE];
            assert_eq!(packet[0], SYNC_BYTE);
            let cc = packet[3] & 0x0F;
            assert_eq!(cc, expected_cc);
            expected_cc = (expected_cc + 1) & 0x0F;
        }
    }

    #[test]
    fn first_packet_carries_pcr_and_random_access_when_keyframe() {
        let mut counters = ContinuityCounters::new();
        let pes = vec![0xABu8; 10];
        let packets = mux_pes(PID_VIDEO, &pes, true, Some(900_000 * 300), &mut counters);
        let first = &packets[0..TS_PACKET_SIZE];
        let afc = (first[3] >> 4) & 0x03;
        assert_eq!(afc, 0x03); // adaptation + payload
        let af_len = first[4] as usize;
        let flags = first[5];
        assert_eq!(flags & 0x40, 0x40); // random_access
        assert_eq!(flags & 0x10, 0x10); // PCR present
        let pcr_bytes: [u8; 6] = first[6..12].try_into().unwrap();
        assert_eq!(decode_pcr(&pcr_bytes).unwrap(), 900_000 * 300);
        let _ = af_len;
    }

    #[test]
    fn last_packet_is_exactly_188_bytes_with_stuffing() {
        let mut counters = ContinuityCounters::new();
        let pes = vec![0xCDu8; 190]; // first packet 184 bytes, second needs 6 payload + stuffing
        let packets = mux_pes(PID_AUDIO, &pes, false, None, &mut counters);
        let num_packets = packets.len() / TS_PACKET_SIZE;
        let last = &packets[(num_packets - 1) * TS_PACKET_SIZE..num_packets * TS_PACKET_SIZE];
        assert_eq!(last.len(), TS_PACKET_SIZE);
        assert_eq!(last[0], SYNC_BYTE);
    }

    #[test]
    fn pcr_round_trips() {
        let pcr = 1_234_567_890u64;
        let encoded = encode_pcr(pcr);
        assert_eq!(decode_pcr(&encoded).unwrap(), pcr);
    }
}
