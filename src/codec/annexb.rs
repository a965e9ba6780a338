//! avcC parameter-set extraction, length-prefix→Annex-B conversion, and
//! keyframe access-unit assembly. Spec §4.7.

use crate::binary::Reader;
use crate::error::CodecError;

const ANNEX_B_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Parsed `avcC` decoder configuration: SPS/PPS lists and the NAL
/// length-field size used by the source's length-prefixed samples.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AvcDecoderConfig {
    pub length_size: u8,
    pub sps: Vec<Vec<u8>>,
    pub pps: Vec<Vec<u8>>,
}

impl AvcDecoderConfig {
    /// Parses an `avcC` payload per spec §4.7.
    pub fn parse(avcc: &[u8]) -> Result<AvcDecoderConfig, CodecError> {
        let mut r = Reader::new(avcc);
        let version = r
            .read_u8()
            .map_err(|e| CodecError::InvalidAvcConfig(e.to_string()))?;
        if version != 1 {
            return Err(CodecError::InvalidAvcConfig(format!(
                "unsupported configurationVersion {version}"
            )));
        }
        r.skip(3)
            .map_err(|e| CodecError::InvalidAvcConfig(e.to_string()))?; // profile, compat, level
        let length_minus_one = r
            .read_u8()
            .map_err(|e| CodecError::InvalidAvcConfig(e.to_string()))?
            & 0x03;
        let length_size = length_minus_one + 1;

        let num_sps = r
            .read_u8()
            .map_err(|e| CodecError::InvalidAvcConfig(e.to_string()))?
            & 0x1f;
        let mut sps = Vec::with_capacity(num_sps as usize);
        for _ in 0..num_sps {
            let len = r
                .read_u16()
                .map_err(|e| CodecError::InvalidAvcConfig(e.to_string()))?;
            let bytes = r
                .read_bytes(len as usize)
                .map_err(|e| CodecError::InvalidAvcConfig(e.to_string()))?;
            sps.push(bytes.to_vec());
        }

        let num_pps = r
            .read_u8()
            .map_err(|e| CodecError::InvalidAvcConfig(e.to_string()))?;
        let mut pps = Vec::with_capacity(num_pps as usize);
        for _ in 0..num_pps {
            let len = r
                .read_u16()
                .map_err(|e| CodecError::InvalidAvcConfig(e.to_string()))?;
            let bytes = r
                .read_bytes(len as usize)
                .map_err(|e| CodecError::InvalidAvcConfig(e.to_string()))?;
            pps.push(bytes.to_vec());
        }

        Ok(AvcDecoderConfig {
            length_size,
            sps,
            pps,
        })
    }

    /// Annex-B encoded `00 00 00 01 || sps` for each SPS, followed by each
    /// PPS the same way, in declaration order.
    pub fn parameter_sets_annex_b(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for s in &self.sps {
            out.extend_from_slice(&ANNEX_B_START_CODE);
            out.extend_from_slice(s);
        }
        for p in &self.pps {
            out.extend_from_slice(&ANNEX_B_START_CODE);
            out.extend_from_slice(p);
        }
        out
    }
}

/// Converts a buffer of `(length_size-byte length) || NAL` records into
/// Annex-B `00 00 00 01 || NAL` records. Truncates gracefully if a
/// declared length overflows the remaining buffer, per spec §4.7.
pub fn length_prefixed_to_annex_b(data: &[u8], length_size: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    let mut pos = 0usize;
    let length_size = length_size as usize;

    while pos + length_size <= data.len() {
        let len = read_length(&data[pos..pos + length_size]);
        pos += length_size;
        let available = data.len() - pos;
        let take = len.min(available);
        out.extend_from_slice(&ANNEX_B_START_CODE);
        out.extend_from_slice(&data[pos..pos + take]);
        pos += take;
        if take < len {
            break; // declared length overflowed the buffer
        }
    }
    out
}

fn read_length(bytes: &[u8]) -> usize {
    bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize)
}

/// Builds one access unit: Annex-B SPS+PPS prepended when `is_keyframe`,
/// followed by the sample converted from length-prefixed to Annex-B.
/// Non-keyframe samples are converted only, per spec §4.7.
pub fn build_access_unit(config: &AvcDecoderConfig, sample: &[u8], is_keyframe: bool) -> Vec<u8> {
    let converted = length_prefixed_to_annex_b(sample, config.length_size);
    if is_keyframe {
        let mut out = config.parameter_sets_annex_b();
        out.extend_from_slice(&converted);
        out
    } else {
        converted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::Writer;

    fn build_avcc(length_minus_one: u8, sps: &[&[u8]], pps: &[&[u8]]) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u8(1); // configurationVersion
        w.write_u8(0x42); // profile
        w.write_u8(0xC0); // profile compat
        w.write_u8(0x1E); // level
        w.write_u8(0xFC | (length_minus_one & 0x03)); // reserved bits + lengthSizeMinusOne
        w.write_u8(0xE0 | (sps.len() as u8 & 0x1f));
        for s in sps {
            w.write_u16(s.len() as u16);
            w.write_bytes(s);
        }
        w.write_u8(pps.len() as u8);
        for p in pps {
            w.write_u16(p.len() as u16);
            w.write_bytes(p);
        }
        w.into_bytes()
    }

    #[test]
    fn parses_avcc_sps_and_pps() {
        let sps = [0x67u8, 0x42, 0xC0, 0x1E];
        let pps = [0x68u8, 0xCE, 0x38, 0x80];
        let avcc = build_avcc(3, &[&sps], &[&pps]);
        let config = AvcDecoderConfig::parse(&avcc).unwrap();
        assert_eq!(config.length_size, 4);
        assert_eq!(config.sps, vec![sps.to_vec()]);
        assert_eq!(config.pps, vec![pps.to_vec()]);
    }

    #[test]
    fn rejects_unsupported_configuration_version() {
        let mut avcc = build_avcc(3, &[], &[]);
        avcc[0] = 2;
        let err = AvcDecoderConfig::parse(&avcc).unwrap_err();
        assert!(matches!(err, CodecError::InvalidAvcConfig(_)));
    }

    #[test]
    fn converts_length_prefixed_nals_to_annex_b() {
        let mut data = Vec::new();
        data.extend_from_slice(&4u32.to_be_bytes());
        data.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        data.extend_from_slice(&2u32.to_be_bytes());
        data.extend_from_slice(&[0x11, 0x22]);

        let annex_b = length_prefixed_to_annex_b(&data, 4);
        let mut expected = Vec::new();
        expected.extend_from_slice(&ANNEX_B_START_CODE);
        expected.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        expected.extend_from_slice(&ANNEX_B_START_CODE);
        expected.extend_from_slice(&[0x11, 0x22]);
        assert_eq!(annex_b, expected);
    }

    #[test]
    fn truncates_gracefully_on_overflowing_declared_length() {
        let mut data = Vec::new();
        data.extend_from_slice(&100u32.to_be_bytes());
        data.extend_from_slice(&[0xAA, 0xBB]);
        let annex_b = length_prefixed_to_annex_b(&data, 4);
        let mut expected = Vec::new();
        expected.extend_from_slice(&ANNEX_B_START_CODE);
        expected.extend_from_slice(&[0xAA, 0xBB]);
        assert_eq!(annex_b, expected);
    }

    #[test]
    fn keyframe_access_unit_prepends_sps_and_pps() {
        let sps = [0x67u8, 0x42];
        let pps = [0x68u8, 0xCE];
        let config = AvcDecoderConfig {
            length_size: 4,
            sps: vec![sps.to_vec()],
            pps: vec![pps.to_vec()],
        };
        let mut sample = Vec::new();
        sample.extend_from_slice(&2u32.to_be_bytes());
        sample.extend_from_slice(&[0x65, 0x88]);

        let au = build_access_unit(&config, &sample, true);
        assert!(au.starts_with(&ANNEX_B_START_CODE));
        assert!(au.windows(sps.len()).any(|w| w == sps));
        assert!(au.windows(pps.len()).any(|w| w == pps));
        assert!(au.ends_with(&[0x65, 0x88]));
    }

    #[test]
    fn non_keyframe_access_unit_has_no_parameter_sets() {
        let config = AvcDecoderConfig {
            length_size: 4,
            sps: vec![vec![0x67, 0x42]],
            pps: vec![vec![0x68, 0xCE]],
        };
        let mut sample = Vec::new();
        sample.extend_from_slice(&2u32.to_be_bytes());
        sample.extend_from_slice(&[0x41, 0x99]);

        let au = build_access_unit(&config, &sample, false);
        let mut expected = Vec::new();
        expected.extend_from_slice(&ANNEX_B_START_CODE);
        expected.extend_from_slice(&[0x41, 0x99]);
        assert_eq!(au, expected);
    }
}
