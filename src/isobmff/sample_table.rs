//! Interpretation of `stbl` children into a query-friendly structure.
//! Spec §3 "SampleTable", §4.3.

use crate::error::ContainerError;
use crate::isobmff::BBox;

/// One run of the decoding-time-to-sample table: `sample_count` samples
/// each spaced `sample_delta` ticks apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SttsEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

/// One run of the (optional) composition-time-to-sample table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CttsEntry {
    pub sample_count: u32,
    pub sample_offset: i64,
}

/// One run of the sample-to-chunk table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StscEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SampleSizes {
    Uniform(u32),
    PerSample,
}

/// A single track's decoded sample metadata. Spec §3 "SampleTable".
#[derive(Clone, Debug)]
pub struct SampleTable {
    pub stts: Vec<SttsEntry>,
    pub ctts: Option<Vec<CttsEntry>>,
    pub stsc: Vec<StscEntry>,
    sample_sizes: SampleSizes,
    per_sample_sizes: Vec<u32>,
    pub sample_count: u32,
    pub chunk_offsets: Vec<u64>,
    /// 1-based sync sample indices, ascending. `None` means every sample
    /// is a sync sample (typical for audio, no `stss` present).
    pub sync_samples: Option<Vec<u32>>,
}

impl SampleTable {
    /// Parses the `stts`, `stsc`, `stsz`, `stco`/`co64`, `ctts`, `stss`
    /// children of a `stbl` box. Spec §4.3.
    pub fn parse(stbl: &BBox) -> Result<SampleTable, ContainerError> {
        let stts = parse_stts(stbl.require("stts")?)?;
        let stsc = parse_stsc(stbl.require("stsc")?)?;
        let (sample_sizes, per_sample_sizes, sample_count) = parse_stsz(stbl.require("stsz")?)?;

        let chunk_offsets = if let Some(stco) = stbl.find("stco") {
            parse_stco(stco)?
        } else if let Some(co64) = stbl.find("co64") {
            parse_co64(co64)?
        } else {
            return Err(ContainerError::MissingBox("stco/co64".to_string()));
        };

        let ctts = stbl.find("ctts").map(parse_ctts).transpose()?;
        let sync_samples = stbl.find("stss").map(parse_stss).transpose()?;

        Ok(SampleTable {
            stts,
            ctts,
            stsc,
            sample_sizes,
            per_sample_sizes,
            sample_count,
            chunk_offsets,
            sync_samples,
        })
    }

    /// Size in bytes of the 0-based sample `index`.
    pub fn sample_size(&self, index: u32) -> Option<u32> {
        match self.sample_sizes {
            SampleSizes::Uniform(s) => {
                if index < self.sample_count {
                    Some(s)
                } else {
                    None
                }
            }
            SampleSizes::PerSample => self.per_sample_sizes.get(index as usize).copied(),
        }
    }

    /// `true` when `stss` was absent, meaning every sample is a sync
    /// sample (the typical audio case).
    pub fn all_samples_are_sync(&self) -> bool {
        self.sync_samples.is_none()
    }

    /// Builds a synthetic table for unit tests elsewhere in the crate.
    #[cfg(test)]
    pub(crate) fn synthetic(
        stts: Vec<SttsEntry>,
        stsc: Vec<StscEntry>,
        uniform_size: u32,
        sample_count: u32,
        chunk_offsets: Vec<u64>,
        sync_samples: Option<Vec<u32>>,
    ) -> SampleTable {
        SampleTable {
            stts,
            ctts: None,
            stsc,
            sample_sizes: SampleSizes::Uniform(uniform_size),
            per_sample_sizes: Vec::new(),
            sample_count,
            chunk_offsets,
            sync_samples,
        }
    }
}

fn parse_stts(b: &BBox) -> Result<Vec<SttsEntry>, ContainerError> {
    let mut r = b.reader()?;
    r.skip(4).map_err(|e| ContainerError::from_binary("stts", e))?; // version+flags
    let count = r.read_u32().map_err(|e| ContainerError::from_binary("stts", e))?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let sample_count = r.read_u32().map_err(|e| ContainerError::from_binary("stts", e))?;
        let sample_delta = r.read_u32().map_err(|e| ContainerError::from_binary("stts", e))?;
        out.push(SttsEntry {
            sample_count,
            sample_delta,
        });
    }
    Ok(out)
}

fn parse_ctts(b: &BBox) -> Result<Vec<CttsEntry>, ContainerError> {
    let mut r = b.reader()?;
    let version = r.read_u8().map_err(|e| ContainerError::from_binary("ctts", e))?;
    r.skip(3).map_err(|e| ContainerError::from_binary("ctts", e))?;
    let count = r.read_u32().map_err(|e| ContainerError::from_binary("ctts", e))?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let sample_count = r.read_u32().map_err(|e| ContainerError::from_binary("ctts", e))?;
        let raw = r.read_u32().map_err(|e| ContainerError::from_binary("ctts", e))?;
        let sample_offset = if version == 1 { raw as i32 as i64 } else { raw as i64 };
        out.push(CttsEntry {
            sample_count,
            sample_offset,
        });
    }
    Ok(out)
}

fn parse_stsc(b: &BBox) -> Result<Vec<StscEntry>, ContainerError> {
    let mut r = b.reader()?;
    r.skip(4).map_err(|e| ContainerError::from_binary("stsc", e))?;
    let count = r.read_u32().map_err(|e| ContainerError::from_binary("stsc", e))?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let first_chunk = r.read_u32().map_err(|e| ContainerError::from_binary("stsc", e))?;
        let samples_per_chunk = r.read_u32().map_err(|e| ContainerError::from_binary("stsc", e))?;
        let sample_description_index =
            r.read_u32().map_err(|e| ContainerError::from_binary("stsc", e))?;
        out.push(StscEntry {
            first_chunk,
            samples_per_chunk,
            sample_description_index,
        });
    }
    Ok(out)
}

fn parse_stsz(b: &BBox) -> Result<(SampleSizes, Vec<u32>, u32), ContainerError> {
    let mut r = b.reader()?;
    r.skip(4).map_err(|e| ContainerError::from_binary("stsz", e))?;
    let uniform_size = r.read_u32().map_err(|e| ContainerError::from_binary("stsz", e))?;
    let sample_count = r.read_u32().map_err(|e| ContainerError::from_binary("stsz", e))?;
    if uniform_size != 0 {
        Ok((SampleSizes::Uniform(uniform_size), Vec::new(), sample_count))
    } else {
        let mut sizes = Vec::with_capacity(sample_count as usize);
        for _ in 0..sample_count {
            sizes.push(r.read_u32().map_err(|e| ContainerError::from_binary("stsz", e))?);
        }
        Ok((SampleSizes::PerSample, sizes, sample_count))
    }
}

fn parse_stco(b: &BBox) -> Result<Vec<u64>, ContainerError> {
    let mut r = b.reader()?;
    r.skip(4).map_err(|e| ContainerError::from_binary("stco", e))?;
    let count = r.read_u32().map_err(|e| ContainerError::from_binary("stco", e))?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(r.read_u32().map_err(|e| ContainerError::from_binary("stco", e))? as u64);
    }
    Ok(out)
}

fn parse_co64(b: &BBox) -> Result<Vec<u64>, ContainerError> {
    let mut r = b.reader()?;
    r.skip(4).map_err(|e| ContainerError::from_binary("co64", e))?;
    let count = r.read_u32().map_err(|e| ContainerError::from_binary("co64", e))?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(r.read_u64().map_err(|e| ContainerError::from_binary("co64", e))?);
    }
    Ok(out)
}

fn parse_stss(b: &BBox) -> Result<Vec<u32>, ContainerError> {
    let mut r = b.reader()?;
    r.skip(4).map_err(|e| ContainerError::from_binary("stss", e))?;
    let count = r.read_u32().map_err(|e| ContainerError::from_binary("stss", e))?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(r.read_u32().map_err(|e| ContainerError::from_binary("stss", e))?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::Writer;
    use crate::isobmff::parse_boxes;

    fn build_stbl(sample_count: u32, uniform_size: u32, chunk_offsets: &[u32]) -> Vec<u8> {
        let mut stts_payload = Writer::new();
        stts_payload.zeros(4);
        stts_payload.write_u32(1);
        stts_payload.write_u32(sample_count);
        stts_payload.write_u32(3000);
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
        stsz_payload.write_u32(uniform_size);
        stsz_payload.write_u32(sample_count);
        let mut stsz = Writer::new();
        stsz.write_box("stsz", &stsz_payload.into_bytes());

        let mut stco_payload = Writer::new();
        stco_payload.zeros(4);
        stco_payload.write_u32(chunk_offsets.len() as u32);
        for off in chunk_offsets {
            stco_payload.write_u32(*off);
        }
        let mut stco = Writer::new();
        stco.write_box("stco", &stco_payload.into_bytes());

        let mut stbl = Writer::new();
        stbl.write_container(
            "stbl",
            &[
                stts.into_bytes(),
                stsc.into_bytes(),
                stsz.into_bytes(),
                stco.into_bytes(),
            ],
        );
        stbl.into_bytes()
    }

    #[test]
    fn parses_uniform_size_table() {
        let data = build_stbl(90, 1024, &[0]);
        let boxes = parse_boxes(&data, 0, data.len() as u64).unwrap();
        let table = SampleTable::parse(&boxes[0]).unwrap();
        assert_eq!(table.sample_count, 90);
        assert_eq!(table.sample_size(0), Some(1024));
        assert_eq!(table.sample_size(89), Some(1024));
        assert_eq!(table.sample_size(90), None);
        assert!(table.all_samples_are_sync());
    }

    #[test]
    fn missing_stts_is_an_error() {
        let mut stbl = Writer::new();
        stbl.write_container("stbl", &[]);
        let data = stbl.into_bytes();
        let boxes = parse_boxes(&data, 0, data.len() as u64).unwrap();
        let err = SampleTable::parse(&boxes[0]).unwrap_err();
        assert_eq!(err, ContainerError::MissingBox("stts".to_string()));
    }
}
