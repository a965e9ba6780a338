//! ISOBMFF box-tree parsing and synthesis. Spec §4.2, §6.3.

pub mod file_info;
pub mod fmp4_writer;
pub mod sample_locator;
pub mod sample_table;

use crate::binary::Reader;
use crate::error::ContainerError;
use std::fmt;

/// Container box types that are recursively expanded during parsing.
/// Spec §6.3.
const CONTAINER_TYPES: &[&str] = &[
    "moov", "trak", "mdia", "minf", "stbl", "dinf", "edts", "mvex", "moof", "traf",
];

/// Box types whose payload is never materialized. Spec §4.2.
const OPAQUE_TYPES: &[&str] = &["mdat", "free", "skip"];

fn fourcc_to_string(fourcc: &[u8; 4]) -> String {
    String::from_utf8_lossy(fourcc).into_owned()
}

/// A node in the ISOBMFF tree. Spec §3 "Box".
#[derive(Clone)]
pub struct BBox<'a> {
    pub box_type: String,
    /// Total size including the header, per the on-disk `size` field
    /// (or computed from `end` for size-extends-to-end boxes).
    pub total_size: u64,
    /// 8 for a normal header, 16 when a 64-bit extended size was used.
    pub header_size: u64,
    /// Absolute offset of the first header byte within the original file.
    pub file_offset: u64,
    /// Borrowed payload bytes. `None` for container boxes and for the
    /// opaque types in [`OPAQUE_TYPES`] (`mdat` is never materialized).
    pub payload: Option<&'a [u8]>,
    pub children: Vec<BBox<'a>>,
}

impl<'a> fmt::Debug for BBox<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BBox")
            .field("box_type", &self.box_type)
            .field("total_size", &self.total_size)
            .field("header_size", &self.header_size)
            .field("file_offset", &self.file_offset)
            .field("children", &self.children.len())
            .finish()
    }
}

impl<'a> BBox<'a> {
    pub fn is_container(&self) -> bool {
        CONTAINER_TYPES.contains(&self.box_type.as_str())
    }

    pub fn is_opaque(&self) -> bool {
        OPAQUE_TYPES.contains(&self.box_type.as_str())
    }

    /// Absolute file offset of the first payload byte (after the header),
    /// used by the segmenter to locate `mdat` sample bytes without
    /// materializing them.
    pub fn payload_offset(&self) -> u64 {
        self.file_offset + self.header_size
    }

    pub fn payload_size(&self) -> u64 {
        self.total_size - self.header_size
    }

    pub fn find(&self, box_type: &str) -> Option<&BBox<'a>> {
        self.children.iter().find(|c| c.box_type == box_type)
    }

    pub fn find_all<'s>(&'s self, box_type: &'s str) -> impl Iterator<Item = &'s BBox<'a>> {
        self.children.iter().filter(move |c| c.box_type == box_type)
    }

    pub fn require(&self, box_type: &str) -> Result<&BBox<'a>, ContainerError> {
        self.find(box_type)
            .ok_or_else(|| ContainerError::MissingBox(box_type.to_string()))
    }

    /// A reader over this box's payload. Fails for opaque boxes, which
    /// have no materialized payload.
    pub fn reader(&self) -> Result<Reader<'a>, ContainerError> {
        let payload = self.payload.ok_or_else(|| ContainerError::InvalidBoxData {
            box_type: self.box_type.clone(),
            reason: "box has no materialized payload".to_string(),
        })?;
        Ok(Reader::new(payload))
    }
}

/// Parses every top-level box over `data[start..end)`, recursively
/// expanding container boxes. Spec §4.2.
pub fn parse_boxes<'a>(
    data: &'a [u8],
    start: u64,
    end: u64,
) -> Result<Vec<BBox<'a>>, ContainerError> {
    let mut boxes = Vec::new();
    let mut cursor = start;

    while cursor < end {
        let remaining = (end - cursor) as usize;
        let slice = &data[cursor as usize..];
        let b = parse_one_box(slice, cursor, remaining, data)?;
        cursor = b.file_offset + b.total_size;
        boxes.push(b);
    }

    Ok(boxes)
}

fn parse_one_box<'a>(
    slice: &'a [u8],
    file_offset: u64,
    remaining: usize,
    full_data: &'a [u8],
) -> Result<BBox<'a>, ContainerError> {
    let mut r = Reader::new(slice);
    let size32 = r
        .read_u32()
        .map_err(|e| ContainerError::from_binary("<box-header>", e))?;
    let box_type_raw = r
        .read_4cc()
        .map_err(|e| ContainerError::from_binary("<box-header>", e))?;
    let box_type = fourcc_to_string(&box_type_raw);

    let (total_size, header_size) = if size32 == 1 {
        let ext = r
            .read_u64()
            .map_err(|e| ContainerError::from_binary(&box_type, e))?;
        (ext, 16u64)
    } else if size32 == 0 {
        (remaining as u64, 8u64)
    } else {
        (size32 as u64, 8u64)
    };

    if total_size < header_size {
        return Err(ContainerError::InvalidBoxData {
            box_type,
            reason: format!("size {total_size} smaller than header {header_size}"),
        });
    }
    if total_size > remaining as u64 {
        return Err(ContainerError::InvalidBoxData {
            box_type,
            reason: format!(
                "box declares size {total_size} but only {remaining} bytes remain"
            ),
        });
    }

    let payload_len = (total_size - header_size) as usize;
    let payload_start = file_offset + header_size;

    let is_opaque = OPAQUE_TYPES.contains(&box_type.as_str());
    let is_container = CONTAINER_TYPES.contains(&box_type.as_str());

    let (payload, children) = if is_opaque {
        log::trace!("skipping opaque box '{box_type}' ({payload_len} bytes) at offset {file_offset}");
        (None, Vec::new())
    } else if is_container {
        let children = parse_boxes(full_data, payload_start, payload_start + payload_len as u64)?;
        (None, children)
    } else {
        let start = payload_start as usize;
        let payload = full_data
            .get(start..start + payload_len)
            .ok_or_else(|| ContainerError::InvalidBoxData {
                box_type: box_type.clone(),
                reason: "payload out of bounds".to_string(),
            })?;
        (Some(payload), Vec::new())
    };

    Ok(BBox {
        box_type,
        total_size,
        header_size,
        file_offset,
        payload,
        children,
    })
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use crate::binary::Writer;

    /// Builds a minimal `ftyp` box for use in tests elsewhere in the crate.
    pub fn ftyp_box(major: &str, compatible: &[&str]) -> Vec<u8> {
        let mut payload = Writer::new();
        payload.write_4cc(major);
        payload.write_u32(0);
        for c in compatible {
            payload.write_4cc(c);
        }
        let mut w = Writer::new();
        w.write_box("ftyp", &payload.into_bytes());
        w.into_bytes()
    }
}
