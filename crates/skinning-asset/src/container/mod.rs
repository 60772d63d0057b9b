use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    io::{self, Cursor, Seek, SeekFrom, Write},
    iter,
    ops::Range,
};

use binrw::{BinRead, BinWrite, BinWriterExt};
use log::debug;

use crate::vertex::VertexFormat;

mod format;

pub use format::{
    ContainerHeader, LumpEntry, LumpTag, VertexLumpHeader, HEADER_SIZE, LUMP_ENTRY_SIZE, MAGIC,
    MAX_VERSION, VERTEX_LUMP_HEADER_SIZE,
};

#[derive(Debug)]
pub enum ContainerError {
    BadMagic,
    UnsupportedVersion(u32),
    Truncated { expected: u64, actual: u64 },
    LumpOutOfBounds { tag: LumpTag, offset: u32, length: u32, total: u64 },
    VertexLumpTooShort(u32),
    BadStride,
    MisalignedIndexLump(u32),
    MissingLump(LumpTag),
    Binary(binrw::Error),
    Io(io::Error),
}

impl Display for ContainerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ContainerError::BadMagic => write!(f, "bad magic"),
            ContainerError::UnsupportedVersion(version) => {
                write!(f, "unsupported version: {}", version)
            }
            ContainerError::Truncated { expected, actual } => write!(
                f,
                "Container truncated: want {} bytes, but only {} present",
                expected, actual
            ),
            ContainerError::LumpOutOfBounds {
                tag,
                offset,
                length,
                total,
            } => write!(
                f,
                "Lump \"{}\" at {}+{} exceeds container length {}",
                tag, offset, length, total
            ),
            ContainerError::VertexLumpTooShort(length) => {
                write!(f, "Vertex lump of {} bytes has no room for its header", length)
            }
            ContainerError::BadStride => write!(f, "Vertex stride is zero"),
            ContainerError::MisalignedIndexLump(length) => {
                write!(f, "Index lump length {} is not a multiple of 2", length)
            }
            ContainerError::MissingLump(tag) => write!(f, "Container has no \"{}\" lump", tag),
            ContainerError::Binary(err) => Display::fmt(err, f),
            ContainerError::Io(err) => Display::fmt(err, f),
        }
    }
}

impl Error for ContainerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ContainerError::Binary(err) => Some(err),
            ContainerError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<binrw::Error> for ContainerError {
    fn from(value: binrw::Error) -> Self {
        match value {
            binrw::Error::BadMagic { .. } => ContainerError::BadMagic,
            err => ContainerError::Binary(err),
        }
    }
}

impl From<io::Error> for ContainerError {
    fn from(value: io::Error) -> Self {
        ContainerError::Io(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LumpPayload {
    Vertex {
        format_flags: u32,
        stride: u32,
        data: Vec<u8>,
    },
    Index(Vec<u16>),
    /// Lumps with a tag this reader does not know, kept verbatim.
    Unknown(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lump {
    pub tag: LumpTag,
    pub offset: u32,
    pub payload: LumpPayload,
}

impl Lump {
    pub fn byte_length(&self) -> u32 {
        let length = match &self.payload {
            LumpPayload::Vertex { data, .. } => VERTEX_LUMP_HEADER_SIZE + data.len(),
            LumpPayload::Index(indices) => indices.len() * 2,
            LumpPayload::Unknown(data) => data.len(),
        };
        length as u32
    }

    fn decode(entry: &LumpEntry, bytes: &[u8]) -> Result<Self, ContainerError> {
        let payload = match entry.tag {
            LumpTag::VERTEX => {
                if bytes.len() < VERTEX_LUMP_HEADER_SIZE {
                    return Err(ContainerError::VertexLumpTooShort(entry.length));
                }
                let header = VertexLumpHeader::read(&mut Cursor::new(bytes))?;
                if header.stride == 0 {
                    return Err(ContainerError::BadStride);
                }
                LumpPayload::Vertex {
                    format_flags: header.format_flags,
                    stride: header.stride,
                    data: bytes[VERTEX_LUMP_HEADER_SIZE..].to_vec(),
                }
            }
            LumpTag::INDEX => {
                if bytes.len() % 2 != 0 {
                    return Err(ContainerError::MisalignedIndexLump(entry.length));
                }
                let indices = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                LumpPayload::Index(indices)
            }
            tag => {
                debug!("Skipping unknown lump \"{}\" ({} bytes)", tag, entry.length);
                LumpPayload::Unknown(bytes.to_vec())
            }
        };
        Ok(Self {
            tag: entry.tag,
            offset: entry.offset,
            payload,
        })
    }
}

/// Bytes past the directory that no lump covers, such as alignment padding
/// between lumps or after the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filler {
    pub offset: u64,
    pub data: Vec<u8>,
}

fn uncovered_spans(start: u64, mut covered: Vec<Range<u64>>, bytes: &[u8]) -> Vec<Filler> {
    let total = bytes.len() as u64;
    covered.sort_by_key(|range| range.start);
    let mut fillers = Vec::new();
    let mut cursor = start;
    for range in covered.into_iter().chain(iter::once(total..total)) {
        if range.start > cursor {
            fillers.push(Filler {
                offset: cursor,
                data: bytes[cursor as usize..range.start as usize].to_vec(),
            });
        }
        cursor = cursor.max(range.end);
    }
    fillers
}

/// Geometry decoded from a container: the vertex format descriptor, the raw
/// interleaved vertex records and the triangle indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshData {
    pub vertex_format: VertexFormat,
    pub vertex_stride: u32,
    pub vertex_bytes: Vec<u8>,
    pub indices: Vec<u16>,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.vertex_bytes.len() / self.vertex_stride as usize
    }
}

/// A parsed binary mesh container.
///
/// Every lump is kept in directory order together with its declared offset,
/// and the bytes between and after lumps are kept as fillers, so
/// [`MeshContainer::encode`] reproduces a well-formed input byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshContainer {
    pub version: u32,
    pub lumps: Vec<Lump>,
    pub fillers: Vec<Filler>,
}

impl MeshContainer {
    pub fn parse(bytes: &[u8]) -> Result<Self, ContainerError> {
        let total = bytes.len() as u64;
        if total < HEADER_SIZE as u64 {
            return Err(ContainerError::Truncated {
                expected: HEADER_SIZE as u64,
                actual: total,
            });
        }

        let mut cursor = Cursor::new(bytes);
        let header = ContainerHeader::read(&mut cursor)?;
        if header.version > MAX_VERSION {
            return Err(ContainerError::UnsupportedVersion(header.version));
        }

        let directory_end = HEADER_SIZE as u64 + header.lump_count as u64 * LUMP_ENTRY_SIZE as u64;
        if directory_end > total {
            return Err(ContainerError::Truncated {
                expected: directory_end,
                actual: total,
            });
        }

        let mut lumps = Vec::with_capacity(header.lump_count as usize);
        let mut covered = Vec::with_capacity(header.lump_count as usize);
        for _ in 0..header.lump_count {
            let entry = LumpEntry::read(&mut cursor)?;
            if entry.end() > total {
                return Err(ContainerError::LumpOutOfBounds {
                    tag: entry.tag,
                    offset: entry.offset,
                    length: entry.length,
                    total,
                });
            }
            let payload = &bytes[entry.offset as usize..entry.end() as usize];
            lumps.push(Lump::decode(&entry, payload)?);
            covered.push(entry.offset as u64..entry.end());
        }

        Ok(Self {
            version: header.version,
            lumps,
            fillers: uncovered_spans(directory_end, covered, bytes),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ContainerError> {
        let mut cursor = Cursor::new(Vec::new());
        ContainerHeader {
            version: self.version,
            lump_count: self.lumps.len() as u32,
        }
        .write(&mut cursor)?;
        for lump in &self.lumps {
            LumpEntry {
                tag: lump.tag,
                offset: lump.offset,
                length: lump.byte_length(),
            }
            .write(&mut cursor)?;
        }

        for lump in &self.lumps {
            // Seeking past the end zero-fills the gap once written.
            cursor.seek(SeekFrom::Start(lump.offset as u64))?;
            match &lump.payload {
                LumpPayload::Vertex {
                    format_flags,
                    stride,
                    data,
                } => {
                    VertexLumpHeader {
                        format_flags: *format_flags,
                        stride: *stride,
                    }
                    .write(&mut cursor)?;
                    cursor.write_all(data)?;
                }
                LumpPayload::Index(indices) => {
                    for index in indices {
                        cursor.write_le(index)?;
                    }
                }
                LumpPayload::Unknown(data) => cursor.write_all(data)?,
            }
        }
        for filler in &self.fillers {
            cursor.seek(SeekFrom::Start(filler.offset))?;
            cursor.write_all(&filler.data)?;
        }

        Ok(cursor.into_inner())
    }

    /// Build a container holding one vertex lump followed by one index lump,
    /// packed directly after the directory on 4 byte boundaries.
    pub fn from_mesh(mesh: &MeshData) -> Self {
        fn align4(offset: usize) -> usize {
            (offset + 3) & !3
        }

        let vertex_offset = HEADER_SIZE + 2 * LUMP_ENTRY_SIZE;
        let vertex_length = VERTEX_LUMP_HEADER_SIZE + mesh.vertex_bytes.len();
        let index_offset = align4(vertex_offset + vertex_length);
        Self {
            version: MAX_VERSION,
            lumps: vec![
                Lump {
                    tag: LumpTag::VERTEX,
                    offset: vertex_offset as u32,
                    payload: LumpPayload::Vertex {
                        format_flags: mesh.vertex_format.flags(),
                        stride: mesh.vertex_stride,
                        data: mesh.vertex_bytes.clone(),
                    },
                },
                Lump {
                    tag: LumpTag::INDEX,
                    offset: index_offset as u32,
                    payload: LumpPayload::Index(mesh.indices.clone()),
                },
            ],
            fillers: Vec::new(),
        }
    }

    /// Extract the geometry. When a lump kind repeats, the last one wins.
    pub fn mesh(&self) -> Result<MeshData, ContainerError> {
        let mut vertex = None;
        let mut indices = None;
        for lump in &self.lumps {
            match &lump.payload {
                LumpPayload::Vertex {
                    format_flags,
                    stride,
                    data,
                } => vertex = Some((*format_flags, *stride, data)),
                LumpPayload::Index(items) => indices = Some(items),
                LumpPayload::Unknown(_) => (),
            }
        }

        let (format_flags, vertex_stride, vertex_bytes) =
            vertex.ok_or(ContainerError::MissingLump(LumpTag::VERTEX))?;
        let indices = indices.ok_or(ContainerError::MissingLump(LumpTag::INDEX))?;
        Ok(MeshData {
            vertex_format: VertexFormat::from_flags(format_flags),
            vertex_stride,
            vertex_bytes: vertex_bytes.clone(),
            indices: indices.clone(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn lump_entry(tag: &[u8; 4], offset: u32, length: u32) -> Vec<u8> {
        let mut bytes = tag.to_vec();
        bytes.extend_from_slice(&offset.to_le_bytes());
        bytes.extend_from_slice(&length.to_le_bytes());
        bytes
    }

    /// One vertex lump with stride 12 holding two records, one index lump with
    /// three indices, laid out by hand.
    fn sample_container() -> Vec<u8> {
        let mut bytes = b"wglv".to_vec();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        // 12 + 24 = 36: vertex lump is 8 + 24 bytes, index lump follows at 68
        bytes.extend(lump_entry(b"vert", 36, 32));
        bytes.extend(lump_entry(b"indx", 68, 6));
        bytes.extend_from_slice(&0x01u32.to_le_bytes());
        bytes.extend_from_slice(&12u32.to_le_bytes());
        for value in [0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        for index in [0u16, 1, 0] {
            bytes.extend_from_slice(&index.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_parse_two_lumps() {
        let container = MeshContainer::parse(&sample_container()).unwrap();
        assert_eq!(container.version, 1);
        assert_eq!(container.lumps.len(), 2);

        let mesh = container.mesh().unwrap();
        assert_eq!(mesh.vertex_stride, 12);
        assert_eq!(mesh.vertex_bytes.len(), 24);
        assert_eq!(mesh.vertex_count(), 24 / 12);
        assert!(mesh.vertex_format.position());
        assert!(!mesh.vertex_format.normal());
        assert_eq!(mesh.indices, vec![0, 1, 0]);
        assert_eq!(mesh.indices.len(), 3);
    }

    #[test]
    fn test_round_trip_is_byte_exact() {
        let bytes = sample_container();
        let container = MeshContainer::parse(&bytes).unwrap();
        assert_eq!(container.encode().unwrap(), bytes);
    }

    #[test]
    fn test_round_trip_keeps_unknown_lumps_and_gaps() {
        let mut bytes = b"wglv".to_vec();
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&3u32.to_le_bytes());
        // directory ends at 48; the unknown lump comes first in the file
        bytes.extend(lump_entry(b"indx", 60, 4));
        bytes.extend(lump_entry(b"meta", 48, 5));
        bytes.extend(lump_entry(b"vert", 64, 8));
        bytes.extend_from_slice(b"hello");
        bytes.extend_from_slice(&[0; 7]);
        bytes.extend_from_slice(&[7, 0, 9, 0]);
        bytes.extend_from_slice(&0x41u32.to_le_bytes());
        bytes.extend_from_slice(&72u32.to_le_bytes());

        let container = MeshContainer::parse(&bytes).unwrap();
        assert_eq!(
            container.lumps[1].payload,
            LumpPayload::Unknown(b"hello".to_vec())
        );
        assert_eq!(container.encode().unwrap(), bytes);

        let mesh = container.mesh().unwrap();
        assert_eq!(mesh.vertex_count(), 0);
        assert_eq!(mesh.indices, vec![7, 9]);
    }

    #[test]
    fn test_round_trip_keeps_trailing_padding() {
        let mut bytes = b"wglv".to_vec();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend(lump_entry(b"indx", 24, 6));
        for index in [0u16, 1, 2] {
            bytes.extend_from_slice(&index.to_le_bytes());
        }
        bytes.extend_from_slice(&[0, 0]);

        let container = MeshContainer::parse(&bytes).unwrap();
        assert_eq!(
            container.fillers,
            vec![Filler {
                offset: 30,
                data: vec![0, 0]
            }]
        );
        assert_eq!(container.encode().unwrap(), bytes);
    }

    #[test]
    fn test_round_trip_keeps_gap_bytes() {
        let mut bytes = sample_container();
        // move the index lump 4 bytes on and fill the gap with junk
        bytes[28..32].copy_from_slice(&72u32.to_le_bytes());
        let indices = bytes.split_off(68);
        bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        bytes.extend(indices);

        let container = MeshContainer::parse(&bytes).unwrap();
        assert_eq!(container.fillers.len(), 1);
        assert_eq!(container.fillers[0].offset, 68);
        assert_eq!(container.encode().unwrap(), bytes);
        assert_eq!(container.mesh().unwrap().indices, vec![0, 1, 0]);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample_container();
        bytes[0] = b'x';
        let err = MeshContainer::parse(&bytes).unwrap_err();
        assert!(matches!(err, ContainerError::BadMagic));
        assert_eq!(err.to_string(), "bad magic");
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = sample_container();
        bytes[4..8].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(
            MeshContainer::parse(&bytes),
            Err(ContainerError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_truncated_directory() {
        let mut bytes = sample_container();
        bytes[8..12].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(
            MeshContainer::parse(&bytes),
            Err(ContainerError::Truncated { .. })
        ));
        assert!(matches!(
            MeshContainer::parse(b"wglv"),
            Err(ContainerError::Truncated { .. })
        ));
    }

    #[test]
    fn test_lump_out_of_bounds() {
        let mut bytes = sample_container();
        // index lump length pushed past the end
        bytes[32..36].copy_from_slice(&8u32.to_le_bytes());
        assert!(matches!(
            MeshContainer::parse(&bytes),
            Err(ContainerError::LumpOutOfBounds { tag: LumpTag::INDEX, .. })
        ));
    }

    #[test]
    fn test_bad_lumps() {
        let mut zero_stride = sample_container();
        zero_stride[40..44].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            MeshContainer::parse(&zero_stride),
            Err(ContainerError::BadStride)
        ));

        let mut odd_index = sample_container();
        odd_index[32..36].copy_from_slice(&5u32.to_le_bytes());
        assert!(matches!(
            MeshContainer::parse(&odd_index),
            Err(ContainerError::MisalignedIndexLump(5))
        ));
    }

    #[test]
    fn test_missing_index_lump() {
        let mut bytes = sample_container();
        bytes[8..12].copy_from_slice(&1u32.to_le_bytes());
        let container = MeshContainer::parse(&bytes).unwrap();
        assert!(matches!(
            container.mesh(),
            Err(ContainerError::MissingLump(LumpTag::INDEX))
        ));
    }

    #[test]
    fn test_from_mesh_parses_back() {
        let mesh = MeshData {
            vertex_format: VertexFormat::from_flags(0x01),
            vertex_stride: 12,
            vertex_bytes: vec![1; 36],
            indices: vec![0, 1, 2, 2, 1, 0],
        };
        let bytes = MeshContainer::from_mesh(&mesh).encode().unwrap();
        let container = MeshContainer::parse(&bytes).unwrap();
        assert_eq!(container.mesh().unwrap(), mesh);
        assert_eq!(container.encode().unwrap(), bytes);
    }
}
