use std::fmt::{self, Display, Formatter};

use binrw::{BinRead, BinWrite};

pub const MAGIC: [u8; 4] = *b"wglv";
pub const MAX_VERSION: u32 = 1;

pub const HEADER_SIZE: usize = 12;
pub const LUMP_ENTRY_SIZE: usize = 12;
pub const VERTEX_LUMP_HEADER_SIZE: usize = 8;

/// Four ASCII bytes naming a lump, stored in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BinRead, BinWrite)]
pub struct LumpTag(pub [u8; 4]);

impl LumpTag {
    pub const VERTEX: LumpTag = LumpTag(*b"vert");
    pub const INDEX: LumpTag = LumpTag(*b"indx");
}

impl Display for LumpTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            if byte.is_ascii_graphic() {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{:02x}", byte)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"wglv")]
pub struct ContainerHeader {
    pub version: u32,
    pub lump_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct LumpEntry {
    pub tag: LumpTag,
    pub offset: u32,
    pub length: u32,
}

impl LumpEntry {
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.length as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct VertexLumpHeader {
    pub format_flags: u32,
    pub stride: u32,
}
