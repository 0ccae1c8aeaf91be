//! Dyld shared cache binary structures.
//!
//! These match the single-file cache layout: a variable-length header whose
//! real extent is announced by `mapping_offset`, a small mapping table, and
//! an image-info table. Caches are little-endian; no byte swapping applies.

use std::mem::offset_of;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// The leading bytes of every supported cache ("dyld_v1 " + arch tag).
pub const DSC_MAGIC: &[u8; 8] = b"dyld_v1 ";

/// Most mappings a cache may carry.
pub const DSC_MAPPING_MAX: u32 = 16;

/// The fixed header prefix of a dyld shared cache.
///
/// Fields past `mapping_offset` only exist when `mapping_offset` says the
/// header extends that far; gate reads with [`DscHeader::contains_field`].
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DscHeader {
    /// Magic identifier, e.g. "dyld_v1   arm64"
    pub magic: [u8; 16],
    /// File offset to the first mapping record
    pub mapping_offset: u32,
    /// Number of mapping records
    pub mapping_count: u32,
    /// File offset to the first image record
    pub images_offset: u32,
    /// Number of image records
    pub images_count: u32,
    /// Base address of dyld when the cache was built
    pub dyld_base_address: u64,
    /// File offset of the code signature
    pub code_signature_offset: u64,
    /// Size of the code signature
    pub code_signature_size: u64,
    /// File offset of slide info
    pub slide_info_offset: u64,
    /// Size of slide info
    pub slide_info_size: u64,
    /// File offset of local symbols info
    pub local_symbols_offset: u64,
    /// Size of local symbols info
    pub local_symbols_size: u64,
    /// UUID of this cache
    pub uuid: [u8; 16],
}

impl DscHeader {
    /// Size of this header prefix in bytes.
    pub const SIZE: usize = 104;

    /// Returns the architecture tag from the magic string.
    pub fn architecture(&self) -> &str {
        let tag = &self.magic[DSC_MAGIC.len()..];
        let end = tag.iter().position(|&b| b == 0).unwrap_or(tag.len());
        std::str::from_utf8(&tag[..end]).unwrap_or("").trim()
    }

    /// Returns true when the header is long enough to contain the field at
    /// `field_offset`. `mapping_offset` doubles as the header length.
    #[inline]
    pub fn contains_field(&self, field_offset: usize) -> bool {
        self.mapping_offset as usize > field_offset
    }

    /// Returns the cache UUID when the header carries one.
    pub fn cache_uuid(&self) -> Option<[u8; 16]> {
        self.contains_field(offset_of!(DscHeader, uuid)).then_some(self.uuid)
    }
}

/// One cache mapping record.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DscMappingInfo {
    /// Virtual memory address
    pub address: u64,
    /// Size in bytes
    pub size: u64,
    /// File offset
    pub file_offset: u64,
    /// Maximum protection
    pub max_prot: u32,
    /// Initial protection
    pub init_prot: u32,
}

impl DscMappingInfo {
    /// Size of a mapping record.
    pub const SIZE: usize = 32;

    /// Returns true if this mapping contains the given virtual address.
    #[inline]
    pub fn contains_addr(&self, addr: u64) -> bool {
        addr >= self.address && addr - self.address < self.size
    }

    /// Converts a virtual address to a file offset.
    #[inline]
    pub fn addr_to_offset(&self, addr: u64) -> u64 {
        self.file_offset + (addr - self.address)
    }
}

/// One cache image record.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DscImageInfo {
    /// Virtual address of the image's Mach-O header
    pub address: u64,
    /// Modification time of the source dylib
    pub mod_time: u64,
    /// Inode of the source dylib
    pub inode: u64,
    /// File offset of the NUL-terminated image path
    pub path_file_offset: u32,
    /// Scratch word (unused on disk)
    pub pad: u32,
}

impl DscImageInfo {
    /// Size of an image record.
    pub const SIZE: usize = 32;
}
