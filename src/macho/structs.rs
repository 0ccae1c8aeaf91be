//! Mach-O binary structures.
//!
//! These structures match the on-disk format of Mach-O files as laid out in
//! the byte order the magic announces. Each endian-sensitive struct has a
//! `byte_swapped()` that reverses every integer field, applied once right
//! after the zero-copy read when the slice uses the opposite byte order.
//! Fat container records are always big-endian and are always swapped on
//! little-endian hosts.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::constants::*;

// =============================================================================
// Headers
// =============================================================================

/// 32-bit Mach-O header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct MachHeader32 {
    /// Magic number (MH_MAGIC)
    pub magic: u32,
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File type
    pub filetype: u32,
    /// Number of load commands
    pub ncmds: u32,
    /// Size of load commands
    pub sizeofcmds: u32,
    /// Flags
    pub flags: u32,
}

impl MachHeader32 {
    /// Size of the header in bytes.
    pub const SIZE: usize = 28;

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.magic = self.magic.swap_bytes();
        self.cputype = self.cputype.swap_bytes();
        self.cpusubtype = self.cpusubtype.swap_bytes();
        self.filetype = self.filetype.swap_bytes();
        self.ncmds = self.ncmds.swap_bytes();
        self.sizeofcmds = self.sizeofcmds.swap_bytes();
        self.flags = self.flags.swap_bytes();
        self
    }
}

/// 64-bit Mach-O header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct MachHeader64 {
    /// Magic number (MH_MAGIC_64)
    pub magic: u32,
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File type
    pub filetype: u32,
    /// Number of load commands
    pub ncmds: u32,
    /// Size of load commands
    pub sizeofcmds: u32,
    /// Flags
    pub flags: u32,
    /// Reserved
    pub reserved: u32,
}

impl MachHeader64 {
    /// Size of the header in bytes.
    pub const SIZE: usize = 32;

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.magic = self.magic.swap_bytes();
        self.cputype = self.cputype.swap_bytes();
        self.cpusubtype = self.cpusubtype.swap_bytes();
        self.filetype = self.filetype.swap_bytes();
        self.ncmds = self.ncmds.swap_bytes();
        self.sizeofcmds = self.sizeofcmds.swap_bytes();
        self.flags = self.flags.swap_bytes();
        self.reserved = self.reserved.swap_bytes();
        self
    }
}

// =============================================================================
// Fat Container
// =============================================================================

/// Fat container header (always big-endian on disk).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FatHeader {
    /// FAT_MAGIC or FAT_MAGIC_64
    pub magic: u32,
    /// Number of architecture records that follow
    pub nfat_arch: u32,
}

impl FatHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 8;

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.magic = self.magic.swap_bytes();
        self.nfat_arch = self.nfat_arch.swap_bytes();
        self
    }
}

/// 32-bit fat architecture record.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FatArch32 {
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File offset of the contained thin image
    pub offset: u32,
    /// Size of the contained thin image
    pub size: u32,
    /// Alignment of the image as a power of 2
    pub align: u32,
}

impl FatArch32 {
    /// Size of the record in bytes.
    pub const SIZE: usize = 20;

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.cputype = self.cputype.swap_bytes();
        self.cpusubtype = self.cpusubtype.swap_bytes();
        self.offset = self.offset.swap_bytes();
        self.size = self.size.swap_bytes();
        self.align = self.align.swap_bytes();
        self
    }
}

/// 64-bit fat architecture record.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FatArch64 {
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File offset of the contained thin image
    pub offset: u64,
    /// Size of the contained thin image
    pub size: u64,
    /// Alignment of the image as a power of 2
    pub align: u32,
    /// Reserved
    pub reserved: u32,
}

impl FatArch64 {
    /// Size of the record in bytes.
    pub const SIZE: usize = 32;

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.cputype = self.cputype.swap_bytes();
        self.cpusubtype = self.cpusubtype.swap_bytes();
        self.offset = self.offset.swap_bytes();
        self.size = self.size.swap_bytes();
        self.align = self.align.swap_bytes();
        self.reserved = self.reserved.swap_bytes();
        self
    }
}

// =============================================================================
// Load Command Header
// =============================================================================

/// Generic load command header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct LoadCommand {
    /// Type of load command
    pub cmd: u32,
    /// Size of load command
    pub cmdsize: u32,
}

impl LoadCommand {
    /// Size of the load command header.
    pub const SIZE: usize = 8;

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.cmd = self.cmd.swap_bytes();
        self.cmdsize = self.cmdsize.swap_bytes();
        self
    }
}

// =============================================================================
// Segments and Sections
// =============================================================================

/// 32-bit segment command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SegmentCommand32 {
    /// LC_SEGMENT
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub vmaddr: u32,
    /// Virtual memory size
    pub vmsize: u32,
    /// File offset
    pub fileoff: u32,
    /// Amount of file to map
    pub filesize: u32,
    /// Maximum VM protection
    pub maxprot: u32,
    /// Initial VM protection
    pub initprot: u32,
    /// Number of sections
    pub nsects: u32,
    /// Flags
    pub flags: u32,
}

impl SegmentCommand32 {
    /// Size of the segment command (without sections).
    pub const SIZE: usize = 56;

    /// Returns the segment name as a string.
    pub fn name(&self) -> &str {
        segment_name(&self.segname)
    }

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.cmd = self.cmd.swap_bytes();
        self.cmdsize = self.cmdsize.swap_bytes();
        self.vmaddr = self.vmaddr.swap_bytes();
        self.vmsize = self.vmsize.swap_bytes();
        self.fileoff = self.fileoff.swap_bytes();
        self.filesize = self.filesize.swap_bytes();
        self.maxprot = self.maxprot.swap_bytes();
        self.initprot = self.initprot.swap_bytes();
        self.nsects = self.nsects.swap_bytes();
        self.flags = self.flags.swap_bytes();
        self
    }
}

/// 64-bit segment command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SegmentCommand64 {
    /// LC_SEGMENT_64
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub vmaddr: u64,
    /// Virtual memory size
    pub vmsize: u64,
    /// File offset
    pub fileoff: u64,
    /// Amount of file to map
    pub filesize: u64,
    /// Maximum VM protection
    pub maxprot: u32,
    /// Initial VM protection
    pub initprot: u32,
    /// Number of sections
    pub nsects: u32,
    /// Flags
    pub flags: u32,
}

impl SegmentCommand64 {
    /// Size of the segment command (without sections).
    pub const SIZE: usize = 72;

    /// Returns the segment name as a string.
    pub fn name(&self) -> &str {
        segment_name(&self.segname)
    }

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.cmd = self.cmd.swap_bytes();
        self.cmdsize = self.cmdsize.swap_bytes();
        self.vmaddr = self.vmaddr.swap_bytes();
        self.vmsize = self.vmsize.swap_bytes();
        self.fileoff = self.fileoff.swap_bytes();
        self.filesize = self.filesize.swap_bytes();
        self.maxprot = self.maxprot.swap_bytes();
        self.initprot = self.initprot.swap_bytes();
        self.nsects = self.nsects.swap_bytes();
        self.flags = self.flags.swap_bytes();
        self
    }
}

/// 32-bit section.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Section32 {
    /// Section name (16 bytes, null-padded)
    pub sectname: [u8; 16],
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub addr: u32,
    /// Size in bytes
    pub size: u32,
    /// File offset
    pub offset: u32,
    /// Alignment (power of 2)
    pub align: u32,
    /// File offset of relocation entries
    pub reloff: u32,
    /// Number of relocation entries
    pub nreloc: u32,
    /// Flags
    pub flags: u32,
    /// Reserved
    pub reserved1: u32,
    /// Reserved
    pub reserved2: u32,
}

impl Section32 {
    /// Size of a section entry.
    pub const SIZE: usize = 68;

    /// Returns the section name as a string.
    pub fn name(&self) -> &str {
        segment_name(&self.sectname)
    }

    /// Returns the containing segment name as a string.
    pub fn segment_name(&self) -> &str {
        segment_name(&self.segname)
    }

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.addr = self.addr.swap_bytes();
        self.size = self.size.swap_bytes();
        self.offset = self.offset.swap_bytes();
        self.align = self.align.swap_bytes();
        self.reloff = self.reloff.swap_bytes();
        self.nreloc = self.nreloc.swap_bytes();
        self.flags = self.flags.swap_bytes();
        self.reserved1 = self.reserved1.swap_bytes();
        self.reserved2 = self.reserved2.swap_bytes();
        self
    }
}

/// 64-bit section.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Section64 {
    /// Section name (16 bytes, null-padded)
    pub sectname: [u8; 16],
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub addr: u64,
    /// Size in bytes
    pub size: u64,
    /// File offset
    pub offset: u32,
    /// Alignment (power of 2)
    pub align: u32,
    /// File offset of relocation entries
    pub reloff: u32,
    /// Number of relocation entries
    pub nreloc: u32,
    /// Flags
    pub flags: u32,
    /// Reserved
    pub reserved1: u32,
    /// Reserved
    pub reserved2: u32,
    /// Reserved
    pub reserved3: u32,
}

impl Section64 {
    /// Size of a section entry.
    pub const SIZE: usize = 80;

    /// Returns the section name as a string.
    pub fn name(&self) -> &str {
        segment_name(&self.sectname)
    }

    /// Returns the containing segment name as a string.
    pub fn segment_name(&self) -> &str {
        segment_name(&self.segname)
    }

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.addr = self.addr.swap_bytes();
        self.size = self.size.swap_bytes();
        self.offset = self.offset.swap_bytes();
        self.align = self.align.swap_bytes();
        self.reloff = self.reloff.swap_bytes();
        self.nreloc = self.nreloc.swap_bytes();
        self.flags = self.flags.swap_bytes();
        self.reserved1 = self.reserved1.swap_bytes();
        self.reserved2 = self.reserved2.swap_bytes();
        self.reserved3 = self.reserved3.swap_bytes();
        self
    }
}

// =============================================================================
// Symbol Tables
// =============================================================================

/// Symbol table command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SymtabCommand {
    /// LC_SYMTAB
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Symbol table offset
    pub symoff: u32,
    /// Number of symbol table entries
    pub nsyms: u32,
    /// String table offset
    pub stroff: u32,
    /// String table size in bytes
    pub strsize: u32,
}

impl SymtabCommand {
    /// Size of this command.
    pub const SIZE: usize = 24;

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.cmd = self.cmd.swap_bytes();
        self.cmdsize = self.cmdsize.swap_bytes();
        self.symoff = self.symoff.swap_bytes();
        self.nsyms = self.nsyms.swap_bytes();
        self.stroff = self.stroff.swap_bytes();
        self.strsize = self.strsize.swap_bytes();
        self
    }
}

/// Dynamic symbol table command.
///
/// Only the externally-defined range is consumed here; the remaining fields
/// are carried so the command round-trips through the byte swap intact.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DysymtabCommand {
    /// LC_DYSYMTAB
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Index of local symbols
    pub ilocalsym: u32,
    /// Number of local symbols
    pub nlocalsym: u32,
    /// Index of externally defined symbols
    pub iextdefsym: u32,
    /// Number of externally defined symbols
    pub nextdefsym: u32,
    /// Index of undefined symbols
    pub iundefsym: u32,
    /// Number of undefined symbols
    pub nundefsym: u32,
    /// File offset to table of contents
    pub tocoff: u32,
    /// Number of entries in table of contents
    pub ntoc: u32,
    /// File offset to module table
    pub modtaboff: u32,
    /// Number of module table entries
    pub nmodtab: u32,
    /// Offset to referenced symbol table
    pub extrefsymoff: u32,
    /// Number of referenced symbol table entries
    pub nextrefsyms: u32,
    /// File offset to the indirect symbol table
    pub indirectsymoff: u32,
    /// Number of indirect symbol table entries
    pub nindirectsyms: u32,
    /// Offset to external relocation entries
    pub extreloff: u32,
    /// Number of external relocation entries
    pub nextrel: u32,
    /// Offset to local relocation entries
    pub locreloff: u32,
    /// Number of local relocation entries
    pub nlocrel: u32,
}

impl DysymtabCommand {
    /// Size of this command.
    pub const SIZE: usize = 80;

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.cmd = self.cmd.swap_bytes();
        self.cmdsize = self.cmdsize.swap_bytes();
        self.ilocalsym = self.ilocalsym.swap_bytes();
        self.nlocalsym = self.nlocalsym.swap_bytes();
        self.iextdefsym = self.iextdefsym.swap_bytes();
        self.nextdefsym = self.nextdefsym.swap_bytes();
        self.iundefsym = self.iundefsym.swap_bytes();
        self.nundefsym = self.nundefsym.swap_bytes();
        self.tocoff = self.tocoff.swap_bytes();
        self.ntoc = self.ntoc.swap_bytes();
        self.modtaboff = self.modtaboff.swap_bytes();
        self.nmodtab = self.nmodtab.swap_bytes();
        self.extrefsymoff = self.extrefsymoff.swap_bytes();
        self.nextrefsyms = self.nextrefsyms.swap_bytes();
        self.indirectsymoff = self.indirectsymoff.swap_bytes();
        self.nindirectsyms = self.nindirectsyms.swap_bytes();
        self.extreloff = self.extreloff.swap_bytes();
        self.nextrel = self.nextrel.swap_bytes();
        self.locreloff = self.locreloff.swap_bytes();
        self.nlocrel = self.nlocrel.swap_bytes();
        self
    }
}

/// 32-bit symbol table entry.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Nlist32 {
    /// Index into string table
    pub n_strx: u32,
    /// Type flag
    pub n_type: u8,
    /// Section number or NO_SECT
    pub n_sect: u8,
    /// Description bits
    pub n_desc: u16,
    /// Value
    pub n_value: u32,
}

impl Nlist32 {
    /// Size of an nlist entry.
    pub const SIZE: usize = 12;

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.n_strx = self.n_strx.swap_bytes();
        self.n_desc = self.n_desc.swap_bytes();
        self.n_value = self.n_value.swap_bytes();
        self
    }
}

/// 64-bit symbol table entry.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Nlist64 {
    /// Index into string table
    pub n_strx: u32,
    /// Type flag
    pub n_type: u8,
    /// Section number or NO_SECT
    pub n_sect: u8,
    /// Description bits
    pub n_desc: u16,
    /// Value
    pub n_value: u64,
}

impl Nlist64 {
    /// Size of an nlist entry.
    pub const SIZE: usize = 16;

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.n_strx = self.n_strx.swap_bytes();
        self.n_desc = self.n_desc.swap_bytes();
        self.n_value = self.n_value.swap_bytes();
        self
    }
}

// =============================================================================
// Dylib / String Commands
// =============================================================================

/// Dylib reference embedded in id and re-export commands.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Dylib {
    /// Offset of the install name within the command
    pub name_offset: u32,
    /// Build timestamp
    pub timestamp: u32,
    /// Current version (X.Y.Z packed into 32 bits)
    pub current_version: u32,
    /// Compatibility version (X.Y.Z packed into 32 bits)
    pub compatibility_version: u32,
}

/// Dylib load command (LC_ID_DYLIB, LC_REEXPORT_DYLIB, ...).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DylibCommand {
    /// Command type
    pub cmd: u32,
    /// Total size (includes the trailing name string)
    pub cmdsize: u32,
    /// Library identification
    pub dylib: Dylib,
}

impl DylibCommand {
    /// Minimum size of this command (without the name string).
    pub const SIZE: usize = 24;

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.cmd = self.cmd.swap_bytes();
        self.cmdsize = self.cmdsize.swap_bytes();
        self.dylib.name_offset = self.dylib.name_offset.swap_bytes();
        self.dylib.timestamp = self.dylib.timestamp.swap_bytes();
        self.dylib.current_version = self.dylib.current_version.swap_bytes();
        self.dylib.compatibility_version = self.dylib.compatibility_version.swap_bytes();
        self
    }
}

/// Single-string command (LC_SUB_FRAMEWORK, LC_SUB_UMBRELLA, LC_SUB_CLIENT,
/// LC_SUB_LIBRARY all share this layout).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SubCommand {
    /// Command type
    pub cmd: u32,
    /// Total size (includes the trailing string)
    pub cmdsize: u32,
    /// Offset of the string within the command
    pub str_offset: u32,
}

impl SubCommand {
    /// Minimum size of this command (without the string).
    pub const SIZE: usize = 12;

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.cmd = self.cmd.swap_bytes();
        self.cmdsize = self.cmdsize.swap_bytes();
        self.str_offset = self.str_offset.swap_bytes();
        self
    }
}

// =============================================================================
// UUID / Version Commands
// =============================================================================

/// UUID command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct UuidCommand {
    /// LC_UUID
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// UUID (byte order independent)
    pub uuid: [u8; 16],
}

impl UuidCommand {
    /// Size of this command.
    pub const SIZE: usize = 24;

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.cmd = self.cmd.swap_bytes();
        self.cmdsize = self.cmdsize.swap_bytes();
        self
    }
}

/// Build version command (LC_BUILD_VERSION).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct BuildVersionCommand {
    /// LC_BUILD_VERSION
    pub cmd: u32,
    /// Size of this load command (includes trailing tool entries)
    pub cmdsize: u32,
    /// Platform identifier
    pub platform: u32,
    /// Minimum OS version (X.Y.Z packed into 32 bits)
    pub minos: u32,
    /// SDK version (X.Y.Z packed into 32 bits)
    pub sdk: u32,
    /// Number of tool entries following
    pub ntools: u32,
}

impl BuildVersionCommand {
    /// Size of this command without tool entries.
    pub const SIZE: usize = 24;

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.cmd = self.cmd.swap_bytes();
        self.cmdsize = self.cmdsize.swap_bytes();
        self.platform = self.platform.swap_bytes();
        self.minos = self.minos.swap_bytes();
        self.sdk = self.sdk.swap_bytes();
        self.ntools = self.ntools.swap_bytes();
        self
    }
}

/// Legacy per-platform minimum version command (LC_VERSION_MIN_*).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct VersionMinCommand {
    /// LC_VERSION_MIN_MACOSX, _IPHONEOS, _TVOS or _WATCHOS
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Minimum OS version (X.Y.Z packed into 32 bits)
    pub version: u32,
    /// SDK version (X.Y.Z packed into 32 bits)
    pub sdk: u32,
}

impl VersionMinCommand {
    /// Size of this command.
    pub const SIZE: usize = 16;

    /// Returns a copy with every field byte-swapped.
    pub fn byte_swapped(mut self) -> Self {
        self.cmd = self.cmd.swap_bytes();
        self.cmdsize = self.cmdsize.swap_bytes();
        self.version = self.version.swap_bytes();
        self.sdk = self.sdk.swap_bytes();
        self
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Decodes a fixed 16-byte NUL-padded name field.
fn segment_name(raw: &[u8; 16]) -> &str {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(16);
    std::str::from_utf8(&raw[..end]).unwrap_or("")
}
