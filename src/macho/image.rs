//! Thin Mach-O image parsing.
//!
//! Walks one image's header and load-command stream and produces the
//! [`ImageFacts`] record the merger consumes. Every offset a load command
//! mentions is bounds-checked against its enclosing range before the read;
//! no partially-populated facts record ever escapes on error.

use tracing::debug;
use zerocopy::FromBytes;

use super::constants::*;
use super::fat::{classify, resolve_arch, Container};
use super::structs::*;
use super::symbols::{collect_symbols, ExternalRange, SymbolOptions};
use crate::error::{Error, Result};
use crate::source::Source;
use crate::tbd::{DylibId, FileType, ImageFacts, ObjcConstraint, PackedVersion, Platform, TbdFlags};
use crate::util::{is_aligned, range_fits, Endian};

/// Where an `__objc_imageinfo` section claims to live.
#[derive(Debug, Clone, Copy)]
struct ImageInfoLocation {
    offset: u64,
    size: u64,
    seg_start: u64,
    seg_end: u64,
}

/// Parses one thin Mach-O image into an [`ImageFacts`] record.
///
/// * `source` — the image itself; header at offset 0.
/// * `linkedit` — the source that symbol/string-table and section offsets
///   are relative to. `None` means they are relative to `source`, which is
///   the case for standalone files and fat slices. Shared-cache images pass
///   the whole cache here, since their tables live in shared mappings.
/// * `expected_arch` — the architecture the enclosing container promised,
///   if any; a mismatch with the header is a contradiction.
pub fn parse_image(
    source: &Source,
    linkedit: Option<&Source>,
    expected_arch: Option<usize>,
    options: &SymbolOptions,
) -> Result<ImageFacts> {
    let data_source = linkedit.unwrap_or(source);

    let prefix_len = source.len().min(16) as usize;
    if prefix_len < 4 {
        return Err(Error::NotAMacho);
    }
    let (is64, endian) = match classify(source.read_at(0, prefix_len)?) {
        Container::Thin { is64, endian } => (is64, endian),
        _ => return Err(Error::NotAMacho),
    };

    // Header. Both layouts share their leading fields; only the size and the
    // reserved word differ.
    let (cputype, cpusubtype, filetype, ncmds, sizeofcmds, raw_flags, header_size) = if is64 {
        let mut header = MachHeader64::read_from_prefix(source.read_at(0, MachHeader64::SIZE)?)
            .map_err(|_| Error::NotAMacho)?
            .0;
        if endian.is_swapped() {
            header = header.byte_swapped();
        }
        (
            header.cputype,
            header.cpusubtype,
            header.filetype,
            header.ncmds,
            header.sizeofcmds,
            header.flags,
            MachHeader64::SIZE,
        )
    } else {
        let mut header = MachHeader32::read_from_prefix(source.read_at(0, MachHeader32::SIZE)?)
            .map_err(|_| Error::NotAMacho)?
            .0;
        if endian.is_swapped() {
            header = header.byte_swapped();
        }
        (
            header.cputype,
            header.cpusubtype,
            header.filetype,
            header.ncmds,
            header.sizeofcmds,
            header.flags,
            MachHeader32::SIZE,
        )
    };

    let arch = resolve_arch(cputype, cpusubtype)?;
    if let Some(expected) = expected_arch {
        if expected != arch {
            return Err(Error::ContradictoryContainerInfo {
                field: "architecture",
            });
        }
    }

    let file_type = FileType::from_raw(filetype).ok_or(Error::NotALibrary { filetype })?;

    if !range_fits(header_size as u64, sizeofcmds as u64, source.len())
        || ncmds as u64 * LoadCommand::SIZE as u64 > sizeofcmds as u64
    {
        return Err(Error::FailedToIterateLoadCommands);
    }

    let cmds = source.read_at(header_size as u64, sizeofcmds as usize)?;
    let cmd_align = if is64 { 8 } else { 4 };

    let mut facts = ImageFacts::new(arch, file_type);
    facts.flags = TbdFlags::from_mach_flags(MachFlags::from_bits_truncate(raw_flags));

    let mut symtab: Option<SymtabCommand> = None;
    let mut dysymtab: Option<DysymtabCommand> = None;
    let mut tlv_sections: Vec<bool> = Vec::new();
    let mut imageinfo: Option<ImageInfoLocation> = None;
    let mut file_ranges: Vec<(u64, u64)> = Vec::new();
    let mut vm_ranges: Vec<(u64, u64)> = Vec::new();

    let mut offset = 0usize;
    for index in 0..ncmds {
        let invalid = || Error::InvalidLoadCommand {
            index,
            offset: (header_size + offset) as u64,
        };

        if cmds.len() - offset < LoadCommand::SIZE {
            return Err(invalid());
        }
        let cmd = endian.read_u32(&cmds[offset..]);
        let cmdsize = endian.read_u32(&cmds[offset + 4..]) as usize;

        if cmdsize < LoadCommand::SIZE
            || !is_aligned(cmdsize as u64, cmd_align)
            || cmdsize > cmds.len() - offset
        {
            return Err(invalid());
        }

        let data = &cmds[offset..offset + cmdsize];

        match cmd {
            LC_ID_DYLIB => {
                let dc = read_dylib_command(data, endian).ok_or_else(|| invalid())?;
                let name = command_string(data, dc.dylib.name_offset).ok_or_else(|| invalid())?;
                if name.is_empty() {
                    return Err(Error::EmptyInstallName);
                }
                let id = DylibId {
                    install_name: name.to_string(),
                    current_version: PackedVersion(dc.dylib.current_version),
                    compatibility_version: PackedVersion(dc.dylib.compatibility_version),
                };
                match &facts.id {
                    Some(existing) if *existing != id => {
                        return Err(Error::ContradictoryLoadCommandInfo {
                            field: "install name",
                        });
                    }
                    _ => facts.id = Some(id),
                }
            }

            LC_REEXPORT_DYLIB => {
                let dc = read_dylib_command(data, endian).ok_or_else(|| invalid())?;
                let name = command_string(data, dc.dylib.name_offset).ok_or_else(|| invalid())?;
                if name.is_empty() {
                    return Err(invalid());
                }
                facts.reexports.push(name.to_string());
            }

            LC_SUB_FRAMEWORK => {
                let name = read_sub_string(data, endian).ok_or_else(|| invalid())?;
                match &facts.parent_umbrella {
                    Some(existing) if existing != name => {
                        return Err(Error::ContradictoryLoadCommandInfo {
                            field: "parent umbrella",
                        });
                    }
                    _ => facts.parent_umbrella = Some(name.to_string()),
                }
            }

            LC_SUB_CLIENT => {
                let name = read_sub_string(data, endian).ok_or_else(|| invalid())?;
                facts.clients.push(name.to_string());
            }

            LC_SUB_UMBRELLA => {
                let name = read_sub_string(data, endian).ok_or_else(|| invalid())?;
                facts.sub_umbrellas.push(name.to_string());
            }

            LC_SUB_LIBRARY => {
                let name = read_sub_string(data, endian).ok_or_else(|| invalid())?;
                facts.sub_libraries.push(name.to_string());
            }

            LC_UUID => {
                let mut uc = UuidCommand::read_from_prefix(data)
                    .map_err(|_| invalid())?
                    .0;
                if endian.is_swapped() {
                    uc = uc.byte_swapped();
                }
                match facts.uuid {
                    Some(existing) if existing != uc.uuid => {
                        return Err(Error::ContradictoryLoadCommandInfo { field: "uuid" });
                    }
                    _ => facts.uuid = Some(uc.uuid),
                }
            }

            LC_BUILD_VERSION => {
                let mut bv = BuildVersionCommand::read_from_prefix(data)
                    .map_err(|_| invalid())?
                    .0;
                if endian.is_swapped() {
                    bv = bv.byte_swapped();
                }
                push_platform(&mut facts.platforms, Platform::from_build_version(bv.platform)?);
            }

            LC_VERSION_MIN_MACOSX
            | LC_VERSION_MIN_IPHONEOS
            | LC_VERSION_MIN_TVOS
            | LC_VERSION_MIN_WATCHOS => {
                // Only the command id matters here; the version words are
                // validated by the struct read.
                let mut vm = VersionMinCommand::read_from_prefix(data)
                    .map_err(|_| invalid())?
                    .0;
                if endian.is_swapped() {
                    vm = vm.byte_swapped();
                }
                let platform = match vm.cmd {
                    LC_VERSION_MIN_MACOSX => Platform::Macosx,
                    LC_VERSION_MIN_IPHONEOS => Platform::Ios,
                    LC_VERSION_MIN_TVOS => Platform::Tvos,
                    _ => Platform::Watchos,
                };
                push_platform(&mut facts.platforms, platform);
            }

            LC_SYMTAB => {
                if symtab.is_some() {
                    return Err(Error::ContradictoryLoadCommandInfo {
                        field: "symbol table",
                    });
                }
                let mut st = SymtabCommand::read_from_prefix(data)
                    .map_err(|_| invalid())?
                    .0;
                if endian.is_swapped() {
                    st = st.byte_swapped();
                }
                symtab = Some(st);
            }

            LC_DYSYMTAB => {
                if dysymtab.is_some() {
                    return Err(Error::ContradictoryLoadCommandInfo {
                        field: "dynamic symbol table",
                    });
                }
                let mut dt = DysymtabCommand::read_from_prefix(data)
                    .map_err(|_| invalid())?
                    .0;
                if endian.is_swapped() {
                    dt = dt.byte_swapped();
                }
                dysymtab = Some(dt);
            }

            LC_SEGMENT if !is64 => {
                parse_segment32(
                    data,
                    endian,
                    data_source,
                    &mut tlv_sections,
                    &mut imageinfo,
                    &mut file_ranges,
                    &mut vm_ranges,
                )?;
            }

            LC_SEGMENT_64 if is64 => {
                parse_segment64(
                    data,
                    endian,
                    data_source,
                    &mut tlv_sections,
                    &mut imageinfo,
                    &mut file_ranges,
                    &mut vm_ranges,
                )?;
            }

            LC_ROUTINES | LC_ROUTINES_64 => {
                // Read but ignored; the cmdsize validation above is all the
                // attention these get.
            }

            _ => {
                debug!("skipping load command {cmd:#x}");
            }
        }

        offset += cmdsize;
    }

    if let Some(loc) = imageinfo {
        read_objc_imageinfo(data_source, endian, loc, &mut facts)?;
    }

    if let Some(symtab) = symtab {
        let external = dysymtab.map(|dt| ExternalRange {
            start: dt.iextdefsym,
            count: dt.nextdefsym,
        });
        facts.symbols = collect_symbols(
            data_source,
            endian,
            is64,
            &symtab,
            external,
            &tlv_sections,
            options,
        )?;
    }

    Ok(facts)
}

// =============================================================================
// Command Payload Helpers
// =============================================================================

/// Resolves an lc_str offset inside a command payload to a NUL-terminated
/// UTF-8 string. The offset must land after the fixed command head and the
/// terminator must fall inside the command.
fn command_string(data: &[u8], str_offset: u32) -> Option<&str> {
    let off = str_offset as usize;
    if off < LoadCommand::SIZE || off >= data.len() {
        return None;
    }
    crate::util::null_terminated_str(&data[off..])
}

fn read_dylib_command(data: &[u8], endian: Endian) -> Option<DylibCommand> {
    let mut dc = DylibCommand::read_from_prefix(data).ok()?.0;
    if endian.is_swapped() {
        dc = dc.byte_swapped();
    }
    Some(dc)
}

fn read_sub_string(data: &[u8], endian: Endian) -> Option<&str> {
    let mut sc = SubCommand::read_from_prefix(data).ok()?.0;
    if endian.is_swapped() {
        sc = sc.byte_swapped();
    }
    let name = command_string(data, sc.str_offset)?;
    if name.is_empty() {
        return None;
    }
    Some(name)
}

fn push_platform(platforms: &mut Vec<Platform>, platform: Platform) {
    if !platforms.contains(&platform) {
        platforms.push(platform);
    }
}

// =============================================================================
// Segments
// =============================================================================

fn parse_segment64(
    data: &[u8],
    endian: Endian,
    data_source: &Source,
    tlv_sections: &mut Vec<bool>,
    imageinfo: &mut Option<ImageInfoLocation>,
    file_ranges: &mut Vec<(u64, u64)>,
    vm_ranges: &mut Vec<(u64, u64)>,
) -> Result<()> {
    let mut seg = SegmentCommand64::read_from_prefix(data)
        .map_err(|_| Error::InvalidSegment {
            name: String::new(),
        })?
        .0;
    if endian.is_swapped() {
        seg = seg.byte_swapped();
    }
    let invalid = || Error::InvalidSegment {
        name: seg.name().to_string(),
    };

    let nsects = seg.nsects as usize;
    if SegmentCommand64::SIZE + nsects * Section64::SIZE > data.len() {
        return Err(invalid());
    }

    check_segment_ranges(
        seg.fileoff,
        seg.filesize,
        seg.vmaddr,
        seg.vmsize,
        data_source,
        file_ranges,
        vm_ranges,
        &invalid,
    )?;

    let seg_range = (seg.fileoff, seg.fileoff + seg.filesize);
    for i in 0..nsects {
        let raw = &data[SegmentCommand64::SIZE + i * Section64::SIZE..];
        let mut sect = Section64::read_from_prefix(raw).map_err(|_| invalid())?.0;
        if endian.is_swapped() {
            sect = sect.byte_swapped();
        }
        record_section(
            sect.segment_name(),
            sect.name(),
            sect.flags,
            sect.offset as u64,
            sect.size,
            seg_range,
            tlv_sections,
            imageinfo,
        );
    }

    Ok(())
}

fn parse_segment32(
    data: &[u8],
    endian: Endian,
    data_source: &Source,
    tlv_sections: &mut Vec<bool>,
    imageinfo: &mut Option<ImageInfoLocation>,
    file_ranges: &mut Vec<(u64, u64)>,
    vm_ranges: &mut Vec<(u64, u64)>,
) -> Result<()> {
    let mut seg = SegmentCommand32::read_from_prefix(data)
        .map_err(|_| Error::InvalidSegment {
            name: String::new(),
        })?
        .0;
    if endian.is_swapped() {
        seg = seg.byte_swapped();
    }
    let invalid = || Error::InvalidSegment {
        name: seg.name().to_string(),
    };

    let nsects = seg.nsects as usize;
    if SegmentCommand32::SIZE + nsects * Section32::SIZE > data.len() {
        return Err(invalid());
    }

    check_segment_ranges(
        seg.fileoff as u64,
        seg.filesize as u64,
        seg.vmaddr as u64,
        seg.vmsize as u64,
        data_source,
        file_ranges,
        vm_ranges,
        &invalid,
    )?;

    let seg_range = (seg.fileoff as u64, seg.fileoff as u64 + seg.filesize as u64);
    for i in 0..nsects {
        let raw = &data[SegmentCommand32::SIZE + i * Section32::SIZE..];
        let mut sect = Section32::read_from_prefix(raw).map_err(|_| invalid())?.0;
        if endian.is_swapped() {
            sect = sect.byte_swapped();
        }
        record_section(
            sect.segment_name(),
            sect.name(),
            sect.flags,
            sect.offset as u64,
            sect.size as u64,
            seg_range,
            tlv_sections,
            imageinfo,
        );
    }

    Ok(())
}

/// Validates a segment's file and virtual ranges against the backing source
/// and everything recorded so far. Zero-sized ranges are skipped (zerofill
/// segments have no file extent).
#[allow(clippy::too_many_arguments)]
fn check_segment_ranges(
    fileoff: u64,
    filesize: u64,
    vmaddr: u64,
    vmsize: u64,
    data_source: &Source,
    file_ranges: &mut Vec<(u64, u64)>,
    vm_ranges: &mut Vec<(u64, u64)>,
    invalid: &dyn Fn() -> Error,
) -> Result<()> {
    if filesize > 0 {
        if !range_fits(fileoff, filesize, data_source.len()) {
            return Err(invalid());
        }
        let end = fileoff + filesize;
        if file_ranges.iter().any(|&(s, e)| fileoff < e && s < end) {
            return Err(invalid());
        }
        file_ranges.push((fileoff, end));
    }

    if vmsize > 0 {
        let end = vmaddr.checked_add(vmsize).ok_or_else(|| invalid())?;
        if vm_ranges.iter().any(|&(s, e)| vmaddr < e && s < end) {
            return Err(invalid());
        }
        vm_ranges.push((vmaddr, end));
    }

    Ok(())
}

/// Records a section's contribution to symbol classification and notes the
/// objc image-info location if this is that section.
#[allow(clippy::too_many_arguments)]
fn record_section(
    segname: &str,
    sectname: &str,
    flags: u32,
    offset: u64,
    size: u64,
    seg_range: (u64, u64),
    tlv_sections: &mut Vec<bool>,
    imageinfo: &mut Option<ImageInfoLocation>,
) {
    tlv_sections.push(flags & SECTION_TYPE == S_THREAD_LOCAL_VARIABLES);

    let is_imageinfo = (segname.starts_with("__DATA") && sectname == SECT_OBJC_IMAGEINFO)
        || (segname == "__OBJC" && sectname == SECT_OBJC_IMAGEINFO_LEGACY);
    if is_imageinfo && imageinfo.is_none() {
        *imageinfo = Some(ImageInfoLocation {
            offset,
            size,
            seg_start: seg_range.0,
            seg_end: seg_range.1,
        });
    }
}

/// Reads the two objc image-info words and folds them into the facts.
fn read_objc_imageinfo(
    data_source: &Source,
    endian: Endian,
    loc: ImageInfoLocation,
    facts: &mut ImageFacts,
) -> Result<()> {
    if loc.offset == 0 || loc.size < 8 {
        return Ok(());
    }
    // The section's bytes must sit inside its own segment's file range.
    if loc.offset < loc.seg_start || loc.offset + 8 > loc.seg_end {
        return Err(Error::InvalidSegment {
            name: SECT_OBJC_IMAGEINFO.to_string(),
        });
    }

    let bytes = data_source.read_at(loc.offset, 8)?;
    let flags_word = endian.read_u32(&bytes[4..]);
    let image_flags = ObjcImageFlags::from_bits_truncate(flags_word);

    facts.swift_version =
        (flags_word & OBJC_IMAGE_SWIFT_VERSION_MASK) >> OBJC_IMAGE_SWIFT_VERSION_SHIFT;
    facts.objc_constraint = Some(ObjcConstraint::from_image_flags(image_flags));
    facts.has_category_class_properties =
        image_flags.contains(ObjcImageFlags::HAS_CATEGORY_CLASS_PROPERTIES);

    Ok(())
}
