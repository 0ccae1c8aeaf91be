//! In-memory Mach-O builders for tests.
//!
//! Builds self-consistent little-endian images: a `__TEXT` segment covering
//! the header and load commands, an optional `__DATA` segment for objc
//! image-info and thread-local sections, and a symbol/string table appended
//! after the commands. `bias` shifts every file offset the image stores,
//! which is how an image embedded in a synthetic shared cache refers to its
//! own tables by cache-absolute offsets.

use zerocopy::{FromZeros, IntoBytes};

use crate::arch::{arch_from_name, arch_info};
use crate::macho::constants::*;
use crate::macho::structs::*;

fn pad8(len: usize) -> usize {
    (len + 7) & !7
}

#[derive(Clone)]
struct SectionSpec {
    sectname: [u8; 16],
    flags: u32,
    /// Bytes stored in the data area, if any.
    contents: Vec<u8>,
}

/// Builder for a synthetic 64-bit little-endian Mach-O dylib.
pub struct ImageBuilder {
    install_name: String,
    filetype: u32,
    cputype: u32,
    cpusubtype: u32,
    current_version: u32,
    compatibility_version: u32,
    header_flags: u32,
    uuids: Vec<[u8; 16]>,
    build_versions: Vec<u32>,
    version_mins: Vec<u32>,
    reexports: Vec<String>,
    sub_frameworks: Vec<String>,
    sub_clients: Vec<String>,
    data_sections: Vec<SectionSpec>,
    symbols: Vec<(String, u8, u8, u16)>,
    omit_id: bool,
    bias: u64,
}

impl ImageBuilder {
    /// Starts a new x86_64 dylib with the given install name, version 1.0.
    pub fn new(install_name: &str) -> Self {
        Self {
            install_name: install_name.to_string(),
            filetype: MH_DYLIB,
            cputype: CPU_TYPE_X86_64,
            cpusubtype: CPU_SUBTYPE_X86_ALL,
            current_version: 0x0001_0000,
            compatibility_version: 0x0001_0000,
            header_flags: MachFlags::TWOLEVEL.bits() | MachFlags::APP_EXTENSION_SAFE.bits(),
            uuids: Vec::new(),
            build_versions: Vec::new(),
            version_mins: Vec::new(),
            reexports: Vec::new(),
            sub_frameworks: Vec::new(),
            sub_clients: Vec::new(),
            data_sections: Vec::new(),
            symbols: Vec::new(),
            omit_id: false,
            bias: 0,
        }
    }

    pub fn filetype(mut self, filetype: u32) -> Self {
        self.filetype = filetype;
        self
    }

    pub fn arch(mut self, name: &str) -> Self {
        let info = arch_info(arch_from_name(name).unwrap());
        self.cputype = info.cputype;
        self.cpusubtype = info.cpusubtype;
        self
    }

    pub fn versions(mut self, current: u32, compatibility: u32) -> Self {
        self.current_version = current;
        self.compatibility_version = compatibility;
        self
    }

    pub fn header_flags(mut self, flags: u32) -> Self {
        self.header_flags = flags;
        self
    }

    pub fn uuid(mut self, uuid: [u8; 16]) -> Self {
        self.uuids.push(uuid);
        self
    }

    pub fn platform_macos(self) -> Self {
        self.build_version(PLATFORM_MACOS)
    }

    pub fn build_version(mut self, platform: u32) -> Self {
        self.build_versions.push(platform);
        self
    }

    pub fn version_min(mut self, cmd: u32) -> Self {
        self.version_mins.push(cmd);
        self
    }

    pub fn reexport(mut self, name: &str) -> Self {
        self.reexports.push(name.to_string());
        self
    }

    pub fn sub_framework(mut self, umbrella: &str) -> Self {
        self.sub_frameworks.push(umbrella.to_string());
        self
    }

    pub fn sub_client(mut self, client: &str) -> Self {
        self.sub_clients.push(client.to_string());
        self
    }

    pub fn objc_imageinfo(mut self, flags_word: u32) -> Self {
        let mut contents = vec![0u8; 4];
        contents.extend_from_slice(&flags_word.to_le_bytes());
        let mut sectname = [0u8; 16];
        sectname[..SECT_OBJC_IMAGEINFO.len()].copy_from_slice(SECT_OBJC_IMAGEINFO.as_bytes());
        self.data_sections.push(SectionSpec {
            sectname,
            flags: 0,
            contents,
        });
        self
    }

    /// Appends a `__thread_vars` section; symbols naming its ordinal
    /// classify as thread-local.
    pub fn tlv_section(mut self) -> Self {
        let mut sectname = [0u8; 16];
        sectname[..13].copy_from_slice(b"__thread_vars");
        self.data_sections.push(SectionSpec {
            sectname,
            flags: S_THREAD_LOCAL_VARIABLES,
            contents: vec![0u8; 8],
        });
        self
    }

    /// Adds a symbol with `n_sect = 1`.
    pub fn symbol(self, name: &str, n_type: u8, n_desc: u16) -> Self {
        self.symbol_in_sect(name, n_type, n_desc, 1)
    }

    pub fn symbol_in_sect(mut self, name: &str, n_type: u8, n_desc: u16, n_sect: u8) -> Self {
        self.symbols.push((name.to_string(), n_type, n_sect, n_desc));
        self
    }

    pub fn omit_id(mut self) -> Self {
        self.omit_id = true;
        self
    }

    /// Shifts every stored file offset by `bias` (for embedding in a cache).
    pub fn bias(mut self, bias: u64) -> Self {
        self.bias = bias;
        self
    }

    /// Returns the offset of the third load command in a built image.
    pub fn third_command_offset(data: &[u8]) -> usize {
        let mut offset = MachHeader64::SIZE;
        for _ in 0..2 {
            let cmdsize =
                u32::from_le_bytes(data[offset + 4..offset + 8].try_into().unwrap()) as usize;
            offset += cmdsize;
        }
        offset
    }

    pub fn build(&self) -> Vec<u8> {
        let has_data_segment = !self.data_sections.is_empty();
        let has_symtab = !self.symbols.is_empty();

        // Command sizes, in emission order.
        let mut cmds_size = SegmentCommand64::SIZE; // __TEXT
        if has_data_segment {
            cmds_size += SegmentCommand64::SIZE + self.data_sections.len() * Section64::SIZE;
        }
        if !self.omit_id {
            cmds_size += DylibCommand::SIZE + pad8(self.install_name.len() + 1);
        }
        cmds_size += self.uuids.len() * UuidCommand::SIZE;
        cmds_size += self.build_versions.len() * BuildVersionCommand::SIZE;
        cmds_size += self.version_mins.len() * VersionMinCommand::SIZE;
        for name in &self.reexports {
            cmds_size += DylibCommand::SIZE + pad8(name.len() + 1);
        }
        for name in self.sub_frameworks.iter().chain(&self.sub_clients) {
            cmds_size += pad8(SubCommand::SIZE + name.len() + 1);
        }
        if has_symtab {
            cmds_size += SymtabCommand::SIZE + DysymtabCommand::SIZE;
        }

        let mut ncmds = 1
            + usize::from(has_data_segment)
            + usize::from(!self.omit_id)
            + self.uuids.len()
            + self.build_versions.len()
            + self.version_mins.len()
            + self.reexports.len()
            + self.sub_frameworks.len()
            + self.sub_clients.len();
        if has_symtab {
            ncmds += 2;
        }

        // Data area layout, following the commands.
        let text_end = MachHeader64::SIZE + cmds_size;
        let mut data_cursor = text_end;
        let mut section_offsets = Vec::new();
        for spec in &self.data_sections {
            section_offsets.push(data_cursor);
            data_cursor += spec.contents.len();
        }
        let data_end = data_cursor;

        let symoff = data_cursor;
        let nsyms = self.symbols.len();
        let stroff = symoff + nsyms * Nlist64::SIZE;
        let mut strtab = vec![0u8];
        let mut str_offsets = Vec::new();
        for (name, _, _, _) in &self.symbols {
            str_offsets.push(strtab.len() as u32);
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
        }
        let file_size = if has_symtab { stroff + strtab.len() } else { data_end };

        let mut out = Vec::with_capacity(file_size);

        let header = MachHeader64 {
            magic: MH_MAGIC_64,
            cputype: self.cputype,
            cpusubtype: self.cpusubtype,
            filetype: self.filetype,
            ncmds: ncmds as u32,
            sizeofcmds: cmds_size as u32,
            flags: self.header_flags,
            reserved: 0,
        };
        out.extend_from_slice(header.as_bytes());

        // __TEXT covers the header and load commands.
        let mut text = SegmentCommand64 {
            cmd: LC_SEGMENT_64,
            cmdsize: SegmentCommand64::SIZE as u32,
            segname: [0; 16],
            vmaddr: 0x1000,
            vmsize: 0x1000,
            fileoff: self.bias,
            filesize: text_end as u64,
            maxprot: 5,
            initprot: 5,
            nsects: 0,
            flags: 0,
        };
        text.segname[..6].copy_from_slice(b"__TEXT");
        out.extend_from_slice(text.as_bytes());

        if has_data_segment {
            let data_len = (data_end - text_end) as u64;
            let mut data_seg = SegmentCommand64 {
                cmd: LC_SEGMENT_64,
                cmdsize: (SegmentCommand64::SIZE + self.data_sections.len() * Section64::SIZE)
                    as u32,
                segname: [0; 16],
                vmaddr: 0x2000,
                vmsize: 0x1000,
                fileoff: self.bias + text_end as u64,
                filesize: data_len,
                maxprot: 3,
                initprot: 3,
                nsects: self.data_sections.len() as u32,
                flags: 0,
            };
            data_seg.segname[..6].copy_from_slice(b"__DATA");
            out.extend_from_slice(data_seg.as_bytes());

            for (i, spec) in self.data_sections.iter().enumerate() {
                let mut segname = [0u8; 16];
                segname[..6].copy_from_slice(b"__DATA");
                let sect = Section64 {
                    sectname: spec.sectname,
                    segname,
                    addr: 0x2000 + (section_offsets[i] - text_end) as u64,
                    size: spec.contents.len() as u64,
                    offset: (self.bias + section_offsets[i] as u64) as u32,
                    align: 3,
                    reloff: 0,
                    nreloc: 0,
                    flags: spec.flags,
                    reserved1: 0,
                    reserved2: 0,
                    reserved3: 0,
                };
                out.extend_from_slice(sect.as_bytes());
            }
        }

        if !self.omit_id {
            push_dylib_command(
                &mut out,
                LC_ID_DYLIB,
                &self.install_name,
                self.current_version,
                self.compatibility_version,
            );
        }

        for uuid in &self.uuids {
            let uc = UuidCommand {
                cmd: LC_UUID,
                cmdsize: UuidCommand::SIZE as u32,
                uuid: *uuid,
            };
            out.extend_from_slice(uc.as_bytes());
        }

        for &platform in &self.build_versions {
            let bv = BuildVersionCommand {
                cmd: LC_BUILD_VERSION,
                cmdsize: BuildVersionCommand::SIZE as u32,
                platform,
                minos: 0x000A_0E00,
                sdk: 0x000A_0E00,
                ntools: 0,
            };
            out.extend_from_slice(bv.as_bytes());
        }

        for &cmd in &self.version_mins {
            let vm = VersionMinCommand {
                cmd,
                cmdsize: VersionMinCommand::SIZE as u32,
                version: 0x000A_0E00,
                sdk: 0x000A_0E00,
            };
            out.extend_from_slice(vm.as_bytes());
        }

        for name in &self.reexports {
            push_dylib_command(&mut out, LC_REEXPORT_DYLIB, name, 0x0001_0000, 0x0001_0000);
        }

        for name in &self.sub_frameworks {
            push_sub_command(&mut out, LC_SUB_FRAMEWORK, name);
        }
        for name in &self.sub_clients {
            push_sub_command(&mut out, LC_SUB_CLIENT, name);
        }

        if has_symtab {
            let st = SymtabCommand {
                cmd: LC_SYMTAB,
                cmdsize: SymtabCommand::SIZE as u32,
                symoff: (self.bias + symoff as u64) as u32,
                nsyms: nsyms as u32,
                stroff: (self.bias + stroff as u64) as u32,
                strsize: strtab.len() as u32,
            };
            out.extend_from_slice(st.as_bytes());

            let dt = DysymtabCommand {
                cmd: LC_DYSYMTAB,
                cmdsize: DysymtabCommand::SIZE as u32,
                iextdefsym: 0,
                nextdefsym: nsyms as u32,
                iundefsym: nsyms as u32,
                ..DysymtabCommand::new_zeroed()
            };
            out.extend_from_slice(dt.as_bytes());
        }

        debug_assert_eq!(out.len(), text_end);

        for spec in &self.data_sections {
            out.extend_from_slice(&spec.contents);
        }

        if has_symtab {
            for (i, (_, n_type, n_sect, n_desc)) in self.symbols.iter().enumerate() {
                let nlist = Nlist64 {
                    n_strx: str_offsets[i],
                    n_type: *n_type,
                    n_sect: *n_sect,
                    n_desc: *n_desc,
                    n_value: 0x1000,
                };
                out.extend_from_slice(nlist.as_bytes());
            }
            out.extend_from_slice(&strtab);
        }

        out
    }
}

fn push_dylib_command(out: &mut Vec<u8>, cmd: u32, name: &str, current: u32, compatibility: u32) {
    let cmdsize = DylibCommand::SIZE + pad8(name.len() + 1);
    let dc = DylibCommand {
        cmd,
        cmdsize: cmdsize as u32,
        dylib: Dylib {
            name_offset: DylibCommand::SIZE as u32,
            timestamp: 2,
            current_version: current,
            compatibility_version: compatibility,
        },
    };
    out.extend_from_slice(dc.as_bytes());
    out.extend_from_slice(name.as_bytes());
    out.resize(out.len() + (cmdsize - DylibCommand::SIZE - name.len()), 0);
}

fn push_sub_command(out: &mut Vec<u8>, cmd: u32, name: &str) {
    let cmdsize = pad8(SubCommand::SIZE + name.len() + 1);
    let sc = SubCommand {
        cmd,
        cmdsize: cmdsize as u32,
        str_offset: SubCommand::SIZE as u32,
    };
    out.extend_from_slice(sc.as_bytes());
    out.extend_from_slice(name.as_bytes());
    out.resize(out.len() + (cmdsize - SubCommand::SIZE - name.len()), 0);
}

/// Builds a single-file dyld shared cache holding the given images: one
/// mapping covering the whole file, an image table, the path strings, then
/// the images themselves at 4 KiB boundaries. Each image is rebuilt with its
/// cache file offset as bias so its tables resolve cache-absolutely.
pub fn build_dsc(arch: &str, images: Vec<(&str, ImageBuilder)>) -> Vec<u8> {
    use crate::dyld::structs::{DscHeader, DscImageInfo, DscMappingInfo};

    const BASE: u64 = 0x1_8000_0000;
    const ALIGN: usize = 0x1000;

    let images_offset = DscHeader::SIZE + DscMappingInfo::SIZE;
    let table_end = images_offset + images.len() * DscImageInfo::SIZE;

    let mut paths_blob = Vec::new();
    let mut path_offsets = Vec::new();
    for (path, _) in &images {
        path_offsets.push(table_end + paths_blob.len());
        paths_blob.extend_from_slice(path.as_bytes());
        paths_blob.push(0);
    }

    let sizes: Vec<usize> = images.iter().map(|(_, builder)| builder.build().len()).collect();
    let mut cursor = (table_end + paths_blob.len() + ALIGN - 1) & !(ALIGN - 1);
    let mut image_offsets = Vec::new();
    for size in &sizes {
        image_offsets.push(cursor);
        cursor += (size + ALIGN - 1) & !(ALIGN - 1);
    }
    let total = cursor;

    let mut out = vec![0u8; total];

    let mut header = DscHeader::new_zeroed();
    header.magic[..8].copy_from_slice(b"dyld_v1 ");
    header.magic[8..8 + arch.len()].copy_from_slice(arch.as_bytes());
    header.mapping_offset = DscHeader::SIZE as u32;
    header.mapping_count = 1;
    header.images_offset = images_offset as u32;
    header.images_count = images.len() as u32;
    header.uuid = [9; 16];
    out[..DscHeader::SIZE].copy_from_slice(header.as_bytes());

    let mapping = DscMappingInfo {
        address: BASE,
        size: total as u64,
        file_offset: 0,
        max_prot: 5,
        init_prot: 5,
    };
    out[DscHeader::SIZE..images_offset].copy_from_slice(mapping.as_bytes());

    for i in 0..images.len() {
        let info = DscImageInfo {
            address: BASE + image_offsets[i] as u64,
            mod_time: 0,
            inode: 0,
            path_file_offset: path_offsets[i] as u32,
            pad: 0,
        };
        let record = images_offset + i * DscImageInfo::SIZE;
        out[record..record + DscImageInfo::SIZE].copy_from_slice(info.as_bytes());
    }

    out[table_end..table_end + paths_blob.len()].copy_from_slice(&paths_blob);

    for ((_, builder), &offset) in images.into_iter().zip(&image_offsets) {
        let data = builder.bias(offset as u64).build();
        out[offset..offset + data.len()].copy_from_slice(&data);
    }

    out
}

/// Wraps pre-built thin images in a 32-bit fat container, each image aligned
/// to a 4 KiB boundary.
pub fn build_fat(images: &[(&str, Vec<u8>)]) -> Vec<u8> {
    const ALIGN: usize = 0x1000;

    let mut offsets = Vec::new();
    let mut cursor = ALIGN;
    for (_, image) in images {
        offsets.push(cursor);
        cursor += (image.len() + ALIGN - 1) & !(ALIGN - 1);
    }

    let mut out = Vec::with_capacity(cursor);
    out.extend_from_slice(&FAT_MAGIC.to_be_bytes());
    out.extend_from_slice(&(images.len() as u32).to_be_bytes());
    for (i, (arch, image)) in images.iter().enumerate() {
        let info = arch_info(arch_from_name(arch).unwrap());
        out.extend_from_slice(&info.cputype.to_be_bytes());
        out.extend_from_slice(&info.cpusubtype.to_be_bytes());
        out.extend_from_slice(&(offsets[i] as u32).to_be_bytes());
        out.extend_from_slice(&(image.len() as u32).to_be_bytes());
        out.extend_from_slice(&12u32.to_be_bytes());
    }

    for (i, (_, image)) in images.iter().enumerate() {
        out.resize(offsets[i], 0);
        out.extend_from_slice(image);
    }
    out.resize(cursor, 0);
    out
}
