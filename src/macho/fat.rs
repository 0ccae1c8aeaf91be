//! Container classification and fat (multi-architecture) dispatch.
//!
//! Fat headers and architecture records are stored big-endian regardless of
//! the architectures they contain; every record is byte-swapped right after
//! the zero-copy read. The dispatcher validates the table once and yields a
//! bounds-checked sub-[`Source`] per contained thin image without copying.

use byteorder::{BigEndian, ByteOrder};
use zerocopy::FromBytes;

use super::constants::*;
use super::structs::{FatArch32, FatArch64, FatHeader};
use crate::arch;
use crate::error::{Error, Result};
use crate::source::Source;
use crate::util::{is_aligned, range_fits, Endian};

/// Highest accepted architecture count in a fat header.
const FAT_ARCH_MAX: u32 = 4095;

// =============================================================================
// Container Classification
// =============================================================================

/// What the leading bytes of a source announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// Fat container; `is64` selects the record layout.
    Fat {
        /// True for FAT_MAGIC_64 containers.
        is64: bool,
    },
    /// Thin Mach-O image.
    Thin {
        /// True for 64-bit headers.
        is64: bool,
        /// Byte order of every integer field in the image.
        endian: Endian,
    },
    /// Dyld shared cache.
    SharedCache,
    /// None of the above.
    Unknown,
}

/// Classifies a source by its first bytes.
///
/// `prefix` should hold the first 16 bytes of the file (fewer bytes are
/// tolerated; classification degrades to `Unknown`).
pub fn classify(prefix: &[u8]) -> Container {
    if prefix.len() >= DSC_MAGIC_PREFIX.len() && &prefix[..DSC_MAGIC_PREFIX.len()] == DSC_MAGIC_PREFIX
    {
        return Container::SharedCache;
    }
    if prefix.len() < 4 {
        return Container::Unknown;
    }

    // Read in file order: a big-endian image stores FE ED FA CE, a
    // little-endian image stores the same magic reversed.
    match BigEndian::read_u32(prefix) {
        FAT_MAGIC => Container::Fat { is64: false },
        FAT_MAGIC_64 => Container::Fat { is64: true },
        MH_MAGIC => Container::Thin {
            is64: false,
            endian: Endian::Big,
        },
        MH_CIGAM => Container::Thin {
            is64: false,
            endian: Endian::Little,
        },
        MH_MAGIC_64 => Container::Thin {
            is64: true,
            endian: Endian::Big,
        },
        MH_CIGAM_64 => Container::Thin {
            is64: true,
            endian: Endian::Little,
        },
        _ => Container::Unknown,
    }
}

// =============================================================================
// Fat Dispatch
// =============================================================================

/// One thin image contained in a fat file.
#[derive(Debug, Clone)]
pub struct FatSlice {
    /// Architecture registry index resolved from the fat record.
    pub arch: usize,
    /// Sub-source covering exactly the thin image.
    pub source: Source,
}

/// Enumerates the thin images of a fat container.
///
/// Validates the whole table before yielding anything: the architecture
/// count, every record's bounds and alignment, overlap between records, and
/// that no architecture appears twice.
pub fn fat_slices(source: &Source, is64: bool) -> Result<Vec<FatSlice>> {
    let header = FatHeader::read_from_bytes(source.read_at(0, FatHeader::SIZE)?)
        .map_err(|_| Error::NotAMacho)?
        .byte_swapped();

    if header.nfat_arch == 0 || header.nfat_arch > FAT_ARCH_MAX {
        return Err(Error::NotAMacho);
    }

    let record_size = if is64 { FatArch64::SIZE } else { FatArch32::SIZE };
    let table_len = header.nfat_arch as u64 * record_size as u64;
    let table = source.read_at(FatHeader::SIZE as u64, table_len as usize)?;

    let mut slices = Vec::with_capacity(header.nfat_arch as usize);
    let mut claimed: Vec<(u64, u64)> = Vec::with_capacity(header.nfat_arch as usize);

    for i in 0..header.nfat_arch as usize {
        let record = &table[i * record_size..];
        let (cputype, cpusubtype, offset, size, align) = if is64 {
            let rec = FatArch64::read_from_prefix(record)
                .map_err(|_| Error::NotAMacho)?
                .0
                .byte_swapped();
            (rec.cputype, rec.cpusubtype, rec.offset, rec.size, rec.align)
        } else {
            let rec = FatArch32::read_from_prefix(record)
                .map_err(|_| Error::NotAMacho)?
                .0
                .byte_swapped();
            (
                rec.cputype,
                rec.cpusubtype,
                rec.offset as u64,
                rec.size as u64,
                rec.align,
            )
        };

        let arch = resolve_arch(cputype, cpusubtype)?;

        if align > 31 {
            return Err(Error::NotAMacho);
        }
        if !is_aligned(offset, 1 << align) {
            return Err(Error::NotAMacho);
        }
        if !range_fits(offset, size, source.len()) {
            return Err(Error::out_of_range(offset, size, source.len()));
        }

        let end = offset + size;
        if claimed.iter().any(|&(s, e)| offset < e && s < end) {
            return Err(Error::ContradictoryContainerInfo {
                field: "architecture ranges",
            });
        }
        claimed.push((offset, end));

        if slices.iter().any(|s: &FatSlice| s.arch == arch) {
            return Err(Error::ContradictoryContainerInfo {
                field: "architectures",
            });
        }

        slices.push(FatSlice {
            arch,
            source: source.slice(offset, size)?,
        });
    }

    Ok(slices)
}

/// Resolves a cputype pair against the registry, distinguishing an unknown
/// cputype from an unknown subtype of a known cputype.
pub fn resolve_arch(cputype: u32, cpusubtype: u32) -> Result<usize> {
    match arch::arch_from_cputype(cputype, cpusubtype) {
        Some(index) => Ok(index),
        None => {
            if arch::ARCH_INFOS.iter().any(|info| info.cputype == cputype) {
                Err(Error::InvalidCpuSubtype { cputype, cpusubtype })
            } else {
                Err(Error::InvalidCpuType { cputype })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::arch_from_name;

    fn be32(value: u32) -> [u8; 4] {
        value.to_be_bytes()
    }

    /// Builds a 32-bit fat container from (cputype, cpusubtype, offset,
    /// size, align) records, padding the body out to `total` bytes.
    fn build_fat(records: &[(u32, u32, u32, u32, u32)], total: usize) -> Source {
        let mut data = Vec::new();
        data.extend_from_slice(&be32(FAT_MAGIC));
        data.extend_from_slice(&be32(records.len() as u32));
        for &(cputype, cpusubtype, offset, size, align) in records {
            data.extend_from_slice(&be32(cputype));
            data.extend_from_slice(&be32(cpusubtype));
            data.extend_from_slice(&be32(offset));
            data.extend_from_slice(&be32(size));
            data.extend_from_slice(&be32(align));
        }
        data.resize(total.max(data.len()), 0);
        Source::from_vec(data)
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(&[0xCA, 0xFE, 0xBA, 0xBE]),
            Container::Fat { is64: false }
        );
        assert_eq!(
            classify(&[0xCA, 0xFE, 0xBA, 0xBF]),
            Container::Fat { is64: true }
        );
        assert_eq!(
            classify(&[0xCF, 0xFA, 0xED, 0xFE]),
            Container::Thin {
                is64: true,
                endian: Endian::Little
            }
        );
        assert_eq!(
            classify(&[0xFE, 0xED, 0xFA, 0xCE]),
            Container::Thin {
                is64: false,
                endian: Endian::Big
            }
        );
        assert_eq!(classify(b"dyld_v1  arm64e\0"), Container::SharedCache);
        assert_eq!(classify(b"dyld"), Container::Unknown);
        assert_eq!(classify(&[0x7F, b'E', b'L', b'F']), Container::Unknown);
    }

    #[test]
    fn test_fat_slices_two_archs() {
        let source = build_fat(
            &[
                (CPU_TYPE_X86_64, CPU_SUBTYPE_X86_ALL, 0x1000, 0x100, 12),
                (CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_ALL, 0x2000, 0x200, 12),
            ],
            0x2200,
        );

        let slices = fat_slices(&source, false).unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].arch, arch_from_name("x86_64").unwrap());
        assert_eq!(slices[0].source.len(), 0x100);
        assert_eq!(slices[1].arch, arch_from_name("arm64").unwrap());
        assert_eq!(slices[1].source.len(), 0x200);
    }

    #[test]
    fn test_fat_duplicate_arch() {
        let source = build_fat(
            &[
                (CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_ALL, 0x1000, 0x100, 12),
                (CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_ALL, 0x2000, 0x100, 12),
            ],
            0x2100,
        );
        assert!(matches!(
            fat_slices(&source, false),
            Err(Error::ContradictoryContainerInfo { .. })
        ));
    }

    #[test]
    fn test_fat_overlapping_records() {
        let source = build_fat(
            &[
                (CPU_TYPE_X86_64, CPU_SUBTYPE_X86_ALL, 0x1000, 0x1100, 4),
                (CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_ALL, 0x2000, 0x100, 4),
            ],
            0x2200,
        );
        assert!(matches!(
            fat_slices(&source, false),
            Err(Error::ContradictoryContainerInfo { .. })
        ));
    }

    #[test]
    fn test_fat_record_out_of_bounds() {
        let source = build_fat(
            &[(CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_ALL, 0x1000, 0x10000, 4)],
            0x1100,
        );
        assert!(matches!(
            fat_slices(&source, false),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_fat_misaligned_record() {
        let source = build_fat(
            &[(CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_ALL, 0x1001, 0x100, 12)],
            0x1200,
        );
        assert!(matches!(fat_slices(&source, false), Err(Error::NotAMacho)));
    }

    #[test]
    fn test_fat_unknown_cputype() {
        let source = build_fat(&[(0x1234, 0, 0x1000, 0x100, 4)], 0x1100);
        assert!(matches!(
            fat_slices(&source, false),
            Err(Error::InvalidCpuType { cputype: 0x1234 })
        ));
    }

    #[test]
    fn test_fat_unknown_subtype() {
        let source = build_fat(&[(CPU_TYPE_ARM64, 0x77, 0x1000, 0x100, 4)], 0x1100);
        assert!(matches!(
            fat_slices(&source, false),
            Err(Error::InvalidCpuSubtype { .. })
        ));
    }

    #[test]
    fn test_fat_zero_count() {
        let source = build_fat(&[], 0x100);
        assert!(matches!(fat_slices(&source, false), Err(Error::NotAMacho)));
    }
}
