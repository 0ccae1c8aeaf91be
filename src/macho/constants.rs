//! Mach-O constants and flags.

use bitflags::bitflags;

// =============================================================================
// Magic Numbers
// =============================================================================

/// 32-bit Mach-O magic, in the byte order of the file that carries it.
pub const MH_MAGIC: u32 = 0xFEEDFACE;

/// 32-bit Mach-O magic as seen through the opposite byte order.
pub const MH_CIGAM: u32 = 0xCEFAEDFE;

/// 64-bit Mach-O magic.
pub const MH_MAGIC_64: u32 = 0xFEEDFACF;

/// 64-bit Mach-O magic as seen through the opposite byte order.
pub const MH_CIGAM_64: u32 = 0xCFFAEDFE;

/// Fat container magic (fat headers are always big-endian).
pub const FAT_MAGIC: u32 = 0xCAFEBABE;

/// 64-bit fat container magic.
pub const FAT_MAGIC_64: u32 = 0xCAFEBABF;

/// Leading tag of a dyld shared cache ("dyld_v1 " + architecture name).
pub const DSC_MAGIC_PREFIX: &[u8; 8] = b"dyld_v1 ";

// =============================================================================
// File Types
// =============================================================================

/// Dynamically bound shared library.
pub const MH_DYLIB: u32 = 0x6;
/// Dynamic link editor (a private system library).
pub const MH_DYLINKER: u32 = 0x7;
/// Shared library stub (no section contents).
pub const MH_DYLIB_STUB: u32 = 0x9;

// =============================================================================
// CPU Types
// =============================================================================

/// 64-bit architecture flag on a cputype.
pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;
/// ILP32 64-bit architecture flag on a cputype.
pub const CPU_ARCH_ABI64_32: u32 = 0x0200_0000;

/// x86 CPU type.
pub const CPU_TYPE_X86: u32 = 7;
/// x86_64 CPU type.
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;
/// ARM CPU type.
pub const CPU_TYPE_ARM: u32 = 12;
/// ARM64 CPU type.
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;
/// ARM64_32 CPU type (watchOS).
pub const CPU_TYPE_ARM64_32: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64_32;
/// PowerPC CPU type.
pub const CPU_TYPE_POWERPC: u32 = 18;
/// PowerPC 64 CPU type.
pub const CPU_TYPE_POWERPC64: u32 = CPU_TYPE_POWERPC | CPU_ARCH_ABI64;

// =============================================================================
// CPU Subtypes
// =============================================================================

/// Capability bits stored in the high byte of a cpusubtype.
pub const CPU_SUBTYPE_MASK: u32 = 0xFF00_0000;
/// 64-bit library capability bit.
pub const CPU_SUBTYPE_LIB64: u32 = 0x8000_0000;

/// ARMv4T.
pub const CPU_SUBTYPE_ARM_V4T: u32 = 5;
/// ARMv6.
pub const CPU_SUBTYPE_ARM_V6: u32 = 6;
/// ARMv5TEJ.
pub const CPU_SUBTYPE_ARM_V5TEJ: u32 = 7;
/// ARMv7.
pub const CPU_SUBTYPE_ARM_V7: u32 = 9;
/// ARMv7F (cortex a9).
pub const CPU_SUBTYPE_ARM_V7F: u32 = 10;
/// ARMv7S (swift).
pub const CPU_SUBTYPE_ARM_V7S: u32 = 11;
/// ARMv7K (watch).
pub const CPU_SUBTYPE_ARM_V7K: u32 = 12;
/// ARMv8.
pub const CPU_SUBTYPE_ARM_V8: u32 = 13;
/// ARMv6-M.
pub const CPU_SUBTYPE_ARM_V6M: u32 = 14;
/// ARMv7-M.
pub const CPU_SUBTYPE_ARM_V7M: u32 = 15;
/// ARMv7E-M.
pub const CPU_SUBTYPE_ARM_V7EM: u32 = 16;

/// ARM64 all.
pub const CPU_SUBTYPE_ARM64_ALL: u32 = 0;
/// ARM64e (pointer authentication).
pub const CPU_SUBTYPE_ARM64E: u32 = 2;
/// ARM64_32 v8.
pub const CPU_SUBTYPE_ARM64_32_V8: u32 = 1;

/// x86 all (also x86_64 all).
pub const CPU_SUBTYPE_X86_ALL: u32 = 3;
/// x86_64 haswell.
pub const CPU_SUBTYPE_X86_64_H: u32 = 8;

/// PowerPC all.
pub const CPU_SUBTYPE_POWERPC_ALL: u32 = 0;

// =============================================================================
// Load Commands
// =============================================================================

/// Load command must be understood by the dynamic linker.
pub const LC_REQ_DYLD: u32 = 0x8000_0000;

/// 32-bit segment.
pub const LC_SEGMENT: u32 = 0x1;
/// Symbol table.
pub const LC_SYMTAB: u32 = 0x2;
/// Dynamic symbol table.
pub const LC_DYSYMTAB: u32 = 0xB;
/// Dynamically linked shared library identification.
pub const LC_ID_DYLIB: u32 = 0xD;
/// Image routines.
pub const LC_ROUTINES: u32 = 0x11;
/// Sub-framework (names this library's parent umbrella).
pub const LC_SUB_FRAMEWORK: u32 = 0x12;
/// Sub-umbrella.
pub const LC_SUB_UMBRELLA: u32 = 0x13;
/// Sub-client (names a client allowed to link against this library).
pub const LC_SUB_CLIENT: u32 = 0x14;
/// Sub-library.
pub const LC_SUB_LIBRARY: u32 = 0x15;
/// 64-bit segment.
pub const LC_SEGMENT_64: u32 = 0x19;
/// 64-bit image routines.
pub const LC_ROUTINES_64: u32 = 0x1A;
/// UUID.
pub const LC_UUID: u32 = 0x1B;
/// Load and re-export a dylib.
pub const LC_REEXPORT_DYLIB: u32 = 0x1F | LC_REQ_DYLD;
/// Minimum macOS version.
pub const LC_VERSION_MIN_MACOSX: u32 = 0x24;
/// Minimum iOS version.
pub const LC_VERSION_MIN_IPHONEOS: u32 = 0x25;
/// Minimum tvOS version.
pub const LC_VERSION_MIN_TVOS: u32 = 0x2F;
/// Minimum watchOS version.
pub const LC_VERSION_MIN_WATCHOS: u32 = 0x30;
/// Build platform and minimum version.
pub const LC_BUILD_VERSION: u32 = 0x32;

// =============================================================================
// Build Platforms
// =============================================================================

/// macOS.
pub const PLATFORM_MACOS: u32 = 1;
/// iOS.
pub const PLATFORM_IOS: u32 = 2;
/// tvOS.
pub const PLATFORM_TVOS: u32 = 3;
/// watchOS.
pub const PLATFORM_WATCHOS: u32 = 4;
/// bridgeOS.
pub const PLATFORM_BRIDGEOS: u32 = 5;
/// Mac Catalyst (iOSMac).
pub const PLATFORM_MACCATALYST: u32 = 6;
/// iOS simulator.
pub const PLATFORM_IOSSIMULATOR: u32 = 7;
/// tvOS simulator.
pub const PLATFORM_TVOSSIMULATOR: u32 = 8;
/// watchOS simulator.
pub const PLATFORM_WATCHOSSIMULATOR: u32 = 9;
/// DriverKit.
pub const PLATFORM_DRIVERKIT: u32 = 10;

// =============================================================================
// Symbol Types
// =============================================================================

/// If any of these bits are set, a symbolic debugging entry.
pub const N_STAB: u8 = 0xE0;
/// Private external symbol bit.
pub const N_PEXT: u8 = 0x10;
/// Mask for the type bits.
pub const N_TYPE: u8 = 0x0E;
/// External symbol bit.
pub const N_EXT: u8 = 0x01;

/// Undefined symbol.
pub const N_UNDF: u8 = 0x0;
/// Absolute symbol.
pub const N_ABS: u8 = 0x2;
/// Defined in section number n_sect.
pub const N_SECT: u8 = 0xE;
/// Indirect symbol.
pub const N_INDR: u8 = 0xA;

/// Weak definition bit in n_desc.
pub const N_WEAK_DEF: u16 = 0x0080;

// =============================================================================
// Sections
// =============================================================================

/// Section type mask within section flags.
pub const SECTION_TYPE: u32 = 0x0000_00FF;
/// Thread-local variable descriptors.
pub const S_THREAD_LOCAL_VARIABLES: u32 = 0x13;

/// Section holding the objc image-info words.
pub const SECT_OBJC_IMAGEINFO: &str = "__objc_imageinfo";
/// Legacy objc image-info section name (in the `__OBJC` segment).
pub const SECT_OBJC_IMAGEINFO_LEGACY: &str = "__image_info";

// =============================================================================
// Header Flags
// =============================================================================

bitflags! {
    /// Mach-O header flags consumed by the stub pipeline.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MachFlags: u32 {
        /// The object file has no undefined references.
        const NOUNDEFS = 0x1;
        /// The image is using two-level namespace bindings.
        const TWOLEVEL = 0x80;
        /// The executable forces all images to use flat namespace bindings.
        const FORCE_FLAT = 0x100;
        /// The final linked image contains external weak symbols.
        const WEAK_DEFINES = 0x8000;
        /// The code was linked for use in an application extension.
        const APP_EXTENSION_SAFE = 0x0200_0000;
        /// The dylib is part of the dyld shared cache.
        const DYLIB_IN_CACHE = 0x8000_0000;
    }
}

// =============================================================================
// Objc Image Info
// =============================================================================

bitflags! {
    /// Flag word of the `__objc_imageinfo` section.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObjcImageFlags: u32 {
        /// Image is an objc replacement image.
        const IS_REPLACEMENT = 1 << 0;
        /// Image supports garbage collection.
        const SUPPORTS_GC = 1 << 1;
        /// Image requires garbage collection.
        const REQUIRES_GC = 1 << 2;
        /// Image was optimized by dyld.
        const OPTIMIZED_BY_DYLD = 1 << 3;
        /// Image was built for a simulator platform.
        const IS_SIMULATED = 1 << 5;
        /// Class properties are present on categories.
        const HAS_CATEGORY_CLASS_PROPERTIES = 1 << 6;
    }
}

/// Swift ABI version bits within the objc image-info flag word.
pub const OBJC_IMAGE_SWIFT_VERSION_MASK: u32 = 0x0000_FF00;
/// Shift for the swift ABI version bits.
pub const OBJC_IMAGE_SWIFT_VERSION_SHIFT: u32 = 8;
