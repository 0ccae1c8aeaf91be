//! The stub data model.
//!
//! [`ImageFacts`] is what the Mach-O parser extracts from one architecture;
//! [`Stub`] is the cross-architecture merge of one or more facts records and
//! is what the writer serialises. Scalar vocabularies (platforms, objc
//! constraints, flag spellings) match what tbd documents actually carry.

use std::collections::HashMap;
use std::fmt;

use bitflags::bitflags;

use crate::arch::ArchSet;
use crate::macho::constants::*;

// =============================================================================
// Scalars
// =============================================================================

/// The tbd dialect to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TbdVersion {
    /// `--- !tapi-tbd-v1`
    V1,
    /// `--- !tapi-tbd-v2`
    #[default]
    V2,
    /// `--- !tapi-tbd-v3`
    V3,
}

impl TbdVersion {
    /// The document start tag for this dialect.
    pub fn document_tag(self) -> &'static str {
        match self {
            TbdVersion::V1 => "--- !tapi-tbd-v1",
            TbdVersion::V2 => "--- !tapi-tbd-v2",
            TbdVersion::V3 => "--- !tapi-tbd-v3",
        }
    }

    /// Parses a user-supplied dialect name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "v1" => Some(TbdVersion::V1),
            "v2" => Some(TbdVersion::V2),
            "v3" => Some(TbdVersion::V3),
            _ => None,
        }
    }

    /// All dialect names, for listing.
    pub fn names() -> &'static [&'static str] {
        &["v1", "v2", "v3"]
    }
}

/// The platform a library was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Platform {
    /// macOS.
    Macosx,
    /// iOS (simulator folds into this).
    Ios,
    /// watchOS.
    Watchos,
    /// tvOS.
    Tvos,
    /// bridgeOS.
    Bridgeos,
    /// Mac Catalyst.
    Iosmac,
    /// Built for both macOS and Mac Catalyst.
    Zippered,
}

impl Platform {
    /// The name written into tbd documents.
    pub fn name(self) -> &'static str {
        match self {
            Platform::Macosx => "macosx",
            Platform::Ios => "ios",
            Platform::Watchos => "watchos",
            Platform::Tvos => "tvos",
            Platform::Bridgeos => "bridgeos",
            Platform::Iosmac => "iosmac",
            Platform::Zippered => "zippered",
        }
    }

    /// Parses a user-supplied platform name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "macosx" => Some(Platform::Macosx),
            "ios" => Some(Platform::Ios),
            "watchos" => Some(Platform::Watchos),
            "tvos" => Some(Platform::Tvos),
            "bridgeos" => Some(Platform::Bridgeos),
            "iosmac" => Some(Platform::Iosmac),
            "zippered" => Some(Platform::Zippered),
            _ => None,
        }
    }

    /// Maps an LC_BUILD_VERSION platform identifier.
    ///
    /// Simulator platforms fold into their device counterparts; tbd
    /// documents do not distinguish them.
    pub fn from_build_version(value: u32) -> crate::error::Result<Self> {
        match value {
            PLATFORM_MACOS => Ok(Platform::Macosx),
            PLATFORM_IOS | PLATFORM_IOSSIMULATOR => Ok(Platform::Ios),
            PLATFORM_TVOS | PLATFORM_TVOSSIMULATOR => Ok(Platform::Tvos),
            PLATFORM_WATCHOS | PLATFORM_WATCHOSSIMULATOR => Ok(Platform::Watchos),
            PLATFORM_BRIDGEOS => Ok(Platform::Bridgeos),
            PLATFORM_MACCATALYST => Ok(Platform::Iosmac),
            PLATFORM_DRIVERKIT => Err(crate::error::Error::PlatformNotSupported {
                name: "driverkit",
            }),
            _ => Err(crate::error::Error::UnrecognizedPlatform { value }),
        }
    }

    /// All platform names, for listing.
    pub fn names() -> &'static [&'static str] {
        &[
            "macosx", "ios", "watchos", "tvos", "bridgeos", "iosmac", "zippered",
        ]
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A version packed as 16.8.8 bits (major.minor.patch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackedVersion(pub u32);

impl PackedVersion {
    /// Returns the major component.
    #[inline]
    pub fn major(self) -> u32 {
        self.0 >> 16
    }

    /// Returns the minor component.
    #[inline]
    pub fn minor(self) -> u32 {
        (self.0 >> 8) & 0xFF
    }

    /// Returns the patch component.
    #[inline]
    pub fn patch(self) -> u32 {
        self.0 & 0xFF
    }
}

impl fmt::Display for PackedVersion {
    /// Renders `major.minor.patch` with trailing zero components elided
    /// below the major.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.patch() != 0 {
            write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
        } else if self.minor() != 0 {
            write!(f, "{}.{}", self.major(), self.minor())
        } else {
            write!(f, "{}", self.major())
        }
    }
}

/// The objc runtime contract a library requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjcConstraint {
    /// No constraint.
    None,
    /// Retain/release.
    RetainRelease,
    /// Retain/release, built for a simulator.
    RetainReleaseForSimulator,
    /// Retain/release or garbage collection.
    RetainReleaseOrGc,
    /// Garbage collection.
    Gc,
}

impl ObjcConstraint {
    /// The name written into tbd documents.
    pub fn name(self) -> &'static str {
        match self {
            ObjcConstraint::None => "none",
            ObjcConstraint::RetainRelease => "retain_release",
            ObjcConstraint::RetainReleaseForSimulator => "retain_release_for_simulator",
            ObjcConstraint::RetainReleaseOrGc => "retain_release_or_gc",
            ObjcConstraint::Gc => "gc",
        }
    }

    /// Parses a user-supplied constraint name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(ObjcConstraint::None),
            "retain_release" => Some(ObjcConstraint::RetainRelease),
            "retain_release_for_simulator" => Some(ObjcConstraint::RetainReleaseForSimulator),
            "retain_release_or_gc" => Some(ObjcConstraint::RetainReleaseOrGc),
            "gc" => Some(ObjcConstraint::Gc),
            _ => None,
        }
    }

    /// Derives the constraint from objc image-info flags.
    pub fn from_image_flags(flags: ObjcImageFlags) -> Self {
        if flags.contains(ObjcImageFlags::REQUIRES_GC) {
            ObjcConstraint::Gc
        } else if flags.contains(ObjcImageFlags::SUPPORTS_GC) {
            ObjcConstraint::RetainReleaseOrGc
        } else if flags.contains(ObjcImageFlags::IS_SIMULATED) {
            ObjcConstraint::RetainReleaseForSimulator
        } else {
            ObjcConstraint::RetainRelease
        }
    }

    /// All constraint names, for listing.
    pub fn names() -> &'static [&'static str] {
        &[
            "none",
            "retain_release",
            "retain_release_or_gc",
            "retain_release_for_simulator",
            "gc",
        ]
    }
}

bitflags! {
    /// Top-level tbd flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TbdFlags: u32 {
        /// The library uses flat namespace bindings.
        const FLAT_NAMESPACE = 1 << 0;
        /// The library is not safe for use in app extensions.
        const NOT_APP_EXTENSION_SAFE = 1 << 1;
    }
}

impl TbdFlags {
    /// Parses a user-supplied flag name.
    pub fn from_flag_name(name: &str) -> Option<Self> {
        match name {
            "flat_namespace" => Some(TbdFlags::FLAT_NAMESPACE),
            "not_app_extension_safe" => Some(TbdFlags::NOT_APP_EXTENSION_SAFE),
            _ => None,
        }
    }

    /// Derives tbd flags from a mach-o header's flag word.
    pub fn from_mach_flags(flags: MachFlags) -> Self {
        let mut out = TbdFlags::empty();
        if !flags.contains(MachFlags::TWOLEVEL) {
            out |= TbdFlags::FLAT_NAMESPACE;
        }
        if !flags.contains(MachFlags::APP_EXTENSION_SAFE) {
            out |= TbdFlags::NOT_APP_EXTENSION_SAFE;
        }
        out
    }

    /// The names of the set flags, in emission order.
    pub fn set_names(self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.contains(TbdFlags::FLAT_NAMESPACE) {
            names.push("flat_namespace");
        }
        if self.contains(TbdFlags::NOT_APP_EXTENSION_SAFE) {
            names.push("not_app_extension_safe");
        }
        names
    }

    /// All flag names, for listing.
    pub fn all_names() -> &'static [&'static str] {
        &["flat_namespace", "not_app_extension_safe"]
    }
}

/// Mach-O file types convertible to a stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// A dynamic library.
    Dylib,
    /// A stub library without section contents.
    DylibStub,
    /// The dynamic linker itself (a private system library).
    Dylinker,
}

impl FileType {
    /// Maps a raw mach-o filetype value, or `None` for non-library types.
    pub fn from_raw(filetype: u32) -> Option<Self> {
        match filetype {
            MH_DYLIB => Some(FileType::Dylib),
            MH_DYLIB_STUB => Some(FileType::DylibStub),
            MH_DYLINKER => Some(FileType::Dylinker),
            _ => None,
        }
    }
}

// =============================================================================
// Symbols
// =============================================================================

/// Classification of an exported symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// Plain exported symbol.
    Normal,
    /// Weakly defined symbol.
    WeakDefined,
    /// Thread-local variable.
    ThreadLocal,
    /// Objc class (name stored without its prefix).
    ObjcClass,
    /// Objc metaclass (folds into the class bucket on merge).
    ObjcMetaclass,
    /// Objc exception type (name stored without its prefix).
    ObjcEhtype,
    /// Objc instance variable (name stored without its prefix).
    ObjcIvar,
}

/// One exported symbol extracted from a symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Symbol name; objc kinds store the bare name with the prefix stripped.
    pub name: String,
    /// Classification.
    pub kind: SymbolKind,
}

// =============================================================================
// Image Facts
// =============================================================================

/// The identification carried by an LC_ID_DYLIB command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DylibId {
    /// Install name (canonical runtime path).
    pub install_name: String,
    /// Current version.
    pub current_version: PackedVersion,
    /// Compatibility version.
    pub compatibility_version: PackedVersion,
}

/// Everything extracted from one thin Mach-O image.
#[derive(Debug, Clone)]
pub struct ImageFacts {
    /// Architecture registry index.
    pub arch: usize,
    /// Library file type.
    pub file_type: FileType,
    /// Identification from LC_ID_DYLIB, if present.
    pub id: Option<DylibId>,
    /// UUID from LC_UUID, if present.
    pub uuid: Option<[u8; 16]>,
    /// Platforms named by build-version / version-min commands, first
    /// appearance order, deduplicated.
    pub platforms: Vec<Platform>,
    /// Flags derived from the header flag word.
    pub flags: TbdFlags,
    /// Swift ABI version from the objc image-info, 0 if none.
    pub swift_version: u32,
    /// Objc constraint, if the image carries objc image-info.
    pub objc_constraint: Option<ObjcConstraint>,
    /// Category class properties bit from the objc image-info.
    pub has_category_class_properties: bool,
    /// Parent umbrella from LC_SUB_FRAMEWORK.
    pub parent_umbrella: Option<String>,
    /// Re-exported dylib install names, in load-command order.
    pub reexports: Vec<String>,
    /// Allowable client names from LC_SUB_CLIENT, in load-command order.
    pub clients: Vec<String>,
    /// Sub-umbrella names (parsed and validated; no dialect emits them).
    pub sub_umbrellas: Vec<String>,
    /// Sub-library names (parsed and validated; no dialect emits them).
    pub sub_libraries: Vec<String>,
    /// Exported symbols in symbol-table order.
    pub symbols: Vec<Symbol>,
}

impl ImageFacts {
    /// Creates an empty facts record for one architecture.
    pub fn new(arch: usize, file_type: FileType) -> Self {
        Self {
            arch,
            file_type,
            id: None,
            uuid: None,
            platforms: Vec::new(),
            flags: TbdFlags::empty(),
            swift_version: 0,
            objc_constraint: None,
            has_category_class_properties: false,
            parent_umbrella: None,
            reexports: Vec::new(),
            clients: Vec::new(),
            sub_umbrellas: Vec::new(),
            sub_libraries: Vec::new(),
            symbols: Vec::new(),
        }
    }
}

// =============================================================================
// Export Sets
// =============================================================================

/// An ordered set of `(value, arch bitset)` pairs.
///
/// Values keep their first-appearance order, which makes serialisation
/// deterministic across merges; re-inserting a value ORs the architecture
/// into its bitset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportSet {
    entries: Vec<(String, ArchSet)>,
    index: HashMap<String, usize>,
}

impl ExportSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` for `arch`, or extends the existing entry's bitset.
    pub fn insert(&mut self, value: &str, arch: usize) {
        match self.index.get(value) {
            Some(&pos) => self.entries[pos].1.insert(arch),
            None => {
                self.index.insert(value.to_string(), self.entries.len());
                self.entries.push((value.to_string(), ArchSet::single(arch)));
            }
        }
    }

    /// Iterates entries in first-appearance order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ArchSet)> {
        self.entries.iter().map(|(value, set)| (value.as_str(), *set))
    }

    /// Returns true if the set holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Rewrites every entry's bitset to `archs`.
    pub fn retarget(&mut self, archs: ArchSet) {
        for (_, set) in &mut self.entries {
            *set = archs;
        }
    }
}

// =============================================================================
// Stub
// =============================================================================

/// The merged, cross-architecture stub model a tbd document serialises.
#[derive(Debug, Clone, PartialEq)]
pub struct Stub {
    /// Architectures covered.
    pub archs: ArchSet,
    /// The single platform (or zippered).
    pub platform: Platform,
    /// Install name.
    pub install_name: String,
    /// Current version.
    pub current_version: PackedVersion,
    /// Compatibility version.
    pub compatibility_version: PackedVersion,
    /// Swift ABI version, 0 if none.
    pub swift_version: u32,
    /// Objc constraint, if any architecture carried objc image-info.
    pub objc_constraint: Option<ObjcConstraint>,
    /// Parent umbrella, if any.
    pub parent_umbrella: Option<String>,
    /// Top-level flags.
    pub flags: TbdFlags,
    /// Per-architecture UUIDs, ordered by registry index.
    pub uuids: Vec<(usize, [u8; 16])>,
    /// Re-exported libraries.
    pub reexports: ExportSet,
    /// Allowable clients.
    pub clients: ExportSet,
    /// Plain symbols.
    pub normal_symbols: ExportSet,
    /// Weakly defined symbols.
    pub weak_defined_symbols: ExportSet,
    /// Thread-local symbols.
    pub thread_local_symbols: ExportSet,
    /// Objc classes (bare names).
    pub objc_classes: ExportSet,
    /// Objc exception types (bare names).
    pub objc_ehtypes: ExportSet,
    /// Objc instance variables (bare names).
    pub objc_ivars: ExportSet,
}

impl Stub {
    /// Replaces the document's architecture list wholesale, rendering every
    /// export entry with the new set. The per-architecture UUID map keeps
    /// the actually-parsed architectures.
    pub fn override_archs(&mut self, archs: ArchSet) {
        self.archs = archs;
        self.reexports.retarget(archs);
        self.clients.retarget(archs);
        self.normal_symbols.retarget(archs);
        self.weak_defined_symbols.retarget(archs);
        self.thread_local_symbols.retarget(archs);
        self.objc_classes.retarget(archs);
        self.objc_ehtypes.retarget(archs);
        self.objc_ivars.retarget(archs);
    }
}
