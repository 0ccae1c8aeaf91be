//! Error types for Mach-O parsing, stub merging and tbd emission.
//!
//! Every fallible operation in the crate returns one of these kinds; nothing
//! panics on malformed input. The platform kinds are recoverable: the caller
//! may re-run the merge with a platform override without re-reading the file.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for tbd generation.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O / Source Errors ====================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open file '{path}': {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to memory map file '{path}': {source}")]
    MemoryMap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("read of {len} bytes at offset {offset:#x} is out of range (size: {size:#x})")]
    OutOfRange { offset: u64, len: u64, size: u64 },

    // ==================== Classification Errors ====================
    #[error("file is not a mach-o binary")]
    NotAMacho,

    #[error("mach-o file is not a dynamic library (filetype: {filetype:#x})")]
    NotALibrary { filetype: u32 },

    #[error("file is not a dyld shared cache")]
    NotASharedCache,

    // ==================== Mach-O Errors ====================
    #[error("unrecognized cputype {cputype:#x}")]
    InvalidCpuType { cputype: u32 },

    #[error("unrecognized cpusubtype {cpusubtype:#x} for cputype {cputype:#x}")]
    InvalidCpuSubtype { cputype: u32, cpusubtype: u32 },

    #[error("invalid load command at index {index} (offset {offset:#x})")]
    InvalidLoadCommand { index: u32, offset: u64 },

    #[error("invalid segment command '{name}'")]
    InvalidSegment { name: String },

    #[error("load commands extend past the end of the file")]
    FailedToIterateLoadCommands,

    #[error("symbol table is malformed or extends past the end of the file")]
    FailedToIterateSymbols,

    #[error("load commands provide contradictory {field}")]
    ContradictoryLoadCommandInfo { field: &'static str },

    #[error("mach-o file has an empty installation name")]
    EmptyInstallName,

    #[error("mach-o file has no uuid")]
    HasNoUuid,

    // ==================== Platform Errors (recoverable) ====================
    #[error("no platform found in any mach-o load command")]
    PlatformNotFound,

    #[error("platform '{name}' is not supported by tbd files")]
    PlatformNotSupported { name: &'static str },

    #[error("unrecognized platform value {value:#x}")]
    UnrecognizedPlatform { value: u32 },

    #[error("multiple conflicting platforms ({first} and {second})")]
    MultiplePlatforms {
        first: &'static str,
        second: &'static str,
    },

    // ==================== Merge Errors ====================
    #[error("architectures provide contradictory {field}")]
    ContradictoryContainerInfo { field: &'static str },

    #[error("uuid is shared by more than one architecture")]
    UuidNotUnique,

    // ==================== Selection / Output Errors ====================
    #[error("none of the requested architectures are present")]
    NoProvidedArchitectures,

    #[error("mach-o file has no exported symbols or re-exports")]
    NoSymbolsOrReexports,

    #[error("failed to write output '{target}': {source}")]
    WriteFailed {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("output file '{path}' already exists")]
    AlreadyExists { path: PathBuf },
}

/// A specialized Result type for tbd generation.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if the error can be recovered from by re-merging with a
    /// caller-supplied platform, without re-parsing the input.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::PlatformNotFound
                | Error::PlatformNotSupported { .. }
                | Error::UnrecognizedPlatform { .. }
                | Error::MultiplePlatforms { .. }
        )
    }

    /// Creates an out-of-range error.
    #[inline]
    pub fn out_of_range(offset: u64, len: u64, size: u64) -> Self {
        Error::OutOfRange { offset, len, size }
    }
}
