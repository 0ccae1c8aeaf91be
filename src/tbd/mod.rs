//! The tbd side of the pipeline: model, merge, and serialisation.

pub mod merger;
pub mod stub;
pub mod writer;

pub use merger::{merge, MergeOptions};
pub use stub::{
    DylibId, ExportSet, FileType, ImageFacts, ObjcConstraint, PackedVersion, Platform, Stub,
    Symbol, SymbolKind, TbdFlags, TbdVersion,
};
pub use writer::write_tbd;
