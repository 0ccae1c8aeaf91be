//! Mach-O container and image parsing.
//!
//! [`fat`] classifies a byte stream and fans a fat container out into thin
//! slices; [`image`] turns one thin slice into the facts the stub merger
//! consumes; [`symbols`] walks symbol tables on [`image`]'s behalf.

pub mod constants;
pub mod fat;
pub mod image;
pub mod structs;
pub mod symbols;

pub use fat::{classify, fat_slices, Container, FatSlice};
pub use image::parse_image;
pub use symbols::{ExternalRange, SymbolOptions};
