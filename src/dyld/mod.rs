//! Dyld shared cache parsing and image selection.

pub mod context;
pub mod filter;
pub mod structs;

pub use context::{DscContext, DscImage};
pub use filter::{FilterKind, ImageFilter, Selection};
