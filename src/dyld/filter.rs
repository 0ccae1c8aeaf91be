//! Selecting which cache images to convert.
//!
//! Filters match by interior directory component, by leaf filename, or by
//! exact path; numbers address the image table directly (1-based). Every
//! filter tracks whether it ever matched so unmatched ones surface as
//! warnings after the run, and an image matched by several filters is still
//! selected only once.

use super::context::DscImage;

/// How a filter string is compared against an image path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Matches when any interior path component equals the string.
    Directory,
    /// Matches when the leaf filename (with extension) equals the string.
    Filename,
    /// Matches when the whole path equals the string.
    Path,
}

/// One user-supplied image filter.
#[derive(Debug, Clone)]
pub struct ImageFilter {
    /// Comparison mode.
    pub kind: FilterKind,
    /// The string to compare with.
    pub value: String,
    /// Set once the filter has matched at least one image.
    pub found: bool,
}

impl ImageFilter {
    /// Creates a directory-component filter.
    pub fn directory(value: impl Into<String>) -> Self {
        Self {
            kind: FilterKind::Directory,
            value: value.into(),
            found: false,
        }
    }

    /// Creates a leaf-filename filter.
    pub fn filename(value: impl Into<String>) -> Self {
        Self {
            kind: FilterKind::Filename,
            value: value.into(),
            found: false,
        }
    }

    /// Creates an exact-path filter.
    pub fn path(value: impl Into<String>) -> Self {
        Self {
            kind: FilterKind::Path,
            value: value.into(),
            found: false,
        }
    }

    /// Returns true if the filter matches `path`.
    pub fn matches(&self, path: &str) -> bool {
        match self.kind {
            FilterKind::Path => path == self.value,
            FilterKind::Filename => {
                path.rsplit('/').next().unwrap_or(path) == self.value
            }
            FilterKind::Directory => {
                let mut components: Vec<&str> =
                    path.split('/').filter(|c| !c.is_empty()).collect();
                // The leaf is a filename, not a directory.
                components.pop();
                components.iter().any(|&c| c == self.value)
            }
        }
    }
}

/// The full selection a user supplied for one cache.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// String filters.
    pub filters: Vec<ImageFilter>,
    /// 1-based image numbers.
    pub numbers: Vec<u64>,
}

impl Selection {
    /// Returns true when no filter or number was supplied, which selects
    /// every image.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.numbers.is_empty()
    }

    /// Resolves the selection against an image table.
    ///
    /// Returns the selected image indices in table order (each at most
    /// once) and the numbers that fell outside the table; out-of-range
    /// numbers are warnings for the caller, not errors.
    pub fn select(&mut self, images: &[DscImage]) -> (Vec<usize>, Vec<u64>) {
        if self.is_empty() {
            return ((0..images.len()).collect(), Vec::new());
        }

        let mut chosen = vec![false; images.len()];

        for image in images {
            for filter in &mut self.filters {
                if filter.matches(&image.path) {
                    filter.found = true;
                    chosen[image.index] = true;
                }
            }
        }

        let mut out_of_range = Vec::new();
        for &number in &self.numbers {
            match number.checked_sub(1) {
                Some(index) if (index as usize) < images.len() => {
                    chosen[index as usize] = true;
                }
                _ => out_of_range.push(number),
            }
        }

        let selected = (0..images.len()).filter(|&i| chosen[i]).collect();
        (selected, out_of_range)
    }

    /// Iterates the filters that never matched an image.
    pub fn unmatched(&self) -> impl Iterator<Item = &ImageFilter> {
        self.filters.iter().filter(|f| !f.found)
    }
}
