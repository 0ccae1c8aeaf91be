//! Symbol table iteration and classification.
//!
//! Iteration is restricted to the externally-defined range from the dynamic
//! symbol table unless a private-symbol option widens it to the whole table.
//! Names resolve through the string table; a name that runs off the end of
//! its table is a malformed-input error, not a truncation.

use zerocopy::FromBytes;

use super::constants::*;
use super::structs::{Nlist32, Nlist64, SymtabCommand};
use crate::error::{Error, Result};
use crate::source::Source;
use crate::tbd::{Symbol, SymbolKind};
use crate::util::{null_terminated_str, range_fits, Endian};

/// The externally-defined symbol range from LC_DYSYMTAB.
#[derive(Debug, Clone, Copy)]
pub struct ExternalRange {
    /// Index of the first externally-defined symbol.
    pub start: u32,
    /// Number of externally-defined symbols.
    pub count: u32,
}

/// Which non-external symbols survive classification.
///
/// One flag per classification; a private symbol is kept only when the flag
/// matching its kind is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolOptions {
    /// Keep private plain and thread-local symbols.
    pub allow_private_normal_symbols: bool,
    /// Keep private weakly-defined symbols.
    pub allow_private_weak_symbols: bool,
    /// Keep private objc class (and metaclass) symbols.
    pub allow_private_objc_classes: bool,
    /// Keep private objc exception type symbols.
    pub allow_private_objc_ehtypes: bool,
    /// Keep private objc instance variable symbols.
    pub allow_private_objc_ivars: bool,
}

impl SymbolOptions {
    /// Returns true if any private classification is enabled, which forces a
    /// full-table scan.
    pub fn any_private(&self) -> bool {
        self.allow_private_normal_symbols
            || self.allow_private_weak_symbols
            || self.allow_private_objc_classes
            || self.allow_private_objc_ehtypes
            || self.allow_private_objc_ivars
    }
}

/// Collects the exported symbols of one image.
///
/// `linkedit` is the source the symbol and string table offsets are relative
/// to; for a standalone thin image that is the image itself, for a
/// shared-cache image it is the whole cache (the tables are shared).
/// `tlv_sections[i]` is true when 1-based section ordinal `i + 1` holds
/// thread-local variables.
pub fn collect_symbols(
    linkedit: &Source,
    endian: Endian,
    is64: bool,
    symtab: &SymtabCommand,
    external: Option<ExternalRange>,
    tlv_sections: &[bool],
    options: &SymbolOptions,
) -> Result<Vec<Symbol>> {
    let entry_size = if is64 { Nlist64::SIZE } else { Nlist32::SIZE };
    let table_len = symtab.nsyms as u64 * entry_size as u64;

    if !range_fits(symtab.symoff as u64, table_len, linkedit.len())
        || !range_fits(symtab.stroff as u64, symtab.strsize as u64, linkedit.len())
    {
        return Err(Error::FailedToIterateSymbols);
    }

    let entries = linkedit.read_at(symtab.symoff as u64, table_len as usize)?;
    let strings = linkedit.read_at(symtab.stroff as u64, symtab.strsize as usize)?;

    // Private symbols live outside the externally-defined range, so any
    // allow-private option widens iteration to the full table.
    let (start, count) = match external {
        Some(range) if !options.any_private() => {
            let end = range
                .start
                .checked_add(range.count)
                .ok_or(Error::FailedToIterateSymbols)?;
            if end > symtab.nsyms {
                return Err(Error::FailedToIterateSymbols);
            }
            (range.start, range.count)
        }
        _ => (0, symtab.nsyms),
    };

    let mut symbols = Vec::new();

    for i in start..start + count {
        let raw = &entries[i as usize * entry_size..];
        let (n_strx, n_type, n_sect, n_desc) = if is64 {
            let mut nlist = Nlist64::read_from_prefix(raw)
                .map_err(|_| Error::FailedToIterateSymbols)?
                .0;
            if endian.is_swapped() {
                nlist = nlist.byte_swapped();
            }
            (nlist.n_strx, nlist.n_type, nlist.n_sect, nlist.n_desc)
        } else {
            let mut nlist = Nlist32::read_from_prefix(raw)
                .map_err(|_| Error::FailedToIterateSymbols)?
                .0;
            if endian.is_swapped() {
                nlist = nlist.byte_swapped();
            }
            (nlist.n_strx, nlist.n_type, nlist.n_sect, nlist.n_desc)
        };

        if n_type & N_STAB != 0 {
            continue;
        }

        // Only defined symbols are part of the export surface.
        let type_bits = n_type & N_TYPE;
        if type_bits != N_SECT && type_bits != N_ABS {
            continue;
        }

        if n_strx == 0 {
            continue;
        }
        if n_strx >= symtab.strsize {
            return Err(Error::FailedToIterateSymbols);
        }
        let name = null_terminated_str(&strings[n_strx as usize..])
            .ok_or(Error::FailedToIterateSymbols)?;
        if name.is_empty() {
            continue;
        }

        let (kind, stripped) = classify(name, n_desc, n_sect, tlv_sections);

        let external = n_type & N_EXT != 0;
        let keep = match kind {
            SymbolKind::Normal | SymbolKind::ThreadLocal => {
                external || options.allow_private_normal_symbols
            }
            SymbolKind::WeakDefined => external || options.allow_private_weak_symbols,
            SymbolKind::ObjcClass | SymbolKind::ObjcMetaclass => {
                external || options.allow_private_objc_classes
            }
            SymbolKind::ObjcEhtype => external || options.allow_private_objc_ehtypes,
            SymbolKind::ObjcIvar => external || options.allow_private_objc_ivars,
        };
        if !keep {
            continue;
        }

        symbols.push(Symbol {
            name: stripped.to_string(),
            kind,
        });
    }

    Ok(symbols)
}

/// Classifies a symbol by name prefix, then by `n_desc` bits and section.
fn classify<'a>(name: &'a str, n_desc: u16, n_sect: u8, tlv_sections: &[bool]) -> (SymbolKind, &'a str) {
    if let Some(rest) = name.strip_prefix("_OBJC_CLASS_$_") {
        return (SymbolKind::ObjcClass, rest);
    }
    if let Some(rest) = name.strip_prefix(".objc_class_name_") {
        return (SymbolKind::ObjcClass, rest);
    }
    if let Some(rest) = name.strip_prefix("_OBJC_METACLASS_$_") {
        return (SymbolKind::ObjcMetaclass, rest);
    }
    if let Some(rest) = name.strip_prefix("_OBJC_EHTYPE_$_") {
        return (SymbolKind::ObjcEhtype, rest);
    }
    if let Some(rest) = name.strip_prefix("_OBJC_IVAR_$_") {
        return (SymbolKind::ObjcIvar, rest);
    }

    if n_desc & N_WEAK_DEF != 0 {
        return (SymbolKind::WeakDefined, name);
    }
    if n_sect >= 1 && tlv_sections.get(n_sect as usize - 1) == Some(&true) {
        return (SymbolKind::ThreadLocal, name);
    }

    (SymbolKind::Normal, name)
}
