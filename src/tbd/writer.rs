//! Serialisation of a stub model to tbd v1/v2/v3 text.
//!
//! The layout is fixed: key order at the top level, bucket order inside an
//! export block, blocks ordered by first appearance of their architecture
//! subset, entries within a block sorted ascending by byte value, lines
//! wrapped at 80 columns. Given the same stub, the output is byte-identical
//! across runs.

use std::io::{self, Write};

use crate::arch::{arch_name, ArchSet};
use crate::tbd::stub::{ExportSet, Stub, TbdVersion};

/// Column limit for wrapped lists.
const LINE_WIDTH: usize = 80;

/// Characters that force a string to be double-quoted.
const QUOTE_TRIGGERS: &[char] = &[
    ':', '{', '}', '[', ']', ',', '&', '*', '#', '?', '|', '-', '<', '>', '=', '!', '%', '@', '\\',
];

/// Serialises `stub` as one tbd document in the requested dialect.
pub fn write_tbd<W: Write>(w: &mut W, stub: &Stub, version: TbdVersion) -> io::Result<()> {
    writeln!(w, "{}", version.document_tag())?;

    let arch_names: Vec<String> = stub.archs.names().map(str::to_string).collect();
    write_wrapped_list(w, 0, "archs", &arch_names)?;

    if version >= TbdVersion::V2 {
        let uuids: Vec<String> = stub
            .uuids
            .iter()
            .map(|&(arch, uuid)| format!("'{}: {}'", arch_name(arch), format_uuid(&uuid)))
            .collect();
        write_wrapped_list(w, 0, "uuids", &uuids)?;
    }

    writeln!(w, "platform: {}", stub.platform.name())?;

    if version >= TbdVersion::V2 && !stub.flags.is_empty() {
        let flags: Vec<String> = stub.flags.set_names().iter().map(|s| s.to_string()).collect();
        write_wrapped_list(w, 0, "flags", &flags)?;
    }

    writeln!(w, "install-name: {}", quoted(&stub.install_name))?;
    writeln!(w, "current-version: {}", stub.current_version)?;
    writeln!(w, "compatibility-version: {}", stub.compatibility_version)?;

    if stub.swift_version != 0 {
        writeln!(w, "swift-version: {}", swift_version_string(stub.swift_version))?;
    }
    if let Some(constraint) = stub.objc_constraint {
        writeln!(w, "objc-constraint: {}", constraint.name())?;
    }
    if let Some(umbrella) = &stub.parent_umbrella {
        writeln!(w, "parent-umbrella: {}", quoted(umbrella))?;
    }

    write_exports(w, stub, version)?;

    writeln!(w, "...")
}

// =============================================================================
// Exports
// =============================================================================

struct Bucket {
    key: &'static str,
    entries: Vec<(String, ArchSet)>,
}

fn write_exports<W: Write>(w: &mut W, stub: &Stub, version: TbdVersion) -> io::Result<()> {
    let buckets = build_buckets(stub, version);

    // Blocks appear in first-appearance order of their arch subset, scanning
    // buckets in emission order.
    let mut subsets: Vec<ArchSet> = Vec::new();
    for bucket in &buckets {
        for &(_, set) in &bucket.entries {
            if !subsets.contains(&set) {
                subsets.push(set);
            }
        }
    }

    if subsets.is_empty() {
        return Ok(());
    }

    writeln!(w, "exports:")?;
    for subset in subsets {
        let names: Vec<String> = subset.names().map(str::to_string).collect();
        write_wrapped_list(w, 2, "- archs", &names)?;

        for bucket in &buckets {
            let mut items: Vec<String> = bucket
                .entries
                .iter()
                .filter(|&&(_, set)| set == subset)
                .map(|(value, _)| quoted(value))
                .collect();
            if items.is_empty() {
                continue;
            }
            items.sort();
            write_wrapped_list(w, 4, bucket.key, &items)?;
        }
    }

    Ok(())
}

/// Collects the export buckets in emission order, applying per-dialect
/// spelling: v1/v2 prefix objc entries with `_` and fold exception types
/// into the plain symbol bucket; v1 omits allowable clients entirely.
fn build_buckets(stub: &Stub, version: TbdVersion) -> Vec<Bucket> {
    let prefixed = |set: &ExportSet| -> Vec<(String, ArchSet)> {
        set.iter().map(|(v, s)| (format!("_{v}"), s)).collect()
    };
    let plain = |set: &ExportSet| -> Vec<(String, ArchSet)> {
        set.iter().map(|(v, s)| (v.to_string(), s)).collect()
    };

    let mut buckets = Vec::new();

    if version >= TbdVersion::V2 {
        buckets.push(Bucket {
            key: "allowable-clients",
            entries: plain(&stub.clients),
        });
    }

    buckets.push(Bucket {
        key: "re-exports",
        entries: plain(&stub.reexports),
    });

    let mut symbols = plain(&stub.normal_symbols);
    if version < TbdVersion::V3 {
        // Older dialects have no exception-type bucket; the raw symbol
        // spelling is preserved instead.
        symbols.extend(
            stub.objc_ehtypes
                .iter()
                .map(|(v, s)| (format!("_OBJC_EHTYPE_$_{v}"), s)),
        );
    }
    buckets.push(Bucket {
        key: "symbols",
        entries: symbols,
    });

    buckets.push(Bucket {
        key: "objc-classes",
        entries: if version >= TbdVersion::V3 {
            plain(&stub.objc_classes)
        } else {
            prefixed(&stub.objc_classes)
        },
    });

    if version >= TbdVersion::V3 {
        buckets.push(Bucket {
            key: "objc-eh-types",
            entries: plain(&stub.objc_ehtypes),
        });
    }

    buckets.push(Bucket {
        key: "objc-ivars",
        entries: if version >= TbdVersion::V3 {
            plain(&stub.objc_ivars)
        } else {
            prefixed(&stub.objc_ivars)
        },
    });

    buckets.push(Bucket {
        key: "weak-def-symbols",
        entries: plain(&stub.weak_defined_symbols),
    });

    buckets.push(Bucket {
        key: "thread-local-symbols",
        entries: plain(&stub.thread_local_symbols),
    });

    buckets
}

// =============================================================================
// Rendering Helpers
// =============================================================================

/// Writes `key: [ a, b, ... ]` at the given indent, wrapping at 80 columns.
/// Continuation lines align under the first entry.
fn write_wrapped_list<W: Write>(
    w: &mut W,
    indent: usize,
    key: &str,
    items: &[String],
) -> io::Result<()> {
    write!(w, "{:indent$}{key}: [ ", "")?;
    let content_col = indent + key.len() + 4;
    let mut col = content_col;

    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            if col + 2 + item.len() > LINE_WIDTH {
                write!(w, ",\n{:content_col$}", "")?;
                col = content_col;
            } else {
                write!(w, ", ")?;
                col += 2;
            }
        }
        write!(w, "{item}")?;
        col += item.len();
    }

    writeln!(w, " ]")
}

/// Quotes a string when it contains a character YAML would misread.
fn quoted(value: &str) -> String {
    if !value.is_empty() && !value.contains(QUOTE_TRIGGERS) {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '\\' || ch == '"' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Renders a UUID as uppercase 8-4-4-4-12 groups.
fn format_uuid(uuid: &[u8; 16]) -> String {
    format!(
        "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        uuid[0], uuid[1], uuid[2], uuid[3], uuid[4], uuid[5], uuid[6], uuid[7],
        uuid[8], uuid[9], uuid[10], uuid[11], uuid[12], uuid[13], uuid[14], uuid[15],
    )
}

/// Renders the stored swift ABI value in its source spelling: 2 was parsed
/// from "1.2", larger values are stored off by one.
fn swift_version_string(version: u32) -> String {
    match version {
        1 => "1".to_string(),
        2 => "1.2".to_string(),
        n => (n - 1).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::arch_from_name;
    use crate::tbd::stub::*;

    fn render(stub: &Stub, version: TbdVersion) -> String {
        let mut out = Vec::new();
        write_tbd(&mut out, stub, version).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn basic_stub() -> Stub {
        let x86_64 = arch_from_name("x86_64").unwrap();
        let mut normal_symbols = ExportSet::new();
        normal_symbols.insert("_foo", x86_64);

        Stub {
            archs: ArchSet::single(x86_64),
            platform: Platform::Macosx,
            install_name: "/usr/lib/libfoo.dylib".into(),
            current_version: PackedVersion(0x0001_0000),
            compatibility_version: PackedVersion(0x0001_0000),
            swift_version: 0,
            objc_constraint: None,
            parent_umbrella: None,
            flags: TbdFlags::empty(),
            uuids: vec![(x86_64, [0; 16])],
            reexports: ExportSet::new(),
            clients: ExportSet::new(),
            normal_symbols,
            weak_defined_symbols: ExportSet::new(),
            thread_local_symbols: ExportSet::new(),
            objc_classes: ExportSet::new(),
            objc_ehtypes: ExportSet::new(),
            objc_ivars: ExportSet::new(),
        }
    }

    #[test]
    fn test_v2_minimal_document() {
        let expected = "\
--- !tapi-tbd-v2
archs: [ x86_64 ]
uuids: [ 'x86_64: 00000000-0000-0000-0000-000000000000' ]
platform: macosx
install-name: /usr/lib/libfoo.dylib
current-version: 1
compatibility-version: 1
exports:
  - archs: [ x86_64 ]
    symbols: [ _foo ]
...
";
        assert_eq!(render(&basic_stub(), TbdVersion::V2), expected);
    }

    #[test]
    fn test_v1_omits_uuids_and_allowable_clients() {
        let x86_64 = arch_from_name("x86_64").unwrap();
        let mut stub = basic_stub();
        stub.clients.insert("Client", x86_64);

        let v1 = render(&stub, TbdVersion::V1);
        assert!(v1.starts_with("--- !tapi-tbd-v1\n"));
        assert!(!v1.contains("uuids:"));
        assert!(!v1.contains("allowable-clients"));

        let v2 = render(&stub, TbdVersion::V2);
        assert!(v2.contains("    allowable-clients: [ Client ]\n"));
    }

    #[test]
    fn test_objc_spelling_per_dialect() {
        let x86_64 = arch_from_name("x86_64").unwrap();
        let mut stub = basic_stub();
        stub.objc_classes.insert("Foo", x86_64);
        stub.objc_ehtypes.insert("Foo", x86_64);
        stub.objc_ivars.insert("Foo._bar", x86_64);

        let v2 = render(&stub, TbdVersion::V2);
        assert!(v2.contains("    objc-classes: [ _Foo ]\n"));
        assert!(v2.contains("    objc-ivars: [ _Foo._bar ]\n"));
        // Exception types fold into the symbol bucket with their raw name.
        assert!(v2.contains("_OBJC_EHTYPE_$_Foo"));
        assert!(!v2.contains("objc-eh-types"));

        let v3 = render(&stub, TbdVersion::V3);
        assert!(v3.contains("    objc-classes: [ Foo ]\n"));
        assert!(v3.contains("    objc-eh-types: [ Foo ]\n"));
        assert!(v3.contains("    objc-ivars: [ Foo._bar ]\n"));
    }

    #[test]
    fn test_optional_keys() {
        let mut stub = basic_stub();
        stub.swift_version = 5;
        stub.objc_constraint = Some(ObjcConstraint::RetainRelease);
        stub.parent_umbrella = Some("Foo".into());
        stub.flags = TbdFlags::FLAT_NAMESPACE;

        let out = render(&stub, TbdVersion::V2);
        let positions: Vec<usize> = [
            "archs: [",
            "uuids: [",
            "platform: macosx",
            "flags: [ flat_namespace ]",
            "install-name:",
            "current-version:",
            "compatibility-version:",
            "swift-version: 4",
            "objc-constraint: retain_release",
            "parent-umbrella: Foo",
            "exports:",
        ]
        .iter()
        .map(|key| out.find(key).unwrap_or_else(|| panic!("missing {key}")))
        .collect();

        // Keys appear in the mandated order.
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn test_swift_version_spellings() {
        let mut stub = basic_stub();
        for (stored, spelled) in [(1u32, "swift-version: 1"), (2, "swift-version: 1.2"), (3, "swift-version: 2"), (6, "swift-version: 5")] {
            stub.swift_version = stored;
            assert!(render(&stub, TbdVersion::V2).contains(spelled));
        }
    }

    #[test]
    fn test_group_split_by_arch_subset() {
        let x86_64 = arch_from_name("x86_64").unwrap();
        let arm64 = arch_from_name("arm64").unwrap();

        let mut stub = basic_stub();
        stub.archs.insert(arm64);
        stub.uuids.push((arm64, [1; 16]));
        // _foo is x86_64-only (from basic_stub); _both covers both.
        stub.normal_symbols.insert("_both", x86_64);
        stub.normal_symbols.insert("_both", arm64);

        let out = render(&stub, TbdVersion::V2);
        let first = out.find("  - archs: [ x86_64 ]").expect("x86_64-only block");
        let second = out
            .find("  - archs: [ arm64, x86_64 ]")
            .expect("shared block");
        assert!(first < second);
        assert!(out.contains("archs: [ arm64, x86_64 ]\nuuids:"));
    }

    #[test]
    fn test_entries_sorted_within_group() {
        let x86_64 = arch_from_name("x86_64").unwrap();
        let mut stub = basic_stub();
        stub.normal_symbols.insert("_alpha", x86_64);
        stub.normal_symbols.insert("_Zeta", x86_64);

        let out = render(&stub, TbdVersion::V2);
        assert!(out.contains("    symbols: [ _Zeta, _alpha, _foo ]\n"));
    }

    #[test]
    fn test_line_wrapping_at_80_columns() {
        let x86_64 = arch_from_name("x86_64").unwrap();
        let mut stub = basic_stub();
        for i in 0..24 {
            stub.normal_symbols.insert(&format!("_symbol_number_{i:02}"), x86_64);
        }

        let out = render(&stub, TbdVersion::V2);
        for line in out.lines() {
            assert!(line.len() <= 80, "line exceeds 80 columns: {line:?}");
        }
        // Continuation lines align under the first entry: 4 indent +
        // "symbols" + ": [ " puts the content column at 15.
        let continuation = format!(",\n{:15}_symbol", "");
        assert!(out.contains(&continuation));
    }

    #[test]
    fn test_quoting() {
        let mut stub = basic_stub();
        stub.install_name = "/usr/lib/lib-foo.dylib".into();

        let out = render(&stub, TbdVersion::V2);
        assert!(out.contains("install-name: \"/usr/lib/lib-foo.dylib\"\n"));
    }

    #[test]
    fn test_format_uuid() {
        let uuid: [u8; 16] = [
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D,
            0x0E, 0x0F,
        ];
        assert_eq!(format_uuid(&uuid), "00010203-0405-0607-0809-0A0B0C0D0E0F");
    }

    #[test]
    fn test_deterministic_output() {
        let stub = basic_stub();
        assert_eq!(render(&stub, TbdVersion::V3), render(&stub, TbdVersion::V3));
    }
}
