//! tbdgen - Convert Mach-O dynamic libraries to text-based stubs.
//!
//! This library turns Mach-O dynamic libraries, fat containers, and
//! individual images of a dyld shared cache into tbd (text-based stub)
//! documents: the public ABI surface a linker needs, without the binary.
//!
//! The pipeline has three stages, each usable on its own:
//!
//! 1. [`parse_facts`] classifies a byte [`Source`] and extracts one
//!    [`ImageFacts`] record per contained architecture.
//! 2. [`merge_facts`] folds the records into a single cross-architecture
//!    [`Stub`] model, enforcing the per-library consistency rules.
//! 3. [`write_tbd`] serialises the model as tbd v1, v2 or v3.
//!
//! Keeping the stages separate is what makes platform recovery cheap: when
//! the merge fails with a recoverable platform error, the caller re-runs
//! stage 2 with [`Options::platform`] set, without touching the file again.
//!
//! # Example
//!
//! ```no_run
//! use tbdgen::{convert_source, write_tbd, Options, Source};
//!
//! fn main() -> tbdgen::Result<()> {
//!     let source = Source::open("/usr/lib/libSystem.B.dylib")?;
//!     let options = Options::default();
//!     let stub = convert_source(&source, &options)?;
//!
//!     let mut out = Vec::new();
//!     write_tbd(&mut out, &stub, options.version)?;
//!     print!("{}", String::from_utf8_lossy(&out));
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arch;
pub mod dyld;
pub mod error;
pub mod macho;
pub mod source;
pub mod tbd;
pub mod util;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export main types
pub use arch::ArchSet;
pub use dyld::{DscContext, DscImage};
pub use error::{Error, Result};
pub use macho::{Container, SymbolOptions};
pub use source::Source;
pub use tbd::{write_tbd, ImageFacts, Platform, Stub, TbdFlags, TbdVersion};

use tracing::debug;

/// Options for converting one input.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// The tbd dialect to produce.
    pub version: TbdVersion,
    /// Restricts parsing to these architectures; `None` takes every
    /// architecture the container holds.
    pub archs: Option<ArchSet>,
    /// Replaces the architecture list in the emitted document.
    pub archs_override: Option<ArchSet>,
    /// Platform override; also the recovery input for the recoverable
    /// platform errors.
    pub platform: Option<Platform>,
    /// Extra flags ORed into the output.
    pub flags: TbdFlags,
    /// Keep private plain and thread-local symbols.
    pub allow_private_normal_symbols: bool,
    /// Keep private weakly-defined symbols.
    pub allow_private_weak_symbols: bool,
    /// Keep private objc class symbols.
    pub allow_private_objc_classes: bool,
    /// Keep private objc exception type symbols.
    pub allow_private_objc_ehtypes: bool,
    /// Keep private objc instance variable symbols.
    pub allow_private_objc_ivars: bool,
}

impl Options {
    fn symbol_options(&self) -> SymbolOptions {
        SymbolOptions {
            allow_private_normal_symbols: self.allow_private_normal_symbols,
            allow_private_weak_symbols: self.allow_private_weak_symbols,
            allow_private_objc_classes: self.allow_private_objc_classes,
            allow_private_objc_ehtypes: self.allow_private_objc_ehtypes,
            allow_private_objc_ivars: self.allow_private_objc_ivars,
        }
    }

    fn merge_options(&self) -> tbd::MergeOptions {
        tbd::MergeOptions {
            version: self.version,
            platform_override: self.platform,
            extra_flags: self.flags,
        }
    }
}

/// Extracts per-architecture facts from a thin or fat Mach-O source.
///
/// For a fat container, only architectures admitted by [`Options::archs`]
/// are parsed; selecting none of the contained architectures is an error.
pub fn parse_facts(source: &Source, options: &Options) -> Result<Vec<ImageFacts>> {
    let prefix_len = source.len().min(16) as usize;
    if prefix_len < 4 {
        return Err(Error::NotAMacho);
    }

    match macho::classify(source.read_at(0, prefix_len)?) {
        Container::Fat { is64 } => {
            let slices = macho::fat_slices(source, is64)?;
            debug!(count = slices.len(), "dispatching fat container");

            let mut facts = Vec::new();
            for slice in &slices {
                if let Some(requested) = options.archs {
                    if !requested.contains(slice.arch) {
                        continue;
                    }
                }
                facts.push(macho::parse_image(
                    &slice.source,
                    None,
                    Some(slice.arch),
                    &options.symbol_options(),
                )?);
            }

            if facts.is_empty() {
                return Err(Error::NoProvidedArchitectures);
            }
            Ok(facts)
        }

        Container::Thin { .. } => {
            let facts = macho::parse_image(source, None, None, &options.symbol_options())?;
            if let Some(requested) = options.archs {
                if !requested.contains(facts.arch) {
                    return Err(Error::NoProvidedArchitectures);
                }
            }
            Ok(vec![facts])
        }

        // A shared cache is converted per image, not as one library.
        Container::SharedCache | Container::Unknown => Err(Error::NotAMacho),
    }
}

/// Merges parsed facts into a stub model, applying the architecture
/// override if one was requested.
pub fn merge_facts(facts: &[ImageFacts], options: &Options) -> Result<Stub> {
    let mut stub = tbd::merge(facts, &options.merge_options())?;
    if let Some(archs) = options.archs_override {
        stub.override_archs(archs);
    }
    Ok(stub)
}

/// Runs the full pipeline over one thin or fat source.
pub fn convert_source(source: &Source, options: &Options) -> Result<Stub> {
    let facts = parse_facts(source, options)?;
    merge_facts(&facts, options)
}

/// Converts one image of an opened shared cache.
///
/// The image's symbol and string tables live in the cache's shared
/// mappings, so the whole cache acts as the linkedit source.
pub fn convert_dsc_image(ctx: &DscContext, image: &DscImage, options: &Options) -> Result<Stub> {
    let image_source = ctx.image_source(image)?;
    let facts = macho::parse_image(
        &image_source,
        Some(ctx.source()),
        Some(ctx.arch()),
        &options.symbol_options(),
    )?;

    if let Some(requested) = options.archs {
        if !requested.contains(facts.arch) {
            return Err(Error::NoProvidedArchitectures);
        }
    }

    merge_facts(&[facts], options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::arch_from_name;
    use crate::macho::constants::{N_EXT, N_SECT, PLATFORM_IOS};
    use crate::testutil::{build_dsc, build_fat, ImageBuilder};

    fn render(stub: &Stub, version: TbdVersion) -> String {
        let mut out = Vec::new();
        write_tbd(&mut out, stub, version).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn thin_libfoo(arch: &str, uuid: [u8; 16]) -> ImageBuilder {
        ImageBuilder::new("/usr/lib/libfoo.dylib")
            .arch(arch)
            .uuid(uuid)
            .platform_macos()
            .symbol("_foo", N_SECT | N_EXT, 0)
    }

    #[test]
    fn test_thin_dylib_end_to_end_v2() {
        let uuid: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];
        let source = Source::from_vec(thin_libfoo("x86_64", uuid).build());

        let stub = convert_source(&source, &Options::default()).unwrap();

        let expected = "\
--- !tapi-tbd-v2
archs: [ x86_64 ]
uuids: [ 'x86_64: 00010203-0405-0607-0809-0A0B0C0D0E0F' ]
platform: macosx
install-name: /usr/lib/libfoo.dylib
current-version: 1
compatibility-version: 1
exports:
  - archs: [ x86_64 ]
    symbols: [ _foo ]
...
";
        assert_eq!(render(&stub, TbdVersion::V2), expected);
    }

    #[test]
    fn test_fat_merges_shared_symbol() {
        let data = build_fat(&[
            ("x86_64", thin_libfoo("x86_64", [1; 16]).build()),
            ("arm64", thin_libfoo("arm64", [2; 16]).build()),
        ]);
        let source = Source::from_vec(data);

        let stub = convert_source(&source, &Options::default()).unwrap();
        assert_eq!(stub.archs.len(), 2);

        let out = render(&stub, TbdVersion::V2);
        assert!(out.contains("archs: [ arm64, x86_64 ]"));
        // One export block listing both architectures for _foo.
        assert!(out.contains("  - archs: [ arm64, x86_64 ]\n    symbols: [ _foo ]\n"));
    }

    #[test]
    fn test_fat_install_name_mismatch() {
        let other = ImageBuilder::new("/usr/lib/libbar.dylib")
            .arch("arm64")
            .uuid([2; 16])
            .platform_macos()
            .symbol("_foo", N_SECT | N_EXT, 0);
        let data = build_fat(&[
            ("x86_64", thin_libfoo("x86_64", [1; 16]).build()),
            ("arm64", other.build()),
        ]);

        assert!(matches!(
            convert_source(&Source::from_vec(data), &Options::default()),
            Err(Error::ContradictoryContainerInfo {
                field: "install name"
            })
        ));
    }

    #[test]
    fn test_fat_identical_uuids() {
        let data = build_fat(&[
            ("x86_64", thin_libfoo("x86_64", [7; 16]).build()),
            ("arm64", thin_libfoo("arm64", [7; 16]).build()),
        ]);

        assert!(matches!(
            convert_source(&Source::from_vec(data), &Options::default()),
            Err(Error::UuidNotUnique)
        ));
    }

    #[test]
    fn test_arch_selection() {
        let data = build_fat(&[
            ("x86_64", thin_libfoo("x86_64", [1; 16]).build()),
            ("arm64", thin_libfoo("arm64", [2; 16]).build()),
        ]);
        let source = Source::from_vec(data);
        let arm64 = arch_from_name("arm64").unwrap();

        let stub = convert_source(
            &source,
            &Options {
                archs: Some(ArchSet::single(arm64)),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(stub.archs, ArchSet::single(arm64));

        let ppc = arch_from_name("ppc").unwrap();
        assert!(matches!(
            convert_source(
                &source,
                &Options {
                    archs: Some(ArchSet::single(ppc)),
                    ..Default::default()
                },
            ),
            Err(Error::NoProvidedArchitectures)
        ));
    }

    #[test]
    fn test_archs_override() {
        let source = Source::from_vec(thin_libfoo("x86_64", [1; 16]).build());
        let arm64 = arch_from_name("arm64").unwrap();

        let stub = convert_source(
            &source,
            &Options {
                archs_override: Some(ArchSet::single(arm64)),
                ..Default::default()
            },
        )
        .unwrap();

        let out = render(&stub, TbdVersion::V1);
        assert!(out.contains("archs: [ arm64 ]"));
        assert!(out.contains("  - archs: [ arm64 ]\n    symbols: [ _foo ]\n"));
    }

    #[test]
    fn test_platform_recovery_without_reparse() {
        let data = ImageBuilder::new("/usr/lib/libfoo.dylib")
            .uuid([1; 16])
            .symbol("_foo", N_SECT | N_EXT, 0)
            .build();
        let source = Source::from_vec(data);
        let options = Options::default();

        // Stage 1 succeeds; the merge is what fails.
        let facts = parse_facts(&source, &options).unwrap();
        let err = merge_facts(&facts, &options).unwrap_err();
        assert!(err.is_recoverable());

        // Re-merge with an override, no second parse.
        let stub = merge_facts(
            &facts,
            &Options {
                platform: Some(Platform::Ios),
                ..options
            },
        )
        .unwrap();
        assert_eq!(stub.platform, Platform::Ios);
    }

    #[test]
    fn test_flags_carried_from_header() {
        // No TWOLEVEL, no APP_EXTENSION_SAFE: both flags set.
        let data = thin_libfoo("x86_64", [1; 16]).header_flags(0).build();
        let stub = convert_source(&Source::from_vec(data), &Options::default()).unwrap();
        assert_eq!(
            stub.flags,
            TbdFlags::FLAT_NAMESPACE | TbdFlags::NOT_APP_EXTENSION_SAFE
        );
        assert!(render(&stub, TbdVersion::V2)
            .contains("flags: [ flat_namespace, not_app_extension_safe ]"));
    }

    #[test]
    fn test_dsc_image_end_to_end_v3() {
        let cache = build_dsc(
            "arm64",
            vec![(
                "/usr/lib/libSystem.B.dylib",
                ImageBuilder::new("/usr/lib/libSystem.B.dylib")
                    .arch("arm64")
                    .uuid([3; 16])
                    .build_version(PLATFORM_IOS)
                    .symbol("_open", N_SECT | N_EXT, 0),
            )],
        );
        let ctx = DscContext::from_source(Source::from_vec(cache)).unwrap();
        let image = &ctx.images()[0];

        let stub = convert_dsc_image(
            &ctx,
            image,
            &Options {
                version: TbdVersion::V3,
                ..Default::default()
            },
        )
        .unwrap();

        let out = render(&stub, TbdVersion::V3);
        assert!(out.starts_with("--- !tapi-tbd-v3\narchs: [ arm64 ]\n"));
        assert!(out.contains("platform: ios\n"));
        assert!(out.contains("install-name: /usr/lib/libSystem.B.dylib\n"));
        assert!(out.contains("symbols: [ _open ]"));
    }

    #[test]
    fn test_symbol_buckets_end_to_end() {
        use crate::macho::constants::N_WEAK_DEF;

        // Section ordinal 1 is __thread_vars, so _tls classifies
        // thread-local; _weak carries the weak-def desc bit.
        let data = ImageBuilder::new("/usr/lib/libbuckets.dylib")
            .uuid([4; 16])
            .platform_macos()
            .tlv_section()
            .symbol_in_sect("_tls", N_SECT | N_EXT, 0, 1)
            .symbol("_weak", N_SECT | N_EXT, N_WEAK_DEF)
            .symbol("_OBJC_CLASS_$_Thing", N_SECT | N_EXT, 0)
            .build();

        let stub = convert_source(&Source::from_vec(data), &Options::default()).unwrap();
        let out = render(&stub, TbdVersion::V3);

        assert!(out.contains("    objc-classes: [ Thing ]\n"));
        assert!(out.contains("    weak-def-symbols: [ _weak ]\n"));
        assert!(out.contains("    thread-local-symbols: [ _tls ]\n"));
        assert!(!out.contains("    symbols:"));
    }

    #[test]
    fn test_private_symbols_opt_in() {
        // _hidden is defined but not external; it only survives with the
        // matching allow-private option.
        let data = ImageBuilder::new("/usr/lib/libhidden.dylib")
            .uuid([8; 16])
            .platform_macos()
            .symbol("_visible", N_SECT | N_EXT, 0)
            .symbol("_hidden", N_SECT, 0)
            .build();
        let source = Source::from_vec(data);

        let stub = convert_source(&source, &Options::default()).unwrap();
        assert_eq!(stub.normal_symbols.len(), 1);

        let stub = convert_source(
            &source,
            &Options {
                allow_private_normal_symbols: true,
                ..Default::default()
            },
        )
        .unwrap();
        let names: Vec<_> = stub.normal_symbols.iter().map(|(name, _)| name.to_string()).collect();
        assert_eq!(names, vec!["_visible", "_hidden"]);
    }

    #[test]
    fn test_missing_id_fails_at_merge() {
        let data = ImageBuilder::new("ignored")
            .omit_id()
            .uuid([5; 16])
            .platform_macos()
            .symbol("_foo", N_SECT | N_EXT, 0)
            .build();

        assert!(matches!(
            convert_source(&Source::from_vec(data), &Options::default()),
            Err(Error::EmptyInstallName)
        ));
    }

    #[test]
    fn test_version_rendering_end_to_end() {
        let data = thin_libfoo("x86_64", [6; 16])
            .versions(0x0001_0203, 0x0001_0200)
            .build();

        let stub = convert_source(&Source::from_vec(data), &Options::default()).unwrap();
        let out = render(&stub, TbdVersion::V2);
        assert!(out.contains("current-version: 1.2.3\n"));
        assert!(out.contains("compatibility-version: 1.2\n"));
    }

    #[test]
    fn test_determinism() {
        let data = build_fat(&[
            ("x86_64", thin_libfoo("x86_64", [1; 16]).build()),
            ("arm64", thin_libfoo("arm64", [2; 16]).build()),
        ]);
        let source = Source::from_vec(data);

        let first = convert_source(&source, &Options::default()).unwrap();
        let second = convert_source(&source, &Options::default()).unwrap();
        assert_eq!(render(&first, TbdVersion::V3), render(&second, TbdVersion::V3));
    }

    #[test]
    fn test_truncation_never_panics() {
        // Offset-safety probe: every truncation of a valid image yields a
        // defined error (or, for generous prefixes, a valid parse), never a
        // panic or an out-of-source read.
        let full = thin_libfoo("x86_64", [1; 16]).build();
        for len in 0..full.len() {
            let source = Source::from_vec(full[..len].to_vec());
            let _ = convert_source(&source, &Options::default());
        }
    }
}
