//! Merging per-architecture image facts into one stub model.
//!
//! The merge is seeded from the first facts record; every later record must
//! agree on the per-library scalars, contributes its own UUID, and ORs its
//! architecture bit into the export sets. List entries keep first-appearance
//! order across architectures, which makes the writer deterministic.

use crate::arch::ArchSet;
use crate::error::{Error, Result};
use crate::tbd::stub::*;

/// Options controlling a merge.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Target dialect; decides whether UUIDs are required and whether the
    /// zippered platform pair is representable.
    pub version: TbdVersion,
    /// Caller-supplied platform, overriding whatever the images recorded.
    /// This is the recovery path for the platform error kinds.
    pub platform_override: Option<Platform>,
    /// Extra flags ORed into the result.
    pub extra_flags: TbdFlags,
}

/// Merges one or more per-architecture facts records into a [`Stub`].
pub fn merge(facts: &[ImageFacts], options: &MergeOptions) -> Result<Stub> {
    let mut merger = Merger::default();
    for record in facts {
        merger.add(record)?;
    }
    merger.finish(options)
}

#[derive(Default)]
struct Merger {
    archs: ArchSet,
    id: Option<DylibId>,
    parent_umbrella: Option<String>,
    flags: Option<TbdFlags>,
    objc: Option<(u32, ObjcConstraint)>,
    platforms: Vec<Platform>,
    uuids: Vec<(usize, [u8; 16])>,
    reexports: ExportSet,
    clients: ExportSet,
    normal_symbols: ExportSet,
    weak_defined_symbols: ExportSet,
    thread_local_symbols: ExportSet,
    objc_classes: ExportSet,
    objc_ehtypes: ExportSet,
    objc_ivars: ExportSet,
}

impl Merger {
    fn add(&mut self, facts: &ImageFacts) -> Result<()> {
        let arch = facts.arch;
        self.archs.insert(arch);

        if let Some(id) = &facts.id {
            match &self.id {
                None => self.id = Some(id.clone()),
                Some(existing) => {
                    if existing.install_name != id.install_name {
                        return Err(Error::ContradictoryContainerInfo {
                            field: "install name",
                        });
                    }
                    if existing.current_version != id.current_version {
                        return Err(Error::ContradictoryContainerInfo {
                            field: "current version",
                        });
                    }
                    if existing.compatibility_version != id.compatibility_version {
                        return Err(Error::ContradictoryContainerInfo {
                            field: "compatibility version",
                        });
                    }
                }
            }
        }

        if let Some(umbrella) = &facts.parent_umbrella {
            match &self.parent_umbrella {
                None => self.parent_umbrella = Some(umbrella.clone()),
                Some(existing) if existing != umbrella => {
                    return Err(Error::ContradictoryContainerInfo {
                        field: "parent umbrella",
                    });
                }
                Some(_) => {}
            }
        }

        match self.flags {
            None => self.flags = Some(facts.flags),
            Some(existing) if existing != facts.flags => {
                return Err(Error::ContradictoryContainerInfo { field: "flags" });
            }
            Some(_) => {}
        }

        if let Some(constraint) = facts.objc_constraint {
            match self.objc {
                None => self.objc = Some((facts.swift_version, constraint)),
                Some((swift, _)) if swift != facts.swift_version => {
                    return Err(Error::ContradictoryContainerInfo {
                        field: "swift version",
                    });
                }
                Some((_, existing)) if existing != constraint => {
                    return Err(Error::ContradictoryContainerInfo {
                        field: "objc constraint",
                    });
                }
                Some(_) => {}
            }
        }

        if let Some(uuid) = facts.uuid {
            for &(other_arch, other_uuid) in &self.uuids {
                if other_arch == arch {
                    if other_uuid != uuid {
                        return Err(Error::ContradictoryContainerInfo { field: "uuid" });
                    }
                } else if other_uuid == uuid {
                    return Err(Error::UuidNotUnique);
                }
            }
            if !self.uuids.iter().any(|&(a, _)| a == arch) {
                self.uuids.push((arch, uuid));
            }
        }

        for platform in &facts.platforms {
            if !self.platforms.contains(platform) {
                self.platforms.push(*platform);
            }
        }

        for name in &facts.reexports {
            self.reexports.insert(name, arch);
        }
        for name in &facts.clients {
            self.clients.insert(name, arch);
        }

        for symbol in &facts.symbols {
            let set = match symbol.kind {
                SymbolKind::Normal => &mut self.normal_symbols,
                SymbolKind::WeakDefined => &mut self.weak_defined_symbols,
                SymbolKind::ThreadLocal => &mut self.thread_local_symbols,
                SymbolKind::ObjcClass | SymbolKind::ObjcMetaclass => &mut self.objc_classes,
                SymbolKind::ObjcEhtype => &mut self.objc_ehtypes,
                SymbolKind::ObjcIvar => &mut self.objc_ivars,
            };
            set.insert(&symbol.name, arch);
        }

        Ok(())
    }

    fn finish(mut self, options: &MergeOptions) -> Result<Stub> {
        if self.archs.is_empty() {
            return Err(Error::NoProvidedArchitectures);
        }

        let id = self.id.ok_or(Error::EmptyInstallName)?;
        let platform = resolve_platform(&self.platforms, options)?;

        if options.version >= TbdVersion::V2 && self.uuids.len() != self.archs.len() {
            return Err(Error::HasNoUuid);
        }
        self.uuids.sort_by_key(|&(arch, _)| arch);

        let has_exports = !self.reexports.is_empty()
            || !self.normal_symbols.is_empty()
            || !self.weak_defined_symbols.is_empty()
            || !self.thread_local_symbols.is_empty()
            || !self.objc_classes.is_empty()
            || !self.objc_ehtypes.is_empty()
            || !self.objc_ivars.is_empty();
        if !has_exports {
            return Err(Error::NoSymbolsOrReexports);
        }

        let (swift_version, objc_constraint) = match self.objc {
            Some((swift, constraint)) => (swift, Some(constraint)),
            None => (0, None),
        };

        Ok(Stub {
            archs: self.archs,
            platform,
            install_name: id.install_name,
            current_version: id.current_version,
            compatibility_version: id.compatibility_version,
            swift_version,
            objc_constraint,
            parent_umbrella: self.parent_umbrella,
            flags: self.flags.unwrap_or_default() | options.extra_flags,
            uuids: self.uuids,
            reexports: self.reexports,
            clients: self.clients,
            normal_symbols: self.normal_symbols,
            weak_defined_symbols: self.weak_defined_symbols,
            thread_local_symbols: self.thread_local_symbols,
            objc_classes: self.objc_classes,
            objc_ehtypes: self.objc_ehtypes,
            objc_ivars: self.objc_ivars,
        })
    }
}

/// Resolves the collected platforms to a single value.
///
/// The macosx + iosmac pair merges to `zippered` when the dialect can
/// express it; any other disagreement is the recoverable multiple-platforms
/// error.
fn resolve_platform(platforms: &[Platform], options: &MergeOptions) -> Result<Platform> {
    if let Some(platform) = options.platform_override {
        return Ok(platform);
    }

    match platforms {
        [] => Err(Error::PlatformNotFound),
        [single] => Ok(*single),
        [a, b] if is_zippered_pair(*a, *b) => {
            if options.version == TbdVersion::V3 {
                Ok(Platform::Zippered)
            } else {
                Err(Error::MultiplePlatforms {
                    first: a.name(),
                    second: b.name(),
                })
            }
        }
        [a, b, ..] => Err(Error::MultiplePlatforms {
            first: a.name(),
            second: b.name(),
        }),
    }
}

fn is_zippered_pair(a: Platform, b: Platform) -> bool {
    matches!(
        (a, b),
        (Platform::Macosx, Platform::Iosmac) | (Platform::Iosmac, Platform::Macosx)
    )
}
