//! Dyld shared cache context.
//!
//! Validates the cache header, mapping table and image table once, then
//! hands out per-image [`Source`] slices for the Mach-O parser. The image's
//! load commands carry cache-absolute file offsets for their shared symbol
//! and string tables, so parsing a cache image pairs the image slice with
//! the whole-cache source.

use std::collections::HashSet;
use std::path::Path;

use tracing::debug;
use zerocopy::FromBytes;

use super::structs::*;
use crate::arch::{arch_from_name, arch_name};
use crate::error::{Error, Result};
use crate::source::Source;
use crate::util::{null_terminated_str, range_fits};

/// One dylib recorded in the cache's image table.
#[derive(Debug, Clone)]
pub struct DscImage {
    /// Index in the image table (the basis for 1-based number filters).
    pub index: usize,
    /// Virtual address of the image's Mach-O header.
    pub address: u64,
    /// File offset of the Mach-O header, translated through the mappings.
    pub file_offset: u64,
    /// Image path, e.g. "/usr/lib/libSystem.B.dylib".
    pub path: String,
}

impl DscImage {
    /// Returns the leaf filename of the path.
    pub fn basename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// A validated view of one dyld shared cache file.
#[derive(Debug)]
pub struct DscContext {
    source: Source,
    header: DscHeader,
    arch: usize,
    mappings: Vec<DscMappingInfo>,
    images: Vec<DscImage>,
}

impl DscContext {
    /// Opens and validates a cache file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_source(Source::open(path)?)
    }

    /// Validates a cache already held in a source.
    pub fn from_source(source: Source) -> Result<Self> {
        let header_bytes = source
            .read_at(0, DscHeader::SIZE)
            .map_err(|_| Error::NotASharedCache)?;
        let header = DscHeader::read_from_bytes(header_bytes)
            .map_err(|_| Error::NotASharedCache)?;

        if &header.magic[..DSC_MAGIC.len()] != DSC_MAGIC {
            return Err(Error::NotASharedCache);
        }
        let arch = arch_from_name(header.architecture()).ok_or(Error::NotASharedCache)?;

        let mappings = Self::parse_mappings(&source, &header)?;
        let images = Self::parse_images(&source, &header, &mappings)?;

        debug!(
            arch = arch_name(arch),
            mappings = mappings.len(),
            images = images.len(),
            "opened shared cache"
        );

        Ok(Self {
            source,
            header,
            arch,
            mappings,
            images,
        })
    }

    fn parse_mappings(source: &Source, header: &DscHeader) -> Result<Vec<DscMappingInfo>> {
        if header.mapping_count == 0 || header.mapping_count > DSC_MAPPING_MAX {
            return Err(Error::NotASharedCache);
        }

        let table_len = header.mapping_count as u64 * DscMappingInfo::SIZE as u64;
        if !range_fits(header.mapping_offset as u64, table_len, source.len()) {
            return Err(Error::out_of_range(
                header.mapping_offset as u64,
                table_len,
                source.len(),
            ));
        }
        let table = source.read_at(header.mapping_offset as u64, table_len as usize)?;

        let mut mappings = Vec::with_capacity(header.mapping_count as usize);
        for i in 0..header.mapping_count as usize {
            let mapping = DscMappingInfo::read_from_prefix(&table[i * DscMappingInfo::SIZE..])
                .map_err(|_| Error::NotASharedCache)?
                .0;

            if !range_fits(mapping.file_offset, mapping.size, source.len()) {
                return Err(Error::out_of_range(
                    mapping.file_offset,
                    mapping.size,
                    source.len(),
                ));
            }
            let end = mapping
                .address
                .checked_add(mapping.size)
                .ok_or(Error::NotASharedCache)?;
            if mappings
                .iter()
                .any(|m: &DscMappingInfo| mapping.address < m.address + m.size && m.address < end)
            {
                return Err(Error::NotASharedCache);
            }
            mappings.push(mapping);
        }

        Ok(mappings)
    }

    fn parse_images(
        source: &Source,
        header: &DscHeader,
        mappings: &[DscMappingInfo],
    ) -> Result<Vec<DscImage>> {
        let table_len = header.images_count as u64 * DscImageInfo::SIZE as u64;
        if !range_fits(header.images_offset as u64, table_len, source.len()) {
            return Err(Error::out_of_range(
                header.images_offset as u64,
                table_len,
                source.len(),
            ));
        }
        let table = source.read_at(header.images_offset as u64, table_len as usize)?;

        let mut seen: HashSet<(u64, String)> = HashSet::new();
        let mut images = Vec::with_capacity(header.images_count as usize);

        for index in 0..header.images_count as usize {
            let info = DscImageInfo::read_from_prefix(&table[index * DscImageInfo::SIZE..])
                .map_err(|_| Error::NotASharedCache)?
                .0;

            let path_off = info.path_file_offset as u64;
            if path_off >= source.len() {
                return Err(Error::NotASharedCache);
            }
            let path = null_terminated_str(&source.bytes()[path_off as usize..])
                .ok_or(Error::NotASharedCache)?
                .to_string();

            let file_offset = mappings
                .iter()
                .find(|m| m.contains_addr(info.address))
                .map(|m| m.addr_to_offset(info.address))
                .ok_or(Error::NotASharedCache)?;

            if !seen.insert((info.address, path.clone())) {
                return Err(Error::NotASharedCache);
            }

            images.push(DscImage {
                index,
                address: info.address,
                file_offset,
                path,
            });
        }

        Ok(images)
    }

    /// Returns the cache's architecture registry index.
    #[inline]
    pub fn arch(&self) -> usize {
        self.arch
    }

    /// Returns the cache's architecture name.
    pub fn architecture(&self) -> &'static str {
        arch_name(self.arch)
    }

    /// Returns the cache UUID, if the header carries one.
    pub fn uuid(&self) -> Option<[u8; 16]> {
        self.header.cache_uuid()
    }

    /// Returns all images in table order.
    pub fn images(&self) -> &[DscImage] {
        &self.images
    }

    /// Returns the number of images in the cache.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Translates a virtual address to a file offset through the mappings.
    pub fn addr_to_offset(&self, addr: u64) -> Option<u64> {
        self.mappings
            .iter()
            .find(|m| m.contains_addr(addr))
            .map(|m| m.addr_to_offset(addr))
    }

    /// Returns the whole-cache source (the linkedit source for image
    /// parsing).
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Returns a source rooted at one image's Mach-O header.
    pub fn image_source(&self, image: &DscImage) -> Result<Source> {
        self.source.slice_from(image.file_offset)
    }
}
