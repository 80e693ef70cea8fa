//! # ELF Format Handler
//!
//! Loads little-endian ELF32 relocatable objects and executables into a
//! single contiguous allocation, binding them against the image's exports.

pub mod header;
pub mod load;
pub mod reloc;


pub use load::{ElfImageInfo, ElfLoadInfo, ElfLoadState};

use crate::config::ElfConfig;
use crate::error::{LoadError, LoadResult};
use crate::file::{FileSystem, ImageFile};
use crate::image::BinaryImage;
use crate::memory::{default_allocator, ImageAllocator};
use crate::registry::{BinaryFormat, FormatError};
use alloc::sync::Arc;
use core::fmt;

/// Load an ELF image from an already open file
pub fn load_elf<F: ImageFile>(
    file: F,
    image: &mut BinaryImage,
    allocator: &Arc<dyn ImageAllocator>,
    config: ElfConfig,
) -> LoadResult<ElfImageInfo> {
    ElfLoadInfo::new(file, config).load(image, allocator)
}

/// ELF [`BinaryFormat`] reading images from a file system
pub struct ElfFormat<FS> {
    fs: FS,
    allocator: Arc<dyn ImageAllocator>,
    config: ElfConfig,
}

impl<FS: FileSystem> ElfFormat<FS> {
    /// Handler name
    pub const NAME: &'static str = "elf";

    /// Handler opening files through `fs`, using the heap allocator
    pub fn new(fs: FS) -> Self {
        Self {
            fs,
            allocator: default_allocator(),
            config: ElfConfig::new(),
        }
    }

    /// Use `allocator` for image memory
    pub fn with_allocator(mut self, allocator: Arc<dyn ImageAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Use `config` instead of the build-time defaults
    pub fn with_config(mut self, config: ElfConfig) -> Self {
        self.config = config;
        self
    }

    /// Current configuration
    pub fn config(&self) -> ElfConfig {
        self.config
    }
}

impl<FS: FileSystem> BinaryFormat for ElfFormat<FS> {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn load(&self, image: &mut BinaryImage) -> Result<(), FormatError> {
        let file = self.fs.open(image.path()).map_err(|kind| {
            log::debug!("elf: cannot open {}: {:?}", image.path(), kind);
            LoadError::OpenFailed(kind)
        })?;
        load_elf(file, image, &self.allocator, self.config)?;
        Ok(())
    }
}

impl<FS> fmt::Debug for ElfFormat<FS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElfFormat")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
