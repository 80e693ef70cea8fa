//! # Helix Binary Loader
//!
//! Turns a path into a loaded program image:
//!
//! - Path resolution for relative program names
//! - Format dispatch over a registry of pluggable handlers
//! - ELF32 loading: section layout, a single backing allocation,
//!   population from the file, symbol binding and relocation
//! - Unloading through the handler that loaded the image
//!
//! ## Load Pipeline
//!
//! 1. [`load_module`] validates the request and resolves candidate paths
//! 2. [`FormatRegistry::try_load`] offers each candidate to the handlers
//! 3. The accepting handler fills in the [`BinaryImage`]
//! 4. [`unload_module`] releases it again
//!
//! ## Example
//!
//! ```ignore
//! let fs = Arc::new(RamFs::new());
//! fs.add_file("/bin/hello", image_bytes);
//! register_binfmt(Arc::new(ElfFormat::new(fs)))?;
//!
//! let mut image = BinaryImage::new("/bin/hello");
//! load_module(&mut image)?;
//! let entry = image.entry_point();
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod file;
pub mod image;
pub mod loader;
pub mod memory;
pub mod ramfs;
pub mod registry;
pub mod symtab;

#[cfg(feature = "elf")]
pub mod elf;
#[cfg(feature = "exepath")]
pub mod exepath;

#[cfg(test)]
mod testing;

pub use config::ElfConfig;
pub use error::{LoadError, LoadResult};
pub use file::{read_at, FileKind, FileStat, FileSystem, ImageFile};
pub use image::{BinaryImage, LoadedSection, Segment, SegmentFlags};
pub use loader::{load_module, set_path_search, unload_module, ModuleLoader, PathSearch};
pub use memory::{default_allocator, HeapAllocator, ImageAllocator, Region};
pub use ramfs::{RamFile, RamFs};
pub use registry::{register_binfmt, registry, unregister_binfmt, BinaryFormat, FormatError, FormatRegistry};
pub use symtab::SymbolTable;

#[cfg(feature = "elf")]
pub use elf::{load_elf, ElfFormat, ElfImageInfo};
#[cfg(feature = "exepath")]
pub use exepath::ExePath;
