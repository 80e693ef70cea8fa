//! # Module Loader
//!
//! Public entry points: resolve the caller's file name to candidate paths,
//! dispatch each candidate through the format registry, and unload images.

use crate::error::{LoadError, LoadResult};
use crate::image::BinaryImage;
use crate::registry::{registry, FormatRegistry};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use spin::RwLock;

/// Produces absolute candidate paths for a relative program name
pub trait PathSearch: Send + Sync {
    /// Candidates for `name`, in the order they should be tried
    fn candidates<'a>(&'a self, name: &'a str) -> Box<dyn Iterator<Item = String> + 'a>;
}

/// Process-wide path search used by [`load_module`]
static PATH_SEARCH: RwLock<Option<Arc<dyn PathSearch>>> = RwLock::new(None);

/// Install (or clear) the process-wide path search
pub fn set_path_search(search: Option<Arc<dyn PathSearch>>) {
    *PATH_SEARCH.write() = search;
}

/// The process-wide path search, if one is installed
pub fn path_search() -> Option<Arc<dyn PathSearch>> {
    PATH_SEARCH.read().clone()
}

/// Loads images through a format registry
pub struct ModuleLoader<'r> {
    registry: &'r FormatRegistry,
    search: Option<Arc<dyn PathSearch>>,
}

impl<'r> ModuleLoader<'r> {
    /// Loader dispatching through `registry`, without path search
    pub fn new(registry: &'r FormatRegistry) -> Self {
        Self { registry, search: None }
    }

    /// Resolve relative names with `search`
    pub fn with_path_search(mut self, search: Arc<dyn PathSearch>) -> Self {
        self.search = Some(search);
        self
    }

    /// Load `image`, leaving it populated on success
    ///
    /// Relative names are tried against every candidate of the path search
    /// until one loads. `image.filename()` is never modified.
    pub fn load(&self, image: &mut BinaryImage) -> LoadResult<()> {
        if image.filename().is_empty() || image.is_loaded() {
            return Err(LoadError::InvalidArgument);
        }

        let result = if image.filename().starts_with('/') {
            image.set_path(None);
            self.registry.try_load(image)
        } else {
            self.load_relative(image)
        };

        if let Err(err) = &result {
            log::debug!("binfmt: {} failed, errno {}", image.filename(), err.errno());
            image.set_path(None);
        }
        result
    }

    fn load_relative(&self, image: &mut BinaryImage) -> LoadResult<()> {
        let Some(search) = &self.search else {
            log::debug!("binfmt: no path search for relative name {}", image.filename());
            return Err(LoadError::NotFound);
        };

        let name = String::from(image.filename());
        for candidate in search.candidates(&name) {
            image.set_path(Some(candidate));
            match self.registry.try_load(image) {
                Ok(()) => return Ok(()),
                Err(err) => log::debug!("binfmt: candidate {} failed: {}", image.path(), err),
            }
        }

        Err(LoadError::NotFound)
    }

    /// Release everything the loading handler attached to `image`
    pub fn unload(&self, image: &mut BinaryImage) -> LoadResult<()> {
        let format = image.take_format().ok_or(LoadError::InvalidArgument)?;
        log::debug!("binfmt: unloading {} ({})", image.filename(), format.name());
        format.unload(image)
    }
}

impl core::fmt::Debug for ModuleLoader<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("registry", self.registry)
            .field("path_search", &self.search.is_some())
            .finish()
    }
}

/// Load `image` using the global registry and path search
pub fn load_module(image: &mut BinaryImage) -> LoadResult<()> {
    let mut loader = ModuleLoader::new(registry());
    if let Some(search) = path_search() {
        loader = loader.with_path_search(search);
    }
    loader.load(image)
}

/// Unload an image loaded by [`load_module`]
pub fn unload_module(image: &mut BinaryImage) -> LoadResult<()> {
    ModuleLoader::new(registry()).unload(image)
}
