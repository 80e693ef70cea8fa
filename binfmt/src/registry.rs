//! # Format Registry
//!
//! Ordered set of binary format handlers. Dispatch tries each handler in
//! registration order; the first one to accept the file wins.

use crate::error::{LoadError, LoadResult};
use crate::image::BinaryImage;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::RwLock;

/// Why a handler did not load a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The file is not in this handler's format
    Declined,
    /// The file is in this handler's format but could not be loaded
    Failed(LoadError),
}

impl From<LoadError> for FormatError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::UnsupportedFormat => Self::Declined,
            err => Self::Failed(err),
        }
    }
}

/// A pluggable binary format recognizer and loader
pub trait BinaryFormat: Send + Sync {
    /// Handler name, unique within a registry
    fn name(&self) -> &str;

    /// Load the file at `image.path()` into `image`
    ///
    /// On failure the handler must leave nothing attached to `image`.
    fn load(&self, image: &mut BinaryImage) -> Result<(), FormatError>;

    /// Release what `load` attached to `image`
    fn unload(&self, image: &mut BinaryImage) -> LoadResult<()> {
        image.release();
        Ok(())
    }
}

/// Ordered collection of format handlers
pub struct FormatRegistry {
    handlers: RwLock<Vec<Arc<dyn BinaryFormat>>>,
}

impl FormatRegistry {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Append a handler
    pub fn register(&self, handler: Arc<dyn BinaryFormat>) -> LoadResult<()> {
        let mut handlers = self.handlers.write();
        if handlers.iter().any(|h| h.name() == handler.name()) {
            return Err(LoadError::AlreadyRegistered);
        }
        log::info!("binfmt: registered format handler `{}`", handler.name());
        handlers.push(handler);
        Ok(())
    }

    /// Remove a handler by name
    pub fn unregister(&self, name: &str) -> LoadResult<Arc<dyn BinaryFormat>> {
        let mut handlers = self.handlers.write();
        let index = handlers
            .iter()
            .position(|h| h.name() == name)
            .ok_or(LoadError::NotFound)?;
        log::info!("binfmt: unregistered format handler `{}`", name);
        Ok(handlers.remove(index))
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Is the registry empty?
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Handler names in dispatch order
    pub fn names(&self) -> Vec<String> {
        self.handlers.read().iter().map(|h| String::from(h.name())).collect()
    }

    /// Handlers in dispatch order
    ///
    /// The lock is held only while the list is cloned; handlers stay alive
    /// through their `Arc` even if unregistered meanwhile.
    fn snapshot(&self) -> Vec<Arc<dyn BinaryFormat>> {
        self.handlers.read().clone()
    }

    /// Load `image` with the first handler that accepts it
    pub fn try_load(&self, image: &mut BinaryImage) -> LoadResult<()> {
        log::debug!("binfmt: loading {}", image.path());

        for handler in self.snapshot() {
            match handler.load(image) {
                Ok(()) => {
                    log::info!("binfmt: loaded {} as {}", image.path(), handler.name());
                    image.set_format(handler);
                    image.dump();
                    return Ok(());
                }
                Err(FormatError::Declined) => {
                    log::trace!("binfmt: `{}` declined {}", handler.name(), image.path());
                    image.release();
                }
                Err(FormatError::Failed(err)) => {
                    log::error!("binfmt: `{}` failed to load {}: {}", handler.name(), image.path(), err);
                    image.release();
                    return Err(err);
                }
            }
        }

        log::debug!("binfmt: no handler recognised {}", image.path());
        Err(LoadError::NoMatchingFormat)
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

/// Global format registry
static REGISTRY: FormatRegistry = FormatRegistry::new();

/// Get the global format registry
pub fn registry() -> &'static FormatRegistry {
    &REGISTRY
}

/// Register a handler with the global registry
pub fn register_binfmt(handler: Arc<dyn BinaryFormat>) -> LoadResult<()> {
    registry().register(handler)
}

/// Remove a handler from the global registry
pub fn unregister_binfmt(name: &str) -> LoadResult<Arc<dyn BinaryFormat>> {
    registry().unregister(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{handlers, Behaviour, Calls, RecordingFormat};
    use alloc::vec;

    #[test]
    fn test_first_acceptor_wins() {
        let log = Calls::default();
        let registry = FormatRegistry::new();
        registry.register(RecordingFormat::new("h1", Behaviour::Decline, &log)).unwrap();
        registry.register(RecordingFormat::new("h2", Behaviour::Accept, &log)).unwrap();
        registry.register(RecordingFormat::new("h3", Behaviour::Accept, &log)).unwrap();

        let mut image = BinaryImage::new("/bin/app");
        registry.try_load(&mut image).unwrap();

        assert_eq!(handlers(&log), vec!["h1", "h2"]);
        assert_eq!(image.format_name(), Some("h2"));
    }

    #[test]
    fn test_all_decline() {
        let log = Calls::default();
        let registry = FormatRegistry::new();
        registry.register(RecordingFormat::new("a", Behaviour::Decline, &log)).unwrap();
        registry.register(RecordingFormat::new("b", Behaviour::Decline, &log)).unwrap();

        let mut image = BinaryImage::new("/bin/app");
        assert_eq!(registry.try_load(&mut image), Err(LoadError::NoMatchingFormat));
        assert_eq!(handlers(&log), vec!["a", "b"]);
        assert!(!image.is_loaded());
    }

    #[test]
    fn test_empty_registry() {
        let registry = FormatRegistry::new();
        let mut image = BinaryImage::new("/bin/app");
        assert_eq!(registry.try_load(&mut image), Err(LoadError::NoMatchingFormat));
    }

    #[test]
    fn test_failure_stops_dispatch() {
        let log = Calls::default();
        let registry = FormatRegistry::new();
        registry
            .register(RecordingFormat::new("broken", Behaviour::Fail(LoadError::UnexpectedEndOfFile), &log))
            .unwrap();
        registry.register(RecordingFormat::new("fallback", Behaviour::Accept, &log)).unwrap();

        let mut image = BinaryImage::new("/bin/app");
        assert_eq!(registry.try_load(&mut image), Err(LoadError::UnexpectedEndOfFile));
        assert_eq!(handlers(&log), vec!["broken"]);
    }

    #[test]
    fn test_register_and_unregister() {
        let log = Calls::default();
        let registry = FormatRegistry::new();
        assert!(registry.is_empty());

        registry.register(RecordingFormat::new("a", Behaviour::Accept, &log)).unwrap();
        registry.register(RecordingFormat::new("b", Behaviour::Accept, &log)).unwrap();
        assert_eq!(
            registry.register(RecordingFormat::new("a", Behaviour::Accept, &log)),
            Err(LoadError::AlreadyRegistered)
        );
        assert_eq!(registry.names(), vec!["a", "b"]);

        let removed = registry.unregister("a").unwrap();
        assert_eq!(removed.name(), "a");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.unregister("a").err(), Some(LoadError::NotFound));
    }

    #[test]
    fn test_unsupported_format_converts_to_decline() {
        assert_eq!(FormatError::from(LoadError::UnsupportedFormat), FormatError::Declined);
        assert_eq!(
            FormatError::from(LoadError::NoSections),
            FormatError::Failed(LoadError::NoSections)
        );
    }
}
