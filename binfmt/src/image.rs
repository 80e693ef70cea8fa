//! # Binary Image
//!
//! The record a load request travels in: created by the caller, filled in
//! by the format handler that accepts the file, and handed back populated.

use crate::memory::Region;
use crate::registry::BinaryFormat;
use crate::symtab::SymbolTable;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::any::Any;
use core::fmt;

bitflags! {
    /// Segment access permissions
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SegmentFlags: u32 {
        /// Readable
        const READ = 1 << 0;
        /// Writable
        const WRITE = 1 << 1;
        /// Executable
        const EXECUTE = 1 << 2;
    }
}

/// A block of memory owned by a loaded image
#[derive(Debug)]
pub struct Segment {
    region: Region,
    flags: SegmentFlags,
}

impl Segment {
    /// Wrap an allocated region
    pub fn new(region: Region, flags: SegmentFlags) -> Self {
        Self { region, flags }
    }

    /// Base address
    pub fn base(&self) -> usize {
        self.region.base()
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.region.len()
    }

    /// Is the segment empty?
    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    /// Access permissions
    pub fn flags(&self) -> SegmentFlags {
        self.flags
    }

    /// Contents
    pub fn as_slice(&self) -> &[u8] {
        self.region.as_slice()
    }

    /// Does `addr` fall inside this segment?
    pub fn contains(&self, addr: usize) -> bool {
        self.region.contains(addr)
    }
}

/// Placement of one section inside the image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSection {
    /// Section header index
    pub index: usize,
    /// Section name (empty when the image has no name table)
    pub name: String,
    /// Runtime address
    pub address: usize,
    /// Size in bytes
    pub size: usize,
    /// Access permissions requested by the section
    pub flags: SegmentFlags,
    /// Zero-filled storage with no file contents
    pub zero_fill: bool,
}

/// A binary being loaded, or loaded
pub struct BinaryImage {
    /// Name exactly as the caller supplied it
    filename: String,
    /// Absolute path of the file currently being tried or loaded
    path: Option<String>,
    /// Symbols the image may bind against
    exports: Arc<SymbolTable>,
    /// Runtime entry point
    entry: Option<usize>,
    /// Owned memory
    segments: Vec<Segment>,
    /// Where each allocatable section landed
    sections: Vec<LoadedSection>,
    /// Handler that loaded the image
    format: Option<Arc<dyn BinaryFormat>>,
    /// Per-format state
    state: Option<Box<dyn Any + Send + Sync>>,
}

impl BinaryImage {
    /// Create a load request for `filename`
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            path: None,
            exports: Arc::new(SymbolTable::new()),
            entry: None,
            segments: Vec::new(),
            sections: Vec::new(),
            format: None,
            state: None,
        }
    }

    /// Bind the image against `exports`
    pub fn with_exports(mut self, exports: Arc<SymbolTable>) -> Self {
        self.exports = exports;
        self
    }

    /// Name as supplied by the caller
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Absolute path handlers should open
    ///
    /// Falls back to the filename when no candidate path is set.
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.filename)
    }

    pub(crate) fn set_path(&mut self, path: Option<String>) {
        self.path = path;
    }

    /// Exported symbols
    pub fn exports(&self) -> &SymbolTable {
        &self.exports
    }

    /// Runtime entry point, if the image has one
    pub fn entry_point(&self) -> Option<usize> {
        self.entry
    }

    /// Record the entry point
    pub fn set_entry_point(&mut self, entry: Option<usize>) {
        self.entry = entry;
    }

    /// Owned memory segments
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Transfer a segment to the image
    pub fn push_segment(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    /// Section placements
    pub fn sections(&self) -> &[LoadedSection] {
        &self.sections
    }

    /// Record a section placement
    pub fn push_section(&mut self, section: LoadedSection) {
        self.sections.push(section);
    }

    /// Find a section placement by name
    pub fn section(&self, name: &str) -> Option<&LoadedSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Per-format state, if it is a `T`
    pub fn state<T: Any>(&self) -> Option<&T> {
        self.state.as_ref()?.downcast_ref()
    }

    /// Attach per-format state
    pub fn set_state(&mut self, state: Box<dyn Any + Send + Sync>) {
        self.state = Some(state);
    }

    /// Name of the handler that loaded the image
    pub fn format_name(&self) -> Option<&str> {
        self.format.as_ref().map(|f| f.name())
    }

    /// Has a handler loaded this image?
    pub fn is_loaded(&self) -> bool {
        self.format.is_some()
    }

    pub(crate) fn set_format(&mut self, format: Arc<dyn BinaryFormat>) {
        self.format = Some(format);
    }

    pub(crate) fn take_format(&mut self) -> Option<Arc<dyn BinaryFormat>> {
        self.format.take()
    }

    /// Drop everything a handler attached, freeing owned memory
    pub fn release(&mut self) {
        self.entry = None;
        self.segments.clear();
        self.sections.clear();
        self.state = None;
    }

    /// Log the image layout at debug level
    pub fn dump(&self) {
        log::debug!("Module:");
        log::debug!("  filename:  {}", self.filename);
        log::debug!("  path:      {}", self.path());
        log::debug!("  format:    {}", self.format_name().unwrap_or("-"));
        match self.entry {
            Some(entry) => log::debug!("  entry:     {:#x}", entry),
            None => log::debug!("  entry:     none"),
        }
        log::debug!("  exports:   {}", self.exports.len());
        for segment in &self.segments {
            log::debug!(
                "  segment:   {:#x}..{:#x} {:?}",
                segment.base(),
                segment.base() + segment.len(),
                segment.flags()
            );
        }
        for section in &self.sections {
            log::debug!(
                "  section {}: {:#x} {:>6} {}",
                section.index,
                section.address,
                section.size,
                section.name
            );
        }
    }
}

impl fmt::Debug for BinaryImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryImage")
            .field("filename", &self.filename)
            .field("path", &self.path)
            .field("entry", &self.entry)
            .field("segments", &self.segments)
            .field("sections", &self.sections)
            .field("format", &self.format_name())
            .finish_non_exhaustive()
    }
}
