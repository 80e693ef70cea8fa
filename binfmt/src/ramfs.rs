//! # RAM File System
//!
//! A minimal in-memory [`FileSystem`] for boot images and tests. Files are
//! immutable byte blobs shared between every open handle.

use crate::file::{ErrorKind, ErrorType, FileKind, FileStat, FileSystem, ImageFile, Read, Seek, SeekFrom};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::RwLock;

/// File system node
#[derive(Debug, Clone)]
enum RamNode {
    File(Arc<[u8]>),
    Directory,
}

/// In-memory file system keyed by absolute path
#[derive(Debug)]
pub struct RamFs {
    nodes: RwLock<BTreeMap<String, RamNode>>,
}

impl RamFs {
    /// Create an empty file system
    pub const fn new() -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add (or replace) a file
    pub fn add_file(&self, path: &str, data: impl Into<Arc<[u8]>>) {
        self.nodes.write().insert(String::from(path), RamNode::File(data.into()));
    }

    /// Add a directory node
    pub fn add_directory(&self, path: &str) {
        self.nodes.write().insert(String::from(path), RamNode::Directory);
    }

    /// Remove a node, returning whether it existed
    pub fn remove(&self, path: &str) -> bool {
        self.nodes.write().remove(path).is_some()
    }

    /// Does `path` exist?
    pub fn exists(&self, path: &str) -> bool {
        self.nodes.read().contains_key(path)
    }

    /// All node paths, sorted
    pub fn paths(&self) -> Vec<String> {
        self.nodes.read().keys().cloned().collect()
    }
}

impl Default for RamFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for RamFs {
    type File = RamFile;

    fn open(&self, path: &str) -> Result<RamFile, ErrorKind> {
        let node = self.nodes.read().get(path).cloned().ok_or(ErrorKind::NotFound)?;
        Ok(match node {
            RamNode::File(data) => RamFile { data: Some(data), pos: 0 },
            RamNode::Directory => RamFile { data: None, pos: 0 },
        })
    }
}

/// Open handle on a [`RamFs`] node
#[derive(Debug, Clone)]
pub struct RamFile {
    /// `None` for directories
    data: Option<Arc<[u8]>>,
    pos: u64,
}

impl RamFile {
    /// Open handle over an anonymous blob
    pub fn from_bytes(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: Some(data.into()), pos: 0 }
    }
}

impl ErrorType for RamFile {
    type Error = ErrorKind;
}

impl Read for RamFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
        let data = self.data.as_ref().ok_or(ErrorKind::InvalidInput)?;
        let start = usize::try_from(self.pos).unwrap_or(usize::MAX).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for RamFile {
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, ErrorKind> {
        let len = self.data.as_ref().map_or(0, |d| d.len() as u64);
        let new = match pos {
            SeekFrom::Start(off) => Some(off),
            SeekFrom::End(delta) => len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        self.pos = new.ok_or(ErrorKind::InvalidInput)?;
        Ok(self.pos)
    }
}

impl ImageFile for RamFile {
    fn stat(&mut self) -> Result<FileStat, ErrorKind> {
        Ok(match &self.data {
            Some(data) => FileStat { kind: FileKind::Regular, size: data.len() as u64 },
            None => FileStat { kind: FileKind::Directory, size: 0 },
        })
    }
}
