//! Shared test fixtures

use crate::error::LoadError;
use crate::file::{ErrorKind, ErrorType, FileStat, ImageFile, Read, Seek, SeekFrom};
use crate::image::BinaryImage;
use crate::loader::PathSearch;
use crate::memory::{HeapAllocator, ImageAllocator};
use crate::ramfs::RamFile;
use crate::registry::{BinaryFormat, FormatError};
use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ops::Range;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

// =============================================================================
// ALLOCATOR
// =============================================================================

/// Heap allocator that counts live allocations
#[derive(Debug, Default)]
pub(crate) struct CountingAllocator {
    live: AtomicUsize,
    total: AtomicUsize,
    limit: Option<usize>,
}

impl CountingAllocator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail every allocation after the first `limit`
    pub(crate) fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit), ..Self::default() }
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl ImageAllocator for CountingAllocator {
    fn allocate_zeroed(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if self.limit.is_some_and(|limit| self.total() >= limit) {
            return None;
        }
        let ptr = HeapAllocator.allocate_zeroed(size, align)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        Some(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        // SAFETY: forwarded from the caller.
        unsafe { HeapAllocator.free(ptr, size, align) };
    }
}

// =============================================================================
// FORMAT HANDLERS
// =============================================================================

/// What a [`RecordingFormat`] does with each load
#[derive(Debug, Clone)]
pub(crate) enum Behaviour {
    Accept,
    Decline,
    Fail(LoadError),
    /// Accept only this path; fail to open anything else
    AcceptPath(&'static str),
}

/// One `load` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    pub handler: &'static str,
    pub path: String,
}

pub(crate) type Calls = Arc<Mutex<Vec<Call>>>;

/// Handler names, in call order
pub(crate) fn handlers(calls: &Calls) -> Vec<&'static str> {
    calls.lock().iter().map(|c| c.handler).collect()
}

/// Paths, in call order
pub(crate) fn paths(calls: &Calls) -> Vec<String> {
    calls.lock().iter().map(|c| c.path.clone()).collect()
}

/// Handler that records its calls and behaves as scripted
#[derive(Debug)]
pub(crate) struct RecordingFormat {
    name: &'static str,
    behaviour: Behaviour,
    calls: Calls,
}

impl RecordingFormat {
    pub(crate) fn new(name: &'static str, behaviour: Behaviour, calls: &Calls) -> Arc<dyn BinaryFormat> {
        Arc::new(Self { name, behaviour, calls: calls.clone() })
    }
}

impl BinaryFormat for RecordingFormat {
    fn name(&self) -> &str {
        self.name
    }

    fn load(&self, image: &mut BinaryImage) -> Result<(), FormatError> {
        self.calls.lock().push(Call {
            handler: self.name,
            path: String::from(image.path()),
        });

        match &self.behaviour {
            Behaviour::Accept => {}
            Behaviour::Decline => return Err(FormatError::Declined),
            Behaviour::Fail(err) => return Err(FormatError::Failed(err.clone())),
            Behaviour::AcceptPath(path) if image.path() != *path => {
                return Err(FormatError::Failed(LoadError::OpenFailed(ErrorKind::NotFound)));
            }
            Behaviour::AcceptPath(_) => {}
        }

        image.set_entry_point(Some(0x1000));
        Ok(())
    }
}

// =============================================================================
// PATH SEARCH
// =============================================================================

/// Fixed directory list
#[derive(Debug)]
pub(crate) struct FixedSearch {
    dirs: Vec<&'static str>,
}

impl FixedSearch {
    pub(crate) fn new(dirs: &[&'static str]) -> Self {
        Self { dirs: dirs.to_vec() }
    }
}

impl PathSearch for FixedSearch {
    fn candidates<'a>(&'a self, name: &'a str) -> Box<dyn Iterator<Item = String> + 'a> {
        Box::new(self.dirs.iter().map(move |dir| format!("{}/{}", dir, name)))
    }
}

// =============================================================================
// FILES
// =============================================================================

/// File wrapper injecting read failures
#[derive(Debug)]
pub(crate) struct FaultyFile {
    inner: RamFile,
    pos: u64,
    /// Reads starting inside this range fail
    fail: Option<Range<u64>>,
    /// Interrupt every other read
    interrupt: bool,
    interrupted: bool,
    /// Fail `stat` with this kind
    stat_error: Option<ErrorKind>,
}

impl FaultyFile {
    pub(crate) fn new(data: &[u8]) -> Self {
        Self {
            inner: RamFile::from_bytes(data),
            pos: 0,
            fail: None,
            interrupt: false,
            interrupted: false,
            stat_error: None,
        }
    }

    pub(crate) fn failing_at(mut self, range: Range<u64>) -> Self {
        self.fail = Some(range);
        self
    }

    pub(crate) fn interrupting(mut self) -> Self {
        self.interrupt = true;
        self
    }

    pub(crate) fn failing_stat(mut self, kind: ErrorKind) -> Self {
        self.stat_error = Some(kind);
        self
    }
}

impl ErrorType for FaultyFile {
    type Error = ErrorKind;
}

impl Read for FaultyFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
        if self.fail.as_ref().is_some_and(|fail| fail.contains(&self.pos)) {
            return Err(ErrorKind::Other);
        }
        if self.interrupt && !self.interrupted {
            self.interrupted = true;
            return Err(ErrorKind::Interrupted);
        }
        self.interrupted = false;

        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for FaultyFile {
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, ErrorKind> {
        self.pos = self.inner.seek(pos)?;
        Ok(self.pos)
    }
}

impl ImageFile for FaultyFile {
    fn stat(&mut self) -> Result<FileStat, ErrorKind> {
        if let Some(kind) = self.stat_error {
            return Err(kind);
        }
        self.inner.stat()
    }
}
