//! # Image Memory
//!
//! The allocator seam used for image backing memory, and [`Region`], the
//! owning guard that returns an allocation when dropped.

use crate::config::ELF_ALIGN_LOG2;
use crate::error::{LoadError, LoadResult};
use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::sync::Arc;
use core::fmt;
use core::ptr::NonNull;
use core::slice;

/// Allocator for loaded image memory
pub trait ImageAllocator: Send + Sync {
    /// Allocate `size` zeroed bytes aligned to `align`
    ///
    /// Returns `None` when the request cannot be satisfied.
    fn allocate_zeroed(&self, size: usize, align: usize) -> Option<NonNull<u8>>;

    /// Release an allocation
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate_zeroed` on this allocator with the
    /// same `size` and `align`, and must not be used afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize);
}

/// [`ImageAllocator`] backed by the global kernel heap
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapAllocator;

impl ImageAllocator for HeapAllocator {
    fn allocate_zeroed(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let layout = Layout::from_size_align(size, align).ok()?;
        // SAFETY: layout has a non-zero size.
        NonNull::new(unsafe { alloc_zeroed(layout) })
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        if let Ok(layout) = Layout::from_size_align(size, align) {
            // SAFETY: the caller guarantees ptr was allocated with this layout.
            unsafe { dealloc(ptr.as_ptr(), layout) };
        }
    }
}

/// Default allocator handed to format handlers
pub fn default_allocator() -> Arc<dyn ImageAllocator> {
    Arc::new(HeapAllocator)
}

/// Minimum alignment of every region
pub const REGION_MIN_ALIGN: usize = 1 << ELF_ALIGN_LOG2;

/// Owned, zero-initialised block of image memory
///
/// The block is returned to its allocator when the region is dropped.
pub struct Region {
    ptr: NonNull<u8>,
    len: usize,
    align: usize,
    allocator: Arc<dyn ImageAllocator>,
}

// SAFETY: a Region uniquely owns its block; the allocator is Send + Sync.
unsafe impl Send for Region {}
// SAFETY: shared access only hands out shared slices.
unsafe impl Sync for Region {}

impl Region {
    /// Allocate a zeroed region of `len` bytes
    ///
    /// `len` must be non-zero; an empty request fails with `OutOfMemory`.
    pub fn allocate(allocator: &Arc<dyn ImageAllocator>, len: usize, align: usize) -> LoadResult<Self> {
        let align = align.max(REGION_MIN_ALIGN);
        if len == 0 || !align.is_power_of_two() {
            return Err(LoadError::OutOfMemory);
        }
        let ptr = allocator
            .allocate_zeroed(len, align)
            .ok_or(LoadError::OutOfMemory)?;
        Ok(Self {
            ptr,
            len,
            align,
            allocator: allocator.clone(),
        })
    }

    /// Base address
    pub fn base(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Is the region empty?
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Alignment of the base address
    pub fn align(&self) -> usize {
        self.align
    }

    /// Contents
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len initialised bytes while self lives.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Mutable contents
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for len bytes and uniquely borrowed.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Does `addr` fall inside this region?
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base() && addr - self.base() < self.len
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        log::trace!("binfmt: freeing region {:#x} ({} bytes)", self.base(), self.len);
        // SAFETY: ptr, len and align are exactly what allocate_zeroed returned.
        unsafe { self.allocator.free(self.ptr, self.len, self.align) };
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("base", &format_args!("{:#x}", self.base()))
            .field("len", &self.len)
            .field("align", &self.align)
            .finish()
    }
}
