//! # Loader Configuration
//!
//! Compile-time defaults selected by Cargo features, and the per-handler
//! [`ElfConfig`] built from them.

cfg_if::cfg_if! {
    if #[cfg(feature = "elf-align-16")] {
        /// Section alignment granularity (log2) selected at build time
        pub const ELF_ALIGN_LOG2: u32 = 4;
    } else if #[cfg(feature = "elf-align-8")] {
        /// Section alignment granularity (log2) selected at build time
        pub const ELF_ALIGN_LOG2: u32 = 3;
    } else {
        /// Section alignment granularity (log2) selected at build time
        pub const ELF_ALIGN_LOG2: u32 = 2;
    }
}

/// Largest supported alignment granularity (one page)
pub const MAX_ALIGN_LOG2: u32 = 12;

/// Default upper bound of a single image allocation (16 MiB)
pub const DEFAULT_MAX_ALLOC: usize = 16 * 1024 * 1024;

/// ELF loading engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfConfig {
    align_log2: u32,
    max_alloc: usize,
}

impl ElfConfig {
    /// Configuration using the build-time defaults
    pub const fn new() -> Self {
        Self {
            align_log2: ELF_ALIGN_LOG2,
            max_alloc: DEFAULT_MAX_ALLOC,
        }
    }

    /// Override the alignment granularity (clamped to [`MAX_ALIGN_LOG2`])
    pub const fn with_align_log2(mut self, log2: u32) -> Self {
        self.align_log2 = if log2 > MAX_ALIGN_LOG2 { MAX_ALIGN_LOG2 } else { log2 };
        self
    }

    /// Override the maximum image allocation
    pub const fn with_max_alloc(mut self, max_alloc: usize) -> Self {
        self.max_alloc = max_alloc;
        self
    }

    /// Alignment granularity in bytes
    pub const fn align(&self) -> usize {
        1 << self.align_log2
    }

    /// Maximum image allocation in bytes
    pub const fn max_alloc(&self) -> usize {
        self.max_alloc
    }

    /// Round `size` up to the alignment granularity
    ///
    /// Returns `None` on overflow.
    pub fn align_up(&self, size: usize) -> Option<usize> {
        let mask = self.align() - 1;
        size.checked_add(mask).map(|v| v & !mask)
    }
}

impl Default for ElfConfig {
    fn default() -> Self {
        Self::new()
    }
}
