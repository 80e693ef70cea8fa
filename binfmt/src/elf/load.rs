//! ELF Loading Engine
//!
//! Drives one load attempt through its states: stat, header, section
//! headers, layout, allocation, population, relocation. Everything the
//! attempt owns lives in [`ElfLoadInfo`] and is released when it is
//! dropped, so an error at any step leaves nothing behind.

use super::header::{shn, sht, str_at, Elf32Ehdr, Elf32Rela, Elf32Shdr, Elf32Sym};
use super::header::{EHDR_SIZE, RELA_SIZE, REL_SIZE, SHDR_SIZE, SYM_SIZE};
use super::reloc::{Relocation, RelocationEngine};
use crate::config::ElfConfig;
use crate::error::{LoadError, LoadResult};
use crate::file::{read_at, ImageFile};
use crate::image::{BinaryImage, LoadedSection, Segment, SegmentFlags};
use crate::memory::{ImageAllocator, Region};
use crate::symtab::SymbolTable;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use embedded_io::Error as _;

/// Progress of a load attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfLoadState {
    /// Nothing done yet
    Init,
    /// File length known
    SizeKnown,
    /// ELF header read and accepted
    HeadersParsed,
    /// Section header table and names loaded
    ShdrsLoaded,
    /// Allocation size computed
    LayoutComputed,
    /// Backing memory allocated
    Allocated,
    /// Section contents copied in
    SectionsPopulated,
    /// Relocations applied
    Relocated,
    /// Results handed to the image
    Ready,
    /// A step failed
    Error,
}

/// Per-format state the ELF handler attaches to a loaded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfImageInfo {
    /// `e_machine`
    pub machine: u16,
    /// `e_type`
    pub elf_type: u16,
    /// Size of the backing allocation
    pub alloc_size: usize,
    /// Relocation entries that patched memory
    pub relocations: usize,
}

/// A loaded symbol table with its string table
struct SymbolSection {
    index: usize,
    entsize: usize,
    data: Vec<u8>,
    strtab: Vec<u8>,
}

impl SymbolSection {
    fn entry(&self, sym: usize) -> Option<Elf32Sym> {
        let start = sym.checked_mul(self.entsize)?;
        let raw = self.data.get(start..start.checked_add(SYM_SIZE)?)?;
        Some(Elf32Sym::parse(raw))
    }
}

/// Working state of one ELF load
pub struct ElfLoadInfo<F> {
    file: F,
    config: ElfConfig,
    state: ElfLoadState,
    filelen: u64,
    ehdr: Elf32Ehdr,
    shdrs: Vec<Elf32Shdr>,
    shstrtab: Vec<u8>,
    alloc_size: usize,
    region: Option<Region>,
    /// Runtime address of each placed section
    runtime: Vec<Option<usize>>,
    relocations: usize,
}

/// Zeroed scratch buffer, failing with `OutOfMemory` instead of aborting
fn scratch(len: usize) -> LoadResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| LoadError::OutOfMemory)?;
    buf.resize(len, 0);
    Ok(buf)
}

impl<F: ImageFile> ElfLoadInfo<F> {
    /// Start a load attempt on an open file
    pub fn new(file: F, config: ElfConfig) -> Self {
        Self {
            file,
            config,
            state: ElfLoadState::Init,
            filelen: 0,
            ehdr: Elf32Ehdr::default(),
            shdrs: Vec::new(),
            shstrtab: Vec::new(),
            alloc_size: 0,
            region: None,
            runtime: Vec::new(),
            relocations: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> ElfLoadState {
        self.state
    }

    /// File length (valid from `SizeKnown`)
    pub fn file_len(&self) -> u64 {
        self.filelen
    }

    /// ELF header (valid from `HeadersParsed`)
    pub fn header(&self) -> &Elf32Ehdr {
        &self.ehdr
    }

    /// Section headers (valid from `ShdrsLoaded`)
    pub fn section_headers(&self) -> &[Elf32Shdr] {
        &self.shdrs
    }

    /// Name of section `index`, empty when unnamed
    pub fn section_name(&self, index: usize) -> &str {
        self.shdrs
            .get(index)
            .and_then(|shdr| str_at(&self.shstrtab, shdr.sh_name as usize))
            .unwrap_or("")
    }

    /// Size of the single backing allocation (valid from `LayoutComputed`)
    pub fn alloc_size(&self) -> usize {
        self.alloc_size
    }

    /// Runtime address of section `index` (valid from `SectionsPopulated`)
    pub fn runtime_address(&self, index: usize) -> Option<usize> {
        self.runtime.get(index).copied().flatten()
    }

    fn expect(&self, state: ElfLoadState) -> LoadResult<()> {
        if self.state == state {
            Ok(())
        } else {
            log::error!("elf: step out of order: in {:?}, expected {:?}", self.state, state);
            Err(LoadError::InvalidArgument)
        }
    }

    /// Run every step and hand the result to `image`
    ///
    /// On failure `image` is left untouched and every buffer and
    /// allocation made by this attempt has been released.
    pub fn load(
        mut self,
        image: &mut BinaryImage,
        allocator: &Arc<dyn ImageAllocator>,
    ) -> LoadResult<ElfImageInfo> {
        let result = self.run(image, allocator);
        if let Err(err) = &result {
            match err {
                LoadError::UnsupportedFormat => {
                    log::trace!("elf: {} is not a loadable ELF32 image", image.path());
                }
                err => log::error!(
                    "elf: failed to load {} after {:?}: {}",
                    image.path(),
                    self.state,
                    err
                ),
            }
            self.state = ElfLoadState::Error;
        }
        result
    }

    fn run(
        &mut self,
        image: &mut BinaryImage,
        allocator: &Arc<dyn ImageAllocator>,
    ) -> LoadResult<ElfImageInfo> {
        self.stat()?;
        self.read_header()?;
        self.load_section_headers()?;
        self.compute_layout()?;
        self.allocate(allocator)?;
        self.populate()?;
        self.relocate(image.exports())?;
        self.finish(image)
    }

    /// Init -> SizeKnown
    pub fn stat(&mut self) -> LoadResult<u64> {
        self.expect(ElfLoadState::Init)?;
        let stat = self
            .file
            .stat()
            .map_err(|e| LoadError::StatFailed(e.kind()))?;
        if !stat.is_regular() {
            log::error!("elf: not a regular file ({:?})", stat.kind);
            return Err(LoadError::NotRegularFile);
        }
        self.filelen = stat.size;
        self.state = ElfLoadState::SizeKnown;
        Ok(stat.size)
    }

    /// SizeKnown -> HeadersParsed
    ///
    /// Files that are too short or not little-endian ELF32 `ET_REL`/`ET_EXEC`
    /// fail with `UnsupportedFormat`, which a handler reports as a decline.
    pub fn read_header(&mut self) -> LoadResult<()> {
        self.expect(ElfLoadState::SizeKnown)?;
        if self.filelen < EHDR_SIZE as u64 {
            return Err(LoadError::UnsupportedFormat);
        }

        let mut raw = [0u8; EHDR_SIZE];
        read_at(&mut self.file, &mut raw, 0)?;
        let ehdr = Elf32Ehdr::parse(&raw);
        if !ehdr.is_supported() {
            return Err(LoadError::UnsupportedFormat);
        }

        self.ehdr = ehdr;
        self.state = ElfLoadState::HeadersParsed;
        Ok(())
    }

    /// HeadersParsed -> ShdrsLoaded
    ///
    /// Bound-checks the table against the file, reads it, and loads the
    /// section name table.
    pub fn load_section_headers(&mut self) -> LoadResult<()> {
        self.expect(ElfLoadState::HeadersParsed)?;

        let shnum = usize::from(self.ehdr.e_shnum);
        if shnum == 0 {
            log::error!("elf: no sections");
            return Err(LoadError::NoSections);
        }
        let entsize = usize::from(self.ehdr.e_shentsize);
        let table_len = entsize * shnum;
        if u64::from(self.ehdr.e_shoff) + table_len as u64 > self.filelen {
            log::error!(
                "elf: section headers at {:#x}+{} beyond end of file ({})",
                self.ehdr.e_shoff,
                table_len,
                self.filelen
            );
            return Err(LoadError::TruncatedFile);
        }
        if entsize < SHDR_SIZE {
            log::error!("elf: section header entry size {} too small", entsize);
            return Err(LoadError::MalformedHeader);
        }

        let mut table = scratch(table_len)?;
        read_at(&mut self.file, &mut table, self.ehdr.e_shoff.into())?;

        let mut shdrs = Vec::new();
        shdrs
            .try_reserve_exact(shnum)
            .map_err(|_| LoadError::OutOfMemory)?;
        shdrs.extend(table.chunks_exact(entsize).map(Elf32Shdr::parse));
        self.shdrs = shdrs;
        self.runtime = vec![None; shnum];

        let shstrndx = usize::from(self.ehdr.e_shstrndx);
        let named = shstrndx != usize::from(shn::SHN_UNDEF)
            && self.shdrs.get(shstrndx).is_some_and(|shdr| !shdr.is_nobits());
        if named {
            self.shstrtab = self.read_section(shstrndx)?;
        } else if shstrndx != usize::from(shn::SHN_UNDEF) {
            log::warn!("elf: section name table {} unusable, sections are unnamed", shstrndx);
        }

        self.state = ElfLoadState::ShdrsLoaded;
        Ok(())
    }

    /// Read the file contents of section `index`
    fn read_section(&mut self, index: usize) -> LoadResult<Vec<u8>> {
        let shdr = *self.shdrs.get(index).ok_or(LoadError::BadSection(index))?;
        if shdr.is_nobits() {
            return Err(LoadError::BadSection(index));
        }
        if u64::from(shdr.sh_offset) + u64::from(shdr.sh_size) > self.filelen {
            log::error!("elf: section {} extends beyond end of file", index);
            return Err(LoadError::TruncatedFile);
        }

        let mut buf = scratch(shdr.sh_size as usize)?;
        read_at(&mut self.file, &mut buf, shdr.sh_offset.into())
            .map_err(|cause| LoadError::SectionReadFailed { index, cause })?;
        Ok(buf)
    }

    /// ShdrsLoaded -> LayoutComputed
    ///
    /// Sums the aligned sizes of every allocatable section.
    pub fn compute_layout(&mut self) -> LoadResult<usize> {
        self.expect(ElfLoadState::ShdrsLoaded)?;

        let mut total: usize = 0;
        for shdr in self.shdrs.iter().filter(|shdr| shdr.is_alloc()) {
            total = self
                .config
                .align_up(shdr.sh_size as usize)
                .and_then(|size| total.checked_add(size))
                .ok_or(LoadError::OutOfMemory)?;
        }

        if total > self.config.max_alloc() {
            log::error!(
                "elf: image needs {} bytes, limit is {}",
                total,
                self.config.max_alloc()
            );
            return Err(LoadError::OutOfMemory);
        }

        log::debug!("elf: allocation size {}", total);
        self.alloc_size = total;
        self.state = ElfLoadState::LayoutComputed;
        Ok(total)
    }

    /// LayoutComputed -> Allocated
    ///
    /// An image with no allocatable bytes gets no backing memory.
    pub fn allocate(&mut self, allocator: &Arc<dyn ImageAllocator>) -> LoadResult<()> {
        self.expect(ElfLoadState::LayoutComputed)?;
        if self.alloc_size > 0 {
            let region = Region::allocate(allocator, self.alloc_size, self.config.align())
                .map_err(|err| {
                    log::error!("elf: cannot allocate {} bytes", self.alloc_size);
                    err
                })?;
            self.region = Some(region);
        }
        self.state = ElfLoadState::Allocated;
        Ok(())
    }

    /// Allocated -> SectionsPopulated
    ///
    /// Places allocatable sections back to back in header order and copies
    /// in their file contents. Returns the final offset, which equals the
    /// allocation size.
    pub fn populate(&mut self) -> LoadResult<usize> {
        self.expect(ElfLoadState::Allocated)?;

        let mut offset = 0usize;
        if let Some(region) = self.region.as_mut() {
            let base = region.base();
            for (index, shdr) in self.shdrs.iter().enumerate() {
                if !shdr.is_alloc() {
                    continue;
                }

                let size = shdr.sh_size as usize;
                let end = offset
                    .checked_add(size)
                    .filter(|&end| end <= region.len())
                    .ok_or(LoadError::BadSection(index))?;

                if !shdr.is_nobits() && size > 0 {
                    let dest = &mut region.as_mut_slice()[offset..end];
                    read_at(&mut self.file, dest, shdr.sh_offset.into()).map_err(|cause| {
                        log::error!("elf: failed to read section {}: {}", index, cause);
                        LoadError::SectionReadFailed { index, cause }
                    })?;
                }

                self.runtime[index] = Some(base + offset);
                log::trace!(
                    "elf: section {} {} at {:#x} ({} bytes)",
                    index,
                    str_at(&self.shstrtab, shdr.sh_name as usize).unwrap_or(""),
                    base + offset,
                    size
                );

                offset = self
                    .config
                    .align_up(size)
                    .and_then(|size| offset.checked_add(size))
                    .ok_or(LoadError::BadSection(index))?;
            }
        }

        self.state = ElfLoadState::SectionsPopulated;
        Ok(offset)
    }

    /// SectionsPopulated -> Relocated
    ///
    /// Applies every `SHT_REL`/`SHT_RELA` section whose target is placed.
    /// Returns the number of entries that patched memory.
    pub fn relocate(&mut self, exports: &SymbolTable) -> LoadResult<usize> {
        self.expect(ElfLoadState::SectionsPopulated)?;

        let mut engine = RelocationEngine::new(self.ehdr.e_machine);
        let mut symbols: Option<SymbolSection> = None;

        for index in 0..self.shdrs.len() {
            let shdr = self.shdrs[index];
            let (explicit, min_entsize) = match shdr.sh_type {
                sht::SHT_REL => (false, REL_SIZE),
                sht::SHT_RELA => (true, RELA_SIZE),
                _ => continue,
            };

            let target = shdr.sh_info as usize;
            let target_shdr = *self.shdrs.get(target).ok_or(LoadError::BadSection(index))?;
            if !target_shdr.is_alloc() {
                log::trace!("elf: skipping relocations for unplaced section {}", target);
                continue;
            }

            let entsize = match shdr.sh_entsize as usize {
                0 => min_entsize,
                n if n >= min_entsize => n,
                _ => return Err(LoadError::BadSection(index)),
            };

            let symtab = shdr.sh_link as usize;
            let symbols = match symbols.take() {
                Some(loaded) if loaded.index == symtab => symbols.insert(loaded),
                _ => symbols.insert(self.load_symbols(symtab)?),
            };

            let entries = self.read_section(index)?;
            let link_base = if self.ehdr.is_relocatable() { 0 } else { target_shdr.sh_addr };

            for (entry, raw) in entries.chunks_exact(entsize).enumerate() {
                let (r_offset, sym, rel_type, addend) = if explicit {
                    let rela = Elf32Rela::parse(raw);
                    (rela.r_offset, rela.sym(), rela.rel_type(), Some(rela.r_addend))
                } else {
                    let rel = Elf32Rela::parse_rel(raw);
                    (rel.r_offset, rel.sym(), rel.rel_type(), None)
                };

                let bad = LoadError::BadRelocation { section: index, entry };
                let offset = r_offset
                    .checked_sub(link_base)
                    .map(|offset| offset as usize)
                    .filter(|&offset| {
                        offset
                            .checked_add(4)
                            .is_some_and(|end| end <= target_shdr.sh_size as usize)
                    })
                    .ok_or_else(|| bad.clone())?;

                let symbol = self.symbol_value(symbols, sym, exports)?;
                let place = self.runtime[target].ok_or_else(|| bad.clone())? + offset;

                let region = self.region.as_mut().ok_or_else(|| bad.clone())?;
                let at = place - region.base();
                let word = <&mut [u8; 4]>::try_from(&mut region.as_mut_slice()[at..at + 4])
                    .map_err(|_| bad)?;

                let reloc = Relocation { rel_type, place, symbol, addend };
                engine.apply(&reloc, word).map_err(|err| {
                    log::error!("elf: relocation {} of section {}: {}", entry, index, err);
                    err
                })?;
            }
        }

        let stats = engine.stats();
        log::debug!("elf: {} relocations applied, {} skipped", stats.applied, stats.skipped);
        self.relocations = stats.applied;
        self.state = ElfLoadState::Relocated;
        Ok(stats.applied)
    }

    /// Load symbol table `index` and its string table
    fn load_symbols(&mut self, index: usize) -> LoadResult<SymbolSection> {
        let shdr = *self.shdrs.get(index).ok_or(LoadError::BadSection(index))?;
        if !matches!(shdr.sh_type, sht::SHT_SYMTAB | sht::SHT_DYNSYM) {
            return Err(LoadError::BadSection(index));
        }
        let entsize = match shdr.sh_entsize as usize {
            0 => SYM_SIZE,
            n if n >= SYM_SIZE => n,
            _ => return Err(LoadError::BadSection(index)),
        };

        let data = self.read_section(index)?;
        let strtab = match shdr.sh_link as usize {
            0 => Vec::new(),
            link => self.read_section(link)?,
        };
        Ok(SymbolSection { index, entsize, data, strtab })
    }

    /// Runtime value of symbol `sym`
    fn symbol_value(&self, symbols: &SymbolSection, sym: usize, exports: &SymbolTable) -> LoadResult<usize> {
        if sym == 0 {
            return Ok(0);
        }
        let symbol = symbols.entry(sym).ok_or(LoadError::BadSymbol(sym))?;

        match symbol.st_shndx {
            shn::SHN_UNDEF => {
                let name = str_at(&symbols.strtab, symbol.st_name as usize)
                    .filter(|name| !name.is_empty())
                    .ok_or(LoadError::BadSymbol(sym))?;
                exports.find(name).ok_or_else(|| {
                    log::error!("elf: undefined symbol `{}`", name);
                    LoadError::UndefinedSymbol(String::from(name))
                })
            }
            shn::SHN_ABS => Ok(symbol.st_value as usize),
            shn::SHN_COMMON => Err(LoadError::BadSymbol(sym)),
            shndx if shndx >= shn::SHN_LORESERVE => Err(LoadError::BadSymbol(sym)),
            shndx => {
                let section = usize::from(shndx);
                let base = self.runtime_address(section).ok_or(LoadError::BadSymbol(sym))?;
                let link = if self.ehdr.is_relocatable() { 0 } else { self.shdrs[section].sh_addr };
                let offset = symbol
                    .st_value
                    .checked_sub(link)
                    .ok_or(LoadError::BadSymbol(sym))?;
                base.checked_add(offset as usize).ok_or(LoadError::BadSymbol(sym))
            }
        }
    }

    /// Runtime entry point, if the image has memory
    fn entry_point(&self) -> LoadResult<Option<usize>> {
        if self.region.is_none() {
            return Ok(None);
        }

        let entry = self.ehdr.e_entry;
        for executable in [true, false] {
            for (index, shdr) in self.shdrs.iter().enumerate() {
                let is_exec = shdr.segment_flags().contains(SegmentFlags::EXECUTE);
                if !shdr.is_alloc() || is_exec != executable || !shdr.contains(entry) {
                    continue;
                }
                if let Some(base) = self.runtime_address(index) {
                    return Ok(Some(base + (entry - shdr.sh_addr) as usize));
                }
            }
        }

        log::error!("elf: entry point {:#x} is not in any loaded section", entry);
        Err(LoadError::BadEntryPoint)
    }

    /// Relocated -> Ready
    ///
    /// Transfers the backing allocation, section placements, entry point
    /// and [`ElfImageInfo`] into `image`.
    pub fn finish(&mut self, image: &mut BinaryImage) -> LoadResult<ElfImageInfo> {
        self.expect(ElfLoadState::Relocated)?;
        let entry = self.entry_point()?;

        let mut flags = SegmentFlags::READ;
        let mut sections = Vec::new();
        for (index, shdr) in self.shdrs.iter().enumerate() {
            let Some(address) = self.runtime_address(index) else {
                continue;
            };
            flags |= shdr.segment_flags();
            sections.push(LoadedSection {
                index,
                name: String::from(self.section_name(index)),
                address,
                size: shdr.sh_size as usize,
                flags: shdr.segment_flags(),
                zero_fill: shdr.is_nobits(),
            });
        }

        let info = ElfImageInfo {
            machine: self.ehdr.e_machine,
            elf_type: self.ehdr.e_type,
            alloc_size: self.alloc_size,
            relocations: self.relocations,
        };

        if let Some(region) = self.region.take() {
            image.push_segment(Segment::new(region, flags));
        }
        for section in sections {
            image.push_section(section);
        }
        image.set_entry_point(entry);
        image.set_state(Box::new(info));

        self.state = ElfLoadState::Ready;
        Ok(info)
    }
}

impl<F> fmt::Debug for ElfLoadInfo<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElfLoadInfo")
            .field("state", &self.state)
            .field("filelen", &self.filelen)
            .field("shnum", &self.shdrs.len())
            .field("alloc_size", &self.alloc_size)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}
