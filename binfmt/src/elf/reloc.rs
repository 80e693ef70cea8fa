//! Relocation Engine
//!
//! Applies ELF32 relocations to placed sections for the machines the
//! loader binds: i386 and 32-bit ARM.

use super::header::machine;
use crate::error::{LoadError, LoadResult};

// =============================================================================
// RELOCATION TYPES
// =============================================================================

/// i386 relocation types
pub mod r_386 {
    pub const R_386_NONE: u32 = 0;
    pub const R_386_32: u32 = 1;
    pub const R_386_PC32: u32 = 2;
    pub const R_386_PLT32: u32 = 4;
}

/// ARM relocation types
pub mod r_arm {
    pub const R_ARM_NONE: u32 = 0;
    pub const R_ARM_ABS32: u32 = 2;
    pub const R_ARM_REL32: u32 = 3;
    pub const R_ARM_CALL: u32 = 28;
    pub const R_ARM_JUMP24: u32 = 29;
    pub const R_ARM_TARGET1: u32 = 38;
    pub const R_ARM_V4BX: u32 = 40;
}

/// Reach of an ARM B/BL immediate (+/- 32 MiB)
const ARM_BRANCH_RANGE: i128 = 0x0200_0000;

// =============================================================================
// RELOCATION ENGINE
// =============================================================================

/// One resolved relocation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    /// Relocation type
    pub rel_type: u32,
    /// Runtime address of the patched word (P)
    pub place: usize,
    /// Resolved symbol value (S)
    pub symbol: usize,
    /// Explicit addend (`SHT_RELA`); `None` reads it from the patched word
    pub addend: Option<i32>,
}

/// Relocation statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelocationStats {
    /// Entries that patched memory
    pub applied: usize,
    /// Entries that were no-ops
    pub skipped: usize,
}

/// Relocation processing engine for one machine
#[derive(Debug)]
pub struct RelocationEngine {
    machine: u16,
    stats: RelocationStats,
}

impl RelocationEngine {
    /// Create an engine for `machine` (`e_machine`)
    pub fn new(machine: u16) -> Self {
        Self {
            machine,
            stats: RelocationStats::default(),
        }
    }

    /// Statistics so far
    pub fn stats(&self) -> RelocationStats {
        self.stats
    }

    /// Apply `reloc` to the 4-byte word at `word`
    pub fn apply(&mut self, reloc: &Relocation, word: &mut [u8; 4]) -> LoadResult<()> {
        let patched = match self.machine {
            machine::EM_386 => Self::apply_386(reloc, word)?,
            machine::EM_ARM => Self::apply_arm(reloc, word)?,
            _ => return Err(LoadError::UnsupportedRelocation(reloc.rel_type)),
        };

        match patched {
            Some(value) => {
                *word = value.to_le_bytes();
                self.stats.applied += 1;
            }
            None => self.stats.skipped += 1,
        }
        Ok(())
    }

    fn apply_386(reloc: &Relocation, word: &[u8; 4]) -> LoadResult<Option<u32>> {
        let s = reloc.symbol as i128;
        let p = reloc.place as i128;
        let a = Self::addend(reloc, word);

        let value = match reloc.rel_type {
            r_386::R_386_NONE => return Ok(None),
            // S + A
            r_386::R_386_32 => s + a,
            // S + A - P
            r_386::R_386_PC32 | r_386::R_386_PLT32 => s + a - p,
            other => return Err(LoadError::UnsupportedRelocation(other)),
        };

        Self::word32(reloc.rel_type, value).map(Some)
    }

    fn apply_arm(reloc: &Relocation, word: &[u8; 4]) -> LoadResult<Option<u32>> {
        let s = reloc.symbol as i128;
        let p = reloc.place as i128;
        let insn = u32::from_le_bytes(*word);

        let value = match reloc.rel_type {
            r_arm::R_ARM_NONE | r_arm::R_ARM_V4BX => return Ok(None),
            // S + A
            r_arm::R_ARM_ABS32 | r_arm::R_ARM_TARGET1 => s + Self::addend(reloc, word),
            // S + A - P
            r_arm::R_ARM_REL32 => s + Self::addend(reloc, word) - p,
            r_arm::R_ARM_CALL | r_arm::R_ARM_JUMP24 => {
                // Implicit addend is the sign-extended imm24, in words
                let a = match reloc.addend {
                    Some(addend) => i128::from(addend),
                    None => i128::from(((insn << 8) as i32) >> 6),
                };
                let offset = s + a - p;
                if offset & 3 != 0 || offset < -ARM_BRANCH_RANGE || offset >= ARM_BRANCH_RANGE {
                    return Err(LoadError::RelocationOverflow(reloc.rel_type));
                }
                let imm24 = ((offset >> 2) as u32) & 0x00FF_FFFF;
                return Ok(Some((insn & 0xFF00_0000) | imm24));
            }
            other => return Err(LoadError::UnsupportedRelocation(other)),
        };

        Self::word32(reloc.rel_type, value).map(Some)
    }

    fn addend(reloc: &Relocation, word: &[u8; 4]) -> i128 {
        match reloc.addend {
            Some(addend) => i128::from(addend),
            None => i128::from(i32::from_le_bytes(*word)),
        }
    }

    /// Truncate to a 32-bit field, accepting either signed or unsigned range
    fn word32(rel_type: u32, value: i128) -> LoadResult<u32> {
        if value < i128::from(i32::MIN) || value > i128::from(u32::MAX) {
            return Err(LoadError::RelocationOverflow(rel_type));
        }
        Ok(value as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reloc(rel_type: u32, place: usize, symbol: usize, addend: Option<i32>) -> Relocation {
        Relocation { rel_type, place, symbol, addend }
    }

    #[test]
    fn test_386_abs32_uses_implicit_addend() {
        let mut engine = RelocationEngine::new(machine::EM_386);
        let mut word = 8u32.to_le_bytes();
        engine.apply(&reloc(r_386::R_386_32, 0x2000, 0x1000, None), &mut word).unwrap();
        assert_eq!(u32::from_le_bytes(word), 0x1008);
        assert_eq!(engine.stats().applied, 1);
    }

    #[test]
    fn test_386_pc32() {
        let mut engine = RelocationEngine::new(machine::EM_386);
        let mut word = (-4i32).to_le_bytes();
        engine.apply(&reloc(r_386::R_386_PC32, 0x2000, 0x1000, None), &mut word).unwrap();
        assert_eq!(i32::from_le_bytes(word), 0x1000 - 4 - 0x2000);
    }

    #[test]
    fn test_rela_addend_ignores_word() {
        let mut engine = RelocationEngine::new(machine::EM_386);
        let mut word = 0xDEAD_BEEFu32.to_le_bytes();
        engine.apply(&reloc(r_386::R_386_32, 0, 0x1000, Some(0x10)), &mut word).unwrap();
        assert_eq!(u32::from_le_bytes(word), 0x1010);
    }

    #[test]
    fn test_none_is_skipped() {
        let mut engine = RelocationEngine::new(machine::EM_ARM);
        let mut word = 0x1234_5678u32.to_le_bytes();
        engine.apply(&reloc(r_arm::R_ARM_V4BX, 0, 0, None), &mut word).unwrap();
        engine.apply(&reloc(r_arm::R_ARM_NONE, 0, 0, None), &mut word).unwrap();
        assert_eq!(u32::from_le_bytes(word), 0x1234_5678);
        assert_eq!(engine.stats(), RelocationStats { applied: 0, skipped: 2 });
    }

    #[test]
    fn test_arm_call_within_range() {
        let mut engine = RelocationEngine::new(machine::EM_ARM);
        // bl with imm24 = -2 (the usual "PC + 8" bias)
        let mut word = 0xEBFF_FFFEu32.to_le_bytes();
        engine.apply(&reloc(r_arm::R_ARM_CALL, 0x1000, 0x1100, None), &mut word).unwrap();
        // (0x1100 - 8 - 0x1000) / 4 = 0x3E
        assert_eq!(u32::from_le_bytes(word), 0xEB00_003E);
    }

    #[test]
    fn test_arm_branch_out_of_range() {
        let mut engine = RelocationEngine::new(machine::EM_ARM);
        let mut word = 0xEA00_0000u32.to_le_bytes();
        assert_eq!(
            engine.apply(&reloc(r_arm::R_ARM_JUMP24, 0, 0x0400_0000, None), &mut word),
            Err(LoadError::RelocationOverflow(r_arm::R_ARM_JUMP24))
        );
        assert_eq!(u32::from_le_bytes(word), 0xEA00_0000);
    }

    #[test]
    fn test_rel32_overflow() {
        let mut engine = RelocationEngine::new(machine::EM_ARM);
        let mut word = [0u8; 4];
        assert_eq!(
            engine.apply(&reloc(r_arm::R_ARM_REL32, usize::MAX, 0, None), &mut word),
            Err(LoadError::RelocationOverflow(r_arm::R_ARM_REL32))
        );
    }

    #[test]
    fn test_unsupported_types() {
        let mut engine = RelocationEngine::new(machine::EM_386);
        let mut word = [0u8; 4];
        assert_eq!(
            engine.apply(&reloc(8, 0, 0, None), &mut word),
            Err(LoadError::UnsupportedRelocation(8))
        );

        let mut engine = RelocationEngine::new(62);
        assert_eq!(
            engine.apply(&reloc(r_386::R_386_32, 0, 0, None), &mut word),
            Err(LoadError::UnsupportedRelocation(r_386::R_386_32))
        );
    }
}
