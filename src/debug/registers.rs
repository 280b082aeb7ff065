//! Debug port encoding: trigger words, internal indices, command bits,
//! status decoding and GPR naming.

use std::fmt;
use std::str::FromStr;

use super::DebugError;

// ============================================================================
// Trigger protocol
// ============================================================================

/// CONTROL0 opcode for a trigger read.
pub const READ_OP: u32 = 0x8000_0000;
/// CONTROL0 opcode for a trigger write.
pub const WRITE_OP: u32 = 0x8001_0000;
/// Shift of the risc selector inside a trigger word.
pub const RISC_SHIFT: u32 = 17;
/// STATUS0 bit set once STATUS1 holds the result of a trigger read.
pub const READ_VALID: u32 = 1 << 30;

/// Internal indices reached through the trigger protocol.
pub mod index {
    pub const STATUS: u32 = 0;
    pub const COMMAND: u32 = 1;
    pub const COMMAND_ARG_0: u32 = 2;
    pub const COMMAND_ARG_1: u32 = 3;
    pub const COMMAND_RETURN_VALUE: u32 = 4;
    pub const WATCHPOINT_SETTINGS: u32 = 5;
    pub const WATCHPOINT_0: u32 = 6;
}

/// COMMAND register values.
pub mod command {
    pub const DEBUG_MODE: u32 = 0x8000_0000;
    pub const HALT: u32 = 0x1;
    pub const STEP: u32 = 0x2;
    pub const CONTINUE: u32 = 0x4;
    pub const READ_REGISTER: u32 = 0x8;
    pub const WRITE_REGISTER: u32 = 0x10;
    pub const READ_MEMORY: u32 = 0x20;
    pub const WRITE_MEMORY: u32 = 0x40;
    pub const FLUSH_REGISTERS: u32 = 0x80;
    pub const FLUSH: u32 = 0x100;
}

/// Number of hardware watchpoint slots per core.
pub const WATCHPOINT_COUNT: u8 = 8;

/// Build a CONTROL0 trigger word.
pub fn trigger_word(op: u32, risc_id: u8, index: u32) -> u32 {
    op | ((risc_id as u32) << RISC_SHIFT) | index
}

// ============================================================================
// Status
// ============================================================================

/// Decoded STATUS register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RiscStatus {
    pub halted: bool,
    pub pc_watchpoint_hit: bool,
    pub memory_watchpoint_hit: bool,
    pub ebreak_hit: bool,
    /// Per-slot hit flags, slot 0 first.
    pub watchpoints_hit: [bool; 8],
}

impl RiscStatus {
    pub fn from_bits(bits: u32) -> Self {
        let mut watchpoints_hit = [false; 8];
        for (i, hit) in watchpoints_hit.iter_mut().enumerate() {
            *hit = bits & (1 << (4 + i)) != 0;
        }
        Self {
            halted: bits & 0x1 != 0,
            pc_watchpoint_hit: bits & 0x2 != 0,
            memory_watchpoint_hit: bits & 0x4 != 0,
            ebreak_hit: bits & 0x8 != 0,
            watchpoints_hit,
        }
    }

    pub fn to_bits(&self) -> u32 {
        let mut bits = self.halted as u32
            | (self.pc_watchpoint_hit as u32) << 1
            | (self.memory_watchpoint_hit as u32) << 2
            | (self.ebreak_hit as u32) << 3;
        for (i, &hit) in self.watchpoints_hit.iter().enumerate() {
            bits |= (hit as u32) << (4 + i);
        }
        bits
    }
}

impl fmt::Display for RiscStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", if self.halted { "halted" } else { "running" })?;
        if self.ebreak_hit {
            write!(f, ", ebreak")?;
        }
        if self.pc_watchpoint_hit {
            write!(f, ", pc watchpoint")?;
        }
        if self.memory_watchpoint_hit {
            write!(f, ", memory watchpoint")?;
        }
        let hits: Vec<String> = self
            .watchpoints_hit
            .iter()
            .enumerate()
            .filter(|(_, &hit)| hit)
            .map(|(i, _)| i.to_string())
            .collect();
        if !hits.is_empty() {
            write!(f, " [{}]", hits.join(","))?;
        }
        Ok(())
    }
}

// ============================================================================
// General purpose registers
// ============================================================================

/// ABI names by register index; index 32 is the program counter.
pub const GPR_NAMES: [&str; 33] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0 / fp", "s1", "a0", "a1", "a2", "a3",
    "a4", "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3",
    "t4", "t5", "t6", "pc",
];

/// A register addressable through the debug port: x0..x31 or the PC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GprIndex(u8);

impl GprIndex {
    pub const PC: GprIndex = GprIndex(32);

    pub fn new(index: u32) -> Result<Self, DebugError> {
        if index <= 32 {
            Ok(GprIndex(index as u8))
        } else {
            Err(DebugError::InvalidRegister(index.to_string()))
        }
    }

    /// Look up an ABI name. Case-insensitive substring match; the first
    /// register whose name contains `name` wins.
    pub fn from_name(name: &str) -> Option<Self> {
        let needle = name.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return None;
        }
        GPR_NAMES
            .iter()
            .position(|n| n.contains(&needle))
            .map(|i| GprIndex(i as u8))
    }

    pub fn index(&self) -> u32 {
        self.0 as u32
    }

    pub fn name(&self) -> &'static str {
        GPR_NAMES[self.0 as usize]
    }
}

impl FromStr for GprIndex {
    type Err = DebugError;

    /// Accepts `5`, `x5` or an ABI name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if let Ok(index) = text.parse::<u32>() {
            return GprIndex::new(index);
        }
        if let Some(digits) = text.strip_prefix(['x', 'X']) {
            if let Ok(index) = digits.parse::<u32>() {
                if index < 32 {
                    return GprIndex::new(index);
                }
            }
        }
        GprIndex::from_name(text).ok_or_else(|| DebugError::InvalidRegister(s.to_string()))
    }
}

impl fmt::Display for GprIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_word() {
        assert_eq!(trigger_word(WRITE_OP, 0, index::COMMAND), 0x8001_0001);
        assert_eq!(trigger_word(READ_OP, 4, index::STATUS), 0x8008_0000);
        assert_eq!(trigger_word(WRITE_OP, 2, index::WATCHPOINT_0 + 7), 0x8005_000D);
    }

    #[test]
    fn test_status_decoding() {
        let s = RiscStatus::from_bits(0b1_0000_1001);
        assert!(s.halted);
        assert!(s.ebreak_hit);
        assert!(!s.pc_watchpoint_hit);
        assert!(s.watchpoints_hit[4]);
        assert_eq!(s.to_bits(), 0b1_0000_1001);
        assert_eq!(s.to_string(), "halted, ebreak [4]");
    }

    #[test]
    fn test_gpr_numeric() {
        assert_eq!("32".parse::<GprIndex>().unwrap(), GprIndex::PC);
        assert_eq!("x10".parse::<GprIndex>().unwrap().index(), 10);
        assert!("33".parse::<GprIndex>().is_err());
        assert!(GprIndex::new(40).is_err());
    }

    #[test]
    fn test_gpr_abi_names() {
        assert_eq!("PC".parse::<GprIndex>().unwrap(), GprIndex::PC);
        assert_eq!("sp".parse::<GprIndex>().unwrap().index(), 2);
        assert_eq!("fp".parse::<GprIndex>().unwrap().index(), 8);
        assert_eq!("s0".parse::<GprIndex>().unwrap().index(), 8);
        // Substring match: "s1" hits s1 before s10/s11.
        assert_eq!("s1".parse::<GprIndex>().unwrap().index(), 9);
        assert_eq!("s11".parse::<GprIndex>().unwrap().index(), 27);
        assert_eq!("A0".parse::<GprIndex>().unwrap().index(), 10);
        assert!("q7".parse::<GprIndex>().is_err());
        assert_eq!(GprIndex::PC.name(), "pc");
    }
}
