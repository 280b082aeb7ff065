//! Static per-architecture capability tables.
//!
//! Every supported chip is described by one [`ArchSpec`] value: grid
//! dimensions, the die/NoC permutation arrays, which NoC lines carry tensix
//! tiles, where DRAM/ethernet/PCIe/ARC blocks sit, the harvesting axis, and
//! the register map used by the debug engine and the loader.
//!
//! Code never branches on the architecture. It reads the table selected by
//! [`ArchTag`], so a new chip is a new `static`, not a new type.
//!
//! # Wormhole NoC0 layout
//!
//! ```text
//!  y\x  0    1    2    3    4    5    6    7    8    9
//!   0   D    E    E    E    E    D    E    E    E    E
//!   1   D    T    T    T    T    D    T    T    T    T
//!   ..  ..   ..                                    ..
//!   6   D    E    E    E    E    D    E    E    E    E
//!   ..  ..   ..                                    ..
//!  11   D    T    T    T    T    D    T    T    T    T
//! ```

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Architecture identifier as reported by the device driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchTag {
    Grayskull,
    Wormhole,
    Blackhole,
}

impl ArchTag {
    /// Get the capability table for this architecture.
    pub fn spec(&self) -> &'static ArchSpec {
        match self {
            ArchTag::Grayskull => &GRAYSKULL,
            ArchTag::Wormhole => &WORMHOLE,
            ArchTag::Blackhole => &BLACKHOLE,
        }
    }
}

impl FromStr for ArchTag {
    type Err = String;

    /// Accepts driver spellings such as `wormhole_b0` or `BLACKHOLE`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if lower.starts_with("grayskull") {
            Ok(ArchTag::Grayskull)
        } else if lower.starts_with("wormhole") {
            Ok(ArchTag::Wormhole)
        } else if lower.starts_with("blackhole") {
            Ok(ArchTag::Blackhole)
        } else {
            Err(format!("unknown architecture '{}'", s))
        }
    }
}

impl fmt::Display for ArchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.spec().name)
    }
}

/// Which tensix lines harvesting disables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestAxis {
    /// Whole NoC rows are disabled (Grayskull, Wormhole).
    Rows,
    /// Whole NoC columns are disabled (Blackhole).
    Columns,
}

/// A named tile register with its field position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDesc {
    pub name: &'static str,
    pub address: u64,
    pub mask: u32,
    pub shift: u8,
}

impl RegisterDesc {
    const fn word(name: &'static str, address: u64) -> Self {
        Self { name, address, mask: 0xFFFF_FFFF, shift: 0 }
    }

    const fn field(name: &'static str, address: u64, mask: u32, shift: u8) -> Self {
        Self { name, address, mask, shift }
    }

    /// Extract this field from a raw register word.
    pub fn extract(&self, raw: u32) -> u32 {
        (raw & self.mask) >> self.shift
    }

    /// Merge `value` into `raw`, leaving bits outside the field untouched.
    pub fn insert(&self, raw: u32, value: u32) -> u32 {
        (raw & !self.mask) | ((value << self.shift) & self.mask)
    }
}

/// Start-address configuration of one non-brisc core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPcRegister {
    /// Register holding the reset PC.
    pub pc_register: &'static str,
    /// Register whose bit makes the core honor `pc_register`.
    pub override_register: &'static str,
    pub override_bit: u8,
}

/// Debug port and reset control addresses inside a tensix tile.
#[derive(Debug, Clone, Copy)]
pub struct DebugRegisterMap {
    pub control0: u64,
    pub control1: u64,
    pub status0: u64,
    pub status1: u64,
    /// Device-wide soft reset register, one bit per risc.
    pub soft_reset: u64,
    /// Bit position in `soft_reset`, indexed by risc id.
    pub reset_bits: [u8; 5],
    /// Start-address configuration, indexed by risc id. Brisc always boots at 0.
    pub start_pc: [Option<StartPcRegister>; 5],
}

/// Complete description of one chip architecture.
#[derive(Debug, Clone)]
pub struct ArchSpec {
    pub tag: ArchTag,
    pub name: &'static str,
    pub grid_width: u8,
    pub grid_height: u8,
    /// NoC0 x for each die x.
    pub die_to_noc0_x: &'static [u8],
    /// NoC0 y for each die y.
    pub die_to_noc0_y: &'static [u8],
    /// NoC0 columns holding tensix tiles, ascending.
    pub tensix_columns: &'static [u8],
    /// NoC0 rows holding tensix tiles, ascending.
    pub tensix_rows: &'static [u8],
    pub harvest_axis: HarvestAxis,
    /// Translated coordinate of logical tensix (0,0). Lies outside the NoC0 grid.
    pub translated_origin: (u8, u8),
    /// DRAM tiles per channel, subchannel order.
    pub dram_channels: &'static [&'static [(u8, u8)]],
    pub eth: &'static [(u8, u8)],
    pub pcie: &'static [(u8, u8)],
    pub arc: &'static [(u8, u8)],
    pub debug: DebugRegisterMap,
    pub registers: &'static [RegisterDesc],
    /// Core-private address range, reachable only through the debug port.
    pub private_memory: Range<u64>,
}

impl ArchSpec {
    /// NoC lines (rows or columns) that harvesting can disable, ascending.
    pub fn harvest_lines(&self) -> &'static [u8] {
        match self.harvest_axis {
            HarvestAxis::Rows => self.tensix_rows,
            HarvestAxis::Columns => self.tensix_columns,
        }
    }

    /// Number of tensix tiles in one harvestable line.
    pub fn harvest_line_width(&self) -> usize {
        match self.harvest_axis {
            HarvestAxis::Rows => self.tensix_columns.len(),
            HarvestAxis::Columns => self.tensix_rows.len(),
        }
    }

    /// Check if a NoC0 position lies inside the grid.
    pub fn in_grid(&self, x: u8, y: u8) -> bool {
        x < self.grid_width && y < self.grid_height
    }

    /// Look up a tile register by name.
    pub fn register(&self, name: &str) -> Option<&'static RegisterDesc> {
        self.registers.iter().find(|r| r.name == name)
    }

    /// Check whether an address is only reachable through the debug port.
    pub fn is_private_address(&self, address: u64) -> bool {
        self.private_memory.contains(&address)
    }
}

// ============================================================================
// Shared tensix register block
// ============================================================================

pub const RISC_DBG_CNTL_0: u64 = 0xFFB1_2080;
pub const RISC_DBG_CNTL_1: u64 = 0xFFB1_2084;
pub const RISC_DBG_STATUS_0: u64 = 0xFFB1_2088;
pub const RISC_DBG_STATUS_1: u64 = 0xFFB1_208C;
pub const RISC_DBG_SOFT_RESET_0: u64 = 0xFFB1_21B0;
pub const TRISC_RESET_PC_SEC0_PC: u64 = 0xFFB1_2228;
pub const TRISC_RESET_PC_SEC1_PC: u64 = 0xFFB1_222C;
pub const TRISC_RESET_PC_SEC2_PC: u64 = 0xFFB1_2230;
pub const TRISC_RESET_PC_OVERRIDE: u64 = 0xFFB1_2234;
pub const NCRISC_RESET_PC_PC: u64 = 0xFFB1_2238;
pub const NCRISC_RESET_PC_OVERRIDE: u64 = 0xFFB1_223C;

static TENSIX_REGISTERS: [RegisterDesc; 11] = [
    RegisterDesc::word("RISC_DBG_CNTL_0", RISC_DBG_CNTL_0),
    RegisterDesc::word("RISC_DBG_CNTL_1", RISC_DBG_CNTL_1),
    RegisterDesc::word("RISC_DBG_STATUS_0", RISC_DBG_STATUS_0),
    RegisterDesc::word("RISC_DBG_STATUS_1", RISC_DBG_STATUS_1),
    RegisterDesc::field("RISC_DBG_SOFT_RESET_0", RISC_DBG_SOFT_RESET_0, 0x0004_7800, 11),
    RegisterDesc::word("TRISC_RESET_PC_SEC0_PC", TRISC_RESET_PC_SEC0_PC),
    RegisterDesc::word("TRISC_RESET_PC_SEC1_PC", TRISC_RESET_PC_SEC1_PC),
    RegisterDesc::word("TRISC_RESET_PC_SEC2_PC", TRISC_RESET_PC_SEC2_PC),
    RegisterDesc::field("TRISC_RESET_PC_OVERRIDE", TRISC_RESET_PC_OVERRIDE, 0x7, 0),
    RegisterDesc::word("NCRISC_RESET_PC_PC", NCRISC_RESET_PC_PC),
    RegisterDesc::field("NCRISC_RESET_PC_OVERRIDE", NCRISC_RESET_PC_OVERRIDE, 0x1, 0),
];

const TENSIX_DEBUG: DebugRegisterMap = DebugRegisterMap {
    control0: RISC_DBG_CNTL_0,
    control1: RISC_DBG_CNTL_1,
    status0: RISC_DBG_STATUS_0,
    status1: RISC_DBG_STATUS_1,
    soft_reset: RISC_DBG_SOFT_RESET_0,
    reset_bits: [11, 12, 13, 14, 18],
    start_pc: [
        None,
        Some(StartPcRegister {
            pc_register: "TRISC_RESET_PC_SEC0_PC",
            override_register: "TRISC_RESET_PC_OVERRIDE",
            override_bit: 0,
        }),
        Some(StartPcRegister {
            pc_register: "TRISC_RESET_PC_SEC1_PC",
            override_register: "TRISC_RESET_PC_OVERRIDE",
            override_bit: 1,
        }),
        Some(StartPcRegister {
            pc_register: "TRISC_RESET_PC_SEC2_PC",
            override_register: "TRISC_RESET_PC_OVERRIDE",
            override_bit: 2,
        }),
        Some(StartPcRegister {
            pc_register: "NCRISC_RESET_PC_PC",
            override_register: "NCRISC_RESET_PC_OVERRIDE",
            override_bit: 0,
        }),
    ],
};

const PRIVATE_MEMORY: Range<u64> = 0xFFB0_0000..0xFFB1_0000;

// ============================================================================
// Grayskull
// ============================================================================

pub static GRAYSKULL: ArchSpec = ArchSpec {
    tag: ArchTag::Grayskull,
    name: "Grayskull",
    grid_width: 13,
    grid_height: 12,
    die_to_noc0_x: &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12],
    die_to_noc0_y: &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
    tensix_columns: &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12],
    tensix_rows: &[1, 2, 3, 4, 5, 7, 8, 9, 10, 11],
    harvest_axis: HarvestAxis::Rows,
    translated_origin: (18, 18),
    dram_channels: &[
        &[(1, 0)],
        &[(1, 6)],
        &[(4, 0)],
        &[(4, 6)],
        &[(7, 0)],
        &[(7, 6)],
        &[(10, 0)],
        &[(10, 6)],
    ],
    eth: &[],
    pcie: &[(0, 4)],
    arc: &[(0, 2)],
    debug: TENSIX_DEBUG,
    registers: &TENSIX_REGISTERS,
    private_memory: PRIVATE_MEMORY,
};

// ============================================================================
// Wormhole
// ============================================================================

pub static WORMHOLE: ArchSpec = ArchSpec {
    tag: ArchTag::Wormhole,
    name: "Wormhole",
    grid_width: 10,
    grid_height: 12,
    die_to_noc0_x: &[0, 9, 1, 8, 2, 7, 3, 6, 4, 5],
    die_to_noc0_y: &[0, 11, 1, 10, 2, 9, 3, 8, 4, 7, 5, 6],
    tensix_columns: &[1, 2, 3, 4, 6, 7, 8, 9],
    tensix_rows: &[1, 2, 3, 4, 5, 7, 8, 9, 10, 11],
    harvest_axis: HarvestAxis::Rows,
    translated_origin: (18, 18),
    dram_channels: &[
        &[(0, 0), (0, 1), (0, 11)],
        &[(0, 5), (0, 6), (0, 7)],
        &[(5, 0), (5, 1), (5, 11)],
        &[(5, 2), (5, 9), (5, 10)],
        &[(5, 3), (5, 4), (5, 8)],
        &[(5, 5), (5, 6), (5, 7)],
    ],
    eth: &[
        (9, 0), (1, 0), (8, 0), (2, 0), (7, 0), (3, 0), (6, 0), (4, 0),
        (9, 6), (1, 6), (8, 6), (2, 6), (7, 6), (3, 6), (6, 6), (4, 6),
    ],
    pcie: &[(0, 3)],
    arc: &[(0, 10)],
    debug: TENSIX_DEBUG,
    registers: &TENSIX_REGISTERS,
    private_memory: PRIVATE_MEMORY,
};

// ============================================================================
// Blackhole
// ============================================================================

pub static BLACKHOLE: ArchSpec = ArchSpec {
    tag: ArchTag::Blackhole,
    name: "Blackhole",
    grid_width: 17,
    grid_height: 12,
    die_to_noc0_x: &[0, 1, 16, 2, 15, 3, 14, 4, 13, 5, 12, 6, 11, 7, 10, 8, 9],
    die_to_noc0_y: &[0, 1, 11, 2, 10, 3, 9, 4, 8, 5, 7, 6],
    tensix_columns: &[1, 2, 3, 4, 5, 6, 7, 10, 11, 12, 13, 14, 15, 16],
    tensix_rows: &[2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
    harvest_axis: HarvestAxis::Columns,
    translated_origin: (18, 18),
    dram_channels: &[
        &[(0, 0), (0, 1), (0, 11)],
        &[(0, 2), (0, 10), (0, 3)],
        &[(0, 9), (0, 4), (0, 8)],
        &[(0, 5), (0, 7), (0, 6)],
        &[(9, 11), (9, 1), (9, 0)],
        &[(9, 3), (9, 10), (9, 2)],
        &[(9, 8), (9, 4), (9, 9)],
        &[(9, 6), (9, 7), (9, 5)],
    ],
    eth: &[
        (1, 1), (16, 1), (2, 1), (15, 1), (3, 1), (14, 1), (4, 1),
        (13, 1), (5, 1), (12, 1), (6, 1), (11, 1), (7, 1), (10, 1),
    ],
    pcie: &[(2, 0), (11, 0)],
    arc: &[(8, 0)],
    debug: TENSIX_DEBUG,
    registers: &TENSIX_REGISTERS,
    private_memory: PRIVATE_MEMORY,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ALL: [&ArchSpec; 3] = [&GRAYSKULL, &WORMHOLE, &BLACKHOLE];

    fn is_permutation(values: &[u8], len: u8) -> bool {
        let set: HashSet<u8> = values.iter().copied().collect();
        values.len() == len as usize && set.len() == values.len() && values.iter().all(|&v| v < len)
    }

    #[test]
    fn test_die_maps_are_permutations() {
        for arch in ALL {
            assert!(is_permutation(arch.die_to_noc0_x, arch.grid_width), "{} x", arch.name);
            assert!(is_permutation(arch.die_to_noc0_y, arch.grid_height), "{} y", arch.name);
        }
    }

    #[test]
    fn test_blocks_do_not_overlap() {
        for arch in ALL {
            let mut seen = HashSet::new();
            for &x in arch.tensix_columns {
                for &y in arch.tensix_rows {
                    assert!(seen.insert((x, y)));
                }
            }
            let others = arch
                .dram_channels
                .iter()
                .flat_map(|ch| ch.iter())
                .chain(arch.eth)
                .chain(arch.pcie)
                .chain(arch.arc);
            for &(x, y) in others {
                assert!(arch.in_grid(x, y), "{} ({},{}) outside grid", arch.name, x, y);
                assert!(seen.insert((x, y)), "{} ({},{}) listed twice", arch.name, x, y);
            }
        }
    }

    #[test]
    fn test_translated_origin_outside_grid() {
        for arch in ALL {
            let (ox, oy) = arch.translated_origin;
            assert!(ox >= arch.grid_width || oy >= arch.grid_height);
        }
    }

    #[test]
    fn test_arch_tag_parsing() {
        assert_eq!("wormhole_b0".parse::<ArchTag>().unwrap(), ArchTag::Wormhole);
        assert_eq!("BLACKHOLE".parse::<ArchTag>().unwrap(), ArchTag::Blackhole);
        assert_eq!("grayskull".parse::<ArchTag>().unwrap(), ArchTag::Grayskull);
        assert!("quasar".parse::<ArchTag>().is_err());
    }

    #[test]
    fn test_register_field_insert_extract() {
        let reg = WORMHOLE.register("TRISC_RESET_PC_OVERRIDE").unwrap();
        assert_eq!(reg.insert(0xFFFF_FFF0, 0b101), 0xFFFF_FFF5);
        assert_eq!(reg.extract(0xFFFF_FFF5), 0b101);
        assert!(WORMHOLE.register("NO_SUCH_REGISTER").is_none());
    }

    #[test]
    fn test_start_pc_registers_resolve() {
        for arch in ALL {
            assert!(arch.debug.start_pc[0].is_none());
            for entry in arch.debug.start_pc.iter().flatten() {
                assert!(arch.register(entry.pc_register).is_some());
                assert!(arch.register(entry.override_register).is_some());
            }
        }
    }
}
