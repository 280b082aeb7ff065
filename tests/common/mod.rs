//! Simulated chip for integration tests.
//!
//! [`SimChip`] implements [`NativeBinding`] for a single unharvested (or
//! harvested) Wormhole. It models what the debugger relies on:
//!
//! - sparse byte memory per tile, plus per-core private memory
//! - the debug port: CONTROL1 latch, trigger executed on the CONTROL0
//!   zero pulse, STATUS0 read-valid bit, STATUS1 result
//! - the soft reset register, with start addresses taken from the
//!   configuration registers on release
//! - a handful of RV32I instructions (lui, addi, sw, lw, jal, ebreak)
//!   plus PC and memory watchpoints
//!
//! Running cores advance a few instructions at the start of every binding
//! call, which is enough to make halts, breakpoints and stores observable.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ttlens::arch::{
    ArchSpec, NCRISC_RESET_PC_OVERRIDE, NCRISC_RESET_PC_PC, TRISC_RESET_PC_OVERRIDE,
    TRISC_RESET_PC_SEC0_PC, TRISC_RESET_PC_SEC1_PC, TRISC_RESET_PC_SEC2_PC, WORMHOLE,
};
use ttlens::comm::{CommError, DirectCommunicator, NativeBinding};
use ttlens::debug::registers::{command, index, READ_VALID};
use ttlens::debug::DebugConfig;
use ttlens::device::{ARC_TEST_MSG, ARC_TEST_TAG};
use ttlens::Context;

/// Instructions each running core executes per binding call.
const TICK: usize = 16;

/// Reset values of the start-address registers of trisc0..2 and ncrisc.
pub const DEFAULT_START: [u32; 4] = [0x6000, 0xA000, 0xE000, 0x12000];

pub const EBREAK: u32 = 0x0010_0073;

pub fn lui(rd: u32, imm20: u32) -> u32 {
    (imm20 << 12) | (rd << 7) | 0x37
}

pub fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    (((imm as u32) & 0xFFF) << 20) | (rs1 << 15) | (rd << 7) | 0x13
}

pub fn sw(rs2: u32, rs1: u32, imm: i32) -> u32 {
    let imm = imm as u32 & 0xFFF;
    ((imm >> 5) << 25) | (rs2 << 20) | (rs1 << 15) | (0b010 << 12) | ((imm & 0x1F) << 7) | 0x23
}

pub fn lw(rd: u32, rs1: u32, imm: i32) -> u32 {
    (((imm as u32) & 0xFFF) << 20) | (rs1 << 15) | (0b010 << 12) | (rd << 7) | 0x03
}

pub fn jal(offset: i64) -> u32 {
    ttlens::loader::jal_instruction(offset).unwrap()
}

pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

// ============================================================================
// Core model
// ============================================================================

#[derive(Debug, Default, Clone)]
struct Core {
    pc: u32,
    regs: [u32; 32],
    halted: bool,
    pc_watchpoint_hit: bool,
    memory_watchpoint_hit: bool,
    ebreak_hit: bool,
    watchpoints_hit: u8,
    args: [u32; 2],
    ret: u32,
    watchpoint_settings: u32,
    watchpoints: [u32; 8],
    /// Skip the PC watchpoint check for the first instruction after resume.
    resuming: bool,
    private: HashMap<u64, u8>,
}

impl Core {
    fn status_bits(&self) -> u32 {
        self.halted as u32
            | (self.pc_watchpoint_hit as u32) << 1
            | (self.memory_watchpoint_hit as u32) << 2
            | (self.ebreak_hit as u32) << 3
            | (self.watchpoints_hit as u32) << 4
    }

    fn clear_hits(&mut self) {
        self.pc_watchpoint_hit = false;
        self.memory_watchpoint_hit = false;
        self.ebreak_hit = false;
        self.watchpoints_hit = 0;
    }

    /// Watchpoint slots matching `addr` whose kind is accepted by `kinds`.
    fn matching_slots(&self, addr: u32, kinds: &[u32]) -> u8 {
        let mut hits = 0u8;
        for slot in 0..8 {
            let nibble = (self.watchpoint_settings >> (4 * slot)) & 0xF;
            if nibble & 1 != 0 && kinds.contains(&((nibble >> 1) & 0x3)) && self.watchpoints[slot] == addr
            {
                hits |= 1 << slot;
            }
        }
        hits
    }
}

#[derive(Debug, Default)]
struct Tile {
    memory: HashMap<u64, u8>,
    soft_reset: u32,
    control1: u32,
    pending: u32,
    status0: u32,
    status1: u32,
    cores: [Core; 5],
}

fn read_bytes(mem: &HashMap<u64, u8>, addr: u64, len: usize) -> Vec<u8> {
    (0..len as u64).map(|i| mem.get(&(addr + i)).copied().unwrap_or(0)).collect()
}

fn write_bytes(mem: &mut HashMap<u64, u8>, addr: u64, data: &[u8]) {
    for (i, b) in data.iter().enumerate() {
        mem.insert(addr + i as u64, *b);
    }
}

fn read_word(mem: &HashMap<u64, u8>, addr: u64) -> u32 {
    let b = read_bytes(mem, addr, 4);
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn sext(value: u32, bits: u32) -> u32 {
    let shift = 32 - bits;
    (((value << shift) as i32) >> shift) as u32
}

impl Tile {
    fn new(arch: &ArchSpec) -> Self {
        let mut tile = Tile {
            soft_reset: arch
                .debug
                .reset_bits
                .iter()
                .fold(0, |acc, bit| acc | (1 << bit)),
            ..Tile::default()
        };
        for (addr, value) in [
            (TRISC_RESET_PC_SEC0_PC, DEFAULT_START[0]),
            (TRISC_RESET_PC_SEC1_PC, DEFAULT_START[1]),
            (TRISC_RESET_PC_SEC2_PC, DEFAULT_START[2]),
            (NCRISC_RESET_PC_PC, DEFAULT_START[3]),
        ] {
            write_bytes(&mut tile.memory, addr, &value.to_le_bytes());
        }
        tile
    }

    fn is_private(addr: u64) -> bool {
        WORMHOLE.is_private_address(addr)
    }

    fn core_read(&self, risc: usize, addr: u64) -> u32 {
        if Tile::is_private(addr) {
            read_word(&self.cores[risc].private, addr)
        } else {
            read_word(&self.memory, addr)
        }
    }

    fn core_write(&mut self, risc: usize, addr: u64, value: u32) {
        if Tile::is_private(addr) {
            write_bytes(&mut self.cores[risc].private, addr, &value.to_le_bytes());
        } else {
            write_bytes(&mut self.memory, addr, &value.to_le_bytes());
        }
    }

    fn in_reset(&self, risc: usize) -> bool {
        self.soft_reset & (1 << WORMHOLE.debug.reset_bits[risc]) != 0
    }

    fn start_pc(&self, risc: usize) -> u32 {
        let (pc_reg, override_reg, bit) = match risc {
            0 => return 0,
            1 => (TRISC_RESET_PC_SEC0_PC, TRISC_RESET_PC_OVERRIDE, 0),
            2 => (TRISC_RESET_PC_SEC1_PC, TRISC_RESET_PC_OVERRIDE, 1),
            3 => (TRISC_RESET_PC_SEC2_PC, TRISC_RESET_PC_OVERRIDE, 2),
            _ => (NCRISC_RESET_PC_PC, NCRISC_RESET_PC_OVERRIDE, 0),
        };
        if read_word(&self.memory, override_reg) & (1 << bit) != 0 {
            read_word(&self.memory, pc_reg)
        } else {
            DEFAULT_START[risc - 1]
        }
    }

    fn write_soft_reset(&mut self, value: u32) {
        for risc in 0..5 {
            let was = self.in_reset(risc);
            let bit = 1 << WORMHOLE.debug.reset_bits[risc];
            let now = value & bit != 0;
            if was && !now {
                let pc = self.start_pc(risc);
                let core = &mut self.cores[risc];
                core.pc = pc;
                core.regs = [0; 32];
                core.halted = false;
                core.resuming = false;
                core.clear_hits();
            }
        }
        self.soft_reset = value;
    }

    // ------------------------------------------------------------------
    // Debug port
    // ------------------------------------------------------------------

    fn write_control0(&mut self, value: u32) {
        if value != 0 {
            self.pending = value;
            if value & 0x0001_0000 == 0 {
                self.status0 &= !READ_VALID;
            }
            return;
        }
        let word = std::mem::take(&mut self.pending);
        if word == 0 {
            return;
        }
        let risc = ((word >> 17) & 0x7) as usize;
        let idx = word & 0xFFFF;
        if risc >= 5 {
            return;
        }
        if word & 0x0001_0000 != 0 {
            let value = self.control1;
            self.debug_write(risc, idx, value);
        } else {
            self.status1 = self.debug_read(risc, idx);
            self.status0 |= READ_VALID;
        }
    }

    fn debug_read(&self, risc: usize, idx: u32) -> u32 {
        let core = &self.cores[risc];
        match idx {
            index::STATUS => core.status_bits(),
            index::COMMAND_ARG_0 => core.args[0],
            index::COMMAND_ARG_1 => core.args[1],
            index::COMMAND_RETURN_VALUE => core.ret,
            index::WATCHPOINT_SETTINGS => core.watchpoint_settings,
            i if (index::WATCHPOINT_0..index::WATCHPOINT_0 + 8).contains(&i) => {
                core.watchpoints[(i - index::WATCHPOINT_0) as usize]
            }
            _ => 0,
        }
    }

    fn debug_write(&mut self, risc: usize, idx: u32, value: u32) {
        match idx {
            index::COMMAND => self.command(risc, value),
            index::COMMAND_ARG_0 => self.cores[risc].args[0] = value,
            index::COMMAND_ARG_1 => self.cores[risc].args[1] = value,
            index::WATCHPOINT_SETTINGS => self.cores[risc].watchpoint_settings = value,
            i if (index::WATCHPOINT_0..index::WATCHPOINT_0 + 8).contains(&i) => {
                self.cores[risc].watchpoints[(i - index::WATCHPOINT_0) as usize] = value
            }
            _ => {}
        }
    }

    fn command(&mut self, risc: usize, value: u32) {
        if self.in_reset(risc) {
            return;
        }
        if value & command::HALT != 0 {
            self.cores[risc].halted = true;
        }
        if value & command::STEP != 0 && self.cores[risc].halted {
            self.execute(risc);
            // A step never leaves the core running.
            self.cores[risc].halted = true;
        }
        if value & command::CONTINUE != 0 && self.cores[risc].halted {
            let core = &mut self.cores[risc];
            core.halted = false;
            core.resuming = true;
            core.clear_hits();
        }
        let [arg0, arg1] = self.cores[risc].args;
        if value & command::READ_REGISTER != 0 {
            let core = &mut self.cores[risc];
            core.ret = match arg0 {
                32 => core.pc,
                r if r < 32 => core.regs[r as usize],
                _ => 0,
            };
        }
        if value & command::WRITE_REGISTER != 0 {
            let core = &mut self.cores[risc];
            match arg0 {
                32 => core.pc = arg1,
                0 => {}
                r if r < 32 => core.regs[r as usize] = arg1,
                _ => {}
            }
        }
        if value & command::READ_MEMORY != 0 {
            self.cores[risc].ret = self.core_read(risc, arg0 as u64);
        }
        if value & command::WRITE_MEMORY != 0 {
            self.core_write(risc, arg0 as u64, arg1);
        }
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    fn tick(&mut self) {
        for risc in 0..5 {
            for _ in 0..TICK {
                if self.in_reset(risc) || self.cores[risc].halted {
                    break;
                }
                let pc = self.cores[risc].pc;
                let core = &mut self.cores[risc];
                let resuming = std::mem::take(&mut core.resuming);
                if !resuming {
                    let hits = core.matching_slots(pc, &[0]);
                    if hits != 0 {
                        core.halted = true;
                        core.pc_watchpoint_hit = true;
                        core.watchpoints_hit |= hits;
                        break;
                    }
                }
                self.execute(risc);
            }
        }
    }

    fn execute(&mut self, risc: usize) {
        let pc = self.cores[risc].pc;
        let insn = self.core_read(risc, pc as u64);
        let rd = ((insn >> 7) & 0x1F) as usize;
        let rs1 = ((insn >> 15) & 0x1F) as usize;
        let rs2 = ((insn >> 20) & 0x1F) as usize;
        let mut next = pc.wrapping_add(4);
        let mut memory_hits = 0u8;

        match insn & 0x7F {
            0x37 => self.set_reg(risc, rd, insn & 0xFFFF_F000),
            0x13 if (insn >> 12) & 0x7 == 0 => {
                let value = self.cores[risc].regs[rs1].wrapping_add(sext(insn >> 20, 12));
                self.set_reg(risc, rd, value);
            }
            0x23 if (insn >> 12) & 0x7 == 2 => {
                let imm = ((insn >> 25) << 5) | ((insn >> 7) & 0x1F);
                let addr = self.cores[risc].regs[rs1].wrapping_add(sext(imm, 12));
                let value = self.cores[risc].regs[rs2];
                self.core_write(risc, addr as u64, value);
                memory_hits = self.cores[risc].matching_slots(addr, &[2, 3]);
            }
            0x03 if (insn >> 12) & 0x7 == 2 => {
                let addr = self.cores[risc].regs[rs1].wrapping_add(sext(insn >> 20, 12));
                let value = self.core_read(risc, addr as u64);
                self.set_reg(risc, rd, value);
                memory_hits = self.cores[risc].matching_slots(addr, &[1, 3]);
            }
            0x6F => {
                let imm = ((insn >> 31) << 20)
                    | (((insn >> 21) & 0x3FF) << 1)
                    | (((insn >> 20) & 0x1) << 11)
                    | (((insn >> 12) & 0xFF) << 12);
                self.set_reg(risc, rd, pc.wrapping_add(4));
                next = pc.wrapping_add(sext(imm, 21));
            }
            _ if insn == EBREAK => {
                let core = &mut self.cores[risc];
                core.halted = true;
                core.ebreak_hit = true;
            }
            // Anything else executes as a no-op.
            _ => {}
        }

        let core = &mut self.cores[risc];
        core.pc = next;
        if memory_hits != 0 {
            core.halted = true;
            core.memory_watchpoint_hit = true;
            core.watchpoints_hit |= memory_hits;
        }
    }

    fn set_reg(&mut self, risc: usize, rd: usize, value: u32) {
        if rd != 0 {
            self.cores[risc].regs[rd] = value;
        }
    }
}

// ============================================================================
// Chip
// ============================================================================

#[derive(Debug)]
struct SimState {
    harvest_mask: u32,
    tiles: HashMap<(u8, u8), Tile>,
    /// NoC writes performed, including debug port traffic.
    noc_writes: usize,
    /// Tile memory that silently drops NoC writes.
    stuck: Vec<std::ops::Range<u64>>,
}

impl SimState {
    fn is_stuck(&self, addr: u64) -> bool {
        self.stuck.iter().any(|r| r.contains(&addr))
    }
}

/// Shared handle to a simulated Wormhole chip.
#[derive(Clone)]
pub struct SimChip {
    state: Arc<Mutex<SimState>>,
}

impl SimChip {
    pub fn new(harvest_mask: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                harvest_mask,
                tiles: HashMap::new(),
                noc_writes: 0,
                stuck: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    pub fn noc_writes(&self) -> usize {
        self.lock().noc_writes
    }

    /// Read a word of tile memory as the NoC sees it.
    pub fn peek(&self, noc0: (u8, u8), addr: u64) -> u32 {
        let mut state = self.lock();
        read_word(&tile(&mut state, noc0).memory, addr)
    }

    /// Read a word of a core's private memory.
    pub fn peek_private(&self, noc0: (u8, u8), risc: usize, addr: u64) -> u32 {
        let mut state = self.lock();
        read_word(&tile(&mut state, noc0).cores[risc].private, addr)
    }

    pub fn poke(&self, noc0: (u8, u8), addr: u64, words: &[u32]) {
        let mut state = self.lock();
        write_bytes(&mut tile(&mut state, noc0).memory, addr, &words_to_bytes(words));
    }

    /// Make NoC writes to `range` disappear, on every tile.
    pub fn stick(&self, range: std::ops::Range<u64>) {
        self.lock().stuck.push(range);
    }

    fn enter(&self) -> MutexGuard<'_, SimState> {
        let mut state = self.lock();
        for tile in state.tiles.values_mut() {
            tile.tick();
        }
        state
    }
}

fn to_noc0(noc_id: u8, x: u8, y: u8) -> (u8, u8) {
    if noc_id == 0 {
        (x, y)
    } else {
        (WORMHOLE.grid_width - 1 - x, WORMHOLE.grid_height - 1 - y)
    }
}

fn tile(state: &mut SimState, noc0: (u8, u8)) -> &mut Tile {
    state.tiles.entry(noc0).or_insert_with(|| Tile::new(&WORMHOLE))
}

impl NativeBinding for SimChip {
    fn pci_read32(&mut self, _chip: u8, noc_id: u8, x: u8, y: u8, addr: u64)
        -> Result<u32, CommError> {
        let mut state = self.enter();
        let tile = tile(&mut state, to_noc0(noc_id, x, y));
        let debug = &WORMHOLE.debug;
        Ok(match addr {
            a if a == debug.status0 => tile.status0,
            a if a == debug.status1 => tile.status1,
            a if a == debug.control1 => tile.control1,
            a if a == debug.control0 => tile.pending,
            a if a == debug.soft_reset => tile.soft_reset,
            // The private range is not reachable over the NoC.
            a if Tile::is_private(a) => 0,
            a => read_word(&tile.memory, a),
        })
    }

    fn pci_write32(&mut self, _chip: u8, noc_id: u8, x: u8, y: u8, addr: u64, data: u32)
        -> Result<(), CommError> {
        let mut state = self.enter();
        state.noc_writes += 1;
        let tile = tile(&mut state, to_noc0(noc_id, x, y));
        let debug = &WORMHOLE.debug;
        match addr {
            a if a == debug.control1 => tile.control1 = data,
            a if a == debug.control0 => tile.write_control0(data),
            a if a == debug.soft_reset => tile.write_soft_reset(data),
            a if Tile::is_private(a) => {}
            a => write_bytes(&mut tile.memory, a, &data.to_le_bytes()),
        }
        Ok(())
    }

    fn pci_read(&mut self, _chip: u8, noc_id: u8, x: u8, y: u8, addr: u64, size: u32)
        -> Result<Vec<u8>, CommError> {
        let mut state = self.enter();
        let tile = tile(&mut state, to_noc0(noc_id, x, y));
        if Tile::is_private(addr) {
            return Ok(vec![0; size as usize]);
        }
        Ok(read_bytes(&tile.memory, addr, size as usize))
    }

    fn pci_write(&mut self, _chip: u8, noc_id: u8, x: u8, y: u8, addr: u64, data: &[u8])
        -> Result<(), CommError> {
        let mut state = self.enter();
        state.noc_writes += 1;
        let kept: Vec<(u64, u8)> = data
            .iter()
            .enumerate()
            .map(|(i, b)| (addr + i as u64, *b))
            .filter(|(a, _)| !state.is_stuck(*a) && !Tile::is_private(*a))
            .collect();
        let tile = tile(&mut state, to_noc0(noc_id, x, y));
        for (a, b) in kept {
            tile.memory.insert(a, b);
        }
        Ok(())
    }

    fn device_ids(&mut self) -> Result<Vec<u8>, CommError> {
        Ok(vec![0])
    }

    fn device_arch(&mut self, _chip: u8) -> Result<String, CommError> {
        Ok("wormhole_b0".to_string())
    }

    fn cluster_description(&mut self) -> Result<String, CommError> {
        let mask = self.lock().harvest_mask;
        Ok(format!(
            "arch: {{0: wormhole_b0}}\nchips_with_mmio: [{{0: 0}}]\nharvesting: {{0: {{harvest_mask: {}}}}}\n",
            mask
        ))
    }

    fn arc_msg(
        &mut self,
        _chip: u8,
        msg_code: u32,
        _wait_for_done: bool,
        arg0: u32,
        arg1: u32,
        _timeout_ms: u32,
    ) -> Result<Vec<u32>, CommError> {
        let ok = msg_code == ARC_TEST_MSG && (arg0 << 8 | arg1) == ARC_TEST_TAG;
        Ok(vec![if ok { 0 } else { 1 }, 0, 0])
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn test_debug_config() -> DebugConfig {
    DebugConfig {
        poll_timeout: Duration::from_millis(200),
        verify_continue: true,
    }
}

/// A context over a fresh simulated chip, plus the chip handle.
pub fn sim_context(harvest_mask: u32) -> (Context, SimChip) {
    let chip = SimChip::new(harvest_mask);
    let comm = Arc::new(DirectCommunicator::new(chip.clone()));
    (Context::new(comm, test_debug_config()), chip)
}

/// Build an ELF32 RISC-V image from `(name, address, data)` sections.
pub fn build_elf(entry: u32, sections: &[(&str, u32, &[u8])]) -> Vec<u8> {
    const EHDR: usize = 52;

    let mut out = vec![0u8; EHDR];
    let mut headers: Vec<[u32; 10]> = vec![[0; 10]];

    let mut shstrtab = vec![0u8];
    let mut name_offsets = Vec::new();
    for name in sections.iter().map(|s| s.0).chain([".shstrtab"]) {
        name_offsets.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(name.as_bytes());
        shstrtab.push(0);
    }

    for (i, (_, addr, data)) in sections.iter().enumerate() {
        let offset = out.len() as u32;
        out.extend_from_slice(data);
        headers.push([name_offsets[i], 1, 0x6, *addr, offset, data.len() as u32, 0, 0, 4, 0]);
    }
    let offset = out.len() as u32;
    out.extend_from_slice(&shstrtab);
    headers.push([name_offsets[sections.len()], 3, 0, 0, offset, shstrtab.len() as u32, 0, 0, 1, 0]);

    while out.len() % 4 != 0 {
        out.push(0);
    }
    let shoff = out.len() as u32;
    for header in &headers {
        for word in header {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }

    out[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    out[4] = 1;
    out[5] = 1;
    out[6] = 1;
    out[16..18].copy_from_slice(&2u16.to_le_bytes());
    out[18..20].copy_from_slice(&ttlens::loader::EM_RISCV.to_le_bytes());
    out[20..24].copy_from_slice(&1u32.to_le_bytes());
    out[24..28].copy_from_slice(&entry.to_le_bytes());
    out[32..36].copy_from_slice(&shoff.to_le_bytes());
    out[40..42].copy_from_slice(&(EHDR as u16).to_le_bytes());
    out[46..48].copy_from_slice(&40u16.to_le_bytes());
    out[48..50].copy_from_slice(&(headers.len() as u16).to_le_bytes());
    out[50..52].copy_from_slice(&((headers.len() - 1) as u16).to_le_bytes());
    out
}
