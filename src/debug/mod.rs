//! RISC-V debug engine.
//!
//! Every tensix tile hosts five RISC-V cores with no resident debug agent.
//! They are driven through a memory-mapped debug port of four registers:
//!
//! ```text
//! CONTROL0  trigger: READ_OP/WRITE_OP | risc << 17 | index
//! CONTROL1  operand of a pending trigger write
//! STATUS0   bit 30 = STATUS1 holds a valid read result
//! STATUS1   result of the last trigger read
//! ```
//!
//! A trigger write loads CONTROL1, writes the trigger word to CONTROL0 and
//! pulses CONTROL0 back to zero. A trigger read writes and pulses CONTROL0,
//! waits for the valid bit and then reads STATUS1. The internal indices
//! behind the trigger (STATUS, COMMAND, arguments, watchpoints) are listed
//! in [`registers`].
//!
//! [`RiscDebug`] never caches core state: every query goes to the device.
//!
//! # Example
//!
//! ```ignore
//! let dbg = ctx.debug(RiscLoc::new(coord, 0, RiscId::Brisc))?;
//! dbg.halt()?;
//! let pc = dbg.read_gpr(GprIndex::PC)?;
//! dbg.cont(true)?;
//! ```

pub mod registers;
mod watchpoint;

pub use registers::{GprIndex, RiscStatus};
pub use watchpoint::{WatchpointKind, WatchpointState};

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::comm::{CommError, Communicator};
use crate::coords::OnChipCoordinate;
use crate::device::Device;
use registers::{command, index, trigger_word, READ_OP, READ_VALID, WRITE_OP};

/// Errors raised by the debug engine.
#[derive(Debug, thiserror::Error)]
pub enum DebugError {
    #[error("{0} is in reset")]
    InReset(RiscLoc),

    #[error("{0} is not halted")]
    NotHalted(RiscLoc),

    #[error("{loc} did not halt within {timeout:?}")]
    HaltTimeout { loc: RiscLoc, timeout: Duration },

    #[error("{0} is still halted after continue")]
    ContinueFailed(RiscLoc),

    #[error("{loc}: reset bit reads back {actual} after writing {expected}")]
    ResetMismatch {
        loc: RiscLoc,
        expected: bool,
        actual: bool,
    },

    #[error("{loc}: address 0x{addr:X} is outside the 32-bit core address space")]
    AddressOutOfRange { loc: RiscLoc, addr: u64 },

    #[error("invalid watchpoint slot {0} (expected 0..8)")]
    InvalidWatchpoint(u8),

    #[error("invalid register '{0}'")]
    InvalidRegister(String),

    #[error("unknown risc '{0}'")]
    InvalidRisc(String),

    #[error(transparent)]
    Comm(#[from] CommError),
}

/// One of the five cores of a tensix tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RiscId {
    Brisc = 0,
    Trisc0 = 1,
    Trisc1 = 2,
    Trisc2 = 3,
    Ncrisc = 4,
}

impl RiscId {
    pub const ALL: [RiscId; 5] = [
        RiscId::Brisc,
        RiscId::Trisc0,
        RiscId::Trisc1,
        RiscId::Trisc2,
        RiscId::Ncrisc,
    ];

    pub fn id(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            RiscId::Brisc => "brisc",
            RiscId::Trisc0 => "trisc0",
            RiscId::Trisc1 => "trisc1",
            RiscId::Trisc2 => "trisc2",
            RiscId::Ncrisc => "ncrisc",
        }
    }
}

impl TryFrom<u8> for RiscId {
    type Error = DebugError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        RiscId::ALL
            .get(id as usize)
            .copied()
            .ok_or_else(|| DebugError::InvalidRisc(id.to_string()))
    }
}

impl FromStr for RiscId {
    type Err = DebugError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.trim().parse::<u8>() {
            return RiscId::try_from(id);
        }
        RiscId::ALL
            .into_iter()
            .find(|r| r.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DebugError::InvalidRisc(s.to_string()))
    }
}

impl fmt::Display for RiscId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Address of one core: tile, the NoC used to reach it, and the risc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RiscLoc {
    pub coord: OnChipCoordinate,
    pub noc_id: u8,
    pub risc_id: RiscId,
}

impl RiscLoc {
    pub fn new(coord: OnChipCoordinate, noc_id: u8, risc_id: RiscId) -> Self {
        Self { coord, noc_id, risc_id }
    }
}

impl fmt::Display for RiscLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} (device {})", self.risc_id, self.coord, self.coord.device_id())
    }
}

/// Tunables of the polling loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugConfig {
    /// Upper bound on any wait for the core or the debug port.
    pub poll_timeout: Duration,
    /// Default for `cont` callers that follow the configuration.
    pub verify_continue: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(1000),
            verify_continue: true,
        }
    }
}

/// Result of [`RiscDebug::halt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltOutcome {
    Halted,
    AlreadyHalted,
}

/// Result of [`RiscDebug::cont`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueOutcome {
    AlreadyRunning,
    Resumed,
    /// The core resumed and immediately stopped again on a watchpoint or
    /// an `ebreak`.
    ResumedThenRehalted,
}

/// Debug handle for one core.
pub struct RiscDebug<'a> {
    loc: RiscLoc,
    device: &'a Device,
    comm: &'a dyn Communicator,
    config: DebugConfig,
}

impl<'a> RiscDebug<'a> {
    pub fn new(
        loc: RiscLoc,
        device: &'a Device,
        comm: &'a dyn Communicator,
        config: DebugConfig,
    ) -> Self {
        Self { loc, device, comm, config }
    }

    pub fn loc(&self) -> RiscLoc {
        self.loc
    }

    pub fn device(&self) -> &'a Device {
        self.device
    }

    pub fn comm(&self) -> &'a dyn Communicator {
        self.comm
    }

    pub fn config(&self) -> DebugConfig {
        self.config
    }

    /// Handle for another core of the same tile.
    pub fn sibling(&self, risc_id: RiscId) -> RiscDebug<'a> {
        RiscDebug::new(
            RiscLoc { risc_id, ..self.loc },
            self.device,
            self.comm,
            self.config,
        )
    }

    // ========================================================================
    // Low-level port access
    // ========================================================================

    fn noc_xy(&self) -> (u8, u8) {
        self.device.noc_position(&self.loc.coord, self.loc.noc_id)
    }

    fn write_reg(&self, addr: u64, value: u32) -> Result<(), CommError> {
        let (x, y) = self.noc_xy();
        self.comm
            .pci_write32(self.device.id(), self.loc.noc_id, x, y, addr, value)
    }

    fn read_reg(&self, addr: u64) -> Result<u32, CommError> {
        let (x, y) = self.noc_xy();
        self.comm.pci_read32(self.device.id(), self.loc.noc_id, x, y, addr)
    }

    fn trigger_write(&self, index: u32, value: u32) -> Result<(), DebugError> {
        let regs = &self.device.arch().debug;
        let word = trigger_word(WRITE_OP, self.loc.risc_id.id(), index);
        log::trace!("{}: trigger write [{}] = 0x{:08X}", self.loc, index, value);
        self.write_reg(regs.control1, value)?;
        self.write_reg(regs.control0, word)?;
        self.write_reg(regs.control0, 0)?;
        Ok(())
    }

    fn trigger_read(&self, index: u32) -> Result<u32, DebugError> {
        let regs = &self.device.arch().debug;
        let word = trigger_word(READ_OP, self.loc.risc_id.id(), index);
        self.write_reg(regs.control0, word)?;
        self.write_reg(regs.control0, 0)?;

        let deadline = Instant::now() + self.config.poll_timeout;
        loop {
            if self.read_reg(regs.status0)? & READ_VALID != 0 {
                break;
            }
            if Instant::now() >= deadline {
                log::warn!("{}: read-valid bit never set for index {}", self.loc, index);
                break;
            }
        }
        let value = self.read_reg(regs.status1)?;
        log::trace!("{}: trigger read [{}] = 0x{:08X}", self.loc, index, value);
        Ok(value)
    }

    fn command(&self, bits: u32) -> Result<(), DebugError> {
        self.trigger_write(index::COMMAND, command::DEBUG_MODE | bits)
    }

    // ========================================================================
    // Preconditions
    // ========================================================================

    pub fn assert_not_in_reset(&self) -> Result<(), DebugError> {
        if self.is_in_reset()? {
            return Err(DebugError::InReset(self.loc));
        }
        Ok(())
    }

    pub fn assert_halted(&self) -> Result<(), DebugError> {
        if !self.is_halted()? {
            return Err(DebugError::NotHalted(self.loc));
        }
        Ok(())
    }

    // ========================================================================
    // Reset control
    // ========================================================================

    fn reset_bit(&self) -> u32 {
        1 << self.device.arch().debug.reset_bits[self.loc.risc_id.id() as usize]
    }

    pub fn is_in_reset(&self) -> Result<bool, DebugError> {
        let value = self.read_reg(self.device.arch().debug.soft_reset)?;
        Ok(value & self.reset_bit() != 0)
    }

    /// Assert (`true`) or release (`false`) this core's soft reset and
    /// verify the register took the value.
    pub fn set_reset_signal(&self, in_reset: bool) -> Result<(), DebugError> {
        let addr = self.device.arch().debug.soft_reset;
        let bit = self.reset_bit();
        let current = self.read_reg(addr)?;
        let value = if in_reset { current | bit } else { current & !bit };
        self.write_reg(addr, value)?;

        let actual = self.read_reg(addr)? & bit != 0;
        if actual != in_reset {
            return Err(DebugError::ResetMismatch {
                loc: self.loc,
                expected: in_reset,
                actual,
            });
        }
        log::debug!("{}: reset {}", self.loc, if in_reset { "asserted" } else { "released" });
        Ok(())
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub fn read_status(&self) -> Result<RiscStatus, DebugError> {
        Ok(RiscStatus::from_bits(self.trigger_read(index::STATUS)?))
    }

    pub fn is_halted(&self) -> Result<bool, DebugError> {
        Ok(self.read_status()?.halted)
    }

    pub fn is_pc_watchpoint_hit(&self) -> Result<bool, DebugError> {
        Ok(self.read_status()?.pc_watchpoint_hit)
    }

    pub fn is_memory_watchpoint_hit(&self) -> Result<bool, DebugError> {
        Ok(self.read_status()?.memory_watchpoint_hit)
    }

    pub fn is_ebreak_hit(&self) -> Result<bool, DebugError> {
        Ok(self.read_status()?.ebreak_hit)
    }

    pub fn watchpoints_hit(&self) -> Result<[bool; 8], DebugError> {
        Ok(self.read_status()?.watchpoints_hit)
    }

    // ========================================================================
    // Run control
    // ========================================================================

    /// Put the core into debug mode without issuing a command.
    pub fn enable_debug(&self) -> Result<(), DebugError> {
        self.assert_not_in_reset()?;
        self.command(0)
    }

    pub fn halt(&self) -> Result<HaltOutcome, DebugError> {
        self.assert_not_in_reset()?;
        if self.is_halted()? {
            log::warn!("{}: already halted", self.loc);
            return Ok(HaltOutcome::AlreadyHalted);
        }
        self.command(command::HALT)?;

        let deadline = Instant::now() + self.config.poll_timeout;
        while !self.is_halted()? {
            if Instant::now() >= deadline {
                return Err(DebugError::HaltTimeout {
                    loc: self.loc,
                    timeout: self.config.poll_timeout,
                });
            }
        }
        log::debug!("{}: halted", self.loc);
        Ok(HaltOutcome::Halted)
    }

    /// Advance a halted core by one cycle. Not verified.
    pub fn step(&self) -> Result<(), DebugError> {
        self.assert_not_in_reset()?;
        self.command(command::STEP)
    }

    /// Resume the core. With `verify`, check the core left the halted
    /// state; a core that stopped again on a watchpoint or `ebreak`
    /// reports [`ContinueOutcome::ResumedThenRehalted`].
    pub fn cont(&self, verify: bool) -> Result<ContinueOutcome, DebugError> {
        self.assert_not_in_reset()?;
        if !self.is_halted()? {
            log::warn!("{}: already running", self.loc);
            return Ok(ContinueOutcome::AlreadyRunning);
        }
        self.command(command::CONTINUE)?;

        if verify {
            let status = self.read_status()?;
            if status.halted {
                if status.pc_watchpoint_hit
                    || status.memory_watchpoint_hit
                    || status.ebreak_hit
                    || status.watchpoints_hit.iter().any(|&hit| hit)
                {
                    log::debug!("{}: resumed and halted again ({})", self.loc, status);
                    return Ok(ContinueOutcome::ResumedThenRehalted);
                }
                return Err(DebugError::ContinueFailed(self.loc));
            }
        }
        log::debug!("{}: resumed", self.loc);
        Ok(ContinueOutcome::Resumed)
    }

    /// Resume the core, verifying as [`DebugConfig::verify_continue`] says.
    pub fn resume(&self) -> Result<ContinueOutcome, DebugError> {
        self.cont(self.config.verify_continue)
    }

    /// Run `f` with the core halted. Halts only if the core was running and
    /// resumes only if this call halted it.
    pub fn ensure_halted<T>(
        &self,
        f: impl FnOnce(&Self) -> Result<T, DebugError>,
    ) -> Result<T, DebugError> {
        let was_halted = self.is_halted()?;
        if !was_halted {
            self.halt()?;
        }
        let result = f(self);
        if !was_halted {
            if let Err(e) = self.cont(false) {
                if result.is_ok() {
                    return Err(e);
                }
                log::warn!("{}: failed to resume after error: {}", self.loc, e);
            }
        }
        result
    }

    pub fn invalidate_instruction_cache(&self) -> Result<(), DebugError> {
        self.assert_not_in_reset()?;
        self.command(command::FLUSH)
    }

    pub fn flush_registers(&self) -> Result<(), DebugError> {
        self.assert_not_in_reset()?;
        self.command(command::FLUSH_REGISTERS)
    }

    // ========================================================================
    // Registers and memory
    // ========================================================================

    pub fn read_gpr(&self, reg: GprIndex) -> Result<u32, DebugError> {
        self.assert_not_in_reset()?;
        self.assert_halted()?;
        self.trigger_write(index::COMMAND_ARG_0, reg.index())?;
        self.command(command::READ_REGISTER)?;
        self.trigger_read(index::COMMAND_RETURN_VALUE)
    }

    pub fn write_gpr(&self, reg: GprIndex, value: u32) -> Result<(), DebugError> {
        self.assert_not_in_reset()?;
        self.assert_halted()?;
        self.trigger_write(index::COMMAND_ARG_1, value)?;
        self.trigger_write(index::COMMAND_ARG_0, reg.index())?;
        self.command(command::WRITE_REGISTER)
    }

    /// Read one word through the core. The core must be halted.
    pub fn read_memory(&self, addr: u64) -> Result<u32, DebugError> {
        self.assert_not_in_reset()?;
        self.assert_halted()?;
        self.trigger_write(index::COMMAND_ARG_0, self.core_address(addr)?)?;
        self.command(command::READ_MEMORY)?;
        self.trigger_read(index::COMMAND_RETURN_VALUE)
    }

    /// Write one word through the core. The core must be halted.
    pub fn write_memory(&self, addr: u64, value: u32) -> Result<(), DebugError> {
        self.assert_not_in_reset()?;
        self.assert_halted()?;
        self.trigger_write(index::COMMAND_ARG_0, self.core_address(addr)?)?;
        self.trigger_write(index::COMMAND_ARG_1, value)?;
        self.command(command::WRITE_MEMORY)
    }

    fn core_address(&self, addr: u64) -> Result<u32, DebugError> {
        u32::try_from(addr).map_err(|_| DebugError::AddressOutOfRange { loc: self.loc, addr })
    }

    /// Read `len` bytes starting at a word-aligned address.
    pub fn read_memory_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>, DebugError> {
        let mut out = Vec::with_capacity(len + 3);
        let mut offset = 0u64;
        while out.len() < len {
            let word = self.read_memory(addr + offset)?;
            out.extend_from_slice(&word.to_le_bytes());
            offset += 4;
        }
        out.truncate(len);
        Ok(out)
    }

    /// Write bytes starting at a word-aligned address. A partial last word
    /// is padded with zeros.
    pub fn write_memory_bytes(&self, addr: u64, data: &[u8]) -> Result<(), DebugError> {
        for (i, chunk) in data.chunks(4).enumerate() {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.write_memory(addr + 4 * i as u64, u32::from_le_bytes(word))?;
        }
        Ok(())
    }
}
