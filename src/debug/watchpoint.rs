//! Hardware watchpoints.
//!
//! Each core has eight slots. Slot `i` owns an address register
//! (`WATCHPOINT_0 + i`) and nibble `i` of WATCHPOINT_SETTINGS:
//!
//! ```text
//! bit 0     enabled
//! bits 1-2  kind: 0 pc, 1 read, 2 write, 3 access
//! bit 3     unused
//! ```

use super::registers::{index, WATCHPOINT_COUNT};
use super::{DebugError, RiscDebug};

/// What a watchpoint slot triggers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchpointKind {
    /// Instruction fetch at the address (a breakpoint).
    Pc = 0,
    Read = 1,
    Write = 2,
    Access = 3,
}

/// Decoded state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchpointState {
    Disabled,
    Breakpoint,
    Read,
    Write,
    Access,
}

impl WatchpointState {
    pub fn from_nibble(nibble: u32) -> Self {
        if nibble & 0x1 == 0 {
            return WatchpointState::Disabled;
        }
        match (nibble >> 1) & 0x3 {
            0 => WatchpointState::Breakpoint,
            1 => WatchpointState::Read,
            2 => WatchpointState::Write,
            _ => WatchpointState::Access,
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self != WatchpointState::Disabled
    }

    /// Watches data accesses rather than instruction fetches.
    pub fn is_memory(&self) -> bool {
        matches!(
            self,
            WatchpointState::Read | WatchpointState::Write | WatchpointState::Access
        )
    }

    pub fn is_read(&self) -> bool {
        matches!(self, WatchpointState::Read | WatchpointState::Access)
    }

    pub fn is_write(&self) -> bool {
        matches!(self, WatchpointState::Write | WatchpointState::Access)
    }
}

fn check_slot(id: u8) -> Result<(), DebugError> {
    if id >= WATCHPOINT_COUNT {
        return Err(DebugError::InvalidWatchpoint(id));
    }
    Ok(())
}

impl RiscDebug<'_> {
    fn set_watchpoint(&self, id: u8, kind: WatchpointKind, addr: u32) -> Result<(), DebugError> {
        check_slot(id)?;
        self.assert_not_in_reset()?;
        self.ensure_halted(|dbg| {
            dbg.trigger_write(index::WATCHPOINT_0 + id as u32, addr)?;
            let settings = dbg.trigger_read(index::WATCHPOINT_SETTINGS)?;
            let shift = 4 * id as u32;
            let nibble = 0x1 | ((kind as u32) << 1);
            let settings = (settings & !(0xF << shift)) | (nibble << shift);
            dbg.trigger_write(index::WATCHPOINT_SETTINGS, settings)
        })?;
        log::debug!("{}: watchpoint {} {:?} at 0x{:08X}", self.loc(), id, kind, addr);
        Ok(())
    }

    pub fn set_watchpoint_on_pc_address(&self, id: u8, addr: u32) -> Result<(), DebugError> {
        self.set_watchpoint(id, WatchpointKind::Pc, addr)
    }

    pub fn set_watchpoint_on_memory_read(&self, id: u8, addr: u32) -> Result<(), DebugError> {
        self.set_watchpoint(id, WatchpointKind::Read, addr)
    }

    pub fn set_watchpoint_on_memory_write(&self, id: u8, addr: u32) -> Result<(), DebugError> {
        self.set_watchpoint(id, WatchpointKind::Write, addr)
    }

    pub fn set_watchpoint_on_memory_access(&self, id: u8, addr: u32) -> Result<(), DebugError> {
        self.set_watchpoint(id, WatchpointKind::Access, addr)
    }

    pub fn disable_watchpoint(&self, id: u8) -> Result<(), DebugError> {
        check_slot(id)?;
        self.assert_not_in_reset()?;
        self.ensure_halted(|dbg| {
            let settings = dbg.trigger_read(index::WATCHPOINT_SETTINGS)?;
            let settings = settings & !(0xF << (4 * id as u32));
            dbg.trigger_write(index::WATCHPOINT_SETTINGS, settings)
        })
    }

    pub fn read_watchpoints_state(&self) -> Result<[WatchpointState; 8], DebugError> {
        self.assert_not_in_reset()?;
        let settings = self.trigger_read(index::WATCHPOINT_SETTINGS)?;
        let mut states = [WatchpointState::Disabled; 8];
        for (i, state) in states.iter_mut().enumerate() {
            *state = WatchpointState::from_nibble((settings >> (4 * i)) & 0xF);
        }
        Ok(states)
    }

    pub fn read_watchpoint_state(&self, id: u8) -> Result<WatchpointState, DebugError> {
        check_slot(id)?;
        Ok(self.read_watchpoints_state()?[id as usize])
    }

    pub fn read_watchpoint_address(&self, id: u8) -> Result<u32, DebugError> {
        check_slot(id)?;
        self.assert_not_in_reset()?;
        self.trigger_read(index::WATCHPOINT_0 + id as u32)
    }
}
