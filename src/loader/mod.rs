//! ELF loader for the tensix RISC-V cores.
//!
//! Sections on the allow-list ([`LOADED_SECTIONS`]) are written at their
//! link address. Addresses in the core-private range cannot be reached over
//! the NoC, so those go through the debug port one word at a time with the
//! core halted (a core held in reset is parked in a `jal 0` loop for the
//! transfer); everything else is a plain NoC block write. Each section is
//! read back after writing and mismatches end up in [`LoadReport::failures`].
//!
//! Only brisc starts at a fixed address (0). The other cores take their
//! start address from a configuration register that is only reachable
//! through a running core, so the loader borrows brisc as a proxy
//! ([`RiscLoader::with_brisc_proxy`]).

pub mod elf;

pub use elf::{ElfSection, ElfSymbol, RiscElf, EM_RISCV};

use crate::comm::CommError;
use crate::debug::{DebugError, RiscDebug, RiscId};
use crate::device::DeviceError;

/// Sections the loader writes; everything else in the ELF is ignored.
pub const LOADED_SECTIONS: [&str; 4] = [".init", ".text", ".ldm_data", ".stack"];

/// Errors raised while loading firmware.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to parse ELF: {0}")]
    Elf(#[from] goblin::error::Error),

    #[error("not a RISC-V core image: {0}")]
    NotRiscv(String),

    #[error("section {section} at 0x{address:X} is not 4-byte aligned")]
    Misaligned { section: String, address: u64 },

    #[error("section {section} ({size} bytes at offset {offset}) exceeds the {file_len}-byte file")]
    SectionOutOfBounds {
        section: String,
        offset: u64,
        size: u64,
        file_len: usize,
    },

    #[error("jump offset {0} does not fit a jal instruction")]
    JumpOutOfRange(i64),

    #[error(transparent)]
    Debug(#[from] DebugError),

    #[error(transparent)]
    Comm(#[from] CommError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// One section written to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSection {
    pub name: String,
    pub address: u64,
    pub size: usize,
    /// Written through the debug port rather than the NoC.
    pub via_debug: bool,
}

/// A section whose read-back differed from the ELF contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyFailure {
    pub section: String,
    pub address: u64,
    /// Offset of the first differing byte within the section.
    pub first_mismatch: usize,
}

/// Outcome of a load. Verification failures do not abort the load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Address of `.init`, when the image has one.
    pub entry: Option<u64>,
    /// `e_entry` from the ELF header.
    pub elf_entry: u64,
    pub sections: Vec<LoadedSection>,
    pub failures: Vec<VerifyFailure>,
}

impl LoadReport {
    pub fn is_verified(&self) -> bool {
        self.failures.is_empty()
    }

    /// Where the core should start: `.init` if present, else `e_entry`.
    pub fn start_address(&self) -> u64 {
        self.entry.unwrap_or(self.elf_entry)
    }
}

/// Encode `jal x0, offset`.
///
/// ```text
/// 31       30..21     20       19..12     11..7  6..0
/// imm[20]  imm[10:1]  imm[11]  imm[19:12]  rd=0   1101111
/// ```
pub fn jal_instruction(offset: i64) -> Result<u32, LoadError> {
    if offset % 2 != 0 || !(-(1 << 20)..(1 << 20)).contains(&offset) {
        return Err(LoadError::JumpOutOfRange(offset));
    }
    let imm = offset as u32;
    Ok(((imm >> 20) & 0x1) << 31
        | ((imm >> 1) & 0x3FF) << 21
        | ((imm >> 11) & 0x1) << 20
        | ((imm >> 12) & 0xFF) << 12
        | 0x6F)
}

/// `jal 0`: a one-instruction infinite loop.
pub fn loop_instruction() -> u32 {
    0x6F
}

/// Loader bound to one core.
pub struct RiscLoader<'a> {
    debug: RiscDebug<'a>,
}

impl<'a> RiscLoader<'a> {
    pub fn new(debug: RiscDebug<'a>) -> Self {
        Self { debug }
    }

    pub fn debug(&self) -> &RiscDebug<'a> {
        &self.debug
    }

    fn is_private(&self, addr: u64) -> bool {
        self.debug.device().arch().is_private_address(addr)
    }

    fn noc_write(&self, addr: u64, data: &[u8]) -> Result<(), CommError> {
        let loc = self.debug.loc();
        let device = self.debug.device();
        let (x, y) = device.noc_position(&loc.coord, loc.noc_id);
        self.debug.comm().pci_write(device.id(), loc.noc_id, x, y, addr, data)
    }

    fn noc_read(&self, addr: u64, size: usize) -> Result<Vec<u8>, CommError> {
        let loc = self.debug.loc();
        let device = self.debug.device();
        let (x, y) = device.noc_position(&loc.coord, loc.noc_id);
        self.debug
            .comm()
            .pci_read(device.id(), loc.noc_id, x, y, addr, size as u32)
    }

    /// Write a block, over the debug port for private addresses and over
    /// the NoC otherwise.
    pub fn write_block(&self, addr: u64, data: &[u8]) -> Result<(), LoadError> {
        if self.is_private(addr) {
            self.with_debug_access(|dbg| dbg.write_memory_bytes(addr, data))
        } else {
            Ok(self.noc_write(addr, data)?)
        }
    }

    pub fn read_block(&self, addr: u64, size: usize) -> Result<Vec<u8>, LoadError> {
        if self.is_private(addr) {
            self.with_debug_access(|dbg| dbg.read_memory_bytes(addr, size))
        } else {
            Ok(self.noc_read(addr, size)?)
        }
    }

    /// Run `f` against this core, halted, with debug mode enabled.
    ///
    /// A running core is halted for `f` and resumed afterwards. A core held
    /// in reset is parked at its start address and goes back into reset
    /// after `f`.
    pub fn with_debug_access<T>(
        &self,
        f: impl FnOnce(&RiscDebug<'a>) -> Result<T, DebugError>,
    ) -> Result<T, LoadError> {
        if !self.debug.is_in_reset()? {
            self.debug.enable_debug()?;
            return Ok(self.debug.ensure_halted(f)?);
        }
        let start = self.start_address()?;
        self.with_parked(&self.debug, start, f)
    }

    /// Run `f` against a halted brisc of the same tile.
    ///
    /// A brisc held in reset is parked at address 0 for the duration.
    pub fn with_brisc_proxy<T>(
        &self,
        f: impl FnOnce(&RiscDebug<'a>) -> Result<T, DebugError>,
    ) -> Result<T, LoadError> {
        let brisc = self.debug.sibling(RiscId::Brisc);
        if !brisc.is_in_reset()? {
            return Ok(brisc.ensure_halted(f)?);
        }
        self.with_parked(&brisc, 0, f)
    }

    /// Release `core` from reset into a `jal 0` loop written at `start`,
    /// halt it, run `f`, and put it back into reset.
    ///
    /// The word at `start` is restored as soon as the core is halted, so
    /// `f` sees memory as it was and may overwrite it.
    fn with_parked<T>(
        &self,
        core: &RiscDebug<'a>,
        start: u64,
        f: impl FnOnce(&RiscDebug<'a>) -> Result<T, DebugError>,
    ) -> Result<T, LoadError> {
        log::debug!("{}: parking at 0x{:08X}", core.loc(), start);
        let saved = self.noc_read(start, 4)?;
        self.noc_write(start, &loop_instruction().to_le_bytes())?;
        core.set_reset_signal(false)?;

        let parked = core.enable_debug().and_then(|()| core.halt());
        let restored = self.noc_write(start, &saved);
        let result = match (parked, restored) {
            (Ok(_), Ok(())) => f(core).map_err(LoadError::from),
            (Err(e), _) => Err(e.into()),
            (Ok(_), Err(e)) => Err(e.into()),
        };

        let reset = core.set_reset_signal(true);
        let value = result?;
        reset?;
        Ok(value)
    }

    /// Address the core starts executing at when released from reset.
    pub fn start_address(&self) -> Result<u64, LoadError> {
        let risc = self.debug.loc().risc_id;
        let device = self.debug.device();
        let Some(start) = device.arch().debug.start_pc[risc.id() as usize] else {
            return Ok(0);
        };
        let reg = device.register(start.pc_register)?;
        let raw = self.with_brisc_proxy(|brisc| brisc.read_memory(reg.address))?;
        Ok(reg.extract(raw) as u64)
    }

    /// Program the address the core starts at on reset release.
    pub fn set_start_address(&self, entry: u64) -> Result<(), LoadError> {
        let risc = self.debug.loc().risc_id;
        let device = self.debug.device();
        let Some(start) = device.arch().debug.start_pc[risc.id() as usize] else {
            if entry != 0 {
                let jump = jal_instruction(entry as i64)?;
                self.noc_write(0, &jump.to_le_bytes())?;
            }
            return Ok(());
        };

        let pc = device.register(start.pc_register)?;
        let overrides = device.register(start.override_register)?;
        self.with_brisc_proxy(|brisc| {
            brisc.write_memory(pc.address, pc.insert(0, entry as u32))?;
            let raw = brisc.read_memory(overrides.address)?;
            let bit = 1u32 << (overrides.shift + start.override_bit);
            brisc.write_memory(overrides.address, raw | bit)
        })?;
        log::debug!("{}: start address 0x{:08X}", self.debug.loc(), entry);
        Ok(())
    }

    /// Fetch an ELF through the communicator and load it.
    pub fn load_elf(&self, path: &str) -> Result<LoadReport, LoadError> {
        let data = self.debug.comm().get_binary(path)?;
        log::info!("{}: loading {} ({} bytes)", self.debug.loc(), path, data.len());
        self.load_elf_bytes(&data)
    }

    pub fn load_elf_bytes(&self, data: &[u8]) -> Result<LoadReport, LoadError> {
        let elf = RiscElf::parse(data)?;
        let sections: Vec<ElfSection<'_>> = elf
            .sections()?
            .into_iter()
            .filter(|s| LOADED_SECTIONS.contains(&s.name))
            .collect();

        if let Some(bad) = sections.iter().find(|s| s.address % 4 != 0) {
            return Err(LoadError::Misaligned {
                section: bad.name.to_string(),
                address: bad.address,
            });
        }

        let mut report = LoadReport {
            elf_entry: elf.entry_point(),
            ..LoadReport::default()
        };
        for section in &sections {
            let via_debug = self.is_private(section.address);
            log::info!(
                "{}: {} -> 0x{:08X} ({} bytes{})",
                self.debug.loc(),
                section.name,
                section.address,
                section.data.len(),
                if via_debug { ", debug port" } else { "" }
            );
            self.write_block(section.address, section.data)?;

            let readback = self.read_block(section.address, section.data.len())?;
            if let Some(offset) = readback
                .iter()
                .zip(section.data)
                .position(|(got, want)| got != want)
            {
                log::warn!(
                    "{}: {} read back differs at offset {}",
                    self.debug.loc(),
                    section.name,
                    offset
                );
                report.failures.push(VerifyFailure {
                    section: section.name.to_string(),
                    address: section.address,
                    first_mismatch: offset,
                });
            }

            if section.name == ".init" {
                report.entry = Some(section.address);
            }
            report.sections.push(LoadedSection {
                name: section.name.to_string(),
                address: section.address,
                size: section.data.len(),
                via_debug,
            });
        }
        Ok(report)
    }

    /// Hold the core in reset, load the image, program its start address
    /// and release it.
    pub fn run_elf(&self, path: &str) -> Result<LoadReport, LoadError> {
        let data = self.debug.comm().get_binary(path)?;
        self.run_elf_bytes(&data)
    }

    pub fn run_elf_bytes(&self, data: &[u8]) -> Result<LoadReport, LoadError> {
        if !self.debug.is_in_reset()? {
            self.debug.set_reset_signal(true)?;
        }
        let report = self.load_elf_bytes(data)?;
        self.set_start_address(report.start_address())?;
        self.debug.set_reset_signal(false)?;
        log::info!(
            "{}: running from 0x{:08X}",
            self.debug.loc(),
            report.start_address()
        );
        Ok(report)
    }
}
