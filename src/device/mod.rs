//! Devices: one enumerated chip with its coordinate tables and register map.
//!
//! A [`Device`] is immutable once built. Harvesting is fixed at boot, so
//! the tables are computed once at enumeration time and shared by every
//! coordinate and debug handle that refers to the chip.
//!
//! Devices never own a communicator. Operations that touch hardware take
//! one as a parameter, which keeps the registry free of back references.

use crate::arch::{ArchSpec, RegisterDesc};
use crate::comm::{CommError, Communicator};
use crate::coords::{CoordError, CoordSystem, CoordTables, CoreType, OnChipCoordinate};

/// ARC test message and its handshake tag.
pub const ARC_TEST_MSG: u32 = 0xAA99;
pub const ARC_TEST_TAG: u32 = 0xAB_CDEF;
const ARC_MSG_TIMEOUT_MS: u32 = 1000;

/// Errors raised by device register access.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("{arch} has no register named '{name}'")]
    UnknownRegister { arch: &'static str, name: String },

    #[error(transparent)]
    Coord(#[from] CoordError),

    #[error(transparent)]
    Comm(#[from] CommError),
}

/// One chip in the cluster.
#[derive(Debug)]
pub struct Device {
    id: u8,
    arch: &'static ArchSpec,
    harvest_mask: u32,
    has_mmio: bool,
    has_jtag: bool,
    tables: CoordTables,
}

impl Device {
    pub fn new(
        id: u8,
        arch: &'static ArchSpec,
        harvest_mask: u32,
        has_mmio: bool,
        has_jtag: bool,
    ) -> Result<Self, CoordError> {
        let tables = CoordTables::build(arch, harvest_mask)?;
        log::debug!(
            "Device {}: {} harvest_mask=0x{:X} mmio={} jtag={}",
            id,
            arch.name,
            harvest_mask,
            has_mmio,
            has_jtag
        );
        Ok(Self { id, arch, harvest_mask, has_mmio, has_jtag, tables })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn arch(&self) -> &'static ArchSpec {
        self.arch
    }

    pub fn harvest_mask(&self) -> u32 {
        self.harvest_mask
    }

    /// Whether the host reaches this chip directly over PCIe.
    pub fn has_mmio(&self) -> bool {
        self.has_mmio
    }

    pub fn has_jtag(&self) -> bool {
        self.has_jtag
    }

    pub fn tables(&self) -> &CoordTables {
        &self.tables
    }

    /// Parse a coordinate literal on this device.
    pub fn coord(&self, literal: &str) -> Result<OnChipCoordinate, CoordError> {
        OnChipCoordinate::create(literal, self)
    }

    pub fn core_type(&self, coord: &OnChipCoordinate) -> CoreType {
        self.tables.core_type(coord.noc0())
    }

    pub fn is_harvested(&self, coord: &OnChipCoordinate) -> bool {
        self.tables.is_harvested(coord.noc0())
    }

    /// All tiles of one type, row-major in NoC0. Tensix excludes harvested tiles.
    pub fn block_locations(&self, core_type: CoreType) -> Vec<OnChipCoordinate> {
        self.tables
            .block_locations(core_type)
            .into_iter()
            .filter_map(|(x, y)| OnChipCoordinate::new(x, y, CoordSystem::Noc0, self).ok())
            .collect()
    }

    pub fn harvested_locations(&self) -> Vec<OnChipCoordinate> {
        self.tables
            .harvested_locations()
            .into_iter()
            .filter_map(|(x, y)| OnChipCoordinate::new(x, y, CoordSystem::Noc0, self).ok())
            .collect()
    }

    /// Position of a tile as seen by NoC `noc_id`.
    pub fn noc_position(&self, coord: &OnChipCoordinate, noc_id: u8) -> (u8, u8) {
        let (x, y) = coord.noc0();
        if noc_id == 0 {
            (x, y)
        } else {
            let (w, h) = self.tables.grid_size();
            (w - 1 - x, h - 1 - y)
        }
    }

    // ========================================================================
    // Registers
    // ========================================================================

    pub fn register(&self, name: &str) -> Result<&'static RegisterDesc, DeviceError> {
        self.arch.register(name).ok_or_else(|| DeviceError::UnknownRegister {
            arch: self.arch.name,
            name: name.to_string(),
        })
    }

    /// Read a named register field over NoC.
    pub fn read_register(
        &self,
        comm: &dyn Communicator,
        coord: &OnChipCoordinate,
        noc_id: u8,
        name: &str,
    ) -> Result<u32, DeviceError> {
        let reg = self.register(name)?;
        let (x, y) = self.noc_position(coord, noc_id);
        let raw = comm.pci_read32(self.id, noc_id, x, y, reg.address)?;
        Ok(reg.extract(raw))
    }

    /// Write a named register field over NoC, preserving bits outside the field.
    pub fn write_register(
        &self,
        comm: &dyn Communicator,
        coord: &OnChipCoordinate,
        noc_id: u8,
        name: &str,
        value: u32,
    ) -> Result<(), DeviceError> {
        let reg = self.register(name)?;
        let (x, y) = self.noc_position(coord, noc_id);
        let raw = if reg.mask == u32::MAX {
            0
        } else {
            comm.pci_read32(self.id, noc_id, x, y, reg.address)?
        };
        comm.pci_write32(self.id, noc_id, x, y, reg.address, reg.insert(raw, value))?;
        Ok(())
    }

    /// Send the ARC test message and check that firmware answers.
    pub fn arc_ping(&self, comm: &dyn Communicator) -> Result<bool, CommError> {
        let reply = comm.arc_msg(
            self.id,
            ARC_TEST_MSG,
            true,
            ARC_TEST_TAG >> 8,
            ARC_TEST_TAG & 0xFF,
            ARC_MSG_TIMEOUT_MS,
        )?;
        let alive = reply.first() == Some(&0);
        log::debug!("Device {}: ARC ping reply {:?} alive={}", self.id, reply, alive);
        Ok(alive)
    }

    /// Print a short summary to stdout.
    pub fn print_summary(&self) {
        let (w, h) = self.tables.grid_size();
        let (lw, lh) = self.tables.logical_tensix_size();
        println!("Device {}: {}", self.id, self.arch.name);
        println!("  NoC grid:      {}x{}", w, h);
        println!("  Tensix grid:   {}x{} (logical)", lw, lh);
        println!("  Harvest mask:  0x{:X} lines {:?}", self.harvest_mask, self.tables.harvested_lines());
        println!("  MMIO: {}  JTAG: {}", self.has_mmio, self.has_jtag);
        for core_type in [CoreType::Dram, CoreType::Eth, CoreType::Pcie, CoreType::Arc] {
            let tiles = self.block_locations(core_type);
            if tiles.is_empty() {
                continue;
            }
            let names: Vec<String> = tiles.iter().map(|c| c.to_string()).collect();
            println!("  {:<6} {}", core_type, names.join(" "));
        }
    }
}
