//! Local hardware access through a native driver binding.

use std::sync::{Mutex, MutexGuard};

use super::{CommError, Communicator};

/// Opaque transport to local chips.
///
/// Operations the driver lacks report [`CommError::NotSupported`], which
/// is what the provided defaults do. Only NoC access and enumeration are
/// mandatory.
pub trait NativeBinding: Send {
    fn pci_read32(&mut self, chip: u8, noc_id: u8, x: u8, y: u8, addr: u64)
        -> Result<u32, CommError>;

    fn pci_write32(&mut self, chip: u8, noc_id: u8, x: u8, y: u8, addr: u64, data: u32)
        -> Result<(), CommError>;

    fn pci_read(&mut self, chip: u8, noc_id: u8, x: u8, y: u8, addr: u64, size: u32)
        -> Result<Vec<u8>, CommError>;

    fn pci_write(&mut self, chip: u8, noc_id: u8, x: u8, y: u8, addr: u64, data: &[u8])
        -> Result<(), CommError>;

    fn device_ids(&mut self) -> Result<Vec<u8>, CommError>;

    fn device_arch(&mut self, chip: u8) -> Result<String, CommError>;

    fn cluster_description(&mut self) -> Result<String, CommError>;

    fn pci_read32_raw(&mut self, _chip: u8, _addr: u64) -> Result<u32, CommError> {
        Err(CommError::not_supported("pci_read32_raw"))
    }

    fn pci_write32_raw(&mut self, _chip: u8, _addr: u64, _data: u32) -> Result<(), CommError> {
        Err(CommError::not_supported("pci_write32_raw"))
    }

    fn dma_buffer_read32(&mut self, _chip: u8, _addr: u64, _channel: u32)
        -> Result<u32, CommError> {
        Err(CommError::not_supported("dma_buffer_read32"))
    }

    #[allow(clippy::too_many_arguments)]
    fn pci_read_tile(
        &mut self,
        _chip: u8,
        _noc_id: u8,
        _x: u8,
        _y: u8,
        _addr: u64,
        _size: u32,
        _data_format: u8,
    ) -> Result<String, CommError> {
        Err(CommError::not_supported("pci_read_tile"))
    }

    fn runtime_data(&mut self) -> Result<String, CommError> {
        Err(CommError::not_supported("get_runtime_data"))
    }

    fn harvester_coordinate_translation(&mut self, _chip: u8) -> Result<String, CommError> {
        Err(CommError::not_supported("get_harvester_coordinate_translation"))
    }

    fn device_soc_description(&mut self, _chip: u8) -> Result<String, CommError> {
        Err(CommError::not_supported("get_device_soc_description"))
    }

    fn arc_msg(
        &mut self,
        _chip: u8,
        _msg_code: u32,
        _wait_for_done: bool,
        _arg0: u32,
        _arg1: u32,
        _timeout_ms: u32,
    ) -> Result<Vec<u32>, CommError> {
        Err(CommError::not_supported("arc_msg"))
    }

    fn jtag_read32(&mut self, _chip: u8, _x: u8, _y: u8, _addr: u64) -> Result<u32, CommError> {
        Err(CommError::not_supported("jtag_read32"))
    }

    fn jtag_write32(&mut self, _chip: u8, _x: u8, _y: u8, _addr: u64, _data: u32)
        -> Result<(), CommError> {
        Err(CommError::not_supported("jtag_write32"))
    }

    fn jtag_read32_axi(&mut self, _chip: u8, _addr: u64) -> Result<u32, CommError> {
        Err(CommError::not_supported("jtag_read32_axi"))
    }

    fn jtag_write32_axi(&mut self, _chip: u8, _addr: u64, _data: u32) -> Result<(), CommError> {
        Err(CommError::not_supported("jtag_write32_axi"))
    }

    fn run_dirpath(&mut self) -> Result<Option<String>, CommError> {
        Ok(None)
    }
}

/// Communicator backed by a native binding in this process.
pub struct DirectCommunicator<B: NativeBinding> {
    binding: Mutex<B>,
}

impl<B: NativeBinding> DirectCommunicator<B> {
    pub fn new(binding: B) -> Self {
        Self { binding: Mutex::new(binding) }
    }

    fn binding(&self) -> MutexGuard<'_, B> {
        self.binding.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn call<T>(
        &self,
        op: &str,
        f: impl FnOnce(&mut B) -> Result<T, CommError>,
    ) -> Result<T, CommError> {
        log::trace!("direct: {}", op);
        f(&mut self.binding())
    }

    /// Consume the communicator and return its binding.
    pub fn into_inner(self) -> B {
        self.binding.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<B: NativeBinding> Communicator for DirectCommunicator<B> {
    fn pci_read32(&self, chip: u8, noc_id: u8, x: u8, y: u8, addr: u64) -> Result<u32, CommError> {
        self.call("pci_read32", |b| b.pci_read32(chip, noc_id, x, y, addr))
    }

    fn pci_write32(
        &self,
        chip: u8,
        noc_id: u8,
        x: u8,
        y: u8,
        addr: u64,
        data: u32,
    ) -> Result<(), CommError> {
        self.call("pci_write32", |b| b.pci_write32(chip, noc_id, x, y, addr, data))
    }

    fn pci_read(
        &self,
        chip: u8,
        noc_id: u8,
        x: u8,
        y: u8,
        addr: u64,
        size: u32,
    ) -> Result<Vec<u8>, CommError> {
        self.call("pci_read", |b| b.pci_read(chip, noc_id, x, y, addr, size))
    }

    fn pci_write(
        &self,
        chip: u8,
        noc_id: u8,
        x: u8,
        y: u8,
        addr: u64,
        data: &[u8],
    ) -> Result<(), CommError> {
        self.call("pci_write", |b| b.pci_write(chip, noc_id, x, y, addr, data))
    }

    fn pci_read32_raw(&self, chip: u8, addr: u64) -> Result<u32, CommError> {
        self.call("pci_read32_raw", |b| b.pci_read32_raw(chip, addr))
    }

    fn pci_write32_raw(&self, chip: u8, addr: u64, data: u32) -> Result<(), CommError> {
        self.call("pci_write32_raw", |b| b.pci_write32_raw(chip, addr, data))
    }

    fn dma_buffer_read32(&self, chip: u8, addr: u64, channel: u32) -> Result<u32, CommError> {
        self.call("dma_buffer_read32", |b| b.dma_buffer_read32(chip, addr, channel))
    }

    fn pci_read_tile(
        &self,
        chip: u8,
        noc_id: u8,
        x: u8,
        y: u8,
        addr: u64,
        size: u32,
        data_format: u8,
    ) -> Result<String, CommError> {
        self.call("pci_read_tile", |b| {
            b.pci_read_tile(chip, noc_id, x, y, addr, size, data_format)
        })
    }

    fn runtime_data(&self) -> Result<String, CommError> {
        self.call("get_runtime_data", |b| b.runtime_data())
    }

    fn cluster_description(&self) -> Result<String, CommError> {
        self.call("get_cluster_description", |b| b.cluster_description())
    }

    fn harvester_coordinate_translation(&self, chip: u8) -> Result<String, CommError> {
        self.call("get_harvester_coordinate_translation", |b| {
            b.harvester_coordinate_translation(chip)
        })
    }

    fn device_ids(&self) -> Result<Vec<u8>, CommError> {
        self.call("get_device_ids", |b| b.device_ids())
    }

    fn device_arch(&self, chip: u8) -> Result<String, CommError> {
        self.call("get_device_arch", |b| b.device_arch(chip))
    }

    fn device_soc_description(&self, chip: u8) -> Result<String, CommError> {
        self.call("get_device_soc_description", |b| b.device_soc_description(chip))
    }

    fn arc_msg(
        &self,
        chip: u8,
        msg_code: u32,
        wait_for_done: bool,
        arg0: u32,
        arg1: u32,
        timeout_ms: u32,
    ) -> Result<Vec<u32>, CommError> {
        self.call("arc_msg", |b| {
            b.arc_msg(chip, msg_code, wait_for_done, arg0, arg1, timeout_ms)
        })
    }

    fn jtag_read32(&self, chip: u8, x: u8, y: u8, addr: u64) -> Result<u32, CommError> {
        self.call("jtag_read32", |b| b.jtag_read32(chip, x, y, addr))
    }

    fn jtag_write32(&self, chip: u8, x: u8, y: u8, addr: u64, data: u32) -> Result<(), CommError> {
        self.call("jtag_write32", |b| b.jtag_write32(chip, x, y, addr, data))
    }

    fn jtag_read32_axi(&self, chip: u8, addr: u64) -> Result<u32, CommError> {
        self.call("jtag_read32_axi", |b| b.jtag_read32_axi(chip, addr))
    }

    fn jtag_write32_axi(&self, chip: u8, addr: u64, data: u32) -> Result<(), CommError> {
        self.call("jtag_write32_axi", |b| b.jtag_write32_axi(chip, addr, data))
    }

    fn get_file(&self, path: &str) -> Result<String, CommError> {
        log::trace!("direct: get_file {}", path);
        std::fs::read_to_string(path).map_err(|source| CommError::File {
            path: path.to_string(),
            source,
        })
    }

    fn get_binary(&self, path: &str) -> Result<Vec<u8>, CommError> {
        log::trace!("direct: get_binary {}", path);
        std::fs::read(path).map_err(|source| CommError::File {
            path: path.to_string(),
            source,
        })
    }

    fn run_dirpath(&self) -> Result<Option<String>, CommError> {
        self.call("get_run_dirpath", |b| b.run_dirpath())
    }
}
