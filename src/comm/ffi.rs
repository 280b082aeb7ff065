//! Native driver binding through the C ABI.
//!
//! Links against `libttdriver`, which owns the PCIe and JTAG transports.
//! Every driver call returns a status code; [`STATUS_OK`] means success
//! and [`STATUS_UNSUPPORTED`] means the driver lacks the operation.
//!
//! # Safety
//! The driver handle is opaque and only ever used from behind the mutex in
//! [`DirectCommunicator`](super::DirectCommunicator). Strings returned by
//! the driver are owned by it and stay valid until the next call.

use std::ffi::{c_char, c_int, c_void, CStr};

use super::{CommError, NativeBinding};

pub const STATUS_OK: c_int = 0;
pub const STATUS_UNSUPPORTED: c_int = 1;

const MAX_DEVICES: usize = 64;

#[link(name = "ttdriver")]
extern "C" {
    fn ttd_open() -> *mut c_void;
    fn ttd_close(handle: *mut c_void);
    fn ttd_pci_read32(h: *mut c_void, chip: u8, noc: u8, x: u8, y: u8, addr: u64, out: *mut u32) -> c_int;
    fn ttd_pci_write32(h: *mut c_void, chip: u8, noc: u8, x: u8, y: u8, addr: u64, data: u32) -> c_int;
    fn ttd_pci_read(h: *mut c_void, chip: u8, noc: u8, x: u8, y: u8, addr: u64, buf: *mut u8, size: u32) -> c_int;
    fn ttd_pci_write(h: *mut c_void, chip: u8, noc: u8, x: u8, y: u8, addr: u64, buf: *const u8, size: u32) -> c_int;
    fn ttd_pci_read32_raw(h: *mut c_void, chip: u8, addr: u64, out: *mut u32) -> c_int;
    fn ttd_pci_write32_raw(h: *mut c_void, chip: u8, addr: u64, data: u32) -> c_int;
    fn ttd_dma_buffer_read32(h: *mut c_void, chip: u8, addr: u64, channel: u32, out: *mut u32) -> c_int;
    fn ttd_device_ids(h: *mut c_void, out: *mut u8, capacity: u32, count: *mut u32) -> c_int;
    fn ttd_device_arch(h: *mut c_void, chip: u8, out: *mut *const c_char) -> c_int;
    fn ttd_device_soc_description(h: *mut c_void, chip: u8, out: *mut *const c_char) -> c_int;
    fn ttd_cluster_description(h: *mut c_void, out: *mut *const c_char) -> c_int;
    fn ttd_arc_msg(
        h: *mut c_void,
        chip: u8,
        msg_code: u32,
        wait_for_done: u8,
        arg0: u32,
        arg1: u32,
        timeout_ms: u32,
        out: *mut u32,
    ) -> c_int;
    fn ttd_jtag_read32(h: *mut c_void, chip: u8, x: u8, y: u8, addr: u64, out: *mut u32) -> c_int;
    fn ttd_jtag_write32(h: *mut c_void, chip: u8, x: u8, y: u8, addr: u64, data: u32) -> c_int;
}

/// Handle to the native driver.
pub struct FfiBinding {
    handle: *mut c_void,
}

// The handle is never shared; DirectCommunicator serializes all calls.
unsafe impl Send for FfiBinding {}

fn check(op: &str, status: c_int) -> Result<(), CommError> {
    match status {
        STATUS_OK => Ok(()),
        STATUS_UNSUPPORTED => Err(CommError::not_supported(op)),
        status => {
            log::error!("Driver call {} failed with status {}", op, status);
            Err(CommError::Driver { op: op.to_string(), status })
        }
    }
}

/// Copy a driver-owned C string.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn driver_string(op: &str, ptr: *const c_char) -> Result<String, CommError> {
    if ptr.is_null() {
        return Err(CommError::Protocol(format!("driver returned no string for {}", op)));
    }
    Ok(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

impl FfiBinding {
    /// Open the driver and enumerate local chips.
    pub fn open() -> Result<Self, CommError> {
        // SAFETY: no preconditions; a null return means no device.
        let handle = unsafe { ttd_open() };
        if handle.is_null() {
            return Err(CommError::Driver { op: "open".to_string(), status: -1 });
        }
        log::info!("Opened native device driver");
        Ok(Self { handle })
    }

    fn read_word(
        &mut self,
        op: &str,
        f: impl FnOnce(*mut c_void, *mut u32) -> c_int,
    ) -> Result<u32, CommError> {
        let mut out = 0u32;
        check(op, f(self.handle, &mut out))?;
        Ok(out)
    }

    fn read_string(
        &mut self,
        op: &str,
        f: impl FnOnce(*mut c_void, *mut *const c_char) -> c_int,
    ) -> Result<String, CommError> {
        let mut out: *const c_char = std::ptr::null();
        check(op, f(self.handle, &mut out))?;
        // SAFETY: on success the driver stores a valid C string in `out`.
        unsafe { driver_string(op, out) }
    }
}

impl Drop for FfiBinding {
    fn drop(&mut self) {
        // SAFETY: handle came from ttd_open and is closed exactly once.
        unsafe { ttd_close(self.handle) }
    }
}

impl NativeBinding for FfiBinding {
    fn pci_read32(&mut self, chip: u8, noc_id: u8, x: u8, y: u8, addr: u64)
        -> Result<u32, CommError> {
        // SAFETY: `out` points to a live u32 for the duration of the call.
        self.read_word("pci_read32", |h, out| unsafe {
            ttd_pci_read32(h, chip, noc_id, x, y, addr, out)
        })
    }

    fn pci_write32(&mut self, chip: u8, noc_id: u8, x: u8, y: u8, addr: u64, data: u32)
        -> Result<(), CommError> {
        // SAFETY: plain value arguments.
        check("pci_write32", unsafe { ttd_pci_write32(self.handle, chip, noc_id, x, y, addr, data) })
    }

    fn pci_read(&mut self, chip: u8, noc_id: u8, x: u8, y: u8, addr: u64, size: u32)
        -> Result<Vec<u8>, CommError> {
        let mut buf = vec![0u8; size as usize];
        // SAFETY: `buf` holds exactly `size` bytes.
        let status = unsafe { ttd_pci_read(self.handle, chip, noc_id, x, y, addr, buf.as_mut_ptr(), size) };
        check("pci_read", status)?;
        Ok(buf)
    }

    fn pci_write(&mut self, chip: u8, noc_id: u8, x: u8, y: u8, addr: u64, data: &[u8])
        -> Result<(), CommError> {
        // SAFETY: `data` is valid for `data.len()` bytes.
        let status = unsafe {
            ttd_pci_write(self.handle, chip, noc_id, x, y, addr, data.as_ptr(), data.len() as u32)
        };
        check("pci_write", status)
    }

    fn device_ids(&mut self) -> Result<Vec<u8>, CommError> {
        let mut ids = vec![0u8; MAX_DEVICES];
        let mut count = 0u32;
        // SAFETY: `ids` has MAX_DEVICES bytes of capacity.
        let status = unsafe { ttd_device_ids(self.handle, ids.as_mut_ptr(), MAX_DEVICES as u32, &mut count) };
        check("get_device_ids", status)?;
        ids.truncate((count as usize).min(MAX_DEVICES));
        Ok(ids)
    }

    fn device_arch(&mut self, chip: u8) -> Result<String, CommError> {
        // SAFETY: `out` is a valid pointer slot.
        self.read_string("get_device_arch", |h, out| unsafe { ttd_device_arch(h, chip, out) })
    }

    fn cluster_description(&mut self) -> Result<String, CommError> {
        // SAFETY: `out` is a valid pointer slot.
        self.read_string("get_cluster_description", |h, out| unsafe { ttd_cluster_description(h, out) })
    }

    fn device_soc_description(&mut self, chip: u8) -> Result<String, CommError> {
        // SAFETY: `out` is a valid pointer slot.
        self.read_string("get_device_soc_description", |h, out| unsafe {
            ttd_device_soc_description(h, chip, out)
        })
    }

    fn pci_read32_raw(&mut self, chip: u8, addr: u64) -> Result<u32, CommError> {
        // SAFETY: `out` points to a live u32.
        self.read_word("pci_read32_raw", |h, out| unsafe { ttd_pci_read32_raw(h, chip, addr, out) })
    }

    fn pci_write32_raw(&mut self, chip: u8, addr: u64, data: u32) -> Result<(), CommError> {
        // SAFETY: plain value arguments.
        check("pci_write32_raw", unsafe { ttd_pci_write32_raw(self.handle, chip, addr, data) })
    }

    fn dma_buffer_read32(&mut self, chip: u8, addr: u64, channel: u32)
        -> Result<u32, CommError> {
        // SAFETY: `out` points to a live u32.
        self.read_word("dma_buffer_read32", |h, out| unsafe {
            ttd_dma_buffer_read32(h, chip, addr, channel, out)
        })
    }

    fn arc_msg(
        &mut self,
        chip: u8,
        msg_code: u32,
        wait_for_done: bool,
        arg0: u32,
        arg1: u32,
        timeout_ms: u32,
    ) -> Result<Vec<u32>, CommError> {
        // Status word plus two return values.
        let mut out = [0u32; 3];
        // SAFETY: `out` holds the three words the driver writes.
        let status = unsafe {
            ttd_arc_msg(
                self.handle,
                chip,
                msg_code,
                wait_for_done as u8,
                arg0,
                arg1,
                timeout_ms,
                out.as_mut_ptr(),
            )
        };
        check("arc_msg", status)?;
        Ok(out.to_vec())
    }

    fn jtag_read32(&mut self, chip: u8, x: u8, y: u8, addr: u64) -> Result<u32, CommError> {
        // SAFETY: `out` points to a live u32.
        self.read_word("jtag_read32", |h, out| unsafe { ttd_jtag_read32(h, chip, x, y, addr, out) })
    }

    fn jtag_write32(&mut self, chip: u8, x: u8, y: u8, addr: u64, data: u32)
        -> Result<(), CommError> {
        // SAFETY: plain value arguments.
        check("jtag_write32", unsafe { ttd_jtag_write32(self.handle, chip, x, y, addr, data) })
    }
}

