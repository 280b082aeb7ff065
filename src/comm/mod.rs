//! Device communicators.
//!
//! Everything above this module talks to hardware through the
//! [`Communicator`] trait. Backends:
//!
//! - [`DirectCommunicator`]: local hardware through a [`NativeBinding`]
//! - [`RemoteCommunicator`]: TCP client speaking the frame protocol in [`protocol`]
//! - [`Server`]: exposes any communicator over that same protocol
//! - [`CachedCommunicator`]: records calls of another backend, or replays
//!   a recording without any device
//!
//! # Example
//!
//! ```ignore
//! use ttlens::comm::{CachedCommunicator, Communicator, RemoteCommunicator};
//!
//! let remote = Arc::new(RemoteCommunicator::connect("localhost:5555")?);
//! let comm = CachedCommunicator::record(remote, "session.json")?;
//! let word = comm.pci_read32(0, 0, 1, 1, 0x0)?;
//! ```

pub mod cache;
pub mod direct;
#[cfg(feature = "native")]
pub mod ffi;
pub mod protocol;
pub mod remote;
pub mod server;

pub use cache::{CacheArg, CacheKey, CacheMode, CacheValue, CachedCommunicator};
pub use direct::{DirectCommunicator, NativeBinding};
#[cfg(feature = "native")]
pub use ffi::FfiBinding;
pub use remote::RemoteCommunicator;
pub use server::Server;

/// Errors raised by any communicator backend.
#[derive(Debug, thiserror::Error)]
pub enum CommError {
    #[error("server rejected the request as malformed")]
    BadRequest,

    #[error("'{op}' is not supported by this backend")]
    NotSupported { op: String },

    #[error("connection failure: {0}")]
    Connection(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no recorded result for {op}{args:?}")]
    CacheMiss { op: String, args: Vec<CacheArg> },

    #[error("'{op}' writes to the device; a replayed session is read-only")]
    ReadOnlyReplay { op: String },

    #[error("driver call '{op}' failed with status {status}")]
    Driver { op: String, status: i32 },

    #[error("cache file {path}: {reason}")]
    CacheFile { path: String, reason: String },

    #[error("cannot read '{path}': {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommError {
    pub fn not_supported(op: &str) -> Self {
        CommError::NotSupported { op: op.to_string() }
    }
}

/// Access to one or more chips.
///
/// Coordinates passed to the NoC calls are in the system of the NoC named
/// by `noc_id` (NoC0 or NoC1). Implementations serialize internally so a
/// single instance can be shared by every device of a process.
pub trait Communicator: Send + Sync {
    fn pci_read32(&self, chip: u8, noc_id: u8, x: u8, y: u8, addr: u64) -> Result<u32, CommError>;

    fn pci_write32(
        &self,
        chip: u8,
        noc_id: u8,
        x: u8,
        y: u8,
        addr: u64,
        data: u32,
    ) -> Result<(), CommError>;

    fn pci_read(
        &self,
        chip: u8,
        noc_id: u8,
        x: u8,
        y: u8,
        addr: u64,
        size: u32,
    ) -> Result<Vec<u8>, CommError>;

    fn pci_write(
        &self,
        chip: u8,
        noc_id: u8,
        x: u8,
        y: u8,
        addr: u64,
        data: &[u8],
    ) -> Result<(), CommError>;

    /// Read a word from the chip's PCI BAR, bypassing the NoC.
    fn pci_read32_raw(&self, chip: u8, addr: u64) -> Result<u32, CommError>;

    fn pci_write32_raw(&self, chip: u8, addr: u64, data: u32) -> Result<(), CommError>;

    fn dma_buffer_read32(&self, chip: u8, addr: u64, channel: u32) -> Result<u32, CommError>;

    /// Read a tile of tensor data and render it as text.
    #[allow(clippy::too_many_arguments)]
    fn pci_read_tile(
        &self,
        chip: u8,
        noc_id: u8,
        x: u8,
        y: u8,
        addr: u64,
        size: u32,
        data_format: u8,
    ) -> Result<String, CommError>;

    fn runtime_data(&self) -> Result<String, CommError>;

    /// Cluster description YAML.
    fn cluster_description(&self) -> Result<String, CommError>;

    fn harvester_coordinate_translation(&self, chip: u8) -> Result<String, CommError>;

    fn device_ids(&self) -> Result<Vec<u8>, CommError>;

    fn device_arch(&self, chip: u8) -> Result<String, CommError>;

    fn device_soc_description(&self, chip: u8) -> Result<String, CommError>;

    /// Send an ARC message. Returns the status word followed by return values.
    fn arc_msg(
        &self,
        chip: u8,
        msg_code: u32,
        wait_for_done: bool,
        arg0: u32,
        arg1: u32,
        timeout_ms: u32,
    ) -> Result<Vec<u32>, CommError>;

    fn jtag_read32(&self, chip: u8, x: u8, y: u8, addr: u64) -> Result<u32, CommError>;

    fn jtag_write32(&self, chip: u8, x: u8, y: u8, addr: u64, data: u32) -> Result<(), CommError>;

    fn jtag_read32_axi(&self, chip: u8, addr: u64) -> Result<u32, CommError>;

    fn jtag_write32_axi(&self, chip: u8, addr: u64, data: u32) -> Result<(), CommError>;

    fn get_file(&self, path: &str) -> Result<String, CommError>;

    fn get_binary(&self, path: &str) -> Result<Vec<u8>, CommError>;

    /// Directory of the active run, if any.
    fn run_dirpath(&self) -> Result<Option<String>, CommError>;
}
