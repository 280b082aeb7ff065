//! Session context: the communicator plus the devices behind it.
//!
//! Devices are enumerated once, on first use, from `device_ids`,
//! `device_arch` and the cluster description. Everything in the library
//! takes a context (or a device and communicator) explicitly; the process
//! default set with [`set_default`] is a convenience for front ends.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use serde::Deserialize;

use crate::arch::ArchTag;
use crate::comm::{CacheMode, CachedCommunicator, CommError, Communicator, RemoteCommunicator};
use crate::config::Config;
use crate::coords::{CoordError, OnChipCoordinate};
use crate::debug::{DebugConfig, RiscDebug, RiscLoc};
use crate::device::Device;
use crate::loader::RiscLoader;

static DEFAULT: OnceLock<Context> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("invalid cluster description: {0}")]
    ClusterDescription(#[from] serde_yaml::Error),

    #[error("device {device} reports unknown architecture '{arch}'")]
    UnknownArch { device: u8, arch: String },

    #[error("no device with id {0}")]
    UnknownDevice(u8),

    #[error("no backend: set a remote server or build with the `native` feature")]
    NoBackend,

    #[error("a default context is already set")]
    DefaultAlreadySet,

    #[error(transparent)]
    Comm(#[from] CommError),

    #[error(transparent)]
    Coord(#[from] CoordError),
}

/// Cluster description as produced by the driver.
///
/// ```yaml
/// arch: {0: wormhole_b0, 1: wormhole_b0}
/// chips_with_mmio: [{0: 0}]
/// chips_with_jtag: [0]
/// harvesting: {0: {harvest_mask: 1}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClusterDescription {
    pub arch: BTreeMap<u8, String>,
    /// One map per PCIe-attached chip: chip id to PCI device number.
    pub chips_with_mmio: Vec<BTreeMap<u8, u32>>,
    pub chips_with_jtag: Vec<u8>,
    pub harvesting: BTreeMap<u8, HarvestEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HarvestEntry {
    pub harvest_mask: u32,
}

impl ClusterDescription {
    pub fn parse(text: &str) -> Result<Self, ContextError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn has_mmio(&self, id: u8) -> bool {
        self.chips_with_mmio.iter().any(|m| m.contains_key(&id))
    }

    pub fn has_jtag(&self, id: u8) -> bool {
        self.chips_with_jtag.contains(&id)
    }

    pub fn harvest_mask(&self, id: u8) -> u32 {
        self.harvesting.get(&id).map_or(0, |h| h.harvest_mask)
    }
}

/// A debugging session.
pub struct Context {
    comm: Arc<dyn Communicator>,
    debug: DebugConfig,
    devices: OnceLock<BTreeMap<u8, Device>>,
}

impl Context {
    pub fn new(comm: Arc<dyn Communicator>, debug: DebugConfig) -> Self {
        Self { comm, debug, devices: OnceLock::new() }
    }

    /// Build the communicator stack described by `config`.
    ///
    /// Replay needs nothing but the cache file. Otherwise the backend is the
    /// remote server when one is configured, else local hardware, wrapped
    /// in a recorder when recording.
    pub fn from_config(config: &Config) -> Result<Self, ContextError> {
        let debug = config.debug_config();
        let mode = config.cache_mode();

        if let (Some(path), Some(CacheMode::Replay)) = (&config.cache_path, mode) {
            log::info!("Replaying {}", path);
            return Ok(Self::new(Arc::new(CachedCommunicator::replay(path)?), debug));
        }

        let backend: Arc<dyn Communicator> = match &config.remote {
            Some(address) => Arc::new(RemoteCommunicator::connect(address.as_str())?),
            None => native_backend()?,
        };
        let comm: Arc<dyn Communicator> = match (&config.cache_path, mode) {
            (Some(path), Some(CacheMode::Record)) => {
                log::info!("Recording to {}", path);
                Arc::new(CachedCommunicator::record(backend, path)?)
            }
            _ => backend,
        };
        Ok(Self::new(comm, debug))
    }

    pub fn comm(&self) -> &dyn Communicator {
        &*self.comm
    }

    pub fn comm_arc(&self) -> Arc<dyn Communicator> {
        Arc::clone(&self.comm)
    }

    pub fn debug_config(&self) -> DebugConfig {
        self.debug
    }

    /// All devices, enumerated on first call.
    pub fn devices(&self) -> Result<&BTreeMap<u8, Device>, ContextError> {
        if let Some(devices) = self.devices.get() {
            return Ok(devices);
        }
        let devices = self.enumerate()?;
        Ok(self.devices.get_or_init(|| devices))
    }

    pub fn device(&self, id: u8) -> Result<&Device, ContextError> {
        self.devices()?.get(&id).ok_or(ContextError::UnknownDevice(id))
    }

    /// Parse a coordinate literal on device `id`.
    pub fn coord(&self, id: u8, literal: &str) -> Result<OnChipCoordinate, ContextError> {
        Ok(self.device(id)?.coord(literal)?)
    }

    /// Debug handle for one core.
    pub fn debug(&self, loc: RiscLoc) -> Result<RiscDebug<'_>, ContextError> {
        let device = self.device(loc.coord.device_id())?;
        Ok(RiscDebug::new(loc, device, self.comm(), self.debug))
    }

    pub fn loader(&self, loc: RiscLoc) -> Result<RiscLoader<'_>, ContextError> {
        Ok(RiscLoader::new(self.debug(loc)?))
    }

    fn enumerate(&self) -> Result<BTreeMap<u8, Device>, ContextError> {
        let description = ClusterDescription::parse(&self.comm.cluster_description()?)?;
        let mut devices = BTreeMap::new();
        for id in self.comm.device_ids()? {
            let arch_name = self.comm.device_arch(id)?;
            let arch: ArchTag = arch_name
                .parse()
                .map_err(|_| ContextError::UnknownArch { device: id, arch: arch_name.clone() })?;
            let device = Device::new(
                id,
                arch.spec(),
                description.harvest_mask(id),
                description.has_mmio(id),
                description.has_jtag(id),
            )?;
            devices.insert(id, device);
        }
        log::info!("Enumerated {} device(s)", devices.len());
        Ok(devices)
    }
}

#[cfg(feature = "native")]
fn native_backend() -> Result<Arc<dyn Communicator>, ContextError> {
    use crate::comm::{DirectCommunicator, FfiBinding};
    Ok(Arc::new(DirectCommunicator::new(FfiBinding::open()?)))
}

#[cfg(not(feature = "native"))]
fn native_backend() -> Result<Arc<dyn Communicator>, ContextError> {
    Err(ContextError::NoBackend)
}

/// Install the process-wide default context. Can be done once.
pub fn set_default(ctx: Context) -> Result<&'static Context, ContextError> {
    DEFAULT.set(ctx).map_err(|_| ContextError::DefaultAlreadySet)?;
    DEFAULT.get().ok_or(ContextError::DefaultAlreadySet)
}

/// The process-wide default context, if one was installed.
pub fn default() -> Option<&'static Context> {
    DEFAULT.get()
}
