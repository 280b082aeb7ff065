//! ttlens library
//!
//! Low-level debugger for Tenstorrent accelerators: coordinate translation
//! across NoC/die/virtual/translated/logical systems, run control of the
//! tensix RISC-V cores through their debug port, firmware loading, and
//! pluggable device access (local, remote, recorded).

pub mod arch;
pub mod comm;
pub mod config;
pub mod context;
pub mod coords;
pub mod debug;
pub mod device;
pub mod loader;

pub use arch::{ArchSpec, ArchTag};
pub use comm::{CommError, Communicator};
pub use config::Config;
pub use context::{Context, ContextError};
pub use coords::{CoordError, CoordSystem, CoreType, OnChipCoordinate};
pub use debug::{DebugConfig, DebugError, RiscDebug, RiscId, RiscLoc};
pub use device::Device;
pub use loader::{LoadError, LoadReport, RiscLoader};
