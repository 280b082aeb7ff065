//! On-chip coordinates.
//!
//! A tile can be named in six systems. [`OnChipCoordinate`] always stores
//! the NoC0 pair plus the owning device id; every other system is computed
//! on demand through the device's [`CoordTables`].
//!
//! # Literal syntax
//!
//! | literal | meaning |
//! |---|---|
//! | `X-Y` | NoC0 if inside the grid, translated otherwise |
//! | `R,C` | logical tensix row R, column C |
//! | `eR,C` | logical row R, column C of core type `e` (`t`, `e`, `d`, `p`, `a`) |
//! | `chN` | DRAM channel N, subchannel 0 |
//!
//! # Example
//!
//! ```ignore
//! let coord = OnChipCoordinate::create("18-18", &device)?;
//! assert_eq!(coord.to(CoordSystem::Noc0, &device)?, (1, 1));
//! ```

mod tables;

pub use tables::CoordTables;

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::device::Device;

/// Errors raised by coordinate parsing and conversion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordError {
    #[error("cannot parse coordinate '{0}'")]
    Parse(String),

    #[error("device {device}: tile {noc0:?} has no {system} representation")]
    NoRepresentation {
        device: u8,
        noc0: (u8, u8),
        system: CoordSystem,
    },

    #[error("device {device}: {pos:?} does not name a tile in {system}")]
    OutOfGrid {
        device: u8,
        pos: (u8, u8),
        system: CoordSystem,
    },

    #[error("coordinate belongs to device {coord_device}, not device {device}")]
    UnknownDevice { device: u8, coord_device: u8 },

    #[error("unknown coordinate system '{0}'")]
    UnknownSystem(String),

    #[error("coordinate tables for tile {noc0:?} are inconsistent: {reason}")]
    InconsistentTables { noc0: (u8, u8), reason: String },

    #[error("harvest mask 0x{mask:X} has bits beyond the {lines} harvestable lines")]
    InvalidHarvestMask { mask: u32, lines: usize },
}

/// Coordinate systems a tile can be expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordSystem {
    Noc0,
    Noc1,
    Die,
    Virtual,
    Translated,
    Logical,
}

impl CoordSystem {
    pub const ALL: [CoordSystem; 6] = [
        CoordSystem::Noc0,
        CoordSystem::Noc1,
        CoordSystem::Die,
        CoordSystem::Virtual,
        CoordSystem::Translated,
        CoordSystem::Logical,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CoordSystem::Noc0 => "noc0",
            CoordSystem::Noc1 => "noc1",
            CoordSystem::Die => "die",
            CoordSystem::Virtual => "virtual",
            CoordSystem::Translated => "translated",
            CoordSystem::Logical => "logical",
        }
    }
}

impl FromStr for CoordSystem {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CoordSystem::ALL
            .into_iter()
            .find(|sys| sys.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoordError::UnknownSystem(s.to_string()))
    }
}

impl fmt::Display for CoordSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of block occupying a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CoreType {
    Tensix,
    Eth,
    Dram,
    Pcie,
    Arc,
    /// NoC router with no addressable block; no logical space.
    Router,
}

impl CoreType {
    /// Letter used in logical literals (`e0,3`).
    pub fn letter(&self) -> Option<char> {
        match self {
            CoreType::Tensix => Some('t'),
            CoreType::Eth => Some('e'),
            CoreType::Dram => Some('d'),
            CoreType::Pcie => Some('p'),
            CoreType::Arc => Some('a'),
            CoreType::Router => None,
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            't' => Some(CoreType::Tensix),
            'e' => Some(CoreType::Eth),
            'd' => Some(CoreType::Dram),
            'p' => Some(CoreType::Pcie),
            'a' => Some(CoreType::Arc),
            _ => None,
        }
    }
}

impl fmt::Display for CoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoreType::Tensix => "tensix",
            CoreType::Eth => "eth",
            CoreType::Dram => "dram",
            CoreType::Pcie => "pcie",
            CoreType::Arc => "arc",
            CoreType::Router => "router",
        };
        f.write_str(name)
    }
}

struct LiteralPatterns {
    noc: Regex,
    logical: Regex,
    dram_channel: Regex,
}

static PATTERNS: LazyLock<LiteralPatterns> = LazyLock::new(|| LiteralPatterns {
    noc: Regex::new(r"^(\d+)-(\d+)$").unwrap(),
    logical: Regex::new(r"^([A-Za-z])?(\d+),(\d+)$").unwrap(),
    dram_channel: Regex::new(r"^ch(\d+)$").unwrap(),
});

fn parse_u8(text: &str, literal: &str) -> Result<u8, CoordError> {
    text.parse().map_err(|_| CoordError::Parse(literal.to_string()))
}

/// A tile on one device, stored as its NoC0 position.
///
/// Equality, ordering and hashing use `(device id, x, y)` only, whatever
/// system the coordinate was created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OnChipCoordinate {
    device_id: u8,
    x: u8,
    y: u8,
}

impl OnChipCoordinate {
    /// Create a coordinate from a position in any system. Logical input is
    /// taken as tensix; see [`Self::from_logical`] for other core types.
    pub fn new(x: u8, y: u8, system: CoordSystem, device: &Device) -> Result<Self, CoordError> {
        let (nx, ny) = device
            .tables()
            .from_system((x, y), system)
            .ok_or(CoordError::OutOfGrid {
                device: device.id(),
                pos: (x, y),
                system,
            })?;
        Ok(Self { device_id: device.id(), x: nx, y: ny })
    }

    /// Create a coordinate from a logical pair of a given core type.
    pub fn from_logical(
        x: u8,
        y: u8,
        core_type: CoreType,
        device: &Device,
    ) -> Result<Self, CoordError> {
        let (nx, ny) = device
            .tables()
            .from_logical(core_type, (x, y))
            .ok_or(CoordError::OutOfGrid {
                device: device.id(),
                pos: (x, y),
                system: CoordSystem::Logical,
            })?;
        Ok(Self { device_id: device.id(), x: nx, y: ny })
    }

    /// Parse a coordinate literal against a device.
    pub fn create(literal: &str, device: &Device) -> Result<Self, CoordError> {
        let text = literal.trim();
        let patterns = &*PATTERNS;

        if let Some(caps) = patterns.noc.captures(text) {
            let x = parse_u8(&caps[1], literal)?;
            let y = parse_u8(&caps[2], literal)?;
            let system = if device.tables().in_grid(x, y) {
                CoordSystem::Noc0
            } else {
                CoordSystem::Translated
            };
            return Self::new(x, y, system, device);
        }

        if let Some(caps) = patterns.dram_channel.captures(text) {
            let channel = parse_u8(&caps[1], literal)?;
            return Self::from_logical(channel, 0, CoreType::Dram, device);
        }

        if let Some(caps) = patterns.logical.captures(text) {
            let core_type = match caps.get(1) {
                Some(m) => m
                    .as_str()
                    .chars()
                    .next()
                    .and_then(CoreType::from_letter)
                    .ok_or_else(|| CoordError::Parse(literal.to_string()))?,
                None => CoreType::Tensix,
            };
            let row = parse_u8(&caps[2], literal)?;
            let col = parse_u8(&caps[3], literal)?;
            return Self::from_logical(col, row, core_type, device);
        }

        Err(CoordError::Parse(literal.to_string()))
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    /// Canonical NoC0 pair.
    pub fn noc0(&self) -> (u8, u8) {
        (self.x, self.y)
    }

    /// Convert into `system` using the owning device's tables.
    pub fn to(&self, system: CoordSystem, device: &Device) -> Result<(u8, u8), CoordError> {
        if device.id() != self.device_id {
            return Err(CoordError::UnknownDevice {
                device: device.id(),
                coord_device: self.device_id,
            });
        }
        device
            .tables()
            .to_system(self.noc0(), system)
            .ok_or(CoordError::NoRepresentation {
                device: self.device_id,
                noc0: self.noc0(),
                system,
            })
    }

    /// Render as a literal that [`Self::create`] accepts back, where the
    /// system has one.
    pub fn to_user_string(&self, system: CoordSystem, device: &Device) -> Result<String, CoordError> {
        let (x, y) = self.to(system, device)?;
        Ok(match system {
            CoordSystem::Logical => match device.core_type(self) {
                CoreType::Tensix => format!("{},{}", y, x),
                other => format!("{}{},{}", other.letter().unwrap_or('?'), y, x),
            },
            _ => format!("{}-{}", x, y),
        })
    }
}

impl fmt::Display for OnChipCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.x, self.y)
    }
}
