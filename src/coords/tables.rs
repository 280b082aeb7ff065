//! Translation tables between the six coordinate systems of one device.
//!
//! Tables are built once from an [`ArchSpec`] and a harvest mask. Every
//! conversion goes through NoC0, which is the canonical form stored in an
//! [`OnChipCoordinate`](super::OnChipCoordinate).
//!
//! # Harvesting
//!
//! Bit `i` of the mask disables the `i`-th tensix line (row or column,
//! depending on the architecture) in ascending NoC0 order. Harvested tiles
//! keep their NoC0, NoC1 and die positions but leave logical space. In
//! virtual space the functioning lines are packed onto the lowest tensix
//! line positions and the harvested ones are pushed to the top.

use std::collections::HashMap;

use super::{CoordError, CoordSystem, CoreType};
use crate::arch::{ArchSpec, HarvestAxis};

/// Per-device coordinate tables.
#[derive(Debug, Clone)]
pub struct CoordTables {
    width: u8,
    height: u8,
    noc0_to_die_x: Vec<u8>,
    noc0_to_die_y: Vec<u8>,
    die_to_noc0_x: Vec<u8>,
    die_to_noc0_y: Vec<u8>,
    noc0_to_virtual_x: Vec<u8>,
    noc0_to_virtual_y: Vec<u8>,
    virtual_to_noc0_x: Vec<u8>,
    virtual_to_noc0_y: Vec<u8>,
    /// Core type of every NoC0 tile, row-major.
    core_types: Vec<CoreType>,
    /// Harvested tensix tiles, row-major, same indexing as `core_types`.
    harvested: Vec<bool>,
    harvested_lines: Vec<u8>,
    tensix_columns: Vec<u8>,
    tensix_rows: Vec<u8>,
    translated_origin: (u8, u8),
    to_translated: HashMap<(u8, u8), (u8, u8)>,
    from_translated: HashMap<(u8, u8), (u8, u8)>,
    to_logical: HashMap<(u8, u8), (CoreType, (u8, u8))>,
    from_logical: HashMap<(CoreType, (u8, u8)), (u8, u8)>,
    logical_tensix_size: (u8, u8),
}

fn invert(map: &[u8]) -> Vec<u8> {
    let mut inverse = vec![0; map.len()];
    for (from, &to) in map.iter().enumerate() {
        inverse[to as usize] = from as u8;
    }
    inverse
}

impl CoordTables {
    /// Build the tables for one chip.
    pub fn build(arch: &ArchSpec, harvest_mask: u32) -> Result<Self, CoordError> {
        let lines = arch.harvest_lines();
        if lines.len() < 32 && (harvest_mask >> lines.len()) != 0 {
            return Err(CoordError::InvalidHarvestMask {
                mask: harvest_mask,
                lines: lines.len(),
            });
        }

        let width = arch.grid_width;
        let height = arch.grid_height;

        let harvested_lines: Vec<u8> = lines
            .iter()
            .enumerate()
            .filter(|(i, _)| harvest_mask & (1 << i) != 0)
            .map(|(_, &line)| line)
            .collect();
        let functioning_lines: Vec<u8> = lines
            .iter()
            .copied()
            .filter(|line| !harvested_lines.contains(line))
            .collect();

        // Virtual compaction along the harvest axis, identity elsewhere.
        let axis_len = match arch.harvest_axis {
            HarvestAxis::Rows => height,
            HarvestAxis::Columns => width,
        };
        let mut axis_map: Vec<u8> = (0..axis_len).collect();
        for (slot, &line) in functioning_lines.iter().chain(harvested_lines.iter()).enumerate() {
            axis_map[line as usize] = lines[slot];
        }
        let (noc0_to_virtual_x, noc0_to_virtual_y) = match arch.harvest_axis {
            HarvestAxis::Rows => ((0..width).collect::<Vec<u8>>(), axis_map),
            HarvestAxis::Columns => (axis_map, (0..height).collect::<Vec<u8>>()),
        };

        let die_to_noc0_x = arch.die_to_noc0_x.to_vec();
        let die_to_noc0_y = arch.die_to_noc0_y.to_vec();

        let mut tables = Self {
            width,
            height,
            noc0_to_die_x: invert(&die_to_noc0_x),
            noc0_to_die_y: invert(&die_to_noc0_y),
            die_to_noc0_x,
            die_to_noc0_y,
            virtual_to_noc0_x: invert(&noc0_to_virtual_x),
            virtual_to_noc0_y: invert(&noc0_to_virtual_y),
            noc0_to_virtual_x,
            noc0_to_virtual_y,
            core_types: vec![CoreType::Router; width as usize * height as usize],
            harvested: vec![false; width as usize * height as usize],
            harvested_lines,
            tensix_columns: arch.tensix_columns.to_vec(),
            tensix_rows: arch.tensix_rows.to_vec(),
            translated_origin: arch.translated_origin,
            to_translated: HashMap::new(),
            from_translated: HashMap::new(),
            to_logical: HashMap::new(),
            from_logical: HashMap::new(),
            logical_tensix_size: (0, 0),
        };

        tables.place_blocks(arch);
        tables.build_logical(arch, &functioning_lines);
        tables.build_translated()?;

        log::debug!(
            "{} tables: {} harvested line(s) {:?}, logical tensix grid {}x{}",
            arch.name,
            tables.harvested_lines.len(),
            tables.harvested_lines,
            tables.logical_tensix_size.0,
            tables.logical_tensix_size.1
        );
        Ok(tables)
    }

    fn index(&self, x: u8, y: u8) -> usize {
        y as usize * self.width as usize + x as usize
    }

    fn place_blocks(&mut self, arch: &ArchSpec) {
        for &x in arch.tensix_columns {
            for &y in arch.tensix_rows {
                let idx = self.index(x, y);
                self.core_types[idx] = CoreType::Tensix;
                let line = match arch.harvest_axis {
                    HarvestAxis::Rows => y,
                    HarvestAxis::Columns => x,
                };
                self.harvested[idx] = self.harvested_lines.contains(&line);
            }
        }

        let singles = [
            (CoreType::Eth, arch.eth),
            (CoreType::Pcie, arch.pcie),
            (CoreType::Arc, arch.arc),
        ];
        for (core_type, tiles) in singles {
            for (i, &(x, y)) in tiles.iter().enumerate() {
                let idx = self.index(x, y);
                self.core_types[idx] = core_type;
                self.to_logical.insert((x, y), (core_type, (i as u8, 0)));
                self.from_logical.insert((core_type, (i as u8, 0)), (x, y));
            }
        }

        for (channel, tiles) in arch.dram_channels.iter().enumerate() {
            for (sub, &(x, y)) in tiles.iter().enumerate() {
                let idx = self.index(x, y);
                self.core_types[idx] = CoreType::Dram;
                let logical = (channel as u8, sub as u8);
                self.to_logical.insert((x, y), (CoreType::Dram, logical));
                self.from_logical.insert((CoreType::Dram, logical), (x, y));
            }
        }
    }

    fn build_logical(&mut self, arch: &ArchSpec, functioning_lines: &[u8]) {
        let (columns, rows): (Vec<u8>, Vec<u8>) = match arch.harvest_axis {
            HarvestAxis::Rows => (arch.tensix_columns.to_vec(), functioning_lines.to_vec()),
            HarvestAxis::Columns => (functioning_lines.to_vec(), arch.tensix_rows.to_vec()),
        };
        for (ly, &y) in rows.iter().enumerate() {
            for (lx, &x) in columns.iter().enumerate() {
                let logical = (lx as u8, ly as u8);
                self.to_logical.insert((x, y), (CoreType::Tensix, logical));
                self.from_logical.insert((CoreType::Tensix, logical), (x, y));
            }
        }
        self.logical_tensix_size = (columns.len() as u8, rows.len() as u8);
    }

    fn build_translated(&mut self) -> Result<(), CoordError> {
        let (ox, oy) = self.translated_origin;
        for y in 0..self.height {
            for x in 0..self.width {
                let vx = self.noc0_to_virtual_x[x as usize];
                let vy = self.noc0_to_virtual_y[y as usize];
                let translated = if self.core_types[self.index(x, y)] == CoreType::Tensix {
                    let col = self.tensix_columns.iter().position(|&c| c == vx);
                    let row = self.tensix_rows.iter().position(|&r| r == vy);
                    let (Some(col), Some(row)) = (col, row) else {
                        return Err(CoordError::InconsistentTables {
                            noc0: (x, y),
                            reason: format!("virtual ({}, {}) is not on a tensix line", vx, vy),
                        });
                    };
                    (ox + col as u8, oy + row as u8)
                } else {
                    (vx, vy)
                };
                self.to_translated.insert((x, y), translated);
                if let Some(other) = self.from_translated.insert(translated, (x, y)) {
                    return Err(CoordError::InconsistentTables {
                        noc0: (x, y),
                        reason: format!("translated {:?} already taken by {:?}", translated, other),
                    });
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// NoC0 grid dimensions `(width, height)`.
    pub fn grid_size(&self) -> (u8, u8) {
        (self.width, self.height)
    }

    /// Dimensions of the functioning tensix grid in logical space.
    pub fn logical_tensix_size(&self) -> (u8, u8) {
        self.logical_tensix_size
    }

    /// Harvested tensix lines in NoC0 order.
    pub fn harvested_lines(&self) -> &[u8] {
        &self.harvested_lines
    }

    pub fn in_grid(&self, x: u8, y: u8) -> bool {
        x < self.width && y < self.height
    }

    /// Core type of the tile at a NoC0 position.
    pub fn core_type(&self, noc0: (u8, u8)) -> CoreType {
        if self.in_grid(noc0.0, noc0.1) {
            self.core_types[self.index(noc0.0, noc0.1)]
        } else {
            CoreType::Router
        }
    }

    /// Check if a NoC0 tile belongs to a harvested tensix line.
    pub fn is_harvested(&self, noc0: (u8, u8)) -> bool {
        self.in_grid(noc0.0, noc0.1) && self.harvested[self.index(noc0.0, noc0.1)]
    }

    /// NoC0 positions of every tile of a type, row-major. Tensix excludes
    /// harvested tiles.
    pub fn block_locations(&self, core_type: CoreType) -> Vec<(u8, u8)> {
        let mut out = Vec::new();
        for y in 0..self.height {
            for x in 0..self.width {
                let idx = self.index(x, y);
                if self.core_types[idx] == core_type && !self.harvested[idx] {
                    out.push((x, y));
                }
            }
        }
        out
    }

    /// NoC0 positions of harvested tensix tiles, row-major.
    pub fn harvested_locations(&self) -> Vec<(u8, u8)> {
        let mut out = Vec::new();
        for y in 0..self.height {
            for x in 0..self.width {
                if self.harvested[self.index(x, y)] {
                    out.push((x, y));
                }
            }
        }
        out
    }

    /// Logical position and core type of a NoC0 tile, if it has one.
    pub fn logical(&self, noc0: (u8, u8)) -> Option<(CoreType, (u8, u8))> {
        self.to_logical.get(&noc0).copied()
    }

    /// NoC0 position of a logical coordinate.
    pub fn from_logical(&self, core_type: CoreType, logical: (u8, u8)) -> Option<(u8, u8)> {
        self.from_logical.get(&(core_type, logical)).copied()
    }

    /// Convert a NoC0 position into `system`. Logical yields the pair
    /// without its core type.
    pub fn to_system(&self, noc0: (u8, u8), system: CoordSystem) -> Option<(u8, u8)> {
        let (x, y) = noc0;
        if !self.in_grid(x, y) {
            return None;
        }
        match system {
            CoordSystem::Noc0 => Some((x, y)),
            CoordSystem::Noc1 => Some((self.width - 1 - x, self.height - 1 - y)),
            CoordSystem::Die => Some((self.noc0_to_die_x[x as usize], self.noc0_to_die_y[y as usize])),
            CoordSystem::Virtual => Some((
                self.noc0_to_virtual_x[x as usize],
                self.noc0_to_virtual_y[y as usize],
            )),
            CoordSystem::Translated => self.to_translated.get(&noc0).copied(),
            CoordSystem::Logical => self.logical(noc0).map(|(_, pos)| pos),
        }
    }

    /// Convert a position in `system` back to NoC0. Logical input is taken
    /// as a tensix coordinate; use [`Self::from_logical`] for other types.
    pub fn from_system(&self, pos: (u8, u8), system: CoordSystem) -> Option<(u8, u8)> {
        let (x, y) = pos;
        match system {
            CoordSystem::Translated => self.from_translated.get(&pos).copied(),
            CoordSystem::Logical => self.from_logical(CoreType::Tensix, pos),
            _ if !self.in_grid(x, y) => None,
            CoordSystem::Noc0 => Some(pos),
            CoordSystem::Noc1 => Some((self.width - 1 - x, self.height - 1 - y)),
            CoordSystem::Die => Some((self.die_to_noc0_x[x as usize], self.die_to_noc0_y[y as usize])),
            CoordSystem::Virtual => Some((
                self.virtual_to_noc0_x[x as usize],
                self.virtual_to_noc0_y[y as usize],
            )),
        }
    }
}
