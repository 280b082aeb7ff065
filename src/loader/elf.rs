//! RISC-V core ELF parser
//!
//! Firmware for the tensix cores is linked as ELF32 little-endian with
//! machine type EM_RISCV (243). Only section headers matter to the loader:
//! each allocated section is written at its own address, so program
//! headers are never consulted.
//!
//! # Example
//!
//! ```no_run
//! use ttlens::loader::RiscElf;
//!
//! let data = std::fs::read("brisc.elf")?;
//! let elf = RiscElf::parse(&data)?;
//!
//! println!("Entry point: 0x{:X}", elf.entry_point());
//! for section in elf.sections()? {
//!     println!("{} at 0x{:08X} ({} bytes)", section.name, section.address, section.data.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use goblin::elf::section_header::SHT_NOBITS;
use goblin::elf::Elf;

use super::LoadError;

/// RISC-V machine type in ELF header (e_machine field)
pub const EM_RISCV: u16 = 243;

/// A section carrying file data.
#[derive(Debug, Clone)]
pub struct ElfSection<'a> {
    pub name: &'a str,
    pub address: u64,
    pub data: &'a [u8],
}

/// A symbol from the symbol table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfSymbol {
    pub name: String,
    pub address: u64,
    pub size: u64,
    pub is_function: bool,
}

/// Parsed RISC-V ELF file
pub struct RiscElf<'a> {
    data: &'a [u8],
    elf: Elf<'a>,
}

impl std::fmt::Debug for RiscElf<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiscElf")
            .field("entry_point", &format_args!("0x{:08X}", self.entry_point()))
            .field("sections", &self.elf.section_headers.len())
            .field("data_len", &self.data.len())
            .finish()
    }
}

impl<'a> RiscElf<'a> {
    /// Parse a RISC-V ELF from raw bytes
    pub fn parse(data: &'a [u8]) -> Result<Self, LoadError> {
        let elf = Elf::parse(data)?;

        if elf.header.e_machine != EM_RISCV {
            return Err(LoadError::NotRiscv(format!(
                "machine type 0x{:X}, expected 0x{:X} (EM_RISCV)",
                elf.header.e_machine, EM_RISCV
            )));
        }
        if elf.is_64 {
            return Err(LoadError::NotRiscv("64-bit ELF, cores are RV32".to_string()));
        }
        if !elf.little_endian {
            return Err(LoadError::NotRiscv("big-endian ELF".to_string()));
        }

        Ok(Self { data, elf })
    }

    pub fn entry_point(&self) -> u64 {
        self.elf.header.e_entry
    }

    /// Sections with file contents, in header order. NOBITS and empty
    /// sections are skipped; one whose contents lie outside the file is an
    /// error.
    pub fn sections(&self) -> Result<Vec<ElfSection<'a>>, LoadError> {
        let mut sections = Vec::new();
        for (index, sh) in self.elf.section_headers.iter().enumerate() {
            if sh.sh_type == SHT_NOBITS || sh.sh_size == 0 {
                continue;
            }
            let name = self.elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("");
            let data = sh
                .check_size(self.data.len())
                .ok()
                .and_then(|()| self.data.get(sh.file_range()?))
                .ok_or_else(|| LoadError::SectionOutOfBounds {
                    section: if name.is_empty() { format!("#{}", index) } else { name.to_string() },
                    offset: sh.sh_offset,
                    size: sh.sh_size,
                    file_len: self.data.len(),
                })?;
            sections.push(ElfSection { name, address: sh.sh_addr, data });
        }
        Ok(sections)
    }

    pub fn section(&self, name: &str) -> Result<Option<ElfSection<'a>>, LoadError> {
        Ok(self.sections()?.into_iter().find(|s| s.name == name))
    }

    pub fn symbols(&self) -> impl Iterator<Item = ElfSymbol> + '_ {
        self.elf.syms.iter().filter_map(|sym| {
            let name = self.elf.strtab.get_at(sym.st_name)?;
            if name.is_empty() {
                return None;
            }
            Some(ElfSymbol {
                name: name.to_string(),
                address: sym.st_value,
                size: sym.st_size,
                is_function: sym.is_function(),
            })
        })
    }

    pub fn find_symbol(&self, name: &str) -> Option<ElfSymbol> {
        self.symbols().find(|s| s.name == name)
    }
}
