mod common;

use common::{build_elf, jal, lui, lw, sim_context, sw, words_to_bytes, DEFAULT_START};
use ttlens::comm::CommError;
use ttlens::debug::{RiscId, RiscLoc};
use ttlens::loader::{loop_instruction, LoadError};
use ttlens::Context;

const TILE: (u8, u8) = (1, 1);

fn loc(ctx: &Context, risc: RiscId) -> RiscLoc {
    RiscLoc::new(ctx.coord(0, "0,0").unwrap(), 0, risc)
}

/// Store 0x87654000 to `addr_hi << 12`, then spin.
fn store_program(addr_hi: u32) -> Vec<u8> {
    words_to_bytes(&[lui(10, addr_hi), lui(11, 0x87654), sw(11, 10, 0), jal(0)])
}

fn start_brisc_loop(ctx: &Context) {
    let loader = ctx.loader(loc(ctx, RiscId::Brisc)).unwrap();
    loader.write_block(0, &loop_instruction().to_le_bytes()).unwrap();
    loader.debug().set_reset_signal(false).unwrap();
}

#[test]
fn test_misaligned_section_fails_before_any_write() {
    let (ctx, chip) = sim_context(0);
    let loader = ctx.loader(loc(&ctx, RiscId::Brisc)).unwrap();
    let elf = build_elf(0, &[(".init", 0x0, &[0x6F, 0, 0, 0]), (".text", 0x102, &[0; 8])]);

    let before = chip.noc_writes();
    let err = loader.load_elf_bytes(&elf).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Misaligned { ref section, address: 0x102 } if section == ".text"
    ));
    assert_eq!(chip.noc_writes(), before);
    assert_eq!(chip.peek(TILE, 0x0), 0);
}

#[test]
fn test_private_sections_use_debug_port() {
    let (ctx, chip) = sim_context(0);
    start_brisc_loop(&ctx);
    let loader = ctx.loader(loc(&ctx, RiscId::Brisc)).unwrap();

    let data = words_to_bytes(&[0x1111_2222, 0x3333_4444]);
    let elf = build_elf(
        0,
        &[
            (".text", 0x0, &loop_instruction().to_le_bytes()),
            (".ldm_data", 0xFFB0_0100, &data),
            (".comment", 0x0, b"GCC 12\0\0"),
        ],
    );
    let report = loader.load_elf_bytes(&elf).unwrap();

    assert!(report.is_verified());
    assert_eq!(report.entry, None);
    let names: Vec<_> = report.sections.iter().map(|s| (s.name.as_str(), s.via_debug)).collect();
    assert_eq!(names, vec![(".text", false), (".ldm_data", true)]);

    assert_eq!(chip.peek_private(TILE, 0, 0xFFB0_0104), 0x3333_4444);
    assert_eq!(chip.peek(TILE, 0xFFB0_0104), 0);
    // Halted only for the transfer.
    assert!(!loader.debug().is_halted().unwrap());
}

#[test]
fn test_private_section_on_core_in_reset() {
    let (ctx, chip) = sim_context(0);
    chip.poke(TILE, 0x0, &[0x1234_5678]);
    let loader = ctx.loader(loc(&ctx, RiscId::Brisc)).unwrap();
    let elf = build_elf(0, &[(".ldm_data", 0xFFB0_0000, &[1, 2, 3, 4])]);

    let report = loader.load_elf_bytes(&elf).unwrap();
    assert!(report.is_verified());
    assert!(report.sections[0].via_debug);
    assert_eq!(chip.peek_private(TILE, 0, 0xFFB0_0000), 0x0403_0201);

    // Parked for the transfer, then back into reset with memory intact.
    assert!(loader.debug().is_in_reset().unwrap());
    assert_eq!(chip.peek(TILE, 0x0), 0x1234_5678);
}

#[test]
fn test_run_elf_with_private_data() {
    let (ctx, chip) = sim_context(0);
    let loader = ctx.loader(loc(&ctx, RiscId::Brisc)).unwrap();
    // Copy the first private word to 0x10000, then spin.
    let program =
        words_to_bytes(&[lui(10, 0xFFB00), lw(11, 10, 0), lui(12, 0x10), sw(11, 12, 0), jal(0)]);
    let data = words_to_bytes(&[0xA5A5_0001, 0xA5A5_0002]);
    let elf = build_elf(0, &[(".text", 0x0, &program), (".ldm_data", 0xFFB0_0000, &data)]);

    let report = loader.run_elf_bytes(&elf).unwrap();
    assert!(report.is_verified());
    assert_eq!(report.sections.len(), 2);

    assert!(!loader.debug().is_in_reset().unwrap());
    assert_eq!(chip.peek_private(TILE, 0, 0xFFB0_0004), 0xA5A5_0002);
    assert_eq!(chip.peek(TILE, 0x0), lui(10, 0xFFB00));
    assert_eq!(chip.peek(TILE, 0x10000), 0xA5A5_0001);
}

#[test]
fn test_private_data_for_trisc_in_reset() {
    let (ctx, chip) = sim_context(0);
    let loader = ctx.loader(loc(&ctx, RiscId::Trisc2)).unwrap();
    let elf = build_elf(0, &[(".stack", 0xFFB0_0800, &[7; 8])]);

    loader.load_elf_bytes(&elf).unwrap();
    assert_eq!(chip.peek_private(TILE, 3, 0xFFB0_0804), 0x0707_0707);
    assert_eq!(chip.peek_private(TILE, 0, 0xFFB0_0804), 0);
    assert!(loader.debug().is_in_reset().unwrap());
    assert!(loader.debug().sibling(RiscId::Brisc).is_in_reset().unwrap());
    assert_eq!(chip.peek(TILE, DEFAULT_START[2] as u64), 0);
}

#[test]
fn test_verification_failure_is_reported() {
    let (ctx, chip) = sim_context(0);
    chip.stick(0x3004..0x3008);
    let loader = ctx.loader(loc(&ctx, RiscId::Brisc)).unwrap();

    let elf = build_elf(
        0,
        &[(".text", 0x3000, &[1, 2, 3, 4, 5, 6, 7, 8]), (".stack", 0x4000, &[9; 4])],
    );
    let report = loader.load_elf_bytes(&elf).unwrap();

    assert!(!report.is_verified());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].section, ".text");
    assert_eq!(report.failures[0].first_mismatch, 4);
    // Later sections are still loaded.
    assert_eq!(report.sections.len(), 2);
    assert_eq!(chip.peek(TILE, 0x4000), 0x0909_0909);
}

#[test]
fn test_run_elf_on_brisc_jumps_to_init() {
    let (ctx, chip) = sim_context(0);
    let loader = ctx.loader(loc(&ctx, RiscId::Brisc)).unwrap();
    let elf = build_elf(0x100, &[(".init", 0x100, &store_program(0x10))]);

    let report = loader.run_elf_bytes(&elf).unwrap();
    assert_eq!(report.entry, Some(0x100));
    assert_eq!(chip.peek(TILE, 0x0), jal(0x100));

    assert!(!loader.debug().is_in_reset().unwrap());
    assert!(!loader.debug().is_halted().unwrap());
    assert_eq!(chip.peek(TILE, 0x10000), 0x8765_4000);
}

#[test]
fn test_run_elf_on_trisc_programs_start_register() {
    let (ctx, chip) = sim_context(0);
    let loader = ctx.loader(loc(&ctx, RiscId::Trisc0)).unwrap();
    let elf = build_elf(0x7000, &[(".text", 0x7000, &store_program(0x20))]);

    let report = loader.run_elf_bytes(&elf).unwrap();
    assert_eq!(report.entry, None);
    assert_eq!(report.start_address(), 0x7000);

    assert!(!loader.debug().is_in_reset().unwrap());
    assert_eq!(chip.peek(TILE, 0x20000), 0x8765_4000);

    // Brisc was borrowed as a proxy and put back into reset.
    let brisc = loader.debug().sibling(RiscId::Brisc);
    assert!(brisc.is_in_reset().unwrap());
    assert_eq!(chip.peek(TILE, 0x0), 0);
    assert_eq!(loader.start_address().unwrap(), 0x7000);
}

#[test]
fn test_start_address_keeps_brisc_firmware() {
    let (ctx, chip) = sim_context(0);
    let firmware = store_program(0x30);
    chip.poke(TILE, 0x0, &[lui(10, 0x30), lui(11, 0x87654), sw(11, 10, 0), jal(0)]);
    let trisc = ctx.loader(loc(&ctx, RiscId::Trisc0)).unwrap();

    trisc.set_start_address(0x8000).unwrap();
    assert_eq!(trisc.start_address().unwrap(), 0x8000);

    let brisc = ctx.loader(loc(&ctx, RiscId::Brisc)).unwrap();
    assert!(brisc.debug().is_in_reset().unwrap());
    assert_eq!(brisc.read_block(0x0, firmware.len()).unwrap(), firmware);

    // The untouched firmware still runs.
    brisc.debug().set_reset_signal(false).unwrap();
    assert_eq!(chip.peek(TILE, 0x30000), 0x8765_4000);
}

#[test]
fn test_start_address() {
    let (ctx, _chip) = sim_context(0);
    let brisc = ctx.loader(loc(&ctx, RiscId::Brisc)).unwrap();
    assert_eq!(brisc.start_address().unwrap(), 0);

    // Brisc in reset: parked, used and put back.
    let trisc1 = ctx.loader(loc(&ctx, RiscId::Trisc1)).unwrap();
    assert_eq!(trisc1.start_address().unwrap(), DEFAULT_START[1] as u64);
    assert!(brisc.debug().is_in_reset().unwrap());

    // Brisc running: halted for the access and resumed.
    start_brisc_loop(&ctx);
    let ncrisc = ctx.loader(loc(&ctx, RiscId::Ncrisc)).unwrap();
    assert_eq!(ncrisc.start_address().unwrap(), DEFAULT_START[3] as u64);
    assert!(!brisc.debug().is_in_reset().unwrap());
    assert!(!brisc.debug().is_halted().unwrap());
}

#[test]
fn test_load_elf_from_path() {
    let (ctx, chip) = sim_context(0);
    let loader = ctx.loader(loc(&ctx, RiscId::Brisc)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("brisc.elf");
    std::fs::write(&path, build_elf(0, &[(".text", 0x0, &store_program(0x10))])).unwrap();

    let report = loader.load_elf(path.to_str().unwrap()).unwrap();
    assert_eq!(report.sections.len(), 1);
    assert_eq!(chip.peek(TILE, 0x0), lui(10, 0x10));

    let missing = dir.path().join("missing.elf");
    assert!(matches!(
        loader.load_elf(missing.to_str().unwrap()),
        Err(LoadError::Comm(CommError::File { .. }))
    ));
}

#[test]
fn test_rejects_non_riscv_image() {
    let (ctx, _chip) = sim_context(0);
    let loader = ctx.loader(loc(&ctx, RiscId::Brisc)).unwrap();
    let mut elf = build_elf(0, &[(".text", 0x0, &[0; 4])]);
    elf[18..20].copy_from_slice(&0x3Eu16.to_le_bytes());

    assert!(matches!(loader.load_elf_bytes(&elf), Err(LoadError::NotRiscv(_))));
}
