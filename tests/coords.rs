mod common;

use common::sim_context;
use ttlens::coords::{CoordError, CoordSystem, CoreType};

#[test]
fn test_translated_literal_round_trip() {
    let (ctx, _chip) = sim_context(0);
    let device = ctx.device(0).unwrap();

    let coord = device.coord("18-18").unwrap();
    assert_eq!(coord.to(CoordSystem::Logical, device).unwrap(), (0, 0));

    let back = device.coord("0,0").unwrap();
    assert_eq!(back, coord);
    assert_eq!(back.to(CoordSystem::Translated, device).unwrap(), (18, 18));
    assert_eq!(back.to(CoordSystem::Noc0, device).unwrap(), (1, 1));
}

#[test]
fn test_enumeration_applies_harvesting() {
    let (ctx, _chip) = sim_context(0b1);
    let device = ctx.device(0).unwrap();

    assert_eq!(device.harvest_mask(), 0b1);
    assert!(device.has_mmio());
    assert!(!device.has_jtag());
    assert_eq!(device.block_locations(CoreType::Tensix).len(), 72);
    assert_eq!(device.harvested_locations().len(), 8);

    // The first tensix row is gone, so logical row 0 moves down one NoC row.
    let first = device.coord("0,0").unwrap();
    assert_eq!(first.noc0(), (1, 2));
    assert_eq!(first.to(CoordSystem::Virtual, device).unwrap(), (1, 1));

    let harvested = device.coord("1-1").unwrap();
    assert!(device.is_harvested(&harvested));
    assert!(matches!(
        harvested.to(CoordSystem::Logical, device),
        Err(CoordError::NoRepresentation { .. })
    ));
}

#[test]
fn test_dram_and_unknown_device() {
    let (ctx, _chip) = sim_context(0);
    let device = ctx.device(0).unwrap();

    let dram = device.coord("ch0").unwrap();
    assert_eq!(device.core_type(&dram), CoreType::Dram);
    assert_eq!(dram.to_user_string(CoordSystem::Logical, device).unwrap(), "D0,0");

    assert!(ctx.device(3).is_err());
    assert!(matches!(device.coord("99-99"), Err(CoordError::OutOfGrid { .. })));
}

#[test]
fn test_arc_ping() {
    let (ctx, _chip) = sim_context(0);
    let device = ctx.device(0).unwrap();
    assert!(device.arc_ping(ctx.comm()).unwrap());
}
