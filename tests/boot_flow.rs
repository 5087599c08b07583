#![cfg(feature = "sim")]
use nor_xip_boot::boot::{application_attach, bootloader_bring_up, run_gate_or_halt};
use nor_xip_boot::boot_record::{BootType, SharedBootRecord};
use nor_xip_boot::config::{SECTOR_SIZE, XIP_PREAMBLE};
use nor_xip_boot::flash_map::{id_for_slot, AreaId, FlashMap, Slot, LAYOUT_2M, LAYOUT_8M};
use nor_xip_boot::gate::{GateOutcome, XipSecurityGate};
use nor_xip_boot::nor::ReadPath;
use nor_xip_boot::sim::{SimAccelerator, SimController};
use nor_xip_boot::vendor::{Vendor, PROFILES};
use nor_xip_boot::Error;

#[test]
fn every_known_part_comes_up_wide() {
    for profile in PROFILES.iter() {
        let mut record = SharedBootRecord::BLANK;
        let sim = SimController::new(profile);
        let (flash, context) = bootloader_bring_up(
            sim,
            &mut record,
            BootType::POWER_ON,
            1,
            ReadPath::MemoryMapped,
        )
        .unwrap();
        assert_eq!(context.vendor(), profile.vendor, "{}", profile.name);
        assert_eq!(record.vendor(), profile.vendor);
        assert!(flash.is_wide(), "{}", profile.name);
        assert!(flash.controller().xip_enabled());
        assert_eq!(flash.controller().protocol_violations(), 0, "{}", profile.name);
    }
}

#[test]
fn image_written_by_the_bootloader_is_seen_by_the_application() {
    let mut record = SharedBootRecord::BLANK;
    let sim = SimController::new(Vendor::W25q64jv.profile());
    let (flash, _) = bootloader_bring_up(
        sim,
        &mut record,
        BootType::WATCHDOG,
        3,
        ReadPath::MemoryMapped,
    )
    .unwrap();

    let mut map = FlashMap::with_layout(flash, &LAYOUT_8M).unwrap();
    let secondary = map.open(id_for_slot(0, Slot::Secondary).unwrap()).unwrap();
    let image: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    map.erase(&secondary, 0, SECTOR_SIZE).unwrap();
    map.write(&secondary, 0, &image).unwrap();

    let sim = map.release().release().release();
    let (flash, context) = application_attach(sim, &record);
    assert_eq!(context.boot_type, BootType::WATCHDOG);
    let mut map = FlashMap::with_layout(flash, &LAYOUT_8M).unwrap();
    let mut back = vec![0u8; image.len()];
    map.read(&secondary, 0, &mut back).unwrap();
    assert_eq!(back, image);
}

#[test]
fn encrypted_image_passes_the_gate() {
    let mut record = SharedBootRecord::BLANK;
    let mut sim = SimController::new(Vendor::W25q16jv.profile());
    sim.load(0, &XIP_PREAMBLE);
    let (mut flash, _) = bootloader_bring_up(
        sim,
        &mut record,
        BootType::POWER_ON,
        0,
        ReadPath::Transaction,
    )
    .unwrap();
    let mut accel = SimAccelerator::new(true);
    accel.set_run_polls(10);
    let outcome = run_gate_or_halt(&XipSecurityGate::default(), &mut flash, &mut accel);
    assert_eq!(outcome, GateOutcome::Decrypted);
    assert_eq!(accel.starts(), 1);
}

#[test]
fn octal_part_serves_the_small_layout_too() {
    let mut record = SharedBootRecord::BLANK;
    let sim = SimController::new(Vendor::Mx25um51245g.profile());
    let (flash, _) = bootloader_bring_up(
        sim,
        &mut record,
        BootType::SOFTWARE,
        0,
        ReadPath::Transaction,
    )
    .unwrap();
    let mut map = FlashMap::with_layout(flash, &LAYOUT_2M).unwrap();
    let scratch = map.open(AreaId::Scratch).unwrap();
    map.write(&scratch, 0x100, &[0xC3; 300]).unwrap();
    let mut back = [0u8; 300];
    map.read(&scratch, 0x100, &mut back).unwrap();
    assert_eq!(back, [0xC3; 300]);
    assert_eq!(map.device().controller().protocol_violations(), 0);
}

#[test]
fn unknown_part_keeps_reads_but_refuses_writes() {
    let mut record = SharedBootRecord::BLANK;
    let mut sim = SimController::new(Vendor::W25q64jv.profile());
    sim.set_jedec_id([0x20, 0xBA, 0x18]);
    let (flash, _) = bootloader_bring_up(
        sim,
        &mut record,
        BootType::POWER_ON,
        0,
        ReadPath::Transaction,
    )
    .unwrap();
    assert_eq!(record.vendor(), Vendor::Unknown);

    let mut map = FlashMap::with_layout(flash, &LAYOUT_8M).unwrap();
    let primary = map.open(AreaId::Primary(0)).unwrap();
    let mut buf = [0u8; 8];
    map.read(&primary, 0, &mut buf).unwrap();
    assert_eq!(buf, [0xFF; 8]);
    assert_eq!(map.write(&primary, 0, &[0]), Err(Error::UnknownVendor));
    assert_eq!(map.erase(&primary, 0, SECTOR_SIZE), Err(Error::UnknownVendor));
}
