//! Flash bring-up for the two boot stages.

use crate::boot_record::{BootContext, BootRecordStore, BootType};
use crate::engine::TransactionEngine;
use crate::error::Error;
use crate::gate::{GateOutcome, XipSecurityGate};
use crate::nor::{NorFlash, ReadPath};
use crate::speedup;
use crate::traits::{DecryptEngine, SpiEngine, XipWindow};

/// Bootloader stage: probe, record the part for the application, then bring
/// it up to speed with XIP enabled.
///
/// `read_path` is how reads reach the array until speed-up switches to
/// transactions. An unknown part is left in single-wire mode.
pub fn bootloader_bring_up<C, S>(
    controller: C,
    store: &mut S,
    boot_type: BootType,
    metal_version: u32,
    read_path: ReadPath,
) -> Result<(NorFlash<C>, BootContext), Error>
where
    C: SpiEngine + XipWindow,
    S: BootRecordStore + ?Sized,
{
    let mut engine = TransactionEngine::new(controller);
    let context = BootContext::for_bootloader(&mut engine, store, boot_type, metal_version)?;
    let mut flash = NorFlash::new(engine, context.profile);
    flash.set_read_path(read_path);

    match speedup::enable_high_speed_and_xip(&mut flash) {
        Ok(()) => {}
        Err(Error::UnknownVendor) => {
            warn!("boot: unknown flash part, continuing at boot speed");
        }
        Err(e) => return Err(e),
    }
    Ok((flash, context))
}

/// Application stage: the bootloader already switched the part, so only the
/// record is consulted.
pub fn application_attach<C, S>(controller: C, store: &S) -> (NorFlash<C>, BootContext)
where
    C: SpiEngine,
    S: BootRecordStore + ?Sized,
{
    let context = BootContext::for_application(store);
    let flash = NorFlash::resume(TransactionEngine::new(controller), context.profile);
    (flash, context)
}

/// Stop here for good.
#[allow(clippy::empty_loop)]
pub fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// Run the security gate; any failure halts instead of booting the image.
pub fn run_gate_or_halt<C, A>(
    gate: &XipSecurityGate,
    flash: &mut NorFlash<C>,
    accel: &mut A,
) -> GateOutcome
where
    C: SpiEngine + XipWindow,
    A: DecryptEngine,
{
    match gate.run(flash, accel) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("boot: refusing to start image: {:?}", e);
            halt()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot_record::SharedBootRecord;
    use crate::sim::{SimAccelerator, SimController};
    use crate::traits::HardwareFlashDevice;
    use crate::vendor::Vendor;

    #[test]
    fn bootloader_then_application() {
        let mut record = SharedBootRecord::BLANK;
        let sim = SimController::new(Vendor::W25q16jv.profile());
        let (mut flash, context) = bootloader_bring_up(
            sim,
            &mut record,
            BootType::POWER_ON,
            2,
            ReadPath::MemoryMapped,
        )
        .unwrap();
        assert_eq!(context.vendor(), Vendor::W25q16jv);
        assert_eq!(record.vendor(), Vendor::W25q16jv);
        assert!(flash.is_wide());
        assert_eq!(flash.read_path(), ReadPath::Transaction);
        assert!(flash.controller().xip_enabled());

        flash.page_program(0x20, &[1, 2]).unwrap();
        let sim = flash.release().release();
        let (mut app, app_context) = application_attach(sim, &record);
        assert_eq!(app_context.vendor(), Vendor::W25q16jv);
        assert_eq!(app_context.metal_version, 2);
        assert!(app.is_wide());
        let mut buf = [0u8; 2];
        app.read(0x20, &mut buf).unwrap();
        assert_eq!(buf, [1, 2]);
    }

    #[test]
    fn unknown_part_still_boots_at_boot_speed() {
        let mut record = SharedBootRecord::BLANK;
        let mut sim = SimController::new(Vendor::W25q64jv.profile());
        sim.set_jedec_id([0x20, 0xBA, 0x18]);
        let (flash, context) = bootloader_bring_up(
            sim,
            &mut record,
            BootType::POWER_ON,
            0,
            ReadPath::Transaction,
        )
        .unwrap();
        assert_eq!(context.vendor(), Vendor::Unknown);
        assert!(!flash.is_wide());
        assert!(!flash.controller().xip_enabled());
    }

    #[test]
    fn gate_outcome_passes_through() {
        let mut record = SharedBootRecord::BLANK;
        let sim = SimController::new(Vendor::W25q64jv.profile());
        let (mut flash, _) =
            bootloader_bring_up(sim, &mut record, BootType::POWER_ON, 0, ReadPath::Transaction)
                .unwrap();
        let mut accel = SimAccelerator::new(false);
        let gate = XipSecurityGate::new([0; 16], crate::config::WINDOW_NORMAL_BASE, false);
        assert_eq!(
            run_gate_or_halt(&gate, &mut flash, &mut accel),
            GateOutcome::Skipped
        );
    }
}
