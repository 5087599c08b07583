//! Switch the flash to its fastest mode and map it for execute-in-place.
//!
//! The sequence changes the wire mode and clock the CPU's own instruction
//! fetches may depend on, so it and everything it calls run from RAM on
//! target. The steps must happen in order: wide mode, read window, clock,
//! then XIP.

use crate::config::{CLOCK_SETTLE_CYCLES, WINDOW_NORMAL_BASE, WINDOW_SIZE};
use crate::error::Error;
use crate::nor::{NorFlash, ReadPath};
use crate::protocol::{ClockSetting, IoWidth, ReadWindow, TransferDescriptor};
use crate::traits::{SpiEngine, XipWindow};
use crate::vendor::{ModeEntry, VendorProfile};

/// Bring the part up to speed and enable XIP through the read window.
///
/// Refuses an unknown part without touching it. A part already in its wide
/// mode (application stage) skips mode entry.
#[cfg_attr(
    all(target_arch = "riscv32", target_os = "none"),
    link_section = ".ram_text.nor"
)]
#[inline(never)]
pub fn enable_high_speed_and_xip<C>(flash: &mut NorFlash<C>) -> Result<(), Error>
where
    C: SpiEngine + XipWindow,
{
    let profile = flash.profile();
    if !profile.is_known() {
        warn!("speed-up: unknown flash part, staying in single-wire mode");
        return Err(Error::UnknownVendor);
    }

    enter_wide_mode(flash)?;

    let window = read_window(profile);
    flash.controller_mut().program_read_window(&window);
    // fetches through the window match the part's wire mode again from here
    debug!(
        "speed-up: {} wide, window {:#x}+{:#x} cmd {:#x} dummy {}",
        profile.name,
        window.base,
        window.size,
        window.command,
        window.dummy_cycles
    );

    if let Some(clock) = profile.fast_clock {
        if clock.is_faster_than(&ClockSetting::BOOT) {
            let controller = flash.controller_mut();
            controller.set_reference_clock(clock);
            controller.settle(CLOCK_SETTLE_CYCLES);
            debug!(
                "speed-up: reference clock x{}/{}",
                clock.multiplier,
                clock.divider
            );
        }
    }

    flash.controller_mut().enable_xip();
    flash.set_read_path(ReadPath::Transaction);
    debug!("speed-up: XIP enabled");
    Ok(())
}

#[cfg_attr(
    all(target_arch = "riscv32", target_os = "none"),
    link_section = ".ram_text.nor"
)]
#[inline(never)]
fn enter_wide_mode<C: SpiEngine>(flash: &mut NorFlash<C>) -> Result<(), Error> {
    if flash.is_wide() {
        return Ok(());
    }

    match flash.profile().mode_entry {
        ModeEntry::None => {}
        ModeEntry::StatusWrite { opcode, value } => {
            flash.write_status(opcode, value)?;
        }
        ModeEntry::OctalDtr { opcode, writes } => {
            for (i, &(address, value)) in writes.iter().enumerate() {
                flash.write_register_no_wait(opcode, address, value)?;
                // the last write switches the wire mode before its own poll
                if i + 1 == writes.len() {
                    flash.mark_wide();
                }
                flash.wait_done()?;
            }
        }
    }
    flash.mark_wide();
    Ok(())
}

/// The fast read the window issues on every AXI access.
#[inline(always)]
fn read_window(profile: &VendorProfile) -> ReadWindow {
    let command = if profile.io_width == IoWidth::Octal {
        TransferDescriptor::extended_command(profile.opcodes.fast_read)
    } else {
        TransferDescriptor::command(profile.opcodes.fast_read)
    };
    ReadWindow {
        command: command.command,
        command_len: command.command_len,
        address_len: profile.address_width.bytes(),
        dummy_cycles: profile.read_dummy_cycles,
        protocol: profile.read_protocol(),
        base: WINDOW_NORMAL_BASE,
        size: profile.capacity.min(WINDOW_SIZE),
    }
}
