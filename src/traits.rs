use crate::error::Error;
use crate::gate::DecryptStatus;
use crate::protocol::{ClockSetting, Direction, ProtocolDescriptor, ReadWindow, TransferDescriptor};

/// Chip-level operations the flash map is built on.
pub trait HardwareFlashDevice {
    type Error;

    /// Reads flash contents into `buf`, starting at `addr`.
    fn read(&mut self, addr: u32, data: &mut [u8]) -> Result<(), Self::Error>;

    /// The Sector Erase instruction sets all memory within a specified sector
    /// to the erased state of all 1s (FFh).
    fn sector_erase(&mut self, addr: u32) -> Result<(), Self::Error>;

    /// The Page Program instruction allows from one byte to 256 bytes (a page) of data
    /// to be programmed at previously erased (FFh) memory locations.
    fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// The Chip Erase instruction sets all memory within the device to the erased
    /// state of all 1s (FFh).
    fn chip_erase(&mut self) -> Result<(), Self::Error>;

    /// Size of the device in bytes, or 0 when it is not known.
    fn capacity(&self) -> u32;
}

/// One physical serial-flash controller instance.
///
/// The controller shifts the phases of a transaction and raises a completion
/// flag; it does not know anything about opcodes or vendors.
pub trait SpiEngine {
    /// Latch the phases of `xfer` and start shifting them on the wire.
    fn start(
        &mut self,
        direction: Direction,
        xfer: &mut TransferDescriptor<'_>,
        protocol: &ProtocolDescriptor,
    ) -> Result<(), Error>;

    /// Whether the last started transaction has completed.
    fn is_done(&mut self) -> bool;

    /// Collect the data phase of a completed transaction.
    fn finish(&mut self, _xfer: &mut TransferDescriptor<'_>) -> Result<(), Error> {
        Ok(())
    }

    /// Read through the memory-mapped view of the flash.
    fn mapped_read(&mut self, _addr: u32, _buf: &mut [u8]) -> Result<(), Error> {
        Err(Error::Unsupported)
    }

    /// Burn `cycles` dummy instructions.
    fn settle(&mut self, cycles: u32) {
        for _ in 0..cycles {
            core::hint::spin_loop();
        }
    }
}

/// AXI read window, reference clock and XIP boot mode of a controller.
pub trait XipWindow {
    /// Describe the fast-read transaction issued for reads through the window.
    fn program_read_window(&mut self, window: &ReadWindow);

    fn window_base(&self) -> u32;

    fn set_window_base(&mut self, base: u32);

    /// While cleared the window may be read by non-secure bus masters.
    fn set_window_protection(&mut self, protected: bool);

    fn set_reference_clock(&mut self, clock: ClockSetting);

    /// After this, instruction fetches may go through the window.
    fn enable_xip(&mut self);
}

/// Hardware decrypt/verify accelerator driving decrypt-on-the-fly.
pub trait DecryptEngine {
    /// One-time-programmable secure boot fuse.
    fn secure_fuse(&mut self) -> bool;

    /// Kick off the decrypt-in-place sequence.
    fn start_decrypt(&mut self);

    fn status(&mut self) -> DecryptStatus;
}
