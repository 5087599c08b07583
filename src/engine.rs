//! Transaction engine: one serial-flash transaction at a time, blocking until
//! the controller reports completion.
//!
//! Everything in here may run while the flash is busy programming, erasing or
//! changing mode, so on target it is linked into `.ram_text.nor`, which the
//! linker script must place in RAM. Nothing reachable from these functions
//! may live in the flash-resident text section.

use bitflags::bitflags;

use crate::config::TRANSFER_POLL_BUDGET;
use crate::error::Error;
use crate::protocol::{Direction, ProtocolDescriptor, TransferDescriptor};
use crate::traits::SpiEngine;

bitflags! {
    /// Status register 1 bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Status: u8 {
        /// Erase or write in progress.
        const BUSY = 1 << 0;
        /// Status of the **W**rite **E**nable **L**atch.
        const WEL = 1 << 1;
        /// The 3 protection region bits.
        const PROT = 0b0001_1100;
        /// **S**tatus **R**egister **W**rite **D**isable bit.
        const SRWD = 1 << 7;
    }
}

/// How to read the status register in the chip's current wire mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusQuery {
    pub command: u16,
    pub command_len: u8,
    pub address_len: u8,
    pub dummy_cycles: u8,
    pub protocol: ProtocolDescriptor,
}

impl StatusQuery {
    #[inline(always)]
    pub fn descriptor<'a>(&self, buf: &'a mut [u8]) -> TransferDescriptor<'a> {
        TransferDescriptor {
            command: self.command,
            command_len: self.command_len,
            address: 0,
            address_len: self.address_len,
            dummy_cycles: self.dummy_cycles,
            data: crate::protocol::Payload::Read(buf),
        }
    }
}

/// Drives a [`SpiEngine`] one transaction at a time.
pub struct TransactionEngine<C> {
    controller: C,
    poll_budget: u32,
}

impl<C> core::fmt::Debug for TransactionEngine<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransactionEngine")
            .field("poll_budget", &self.poll_budget)
            .finish()
    }
}

impl<C> TransactionEngine<C> {
    pub fn new(controller: C) -> Self {
        Self::with_poll_budget(controller, TRANSFER_POLL_BUDGET)
    }

    pub fn with_poll_budget(controller: C, poll_budget: u32) -> Self {
        Self {
            controller,
            poll_budget,
        }
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    #[inline(always)]
    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.controller
    }

    pub fn release(self) -> C {
        self.controller
    }
}

impl<C: SpiEngine> TransactionEngine<C> {
    /// Issue one transaction and wait for the controller to finish it.
    ///
    /// `direction` must agree with the data phase of `xfer`; a read or write
    /// needs a non-empty buffer and `NoData` needs none. Fails with
    /// [`Error::Timeout`] once the poll budget is spent. Never retries.
    #[cfg_attr(
        all(target_arch = "riscv32", target_os = "none"),
        link_section = ".ram_text.nor"
    )]
    #[inline(never)]
    pub fn transfer(
        &mut self,
        direction: Direction,
        xfer: &mut TransferDescriptor<'_>,
        protocol: &ProtocolDescriptor,
    ) -> Result<(), Error> {
        if xfer.data.direction() != direction {
            return Err(Error::InvalidTransfer);
        }
        if direction != Direction::NoData && xfer.data.is_empty() {
            return Err(Error::InvalidTransfer);
        }

        self.controller.start(direction, xfer, protocol)?;

        let mut polls = 0u32;
        while !self.controller.is_done() {
            polls += 1;
            if polls >= self.poll_budget {
                error!(
                    "flash: transaction {:#x} did not complete after {} polls",
                    xfer.command,
                    polls
                );
                return Err(Error::Timeout);
            }
        }

        self.controller.finish(xfer)
    }

    /// Read the status register until the write-in-progress bit clears.
    ///
    /// There is no overall timeout: a started program or erase always
    /// completes. Each individual status read is still bounded by the poll
    /// budget.
    #[cfg_attr(
        all(target_arch = "riscv32", target_os = "none"),
        link_section = ".ram_text.nor"
    )]
    #[inline(never)]
    pub fn poll_write_in_progress(&mut self, query: &StatusQuery) -> Result<Status, Error> {
        loop {
            let mut raw = [0u8; 1];
            let mut xfer = query.descriptor(&mut raw);
            self.transfer(Direction::Read, &mut xfer, &query.protocol)?;
            let status = Status::from_bits_retain(raw[0]);
            if !status.contains(Status::BUSY) {
                return Ok(status);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Payload;
    use crate::sim::SimController;
    use crate::vendor::Vendor;

    fn status_query() -> StatusQuery {
        StatusQuery {
            command: 0x05,
            command_len: 1,
            address_len: 0,
            dummy_cycles: 0,
            protocol: ProtocolDescriptor::SINGLE,
        }
    }

    #[test]
    fn rejects_direction_mismatch_without_touching_hardware() {
        let mut engine = TransactionEngine::new(SimController::new(Vendor::W25q64jv.profile()));
        let mut buf = [0u8; 4];
        let mut xfer = TransferDescriptor::command(0x03).reading(&mut buf);
        let err = engine.transfer(Direction::Write, &mut xfer, &ProtocolDescriptor::SINGLE);
        assert_eq!(err, Err(Error::InvalidTransfer));

        let mut xfer = TransferDescriptor {
            data: Payload::Read(&mut []),
            ..TransferDescriptor::command(0x03)
        };
        let err = engine.transfer(Direction::Read, &mut xfer, &ProtocolDescriptor::SINGLE);
        assert_eq!(err, Err(Error::InvalidTransfer));
        assert_eq!(engine.controller().transactions(), 0);
    }

    #[test]
    fn stuck_controller_times_out() {
        let mut sim = SimController::new(Vendor::W25q64jv.profile());
        sim.set_stuck(true);
        let mut engine = TransactionEngine::with_poll_budget(sim, 16);
        let mut xfer = TransferDescriptor::command(0x06);
        let err = engine.transfer(Direction::NoData, &mut xfer, &ProtocolDescriptor::SINGLE);
        assert_eq!(err, Err(Error::Timeout));
    }

    #[test]
    fn write_in_progress_poll_waits_for_busy_to_clear() {
        let mut sim = SimController::new(Vendor::W25q64jv.profile());
        sim.set_busy_polls(5);
        let mut engine = TransactionEngine::new(sim);
        let status = engine.poll_write_in_progress(&status_query()).unwrap();
        assert!(!status.contains(Status::BUSY));
        // five busy reads and the one that saw the bit clear
        assert_eq!(engine.controller().transactions(), 6);
    }
}
