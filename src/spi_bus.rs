//! [`SpiEngine`] over a plain `embedded-hal` SPI device.
//!
//! Boards that wire the flash to an ordinary SPI peripheral get the same
//! transaction engine, limited to 1-1-1 transfers. Dummy cycles are clocked
//! out as whole dummy bytes.

use core::fmt::Debug;

use embedded_hal::spi::{Error as _, Operation, SpiDevice};

use crate::error::Error;
use crate::protocol::{Direction, Payload, ProtocolDescriptor, TransferDescriptor};
use crate::traits::SpiEngine;

/// Longest command + address + dummy header: 2 + 4 + 255 / 8.
const MAX_HEADER: usize = 2 + 4 + 32;

pub struct SpiBusEngine<SPI> {
    spi: SPI,
}

impl<SPI> Debug for SpiBusEngine<SPI> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SpiBusEngine")
    }
}

impl<SPI: SpiDevice> SpiBusEngine<SPI> {
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    pub fn release(self) -> SPI {
        self.spi
    }
}

impl<SPI: SpiDevice> SpiEngine for SpiBusEngine<SPI> {
    fn start(
        &mut self,
        _direction: Direction,
        xfer: &mut TransferDescriptor<'_>,
        protocol: &ProtocolDescriptor,
    ) -> Result<(), Error> {
        if !protocol.is_plain_spi() || xfer.dummy_cycles % 8 != 0 || xfer.command_len > 2 {
            return Err(Error::Unsupported);
        }

        let mut header = [0u8; MAX_HEADER];
        let mut len = 0;
        let command = xfer.command.to_be_bytes();
        let command_len = xfer.command_len as usize;
        header[..command_len].copy_from_slice(&command[2 - command_len..]);
        len += command_len;

        let (address, address_len) = xfer.address_bytes();
        header[len..len + address_len].copy_from_slice(&address[..address_len]);
        len += address_len;

        // dummy bytes are already zero
        len += (xfer.dummy_cycles / 8) as usize;

        let spi_result = match &mut xfer.data {
            Payload::None => self.spi.transaction(&mut [Operation::Write(&header[..len])]),
            Payload::Read(buf) => self.spi.transaction(&mut [
                Operation::Write(&header[..len]),
                Operation::Read(buf),
            ]),
            Payload::Write(data) => self.spi.transaction(&mut [
                Operation::Write(&header[..len]),
                Operation::Write(data),
            ]),
        };
        spi_result.map_err(|e| Error::Bus(e.kind()))
    }

    /// `SpiDevice::transaction` only returns once the bus is idle.
    fn is_done(&mut self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TransactionEngine;
    use crate::protocol::{DataRate, IoWidth};
    use core::convert::Infallible;
    use embedded_hal::spi::ErrorType;
    use std::vec::Vec;

    /// Records what was clocked out and answers reads with a fixed pattern.
    struct FakeSpi {
        written: Vec<Vec<u8>>,
        response: Vec<u8>,
    }

    impl ErrorType for FakeSpi {
        type Error = Infallible;
    }

    impl SpiDevice for FakeSpi {
        fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
            let mut frame = Vec::new();
            for op in operations.iter_mut() {
                match op {
                    Operation::Write(bytes) => frame.extend_from_slice(bytes),
                    Operation::Read(buf) => {
                        for (i, b) in buf.iter_mut().enumerate() {
                            *b = self.response[i % self.response.len()];
                        }
                    }
                    _ => {}
                }
            }
            self.written.push(frame);
            Ok(())
        }
    }

    fn fake() -> FakeSpi {
        FakeSpi {
            written: Vec::new(),
            response: std::vec![0xEF, 0x40, 0x17],
        }
    }

    #[test]
    fn command_address_and_dummy_go_out_as_one_header() {
        let mut engine = TransactionEngine::new(SpiBusEngine::new(fake()));
        let mut buf = [0u8; 3];
        let mut xfer = TransferDescriptor::command(0x0B)
            .with_address(0x0001_0203, 3)
            .with_dummy_cycles(8)
            .reading(&mut buf);
        engine
            .transfer(Direction::Read, &mut xfer, &ProtocolDescriptor::SINGLE)
            .unwrap();
        assert_eq!(buf, [0xEF, 0x40, 0x17]);
        let spi = engine.release().release();
        assert_eq!(spi.written, std::vec![std::vec![0x0B, 0x01, 0x02, 0x03, 0x00]]);
    }

    #[test]
    fn wide_transfers_are_unsupported() {
        let mut engine = TransactionEngine::new(SpiBusEngine::new(fake()));
        let mut buf = [0u8; 4];
        let mut xfer = TransferDescriptor::command(0xEB)
            .with_address(0, 3)
            .reading(&mut buf);
        let proto = ProtocolDescriptor::wide_address_and_data(IoWidth::Quad, DataRate::Single);
        assert_eq!(
            engine.transfer(Direction::Read, &mut xfer, &proto),
            Err(Error::Unsupported)
        );
    }

    #[test]
    fn extended_commands_send_both_bytes() {
        let mut engine = TransactionEngine::new(SpiBusEngine::new(fake()));
        let mut xfer = TransferDescriptor::extended_command(0x06);
        engine
            .transfer(Direction::NoData, &mut xfer, &ProtocolDescriptor::SINGLE)
            .unwrap();
        let spi = engine.release().release();
        assert_eq!(spi.written, std::vec![std::vec![0x06, 0xF9]]);
    }
}
