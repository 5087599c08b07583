//! Chip command layer for the parts in the vendor table.
//!
//! Every command that can leave the part busy, powered down or in a new wire
//! mode is linked into `.ram_text.nor` on target, together with the helpers it
//! returns through. The small descriptor helpers are forced inline into those
//! callers. Nothing on these paths logs except [`NorFlash::write_status`] and
//! [`HardwareFlashDevice::page_program`] before their data transfer, while the
//! part is still idle.
//!
//! Refer to datasheets:
//! W25Q64JV 8.2, GD25Q64C 7, MX25L6433F 10, IS25LP064A 8, MX25UM51245G 9.
use core::fmt::Debug;

use crate::config::{PAGE_SIZE, POWER_DOWN_RELEASE_CYCLES, SECTOR_SIZE};
use crate::engine::{Status, StatusQuery, TransactionEngine};
use crate::error::Error;
use crate::protocol::{
    DataRate, Direction, IoWidth, ProtocolDescriptor, TransferDescriptor,
};
use crate::traits::{HardwareFlashDevice, SpiEngine};
use crate::vendor::VendorProfile;

/// JEDEC-standard opcodes shared by every supported part.
enum Opcode {
    /// Read status register 2.
    ReadStatus2 = 0x35,
    EnableReset = 0x66,
    Reset = 0x99,
    DeepPowerDown = 0xB9,
    ReleasePowerDown = 0xAB,
}

/// How [`NorFlash::read`] reaches the array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadPath {
    /// Load through the AXI window. Only safe while the CPU is not itself
    /// fetching through the transaction engine.
    MemoryMapped,
    /// Issue read transactions.
    Transaction,
}

pub struct NorFlash<C> {
    engine: TransactionEngine<C>,
    profile: &'static VendorProfile,
    /// The part has taken its mode entry sequence.
    wide: bool,
    read_path: ReadPath,
}

impl<C> Debug for NorFlash<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "NorFlash({}, wide: {})", self.profile.name, self.wide)
    }
}

impl<C> NorFlash<C> {
    /// A part straight out of reset, still in single-wire mode.
    pub fn new(engine: TransactionEngine<C>, profile: &'static VendorProfile) -> Self {
        Self {
            engine,
            profile,
            wide: false,
            read_path: ReadPath::Transaction,
        }
    }

    /// A part the bootloader has already switched to its wide mode.
    pub fn resume(engine: TransactionEngine<C>, profile: &'static VendorProfile) -> Self {
        Self {
            wide: profile.is_known(),
            ..Self::new(engine, profile)
        }
    }

    #[inline(always)]
    pub fn profile(&self) -> &'static VendorProfile {
        self.profile
    }

    #[inline(always)]
    pub fn is_wide(&self) -> bool {
        self.wide
    }

    /// Record that the mode entry sequence has taken effect. Commands issued
    /// afterwards use the wide command form.
    #[inline(always)]
    pub fn mark_wide(&mut self) {
        self.wide = true;
    }

    pub fn read_path(&self) -> ReadPath {
        self.read_path
    }

    #[inline(always)]
    pub fn set_read_path(&mut self, read_path: ReadPath) {
        self.read_path = read_path;
    }

    pub fn engine_mut(&mut self) -> &mut TransactionEngine<C> {
        &mut self.engine
    }

    pub fn controller(&self) -> &C {
        self.engine.controller()
    }

    #[inline(always)]
    pub fn controller_mut(&mut self) -> &mut C {
        self.engine.controller_mut()
    }

    pub fn release(self) -> TransactionEngine<C> {
        self.engine
    }

    #[inline(always)]
    fn octal_commands(&self) -> bool {
        self.wide && self.profile.io_width == IoWidth::Octal
    }

    /// Command form for `opcode` in the current mode.
    #[inline(always)]
    fn command(&self, opcode: u8) -> TransferDescriptor<'static> {
        if self.octal_commands() {
            TransferDescriptor::extended_command(opcode)
        } else {
            TransferDescriptor::command(opcode)
        }
    }

    /// Wire format for everything except array reads.
    #[inline(always)]
    fn command_protocol(&self) -> ProtocolDescriptor {
        if self.octal_commands() {
            ProtocolDescriptor::uniform(IoWidth::Octal, DataRate::Double)
        } else {
            ProtocolDescriptor::SINGLE
        }
    }

    #[inline(always)]
    fn address_len(&self) -> u8 {
        self.profile.address_width.bytes()
    }

    #[inline(always)]
    pub fn status_query(&self) -> StatusQuery {
        if self.octal_commands() {
            StatusQuery {
                command: TransferDescriptor::extended_command(self.profile.opcodes.read_status)
                    .command,
                command_len: 2,
                address_len: 4,
                dummy_cycles: 4,
                protocol: self.command_protocol(),
            }
        } else {
            StatusQuery {
                command: self.profile.opcodes.read_status as u16,
                command_len: 1,
                address_len: 0,
                dummy_cycles: 0,
                protocol: ProtocolDescriptor::SINGLE,
            }
        }
    }

    #[inline(always)]
    fn require_known(&self) -> Result<(), Error> {
        if self.profile.is_known() {
            Ok(())
        } else {
            Err(Error::UnknownVendor)
        }
    }

    #[inline(always)]
    fn check_range(&self, addr: u32, len: usize) -> Result<(), Error> {
        let capacity = self.profile.capacity as u64;
        if capacity != 0 && addr as u64 + len as u64 > capacity {
            return Err(Error::OutOfBounds);
        }
        Ok(())
    }
}

impl<C: SpiEngine> NorFlash<C> {
    /// Send an instruction with no address and no data.
    #[cfg_attr(
        all(target_arch = "riscv32", target_os = "none"),
        link_section = ".ram_text.nor"
    )]
    #[inline(never)]
    fn instruction(&mut self, opcode: u8) -> Result<(), Error> {
        let mut xfer = self.command(opcode);
        let protocol = self.command_protocol();
        self.engine.transfer(Direction::NoData, &mut xfer, &protocol)
    }

    /// Sets the write enable latch. Required before every program, erase
    /// and register write.
    #[cfg_attr(
        all(target_arch = "riscv32", target_os = "none"),
        link_section = ".ram_text.nor"
    )]
    #[inline(never)]
    pub fn write_enable(&mut self) -> Result<(), Error> {
        self.instruction(self.profile.opcodes.write_enable)
    }

    /// Reads status register 1.
    #[cfg_attr(
        all(target_arch = "riscv32", target_os = "none"),
        link_section = ".ram_text.nor"
    )]
    #[inline(never)]
    pub fn read_status(&mut self) -> Result<Status, Error> {
        let query = self.status_query();
        let mut raw = [0u8; 1];
        let mut xfer = query.descriptor(&mut raw);
        self.engine
            .transfer(Direction::Read, &mut xfer, &query.protocol)?;
        Ok(Status::from_bits_retain(raw[0]))
    }

    /// Reads status register 2 (single-wire mode only).
    pub fn read_status2(&mut self) -> Result<u8, Error> {
        if self.octal_commands() {
            return Err(Error::Unsupported);
        }
        let mut raw = [0u8; 1];
        let mut xfer = TransferDescriptor::command(Opcode::ReadStatus2 as u8).reading(&mut raw);
        self.engine
            .transfer(Direction::Read, &mut xfer, &ProtocolDescriptor::SINGLE)?;
        Ok(raw[0])
    }

    pub fn is_busy(&mut self) -> Result<bool, Error> {
        Ok(self.read_status()?.contains(Status::BUSY))
    }

    pub fn is_wel(&mut self) -> Result<bool, Error> {
        Ok(self.read_status()?.contains(Status::WEL))
    }

    /// Block until the part is no longer busy.
    #[cfg_attr(
        all(target_arch = "riscv32", target_os = "none"),
        link_section = ".ram_text.nor"
    )]
    #[inline(never)]
    pub fn wait_done(&mut self) -> Result<Status, Error> {
        self.require_known()?;
        let query = self.status_query();
        self.engine.poll_write_in_progress(&query)
    }

    #[cfg_attr(
        all(target_arch = "riscv32", target_os = "none"),
        link_section = ".ram_text.nor"
    )]
    #[inline(never)]
    fn warn_unless_wel(&mut self) -> Result<(), Error> {
        // part is idle here
        let status = self.read_status()?;
        if !status.contains(Status::WEL) {
            warn!("flash: WEL should be set: {:#x}", status.bits());
        }
        Ok(())
    }

    /// Write `value` to a status register and wait for it to take effect.
    #[cfg_attr(
        all(target_arch = "riscv32", target_os = "none"),
        link_section = ".ram_text.nor"
    )]
    #[inline(never)]
    pub fn write_status(&mut self, opcode: u8, value: &[u8]) -> Result<(), Error> {
        self.require_known()?;
        self.write_enable()?;
        self.warn_unless_wel()?;
        let mut xfer = self.command(opcode).writing(value);
        let protocol = self.command_protocol();
        self.engine.transfer(Direction::Write, &mut xfer, &protocol)?;
        self.wait_done()?;
        Ok(())
    }

    /// Write one addressed configuration register without waiting for it.
    ///
    /// The caller polls with [`NorFlash::wait_done`], after
    /// [`NorFlash::mark_wide`] if the write changes the wire mode.
    #[cfg_attr(
        all(target_arch = "riscv32", target_os = "none"),
        link_section = ".ram_text.nor"
    )]
    #[inline(never)]
    pub fn write_register_no_wait(
        &mut self,
        opcode: u8,
        address: u32,
        value: u8,
    ) -> Result<(), Error> {
        self.require_known()?;
        self.write_enable()?;
        let data = [value];
        let mut xfer = self
            .command(opcode)
            .with_address(address, 4)
            .writing(&data);
        let protocol = self.command_protocol();
        self.engine.transfer(Direction::Write, &mut xfer, &protocol)
    }

    /// Read the array with read transactions, whatever the read path.
    pub fn transaction_read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Error> {
        if buf.is_empty() {
            return Ok(());
        }
        let address_len = self.address_len();
        let (header, protocol) = if self.wide {
            (
                self.command(self.profile.opcodes.fast_read)
                    .with_address(addr, address_len)
                    .with_dummy_cycles(self.profile.read_dummy_cycles),
                self.profile.read_protocol(),
            )
        } else {
            (
                TransferDescriptor::command(self.profile.opcodes.read)
                    .with_address(addr, address_len),
                ProtocolDescriptor::SINGLE,
            )
        };
        let mut xfer = header.reading(buf);
        self.engine.transfer(Direction::Read, &mut xfer, &protocol)
    }

    /// Software reset (66h then 99h). The part returns to its power-on
    /// state; octal mode does not survive it.
    pub fn software_reset(&mut self) -> Result<(), Error> {
        self.instruction(Opcode::EnableReset as u8)?;
        self.instruction(Opcode::Reset as u8)?;
        if self.profile.io_width == IoWidth::Octal {
            self.wide = false;
        }
        Ok(())
    }

    /// Enter deep power-down. The array cannot be read until
    /// [`NorFlash::release_deep_power_down`].
    #[cfg_attr(
        all(target_arch = "riscv32", target_os = "none"),
        link_section = ".ram_text.nor"
    )]
    #[inline(never)]
    pub fn deep_power_down(&mut self) -> Result<(), Error> {
        self.instruction(Opcode::DeepPowerDown as u8)
    }

    #[cfg_attr(
        all(target_arch = "riscv32", target_os = "none"),
        link_section = ".ram_text.nor"
    )]
    #[inline(never)]
    pub fn release_deep_power_down(&mut self) -> Result<(), Error> {
        self.instruction(Opcode::ReleasePowerDown as u8)?;
        self.engine.controller_mut().settle(POWER_DOWN_RELEASE_CYCLES);
        Ok(())
    }
}

impl<C: SpiEngine> HardwareFlashDevice for NorFlash<C> {
    type Error = Error;

    /// Reads flash contents into `buf`, starting at `addr`, along the
    /// current [`ReadPath`].
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Error> {
        self.check_range(addr, buf.len())?;
        if buf.is_empty() {
            return Ok(());
        }
        match self.read_path {
            ReadPath::MemoryMapped => self.engine.controller_mut().mapped_read(addr, buf),
            ReadPath::Transaction => self.transaction_read(addr, buf),
        }
    }

    /// Sector erase: every byte of the 4 KiB sector at `addr` reads back as
    /// FFh afterwards. `addr` must be the start of a sector.
    #[cfg_attr(
        all(target_arch = "riscv32", target_os = "none"),
        link_section = ".ram_text.nor"
    )]
    #[inline(never)]
    fn sector_erase(&mut self, addr: u32) -> Result<(), Error> {
        self.require_known()?;
        if addr % SECTOR_SIZE != 0 {
            return Err(Error::NotAligned);
        }
        self.check_range(addr, SECTOR_SIZE as usize)?;

        self.write_enable()?;
        let mut xfer = self
            .command(self.profile.opcodes.sector_erase)
            .with_address(addr, self.address_len());
        let protocol = self.command_protocol();
        self.engine.transfer(Direction::NoData, &mut xfer, &protocol)?;
        self.wait_done()?;
        Ok(())
    }

    /// Page program: one byte up to a full page, without crossing a page
    /// boundary, into previously erased locations.
    #[cfg_attr(
        all(target_arch = "riscv32", target_os = "none"),
        link_section = ".ram_text.nor"
    )]
    #[inline(never)]
    fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
        self.require_known()?;
        if data.is_empty() {
            return Ok(());
        }
        if (addr % PAGE_SIZE) as usize + data.len() > PAGE_SIZE as usize {
            return Err(Error::OutOfBounds);
        }
        self.check_range(addr, data.len())?;

        self.write_enable()?;
        self.warn_unless_wel()?;
        let mut xfer = self
            .command(self.profile.opcodes.page_program)
            .with_address(addr, self.address_len())
            .writing(data);
        let protocol = self.command_protocol();
        self.engine.transfer(Direction::Write, &mut xfer, &protocol)?;
        self.wait_done()?;
        Ok(())
    }

    /// Chip erase: the whole array reads back as FFh afterwards.
    #[cfg_attr(
        all(target_arch = "riscv32", target_os = "none"),
        link_section = ".ram_text.nor"
    )]
    #[inline(never)]
    fn chip_erase(&mut self) -> Result<(), Error> {
        self.require_known()?;
        self.write_enable()?;
        self.instruction(self.profile.opcodes.chip_erase)?;
        self.wait_done()?;
        Ok(())
    }

    fn capacity(&self) -> u32 {
        self.profile.capacity
    }
}
