//! Transfer and protocol descriptors for one serial-flash transaction.
//!
//! A transaction is up to four phases on the wire: command, address, dummy
//! cycles and data. Command, address and data each carry their own I/O width,
//! clock-edge mode and bit order, so mixed forms like 1-4-4 quad reads or
//! 8D-8D-8D octal DTR commands are described by the same pair of types.

/// Number of data lines a phase is driven on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoWidth {
    Single,
    Dual,
    Quad,
    Octal,
}

impl IoWidth {
    pub const fn lines(self) -> u8 {
        match self {
            IoWidth::Single => 1,
            IoWidth::Dual => 2,
            IoWidth::Quad => 4,
            IoWidth::Octal => 8,
        }
    }
}

/// Whether a phase samples on one or both clock edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataRate {
    Single,
    Double,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitOrder {
    MsbFirst,
    LsbFirst,
}

/// Wire format of one phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhaseFormat {
    pub width: IoWidth,
    pub rate: DataRate,
    pub order: BitOrder,
}

impl PhaseFormat {
    pub const SINGLE: Self = Self::new(IoWidth::Single, DataRate::Single);

    #[inline(always)]
    pub const fn new(width: IoWidth, rate: DataRate) -> Self {
        Self {
            width,
            rate,
            order: BitOrder::MsbFirst,
        }
    }

    /// Plain 1-bit, single-edge, MSB-first SPI.
    pub const fn is_plain_spi(&self) -> bool {
        matches!(self.width, IoWidth::Single)
            && matches!(self.rate, DataRate::Single)
            && matches!(self.order, BitOrder::MsbFirst)
    }
}

/// Per-phase wire formats of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProtocolDescriptor {
    pub command: PhaseFormat,
    pub address: PhaseFormat,
    pub data: PhaseFormat,
}

impl ProtocolDescriptor {
    /// 1-1-1 SPI, the only form an unconfigured chip is guaranteed to accept.
    pub const SINGLE: Self = Self::uniform(IoWidth::Single, DataRate::Single);

    /// Every phase on the same width and rate (1-1-1, 4-4-4, 8D-8D-8D...).
    #[inline(always)]
    pub const fn uniform(width: IoWidth, rate: DataRate) -> Self {
        let phase = PhaseFormat::new(width, rate);
        Self {
            command: phase,
            address: phase,
            data: phase,
        }
    }

    /// Single-wire command with address and data on `width` (1-4-4, 1-2-2...).
    #[inline(always)]
    pub const fn wide_address_and_data(width: IoWidth, rate: DataRate) -> Self {
        let phase = PhaseFormat::new(width, rate);
        Self {
            command: PhaseFormat::SINGLE,
            address: phase,
            data: phase,
        }
    }

    pub const fn is_plain_spi(&self) -> bool {
        self.command.is_plain_spi() && self.address.is_plain_spi() && self.data.is_plain_spi()
    }
}

/// Direction of the data phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Read,
    Write,
    NoData,
}

/// Data phase buffer.
#[derive(Debug)]
pub enum Payload<'a> {
    None,
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl Payload<'_> {
    #[inline(always)]
    pub fn len(&self) -> usize {
        match self {
            Payload::None => 0,
            Payload::Read(buf) => buf.len(),
            Payload::Write(data) => data.len(),
        }
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    pub fn direction(&self) -> Direction {
        match self {
            Payload::None => Direction::NoData,
            Payload::Read(_) => Direction::Read,
            Payload::Write(_) => Direction::Write,
        }
    }
}

/// Everything the controller shifts for one transaction.
///
/// Built fresh for each operation and dropped when it completes.
#[derive(Debug)]
pub struct TransferDescriptor<'a> {
    /// Opcode, or opcode and its extension for two-byte (octal) commands.
    pub command: u16,
    /// Command length in bytes: 0, 1 or 2.
    pub command_len: u8,
    pub address: u32,
    /// Address length in bytes: 0, 3 or 4.
    pub address_len: u8,
    pub dummy_cycles: u8,
    pub data: Payload<'a>,
}

impl<'a> TransferDescriptor<'a> {
    /// A one-byte command with nothing else attached.
    #[inline(always)]
    pub const fn command(opcode: u8) -> Self {
        Self {
            command: opcode as u16,
            command_len: 1,
            address: 0,
            address_len: 0,
            dummy_cycles: 0,
            data: Payload::None,
        }
    }

    /// A two-byte command: the opcode followed by its bitwise inverse, as
    /// octal DTR parts expect.
    #[inline(always)]
    pub const fn extended_command(opcode: u8) -> Self {
        Self {
            command: ((opcode as u16) << 8) | (!opcode as u16),
            command_len: 2,
            address: 0,
            address_len: 0,
            dummy_cycles: 0,
            data: Payload::None,
        }
    }

    #[inline(always)]
    pub fn with_address(mut self, address: u32, len: u8) -> Self {
        self.address = address;
        self.address_len = len;
        self
    }

    #[inline(always)]
    pub fn with_dummy_cycles(mut self, cycles: u8) -> Self {
        self.dummy_cycles = cycles;
        self
    }

    #[inline(always)]
    pub fn reading(mut self, buf: &'a mut [u8]) -> Self {
        self.data = Payload::Read(buf);
        self
    }

    #[inline(always)]
    pub fn writing(mut self, data: &'a [u8]) -> Self {
        self.data = Payload::Write(data);
        self
    }

    /// The opcode byte regardless of command length.
    pub fn opcode(&self) -> u8 {
        if self.command_len == 2 {
            (self.command >> 8) as u8
        } else {
            self.command as u8
        }
    }

    /// Big-endian address bytes as they go out on the wire.
    pub fn address_bytes(&self) -> ([u8; 4], usize) {
        let len = (self.address_len as usize).min(4);
        let all = self.address.to_be_bytes();
        let mut out = [0u8; 4];
        out[..len].copy_from_slice(&all[4 - len..]);
        (out, len)
    }
}

/// Fast-read transaction the controller issues for reads through the AXI
/// window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReadWindow {
    pub command: u16,
    pub command_len: u8,
    pub address_len: u8,
    pub dummy_cycles: u8,
    pub protocol: ProtocolDescriptor,
    pub base: u32,
    pub size: u32,
}

/// Multiply/divide fields of the flash reference clock generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockSetting {
    pub multiplier: u8,
    pub divider: u8,
}

impl ClockSetting {
    pub const BOOT: Self = Self {
        multiplier: crate::config::BOOT_CLOCK_MULTIPLIER,
        divider: crate::config::BOOT_CLOCK_DIVIDER,
    };

    pub const fn new(multiplier: u8, divider: u8) -> Self {
        Self {
            multiplier,
            divider,
        }
    }

    /// Compares `multiplier / divider` ratios without dividing.
    #[inline(always)]
    pub const fn is_faster_than(&self, other: &ClockSetting) -> bool {
        (self.multiplier as u32) * (other.divider as u32)
            > (other.multiplier as u32) * (self.divider as u32)
    }
}
