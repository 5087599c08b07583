//! Known flash parts and the probe that picks one.
//!
//! Each supported chip is one row of [`PROFILES`]; nothing else in the crate
//! branches on the part number. A chip that matches no row resolves to
//! [`Vendor::Unknown`], and every vendor specific path refuses to run
//! against it.

use crate::engine::TransactionEngine;
use crate::error::Error;
use crate::protocol::{
    ClockSetting, DataRate, Direction, IoWidth, ProtocolDescriptor, TransferDescriptor,
};
use crate::traits::SpiEngine;

/// Read the 24-bit JEDEC manufacturer/device identification.
const OP_READ_JEDEC_ID: u8 = 0x9F;
/// Read the 8-bit manufacturer and device IDs.
const OP_READ_MF_DID: u8 = 0x90;

/// Index of a known part, as persisted in the shared boot record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Vendor {
    W25q16jv = 0,
    W25q64jv = 1,
    Gd25q64c = 2,
    Mx25l6433f = 3,
    Is25lp064a = 4,
    Mx25um51245g = 5,
    Unknown = 0xFF,
}

impl Vendor {
    /// Index values outside the table map to `Unknown`.
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => Vendor::W25q16jv,
            1 => Vendor::W25q64jv,
            2 => Vendor::Gd25q64c,
            3 => Vendor::Mx25l6433f,
            4 => Vendor::Is25lp064a,
            5 => Vendor::Mx25um51245g,
            _ => Vendor::Unknown,
        }
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn profile(self) -> &'static VendorProfile {
        PROFILES
            .get(self.index() as usize)
            .unwrap_or(&UNKNOWN_PROFILE)
    }

    #[inline(always)]
    pub fn is_known(self) -> bool {
        !matches!(self, Vendor::Unknown)
    }
}

/// Opcodes that differ between parts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Opcodes {
    pub write_enable: u8,
    pub page_program: u8,
    pub read_status: u8,
    /// Read used once the part is in its wide mode, and by the read window.
    pub fast_read: u8,
    /// Single-wire read used before mode entry.
    pub read: u8,
    pub sector_erase: u8,
    pub chip_erase: u8,
}

const JEDEC_OPCODES: Opcodes = Opcodes {
    write_enable: 0x06,
    page_program: 0x02,
    read_status: 0x05,
    fast_read: 0xEB,
    read: 0x03,
    sector_erase: 0x20,
    chip_erase: 0xC7,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressWidth {
    Three,
    Four,
}

impl AddressWidth {
    #[inline(always)]
    pub const fn bytes(self) -> u8 {
        match self {
            AddressWidth::Three => 3,
            AddressWidth::Four => 4,
        }
    }
}

/// How a part is switched into its wide I/O mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModeEntry {
    /// Already wide after reset.
    None,
    /// Write `value` to a status register with `opcode` (quad enable).
    StatusWrite { opcode: u8, value: &'static [u8] },
    /// Write each `(address, value)` to the configuration register with
    /// `opcode`. The last write switches the part to octal DTR.
    OctalDtr {
        opcode: u8,
        writes: &'static [(u32, u8)],
    },
}

/// Everything the driver needs to know about one part.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VendorProfile {
    pub vendor: Vendor,
    pub name: &'static str,
    pub manufacturer_id: u8,
    pub device_id: u16,
    /// Device id byte returned by the legacy 90h command.
    pub legacy_device_id: u8,
    /// Size in bytes.
    pub capacity: u32,
    pub opcodes: Opcodes,
    pub io_width: IoWidth,
    pub data_rate: DataRate,
    pub address_width: AddressWidth,
    pub read_dummy_cycles: u8,
    pub mode_entry: ModeEntry,
    /// Reference clock the part can run at once wide; `None` keeps the boot
    /// clock.
    pub fast_clock: Option<ClockSetting>,
}

impl VendorProfile {
    /// Wire format of the fast read once the part is in its wide mode.
    #[inline(always)]
    pub const fn read_protocol(&self) -> ProtocolDescriptor {
        match self.io_width {
            IoWidth::Octal => ProtocolDescriptor::uniform(self.io_width, self.data_rate),
            _ => ProtocolDescriptor::wide_address_and_data(self.io_width, self.data_rate),
        }
    }

    #[inline(always)]
    pub fn is_known(&self) -> bool {
        self.vendor.is_known()
    }
}

pub static PROFILES: [VendorProfile; 6] = [
    VendorProfile {
        vendor: Vendor::W25q16jv,
        name: "W25Q16JV",
        manufacturer_id: 0xEF,
        device_id: 0x4015,
        legacy_device_id: 0x14,
        capacity: 2 * 1024 * 1024,
        opcodes: JEDEC_OPCODES,
        io_width: IoWidth::Quad,
        data_rate: DataRate::Single,
        address_width: AddressWidth::Three,
        read_dummy_cycles: 6,
        // QE is bit 1 of status register 2
        mode_entry: ModeEntry::StatusWrite {
            opcode: 0x31,
            value: &[0x02],
        },
        fast_clock: Some(ClockSetting::new(1, 2)),
    },
    VendorProfile {
        vendor: Vendor::W25q64jv,
        name: "W25Q64JV",
        manufacturer_id: 0xEF,
        device_id: 0x4017,
        legacy_device_id: 0x16,
        capacity: 8 * 1024 * 1024,
        opcodes: JEDEC_OPCODES,
        io_width: IoWidth::Quad,
        data_rate: DataRate::Single,
        address_width: AddressWidth::Three,
        read_dummy_cycles: 6,
        mode_entry: ModeEntry::StatusWrite {
            opcode: 0x31,
            value: &[0x02],
        },
        fast_clock: Some(ClockSetting::new(1, 2)),
    },
    VendorProfile {
        vendor: Vendor::Gd25q64c,
        name: "GD25Q64C",
        manufacturer_id: 0xC8,
        device_id: 0x4017,
        legacy_device_id: 0x16,
        capacity: 8 * 1024 * 1024,
        opcodes: JEDEC_OPCODES,
        io_width: IoWidth::Quad,
        data_rate: DataRate::Single,
        address_width: AddressWidth::Three,
        read_dummy_cycles: 6,
        // two byte status write, QE in the second byte
        mode_entry: ModeEntry::StatusWrite {
            opcode: 0x01,
            value: &[0x00, 0x02],
        },
        fast_clock: Some(ClockSetting::new(1, 2)),
    },
    VendorProfile {
        vendor: Vendor::Mx25l6433f,
        name: "MX25L6433F",
        manufacturer_id: 0xC2,
        device_id: 0x2017,
        legacy_device_id: 0x16,
        capacity: 8 * 1024 * 1024,
        opcodes: JEDEC_OPCODES,
        io_width: IoWidth::Quad,
        data_rate: DataRate::Single,
        address_width: AddressWidth::Three,
        read_dummy_cycles: 6,
        // QE is bit 6 of the status register
        mode_entry: ModeEntry::StatusWrite {
            opcode: 0x01,
            value: &[0x40],
        },
        fast_clock: Some(ClockSetting::new(1, 3)),
    },
    VendorProfile {
        vendor: Vendor::Is25lp064a,
        name: "IS25LP064A",
        manufacturer_id: 0x9D,
        device_id: 0x6017,
        legacy_device_id: 0x16,
        capacity: 8 * 1024 * 1024,
        opcodes: Opcodes {
            fast_read: 0xED,
            ..JEDEC_OPCODES
        },
        io_width: IoWidth::Quad,
        data_rate: DataRate::Double,
        address_width: AddressWidth::Three,
        read_dummy_cycles: 6,
        mode_entry: ModeEntry::StatusWrite {
            opcode: 0x01,
            value: &[0x40],
        },
        fast_clock: None,
    },
    VendorProfile {
        vendor: Vendor::Mx25um51245g,
        name: "MX25UM51245G",
        manufacturer_id: 0xC2,
        device_id: 0x803A,
        legacy_device_id: 0x39,
        capacity: 64 * 1024 * 1024,
        opcodes: Opcodes {
            write_enable: 0x06,
            page_program: 0x12,
            read_status: 0x05,
            fast_read: 0xEE,
            read: 0x13,
            sector_erase: 0x21,
            chip_erase: 0x60,
        },
        io_width: IoWidth::Octal,
        data_rate: DataRate::Double,
        address_width: AddressWidth::Four,
        read_dummy_cycles: 20,
        // CR2 0x300: 20 dummy cycles, then CR2 0x0: DOPI
        mode_entry: ModeEntry::OctalDtr {
            opcode: 0x72,
            writes: &[(0x0000_0300, 0x00), (0x0000_0000, 0x02)],
        },
        fast_clock: Some(ClockSetting::new(1, 1)),
    },
];

/// Placeholder for a part that matched nothing; only JEDEC-standard reads
/// are issued against it.
pub static UNKNOWN_PROFILE: VendorProfile = VendorProfile {
    vendor: Vendor::Unknown,
    name: "unknown",
    manufacturer_id: 0,
    device_id: 0,
    legacy_device_id: 0,
    capacity: 0,
    opcodes: JEDEC_OPCODES,
    io_width: IoWidth::Single,
    data_rate: DataRate::Single,
    address_width: AddressWidth::Three,
    read_dummy_cycles: 0,
    mode_entry: ModeEntry::None,
    fast_clock: None,
};

/// Look up a JEDEC manufacturer/device pair.
pub fn lookup_jedec(manufacturer_id: u8, device_id: u16) -> &'static VendorProfile {
    PROFILES
        .iter()
        .find(|p| p.manufacturer_id == manufacturer_id && p.device_id == device_id)
        .unwrap_or(&UNKNOWN_PROFILE)
}

/// Look up a pair returned by the legacy 90h command.
pub fn lookup_legacy(manufacturer_id: u8, device_id: u8) -> &'static VendorProfile {
    PROFILES
        .iter()
        .find(|p| p.manufacturer_id == manufacturer_id && p.legacy_device_id == device_id)
        .unwrap_or(&UNKNOWN_PROFILE)
}

fn no_response(byte: u8) -> bool {
    byte == 0x00 || byte == 0xFF
}

/// Identify the attached chip.
///
/// Only single-wire commands are used, so this must run before the part is
/// switched to a wide mode. Reads the JEDEC id first and falls back to the
/// legacy manufacturer/device id when the chip does not answer it. Does not
/// change anything on the chip.
pub fn probe<C: SpiEngine>(
    engine: &mut TransactionEngine<C>,
) -> Result<&'static VendorProfile, Error> {
    let mut jedec = [0u8; 3];
    let mut xfer = TransferDescriptor::command(OP_READ_JEDEC_ID).reading(&mut jedec);
    engine.transfer(Direction::Read, &mut xfer, &ProtocolDescriptor::SINGLE)?;

    let profile = if no_response(jedec[0]) {
        warn!("flash: no JEDEC id ({:#x}), trying legacy id", jedec[0]);
        let mut legacy = [0u8; 2];
        let mut xfer = TransferDescriptor::command(OP_READ_MF_DID)
            .with_address(0, 3)
            .reading(&mut legacy);
        engine.transfer(Direction::Read, &mut xfer, &ProtocolDescriptor::SINGLE)?;
        lookup_legacy(legacy[0], legacy[1])
    } else {
        lookup_jedec(jedec[0], u16::from_be_bytes([jedec[1], jedec[2]]))
    };

    if profile.is_known() {
        info!(
            "flash: {} (mfr {:#x}, dev {:#x})",
            profile.name,
            profile.manufacturer_id,
            profile.device_id
        );
    } else {
        warn!(
            "flash: unrecognised part {:#x} {:#x} {:#x}",
            jedec[0],
            jedec[1],
            jedec[2]
        );
    }
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimController;

    #[test]
    fn index_round_trips_through_the_table() {
        for profile in PROFILES.iter() {
            assert_eq!(Vendor::from_index(profile.vendor.index()), profile.vendor);
            assert_eq!(profile.vendor.profile(), profile);
        }
        assert_eq!(Vendor::from_index(6), Vendor::Unknown);
        assert_eq!(Vendor::Unknown.profile(), &UNKNOWN_PROFILE);
    }

    #[test]
    fn jedec_pairs_are_unique() {
        for (i, a) in PROFILES.iter().enumerate() {
            for b in PROFILES.iter().skip(i + 1) {
                assert!(
                    (a.manufacturer_id, a.device_id) != (b.manufacturer_id, b.device_id),
                    "{} and {} share an id",
                    a.name,
                    b.name
                );
            }
        }
    }

    #[test]
    fn probe_is_idempotent() {
        let mut engine = TransactionEngine::new(SimController::new(Vendor::Gd25q64c.profile()));
        let first = probe(&mut engine).unwrap();
        let second = probe(&mut engine).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.vendor, Vendor::Gd25q64c);
    }

    #[test]
    fn falls_back_to_legacy_id() {
        let mut sim = SimController::new(Vendor::Mx25um51245g.profile());
        sim.set_legacy_id_only(true);
        let mut engine = TransactionEngine::new(sim);
        assert_eq!(probe(&mut engine).unwrap().vendor, Vendor::Mx25um51245g);
    }

    #[test]
    fn unmatched_part_is_unknown() {
        let mut sim = SimController::new(Vendor::W25q64jv.profile());
        sim.set_jedec_id([0x1F, 0x12, 0x34]);
        let mut engine = TransactionEngine::new(sim);
        assert_eq!(probe(&mut engine).unwrap().vendor, Vendor::Unknown);
    }

    #[test]
    fn octal_part_reads_on_every_line() {
        let proto = Vendor::Mx25um51245g.profile().read_protocol();
        assert_eq!(proto.command.width, IoWidth::Octal);
        let proto = Vendor::W25q64jv.profile().read_protocol();
        assert!(proto.command.is_plain_spi());
        assert_eq!(proto.data.width, IoWidth::Quad);
    }
}
