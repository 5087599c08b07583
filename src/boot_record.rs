//! State handed from the bootloader to the application.
//!
//! The bootloader probes the flash once and records the result in a small
//! record at a fixed retained-RAM address. The application never probes: by
//! the time it runs the chip is already in its wide mode and would not answer
//! single-wire identification commands. It reads the record instead.

use bitflags::bitflags;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{SHARED_RECORD_ADDRESS, SHARED_RECORD_SIZE};
use crate::engine::TransactionEngine;
use crate::error::Error;
use crate::traits::SpiEngine;
use crate::vendor::{self, Vendor, VendorProfile};

bitflags! {
    /// Causes of the most recent reset.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BootType: u32 {
        const POWER_ON = 1 << 0;
        const EXTERNAL_PIN = 1 << 1;
        const WATCHDOG = 1 << 2;
        const SOFTWARE = 1 << 3;
        const SLEEP_WAKE = 1 << 4;
        const RETENTION_WAKE = 1 << 5;
    }
}

/// Binary layout shared with every bootloader build; do not reorder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct SharedBootRecord {
    pub flash_id_index: u8,
    pub reserved0: [u8; 3],
    pub boot_type: u32,
    pub metal_version: u32,
    pub reserved1: [u8; 20],
}

const _: () = assert!(core::mem::size_of::<SharedBootRecord>() == SHARED_RECORD_SIZE);

impl SharedBootRecord {
    /// Contents at first boot: no part identified yet.
    pub const BLANK: Self = Self {
        flash_id_index: Vendor::Unknown as u8,
        reserved0: [0; 3],
        boot_type: 0,
        metal_version: 0,
        reserved1: [0; 20],
    };

    pub fn new(vendor: Vendor, boot_type: BootType, metal_version: u32) -> Self {
        Self {
            flash_id_index: vendor.index(),
            boot_type: boot_type.bits(),
            metal_version,
            ..Self::BLANK
        }
    }

    /// The recorded part; out of range indices read as `Unknown`.
    pub fn vendor(&self) -> Vendor {
        Vendor::from_index(self.flash_id_index)
    }

    /// Unknown bits are kept.
    pub fn boot_type(&self) -> BootType {
        BootType::from_bits_retain(self.boot_type)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Self::read_from_bytes(bytes).ok()
    }
}

impl Default for SharedBootRecord {
    fn default() -> Self {
        Self::BLANK
    }
}

/// Where the shared record lives.
pub trait BootRecordStore {
    fn load(&self) -> SharedBootRecord;
    fn store(&mut self, record: &SharedBootRecord);
}

/// The record in retained RAM, accessed with volatile reads and writes.
#[derive(Debug)]
pub struct FixedAddressRecord {
    ptr: *mut SharedBootRecord,
}

impl FixedAddressRecord {
    /// # Safety
    ///
    /// `address` must be valid for reads and writes of
    /// [`SHARED_RECORD_SIZE`] bytes, 4-byte aligned, and not used for
    /// anything else for the lifetime of the returned value.
    pub const unsafe fn new(address: usize) -> Self {
        Self {
            ptr: address as *mut SharedBootRecord,
        }
    }

    /// # Safety
    ///
    /// See [`FixedAddressRecord::new`]; the linker script must reserve
    /// [`SHARED_RECORD_ADDRESS`].
    pub const unsafe fn default_location() -> Self {
        Self::new(SHARED_RECORD_ADDRESS)
    }
}

impl BootRecordStore for FixedAddressRecord {
    fn load(&self) -> SharedBootRecord {
        // SAFETY: guaranteed by the constructor contract.
        unsafe { core::ptr::read_volatile(self.ptr) }
    }

    fn store(&mut self, record: &SharedBootRecord) {
        // SAFETY: guaranteed by the constructor contract.
        unsafe { core::ptr::write_volatile(self.ptr, *record) }
    }
}

/// A record held by value, for hosted builds and tests.
impl BootRecordStore for SharedBootRecord {
    fn load(&self) -> SharedBootRecord {
        *self
    }

    fn store(&mut self, record: &SharedBootRecord) {
        *self = *record;
    }
}

/// Write `record` unless the store already holds it. Returns whether a write
/// happened.
pub fn persist<S: BootRecordStore + ?Sized>(store: &mut S, record: &SharedBootRecord) -> bool {
    if store.load() == *record {
        return false;
    }
    store.store(record);
    true
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootStage {
    Bootloader,
    Application,
}

/// Typed view of the handoff, passed explicitly to whatever needs the flash
/// profile.
#[derive(Clone, Copy, Debug)]
pub struct BootContext {
    pub stage: BootStage,
    pub profile: &'static VendorProfile,
    pub boot_type: BootType,
    pub metal_version: u32,
}

impl BootContext {
    /// Probe the chip and record the result for the application.
    pub fn for_bootloader<C, S>(
        engine: &mut TransactionEngine<C>,
        store: &mut S,
        boot_type: BootType,
        metal_version: u32,
    ) -> Result<Self, Error>
    where
        C: SpiEngine,
        S: BootRecordStore + ?Sized,
    {
        let profile = vendor::probe(engine)?;
        let record = SharedBootRecord::new(profile.vendor, boot_type, metal_version);
        if persist(store, &record) {
            debug!("boot record: stored flash index {}", record.flash_id_index);
        }
        Ok(Self {
            stage: BootStage::Bootloader,
            profile,
            boot_type,
            metal_version,
        })
    }

    /// Trust the bootloader's record; never touches the chip.
    pub fn for_application<S: BootRecordStore + ?Sized>(store: &S) -> Self {
        let record = store.load();
        let vendor = record.vendor();
        debug!("boot record: loaded flash index {}", record.flash_id_index);
        if !vendor.is_known() {
            warn!("boot record: no known flash part, vendor specific operations disabled");
        }
        Self {
            stage: BootStage::Application,
            profile: vendor.profile(),
            boot_type: record.boot_type(),
            metal_version: record.metal_version,
        }
    }

    pub fn vendor(&self) -> Vendor {
        self.profile.vendor
    }
}
