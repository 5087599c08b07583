//! Fixed flash areas handed to the image swap engine.
//!
//! The partition tables are compiled in and checked at compile time. Every
//! operation is bounds checked against its area before the device is
//! touched, and offsets handed in are always relative to the area.

use embedded_storage::nor_flash::{ErrorType, NorFlash, ReadNorFlash};

use crate::config::{ERASED_VALUE, FLASH_DEVICE_ID, PAGE_SIZE, SECTOR_SIZE, VERIFY_WRITES};
use crate::error::Error;
use crate::traits::HardwareFlashDevice;

/// Number of updatable images.
pub const IMAGE_COUNT: u8 = 1;

/// Identifier of a flash area.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AreaId {
    Bootloader,
    Primary(u8),
    Secondary(u8),
    Scratch,
}

impl AreaId {
    /// Numeric id: bootloader 0, image 0 slots 1 and 2, scratch 3, then two
    /// ids per further image from 5. `None` for an image past the last id.
    pub const fn to_raw(self) -> Option<u8> {
        let (base, image) = match self {
            AreaId::Bootloader => return Some(0),
            AreaId::Primary(0) => return Some(1),
            AreaId::Secondary(0) => return Some(2),
            AreaId::Scratch => return Some(3),
            AreaId::Primary(image) => (3, image),
            AreaId::Secondary(image) => (4, image),
        };
        match image.checked_mul(2) {
            Some(offset) => offset.checked_add(base),
            None => None,
        }
    }

    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(AreaId::Bootloader),
            1 => Some(AreaId::Primary(0)),
            2 => Some(AreaId::Secondary(0)),
            3 => Some(AreaId::Scratch),
            4 => None,
            n if n % 2 == 1 => Some(AreaId::Primary((n - 3) / 2)),
            n => Some(AreaId::Secondary((n - 4) / 2)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Slot {
    Primary,
    Secondary,
    Scratch,
}

/// Area holding `slot` of `image_index`, or `None` past the last image.
pub fn id_for_slot(image_index: u8, slot: Slot) -> Option<AreaId> {
    if image_index >= IMAGE_COUNT {
        return None;
    }
    Some(match slot {
        Slot::Primary => AreaId::Primary(image_index),
        Slot::Secondary => AreaId::Secondary(image_index),
        Slot::Scratch => AreaId::Scratch,
    })
}

/// Inverse of [`id_for_slot`]. The bootloader area is not a slot.
pub fn slot_for_id(id: AreaId) -> Option<(u8, Slot)> {
    match id {
        AreaId::Bootloader => None,
        AreaId::Primary(image) if image < IMAGE_COUNT => Some((image, Slot::Primary)),
        AreaId::Secondary(image) if image < IMAGE_COUNT => Some((image, Slot::Secondary)),
        AreaId::Scratch => Some((0, Slot::Scratch)),
        _ => None,
    }
}

/// A fixed region of the flash device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashArea {
    id: AreaId,
    device_id: u8,
    offset: u32,
    size: u32,
}

impl FlashArea {
    pub const fn new(id: AreaId, offset: u32, size: u32) -> Self {
        Self {
            id,
            device_id: FLASH_DEVICE_ID,
            offset,
            size,
        }
    }

    pub const fn id(&self) -> AreaId {
        self.id
    }

    pub const fn device_id(&self) -> u8 {
        self.device_id
    }

    /// Offset of the area from the start of the device.
    pub const fn offset(&self) -> u32 {
        self.offset
    }

    pub const fn size(&self) -> u32 {
        self.size
    }

    pub const fn sector_count(&self) -> u32 {
        self.size / SECTOR_SIZE
    }

    /// Device address of `offset..offset + len`, if it lies inside the area.
    fn device_range(&self, offset: u32, len: usize) -> Result<u32, Error> {
        let len = u32::try_from(len).map_err(|_| Error::OutOfBounds)?;
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(self.offset + offset),
            _ => Err(Error::OutOfBounds),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashSector {
    pub offset_in_area: u32,
    pub size: u32,
}

/// A span of the device outside every flash area.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Region {
    pub offset: u32,
    pub size: u32,
}

/// One complete partitioning of the device.
#[derive(Debug)]
pub struct Layout {
    pub total_size: u32,
    pub areas: [FlashArea; 4],
    /// Free space left for data storage.
    pub storage: Region,
}

impl Layout {
    /// Areas and storage are sector aligned, inside the device and do not
    /// overlap.
    pub const fn is_valid(&self) -> bool {
        let mut spans = [(0u32, 0u32); 5];
        let mut i = 0;
        while i < self.areas.len() {
            spans[i] = (self.areas[i].offset, self.areas[i].size);
            i += 1;
        }
        spans[4] = (self.storage.offset, self.storage.size);

        let mut i = 0;
        while i < spans.len() {
            let (offset, size) = spans[i];
            if offset % SECTOR_SIZE != 0 || size % SECTOR_SIZE != 0 || size == 0 {
                return false;
            }
            if offset as u64 + size as u64 > self.total_size as u64 {
                return false;
            }
            let mut j = i + 1;
            while j < spans.len() {
                let (other, other_size) = spans[j];
                if offset < other + other_size && other < offset + size {
                    return false;
                }
                j += 1;
            }
            i += 1;
        }
        true
    }
}

pub const LAYOUT_2M: Layout = Layout {
    total_size: 0x0020_0000,
    areas: [
        FlashArea::new(AreaId::Bootloader, 0x0000_0000, 0x0001_0000),
        FlashArea::new(AreaId::Primary(0), 0x0001_0000, 0x000C_0000),
        FlashArea::new(AreaId::Secondary(0), 0x000D_0000, 0x000C_0000),
        FlashArea::new(AreaId::Scratch, 0x0019_0000, 0x0001_0000),
    ],
    storage: Region {
        offset: 0x001A_0000,
        size: 0x0006_0000,
    },
};

pub const LAYOUT_8M: Layout = Layout {
    total_size: 0x0080_0000,
    areas: [
        FlashArea::new(AreaId::Bootloader, 0x0000_0000, 0x0002_0000),
        FlashArea::new(AreaId::Primary(0), 0x0002_0000, 0x0030_0000),
        FlashArea::new(AreaId::Secondary(0), 0x0032_0000, 0x0030_0000),
        FlashArea::new(AreaId::Scratch, 0x0062_0000, 0x0002_0000),
    ],
    storage: Region {
        offset: 0x0064_0000,
        size: 0x001C_0000,
    },
};

const _: () = assert!(LAYOUT_2M.is_valid());
const _: () = assert!(LAYOUT_8M.is_valid());

#[cfg(feature = "layout-2m")]
pub static ACTIVE_LAYOUT: &Layout = &LAYOUT_2M;
#[cfg(not(feature = "layout-2m"))]
pub static ACTIVE_LAYOUT: &Layout = &LAYOUT_8M;

/// The flash areas of one device.
pub struct FlashMap<D> {
    device: D,
    layout: &'static Layout,
}

impl<D> core::fmt::Debug for FlashMap<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FlashMap")
            .field("total_size", &self.layout.total_size)
            .finish()
    }
}

impl<D> FlashMap<D>
where
    D: HardwareFlashDevice<Error = Error>,
{
    pub fn new(device: D) -> Result<Self, Error> {
        Self::with_layout(device, ACTIVE_LAYOUT)
    }

    /// Fails if the device is known to be smaller than the layout.
    pub fn with_layout(device: D, layout: &'static Layout) -> Result<Self, Error> {
        let capacity = device.capacity();
        if capacity != 0 && capacity < layout.total_size {
            error!(
                "flash map: layout needs {:#x} bytes, device has {:#x}",
                layout.total_size,
                capacity
            );
            return Err(Error::OutOfBounds);
        }
        Ok(Self { device, layout })
    }

    pub fn layout(&self) -> &'static Layout {
        self.layout
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn release(self) -> D {
        self.device
    }

    pub fn open(&self, id: AreaId) -> Option<FlashArea> {
        self.layout.areas.iter().find(|area| area.id == id).copied()
    }

    pub fn storage_region(&self) -> Region {
        self.layout.storage
    }

    /// Minimum write granularity.
    pub fn align(&self) -> u32 {
        1
    }

    pub fn erased_val(&self) -> u8 {
        ERASED_VALUE
    }

    pub fn read(&mut self, area: &FlashArea, offset: u32, buf: &mut [u8]) -> Result<(), Error> {
        let address = area.device_range(offset, buf.len())?;
        self.device.read(address, buf)
    }

    /// Program `data` at `offset`, one page at a time. The range must have
    /// been erased.
    pub fn write(&mut self, area: &FlashArea, offset: u32, data: &[u8]) -> Result<(), Error> {
        let mut address = area.device_range(offset, data.len())?;
        let mut rest = data;
        while !rest.is_empty() {
            let room = (PAGE_SIZE - address % PAGE_SIZE) as usize;
            let (chunk, tail) = rest.split_at(room.min(rest.len()));
            self.device.page_program(address, chunk)?;
            if VERIFY_WRITES {
                self.verify(address, |i| chunk[i], chunk.len())?;
            }
            address += chunk.len() as u32;
            rest = tail;
        }
        Ok(())
    }

    /// Erase `len` bytes at `offset`; both must be sector aligned.
    pub fn erase(&mut self, area: &FlashArea, offset: u32, len: u32) -> Result<(), Error> {
        let start = area.device_range(offset, len as usize)?;
        if offset % SECTOR_SIZE != 0 || len % SECTOR_SIZE != 0 {
            return Err(Error::NotAligned);
        }
        let mut address = start;
        while address < start + len {
            self.device.sector_erase(address)?;
            address += SECTOR_SIZE;
        }
        if VERIFY_WRITES {
            self.verify(start, |_| ERASED_VALUE, len as usize)?;
        }
        Ok(())
    }

    /// Read back `len` bytes at `address` and compare with `expected`.
    fn verify(
        &mut self,
        address: u32,
        expected: impl Fn(usize) -> u8,
        len: usize,
    ) -> Result<(), Error> {
        let mut buf = [0u8; PAGE_SIZE as usize];
        let mut done = 0;
        while done < len {
            let n = (len - done).min(buf.len());
            self.device.read(address + done as u32, &mut buf[..n])?;
            if let Some(i) = (0..n).find(|&i| buf[i] != expected(done + i)) {
                let bad = address + (done + i) as u32;
                error!(
                    "flash map: readback mismatch at {:#x}: {:#x} != {:#x}",
                    bad,
                    buf[i],
                    expected(done + i)
                );
                return Err(Error::VerificationMismatch { address: bad });
            }
            done += n;
        }
        Ok(())
    }
}

impl<D> FlashMap<D> {
    /// Sectors of `area`, in order.
    pub fn sectors(&self, area: &FlashArea) -> impl Iterator<Item = FlashSector> {
        (0..area.sector_count()).map(|i| FlashSector {
            offset_in_area: i * SECTOR_SIZE,
            size: SECTOR_SIZE,
        })
    }

    /// Fill `out` with the sectors of `area` and return how many there are.
    pub fn get_sectors(&self, area: &FlashArea, out: &mut [FlashSector]) -> Result<usize, Error> {
        let count = area.sector_count() as usize;
        if out.len() < count {
            return Err(Error::OutOfBounds);
        }
        for (slot, sector) in out.iter_mut().zip(self.sectors(area)) {
            *slot = sector;
        }
        Ok(count)
    }

    /// The sector containing `offset`.
    pub fn get_sector(&self, area: &FlashArea, offset: u32) -> Result<FlashSector, Error> {
        if offset >= area.size {
            return Err(Error::OutOfBounds);
        }
        Ok(FlashSector {
            offset_in_area: offset - offset % SECTOR_SIZE,
            size: SECTOR_SIZE,
        })
    }
}

/// One flash area as an `embedded-storage` NOR flash.
pub struct FlashAreaStorage<'a, D> {
    map: &'a mut FlashMap<D>,
    area: FlashArea,
}

impl<'a, D> FlashAreaStorage<'a, D> {
    pub fn new(map: &'a mut FlashMap<D>, area: FlashArea) -> Self {
        Self { map, area }
    }

    pub fn area(&self) -> &FlashArea {
        &self.area
    }
}

impl<D> ErrorType for FlashAreaStorage<'_, D> {
    type Error = Error;
}

impl<D> ReadNorFlash for FlashAreaStorage<'_, D>
where
    D: HardwareFlashDevice<Error = Error>,
{
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Error> {
        self.map.read(&self.area, offset, bytes)
    }

    fn capacity(&self) -> usize {
        self.area.size as usize
    }
}

impl<D> NorFlash for FlashAreaStorage<'_, D>
where
    D: HardwareFlashDevice<Error = Error>,
{
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = SECTOR_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Error> {
        let len = to.checked_sub(from).ok_or(Error::OutOfBounds)?;
        self.map.erase(&self.area, from, len)
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Error> {
        self.map.write(&self.area, offset, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TransactionEngine;
    use crate::nor::NorFlash as NorDevice;
    use crate::sim::SimController;
    use crate::vendor::Vendor;

    fn map(vendor: Vendor, layout: &'static Layout) -> FlashMap<NorDevice<SimController>> {
        let profile = vendor.profile();
        let flash = NorDevice::new(TransactionEngine::new(SimController::new(profile)), profile);
        FlashMap::with_layout(flash, layout).unwrap()
    }

    fn transactions(map: &FlashMap<NorDevice<SimController>>) -> u32 {
        map.device().controller().transactions()
    }

    #[test]
    fn write_then_read_round_trips_across_pages() {
        let mut map = map(Vendor::W25q64jv, &LAYOUT_8M);
        let area = map.open(AreaId::Secondary(0)).unwrap();
        let data: std::vec::Vec<u8> = (0..700u32).map(|i| (i * 7) as u8).collect();
        map.write(&area, 0x80, &data).unwrap();
        let mut back = std::vec![0u8; data.len()];
        map.read(&area, 0x80, &mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn erase_then_read_gives_erased_value() {
        let mut map = map(Vendor::W25q64jv, &LAYOUT_8M);
        let area = map.open(AreaId::Scratch).unwrap();
        map.write(&area, 0x10, &[0u8; 64]).unwrap();
        map.erase(&area, 0, 2 * SECTOR_SIZE).unwrap();
        let mut back = [0u8; 64];
        map.read(&area, 0x10, &mut back).unwrap();
        assert!(back.iter().all(|&b| b == map.erased_val()));
    }

    #[test]
    fn out_of_bounds_never_reaches_the_device() {
        let mut map = map(Vendor::W25q64jv, &LAYOUT_8M);
        let area = map.open(AreaId::Bootloader).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(
            map.read(&area, area.size() - 8, &mut buf),
            Err(Error::OutOfBounds)
        );
        assert_eq!(map.write(&area, area.size(), &[1]), Err(Error::OutOfBounds));
        assert_eq!(
            map.erase(&area, area.size(), SECTOR_SIZE),
            Err(Error::OutOfBounds)
        );
        assert_eq!(map.read(&area, u32::MAX, &mut buf), Err(Error::OutOfBounds));
        assert_eq!(transactions(&map), 0);
    }

    #[test]
    fn misaligned_erase_never_reaches_the_device() {
        let mut map = map(Vendor::W25q64jv, &LAYOUT_8M);
        let area = map.open(AreaId::Primary(0)).unwrap();
        assert_eq!(map.erase(&area, 0x800, SECTOR_SIZE), Err(Error::NotAligned));
        assert_eq!(map.erase(&area, 0, 0x800), Err(Error::NotAligned));
        assert_eq!(transactions(&map), 0);
    }

    #[test]
    fn slot_ids_form_a_bijection() {
        for image in 0..IMAGE_COUNT {
            for slot in [Slot::Primary, Slot::Secondary, Slot::Scratch] {
                let id = id_for_slot(image, slot).unwrap();
                let back = slot_for_id(id).unwrap();
                assert_eq!(id_for_slot(back.0, back.1), Some(id));
                if slot != Slot::Scratch {
                    assert_eq!(back, (image, slot));
                }
                assert_eq!(id.to_raw().and_then(AreaId::from_raw), Some(id));
            }
        }
        assert_eq!(id_for_slot(IMAGE_COUNT, Slot::Primary), None);
        assert_eq!(slot_for_id(AreaId::Bootloader), None);
    }

    #[test]
    fn raw_ids_match_the_swap_engine_numbering() {
        assert_eq!(AreaId::Bootloader.to_raw(), Some(0));
        assert_eq!(AreaId::Primary(0).to_raw(), Some(1));
        assert_eq!(AreaId::Secondary(0).to_raw(), Some(2));
        assert_eq!(AreaId::Scratch.to_raw(), Some(3));
        assert_eq!(AreaId::from_raw(4), None);
        assert_eq!(AreaId::from_raw(5), Some(AreaId::Primary(1)));
        assert_eq!(AreaId::from_raw(6), Some(AreaId::Secondary(1)));
    }

    #[test]
    fn raw_ids_stop_at_the_top_of_the_range() {
        assert_eq!(AreaId::Primary(126).to_raw(), Some(255));
        assert_eq!(AreaId::Secondary(125).to_raw(), Some(254));
        assert_eq!(AreaId::Primary(127).to_raw(), None);
        assert_eq!(AreaId::Secondary(126).to_raw(), None);
        assert_eq!(AreaId::Secondary(200).to_raw(), None);
        assert_eq!(AreaId::from_raw(255), Some(AreaId::Primary(126)));
    }

    #[test]
    fn sector_enumeration() {
        let map = map(Vendor::W25q16jv, &LAYOUT_2M);
        let area = map.open(AreaId::Bootloader).unwrap();
        let mut sectors = [FlashSector {
            offset_in_area: 0,
            size: 0,
        }; 16];
        assert_eq!(map.get_sectors(&area, &mut sectors), Ok(16));
        assert_eq!(sectors[15].offset_in_area, 15 * SECTOR_SIZE);
        assert!(sectors.iter().all(|s| s.size == SECTOR_SIZE));
        assert_eq!(
            map.get_sectors(&area, &mut sectors[..15]),
            Err(Error::OutOfBounds)
        );

        let sector = map.get_sector(&area, 0x1234).unwrap();
        assert_eq!(sector.offset_in_area, 0x1000);
        assert_eq!(map.get_sector(&area, area.size()), Err(Error::OutOfBounds));
        assert_eq!(map.sectors(&area).count(), 16);
    }

    #[test]
    fn layout_bigger_than_device_is_rejected() {
        let profile = Vendor::W25q16jv.profile();
        let flash = NorDevice::new(TransactionEngine::new(SimController::new(profile)), profile);
        assert!(FlashMap::with_layout(flash, &LAYOUT_8M).is_err());
    }

    #[test]
    fn overlapping_layout_is_invalid() {
        let layout = Layout {
            total_size: 0x0010_0000,
            areas: [
                FlashArea::new(AreaId::Bootloader, 0, 0x1_0000),
                FlashArea::new(AreaId::Primary(0), 0x8000, 0x1_0000),
                FlashArea::new(AreaId::Secondary(0), 0x2_0000, 0x1_0000),
                FlashArea::new(AreaId::Scratch, 0x3_0000, 0x1_0000),
            ],
            storage: Region {
                offset: 0x4_0000,
                size: 0x1_0000,
            },
        };
        assert!(!layout.is_valid());
    }

    #[test]
    fn corrupted_program_is_reported() {
        let mut map = map(Vendor::W25q64jv, &LAYOUT_8M);
        map.device_mut().controller_mut().set_corrupt_program(true);
        let area = map.open(AreaId::Primary(0)).unwrap();
        let result = map.write(&area, 0, &[0x12; 4]);
        if VERIFY_WRITES {
            assert_eq!(
                result,
                Err(Error::VerificationMismatch {
                    address: area.offset()
                })
            );
        }
    }

    #[test]
    fn sector_that_stays_programmed_is_reported() {
        let mut map = map(Vendor::W25q64jv, &LAYOUT_8M);
        let area = map.open(AreaId::Scratch).unwrap();
        map.write(&area, 0, &[0x00; 16]).unwrap();
        map.device_mut().controller_mut().set_corrupt_erase(true);
        let result = map.erase(&area, 0, SECTOR_SIZE);
        if VERIFY_WRITES {
            assert_eq!(
                result,
                Err(Error::VerificationMismatch {
                    address: area.offset()
                })
            );
        }
    }

    #[test]
    fn primary_slot_pattern_is_gone_after_sector_erase() {
        let mut map = map(Vendor::W25q64jv, &LAYOUT_8M);
        let area = map.open(AreaId::Primary(0)).unwrap();
        map.write(&area, 0x1000, &[0xA5; 512]).unwrap();
        let mut back = [0u8; 512];
        map.read(&area, 0x1000, &mut back).unwrap();
        assert_eq!(back, [0xA5; 512]);

        let sector = map.get_sector(&area, 0x1000).unwrap();
        map.erase(&area, sector.offset_in_area, sector.size).unwrap();
        map.read(&area, 0x1000, &mut back).unwrap();
        assert_eq!(back, [0xFF; 512]);
    }

    #[test]
    fn area_works_as_embedded_storage() {
        let mut map = map(Vendor::W25q64jv, &LAYOUT_8M);
        let area = map.open(AreaId::Scratch).unwrap();
        let mut storage = FlashAreaStorage::new(&mut map, area);
        assert_eq!(storage.capacity(), area.size() as usize);
        NorFlash::erase(&mut storage, 0, SECTOR_SIZE).unwrap();
        NorFlash::write(&mut storage, 4, b"boot").unwrap();
        let mut buf = [0u8; 4];
        ReadNorFlash::read(&mut storage, 4, &mut buf).unwrap();
        assert_eq!(&buf, b"boot");
        assert_eq!(
            NorFlash::erase(&mut storage, SECTOR_SIZE, 0),
            Err(Error::OutOfBounds)
        );
    }
}
