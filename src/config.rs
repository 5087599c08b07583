// Build-time constants shared by the boot stages.

// =============================================================================
// Flash geometry
// =============================================================================

/// Smallest erasable unit (4 KiB sector erase).
pub const SECTOR_SIZE: u32 = 4096;

/// Largest chunk a single page program accepts.
pub const PAGE_SIZE: u32 = 256;

/// Value every byte reads back as after an erase.
pub const ERASED_VALUE: u8 = 0xFF;

/// Identifier of the only flash device behind the flash map.
pub const FLASH_DEVICE_ID: u8 = 0;

// =============================================================================
// Transaction engine
// =============================================================================

/// Number of completion polls a single transaction may take before it is
/// reported as timed out.
pub const TRANSFER_POLL_BUDGET: u32 = 0x0010_0000;

// =============================================================================
// AXI read window / clocking
// =============================================================================

/// Base address of the read window in normal operation.
pub const WINDOW_NORMAL_BASE: u32 = 0x6000_0000;

/// Largest flash span the read window can map.
pub const WINDOW_SIZE: u32 = 0x0400_0000;

/// Reference clock multiply/divide programmed by the boot ROM.
pub const BOOT_CLOCK_MULTIPLIER: u8 = 1;
pub const BOOT_CLOCK_DIVIDER: u8 = 4;

/// Dummy instructions to run after retuning the reference clock.
pub const CLOCK_SETTLE_CYCLES: u32 = 64;

// =============================================================================
// Shared boot record
// =============================================================================

/// Retained RAM address of the record handed from bootloader to application.
pub const SHARED_RECORD_ADDRESS: usize = 0x2000_7FE0;

/// Size of the shared record including its reserved tail.
pub const SHARED_RECORD_SIZE: usize = 32;

// =============================================================================
// XIP security gate
// =============================================================================

/// Magic expected in the first 16 bytes of an encrypted flash image.
pub const XIP_PREAMBLE: [u8; 16] = [
    0x58, 0x49, 0x50, 0x45, 0x4E, 0x43, 0x52, 0x59, // "XIPENCRY"
    0x50, 0x54, 0x2D, 0x56, 0x31, 0x00, 0xA5, 0x5A, // "PT-V1" + tag
];

/// Build-time override that forces the gate to run without the fuse.
pub const FORCE_SECURE_XIP: bool = cfg!(feature = "force-secure-xip");

/// Whether program/erase results are read back and compared.
pub const VERIFY_WRITES: bool = cfg!(any(debug_assertions, feature = "verify"));

/// Dummy instructions to wait after releasing deep power-down (tRES1).
pub const POWER_DOWN_RELEASE_CYCLES: u32 = 256;
