//! Serial NOR flash bring-up, partition access and the XIP security gate for
//! a RISC-V boot firmware.
//!
//! The bootloader stage probes the attached part, records it in the shared
//! boot record, switches it to its fastest mode and maps it for
//! execute-in-place. The application stage attaches to the already configured
//! part from the record alone. Both stages reach the image slots through
//! [`flash_map::FlashMap`].
//!
//! Functions that may run while the flash is busy are linked into
//! `.ram_text.nor` on `riscv32` bare-metal targets; the linker script must
//! place that section in RAM.
#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
mod fmt;

pub mod boot;
pub mod boot_record;
pub mod config;
pub mod engine;
pub mod error;
pub mod flash_map;
pub mod gate;
pub mod nor;
pub mod protocol;
pub mod speedup;
pub mod spi_bus;
pub mod traits;
pub mod vendor;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use error::{Error, SecureBootFailure};
pub use traits::{DecryptEngine, HardwareFlashDevice, SpiEngine, XipWindow};
