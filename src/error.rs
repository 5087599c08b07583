use core::fmt::{self, Debug};
use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};

/// Reasons the XIP security gate refuses to hand over to the image.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SecureBootFailure {
    /// The first 16 bytes of flash are not the encrypted-image preamble.
    PreambleMismatch,
    /// The decrypt sequence was halted by the debug module.
    DebugHalted,
    /// The accelerator rejected the image signature.
    SignatureInvalid,
    /// Encryption is explicitly disabled for this image.
    EncryptionDisabled,
    /// The engine stopped without raising its success flag.
    NotCompleted,
}

/// The error type used by this library.
///
/// Storage errors are always handed back to the caller. Only `SecureBoot`
/// is meant to stop the boot.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Offset or length reaches past the end of the area or the device.
    OutOfBounds,
    /// Erase offset or length is not a multiple of the sector size.
    NotAligned,
    /// The controller did not report completion within its poll budget.
    Timeout,
    /// Readback after a program or erase differs from what was expected.
    VerificationMismatch { address: u32 },
    /// The attached chip matched no profile; vendor specific commands are refused.
    UnknownVendor,
    /// The security gate failed; the image must not be started.
    SecureBoot(SecureBootFailure),
    /// Transfer direction and data phase disagree.
    InvalidTransfer,
    /// The controller cannot carry out the requested transfer.
    Unsupported,
    /// An SPI transfer failed.
    Bus(embedded_hal::spi::ErrorKind),
}

impl Error {
    /// Whether the caller may reasonably try the same operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout | Error::Bus(_))
    }

    /// Whether the boot must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::SecureBoot(_))
    }
}

impl From<SecureBootFailure> for Error {
    fn from(failure: SecureBootFailure) -> Self {
        Error::SecureBoot(failure)
    }
}

impl NorFlashError for Error {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Error::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            Error::NotAligned => NorFlashErrorKind::NotAligned,
            _ => NorFlashErrorKind::Other,
        }
    }
}

impl Debug for SecureBootFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SecureBootFailure::PreambleMismatch => "PreambleMismatch",
            SecureBootFailure::DebugHalted => "DebugHalted",
            SecureBootFailure::SignatureInvalid => "SignatureInvalid",
            SecureBootFailure::EncryptionDisabled => "EncryptionDisabled",
            SecureBootFailure::NotCompleted => "NotCompleted",
        };
        f.write_str(name)
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfBounds => write!(f, "Error::OutOfBounds"),
            Error::NotAligned => write!(f, "Error::NotAligned"),
            Error::Timeout => write!(f, "Error::Timeout"),
            Error::VerificationMismatch { address } => {
                write!(f, "Error::VerificationMismatch({:#010x})", address)
            }
            Error::UnknownVendor => write!(f, "Error::UnknownVendor"),
            Error::SecureBoot(failure) => write!(f, "Error::SecureBoot({:?})", failure),
            Error::InvalidTransfer => write!(f, "Error::InvalidTransfer"),
            Error::Unsupported => write!(f, "Error::Unsupported"),
            Error::Bus(kind) => write!(f, "Error::Bus({:?})", kind),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for SecureBootFailure {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            SecureBootFailure::PreambleMismatch => defmt::write!(fmt, "PreambleMismatch"),
            SecureBootFailure::DebugHalted => defmt::write!(fmt, "DebugHalted"),
            SecureBootFailure::SignatureInvalid => defmt::write!(fmt, "SignatureInvalid"),
            SecureBootFailure::EncryptionDisabled => defmt::write!(fmt, "EncryptionDisabled"),
            SecureBootFailure::NotCompleted => defmt::write!(fmt, "NotCompleted"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Error::OutOfBounds => defmt::write!(fmt, "Error::OutOfBounds"),
            Error::NotAligned => defmt::write!(fmt, "Error::NotAligned"),
            Error::Timeout => defmt::write!(fmt, "Error::Timeout"),
            Error::VerificationMismatch { address } => {
                defmt::write!(fmt, "Error::VerificationMismatch({=u32:#x})", address)
            }
            Error::UnknownVendor => defmt::write!(fmt, "Error::UnknownVendor"),
            Error::SecureBoot(failure) => defmt::write!(fmt, "Error::SecureBoot({})", failure),
            Error::InvalidTransfer => defmt::write!(fmt, "Error::InvalidTransfer"),
            Error::Unsupported => defmt::write!(fmt, "Error::Unsupported"),
            Error::Bus(kind) => defmt::write!(fmt, "Error::Bus({})", kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::Bus(embedded_hal::spi::ErrorKind::Other).is_retryable());
        assert!(!Error::OutOfBounds.is_retryable());
        assert!(!Error::VerificationMismatch { address: 0 }.is_retryable());
    }

    #[test]
    fn secure_boot_failures_are_fatal() {
        let err: Error = SecureBootFailure::SignatureInvalid.into();
        assert!(err.is_fatal());
        assert!(!Error::UnknownVendor.is_fatal());
    }

    #[test]
    fn maps_onto_nor_flash_error_kinds() {
        assert_eq!(Error::OutOfBounds.kind(), NorFlashErrorKind::OutOfBounds);
        assert_eq!(Error::NotAligned.kind(), NorFlashErrorKind::NotAligned);
        assert_eq!(Error::Timeout.kind(), NorFlashErrorKind::Other);
    }
}
