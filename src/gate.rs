//! Boot-time gate in front of hardware decrypt-on-the-fly.
//!
//! Runs once, before control passes to the verified image. With the secure
//! boot fuse blown (or the build override set) the image must start with the
//! encrypted-image preamble and the accelerator must decrypt and verify it in
//! place. The read window is always returned to its normal base and
//! protection on the way out, whichever path was taken.

use bitflags::bitflags;

use crate::config::{FORCE_SECURE_XIP, WINDOW_NORMAL_BASE, XIP_PREAMBLE};
use crate::error::{Error, SecureBootFailure};
use crate::nor::NorFlash;
use crate::traits::{DecryptEngine, HardwareFlashDevice, SpiEngine, XipWindow};

bitflags! {
    /// Decrypt/verify accelerator status register.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DecryptStatus: u32 {
        const RUNNING = 1 << 0;
        const SUCCESS = 1 << 1;
        const DEBUG_HALTED = 1 << 2;
        const SIGNATURE_FAILED = 1 << 3;
        const ENCRYPTION_DISABLED = 1 << 4;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum GateState {
    CheckFuse,
    VerifyPreamble,
    OpenVerifyWindow,
    StartDecrypt,
    PollRunning,
    CheckStatus,
    CloseWindow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GateOutcome {
    /// Fuse not blown; the image runs as plain XIP.
    Skipped,
    /// The accelerator decrypted and verified the image.
    Decrypted,
}

#[derive(Clone, Copy, Debug)]
pub struct XipSecurityGate {
    preamble: [u8; 16],
    normal_base: u32,
    force: bool,
}

impl Default for XipSecurityGate {
    fn default() -> Self {
        Self::new(XIP_PREAMBLE, WINDOW_NORMAL_BASE, FORCE_SECURE_XIP)
    }
}

impl XipSecurityGate {
    pub const fn new(preamble: [u8; 16], normal_base: u32, force: bool) -> Self {
        Self {
            preamble,
            normal_base,
            force,
        }
    }

    /// Whether `head` starts with the encrypted-image preamble.
    pub fn verify_preamble(&self, head: &[u8]) -> Result<(), SecureBootFailure> {
        match head.get(..self.preamble.len()) {
            Some(bytes) if bytes == self.preamble => Ok(()),
            _ => Err(SecureBootFailure::PreambleMismatch),
        }
    }

    /// Map accelerator completion flags onto a verdict. Fatal flags win over
    /// success.
    pub fn check_status(status: DecryptStatus) -> Result<(), SecureBootFailure> {
        if status.contains(DecryptStatus::DEBUG_HALTED) {
            Err(SecureBootFailure::DebugHalted)
        } else if status.contains(DecryptStatus::SIGNATURE_FAILED) {
            Err(SecureBootFailure::SignatureInvalid)
        } else if status.contains(DecryptStatus::ENCRYPTION_DISABLED) {
            Err(SecureBootFailure::EncryptionDisabled)
        } else if status.contains(DecryptStatus::SUCCESS) {
            Ok(())
        } else {
            Err(SecureBootFailure::NotCompleted)
        }
    }

    /// Run the gate to completion.
    ///
    /// Any error is fatal for the boot; see [`crate::boot::run_gate_or_halt`].
    pub fn run<C, A>(&self, flash: &mut NorFlash<C>, accel: &mut A) -> Result<GateOutcome, Error>
    where
        C: SpiEngine + XipWindow,
        A: DecryptEngine,
    {
        let mut state = GateState::CheckFuse;
        let mut result = Ok(GateOutcome::Skipped);
        let mut status = DecryptStatus::empty();

        debug!("xip gate: {:?}", state);
        loop {
            let next = match state {
                GateState::CheckFuse => {
                    if accel.secure_fuse() || self.force {
                        GateState::VerifyPreamble
                    } else {
                        info!("xip gate: secure boot fuse not set, skipping");
                        GateState::CloseWindow
                    }
                }
                GateState::VerifyPreamble => {
                    let mut head = [0u8; 16];
                    let checked = flash
                        .read(0, &mut head)
                        .and_then(|()| self.verify_preamble(&head).map_err(Error::from));
                    match checked {
                        Ok(()) => GateState::OpenVerifyWindow,
                        Err(e) => {
                            result = Err(e);
                            GateState::CloseWindow
                        }
                    }
                }
                GateState::OpenVerifyWindow => {
                    let controller = flash.controller_mut();
                    controller.set_window_base(0);
                    controller.set_window_protection(false);
                    GateState::StartDecrypt
                }
                GateState::StartDecrypt => {
                    accel.start_decrypt();
                    GateState::PollRunning
                }
                GateState::PollRunning => {
                    status = accel.status();
                    if status.contains(DecryptStatus::RUNNING) {
                        GateState::PollRunning
                    } else {
                        GateState::CheckStatus
                    }
                }
                GateState::CheckStatus => {
                    result = Self::check_status(status)
                        .map(|()| GateOutcome::Decrypted)
                        .map_err(Error::from);
                    GateState::CloseWindow
                }
                GateState::CloseWindow => {
                    let controller = flash.controller_mut();
                    controller.set_window_base(self.normal_base);
                    controller.set_window_protection(true);
                    break;
                }
            };
            if next != state {
                debug!("xip gate: {:?}", next);
            }
            state = next;
        }

        match result {
            Ok(outcome) => info!("xip gate: {:?}", outcome),
            Err(e) => error!("xip gate: failed: {:?}", e),
        }
        result
    }
}
