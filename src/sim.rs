//! Host model of a flash chip behind the controller, and of the decrypt
//! accelerator.
//!
//! The chip executes each transaction as it is started: the identification
//! commands, WEL gating, busy status after program/erase, quad enable, octal
//! DTR entry, deep power-down and the read window registers are modelled.
//! Transactions the chip would not understand in its current wire mode are
//! ignored (reads return all 1s) and counted.

use std::vec;
use std::vec::Vec;

use crate::config::{ERASED_VALUE, PAGE_SIZE, SECTOR_SIZE, WINDOW_NORMAL_BASE};
use crate::error::Error;
use crate::gate::DecryptStatus;
use crate::protocol::{
    ClockSetting, DataRate, Direction, IoWidth, Payload, ProtocolDescriptor, ReadWindow,
    TransferDescriptor,
};
use crate::traits::{DecryptEngine, SpiEngine, XipWindow};
use crate::vendor::{ModeEntry, VendorProfile};

/// Something the controller was asked to do, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimEvent {
    /// A transaction the chip accepted.
    Command(u8),
    WindowProgrammed(ReadWindow),
    WindowBase(u32),
    WindowProtection(bool),
    ClockSet(ClockSetting),
    Settled(u32),
    XipEnabled,
}

pub struct SimController {
    profile: &'static VendorProfile,
    mem: Vec<u8>,
    jedec_id: [u8; 3],
    legacy_id_only: bool,

    wel: bool,
    busy_polls: u32,
    busy_remaining: u32,
    sr2: u8,
    quad: bool,
    octal: bool,
    powered_down: bool,
    reset_enabled: bool,

    window: Option<ReadWindow>,
    window_base: u32,
    window_protected: bool,
    clock: ClockSetting,
    xip: bool,

    transactions: u32,
    violations: u32,
    events: Vec<SimEvent>,
    stuck: bool,
    corrupt_program: bool,
    corrupt_erase: bool,
}

impl SimController {
    /// An erased chip of the given part, fresh out of reset.
    pub fn new(profile: &'static VendorProfile) -> Self {
        Self {
            profile,
            mem: vec![ERASED_VALUE; profile.capacity.max(SECTOR_SIZE) as usize],
            jedec_id: [
                profile.manufacturer_id,
                (profile.device_id >> 8) as u8,
                profile.device_id as u8,
            ],
            legacy_id_only: false,
            wel: false,
            busy_polls: 1,
            busy_remaining: 0,
            sr2: 0,
            quad: false,
            octal: false,
            powered_down: false,
            reset_enabled: false,
            window: None,
            window_base: WINDOW_NORMAL_BASE,
            window_protected: true,
            clock: ClockSetting::BOOT,
            xip: false,
            transactions: 0,
            violations: 0,
            events: Vec::new(),
            stuck: false,
            corrupt_program: false,
            corrupt_erase: false,
        }
    }

    pub fn transactions(&self) -> u32 {
        self.transactions
    }

    /// Transactions ignored because of a wrong command form or width.
    pub fn protocol_violations(&self) -> u32 {
        self.violations
    }

    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    pub fn memory(&self) -> &[u8] {
        &self.mem
    }

    /// Store `bytes` at `address` directly, as if programmed by a fixture.
    pub fn load(&mut self, address: u32, bytes: &[u8]) {
        let start = address as usize;
        self.mem[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn quad_enabled(&self) -> bool {
        self.quad
    }

    pub fn octal_enabled(&self) -> bool {
        self.octal
    }

    pub fn xip_enabled(&self) -> bool {
        self.xip
    }

    pub fn read_window(&self) -> Option<ReadWindow> {
        self.window
    }

    pub fn window_protected(&self) -> bool {
        self.window_protected
    }

    pub fn clock(&self) -> ClockSetting {
        self.clock
    }

    /// Never report completion.
    pub fn set_stuck(&mut self, stuck: bool) {
        self.stuck = stuck;
    }

    /// Status reads that report BUSY after each program or erase, starting
    /// now.
    pub fn set_busy_polls(&mut self, polls: u32) {
        self.busy_polls = polls;
        self.busy_remaining = polls;
    }

    /// Do not answer 9Fh, only the legacy 90h.
    pub fn set_legacy_id_only(&mut self, legacy_only: bool) {
        self.legacy_id_only = legacy_only;
    }

    pub fn set_jedec_id(&mut self, id: [u8; 3]) {
        self.jedec_id = id;
    }

    /// Flip the lowest bit of the first byte of every page program.
    pub fn set_corrupt_program(&mut self, corrupt: bool) {
        self.corrupt_program = corrupt;
    }

    /// Leave the first byte of every erased sector as it was.
    pub fn set_corrupt_erase(&mut self, corrupt: bool) {
        self.corrupt_erase = corrupt;
    }

    /// Put the chip in its wide mode, as the bootloader leaves it.
    pub fn force_wide_mode(&mut self) {
        match self.profile.io_width {
            IoWidth::Octal => self.octal = true,
            IoWidth::Quad => self.quad = true,
            _ => {}
        }
    }

    fn accepts(&self, xfer: &TransferDescriptor<'_>, protocol: &ProtocolDescriptor) -> bool {
        if self.octal {
            let inverse_ok = (xfer.command as u8) == !((xfer.command >> 8) as u8);
            return xfer.command_len == 2
                && inverse_ok
                && *protocol == ProtocolDescriptor::uniform(IoWidth::Octal, DataRate::Double);
        }
        if xfer.command_len != 1 || !protocol.command.is_plain_spi() {
            return false;
        }
        match protocol.data.width {
            IoWidth::Single | IoWidth::Dual => true,
            IoWidth::Quad => self.quad,
            IoWidth::Octal => false,
        }
    }

    fn offset(&self, address: u32) -> usize {
        address as usize % self.mem.len()
    }

    fn start_busy(&mut self) {
        self.wel = false;
        self.busy_remaining = self.busy_polls;
    }

    fn status(&mut self) -> u8 {
        let mut status = 0;
        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            status |= 1 << 0;
        }
        if self.wel {
            status |= 1 << 1;
        }
        status
    }

    fn fill_read(&mut self, address: u32, buf: &mut [u8]) {
        let mut at = self.offset(address);
        for b in buf.iter_mut() {
            *b = self.mem[at];
            at = (at + 1) % self.mem.len();
        }
    }

    fn program(&mut self, address: u32, data: &[u8]) {
        let page = PAGE_SIZE as usize;
        let base = self.offset(address) / page * page;
        let mut column = self.offset(address) % page;
        for (i, &byte) in data.iter().enumerate() {
            let byte = if i == 0 && self.corrupt_program {
                byte ^ 0x01
            } else {
                byte
            };
            self.mem[base + column] &= byte;
            // past the end of the page the address wraps to its start
            column = (column + 1) % page;
        }
    }

    fn erase_sector(&mut self, address: u32) {
        let sector = SECTOR_SIZE as usize;
        let base = self.offset(address) / sector * sector;
        let skip = usize::from(self.corrupt_erase);
        self.mem[base + skip..base + sector].fill(ERASED_VALUE);
    }

    fn write_status_register(&mut self, opcode: u8, value: &[u8]) {
        if opcode == 0x31 {
            if let Some(&sr2) = value.first() {
                self.sr2 = sr2;
            }
        }
        if let ModeEntry::StatusWrite {
            opcode: qe_opcode,
            value: qe_value,
        } = self.profile.mode_entry
        {
            if opcode == qe_opcode && value == qe_value {
                self.quad = true;
            }
        }
    }

    fn write_config_register(&mut self, address: u32, value: u8) {
        if let ModeEntry::OctalDtr { writes, .. } = self.profile.mode_entry {
            if writes.last() == Some(&(address, value)) {
                self.octal = true;
            }
        }
    }

    fn execute(&mut self, opcode: u8, xfer: &mut TransferDescriptor<'_>) {
        let address = xfer.address;
        let opcodes = self.profile.opcodes;
        match (opcode, &mut xfer.data) {
            (0x9F, Payload::Read(buf)) => {
                let id = if self.legacy_id_only {
                    [0xFF; 3]
                } else {
                    self.jedec_id
                };
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = id.get(i).copied().unwrap_or(0);
                }
            }
            (0x90, Payload::Read(buf)) => {
                let id = [self.jedec_id[0], self.profile.legacy_device_id];
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = id[i % 2];
                }
            }
            (0x05, Payload::Read(buf)) => {
                let status = self.status();
                buf.fill(status);
            }
            (0x35, Payload::Read(buf)) => buf.fill(self.sr2),
            (0x06, Payload::None) => self.wel = true,
            (0x04, Payload::None) => self.wel = false,
            (0x01 | 0x31, Payload::Write(data)) if self.wel => {
                let data: &[u8] = data;
                self.write_status_register(opcode, data);
                self.start_busy();
            }
            (0x72, Payload::Write(data)) if self.wel => {
                let value = data.first().copied().unwrap_or(0);
                self.write_config_register(address, value);
                self.start_busy();
            }
            (0x03 | 0x13 | 0x0B | 0x0C | 0x3B | 0xBB, Payload::Read(buf)) => {
                self.fill_read(address, buf)
            }
            (0x6B | 0xEB | 0xEC | 0xED, Payload::Read(buf)) if self.quad => {
                self.fill_read(address, buf)
            }
            (0xEE, Payload::Read(buf)) if self.octal => self.fill_read(address, buf),
            (op, Payload::Write(data)) if op == opcodes.page_program && self.wel => {
                let data: &[u8] = data;
                self.program(address, data);
                self.start_busy();
            }
            (op, Payload::None) if op == opcodes.sector_erase && self.wel => {
                self.erase_sector(address);
                self.start_busy();
            }
            (op, Payload::None) if op == opcodes.chip_erase && self.wel => {
                self.mem.fill(ERASED_VALUE);
                self.start_busy();
            }
            (0x66, Payload::None) => self.reset_enabled = true,
            (0x99, Payload::None) if self.reset_enabled => {
                self.reset_enabled = false;
                self.octal = false;
                self.wel = false;
                self.busy_remaining = 0;
            }
            (0xB9, Payload::None) => self.powered_down = true,
            (_, Payload::Read(buf)) => buf.fill(0xFF),
            _ => {}
        }
    }
}

impl SpiEngine for SimController {
    fn start(
        &mut self,
        _direction: Direction,
        xfer: &mut TransferDescriptor<'_>,
        protocol: &ProtocolDescriptor,
    ) -> Result<(), Error> {
        self.transactions += 1;
        let opcode = xfer.opcode();

        if self.powered_down {
            if opcode == 0xAB {
                self.powered_down = false;
                self.events.push(SimEvent::Command(opcode));
            } else if let Payload::Read(buf) = &mut xfer.data {
                buf.fill(0x00);
            }
            return Ok(());
        }

        if !self.accepts(xfer, protocol) {
            self.violations += 1;
            if let Payload::Read(buf) = &mut xfer.data {
                buf.fill(0xFF);
            }
            return Ok(());
        }

        self.events.push(SimEvent::Command(opcode));
        self.execute(opcode, xfer);
        Ok(())
    }

    fn is_done(&mut self) -> bool {
        !self.stuck
    }

    fn mapped_read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Error> {
        if self.powered_down {
            buf.fill(0x00);
        } else {
            self.fill_read(addr, buf);
        }
        Ok(())
    }

    fn settle(&mut self, cycles: u32) {
        self.events.push(SimEvent::Settled(cycles));
    }
}

impl XipWindow for SimController {
    fn program_read_window(&mut self, window: &ReadWindow) {
        self.window = Some(*window);
        self.events.push(SimEvent::WindowProgrammed(*window));
    }

    fn window_base(&self) -> u32 {
        self.window_base
    }

    fn set_window_base(&mut self, base: u32) {
        self.window_base = base;
        self.events.push(SimEvent::WindowBase(base));
    }

    fn set_window_protection(&mut self, protected: bool) {
        self.window_protected = protected;
        self.events.push(SimEvent::WindowProtection(protected));
    }

    fn set_reference_clock(&mut self, clock: ClockSetting) {
        self.clock = clock;
        self.events.push(SimEvent::ClockSet(clock));
    }

    fn enable_xip(&mut self) {
        self.xip = true;
        self.events.push(SimEvent::XipEnabled);
    }
}

/// Decrypt accelerator that runs for a fixed number of status polls and then
/// reports a preset status.
#[derive(Debug)]
pub struct SimAccelerator {
    fuse: bool,
    final_status: DecryptStatus,
    run_polls: u32,
    remaining: u32,
    starts: u32,
}

impl SimAccelerator {
    pub fn new(fuse: bool) -> Self {
        Self {
            fuse,
            final_status: DecryptStatus::SUCCESS,
            run_polls: 1,
            remaining: 0,
            starts: 0,
        }
    }

    pub fn set_final_status(&mut self, status: DecryptStatus) {
        self.final_status = status;
    }

    pub fn set_run_polls(&mut self, polls: u32) {
        self.run_polls = polls;
    }

    /// How many times the decrypt sequence was started.
    pub fn starts(&self) -> u32 {
        self.starts
    }
}

impl DecryptEngine for SimAccelerator {
    fn secure_fuse(&mut self) -> bool {
        self.fuse
    }

    fn start_decrypt(&mut self) {
        self.starts += 1;
        self.remaining = self.run_polls;
    }

    fn status(&mut self) -> DecryptStatus {
        if self.remaining > 0 {
            self.remaining -= 1;
            DecryptStatus::RUNNING
        } else {
            self.final_status
        }
    }
}
