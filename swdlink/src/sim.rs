// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Simulated SWD target.
//!
//! [`SimTarget`] implements [`BitLink`] by decoding the host's bits as a
//! SW-DP would, so everything above the link (framing, parity, WAIT
//! handling, SELECT caching, posted reads) is exercised exactly as it
//! would be against hardware.  It models an SWJ-DP with a single AHB MEM-AP
//! at index 0 in front of a sparse memory.
//!
//! Like a real SWJ-DP it starts out in JTAG mode and ignores requests until
//! it has seen the JTAG-to-SWD sequence followed by a line reset.  After
//! every line reset only an IDCODE read is answered.
//!
//! Knobs are provided to inject WAIT and FAULT responses, parity errors, a
//! missing target, and slow power-up, and every decoded request is logged.

use std::collections::{HashMap, VecDeque};
use std::ops::Range;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::link::{BitLink, LinkError};
use crate::protocol::{Ack, JTAG_TO_SWD_SEQUENCE, SwdOp, calculate_parity};
use swdlink_core::arm::dp::{Abort, CtrlStat, Select};
use swdlink_core::arm::map::Csw;

/// IDCODE of an ARM Cortex-M4 SW-DP
pub const DEFAULT_IDCODE: u32 = 0x2BA0_1477;

/// IDR of a Cortex-M4 AHB-AP
pub const DEFAULT_IDR: u32 = 0x2477_0011;

/// BASE pointing at the Cortex-M ROM table
pub const DEFAULT_BASE: u32 = 0xE00F_F003;

const LINE_RESET_THRESHOLD: u32 = 50;
const DATA_PHASE_BITS: u32 = 34;

// CTRL/STAT bits
const STICKYORUN: u32 = 1 << 1;
const STICKYCMP: u32 = 1 << 4;
const STICKYERR: u32 = 1 << 5;
const WDATAERR: u32 = 1 << 7;
const CDBGPWRUPREQ: u32 = 1 << 28;
const CDBGPWRUPACK: u32 = 1 << 29;
const CSYSPWRUPREQ: u32 = 1 << 30;
const CSYSPWRUPACK: u32 = 1 << 31;
const POWER_REQS: u32 = CDBGPWRUPREQ | CSYSPWRUPREQ;
const POWER_ACKS: u32 = CDBGPWRUPACK | CSYSPWRUPACK;

// ORUNDETECT, TRNMODE, MASKLANE, TRNCNT, and the request bits
const CTRL_STAT_WRITABLE: u32 = 0x54FF_FF0D;

// MEM-AP register addresses
const AP_CSW: u8 = 0x00;
const AP_TAR: u8 = 0x04;
const AP_DRW: u8 = 0x0C;
const AP_CFG: u8 = 0xF4;
const AP_BASE: u8 = 0xF8;
const AP_IDR: u8 = 0xFC;

// TAR auto-increment wraps within this block
const TAR_INCREMENT_BLOCK: u32 = 0x400;

/// How the simulated bus handles 8 and 16-bit DRW writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryMode {
    /// Only the addressed byte lanes of DRW are written.
    #[default]
    ByteLanes,
    /// The whole DRW word is written to the containing word, whatever the
    /// transfer size.  Shows exactly which lanes the host drove.
    WordOnly,
}

/// One decoded request and how the target answered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    /// The request.  AP addresses include the bank from SELECT.
    pub op: SwdOp,
    pub ack: Ack,
    /// Data transferred, for acknowledged requests.
    pub data: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Request { bits: u8, count: u32 },
    WriteData { op: SwdOp, bits: u64, count: u32 },
}

/// Software SW-DP and MEM-AP behind a [`BitLink`].
#[derive(Debug, Clone)]
pub struct SimTarget {
    connected: bool,
    connect_error: Option<LinkError>,
    unresponsive: bool,

    // Wire state
    swd_mode: bool,
    switch_seen: bool,
    window: u16,
    ones: u32,
    locked: bool,
    awaiting_idcode: bool,
    phase: Phase,
    output: VecDeque<bool>,

    // Fault injection
    wait_count: u32,
    corrupt_parity: bool,

    // DP
    idcode: u32,
    ctrl_stat: u32,
    select: Select,
    rdbuff: u32,
    last_read: u32,
    power_up_after: Option<u32>,
    power_polls: u32,

    // MEM-AP 0
    csw: Csw,
    tar: u32,
    supported_sizes: Vec<u32>,
    memory_mode: MemoryMode,
    memory: HashMap<u32, u32>,
    fault_regions: Vec<Range<u32>>,

    log: Vec<Transaction>,
}

impl Default for SimTarget {
    fn default() -> Self {
        Self::new(DEFAULT_IDCODE)
    }
}

impl SimTarget {
    pub fn new(idcode: u32) -> Self {
        Self {
            connected: false,
            connect_error: None,
            unresponsive: false,
            swd_mode: false,
            switch_seen: false,
            window: 0,
            ones: 0,
            locked: false,
            awaiting_idcode: false,
            phase: Phase::Idle,
            output: VecDeque::new(),
            wait_count: 0,
            corrupt_parity: false,
            idcode,
            ctrl_stat: 0,
            select: Select::default(),
            rdbuff: 0,
            last_read: 0,
            power_up_after: Some(0),
            power_polls: 0,
            csw: Csw::default(),
            tar: 0,
            supported_sizes: vec![Csw::SIZE_8BIT, Csw::SIZE_16BIT, Csw::SIZE_32BIT],
            memory_mode: MemoryMode::default(),
            memory: HashMap::new(),
            fault_regions: Vec::new(),
            log: Vec::new(),
        }
    }

    pub fn set_idcode(&mut self, idcode: u32) {
        self.idcode = idcode;
    }

    /// Stop driving SWDIO at all, as if there were no target.
    pub fn set_unresponsive(&mut self, unresponsive: bool) {
        self.unresponsive = unresponsive;
    }

    /// Answer the next `count` requests with WAIT.  ABORT writes are always
    /// accepted.
    pub fn set_wait(&mut self, count: u32) {
        self.wait_count = count;
    }

    /// Send the next read's data with the wrong parity.
    pub fn corrupt_next_read(&mut self) {
        self.corrupt_parity = true;
    }

    /// Acknowledge power-up on the CTRL/STAT read after `reads` reads
    /// with both requests set, or never if `None`.
    pub fn set_power_up_after(&mut self, reads: Option<u32>) {
        self.power_up_after = reads;
    }

    /// Transfer sizes, in bits, the MEM-AP accepts in CSW.SIZE.  Writes of
    /// any other size leave SIZE unchanged.
    pub fn set_supported_sizes(&mut self, bits: &[u8]) {
        self.supported_sizes = bits
            .iter()
            .filter_map(|bits| match bits {
                8 => Some(Csw::SIZE_8BIT),
                16 => Some(Csw::SIZE_16BIT),
                32 => Some(Csw::SIZE_32BIT),
                _ => None,
            })
            .collect();
    }

    pub fn set_memory_mode(&mut self, mode: MemoryMode) {
        self.memory_mode = mode;
    }

    /// DRW accesses with TAR in `region` FAULT and set STICKYERR.
    pub fn fault_region(&mut self, region: Range<u32>) {
        self.fault_regions.push(region);
    }

    /// Make [`BitLink::connect()`] fail with `error`.
    pub fn fail_connect(&mut self, error: Option<LinkError>) {
        self.connect_error = error;
    }

    /// Write a word directly to memory.
    pub fn poke(&mut self, addr: u32, value: u32) {
        self.memory.insert(addr & !3, value);
    }

    /// Read a word directly from memory.  Unwritten memory reads as 0.
    pub fn peek(&self, addr: u32) -> u32 {
        self.memory.get(&(addr & !3)).copied().unwrap_or(0)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the JTAG-to-SWD switch has taken effect.
    pub fn in_swd_mode(&self) -> bool {
        self.swd_mode
    }

    pub fn log(&self) -> &[Transaction] {
        &self.log
    }

    /// Requests the target acknowledged with OK, in order.
    pub fn ok_ops(&self) -> Vec<SwdOp> {
        self.log
            .iter()
            .filter(|t| t.ack == Ack::Ok)
            .map(|t| t.op)
            .collect()
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }
}

// Wire level
impl SimTarget {
    fn clock_in(&mut self, bit: bool) {
        self.window = (self.window >> 1) | ((bit as u16) << 15);
        if !self.swd_mode && u64::from(self.window) == JTAG_TO_SWD_SEQUENCE {
            trace!("Sim:   JTAG to SWD sequence");
            self.switch_seen = true;
        }

        if bit {
            self.ones = self.ones.saturating_add(1);
        } else {
            self.ones = 0;
        }
        if self.ones >= LINE_RESET_THRESHOLD {
            if self.ones == LINE_RESET_THRESHOLD {
                self.line_reset();
            }
            return;
        }

        if !self.swd_mode || self.locked {
            return;
        }

        self.phase = match self.phase {
            Phase::Idle if bit => Phase::Request { bits: 1, count: 1 },
            Phase::Idle => Phase::Idle,
            Phase::Request { bits, count } => {
                let bits = bits | ((bit as u8) << count);
                if count + 1 == 8 {
                    self.request(bits)
                } else {
                    Phase::Request {
                        bits,
                        count: count + 1,
                    }
                }
            }
            Phase::WriteData { op, bits, count } => {
                let bits = bits | ((bit as u64) << count);
                if count + 1 == DATA_PHASE_BITS {
                    self.write_data(op, bits);
                    Phase::Idle
                } else {
                    Phase::WriteData {
                        op,
                        bits,
                        count: count + 1,
                    }
                }
            }
        };
    }

    fn line_reset(&mut self) {
        if self.switch_seen && !self.swd_mode {
            debug!("Sim:   Switched to SWD");
            self.swd_mode = true;
        }
        self.switch_seen = false;
        self.locked = false;
        self.awaiting_idcode = self.swd_mode;
        self.phase = Phase::Idle;
        self.output.clear();
    }

    fn decode(cmd: u8) -> Option<SwdOp> {
        // start, stop and park
        if cmd & 0x01 == 0 || cmd & 0x40 != 0 || cmd & 0x80 == 0 {
            return None;
        }
        let parity = (cmd >> 5) & 1 == 1;
        if calculate_parity(cmd & 0x1E) != parity {
            return None;
        }

        let addr = (cmd >> 1) & 0x0C;
        let op = match (cmd & 0x02 != 0, cmd & 0x04 != 0) {
            (false, true) => SwdOp::DpRead(addr),
            (false, false) => SwdOp::DpWrite(addr),
            (true, true) => SwdOp::ApRead(addr),
            (true, false) => SwdOp::ApWrite(addr),
        };
        Some(op)
    }

    fn request(&mut self, cmd: u8) -> Phase {
        let Some(op) = Self::decode(cmd) else {
            debug!("Sim:   Bad request {cmd:#04X}, locked out until line reset");
            self.locked = true;
            return Phase::Idle;
        };
        let op = self.full_address(op);

        if self.unresponsive || (self.awaiting_idcode && op != SwdOp::DpRead(0x0)) {
            self.record(op, Ack::Invalid(0b111), None);
            return Phase::Idle;
        }

        if self.wait_count > 0 && op != SwdOp::DpWrite(0x0) {
            self.wait_count -= 1;
            self.send_ack(Ack::Wait);
            self.record(op, Ack::Wait, None);
            return Phase::Idle;
        }

        if op.is_ap() && (self.ctrl_stat & STICKYERR != 0 || self.bus_fault(op)) {
            self.ctrl_stat |= STICKYERR;
            self.send_ack(Ack::Fault);
            self.record(op, Ack::Fault, None);
            return Phase::Idle;
        }

        self.send_ack(Ack::Ok);
        if op.is_read() {
            let data = self.read(op);
            if op != SwdOp::DpRead(0x8) {
                self.last_read = data;
            }
            self.send_data(data);
            self.record(op, Ack::Ok, Some(data));
            Phase::Idle
        } else {
            self.record(op, Ack::Ok, None);
            Phase::WriteData {
                op,
                bits: 0,
                count: 0,
            }
        }
    }

    fn write_data(&mut self, op: SwdOp, bits: u64) {
        // Bit 0 is the turnaround
        let data = (bits >> 1) as u32;
        let parity = (bits >> 33) & 1 == 1;

        if calculate_parity(data) != parity {
            debug!("Sim:   Write parity error on {op}");
            self.ctrl_stat |= WDATAERR;
            return;
        }

        if let Some(last) = self.log.last_mut() {
            last.data = Some(data);
        }
        self.write(op, data);
    }

    fn send_ack(&mut self, ack: Ack) {
        // Turnaround, then the ACK
        self.output.push_back(true);
        let bits = ack.bits();
        for ii in 0..3 {
            self.output.push_back((bits >> ii) & 1 == 1);
        }
        if matches!(ack, Ack::Wait | Ack::Fault) {
            self.output.push_back(true);
        }
    }

    fn send_data(&mut self, data: u32) {
        for ii in 0..32 {
            self.output.push_back((data >> ii) & 1 == 1);
        }
        let mut parity = calculate_parity(data);
        if self.corrupt_parity {
            self.corrupt_parity = false;
            parity = !parity;
        }
        self.output.push_back(parity);
        self.output.push_back(true);
    }

    fn full_address(&self, op: SwdOp) -> SwdOp {
        let bank = (self.select.apbanksel() as u8) << 4;
        match op {
            SwdOp::ApRead(addr) => SwdOp::ApRead(bank | addr),
            SwdOp::ApWrite(addr) => SwdOp::ApWrite(bank | addr),
            dp => dp,
        }
    }

    fn record(&mut self, op: SwdOp, ack: Ack, data: Option<u32>) {
        trace!("Sim:   {op} {ack:?} {data:X?}");
        self.log.push(Transaction { op, ack, data });
    }
}

// Register model
impl SimTarget {
    fn read(&mut self, op: SwdOp) -> u32 {
        match op {
            SwdOp::DpRead(0x0) => {
                self.awaiting_idcode = false;
                self.idcode
            }
            SwdOp::DpRead(0x4) if self.select.dpbanksel() == 0 => self.read_ctrl_stat(),
            SwdOp::DpRead(0x4) => 0,
            SwdOp::DpRead(0x8) => self.last_read,
            SwdOp::DpRead(_) => self.rdbuff,
            SwdOp::ApRead(addr) => {
                // Posted: return the previous AP read's result
                let value = self.read_ap(addr);
                std::mem::replace(&mut self.rdbuff, value)
            }
            SwdOp::DpWrite(_) | SwdOp::ApWrite(_) => 0,
        }
    }

    fn write(&mut self, op: SwdOp, data: u32) {
        match op {
            SwdOp::DpWrite(0x0) => self.abort(Abort::new(data)),
            SwdOp::DpWrite(0x4) if self.select.dpbanksel() == 0 => self.write_ctrl_stat(data),
            SwdOp::DpWrite(0x8) => self.select = Select::from(data),
            SwdOp::ApWrite(addr) => self.write_ap(addr, data),
            _ => (),
        }
    }

    fn read_ctrl_stat(&mut self) -> u32 {
        let mut value = self.ctrl_stat;
        if value & POWER_REQS == POWER_REQS {
            if self.power_up_after.is_some_and(|after| self.power_polls >= after) {
                value |= POWER_ACKS;
            }
            self.power_polls = self.power_polls.saturating_add(1);
        }
        trace!("Sim:   CTRL/STAT {}", CtrlStat::new(value).power_states());
        value
    }

    fn write_ctrl_stat(&mut self, data: u32) {
        let requested = self.ctrl_stat & POWER_REQS == POWER_REQS;
        self.ctrl_stat = (self.ctrl_stat & !CTRL_STAT_WRITABLE) | (data & CTRL_STAT_WRITABLE);
        if !requested && self.ctrl_stat & POWER_REQS == POWER_REQS {
            self.power_polls = 0;
        }
    }

    fn abort(&mut self, abort: Abort) {
        if abort.stkcmpclr_set() {
            self.ctrl_stat &= !STICKYCMP;
        }
        if abort.stkerrclr_set() {
            self.ctrl_stat &= !STICKYERR;
        }
        if abort.wderrclr_set() {
            self.ctrl_stat &= !WDATAERR;
        }
        if abort.orunerrclr_set() {
            self.ctrl_stat &= !STICKYORUN;
        }
    }

    fn read_ap(&mut self, addr: u8) -> u32 {
        if self.select.apsel() != 0 {
            return 0;
        }
        match addr {
            AP_CSW => self.csw.value(),
            AP_TAR => self.tar,
            AP_DRW => {
                let word = self.peek(self.tar);
                self.increment_tar();
                word
            }
            AP_CFG => 0,
            AP_BASE => DEFAULT_BASE,
            AP_IDR => DEFAULT_IDR,
            _ => 0,
        }
    }

    fn write_ap(&mut self, addr: u8, data: u32) {
        if self.select.apsel() != 0 {
            return;
        }
        match addr {
            AP_CSW => {
                let mut csw = Csw::from(data);
                if !self.supported_sizes.contains(&csw.size()) {
                    csw.set_size(self.csw.size());
                }
                csw.set_device_en(true);
                self.csw = csw;
            }
            AP_TAR => self.tar = data,
            AP_DRW => {
                self.write_memory(data);
                self.increment_tar();
            }
            _ => (),
        }
    }

    fn write_memory(&mut self, data: u32) {
        let addr = self.tar;
        let lanes = match (self.memory_mode, self.csw.size()) {
            (MemoryMode::WordOnly, _) => 0xFFFF_FFFF,
            (_, Csw::SIZE_8BIT) => 0xFF << ((addr & 3) * 8),
            (_, Csw::SIZE_16BIT) => 0xFFFF << ((addr & 2) * 8),
            _ => 0xFFFF_FFFF,
        };
        let old = self.peek(addr);
        self.poke(addr, (old & !lanes) | (data & lanes));
    }

    fn increment_tar(&mut self) {
        if self.csw.addrinc() == Csw::ADDRINC_OFF {
            return;
        }
        let step = 1 << self.csw.size();
        let offset = self.tar.wrapping_add(step) & (TAR_INCREMENT_BLOCK - 1);
        self.tar = (self.tar & !(TAR_INCREMENT_BLOCK - 1)) | offset;
    }

    fn bus_fault(&self, op: SwdOp) -> bool {
        let drw = matches!(op, SwdOp::ApRead(AP_DRW) | SwdOp::ApWrite(AP_DRW));
        drw && self.select.apsel() == 0
            && self.fault_regions.iter().any(|region| region.contains(&self.tar))
    }
}

impl BitLink for SimTarget {
    fn connect(&mut self) -> Result<(), LinkError> {
        if let Some(e) = &self.connect_error {
            return Err(e.clone());
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        self.connected = false;
        self.output.clear();
        Ok(())
    }

    fn write_bits(&mut self, bits: u64, count: usize) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        if count > 64 {
            return Err(LinkError::BitCount(count));
        }
        for ii in 0..count {
            self.clock_in((bits >> ii) & 1 == 1);
        }
        Ok(())
    }

    fn read_bits(&mut self, count: usize) -> Result<u64, LinkError> {
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        if count > 64 {
            return Err(LinkError::BitCount(count));
        }

        // Nobody driving the line reads as pulled up
        let mut bits = 0u64;
        for ii in 0..count {
            if self.output.pop_front().unwrap_or(true) {
                bits |= 1 << ii;
            }
        }
        Ok(bits)
    }
}
