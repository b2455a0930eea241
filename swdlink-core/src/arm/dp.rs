// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM Debug Port Registers

use crate::arm::register::{
    Access, DpRegister, ReadableRegister, RegisterDescriptor, RegisterInfo, WritableRegister,
};
use crate::{register_data_r, register_data_rw, register_data_w};
use alloc::{format, string::String};
use core::fmt;
use static_assertions::const_assert;

/// IDCODE Register descriptor (read-only)
pub struct IdCodeRegister;

impl RegisterDescriptor for IdCodeRegister {
    const NAME: &'static str = "IDCODE";
    const ADDRESS: u8 = 0x00;
    const ACCESS: Access = Access::ReadOnly;
    type Value = IdCode;
}

impl ReadableRegister for IdCodeRegister {}
impl DpRegister for IdCodeRegister {}

/// ARM Debug Port IDCODE register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdCode(u32);

impl IdCode {
    pub const fn new(value: u32) -> Self {
        IdCode(value)
    }

    pub fn data(&self) -> u32 {
        self.0
    }

    /// Get revision field (bits 31:28)
    pub fn revision(&self) -> u8 {
        ((self.0 >> 28) & 0xF) as u8
    }

    /// Get part number (bits 27:20)
    pub fn part_number(&self) -> u8 {
        ((self.0 >> 20) & 0xFF) as u8
    }

    /// Get version (bits 15:12)
    pub fn version(&self) -> u8 {
        ((self.0 >> 12) & 0xF) as u8
    }

    /// Get MIN (bit 16)
    pub fn min(&self) -> bool {
        (self.0 & (1 << 16)) != 0
    }

    /// Get JEDEC desginer ID (bits 11:1)
    pub fn designer_id(&self) -> u16 {
        ((self.0 >> 1) & 0x7FF) as u16
    }

    /// Check if LSB is set (should always be 1 for valid IDCODE)
    pub fn is_valid(&self) -> bool {
        (self.0 & 1) == 1
    }

    /// Whether this looks like a value actually driven by a target.  A
    /// floating or shorted SWDIO line reads back as all zeros or all ones,
    /// and bit 0 of a real IDCODE always reads as one.
    pub fn is_plausible(&self) -> bool {
        self.is_valid() && self.0 != 0xFFFF_FFFF
    }

    /// Get part description if known
    pub fn part_description(&self) -> &'static str {
        if self.designer_id() == 0x23B {
            if self.part_number() == 0xBA {
                match self.version() {
                    0 => "ARM Debug Port v0",
                    1 => "ARM Debug Port v1",
                    2 => "ARM Debug Port v2",
                    _ => "Unknown ARM Debug Port Version",
                }
            } else {
                "unknown"
            }
        } else {
            "unknown"
        }
    }

    /// Check if this is an ARM Debug Port
    pub fn is_arm_debug_port(&self) -> bool {
        self.designer_id() == 0x23B && self.part_number() == 0xBA
    }

    pub const fn from_u32(value: u32) -> Self {
        IdCode(value)
    }
}

impl From<u32> for IdCode {
    fn from(value: u32) -> Self {
        Self::from_u32(value)
    }
}

impl fmt::Display for IdCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            if !self.is_valid() {
                return write!(f, "Invalid IDCODE: 0x{:08X} (LSB not set)", self.0);
            }

            write!(f, "0x{:08X} {}", self.0, self.part_description())
        } else {
            write!(f, "0x{:08X}", self.0)
        }
    }
}

impl fmt::LowerHex for IdCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl fmt::UpperHex for IdCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// ABORT Register descriptor (write-only)
pub struct AbortRegister;

impl RegisterDescriptor for AbortRegister {
    const NAME: &'static str = "ABORT";
    const ADDRESS: u8 = 0x00;
    const ACCESS: Access = Access::WriteOnly;
    type Value = Abort;
}

impl WritableRegister for AbortRegister {}
impl DpRegister for AbortRegister {}

/// ARM Debug Port ABORT register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Abort(u32);

// Standard register data impls
register_data_w!(Abort);

impl Abort {
    const DAPABORT: u32 = 1 << 0;
    const STKCMPCLR: u32 = 1 << 1;
    const STKERRCLR: u32 = 1 << 2;
    const WDERRCLR: u32 = 1 << 3;
    const ORUNERRCLR: u32 = 1 << 4;

    pub const fn new(value: u32) -> Self {
        Abort(value)
    }

    /// Every abort and clear flag set, as written when (re)connecting
    pub const fn all() -> Self {
        Abort(
            Self::DAPABORT
                | Self::STKCMPCLR
                | Self::STKERRCLR
                | Self::WDERRCLR
                | Self::ORUNERRCLR,
        )
    }

    /// Only STKERRCLR set, as written after a FAULT response
    pub const fn stkerrclr() -> Self {
        Abort(Self::STKERRCLR)
    }

    /// Get raw register value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Get abort flag
    pub fn dapabort(&self) -> bool {
        self.0 & Self::DAPABORT != 0
    }

    /// Get sticky error clear flag
    pub fn stkerrclr_set(&self) -> bool {
        self.0 & Self::STKERRCLR != 0
    }

    /// Get write data error clear flag
    pub fn wderrclr_set(&self) -> bool {
        self.0 & Self::WDERRCLR != 0
    }

    /// Get sticky compare clear flag
    pub fn stkcmpclr_set(&self) -> bool {
        self.0 & Self::STKCMPCLR != 0
    }

    /// Get overrun error clear flag
    pub fn orunerrclr_set(&self) -> bool {
        self.0 & Self::ORUNERRCLR != 0
    }

    /// Set sticky error clear flag
    pub fn set_stkerrclr(&mut self, enable: bool) {
        if enable {
            self.0 |= Self::STKERRCLR;
        } else {
            self.0 &= !Self::STKERRCLR;
        }
    }
}

/// CTRL/STAT Register descriptor (read-write)
pub struct CtrlStatRegister;

impl RegisterDescriptor for CtrlStatRegister {
    const NAME: &'static str = "CTRL/STAT";
    const ADDRESS: u8 = 0x04;
    const ACCESS: Access = Access::ReadWrite;
    type Value = CtrlStat;
}

impl ReadableRegister for CtrlStatRegister {}
impl WritableRegister for CtrlStatRegister {}
impl DpRegister for CtrlStatRegister {}

/// ARM Debug Port CTRL/STAT register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CtrlStat(u32);

// Standard register data impls
register_data_rw!(CtrlStat);

impl CtrlStat {
    // Field masks and shifts
    const STICKYORUN: u32 = 1 << 1;

    const TRNMODE_MASK: u32 = 0b11;
    const TRNMODE_SHIFT: u32 = 2;

    const STICKYCMP: u32 = 1 << 4;
    const STICKYERR: u32 = 1 << 5;
    const WDATAERR: u32 = 1 << 7;

    const MASKLANE_MASK: u32 = 0b1111;
    const MASKLANE_SHIFT: u32 = 8;

    const CDBGPWRUPREQ: u32 = 1 << 28;
    const CDBGPWRUPACK: u32 = 1 << 29;
    const CSYSPWRUPREQ: u32 = 1 << 30;
    const CSYSPWRUPACK: u32 = 1 << 31;

    // Transaction mode values
    pub const TRNMODE_NORMAL: u32 = 0b00;

    pub const fn new(value: u32) -> Self {
        CtrlStat(value)
    }

    /// Get raw register value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Both power-up acknowledges are set
    pub fn powered_up(&self) -> bool {
        self.cdbgpwrupack() && self.csyspwrupack()
    }

    /// Get sticky overrun flag
    pub fn stickyorun(&self) -> bool {
        self.0 & Self::STICKYORUN != 0
    }

    /// Get sticky compare flag
    pub fn stickycmp(&self) -> bool {
        self.0 & Self::STICKYCMP != 0
    }

    /// Get sticky error flag
    pub fn stickyerr(&self) -> bool {
        self.0 & Self::STICKYERR != 0
    }

    /// Get write data error flag
    pub fn wdataerr(&self) -> bool {
        self.0 & Self::WDATAERR != 0
    }

    /// Get mask lane value
    pub fn masklane(&self) -> u32 {
        (self.0 >> Self::MASKLANE_SHIFT) & Self::MASKLANE_MASK
    }

    /// Get debug power-up request
    pub fn cdbgpwrupreq(&self) -> bool {
        self.0 & Self::CDBGPWRUPREQ != 0
    }

    /// Get debug power-up acknowledge
    pub fn cdbgpwrupack(&self) -> bool {
        self.0 & Self::CDBGPWRUPACK != 0
    }

    /// Get system power-up request
    pub fn csyspwrupreq(&self) -> bool {
        self.0 & Self::CSYSPWRUPREQ != 0
    }

    /// Get system power-up acknowledge
    pub fn csyspwrupack(&self) -> bool {
        self.0 & Self::CSYSPWRUPACK != 0
    }

    pub fn has_errors(&self) -> bool {
        self.stickyorun() || self.stickycmp() || self.stickyerr() || self.wdataerr()
    }

    // Setters

    /// Set transaction mode
    pub fn set_trnmode(&mut self, mode: u32) {
        self.0 = (self.0 & !(Self::TRNMODE_MASK << Self::TRNMODE_SHIFT))
            | ((mode & Self::TRNMODE_MASK) << Self::TRNMODE_SHIFT);
    }

    /// Set mask lane value
    pub fn set_masklane(&mut self, mask: u32) {
        self.0 = (self.0 & !(Self::MASKLANE_MASK << Self::MASKLANE_SHIFT))
            | ((mask & Self::MASKLANE_MASK) << Self::MASKLANE_SHIFT);
    }

    /// Set debug power-up request
    pub fn set_cdbgpwrupreq(&mut self, enable: bool) {
        if enable {
            self.0 |= Self::CDBGPWRUPREQ;
        } else {
            self.0 &= !Self::CDBGPWRUPREQ;
        }
    }

    /// Set system power-up request
    pub fn set_csyspwrupreq(&mut self, enable: bool) {
        if enable {
            self.0 |= Self::CSYSPWRUPREQ;
        } else {
            self.0 &= !Self::CSYSPWRUPREQ;
        }
    }

    // Formatters

    /// Get power state description
    pub fn power_states(&self) -> String {
        format!(
            "Debug: {}/{}, System: {}/{}",
            if self.cdbgpwrupreq() { "REQ" } else { "off" },
            if self.cdbgpwrupack() { "ACK" } else { "nak" },
            if self.csyspwrupreq() { "REQ" } else { "off" },
            if self.csyspwrupack() { "ACK" } else { "nak" }
        )
    }
}

/// SELECT Register descriptor (write-only on SW-DP, RESEND shares the address)
pub struct SelectRegister;

impl RegisterDescriptor for SelectRegister {
    const NAME: &'static str = "SELECT";
    const ADDRESS: u8 = 0x08;
    const ACCESS: Access = Access::WriteOnly;
    type Value = Select;
}

impl WritableRegister for SelectRegister {}
impl DpRegister for SelectRegister {}

/// ARM Debug Port SELECT register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Select(u32);

// Standard register data impls
register_data_rw!(Select);

impl Select {
    // Field masks and shifts
    const APSEL_MASK: u32 = 0xFF;
    const APSEL_SHIFT: u32 = 24;

    pub const DPBANKSEL_MASK: u32 = 0xF;
    pub const DPBANKSEL_SHIFT: u32 = 0;

    pub const APBANKSEL_MASK: u32 = 0xF;
    pub const APBANKSEL_SHIFT: u32 = 4;

    /// SELECT value addressing the bank holding `addr` on access port
    /// `apsel`, with DP bank 0.
    pub fn for_ap(apsel: u8, addr: u8) -> Self {
        let mut select = Select(0);
        select.set_apsel(apsel as u32);
        select.set_apbanksel_from_addr(addr);
        select
    }

    /// Get raw register value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Get access port select
    pub fn apsel(&self) -> u32 {
        (self.0 >> Self::APSEL_SHIFT) & Self::APSEL_MASK
    }

    /// Get DP bank select
    pub fn dpbanksel(&self) -> u32 {
        (self.0 >> Self::DPBANKSEL_SHIFT) & Self::DPBANKSEL_MASK
    }

    /// Get AP bank select
    pub fn apbanksel(&self) -> u32 {
        (self.0 >> Self::APBANKSEL_SHIFT) & Self::APBANKSEL_MASK
    }

    /// Set access port select
    pub fn set_apsel(&mut self, apsel: u32) {
        self.0 = (self.0 & !(Self::APSEL_MASK << Self::APSEL_SHIFT))
            | ((apsel & Self::APSEL_MASK) << Self::APSEL_SHIFT);
    }

    /// Set DP bank select
    pub fn set_dpbanksel(&mut self, banksel: u8) {
        let banksel = banksel as u32;
        self.0 = (self.0 & !(Self::DPBANKSEL_MASK << Self::DPBANKSEL_SHIFT))
            | ((banksel & Self::DPBANKSEL_MASK) << Self::DPBANKSEL_SHIFT);
    }

    /// Set AP bank select
    pub fn set_apbanksel(&mut self, banksel: u8) {
        let banksel = banksel as u32;
        self.0 = (self.0 & !(Self::APBANKSEL_MASK << Self::APBANKSEL_SHIFT))
            | ((banksel & Self::APBANKSEL_MASK) << Self::APBANKSEL_SHIFT);
    }

    /// Set AP bank select from address
    pub fn set_apbanksel_from_addr(&mut self, addr: u8) {
        let banksel = (addr >> 4) & 0xF;
        self.set_apbanksel(banksel);
    }

    /// Get selection information string
    pub fn selection_info(&self) -> String {
        format!(
            "AP: {}, DP Bank: {}, AP Bank: {}",
            self.apsel(),
            self.dpbanksel(),
            self.apbanksel()
        )
    }
}

/// RDBUFF Register descriptor (read-only)
pub struct RdBuffRegister;

impl RegisterDescriptor for RdBuffRegister {
    const NAME: &'static str = "RDBUFF";
    const ADDRESS: u8 = 0x0C;
    const ACCESS: Access = Access::ReadOnly;
    type Value = RdBuff;
}

impl ReadableRegister for RdBuffRegister {}
impl DpRegister for RdBuffRegister {}

/// ARM Debug Port RDBUFF register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RdBuff(u32);

// Standard register data impls
register_data_r!(RdBuff);

impl RdBuff {
    /// Get the buffered data
    pub fn data(&self) -> u32 {
        self.0
    }
}

/// RESEND Register descriptor (read-only)
pub struct ResendRegister;

impl RegisterDescriptor for ResendRegister {
    const NAME: &'static str = "RESEND";
    const ADDRESS: u8 = 0x08;
    const ACCESS: Access = Access::ReadOnly;
    type Value = Resend;
}

impl ReadableRegister for ResendRegister {}
impl DpRegister for ResendRegister {}

/// ARM Debug Port RESEND register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resend(u32);

register_data_r!(Resend);

impl Resend {
    /// Get the value returned by the last AP read or RDBUFF read
    pub fn data(&self) -> u32 {
        self.0
    }
}

// SELECT fields must not overlap
const_assert!(Select::APBANKSEL_SHIFT + 4 <= Select::APSEL_SHIFT);
const_assert!(Select::DPBANKSEL_SHIFT + 4 <= Select::APBANKSEL_SHIFT);

/// SW-DP register layout.  IDCODE/ABORT and RESEND/SELECT share addresses,
/// distinguished by direction.
pub const DP_REGISTERS: [RegisterInfo; 6] = [
    RegisterInfo::of::<IdCodeRegister>(),
    RegisterInfo::of::<AbortRegister>(),
    RegisterInfo::of::<CtrlStatRegister>(),
    RegisterInfo::of::<ResendRegister>(),
    RegisterInfo::of::<SelectRegister>(),
    RegisterInfo::of::<RdBuffRegister>(),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_for_ap_fields() {
        let select = Select::for_ap(0x12, 0xF4);
        assert_eq!(select.apsel(), 0x12);
        assert_eq!(select.apbanksel(), 0xF);
        assert_eq!(select.dpbanksel(), 0);
        assert_eq!(select.value(), 0x1200_00F0);
    }

    #[test]
    fn abort_values() {
        assert_eq!(Abort::all().value(), 0x1F);
        assert_eq!(Abort::stkerrclr().value(), 0x04);
        assert!(Abort::stkerrclr().stkerrclr_set());
        assert!(!Abort::stkerrclr().dapabort());
    }

    #[test]
    fn idcode_fields() {
        let idcode = IdCode::new(0x2BA0_1477);
        assert_eq!(idcode.revision(), 0x2);
        assert_eq!(idcode.part_number(), 0xBA);
        assert!(!idcode.min());
        assert_eq!(idcode.version(), 0x1);
        assert_eq!(idcode.designer_id(), 0x23B);
    }

    #[test]
    fn idcode_plausibility() {
        assert!(IdCode::new(0x2BA0_1477).is_plausible());
        assert!(IdCode::new(0x2BA0_1477).is_arm_debug_port());
        assert!(!IdCode::new(0).is_plausible());
        assert!(!IdCode::new(0xFFFF_FFFF).is_plausible());
        assert!(!IdCode::new(0x2BA0_1476).is_plausible());
    }

    #[test]
    fn ctrl_stat_power_and_errors() {
        let mut ctrl = CtrlStat::new(0);
        ctrl.set_cdbgpwrupreq(true);
        ctrl.set_csyspwrupreq(true);
        assert!(!ctrl.powered_up());
        assert!(CtrlStat::new(0xF000_0000).powered_up());
        assert!(CtrlStat::new(1 << 5).has_errors());
        ctrl.set_masklane(0xF);
        assert_eq!(ctrl.masklane(), 0xF);
    }
}
