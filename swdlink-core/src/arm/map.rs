// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM Memory Access Port Registers

use crate::arm::ap::IdrRegister;
use crate::arm::register::{
    Access, ApRegister, ReadableRegister, RegisterDescriptor, RegisterInfo, WritableRegister,
};
use crate::{register_data_r, register_data_rw};
use core::fmt;

/// Control/Status Word Register descriptor (read-write)
pub struct CswRegister;

impl RegisterDescriptor for CswRegister {
    const NAME: &'static str = "CSW";
    const ADDRESS: u8 = 0x00;
    const ACCESS: Access = Access::ReadWrite;
    type Value = Csw;
}

impl ReadableRegister for CswRegister {}
impl WritableRegister for CswRegister {}
impl ApRegister for CswRegister {}

/// Control/Status Word register data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Csw(u32);

// Standard register data impls
register_data_rw!(Csw);

impl Csw {
    // Field masks and shifts
    const SIZE_MASK: u32 = 0b111;
    const SIZE_SHIFT: u32 = 0;

    const ADDRINC_MASK: u32 = 0b11;
    const ADDRINC_SHIFT: u32 = 4;

    const DEVICE_EN: u32 = 1 << 6;

    const MODE_MASK: u32 = 0b1111;
    const MODE_SHIFT: u32 = 8;

    const PROT_MASK: u32 = 0b1111111;
    const PROT_SHIFT: u32 = 24;

    const RESERVED_HIGH: u32 = 1 << 24;

    // Size values
    pub const SIZE_8BIT: u32 = 0b000;
    pub const SIZE_16BIT: u32 = 0b001;
    pub const SIZE_32BIT: u32 = 0b010;
    pub const SIZE_64BIT: u32 = 0b011;
    pub const SIZE_128BIT: u32 = 0b100;
    pub const SIZE_256BIT: u32 = 0b101;

    // Address increment values
    pub const ADDRINC_OFF: u32 = 0b00;
    pub const ADDRINC_SINGLE: u32 = 0b01;
    pub const ADDRINC_PACKED: u32 = 0b10;

    // Prot values
    pub const PROT_MASTER_DEBUG: u32 = 1 << 5;
    pub const PROT_BIT_1: u32 = 1 << 1;

    /// The default CSW with the given SIZE field and the given address
    /// increment mode.
    pub fn with_size(size: u32, addrinc: u32) -> Self {
        let mut csw = Self::default();
        csw.set_size(size);
        csw.set_addrinc(addrinc);
        csw
    }

    /// Get raw register value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Get size field
    pub fn size(&self) -> u32 {
        (self.0 >> Self::SIZE_SHIFT) & Self::SIZE_MASK
    }

    /// Get address increment field
    pub fn addrinc(&self) -> u32 {
        (self.0 >> Self::ADDRINC_SHIFT) & Self::ADDRINC_MASK
    }

    /// Get mode field
    pub fn mode(&self) -> u32 {
        (self.0 >> Self::MODE_SHIFT) & Self::MODE_MASK
    }

    /// Get protection field
    pub fn prot(&self) -> u32 {
        (self.0 >> Self::PROT_SHIFT) & Self::PROT_MASK
    }

    // Setters
    pub fn set_reserved_high(&mut self) {
        self.0 |= Self::RESERVED_HIGH;
    }

    /// Set size field
    pub fn set_size(&mut self, size: u32) {
        self.0 = (self.0 & !(Self::SIZE_MASK << Self::SIZE_SHIFT))
            | ((size & Self::SIZE_MASK) << Self::SIZE_SHIFT);
    }

    /// Set address increment field
    pub fn set_addrinc(&mut self, addrinc: u32) {
        self.0 = (self.0 & !(Self::ADDRINC_MASK << Self::ADDRINC_SHIFT))
            | ((addrinc & Self::ADDRINC_MASK) << Self::ADDRINC_SHIFT);
    }

    /// Set device enable flag
    pub fn set_device_en(&mut self, enable: bool) {
        if enable {
            self.0 |= Self::DEVICE_EN;
        } else {
            self.0 &= !Self::DEVICE_EN;
        }
    }

    /// Set protection field
    pub fn set_prot(&mut self, prot: u32) {
        self.0 = (self.0 & !(Self::PROT_MASK << Self::PROT_SHIFT))
            | ((prot & Self::PROT_MASK) << Self::PROT_SHIFT);
    }
}

impl Default for Csw {
    fn default() -> Self {
        let mut csw = Csw(0);
        csw.set_reserved_high();
        csw.set_prot(Self::PROT_MASTER_DEBUG | Self::PROT_BIT_1);
        csw.set_size(Self::SIZE_32BIT);
        csw.set_addrinc(Self::ADDRINC_OFF);
        csw.set_device_en(true);

        csw
    }
}

/// Transfer Address Register descriptor (read-write)
pub struct TarRegister;

impl RegisterDescriptor for TarRegister {
    const NAME: &'static str = "TAR";
    const ADDRESS: u8 = 0x04;
    const ACCESS: Access = Access::ReadWrite;
    type Value = Tar;
}

impl ReadableRegister for TarRegister {}
impl WritableRegister for TarRegister {}
impl ApRegister for TarRegister {}

/// Transfer Address Register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tar(u32);

// Standard register data impls
register_data_rw!(Tar);

impl Tar {
    pub const fn new(address: u32) -> Self {
        Tar(address)
    }

    /// Get raw register value
    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Data Read/Write Register descriptor (read-write)
pub struct DrwRegister;

impl RegisterDescriptor for DrwRegister {
    const NAME: &'static str = "DRW";
    const ADDRESS: u8 = 0x0C;
    const ACCESS: Access = Access::ReadWrite;
    type Value = Drw;
}

impl ReadableRegister for DrwRegister {}
impl WritableRegister for DrwRegister {}
impl ApRegister for DrwRegister {}

/// Data Read/Write Register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Drw(u32);

// Standard register data impls
register_data_rw!(Drw);

impl Drw {
    pub const fn new(data: u32) -> Self {
        Drw(data)
    }

    /// Get raw register value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Get data value
    pub fn data(&self) -> u32 {
        self.0
    }
}

/// Configuration Register descriptor (read-only)
pub struct CfgRegister;

impl RegisterDescriptor for CfgRegister {
    const NAME: &'static str = "CFG";
    const ADDRESS: u8 = 0xF4;
    const ACCESS: Access = Access::ReadOnly;
    type Value = Cfg;
}

impl ReadableRegister for CfgRegister {}
impl ApRegister for CfgRegister {}

/// Configuration Register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cfg(u32);

register_data_r!(Cfg);

impl Cfg {
    const BE: u32 = 1 << 0;

    /// Get raw register value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Memory system is big-endian
    pub fn big_endian(&self) -> bool {
        self.0 & Self::BE != 0
    }
}

/// Debug Base Address Register descriptor (read-only)
pub struct BaseRegister;

impl RegisterDescriptor for BaseRegister {
    const NAME: &'static str = "BASE";
    const ADDRESS: u8 = 0xF8;
    const ACCESS: Access = Access::ReadOnly;
    type Value = Base;
}

impl ReadableRegister for BaseRegister {}
impl ApRegister for BaseRegister {}

/// Debug Base Address Register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Base(u32);

register_data_r!(Base);

impl Base {
    const PRESENT: u32 = 1 << 0;
    const FORMAT: u32 = 1 << 1;
    const BASEADDR_MASK: u32 = 0xFFFF_F000;

    // Legacy "no debug entries" value
    const LEGACY_NOT_PRESENT: u32 = 0xFFFF_FFFF;

    /// Get raw register value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Whether a debug component ROM table is present
    pub fn present(&self) -> bool {
        if self.0 == Self::LEGACY_NOT_PRESENT {
            return false;
        }
        if self.0 & Self::FORMAT != 0 {
            self.0 & Self::PRESENT != 0
        } else {
            true
        }
    }

    /// Base address of the ROM table (4KB aligned)
    pub fn base_address(&self) -> u32 {
        self.0 & Self::BASEADDR_MASK
    }
}

/// MEM-AP register layout
pub const MEM_AP_REGISTERS: [RegisterInfo; 6] = [
    RegisterInfo::of::<CswRegister>(),
    RegisterInfo::of::<TarRegister>(),
    RegisterInfo::of::<DrwRegister>(),
    RegisterInfo::of::<CfgRegister>(),
    RegisterInfo::of::<BaseRegister>(),
    RegisterInfo::of::<IdrRegister>(),
];
