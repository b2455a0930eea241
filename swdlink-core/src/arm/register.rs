// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM SWD Register Access Traits and Layout Tables
//!
//! The typed traits are used to ensure strongly typed access to reading and
//! writing SWD registers, using
//!
//! * `swdlink::interface::SwdInterface::read_dp_register`
//! * `swdlink::interface::SwdInterface::read_ap_register`
//! * `swdlink::interface::SwdInterface::write_dp_register`
//! * `swdlink::interface::SwdInterface::write_ap_register`
//!
//! [`RegisterInfo`] is the untyped view of the same information, used for
//! the immutable DP and MEM-AP layout tables and for validating raw port
//! accesses.
//!
//! [`TargetRegister`] is the minimal contract a target's own register
//! descriptions (peripherals on the memory bus) must meet for the driver to
//! read and write them.

use core::fmt;

/// Access mode of a register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    /// Whether the register may be read
    pub const fn readable(&self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    /// Whether the register may be written
    pub const fn writable(&self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::ReadOnly => write!(f, "read-only"),
            Access::WriteOnly => write!(f, "write-only"),
            Access::ReadWrite => write!(f, "read-write"),
        }
    }
}

/// Base trait for all ARM debug register descriptors
pub trait RegisterDescriptor {
    const NAME: &'static str;
    const ADDRESS: u8;
    const ACCESS: Access;
    type Value;
}

/// Registers that can be read
pub trait ReadableRegister: RegisterDescriptor {
    /// Convert raw 32-bit data to register value
    fn from_raw(data: u32) -> Self::Value
    where
        Self::Value: From<u32>,
    {
        Self::Value::from(data)
    }
}

/// Registers that can be written
pub trait WritableRegister: RegisterDescriptor {
    /// Convert register value to raw 32-bit data
    fn to_raw(value: Self::Value) -> u32
    where
        Self::Value: Into<u32>,
    {
        value.into()
    }
}

/// Debug Port registers (accessed via DP operations)
pub trait DpRegister: RegisterDescriptor {}

/// Access Port registers (accessed via AP operations)
pub trait ApRegister: RegisterDescriptor {}

/// Untyped description of a single DP or AP register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterInfo {
    pub name: &'static str,
    pub address: u8,
    pub width: u8,
    pub access: Access,
}

impl RegisterInfo {
    /// Builds the layout entry for a typed register descriptor.  All DP and
    /// AP registers are 32 bits wide.
    pub const fn of<R: RegisterDescriptor>() -> Self {
        Self {
            name: R::NAME,
            address: R::ADDRESS,
            width: 32,
            access: R::ACCESS,
        }
    }
}

impl fmt::Display for RegisterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ 0x{:02X} ({})", self.name, self.address, self.access)
    }
}

/// Find the register at `address` in `layout` that permits the given
/// direction.  DP registers share addresses between a read-only and a
/// write-only register (IDCODE/ABORT, RESEND/SELECT), hence the direction.
pub fn lookup(layout: &[RegisterInfo], address: u8, write: bool) -> Option<&RegisterInfo> {
    layout.iter().find(|reg| {
        reg.address == address
            && if write {
                reg.access.writable()
            } else {
                reg.access.readable()
            }
    })
}

/// A memory-mapped register on the target, described externally (for
/// example by a device description file).  The driver only needs its
/// address, width and access mode.
pub trait TargetRegister {
    /// Absolute address on the target's memory bus
    fn address(&self) -> u32;

    /// Width in bits: 8, 16 or 32
    fn width(&self) -> u8;

    /// Access mode
    fn access(&self) -> Access;
}

/// Generate a read-only register data type
#[macro_export]
macro_rules! register_data_r {
    ($name:ident) => {
        // Used to retrieve value
        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value.0
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                $name(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:08X}", self.0)
            }
        }
    };
}

/// Generate a read-write register data type
#[macro_export]
macro_rules! register_data_rw {
    ($name:ident) => {
        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value.0
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                $name(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:08X}", self.0)
            }
        }
    };
}

/// Generate a write-only register data type
#[macro_export]
macro_rules! register_data_w {
    ($name:ident) => {
        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:08X}", self.0)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::dp::DP_REGISTERS;
    use crate::arm::map::MEM_AP_REGISTERS;

    #[test]
    fn lookup_respects_direction() {
        let read = lookup(&DP_REGISTERS, 0x00, false).map(|r| r.name);
        let write = lookup(&DP_REGISTERS, 0x00, true).map(|r| r.name);
        assert_eq!(read, Some("IDCODE"));
        assert_eq!(write, Some("ABORT"));

        let read = lookup(&DP_REGISTERS, 0x08, false).map(|r| r.name);
        let write = lookup(&DP_REGISTERS, 0x08, true).map(|r| r.name);
        assert_eq!(read, Some("RESEND"));
        assert_eq!(write, Some("SELECT"));

        assert!(lookup(&DP_REGISTERS, 0x0C, true).is_none());
        assert!(lookup(&DP_REGISTERS, 0x10, false).is_none());
    }

    #[test]
    fn mem_ap_layout() {
        let idr = lookup(&MEM_AP_REGISTERS, 0xFC, false).map(|r| r.access);
        assert_eq!(idr, Some(Access::ReadOnly));
        assert!(lookup(&MEM_AP_REGISTERS, 0xF8, true).is_none());
        assert!(MEM_AP_REGISTERS.iter().all(|r| r.width == 32));
    }
}
