// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! swdlink-core - ARM Debug Interface (ADIv5) register model used by
//! `swdlink`.
//!
//! Contains:
//! - typed descriptors for the SW-DP registers ([`arm::dp`]), the generic AP
//!   identification register ([`arm::ap`]) and the MEM-AP registers
//!   ([`arm::map`])
//! - the immutable DP and MEM-AP register layout tables
//!   ([`arm::dp::DP_REGISTERS`], [`arm::map::MEM_AP_REGISTERS`])
//! - the [`arm::register::TargetRegister`] contract for externally described
//!   target registers
//!
//! This library is `no_std` compatible, and requires an `alloc`
//! implementation.

#![no_std]

pub mod arm;

extern crate alloc;

pub use arm::register::{Access, RegisterInfo, TargetRegister};
