// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Raw bit I/O boundary.
//!
//! Anything that can clock bits on SWDIO/SWCLK (a USB bit-bang adapter, a
//! GPIO driver, or the software `SimTarget`) implements [`BitLink`].  The
//! SWD framing, parity and turnaround handling all live above this trait in
//! [`crate::protocol::SwdProtocol`].

/// Errors raised by a [`BitLink`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// A bit operation was attempted while the link was not connected.
    #[error("link not connected")]
    NotConnected,

    /// More than 64 bits requested in a single operation.
    #[error("bit count {0} out of range")]
    BitCount(usize),

    /// The underlying adapter failed.
    #[error("adapter I/O failed: {0}")]
    Io(String),
}

/// Raw serial bit write/read primitive.
///
/// Bits are always transferred least significant bit first in time: bit 0
/// of `bits` is the first bit clocked out by [`BitLink::write_bits()`], and
/// the first bit sampled by [`BitLink::read_bits()`] is returned in bit 0.
pub trait BitLink {
    /// Open the adapter and take control of SWDIO/SWCLK.
    fn connect(&mut self) -> Result<(), LinkError>;

    /// Release SWDIO/SWCLK and close the adapter.
    fn disconnect(&mut self) -> Result<(), LinkError>;

    /// Drive `count` bits (at most 64) onto SWDIO.
    fn write_bits(&mut self, bits: u64, count: usize) -> Result<(), LinkError>;

    /// Sample `count` bits (at most 64) from SWDIO.
    fn read_bits(&mut self, count: usize) -> Result<u64, LinkError>;
}

impl<T: BitLink + ?Sized> BitLink for Box<T> {
    fn connect(&mut self) -> Result<(), LinkError> {
        (**self).connect()
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        (**self).disconnect()
    }

    fn write_bits(&mut self, bits: u64, count: usize) -> Result<(), LinkError> {
        (**self).write_bits(bits, count)
    }

    fn read_bits(&mut self, count: usize) -> Result<u64, LinkError> {
        (**self).read_bits(count)
    }
}
