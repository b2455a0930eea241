// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! swdlink library
//!
//! Host-side ARM Serial Wire Debug (SWD) driver.
//!
//! This can be used to connect to, and read and write the memory of, ARM
//! CoreSight targets using the
//! [ARM SWD protocol](https://developer.arm.com/documentation/ihi0031/latest/)
//! from a host, given something that can clock raw bits on SWDIO/SWCLK.
//!
//! The following diagram shows the key `swdlink` concepts.
//!
//! ```text
//!   Application threads  |  worker::TargetHandle
//! ----------------------        |
//!     DebugSession      <-- worker::TargetWorker (I/O thread)
//! ----------------------
//!         MemAp           \
//! ----------------------   \
//!      SwdInterface         |--  SwdError
//! ----------------------   /
//!      SwdProtocol        /                          e.g. STM32/Pico
//! ----------------------                            -----------------
//!    dyn BitLink         >======================<       SWD Target
//!  (USB adapter, GPIO)      SWDIO/SWCLK/GND
//! ```
//!
//! * [`DebugSession`] owns the connection lifecycle (connect, disconnect,
//!   reset) and provides memory and port access once connected.
//! * [`MemAp`] performs 8/16/32-bit memory accesses through a MEM-AP's
//!   CSW/TAR/DRW registers.
//! * [`SwdInterface`] provides individual DP and AP register access and owns
//!   the DP SELECT cache.
//! * [`SwdProtocol`] implements the SWD wire protocol on top of a
//!   [`BitLink`].
//! * [`BitLink`] is the raw bit I/O boundary, implemented by the adapter
//!   driver.  `sim::SimTarget` implements it in software, and is built
//!   with the `sim` feature (on by default).  Adapter crates can drop it
//!   with `default-features = false`.
//!
//! Most applications should use [`DebugSession`], or [`worker::TargetHandle`]
//! when several threads need to share one target.  Those that require tighter
//! control over the target may use [`SwdInterface`] directly.
//!
//! `swdlink` uses the [`swdlink_core`] library, which provides the ARM debug
//! register definitions.

pub mod config;
pub mod interface;
pub mod link;
pub mod memory;
pub mod protocol;
pub mod session;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod worker;

#[doc(inline)]
pub use crate::config::SessionConfig;
#[doc(inline)]
pub use crate::interface::{PortKind, SwdInterface};
#[doc(inline)]
pub use crate::link::{BitLink, LinkError};
#[doc(inline)]
pub use crate::memory::{AccessWidth, MemAp};
#[doc(inline)]
pub use crate::protocol::SwdProtocol;
#[doc(inline)]
pub use crate::session::{DebugSession, SessionState};

use serde::Serialize;
use std::fmt;

/// The step of [`DebugSession::connect()`] that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectStage {
    Link,
    LineReset,
    SwitchProtocol,
    IdCode,
    ClearErrors,
    CtrlStat,
    Select,
    PowerUp,
    NegotiateWidth,
}

impl ConnectStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectStage::Link => "link connect",
            ConnectStage::LineReset => "line reset",
            ConnectStage::SwitchProtocol => "JTAG to SWD switch",
            ConnectStage::IdCode => "IDCODE read",
            ConnectStage::ClearErrors => "error clear",
            ConnectStage::CtrlStat => "CTRL/STAT setup",
            ConnectStage::Select => "SELECT reset",
            ConnectStage::PowerUp => "power up",
            ConnectStage::NegotiateWidth => "access width negotiation",
        }
    }
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Core error type used by all swdlink objects
///
/// Methods are provided to make it easier to handle errors, by checking if
/// either a retry or reset is required:
///
/// - [`SwdError::requires_retry()`]
/// - [`SwdError::requires_reset()`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SwdError {
    /// The target kept answering WAIT after the configured number of
    /// attempts.  Transient: the operation can be retried.
    #[error("Wait ACK")]
    WaitAck,

    /// The target answered FAULT.  The sticky error flag has already been
    /// cleared via DP ABORT by the time this is returned, so subsequent
    /// operations can proceed, but this operation did not happen.
    #[error("Fault ACK")]
    FaultAck,

    /// The ACK bits did not decode to OK, WAIT or FAULT.  The value
    /// received is included.  7 means the SWDIO line was high for the entire
    /// acknowledge cycle, which is the most common case, and means nothing is
    /// driving the line: no target, no power, or lost protocol sync.
    #[error("No ACK: {0}")]
    NoAck(u8),

    /// A parity error was detected while reading from the target.  It means
    /// we cannot trust the data read.
    ///
    /// A significant number of parity errors suggest either:
    /// - A noise issue on the SWD lines
    /// - Running the SWD protocol too fast for the SWD lines or target
    #[error("Read Parity Error")]
    ReadParity,

    /// The target's IDCODE read back as a value no target would drive.
    #[error("Invalid IDCODE: 0x{0:08X}")]
    InvalidIdCode(u32),

    /// The debug and system power domains did not acknowledge power-up
    /// within the configured timeout.
    #[error("Power-up timeout")]
    PowerUpTimeout,

    /// A step of the connection sequence failed.  The session is left
    /// disconnected.
    #[error("Connect failed during {stage}: {source}")]
    Connect {
        stage: ConnectStage,
        #[source]
        source: Box<SwdError>,
    },

    /// While there wasn't a SWD protocol level error, the requested
    /// operation failed.
    #[error("Operation Failed: {0}")]
    OperationFailed(String),

    /// The session is not connected.  Call [`DebugSession::connect()`]
    /// first.
    #[error("Not Ready")]
    NotReady,

    /// The API was called incorrectly, for example with a misaligned address
    /// or a register that doesn't permit the requested access.
    #[error("API Error: {0}")]
    Api(String),

    /// The requested operation is not supported by the target's MEM-AP.
    #[error("Unsupported Operation: {0}")]
    Unsupported(String),

    /// The bit-level link failed.
    #[error("Link Error: {0}")]
    Link(#[from] LinkError),

    /// The target worker thread has stopped.
    #[error("Worker Stopped")]
    WorkerStopped,
}

impl SwdError {
    /// Returns true if the error requires a target reset to recover.  In this
    /// case issue [`DebugSession::reset()`].  If the error persists, the
    /// target may require a hard reset.
    pub fn requires_reset(&self) -> bool {
        match self {
            SwdError::NoAck(_) | SwdError::ReadParity | SwdError::Link(_) => true,
            SwdError::Connect { source, .. } => source.requires_reset(),
            _ => false,
        }
    }

    /// Returns true if the error is a transient error that can be retried.
    /// This is typically just the `Wait` error from the SWD target.
    pub fn requires_retry(&self) -> bool {
        matches!(self, SwdError::WaitAck)
    }

    /// Returns true if the error requires neither a reset nor a retry to
    /// recover.  Normally this means an application error (the API has
    /// probably been used incorrectly) or a fault on the target's bus.
    pub fn requires_other(&self) -> bool {
        !self.requires_reset() && !self.requires_retry()
    }

    /// Returns a string representation of the error kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            SwdError::WaitAck => "wait ack",
            SwdError::FaultAck => "fault ack",
            SwdError::NoAck(_) => "no ack",
            SwdError::ReadParity => "read parity",
            SwdError::InvalidIdCode(_) => "invalid idcode",
            SwdError::PowerUpTimeout => "power-up timeout",
            SwdError::Connect { .. } => "connect",
            SwdError::OperationFailed(_) => "operation failed",
            SwdError::NotReady => "not ready",
            SwdError::Api(_) => "api error",
            SwdError::Unsupported(_) => "unsupported",
            SwdError::Link(_) => "link error",
            SwdError::WorkerStopped => "worker stopped",
        }
    }

    /// The innermost error, looking through [`SwdError::Connect`].
    pub fn root_cause(&self) -> &SwdError {
        match self {
            SwdError::Connect { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl Serialize for SwdError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("SwdError", 2)?;

        state.serialize_field("kind", self.as_str())?;

        let detail = match self {
            SwdError::NoAck(code) => format!("{code}"),
            SwdError::InvalidIdCode(value) => format!("0x{value:08X}"),
            SwdError::Connect { stage, source } => format!("{stage}: {source}"),
            SwdError::OperationFailed(msg) | SwdError::Api(msg) | SwdError::Unsupported(msg) => {
                msg.clone()
            }
            SwdError::Link(e) => e.to_string(),
            _ => String::new(), // empty detail for variants without data
        };
        state.serialize_field("detail", &detail)?;
        state.end()
    }
}
