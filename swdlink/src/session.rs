// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Debug session lifecycle.
//!
//! [`DebugSession`] takes a target from nothing to a powered-up debug
//! domain with a negotiated MEM-AP access width, and then provides memory
//! and register access.
//!
//! ```rust
//! use swdlink::{AccessWidth, DebugSession, SessionState};
//! use swdlink::sim::SimTarget;
//!
//! let mut session = DebugSession::new(SimTarget::default());
//! let idcode = session.connect().unwrap();
//! assert_eq!(idcode.data(), 0x2BA0_1477);
//! assert_eq!(session.state(), SessionState::Ready);
//!
//! session.write_mem(0x2000_0000, 0xDEAD_BEEF, AccessWidth::Bits32).unwrap();
//! assert_eq!(session.read_mem(0x2000_0002, AccessWidth::Bits16).unwrap(), 0xDEAD);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::config::SessionConfig;
use crate::interface::{PortKind, SwdInterface};
use crate::link::BitLink;
use crate::memory::{AccessWidth, MemAp, MemApInfo};
use crate::protocol::SwdProtocol;
use crate::{ConnectStage, SwdError};
use swdlink_core::arm::Cortex;
use swdlink_core::arm::dp::{CtrlStat, IdCode, Select};
use swdlink_core::arm::register::TargetRegister;

/// Where a [`DebugSession`] is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No connection.  The initial state, and the state after any failed
    /// connect.
    Disconnected,
    /// [`DebugSession::connect()`] is in progress.
    Connecting,
    /// IDCODE has been read.
    Synced,
    /// Debug and system power domains are up.
    PoweredUp,
    /// Memory and register access is available.
    Ready,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Synced => "Synced",
            SessionState::PoweredUp => "Powered Up",
            SessionState::Ready => "Ready",
        };
        write!(f, "{s}")
    }
}

/// A connection to one target.
///
/// Every operation takes `&mut self`, so a session can only be used by one
/// caller at a time.  To share a target between threads, hand the session
/// to a [`crate::worker::TargetWorker`].
#[derive(Debug)]
pub struct DebugSession<L> {
    swd: SwdInterface<L>,
    mem_ap: MemAp,
    config: SessionConfig,
    state: SessionState,
}

impl<L: BitLink> DebugSession<L> {
    /// Create a disconnected session with the default configuration.
    pub fn new(link: L) -> Self {
        Self::with_config(link, SessionConfig::default())
    }

    /// Create a disconnected session.
    pub fn with_config(link: L, config: SessionConfig) -> Self {
        let protocol = SwdProtocol::with_config(link, &config);
        Self {
            swd: SwdInterface::new(protocol),
            mem_ap: MemAp::new(config.mem_ap),
            config,
            state: SessionState::Disconnected,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// The target's IDCODE, once connected.
    pub fn idcode(&self) -> Option<IdCode> {
        self.swd.idcode()
    }

    /// The narrowest memory transfer the MEM-AP supports, once connected.
    pub fn access_width(&self) -> Option<AccessWidth> {
        self.mem_ap.width()
    }

    /// Direct access to the underlying [`SwdInterface`].
    pub fn swd_if(&self) -> &SwdInterface<L> {
        &self.swd
    }

    /// Mutable access to the underlying [`SwdInterface`].  Anything done
    /// through it that resets the DP must be followed by
    /// [`SwdInterface::invalidate_select_cache()`].
    pub fn swd_if_mut(&mut self) -> &mut SwdInterface<L> {
        &mut self.swd
    }

    pub fn into_link(self) -> L {
        self.swd.into_link()
    }

    /// Connect to the target.
    ///
    /// Brings up the link, switches the target to SWD, reads and checks
    /// IDCODE, clears any sticky errors, configures CTRL/STAT and SELECT,
    /// powers up the debug and system domains and negotiates the MEM-AP
    /// access width.
    ///
    /// Returns:
    /// - `Ok(IdCode)`: the session is `Ready`.
    /// - `Err(SwdError::Connect)`: naming the step that failed.  The session
    ///   is `Disconnected`.
    pub fn connect(&mut self) -> Result<IdCode, SwdError> {
        trace!("Exec:  Connect");
        self.state = SessionState::Connecting;

        match self.connect_sequence() {
            Ok(idcode) => {
                self.state = SessionState::Ready;
                info!("OK:    Connected to target {idcode}");
                Ok(idcode)
            }
            Err(e) => {
                info!("Error: {e}");
                self.abandon();
                Err(e)
            }
        }
    }

    /// Line reset and release the link, best effort.  Forgets the SELECT
    /// cache, IDCODE and access width.
    ///
    /// Only a failure to release the link is reported, and the session is
    /// `Disconnected` afterwards either way.
    pub fn disconnect(&mut self) -> Result<(), SwdError> {
        trace!("Exec:  Disconnect");
        if let Err(e) = self.swd.line_reset() {
            debug!("Note:  Line reset on disconnect failed: {e}");
        }
        let result = self.swd.protocol_mut().disconnect();
        self.forget();
        result
    }

    /// Disconnect and connect again.
    pub fn reset(&mut self) -> Result<IdCode, SwdError> {
        trace!("Exec:  Reset");
        if let Err(e) = self.disconnect() {
            debug!("Note:  Disconnect before reset failed: {e}");
        }
        self.connect()
    }

    /// Read `width` bits of memory at `addr`.
    pub fn read_mem(&mut self, addr: u32, width: AccessWidth) -> Result<u32, SwdError> {
        self.check_ready()?;
        self.mem_ap.read(&mut self.swd, addr, width)
    }

    /// Write the low `width` bits of `value` to memory at `addr`.
    pub fn write_mem(&mut self, addr: u32, value: u32, width: AccessWidth) -> Result<(), SwdError> {
        self.check_ready()?;
        self.mem_ap.write(&mut self.swd, addr, value, width)
    }

    /// Read consecutive words starting at `addr`.
    pub fn read_block(&mut self, addr: u32, buf: &mut [u32]) -> Result<(), SwdError> {
        self.check_ready()?;
        self.mem_ap.read_block(&mut self.swd, addr, buf)
    }

    /// Write consecutive words starting at `addr`.
    pub fn write_block(&mut self, addr: u32, data: &[u32]) -> Result<(), SwdError> {
        self.check_ready()?;
        self.mem_ap.write_block(&mut self.swd, addr, data)
    }

    /// Read a DP or AP register by raw address.
    pub fn read_port(&mut self, kind: PortKind, ap_index: u8, addr: u8) -> Result<u32, SwdError> {
        self.check_ready()?;
        self.swd.read_port(kind, ap_index, addr)
    }

    /// Write a DP or AP register by raw address.
    pub fn write_port(
        &mut self,
        kind: PortKind,
        ap_index: u8,
        addr: u8,
        value: u32,
    ) -> Result<(), SwdError> {
        self.check_ready()?;
        self.swd.write_port(kind, ap_index, addr, value)
    }

    /// Read a memory-mapped target register, using its address, width and
    /// access.
    pub fn read_target_register<R>(&mut self, reg: &R) -> Result<u32, SwdError>
    where
        R: TargetRegister + ?Sized,
    {
        if !reg.access().readable() {
            return Err(SwdError::Api(format!(
                "register at {:#010X} is {}",
                reg.address(),
                reg.access()
            )));
        }
        let width = AccessWidth::try_from(reg.width())?;
        self.read_mem(reg.address(), width)
    }

    /// Write a memory-mapped target register, using its address, width and
    /// access.
    pub fn write_target_register<R>(&mut self, reg: &R, value: u32) -> Result<(), SwdError>
    where
        R: TargetRegister + ?Sized,
    {
        if !reg.access().writable() {
            return Err(SwdError::Api(format!(
                "register at {:#010X} is {}",
                reg.address(),
                reg.access()
            )));
        }
        let width = AccessWidth::try_from(reg.width())?;
        self.write_mem(reg.address(), value, width)
    }

    /// Identify the session's MEM-AP.
    pub fn mem_ap_info(&mut self) -> Result<MemApInfo, SwdError> {
        self.check_ready()?;
        self.mem_ap.identify(&mut self.swd)
    }

    pub fn read_ctrl_stat(&mut self) -> Result<CtrlStat, SwdError> {
        self.check_ready()?;
        self.swd.read_ctrl_stat()
    }
}

// Internal functions
impl<L: BitLink> DebugSession<L> {
    fn connect_sequence(&mut self) -> Result<IdCode, SwdError> {
        at(ConnectStage::Link, self.swd.protocol_mut().connect())?;
        at(ConnectStage::LineReset, self.swd.line_reset())?;
        at(ConnectStage::SwitchProtocol, self.swd.switch_protocol())?;

        let idcode = at(ConnectStage::IdCode, self.swd.read_idcode())?;
        if !idcode.is_plausible() {
            return at(
                ConnectStage::IdCode,
                Err(SwdError::InvalidIdCode(idcode.data())),
            );
        }
        match Cortex::from_idcode(idcode) {
            Some(cortex) => info!("Info:  Target is {cortex}"),
            None => debug!("Info:  Unrecognised core, IDCODE {idcode:#}"),
        }
        self.state = SessionState::Synced;

        at(ConnectStage::ClearErrors, self.swd.clear_errors())?;
        at(ConnectStage::CtrlStat, self.swd.configure_ctrl_stat())?;
        at(
            ConnectStage::Select,
            self.swd.write_select(Select::default()),
        )?;
        at(
            ConnectStage::PowerUp,
            self.swd.power_up_debug_domain(
                self.config.power_up_timeout,
                self.config.power_up_poll_interval,
            ),
        )?;
        self.state = SessionState::PoweredUp;

        let width = at(
            ConnectStage::NegotiateWidth,
            self.mem_ap.negotiate_width(&mut self.swd),
        )?;
        debug!("Value: Access width {width}");

        Ok(idcode)
    }

    // Connect failed part way through
    fn abandon(&mut self) {
        if let Err(e) = self.swd.protocol_mut().disconnect() {
            debug!("Note:  Link disconnect after failed connect failed: {e}");
        }
        self.forget();
    }

    fn forget(&mut self) {
        self.swd.reset_internal_state();
        self.mem_ap.invalidate();
        self.state = SessionState::Disconnected;
    }

    fn check_ready(&self) -> Result<(), SwdError> {
        if self.state == SessionState::Ready {
            Ok(())
        } else {
            Err(SwdError::NotReady)
        }
    }
}

// Tag an error with the connect step it came from
fn at<T>(stage: ConnectStage, result: Result<T, SwdError>) -> Result<T, SwdError> {
    result.map_err(|source| SwdError::Connect {
        stage,
        source: Box::new(source),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkError;
    use crate::sim::SimTarget;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use swdlink_core::Access;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            wait_delay: Duration::ZERO,
            power_up_timeout: Duration::from_millis(5),
            power_up_poll_interval: Duration::from_millis(1),
            ..SessionConfig::default()
        }
    }

    fn session(sim: SimTarget) -> DebugSession<SimTarget> {
        DebugSession::with_config(sim, fast_config())
    }

    fn connected() -> DebugSession<SimTarget> {
        let mut session = session(SimTarget::default());
        session.connect().unwrap();
        session
    }

    fn sim(session: &DebugSession<SimTarget>) -> &SimTarget {
        session.swd_if().protocol().link()
    }

    fn stage_of(error: &SwdError) -> Option<ConnectStage> {
        match error {
            SwdError::Connect { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    struct Reg {
        address: u32,
        width: u8,
        access: Access,
    }

    impl TargetRegister for Reg {
        fn address(&self) -> u32 {
            self.address
        }

        fn width(&self) -> u8 {
            self.width
        }

        fn access(&self) -> Access {
            self.access
        }
    }

    #[test]
    fn connect_reaches_ready() {
        let mut session = session(SimTarget::default());
        assert_eq!(session.state(), SessionState::Disconnected);

        let idcode = session.connect().unwrap();
        assert_eq!(idcode.data(), 0x2BA0_1477);
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.idcode(), Some(idcode));
        assert_eq!(session.access_width(), Some(AccessWidth::Bits8));
        assert!(session.read_ctrl_stat().unwrap().powered_up());
    }

    #[test]
    fn operations_need_ready() {
        let mut session = session(SimTarget::default());
        assert_eq!(
            session.read_mem(0x2000_0000, AccessWidth::Bits32),
            Err(SwdError::NotReady)
        );
        assert_eq!(
            session.write_port(PortKind::Dp, 0, 0x8, 0),
            Err(SwdError::NotReady)
        );
        assert_eq!(session.mem_ap_info(), Err(SwdError::NotReady));
    }

    #[test]
    fn no_target_fails_at_idcode() {
        let mut target = SimTarget::default();
        target.set_unresponsive(true);
        let mut session = session(target);

        let err = session.connect().unwrap_err();
        assert_eq!(stage_of(&err), Some(ConnectStage::IdCode));
        assert_eq!(err.root_cause(), &SwdError::NoAck(7));
        assert!(err.requires_reset());

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!sim(&session).is_connected());
        assert_eq!(session.swd_if().select_cache(), None);
    }

    #[test]
    fn implausible_idcode_rejected() {
        let mut session = session(SimTarget::new(0x2BA0_1476));
        let err = session.connect().unwrap_err();
        assert_eq!(stage_of(&err), Some(ConnectStage::IdCode));
        assert_eq!(err.root_cause(), &SwdError::InvalidIdCode(0x2BA0_1476));
        assert_eq!(session.idcode(), None);
    }

    #[test]
    fn power_up_timeout_is_typed() {
        let mut target = SimTarget::default();
        target.set_power_up_after(None);
        let mut session = session(target);

        let err = session.connect().unwrap_err();
        assert_eq!(stage_of(&err), Some(ConnectStage::PowerUp));
        assert_eq!(err.root_cause(), &SwdError::PowerUpTimeout);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.access_width(), None);
    }

    #[test]
    fn link_failure_reported_at_link_stage() {
        let mut target = SimTarget::default();
        target.fail_connect(Some(LinkError::Io("no adapter".into())));
        let mut session = session(target);

        let err = session.connect().unwrap_err();
        assert_eq!(stage_of(&err), Some(ConnectStage::Link));
        assert_eq!(
            err.root_cause(),
            &SwdError::Link(LinkError::Io("no adapter".into()))
        );
    }

    #[test]
    fn disconnect_forgets_state() {
        let mut session = connected();
        session.disconnect().unwrap();

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.idcode(), None);
        assert_eq!(session.access_width(), None);
        assert_eq!(session.swd_if().select_cache(), None);
        assert!(!sim(&session).is_connected());

        // Again, with nothing connected
        session.disconnect().unwrap();
    }

    #[test]
    fn reset_reconnects() {
        let mut session = connected();
        session
            .write_mem(0x2000_0010, 0x1234_5678, AccessWidth::Bits32)
            .unwrap();

        session.reset().unwrap();
        assert!(session.is_ready());
        assert_eq!(
            session.read_mem(0x2000_0010, AccessWidth::Bits32),
            Ok(0x1234_5678)
        );
    }

    #[test]
    fn target_registers_use_descriptor() {
        let mut session = connected();
        let rw = Reg {
            address: 0x4000_0014,
            width: 16,
            access: Access::ReadWrite,
        };
        session.write_target_register(&rw, 0xA5A5).unwrap();
        assert_eq!(session.read_target_register(&rw), Ok(0xA5A5));
        assert_eq!(sim(&session).peek(0x4000_0014), 0x0000_A5A5);

        let ro = Reg {
            access: Access::ReadOnly,
            ..rw
        };
        assert!(matches!(
            session.write_target_register(&ro, 0),
            Err(SwdError::Api(_))
        ));

        let odd = Reg {
            address: 0x4000_0000,
            width: 12,
            access: Access::ReadWrite,
        };
        assert!(matches!(
            session.read_target_register(&odd),
            Err(SwdError::Api(_))
        ));
    }

    #[test]
    fn raw_port_access() {
        let mut session = connected();
        let idr = session.read_port(PortKind::Ap, 0, 0xFC).unwrap();
        assert_eq!(idr, crate::sim::DEFAULT_IDR);
        assert_eq!(
            session.read_port(PortKind::Dp, 0, 0x0).unwrap(),
            0x2BA0_1477
        );
    }

    #[test]
    fn identifies_mem_ap() {
        let mut session = connected();
        let info = session.mem_ap_info().unwrap();
        assert_eq!(info.idr.value(), crate::sim::DEFAULT_IDR);
        assert_eq!(info.base.base_address(), 0xE00F_F000);
    }
}
