// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM SWD Interface
//!
//! This module implements Debug Port and Access Port register access on top
//! of [`SwdProtocol`].  It provides the `SwdInterface` struct, which owns the
//! DP SELECT cache so that AP bank selection is only written when it
//! changes.
//!
//! AP reads on a SW-DP are posted: the data returned by an AP read request
//! belongs to the previous AP read.  `SwdInterface` hides this by following
//! each AP read with a DP RDBUFF read.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::SwdError;
use crate::link::BitLink;
use crate::protocol::{SwdOp, SwdProtocol};
use swdlink_core::arm::dp::{
    Abort, AbortRegister, CtrlStat, CtrlStatRegister, DP_REGISTERS, IdCode, IdCodeRegister,
    RdBuffRegister, Select, SelectRegister,
};
use swdlink_core::arm::register::{
    ApRegister, DpRegister, ReadableRegister, RegisterDescriptor, RegisterInfo, WritableRegister,
    lookup,
};

/// Which port a raw register access targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortKind {
    Dp,
    Ap,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKind::Dp => write!(f, "DP"),
            PortKind::Ap => write!(f, "AP"),
        }
    }
}

/// SWD Interface object
///
/// Provides typed and raw DP and AP register access.  Create using
/// `SwdInterface::new()` from a [`SwdProtocol`], or
/// `SwdInterface::from_link()` from a [`BitLink`].
///
/// The DP SELECT cache starts out invalid, and is invalidated again by any
/// line reset or failed SELECT write, so the first AP access afterwards
/// always writes SELECT.
#[derive(Debug)]
pub struct SwdInterface<L> {
    protocol: SwdProtocol<L>,
    select: Option<Select>,
    dp_layout: [RegisterInfo; DP_REGISTERS.len()],
    idcode: Option<IdCode>,
}

impl<L: BitLink> SwdInterface<L> {
    pub fn new(protocol: SwdProtocol<L>) -> Self {
        Self {
            protocol,
            select: None,
            dp_layout: DP_REGISTERS,
            idcode: None,
        }
    }

    /// Create a new SWD interface directly from a link, with default
    /// protocol settings.
    pub fn from_link(link: L) -> Self {
        Self::new(SwdProtocol::new(link))
    }

    pub fn protocol(&self) -> &SwdProtocol<L> {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut SwdProtocol<L> {
        &mut self.protocol
    }

    pub fn into_link(self) -> L {
        self.protocol.into_link()
    }

    /// The SELECT value last successfully written, if still trusted.
    pub fn select_cache(&self) -> Option<Select> {
        self.select
    }

    /// Forget the cached SELECT value.  Call after anything outside this
    /// interface may have reset the DP, such as a target reset.
    pub fn invalidate_select_cache(&mut self) {
        if self.select.take().is_some() {
            trace!("Info:  SELECT cache invalidated");
        }
    }

    /// Forget everything learned about the target.
    pub fn reset_internal_state(&mut self) {
        self.invalidate_select_cache();
        self.idcode = None;
    }

    /// The IDCODE read by the last [`SwdInterface::read_idcode()`].
    pub fn idcode(&self) -> Option<IdCode> {
        self.idcode
    }

    /// Line reset.  The DP's SELECT is not trusted afterwards.
    pub fn line_reset(&mut self) -> Result<(), SwdError> {
        self.invalidate_select_cache();
        self.protocol.line_reset()
    }

    /// Send the JTAG-to-SWD sequence (which ends with a line reset).
    pub fn switch_protocol(&mut self) -> Result<(), SwdError> {
        self.invalidate_select_cache();
        self.protocol.switch_protocol()
    }

    /// Line reset, switch to SWD and read IDCODE, which is what a SW-DP
    /// requires before it will accept any other request.
    pub fn sync(&mut self) -> Result<IdCode, SwdError> {
        self.line_reset()?;
        self.switch_protocol()?;
        self.read_idcode()
    }

    /// Read the DP IDCODE register.
    pub fn read_idcode(&mut self) -> Result<IdCode, SwdError> {
        let idcode = self.read_dp_register(IdCodeRegister)?;
        trace!("Value: IDCODE {idcode:#}");
        self.idcode = Some(idcode);
        Ok(idcode)
    }

    /// Write a Debug Port register
    ///
    /// Arguments:
    /// - `reg`: The register to write, which must implement the `DpRegister`
    ///   and `WritableRegister` traits.
    /// - `value`: The value to write to the register, which must match the
    ///   register's value type.
    ///
    /// ```rust,ignore
    /// let mut abort = Abort::default();
    /// abort.set_stkerrclr(true);
    /// swd.write_dp_register(AbortRegister, abort)?;
    /// ```
    pub fn write_dp_register<R>(&mut self, _reg: R, value: R::Value) -> Result<(), SwdError>
    where
        R: DpRegister + WritableRegister,
        R::Value: Into<u32>,
    {
        self.write_dp(R::ADDRESS, R::to_raw(value))
    }

    /// Read a Debug Port register
    pub fn read_dp_register<R>(&mut self, _reg: R) -> Result<R::Value, SwdError>
    where
        R: DpRegister + ReadableRegister,
        R::Value: From<u32>,
    {
        self.read_dp(R::ADDRESS).map(R::from_raw)
    }

    /// Write an Access Port register on AP `ap_index`.  SELECT is updated
    /// first if required.
    pub fn write_ap_register<R>(
        &mut self,
        ap_index: u8,
        _reg: R,
        value: R::Value,
    ) -> Result<(), SwdError>
    where
        R: ApRegister + WritableRegister,
        R::Value: Into<u32>,
    {
        self.write_ap(ap_index, R::ADDRESS, R::to_raw(value))
    }

    /// Read an Access Port register on AP `ap_index`.  SELECT is updated
    /// first if required.
    pub fn read_ap_register<R>(&mut self, ap_index: u8, _reg: R) -> Result<R::Value, SwdError>
    where
        R: ApRegister + ReadableRegister,
        R::Value: From<u32>,
    {
        self.read_ap(ap_index, R::ADDRESS).map(R::from_raw)
    }

    /// Read a Debug Port register by raw address (0x0, 0x4, 0x8, 0xC).
    pub fn read_dp(&mut self, addr: u8) -> Result<u32, SwdError> {
        self.check_dp_access(addr, false)?;
        self.read_op(SwdOp::DpRead(addr))
    }

    /// Write a Debug Port register by raw address.  A write to SELECT
    /// updates the SELECT cache.
    pub fn write_dp(&mut self, addr: u8, value: u32) -> Result<(), SwdError> {
        self.check_dp_access(addr, true)?;
        let result = self.write_op(SwdOp::DpWrite(addr), value);

        if addr == SelectRegister::ADDRESS {
            self.select = match &result {
                Ok(()) => Some(Select::from(value)),
                Err(_) => None,
            };
        }

        result
    }

    /// Read an Access Port register by raw address.
    pub fn read_ap(&mut self, ap_index: u8, addr: u8) -> Result<u32, SwdError> {
        Self::check_ap_addr(addr)?;
        self.select_ap_bank(ap_index, addr)?;

        // The AP read returns the previous AP read's data.  This one's
        // arrives via RDBUFF, which needs no SELECT.
        let _posted = self.read_op(SwdOp::ApRead(addr))?;
        let data = self.read_op(SwdOp::DpRead(RdBuffRegister::ADDRESS))?;
        trace!("Value: AP{ap_index} 0x{addr:02X} {data:#010X}");
        Ok(data)
    }

    /// Write an Access Port register by raw address.
    pub fn write_ap(&mut self, ap_index: u8, addr: u8, value: u32) -> Result<(), SwdError> {
        Self::check_ap_addr(addr)?;
        self.select_ap_bank(ap_index, addr)?;
        self.write_op(SwdOp::ApWrite(addr), value)
    }

    /// Read a DP or AP register by raw address.  `ap_index` is ignored for
    /// the DP.
    pub fn read_port(&mut self, kind: PortKind, ap_index: u8, addr: u8) -> Result<u32, SwdError> {
        match kind {
            PortKind::Dp => self.read_dp(addr),
            PortKind::Ap => self.read_ap(ap_index, addr),
        }
    }

    /// Write a DP or AP register by raw address.  `ap_index` is ignored for
    /// the DP.
    pub fn write_port(
        &mut self,
        kind: PortKind,
        ap_index: u8,
        addr: u8,
        value: u32,
    ) -> Result<(), SwdError> {
        match kind {
            PortKind::Dp => self.write_dp(addr, value),
            PortKind::Ap => self.write_ap(ap_index, addr, value),
        }
    }

    /// Reads the same AP register `buf.len()` times in succession, pipelining
    /// the posted reads.  Used with MEM-AP DRW and CSW auto-increment.
    ///
    /// On error, the contents of `buf` are undefined.
    pub fn read_ap_repeated(
        &mut self,
        ap_index: u8,
        addr: u8,
        buf: &mut [u32],
    ) -> Result<(), SwdError> {
        let Some((last, rest)) = buf.split_last_mut() else {
            return Ok(());
        };

        let count = rest.len() + 1;
        trace!("Exec:  AP{ap_index} 0x{addr:02X} read x{count}");

        Self::check_ap_addr(addr)?;
        self.select_ap_bank(ap_index, addr)?;

        // Read the first (to be discarded) value
        let _posted = self.read_op(SwdOp::ApRead(addr))?;
        for item in rest.iter_mut() {
            *item = self.read_op(SwdOp::ApRead(addr))?;
        }
        *last = self.read_op(SwdOp::DpRead(RdBuffRegister::ADDRESS))?;

        trace!("OK:    AP{ap_index} 0x{addr:02X} read x{count}");
        Ok(())
    }

    /// Writes each value in `data` to the same AP register in succession.
    pub fn write_ap_repeated(
        &mut self,
        ap_index: u8,
        addr: u8,
        data: &[u32],
    ) -> Result<(), SwdError> {
        if data.is_empty() {
            return Ok(());
        }

        trace!("Exec:  AP{ap_index} 0x{addr:02X} write x{}", data.len());
        Self::check_ap_addr(addr)?;
        self.select_ap_bank(ap_index, addr)?;

        for &value in data {
            self.write_op(SwdOp::ApWrite(addr), value)?;
        }

        Ok(())
    }

    /// Write DP SELECT, updating the cache on success.
    pub fn write_select(&mut self, select: Select) -> Result<(), SwdError> {
        self.write_dp_register(SelectRegister, select)
    }

    /// Write DP ABORT.
    pub fn abort(&mut self, abort: Abort) -> Result<(), SwdError> {
        self.write_dp_register(AbortRegister, abort)
    }

    /// Call to clear any errors on the Debug Port.
    ///
    /// This function writes 0x1F to the ABORT register: aborts any AP
    /// transaction in progress and clears STKERR, STKCMP, WDERR and ORUNERR.
    pub fn clear_errors(&mut self) -> Result<(), SwdError> {
        trace!("Exec:  Clear errors");
        self.abort(Abort::all())?;
        trace!("OK:    Clear errors");
        Ok(())
    }

    pub fn read_ctrl_stat(&mut self) -> Result<CtrlStat, SwdError> {
        self.read_dp_register(CtrlStatRegister)
    }

    /// Enable all byte lanes for pushed operations and select normal
    /// transaction mode.
    pub fn configure_ctrl_stat(&mut self) -> Result<(), SwdError> {
        self.write_dp_register(CtrlStatRegister, Self::base_ctrl_stat())
    }

    /// Powers up the target's debug and system domains.
    ///
    /// Writes SELECT to 0, requests debug and system power-up, and polls
    /// CTRL/STAT until both are acknowledged or `timeout` elapses.
    ///
    /// Returns:
    /// - `Ok(())`: if both domains acknowledged power-up.
    /// - `Err(SwdError::PowerUpTimeout)`: if they did not within `timeout`.
    /// - `Err(SwdError)`: on any protocol error along the way.
    pub fn power_up_debug_domain(
        &mut self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<(), SwdError> {
        // Set default DP SELECT
        self.write_select(Select::default())?;

        // Power up debug and system domains
        let mut ctrl_stat = Self::base_ctrl_stat();
        ctrl_stat.set_cdbgpwrupreq(true);
        ctrl_stat.set_csyspwrupreq(true);
        self.write_dp_register(CtrlStatRegister, ctrl_stat)?;

        let start = Instant::now();
        loop {
            let status = self.read_ctrl_stat()?;
            if status.powered_up() {
                debug!("OK:    Debug domain powered up {}", status.power_states());
                return Ok(());
            }

            if start.elapsed() >= timeout {
                debug!(
                    "Error: Power-up not acknowledged after {timeout:?}: {}",
                    status.power_states()
                );
                return Err(SwdError::PowerUpTimeout);
            }

            trace!("Info:  Waiting for power-up {}", status.power_states());
            thread::sleep(poll_interval);
        }
    }
}

// Internal functions
impl<L: BitLink> SwdInterface<L> {
    fn base_ctrl_stat() -> CtrlStat {
        let mut ctrl_stat = CtrlStat::default();
        ctrl_stat.set_masklane(0xF);
        ctrl_stat.set_trnmode(CtrlStat::TRNMODE_NORMAL);
        ctrl_stat
    }

    fn check_dp_access(&self, addr: u8, write: bool) -> Result<(), SwdError> {
        match lookup(&self.dp_layout, addr, write) {
            Some(_) => Ok(()),
            None => {
                let dir = if write { "write" } else { "read" };
                Err(SwdError::Api(format!("no DP register to {dir} at 0x{addr:02X}")))
            }
        }
    }

    fn check_ap_addr(addr: u8) -> Result<(), SwdError> {
        if addr & 0x3 != 0 {
            return Err(SwdError::Api(format!("unaligned AP register 0x{addr:02X}")));
        }
        Ok(())
    }

    // Ensure SELECT addresses the bank holding `addr` on AP `ap_index`.
    fn select_ap_bank(&mut self, ap_index: u8, addr: u8) -> Result<(), SwdError> {
        let mut wanted = Select::for_ap(ap_index, addr);

        if let Some(current) = self.select {
            if current.apsel() == wanted.apsel() && current.apbanksel() == wanted.apbanksel() {
                return Ok(());
            }
            wanted.set_dpbanksel(current.dpbanksel() as u8);
        }

        trace!("Info:  SELECT {}", wanted.selection_info());
        self.write_select(wanted)
    }

    fn read_op(&mut self, op: SwdOp) -> Result<u32, SwdError> {
        let result = self.protocol.read_transfer(op);
        self.check_fault(op, result)
    }

    fn write_op(&mut self, op: SwdOp, value: u32) -> Result<(), SwdError> {
        let result = self.protocol.write_transfer(op, value);
        self.check_fault(op, result)
    }

    // A FAULT sets STICKYERR, and the DP faults every AP access until it is
    // cleared, so clear it now and let the caller see the original fault.
    fn check_fault<T>(&mut self, op: SwdOp, result: Result<T, SwdError>) -> Result<T, SwdError> {
        if matches!(result, Err(SwdError::FaultAck)) {
            debug!("Note:  {op} FAULT, clearing sticky error");
            let abort = AbortRegister::to_raw(Abort::stkerrclr());
            if let Err(e) = self
                .protocol
                .write_transfer(SwdOp::DpWrite(AbortRegister::ADDRESS), abort)
            {
                warn!("Failed to clear sticky error after FAULT: {e}");
            }
        }
        result
    }
}
