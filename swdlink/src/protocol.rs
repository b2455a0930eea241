// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM SWD Wire Protocol Implementation
//!
//! This module implements the SWD wire protocol on top of a [`BitLink`]: the
//! request frame, ACK decoding with bounded WAIT retries, data phase parity,
//! line reset and the JTAG-to-SWD switch sequence.
//!
//! All bits go over the wire least significant bit first.

use std::fmt;
use std::thread;
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::SwdError;
use crate::config::{DEFAULT_WAIT_ATTEMPTS, DEFAULT_WAIT_DELAY, SessionConfig};
use crate::link::BitLink;

// JTAG-to-SWD sequence as documented: 0111100111100111
const JTAG_TO_SWD_DOCUMENTED: u64 = 0b0111_1001_1110_0111; // 0x79E7

/// JTAG-to-SWD sequence, reversed for LSB-first transmission
pub const JTAG_TO_SWD_SEQUENCE: u64 = reverse_bits(JTAG_TO_SWD_DOCUMENTED, 16); // 0xE79E

/// 50+ clock cycles with SWDIO high
pub const LINE_RESET_BITS: usize = 56;

/// 2+ clock cycles with SWDIO low, so the next start bit is not taken as
/// part of the reset
pub const LINE_RESET_LOW_BITS: usize = 3;

// Idle cycles with SWDIO low after the switch sequence
const POST_SWITCH_IDLE_BITS: usize = 8;

// Turnaround + 3 ACK bits
const ACK_PHASE_BITS: usize = 4;

// Turnaround + 32 data bits + parity on writes,
// 32 data bits + parity + turnaround on reads
const DATA_PHASE_BITS: usize = 34;

/// A single SWD transfer request.  The value is the register address; only
/// A[3:2] go over the wire, bank selection for AP registers is done via the
/// DP SELECT register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwdOp {
    DpRead(u8),
    DpWrite(u8),
    ApRead(u8),
    ApWrite(u8),
}

impl SwdOp {
    /// The 8-bit request frame, in transmission order from bit 0.
    #[allow(clippy::wrong_self_convention)]
    pub fn to_cmd(&self) -> u8 {
        // SWD cmd: [start][APnDP][RnW][A2][A3][parity][stop][park]
        let (base, addr) = match self {
            // start=1, APnDP=0, RnW=1, park=1
            SwdOp::DpRead(a) => (0x85, a),
            // start=1, APnDP=0, RnW=0, park=1
            SwdOp::DpWrite(a) => (0x81, a),
            // start=1, APnDP=1, RnW=1, park=1
            SwdOp::ApRead(a) => (0x87, a),
            // start=1, APnDP=1, RnW=0, park=1
            SwdOp::ApWrite(a) => (0x83, a),
        };

        let cmd = base | ((addr & 0x0C) << 1); // A[3:2] to bits 4:3
        Self::add_parity(cmd)
    }

    fn add_parity(cmd: u8) -> u8 {
        // Parity is calculated using APnDP, RnW and A[2:3]
        // This is bits 1, 2, 3 and 4 of our implementation
        let parity_bits = cmd & 0x1E;
        let parity = calculate_parity(parity_bits) as u8;
        cmd | (parity << 5)
    }

    /// Register address
    pub fn addr(&self) -> u8 {
        match self {
            SwdOp::DpRead(a) | SwdOp::DpWrite(a) | SwdOp::ApRead(a) | SwdOp::ApWrite(a) => *a,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, SwdOp::DpRead(_) | SwdOp::ApRead(_))
    }

    pub fn is_ap(&self) -> bool {
        matches!(self, SwdOp::ApRead(_) | SwdOp::ApWrite(_))
    }
}

impl fmt::Display for SwdOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwdOp::DpRead(a) => write!(f, "DP Read 0x{a:02X}"),
            SwdOp::DpWrite(a) => write!(f, "DP Write 0x{a:02X}"),
            SwdOp::ApRead(a) => write!(f, "AP Read 0x{a:02X}"),
            SwdOp::ApWrite(a) => write!(f, "AP Write 0x{a:02X}"),
        }
    }
}

/// Decoded ACK phase of a single request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Ok,
    Wait,
    Fault,
    /// Anything else, usually 0b111 from an undriven line
    Invalid(u8),
}

impl Ack {
    pub const OK: u8 = 0b001;
    pub const WAIT: u8 = 0b010;
    pub const FAULT: u8 = 0b100;

    /// Decode the 3 ACK bits, first received bit in bit 0.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            Self::OK => Ack::Ok,
            Self::WAIT => Ack::Wait,
            Self::FAULT => Ack::Fault,
            other => Ack::Invalid(other),
        }
    }

    /// The 3 ACK bits as driven by a target.
    pub fn bits(&self) -> u8 {
        match self {
            Ack::Ok => Self::OK,
            Ack::Wait => Self::WAIT,
            Ack::Fault => Self::FAULT,
            Ack::Invalid(bits) => *bits & 0b111,
        }
    }

    pub fn into_result(self) -> Result<(), SwdError> {
        match self {
            Ack::Ok => Ok(()),
            Ack::Wait => Err(SwdError::WaitAck),
            Ack::Fault => Err(SwdError::FaultAck),
            Ack::Invalid(bits) => Err(SwdError::NoAck(bits)),
        }
    }
}

/// SWD Protocol object
///
/// This is used by [`crate::SwdInterface`] to communicate with the target.
/// Applications normally use [`crate::DebugSession`] or
/// [`crate::SwdInterface`] instead.
///
/// ```rust
/// use swdlink::SwdProtocol;
/// use swdlink::sim::SimTarget;
///
/// let mut swd = SwdProtocol::new(SimTarget::default());
/// swd.connect().unwrap();
/// swd.line_reset().unwrap();
/// swd.switch_protocol().unwrap();
/// ```
#[derive(Debug)]
pub struct SwdProtocol<L> {
    link: L,
    wait_attempts: u32,
    wait_delay: Duration,
}

impl<L: BitLink> SwdProtocol<L> {
    /// Create a new SWD protocol instance with the default WAIT handling.
    pub fn new(link: L) -> Self {
        Self {
            link,
            wait_attempts: DEFAULT_WAIT_ATTEMPTS,
            wait_delay: DEFAULT_WAIT_DELAY,
        }
    }

    /// Create a new SWD protocol instance using the WAIT handling from
    /// `config`.
    pub fn with_config(link: L, config: &SessionConfig) -> Self {
        let mut protocol = Self::new(link);
        protocol.set_wait_attempts(config.wait_attempts);
        protocol.set_wait_delay(config.wait_delay);
        protocol
    }

    /// Request frames sent for a single operation while the target keeps
    /// answering WAIT.  Values below 1 are treated as 1.
    pub fn set_wait_attempts(&mut self, attempts: u32) {
        self.wait_attempts = attempts.max(1);
    }

    pub fn wait_attempts(&self) -> u32 {
        self.wait_attempts
    }

    pub fn set_wait_delay(&mut self, delay: Duration) {
        self.wait_delay = delay;
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    /// Bring up the underlying link.
    pub fn connect(&mut self) -> Result<(), SwdError> {
        self.link.connect()?;
        debug!("OK:    Link connected");
        Ok(())
    }

    /// Release the underlying link.
    pub fn disconnect(&mut self) -> Result<(), SwdError> {
        self.link.disconnect()?;
        debug!("OK:    Link disconnected");
        Ok(())
    }

    /// Send a request frame and handle its ACK.
    ///
    /// WAIT is retried, after a turnaround and a short delay, until
    /// `wait_attempts` request frames have been sent in total, after which
    /// [`SwdError::WaitAck`] is returned.  FAULT and undecodable ACKs are
    /// returned immediately.
    pub fn send_request(&mut self, op: SwdOp) -> Result<(), SwdError> {
        let cmd = op.to_cmd();
        trace!("Exec:  {op} SWD: {cmd:#04X}");

        let mut attempt = 1;
        loop {
            match self.request_once(cmd)? {
                Ack::Ok => return Ok(()),
                Ack::Wait if attempt < self.wait_attempts => {
                    trace!("Retry: {op} {attempt}");
                    attempt += 1;
                    if !self.wait_delay.is_zero() {
                        thread::sleep(self.wait_delay);
                    }
                }
                ack => {
                    let result = ack.into_result();
                    if let Err(e) = &result {
                        debug!("Error: {op} {e}");
                    }
                    return result;
                }
            }
        }
    }

    // One request frame and ACK phase.  WAIT and FAULT are followed by a
    // turnaround cycle back to the host, an invalid ACK is not, as the
    // target may not be driving the line at all.
    fn request_once(&mut self, cmd: u8) -> Result<Ack, SwdError> {
        self.link.write_bits(cmd as u64, 8)?;
        let bits = self.link.read_bits(ACK_PHASE_BITS)?;
        let ack = Ack::from_bits(((bits >> 1) & 0b111) as u8);

        if matches!(ack, Ack::Wait | Ack::Fault) {
            trace!("Info:  ACK {ack:?} - turnaround");
            self.link.read_bits(1)?;
        }

        Ok(ack)
    }

    /// Write data phase: turnaround, 32 data bits, even parity.
    pub fn send_data(&mut self, value: u32) -> Result<(), SwdError> {
        let parity = calculate_parity(value) as u64;
        let frame = ((value as u64) << 1) | (parity << 33);
        self.link.write_bits(frame, DATA_PHASE_BITS)?;
        trace!("Value: wrote {value:#010X}");
        Ok(())
    }

    /// Read data phase: 32 data bits, parity, turnaround.  Data with bad
    /// parity is never returned.
    pub fn read_data(&mut self) -> Result<u32, SwdError> {
        let bits = self.link.read_bits(DATA_PHASE_BITS)?;
        let data = bits as u32;
        let parity = (bits >> 32) & 1 == 1;

        if calculate_parity(data) != parity {
            debug!("Error: SWD read parity error: data={data:#010X}, parity={parity}");
            return Err(SwdError::ReadParity);
        }

        trace!("Value: read {data:#010X}");
        Ok(data)
    }

    /// Request and data phase of a read.
    pub fn read_transfer(&mut self, op: SwdOp) -> Result<u32, SwdError> {
        self.send_request(op)?;
        self.read_data()
    }

    /// Request and data phase of a write.
    pub fn write_transfer(&mut self, op: SwdOp, value: u32) -> Result<(), SwdError> {
        self.send_request(op)?;
        self.send_data(value)
    }

    /// Line reset: 50+ clock cycles with SWDIO high, then 2+ with SWDIO
    /// low.
    pub fn line_reset(&mut self) -> Result<(), SwdError> {
        trace!("Exec:  Line reset");
        self.link.write_bits(
            (1u64 << LINE_RESET_BITS) - 1,
            LINE_RESET_BITS + LINE_RESET_LOW_BITS,
        )?;
        Ok(())
    }

    /// JTAG-to-SWD switch sequence, followed by a line reset and idle
    /// cycles.
    pub fn switch_protocol(&mut self) -> Result<(), SwdError> {
        trace!("Exec:  JTAG to SWD {JTAG_TO_SWD_SEQUENCE:#06X}");
        self.link.write_bits(JTAG_TO_SWD_SEQUENCE, 16)?;
        self.line_reset()?;
        self.idle(POST_SWITCH_IDLE_BITS)
    }

    /// Clock `cycles` bits with SWDIO low.
    pub fn idle(&mut self, cycles: usize) -> Result<(), SwdError> {
        let mut remaining = cycles;
        while remaining > 0 {
            let count = remaining.min(64);
            self.link.write_bits(0, count)?;
            remaining -= count;
        }
        Ok(())
    }
}

/// Calculate SWD parity - 1 for an odd number of bits set to 1, 0 otherwise.
pub fn calculate_parity<T>(value: T) -> bool
where
    T: Into<u64>,
{
    (value.into().count_ones() % 2) == 1
}

/// Reverse the low `width` bits of `value`, dropping any bits above `width`.
/// Converts between documented MSB-first sequences and LSB-first wire
/// order.  Widths above 64 are treated as 64.
pub const fn reverse_bits(value: u64, width: u32) -> u64 {
    let width = if width > 64 { 64 } else { width };
    if width == 0 {
        0
    } else {
        value.reverse_bits() >> (64 - width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkError;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use test_case::test_case;

    // Records writes and replays scripted reads.  Reads past the end of the
    // script return all ones, as an undriven, pulled-up SWDIO would.
    #[derive(Default)]
    struct ScriptLink {
        writes: Vec<(u64, usize)>,
        reads: VecDeque<u64>,
    }

    impl ScriptLink {
        fn frames(&self) -> Vec<u8> {
            self.writes
                .iter()
                .filter(|(_, count)| *count == 8)
                .map(|(bits, _)| *bits as u8)
                .collect()
        }
    }

    impl BitLink for ScriptLink {
        fn connect(&mut self) -> Result<(), LinkError> {
            Ok(())
        }

        fn disconnect(&mut self) -> Result<(), LinkError> {
            Ok(())
        }

        fn write_bits(&mut self, bits: u64, count: usize) -> Result<(), LinkError> {
            self.writes.push((bits, count));
            Ok(())
        }

        fn read_bits(&mut self, count: usize) -> Result<u64, LinkError> {
            let mask = if count == 64 { u64::MAX } else { (1 << count) - 1 };
            Ok(self.reads.pop_front().unwrap_or(u64::MAX) & mask)
        }
    }

    // Turnaround bit (undriven, high) followed by the ACK
    fn ack_phase(ack: Ack) -> u64 {
        1 | ((ack.bits() as u64) << 1)
    }

    fn read_phase(value: u32) -> u64 {
        value as u64 | ((calculate_parity(value) as u64) << 32) | (1 << 33)
    }

    fn protocol(reads: &[u64]) -> SwdProtocol<ScriptLink> {
        let link = ScriptLink {
            writes: Vec::new(),
            reads: reads.iter().copied().collect(),
        };
        let mut swd = SwdProtocol::new(link);
        swd.set_wait_delay(Duration::ZERO);
        swd
    }

    #[test_case(SwdOp::DpRead(0x0), 0xA5; "read idcode")]
    #[test_case(SwdOp::DpWrite(0x0), 0x81; "write abort")]
    #[test_case(SwdOp::DpRead(0x4), 0x8D; "read ctrl stat")]
    #[test_case(SwdOp::DpWrite(0x4), 0xA9; "write ctrl stat")]
    #[test_case(SwdOp::DpWrite(0x8), 0xB1; "write select")]
    #[test_case(SwdOp::DpRead(0xC), 0xBD; "read rdbuff")]
    #[test_case(SwdOp::ApWrite(0x0), 0xA3; "write csw")]
    #[test_case(SwdOp::ApWrite(0x4), 0x8B; "write tar")]
    #[test_case(SwdOp::ApRead(0xC), 0x9F; "read drw")]
    #[test_case(SwdOp::ApWrite(0xC), 0xBB; "write drw")]
    fn request_frames(op: SwdOp, expected: u8) {
        let cmd = op.to_cmd();
        assert_eq!(cmd, expected);
        assert_eq!(cmd & 1, 1, "start");
        assert_eq!(cmd >> 6 & 1, 0, "stop");
        assert_eq!(cmd >> 7, 1, "park");
        assert!(!calculate_parity(cmd & 0x3E), "parity over APnDP..parity");
    }

    #[test_case(0, false)]
    #[test_case(1, true)]
    #[test_case(0x8000_0000, true)]
    #[test_case(0xFFFF_FFFF, false)]
    #[test_case(0x7FFF_FFFF, true)]
    #[test_case(0x2BA0_1477, false; "even count idcode")]
    #[test_case(0x0000_0007, true; "odd count")]
    fn parity_boundaries(value: u32, parity: bool) {
        assert_eq!(calculate_parity(value), parity);
    }

    #[test]
    fn data_phase_round_trip() {
        let mut rng = fastrand::Rng::with_seed(0x5eed_0001);
        let mut values = vec![0, 1, 0x8000_0000, 0xFFFF_FFFF, 0x7FFF_FFFF];
        values.extend((0..64).map(|_| rng.u32(..)));

        for value in values {
            let mut swd = protocol(&[]);
            swd.send_data(value).unwrap();

            // Drop the leading turnaround, and present the data and parity
            // back as the target would, with a trailing turnaround
            let (bits, count) = swd.link().writes[0];
            assert_eq!(count, 34);
            assert_eq!(bits & 1, 0);
            let echoed = (bits >> 1) | (1 << 33);
            swd.link_mut().reads.push_back(echoed);

            assert_eq!(swd.read_data().unwrap(), value);
        }
    }

    #[test]
    fn read_rejects_bad_parity() {
        let value = 0x1234_5678;
        let corrupted = read_phase(value) ^ (1 << 32);
        let mut swd = protocol(&[corrupted]);
        assert_eq!(swd.read_data(), Err(SwdError::ReadParity));

        let flipped = read_phase(value) ^ (1 << 7);
        let mut swd = protocol(&[flipped]);
        assert_eq!(swd.read_data(), Err(SwdError::ReadParity));
    }

    #[test_case(4)]
    #[test_case(5)]
    #[test_case(8)]
    #[test_case(32)]
    #[test_case(34)]
    fn reverse_bits_is_involutive(width: u32) {
        let mut rng = fastrand::Rng::with_seed(0x5eed_0002 + width as u64);
        let mask = (1u64 << width) - 1;
        for _ in 0..64 {
            let value = rng.u64(..) & mask;
            assert_eq!(reverse_bits(reverse_bits(value, width), width), value);
        }
        assert_eq!(reverse_bits(1, width), 1 << (width - 1));
    }

    #[test_case(64)]
    #[test_case(65)]
    #[test_case(u32::MAX)]
    fn reverse_bits_wide(width: u32) {
        assert_eq!(reverse_bits(1, width), 1 << 63);
        assert_eq!(reverse_bits(0x8000_0000_0000_0000, width), 1);
    }

    #[test]
    fn jtag_to_swd_wire_order() {
        assert_eq!(JTAG_TO_SWD_SEQUENCE, 0xE79E);
        assert_eq!(reverse_bits(0b0001, 4), 0b1000);
        assert_eq!(reverse_bits(0b0_0011, 5), 0b1_1000);
    }

    #[test]
    fn switch_protocol_sequence() {
        let mut swd = protocol(&[]);
        swd.line_reset().unwrap();
        swd.switch_protocol().unwrap();

        // 56 ones then 3 zeros for each line reset
        let reset = (1u64 << 56) - 1;
        assert_eq!(
            swd.link().writes,
            vec![(reset, 59), (0xE79E, 16), (reset, 59), (0, 8)]
        );
    }

    #[test]
    fn line_reset_ends_low() {
        let mut swd = protocol(&[]);
        swd.line_reset().unwrap();
        let (bits, count) = swd.link().writes[0];
        assert_eq!(count, LINE_RESET_BITS + LINE_RESET_LOW_BITS);
        assert_eq!(bits.trailing_ones() as usize, LINE_RESET_BITS);
        assert_eq!(bits >> LINE_RESET_BITS, 0);
    }

    #[test_case(0, true; "no waits")]
    #[test_case(1, true; "one wait")]
    #[test_case(2, true; "bound minus one")]
    #[test_case(3, false; "bound")]
    #[test_case(5, false; "beyond bound")]
    fn wait_retry_bound(waits: usize, succeeds: bool) {
        let mut reads = Vec::new();
        for _ in 0..waits {
            reads.push(ack_phase(Ack::Wait));
            reads.push(1); // turnaround
        }
        reads.push(ack_phase(Ack::Ok));
        reads.push(read_phase(0xCAFE_F00D));

        let mut swd = protocol(&reads);
        assert_eq!(swd.wait_attempts(), 3);
        let result = swd.read_transfer(SwdOp::DpRead(0x4));

        let frames = swd.link().frames();
        assert!(frames.len() <= 3);
        if succeeds {
            assert_eq!(result, Ok(0xCAFE_F00D));
            assert_eq!(frames.len(), waits + 1);
        } else {
            assert_eq!(result, Err(SwdError::WaitAck));
            assert_eq!(frames.len(), 3);
        }
        assert!(frames.iter().all(|&f| f == 0x8D));
    }

    #[test]
    fn fault_is_not_retried() {
        let mut swd = protocol(&[ack_phase(Ack::Fault), 1, ack_phase(Ack::Ok)]);
        assert_eq!(swd.send_request(SwdOp::ApRead(0xC)), Err(SwdError::FaultAck));
        assert_eq!(swd.link().frames().len(), 1);
        // Request, ACK phase read, turnaround read
        assert_eq!(swd.link().reads.len(), 1);
    }

    #[test]
    fn undriven_line_is_no_ack() {
        let mut swd = protocol(&[]);
        assert_eq!(swd.send_request(SwdOp::DpRead(0)), Err(SwdError::NoAck(7)));
        assert_eq!(swd.link().frames().len(), 1);
    }

    #[test]
    fn ack_decoding() {
        assert_eq!(Ack::from_bits(0b001), Ack::Ok);
        assert_eq!(Ack::from_bits(0b010), Ack::Wait);
        assert_eq!(Ack::from_bits(0b100), Ack::Fault);
        assert_eq!(Ack::from_bits(0b011), Ack::Invalid(0b011));
        assert_eq!(Ack::from_bits(0b000), Ack::Invalid(0));
    }

    #[test]
    fn write_transfer_bits() {
        let mut swd = protocol(&[ack_phase(Ack::Ok)]);
        swd.write_transfer(SwdOp::DpWrite(0x8), 0x0000_00F0).unwrap();
        // 0xF0 has even parity
        assert_eq!(swd.link().writes, vec![(0xB1, 8), (0xF0 << 1, 34)]);
    }
}
