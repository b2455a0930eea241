// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! MEM-AP memory access.
//!
//! Memory on the target's bus is reached through a MEM-AP: CSW sets the
//! transfer size and address increment, TAR holds the address, and DRW
//! transfers the data.  Sub-word data travels in its byte lane of DRW, so
//! an 8-bit write to `...3` goes out as `data << 24`.

use serde::{Deserialize, Serialize};
use std::fmt;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::SwdError;
use crate::interface::SwdInterface;
use crate::link::BitLink;
use swdlink_core::arm::ap::{Idr, IdrRegister};
use swdlink_core::arm::map::{
    Base, BaseRegister, Cfg, CfgRegister, Csw, CswRegister, DrwRegister, Tar, TarRegister,
};
use swdlink_core::arm::register::RegisterDescriptor;

// TAR auto-increment is only guaranteed within a 1KB block
const SWD_MEMORY_BOUNDARY: u32 = 0x400;

/// Width of a single memory transfer
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum AccessWidth {
    Bits8,
    Bits16,
    Bits32,
}

impl AccessWidth {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            8 => Some(AccessWidth::Bits8),
            16 => Some(AccessWidth::Bits16),
            32 => Some(AccessWidth::Bits32),
            _ => None,
        }
    }

    pub fn bits(&self) -> u32 {
        match self {
            AccessWidth::Bits8 => 8,
            AccessWidth::Bits16 => 16,
            AccessWidth::Bits32 => 32,
        }
    }

    pub fn bytes(&self) -> u32 {
        self.bits() / 8
    }

    /// CSW.SIZE encoding
    pub fn csw_size(&self) -> u32 {
        match self {
            AccessWidth::Bits8 => Csw::SIZE_8BIT,
            AccessWidth::Bits16 => Csw::SIZE_16BIT,
            AccessWidth::Bits32 => Csw::SIZE_32BIT,
        }
    }

    pub fn mask(&self) -> u32 {
        match self {
            AccessWidth::Bits8 => 0xFF,
            AccessWidth::Bits16 => 0xFFFF,
            AccessWidth::Bits32 => 0xFFFF_FFFF,
        }
    }

    /// Bit offset of `addr`'s byte lane within DRW
    pub fn lane_shift(&self, addr: u32) -> u32 {
        match self {
            AccessWidth::Bits8 => (addr & 3) * 8,
            AccessWidth::Bits16 => (addr & 2) * 8,
            AccessWidth::Bits32 => 0,
        }
    }

    /// Place `value` in the DRW byte lane for `addr`, discarding any bits
    /// wider than the access.
    pub fn to_lane(&self, addr: u32, value: u32) -> u32 {
        (value & self.mask()) << self.lane_shift(addr)
    }

    /// Extract the value for `addr` from a DRW word.
    pub fn from_lane(&self, addr: u32, word: u32) -> u32 {
        (word >> self.lane_shift(addr)) & self.mask()
    }

    pub fn is_aligned(&self, addr: u32) -> bool {
        addr & (self.bytes() - 1) == 0
    }

    fn check_aligned(&self, addr: u32) -> Result<(), SwdError> {
        if self.is_aligned(addr) {
            Ok(())
        } else {
            Err(SwdError::Api(format!(
                "{self} access at unaligned address {addr:#010X}"
            )))
        }
    }
}

impl TryFrom<u8> for AccessWidth {
    type Error = SwdError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        Self::from_bits(bits).ok_or_else(|| SwdError::Api(format!("invalid access width {bits}")))
    }
}

impl fmt::Display for AccessWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Identification of a MEM-AP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemApInfo {
    pub idr: Idr,
    pub base: Base,
    pub cfg: Cfg,
}

impl fmt::Display for MemApInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IDR {} BASE {} CFG {}", self.idr, self.base, self.cfg)
    }
}

/// Memory access engine for one MEM-AP.
///
/// Holds the AP index and the narrowest transfer size the MEM-AP supports,
/// once negotiated.  Register access goes through the [`SwdInterface`]
/// passed to each call.
#[derive(Debug, Clone)]
pub struct MemAp {
    ap_index: u8,
    width: Option<AccessWidth>,
}

impl MemAp {
    pub const fn new(ap_index: u8) -> Self {
        Self {
            ap_index,
            width: None,
        }
    }

    pub fn ap_index(&self) -> u8 {
        self.ap_index
    }

    /// The narrowest transfer the MEM-AP supports, if negotiated.
    pub fn width(&self) -> Option<AccessWidth> {
        self.width
    }

    /// Forget the negotiated width.
    pub fn invalidate(&mut self) {
        self.width = None;
    }

    /// Find the narrowest transfer size the MEM-AP supports, by writing
    /// CSW.SIZE and checking whether it reads back unchanged.  MEM-APs that
    /// don't support sub-word transfers ignore the write.
    pub fn negotiate_width<L: BitLink>(
        &mut self,
        swd: &mut SwdInterface<L>,
    ) -> Result<AccessWidth, SwdError> {
        let mut negotiated = AccessWidth::Bits32;

        for width in [AccessWidth::Bits8, AccessWidth::Bits16] {
            let csw = Csw::with_size(width.csw_size(), Csw::ADDRINC_OFF);
            swd.write_ap_register(self.ap_index, CswRegister, csw)?;
            let readback = swd.read_ap_register(self.ap_index, CswRegister)?;
            trace!("Value: CSW readback {readback} for {width}");

            if readback.size() == width.csw_size() {
                negotiated = width;
                break;
            }
        }

        debug!("OK:    MEM-AP {} supports {negotiated} transfers", self.ap_index);
        self.width = Some(negotiated);
        Ok(negotiated)
    }

    /// Read `width` bits from `addr`.
    ///
    /// If `width` is narrower than the MEM-AP supports, the containing word
    /// is read and the lane extracted.
    pub fn read<L: BitLink>(
        &self,
        swd: &mut SwdInterface<L>,
        addr: u32,
        width: AccessWidth,
    ) -> Result<u32, SwdError> {
        width.check_aligned(addr)?;

        let transfer = match self.width {
            Some(narrowest) if width < narrowest => AccessWidth::Bits32,
            _ => width,
        };
        let tar = if transfer == width { addr } else { addr & !3 };

        trace!("Exec:  Read {width} {addr:#010X}");
        self.setup(swd, transfer, tar)?;
        let drw = swd.read_ap_register(self.ap_index, DrwRegister)?;
        let value = width.from_lane(addr, drw.value());
        trace!("OK:    Read {width} {addr:#010X} {value:#X}");

        Ok(value)
    }

    /// Write the low `width` bits of `value` to `addr`.
    pub fn write<L: BitLink>(
        &self,
        swd: &mut SwdInterface<L>,
        addr: u32,
        value: u32,
        width: AccessWidth,
    ) -> Result<(), SwdError> {
        width.check_aligned(addr)?;

        if let Some(narrowest) = self.width {
            if width < narrowest {
                return Err(SwdError::Unsupported(format!(
                    "MEM-AP {} does not support {width} writes",
                    self.ap_index
                )));
            }
        }

        trace!("Exec:  Write {width} {addr:#010X} {value:#X}");
        self.setup(swd, width, addr)?;
        let drw = width.to_lane(addr, value);
        swd.write_ap_register(self.ap_index, DrwRegister, drw.into())?;
        trace!("OK:    Write {width} {addr:#010X}");

        Ok(())
    }

    /// Reads a block of 32-bit words starting at `addr`.
    ///
    /// Is aware of TAR auto-increment wrapping and handles it (at the 1KB
    /// boundary).
    pub fn read_block<L: BitLink>(
        &self,
        swd: &mut SwdInterface<L>,
        addr: u32,
        buf: &mut [u32],
    ) -> Result<(), SwdError> {
        Self::check_block(addr, buf.len())?;
        if buf.is_empty() {
            return Ok(());
        }

        self.set_csw(swd, AccessWidth::Bits32, Csw::ADDRINC_SINGLE)?;

        let mut remaining = buf;
        let mut current_addr = addr;
        while !remaining.is_empty() {
            let chunk_size = remaining.len().min(Self::words_to_boundary(current_addr));

            swd.write_ap_register(self.ap_index, TarRegister, Tar::new(current_addr))?;

            let (chunk, rest) = remaining.split_at_mut(chunk_size);
            swd.read_ap_repeated(self.ap_index, DrwRegister::ADDRESS, chunk)?;

            remaining = rest;
            current_addr = current_addr.wrapping_add((chunk_size * 4) as u32);
        }

        Ok(())
    }

    /// Writes a block of 32-bit words starting at `addr`.
    ///
    /// Is aware of TAR auto-increment wrapping and handles it (at the 1KB
    /// boundary).
    pub fn write_block<L: BitLink>(
        &self,
        swd: &mut SwdInterface<L>,
        addr: u32,
        data: &[u32],
    ) -> Result<(), SwdError> {
        Self::check_block(addr, data.len())?;
        if data.is_empty() {
            return Ok(());
        }

        self.set_csw(swd, AccessWidth::Bits32, Csw::ADDRINC_SINGLE)?;

        let mut remaining = data;
        let mut current_addr = addr;
        while !remaining.is_empty() {
            let chunk_size = remaining.len().min(Self::words_to_boundary(current_addr));

            swd.write_ap_register(self.ap_index, TarRegister, Tar::new(current_addr))?;

            let (chunk, rest) = remaining.split_at(chunk_size);
            swd.write_ap_repeated(self.ap_index, DrwRegister::ADDRESS, chunk)?;

            remaining = rest;
            current_addr = current_addr.wrapping_add((chunk_size * 4) as u32);
        }

        Ok(())
    }

    /// Reads IDR, BASE and CFG, checking that this AP is a MEM-AP.
    pub fn identify<L: BitLink>(&self, swd: &mut SwdInterface<L>) -> Result<MemApInfo, SwdError> {
        let idr = swd.read_ap_register(self.ap_index, IdrRegister)?;
        if !idr.present() {
            return Err(SwdError::Unsupported(format!(
                "no AP at index {}",
                self.ap_index
            )));
        }
        if !idr.is_mem_ap() {
            return Err(SwdError::Unsupported(format!(
                "AP {} is not a MEM-AP: {}",
                self.ap_index,
                idr.idr_info()
            )));
        }
        if idr.is_known() {
            trace!("Value: MEM-AP IDR {idr} is a known AHB-AP");
        } else {
            // We do not error if we don't recognise a MEM-AP, instead we log
            warn!("Unknown MEM-AP IDR {idr}");
        }

        let base = swd.read_ap_register(self.ap_index, BaseRegister)?;
        let cfg = swd.read_ap_register(self.ap_index, CfgRegister)?;

        let info = MemApInfo { idr, base, cfg };
        debug!("OK:    MEM-AP {} {info}", self.ap_index);
        Ok(info)
    }
}

// Internal functions
impl MemAp {
    fn setup<L: BitLink>(
        &self,
        swd: &mut SwdInterface<L>,
        width: AccessWidth,
        addr: u32,
    ) -> Result<(), SwdError> {
        self.set_csw(swd, width, Csw::ADDRINC_OFF)?;
        swd.write_ap_register(self.ap_index, TarRegister, Tar::new(addr))
    }

    fn set_csw<L: BitLink>(
        &self,
        swd: &mut SwdInterface<L>,
        width: AccessWidth,
        addrinc: u32,
    ) -> Result<(), SwdError> {
        let csw = Csw::with_size(width.csw_size(), addrinc);
        swd.write_ap_register(self.ap_index, CswRegister, csw)
    }

    fn check_block(addr: u32, words: usize) -> Result<(), SwdError> {
        if addr & 0x3 != 0 {
            info!("Error: Attempt to access block on non-4 byte boundary");
            return Err(SwdError::Api(format!(
                "block address {addr:#010X} not word aligned"
            )));
        }
        if (words as u64) * 4 > (u32::MAX as u64) - (addr as u64) + 1 {
            return Err(SwdError::Api(format!(
                "{words} words at {addr:#010X} exceeds the address space"
            )));
        }
        Ok(())
    }

    // Words before the next 1KB boundary
    fn words_to_boundary(addr: u32) -> usize {
        let boundary_offset = SWD_MEMORY_BOUNDARY - (addr & (SWD_MEMORY_BOUNDARY - 1));
        (boundary_offset / 4) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SwdOp;
    use crate::sim::{MemoryMode, SimTarget};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use test_case::test_case;

    fn powered(sim: SimTarget) -> SwdInterface<SimTarget> {
        let mut swd = SwdInterface::from_link(sim);
        swd.protocol_mut().set_wait_delay(Duration::ZERO);
        swd.protocol_mut().connect().unwrap();
        swd.sync().unwrap();
        swd.power_up_debug_domain(Duration::from_millis(10), Duration::ZERO)
            .unwrap();
        swd
    }

    #[test_case(AccessWidth::Bits8, 0x1000, 0x12, 0x0000_0012)]
    #[test_case(AccessWidth::Bits8, 0x1001, 0x12, 0x0000_1200)]
    #[test_case(AccessWidth::Bits8, 0x1003, 0x1AB, 0xAB00_0000; "masks before shifting")]
    #[test_case(AccessWidth::Bits16, 0x1002, 0xBEEF, 0xBEEF_0000)]
    #[test_case(AccessWidth::Bits16, 0x1000, 0x1_BEEF, 0x0000_BEEF; "masks halfword")]
    #[test_case(AccessWidth::Bits32, 0x1000, 0xDEAD_BEEF, 0xDEAD_BEEF)]
    fn lanes(width: AccessWidth, addr: u32, value: u32, lane: u32) {
        assert_eq!(width.to_lane(addr, value), lane);
        assert_eq!(width.from_lane(addr, lane), value & width.mask());
    }

    #[test]
    fn alignment() {
        assert!(AccessWidth::Bits8.is_aligned(0x1003));
        assert!(AccessWidth::Bits16.is_aligned(0x1002));
        assert!(!AccessWidth::Bits16.is_aligned(0x1001));
        assert!(!AccessWidth::Bits32.is_aligned(0x1002));
        assert_eq!(AccessWidth::try_from(16), Ok(AccessWidth::Bits16));
        assert!(AccessWidth::try_from(12).is_err());
    }

    #[test]
    fn sub_word_writes_on_word_only_memory() {
        let mut sim = SimTarget::default();
        sim.set_memory_mode(MemoryMode::WordOnly);
        let mut swd = powered(sim);
        let mem_ap = MemAp::new(0);

        mem_ap.write(&mut swd, 0x1003, 0xAB, AccessWidth::Bits8).unwrap();
        assert_eq!(
            mem_ap.read(&mut swd, 0x1000, AccessWidth::Bits32).unwrap(),
            0xAB00_0000
        );

        mem_ap
            .write(&mut swd, 0x2002, 0xBEEF, AccessWidth::Bits16)
            .unwrap();
        assert_eq!(
            mem_ap.read(&mut swd, 0x2000, AccessWidth::Bits32).unwrap(),
            0xBEEF_0000
        );
    }

    #[test]
    fn sub_word_reads_and_writes_on_byte_lane_memory() {
        let mut swd = powered(SimTarget::default());
        let mut mem_ap = MemAp::new(0);
        assert_eq!(mem_ap.negotiate_width(&mut swd), Ok(AccessWidth::Bits8));

        mem_ap
            .write(&mut swd, 0x2000_0000, 0x1122_3344, AccessWidth::Bits32)
            .unwrap();
        mem_ap.write(&mut swd, 0x2000_0001, 0xAA, AccessWidth::Bits8).unwrap();
        mem_ap
            .write(&mut swd, 0x2000_0002, 0xBBCC, AccessWidth::Bits16)
            .unwrap();

        assert_eq!(
            mem_ap.read(&mut swd, 0x2000_0000, AccessWidth::Bits32).unwrap(),
            0xBBCC_AA44
        );
        assert_eq!(
            mem_ap.read(&mut swd, 0x2000_0001, AccessWidth::Bits8).unwrap(),
            0xAA
        );
        assert_eq!(
            mem_ap.read(&mut swd, 0x2000_0002, AccessWidth::Bits16).unwrap(),
            0xBBCC
        );
    }

    #[test_case(&[8, 16, 32], AccessWidth::Bits8)]
    #[test_case(&[16, 32], AccessWidth::Bits16)]
    #[test_case(&[32], AccessWidth::Bits32)]
    fn width_negotiation(sizes: &[u8], expected: AccessWidth) {
        let mut sim = SimTarget::default();
        sim.set_supported_sizes(sizes);
        let mut swd = powered(sim);
        let mut mem_ap = MemAp::new(0);

        assert_eq!(mem_ap.negotiate_width(&mut swd), Ok(expected));
        assert_eq!(mem_ap.width(), Some(expected));
    }

    #[test]
    fn narrower_than_supported() {
        let mut sim = SimTarget::default();
        sim.set_supported_sizes(&[32]);
        sim.poke(0x2000_0000, 0x1234_5678);
        let mut swd = powered(sim);
        let mut mem_ap = MemAp::new(0);
        mem_ap.negotiate_width(&mut swd).unwrap();

        // Reads are served from the containing word
        assert_eq!(
            mem_ap.read(&mut swd, 0x2000_0002, AccessWidth::Bits8).unwrap(),
            0x34
        );
        assert_eq!(
            mem_ap.read(&mut swd, 0x2000_0002, AccessWidth::Bits16).unwrap(),
            0x1234
        );

        // Writes can't be done without a read-modify-write
        assert!(matches!(
            mem_ap.write(&mut swd, 0x2000_0002, 0x55, AccessWidth::Bits8),
            Err(SwdError::Unsupported(_))
        ));
    }

    #[test]
    fn misaligned_access_rejected() {
        let mut swd = powered(SimTarget::default());
        let mem_ap = MemAp::new(0);
        swd.protocol_mut().link_mut().clear_log();

        assert!(matches!(
            mem_ap.read(&mut swd, 0x2000_0001, AccessWidth::Bits16),
            Err(SwdError::Api(_))
        ));
        assert!(matches!(
            mem_ap.write(&mut swd, 0x2000_0002, 0, AccessWidth::Bits32),
            Err(SwdError::Api(_))
        ));
        assert!(swd.protocol().link().log().is_empty());
    }

    #[test]
    fn block_transfer_crosses_1k_boundary() {
        let mut swd = powered(SimTarget::default());
        let mem_ap = MemAp::new(0);
        let data: Vec<u32> = (0..8).map(|ii| 0x1000_0000 + ii).collect();
        let addr = 0x2000_03F0;

        swd.protocol_mut().link_mut().clear_log();
        mem_ap.write_block(&mut swd, addr, &data).unwrap();
        let tar_writes = swd
            .protocol()
            .link()
            .ok_ops()
            .iter()
            .filter(|op| **op == SwdOp::ApWrite(0x04))
            .count();
        assert_eq!(tar_writes, 2);

        let mut buf = vec![0u32; data.len()];
        mem_ap.read_block(&mut swd, addr, &mut buf).unwrap();
        assert_eq!(buf, data);

        for (ii, word) in data.iter().enumerate() {
            assert_eq!(swd.protocol().link().peek(addr + 4 * ii as u32), *word);
        }
    }

    #[test]
    fn block_rejects_unaligned_start() {
        let mut swd = powered(SimTarget::default());
        let mem_ap = MemAp::new(0);
        let mut buf = [0u32; 2];
        assert!(matches!(
            mem_ap.read_block(&mut swd, 0x2000_0002, &mut buf),
            Err(SwdError::Api(_))
        ));
        assert!(matches!(
            mem_ap.write_block(&mut swd, 0xFFFF_FFFC, &[1, 2]),
            Err(SwdError::Api(_))
        ));
    }

    #[test]
    fn identify_cortex_m4_ahb_ap() {
        let mut swd = powered(SimTarget::default());
        let info = MemAp::new(0).identify(&mut swd).unwrap();
        assert!(info.idr.is_mem_ap());
        assert!(info.base.present());
        assert!(!info.cfg.big_endian());

        assert!(matches!(
            MemAp::new(3).identify(&mut swd),
            Err(SwdError::Unsupported(_))
        ));
    }
}
