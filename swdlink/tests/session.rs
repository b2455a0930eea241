// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Whole-stack tests: DebugSession down to the simulated target's bits.

use pretty_assertions::assert_eq;
use std::time::Duration;

use swdlink::protocol::SwdOp;
use swdlink::sim::{MemoryMode, SimTarget};
use swdlink::{AccessWidth, DebugSession, SessionConfig, SessionState, SwdError};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config() -> SessionConfig {
    SessionConfig {
        wait_delay: Duration::ZERO,
        power_up_timeout: Duration::from_millis(20),
        ..SessionConfig::default()
    }
}

fn connect(target: SimTarget) -> DebugSession<SimTarget> {
    init_logging();
    let mut session = DebugSession::with_config(target, config());
    session.connect().unwrap();
    session
}

fn sim(session: &mut DebugSession<SimTarget>) -> &mut SimTarget {
    session.swd_if_mut().protocol_mut().link_mut()
}

#[test]
fn connect_sequence_on_the_wire() {
    let session = connect(SimTarget::default());
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.access_width(), Some(AccessWidth::Bits8));

    let ops = session.swd_if().protocol().link().ok_ops();
    assert_eq!(
        ops,
        vec![
            SwdOp::DpRead(0x0),  // IDCODE
            SwdOp::DpWrite(0x0), // ABORT
            SwdOp::DpWrite(0x4), // CTRL/STAT
            SwdOp::DpWrite(0x8), // SELECT
            SwdOp::DpWrite(0x8), // SELECT, power-up
            SwdOp::DpWrite(0x4), // CTRL/STAT power-up request
            SwdOp::DpRead(0x4),  // CTRL/STAT power-up ack
            SwdOp::ApWrite(0x0), // CSW 8-bit
            SwdOp::ApRead(0x0),  // CSW readback
            SwdOp::DpRead(0xC),  // RDBUFF
        ]
    );
}

#[test]
fn word_read_on_the_wire() {
    let mut session = connect(SimTarget::default());
    sim(&mut session).poke(0x2000_0000, 0xCAFE_F00D);
    sim(&mut session).clear_log();

    assert_eq!(
        session.read_mem(0x2000_0000, AccessWidth::Bits32),
        Ok(0xCAFE_F00D)
    );
    assert_eq!(
        sim(&mut session).ok_ops(),
        vec![
            SwdOp::ApWrite(0x0),
            SwdOp::ApWrite(0x4),
            SwdOp::ApRead(0xC),
            SwdOp::DpRead(0xC),
        ]
    );

    // SELECT goes out again once the cache is forgotten
    session.swd_if_mut().invalidate_select_cache();
    sim(&mut session).clear_log();
    session.read_mem(0x2000_0000, AccessWidth::Bits32).unwrap();
    assert_eq!(sim(&mut session).ok_ops()[0], SwdOp::DpWrite(0x8));
}

#[test]
fn sub_word_writes_use_byte_lanes() {
    let mut target = SimTarget::default();
    target.set_memory_mode(MemoryMode::WordOnly);
    let mut session = connect(target);

    session.write_mem(0x1003, 0xAB, AccessWidth::Bits8).unwrap();
    assert_eq!(session.read_mem(0x1000, AccessWidth::Bits32), Ok(0xAB00_0000));

    session.write_mem(0x1002, 0xBEEF, AccessWidth::Bits16).unwrap();
    assert_eq!(session.read_mem(0x1000, AccessWidth::Bits32), Ok(0xBEEF_0000));
}

#[test]
fn wait_retried_within_bound() {
    let mut session = connect(SimTarget::default());

    sim(&mut session).set_wait(2);
    assert!(session.read_mem(0x2000_0000, AccessWidth::Bits32).is_ok());

    sim(&mut session).set_wait(3);
    let err = session
        .read_mem(0x2000_0000, AccessWidth::Bits32)
        .unwrap_err();
    assert_eq!(err, SwdError::WaitAck);
    assert!(err.requires_retry());

    // Nothing left over
    assert!(session.read_mem(0x2000_0000, AccessWidth::Bits32).is_ok());
}

#[test]
fn fault_then_recover() {
    let mut session = connect(SimTarget::default());
    sim(&mut session).fault_region(0xE000_0000..0xE000_1000);

    assert_eq!(
        session.read_mem(0xE000_0010, AccessWidth::Bits32),
        Err(SwdError::FaultAck)
    );
    assert!(!session.read_ctrl_stat().unwrap().stickyerr());
    assert!(session.write_mem(0x2000_0000, 7, AccessWidth::Bits32).is_ok());
    assert_eq!(session.read_mem(0x2000_0000, AccessWidth::Bits32), Ok(7));
}

#[test]
fn parity_error_never_returns_data() {
    let mut session = connect(SimTarget::default());
    sim(&mut session).corrupt_next_read();

    let err = session
        .read_mem(0x2000_0000, AccessWidth::Bits32)
        .unwrap_err();
    assert_eq!(err, SwdError::ReadParity);
    assert!(err.requires_reset());

    session.reset().unwrap();
    assert!(session.read_mem(0x2000_0000, AccessWidth::Bits32).is_ok());
}

#[test]
fn block_spans_1k_boundary() {
    let mut session = connect(SimTarget::default());
    let data: Vec<u32> = (0..300).map(|ii| 0xA000_0000 | ii).collect();
    let addr = 0x2000_0300;

    session.write_block(addr, &data).unwrap();
    let mut buf = vec![0u32; data.len()];
    session.read_block(addr, &mut buf).unwrap();
    assert_eq!(buf, data);

    // Nothing wrapped back to the start of the 1KB block
    assert_eq!(sim(&mut session).peek(0x2000_0000), 0);
    assert_eq!(sim(&mut session).peek(0x2000_0400), 0xA000_0040);
}

#[test]
fn config_from_json() {
    init_logging();
    let config: SessionConfig =
        serde_json::from_str(r#"{"wait_attempts": 1, "wait_delay": {"secs": 0, "nanos": 0}}"#)
            .unwrap();
    let mut session = DebugSession::with_config(SimTarget::default(), config);
    session.connect().unwrap();

    // A single WAIT is now fatal for the operation
    sim(&mut session).set_wait(1);
    assert_eq!(
        session.read_mem(0x2000_0000, AccessWidth::Bits32),
        Err(SwdError::WaitAck)
    );
}
