// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! swdlink example - A debug session against the simulated target
//!
//! This example connects to a [`SimTarget`], identifies its MEM-AP, does
//! some word, sub-word and block memory accesses, and then shares the
//! session between threads using a worker.
//!
//! To run this example:
//! - run the example with `RUST_LOG=debug cargo run --example sim_session`
//! - use `RUST_LOG=trace` to see every SWD transfer

use log::{error, info};
use std::thread;
use std::time::Instant;

use swdlink::sim::SimTarget;
use swdlink::worker::TargetWorker;
use swdlink::{AccessWidth, DebugSession, SessionConfig, SwdError};

// Number of 32-bit words to transfer in bulk operations
const BULK_SIZE: usize = 512;

// SRAM on the simulated target
const RAM_BASE: u32 = 0x2000_0000;

fn main() {
    // Set up the logger - use RUST_LOG env variable to control log level
    env_logger::init();

    if let Err(e) = run() {
        error!("Example failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), SwdError> {
    let mut target = SimTarget::default();
    target.poke(RAM_BASE, 0x1234_5678);

    // Create the DebugSession, which is how we'll drive the target
    let mut session = DebugSession::with_config(target, SessionConfig::default());
    let idcode = session.connect()?;
    info!("Connected to target with ID code: {idcode}");
    info!("MEM-AP: {}", session.mem_ap_info()?);
    if let Some(width) = session.access_width() {
        info!("Narrowest access: {width}");
    }

    // Word and sub-word reads of the same location
    for width in [AccessWidth::Bits32, AccessWidth::Bits16, AccessWidth::Bits8] {
        let value = session.read_mem(RAM_BASE, width)?;
        info!("{width} read of {RAM_BASE:#010X}: {value:#X}");
    }

    // Bulk write and read back
    let data: Vec<u32> = (0..BULK_SIZE as u32).map(|ii| ii * 0x0101_0101).collect();
    let start = Instant::now();
    session.write_block(RAM_BASE, &data)?;
    let mut buf = vec![0u32; BULK_SIZE];
    session.read_block(RAM_BASE, &mut buf)?;
    let elapsed = start.elapsed();
    if buf != data {
        return Err(SwdError::OperationFailed("block read back mismatch".into()));
    }
    info!("Wrote and read back {BULK_SIZE} words in {elapsed:?}");

    // Hand the session to a worker and use it from several threads
    let (worker, handle) = TargetWorker::spawn(session)?;
    let threads: Vec<_> = (0..4u32)
        .map(|ii| {
            let handle = handle.clone();
            thread::spawn(move || {
                let addr = RAM_BASE + 0x1000 + ii * 4;
                handle.write_mem(addr, ii, AccessWidth::Bits32)?;
                handle.read_mem(addr, AccessWidth::Bits32)
            })
        })
        .collect();

    for thread in threads {
        match thread.join() {
            Ok(result) => info!("Worker read: {:#X}", result?),
            Err(_) => return Err(SwdError::WorkerStopped),
        }
    }
    info!("Status: {:?}", handle.status()?);

    drop(handle);
    let session = worker.join()?;
    info!("Session finished: {}", session.state());

    Ok(())
}
