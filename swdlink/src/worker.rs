// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Target worker.
//!
//! A [`DebugSession`] can only be driven by one caller at a time.
//! [`TargetWorker`] moves a session onto its own I/O thread, which handles
//! [`Command`]s from a bounded queue one at a time.  Any number of threads
//! can hold a [`TargetHandle`] and make blocking calls through it.
//!
//! ```rust
//! use swdlink::{AccessWidth, DebugSession};
//! use swdlink::sim::SimTarget;
//! use swdlink::worker::TargetWorker;
//!
//! let session = DebugSession::new(SimTarget::default());
//! let (worker, target) = TargetWorker::spawn(session).unwrap();
//!
//! target.connect().unwrap();
//! target.write_mem(0x2000_0000, 42, AccessWidth::Bits32).unwrap();
//! assert_eq!(target.read_mem(0x2000_0000, AccessWidth::Bits32).unwrap(), 42);
//!
//! drop(target);
//! let session = worker.join().unwrap();
//! assert!(!session.is_ready());
//! ```

use serde::Serialize;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread::{self, JoinHandle};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::SwdError;
use crate::interface::PortKind;
use crate::link::BitLink;
use crate::memory::{AccessWidth, MemApInfo};
use crate::session::{DebugSession, SessionState};
use swdlink_core::arm::dp::IdCode;

/// Number of requests to the worker that can be queued.
pub const REQUEST_CHANNEL_SIZE: usize = 2;

const WORKER_THREAD_NAME: &str = "swdlink-target";

/// Operations the worker performs on its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // Target Control
    Connect,
    Disconnect,
    Reset,
    GetStatus,
    Stop,

    // Memory Operations
    ReadMem {
        addr: u32,
        width: AccessWidth,
    },
    WriteMem {
        addr: u32,
        value: u32,
        width: AccessWidth,
    },
    ReadBlock {
        addr: u32,
        count: usize,
    },
    WriteBlock {
        addr: u32,
        data: Vec<u32>,
    },
    GetMemApInfo,

    // Raw Register Operations
    ReadPort {
        kind: PortKind,
        ap_index: u8,
        addr: u8,
    },
    WritePort {
        kind: PortKind,
        ap_index: u8,
        addr: u8,
        value: u32,
    },
}

/// Successful result of a [`Command`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Connected(IdCode),
    Done,
    Status(Status),
    Value(u32),
    Block(Vec<u32>),
    MemApInfo(MemApInfo),
}

/// Snapshot of the worker's session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    pub state: SessionState,

    // IDCODE of the target's debug port, if connected.
    pub idcode: Option<u32>,

    // Narrowest supported memory access, if connected.
    pub access_width: Option<AccessWidth>,
}

// A command and where to send its result
struct Request {
    command: Command,
    reply: Sender<Result<Response, SwdError>>,
}

/// Owns the I/O thread running a [`DebugSession`].
#[derive(Debug)]
pub struct TargetWorker<L> {
    thread: JoinHandle<DebugSession<L>>,
}

impl<L> TargetWorker<L>
where
    L: BitLink + Send + 'static,
{
    /// Move `session` onto a new worker thread.
    ///
    /// Returns the worker and the first handle to it.  The worker runs until
    /// every [`TargetHandle`] has been dropped or [`TargetHandle::stop()`]
    /// is called.
    pub fn spawn(session: DebugSession<L>) -> Result<(Self, TargetHandle), SwdError> {
        let (sender, receiver) = mpsc::sync_channel(REQUEST_CHANNEL_SIZE);

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run(session, receiver))
            .map_err(|e| SwdError::OperationFailed(format!("worker spawn failed: {e}")))?;

        Ok((Self { thread }, TargetHandle { sender }))
    }

    /// Wait for the worker to stop, and take back its session, which has
    /// been disconnected.
    pub fn join(self) -> Result<DebugSession<L>, SwdError> {
        self.thread.join().map_err(|_| {
            error!("Error: Target worker panicked");
            SwdError::WorkerStopped
        })
    }
}

fn run<L: BitLink>(mut session: DebugSession<L>, receiver: Receiver<Request>) -> DebugSession<L> {
    info!("Exec:  Target worker started");

    while let Ok(request) = receiver.recv() {
        let stop = request.command == Command::Stop;
        let result = handle_request(&mut session, request.command);

        // The caller may have given up waiting
        if request.reply.send(result).is_err() {
            debug!("Note:  Response dropped, caller gone");
        }

        if stop {
            break;
        }
    }

    if let Err(e) = session.disconnect() {
        debug!("Note:  Disconnect on worker exit failed: {e}");
    }
    info!("OK:    Target worker stopped");
    session
}

fn handle_request<L: BitLink>(
    session: &mut DebugSession<L>,
    command: Command,
) -> Result<Response, SwdError> {
    trace!("Handling request: {command:?}");
    match command {
        Command::Connect => session.connect().map(Response::Connected),
        Command::Disconnect => session.disconnect().map(|_| Response::Done),
        Command::Reset => session.reset().map(Response::Connected),
        Command::GetStatus => Ok(Response::Status(Status {
            state: session.state(),
            idcode: session.idcode().map(|idcode| idcode.data()),
            access_width: session.access_width(),
        })),
        Command::Stop => Ok(Response::Done),
        Command::ReadMem { addr, width } => session.read_mem(addr, width).map(Response::Value),
        Command::WriteMem { addr, value, width } => session
            .write_mem(addr, value, width)
            .map(|_| Response::Done),
        Command::ReadBlock { addr, count } => {
            let mut buf = vec![0u32; count];
            session.read_block(addr, &mut buf).map(|_| Response::Block(buf))
        }
        Command::WriteBlock { addr, data } => {
            session.write_block(addr, &data).map(|_| Response::Done)
        }
        Command::GetMemApInfo => session.mem_ap_info().map(Response::MemApInfo),
        Command::ReadPort {
            kind,
            ap_index,
            addr,
        } => session.read_port(kind, ap_index, addr).map(Response::Value),
        Command::WritePort {
            kind,
            ap_index,
            addr,
            value,
        } => session
            .write_port(kind, ap_index, addr, value)
            .map(|_| Response::Done),
    }
}

/// Cloneable handle for sending commands to a [`TargetWorker`].
///
/// Every method blocks until the worker has carried out the command.  Once
/// the worker has stopped, they all return [`SwdError::WorkerStopped`].
#[derive(Debug, Clone)]
pub struct TargetHandle {
    sender: SyncSender<Request>,
}

impl TargetHandle {
    /// Send `command` and wait for its result.
    pub fn request(&self, command: Command) -> Result<Response, SwdError> {
        let (reply, response) = mpsc::channel();
        self.sender
            .send(Request { command, reply })
            .map_err(|_| SwdError::WorkerStopped)?;
        response.recv().map_err(|_| SwdError::WorkerStopped)?
    }

    pub fn connect(&self) -> Result<IdCode, SwdError> {
        match self.request(Command::Connect)? {
            Response::Connected(idcode) => Ok(idcode),
            other => Err(unexpected(other)),
        }
    }

    pub fn disconnect(&self) -> Result<(), SwdError> {
        self.request_done(Command::Disconnect)
    }

    pub fn reset(&self) -> Result<IdCode, SwdError> {
        match self.request(Command::Reset)? {
            Response::Connected(idcode) => Ok(idcode),
            other => Err(unexpected(other)),
        }
    }

    pub fn status(&self) -> Result<Status, SwdError> {
        match self.request(Command::GetStatus)? {
            Response::Status(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    /// Stop the worker after any commands already queued.
    pub fn stop(&self) -> Result<(), SwdError> {
        self.request_done(Command::Stop)
    }

    pub fn read_mem(&self, addr: u32, width: AccessWidth) -> Result<u32, SwdError> {
        self.request_value(Command::ReadMem { addr, width })
    }

    pub fn write_mem(&self, addr: u32, value: u32, width: AccessWidth) -> Result<(), SwdError> {
        self.request_done(Command::WriteMem { addr, value, width })
    }

    pub fn read_block(&self, addr: u32, count: usize) -> Result<Vec<u32>, SwdError> {
        match self.request(Command::ReadBlock { addr, count })? {
            Response::Block(data) => Ok(data),
            other => Err(unexpected(other)),
        }
    }

    pub fn write_block(&self, addr: u32, data: &[u32]) -> Result<(), SwdError> {
        self.request_done(Command::WriteBlock {
            addr,
            data: data.to_vec(),
        })
    }

    pub fn mem_ap_info(&self) -> Result<MemApInfo, SwdError> {
        match self.request(Command::GetMemApInfo)? {
            Response::MemApInfo(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    pub fn read_port(&self, kind: PortKind, ap_index: u8, addr: u8) -> Result<u32, SwdError> {
        self.request_value(Command::ReadPort {
            kind,
            ap_index,
            addr,
        })
    }

    pub fn write_port(
        &self,
        kind: PortKind,
        ap_index: u8,
        addr: u8,
        value: u32,
    ) -> Result<(), SwdError> {
        self.request_done(Command::WritePort {
            kind,
            ap_index,
            addr,
            value,
        })
    }

    fn request_value(&self, command: Command) -> Result<u32, SwdError> {
        match self.request(command)? {
            Response::Value(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    fn request_done(&self, command: Command) -> Result<(), SwdError> {
        match self.request(command)? {
            Response::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: Response) -> SwdError {
    SwdError::OperationFailed(format!("unexpected worker response {response:?}"))
}
