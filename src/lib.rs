#![deny(rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::todo,
    clippy::unimplemented,
    missing_debug_implementations
)]

//! Guest-side management agent for a host hypervisor talking over a virtual
//! serial port.
//!
//! The host issues commands over a framed, CRC-checked packet protocol; this
//! crate implements the wire format ([`packet`]), the reassembly of
//! multi-fragment requests ([`reassembly`]), the serial transport
//! ([`transport`]), the subprocess execution model ([`worker`]), the module
//! alias registry ([`registry`]) and the protocol state machine that ties
//! them together ([`watcher`]).

mod crc;
pub use crc::crc32;

pub mod error;

pub mod packet;
pub use packet::{CommandType, Packet, ResponseType};

pub mod reassembly;
pub use reassembly::ReassemblyPool;

pub mod transport;
pub use transport::SerialTransport;

pub mod worker;
pub use worker::{LaunchOutcome, LaunchResult};

pub mod registry;
pub use registry::{Module, ModuleKind};

pub mod config;
pub use config::AgentConfig;

pub mod restart_marker;

pub mod context;
pub use context::AgentContext;

pub mod watcher;
pub use watcher::{CommandRequest, Watcher};
