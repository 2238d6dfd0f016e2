//! Agent configuration.
//!
//! This crate only defines and defaults the configuration shape; populating
//! it from a command line or an `.ini` file is left to the binary that
//! embeds it.

use std::path::PathBuf;
use std::time::Duration;

/// Serial port parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Configuration for one agent run.
///
/// Defaults mirror the original agent's hardcoded command-line defaults
/// (`--baudrate 57600 --bytesize 8 --parity none --stopbits 1
/// --command-timeout 20`).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Path to the serial device to open (e.g. `/dev/ttyS0`, `COM3`).
    pub port_path: String,
    /// Serial link baud rate.
    pub baud_rate: u32,
    /// Serial link byte size (data bits).
    pub byte_size: u8,
    /// Serial link parity.
    pub parity: Parity,
    /// Serial link stop bits.
    pub stop_bits: u8,
    /// Wall-clock deadline applied to each subprocess a [`crate::worker`]
    /// launches.
    pub command_timeout: Duration,
    /// Directory modules are resolved relative to, and where the restart
    /// marker file is kept. Replaces the original agent's global
    /// `exe_directory`.
    pub root_dir: PathBuf,
}

impl AgentConfig {
    /// Builds a config for `port_path` with every other field at its
    /// original-agent default.
    pub fn new(port_path: impl Into<String>, root_dir: impl Into<PathBuf>) -> Self {
        AgentConfig {
            port_path: port_path.into(),
            baud_rate: 57600,
            byte_size: 8,
            parity: Parity::None,
            stop_bits: 1,
            command_timeout: Duration::from_secs(20),
            root_dir: root_dir.into(),
        }
    }
}
