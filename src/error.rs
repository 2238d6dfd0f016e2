//! Error types returned by this crate's modules.

use thiserror::Error;

/// Errors returned while decoding a [`Packet`](crate::Packet) from the wire.
///
/// A decode error is always recoverable: the watcher logs it and discards
/// the offending bytes, it never terminates the read loop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer does not contain enough bytes for a header yet.
    #[error("incomplete header (have {have} bytes, need {need})")]
    IncompleteHeader {
        /// Bytes currently buffered.
        have: usize,
        /// Bytes required for a full header.
        need: usize,
    },

    /// The buffer has a header but not yet the full body and footer.
    #[error("incomplete packet (have {have} bytes, need {need})")]
    IncompletePacket {
        /// Bytes currently buffered.
        have: usize,
        /// Bytes required for the full packet.
        need: usize,
    },

    /// The leading magic byte was not `0x02`.
    #[error("bad magic byte {0:#04x}")]
    BadMagic(u8),

    /// The command-type field did not match one of the five known names.
    #[error("unrecognised command type {0:?}")]
    BadCommand(String),

    /// The GUID field contained a byte that is not an ASCII hex digit.
    #[error("GUID contains non-hex characters: {0:?}")]
    BadGuid(String),

    /// `packet_number` was greater than `packet_count`.
    #[error("packet number {number} exceeds packet count {count}")]
    NumberOutOfRange {
        /// The out-of-range fragment number.
        number: u32,
        /// The fragment count the number was checked against.
        count: u32,
    },

    /// The CRC32 footer did not match the computed checksum.
    #[error("CRC mismatch: wire={wire:#010x} computed={computed:#010x}")]
    BadCrc {
        /// The CRC32 read from the packet footer.
        wire: u32,
        /// The CRC32 computed over the packet's header and body.
        computed: u32,
    },

    /// The trailing magic byte was not `0x03`.
    #[error("bad tail magic byte {0:#04x}")]
    BadTailMagic(u8),
}

/// Errors returned by the command worker when launching a module binary.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The child process could not be spawned at all.
    #[error("failed to spawn {path}: {source}")]
    Spawn {
        /// The executable path that failed to spawn.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The argument string could not be split into a shell-style argument
    /// vector.
    #[error("failed to parse arguments {args:?}: {source}")]
    ArgParse {
        /// The raw argument string.
        args: String,
        /// The underlying parse error.
        #[source]
        source: shell_words::ParseError,
    },
}

/// Top-level error type for failures the watcher logs and recovers from.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A packet failed to decode; see [`DecodeError`].
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A worker failed to spawn its module binary; see [`WorkerError`].
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// The serial transport returned an I/O error.
    #[error("serial transport error: {0}")]
    Transport(#[source] std::io::Error),
}
