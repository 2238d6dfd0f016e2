//! The serial transport: a thin read/write boundary around a serial
//! device, plus an in-memory stand-in used by the watcher's own tests.

use std::io::{self, Read, Write};
use std::time::Duration;

use crate::config::{AgentConfig, Parity};

/// A blocking, timed byte transport.
///
/// Implementations must not block past the supplied `timeout`; a timed-out
/// read returns an empty `Vec`, never an error. The watcher's main loop is
/// the sole owner of this trait object and never shares it across threads.
pub trait SerialTransport: Send {
    /// Reads up to `max` bytes, blocking no longer than `timeout`. Returns
    /// an empty vector on timeout; a partial read is valid.
    fn read(&mut self, max: usize, timeout: Duration) -> io::Result<Vec<u8>>;

    /// Writes `bytes` in full.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// A [`SerialTransport`] backed by a real serial device, via the
/// `serialport` crate.
pub struct SerialPortTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialPortTransport {
    /// Opens the device named in `config`, applying its baud rate, byte
    /// size, parity and stop bits. These fields do not affect the frame
    /// format; they are purely link-layer settings.
    pub fn open(config: &AgentConfig) -> serialport::Result<Self> {
        let data_bits = match config.byte_size {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        };
        let parity = match config.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };
        let stop_bits = match config.stop_bits {
            2 => serialport::StopBits::Two,
            _ => serialport::StopBits::One,
        };

        let port = serialport::new(&config.port_path, config.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(SerialPortTransport { port })
    }
}

impl SerialTransport for SerialPortTransport {
    fn read(&mut self, max: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        self.port.set_timeout(timeout).map_err(io::Error::from)?;

        let mut buf = vec![0u8; max];
        match self.port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            // A serial port read timeout surfaces as `ErrorKind::TimedOut`;
            // that is not a failure, it is simply "nothing arrived yet".
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)
    }
}

/// An in-memory [`SerialTransport`] pair, for driving the watcher's FSM in
/// tests without a real serial device.
///
/// `LoopbackTransport::pair()` returns two ends: feed bytes into one end's
/// `inbox` to simulate the host transmitting, and drain the other's
/// `outbox` to observe what the watcher wrote.
#[derive(Debug)]
pub struct LoopbackTransport {
    inbox: std::sync::mpsc::Receiver<u8>,
    outbox: std::sync::mpsc::Sender<Vec<u8>>,
}

/// The test-side handle for a [`LoopbackTransport`]: pushes bytes as if
/// from the host, and drains whatever the watcher wrote back.
#[derive(Debug)]
pub struct LoopbackHandle {
    inbox: std::sync::mpsc::Sender<u8>,
    outbox: std::sync::mpsc::Receiver<Vec<u8>>,
}

impl LoopbackTransport {
    /// Creates a connected `(transport, handle)` pair.
    pub fn pair() -> (Self, LoopbackHandle) {
        let (host_to_agent_tx, host_to_agent_rx) = std::sync::mpsc::channel();
        let (agent_to_host_tx, agent_to_host_rx) = std::sync::mpsc::channel();

        (
            LoopbackTransport {
                inbox: host_to_agent_rx,
                outbox: agent_to_host_tx,
            },
            LoopbackHandle {
                inbox: host_to_agent_tx,
                outbox: agent_to_host_rx,
            },
        )
    }
}

impl SerialTransport for LoopbackTransport {
    fn read(&mut self, max: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        let deadline = std::time::Instant::now() + timeout;

        while buf.len() < max {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.inbox.recv_timeout(remaining) {
                Ok(byte) => buf.push(byte),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => break,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(buf)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let _ = self.outbox.send(bytes.to_vec());
        Ok(())
    }
}

impl LoopbackHandle {
    /// Feeds `bytes` to the transport as if the host had transmitted them.
    pub fn send(&self, bytes: &[u8]) {
        for &b in bytes {
            let _ = self.inbox.send(b);
        }
    }

    /// Blocks until the watcher writes one buffer back, or `timeout`
    /// elapses.
    pub fn recv(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.outbox.recv_timeout(timeout).ok()
    }
}
