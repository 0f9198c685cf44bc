//! Serial transport for the device's self-report
//!
//! A probe sketch writes a short token to its serial port once its
//! allocation succeeded and stays silent otherwise (or crashes, or hangs).
//! The port is opened fresh for every observation and closed again before
//! [`Transport::observe`] returns, so the next upload finds it free.

use std::io::{self, Read};
use std::time::Duration;

use serialport::ClearBuffer;

use crate::config::SerialConfig;

/// What the host heard from the device after one boot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Bytes received before the timeout (never empty)
    Token(Vec<u8>),
    /// Timeout, empty read or transport error
    Silent,
}

impl Observation {
    /// A non-empty token is the only success signal
    pub fn succeeded(&self) -> bool {
        matches!(self, Observation::Token(bytes) if !bytes.is_empty())
    }
}

/// Source of device self-reports
pub trait Transport {
    /// Wait for the freshly booted device's report
    ///
    /// Never fails: anything short of a token is [`Observation::Silent`].
    fn observe(&mut self) -> Observation;
}

/// Serial port transport backed by the `serialport` crate
#[derive(Debug, Clone)]
pub struct SerialTransport {
    port: String,
    config: SerialConfig,
    timeout: Duration,
}

impl SerialTransport {
    pub fn new(port: impl Into<String>, config: SerialConfig, timeout: Duration) -> Self {
        Self {
            port: port.into(),
            config,
            timeout,
        }
    }
}

impl Transport for SerialTransport {
    fn observe(&mut self) -> Observation {
        let mut handle = match serialport::new(&self.port, self.config.baud_rate)
            .timeout(self.timeout)
            .open()
        {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("Could not open {}: {}", self.port, e);
                return Observation::Silent;
            }
        };

        // Drop whatever the previous sketch left in the buffer
        if let Err(e) = handle.clear(ClearBuffer::Input) {
            log::warn!("Could not clear input buffer on {}: {}", self.port, e);
        }

        let observation = read_token(&mut handle, self.config.token_len);
        drop(handle);
        log::trace!("Closed {}", self.port);

        observation
    }
}

/// Read up to `len` bytes, stopping early on EOF, timeout or error
pub fn read_token<R: Read + ?Sized>(reader: &mut R, len: usize) -> Observation {
    let mut buf = vec![0u8; len];
    let mut filled = 0;

    while filled < len {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                log::debug!("Serial read timed out after {} byte(s)", filled);
                break;
            }
            Err(e) => {
                log::warn!("Serial read failed: {}", e);
                break;
            }
        }
    }

    if filled == 0 {
        Observation::Silent
    } else {
        buf.truncate(filled);
        Observation::Token(buf)
    }
}
