mod descriptor;
mod lines;
pub mod mock;
mod serial;

pub use descriptor::{ConnectionDescriptor, DataBits, Parity, StopBits};
pub use lines::LineDecoder;
pub use serial::SerialConnector;

use std::{
    io::{Read, Write},
    time::Duration,
};

use crate::sleeper::Sleeper;

pub type ComResult<T> = Result<T, CommunicationError>;

/// Terminator appended to every command written to a device
pub const LINE_TERMINATOR: &str = "\n";

const READ_CHUNK_SIZE: usize = 1024;

/// A byte-level, bidirectional connection to a single device. Implemented for real serial ports
/// and for the in-memory devices in [`mock`].
pub trait SerialPortHandle: Read + Write + Send {
    fn set_timeout(&mut self, timeout: Duration) -> ComResult<()>;

    /// Returns a second handle to the same underlying port, so that reading and writing can
    /// happen on different threads
    fn try_clone_handle(&self) -> ComResult<Box<dyn SerialPortHandle>>;
}

/// Knows how to turn a [`ConnectionDescriptor`] into an open [`SerialPortHandle`]
pub trait Connector {
    fn connect(&self, descriptor: &ConnectionDescriptor) -> ComResult<Box<dyn SerialPortHandle>>;
}

/// How often and how patiently a connection is attempted before giving up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_ATTEMPTS: u32 = 3;
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

    #[must_use]
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ATTEMPTS, Self::DEFAULT_DELAY)
    }
}

/// Owns one connection to one device. Closing is idempotent, and dropping a `Transport` closes it.
pub struct Transport {
    descriptor: ConnectionDescriptor,
    handle: Option<Box<dyn SerialPortHandle>>,
    failed_attempts: u32,
}

impl Transport {
    /// Tries to connect up to `policy.attempts` times, sleeping `policy.delay` between attempts.
    /// Every failed attempt is logged as a warning.
    pub fn open(
        descriptor: &ConnectionDescriptor,
        connector: &dyn Connector,
        policy: &RetryPolicy,
        sleeper: &dyn Sleeper,
    ) -> Result<Self, ConnectionError> {
        let mut last_error = None;

        for attempt in 1..=policy.attempts {
            log::info!("Connecting device ({}), attempt {attempt}", descriptor.port);
            match connector.connect(descriptor).and_then(|mut handle| {
                handle.set_timeout(descriptor.read_timeout())?;
                Ok(handle)
            }) {
                Ok(handle) => {
                    return Ok(Self {
                        descriptor: descriptor.clone(),
                        handle: Some(handle),
                        failed_attempts: attempt - 1,
                    });
                }
                Err(e) => {
                    log::warn!(
                        "Could not open {} (attempt {attempt}/{}): {e}",
                        descriptor.port,
                        policy.attempts
                    );
                    last_error = Some(e);
                }
            }

            if attempt < policy.attempts {
                sleeper.sleep(policy.delay);
            }
        }

        log::error!(
            "Error opening serial connection ({}) after {} attempts",
            descriptor.port,
            policy.attempts
        );
        Err(ConnectionError { descriptor: descriptor.clone(), attempts: policy.attempts, last_error })
    }

    /// Number of attempts that failed before the connection was established
    #[must_use]
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Returns whatever bytes arrive within the descriptor's read timeout. An empty vector means
    /// nothing was received.
    pub fn read_available(&mut self) -> ComResult<Vec<u8>> {
        let handle = self.handle.as_mut().ok_or(CommunicationError::Closed)?;
        let mut buffer = vec![0u8; READ_CHUNK_SIZE];

        match handle.read(&mut buffer) {
            Ok(n) => {
                buffer.truncate(n);
                Ok(buffer)
            }
            Err(e) => match CommunicationError::from(e) {
                CommunicationError::TimedOut => Ok(Vec::new()),
                e => Err(e),
            },
        }
    }

    /// Sends `command` followed by [`LINE_TERMINATOR`]
    pub fn write(&mut self, command: &str) -> ComResult<()> {
        let handle = self.handle.as_mut().ok_or(CommunicationError::Closed)?;
        handle.write_all(command.as_bytes())?;
        handle.write_all(LINE_TERMINATOR.as_bytes())?;
        handle.flush()?;
        Ok(())
    }

    /// Second transport on the same port, used by the background reader
    pub fn try_clone(&self) -> ComResult<Transport> {
        let handle = self.handle.as_ref().ok_or(CommunicationError::Closed)?;
        Ok(Transport {
            descriptor: self.descriptor.clone(),
            handle: Some(handle.try_clone_handle()?),
            failed_attempts: self.failed_attempts,
        })
    }

    pub fn close(&mut self) {
        if self.handle.take().is_some() {
            log::debug!("Closed {}", self.descriptor.port);
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommunicationError {
    /// Signals that the serial driver refused to open or configure the port
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    /// Signals that the underlying sending or receiving failed. Not recoverable on its own.
    #[error("io error: {0}")]
    Io(std::io::Error),
    /// Signals that a read timed out
    #[error("timed out")]
    TimedOut,
    /// The transport was already closed
    #[error("transport is closed")]
    Closed,
}

impl From<std::io::Error> for CommunicationError {
    fn from(value: std::io::Error) -> Self {
        match value.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                CommunicationError::TimedOut
            }
            _ => CommunicationError::Io(value),
        }
    }
}

/// All connection attempts for a device failed
#[derive(Debug, thiserror::Error)]
#[error("could not open {descriptor} after {attempts} attempts")]
pub struct ConnectionError {
    pub descriptor: ConnectionDescriptor,
    pub attempts: u32,
    #[source]
    pub last_error: Option<CommunicationError>,
}
