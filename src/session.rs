use std::{
    collections::BTreeMap,
    sync::mpsc,
    thread,
    time::Duration,
};

use crate::{
    communication::{
        CommunicationError, ConnectionDescriptor, ConnectionError, Connector, LineDecoder,
        RetryPolicy, Transport,
    },
    expectation::{ExpectError, LineStream, MatchResult, Pattern, DEFAULT_CAPACITY},
    sleeper::Sleeper,
};

/// Sessions of one run, keyed by device name
pub type SessionMap = BTreeMap<String, DeviceSession>;

/// Harness-wide knobs every session is created with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Used by [`DeviceSession::expect`] when no timeout is given
    pub default_timeout: Duration,
    /// How long a device needs after the reboot command before it accepts input again
    pub settle_delay: Duration,
    pub reboot_command: String,
    pub retry: RetryPolicy,
    /// Number of trailing lines kept for diagnostics
    pub history_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(3),
            settle_delay: Duration::from_secs(1),
            reboot_command: "kernel reboot cold".to_string(),
            retry: RetryPolicy::default(),
            history_capacity: DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SessionState {
    Unopened,
    Open,
    Closed,
    /// Every connection attempt failed
    Failed,
}

struct Reader {
    stop_tx: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

/// The imperative per-device API: write a command, expect a line.
///
/// While open, a background thread reads the device and feeds a [`LineStream`]. A write arms
/// that stream, so output the device produces between a write and the following expect is
/// still seen by that expect.
pub struct DeviceSession {
    name: String,
    descriptor: ConnectionDescriptor,
    settings: SessionSettings,
    state: SessionState,
    transport: Option<Transport>,
    stream: LineStream,
    reader: Option<Reader>,
    failed_attempts: u32,
}

impl DeviceSession {
    #[must_use]
    pub fn new(name: &str, descriptor: ConnectionDescriptor, settings: SessionSettings) -> Self {
        let stream = LineStream::new(settings.history_capacity);
        Self {
            name: name.to_string(),
            descriptor,
            settings,
            state: SessionState::Unopened,
            transport: None,
            stream,
            reader: None,
            failed_attempts: 0,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Connection attempts that failed, whether or not the session ended up open
    #[must_use]
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Connects using the session's retry policy, pausing between attempts through `sleeper`,
    /// and starts the reader thread. Opening an open session does nothing. A closed session can
    /// be opened again and starts with a new stream.
    pub fn open(
        &mut self,
        connector: &dyn Connector,
        sleeper: &dyn Sleeper,
    ) -> Result<(), ConnectionError> {
        if self.state == SessionState::Open {
            return Ok(());
        }

        let transport = match Transport::open(&self.descriptor, connector, &self.settings.retry, sleeper) {
            Ok(transport) => transport,
            Err(e) => {
                log::error!("{}: {e}", self.name);
                self.failed_attempts = e.attempts;
                self.state = SessionState::Failed;
                return Err(e);
            }
        };
        self.failed_attempts = transport.failed_attempts();

        if self.stream.is_closed() {
            self.stream = LineStream::new(self.settings.history_capacity);
        }

        let reader = transport.try_clone().and_then(|reader_transport| {
            self.spawn_reader(reader_transport).map_err(CommunicationError::Io)
        });
        match reader {
            Ok(reader) => self.reader = Some(reader),
            Err(e) => {
                log::error!("{}: could not start reading: {e}", self.name);
                self.state = SessionState::Failed;
                return Err(ConnectionError {
                    descriptor: self.descriptor.clone(),
                    attempts: self.failed_attempts + 1,
                    last_error: Some(e),
                });
            }
        }

        log::info!("{} open on {}", self.name, self.descriptor);
        self.transport = Some(transport);
        self.state = SessionState::Open;
        Ok(())
    }

    fn spawn_reader(&self, mut transport: Transport) -> std::io::Result<Reader> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let stream = self.stream.clone();
        let name = self.name.clone();

        let handle = thread::Builder::new().name(format!("{}-reader", self.name)).spawn(move || {
            let mut decoder = LineDecoder::new();
            // Disconnected means the session is gone, which is a stop as well
            while let Err(mpsc::TryRecvError::Empty) = stop_rx.try_recv() {
                match transport.read_available() {
                    Ok(bytes) => {
                        for line in decoder.feed(&bytes) {
                            log::trace!("{name} -> {line}");
                            stream.push(line);
                        }
                    }
                    Err(e) => {
                        log::error!("Reading from {name} failed: {e}");
                        stream.fail(e.to_string());
                        break;
                    }
                }
            }
            transport.close();
        })?;

        Ok(Reader { stop_tx, handle })
    }

    /// Sends `command` to the device. Does not wait for anything.
    pub fn write(&mut self, command: &str) -> Result<(), CommunicationError> {
        let transport = self.transport.as_mut().ok_or(CommunicationError::Closed)?;
        log::debug!("{} <- {command}", self.name);
        self.stream.arm();
        transport.write(command)
    }

    /// Waits up to the default timeout for a matching line, see [`DeviceSession::expect_within`]
    pub fn expect<P: Pattern + ?Sized>(&self, pattern: &P) -> Result<MatchResult, ExpectError> {
        self.expect_within(pattern, self.settings.default_timeout)
    }

    /// Waits for the first line matching `pattern` received after the last write, or after this
    /// call if nothing was written since the previous expectation
    pub fn expect_within<P: Pattern + ?Sized>(
        &self,
        pattern: &P,
        timeout: Duration,
    ) -> Result<MatchResult, ExpectError> {
        self.stream.expect_armed(pattern, timeout)
    }

    /// Makes the next expectation consider output from now on, as a write would
    pub fn arm(&self) {
        self.stream.arm();
    }

    /// Forgets the armed position, so the next expectation only sees output from its own call
    pub fn disarm(&self) {
        self.stream.disarm();
    }

    /// Handle to the session's line stream, usable from other threads to cancel an expectation
    /// or inspect the received history
    #[must_use]
    pub fn stream(&self) -> LineStream {
        self.stream.clone()
    }

    /// Sends the configured reboot command
    pub fn reboot(&mut self) -> Result<(), CommunicationError> {
        let command = self.settings.reboot_command.clone();
        self.write(&command)
    }

    /// Waits for the device to settle, then forgets everything it printed so far
    pub fn resync(&mut self, sleeper: &dyn Sleeper) {
        sleeper.sleep(self.settings.settle_delay);
        self.stream.clear();
        log::debug!("{} resynced", self.name);
    }

    pub fn reboot_and_resync(&mut self, sleeper: &dyn Sleeper) -> Result<(), CommunicationError> {
        log::info!("Rebooting {}", self.name);
        self.reboot()?;
        self.resync(sleeper);
        Ok(())
    }

    /// Stops the reader and releases the port. A waiting expectation resolves as cancelled
    /// within one read timeout. Closing twice has no further effect.
    pub fn close(&mut self) {
        self.stream.close();

        if let Some(reader) = self.reader.take() {
            // The reader may already have stopped on its own after an IO error
            let _ = reader.stop_tx.send(());
            if reader.handle.join().is_err() {
                log::error!("Reader of {} panicked", self.name);
            }
        }

        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }

        if self.state == SessionState::Open {
            log::info!("{} closed", self.name);
            self.state = SessionState::Closed;
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
