//! In-memory devices for running sessions and scenarios without hardware.
//!
//! A [`MockDevice`] answers commands written to it according to scripted rules, optionally after
//! a delay and optionally on a peer device, which is enough to replay the shell dialogues of two
//! boards talking to each other. [`MockConnector`] hands out handles to registered devices and
//! can be told to fail the first few connection attempts.

use std::{
    collections::{HashMap, VecDeque},
    io::{Read, Write},
    sync::{Arc, Condvar, Mutex, MutexGuard, Weak},
    time::{Duration, Instant},
};

use super::{ComResult, CommunicationError, ConnectionDescriptor, Connector, SerialPortHandle};

/// A line the device sends when one of its rules fires
#[derive(Debug, Clone)]
pub struct Reply {
    line: String,
    delay: Duration,
    peer: Option<Weak<Shared>>,
}

impl Reply {
    pub fn line(line: impl Into<String>) -> Self {
        Self { line: line.into(), delay: Duration::ZERO, peer: None }
    }

    /// Sends the reply on `peer` instead of the device the rule belongs to
    pub fn on(peer: &MockDevice, line: impl Into<String>) -> Self {
        Self { line: line.into(), delay: Duration::ZERO, peer: Some(Arc::downgrade(&peer.shared)) }
    }

    #[must_use]
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug)]
struct Rule {
    trigger: String,
    replies: Vec<Reply>,
}

#[derive(Debug)]
struct Chunk {
    available_at: Instant,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct DeviceState {
    outgoing: VecDeque<Chunk>,
    incoming: Vec<u8>,
    written: Vec<String>,
    rules: Vec<Rule>,
    unplugged: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<DeviceState>,
    output_ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn schedule(&self, line: &str, delay: Duration) {
        let available_at = Instant::now() + delay;
        let mut bytes = line.as_bytes().to_vec();
        bytes.extend_from_slice(b"\r\n");

        let mut state = self.lock();
        let position = state
            .outgoing
            .iter()
            .position(|chunk| chunk.available_at > available_at)
            .unwrap_or(state.outgoing.len());
        state.outgoing.insert(position, Chunk { available_at, bytes });
        drop(state);

        self.output_ready.notify_all();
    }
}

/// A scripted device. Cloning gives another handle to the same device.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    shared: Arc<Shared>,
}

impl MockDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every written line containing `trigger` with `reply`
    #[must_use]
    pub fn respond(self, trigger: &str, reply: &str) -> Self {
        self.respond_with(trigger, vec![Reply::line(reply)])
    }

    /// Answers every written line containing `trigger` with `replies`, in order
    #[must_use]
    pub fn respond_with(self, trigger: &str, replies: Vec<Reply>) -> Self {
        self.shared.lock().rules.push(Rule { trigger: trigger.to_string(), replies });
        self
    }

    /// Makes the device print `line` right away
    pub fn emit(&self, line: &str) {
        self.shared.schedule(line, Duration::ZERO);
    }

    /// Makes the device print `line` once `delay` has passed
    pub fn emit_after(&self, line: &str, delay: Duration) {
        self.shared.schedule(line, delay);
    }

    /// Every complete line written to the device so far
    #[must_use]
    pub fn written(&self) -> Vec<String> {
        self.shared.lock().written.clone()
    }

    /// Simulates the device disappearing: every further read or write fails
    pub fn unplug(&self) {
        self.shared.lock().unplugged = true;
        self.shared.output_ready.notify_all();
    }

    fn handle(&self) -> MockPort {
        MockPort { shared: self.shared.clone(), timeout: Duration::from_secs(1) }
    }
}

/// Port handle onto a [`MockDevice`]
pub struct MockPort {
    shared: Arc<Shared>,
    timeout: Duration,
}

fn unplugged() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "device unplugged")
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.shared.lock();

        loop {
            if state.unplugged {
                return Err(unplugged());
            }

            let now = Instant::now();
            let next_at = state.outgoing.front().map(|chunk| chunk.available_at);
            if let (Some(available_at), Some(chunk)) = (next_at, state.outgoing.front_mut()) {
                if available_at <= now {
                    let n = buf.len().min(chunk.bytes.len());
                    buf[..n].copy_from_slice(&chunk.bytes[..n]);
                    chunk.bytes.drain(..n);
                    if chunk.bytes.is_empty() {
                        state.outgoing.pop_front();
                    }
                    return Ok(n);
                }
            }

            if now >= deadline {
                return Err(std::io::ErrorKind::TimedOut.into());
            }

            let wake_at = next_at.map_or(deadline, |at| at.min(deadline));
            state = self
                .shared
                .output_ready
                .wait_timeout(state, wake_at.saturating_duration_since(now))
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .0;
        }
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.shared.lock();
        if state.unplugged {
            return Err(unplugged());
        }

        state.incoming.extend_from_slice(buf);
        let mut fired = Vec::new();
        while let Some(end) = state.incoming.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = state.incoming.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw).trim_end().to_string();
            for rule in state.rules.iter().filter(|rule| line.contains(&rule.trigger)) {
                fired.extend(rule.replies.iter().cloned());
            }
            state.written.push(line);
        }
        drop(state);

        // Deliver outside of the lock, peers may be writing to us at the same time
        for reply in fired {
            match &reply.peer {
                None => self.shared.schedule(&reply.line, reply.delay),
                Some(peer) => {
                    if let Some(peer) = peer.upgrade() {
                        peer.schedule(&reply.line, reply.delay);
                    }
                }
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SerialPortHandle for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> ComResult<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn try_clone_handle(&self) -> ComResult<Box<dyn SerialPortHandle>> {
        Ok(Box::new(MockPort { shared: self.shared.clone(), timeout: self.timeout }))
    }
}

/// Connects descriptors to registered [`MockDevice`]s by port name
#[derive(Debug, Default)]
pub struct MockConnector {
    devices: HashMap<String, MockDevice>,
    failures: Mutex<HashMap<String, u32>>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl MockConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_device(mut self, port: &str, device: MockDevice) -> Self {
        self.devices.insert(port.to_string(), device);
        self
    }

    /// Makes the next `count` connection attempts to `port` fail
    pub fn fail_first(&self, port: &str, count: u32) {
        self.failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(port.to_string(), count);
    }

    /// How many times a connection to `port` was attempted
    #[must_use]
    pub fn attempts(&self, port: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(port)
            .copied()
            .unwrap_or(0)
    }
}

impl Connector for MockConnector {
    fn connect(&self, descriptor: &ConnectionDescriptor) -> ComResult<Box<dyn SerialPortHandle>> {
        *self
            .attempts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(descriptor.port.clone())
            .or_insert(0) += 1;

        let mut failures =
            self.failures.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(remaining) = failures.get_mut(&descriptor.port) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CommunicationError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    format!("{} is busy", descriptor.port),
                )));
            }
        }
        drop(failures);

        let device = self.devices.get(&descriptor.port).ok_or_else(|| {
            CommunicationError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such device {}", descriptor.port),
            ))
        })?;

        Ok(Box::new(device.handle()))
    }
}
