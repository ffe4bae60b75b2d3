//! Scripted multi-device interactions.
//!
//! A [`Scenario`] is plain data: an ordered list of [`Step`]s, each addressed to a device by
//! name. The [`Orchestrator`] runs the steps on one timeline against the sessions of a run and
//! records a [`ScenarioResult`].

mod file;
pub mod library;
mod orchestrator;

pub use crate::sleeper::{Sleeper, ThreadSleeper};
pub use orchestrator::Orchestrator;

use std::{collections::BTreeSet, fmt, sync::Arc, time::Duration};

use crate::{
    communication::CommunicationError,
    expectation::{ExpectError, Pattern},
};

pub enum Step {
    Write { device: String, command: String },
    /// Waits for a line on `device`. Without a timeout the session default applies.
    Expect { device: String, pattern: Arc<dyn Pattern>, timeout: Option<Duration> },
    Delay(Duration),
    /// Reboots `device`, lets it settle and drops what it printed so far
    Resync { device: String },
}

impl Step {
    pub fn write(device: &str, command: &str) -> Self {
        Step::Write { device: device.to_string(), command: command.to_string() }
    }

    pub fn expect(device: &str, pattern: impl Pattern + 'static) -> Self {
        Step::Expect { device: device.to_string(), pattern: Arc::new(pattern), timeout: None }
    }

    pub fn expect_within(device: &str, pattern: impl Pattern + 'static, timeout: Duration) -> Self {
        Step::Expect {
            device: device.to_string(),
            pattern: Arc::new(pattern),
            timeout: Some(timeout),
        }
    }

    pub fn delay(duration: Duration) -> Self {
        Step::Delay(duration)
    }

    pub fn resync(device: &str) -> Self {
        Step::Resync { device: device.to_string() }
    }

    /// The device this step talks to, if any
    #[must_use]
    pub fn device(&self) -> Option<&str> {
        match self {
            Step::Write { device, .. } | Step::Expect { device, .. } | Step::Resync { device } => {
                Some(device)
            }
            Step::Delay(_) => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Write { device, command } => write!(f, "{device} <- {command}"),
            Step::Expect { device, pattern, timeout: Some(timeout) } => {
                write!(f, "{device} expects \"{pattern}\" within {timeout:?}")
            }
            Step::Expect { device, pattern, timeout: None } => {
                write!(f, "{device} expects \"{pattern}\"")
            }
            Step::Delay(duration) => write!(f, "delay {duration:?}"),
            Step::Resync { device } => write!(f, "resync {device}"),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step({self})")
    }
}

#[derive(Debug, Default)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    #[must_use]
    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    #[must_use]
    pub fn write(self, device: &str, command: &str) -> Self {
        self.step(Step::write(device, command))
    }

    #[must_use]
    pub fn expect(self, device: &str, pattern: impl Pattern + 'static) -> Self {
        self.step(Step::expect(device, pattern))
    }

    #[must_use]
    pub fn expect_within(
        self,
        device: &str,
        pattern: impl Pattern + 'static,
        timeout: Duration,
    ) -> Self {
        self.step(Step::expect_within(device, pattern, timeout))
    }

    #[must_use]
    pub fn delay(self, duration: Duration) -> Self {
        self.step(Step::delay(duration))
    }

    #[must_use]
    pub fn resync(self, device: &str) -> Self {
        self.step(Step::resync(device))
    }

    /// Every device the scenario talks to
    #[must_use]
    pub fn devices(&self) -> BTreeSet<String> {
        self.steps.iter().filter_map(Step::device).map(str::to_string).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

#[derive(Debug)]
pub enum Outcome {
    Sent,
    Matched { line: String, elapsed: Duration },
    Waited(Duration),
    Resynced,
    Failed(StepFailure),
}

#[derive(Debug)]
pub struct StepOutcome {
    /// Position of the step in the scenario, starting at 1
    pub index: usize,
    pub step: String,
    pub outcome: Outcome,
}

impl StepOutcome {
    #[must_use]
    pub fn failure(&self) -> Option<&StepFailure> {
        match &self.outcome {
            Outcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Sent => write!(f, "#{} {}: sent", self.index, self.step),
            Outcome::Matched { line, elapsed } => {
                write!(f, "#{} {}: matched \"{line}\" after {elapsed:?}", self.index, self.step)
            }
            Outcome::Waited(duration) => write!(f, "#{} waited {duration:?}", self.index),
            Outcome::Resynced => write!(f, "#{} {}: done", self.index, self.step),
            Outcome::Failed(failure) => write!(f, "#{} {}: {failure}", self.index, self.step),
        }
    }
}

/// Why a step did not succeed. Any failure aborts the rest of its scenario.
#[derive(Debug, thiserror::Error)]
pub enum StepFailure {
    #[error("{device}: {source}")]
    Expect {
        device: String,
        #[source]
        source: ExpectError,
    },
    #[error("{device}: {source}")]
    Transport {
        device: String,
        #[source]
        source: CommunicationError,
    },
    #[error("no device named {0}")]
    UnknownDevice(String),
    #[error("device {0} is not open")]
    DeviceUnavailable(String),
}

impl StepFailure {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, StepFailure::Expect { source: ExpectError::Timeout { .. }, .. })
    }

    /// Failures caused by a device going away rather than by its output
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            StepFailure::Transport { .. }
                | StepFailure::Expect { source: ExpectError::TransportIo { .. }, .. }
        )
    }
}

#[derive(Debug)]
pub struct ScenarioResult {
    pub name: String,
    /// Outcomes of the steps that ran, in order
    pub steps: Vec<StepOutcome>,
    pub total_steps: usize,
    pub verdict: Verdict,
}

impl ScenarioResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    #[must_use]
    pub fn first_failure(&self) -> Option<&StepOutcome> {
        self.steps.iter().find(|step| step.failure().is_some())
    }
}

impl fmt::Display for ScenarioResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({}/{} steps)", self.verdict, self.name, self.steps.len(), self.total_steps)?;
        if let Some(failure) = self.first_failure() {
            write!(f, ", failed at {failure}")?;
        }
        Ok(())
    }
}
