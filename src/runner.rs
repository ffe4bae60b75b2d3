use std::{collections::BTreeSet, fmt};

use crate::{
    communication::{ConnectionDescriptor, ConnectionError, Connector},
    config::HarnessConfig,
    scenario::{Orchestrator, Scenario, ScenarioResult, Sleeper, ThreadSleeper},
    session::{DeviceSession, SessionMap, SessionSettings},
};

pub const EXIT_SUCCESS: u8 = 0;
/// A scenario step failed
pub const EXIT_SCENARIO_FAILURE: u8 = 1;
/// The configuration or the command line is unusable
pub const EXIT_CONFIG_ERROR: u8 = 2;
/// A device never became available. Takes precedence over scenario failures.
pub const EXIT_DEVICE_FAILURE: u8 = 99;

/// A device that could not be opened
#[derive(Debug)]
pub struct DeviceFailure {
    pub device: String,
    pub error: ConnectionError,
}

impl fmt::Display for DeviceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.device, self.error)?;
        if let Some(cause) = &self.error.last_error {
            write!(f, " ({cause})")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ScenarioReport {
    Ran(ScenarioResult),
    /// Not attempted because some of its devices are not open
    Skipped { name: String, unavailable: Vec<String> },
}

impl ScenarioReport {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            ScenarioReport::Ran(result) => &result.name,
            ScenarioReport::Skipped { name, .. } => name,
        }
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        matches!(self, ScenarioReport::Ran(result) if result.passed())
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioReport::Ran(result) => write!(f, "{result}"),
            ScenarioReport::Skipped { name, unavailable } => {
                write!(f, "SKIPPED {name} (unavailable: {})", unavailable.join(", "))
            }
        }
    }
}

/// Everything a run produced
#[derive(Debug, Default)]
pub struct HarnessReport {
    pub device_failures: Vec<DeviceFailure>,
    pub scenarios: Vec<ScenarioReport>,
}

impl HarnessReport {
    #[must_use]
    pub fn passed(&self) -> usize {
        self.scenarios.iter().filter(|s| s.passed()).count()
    }

    #[must_use]
    pub fn exit_code(&self) -> u8 {
        if !self.device_failures.is_empty() {
            EXIT_DEVICE_FAILURE
        } else if self.scenarios.iter().all(ScenarioReport::passed) {
            EXIT_SUCCESS
        } else {
            EXIT_SCENARIO_FAILURE
        }
    }

    pub fn scenario(&self, name: &str) -> Option<&ScenarioReport> {
        self.scenarios.iter().find(|s| s.name() == name)
    }
}

impl fmt::Display for HarnessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for failure in &self.device_failures {
            writeln!(f, "DEVICE {failure}")?;
        }
        for scenario in &self.scenarios {
            writeln!(f, "{scenario}")?;
        }
        write!(
            f,
            "{}/{} scenarios passed, {} device(s) unavailable",
            self.passed(),
            self.scenarios.len(),
            self.device_failures.len()
        )
    }
}

/// Opens the devices a set of scenarios needs, runs the scenarios and tears everything down
pub struct HarnessRunner {
    devices: Vec<(String, ConnectionDescriptor)>,
    settings: SessionSettings,
    connector: Box<dyn Connector>,
    sleeper: Box<dyn Sleeper>,
}

impl HarnessRunner {
    pub fn new(connector: Box<dyn Connector>, settings: SessionSettings) -> Self {
        Self { devices: Vec::new(), settings, connector, sleeper: Box::new(ThreadSleeper) }
    }

    pub fn from_config(config: &HarnessConfig, connector: Box<dyn Connector>) -> Self {
        config.devices.iter().fold(
            Self::new(connector, config.session_settings()),
            |runner, device| runner.with_device(&device.name, device.descriptor.clone()),
        )
    }

    #[must_use]
    pub fn with_device(mut self, name: &str, descriptor: ConnectionDescriptor) -> Self {
        self.devices.push((name.to_string(), descriptor));
        self
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Opens every configured device used by `scenarios`, then runs the scenarios in order.
    /// A device that cannot be opened is reported and every scenario using it is skipped,
    /// the others still run. Sessions are closed before returning.
    pub fn run(&self, scenarios: &[Scenario]) -> HarnessReport {
        let needed: BTreeSet<String> = scenarios.iter().flat_map(Scenario::devices).collect();
        let mut report = HarnessReport::default();
        let mut sessions = SessionMap::new();

        for (name, descriptor) in self.devices.iter().filter(|(name, _)| needed.contains(name)) {
            let mut session = DeviceSession::new(name, descriptor.clone(), self.settings.clone());
            match session.open(self.connector.as_ref(), self.sleeper.as_ref()) {
                Ok(()) => {
                    sessions.insert(name.clone(), session);
                }
                Err(error) => {
                    log::error!("Device {name} is unavailable: {error}");
                    report.device_failures.push(DeviceFailure { device: name.clone(), error });
                }
            }
        }

        let orchestrator = Orchestrator::new(self.sleeper.as_ref());
        for scenario in scenarios {
            let unavailable: Vec<String> = scenario
                .devices()
                .into_iter()
                .filter(|device| !sessions.contains_key(device))
                .collect();

            if unavailable.is_empty() {
                report.scenarios.push(ScenarioReport::Ran(orchestrator.run(scenario, &mut sessions)));
            } else {
                log::warn!(
                    "Skipping scenario {}, unavailable: {}",
                    scenario.name,
                    unavailable.join(", ")
                );
                report
                    .scenarios
                    .push(ScenarioReport::Skipped { name: scenario.name.clone(), unavailable });
            }
        }

        for session in sessions.values_mut() {
            session.close();
        }

        log::info!(
            "{} of {} scenarios passed, {} device(s) unavailable",
            report.passed(),
            report.scenarios.len(),
            report.device_failures.len()
        );
        report
    }
}
