use std::collections::BTreeSet;

use super::{Outcome, Scenario, ScenarioResult, Step, StepFailure, StepOutcome, Verdict};
use crate::{
    session::{DeviceSession, SessionMap, SessionState},
    sleeper::Sleeper,
};

/// Runs scenarios step by step against the sessions of a run
pub struct Orchestrator<'a> {
    sleeper: &'a dyn Sleeper,
}

impl<'a> Orchestrator<'a> {
    pub fn new(sleeper: &'a dyn Sleeper) -> Self {
        Self { sleeper }
    }

    /// Executes the steps of `scenario` strictly in order. The first failing step aborts the
    /// scenario. A write arms every other device of the scenario that is not armed yet, so that
    /// a reply on a peer arriving before its expect step is not lost. Participants start and end
    /// the scenario disarmed, so no output seen by one scenario can satisfy the next.
    pub fn run(&self, scenario: &Scenario, sessions: &mut SessionMap) -> ScenarioResult {
        log::info!("Running scenario {} ({} steps)", scenario.name, scenario.steps.len());
        let participants = scenario.devices();
        disarm(&participants, sessions);
        let mut outcomes = Vec::new();
        let mut verdict = Verdict::Pass;

        for (i, step) in scenario.steps.iter().enumerate() {
            let index = i + 1;
            log::info!("[{}] step {index}/{}: {step}", scenario.name, scenario.steps.len());

            let outcome = match self.execute(step, &participants, sessions) {
                Ok(outcome) => outcome,
                Err(failure) => {
                    log::error!("[{}] step {index} failed: {failure}", scenario.name);
                    verdict = Verdict::Fail;
                    Outcome::Failed(failure)
                }
            };
            outcomes.push(StepOutcome { index, step: step.to_string(), outcome });

            if verdict == Verdict::Fail {
                break;
            }
        }
        disarm(&participants, sessions);

        let result = ScenarioResult {
            name: scenario.name.clone(),
            steps: outcomes,
            total_steps: scenario.steps.len(),
            verdict,
        };
        match result.verdict {
            Verdict::Pass => log::info!("{result}"),
            Verdict::Fail => log::error!("{result}"),
        }
        result
    }

    fn execute(
        &self,
        step: &Step,
        participants: &BTreeSet<String>,
        sessions: &mut SessionMap,
    ) -> Result<Outcome, StepFailure> {
        match step {
            Step::Write { device, command } => {
                open_session(sessions, device)?;
                for peer in participants.iter().filter(|peer| *peer != device) {
                    if let Some(session) = sessions.get(peer) {
                        session.arm();
                    }
                }
                open_session(sessions, device)?
                    .write(command)
                    .map_err(|source| StepFailure::Transport { device: device.clone(), source })?;
                Ok(Outcome::Sent)
            }
            Step::Expect { device, pattern, timeout } => {
                let session = open_session(sessions, device)?;
                let timeout = timeout.unwrap_or(session.settings().default_timeout);
                let m = session
                    .expect_within(pattern.as_ref(), timeout)
                    .map_err(|source| StepFailure::Expect { device: device.clone(), source })?;
                Ok(Outcome::Matched { line: m.line, elapsed: m.elapsed })
            }
            Step::Delay(duration) => {
                self.sleeper.sleep(*duration);
                Ok(Outcome::Waited(*duration))
            }
            Step::Resync { device } => {
                open_session(sessions, device)?
                    .reboot_and_resync(self.sleeper)
                    .map_err(|source| StepFailure::Transport { device: device.clone(), source })?;
                Ok(Outcome::Resynced)
            }
        }
    }
}

fn disarm(participants: &BTreeSet<String>, sessions: &SessionMap) {
    for session in participants.iter().filter_map(|device| sessions.get(device)) {
        session.disarm();
    }
}

fn open_session<'s>(
    sessions: &'s mut SessionMap,
    device: &str,
) -> Result<&'s mut DeviceSession, StepFailure> {
    let session =
        sessions.get_mut(device).ok_or_else(|| StepFailure::UnknownDevice(device.to_string()))?;
    if session.state() != SessionState::Open {
        return Err(StepFailure::DeviceUnavailable(device.to_string()));
    }
    Ok(session)
}
