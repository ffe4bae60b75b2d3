use std::{path::Path, sync::Arc, time::Duration};

use serde::Deserialize;

use super::{Scenario, Step};
use crate::{config::ConfigError, expectation::Pattern};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioDef {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "step", default)]
    steps: Vec<StepDef>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum StepDef {
    Write {
        device: String,
        command: String,
    },
    /// Exactly one of `contains` and `regex` must be given
    Expect {
        device: String,
        contains: Option<String>,
        regex: Option<String>,
        timeout_ms: Option<u64>,
    },
    Delay {
        ms: u64,
    },
    Resync {
        device: String,
    },
}

impl StepDef {
    fn into_step(self, index: usize) -> Result<Step, ConfigError> {
        Ok(match self {
            StepDef::Write { device, command } => Step::Write { device, command },
            StepDef::Expect { device, contains, regex, timeout_ms } => {
                let timeout = timeout_ms.map(Duration::from_millis);
                let pattern: Arc<dyn Pattern> = match (contains, regex) {
                    (Some(text), None) => Arc::new(text),
                    (None, Some(expr)) => match regex::Regex::new(&expr) {
                        Ok(regex) => Arc::new(regex),
                        Err(source) => return Err(ConfigError::Pattern { pattern: expr, source }),
                    },
                    _ => {
                        return Err(ConfigError::Invalid(format!(
                            "step {index}: expect needs exactly one of `contains` and `regex`"
                        )))
                    }
                };
                Step::Expect { device, pattern, timeout }
            }
            StepDef::Delay { ms } => Step::Delay(Duration::from_millis(ms)),
            StepDef::Resync { device } => Step::Resync { device },
        })
    }
}

impl Scenario {
    /// Parses a scenario written as TOML. `origin` names the source in error messages.
    ///
    /// ```toml
    /// name = "probe"
    ///
    /// [[step]]
    /// action = "write"
    /// device = "DUT1"
    /// command = "help"
    ///
    /// [[step]]
    /// action = "expect"
    /// device = "DUT1"
    /// contains = "Available commands"
    /// timeout_ms = 2000
    /// ```
    pub fn from_toml_str(origin: &str, text: &str) -> Result<Self, ConfigError> {
        let def: ScenarioDef = toml::from_str(text)
            .map_err(|source| ConfigError::Parse { origin: origin.to_string(), source })?;

        if def.name.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("{origin}: scenario name is empty")));
        }

        let steps = def
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, step)| step.into_step(i + 1))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Scenario { name: def.name, description: def.description, steps })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&path.display().to_string(), &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const PAIRING: &str = r#"
        name = "pairing"
        description = "two boards find each other"

        [[step]]
        action = "resync"
        device = "DUT1"

        [[step]]
        action = "write"
        device = "DUT1"
        command = "bt init"

        [[step]]
        action = "expect"
        device = "DUT1"
        contains = "bt_hci_core"

        [[step]]
        action = "delay"
        ms = 1000

        [[step]]
        action = "expect"
        device = "DUT2"
        regex = 'LE conn param updated: int 0x[0-9a-f]+'
        timeout_ms = 5000
    "#;

    #[test]
    fn parses_every_action() {
        let scenario = Scenario::from_toml_str("pairing.toml", PAIRING).unwrap();

        assert_eq!(scenario.name, "pairing");
        assert_eq!(scenario.description, "two boards find each other");
        let steps: Vec<String> = scenario.steps.iter().map(ToString::to_string).collect();
        assert_eq!(steps, [
            "resync DUT1",
            "DUT1 <- bt init",
            "DUT1 expects \"bt_hci_core\"",
            "delay 1s",
            "DUT2 expects \"LE conn param updated: int 0x[0-9a-f]+\" within 5s",
        ]);
    }

    #[test]
    fn regex_steps_match_by_regex() {
        let scenario = Scenario::from_toml_str("pairing.toml", PAIRING).unwrap();
        let Some(Step::Expect { pattern, .. }) = scenario.steps.last() else {
            panic!("last step is not an expectation");
        };

        assert!(pattern.matches("LE conn param updated: int 0x0028 lat 0 to 42"));
        assert!(!pattern.matches("LE conn param updated: int 0xZZ"));
    }

    #[test_case("action = \"expect\"\ndevice = \"A\"" ; "no pattern")]
    #[test_case("action = \"expect\"\ndevice = \"A\"\ncontains = \"x\"\nregex = \"x\"" ; "both patterns")]
    fn expect_needs_exactly_one_pattern(step: &str) {
        let text = format!("name = \"bad\"\n[[step]]\n{step}\n");
        assert!(matches!(Scenario::from_toml_str("bad.toml", &text), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_regex_is_rejected_at_load_time() {
        let text = "name = \"bad\"\n[[step]]\naction = \"expect\"\ndevice = \"A\"\nregex = \"(\"\n";
        assert!(matches!(
            Scenario::from_toml_str("bad.toml", text),
            Err(ConfigError::Pattern { pattern, .. }) if pattern == "("
        ));
    }

    #[test_case("name = \"x\"\n[[step]]\naction = \"jump\"" ; "unknown action")]
    #[test_case("[[step]]\naction = \"delay\"\nms = 1" ; "missing name")]
    #[test_case("name = \"x\"\nsteps = 3" ; "unknown key")]
    fn malformed_files_are_parse_errors(text: &str) {
        assert!(matches!(Scenario::from_toml_str("x.toml", text), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        assert!(matches!(
            Scenario::load(Path::new("tests/does-not-exist.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
