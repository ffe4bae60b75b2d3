use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::Deserialize;

use crate::{
    communication::{ConnectionDescriptor, RetryPolicy},
    expectation::DEFAULT_CAPACITY,
    scenario::library::{Roles, DEFAULT_ADV_NAME},
    session::SessionSettings,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid pattern \"{pattern}\": {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Contents of the harness configuration file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Time a board needs after the reboot command
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_reboot_command")]
    pub reboot_command: String,
    #[serde(default = "default_adv_name")]
    pub adv_name: String,
    #[serde(default = "default_history_lines")]
    pub history_lines: usize,
    /// Directory searched for `*.toml` scenario files
    #[serde(default)]
    pub scenario_dir: Option<PathBuf>,
    /// Device playing the peripheral in the built-in scenarios, the first device by default
    #[serde(default)]
    pub peripheral: Option<String>,
    /// Device playing the central in the built-in scenarios, the second device by default
    #[serde(default)]
    pub central: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(rename = "device", default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { attempts: default_attempts(), delay_ms: default_delay_ms() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(flatten)]
    pub descriptor: ConnectionDescriptor,
}

fn default_log_path() -> PathBuf {
    PathBuf::from("harness.log")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_settle_ms() -> u64 {
    1000
}

fn default_reboot_command() -> String {
    "kernel reboot cold".to_string()
}

fn default_adv_name() -> String {
    DEFAULT_ADV_NAME.to_string()
}

fn default_history_lines() -> usize {
    DEFAULT_CAPACITY
}

fn default_attempts() -> u32 {
    RetryPolicy::DEFAULT_ATTEMPTS
}

fn default_delay_ms() -> u64 {
    5000
}

impl FromStr for HarnessConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: HarnessConfig = toml::from_str(s)
            .map_err(|source| ConfigError::Parse { origin: "configuration".to_string(), source })?;
        config.validate()?;
        Ok(config)
    }
}

impl HarnessConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        text.parse().map_err(|e| match e {
            ConfigError::Parse { source, .. } => {
                ConfigError::Parse { origin: path.display().to_string(), source }
            }
            e => e,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::Invalid("at least one [[device]] is required".to_string()));
        }

        let mut names = BTreeSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(ConfigError::Invalid("device name must not be empty".to_string()));
            }
            if !names.insert(device.name.as_str()) {
                return Err(ConfigError::Invalid(format!("device {} is defined twice", device.name)));
            }
        }

        for role in [&self.peripheral, &self.central].into_iter().flatten() {
            if !names.contains(role.as_str()) {
                return Err(ConfigError::Invalid(format!("role refers to unknown device {role}")));
            }
        }

        if self.retry.attempts == 0 {
            return Err(ConfigError::Invalid("retry.attempts must be at least 1".to_string()));
        }

        self.level_filter()?;
        Ok(())
    }

    pub fn level_filter(&self) -> Result<log::LevelFilter, ConfigError> {
        log::LevelFilter::from_str(&self.log_level)
            .map_err(|_| ConfigError::Invalid(format!("unknown log level {}", self.log_level)))
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.attempts, Duration::from_millis(self.retry.delay_ms))
    }

    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            default_timeout: Duration::from_millis(self.default_timeout_ms),
            settle_delay: Duration::from_millis(self.settle_ms),
            reboot_command: self.reboot_command.clone(),
            retry: self.retry_policy(),
            history_capacity: self.history_lines,
        }
    }

    #[must_use]
    pub fn device_names(&self) -> Vec<String> {
        self.devices.iter().map(|device| device.name.clone()).collect()
    }

    /// Roles for the built-in scenarios
    #[must_use]
    pub fn roles(&self) -> Roles {
        let mut roles = Roles::from_devices(&self.device_names());
        if let Some(peripheral) = &self.peripheral {
            roles.peripheral = peripheral.clone();
        }
        if let Some(central) = &self.central {
            roles.central = central.clone();
        }
        roles.adv_name = self.adv_name.clone();
        roles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::Parity;
    use test_case::test_case;

    const TWO_BOARDS: &str = r#"
        log_level = "debug"

        [[device]]
        name = "DUT1"
        port = "/dev/ttyAlifHEDUT1"

        [[device]]
        name = "DUT2"
        port = "/dev/ttyAlifHEDUT2"
        baud_rate = 921600
        parity = "even"
    "#;

    #[test]
    fn defaults_apply() {
        let config: HarnessConfig = TWO_BOARDS.parse().unwrap();
        let settings = config.session_settings();

        assert_eq!(config.log_path, PathBuf::from("harness.log"));
        assert_eq!(config.level_filter().unwrap(), log::LevelFilter::Debug);
        assert_eq!(settings.default_timeout, Duration::from_secs(3));
        assert_eq!(settings.settle_delay, Duration::from_secs(1));
        assert_eq!(settings.reboot_command, "kernel reboot cold");
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.scenario_dir, None);
    }

    #[test]
    fn devices_carry_their_descriptor() {
        let config: HarnessConfig = TWO_BOARDS.parse().unwrap();

        assert_eq!(config.device_names(), ["DUT1", "DUT2"]);
        assert_eq!(config.devices[0].descriptor.baud_rate, 115_200);
        assert_eq!(config.devices[1].descriptor.baud_rate, 921_600);
        assert_eq!(config.devices[1].descriptor.parity, Parity::Even);
    }

    #[test]
    fn roles_default_to_device_order() {
        let config: HarnessConfig = TWO_BOARDS.parse().unwrap();
        let roles = config.roles();

        assert_eq!(roles.peripheral, "DUT1");
        assert_eq!(roles.central, "DUT2");
        assert_eq!(roles.adv_name, "zas15 ble shell");
    }

    #[test]
    fn roles_can_be_swapped() {
        let text = format!("peripheral = \"DUT2\"\ncentral = \"DUT1\"\n{TWO_BOARDS}");
        let roles = text.parse::<HarnessConfig>().unwrap().roles();

        assert_eq!((roles.peripheral.as_str(), roles.central.as_str()), ("DUT2", "DUT1"));
    }

    #[test]
    fn retry_is_configurable() {
        let text = format!("{TWO_BOARDS}\n[retry]\nattempts = 5\ndelay_ms = 200\n");
        let config: HarnessConfig = text.parse().unwrap();

        assert_eq!(config.retry_policy(), RetryPolicy::new(5, Duration::from_millis(200)));
    }

    #[test_case("log_level = \"info\"" ; "no devices")]
    #[test_case("[[device]]\nname = \"A\"\nport = \"x\"\n[[device]]\nname = \"A\"\nport = \"y\"" ; "duplicate names")]
    #[test_case("[retry]\nattempts = 0\n[[device]]\nname = \"A\"\nport = \"x\"" ; "zero attempts")]
    #[test_case("log_level = \"loud\"\n[[device]]\nname = \"A\"\nport = \"x\"" ; "unknown level")]
    #[test_case("central = \"B\"\n[[device]]\nname = \"A\"\nport = \"x\"" ; "unknown role")]
    fn invalid_configurations(text: &str) {
        assert!(matches!(text.parse::<HarnessConfig>(), Err(ConfigError::Invalid(_))));
    }

    #[test_case("[[device]]\nname = \"A\"" ; "missing port")]
    #[test_case("[[device]]\nname = \"A\"\nport = \"x\"\ndata_bits = 9" ; "bad data bits")]
    #[test_case("colour = \"blue\"\n[[device]]\nname = \"A\"\nport = \"x\"" ; "unknown key")]
    fn malformed_configurations(text: &str) {
        assert!(matches!(text.parse::<HarnessConfig>(), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            HarnessConfig::load(Path::new("tests/no-such-config.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
