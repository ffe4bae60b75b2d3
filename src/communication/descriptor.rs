use std::{fmt::Display, time::Duration};

use serde::Deserialize;

const DEFAULT_BAUD_RATE: u32 = 115_200;
const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;

/// Identifies a serial endpoint and how to talk to it. Missing fields take the usual
/// 115200 8N1 settings with a one second read timeout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionDescriptor {
    /// Device path or name, e.g. `/dev/ttyACM0`
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub stop_bits: StopBits,
    #[serde(default)]
    pub data_bits: DataBits,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

impl ConnectionDescriptor {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            data_bits: DataBits::default(),
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} {}{}{})",
            self.port,
            self.baud_rate,
            self.data_bits as u8,
            self.parity.short_name(),
            self.stop_bits as u8
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl Parity {
    fn short_name(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(value: Parity) -> Self {
        match value {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "u8")]
pub enum StopBits {
    #[default]
    One = 1,
    Two = 2,
}

impl TryFrom<u8> for StopBits {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            n => Err(format!("stop_bits must be 1 or 2, got {n}")),
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(value: StopBits) -> Self {
        match value {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "u8")]
pub enum DataBits {
    Five = 5,
    Six = 6,
    Seven = 7,
    #[default]
    Eight = 8,
}

impl TryFrom<u8> for DataBits {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            n => Err(format!("data_bits must be between 5 and 8, got {n}")),
        }
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(value: DataBits) -> Self {
        match value {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn defaults_are_115200_8n1() {
        let descriptor: ConnectionDescriptor = toml::from_str("port = \"/dev/ttyACM0\"").unwrap();

        assert_eq!(descriptor, ConnectionDescriptor::new("/dev/ttyACM0"));
        assert_eq!(descriptor.read_timeout(), Duration::from_secs(1));
        assert_eq!(descriptor.to_string(), "/dev/ttyACM0 (115200 8N1)");
    }

    #[test]
    fn fields_can_be_overridden() {
        let descriptor: ConnectionDescriptor = toml::from_str(
            "
            port = \"COM3\"
            baud_rate = 921600
            parity = \"even\"
            stop_bits = 2
            data_bits = 7
            read_timeout_ms = 250
            ",
        )
        .unwrap();

        assert_eq!(descriptor.baud_rate, 921_600);
        assert_eq!(descriptor.parity, Parity::Even);
        assert_eq!(descriptor.stop_bits, StopBits::Two);
        assert_eq!(descriptor.data_bits, DataBits::Seven);
        assert_eq!(descriptor.read_timeout(), Duration::from_millis(250));
    }

    #[test_case("stop_bits = 3")]
    #[test_case("data_bits = 9")]
    #[test_case("parity = \"mark\"")]
    fn invalid_line_settings_are_rejected(line: &str) {
        let source = format!("port = \"COM3\"\n{line}");
        assert!(toml::from_str::<ConnectionDescriptor>(&source).is_err());
    }
}
