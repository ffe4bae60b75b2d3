//! Scenarios that ship with the harness.
//!
//! Two boards play fixed roles: the peripheral advertises under a known name and the central
//! connects to it by that name. A connection counts as established once both boards report
//! updated connection parameters.

use std::time::Duration;

use strum::IntoEnumIterator;

use super::Scenario;

pub const DEFAULT_ADV_NAME: &str = "zas15 ble shell";

/// How long a board takes to answer `help`
const SHELL_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Connection setup needs a moment before both ends report it
const LINK_SETTLE: Duration = Duration::from_secs(1);
const SCAN_DURATION: Duration = Duration::from_secs(3);

const CONNECTED: &str = "LE conn param updated";

/// Who is who in the built-in scenarios
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roles {
    pub peripheral: String,
    pub central: String,
    pub adv_name: String,
    /// Every configured device, probed one by one by [`Builtin::ShellProbe`]
    pub devices: Vec<String>,
}

impl Roles {
    /// Peripheral and central are the first and second device
    #[must_use]
    pub fn from_devices(devices: &[String]) -> Self {
        let first = devices.first().cloned().unwrap_or_else(|| "DUT1".to_string());
        let second = devices.get(1).cloned().unwrap_or_else(|| "DUT2".to_string());
        Self {
            peripheral: first,
            central: second,
            adv_name: DEFAULT_ADV_NAME.to_string(),
            devices: devices.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Builtin {
    ShellProbe,
    BlePairing,
    ClientDisconnect,
    ServerDisconnect,
    ScanAndConnect,
}

impl Builtin {
    pub fn all() -> impl Iterator<Item = Builtin> {
        Builtin::iter()
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Builtin::ShellProbe => "every board answers `help` on its shell",
            Builtin::BlePairing => "central connects to the advertising peripheral",
            Builtin::ClientDisconnect => "central drops the link, then reconnects",
            Builtin::ServerDisconnect => "peripheral drops the link, then the central reconnects",
            Builtin::ScanAndConnect => "central scans for the peripheral before connecting",
        }
    }

    /// Whether every device this entry drives is configured. The bluetooth scenarios need a
    /// peripheral and a central that are two distinct devices.
    #[must_use]
    pub fn applies_to(self, roles: &Roles) -> bool {
        let configured = |device: &String| roles.devices.contains(device);
        match self {
            Builtin::ShellProbe => !roles.devices.is_empty(),
            _ => {
                roles.peripheral != roles.central
                    && configured(&roles.peripheral)
                    && configured(&roles.central)
            }
        }
    }

    /// What a run without explicit scenario names executes: every entry that applies to `roles`
    #[must_use]
    pub fn defaults(roles: &Roles) -> Vec<Scenario> {
        Builtin::all()
            .filter(|builtin| builtin.applies_to(roles))
            .flat_map(|builtin| builtin.scenarios(roles))
            .collect()
    }

    /// The scenarios this entry expands to. The shell probe yields one scenario per device.
    #[must_use]
    pub fn scenarios(self, roles: &Roles) -> Vec<Scenario> {
        match self {
            Builtin::ShellProbe => roles.devices.iter().map(|device| shell_probe(device)).collect(),
            Builtin::BlePairing => vec![ble_pairing(roles)],
            Builtin::ClientDisconnect => vec![client_disconnect(roles)],
            Builtin::ServerDisconnect => vec![server_disconnect(roles)],
            Builtin::ScanAndConnect => vec![scan_and_connect(roles)],
        }
    }
}

/// Sends a blank line to get past anything half typed, then asks for help
pub fn shell_probe(device: &str) -> Scenario {
    Scenario::new(format!("shell_probe {device}"))
        .describe(Builtin::ShellProbe.description())
        .write(device, "")
        .write(device, "help")
        .expect_within(device, "Available commands", SHELL_PROBE_TIMEOUT)
}

fn connect_name(roles: &Roles) -> String {
    format!("bt connect-name '{}'", roles.adv_name)
}

/// Reboots the peripheral, brings up bluetooth and creates the connectable advertiser
fn peripheral_setup(scenario: Scenario, roles: &Roles) -> Scenario {
    let p = roles.peripheral.as_str();
    scenario
        .resync(p)
        .write(p, "bt init")
        .expect(p, "bt_hci_core")
        .write(p, &format!("bt name '{}'", roles.adv_name))
        .write(p, "bt adv-create conn-scan")
        .expect(p, "Created adv id")
        .write(p, "bt adv-param conn-scan name")
        .write(p, "bt adv-start")
}

fn central_setup(scenario: Scenario, roles: &Roles) -> Scenario {
    let c = roles.central.as_str();
    scenario.resync(c).write(c, "bt init").expect(c, "bt_hci_core")
}

/// Connects the central by name and waits for both sides to confirm
fn connect(scenario: Scenario, roles: &Roles, confirmation: &'static str) -> Scenario {
    scenario
        .write(&roles.central, &connect_name(roles))
        .delay(LINK_SETTLE)
        .expect(&roles.central, confirmation)
        .expect(&roles.peripheral, confirmation)
}

fn paired(name: &str, roles: &Roles) -> Scenario {
    let scenario = peripheral_setup(Scenario::new(name), roles).expect(&roles.peripheral, "Advertiser");
    connect(central_setup(scenario, roles), roles, CONNECTED)
}

pub fn ble_pairing(roles: &Roles) -> Scenario {
    paired("ble_pairing", roles).describe(Builtin::BlePairing.description())
}

pub fn client_disconnect(roles: &Roles) -> Scenario {
    let scenario = paired("client_disconnect", roles)
        .describe(Builtin::ClientDisconnect.description())
        .write(&roles.central, "bt disconnect")
        .delay(LINK_SETTLE)
        .write(&roles.peripheral, "bt adv-start")
        .delay(LINK_SETTLE * 2);
    connect(scenario, roles, CONNECTED)
}

pub fn server_disconnect(roles: &Roles) -> Scenario {
    let scenario = paired("server_disconnect", roles)
        .describe(Builtin::ServerDisconnect.description())
        .write(&roles.peripheral, "bt disconnect")
        .delay(LINK_SETTLE)
        .write(&roles.peripheral, "bt adv-start")
        .delay(LINK_SETTLE);
    connect(scenario, roles, "LE conn param updated:")
}

/// The peripheral advertises without waiting for its confirmation, the central finds it by
/// scanning first
pub fn scan_and_connect(roles: &Roles) -> Scenario {
    let c = roles.central.as_str();
    let scenario = central_setup(peripheral_setup(Scenario::new("scan_and_connect"), roles), roles)
        .describe(Builtin::ScanAndConnect.description())
        .write(c, "bt scan on")
        .delay(SCAN_DURATION)
        .write(c, "bt scan off");
    connect(scenario, roles, "LE conn param updated:")
}
