use std::time::Duration;

use dut_harness::{
    communication::{
        mock::{MockConnector, MockDevice, Reply},
        ConnectionDescriptor, RetryPolicy,
    },
    runner::HarnessRunner,
    scenario::Sleeper,
    session::SessionSettings,
};

/// Makes delay steps and settle times free
pub struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

pub fn setup() {
    let _ = std::fs::create_dir("tests/tmp");
    file_per_thread_logger::allow_uninitialized();
    file_per_thread_logger::initialize("tests/tmp/log-");
}

pub fn settings() -> SessionSettings {
    SessionSettings {
        default_timeout: Duration::from_secs(2),
        retry: RetryPolicy::new(3, Duration::ZERO),
        ..SessionSettings::default()
    }
}

pub fn descriptor(port: &str) -> ConnectionDescriptor {
    ConnectionDescriptor::new(port).with_read_timeout(Duration::from_millis(20))
}

/// Runner over `devices`, each connected to the mock port of the same name
pub fn runner(connector: MockConnector, devices: &[&str]) -> HarnessRunner {
    devices
        .iter()
        .fold(HarnessRunner::new(Box::new(connector), settings()), |runner, name| {
            runner.with_device(name, descriptor(name))
        })
        .with_sleeper(Box::new(NoSleep))
}

const CONN_PARAMS: &str = "LE conn param updated: int 0x0028 lat 0 to 42";

/// Two boards running the bluetooth shell. The central finds the peripheral by name and both
/// report the connection.
pub fn ble_boards() -> (MockDevice, MockDevice) {
    let peripheral = shell_board()
        .respond("bt adv-create conn-scan", "Created adv id: 0, adv: 0x2000b2d8")
        .respond("bt adv-start", "Advertiser[0] 0x2000b2d8 set started");

    let central = shell_board()
        .respond_with("bt connect-name", vec![
            Reply::line("Connected: F0:C7:7F:A1:B2:C3 (random)"),
            Reply::line(CONN_PARAMS).after(Duration::from_millis(30)),
            Reply::on(&peripheral, "Connected: D4:3A:2E:10:20:30 (random)"),
            Reply::on(&peripheral, CONN_PARAMS).after(Duration::from_millis(30)),
        ])
        .respond("bt scan on", "Bluetooth active scan enabled")
        .respond("bt scan off", "Scan successfully stopped")
        .respond_with("bt disconnect", vec![
            Reply::line("Disconnected: F0:C7:7F:A1:B2:C3 (random) (reason 0x16)"),
            Reply::on(&peripheral, "Disconnected: D4:3A:2E:10:20:30 (random) (reason 0x13)"),
        ]);

    let peripheral = peripheral.respond_with("bt disconnect", vec![
        Reply::line("Disconnected: D4:3A:2E:10:20:30 (random) (reason 0x16)"),
        Reply::on(&central, "Disconnected: F0:C7:7F:A1:B2:C3 (random) (reason 0x13)"),
    ]);

    (peripheral, central)
}

/// A board with a working shell and bluetooth stack
pub fn shell_board() -> MockDevice {
    MockDevice::new()
        .respond("kernel reboot cold", "*** Booting Zephyr OS build v3.6.0 ***")
        .respond("help", "Available commands:")
        .respond_with("bt init", vec![
            Reply::line("Bluetooth initialized"),
            Reply::line("[00:00:00.012,000] <inf> bt_hci_core: HW Platform: Alif (0x0009)"),
        ])
}
