use dut_harness::{
    communication::mock::{MockConnector, MockDevice},
    runner::{EXIT_SCENARIO_FAILURE, EXIT_SUCCESS},
    scenario::library::{Builtin, Roles},
};
use test_case::test_case;

use crate::common;

fn roles() -> Roles {
    Roles::from_devices(&["DUT1".to_string(), "DUT2".to_string()])
}

fn two_boards() -> (MockConnector, MockDevice, MockDevice) {
    let (peripheral, central) = common::ble_boards();
    let connector = MockConnector::new()
        .with_device("DUT1", peripheral.clone())
        .with_device("DUT2", central.clone());
    (connector, peripheral, central)
}

#[test_case(Builtin::ShellProbe)]
#[test_case(Builtin::BlePairing)]
#[test_case(Builtin::ClientDisconnect)]
#[test_case(Builtin::ServerDisconnect)]
#[test_case(Builtin::ScanAndConnect)]
fn passes_against_working_boards(builtin: Builtin) {
    common::setup();
    let (connector, _, _) = two_boards();

    let report = common::runner(connector, &["DUT1", "DUT2"]).run(&builtin.scenarios(&roles()));

    assert_eq!(report.exit_code(), EXIT_SUCCESS, "{report}");
}

#[test]
fn pairing_drives_both_boards_in_order() {
    common::setup();
    let (connector, peripheral, central) = two_boards();

    common::runner(connector, &["DUT1", "DUT2"]).run(&Builtin::BlePairing.scenarios(&roles()));

    assert_eq!(peripheral.written(), [
        "kernel reboot cold",
        "bt init",
        "bt name 'zas15 ble shell'",
        "bt adv-create conn-scan",
        "bt adv-param conn-scan name",
        "bt adv-start",
    ]);
    assert_eq!(central.written(), [
        "kernel reboot cold",
        "bt init",
        "bt connect-name 'zas15 ble shell'",
    ]);
}

#[test]
fn pairing_fails_when_the_peripheral_never_advertises() {
    common::setup();
    let peripheral = common::shell_board().respond("bt adv-create conn-scan", "Created adv id: 0");
    let (_, central) = common::ble_boards();
    let connector =
        MockConnector::new().with_device("DUT1", peripheral).with_device("DUT2", central.clone());

    let report =
        common::runner(connector, &["DUT1", "DUT2"]).run(&Builtin::BlePairing.scenarios(&roles()));

    assert_eq!(report.exit_code(), EXIT_SCENARIO_FAILURE);
    assert!(report.to_string().contains("DUT1 expects \"Advertiser\""), "{report}");
    assert!(central.written().is_empty());
}

#[test]
fn shell_probe_reports_each_board() {
    common::setup();
    let connector = MockConnector::new()
        .with_device("DUT1", common::shell_board())
        .with_device("DUT2", MockDevice::new());

    let report =
        common::runner(connector, &["DUT1", "DUT2"]).run(&Builtin::ShellProbe.scenarios(&roles()));

    assert_eq!(report.exit_code(), EXIT_SCENARIO_FAILURE);
    assert!(report.scenario("shell_probe DUT1").unwrap().passed());
    assert!(!report.scenario("shell_probe DUT2").unwrap().passed());
}
