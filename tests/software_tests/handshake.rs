use dut_harness::{
    communication::mock::{MockConnector, MockDevice, Reply},
    expectation::ExpectError,
    runner::{ScenarioReport, EXIT_DEVICE_FAILURE, EXIT_SCENARIO_FAILURE, EXIT_SUCCESS},
    scenario::{Scenario, StepFailure},
};

use crate::common;

fn handshake() -> Scenario {
    Scenario::new("handshake")
        .write("A", "init")
        .expect("A", "ready")
        .write("B", "init")
        .expect("B", "ready")
        .write("A", "connect B")
        .expect("A", "connected")
        .expect("B", "connected")
}

#[test]
fn two_boards_connect() {
    common::setup();
    let b = MockDevice::new().respond("init", "B ready");
    let a = MockDevice::new()
        .respond("init", "A ready")
        .respond_with("connect B", vec![Reply::line("connected"), Reply::on(&b, "connected")]);
    let connector = MockConnector::new().with_device("A", a.clone()).with_device("B", b.clone());

    let report = common::runner(connector, &["A", "B"]).run(&[handshake()]);

    assert_eq!(report.exit_code(), EXIT_SUCCESS, "{report}");
    assert_eq!(a.written(), ["init", "connect B"]);
    assert_eq!(b.written(), ["init"]);
}

#[test]
fn silent_peer_fails_at_its_expectation() {
    common::setup();
    let b = MockDevice::new().respond("init", "B ready");
    let a = MockDevice::new().respond("init", "A ready").respond("connect B", "connected");
    let connector = MockConnector::new().with_device("A", a).with_device("B", b);

    let report = common::runner(connector, &["A", "B"]).run(&[handshake()]);

    assert_eq!(report.exit_code(), EXIT_SCENARIO_FAILURE);
    let Some(ScenarioReport::Ran(result)) = report.scenario("handshake") else {
        panic!("handshake did not run: {report}");
    };
    let failed = result.first_failure().unwrap();
    assert_eq!(failed.index, 7);
    assert_eq!(failed.step, "B expects \"connected\"");
    assert!(matches!(
        failed.failure(),
        Some(StepFailure::Expect { device, source: ExpectError::Timeout { .. } }) if device == "B"
    ));
}

#[test]
fn unreachable_board_is_a_device_failure() {
    common::setup();
    let connector = MockConnector::new().with_device("B", MockDevice::new().respond("init", "B ready"));
    connector.fail_first("A", u32::MAX);

    let report = common::runner(connector, &["A", "B"]).run(&[handshake()]);

    assert_eq!(report.exit_code(), EXIT_DEVICE_FAILURE);
    assert_eq!(report.device_failures[0].device, "A");
    assert!(matches!(report.scenario("handshake"), Some(ScenarioReport::Skipped { .. })));
    assert!(report.to_string().contains("DEVICE A: could not open A"));
}

#[test]
fn flaky_port_opens_on_a_later_attempt() {
    common::setup();
    let a = MockDevice::new().respond("help", "Available commands:");
    let connector = MockConnector::new().with_device("A", a);
    connector.fail_first("A", 2);
    let probe = Scenario::new("probe").write("A", "help").expect("A", "Available commands");

    let report = common::runner(connector, &["A"]).run(&[probe]);

    assert_eq!(report.exit_code(), EXIT_SUCCESS, "{report}");
}
