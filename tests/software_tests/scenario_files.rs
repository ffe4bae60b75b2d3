use std::path::Path;

use dut_harness::{
    communication::mock::MockConnector,
    config::HarnessConfig,
    runner::EXIT_SUCCESS,
    scenario::{library::Builtin, Scenario},
};

use crate::common;

#[test]
fn pairing_file_matches_the_builtin() {
    let from_file = Scenario::load(Path::new("tests/scenarios/pairing.toml")).unwrap();
    let roles = HarnessConfig::load(Path::new("harness.toml")).unwrap().roles();
    let builtin = &Builtin::BlePairing.scenarios(&roles)[0];

    let steps = |s: &Scenario| s.steps.iter().map(ToString::to_string).collect::<Vec<_>>();
    let file_steps = steps(&from_file);
    let builtin_steps = steps(builtin);

    assert_eq!(file_steps.len(), builtin_steps.len());
    for (file, builtin) in file_steps.iter().zip(&builtin_steps) {
        if !file.contains("Created adv id") && !file.contains("within") {
            assert_eq!(file, builtin);
        }
    }
}

#[test]
fn pairing_file_runs_against_simulated_boards() {
    common::setup();
    let scenario = Scenario::load(Path::new("tests/scenarios/pairing.toml")).unwrap();
    let (peripheral, central) = common::ble_boards();
    let connector = MockConnector::new().with_device("DUT1", peripheral).with_device("DUT2", central);

    let report = common::runner(connector, &["DUT1", "DUT2"]).run(&[scenario]);

    assert_eq!(report.exit_code(), EXIT_SUCCESS, "{report}");
}

#[test]
fn shipped_configuration_is_valid() {
    let config = HarnessConfig::load(Path::new("harness.toml")).unwrap();

    assert_eq!(config.device_names(), ["DUT1", "DUT2"]);
    assert_eq!(config.devices[0].descriptor.port, "/dev/ttyAlifHEDUT1");
    assert_eq!(config.retry_policy().attempts, 3);
}

#[test]
fn shipped_scenarios_parse() {
    for entry in std::fs::read_dir("scenarios").unwrap() {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|ext| ext == "toml") {
            let scenario = Scenario::load(&path).unwrap();
            assert!(!scenario.steps.is_empty(), "{} has no steps", path.display());
        }
    }
}
