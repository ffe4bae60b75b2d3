use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    str::FromStr,
};

use anyhow::{bail, Context};
use clap::Parser;
use dut_harness::{
    communication::SerialConnector,
    config::HarnessConfig,
    logging,
    runner::{HarnessRunner, EXIT_CONFIG_ERROR},
    scenario::{
        library::{Builtin, Roles},
        Scenario,
    },
};

#[derive(Parser)]
#[command(name = "dut_harness", about = "Runs test scenarios against boards on serial ports")]
#[command(version, long_about = None)]
struct Cli {
    /// Harness configuration
    #[arg(short, long, default_value = "harness.toml")]
    config: PathBuf,

    /// Built-in scenario name or path to a scenario file. Repeatable. Runs every built-in and
    /// every file in `scenario_dir` when omitted.
    #[arg(short, long = "scenario")]
    scenarios: Vec<String>,

    /// Print the built-in scenarios and exit
    #[arg(long)]
    list: bool,

    /// Log more on the terminal, twice for every received line
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.list {
        for builtin in Builtin::all() {
            println!("{:<20} {}", builtin.to_string(), builtin.description());
        }
        return ExitCode::SUCCESS;
    }

    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

/// Everything that goes wrong before the first device is touched is a configuration error
fn run(cli: &Cli) -> anyhow::Result<u8> {
    let config = HarnessConfig::load(&cli.config)?;

    let level = match cli.verbose {
        0 => config.level_filter()?,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    logging::init(level, &config.log_path)?;

    let scenarios = resolve_scenarios(&cli.scenarios, &config)?;
    let devices = config.device_names();
    for scenario in &scenarios {
        if let Some(unknown) = scenario.devices().into_iter().find(|d| !devices.contains(d)) {
            bail!("scenario {} uses device {unknown}, which is not configured", scenario.name);
        }
    }

    log::info!("Running {} scenario(s) on {}", scenarios.len(), devices.join(", "));
    let report = HarnessRunner::from_config(&config, Box::new(SerialConnector)).run(&scenarios);
    println!("{report}");
    Ok(report.exit_code())
}

fn resolve_scenarios(requested: &[String], config: &HarnessConfig) -> anyhow::Result<Vec<Scenario>> {
    let roles = config.roles();

    if requested.is_empty() {
        let mut scenarios = Builtin::defaults(&roles);
        if let Some(dir) = &config.scenario_dir {
            scenarios.extend(load_dir(dir)?);
        }
        return Ok(scenarios);
    }

    let mut scenarios = Vec::new();
    for name in requested {
        scenarios.extend(resolve_one(name, &roles)?);
    }
    Ok(scenarios)
}

fn resolve_one(name: &str, roles: &Roles) -> anyhow::Result<Vec<Scenario>> {
    if let Ok(builtin) = Builtin::from_str(name) {
        return Ok(builtin.scenarios(roles));
    }

    let path = Path::new(name);
    if !path.is_file() {
        bail!("{name} is neither a built-in scenario nor a scenario file (see --list)");
    }
    Ok(vec![Scenario::load(path)?])
}

fn load_dir(dir: &Path) -> anyhow::Result<Vec<Scenario>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("could not read scenario directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }
    paths.sort();

    paths.iter().map(|path| Ok(Scenario::load(path)?)).collect()
}
