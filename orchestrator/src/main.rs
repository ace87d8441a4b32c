//! fleetdeploy - Entry Point
//!
//! Deploys container images to a host with rolling, blue-green, canary or
//! preview rollouts, and rolls them back from history.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use fleetdeploy::app::options::AppOptions;
use fleetdeploy::app::run::{render, run, Command};
use fleetdeploy::app::state::AppState;
use fleetdeploy::filesys::file::File;
use fleetdeploy::logs::{init_logging, LogOptions};
use fleetdeploy::storage::layout::StorageLayout;
use fleetdeploy::storage::settings::Settings;
use fleetdeploy::utils::version_info;

use tracing::{error, info};

const USAGE: &str = "\
usage: fleetdeploy <command> [--key=value ...]

commands:
  deploy          --project= --env= --version= [--strategy=rolling|blue-green|canary|preview]
                  [--image=] [--pr=] [--weight=] [--skip-healthcheck] [--force]
  promote         --project= --env= [--skip-healthcheck] [--force]
  rollback        --project= --env= [--version=] [--dry-run] [--skip-healthcheck]
  status          --project= --env=
  ports           [--project=]
  register        --file=<project.json>
  previews        [--project=]
  teardown        --project= --pr=
  sweep-previews

global flags:
  --home=<dir>        state directory (default $FLEETDEPLOY_HOME or /var/lib/fleetdeploy)
  --settings=<file>   settings file (default <home>/settings.json)
  --json              print results as JSON
  --log-files         also write daily log files under <home>/logs
  --version";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();
    let mut positional: Vec<String> = Vec::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        } else {
            positional.push(arg.clone());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") && positional.is_empty() {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("{}", e),
        }
        return ExitCode::SUCCESS;
    }

    let Some(name) = positional.first() else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };
    let command = match Command::parse(name, &cli_args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("error: {}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    // Retrieve the settings file
    let layout = match cli_args.get("home") {
        Some(home) => StorageLayout::new(home),
        None => StorageLayout::default(),
    };
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(PathBuf::from(path)),
        None => layout.settings_file(),
    };
    let settings = match settings_file.read_json_opt::<Settings>().await {
        Ok(settings) => settings.unwrap_or_default(),
        Err(e) => {
            eprintln!("Unable to read settings file: {}", e);
            return ExitCode::from(2);
        }
    };

    // Initialize logging
    let log_dir = settings.log_dir.clone().or_else(|| {
        cli_args
            .contains_key("log-files")
            .then(|| layout.logs_dir().path().to_path_buf())
    });
    let log_options = LogOptions {
        log_level: settings.log_level,
        json_format: settings.log_json,
        log_dir,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(layout, &settings);
    info!("Running fleetdeploy with options: {:?}", options);

    let state = match AppState::init(&options).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&state, command).await {
        Ok(outcome) => {
            if cli_args.contains_key("json") {
                match serde_json::to_string_pretty(&outcome) {
                    Ok(json) => println!("{}", json),
                    Err(e) => error!("Failed to serialize the result: {}", e),
                }
            } else {
                println!("{}", render(&outcome));
            }
            if outcome.success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
