//! scenesync - headless driver for the scene reconciliation engine
//!
//! Runs a scripted two-participant session against the in-memory authority and
//! prints a JSON summary.

mod config;
mod headless;

use anyhow::Result;
use config::DriverConfig;
use scenesync_testkit::TestResult;
use std::{env, path::PathBuf, process::ExitCode};
use tracing::info;

fn main() -> Result<ExitCode> {
    let cli = CliOptions::parse(env::args().skip(1));
    let config = match &cli.config {
        Some(path) => DriverConfig::load_from_path(path),
        None => DriverConfig::load(),
    };

    // RUST_LOG wins; otherwise the configured filter (WARN by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.sync.log_filter)),
        )
        // stdout carries the report
        .with_writer(std::io::stderr)
        .init();

    info!("Starting scenesync v{}", env!("CARGO_PKG_VERSION"));
    for message in &cli.errors {
        tracing::error!("{message}");
    }

    if let Some(path) = &cli.write_config {
        config.save_to_path(path)?;
        info!("Wrote configuration to {}", path.display());
    }

    let report = headless::run(headless::HeadlessConfig {
        config,
        ticks: cli.ticks,
        events: cli.events,
        report: cli.report,
    })?;
    println!("{}", report.to_json()?);

    Ok(match report.result {
        TestResult::Pass => ExitCode::SUCCESS,
        TestResult::Fail => ExitCode::FAILURE,
    })
}

#[derive(Debug, Default)]
struct CliOptions {
    config: Option<PathBuf>,
    write_config: Option<PathBuf>,
    ticks: Option<u64>,
    events: Option<PathBuf>,
    report: Option<PathBuf>,
    /// Parse problems, logged once tracing is up.
    errors: Vec<String>,
}

impl CliOptions {
    fn parse<I: Iterator<Item = String>>(mut args: I) -> Self {
        let mut opts = CliOptions::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => match args.next() {
                    Some(path) => opts.config = Some(PathBuf::from(path)),
                    None => opts.errors.push("--config requires a file path".to_string()),
                },
                "--write-config" => match args.next() {
                    Some(path) => opts.write_config = Some(PathBuf::from(path)),
                    None => opts
                        .errors
                        .push("--write-config requires a file path".to_string()),
                },
                "--ticks" => match args.next() {
                    Some(raw) => match raw.parse::<u64>() {
                        Ok(value) => opts.ticks = Some(value),
                        Err(err) => opts
                            .errors
                            .push(format!("--ticks must be an integer ({raw}): {err}")),
                    },
                    None => opts.errors.push("--ticks requires an integer".to_string()),
                },
                "--events" => match args.next() {
                    Some(path) => opts.events = Some(PathBuf::from(path)),
                    None => opts.errors.push("--events requires a file path".to_string()),
                },
                "--report" => match args.next() {
                    Some(path) => opts.report = Some(PathBuf::from(path)),
                    None => opts.errors.push("--report requires a file path".to_string()),
                },
                other => opts.errors.push(format!("Unknown argument: {other}")),
            }
        }

        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliOptions {
        CliOptions::parse(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn parses_paths_and_ticks() {
        let opts = parse(&["--config", "a.toml", "--ticks", "12", "--events", "log.jsonl"]);
        assert_eq!(opts.config, Some(PathBuf::from("a.toml")));
        assert_eq!(opts.ticks, Some(12));
        assert_eq!(opts.events, Some(PathBuf::from("log.jsonl")));
        assert!(opts.report.is_none());
        assert!(opts.errors.is_empty());
    }

    #[test]
    fn bad_values_are_collected() {
        let opts = parse(&["--ticks", "many", "--bogus", "--report"]);
        assert_eq!(opts.ticks, None);
        assert_eq!(opts.errors.len(), 3);
    }
}
