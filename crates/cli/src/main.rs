mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use tsload_active_load::QuarantineManager;
use tsload_core::config::load_dotenv;
use tsload_core::Config;

use crate::cli::{CliArgs, Command};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    load_dotenv();
    let args = CliArgs::parse();

    let mut config = Config::from_env();
    if let Some(fail_dir) = args.fail_dir {
        config.active_load.fail_dir = fail_dir;
    }
    config.validate().context("invalid configuration")?;

    let output = run(args.command, &config)?;
    println!("{output}");
    Ok(())
}

/// Execute one subcommand and return what should be printed.
fn run(command: Command, config: &Config) -> Result<String> {
    let quarantine = QuarantineManager::new(&config.active_load.fail_dir);

    match command {
        Command::Config => {
            config.log_summary();
            Ok(serde_json::to_string_pretty(config)?)
        }
        Command::FailedCount => {
            quarantine
                .ensure_dir()
                .with_context(|| format!("failed to create {}", quarantine.fail_dir().display()))?;
            let count = quarantine
                .count_quarantined_files()
                .context("failed to count quarantined files")?;
            info!(fail_dir = %quarantine.fail_dir().display(), count, "counted quarantined files");
            Ok(count.to_string())
        }
        Command::Quarantine { path } => {
            let report = quarantine.quarantine_with_sidecars(&path);
            let json = serde_json::to_string_pretty(&report)?;
            if report.has_failures() {
                anyhow::bail!(
                    "some files could not be moved to {}:\n{json}",
                    quarantine.fail_dir().display()
                );
            }
            Ok(json)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;

    fn config_with_fail_dir(fail_dir: &Path) -> Config {
        let fail_dir = fail_dir.to_string_lossy().into_owned();
        Config::from_lookup("", move |key| match key {
            "LOAD_ACTIVE_FAIL_DIR" => Some(fail_dir.clone()),
            _ => None,
        })
    }

    #[test]
    fn quarantine_then_count() {
        let tmp = tempfile::tempdir().unwrap();
        let fail_dir = tmp.path().join("failed");
        let config = config_with_fail_dir(&fail_dir);
        let src = tmp.path().join("bad.tsfile");
        fs::write(&src, "data").unwrap();
        fs::write(tmp.path().join("bad.tsfile.mods"), "mods").unwrap();

        let output = run(Command::Quarantine { path: src.clone() }, &config).unwrap();
        let report: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(report["entries"].as_array().unwrap().len(), 3);
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(fail_dir.join("bad.tsfile")).unwrap(), "data");

        assert_eq!(run(Command::FailedCount, &config).unwrap(), "2");
    }

    #[test]
    fn quarantine_failure_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("failed");
        fs::write(&blocker, "not a directory").unwrap();
        let src = tmp.path().join("bad.tsfile");
        fs::write(&src, "data").unwrap();

        let err = run(Command::Quarantine { path: src.clone() }, &config_with_fail_dir(&blocker)).unwrap_err();
        assert!(err.to_string().contains("could not be moved"));
        assert!(src.exists());
    }

    #[test]
    fn config_prints_resolved_fail_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let fail_dir = tmp.path().join("failed");
        let output = run(Command::Config, &config_with_fail_dir(&fail_dir)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(json["active_load"]["fail_dir"], fail_dir.to_string_lossy().as_ref());
    }
}
