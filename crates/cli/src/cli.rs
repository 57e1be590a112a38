use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Operator tooling for the active-load pipeline.
///
/// Reads the same environment (and `.env`) as the server, so paths and
/// limits match what the running loader uses.
#[derive(Parser, Debug)]
#[command(name = "tsload", version, about = "Operator tooling for active file loading")]
pub struct CliArgs {
    /// Override the fail directory from the environment.
    #[arg(long, env = "LOAD_ACTIVE_FAIL_DIR")]
    pub fail_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the resolved configuration as JSON.
    Config,

    /// Count files currently in the fail directory.
    FailedCount,

    /// Move a data file and its sidecars into the fail directory.
    Quarantine {
        /// Data file to quarantine.
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quarantine_subcommand() {
        let args = CliArgs::try_parse_from(["tsload", "quarantine", "/data/x.tsfile"]).unwrap();
        match args.command {
            Command::Quarantine { path } => assert_eq!(path, PathBuf::from("/data/x.tsfile")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn fail_dir_override() {
        let args =
            CliArgs::try_parse_from(["tsload", "--fail-dir", "/tmp/failed", "failed-count"]).unwrap();
        assert_eq!(args.fail_dir, Some(PathBuf::from("/tmp/failed")));
        assert!(matches!(args.command, Command::FailedCount));
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        CliArgs::command().debug_assert();
    }
}
