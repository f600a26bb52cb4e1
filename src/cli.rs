//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Data Platform Gateway - config tooling and startup checks
#[derive(Parser, Debug)]
#[command(name = "data-platform-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "DATA_PLATFORM_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "DATA_PLATFORM_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "DATA_PLATFORM_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (defaults to `check`)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Rewrite a config document to a target version
    MigrateConfig {
        /// Config file to migrate
        #[arg(required = true)]
        file: PathBuf,

        /// Target version (defaults to the current version)
        #[arg(short, long)]
        target: Option<String>,

        /// Overwrite the file instead of printing the result
        #[arg(long)]
        write: bool,
    },

    /// Load and validate the config, then show what would run
    Check,

    /// List supported config versions
    Versions,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_migrate_config() {
        let cli = Cli::parse_from([
            "data-platform-gateway",
            "migrate-config",
            "gateway.yaml",
            "--target",
            "v1",
            "--write",
        ]);
        assert_eq!(
            cli.command,
            Some(Command::MigrateConfig {
                file: PathBuf::from("gateway.yaml"),
                target: Some("v1".into()),
                write: true,
            })
        );
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "data-platform-gateway",
            "check",
            "--config",
            "platform.yaml",
            "--log-format",
            "json",
        ]);
        assert_eq!(cli.command, Some(Command::Check));
        assert_eq!(cli.config, Some(PathBuf::from("platform.yaml")));
        assert_eq!(cli.log_format.as_deref(), Some("json"));
    }
}
