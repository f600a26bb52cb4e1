//! Data Platform Gateway - config tooling and startup checks

use std::fs;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use data_platform_gateway::{
    cli::{Cli, Command},
    config::Config,
    config_migrate,
    config_version::VersionRegistry,
    platform::planned_stages,
    setup_tracing,
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let registry = VersionRegistry::with_defaults();
    match cli.command {
        Some(Command::MigrateConfig { file, target, write }) => {
            run_migrate(&registry, &file, target.as_deref(), write)
        }
        Some(Command::Versions) => run_versions(&registry),
        Some(Command::Check) | None => run_check(&registry, cli.config.as_deref()),
    }
}

/// Print or rewrite a migrated config document
fn run_migrate(
    registry: &VersionRegistry,
    file: &Path,
    target: Option<&str>,
    write: bool,
) -> ExitCode {
    let raw = match fs::read_to_string(file) {
        Ok(raw) => raw,
        Err(e) => {
            error!(file = %file.display(), error = %e, "Failed to read config");
            return ExitCode::FAILURE;
        }
    };

    let migrated = match config_migrate::migrate(registry, &raw, target) {
        Ok(migrated) => migrated,
        Err(e) => {
            error!(file = %file.display(), error = %e, "Migration failed");
            return ExitCode::FAILURE;
        }
    };

    if !write {
        print!("{migrated}");
        return ExitCode::SUCCESS;
    }
    if migrated == raw {
        info!(file = %file.display(), "Config already at target version");
        return ExitCode::SUCCESS;
    }
    if let Err(e) = fs::write(file, migrated) {
        error!(file = %file.display(), error = %e, "Failed to write config");
        return ExitCode::FAILURE;
    }
    info!(file = %file.display(), "Config migrated");
    ExitCode::SUCCESS
}

/// List supported config versions
fn run_versions(registry: &VersionRegistry) -> ExitCode {
    for version in registry.list_supported() {
        let Some(info) = registry.get(version) else {
            continue;
        };
        if info.deprecation_message.is_empty() {
            println!("{version}\t{}", info.status);
        } else {
            println!("{version}\t{}\t{}", info.status, info.deprecation_message);
        }
    }
    ExitCode::SUCCESS
}

/// Load and validate the config, then print providers and stages
fn run_check(registry: &VersionRegistry, path: Option<&Path>) -> ExitCode {
    let config = match Config::load(path, registry) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("apiVersion: {}", config.api_version);
    println!(
        "semantic: {}{}",
        config.semantic.provider,
        instance_suffix(config.semantic.instance.as_deref())
    );
    println!(
        "query: {}{}",
        config.query.provider,
        instance_suffix(config.query.instance.as_deref())
    );
    println!(
        "storage: {}{}",
        config.storage.provider,
        instance_suffix(config.storage.instance.as_deref())
    );
    println!("sessions: {:?} (ttl {:?})", config.sessions.kind, config.sessions.ttl);

    let stages: Vec<&str> = planned_stages(&config).into_iter().map(|s| s.as_str()).collect();
    println!("pipeline: {}", stages.join(" -> "));
    ExitCode::SUCCESS
}

fn instance_suffix(instance: Option<&str>) -> String {
    match instance {
        Some(name) if !name.is_empty() => format!(" ({name})"),
        _ => String::new(),
    }
}
