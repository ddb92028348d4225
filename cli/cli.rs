mod cli_args;
mod confirm;
mod output;
mod relay;
mod session;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use log;
use std::io;
use std::path::Path;
use std::process;

use cli_args::{Cli, ProjectConfigOpts, SessionOpts};
use session::{Outcome, Session};
use xask_core::Config;

fn main() {
    let cli_args = Cli::parse();

    setup_logging(cli_args.quiet, cli_args.verbose);

    log::debug!("CLI args parsed: {:?}", cli_args);

    let exit_code = match run_app(cli_args) {
        Ok(outcome) => {
            log::info!("Session finished: {:?}", outcome);
            0
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            1
        }
    };
    log::debug!("Exiting with code {}", exit_code);
    process::exit(exit_code);
}

fn setup_logging(quiet: bool, verbose: u8) {
    let log_level = if quiet {
        log::LevelFilter::Off
    } else {
        match verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();
    log::trace!("Logger initialized with level: {:?}", log_level);
}

fn run_app(cli: Cli) -> Result<Outcome> {
    let project_root = Config::determine_project_root(cli.project_config.project_root.as_ref())
        .context("Failed to determine project root")?;
    log::info!("Project root determined: {}", project_root.display());

    // Values from a project-local .env do not override the real environment.
    match dotenvy::from_path(project_root.join(".env")) {
        Ok(()) => log::debug!("Loaded environment from {}", project_root.join(".env").display()),
        Err(e) if e.not_found() => log::trace!("No .env file in project root"),
        Err(e) => log::warn!("Ignoring unreadable .env file: {}", e),
    }

    let config = load_config(&project_root, &cli.project_config, &cli.session)?;
    log::trace!("Effective config: {:?}", config);

    let mut session = Session::new(
        project_root,
        config,
        cli.session,
        cli.project_config.request,
        cli.quiet,
    );
    let stdin = io::stdin();
    session.run(stdin.lock())
}

fn load_config(
    project_root: &Path,
    project_opts: &ProjectConfigOpts,
    session_opts: &SessionOpts,
) -> Result<Config> {
    let config_path = Config::resolve_config_path(
        project_root,
        project_opts.config_file.as_ref(),
        project_opts.disable_config_file,
    )
    .context("Failed to resolve configuration path")?;

    let mut config = match &config_path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(model) = &session_opts.model {
        log::trace!("Overriding model from CLI: {}", model);
        config.api.model = model.clone();
    }
    Ok(config)
}
