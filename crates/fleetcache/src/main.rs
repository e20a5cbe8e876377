mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use fleetcache_config::{Config, LogSettings, load_config};

use crate::cli::{Cli, Command, ConfigCommand};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load(&cli)?;
    init_tracing(cli.global.verbose, cli.global.log_json, &config.log);

    tracing::debug!(command = ?cli.command, "dispatching command");
    commands::dispatch(&cli.command, &config, &cli.global).await
}

/// Load the layered config. `config init` must work even when the
/// existing file is broken, so it falls back to defaults.
fn load(cli: &Cli) -> Result<Config, CliError> {
    let path = commands::config_cmd::resolved_path(&cli.global);
    match (load_config(Some(&path)), &cli.command) {
        (Ok(config), _) => Ok(config),
        (Err(_), Command::Config(args)) if matches!(args.command, ConfigCommand::Init { .. }) => {
            Ok(Config::default())
        }
        (Err(source), _) => Err(CliError::Config {
            path: path.display().to_string(),
            source,
        }),
    }
}

fn init_tracing(verbosity: u8, json: bool, log: &LogSettings) {
    let filter = match verbosity {
        0 => log.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json || log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
