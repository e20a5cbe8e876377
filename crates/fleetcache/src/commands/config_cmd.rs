//! `fleetcache config`: inspect and initialize the configuration file.

use std::path::PathBuf;

use fleetcache_config::{Config, config_path, render_config, save_config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ConfigArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let path = resolved_path(global);
    match args.command {
        ConfigCommand::Show => {
            let rendered = render_config(config).map_err(|source| CliError::Config {
                path: path.display().to_string(),
                source,
            })?;
            output::print_output(rendered.trim_end(), global.quiet);
        }
        ConfigCommand::Path => output::print_output(&path.display().to_string(), global.quiet),
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            save_config(&Config::default(), &path).map_err(|source| CliError::Config {
                path: path.display().to_string(),
                source,
            })?;
            output::print_output(&format!("wrote {}", path.display()), global.quiet);
        }
    }
    Ok(())
}

/// `--config` when given, the platform default otherwise.
pub fn resolved_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config_path)
}
