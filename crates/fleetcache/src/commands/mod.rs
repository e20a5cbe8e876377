pub mod config_cmd;
pub mod replay;

use fleetcache_config::Config;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Route a parsed command to its handler.
pub async fn dispatch(cmd: &Command, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Replay(args) => replay::handle(args, config, global).await,
        Command::Config(args) => config_cmd::handle(args, config, global),
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = crate::cli::Cli::command();
            generate(args.shell, &mut cmd, "fleetcache", &mut std::io::stdout());
            Ok(())
        }
    }
}
