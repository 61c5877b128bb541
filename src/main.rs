use clap::Parser;

use ghostpilot_cli::cli::{commands, Cli, Command};
use ghostpilot_cli::{config::GhostConfig, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(cli.json_logs, cli.log_dir.as_deref())?;
    let cfg = GhostConfig::load()?;

    match cli.command {
        Command::Run(args) => commands::run(cfg, args).await,
        Command::Pool(args) => commands::pool_status(cfg, args).await,
        Command::Version => {
            commands::version();
            Ok(())
        }
    }
}
