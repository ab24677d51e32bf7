mod cli;
mod commands;
mod config;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dpmgmt_api::ManagementClient;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    init_tracing(cli.global.verbose);

    // Dispatch and handle errors with proper exit codes
    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Local commands don't need an appliance connection
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),
        Command::Trust(args) => commands::trust::handle(args, &cli.global),

        // Shell completions generation
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "dpmgmt", &mut std::io::stdout());
            Ok(())
        }

        // All other commands talk to the appliance
        cmd => {
            let target = config::resolve_target(&cli.global)?;
            tracing::debug!(
                profile = %target.profile_name,
                host = %target.device.host,
                port = target.device.port,
                "resolved target"
            );
            let poll = target.poll;
            let client = ManagementClient::new(target.device, target.transport)?;

            tracing::debug!(command = ?cmd, "dispatching command");
            commands::dispatch(cmd, client, poll, &cli.global).await
        }
    }
}
