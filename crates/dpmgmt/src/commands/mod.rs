//! Command dispatch: bridges CLI args -> client / report service -> output.

pub mod config_cmd;
pub mod device;
pub mod report;
pub mod trust;

use dpmgmt_api::ManagementClient;
use dpmgmt_core::PollConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch an appliance-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    client: ManagementClient,
    poll: PollConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Version => device::version(&client, global).await,
        Command::Status(args) => device::status(&client, args, global).await,
        Command::Ls(args) => device::list(&client, args, global).await,
        Command::Get(args) => device::get(&client, args, global).await,
        Command::Notifications => device::notifications(&client, global).await,
        Command::Report(args) => report::handle(client, poll, args, global).await,
        // Handled before a connection is resolved
        Command::Config(_) | Command::Trust(_) | Command::Completions(_) => unreachable!(),
    }
}
