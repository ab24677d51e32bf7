//! Trust subcommand: validate a PEM and pin it to the active profile.

use dpmgmt_api::TrustStore;

use crate::cli::{GlobalOpts, TrustArgs, TrustCommand};
use crate::config;
use crate::error::CliError;

pub fn handle(args: TrustArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        TrustCommand::Add { pem } => {
            let text = std::fs::read_to_string(&pem)?;
            // rejects anything that is not a parseable certificate
            TrustStore::new(false)?.add_certificate(&text)?;

            let mut cfg = dpmgmt_config::load_config()?;
            let name = config::active_profile_name(global, &cfg);
            cfg.profile(&name)?;
            let path = pem.canonicalize()?;
            if let Some(profile) = cfg.profiles.get_mut(&name) {
                profile.certificate = Some(path.clone());
            }
            dpmgmt_config::save_config(&cfg)?;

            if !global.quiet {
                eprintln!("Certificate {} trusted for profile '{name}'", path.display());
            }
            Ok(())
        }
    }
}
