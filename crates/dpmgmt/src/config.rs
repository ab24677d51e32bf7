//! CLI-side profile resolution: config file + global flag overrides,
//! translated into what the protocol and report layers consume.

use dpmgmt_api::{DEFAULT_PORT, DeviceProfile, TransportConfig};
use dpmgmt_config::{Config, ConfigError, Profile};
use dpmgmt_core::PollConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// A fully resolved appliance to talk to.
#[derive(Debug)]
pub struct Target {
    pub profile_name: String,
    pub device: DeviceProfile,
    pub transport: TransportConfig,
    pub poll: PollConfig,
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Apply global flag overrides to a profile (flag > env > profile).
pub fn apply_overrides(profile: &mut Profile, global: &GlobalOpts) {
    if let Some(ref host) = global.host {
        profile.host.clone_from(host);
    }
    if let Some(port) = global.port {
        profile.port = port;
    }
    if let Some(ref user) = global.user {
        profile.username = Some(user.clone());
    }
    if let Some(ref domain) = global.domain {
        profile.domain = Some(domain.clone());
    }
    profile.allow_untrusted |= global.allow_untrusted;
}

/// Build the target from the config file and global flags.
///
/// Without a matching profile, `--host` and `--user` alone are enough;
/// the password then comes from `DPMGMT_PASSWORD` or the keyring.
pub fn resolve_target(global: &GlobalOpts) -> Result<Target, CliError> {
    let cfg = dpmgmt_config::load_config()?;
    let profile_name = active_profile_name(global, &cfg);

    let mut profile = match cfg.profiles.get(&profile_name) {
        Some(profile) => profile.clone(),
        None if global.profile.is_some() => {
            return Err(ConfigError::ProfileNotFound {
                name: profile_name,
                available: cfg.profile_names(),
            }
            .into());
        }
        None if global.host.is_some() => Profile {
            port: DEFAULT_PORT,
            ..Profile::default()
        },
        None => {
            return Err(CliError::NoConfig {
                path: dpmgmt_config::config_path().display().to_string(),
            });
        }
    };
    apply_overrides(&mut profile, global);

    let device = dpmgmt_config::profile_to_device(&profile, &profile_name)?;
    Ok(Target {
        transport: dpmgmt_config::transport_config(&cfg.defaults, &profile),
        poll: dpmgmt_config::poll_config(&cfg.defaults),
        profile_name,
        device,
    })
}
