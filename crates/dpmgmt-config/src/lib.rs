//! Shared configuration for the dpmgmt CLI.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `dpmgmt_api::DeviceProfile`, `TransportConfig`
//! and `dpmgmt_core::PollConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use dpmgmt_api::{DEFAULT_PORT, DeviceProfile, TransportConfig};
use dpmgmt_core::PollConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Keyring service name; entries are keyed `{profile}/password`.
pub const KEYRING_SERVICE: &str = "dpmgmt";

/// Environment variable consulted after a profile's own `password_env`.
pub const PASSWORD_ENV: &str = "DPMGMT_PASSWORD";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String, available: Vec<String> },

    #[error("no password configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("cannot read certificate {path}: {source}")]
    Certificate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named appliance profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                name: name.into(),
                available: self.profile_names(),
            })
    }

    pub fn profile_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Global protocol timing defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    /// Connect-phase deadline.
    #[serde(default = "default_exchange_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Deadline for the response head once the request is flushed.
    #[serde(default = "default_exchange_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Longest stall allowed while the request uploads or the body streams in.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Report polls before giving up.
    #[serde(default = "default_poll_retries")]
    pub poll_retries: u32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_exchange_timeout_ms(),
            response_timeout_ms: default_exchange_timeout_ms(),
            read_timeout_secs: default_read_timeout_secs(),
            poll_retries: default_poll_retries(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_exchange_timeout_ms() -> u64 {
    1200
}
fn default_read_timeout_secs() -> u64 {
    60
}
fn default_poll_retries() -> u32 {
    60
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_port() -> u16 {
    DEFAULT_PORT
}

/// A named appliance profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Host name or IP address.
    pub host: String,

    /// XML management port.
    #[serde(default = "default_port")]
    pub port: u16,

    pub username: Option<String>,

    /// Password (plaintext -- prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Extra PEM certificate to trust for this appliance.
    pub certificate: Option<PathBuf>,

    /// Accept peers whose chain does not validate.
    #[serde(default)]
    pub allow_untrusted: bool,

    /// Default application domain.
    pub domain: Option<String>,

    /// Plain HTTP, for lab appliances behind a terminating proxy.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insecure_http: bool,

    /// Override `defaults.connect_timeout_ms`.
    pub connect_timeout_ms: Option<u64>,

    /// Override `defaults.response_timeout_ms`.
    pub response_timeout_ms: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "dpmgmt", "dpmgmt").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("dpmgmt");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment.
///
/// `DPMGMT_`-prefixed variables override file values; nested keys use a
/// double underscore (`DPMGMT_DEFAULTS__POLL_RETRIES=120`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("DPMGMT_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve a profile's password: `password_env` → `DPMGMT_PASSWORD` →
/// system keyring → plaintext.
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    resolve_password_with(
        profile,
        profile_name,
        |name| std::env::var(name).ok(),
        |name| {
            keyring::Entry::new(KEYRING_SERVICE, &format!("{name}/password"))
                .and_then(|entry| entry.get_password())
                .ok()
        },
    )
}

fn resolve_password_with(
    profile: &Profile,
    profile_name: &str,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's password_env
    if let Some(pw) = profile.password_env.as_deref().and_then(&env) {
        return Ok(SecretString::from(pw));
    }

    // 2. Global env var
    if let Some(pw) = env(PASSWORD_ENV) {
        return Ok(SecretString::from(pw));
    }

    // 3. System keyring
    if let Some(pw) = keyring(profile_name) {
        return Ok(SecretString::from(pw));
    }

    // 4. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store a profile's password in the system keyring.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password"))
        .and_then(|entry| entry.set_password(password))
        .map_err(|e| ConfigError::Validation {
            field: "keyring".into(),
            reason: e.to_string(),
        })
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `DeviceProfile` from a profile, reading its certificate file
/// and resolving its password.
pub fn profile_to_device(profile: &Profile, profile_name: &str) -> Result<DeviceProfile, ConfigError> {
    let username = profile.username.clone().ok_or_else(|| ConfigError::NoCredentials {
        profile: profile_name.into(),
    })?;
    let password = resolve_password(profile, profile_name)?;
    device_from_parts(profile, username, password)
}

fn device_from_parts(
    profile: &Profile,
    username: String,
    password: SecretString,
) -> Result<DeviceProfile, ConfigError> {
    let mut device = DeviceProfile::new(profile.host.clone(), profile.port, username, password);
    device.allow_untrusted = profile.allow_untrusted;
    device.domain.clone_from(&profile.domain);
    device.insecure_http = profile.insecure_http;
    if let Some(ref path) = profile.certificate {
        let pem = std::fs::read_to_string(path).map_err(|source| ConfigError::Certificate {
            path: path.clone(),
            source,
        })?;
        device.certificate_pem = Some(pem);
    }

    device.validate().map_err(|e| ConfigError::Validation {
        field: "profile".into(),
        reason: e.to_string(),
    })?;
    Ok(device)
}

/// Exchange deadlines, profile overrides first.
pub fn transport_config(defaults: &Defaults, profile: &Profile) -> TransportConfig {
    TransportConfig {
        connect_timeout: Duration::from_millis(
            profile.connect_timeout_ms.unwrap_or(defaults.connect_timeout_ms),
        ),
        response_timeout: Duration::from_millis(
            profile.response_timeout_ms.unwrap_or(defaults.response_timeout_ms),
        ),
        read_timeout: Duration::from_secs(defaults.read_timeout_secs),
        ..TransportConfig::default()
    }
}

pub fn poll_config(defaults: &Defaults) -> PollConfig {
    PollConfig {
        retry_budget: defaults.poll_retries,
        interval: Duration::from_millis(defaults.poll_interval_ms),
    }
}
