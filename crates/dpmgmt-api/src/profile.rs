// ── Device connection profile ──
//
// Everything needed to reach one appliance. Built once by the config
// layer (or a test) and treated as read-only for the rest of a session.

use secrecy::SecretString;
use url::Url;

use crate::error::Error;

/// Path of the XML management service on the appliance.
pub const MANAGEMENT_PATH: &str = "/service/mgmt/current";

/// Default XML management port.
pub const DEFAULT_PORT: u16 = 5550;

/// Connection parameters for a single appliance.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    /// Host name or IP address.
    pub host: String,
    /// XML management port.
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Extra PEM certificate to trust for this appliance.
    pub certificate_pem: Option<String>,
    /// Accept (and flag) peers whose chain does not validate.
    pub allow_untrusted: bool,
    /// Default application domain for domain-scoped requests.
    pub domain: Option<String>,
    /// Use plain HTTP instead of HTTPS. Lab appliances and tests only.
    pub insecure_http: bool,
}

impl DeviceProfile {
    /// Create a profile with the defaults used by most appliances.
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, password: SecretString) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password,
            certificate_pem: None,
            allow_untrusted: false,
            domain: None,
            insecure_http: false,
        }
    }

    /// Check the profile for values that cannot produce a connection.
    pub fn validate(&self) -> Result<(), Error> {
        if self.host.trim().is_empty() {
            return Err(Error::config("host must not be empty"));
        }
        if self.port == 0 {
            return Err(Error::config("port must be in 1..=65535"));
        }
        if self.username.is_empty() {
            return Err(Error::config("username must not be empty"));
        }
        Ok(())
    }

    /// The XML management endpoint, e.g. `https://10.0.0.1:5550/service/mgmt/current`.
    pub fn management_url(&self) -> Result<Url, Error> {
        self.validate()?;
        let scheme = if self.insecure_http { "http" } else { "https" };
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            // bare IPv6 literal
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let raw = format!("{scheme}://{host}:{}{MANAGEMENT_PATH}", self.port);
        Url::parse(&raw).map_err(|e| Error::config(format!("invalid management URL {raw}: {e}")))
    }

    /// Parse a user-supplied port, rejecting anything outside `1..=65535`.
    pub fn parse_port(raw: &str) -> Result<u16, Error> {
        let value: u32 = raw
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("port '{raw}' is not a number")))?;
        u16::try_from(value)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| Error::config(format!("port {value} is out of range (1..=65535)")))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn profile() -> DeviceProfile {
        DeviceProfile::new("10.0.0.1", 5554, "admin", SecretString::from("x".to_string()))
    }

    #[test]
    fn builds_https_management_url() {
        let url = profile().management_url().unwrap();
        assert_eq!(url.as_str(), "https://10.0.0.1:5554/service/mgmt/current");
    }

    #[test]
    fn builds_http_url_for_lab_profiles() {
        let mut p = profile();
        p.insecure_http = true;
        assert_eq!(
            p.management_url().unwrap().as_str(),
            "http://10.0.0.1:5554/service/mgmt/current"
        );
    }

    #[test]
    fn brackets_ipv6_hosts() {
        let mut p = profile();
        p.host = "fe80::1".into();
        assert_eq!(p.management_url().unwrap().host_str(), Some("[fe80::1]"));
    }

    #[test]
    fn rejects_out_of_range_ports() {
        assert_eq!(DeviceProfile::parse_port("5550").unwrap(), 5550);
        assert!(matches!(
            DeviceProfile::parse_port("70000"),
            Err(Error::Configuration { .. })
        ));
        assert!(DeviceProfile::parse_port("0").is_err());
        assert!(DeviceProfile::parse_port("abc").is_err());
    }

    #[test]
    fn rejects_zero_port_and_empty_host() {
        let mut p = profile();
        p.port = 0;
        assert!(p.validate().is_err());
        let mut p = profile();
        p.host = "  ".into();
        assert!(p.management_url().is_err());
    }
}
