// Actions, configuration, backup and export/import
//
// Bodies are opaque XML fragments supplied by the caller; only the
// well-known actions get typed helpers.

use std::path::Path;

use tracing::{debug, info};

use crate::client::ManagementClient;
use crate::codec;
use crate::envelope::{ContentKind, Request, ResponsePayload};
use crate::envelope::request::escape;
use crate::error::Error;

/// Error-report action, written to `temporary:` on the appliance.
pub const GENERATE_ERROR_REPORT: &str =
    "<ErrorReport><RedirectToTemporary>on</RedirectToTemporary></ErrorReport>";

/// Persist the running configuration of the scoped domain.
pub const SAVE_CONFIG: &str = "<SaveConfig/>";

impl ManagementClient {
    /// Run a `do-action` fragment and require an `OK` result.
    pub async fn do_action(&self, body: &str) -> Result<(), Error> {
        debug!(action = body, "running action");
        let request = self.scoped(Request::do_action(body));
        self.exchange_ok(&request).await
    }

    /// Ask the appliance to write a fresh error report. Returns the raw
    /// result text so callers can classify it themselves.
    pub async fn request_error_report(&self) -> Result<String, Error> {
        info!(host = %self.profile().host, "requesting error report");
        let request = Request::do_action(GENERATE_ERROR_REPORT).in_domain("default");
        self.exchange_result(&request).await
    }

    /// Save the running configuration.
    pub async fn save_config(&self) -> Result<(), Error> {
        self.do_action(SAVE_CONFIG).await
    }

    /// Fetch configuration objects of `class`, optionally a single `name`.
    pub async fn get_config(&self, class: &str, name: Option<&str>) -> Result<ResponsePayload, Error> {
        debug!(class, name, "fetching configuration");
        let request = self.scoped(Request::get_config(class, name));
        self.exchange_payload(&request)
            .await?
            .expect_kind(ContentKind::Config)
    }

    pub async fn set_config(&self, body: &str) -> Result<(), Error> {
        self.exchange_ok(&self.scoped(Request::set_config(body))).await
    }

    pub async fn modify_config(&self, body: &str) -> Result<(), Error> {
        self.exchange_ok(&self.scoped(Request::modify_config(body))).await
    }

    pub async fn del_config(&self, body: &str) -> Result<(), Error> {
        self.exchange_ok(&self.scoped(Request::del_config(body))).await
    }

    /// Back up `domains` (all domains when empty) and decode the archive
    /// into `dest`. Returns the archive size.
    pub async fn do_backup(&self, format: &str, domains: &[&str], dest: &Path) -> Result<u64, Error> {
        info!(format, domains = domains.len(), "requesting backup");
        let bytes = self
            .exchange_payload(&Request::do_backup(format, domain_selection(domains)))
            .await?
            .expect_kind(ContentKind::Backup)?
            .decode_element_to(ContentKind::File.element(), dest)
            .await?;
        info!(dest = %dest.display(), bytes, "backup saved");
        Ok(bytes)
    }

    /// Export objects selected by `body` (an opaque `dp:object` / domain
    /// selection). The payload holds the export package.
    pub async fn do_export(&self, format: &str, body: &str) -> Result<ResponsePayload, Error> {
        info!(format, "requesting export");
        self.exchange_payload(&self.scoped(Request::do_export(format, body)))
            .await?
            .expect_kind(ContentKind::Export)
    }

    /// Import a base64-encoded package. The payload carries the
    /// per-object import results.
    pub async fn do_import(&self, source_type: &str, package: &[u8]) -> Result<ResponsePayload, Error> {
        info!(source_type, bytes = package.len(), "importing package");
        let body = format!("<dp:input-file>{}</dp:input-file>", codec::encode(package));
        self.exchange_payload(&self.scoped(Request::do_import(source_type, body)))
            .await?
            .expect_kind(ContentKind::Import)
    }

    /// Fetch a log target's content, the default log when `name` is `None`.
    pub async fn get_log(&self, name: Option<&str>) -> Result<ResponsePayload, Error> {
        debug!(name, "fetching log");
        self.exchange_payload(&self.scoped(Request::get_log(name)))
            .await?
            .expect_kind(ContentKind::Log)
    }
}

fn domain_selection(domains: &[&str]) -> String {
    if domains.is_empty() {
        "<dp:domain name=\"all-domains\"/>".to_owned()
    } else {
        domains
            .iter()
            .map(|d| format!("<dp:domain name=\"{}\"/>", escape(d)))
            .collect()
    }
}
