// Status queries
//
// `get-status` for a named status class, plus the typed views the report
// workflow needs: firmware version and failure notifications.

use tracing::debug;

use crate::client::ManagementClient;
use crate::envelope::{ContentKind, Request, ResponsePayload};
use crate::error::Error;
use crate::models::{FailureNotificationEntry, FirmwareVersion};

/// Failure notification status class on current firmware.
pub const FAILURE_NOTIFICATION_CLASS: &str = "FailureNotificationStatus2";
/// Older class name, used when the current one is not recognised.
pub const FAILURE_NOTIFICATION_CLASS_LEGACY: &str = "FailureNotificationStatus";

impl ManagementClient {
    /// Query a status class, e.g. `Version` or `CPUUsage`.
    ///
    /// Status providers live in the default domain unless the profile
    /// says otherwise.
    pub async fn get_status(&self, class: &str) -> Result<ResponsePayload, Error> {
        debug!(class, "querying status");
        let request = self.scoped(Request::get_status(class));
        self.exchange_payload(&request)
            .await?
            .expect_kind(ContentKind::Status)
    }

    /// Query a status class and return its payload text.
    pub async fn get_status_text(&self, class: &str) -> Result<String, Error> {
        self.get_status(class).await?.read_to_string().await
    }

    /// Firmware version from the `Version` status class.
    pub async fn firmware_version(&self) -> Result<FirmwareVersion, Error> {
        let text = self.get_status_text("Version").await?;
        let version = FirmwareVersion::from_status(&text)?;
        debug!(firmware = %version, "firmware version");
        Ok(version)
    }

    /// Failure notification entries, most recent first.
    ///
    /// Falls back to the legacy status class when the appliance answers
    /// the current one with a non-OK result.
    pub async fn failure_notifications(&self) -> Result<Vec<FailureNotificationEntry>, Error> {
        match self.get_status_text(FAILURE_NOTIFICATION_CLASS).await {
            Ok(text) => Ok(FailureNotificationEntry::parse_status(
                &text,
                FAILURE_NOTIFICATION_CLASS,
            )),
            Err(err) if err.is_bad_result() => {
                debug!(error = %err, "falling back to {FAILURE_NOTIFICATION_CLASS_LEGACY}");
                let text = self.get_status_text(FAILURE_NOTIFICATION_CLASS_LEGACY).await?;
                Ok(FailureNotificationEntry::parse_status(
                    &text,
                    FAILURE_NOTIFICATION_CLASS_LEGACY,
                ))
            }
            Err(err) => Err(err),
        }
    }
}
