// Firmware tier selection
//
// Older firmware writes a plain-text report and has no failure-notification
// log; the poller must watch the report file's timestamp instead. Newer
// firmware compresses the report and logs every generation attempt.

use dpmgmt_api::FirmwareVersion;
use serde::Serialize;

/// First firmware level with the failure-notification log.
pub const MODERN_FIRMWARE: (u32, u32, u32) = (3, 8, 1);

/// Filestore location reports are redirected to.
pub const REPORT_DIRECTORY: &str = "temporary:";

/// Firmware capability class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FirmwareTier {
    /// Below 3.8.1: timestamp polling, `error-report.txt`.
    Legacy,
    /// 3.8.1 and later: event-log polling, `error-report.txt.gz`.
    Modern,
}

impl FirmwareTier {
    pub fn for_version(version: &FirmwareVersion) -> Self {
        let (v, r, m) = MODERN_FIRMWARE;
        if version.check_version_or_later(v, r, m) {
            Self::Modern
        } else {
            Self::Legacy
        }
    }

    /// Report file name inside [`REPORT_DIRECTORY`].
    pub fn report_filename(self) -> &'static str {
        match self {
            Self::Legacy => "error-report.txt",
            Self::Modern => "error-report.txt.gz",
        }
    }

    /// Full appliance file name of the report, for `get-file`.
    pub fn report_location(self) -> String {
        format!("{REPORT_DIRECTORY}///{}", self.report_filename())
    }

    /// Whether completion is read from the failure-notification log.
    pub fn uses_event_log(self) -> bool {
        matches!(self, Self::Modern)
    }
}
