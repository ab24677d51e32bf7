// dpmgmt-core: error-report workflow on top of dpmgmt-api.

pub mod error;
pub mod firmware;
pub mod poller;
pub mod report;

// ── Primary re-exports ──────────────────────────────────────────────
pub use error::CoreError;
pub use firmware::{FirmwareTier, MODERN_FIRMWARE, REPORT_DIRECTORY};
pub use poller::{
    DiagnosticPoller, GenerateMode, Observer, PollConfig, PollPhase, PollState, ReportCompletion,
    StatusSource, firmware_tier,
};
pub use report::{DownloadedReport, ReportService};

// Protocol types consumers need alongside the service.
pub use dpmgmt_api::{
    DeviceProfile, FailureNotificationEntry, FirmwareVersion, ManagementClient, TransportConfig,
    TrustCache, UploadStatus,
};
