// ── Report service ──
//
// Ties one appliance profile to the poller and the report download.
// A profile supports one report run at a time: concurrent runs would
// share the appliance's single report file and race on its baseline.

use std::path::{Path, PathBuf};

use dpmgmt_api::{DeviceProfile, ManagementClient, TransportConfig};
use serde::Serialize;
use tracing::info;

use crate::error::CoreError;
use crate::firmware::FirmwareTier;
use crate::poller::{self, DiagnosticPoller, GenerateMode, Observer, PollConfig, ReportCompletion};

/// Local copy of a completed report.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadedReport {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Error-report workflow for a single appliance.
pub struct ReportService {
    client: ManagementClient,
    poll: PollConfig,
}

impl ReportService {
    pub fn new(client: ManagementClient, poll: PollConfig) -> Self {
        Self { client, poll }
    }

    /// Build the client from a profile and wrap it.
    pub fn connect(
        profile: DeviceProfile,
        transport: TransportConfig,
        poll: PollConfig,
    ) -> Result<Self, CoreError> {
        Ok(Self::new(ManagementClient::new(profile, transport)?, poll))
    }

    pub fn client(&self) -> &ManagementClient {
        &self.client
    }

    pub fn poll_config(&self) -> &PollConfig {
        &self.poll
    }

    pub async fn firmware_tier(&self) -> Result<FirmwareTier, CoreError> {
        poller::firmware_tier(&self.client).await
    }

    /// Generate (or, with [`GenerateMode::PollOnly`], wait for) a report.
    pub async fn generate(
        &self,
        mode: GenerateMode,
        observer: Option<Observer<'_>>,
    ) -> Result<ReportCompletion, CoreError> {
        let mut poller = DiagnosticPoller::new(&self.client, self.poll.clone());
        if let Some(observer) = observer {
            poller = poller.with_observer(observer);
        }
        let completion = poller.run(mode).await?;
        info!(
            host = %self.client.profile().host,
            location = %completion.location,
            iterations = completion.iterations,
            "error report ready"
        );
        Ok(completion)
    }

    /// Fetch a completed report. A directory `dest` receives the report
    /// under its appliance file name.
    pub async fn download(
        &self,
        completion: &ReportCompletion,
        dest: &Path,
    ) -> Result<DownloadedReport, CoreError> {
        let path = if is_dir(dest).await {
            dest.join(&completion.filename)
        } else {
            dest.to_path_buf()
        };
        let bytes = self.client.download_file(&completion.location, &path).await?;
        Ok(DownloadedReport { path, bytes })
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_dir())
}
