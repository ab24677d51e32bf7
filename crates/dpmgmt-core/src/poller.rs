// Error-report poller
//
// Drives one report generation to completion:
//
//   Idle -> Baseline -> Generating -> Polling -> Done | Failed | TimedOut
//
// The firmware tier picks the status source. Legacy firmware is watched
// through the report file's filestore timestamp; modern firmware through
// the failure-notification log. Protocol errors from the source end the
// run and are returned unchanged.

use std::future::Future;
use std::time::Duration;

use dpmgmt_api::{FailureNotificationEntry, FirmwareVersion, ManagementClient, UploadStatus};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::firmware::{FirmwareTier, REPORT_DIRECTORY};

const AUTHENTICATION_FAILURE: &str = "Authentication failure";

// ── Status source seam ───────────────────────────────────────────────

/// What the poller needs from an appliance.
///
/// Implemented for [`ManagementClient`]; tests substitute scripted sources.
pub trait StatusSource: Send + Sync {
    fn firmware_version(&self) -> impl Future<Output = Result<FirmwareVersion, CoreError>> + Send;

    /// Filestore modification timestamp of `filename`, `None` if absent.
    fn file_timestamp(
        &self,
        location: &str,
        filename: &str,
    ) -> impl Future<Output = Result<Option<String>, CoreError>> + Send;

    /// Failure-notification entries, most recent first.
    fn failure_notifications(
        &self,
    ) -> impl Future<Output = Result<Vec<FailureNotificationEntry>, CoreError>> + Send;

    /// Trigger report generation; returns the raw result text.
    fn request_report(&self) -> impl Future<Output = Result<String, CoreError>> + Send;
}

impl StatusSource for ManagementClient {
    async fn firmware_version(&self) -> Result<FirmwareVersion, CoreError> {
        Ok(ManagementClient::firmware_version(self).await?)
    }

    async fn file_timestamp(&self, location: &str, filename: &str) -> Result<Option<String>, CoreError> {
        Ok(ManagementClient::file_timestamp(self, location, filename).await?)
    }

    async fn failure_notifications(&self) -> Result<Vec<FailureNotificationEntry>, CoreError> {
        Ok(ManagementClient::failure_notifications(self).await?)
    }

    async fn request_report(&self) -> Result<String, CoreError> {
        Ok(self.request_error_report().await?)
    }
}

/// Single capability lookup consumed by the poller and filename selection.
pub async fn firmware_tier<S: StatusSource>(source: &S) -> Result<FirmwareTier, CoreError> {
    let version = source.firmware_version().await?;
    Ok(FirmwareTier::for_version(&version))
}

// ── Poll types ───────────────────────────────────────────────────────

/// Retry budget and spacing for the polling phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    pub retry_budget: u32,
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            retry_budget: 60,
            interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PollPhase {
    Idle,
    Baseline,
    Generating,
    Polling,
    Done,
    Failed,
    TimedOut,
}

/// Whether the run asks the appliance for a new report first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateMode {
    Generate,
    /// Watch for a report something else already requested.
    PollOnly,
}

/// Snapshot of a run, handed to the observer after every transition and poll.
#[derive(Debug, Clone, Serialize)]
pub struct PollState {
    pub phase: PollPhase,
    pub tier: Option<FirmwareTier>,
    pub baseline: Option<String>,
    pub retries: u32,
    pub budget: u32,
    pub current_timestamp: Option<String>,
    pub current_upload: Option<UploadStatus>,
}

impl PollState {
    fn new(budget: u32) -> Self {
        Self {
            phase: PollPhase::Idle,
            tier: None,
            baseline: None,
            retries: 0,
            budget,
            current_timestamp: None,
            current_upload: None,
        }
    }
}

/// A report that the appliance finished writing.
#[derive(Debug, Clone, Serialize)]
pub struct ReportCompletion {
    pub tier: FirmwareTier,
    /// Poll iteration (1-based) that observed completion.
    pub iterations: u32,
    pub timestamp: Option<String>,
    /// Appliance file name to fetch, e.g. `temporary:///error-report.txt.gz`.
    pub location: String,
    /// Local file name for the download.
    pub filename: String,
    /// Log entry that reported success (modern firmware only).
    pub entry: Option<FailureNotificationEntry>,
}

enum Step {
    Continue,
    Done(Option<FailureNotificationEntry>),
    Failed(FailureNotificationEntry),
}

pub type Observer<'a> = &'a (dyn Fn(&PollState) + Send + Sync);

// ── Poller ───────────────────────────────────────────────────────────

pub struct DiagnosticPoller<'a, S> {
    source: &'a S,
    config: PollConfig,
    observer: Option<Observer<'a>>,
}

impl<'a, S: StatusSource> DiagnosticPoller<'a, S> {
    pub fn new(source: &'a S, config: PollConfig) -> Self {
        Self {
            source,
            config,
            observer: None,
        }
    }

    /// Receive a [`PollState`] snapshot after each transition and poll.
    pub fn with_observer(mut self, observer: Observer<'a>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Run to a terminal state.
    ///
    /// `Failed` and `TimedOut` are returned as `CoreError::ReportFailed`
    /// and `CoreError::ReportTimedOut`.
    pub async fn run(&self, mode: GenerateMode) -> Result<ReportCompletion, CoreError> {
        let mut state = PollState::new(self.config.retry_budget);

        self.enter(&mut state, PollPhase::Baseline);
        let version = self.source.firmware_version().await?;
        let tier = FirmwareTier::for_version(&version);
        state.tier = Some(tier);
        info!(firmware = %version, %tier, "firmware tier selected");
        state.baseline = self.baseline(tier).await?;
        debug!(baseline = ?state.baseline, "baseline recorded");

        if mode == GenerateMode::Generate {
            self.enter(&mut state, PollPhase::Generating);
            check_generate_result(self.source.request_report().await?)?;
        }

        self.enter(&mut state, PollPhase::Polling);
        while state.retries < state.budget {
            tokio::time::sleep(self.config.interval).await;
            state.retries += 1;

            let step = if tier.uses_event_log() {
                self.poll_event_log(&mut state, mode).await?
            } else {
                self.poll_timestamp(&mut state, tier).await?
            };
            debug!(
                iteration = state.retries,
                timestamp = ?state.current_timestamp,
                upload = ?state.current_upload,
                "poll"
            );
            self.notify(&state);

            match step {
                Step::Continue => {}
                Step::Done(entry) => {
                    self.enter(&mut state, PollPhase::Done);
                    return Ok(ReportCompletion {
                        tier,
                        iterations: state.retries,
                        timestamp: state.current_timestamp,
                        location: tier.report_location(),
                        filename: tier.report_filename().to_owned(),
                        entry,
                    });
                }
                Step::Failed(entry) => {
                    self.enter(&mut state, PollPhase::Failed);
                    return Err(CoreError::ReportFailed {
                        date: entry.date,
                        reason: entry.reason,
                    });
                }
            }
        }

        self.enter(&mut state, PollPhase::TimedOut);
        Err(CoreError::ReportTimedOut {
            attempts: state.retries,
        })
    }

    async fn baseline(&self, tier: FirmwareTier) -> Result<Option<String>, CoreError> {
        if tier.uses_event_log() {
            let entries = self.source.failure_notifications().await?;
            Ok(entries.into_iter().next().map(|e| e.date))
        } else {
            self.source
                .file_timestamp(REPORT_DIRECTORY, tier.report_filename())
                .await
        }
    }

    async fn poll_timestamp(&self, state: &mut PollState, tier: FirmwareTier) -> Result<Step, CoreError> {
        let current = self
            .source
            .file_timestamp(REPORT_DIRECTORY, tier.report_filename())
            .await?;
        let changed = current.is_some() && current != state.baseline;
        state.current_timestamp = current;
        Ok(if changed { Step::Done(None) } else { Step::Continue })
    }

    async fn poll_event_log(&self, state: &mut PollState, mode: GenerateMode) -> Result<Step, CoreError> {
        let entries = self.source.failure_notifications().await?;
        let Some(latest) = entries.first() else {
            return Ok(Step::Continue);
        };
        state.current_timestamp = Some(latest.date.clone());
        state.current_upload = Some(latest.upload_status.clone());

        let is_new = state.baseline.as_deref() != Some(latest.date.as_str());
        let step = match latest.upload_status {
            UploadStatus::Success if mode == GenerateMode::PollOnly || is_new => {
                Step::Done(Some(latest.clone()))
            }
            UploadStatus::InProgress => Step::Continue,
            _ => {
                // a lone failure may still be retried by the appliance
                let repeated = entries
                    .get(1)
                    .is_some_and(|prev| prev.date == latest.date && prev.is_failure());
                if latest.is_failure() && repeated {
                    Step::Failed(latest.clone())
                } else {
                    Step::Continue
                }
            }
        };
        Ok(step)
    }

    fn enter(&self, state: &mut PollState, phase: PollPhase) {
        info!(from = %state.phase, to = %phase, "report poller");
        state.phase = phase;
        self.notify(state);
    }

    fn notify(&self, state: &PollState) {
        if let Some(observer) = self.observer {
            observer(state);
        }
    }
}

fn check_generate_result(result: String) -> Result<(), CoreError> {
    if result.contains(AUTHENTICATION_FAILURE) {
        Err(dpmgmt_api::Error::AuthenticationFailure { message: result }.into())
    } else if !result.contains("OK") {
        Err(dpmgmt_api::Error::BadResult { result }.into())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    /// Scripted appliance: each list is indexed by call number, the last
    /// element repeats once the script runs out.
    struct Scripted {
        version: &'static str,
        timestamps: Vec<Option<&'static str>>,
        logs: Vec<Vec<FailureNotificationEntry>>,
        generate: &'static str,
        timestamp_calls: AtomicUsize,
        log_calls: AtomicUsize,
        generate_calls: AtomicUsize,
        fail_log_with: Mutex<Option<dpmgmt_api::Error>>,
    }

    impl Scripted {
        fn legacy(timestamps: Vec<Option<&'static str>>) -> Self {
            Self::new("XI50.3.7.3.2", timestamps, vec![vec![]])
        }

        fn modern(logs: Vec<Vec<FailureNotificationEntry>>) -> Self {
            Self::new("XI52.8.0.3", vec![None], logs)
        }

        fn new(
            version: &'static str,
            timestamps: Vec<Option<&'static str>>,
            logs: Vec<Vec<FailureNotificationEntry>>,
        ) -> Self {
            Self {
                version,
                timestamps,
                logs,
                generate: "OK",
                timestamp_calls: AtomicUsize::new(0),
                log_calls: AtomicUsize::new(0),
                generate_calls: AtomicUsize::new(0),
                fail_log_with: Mutex::new(None),
            }
        }

        fn pick<T: Clone>(script: &[T], counter: &AtomicUsize) -> T {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            script[call.min(script.len() - 1)].clone()
        }
    }

    impl StatusSource for Scripted {
        async fn firmware_version(&self) -> Result<FirmwareVersion, CoreError> {
            Ok(self.version.parse()?)
        }

        async fn file_timestamp(&self, location: &str, filename: &str) -> Result<Option<String>, CoreError> {
            assert_eq!(location, "temporary:");
            assert_eq!(filename, "error-report.txt");
            Ok(Self::pick(&self.timestamps, &self.timestamp_calls).map(str::to_owned))
        }

        async fn failure_notifications(&self) -> Result<Vec<FailureNotificationEntry>, CoreError> {
            if let Some(err) = self.fail_log_with.lock().unwrap().take() {
                return Err(err.into());
            }
            Ok(Self::pick(&self.logs, &self.log_calls))
        }

        async fn request_report(&self) -> Result<String, CoreError> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.generate.to_owned())
        }
    }

    fn entry(seq: u64, date: &str, status: &str) -> FailureNotificationEntry {
        FailureNotificationEntry {
            seq_num: seq,
            date: date.to_owned(),
            reason: "User Request".to_owned(),
            upload_status: UploadStatus::parse(status),
            location: "temporary:///error-report.txt.gz".to_owned(),
        }
    }

    const OLD: &str = "2024-03-01 09:00:00";
    const NEW: &str = "2024-03-01 10:00:00";

    #[tokio::test(start_paused = true)]
    async fn timestamp_change_on_third_poll_completes_at_three() {
        // call 0 is the baseline
        let source = Scripted::legacy(vec![Some(OLD), Some(OLD), Some(OLD), Some(NEW)]);
        let done = DiagnosticPoller::new(&source, PollConfig::default())
            .run(GenerateMode::Generate)
            .await
            .unwrap();

        assert_eq!(done.iterations, 3);
        assert_eq!(done.tier, FirmwareTier::Legacy);
        assert_eq!(done.timestamp.as_deref(), Some(NEW));
        assert_eq!(done.location, "temporary:///error-report.txt");
        assert_eq!(source.generate_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn report_appearing_where_none_existed_completes() {
        let source = Scripted::legacy(vec![None, None, Some(NEW)]);
        let done = DiagnosticPoller::new(&source, PollConfig::default())
            .run(GenerateMode::Generate)
            .await
            .unwrap();
        assert_eq!(done.iterations, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_timestamp_times_out_after_budget() {
        let source = Scripted::legacy(vec![Some(OLD)]);
        let started = tokio::time::Instant::now();
        let err = DiagnosticPoller::new(&source, PollConfig::default())
            .run(GenerateMode::Generate)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::ReportTimedOut { attempts: 60 }));
        assert_eq!(source.timestamp_calls.load(Ordering::SeqCst), 61);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn event_log_success_with_new_date_completes() {
        let source = Scripted::modern(vec![
            vec![entry(1, OLD, "success")],
            vec![entry(2, NEW, "in-progress"), entry(1, OLD, "success")],
            vec![entry(2, NEW, "success"), entry(1, OLD, "success")],
        ]);
        let done = DiagnosticPoller::new(&source, PollConfig::default())
            .run(GenerateMode::Generate)
            .await
            .unwrap();

        assert_eq!(done.tier, FirmwareTier::Modern);
        assert_eq!(done.iterations, 2);
        assert_eq!(done.filename, "error-report.txt.gz");
        assert_eq!(done.entry.unwrap().seq_num, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn old_success_is_ignored_after_generating() {
        let source = Scripted::modern(vec![vec![entry(1, OLD, "success")]]);
        let poll = PollConfig {
            retry_budget: 5,
            ..PollConfig::default()
        };
        let err = DiagnosticPoller::new(&source, poll)
            .run(GenerateMode::Generate)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ReportTimedOut { attempts: 5 }));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_only_accepts_existing_success_and_skips_generation() {
        let source = Scripted::modern(vec![vec![entry(1, OLD, "success")]]);
        let done = DiagnosticPoller::new(&source, PollConfig::default())
            .run(GenerateMode::PollOnly)
            .await
            .unwrap();
        assert_eq!(done.iterations, 1);
        assert_eq!(source.generate_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn double_failure_at_same_date_fails_early() {
        let source = Scripted::modern(vec![
            vec![],
            vec![entry(1, NEW, "in-progress")],
            vec![entry(2, NEW, "failure"), entry(1, NEW, "failure")],
        ]);
        let err = DiagnosticPoller::new(&source, PollConfig::default())
            .run(GenerateMode::Generate)
            .await
            .unwrap_err();

        match err {
            CoreError::ReportFailed { date, reason } => {
                assert_eq!(date, NEW);
                assert_eq!(reason, "User Request");
            }
            other => panic!("expected ReportFailed, got {other:?}"),
        }
        assert!(source.log_calls.load(Ordering::SeqCst) < 60);
    }

    #[tokio::test(start_paused = true)]
    async fn single_failure_keeps_polling_until_timeout() {
        let source = Scripted::modern(vec![
            vec![],
            vec![entry(2, NEW, "failure"), entry(1, OLD, "success")],
        ]);
        let poll = PollConfig {
            retry_budget: 10,
            ..PollConfig::default()
        };
        let err = DiagnosticPoller::new(&source, poll)
            .run(GenerateMode::Generate)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ReportTimedOut { attempts: 10 }));
    }

    #[tokio::test(start_paused = true)]
    async fn generation_result_is_classified() {
        let mut source = Scripted::modern(vec![vec![]]);
        source.generate = "Authentication failure";
        let err = DiagnosticPoller::new(&source, PollConfig::default())
            .run(GenerateMode::Generate)
            .await
            .unwrap_err();
        assert!(err.is_authentication_failure());

        let mut source = Scripted::modern(vec![vec![]]);
        source.generate = "Cannot create report";
        let err = DiagnosticPoller::new(&source, PollConfig::default())
            .run(GenerateMode::Generate)
            .await
            .unwrap_err();
        assert!(err.is_bad_result());
        assert_eq!(source.log_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn source_errors_pass_through_unchanged() {
        let source = Scripted::modern(vec![vec![]]);
        *source.fail_log_with.lock().unwrap() = Some(dpmgmt_api::Error::Fault {
            message: "Internal Error".into(),
        });
        let err = DiagnosticPoller::new(&source, PollConfig::default())
            .run(GenerateMode::Generate)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Api(dpmgmt_api::Error::Fault { ref message }) if message == "Internal Error"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn observer_sees_every_phase() {
        let source = Scripted::legacy(vec![None, Some(NEW)]);
        let phases = Mutex::new(Vec::new());
        let record = |state: &PollState| {
            let mut phases = phases.lock().unwrap();
            if phases.last() != Some(&state.phase) {
                phases.push(state.phase);
            }
        };
        DiagnosticPoller::new(&source, PollConfig::default())
            .with_observer(&record)
            .run(GenerateMode::Generate)
            .await
            .unwrap();

        assert_eq!(
            phases.into_inner().unwrap(),
            vec![
                PollPhase::Baseline,
                PollPhase::Generating,
                PollPhase::Polling,
                PollPhase::Done,
            ]
        );
    }

    #[tokio::test]
    async fn firmware_tier_lookup() {
        let source = Scripted::modern(vec![vec![]]);
        assert_eq!(firmware_tier(&source).await.unwrap(), FirmwareTier::Modern);
    }
}
