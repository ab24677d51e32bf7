// End-to-end report runs against a wiremock appliance.
//
// Intervals are real (and short): paused time would also fast-forward the
// transport deadlines.
#![allow(clippy::unwrap_used)]

use std::sync::Mutex;
use std::time::Duration;

use secrecy::SecretString;
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dpmgmt_api::codec;
use dpmgmt_core::{
    CoreError, DeviceProfile, FirmwareTier, GenerateMode, PollConfig, PollPhase, PollState,
    ReportService, TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

const OLD: &str = "2024-03-01 09:00:00";
const NEW: &str = "2024-03-01 10:00:00";

fn envelope(inner: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <env:Envelope xmlns:env=\"http://schemas.xmlsoap.org/soap/envelope/\"><env:Body>\
         <dp:response xmlns:dp=\"http://www.datapower.com/schemas/management\">{inner}</dp:response>\
         </env:Body></env:Envelope>"
    )
}

fn xml(inner: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/xml")
        .set_body_string(envelope(inner))
}

fn version_status(version: &str) -> String {
    format!("<dp:status><Version><Version>{version}</Version></Version></dp:status>")
}

fn filestore(modified: &str) -> String {
    format!(
        "<dp:filestore><location name=\"temporary:\">\
         <file name=\"error-report.txt\"><size>2048</size><modified>{modified}</modified></file>\
         </location></dp:filestore>"
    )
}

fn notification(seq: u32, date: &str, status: &str) -> String {
    format!(
        "<FailureNotificationStatus2><SeqNum>{seq}</SeqNum><Date>{date}</Date>\
         <Reason>User Request</Reason><UploadStatus>{status}</UploadStatus>\
         <Location>temporary:///error-report.txt.gz</Location></FailureNotificationStatus2>"
    )
}

fn notifications(entries: &[String]) -> String {
    format!("<dp:status>{}</dp:status>", entries.concat())
}

fn poll(retry_budget: u32) -> PollConfig {
    PollConfig {
        retry_budget,
        interval: Duration::from_millis(10),
    }
}

fn service(server: &MockServer, poll: PollConfig) -> ReportService {
    let addr = server.address();
    let mut profile = DeviceProfile::new(
        addr.ip().to_string(),
        addr.port(),
        "admin",
        SecretString::from("secret".to_string()),
    );
    profile.insecure_http = true;
    let transport = TransportConfig {
        connect_timeout: Duration::from_secs(5),
        response_timeout: Duration::from_secs(5),
        ..TransportConfig::default()
    };
    ReportService::connect(profile, transport, poll).unwrap()
}

async fn mount_version(server: &MockServer, version: &str) {
    Mock::given(method("POST"))
        .and(body_string_contains("class=\"Version\""))
        .respond_with(xml(&version_status(version)))
        .mount(server)
        .await;
}

async fn mount_generate(server: &MockServer, result: &str, expected: u64) {
    Mock::given(method("POST"))
        .and(body_string_contains("<RedirectToTemporary>on</RedirectToTemporary>"))
        .respond_with(xml(&format!("<dp:result>{result}</dp:result>")))
        .expect(expected)
        .mount(server)
        .await;
}

// ── Legacy firmware ─────────────────────────────────────────────────

#[tokio::test]
async fn test_legacy_report_detected_by_timestamp_and_downloaded() {
    let server = MockServer::start().await;
    mount_version(&server, "XI50.3.7.3.2").await;
    mount_generate(&server, "OK", 1).await;

    // baseline and the first poll see the old file
    Mock::given(method("POST"))
        .and(body_string_contains("<dp:get-filestore location=\"temporary:\"/>"))
        .respond_with(xml(&filestore(OLD)))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("<dp:get-filestore location=\"temporary:\"/>"))
        .respond_with(xml(&filestore(NEW)))
        .mount(&server)
        .await;

    let report = b"Error report generated\n".repeat(20);
    Mock::given(method("POST"))
        .and(body_string_contains(
            "<dp:get-file name=\"temporary:///error-report.txt\"/>",
        ))
        .respond_with(xml(&format!(
            "<dp:file name=\"temporary:///error-report.txt\">{}</dp:file>",
            codec::encode(&report)
        )))
        .expect(1)
        .mount(&server)
        .await;

    let service = service(&server, poll(10));
    assert_eq!(service.firmware_tier().await.unwrap(), FirmwareTier::Legacy);

    let completion = service.generate(GenerateMode::Generate, None).await.unwrap();
    assert_eq!(completion.iterations, 2);
    assert_eq!(completion.timestamp.as_deref(), Some(NEW));

    let dir = tempfile::tempdir().unwrap();
    let downloaded = service.download(&completion, dir.path()).await.unwrap();
    assert_eq!(downloaded.path, dir.path().join("error-report.txt"));
    assert_eq!(downloaded.bytes, report.len() as u64);
    assert_eq!(std::fs::read(&downloaded.path).unwrap(), report);
}

#[tokio::test]
async fn test_legacy_report_times_out_when_file_never_changes() {
    let server = MockServer::start().await;
    mount_version(&server, "XI50.3.7.3.2").await;
    mount_generate(&server, "OK", 1).await;
    Mock::given(method("POST"))
        .and(body_string_contains("<dp:get-filestore"))
        .respond_with(xml(&filestore(OLD)))
        .expect(4)
        .mount(&server)
        .await;

    let err = service(&server, poll(3))
        .generate(GenerateMode::Generate, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ReportTimedOut { attempts: 3 }), "{err:?}");
}

// ── Modern firmware ─────────────────────────────────────────────────

#[tokio::test]
async fn test_modern_report_detected_by_event_log() {
    let server = MockServer::start().await;
    mount_version(&server, "XI52.8.0.3").await;
    mount_generate(&server, "OK", 1).await;

    Mock::given(method("POST"))
        .and(body_string_contains("class=\"FailureNotificationStatus2\""))
        .respond_with(xml(&notifications(&[notification(1, OLD, "success")])))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("class=\"FailureNotificationStatus2\""))
        .respond_with(xml(&notifications(&[
            notification(1, OLD, "success"),
            notification(2, NEW, "success"),
        ])))
        .mount(&server)
        .await;

    let report = vec![0x1f, 0x8b, 0x08, 0x00, 0xde, 0xad, 0xbe, 0xef];
    Mock::given(method("POST"))
        .and(body_string_contains(
            "<dp:get-file name=\"temporary:///error-report.txt.gz\"/>",
        ))
        .respond_with(xml(&format!(
            "<dp:file name=\"temporary:///error-report.txt.gz\">{}</dp:file>",
            codec::encode(&report)
        )))
        .mount(&server)
        .await;

    let phases = Mutex::new(Vec::new());
    let observe = |state: &PollState| phases.lock().unwrap().push(state.phase);

    let service = service(&server, poll(10));
    let completion = service
        .generate(GenerateMode::Generate, Some(&observe))
        .await
        .unwrap();
    assert_eq!(completion.tier, FirmwareTier::Modern);
    assert_eq!(completion.iterations, 1);
    assert_eq!(completion.entry.as_ref().unwrap().seq_num, 2);
    assert_eq!(phases.lock().unwrap().last(), Some(&PollPhase::Done));

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("appliance-report.gz");
    let downloaded = service.download(&completion, &dest).await.unwrap();
    assert_eq!(downloaded.path, dest);
    assert_eq!(std::fs::read(&dest).unwrap(), report);
}

#[tokio::test]
async fn test_modern_repeated_failure_fails_early() {
    let server = MockServer::start().await;
    mount_version(&server, "XI52.8.0.3").await;
    mount_generate(&server, "OK", 1).await;

    Mock::given(method("POST"))
        .and(body_string_contains("class=\"FailureNotificationStatus2\""))
        .respond_with(xml("<dp:status/>"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("class=\"FailureNotificationStatus2\""))
        .respond_with(xml(&notifications(&[
            notification(3, NEW, "failure"),
            notification(4, NEW, "failure"),
        ])))
        .mount(&server)
        .await;

    let err = service(&server, poll(50))
        .generate(GenerateMode::Generate, None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, CoreError::ReportFailed { ref date, .. } if date == NEW),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_poll_only_never_requests_generation() {
    let server = MockServer::start().await;
    mount_version(&server, "XI52.8.0.3").await;
    mount_generate(&server, "OK", 0).await;
    Mock::given(method("POST"))
        .and(body_string_contains("class=\"FailureNotificationStatus2\""))
        .respond_with(xml(&notifications(&[notification(7, OLD, "success")])))
        .mount(&server)
        .await;

    let completion = service(&server, poll(5))
        .generate(GenerateMode::PollOnly, None)
        .await
        .unwrap();
    assert_eq!(completion.iterations, 1);
    assert_eq!(completion.filename, "error-report.txt.gz");
}

#[tokio::test]
async fn test_generation_rejected_by_appliance() {
    let server = MockServer::start().await;
    mount_version(&server, "XI52.8.0.3").await;
    mount_generate(&server, "Authentication failure", 1).await;
    Mock::given(method("POST"))
        .and(body_string_contains("class=\"FailureNotificationStatus2\""))
        .respond_with(xml("<dp:status/>"))
        .expect(1)
        .mount(&server)
        .await;

    let err = service(&server, poll(5))
        .generate(GenerateMode::Generate, None)
        .await
        .unwrap_err();
    assert!(err.is_authentication_failure(), "{err:?}");
}
