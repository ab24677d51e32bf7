//! Error-report command: generate (or wait), poll, download.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use dpmgmt_api::ManagementClient;
use dpmgmt_core::{
    DownloadedReport, GenerateMode, PollConfig, PollPhase, PollState, ReportCompletion,
    ReportService,
};

use crate::cli::{GlobalOpts, ReportArgs};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct ReportOutput {
    #[serde(flatten)]
    completion: ReportCompletion,
    download: Option<DownloadedReport>,
}

pub async fn handle(
    client: ManagementClient,
    mut poll: PollConfig,
    args: ReportArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if let Some(retries) = args.retries {
        poll.retry_budget = retries;
    }
    let mode = if args.poll_only {
        GenerateMode::PollOnly
    } else {
        GenerateMode::Generate
    };

    let service = ReportService::new(client, poll);
    let spinner = spinner(global);
    let observe = |state: &PollState| {
        if let Some(ref pb) = spinner {
            pb.set_message(progress_message(state));
        }
    };

    let result = service.generate(mode, Some(&observe)).await;
    if let Some(ref pb) = spinner {
        pb.finish_and_clear();
    }
    let completion = result?;

    let download = if args.no_download {
        None
    } else {
        Some(service.download(&completion, &args.save_to).await?)
    };

    let report = ReportOutput {
        completion,
        download,
    };
    let out = output::render_single(&global.output, &report, detail, |r| {
        r.download.as_ref().map_or_else(
            || r.completion.location.clone(),
            |d| d.path.display().to_string(),
        )
    });
    output::print_output(&out, global.quiet);
    Ok(())
}

fn spinner(global: &GlobalOpts) -> Option<ProgressBar> {
    if global.quiet || !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    Some(pb)
}

fn progress_message(state: &PollState) -> String {
    match state.phase {
        PollPhase::Idle | PollPhase::Baseline => "Checking firmware and current report".into(),
        PollPhase::Generating => "Requesting error report".into(),
        PollPhase::Polling => match state.current_upload {
            Some(ref upload) => format!("Waiting for report ({upload}) {}/{}", state.retries, state.budget),
            None => format!("Waiting for report {}/{}", state.retries, state.budget),
        },
        PollPhase::Done => "Report ready".into(),
        PollPhase::Failed => "Report failed".into(),
        PollPhase::TimedOut => "Gave up waiting".into(),
    }
}

fn detail(r: &ReportOutput) -> String {
    let c = &r.completion;
    let mut lines = vec![
        format!("Report:    {}", c.location),
        format!("Tier:      {}", c.tier),
        format!("Polls:     {}", c.iterations),
    ];
    if let Some(ref ts) = c.timestamp {
        lines.push(format!("Timestamp: {ts}"));
    }
    if let Some(ref d) = r.download {
        lines.push(format!("Saved to:  {} ({} bytes)", d.path.display(), d.bytes));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polling_message_shows_budget() {
        let state = PollState {
            phase: PollPhase::Polling,
            tier: None,
            baseline: None,
            retries: 3,
            budget: 60,
            current_timestamp: None,
            current_upload: Some(dpmgmt_core::UploadStatus::InProgress),
        };
        assert_eq!(progress_message(&state), "Waiting for report (in-progress) 3/60");
    }
}
