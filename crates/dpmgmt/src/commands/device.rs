//! Read-only appliance commands: version, status, files, notifications.

use std::path::PathBuf;

use serde::Serialize;
use tabled::Tabled;

use dpmgmt_api::{FailureNotificationEntry, FileEntry, FirmwareVersion, ManagementClient};
use dpmgmt_core::FirmwareTier;

use crate::cli::{GetArgs, GlobalOpts, LsArgs, StatusArgs};
use crate::error::CliError;
use crate::output;

// ── Row types ────────────────────────────────────────────────────────

#[derive(Tabled)]
struct FileRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Modified")]
    modified: String,
}

impl From<&FileEntry> for FileRow {
    fn from(f: &FileEntry) -> Self {
        Self {
            name: f.name.clone(),
            size: f.size.map(|s| s.to_string()).unwrap_or_default(),
            modified: f.modified.clone().unwrap_or_default(),
        }
    }
}

#[derive(Tabled)]
struct NotificationRow {
    #[tabled(rename = "Seq")]
    seq: u64,
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Reason")]
    reason: String,
    #[tabled(rename = "Location")]
    location: String,
}

#[derive(Serialize)]
struct VersionInfo {
    firmware: FirmwareVersion,
    tier: FirmwareTier,
}

#[derive(Serialize)]
struct StatusOutput {
    class: String,
    payload: String,
}

#[derive(Serialize)]
struct Downloaded {
    file: String,
    path: PathBuf,
    bytes: u64,
}

// ── Handlers ─────────────────────────────────────────────────────────

pub async fn version(client: &ManagementClient, global: &GlobalOpts) -> Result<(), CliError> {
    let firmware = client.firmware_version().await?;
    let info = VersionInfo {
        tier: FirmwareTier::for_version(&firmware),
        firmware,
    };
    let out = output::render_single(
        &global.output,
        &info,
        |i| {
            format!(
                "Model:     {}\nFirmware:  {}\nTier:      {} (report {})",
                i.firmware.model,
                i.firmware,
                i.tier,
                i.tier.report_filename()
            )
        },
        |i| i.firmware.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn status(client: &ManagementClient, args: StatusArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let payload = client.get_status_text(&args.class).await?;
    let status = StatusOutput {
        class: args.class,
        payload,
    };
    let out = output::render_single(
        &global.output,
        &status,
        |s| s.payload.clone(),
        |s| s.payload.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn list(client: &ManagementClient, args: LsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let files = client.list_files(&args.location).await?;
    let out = output::render_list(&global.output, &files, |f| FileRow::from(f), |f| f.name.clone());
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn get(client: &ManagementClient, args: GetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = if args.dest.is_dir() {
        let name = args.file.rsplit('/').next().unwrap_or(&args.file);
        args.dest.join(name)
    } else {
        args.dest
    };
    let bytes = client.download_file(&args.file, &path).await?;
    let done = Downloaded {
        file: args.file,
        path,
        bytes,
    };
    let out = output::render_single(
        &global.output,
        &done,
        |d| format!("Saved {} ({} bytes) to {}", d.file, d.bytes, d.path.display()),
        |d| d.path.display().to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn notifications(client: &ManagementClient, global: &GlobalOpts) -> Result<(), CliError> {
    let entries = client.failure_notifications().await?;
    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &entries,
        |e: &FailureNotificationEntry| NotificationRow {
            seq: e.seq_num,
            date: e.date.clone(),
            status: output::paint_status(e.upload_status.as_str(), color),
            reason: e.reason.clone(),
            location: e.location.clone(),
        },
        |e| format!("{}\t{}\t{}", e.seq_num, e.date, e.upload_status),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
