// Typed views over management payloads
//
// Payloads are scanned with the tag helpers in `payload` rather than
// deserialised: the appliance's element sets vary by firmware, and only a
// few fields of each status class are needed.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::error::Error;
use crate::payload::{self, Element};

// ── Firmware version ─────────────────────────────────────────────────

/// Firmware identifier of the form `Model.V.R.M[.F]`, e.g. `XI52.8.0.3`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirmwareVersion {
    pub raw: String,
    pub model: String,
    pub version: u32,
    pub release: u32,
    pub modification: u32,
    pub fix: Option<u32>,
}

impl FirmwareVersion {
    /// Extract the version from a `Version` status payload.
    pub fn from_status(text: &str) -> Result<Self, Error> {
        let raw = payload::leaf_text(text, "Version")
            .ok_or_else(|| Error::malformed("Version status has no Version element"))?;
        raw.parse()
    }

    /// `true` when this firmware is `v.r.m` or newer.
    pub fn check_version_or_later(&self, version: u32, release: u32, modification: u32) -> bool {
        (self.version, self.release, self.modification) >= (version, release, modification)
    }
}

impl FromStr for FirmwareVersion {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let bad = || Error::config(format!("unrecognised firmware version '{raw}'"));

        let mut parts = raw.split('.');
        let model = parts.next().filter(|m| !m.is_empty()).ok_or_else(bad)?;
        let mut number = || -> Result<u32, Error> {
            parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)
        };
        let version = number()?;
        let release = number()?;
        let modification = number()?;
        let fix = number().ok();

        Ok(Self {
            raw: raw.to_owned(),
            model: model.to_owned(),
            version,
            release,
            modification,
            fix,
        })
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// ── Filestore ────────────────────────────────────────────────────────

/// One file in a filestore listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size: Option<u64>,
    /// Modification timestamp exactly as reported (`YYYY-MM-DD hh:mm:ss`).
    pub modified: Option<String>,
}

impl FileEntry {
    /// All files in a `dp:filestore` payload, subdirectories included.
    pub fn parse_filestore(text: &str) -> Vec<Self> {
        payload::elements(text, "file")
            .iter()
            .filter_map(Self::from_element)
            .collect()
    }

    fn from_element(el: &Element<'_>) -> Option<Self> {
        Some(Self {
            name: el.attribute("name")?.into_owned(),
            size: el.child_text("size").and_then(|s| s.parse().ok()),
            modified: el.child_text("modified").map(|m| m.into_owned()),
        })
    }

    pub fn modified_at(&self) -> Option<NaiveDateTime> {
        self.modified
            .as_deref()
            .and_then(|m| NaiveDateTime::parse_from_str(m, "%Y-%m-%d %H:%M:%S").ok())
    }
}

// ── Failure notifications ────────────────────────────────────────────

/// Upload state of a generated failure report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadStatus {
    InProgress,
    Success,
    Failure,
    Other(String),
}

impl UploadStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "in-progress" => Self::InProgress,
            "success" => Self::Success,
            "failure" => Self::Failure,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::InProgress => "in-progress",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the `FailureNotificationStatus2` (or legacy
/// `FailureNotificationStatus`) status class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureNotificationEntry {
    pub seq_num: u64,
    pub date: String,
    pub reason: String,
    pub upload_status: UploadStatus,
    pub location: String,
}

impl FailureNotificationEntry {
    /// Entries of `class` in a status payload, most recent first.
    pub fn parse_status(text: &str, class: &str) -> Vec<Self> {
        let mut entries: Vec<Self> = payload::elements(text, class)
            .iter()
            .map(Self::from_element)
            .collect();
        entries.sort_by(|a, b| b.seq_num.cmp(&a.seq_num));
        entries
    }

    fn from_element(el: &Element<'_>) -> Self {
        let field = |name: &str| el.child_text(name).map(|v| v.into_owned()).unwrap_or_default();
        Self {
            seq_num: field("SeqNum").parse().unwrap_or_default(),
            date: field("Date"),
            reason: field("Reason"),
            upload_status: UploadStatus::parse(&field("UploadStatus")),
            location: field("Location"),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.upload_status == UploadStatus::Failure
    }

    pub fn date_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.date, "%Y-%m-%d %H:%M:%S").ok()
    }

    pub fn location_parts(&self) -> LocationParts {
        LocationParts::parse(&self.location)
    }
}

// ── Locations ────────────────────────────────────────────────────────

/// A report location URL split into protocol, directory path and file name.
///
/// `temporary:///error-report.txt.gz` splits into `temporary`, an empty
/// path and `error-report.txt.gz`; `ftp://host/dir/file` into `ftp`,
/// `host/dir` and `file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationParts {
    pub protocol: String,
    pub path: String,
    pub filename: String,
}

impl LocationParts {
    pub fn parse(location: &str) -> Self {
        let location = location.trim();
        let (protocol, rest) = location.split_once("://").unwrap_or(("", location));
        let rest = rest.trim_start_matches('/');
        let (path, filename) = rest.rsplit_once('/').unwrap_or(("", rest));
        Self {
            protocol: protocol.to_owned(),
            path: path.to_owned(),
            filename: filename.to_owned(),
        }
    }
}
