//! Async client for an appliance's XML management interface.
//!
//! - **[`ManagementClient`]**: one profile, one trust cache; every call is
//!   a single connect/send/frame/close exchange.
//! - **[`transport`]**: `Session` over hyper + tokio-rustls. Connect and
//!   the response head have deadlines; the upload and the body read are
//!   bounded by an idle gap so large transfers are not cut off.
//! - **[`envelope`]**: request envelope builder and the streaming response
//!   scanner that spools content payloads to temporary files.
//! - **[`trust`]**: accumulating anchor store, host-name-agnostic chain
//!   validation, and the cached TLS client configuration.

pub mod client;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod models;
pub mod payload;
pub mod profile;
pub mod transport;
pub mod trust;

pub use client::ManagementClient;
pub use client::actions::{GENERATE_ERROR_REPORT, SAVE_CONFIG};
pub use client::status::{FAILURE_NOTIFICATION_CLASS, FAILURE_NOTIFICATION_CLASS_LEGACY};
pub use envelope::{ContentKind, Operation, Request, RequestEnvelope, ResponseFrame, ResponsePayload, ResponseResult};
pub use error::{Error, Phase};
pub use models::{FailureNotificationEntry, FileEntry, FirmwareVersion, LocationParts, UploadStatus};
pub use profile::{DEFAULT_PORT, DeviceProfile, MANAGEMENT_PATH};
pub use transport::{Credentials, Session, TransportConfig};
pub use trust::{TrustCache, TrustDecision, TrustStore};
