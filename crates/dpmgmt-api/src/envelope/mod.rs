//! SOAP envelope framing for the XML management interface.
//!
//! [`request`] builds the outbound envelope; [`frame`] scans the inbound
//! stream into a [`ResponseResult`] without buffering whole payloads.

pub mod frame;
pub mod request;

pub use frame::{ContentKind, ResponseFrame, ResponsePayload, ResponseResult};
pub use request::{Operation, Request, RequestEnvelope};
