// Printable-text encoding for credential headers and embedded file payloads.
//
// Standard base64 alphabet, 4-character groups, `=` padding. The appliance
// wraps long payloads across lines, so decoding skips ASCII whitespace.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

/// Encode raw bytes to base64 text.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode base64 text, ignoring any interleaved whitespace.
pub fn decode(text: &str) -> Result<Vec<u8>, Error> {
    let compact: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    decode_groups(&compact)
}

/// Incremental decoder for base64 text that arrives in arbitrary pieces.
///
/// Whitespace is skipped. The last complete group is held back until
/// [`finish`](Self::finish), so padding is only accepted at the very end.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: Vec<u8>,
}

impl StreamDecoder {
    /// Feed more text and return whatever can be decoded so far.
    pub fn feed(&mut self, text: &[u8]) -> Result<Vec<u8>, Error> {
        self.pending
            .extend(text.iter().copied().filter(|b| !b.is_ascii_whitespace()));
        let groups = self.pending.len() / 4;
        if groups < 2 {
            return Ok(Vec::new());
        }
        let ready = (groups - 1) * 4;
        let decoded = decode_groups(&self.pending[..ready])?;
        self.pending.drain(..ready);
        Ok(decoded)
    }

    /// Decode the held-back tail. Fails on a dangling partial group.
    pub fn finish(self) -> Result<Vec<u8>, Error> {
        decode_groups(&self.pending)
    }
}

fn decode_groups(text: &[u8]) -> Result<Vec<u8>, Error> {
    STANDARD.decode(text).map_err(|e| Error::MalformedResponse {
        message: format!("invalid base64 payload: {e}"),
    })
}

/// `Authorization` header value for HTTP basic auth.
pub fn basic_auth(username: &str, password: &SecretString) -> String {
    let raw = format!("{username}:{}", password.expose_secret());
    format!("Basic {}", encode(raw.as_bytes()))
}
