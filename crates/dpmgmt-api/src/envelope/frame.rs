// Streaming response scanner.
//
// The response is never held in memory whole. The scanner walks tags until
// the envelope body opens, then sniffs the first elements of the body:
//
//   SeekBodyStart -> SniffNextTag -> Fault   (message extracted, error)
//                                 -> Result  (short text, rest drained)
//                                 -> Content (body spooled to a temp file)
//
// Everything read after the body start is recorded so a content payload can
// be replayed from that mark. Every in-memory buffer is bounded.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

use crate::codec;
use crate::error::{Error, Stalled};
use crate::payload;

/// Longest single tag accepted while scanning.
const MAX_TAG_LEN: usize = 8 * 1024;
/// Bytes allowed between the body start and the dispatching element.
const MAX_SNIFF_LEN: usize = 64 * 1024;
/// Longest accepted `dp:result` text.
const MAX_RESULT_LEN: usize = 64 * 1024;
/// Longest fault body kept for message extraction.
const MAX_FAULT_LEN: usize = 256 * 1024;

const RESULT_ELEMENT: &str = "dp:result";
const RESULT_CLOSE: &[u8] = b"</dp:result>";

/// Which content element opened the response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ContentKind {
    Status,
    Config,
    Log,
    File,
    Import,
    Filestore,
    Backup,
    Export,
}

impl ContentKind {
    /// Wire element name, e.g. `dp:filestore`.
    pub fn element(self) -> &'static str {
        match self {
            Self::Status => "dp:status",
            Self::Config => "dp:config",
            Self::Log => "dp:log",
            Self::File => "dp:file",
            Self::Import => "dp:import",
            Self::Filestore => "dp:filestore",
            Self::Backup => "dp:backup",
            Self::Export => "dp:export",
        }
    }

    fn from_element(name: &str) -> Option<Self> {
        <Self as strum::IntoEnumIterator>::iter().find(|kind| kind.element() == name)
    }
}

/// Opaque response payload spooled to temporary storage.
///
/// The backing file is removed when the payload is dropped.
pub struct ResponsePayload {
    kind: ContentKind,
    file: NamedTempFile,
    len: u64,
}

impl fmt::Debug for ResponsePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponsePayload")
            .field("kind", &self.kind)
            .field("path", &self.file.path())
            .field("len", &self.len)
            .finish()
    }
}

impl ResponsePayload {
    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Spooled size in bytes, envelope tail included.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the payload back as text.
    pub async fn read_to_string(&self) -> Result<String, Error> {
        let bytes = tokio::fs::read(self.path())
            .await
            .map_err(|e| Error::file(self.path(), e))?;
        String::from_utf8(bytes).map_err(|e| Error::malformed(format!("payload is not UTF-8: {e}")))
    }

    /// Decode the base64 text of the first `element` into memory.
    pub async fn decode_element(&self, element: &str) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        self.decode_into(element, &mut out, |e| Error::file(self.path(), e))
            .await?;
        Ok(out)
    }

    /// Stream-decode the base64 text of the first `element` into `dest`.
    ///
    /// Reads the spool incrementally; neither the encoded text nor the
    /// decoded content is held whole. A partial `dest` is removed on
    /// failure. Returns the decoded byte count.
    pub async fn decode_element_to(&self, element: &str, dest: &Path) -> Result<u64, Error> {
        let mut out = tokio::fs::File::create(dest)
            .await
            .map_err(|e| Error::file(dest, e))?;
        let decoded = self
            .decode_into(element, &mut out, |e| Error::file(dest, e))
            .await;
        if decoded.is_err() {
            drop(out);
            if let Err(e) = tokio::fs::remove_file(dest).await {
                debug!(dest = %dest.display(), error = %e, "could not remove partial file");
            }
        }
        decoded
    }

    async fn decode_into<W>(
        &self,
        element: &str,
        out: &mut W,
        write_error: impl Fn(io::Error) -> Error,
    ) -> Result<u64, Error>
    where
        W: AsyncWrite + Unpin,
    {
        let spool = tokio::fs::File::open(self.path())
            .await
            .map_err(|e| Error::file(self.path(), e))?;
        let mut scanner = Scanner::new(spool);
        let open = loop {
            let Some(tag) = scanner.next_tag().await? else {
                return Err(Error::malformed(format!("payload has no {element} element")));
            };
            if !tag.closing && tag.name == element {
                break tag;
            }
        };
        if open.self_closing {
            return Ok(0);
        }

        let mut decoder = codec::StreamDecoder::default();
        let mut written = 0u64;
        loop {
            let buf = scanner
                .reader
                .fill_buf()
                .await
                .map_err(|e| Error::file(self.path(), e))?;
            if buf.is_empty() {
                return Err(Error::malformed(format!("payload ended inside {element}")));
            }
            let (text_len, closed) = buf
                .iter()
                .position(|b| *b == b'<')
                .map_or((buf.len(), false), |end| (end, true));
            let decoded = decoder.feed(&buf[..text_len])?;
            scanner.reader.consume(text_len);
            out.write_all(&decoded).await.map_err(&write_error)?;
            written += decoded.len() as u64;
            if closed {
                break;
            }
        }
        let tail = decoder.finish()?;
        out.write_all(&tail).await.map_err(&write_error)?;
        out.flush().await.map_err(&write_error)?;
        written += tail.len() as u64;
        trace!(element, bytes = written, "payload element decoded");
        Ok(written)
    }

    /// Fail unless the payload opened with the `expected` element.
    pub fn expect_kind(self, expected: ContentKind) -> Result<Self, Error> {
        if self.kind == expected {
            Ok(self)
        } else {
            Err(Error::malformed(format!(
                "expected {} content, got {}",
                expected.element(),
                self.kind.element()
            )))
        }
    }
}

/// Outcome of a successfully framed response.
#[derive(Debug)]
pub enum ResponseResult {
    /// Short text of the `dp:result` element, trimmed.
    Text(String),
    /// Content payload.
    Payload(ResponsePayload),
}

impl ResponseResult {
    /// The result text, or `MalformedResponse` for a payload.
    pub fn into_text(self) -> Result<String, Error> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Payload(payload) => Err(Error::malformed(format!(
                "expected a result element, got {} content",
                payload.kind().element()
            ))),
        }
    }

    /// The payload, or `BadResult` carrying the result text.
    pub fn into_payload(self) -> Result<ResponsePayload, Error> {
        match self {
            Self::Payload(payload) => Ok(payload),
            Self::Text(result) => Err(Error::BadResult { result }),
        }
    }
}

/// Response parser configured with where payloads are spooled.
#[derive(Debug, Clone)]
pub struct ResponseFrame {
    scratch_dir: PathBuf,
}

impl Default for ResponseFrame {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir(),
        }
    }
}

impl ResponseFrame {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Frame one response stream.
    ///
    /// A fault is returned as `Error::Fault`. A stream that ends before the
    /// body, or before a result/content element, is `MalformedResponse`.
    pub async fn parse<R>(&self, reader: R) -> Result<ResponseResult, Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut scanner = Scanner::new(reader);

        // SeekBodyStart
        loop {
            let Some(tag) = scanner.next_tag().await? else {
                return Err(Error::malformed("stream ended before the envelope body"));
            };
            if !tag.closing && local_name(&tag.name) == "Body" {
                break;
            }
        }
        scanner.mark();

        // SniffNextTag
        let Some(first) = scanner.next_tag().await? else {
            return Err(Error::malformed("envelope body is empty"));
        };
        if !first.closing && local_name(&first.name) == "Fault" {
            return Err(scanner.read_fault().await?);
        }

        // Dispatch on the first result or content element after the mark.
        let mut tag = first;
        loop {
            if !tag.closing {
                if tag.name == RESULT_ELEMENT {
                    let text = if tag.self_closing {
                        String::new()
                    } else {
                        scanner.read_result().await?
                    };
                    scanner.drain().await?;
                    debug!(result = %text, "result response");
                    return Ok(ResponseResult::Text(text));
                }
                if let Some(kind) = ContentKind::from_element(&tag.name) {
                    let payload = scanner.spool(kind, &self.scratch_dir).await?;
                    debug!(kind = %kind, bytes = payload.len, "content response spooled");
                    return Ok(ResponseResult::Payload(payload));
                }
            }
            trace!(tag = %tag.name, "skipping tag");
            tag = scanner
                .next_tag()
                .await?
                .ok_or_else(|| Error::malformed("no result or content element in response"))?;
        }
    }
}

struct Tag {
    name: String,
    closing: bool,
    self_closing: bool,
}

impl Tag {
    fn from_raw(raw: &[u8]) -> Self {
        // raw is "<...>"
        let inner = &raw[1..raw.len() - 1];
        let closing = inner.first() == Some(&b'/');
        let self_closing = inner.last() == Some(&b'/');
        let name_bytes = if closing { &inner[1..] } else { inner };
        let end = name_bytes
            .iter()
            .position(|b| b.is_ascii_whitespace() || *b == b'/')
            .unwrap_or(name_bytes.len());
        Self {
            name: String::from_utf8_lossy(&name_bytes[..end]).into_owned(),
            closing,
            self_closing,
        }
    }
}

fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

struct Scanner<R> {
    reader: BufReader<R>,
    recording: Option<Vec<u8>>,
}

impl<R: AsyncRead + Unpin> Scanner<R> {
    fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            recording: None,
        }
    }

    /// Start recording every byte read from here on.
    fn mark(&mut self) {
        self.recording = Some(Vec::new());
    }

    async fn next_byte(&mut self) -> Result<Option<u8>, Error> {
        let buf = self.reader.fill_buf().await.map_err(read_error)?;
        let Some(&byte) = buf.first() else {
            return Ok(None);
        };
        self.reader.consume(1);
        if let Some(recorded) = self.recording.as_mut() {
            if recorded.len() >= MAX_SNIFF_LEN {
                return Err(Error::malformed(format!(
                    "no result or content element within {MAX_SNIFF_LEN} bytes of the body"
                )));
            }
            recorded.push(byte);
        }
        Ok(Some(byte))
    }

    /// Skip text up to the next tag and return it. `None` at end of stream.
    async fn next_tag(&mut self) -> Result<Option<Tag>, Error> {
        loop {
            match self.next_byte().await? {
                None => return Ok(None),
                Some(b'<') => break,
                Some(_) => {}
            }
        }
        let mut raw = vec![b'<'];
        loop {
            let Some(byte) = self.next_byte().await? else {
                return Ok(None);
            };
            raw.push(byte);
            if byte == b'>' {
                return Ok(Some(Tag::from_raw(&raw)));
            }
            if raw.len() > MAX_TAG_LEN {
                return Err(Error::malformed(format!("tag longer than {MAX_TAG_LEN} bytes")));
            }
        }
    }

    /// Collect `dp:result` text up to its close tag.
    async fn read_result(&mut self) -> Result<String, Error> {
        self.recording = None;
        let mut text = Vec::new();
        loop {
            let Some(byte) = self.next_byte().await? else {
                return Err(Error::malformed("stream ended inside the result element"));
            };
            text.push(byte);
            if text.ends_with(RESULT_CLOSE) {
                text.truncate(text.len() - RESULT_CLOSE.len());
                let text = String::from_utf8_lossy(&text);
                return Ok(payload::unescape(text.trim()).into_owned());
            }
            if text.len() > MAX_RESULT_LEN {
                return Err(Error::malformed(format!(
                    "result element longer than {MAX_RESULT_LEN} bytes"
                )));
            }
        }
    }

    /// Read the rest of a fault and turn it into `Error::Fault`.
    async fn read_fault(&mut self) -> Result<Error, Error> {
        let mut body = self.recording.take().unwrap_or_default();
        let limit = (MAX_FAULT_LEN - body.len().min(MAX_FAULT_LEN)) as u64;
        (&mut self.reader)
            .take(limit)
            .read_to_end(&mut body)
            .await
            .map_err(read_error)?;
        self.drain().await?;

        let text = String::from_utf8_lossy(&body);
        let message = payload::between(&text, "<faultstring>", "</faultstring>")
            .map(|m| payload::unescape(m.trim()).into_owned())
            .ok_or_else(|| Error::malformed("fault without a faultstring element"))?;
        debug!(fault = %message, "fault response");
        Ok(Error::Fault { message })
    }

    /// Consume and discard the remainder of the stream.
    async fn drain(&mut self) -> Result<(), Error> {
        self.recording = None;
        tokio::io::copy(&mut self.reader, &mut tokio::io::sink())
            .await
            .map_err(read_error)?;
        Ok(())
    }

    /// Replay everything since the mark, then copy the rest of the stream.
    async fn spool(&mut self, kind: ContentKind, dir: &Path) -> Result<ResponsePayload, Error> {
        let head = self.recording.take().unwrap_or_default();
        let file = NamedTempFile::new_in(dir).map_err(|e| Error::file(dir, e))?;
        let handle = file.as_file().try_clone().map_err(|e| Error::file(file.path(), e))?;
        let mut out = tokio::fs::File::from_std(handle);

        out.write_all(&head)
            .await
            .map_err(|e| Error::file(file.path(), e))?;
        let copied = tokio::io::copy(&mut self.reader, &mut out)
            .await
            .map_err(read_error)?;
        out.flush().await.map_err(|e| Error::file(file.path(), e))?;

        Ok(ResponsePayload {
            kind,
            len: head.len() as u64 + copied,
            file,
        })
    }
}

fn read_error(err: io::Error) -> Error {
    if let Some(stalled) = Stalled::find(&err) {
        return stalled.into();
    }
    Error::Transport {
        message: format!("reading response body: {err}"),
    }
}
