//! Control protocol spoken over the mount socket
//!
//! One request per round trip. Every message is a single UTF-8 line of the
//! form `header|body`, terminated by `\n`. The body is optional; multi-entry
//! payloads are `\0`-delimited, with each entry percent-escaped so that no
//! entry can carry a delimiter or a line break.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[macro_use]
mod macros;
pub mod lock;
pub mod requests;
pub mod status;

pub use lock::{AcquireLockResponse, AcquireLockResult, LockData, ReleaseLockResult};
pub use requests::{
    DownloadObjectResult, ModifiedPathsResult, PostFetchResult, UnmountResult,
    MODIFIED_PATHS_VERSION,
};
pub use status::{MountState, StatusResponse};

/// Separator between a message header and its body.
pub const HEADER_SEPARATOR: char = '|';

/// Terminator for every message on the wire.
pub const MESSAGE_TERMINATOR: char = '\n';

/// Delimiter for list payloads such as the modified-paths snapshot.
pub const LIST_DELIMITER: char = '\0';

/// Upper bound on a single line, so a misbehaving peer cannot grow a buffer forever.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// Request headers understood by the mount process
pub mod headers {
    pub const GET_STATUS: &str = "GetStatus";
    pub const UNMOUNT: &str = "Unmount";
    pub const ACQUIRE_LOCK: &str = "AcquireLock";
    pub const RELEASE_LOCK: &str = "ReleaseLock";
    pub const DOWNLOAD_OBJECT: &str = "DLO";
    pub const MODIFIED_PATHS_LIST: &str = "MPL";
    pub const POST_FETCH_JOB: &str = "PostFetch";
}

/// Response for a header the mount does not recognize.
pub const UNKNOWN_REQUEST: &str = "UnknownRequest";

/// Response when the request needs a `Ready` mount.
pub const MOUNT_NOT_READY: &str = "MountNotReady";

/// Response when the mount is in a state the request cannot interpret.
pub const UNKNOWN_STATE: &str = "UnknownState";

/// Response when the mount could not frame its real answer.
pub const INTERNAL_ERROR: &str = "InternalError";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("message body may not contain a line break")]
    EmbeddedNewline,
    #[error("message exceeds {MAX_MESSAGE_BYTES} bytes")]
    MessageTooLarge,
    #[error("unrecognized result code: {0}")]
    UnknownResult(String),
    #[error("malformed body: {0}")]
    MalformedBody(String),
}

/// A single framed protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: String,
    pub body: Option<String>,
}

impl Message {
    pub fn new(header: impl Into<String>, body: Option<String>) -> Self {
        Self {
            header: header.into(),
            body,
        }
    }

    pub fn header_only(header: impl Into<String>) -> Self {
        Self::new(header, None)
    }

    /// Split a line at the first separator. An empty body reads as `None`.
    pub fn from_line(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', MESSAGE_TERMINATOR]);
        match line.split_once(HEADER_SEPARATOR) {
            Some((header, body)) if !body.is_empty() => Self::new(header, Some(body.to_string())),
            Some((header, _)) => Self::header_only(header),
            None => Self::header_only(line),
        }
    }

    pub fn to_line(&self) -> String {
        match &self.body {
            Some(body) => format!("{}{}{}", self.header, HEADER_SEPARATOR, body),
            None => self.header.clone(),
        }
    }

    pub fn body_str(&self) -> Option<&str> {
        self.body.as_deref()
    }
}

/// Read one raw line, without its terminator. `Ok(None)` means the peer hung up.
pub async fn read_line<R>(reader: &mut R) -> Result<Option<String>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    read_line_limited(reader, MAX_MESSAGE_BYTES).await
}

/// Never buffers more than `limit + 1` bytes of a single line.
async fn read_line_limited<R>(reader: &mut R, limit: usize) -> Result<Option<String>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(limit as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if read == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > limit {
        return Err(ProtocolError::MessageTooLarge);
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }

    let line = String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(line))
}

/// Read one framed message.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    Ok(read_line(reader).await?.map(|line| Message::from_line(&line)))
}

/// Write one raw line and flush it.
pub async fn write_line<W>(writer: &mut W, line: &str) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    if line.contains(MESSAGE_TERMINATOR) {
        return Err(ProtocolError::EmbeddedNewline);
    }

    let mut framed = String::with_capacity(line.len() + 1);
    framed.push_str(line);
    framed.push(MESSAGE_TERMINATOR);
    writer.write_all(framed.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Write one framed message and flush it.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    write_line(writer, &message.to_line()).await
}

/// Join list entries into a `\0`-delimited, `\0`-terminated payload.
///
/// `%`, `\n`, `\r` and `\0` inside an entry are written as `%25`, `%0A`,
/// `%0D` and `%00`.
pub fn join_list<I, S>(entries: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut payload = String::new();
    for entry in entries {
        escape_entry(entry.as_ref(), &mut payload);
        payload.push(LIST_DELIMITER);
    }
    payload
}

/// Inverse of [`join_list`].
pub fn split_list(payload: &str) -> Vec<String> {
    payload
        .split(LIST_DELIMITER)
        .filter(|entry| !entry.is_empty())
        .map(unescape_entry)
        .collect()
}

fn escape_entry(entry: &str, out: &mut String) {
    for c in entry.chars() {
        match c {
            '%' => out.push_str("%25"),
            '\n' => out.push_str("%0A"),
            '\r' => out.push_str("%0D"),
            '\0' => out.push_str("%00"),
            c => out.push(c),
        }
    }
}

/// Unknown `%` sequences are kept as written.
fn unescape_entry(entry: &str) -> String {
    let mut out = String::with_capacity(entry.len());
    let mut rest = entry;
    while let Some(at) = rest.find('%') {
        out.push_str(&rest[..at]);
        let escaped = rest.get(at + 1..at + 3);
        let decoded = match escaped {
            Some("25") => Some('%'),
            Some("0A") | Some("0a") => Some('\n'),
            Some("0D") | Some("0d") => Some('\r'),
            Some("00") => Some('\0'),
            _ => None,
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[at + 3..];
            }
            None => {
                out.push('%');
                rest = &rest[at + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_from_line() {
        assert_eq!(
            Message::from_line("MPL|1"),
            Message::new(headers::MODIFIED_PATHS_LIST, Some("1".to_string()))
        );
        assert_eq!(Message::from_line("GetStatus"), Message::header_only("GetStatus"));
        assert_eq!(Message::from_line("Unmount|"), Message::header_only("Unmount"));
    }

    #[test]
    fn test_body_keeps_later_separators() {
        let message = Message::from_line("DenyGit|{\"parsed_command\":\"git a|b\"}");
        assert_eq!(message.header, "DenyGit");
        assert_eq!(message.body_str(), Some("{\"parsed_command\":\"git a|b\"}"));
    }

    #[test]
    fn test_list_payload() {
        let payload = join_list([".gitattributes", "src/"]);
        assert_eq!(payload, ".gitattributes\0src/\0");
        assert_eq!(split_list(&payload), vec![".gitattributes", "src/"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_list_entries_with_line_breaks_stay_on_one_line() {
        let entries = ["weird\nname.txt", "50%.txt", "cr\rlf", "nul\0byte"];
        let payload = join_list(entries);
        assert_eq!(payload, "weird%0Aname.txt\050%25.txt\0cr%0Dlf\0nul%00byte\0");
        assert!(!payload.contains('\n'));
        assert_eq!(split_list(&payload), entries);
    }

    #[test]
    fn test_unknown_escape_is_kept() {
        assert_eq!(split_list("100%\0a%zz\0"), vec!["100%", "a%zz"]);
    }

    #[tokio::test]
    async fn test_long_line_is_rejected_before_it_is_buffered() {
        let mut reader: &[u8] = b"0123456789abcdef\nok\n";
        let result = read_line_limited(&mut reader, 8).await;
        assert!(matches!(result, Err(ProtocolError::MessageTooLarge)));

        let mut endless = tokio::io::BufReader::new(tokio::io::repeat(b'a'));
        let result = read_line_limited(&mut endless, 1024).await;
        assert!(matches!(result, Err(ProtocolError::MessageTooLarge)));
    }

    #[tokio::test]
    async fn test_line_at_limit_is_accepted() {
        let mut reader: &[u8] = b"12345678\n1234567\r\nnext";
        assert_eq!(
            read_line_limited(&mut reader, 8).await.unwrap(),
            Some("12345678".to_string())
        );
        assert_eq!(
            read_line_limited(&mut reader, 8).await.unwrap(),
            Some("1234567".to_string())
        );
        assert_eq!(
            read_line_limited(&mut reader, 8).await.unwrap(),
            Some("next".to_string())
        );
        assert_eq!(read_line_limited(&mut reader, 8).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_write_over_stream() {
        let (client, server) = tokio::io::duplex(1024);
        let (_, mut client_write) = tokio::io::split(client);
        let (server_read, _) = tokio::io::split(server);
        let mut server_read = tokio::io::BufReader::new(server_read);

        write_message(&mut client_write, &Message::new("MPL", Some("1".into())))
            .await
            .unwrap();
        write_message(&mut client_write, &Message::header_only("GetStatus"))
            .await
            .unwrap();
        drop(client_write);

        let first = read_message(&mut server_read).await.unwrap().unwrap();
        assert_eq!(first.header, "MPL");
        assert_eq!(first.body_str(), Some("1"));
        let second = read_message(&mut server_read).await.unwrap().unwrap();
        assert_eq!(second.header, "GetStatus");
    }

    #[tokio::test]
    async fn test_newline_in_body_is_rejected() {
        let mut sink = Vec::new();
        let result = write_message(&mut sink, &Message::new("X", Some("a\nb".into()))).await;
        assert!(matches!(result, Err(ProtocolError::EmbeddedNewline)));
    }
}
