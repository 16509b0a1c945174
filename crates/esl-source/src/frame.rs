//! Event socket wire framing
//!
//! Every message from the server is a block of `Name: value` lines ended by
//! a blank line. When the block carries `Content-Length`, exactly that many
//! bytes of body follow. Event bodies (`text/event-plain`) are themselves a
//! header block whose values are URL-encoded, optionally followed by a body.

use esl_common::Header;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::{RawEvent, Result, SourceError};

pub const CONTENT_TYPE_AUTH_REQUEST: &str = "auth/request";
pub const CONTENT_TYPE_COMMAND_REPLY: &str = "command/reply";
pub const CONTENT_TYPE_EVENT_PLAIN: &str = "text/event-plain";
pub const CONTENT_TYPE_DISCONNECT_NOTICE: &str = "text/disconnect-notice";
pub const CONTENT_TYPE_RUDE_REJECTION: &str = "text/rude-rejection";

/// Largest body accepted from the peer
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// One message read off the socket
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub headers: Vec<Header>,
    pub body: Option<String>,
}

impl Frame {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    pub fn content_length(&self) -> Result<Option<usize>> {
        self.header("Content-Length")
            .map(|len| {
                len.trim()
                    .parse()
                    .map_err(|_| SourceError::Protocol(format!("invalid Content-Length: {}", len)))
            })
            .transpose()
    }

    pub fn reply_text(&self) -> Option<&str> {
        self.header("Reply-Text")
    }

    /// Command replies report success with a `+OK` prefix
    pub fn is_ok_reply(&self) -> bool {
        self.reply_text().is_some_and(|text| text.starts_with("+OK"))
    }
}

/// Split `Name: value` into a header. Lines without a colon are rejected.
pub fn parse_header_line(line: &str) -> Option<Header> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some(Header::new(name, value.trim_start()))
}

/// Read the next frame. `Ok(None)` means the peer closed between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = Vec::new();
    let mut line = String::new();

    loop {
        line.clear();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            if headers.is_empty() {
                return Ok(None);
            }
            return Err(SourceError::UnexpectedEof);
        }

        let trimmed = line.trim_end_matches(&['\r', '\n'][..]);
        if trimmed.is_empty() {
            // Stray separators between frames
            if headers.is_empty() {
                continue;
            }
            break;
        }

        let header = parse_header_line(trimmed)
            .ok_or_else(|| SourceError::Protocol(format!("malformed header line: {}", trimmed)))?;
        headers.push(header);
    }

    let mut frame = Frame { headers, body: None };
    if let Some(len) = frame.content_length()? {
        if len > MAX_FRAME_BYTES {
            return Err(SourceError::Protocol(format!(
                "Content-Length {} exceeds limit of {} bytes",
                len, MAX_FRAME_BYTES
            )));
        }
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SourceError::UnexpectedEof
            } else {
                SourceError::Io(e)
            }
        })?;
        frame.body = Some(String::from_utf8_lossy(&buf).into_owned());
    }

    Ok(Some(frame))
}

/// Parse a `text/event-plain` body into an event with decoded header values
pub fn parse_event_plain(text: &str) -> RawEvent {
    let normalized;
    let text = if text.contains('\r') {
        normalized = text.replace("\r\n", "\n");
        normalized.as_str()
    } else {
        text
    };

    let (head, rest) = match text.split_once("\n\n") {
        Some((head, rest)) => (head, Some(rest)),
        None => (text, None),
    };

    let headers: Vec<Header> = head
        .lines()
        .filter(|l| !l.is_empty())
        .filter_map(parse_header_line)
        .map(|h| Header {
            value: decode_value(&h.value),
            name: h.name,
        })
        .collect();

    let body_len = headers
        .iter()
        .find(|h| h.name == "Content-Length")
        .and_then(|h| h.value.trim().parse::<usize>().ok());

    let body = match (body_len, rest) {
        (Some(len), Some(rest)) => Some(rest.get(..len).unwrap_or(rest).to_string()),
        _ => None,
    };

    RawEvent { headers, body }
}

fn decode_value(value: &str) -> String {
    urlencoding::decode(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_read_frame_without_body() {
        let data = b"Content-Type: auth/request\n\n";
        let mut reader = BufReader::new(&data[..]);

        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame.content_type(), Some(CONTENT_TYPE_AUTH_REQUEST));
        assert!(frame.body.is_none());

        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_with_body_and_leading_blank_lines() {
        let body = "Event-Name: HEARTBEAT\n\n";
        let data = format!(
            "\n\nContent-Length: {}\nContent-Type: text/event-plain\n\n{}",
            body.len(),
            body
        );
        let mut reader = BufReader::new(data.as_bytes());

        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame.content_type(), Some(CONTENT_TYPE_EVENT_PLAIN));
        assert_eq!(frame.body.as_deref(), Some(body));
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let data = b"Content-Length: 50\nContent-Type: text/event-plain\n\nshort";
        let mut reader = BufReader::new(&data[..]);

        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, SourceError::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_oversized_content_length_is_rejected() {
        for len in [u64::MAX.to_string(), (MAX_FRAME_BYTES + 1).to_string()] {
            let data = format!("Content-Type: text/event-plain\nContent-Length: {}\n\nx", len);
            let mut reader = BufReader::new(data.as_bytes());

            let err = read_frame(&mut reader).await.unwrap_err();
            assert!(matches!(err, SourceError::Protocol(_)), "unexpected error: {:?}", err);
        }
    }

    #[tokio::test]
    async fn test_truncated_headers_are_an_error() {
        let data = b"Content-Type: command/reply\nReply-Text: +OK";
        let mut reader = BufReader::new(&data[..]);

        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, SourceError::UnexpectedEof));
    }

    #[test]
    fn test_reply_status() {
        let ok = Frame {
            headers: vec![Header::new("Reply-Text", "+OK accepted")],
            body: None,
        };
        let err = Frame {
            headers: vec![Header::new("Reply-Text", "-ERR invalid")],
            body: None,
        };
        assert!(ok.is_ok_reply());
        assert!(!err.is_ok_reply());
    }

    #[test]
    fn test_parse_event_plain_decodes_values() {
        let text = "Event-Name: CUSTOM\n\
                    Event-Subclass: webcallapi%3A%3Aapi_begin\n\
                    caller_number: %2B8613800000000\n\
                    agent_id: 42\n\n";

        let event = parse_event_plain(text);
        assert_eq!(event.event_name(), Some("CUSTOM"));
        assert_eq!(event.subclass(), Some("webcallapi::api_begin"));
        assert_eq!(event.header("caller_number"), Some("+8613800000000"));
        assert_eq!(event.header("agent_id"), Some("42"));
        assert!(event.body.is_none());
    }

    #[test]
    fn test_parse_event_plain_keeps_body() {
        let text = "Event-Name: CUSTOM\nContent-Length: 5\n\nhello trailing";
        let event = parse_event_plain(text);
        assert_eq!(event.body.as_deref(), Some("hello"));
    }

    #[test]
    fn test_parse_header_line() {
        assert_eq!(
            parse_header_line("Reply-Text: +OK event listener enabled plain"),
            Some(Header::new("Reply-Text", "+OK event listener enabled plain"))
        );
        assert_eq!(parse_header_line("Empty-Value:"), Some(Header::new("Empty-Value", "")));
        assert_eq!(parse_header_line("no colon here"), None);
    }
}
