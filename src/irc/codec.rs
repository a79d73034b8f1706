//! Line framing for an IRC client connection.
//!
//! Lines end in CR-LF, though a bare LF is accepted from servers. Input is
//! decoded as UTF-8 with lossy replacement since IRC has no fixed encoding.
//! Blank and malformed lines are skipped. Outgoing lines longer than the RFC limit are
//! cut at a character boundary.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::message::{Message, ParseError};

/// RFC 2812 line limit, CR-LF included.
pub const MAX_LINE_LENGTH: usize = 512;

/// Longest incoming line accepted before giving up on the connection.
const MAX_INCOMING_LINE: usize = 8191;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("incoming line exceeds {MAX_INCOMING_LINE} bytes")]
    LineTooLong,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default)]
pub struct IrcCodec;

impl Decoder for IrcCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        loop {
            let Some(lf) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_INCOMING_LINE {
                    return Err(CodecError::LineTooLong);
                }
                return Ok(None);
            };

            let line = src.split_to(lf);
            src.advance(1);
            let line = String::from_utf8_lossy(&line);
            match Message::parse(&line) {
                Ok(msg) => return Ok(Some(msg)),
                Err(ParseError::Empty) => continue,
                Err(e) => {
                    warn!(line = %line, error = %e, "skipping malformed line");
                    continue;
                }
            }
        }
    }
}

impl Encoder<Message> for IrcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        let wire = item.to_wire();
        let mut end = wire.len().min(MAX_LINE_LENGTH - 2);
        while !wire.is_char_boundary(end) {
            end -= 1;
        }
        let line = wire[..end].replace(['\r', '\n'], " ");
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_crlf_and_bare_lf() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from("PING :a\r\nPING :b\n");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().params, vec!["a"]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().params, vec!["b"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_complete_line() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from(":srv 001 hug");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"inn :Welcome\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "001");
        assert_eq!(msg.param(0), Some("huginn"));
    }

    #[test]
    fn skips_blank_lines() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from("\r\n\r\nQUIT\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().command, "QUIT");
    }

    #[test]
    fn malformed_line_is_skipped() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from(":irc.example.net\r\nPING :still here\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.trailing(), Some("still here"));
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from(&b"PRIVMSG #m :caf\xe9\r\n"[..]);
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.trailing(), Some("caf\u{fffd}"));
    }

    #[test]
    fn rejects_runaway_line() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from(vec![b'x'; MAX_INCOMING_LINE + 1].as_slice());
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::LineTooLong)));
    }

    #[test]
    fn encoder_truncates_and_terminates() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(Message::privmsg("#m", &"é".repeat(400)), &mut buf)
            .unwrap();
        assert!(buf.len() <= MAX_LINE_LENGTH);
        assert!(buf.ends_with(b"\r\n"));
        assert!(std::str::from_utf8(&buf).is_ok());
    }

    #[test]
    fn encoder_strips_embedded_newlines() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(Message::privmsg("#m", "one\r\nQUIT :bye"), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"PRIVMSG #m :one  QUIT :bye\r\n");
    }
}
