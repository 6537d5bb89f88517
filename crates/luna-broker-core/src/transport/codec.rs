//! Newline framing for the broker protocol.
//!
//! Unlike `LinesCodec`, a bad line is reported as a frame rather than an
//! error, so the stream keeps going and the connection can answer the next
//! request. Only I/O failures end a connection.

use std::io;

use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// One inbound line as the connection loop sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestFrame {
    Line(String),
    /// The line ran past the limit. Its bytes have been discarded.
    TooLong,
    NotUtf8,
}

#[derive(Debug, Clone)]
pub struct RequestLineCodec {
    max_length: usize,
    /// Where to resume scanning for `\n` in a partially received line.
    next_index: usize,
    /// Inside an oversized line, dropping bytes until its newline.
    discarding: bool,
}

impl RequestLineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

fn decode_line(raw: &[u8]) -> RequestFrame {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    match std::str::from_utf8(raw) {
        Ok(line) => RequestFrame::Line(line.to_string()),
        Err(_) => RequestFrame::NotUtf8,
    }
}

impl Decoder for RequestLineCodec {
    type Item = RequestFrame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestFrame>, io::Error> {
        loop {
            let read_to = self.max_length.saturating_add(1).min(buf.len());
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| offset + self.next_index);

            match (self.discarding, newline) {
                (true, Some(index)) => {
                    // The error frame goes out once the whole line is gone,
                    // keeping responses in step with lines.
                    buf.advance(index + 1);
                    self.discarding = false;
                    self.next_index = 0;
                    return Ok(Some(RequestFrame::TooLong));
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(index)) => {
                    self.next_index = 0;
                    let line = buf.split_to(index + 1);
                    return Ok(Some(decode_line(&line[..index])));
                }
                (false, None) if buf.len() > self.max_length => {
                    self.discarding = true;
                    self.next_index = 0;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<RequestFrame>, io::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if self.discarding {
            // Unterminated oversized tail.
            buf.clear();
            self.discarding = false;
            return Ok(Some(RequestFrame::TooLong));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        self.next_index = 0;
        let line = buf.split_to(buf.len());
        Ok(Some(decode_line(&line)))
    }
}

impl<T: AsRef<str>> Encoder<T> for RequestLineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: T, buf: &mut BytesMut) -> Result<(), io::Error> {
        let line = line.as_ref();
        buf.reserve(line.len() + 1);
        buf.put_slice(line.as_bytes());
        buf.put_u8(b'\n');
        Ok(())
    }
}
