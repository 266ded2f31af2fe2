//! Control connection framing
//!
//! Splits inbound bytes into command lines and writes replies in RFC 959 form.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::Reply;

/// One decoded unit from the control connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlLine {
    Command(String),
    /// A line exceeded the configured maximum and was discarded
    TooLong,
}

#[derive(Debug, Clone)]
pub struct FtpCodec {
    max_length: usize,
    next_index: usize,
    discarding: bool,
}

impl FtpCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Decoder for FtpCodec {
    type Item = ControlLine;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ControlLine>, io::Error> {
        loop {
            let newline = buf[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| offset + self.next_index);

            match (self.discarding, newline) {
                (true, Some(pos)) => {
                    buf.advance(pos + 1);
                    self.discarding = false;
                    self.next_index = 0;
                    return Ok(Some(ControlLine::TooLong));
                }
                (true, None) => {
                    buf.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(pos)) => {
                    let line = buf.split_to(pos + 1);
                    self.next_index = 0;
                    if pos > self.max_length {
                        return Ok(Some(ControlLine::TooLong));
                    }
                    let text = String::from_utf8_lossy(&line[..pos]);
                    return Ok(Some(ControlLine::Command(
                        text.trim_end_matches('\r').to_string(),
                    )));
                }
                (false, None) if buf.len() > self.max_length => {
                    self.discarding = true;
                }
                (false, None) => {
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<ControlLine>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() || self.discarding {
            buf.clear();
            return Ok(None);
        }
        // Peer closed without a final line terminator
        let rest = buf.split();
        self.next_index = 0;
        let text = String::from_utf8_lossy(&rest);
        Ok(Some(ControlLine::Command(
            text.trim_end_matches('\r').to_string(),
        )))
    }
}

impl Encoder<Reply> for FtpCodec {
    type Error = io::Error;

    fn encode(&mut self, reply: Reply, dst: &mut BytesMut) -> Result<(), io::Error> {
        let wire = reply.to_wire();
        dst.reserve(wire.len());
        dst.put(wire.as_bytes());
        Ok(())
    }
}
