// Line-delimited message framing over a Channel: one UTF-8 control token or
// payload per newline-terminated line.

use crate::error::BridgeError;
use crate::pipe::Channel;
use std::fmt;

// Upper bound on a single line, matching the read window of the reference
// tooling. A control token is a few dozen bytes; anything near this limit
// means the peers have desynchronized.
pub const MAX_LINE_BYTES: usize = 16 * 1024;

const READ_CHUNK: usize = 4096;

/// An immutable one-line message: UTF-8, no embedded newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message(String);

impl Message {
    /// Build a message, rejecting embedded newlines so a send can never be
    /// silently split into two frames.
    pub fn new(text: impl Into<String>) -> Result<Self, BridgeError> {
        let text = text.into();
        if text.contains('\n') {
            return Err(BridgeError::InvalidMessage(text));
        }
        Ok(Self(text))
    }

    // Wire input has already been split on the newline.
    fn from_wire(text: String) -> Self {
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for Message {
    type Error = BridgeError;

    fn try_from(text: &str) -> Result<Self, Self::Error> {
        Message::new(text)
    }
}

/// Frame the message with exactly one trailing newline and write it as a
/// single buffered write, so concurrent producers can never interleave
/// partial lines.
pub async fn send_line(channel: &mut Channel, message: &Message) -> Result<(), BridgeError> {
    let text = message.as_str().as_bytes();
    let mut frame = Vec::with_capacity(text.len() + 1);
    frame.extend_from_slice(text);
    frame.push(b'\n');
    channel.write_all(&frame).await
}

/// Deframing state for one inbound channel. Bytes read past the first
/// newline stay buffered for the next call.
#[derive(Default)]
pub struct LineReader {
    buf: Vec<u8>,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read until the first newline, strip it, and return the line.
    /// End-of-stream with a partial line buffered is a `MalformedFrame`;
    /// end-of-stream on a clean boundary is `ChannelClosed`.
    pub async fn receive(&mut self, channel: &mut Channel) -> Result<Message, BridgeError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop(); // trailing newline, exactly once
                let text = String::from_utf8(line).map_err(|e| {
                    BridgeError::MalformedFrame(format!("line is not valid UTF-8: {}", e))
                })?;
                return Ok(Message::from_wire(text));
            }

            if self.buf.len() >= MAX_LINE_BYTES {
                return Err(BridgeError::MalformedFrame(format!(
                    "line exceeds {} bytes without a terminator",
                    MAX_LINE_BYTES
                )));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = channel.read(&mut chunk).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Err(BridgeError::ChannelClosed(channel.name().to_string()));
                }
                return Err(BridgeError::MalformedFrame(format!(
                    "end of stream with {} bytes of an unterminated line",
                    self.buf.len()
                )));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}
