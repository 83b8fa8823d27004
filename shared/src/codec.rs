//! Telnet codec for line-oriented node sessions
//!
//! Nodes speak a minimal telnet dialect. Inbound bytes may carry option
//! negotiation:
//! ```text
//! [ IAC ][ DO | DONT | WILL | WONT ][ option ]
//! [ IAC ][ SB ][ option ][ ... ][ IAC ][ SE ]
//! [ IAC ][ IAC ]   (literal 0xFF data byte)
//! ```
//!
//! The console refuses every option, so the decoder strips negotiation from the
//! data stream and queues `WONT`/`DONT` replies for the caller to write back.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

/// Maximum response size (4 MB) to prevent memory exhaustion
pub const MAX_RESPONSE_SIZE: usize = 4 * 1024 * 1024;

/// Errors that can occur while collecting a response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Response too large: {0} bytes (max: {MAX_RESPONSE_SIZE})")]
    ResponseTooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DecodeState {
    #[default]
    Data,
    Iac,
    Negotiate(u8),
    Sub,
    SubIac,
}

/// Output of one decode step
#[derive(Debug, Default)]
pub struct Decoded {
    /// Application data with negotiation removed
    pub data: Bytes,
    /// Negotiation replies that should be written back to the peer
    pub replies: Bytes,
}

/// Streaming telnet decoder; sequences may be split across reads
#[derive(Debug, Default)]
pub struct TelnetDecoder {
    state: DecodeState,
}

impl TelnetDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk of inbound bytes
    pub fn decode(&mut self, input: &[u8]) -> Decoded {
        let mut data = BytesMut::with_capacity(input.len());
        let mut replies = BytesMut::new();

        for &byte in input {
            self.state = match (self.state, byte) {
                (DecodeState::Data, IAC) => DecodeState::Iac,
                (DecodeState::Data, b) => {
                    data.put_u8(b);
                    DecodeState::Data
                }
                (DecodeState::Iac, IAC) => {
                    data.put_u8(IAC);
                    DecodeState::Data
                }
                (DecodeState::Iac, cmd @ (DO | DONT | WILL | WONT)) => DecodeState::Negotiate(cmd),
                (DecodeState::Iac, SB) => DecodeState::Sub,
                // NOP, GA, AYT and friends carry no payload
                (DecodeState::Iac, _) => DecodeState::Data,
                (DecodeState::Negotiate(cmd), option) => {
                    match cmd {
                        DO => replies.put_slice(&[IAC, WONT, option]),
                        WILL => replies.put_slice(&[IAC, DONT, option]),
                        _ => {}
                    }
                    DecodeState::Data
                }
                (DecodeState::Sub, IAC) => DecodeState::SubIac,
                (DecodeState::Sub, _) => DecodeState::Sub,
                (DecodeState::SubIac, SE) => DecodeState::Data,
                (DecodeState::SubIac, _) => DecodeState::Sub,
            };
        }

        Decoded {
            data: data.freeze(),
            replies: replies.freeze(),
        }
    }

    /// Drop any partially decoded sequence (used after reconnecting)
    pub fn reset(&mut self) {
        self.state = DecodeState::Data;
    }
}

/// Encode a command line for the wire.
///
/// UTF-8 text never contains 0xFF, so no IAC escaping is needed outbound.
pub fn encode_line(text: &str, line_ending: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(text.len() + line_ending.len());
    buf.put_slice(text.as_bytes());
    buf.put_slice(line_ending.as_bytes());
    buf.freeze()
}

/// Accumulates decoded response text up to [`MAX_RESPONSE_SIZE`]
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    buffer: BytesMut,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Append decoded data
    pub fn extend(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let len = self.buffer.len() + data.len();
        if len > MAX_RESPONSE_SIZE {
            return Err(CodecError::ResponseTooLarge(len));
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Current contents as text; invalid UTF-8 is replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}
