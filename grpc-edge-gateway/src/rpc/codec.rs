//! Length-prefixed message framing
//!
//! Every message on the wire is a 1-byte compression flag, a 4-byte
//! big-endian length and the payload. Frames may be split across or packed
//! into HTTP/2 DATA frames arbitrarily, so decoding is incremental.

use crate::error::GatewayError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const HEADER_LEN: usize = 5;
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Frame a raw payload
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(0);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Encode a protobuf message and frame it
pub fn encode_message<M: prost::Message>(message: &M) -> Bytes {
    encode_frame(&message.encode_to_vec())
}

/// Incremental decoder for a sequence of framed messages
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes received from the transport
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete payload, if one is buffered
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, GatewayError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        match self.buf[0] {
            0 => {}
            1 => return Err(GatewayError::protocol("compressed messages are not supported")),
            flag => return Err(GatewayError::protocol(format!("invalid compression flag {}", flag))),
        }

        let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(GatewayError::protocol(format!(
                "message of {} bytes exceeds limit of {} bytes",
                len, MAX_MESSAGE_SIZE
            )));
        }

        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        self.buf.advance(HEADER_LEN);
        Ok(Some(self.buf.split_to(len).freeze()))
    }

    /// Called at end of stream: any leftover bytes are a truncated frame
    pub fn finish(&self) -> Result<(), GatewayError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::protocol(format!(
                "stream ended inside a message ({} trailing bytes)",
                self.buf.len()
            )))
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
