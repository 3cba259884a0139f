//! Frame types exchanged with an RPC proxy.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::{WireError, WireResult};

/// Kind of a frame, carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Unary request
    Request = 0x01,
    /// Successful unary response
    Response = 0x02,
    /// Error response (unary call or stream)
    Error = 0x03,
    /// Liveness probe
    Ping = 0x04,
    /// Probe answer
    Pong = 0x05,
    /// Open a table write stream
    OpenWrite = 0x10,
    /// Open a table read stream
    OpenRead = 0x11,
    /// Stream accepted by the proxy
    StreamReady = 0x12,
    /// Batch of encoded rows
    RowBatch = 0x13,
    /// End of stream (graceful)
    StreamEnd = 0x14,
    /// Stream abandoned by either side
    StreamCancel = 0x15,
    /// Batch acknowledged (write streams)
    Ack = 0x16,
}

impl FrameKind {
    /// Parse a kind byte.
    pub fn from_u8(value: u8) -> WireResult<Self> {
        let kind = match value {
            0x01 => Self::Request,
            0x02 => Self::Response,
            0x03 => Self::Error,
            0x04 => Self::Ping,
            0x05 => Self::Pong,
            0x10 => Self::OpenWrite,
            0x11 => Self::OpenRead,
            0x12 => Self::StreamReady,
            0x13 => Self::RowBatch,
            0x14 => Self::StreamEnd,
            0x15 => Self::StreamCancel,
            0x16 => Self::Ack,
            other => return Err(WireError::UnknownFrameKind(other)),
        };
        Ok(kind)
    }
}

/// A single frame: kind, correlation id and opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame kind
    pub kind: FrameKind,
    /// Correlation id (request id or stream id)
    pub request_id: u64,
    /// Body bytes
    pub body: Bytes,
}

impl Frame {
    /// Create a frame.
    pub fn new(kind: FrameKind, request_id: u64, body: impl Into<Bytes>) -> Self {
        Self {
            kind,
            request_id,
            body: body.into(),
        }
    }

    /// Create a frame with an empty body.
    pub fn empty(kind: FrameKind, request_id: u64) -> Self {
        Self::new(kind, request_id, Bytes::new())
    }

    /// Create an error frame.
    ///
    /// Body layout: `i32` code (big-endian) followed by a UTF-8 message.
    pub fn error(request_id: u64, code: i32, message: &str) -> Self {
        let mut body = BytesMut::with_capacity(4 + message.len());
        body.put_i32(code);
        body.put_slice(message.as_bytes());
        Self::new(FrameKind::Error, request_id, body.freeze())
    }

    /// Decode the body of an error frame.
    pub fn to_remote_error(&self) -> WireError {
        if self.body.len() < 4 {
            return WireError::Malformed("error frame shorter than 4 bytes".to_string());
        }
        let mut body = self.body.clone();
        let code = body.get_i32();
        let message = String::from_utf8_lossy(&body).into_owned();
        WireError::Remote { code, message }
    }

    /// Turn an error frame into `Err`, pass everything else through.
    pub fn into_result(self) -> WireResult<Frame> {
        if self.kind == FrameKind::Error {
            Err(self.to_remote_error())
        } else {
            Ok(self)
        }
    }
}
