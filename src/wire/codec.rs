//! Proxy frame codec for tokio_util.
//!
//! Every frame is prefixed with a 4-byte big-endian length covering the
//! kind byte, the 8-byte correlation id and the body.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::error::WireError;
use super::frame::{Frame, FrameKind};

/// Length prefix size
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Kind byte + correlation id
pub const FRAME_HEADER_SIZE: usize = 1 + 8;

/// Default maximum frame size (64MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Length-prefixed frame codec.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximum frame size (header + body)
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a new codec with default settings.
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with custom max frame size.
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Maximum frame size
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let frame_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if frame_len > self.max_frame_size {
            return Err(WireError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_size,
            });
        }

        if frame_len < FRAME_HEADER_SIZE {
            return Err(WireError::Malformed(format!(
                "frame length {} shorter than header",
                frame_len
            )));
        }

        if src.len() < LENGTH_PREFIX_SIZE + frame_len {
            // Reserve the rest so the next read can fill it at once
            src.reserve(LENGTH_PREFIX_SIZE + frame_len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let kind = FrameKind::from_u8(src.get_u8())?;
        let request_id = src.get_u64();
        let body = src.split_to(frame_len - FRAME_HEADER_SIZE).freeze();

        Ok(Some(Frame {
            kind,
            request_id,
            body,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame_len = FRAME_HEADER_SIZE + item.body.len();
        if frame_len > self.max_frame_size {
            return Err(WireError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_size,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + frame_len);
        dst.put_u32(frame_len as u32);
        dst.put_u8(item.kind as u8);
        dst.put_u64(item.request_id);
        dst.put_slice(&item.body);
        Ok(())
    }
}
