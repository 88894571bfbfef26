//! Frame layer
//!
//! Everything on the socket travels in frames: a fixed 20-byte descriptor
//! followed by the payload the descriptor announces.
//!
//! ## Wire Format
//!
//! ```text
//! u32 length      payload bytes that follow (big-endian)
//! u32 channel     0xFFFFFFFF for control packets, stream channel otherwise
//! u32 offset_hi   seek offset, zero for control packets
//! u32 offset_lo
//! u32 flags       zero for control packets
//! <length bytes of payload>
//! ```
//!
//! Control payloads are tagged structures (see [`crate::tagstruct`]). This
//! client never opens audio streams, so a frame on any other channel is a
//! protocol violation for the session above.
//!
//! Reassembly never yields a partial frame. The declared length is checked
//! against the configured ceiling as soon as the descriptor is readable, so a
//! corrupt length is rejected before the body is buffered.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the frame descriptor
pub const DESCRIPTOR_SIZE: usize = 20;

/// Channel id used by every control packet
pub const CONTROL_CHANNEL: u32 = u32::MAX;

/// Largest payload accepted unless configured otherwise (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Errors from the frame layer
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Frame too large: declared {size} bytes, limit {max}")]
    FrameTooLarge { size: u32, max: u32 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel: u32,
    pub offset: u64,
    pub flags: u32,
    pub payload: Bytes,
}

impl Frame {
    /// A control-channel frame around a tagged payload
    pub fn control(payload: impl Into<Bytes>) -> Self {
        Self {
            channel: CONTROL_CHANNEL,
            offset: 0,
            flags: 0,
            payload: payload.into(),
        }
    }

    pub fn is_control(&self) -> bool {
        self.channel == CONTROL_CHANNEL
    }

    /// Write descriptor and payload into `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(DESCRIPTOR_SIZE + self.payload.len());
        dst.put_u32(self.payload.len() as u32);
        dst.put_u32(self.channel);
        dst.put_u32((self.offset >> 32) as u32);
        dst.put_u32(self.offset as u32);
        dst.put_u32(self.flags);
        dst.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Frame a control payload for the wire
pub fn frame(payload: &[u8]) -> Bytes {
    Frame::control(Bytes::copy_from_slice(payload)).to_bytes()
}

/// Reassembles frames from arbitrary chunk boundaries
///
/// Usable directly through [`FrameCodec::feed`], or as a
/// `tokio_util::codec` decoder/encoder pair under `FramedRead`/`FramedWrite`.
#[derive(Debug)]
pub struct FrameCodec {
    max_frame_size: u32,
    buf: BytesMut,
}

impl FrameCodec {
    pub fn new(max_frame_size: u32) -> Self {
        Self {
            max_frame_size,
            buf: BytesMut::new(),
        }
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append a chunk and return every frame it completed.
    ///
    /// Trailing bytes stay buffered for the next call. After an error the
    /// stream is unusable; the caller must discard it.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, FrameError> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = decode_frame(&mut self.buf, self.max_frame_size)? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

/// Split one complete frame off the front of `src`, if there is one
pub fn decode_frame(src: &mut BytesMut, max_frame_size: u32) -> Result<Option<Frame>, FrameError> {
    if src.len() < DESCRIPTOR_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
    if length > max_frame_size {
        return Err(FrameError::FrameTooLarge {
            size: length,
            max: max_frame_size,
        });
    }

    let total = DESCRIPTOR_SIZE + length as usize;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    let mut descriptor = src.split_to(DESCRIPTOR_SIZE);
    descriptor.advance(4);
    let channel = descriptor.get_u32();
    let offset_hi = descriptor.get_u32() as u64;
    let offset_lo = descriptor.get_u32() as u64;
    let flags = descriptor.get_u32();
    let payload = src.split_to(length as usize).freeze();

    Ok(Some(Frame {
        channel,
        offset: (offset_hi << 32) | offset_lo,
        flags,
        payload,
    }))
}

#[cfg(feature = "client")]
impl tokio_util::codec::Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        decode_frame(src, self.max_frame_size)
    }
}

#[cfg(feature = "client")]
impl tokio_util::codec::Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        item.encode(dst);
        Ok(())
    }
}
