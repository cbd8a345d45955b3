//! RFC 6455 frame codec.
//!
//! [`FrameCodec`] turns a byte stream into individual frames and back.
//! [`MessageCodec`] sits on top of it, reassembling fragmented data
//! messages and parsing close payloads, and is what the transport frames
//! its socket with.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use convo_core::constants::DEFAULT_MAX_FRAME_SIZE;

use crate::error::FrameError;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_BITS: u8 = 0x7F;
const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// A single WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    /// Present when the payload is masked on the wire.
    pub mask_key: Option<[u8; 4]>,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(fin: bool, opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            mask_key: None,
            payload: payload.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(true, Opcode::Text, Bytes::from(text.into()))
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Binary, data)
    }

    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Ping, data)
    }

    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Pong, data)
    }

    /// Close frame: 2-byte status code followed by the UTF-8 reason.
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code);
        payload.put_slice(reason.as_bytes());
        Self::new(true, Opcode::Close, payload.freeze())
    }

    pub fn is_masked(&self) -> bool {
        self.mask_key.is_some()
    }

    /// Use a fixed masking key instead of a random one when encoding.
    pub fn with_mask(mut self, key: [u8; 4]) -> Self {
        self.mask_key = Some(key);
        self
    }
}

/// Split a data payload into a first frame plus continuation frames of at
/// most `max_fragment` bytes each. Only the last frame carries FIN.
pub fn fragment(opcode: Opcode, payload: Bytes, max_fragment: usize) -> Vec<Frame> {
    let max_fragment = max_fragment.max(1);
    if payload.len() <= max_fragment {
        return vec![Frame::new(true, opcode, payload)];
    }

    let mut frames = Vec::with_capacity(payload.len().div_ceil(max_fragment));
    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + max_fragment).min(payload.len());
        let op = if offset == 0 { opcode } else { Opcode::Continuation };
        frames.push(Frame::new(end == payload.len(), op, payload.slice(offset..end)));
        offset = end;
    }
    frames
}

/// XOR `payload` with the 4-byte key. Applying it twice restores the input.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Which end of the connection this codec serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Masks every outgoing frame.
    Client,
    /// Never masks.
    Server,
}

#[derive(Debug, Clone, Copy)]
struct Header {
    fin: bool,
    opcode: Opcode,
    masked: bool,
    len: u64,
    mask_key: Option<[u8; 4]>,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Opcode,
    Length,
    ExtendedLength(usize),
    MaskKey,
    Payload,
}

/// Stateful frame decoder and stateless frame encoder.
#[derive(Debug)]
pub struct FrameCodec {
    role: Role,
    max_frame_size: usize,
    stage: Stage,
    header: Header,
}

impl FrameCodec {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            stage: Stage::Opcode,
            header: Header {
                fin: true,
                opcode: Opcode::Text,
                masked: false,
                len: 0,
                mask_key: None,
            },
        }
    }

    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn reset(&mut self) {
        self.stage = Stage::Opcode;
        self.header.mask_key = None;
        self.header.len = 0;
    }

    fn after_length(&mut self) -> Result<(), FrameError> {
        if self.header.len > self.max_frame_size as u64 {
            return Err(FrameError::PayloadTooLarge {
                size: self.header.len,
                limit: self.max_frame_size,
            });
        }
        self.stage = if self.header.masked {
            Stage::MaskKey
        } else {
            Stage::Payload
        };
        Ok(())
    }

    fn decode_inner(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        loop {
            match self.stage {
                Stage::Opcode => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let b0 = src.get_u8();
                    if b0 & RSV_BITS != 0 {
                        return Err(FrameError::ReservedBits(b0 & RSV_BITS));
                    }
                    let opcode = Opcode::from_u8(b0 & OPCODE_BITS)
                        .ok_or(FrameError::BadOpcode(b0 & OPCODE_BITS))?;
                    let fin = b0 & FIN_BIT != 0;
                    if opcode.is_control() && !fin {
                        return Err(FrameError::FragmentedControl);
                    }
                    self.header.fin = fin;
                    self.header.opcode = opcode;
                    self.stage = Stage::Length;
                }
                Stage::Length => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let b1 = src.get_u8();
                    self.header.masked = b1 & MASK_BIT != 0;
                    let len7 = b1 & LEN_BITS;
                    if self.header.opcode.is_control() && u64::from(len7) > MAX_CONTROL_PAYLOAD {
                        return Err(FrameError::ControlFrameTooLarge(u64::from(len7)));
                    }
                    match len7 {
                        126 => self.stage = Stage::ExtendedLength(2),
                        127 => self.stage = Stage::ExtendedLength(8),
                        n => {
                            self.header.len = u64::from(n);
                            self.after_length()?;
                        }
                    }
                }
                Stage::ExtendedLength(width) => {
                    if src.len() < width {
                        return Ok(None);
                    }
                    self.header.len = if width == 2 {
                        u64::from(src.get_u16())
                    } else {
                        let len = src.get_u64();
                        if len & (1 << 63) != 0 {
                            return Err(FrameError::LengthOverflow);
                        }
                        len
                    };
                    self.after_length()?;
                }
                Stage::MaskKey => {
                    if src.len() < 4 {
                        return Ok(None);
                    }
                    let mut key = [0u8; 4];
                    src.copy_to_slice(&mut key);
                    self.header.mask_key = Some(key);
                    self.stage = Stage::Payload;
                }
                Stage::Payload => {
                    // Bounded by max_frame_size in after_length.
                    let len = self.header.len as usize;
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }
                    let mut payload = src.split_to(len);
                    if let Some(key) = self.header.mask_key {
                        apply_mask(&mut payload, key);
                    }
                    let frame = Frame {
                        fin: self.header.fin,
                        opcode: self.header.opcode,
                        mask_key: self.header.mask_key,
                        payload: payload.freeze(),
                    };
                    self.reset();
                    return Ok(Some(frame));
                }
            }
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let result = self.decode_inner(src);
        if result.is_err() {
            self.reset();
        }
        result
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = frame.payload.len();
        if frame.opcode.is_control() {
            if !frame.fin {
                return Err(FrameError::FragmentedControl);
            }
            if len as u64 > MAX_CONTROL_PAYLOAD {
                return Err(FrameError::ControlFrameTooLarge(len as u64));
            }
        }

        let mask_key = match self.role {
            Role::Client => Some(frame.mask_key.unwrap_or_else(rand::random::<[u8; 4]>)),
            Role::Server => None,
        };
        let mask_bit = if mask_key.is_some() { MASK_BIT } else { 0 };

        dst.reserve(14 + len);
        let fin_bit = if frame.fin { FIN_BIT } else { 0 };
        dst.put_u8(fin_bit | frame.opcode.as_u8());

        if len <= 125 {
            dst.put_u8(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(len as u64);
        }

        match mask_key {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(&frame.payload);
                apply_mask(&mut dst[start..], key);
            }
            None => dst.put_slice(&frame.payload),
        }
        Ok(())
    }
}

/// Close status code and reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

/// A complete WebSocket message after reassembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseFrame>),
}

impl Message {
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        }))
    }
}

/// Message-level codec: reassembles fragments on decode and optionally
/// fragments large data messages on encode.
#[derive(Debug)]
pub struct MessageCodec {
    frames: FrameCodec,
    partial: Option<(Opcode, BytesMut)>,
    fragment_size: Option<usize>,
}

impl MessageCodec {
    pub fn new(role: Role) -> Self {
        Self {
            frames: FrameCodec::new(role),
            partial: None,
            fragment_size: None,
        }
    }

    /// Also bounds the size of a reassembled message.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.frames = self.frames.with_max_frame_size(max);
        self
    }

    /// Split outgoing data messages into frames of at most `size` bytes.
    pub fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = Some(size);
        self
    }

    fn finish(opcode: Opcode, payload: Bytes) -> Result<Message, FrameError> {
        match opcode {
            Opcode::Text => String::from_utf8(payload.to_vec())
                .map(Message::Text)
                .map_err(|_| FrameError::InvalidUtf8),
            _ => Ok(Message::Binary(payload)),
        }
    }

    fn parse_close(payload: Bytes) -> Result<Message, FrameError> {
        match payload.len() {
            0 => Ok(Message::Close(None)),
            1 => Err(FrameError::InvalidClosePayload),
            _ => {
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                let reason = std::str::from_utf8(&payload[2..])
                    .map_err(|_| FrameError::InvalidUtf8)?
                    .to_string();
                Ok(Message::Close(Some(CloseFrame { code, reason })))
            }
        }
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        loop {
            let Some(frame) = self.frames.decode(src)? else {
                return Ok(None);
            };

            match frame.opcode {
                Opcode::Continuation => {
                    let Some((_, buffer)) = self.partial.as_mut() else {
                        return Err(FrameError::UnexpectedContinuation);
                    };
                    buffer.extend_from_slice(&frame.payload);
                    let limit = self.frames.max_frame_size();
                    if buffer.len() > limit {
                        let size = buffer.len() as u64;
                        self.partial = None;
                        return Err(FrameError::PayloadTooLarge { size, limit });
                    }
                    if frame.fin {
                        if let Some((opcode, buffer)) = self.partial.take() {
                            return Self::finish(opcode, buffer.freeze()).map(Some);
                        }
                    }
                }
                Opcode::Text | Opcode::Binary => {
                    if self.partial.is_some() {
                        self.partial = None;
                        return Err(FrameError::InterleavedFragment);
                    }
                    if frame.fin {
                        return Self::finish(frame.opcode, frame.payload).map(Some);
                    }
                    self.partial = Some((frame.opcode, BytesMut::from(&frame.payload[..])));
                }
                Opcode::Close => return Self::parse_close(frame.payload).map(Some),
                Opcode::Ping => return Ok(Some(Message::Ping(frame.payload))),
                Opcode::Pong => {
                    debug!("pong received ({} bytes)", frame.payload.len());
                    return Ok(Some(Message::Pong(frame.payload)));
                }
            }
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = FrameError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        let (opcode, payload) = match message {
            Message::Text(text) => (Opcode::Text, Bytes::from(text)),
            Message::Binary(data) => (Opcode::Binary, data),
            Message::Ping(data) => return self.frames.encode(Frame::ping(data), dst),
            Message::Pong(data) => return self.frames.encode(Frame::pong(data), dst),
            Message::Close(None) => {
                return self.frames.encode(Frame::new(true, Opcode::Close, Bytes::new()), dst)
            }
            Message::Close(Some(close)) => {
                return self.frames.encode(Frame::close(close.code, &close.reason), dst)
            }
        };

        match self.fragment_size {
            Some(size) => {
                for frame in fragment(opcode, payload, size) {
                    self.frames.encode(frame, dst)?;
                }
                Ok(())
            }
            None => self.frames.encode(Frame::new(true, opcode, payload), dst),
        }
    }
}
