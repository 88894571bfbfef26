//! Tagged-structure codec
//!
//! Every field the server exchanges on the control channel is a *tagged
//! value*: one type byte followed by a type-specific body. This module reads
//! and writes those values and knows nothing about commands.
//!
//! ## Wire Format
//!
//! ```text
//! 't' <utf-8 bytes> 0x00          string
//! 'N'                             absent string (not the same as "")
//! 'L' u32                         unsigned 32-bit
//! 'B' u8                          unsigned 8-bit
//! 'R' u64                         unsigned 64-bit
//! 'r' i64                         signed 64-bit
//! 'U' u64                         microseconds
//! 'T' u32 u32                     timeval (sec, usec)
//! 'a' u8 u8 u32                   sample spec (format, channels, rate)
//! 'x' u32 <bytes>                 arbitrary blob, length prefixed
//! '1' / '0'                       boolean
//! 'm' u8 <u8 * n>                 channel map
//! 'v' u8 <u32 * n>                per-channel volume
//! 'V' u32                         single volume
//! 'P' ('t' key, 'L' len, 'x' value)* 'N'   property list
//! 'f' ('B' encoding) <proplist>   format info
//! ```
//!
//! All integers are big-endian. Reading is always typed: the caller asks for
//! the shape it expects and a different tag is a [`CodecError::ProtocolMismatch`].

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

/// Index value the server uses for "no such object"
pub const INVALID_INDEX: u32 = u32::MAX;

/// Maximum channels in a channel map or volume
pub const CHANNELS_MAX: usize = 32;

/// Silence
pub const VOLUME_MUTED: u32 = 0;

/// Volume that means 100% (0 dB)
pub const VOLUME_NORM: u32 = 0x10000;

/// Highest valid volume
pub const VOLUME_MAX: u32 = u32::MAX / 2;

/// Type discriminator preceding every encoded value
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    String = b't',
    StringNull = b'N',
    U32 = b'L',
    U8 = b'B',
    U64 = b'R',
    S64 = b'r',
    SampleSpec = b'a',
    Arbitrary = b'x',
    BooleanTrue = b'1',
    BooleanFalse = b'0',
    Timeval = b'T',
    Usec = b'U',
    ChannelMap = b'm',
    CVolume = b'v',
    Proplist = b'P',
    Volume = b'V',
    FormatInfo = b'f',
}

impl Tag {
    /// Parse a type byte. Unknown bytes are a hard failure.
    pub fn from_u8(value: u8) -> Result<Self, CodecError> {
        Ok(match value {
            b't' => Tag::String,
            b'N' => Tag::StringNull,
            b'L' => Tag::U32,
            b'B' => Tag::U8,
            b'R' => Tag::U64,
            b'r' => Tag::S64,
            b'a' => Tag::SampleSpec,
            b'x' => Tag::Arbitrary,
            b'1' => Tag::BooleanTrue,
            b'0' => Tag::BooleanFalse,
            b'T' => Tag::Timeval,
            b'U' => Tag::Usec,
            b'm' => Tag::ChannelMap,
            b'v' => Tag::CVolume,
            b'P' => Tag::Proplist,
            b'V' => Tag::Volume,
            b'f' => Tag::FormatInfo,
            other => return Err(CodecError::UnknownTag(other)),
        })
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable shape name for error messages
    pub fn name(self) -> &'static str {
        match self {
            Tag::String => "string",
            Tag::StringNull => "null string",
            Tag::U32 => "u32",
            Tag::U8 => "u8",
            Tag::U64 => "u64",
            Tag::S64 => "s64",
            Tag::SampleSpec => "sample spec",
            Tag::Arbitrary => "arbitrary",
            Tag::BooleanTrue | Tag::BooleanFalse => "boolean",
            Tag::Timeval => "timeval",
            Tag::Usec => "usec",
            Tag::ChannelMap => "channel map",
            Tag::CVolume => "cvolume",
            Tag::Proplist => "proplist",
            Tag::Volume => "volume",
            Tag::FormatInfo => "format info",
        }
    }
}

/// Errors while encoding or decoding tagged values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Unknown tag byte {0:#04x}")]
    UnknownTag(u8),
    #[error("Protocol mismatch: expected {expected}, found {found}")]
    ProtocolMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("Truncated {0}")]
    Truncated(&'static str),
    #[error("Invalid UTF-8 in string")]
    InvalidUtf8,
    #[error("String contains an interior NUL byte")]
    InteriorNul,
    #[error("Too many channels: {0} (max 32)")]
    TooManyChannels(usize),
    #[error("Proplist entry {key:?} declares {declared} bytes but carries {actual}")]
    ProplistLength {
        key: String,
        declared: u32,
        actual: usize,
    },
    #[error("{0} unexpected trailing bytes")]
    TrailingData(usize),
}

impl CodecError {
    /// The byte stream no longer lines up with the expected layout, which
    /// points at version skew rather than one bad value
    pub fn is_layout_mismatch(&self) -> bool {
        matches!(
            self,
            CodecError::UnknownTag(_)
                | CodecError::ProtocolMismatch { .. }
                | CodecError::Truncated(_)
                | CodecError::TrailingData(_)
        )
    }
}

/// Sample format, channel count and rate of a stream or device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleSpec {
    /// Raw sample format id as the server numbers it
    pub format: u8,
    pub channels: u8,
    pub rate: u32,
}

/// Seconds and microseconds, as the server sends wall-clock stamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timeval {
    pub sec: u32,
    pub usec: u32,
}

/// Channel positions, one byte each
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelMap(Vec<u8>);

impl ChannelMap {
    pub fn new(positions: Vec<u8>) -> Result<Self, CodecError> {
        if positions.len() > CHANNELS_MAX {
            return Err(CodecError::TooManyChannels(positions.len()));
        }
        Ok(Self(positions))
    }

    pub fn positions(&self) -> &[u8] {
        &self.0
    }

    pub fn channels(&self) -> usize {
        self.0.len()
    }
}

/// Per-channel volume vector
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CVolume(Vec<u32>);

impl CVolume {
    pub fn new(values: Vec<u32>) -> Result<Self, CodecError> {
        if values.len() > CHANNELS_MAX {
            return Err(CodecError::TooManyChannels(values.len()));
        }
        Ok(Self(values))
    }

    pub fn values(&self) -> &[u32] {
        &self.0
    }

    pub fn channels(&self) -> usize {
        self.0.len()
    }

    pub fn into_vec(self) -> Vec<u32> {
        self.0
    }
}

/// Ordered key/value property list
///
/// Values are raw bytes. String properties carry a trailing NUL on the wire,
/// which [`Proplist::insert_str`] adds and [`Proplist::get_str`] strips.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Proplist(BTreeMap<String, Bytes>);

impl Proplist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn insert_str(&mut self, key: impl Into<String>, value: &str) {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        self.0.insert(key.into(), Bytes::from(bytes));
    }

    pub fn get(&self, key: &str) -> Option<&Bytes> {
        self.0.get(key)
    }

    /// String property, if present and valid UTF-8
    pub fn get_str(&self, key: &str) -> Option<&str> {
        let raw: &[u8] = self.0.get(key)?.as_ref();
        let raw = raw.strip_suffix(&[0u8][..]).unwrap_or(raw);
        std::str::from_utf8(raw).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Bytes)> {
        self.0.iter()
    }
}

/// Encoding of a stream or device format plus its properties
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormatInfo {
    pub encoding: u8,
    pub props: Proplist,
}

/// A single decoded tagged value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(Option<String>),
    U32(u32),
    U8(u8),
    U64(u64),
    S64(i64),
    SampleSpec(SampleSpec),
    Arbitrary(Bytes),
    Boolean(bool),
    Timeval(Timeval),
    Usec(u64),
    ChannelMap(ChannelMap),
    CVolume(CVolume),
    Proplist(Proplist),
    Volume(u32),
    FormatInfo(FormatInfo),
}

/// Builds a tagged byte sequence
#[derive(Debug, Default)]
pub struct TagWriter {
    buf: BytesMut,
}

impl TagWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(Tag::U8.to_u8());
        self.buf.put_u8(value);
        self
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u8(Tag::U32.to_u8());
        self.buf.put_u32(value);
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u8(Tag::U64.to_u8());
        self.buf.put_u64(value);
        self
    }

    pub fn put_s64(&mut self, value: i64) -> &mut Self {
        self.buf.put_u8(Tag::S64.to_u8());
        self.buf.put_i64(value);
        self
    }

    pub fn put_usec(&mut self, value: u64) -> &mut Self {
        self.buf.put_u8(Tag::Usec.to_u8());
        self.buf.put_u64(value);
        self
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        let tag = if value {
            Tag::BooleanTrue
        } else {
            Tag::BooleanFalse
        };
        self.buf.put_u8(tag.to_u8());
        self
    }

    pub fn put_volume(&mut self, value: u32) -> &mut Self {
        self.buf.put_u8(Tag::Volume.to_u8());
        self.buf.put_u32(value);
        self
    }

    pub fn put_timeval(&mut self, value: Timeval) -> &mut Self {
        self.buf.put_u8(Tag::Timeval.to_u8());
        self.buf.put_u32(value.sec);
        self.buf.put_u32(value.usec);
        self
    }

    pub fn put_sample_spec(&mut self, spec: &SampleSpec) -> &mut Self {
        self.buf.put_u8(Tag::SampleSpec.to_u8());
        self.buf.put_u8(spec.format);
        self.buf.put_u8(spec.channels);
        self.buf.put_u32(spec.rate);
        self
    }

    pub fn put_arbitrary(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_u8(Tag::Arbitrary.to_u8());
        self.buf.put_u32(data.len() as u32);
        self.buf.put_slice(data);
        self
    }

    /// `None` writes the absent-string tag
    pub fn put_string(&mut self, value: Option<&str>) -> Result<&mut Self, CodecError> {
        match value {
            Some(s) => {
                if s.as_bytes().contains(&0) {
                    return Err(CodecError::InteriorNul);
                }
                self.buf.put_u8(Tag::String.to_u8());
                self.buf.put_slice(s.as_bytes());
                self.buf.put_u8(0);
            }
            None => self.buf.put_u8(Tag::StringNull.to_u8()),
        }
        Ok(self)
    }

    pub fn put_channel_map(&mut self, map: &ChannelMap) -> &mut Self {
        self.buf.put_u8(Tag::ChannelMap.to_u8());
        self.buf.put_u8(map.channels() as u8);
        self.buf.put_slice(map.positions());
        self
    }

    pub fn put_cvolume(&mut self, volume: &CVolume) -> &mut Self {
        self.buf.put_u8(Tag::CVolume.to_u8());
        self.buf.put_u8(volume.channels() as u8);
        for v in volume.values() {
            self.buf.put_u32(*v);
        }
        self
    }

    pub fn put_proplist(&mut self, props: &Proplist) -> Result<&mut Self, CodecError> {
        self.buf.put_u8(Tag::Proplist.to_u8());
        for (key, value) in props.iter() {
            self.put_string(Some(key.as_str()))?;
            self.put_u32(value.len() as u32);
            self.put_arbitrary(value);
        }
        self.buf.put_u8(Tag::StringNull.to_u8());
        Ok(self)
    }

    pub fn put_format_info(&mut self, format: &FormatInfo) -> Result<&mut Self, CodecError> {
        self.buf.put_u8(Tag::FormatInfo.to_u8());
        self.put_u8(format.encoding);
        self.put_proplist(&format.props)
    }

    /// Encode any [`Value`]
    pub fn put_value(&mut self, value: &Value) -> Result<&mut Self, CodecError> {
        match value {
            Value::String(s) => return self.put_string(s.as_deref()),
            Value::U32(v) => self.put_u32(*v),
            Value::U8(v) => self.put_u8(*v),
            Value::U64(v) => self.put_u64(*v),
            Value::S64(v) => self.put_s64(*v),
            Value::SampleSpec(v) => self.put_sample_spec(v),
            Value::Arbitrary(v) => self.put_arbitrary(v),
            Value::Boolean(v) => self.put_bool(*v),
            Value::Timeval(v) => self.put_timeval(*v),
            Value::Usec(v) => self.put_usec(*v),
            Value::ChannelMap(v) => self.put_channel_map(v),
            Value::CVolume(v) => self.put_cvolume(v),
            Value::Proplist(v) => return self.put_proplist(v),
            Value::Volume(v) => self.put_volume(*v),
            Value::FormatInfo(v) => return self.put_format_info(v),
        };
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Reads tagged values from a byte slice, one typed getter per shape
#[derive(Debug, Clone)]
pub struct TagReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TagReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Fail if anything is left unread
    pub fn expect_end(&self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingData(n)),
        }
    }

    /// Look at the next tag without consuming it
    pub fn peek_tag(&self) -> Result<Tag, CodecError> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or(CodecError::Truncated("tag"))?;
        Tag::from_u8(byte)
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated(what));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn raw_u8(&mut self, what: &'static str) -> Result<u8, CodecError> {
        Ok(self.take(1, what)?[0])
    }

    fn raw_u32(&mut self, what: &'static str) -> Result<u32, CodecError> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn raw_u64(&mut self, what: &'static str) -> Result<u64, CodecError> {
        let b = self.take(8, what)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    /// Consume the next tag, requiring it to be `expected`
    fn expect_tag(&mut self, expected: Tag) -> Result<(), CodecError> {
        let found = self.peek_tag()?;
        if found != expected {
            return Err(CodecError::ProtocolMismatch {
                expected: expected.name(),
                found: found.name(),
            });
        }
        self.pos += 1;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.expect_tag(Tag::U8)?;
        self.raw_u8("u8")
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.expect_tag(Tag::U32)?;
        self.raw_u32("u32")
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        self.expect_tag(Tag::U64)?;
        self.raw_u64("u64")
    }

    pub fn read_s64(&mut self) -> Result<i64, CodecError> {
        self.expect_tag(Tag::S64)?;
        Ok(self.raw_u64("s64")? as i64)
    }

    pub fn read_usec(&mut self) -> Result<u64, CodecError> {
        self.expect_tag(Tag::Usec)?;
        self.raw_u64("usec")
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.peek_tag()? {
            Tag::BooleanTrue => {
                self.pos += 1;
                Ok(true)
            }
            Tag::BooleanFalse => {
                self.pos += 1;
                Ok(false)
            }
            other => Err(CodecError::ProtocolMismatch {
                expected: "boolean",
                found: other.name(),
            }),
        }
    }

    pub fn read_volume(&mut self) -> Result<u32, CodecError> {
        self.expect_tag(Tag::Volume)?;
        self.raw_u32("volume")
    }

    pub fn read_timeval(&mut self) -> Result<Timeval, CodecError> {
        self.expect_tag(Tag::Timeval)?;
        Ok(Timeval {
            sec: self.raw_u32("timeval")?,
            usec: self.raw_u32("timeval")?,
        })
    }

    pub fn read_sample_spec(&mut self) -> Result<SampleSpec, CodecError> {
        self.expect_tag(Tag::SampleSpec)?;
        Ok(SampleSpec {
            format: self.raw_u8("sample spec")?,
            channels: self.raw_u8("sample spec")?,
            rate: self.raw_u32("sample spec")?,
        })
    }

    pub fn read_arbitrary(&mut self) -> Result<&'a [u8], CodecError> {
        self.expect_tag(Tag::Arbitrary)?;
        let len = self.raw_u32("arbitrary length")? as usize;
        self.take(len, "arbitrary")
    }

    /// A string that may be absent
    pub fn read_string(&mut self) -> Result<Option<String>, CodecError> {
        match self.peek_tag()? {
            Tag::StringNull => {
                self.pos += 1;
                Ok(None)
            }
            Tag::String => {
                self.pos += 1;
                let rest = &self.buf[self.pos..];
                let nul = rest
                    .iter()
                    .position(|b| *b == 0)
                    .ok_or(CodecError::Truncated("string"))?;
                let s = std::str::from_utf8(&rest[..nul]).map_err(|_| CodecError::InvalidUtf8)?;
                self.pos += nul + 1;
                Ok(Some(s.to_string()))
            }
            other => Err(CodecError::ProtocolMismatch {
                expected: "string",
                found: other.name(),
            }),
        }
    }

    /// A string that must be present
    pub fn read_required_string(&mut self) -> Result<String, CodecError> {
        self.read_string()?.ok_or(CodecError::ProtocolMismatch {
            expected: "string",
            found: "null string",
        })
    }

    pub fn read_channel_map(&mut self) -> Result<ChannelMap, CodecError> {
        self.expect_tag(Tag::ChannelMap)?;
        let channels = self.raw_u8("channel map")? as usize;
        if channels > CHANNELS_MAX {
            return Err(CodecError::TooManyChannels(channels));
        }
        let positions = self.take(channels, "channel map")?.to_vec();
        Ok(ChannelMap(positions))
    }

    pub fn read_cvolume(&mut self) -> Result<CVolume, CodecError> {
        self.expect_tag(Tag::CVolume)?;
        let channels = self.raw_u8("cvolume")? as usize;
        if channels > CHANNELS_MAX {
            return Err(CodecError::TooManyChannels(channels));
        }
        let mut values = Vec::with_capacity(channels);
        for _ in 0..channels {
            values.push(self.raw_u32("cvolume")?);
        }
        Ok(CVolume(values))
    }

    pub fn read_proplist(&mut self) -> Result<Proplist, CodecError> {
        self.expect_tag(Tag::Proplist)?;
        let mut props = Proplist::new();
        loop {
            let Some(key) = self.read_string()? else {
                break;
            };
            let declared = self.read_u32()?;
            let value = self.read_arbitrary()?;
            if value.len() != declared as usize {
                return Err(CodecError::ProplistLength {
                    key,
                    declared,
                    actual: value.len(),
                });
            }
            props.insert(key, Bytes::copy_from_slice(value));
        }
        Ok(props)
    }

    pub fn read_format_info(&mut self) -> Result<FormatInfo, CodecError> {
        self.expect_tag(Tag::FormatInfo)?;
        let encoding = self.read_u8()?;
        let props = self.read_proplist()?;
        Ok(FormatInfo { encoding, props })
    }

    /// Decode whatever value comes next, driven by its own tag
    pub fn read_value(&mut self) -> Result<Value, CodecError> {
        Ok(match self.peek_tag()? {
            Tag::String | Tag::StringNull => Value::String(self.read_string()?),
            Tag::U32 => Value::U32(self.read_u32()?),
            Tag::U8 => Value::U8(self.read_u8()?),
            Tag::U64 => Value::U64(self.read_u64()?),
            Tag::S64 => Value::S64(self.read_s64()?),
            Tag::SampleSpec => Value::SampleSpec(self.read_sample_spec()?),
            Tag::Arbitrary => Value::Arbitrary(Bytes::copy_from_slice(self.read_arbitrary()?)),
            Tag::BooleanTrue | Tag::BooleanFalse => Value::Boolean(self.read_bool()?),
            Tag::Timeval => Value::Timeval(self.read_timeval()?),
            Tag::Usec => Value::Usec(self.read_usec()?),
            Tag::ChannelMap => Value::ChannelMap(self.read_channel_map()?),
            Tag::CVolume => Value::CVolume(self.read_cvolume()?),
            Tag::Proplist => Value::Proplist(self.read_proplist()?),
            Tag::Volume => Value::Volume(self.read_volume()?),
            Tag::FormatInfo => Value::FormatInfo(self.read_format_info()?),
        })
    }
}

/// Encode one value into a fresh buffer
pub fn encode(value: &Value) -> Result<Bytes, CodecError> {
    let mut w = TagWriter::new();
    w.put_value(value)?;
    Ok(w.finish())
}

/// Decode one value, returning it with the number of bytes consumed
pub fn decode(buf: &[u8]) -> Result<(Value, usize), CodecError> {
    let mut r = TagReader::new(buf);
    let value = r.read_value()?;
    Ok((value, r.position()))
}
