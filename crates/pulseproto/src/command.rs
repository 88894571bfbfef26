//! Command numbers and the control packet envelope
//!
//! Every control payload starts with two tagged u32 values, the command
//! number and the correlation tag, followed by command-specific fields:
//!
//! ```text
//! L command | L tag | fields...
//! ```
//!
//! Replies use `REPLY` with the request's tag; failures use `ERROR` with the
//! tag and a `L code`. Unsolicited pushes carry [`EVENT_TAG`].

use bytes::Bytes;

use crate::tagstruct::{CodecError, TagReader, TagWriter};

/// Tag value the server puts on unsolicited packets
pub const EVENT_TAG: u32 = u32::MAX;

macro_rules! commands {
    ($($(#[$meta:meta])* $variant:ident = $value:literal,)+) => {
        /// Native protocol command numbers
        #[repr(u32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Command {
            $($(#[$meta])* $variant = $value,)+
        }

        impl Command {
            /// Map a wire number to a command, `None` for numbers this client doesn't know
            pub fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $($value => Some(Command::$variant),)+
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Command::$variant => stringify!($variant),)+
                }
            }
        }
    };
}

commands! {
    /// Failure reply: `L code`
    Error = 0,
    Timeout = 1,
    /// Success reply: command-specific fields
    Reply = 2,
    CreatePlaybackStream = 3,
    DeletePlaybackStream = 4,
    CreateRecordStream = 5,
    DeleteRecordStream = 6,
    Exit = 7,
    Auth = 8,
    SetClientName = 9,
    LookupSink = 10,
    LookupSource = 11,
    DrainPlaybackStream = 12,
    Stat = 13,
    GetPlaybackLatency = 14,
    CreateUploadStream = 15,
    DeleteUploadStream = 16,
    FinishUploadStream = 17,
    PlaySample = 18,
    RemoveSample = 19,
    GetServerInfo = 20,
    GetSinkInfo = 21,
    GetSinkInfoList = 22,
    GetSourceInfo = 23,
    GetSourceInfoList = 24,
    GetModuleInfo = 25,
    GetModuleInfoList = 26,
    GetClientInfo = 27,
    GetClientInfoList = 28,
    GetSinkInputInfo = 29,
    GetSinkInputInfoList = 30,
    GetSourceOutputInfo = 31,
    GetSourceOutputInfoList = 32,
    GetSampleInfo = 33,
    GetSampleInfoList = 34,
    Subscribe = 35,
    SetSinkVolume = 36,
    SetSinkInputVolume = 37,
    SetSourceVolume = 38,
    SetSinkMute = 39,
    SetSourceMute = 40,
    CorkPlaybackStream = 41,
    FlushPlaybackStream = 42,
    TriggerPlaybackStream = 43,
    SetDefaultSink = 44,
    SetDefaultSource = 45,
    SetPlaybackStreamName = 46,
    SetRecordStreamName = 47,
    KillClient = 48,
    KillSinkInput = 49,
    KillSourceOutput = 50,
    LoadModule = 51,
    UnloadModule = 52,
    AddAutoload = 53,
    RemoveAutoload = 54,
    GetAutoloadInfo = 55,
    GetAutoloadInfoList = 56,
    GetRecordLatency = 57,
    CorkRecordStream = 58,
    FlushRecordStream = 59,
    PrebufPlaybackStream = 60,
    Request = 61,
    Overflow = 62,
    Underflow = 63,
    PlaybackStreamKilled = 64,
    RecordStreamKilled = 65,
    /// Unsolicited change notification: `L event | L index`
    SubscribeEvent = 66,
    MoveSinkInput = 67,
    MoveSourceOutput = 68,
    SetSinkInputMute = 69,
    SuspendSink = 70,
    SuspendSource = 71,
    SetPlaybackStreamBufferAttr = 72,
    SetRecordStreamBufferAttr = 73,
    UpdatePlaybackStreamSampleRate = 74,
    UpdateRecordStreamSampleRate = 75,
    PlaybackStreamSuspended = 76,
    RecordStreamSuspended = 77,
    PlaybackStreamMoved = 78,
    RecordStreamMoved = 79,
    UpdateRecordStreamProplist = 80,
    UpdatePlaybackStreamProplist = 81,
    UpdateClientProplist = 82,
    RemoveRecordStreamProplist = 83,
    RemovePlaybackStreamProplist = 84,
    RemoveClientProplist = 85,
    Started = 86,
    Extension = 87,
    GetCardInfo = 88,
    GetCardInfoList = 89,
    SetCardProfile = 90,
    ClientEvent = 91,
    PlaybackStreamEvent = 92,
    RecordStreamEvent = 93,
    PlaybackBufferAttrChanged = 94,
    RecordBufferAttrChanged = 95,
    SetSinkPort = 96,
    SetSourcePort = 97,
    SetSourceOutputVolume = 98,
    SetSourceOutputMute = 99,
    SetPortLatencyOffset = 100,
    EnableSrbchannel = 101,
    DisableSrbchannel = 102,
    RegisterMemfdShmid = 103,
    SendObjectMessage = 104,
}

impl Command {
    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.to_u32())
    }
}

/// A control payload split into its envelope and remaining fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Raw command number; see [`Packet::command`]
    pub command: u32,
    pub tag: u32,
    /// Tagged fields after the envelope
    pub body: Bytes,
}

impl Packet {
    /// Read the `L command | L tag` envelope
    pub fn parse(payload: Bytes) -> Result<Self, CodecError> {
        let mut r = TagReader::new(&payload);
        let command = r.read_u32()?;
        let tag = r.read_u32()?;
        let consumed = r.position();
        Ok(Self {
            command,
            tag,
            body: payload.slice(consumed..),
        })
    }

    pub fn command(&self) -> Option<Command> {
        Command::from_u32(self.command)
    }

    pub fn is_event(&self) -> bool {
        self.tag == EVENT_TAG
    }

    /// Reader positioned at the first body field
    pub fn reader(&self) -> TagReader<'_> {
        TagReader::new(&self.body)
    }

    /// Start an outgoing packet with its envelope already written
    pub fn begin(command: Command, tag: u32) -> TagWriter {
        let mut w = TagWriter::new();
        w.put_u32(command.to_u32()).put_u32(tag);
        w
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_numbers_round_trip() {
        for n in 0..=104u32 {
            let cmd = Command::from_u32(n).expect("contiguous table");
            assert_eq!(cmd.to_u32(), n);
        }
        assert_eq!(Command::from_u32(105), None);
        assert_eq!(Command::from_u32(EVENT_TAG), None);
    }

    #[test]
    fn well_known_numbers() {
        assert_eq!(Command::Error.to_u32(), 0);
        assert_eq!(Command::Reply.to_u32(), 2);
        assert_eq!(Command::Auth.to_u32(), 8);
        assert_eq!(Command::SubscribeEvent.to_u32(), 66);
        assert_eq!(Command::MoveSourceOutput.to_u32(), 68);
        assert_eq!(Command::SetSinkPort.to_u32(), 96);
        assert_eq!(Command::SetSourceOutputMute.to_u32(), 99);
    }

    #[test]
    fn envelope_round_trip() {
        let mut w = Packet::begin(Command::UnloadModule, 42);
        w.put_u32(7);
        let packet = Packet::parse(w.finish()).unwrap();

        assert_eq!(packet.command(), Some(Command::UnloadModule));
        assert_eq!(packet.tag, 42);
        assert!(!packet.is_event());

        let mut r = packet.reader();
        assert_eq!(r.read_u32().unwrap(), 7);
        r.expect_end().unwrap();
    }

    #[test]
    fn envelope_requires_u32_fields() {
        let mut w = TagWriter::new();
        w.put_u8(2);
        assert!(matches!(
            Packet::parse(w.finish()),
            Err(CodecError::ProtocolMismatch { .. })
        ));

        let mut w = TagWriter::new();
        w.put_u32(2);
        assert!(matches!(
            Packet::parse(w.finish()),
            Err(CodecError::Truncated(_))
        ));
    }

    #[test]
    fn display_includes_number() {
        assert_eq!(Command::LoadModule.to_string(), "LoadModule(51)");
    }
}
