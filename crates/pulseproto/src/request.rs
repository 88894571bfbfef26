//! Typed requests
//!
//! One variant per supported command. Each variant knows its command number,
//! how to encode its fields, and which reply shape the server answers with,
//! so the dispatcher never branches on raw command numbers.

use bytes::Bytes;

use crate::command::{Command, Packet};
use crate::events::SubscriptionMask;
use crate::responses::ReplyShape;
use crate::tagstruct::{CVolume, CodecError, TagWriter, INVALID_INDEX};

/// Addresses a sink or source by index or by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Index(u32),
    Name(String),
}

impl Target {
    /// Both addressing fields: the index (or invalid) then the name (or null)
    fn write(&self, w: &mut TagWriter) -> Result<(), CodecError> {
        match self {
            Target::Index(index) => {
                w.put_u32(*index).put_string(None)?;
            }
            Target::Name(name) => {
                w.put_u32(INVALID_INDEX).put_string(Some(name.as_str()))?;
            }
        }
        Ok(())
    }
}

impl From<u32> for Target {
    fn from(index: u32) -> Self {
        Target::Index(index)
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Target::Name(name.to_string())
    }
}

impl From<String> for Target {
    fn from(name: String) -> Self {
        Target::Name(name)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Index(index) => write!(f, "#{}", index),
            Target::Name(name) => write!(f, "{:?}", name),
        }
    }
}

/// A command the client can issue after the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetServerInfo,
    GetSinkInfo(Target),
    GetSinkInfoList,
    GetSourceInfo(Target),
    GetSourceInfoList,
    GetSinkInputInfo(u32),
    GetSinkInputInfoList,
    GetSourceOutputInfo(u32),
    GetSourceOutputInfoList,
    GetModuleInfo(u32),
    GetModuleInfoList,
    GetClientInfo(u32),
    GetClientInfoList,
    LookupSink(String),
    LookupSource(String),
    Subscribe(SubscriptionMask),
    SetSinkVolume { target: Target, volume: CVolume },
    SetSourceVolume { target: Target, volume: CVolume },
    SetSinkInputVolume { index: u32, volume: CVolume },
    SetSourceOutputVolume { index: u32, volume: CVolume },
    SetSinkMute { target: Target, mute: bool },
    SetSourceMute { target: Target, mute: bool },
    SetSinkInputMute { index: u32, mute: bool },
    SetSourceOutputMute { index: u32, mute: bool },
    SetDefaultSink(String),
    SetDefaultSource(String),
    SetSinkPort { target: Target, port: String },
    SetSourcePort { target: Target, port: String },
    SuspendSink { target: Target, suspend: bool },
    SuspendSource { target: Target, suspend: bool },
    MoveSinkInput { index: u32, sink: Target },
    MoveSourceOutput { index: u32, source: Target },
    KillClient(u32),
    KillSinkInput(u32),
    KillSourceOutput(u32),
    LoadModule { name: String, argument: Option<String> },
    UnloadModule(u32),
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::GetServerInfo => Command::GetServerInfo,
            Request::GetSinkInfo(_) => Command::GetSinkInfo,
            Request::GetSinkInfoList => Command::GetSinkInfoList,
            Request::GetSourceInfo(_) => Command::GetSourceInfo,
            Request::GetSourceInfoList => Command::GetSourceInfoList,
            Request::GetSinkInputInfo(_) => Command::GetSinkInputInfo,
            Request::GetSinkInputInfoList => Command::GetSinkInputInfoList,
            Request::GetSourceOutputInfo(_) => Command::GetSourceOutputInfo,
            Request::GetSourceOutputInfoList => Command::GetSourceOutputInfoList,
            Request::GetModuleInfo(_) => Command::GetModuleInfo,
            Request::GetModuleInfoList => Command::GetModuleInfoList,
            Request::GetClientInfo(_) => Command::GetClientInfo,
            Request::GetClientInfoList => Command::GetClientInfoList,
            Request::LookupSink(_) => Command::LookupSink,
            Request::LookupSource(_) => Command::LookupSource,
            Request::Subscribe(_) => Command::Subscribe,
            Request::SetSinkVolume { .. } => Command::SetSinkVolume,
            Request::SetSourceVolume { .. } => Command::SetSourceVolume,
            Request::SetSinkInputVolume { .. } => Command::SetSinkInputVolume,
            Request::SetSourceOutputVolume { .. } => Command::SetSourceOutputVolume,
            Request::SetSinkMute { .. } => Command::SetSinkMute,
            Request::SetSourceMute { .. } => Command::SetSourceMute,
            Request::SetSinkInputMute { .. } => Command::SetSinkInputMute,
            Request::SetSourceOutputMute { .. } => Command::SetSourceOutputMute,
            Request::SetDefaultSink(_) => Command::SetDefaultSink,
            Request::SetDefaultSource(_) => Command::SetDefaultSource,
            Request::SetSinkPort { .. } => Command::SetSinkPort,
            Request::SetSourcePort { .. } => Command::SetSourcePort,
            Request::SuspendSink { .. } => Command::SuspendSink,
            Request::SuspendSource { .. } => Command::SuspendSource,
            Request::MoveSinkInput { .. } => Command::MoveSinkInput,
            Request::MoveSourceOutput { .. } => Command::MoveSourceOutput,
            Request::KillClient(_) => Command::KillClient,
            Request::KillSinkInput(_) => Command::KillSinkInput,
            Request::KillSourceOutput(_) => Command::KillSourceOutput,
            Request::LoadModule { .. } => Command::LoadModule,
            Request::UnloadModule(_) => Command::UnloadModule,
        }
    }

    /// What a successful reply to this request carries
    pub fn reply_shape(&self) -> ReplyShape {
        match self {
            Request::GetServerInfo => ReplyShape::ServerInfo,
            Request::GetSinkInfo(_) => ReplyShape::Sink,
            Request::GetSinkInfoList => ReplyShape::SinkList,
            Request::GetSourceInfo(_) => ReplyShape::Source,
            Request::GetSourceInfoList => ReplyShape::SourceList,
            Request::GetSinkInputInfo(_) => ReplyShape::SinkInput,
            Request::GetSinkInputInfoList => ReplyShape::SinkInputList,
            Request::GetSourceOutputInfo(_) => ReplyShape::SourceOutput,
            Request::GetSourceOutputInfoList => ReplyShape::SourceOutputList,
            Request::GetModuleInfo(_) => ReplyShape::Module,
            Request::GetModuleInfoList => ReplyShape::ModuleList,
            Request::GetClientInfo(_) => ReplyShape::Client,
            Request::GetClientInfoList => ReplyShape::ClientList,
            Request::LookupSink(_) | Request::LookupSource(_) | Request::LoadModule { .. } => {
                ReplyShape::Index
            }
            Request::Subscribe(_)
            | Request::SetSinkVolume { .. }
            | Request::SetSourceVolume { .. }
            | Request::SetSinkInputVolume { .. }
            | Request::SetSourceOutputVolume { .. }
            | Request::SetSinkMute { .. }
            | Request::SetSourceMute { .. }
            | Request::SetSinkInputMute { .. }
            | Request::SetSourceOutputMute { .. }
            | Request::SetDefaultSink(_)
            | Request::SetDefaultSource(_)
            | Request::SetSinkPort { .. }
            | Request::SetSourcePort { .. }
            | Request::SuspendSink { .. }
            | Request::SuspendSource { .. }
            | Request::MoveSinkInput { .. }
            | Request::MoveSourceOutput { .. }
            | Request::KillClient(_)
            | Request::KillSinkInput(_)
            | Request::KillSourceOutput(_)
            | Request::UnloadModule(_) => ReplyShape::Empty,
        }
    }

    /// Write the command fields that follow the envelope
    pub fn encode(&self, w: &mut TagWriter) -> Result<(), CodecError> {
        match self {
            Request::GetServerInfo
            | Request::GetSinkInfoList
            | Request::GetSourceInfoList
            | Request::GetSinkInputInfoList
            | Request::GetSourceOutputInfoList
            | Request::GetModuleInfoList
            | Request::GetClientInfoList => {}

            Request::GetSinkInfo(target) | Request::GetSourceInfo(target) => target.write(w)?,

            Request::GetSinkInputInfo(index)
            | Request::GetSourceOutputInfo(index)
            | Request::GetModuleInfo(index)
            | Request::GetClientInfo(index)
            | Request::KillClient(index)
            | Request::KillSinkInput(index)
            | Request::KillSourceOutput(index)
            | Request::UnloadModule(index) => {
                w.put_u32(*index);
            }

            Request::LookupSink(name)
            | Request::LookupSource(name)
            | Request::SetDefaultSink(name)
            | Request::SetDefaultSource(name) => {
                w.put_string(Some(name.as_str()))?;
            }

            Request::Subscribe(mask) => {
                w.put_u32(mask.bits());
            }

            Request::SetSinkVolume { target, volume }
            | Request::SetSourceVolume { target, volume } => {
                target.write(w)?;
                w.put_cvolume(volume);
            }

            Request::SetSinkInputVolume { index, volume }
            | Request::SetSourceOutputVolume { index, volume } => {
                w.put_u32(*index).put_cvolume(volume);
            }

            Request::SetSinkMute { target, mute } | Request::SetSourceMute { target, mute } => {
                target.write(w)?;
                w.put_bool(*mute);
            }

            Request::SetSinkInputMute { index, mute }
            | Request::SetSourceOutputMute { index, mute } => {
                w.put_u32(*index).put_bool(*mute);
            }

            Request::SetSinkPort { target, port } | Request::SetSourcePort { target, port } => {
                target.write(w)?;
                w.put_string(Some(port.as_str()))?;
            }

            Request::SuspendSink { target, suspend }
            | Request::SuspendSource { target, suspend } => {
                target.write(w)?;
                w.put_bool(*suspend);
            }

            Request::MoveSinkInput { index, sink: dest }
            | Request::MoveSourceOutput {
                index,
                source: dest,
            } => {
                w.put_u32(*index);
                dest.write(w)?;
            }

            Request::LoadModule { name, argument } => {
                w.put_string(Some(name.as_str()))?
                    .put_string(argument.as_deref())?;
            }
        }
        Ok(())
    }

    /// Complete control payload for this request under `tag`
    pub fn to_payload(&self, tag: u32) -> Result<Bytes, CodecError> {
        let mut w = Packet::begin(self.command(), tag);
        self.encode(&mut w)?;
        Ok(w.finish())
    }
}
