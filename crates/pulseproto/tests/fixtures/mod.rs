//! In-memory sound server for exercising the client end to end.
//!
//! `FakeServer` speaks the server side of the protocol over a
//! `tokio::io::duplex` pipe against a small mutable model of sinks, sources,
//! streams, modules and clients. Lower-level helpers let a test script the
//! server by hand instead.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use pulseproto::domain::{DeviceState, PortAvailable};
use pulseproto::error::{ERR_ACCESS, ERR_NOENTITY};
use pulseproto::tagstruct::{CodecError, INVALID_INDEX};
use pulseproto::{
    CVolume, ChannelMap, Client, ClientConfig, ClientInfo, Command, Cookie, Frame, FrameCodec,
    Module, Packet, Port, Proplist, SampleSpec, ServerInfo, Sink, SinkInput, Source, SourceOutput,
    TagReader, TagWriter, EVENT_TAG, VOLUME_NORM,
};
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

pub const ERR_COMMAND: u32 = 2;
pub const ERR_INVALID: u32 = 3;
pub const ERR_PROTOCOL: u32 = 7;

pub type ServerReader = FramedRead<ReadHalf<DuplexStream>, FrameCodec>;
pub type ServerWriter = FramedWrite<WriteHalf<DuplexStream>, FrameCodec>;

/// Client-side stream plus the framed server halves
pub fn pipe() -> (DuplexStream, ServerReader, ServerWriter) {
    pipe_with_capacity(256 * 1024)
}

/// Like [`pipe`], with `capacity` bytes buffered each way
pub fn pipe_with_capacity(capacity: usize) -> (DuplexStream, ServerReader, ServerWriter) {
    let (client, server) = tokio::io::duplex(capacity);
    let (read_half, write_half) = tokio::io::split(server);
    (
        client,
        FramedRead::new(read_half, FrameCodec::default()),
        FramedWrite::new(write_half, FrameCodec::default()),
    )
}

/// Client settings for tests: anonymous cookie, short deadline
pub fn test_config(name: &str) -> ClientConfig {
    ClientConfig::new(name)
        .with_cookie(Cookie::anonymous())
        .with_timeout(2000)
}

/// Log through the test writer at the configured level unless RUST_LOG is set
pub fn init_tracing() {
    let level = pulseconf::PulseConfig::default().infra.telemetry.log_level;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_test_writer()
        .try_init();
}

pub async fn read_packet(reader: &mut ServerReader) -> Option<Packet> {
    let frame = reader.next().await?.ok()?;
    Packet::parse(frame.payload).ok()
}

pub async fn send_reply(writer: &mut ServerWriter, tag: u32, fields: impl FnOnce(&mut TagWriter)) {
    let mut w = Packet::begin(Command::Reply, tag);
    fields(&mut w);
    writer.send(Frame::control(w.finish())).await.unwrap();
}

pub async fn send_error(writer: &mut ServerWriter, tag: u32, code: u32) {
    let mut w = Packet::begin(Command::Error, tag);
    w.put_u32(code);
    writer.send(Frame::control(w.finish())).await.unwrap();
}

pub async fn send_event(writer: &mut ServerWriter, event: u32, index: u32) {
    let mut w = Packet::begin(Command::SubscribeEvent, EVENT_TAG);
    w.put_u32(event).put_u32(index);
    writer.send(Frame::control(w.finish())).await.unwrap();
}

/// Answer AUTH and SET_CLIENT_NAME; returns the version the client sent
pub async fn accept_handshake(reader: &mut ServerReader, writer: &mut ServerWriter, version: u32) -> u32 {
    let auth = read_packet(reader).await.expect("AUTH");
    assert_eq!(auth.command(), Some(Command::Auth));
    let client_version = auth.reader().read_u32().unwrap();
    send_reply(writer, auth.tag, |w| {
        w.put_u32(version);
    })
    .await;

    let name = read_packet(reader).await.expect("SET_CLIENT_NAME");
    assert_eq!(name.command(), Some(Command::SetClientName));
    send_reply(writer, name.tag, |w| {
        w.put_u32(100);
    })
    .await;
    client_version
}

// Event words
pub const FACILITY_SINK: u32 = 0;
pub const FACILITY_SOURCE: u32 = 1;
pub const FACILITY_SINK_INPUT: u32 = 2;
pub const FACILITY_SOURCE_OUTPUT: u32 = 3;
pub const FACILITY_MODULE: u32 = 4;
pub const FACILITY_CLIENT: u32 = 5;
pub const FACILITY_SERVER: u32 = 7;
pub const EVENT_NEW: u32 = 0x00;
pub const EVENT_CHANGE: u32 = 0x10;
pub const EVENT_REMOVE: u32 = 0x20;

/// Mutable state behind the fake server
#[derive(Debug, Clone)]
pub struct ServerModel {
    pub version: u32,
    /// When set, AUTH with any other cookie is refused
    pub required_cookie: Option<Vec<u8>>,
    /// Read requests but never answer them
    pub silent: bool,
    pub server_info: ServerInfo,
    pub sinks: Vec<Sink>,
    pub sources: Vec<Source>,
    pub sink_inputs: Vec<SinkInput>,
    pub source_outputs: Vec<SourceOutput>,
    pub modules: Vec<Module>,
    pub clients: Vec<ClientInfo>,
    pub next_module_index: u32,
    pub subscription: u32,
    /// Every command received after the handshake, in order
    pub received: Vec<Command>,
}

fn stereo() -> (SampleSpec, ChannelMap) {
    (
        SampleSpec {
            format: 3,
            channels: 2,
            rate: 48000,
        },
        ChannelMap::new(vec![1, 2]).unwrap(),
    )
}

fn mono() -> (SampleSpec, ChannelMap) {
    (
        SampleSpec {
            format: 3,
            channels: 1,
            rate: 48000,
        },
        ChannelMap::new(vec![0]).unwrap(),
    )
}

fn port(name: &str, description: &str, priority: u32, available: PortAvailable) -> Port {
    Port {
        name: name.to_string(),
        description: Some(description.to_string()),
        priority,
        available,
    }
}

fn module(index: u32, name: &str, argument: Option<&str>) -> Module {
    Module {
        index,
        name: name.to_string(),
        argument: argument.map(str::to_string),
        n_used: None,
        proplist: Proplist::new(),
        auto_unload: false,
    }
}

impl ServerModel {
    /// Two sinks, a microphone plus a monitor, one stream each way
    pub fn standard() -> Self {
        let (stereo_spec, stereo_map) = stereo();
        let (mono_spec, mono_map) = mono();

        let mut speaker_props = Proplist::new();
        speaker_props.insert_str("device.description", "Built-in Speakers");

        let speakers = Sink {
            index: 0,
            name: "alsa_output.speakers".into(),
            description: Some("Built-in Speakers".into()),
            sample_spec: stereo_spec,
            channel_map: stereo_map.clone(),
            owner_module: Some(1),
            volume: CVolume::new(vec![VOLUME_NORM, VOLUME_NORM]).unwrap(),
            monitor_source: Some(1),
            monitor_source_name: Some("alsa_output.speakers.monitor".into()),
            driver: Some("module-alsa-card.c".into()),
            proplist: speaker_props,
            base_volume: VOLUME_NORM,
            state: DeviceState::Running,
            n_volume_steps: 65537,
            ports: vec![
                port("analog-output-speaker", "Speakers", 10000, PortAvailable::Unknown),
                port("analog-output-headphones", "Headphones", 9900, PortAvailable::No),
            ],
            active_port: Some("analog-output-speaker".into()),
            ..Default::default()
        };

        let hdmi = Sink {
            index: 1,
            name: "alsa_output.hdmi".into(),
            description: Some("HDMI".into()),
            sample_spec: stereo_spec,
            channel_map: stereo_map.clone(),
            owner_module: Some(1),
            volume: CVolume::new(vec![VOLUME_NORM / 2, VOLUME_NORM / 2]).unwrap(),
            monitor_source: Some(2),
            monitor_source_name: Some("alsa_output.hdmi.monitor".into()),
            base_volume: VOLUME_NORM,
            state: DeviceState::Suspended,
            ports: vec![port("hdmi-output-0", "HDMI", 5900, PortAvailable::Yes)],
            active_port: Some("hdmi-output-0".into()),
            ..Default::default()
        };

        let mic = Source {
            index: 0,
            name: "alsa_input.mic".into(),
            description: Some("Microphone".into()),
            sample_spec: mono_spec,
            channel_map: mono_map.clone(),
            owner_module: Some(1),
            volume: CVolume::new(vec![VOLUME_NORM]).unwrap(),
            base_volume: VOLUME_NORM,
            state: DeviceState::Idle,
            ports: vec![
                port("analog-input-mic", "Microphone", 8700, PortAvailable::Yes),
                port("analog-input-linein", "Line In", 8100, PortAvailable::No),
            ],
            active_port: Some("analog-input-mic".into()),
            ..Default::default()
        };

        let speaker_monitor = Source {
            index: 1,
            name: "alsa_output.speakers.monitor".into(),
            description: Some("Monitor of Built-in Speakers".into()),
            sample_spec: stereo_spec,
            channel_map: stereo_map.clone(),
            owner_module: Some(1),
            volume: CVolume::new(vec![VOLUME_NORM, VOLUME_NORM]).unwrap(),
            monitor_of_sink: Some(0),
            monitor_of_sink_name: Some("alsa_output.speakers".into()),
            ..Default::default()
        };

        let hdmi_monitor = Source {
            index: 2,
            name: "alsa_output.hdmi.monitor".into(),
            description: Some("Monitor of HDMI".into()),
            sample_spec: stereo_spec,
            channel_map: stereo_map.clone(),
            owner_module: Some(1),
            volume: CVolume::new(vec![VOLUME_NORM, VOLUME_NORM]).unwrap(),
            monitor_of_sink: Some(1),
            monitor_of_sink_name: Some("alsa_output.hdmi".into()),
            ..Default::default()
        };

        let mut player_props = Proplist::new();
        player_props.insert_str("application.name", "music-player");

        let player = SinkInput {
            index: 5,
            name: Some("Playback".into()),
            owner_module: None,
            client: Some(3),
            sink: 0,
            sample_spec: stereo_spec,
            channel_map: stereo_map.clone(),
            volume: CVolume::new(vec![VOLUME_NORM, VOLUME_NORM]).unwrap(),
            resample_method: Some("speex-float-1".into()),
            driver: Some("protocol-native.c".into()),
            proplist: player_props,
            has_volume: true,
            volume_writable: true,
            ..Default::default()
        };

        let recorder = SourceOutput {
            index: 7,
            name: Some("Recording".into()),
            client: Some(4),
            source: 0,
            sample_spec: mono_spec,
            channel_map: mono_map,
            volume: CVolume::new(vec![VOLUME_NORM]).unwrap(),
            driver: Some("protocol-native.c".into()),
            has_volume: true,
            volume_writable: true,
            ..Default::default()
        };

        Self {
            version: 32,
            required_cookie: None,
            silent: false,
            server_info: ServerInfo {
                user_name: Some("tester".into()),
                host_name: Some("localhost".into()),
                server_version: Some("17.0".into()),
                server_name: Some("pulseaudio".into()),
                sample_spec: stereo_spec,
                default_sink_name: Some("alsa_output.speakers".into()),
                default_source_name: Some("alsa_input.mic".into()),
                cookie: 0x1234_5678,
                channel_map: stereo_map,
            },
            sinks: vec![speakers, hdmi],
            sources: vec![mic, speaker_monitor, hdmi_monitor],
            sink_inputs: vec![player],
            source_outputs: vec![recorder],
            modules: vec![
                module(0, "module-native-protocol-unix", None),
                module(1, "module-alsa-card", Some("device_id=0")),
                module(2, "module-default-device-restore", None),
            ],
            clients: vec![
                ClientInfo {
                    index: 3,
                    name: "music-player".into(),
                    driver: Some("protocol-native.c".into()),
                    ..Default::default()
                },
                ClientInfo {
                    index: 4,
                    name: "recorder".into(),
                    driver: Some("protocol-native.c".into()),
                    ..Default::default()
                },
            ],
            next_module_index: 3,
            subscription: 0,
            received: Vec::new(),
        }
    }
}

/// Map codec failures in request parsing to a protocol error reply
trait OrProtocol<T> {
    fn proto(self) -> Result<T, u32>;
}

impl<T> OrProtocol<T> for Result<T, CodecError> {
    fn proto(self) -> Result<T, u32> {
        self.map_err(|_| ERR_PROTOCOL)
    }
}

/// Index then name, as sinks and sources are addressed
fn read_target(r: &mut TagReader<'_>) -> Result<(u32, Option<String>), u32> {
    let index = r.read_u32().proto()?;
    let name = r.read_string().proto()?;
    if (index == INVALID_INDEX) == name.is_none() {
        return Err(ERR_INVALID);
    }
    Ok((index, name))
}

fn matches_target(index: u32, name: &str, target: &(u32, Option<String>)) -> bool {
    match &target.1 {
        Some(wanted) => wanted == name,
        None => target.0 == index,
    }
}

impl ServerModel {
    fn sink_mut(&mut self, target: &(u32, Option<String>)) -> Result<&mut Sink, u32> {
        self.sinks
            .iter_mut()
            .find(|s| matches_target(s.index, &s.name, target))
            .ok_or(ERR_NOENTITY)
    }

    fn source_mut(&mut self, target: &(u32, Option<String>)) -> Result<&mut Source, u32> {
        self.sources
            .iter_mut()
            .find(|s| matches_target(s.index, &s.name, target))
            .ok_or(ERR_NOENTITY)
    }

    /// Handle one request. Fills `out` with reply fields and records
    /// `(event word, index)` pairs for anything that changed.
    fn handle(
        &mut self,
        command: Command,
        r: &mut TagReader<'_>,
        out: &mut TagWriter,
        events: &mut Vec<(u32, u32)>,
        version: u32,
    ) -> Result<(), u32> {
        match command {
            Command::GetServerInfo => {
                r.expect_end().proto()?;
                self.server_info.write(out, version).proto()?;
            }
            Command::GetSinkInfo => {
                let target = read_target(r)?;
                r.expect_end().proto()?;
                self.sink_mut(&target)?.write(out, version).proto()?;
            }
            Command::GetSinkInfoList => {
                for sink in &self.sinks {
                    sink.write(out, version).proto()?;
                }
            }
            Command::GetSourceInfo => {
                let target = read_target(r)?;
                r.expect_end().proto()?;
                self.source_mut(&target)?.write(out, version).proto()?;
            }
            Command::GetSourceInfoList => {
                for source in &self.sources {
                    source.write(out, version).proto()?;
                }
            }
            Command::GetSinkInputInfo => {
                let index = r.read_u32().proto()?;
                let input = self
                    .sink_inputs
                    .iter()
                    .find(|i| i.index == index)
                    .ok_or(ERR_NOENTITY)?;
                input.write(out, version).proto()?;
            }
            Command::GetSinkInputInfoList => {
                for input in &self.sink_inputs {
                    input.write(out, version).proto()?;
                }
            }
            Command::GetSourceOutputInfo => {
                let index = r.read_u32().proto()?;
                let output = self
                    .source_outputs
                    .iter()
                    .find(|o| o.index == index)
                    .ok_or(ERR_NOENTITY)?;
                output.write(out, version).proto()?;
            }
            Command::GetSourceOutputInfoList => {
                for output in &self.source_outputs {
                    output.write(out, version).proto()?;
                }
            }
            Command::GetModuleInfo => {
                let index = r.read_u32().proto()?;
                let module = self
                    .modules
                    .iter()
                    .find(|m| m.index == index)
                    .ok_or(ERR_NOENTITY)?;
                module.write(out, version).proto()?;
            }
            Command::GetModuleInfoList => {
                for module in &self.modules {
                    module.write(out, version).proto()?;
                }
            }
            Command::GetClientInfo => {
                let index = r.read_u32().proto()?;
                let client = self
                    .clients
                    .iter()
                    .find(|c| c.index == index)
                    .ok_or(ERR_NOENTITY)?;
                client.write(out, version).proto()?;
            }
            Command::GetClientInfoList => {
                for client in &self.clients {
                    client.write(out, version).proto()?;
                }
            }
            Command::LookupSink => {
                let name = r.read_required_string().proto()?;
                let index = self.sink_mut(&(INVALID_INDEX, Some(name)))?.index;
                out.put_u32(index);
            }
            Command::LookupSource => {
                let name = r.read_required_string().proto()?;
                let index = self.source_mut(&(INVALID_INDEX, Some(name)))?.index;
                out.put_u32(index);
            }
            Command::Subscribe => {
                self.subscription = r.read_u32().proto()?;
            }
            Command::SetSinkVolume => {
                let target = read_target(r)?;
                let volume = r.read_cvolume().proto()?;
                let sink = self.sink_mut(&target)?;
                if volume.channels() != sink.volume.channels() {
                    return Err(ERR_INVALID);
                }
                sink.volume = volume;
                events.push((FACILITY_SINK | EVENT_CHANGE, sink.index));
            }
            Command::SetSourceVolume => {
                let target = read_target(r)?;
                let volume = r.read_cvolume().proto()?;
                let source = self.source_mut(&target)?;
                if volume.channels() != source.volume.channels() {
                    return Err(ERR_INVALID);
                }
                source.volume = volume;
                events.push((FACILITY_SOURCE | EVENT_CHANGE, source.index));
            }
            Command::SetSinkInputVolume => {
                let index = r.read_u32().proto()?;
                let volume = r.read_cvolume().proto()?;
                let input = self
                    .sink_inputs
                    .iter_mut()
                    .find(|i| i.index == index)
                    .ok_or(ERR_NOENTITY)?;
                if volume.channels() != input.volume.channels() {
                    return Err(ERR_INVALID);
                }
                input.volume = volume;
                events.push((FACILITY_SINK_INPUT | EVENT_CHANGE, index));
            }
            Command::SetSourceOutputVolume => {
                let index = r.read_u32().proto()?;
                let volume = r.read_cvolume().proto()?;
                let output = self
                    .source_outputs
                    .iter_mut()
                    .find(|o| o.index == index)
                    .ok_or(ERR_NOENTITY)?;
                if volume.channels() != output.volume.channels() {
                    return Err(ERR_INVALID);
                }
                output.volume = volume;
                events.push((FACILITY_SOURCE_OUTPUT | EVENT_CHANGE, index));
            }
            Command::SetSinkMute => {
                let target = read_target(r)?;
                let mute = r.read_bool().proto()?;
                let sink = self.sink_mut(&target)?;
                sink.mute = mute;
                events.push((FACILITY_SINK | EVENT_CHANGE, sink.index));
            }
            Command::SetSourceMute => {
                let target = read_target(r)?;
                let mute = r.read_bool().proto()?;
                let source = self.source_mut(&target)?;
                source.mute = mute;
                events.push((FACILITY_SOURCE | EVENT_CHANGE, source.index));
            }
            Command::SetSinkInputMute => {
                let index = r.read_u32().proto()?;
                let mute = r.read_bool().proto()?;
                let input = self
                    .sink_inputs
                    .iter_mut()
                    .find(|i| i.index == index)
                    .ok_or(ERR_NOENTITY)?;
                input.mute = mute;
                events.push((FACILITY_SINK_INPUT | EVENT_CHANGE, index));
            }
            Command::SetSourceOutputMute => {
                let index = r.read_u32().proto()?;
                let mute = r.read_bool().proto()?;
                let output = self
                    .source_outputs
                    .iter_mut()
                    .find(|o| o.index == index)
                    .ok_or(ERR_NOENTITY)?;
                output.mute = mute;
                events.push((FACILITY_SOURCE_OUTPUT | EVENT_CHANGE, index));
            }
            Command::SetDefaultSink => {
                let name = r.read_required_string().proto()?;
                self.sink_mut(&(INVALID_INDEX, Some(name.clone())))?;
                self.server_info.default_sink_name = Some(name);
                events.push((FACILITY_SERVER | EVENT_CHANGE, INVALID_INDEX));
            }
            Command::SetDefaultSource => {
                let name = r.read_required_string().proto()?;
                self.source_mut(&(INVALID_INDEX, Some(name.clone())))?;
                self.server_info.default_source_name = Some(name);
                events.push((FACILITY_SERVER | EVENT_CHANGE, INVALID_INDEX));
            }
            Command::SetSinkPort => {
                let target = read_target(r)?;
                let port = r.read_required_string().proto()?;
                let sink = self.sink_mut(&target)?;
                if !sink.ports.iter().any(|p| p.name == port) {
                    return Err(ERR_NOENTITY);
                }
                sink.active_port = Some(port);
                events.push((FACILITY_SINK | EVENT_CHANGE, sink.index));
            }
            Command::SetSourcePort => {
                let target = read_target(r)?;
                let port = r.read_required_string().proto()?;
                let source = self.source_mut(&target)?;
                if !source.ports.iter().any(|p| p.name == port) {
                    return Err(ERR_NOENTITY);
                }
                source.active_port = Some(port);
                events.push((FACILITY_SOURCE | EVENT_CHANGE, source.index));
            }
            Command::SuspendSink => {
                let target = read_target(r)?;
                let suspend = r.read_bool().proto()?;
                let sink = self.sink_mut(&target)?;
                sink.state = if suspend {
                    DeviceState::Suspended
                } else {
                    DeviceState::Idle
                };
                events.push((FACILITY_SINK | EVENT_CHANGE, sink.index));
            }
            Command::SuspendSource => {
                let target = read_target(r)?;
                let suspend = r.read_bool().proto()?;
                let source = self.source_mut(&target)?;
                source.state = if suspend {
                    DeviceState::Suspended
                } else {
                    DeviceState::Idle
                };
                events.push((FACILITY_SOURCE | EVENT_CHANGE, source.index));
            }
            Command::MoveSinkInput => {
                let index = r.read_u32().proto()?;
                let target = read_target(r)?;
                let sink = self.sink_mut(&target)?.index;
                let input = self
                    .sink_inputs
                    .iter_mut()
                    .find(|i| i.index == index)
                    .ok_or(ERR_NOENTITY)?;
                input.sink = sink;
                events.push((FACILITY_SINK_INPUT | EVENT_CHANGE, index));
            }
            Command::MoveSourceOutput => {
                let index = r.read_u32().proto()?;
                let target = read_target(r)?;
                let source = self.source_mut(&target)?.index;
                let output = self
                    .source_outputs
                    .iter_mut()
                    .find(|o| o.index == index)
                    .ok_or(ERR_NOENTITY)?;
                output.source = source;
                events.push((FACILITY_SOURCE_OUTPUT | EVENT_CHANGE, index));
            }
            Command::KillClient => {
                let index = r.read_u32().proto()?;
                let before = self.clients.len();
                self.clients.retain(|c| c.index != index);
                if self.clients.len() == before {
                    return Err(ERR_NOENTITY);
                }
                events.push((FACILITY_CLIENT | EVENT_REMOVE, index));
            }
            Command::KillSinkInput => {
                let index = r.read_u32().proto()?;
                let before = self.sink_inputs.len();
                self.sink_inputs.retain(|i| i.index != index);
                if self.sink_inputs.len() == before {
                    return Err(ERR_NOENTITY);
                }
                events.push((FACILITY_SINK_INPUT | EVENT_REMOVE, index));
            }
            Command::KillSourceOutput => {
                let index = r.read_u32().proto()?;
                let before = self.source_outputs.len();
                self.source_outputs.retain(|o| o.index != index);
                if self.source_outputs.len() == before {
                    return Err(ERR_NOENTITY);
                }
                events.push((FACILITY_SOURCE_OUTPUT | EVENT_REMOVE, index));
            }
            Command::LoadModule => {
                let name = r.read_required_string().proto()?;
                let argument = r.read_string().proto()?;
                if !name.starts_with("module-") {
                    return Err(ERR_NOENTITY);
                }
                let index = self.next_module_index;
                self.next_module_index += 1;
                self.modules
                    .push(module(index, &name, argument.as_deref()));
                out.put_u32(index);
                events.push((FACILITY_MODULE | EVENT_NEW, index));
            }
            Command::UnloadModule => {
                let index = r.read_u32().proto()?;
                let before = self.modules.len();
                self.modules.retain(|m| m.index != index);
                if self.modules.len() == before {
                    return Err(ERR_NOENTITY);
                }
                events.push((FACILITY_MODULE | EVENT_REMOVE, index));
            }
            _ => return Err(ERR_COMMAND),
        }
        r.expect_end().proto()
    }
}

/// Out-of-band actions a test can take on a running fake server
pub enum Injected {
    /// Send a frame as if the server produced it
    Frame(Frame),
    /// Write raw bytes to the socket
    Raw(Bytes),
    /// Push a change notification regardless of the subscription
    Event(u32, u32),
    /// Drop the connection
    Close,
}

/// A running fake server and its model
pub struct FakeServer {
    pub model: Arc<Mutex<ServerModel>>,
    inject: mpsc::UnboundedSender<Injected>,
    pub handle: JoinHandle<()>,
}

impl FakeServer {
    /// Start serving on a fresh pipe and connect a client to it
    pub async fn connect(model: ServerModel, config: ClientConfig) -> (Arc<Client>, FakeServer) {
        let (client, server) = Self::start(model);
        let client = Client::connect_with(client, config)
            .await
            .expect("client connects to fake server");
        (client, server)
    }

    /// Start serving; returns the client end of the pipe
    pub fn start(model: ServerModel) -> (DuplexStream, FakeServer) {
        let (client, reader, writer) = pipe();
        let model = Arc::new(Mutex::new(model));
        let (inject, inject_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(serve(reader, writer, model.clone(), inject_rx));
        (
            client,
            FakeServer {
                model,
                inject,
                handle,
            },
        )
    }

    pub fn inject(&self, injected: Injected) {
        let _ = self.inject.send(injected);
    }

    pub fn close(&self) {
        self.inject(Injected::Close);
    }

    pub fn model(&self) -> std::sync::MutexGuard<'_, ServerModel> {
        self.model.lock().unwrap()
    }

    /// Wait until the server has received `count` post-handshake commands
    pub async fn wait_for_requests(&self, count: usize) {
        for _ in 0..200 {
            if self.model().received.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("server saw only {} requests", self.model().received.len());
    }
}

fn subscription_bit(event: u32) -> u32 {
    1 << (event & 0x0F)
}

async fn serve(
    mut reader: ServerReader,
    mut writer: ServerWriter,
    model: Arc<Mutex<ServerModel>>,
    mut inject_rx: mpsc::UnboundedReceiver<Injected>,
) {
    // Handshake
    let Some(auth) = read_packet(&mut reader).await else {
        return;
    };
    let (server_version, required) = {
        let m = model.lock().unwrap();
        (m.version, m.required_cookie.clone())
    };
    let mut r = auth.reader();
    let client_version = r.read_u32().unwrap_or(0);
    let cookie = r.read_arbitrary().map(|c| c.to_vec()).unwrap_or_default();
    if let Some(required) = required {
        if cookie != required {
            send_error(&mut writer, auth.tag, ERR_ACCESS).await;
            return;
        }
    }
    send_reply(&mut writer, auth.tag, |w| {
        w.put_u32(server_version);
    })
    .await;
    let version = client_version.min(server_version);

    let Some(set_name) = read_packet(&mut reader).await else {
        return;
    };
    send_reply(&mut writer, set_name.tag, |w| {
        w.put_u32(100);
    })
    .await;

    loop {
        tokio::select! {
            injected = inject_rx.recv() => {
                match injected {
                    Some(Injected::Frame(frame)) => {
                        if writer.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Some(Injected::Raw(bytes)) => {
                        if writer.get_mut().write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Some(Injected::Event(event, index)) => send_event(&mut writer, event, index).await,
                    Some(Injected::Close) | None => break,
                }
            }

            frame = reader.next() => {
                let Some(Ok(frame)) = frame else { break };
                let Ok(packet) = Packet::parse(frame.payload) else { break };
                let Some(command) = packet.command() else {
                    send_error(&mut writer, packet.tag, ERR_COMMAND).await;
                    continue;
                };

                let mut out = Packet::begin(Command::Reply, packet.tag);
                let mut events = Vec::new();
                let (result, silent, subscription) = {
                    let mut m = model.lock().unwrap();
                    m.received.push(command);
                    let result = m.handle(command, &mut packet.reader(), &mut out, &mut events, version);
                    (result, m.silent, m.subscription)
                };

                if silent {
                    continue;
                }
                match result {
                    Ok(()) => {
                        if writer.send(Frame::control(out.finish())).await.is_err() {
                            break;
                        }
                    }
                    Err(code) => send_error(&mut writer, packet.tag, code).await,
                }
                for (event, index) in events {
                    if subscription & subscription_bit(event) != 0 {
                        send_event(&mut writer, event, index).await;
                    }
                }
            }
        }
    }
}
