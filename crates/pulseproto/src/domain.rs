//! Entity snapshots
//!
//! Immutable values decoded from info replies. An index is the server's live
//! identity for the object and only stays meaningful until the object is
//! removed; re-fetch to observe changes.
//!
//! Field layouts grow with the protocol version, so every `read`/`write`
//! takes the version negotiated during the handshake. Fields introduced after
//! that version are left at their defaults.

use crate::tagstruct::{
    CVolume, ChannelMap, CodecError, FormatInfo, Proplist, SampleSpec, TagReader, TagWriter,
    INVALID_INDEX,
};

fn optional_index(raw: u32) -> Option<u32> {
    (raw != INVALID_INDEX).then_some(raw)
}

fn raw_index(index: Option<u32>) -> u32 {
    index.unwrap_or(INVALID_INDEX)
}

/// Running state of a sink or source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    Running,
    Idle,
    Suspended,
    Init,
    Unlinked,
    #[default]
    Invalid,
}

impl DeviceState {
    pub fn from_u32(raw: u32) -> Self {
        match raw as i32 {
            0 => DeviceState::Running,
            1 => DeviceState::Idle,
            2 => DeviceState::Suspended,
            -2 => DeviceState::Init,
            -3 => DeviceState::Unlinked,
            _ => DeviceState::Invalid,
        }
    }

    pub fn to_u32(self) -> u32 {
        let raw: i32 = match self {
            DeviceState::Running => 0,
            DeviceState::Idle => 1,
            DeviceState::Suspended => 2,
            DeviceState::Init => -2,
            DeviceState::Unlinked => -3,
            DeviceState::Invalid => -1,
        };
        raw as u32
    }
}

/// Whether a port has something plugged in, as far as the server can tell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortAvailable {
    #[default]
    Unknown,
    No,
    Yes,
}

impl PortAvailable {
    pub fn from_u32(raw: u32) -> Self {
        match raw {
            1 => PortAvailable::No,
            2 => PortAvailable::Yes,
            _ => PortAvailable::Unknown,
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            PortAvailable::Unknown => 0,
            PortAvailable::No => 1,
            PortAvailable::Yes => 2,
        }
    }
}

/// A jack or logical output on a sink or source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    pub description: Option<String>,
    pub priority: u32,
    pub available: PortAvailable,
}

impl Port {
    fn read(r: &mut TagReader<'_>, version: u32) -> Result<Self, CodecError> {
        let name = r.read_required_string()?;
        let description = r.read_string()?;
        let priority = r.read_u32()?;
        let available = if version >= 24 {
            PortAvailable::from_u32(r.read_u32()?)
        } else {
            PortAvailable::Unknown
        };
        Ok(Self {
            name,
            description,
            priority,
            available,
        })
    }

    fn write(&self, w: &mut TagWriter, version: u32) -> Result<(), CodecError> {
        w.put_string(Some(self.name.as_str()))?
            .put_string(self.description.as_deref())?
            .put_u32(self.priority);
        if version >= 24 {
            w.put_u32(self.available.to_u32());
        }
        Ok(())
    }
}

fn read_ports(
    r: &mut TagReader<'_>,
    version: u32,
) -> Result<(Vec<Port>, Option<String>), CodecError> {
    let count = r.read_u32()?;
    let mut ports = Vec::new();
    for _ in 0..count {
        ports.push(Port::read(r, version)?);
    }
    let active = r.read_string()?;
    Ok((ports, active))
}

fn write_ports(
    w: &mut TagWriter,
    ports: &[Port],
    active: Option<&str>,
    version: u32,
) -> Result<(), CodecError> {
    w.put_u32(ports.len() as u32);
    for port in ports {
        port.write(w, version)?;
    }
    w.put_string(active)?;
    Ok(())
}

fn read_formats(r: &mut TagReader<'_>) -> Result<Vec<FormatInfo>, CodecError> {
    let count = r.read_u8()?;
    let mut formats = Vec::with_capacity(count as usize);
    for _ in 0..count {
        formats.push(r.read_format_info()?);
    }
    Ok(formats)
}

fn write_formats(w: &mut TagWriter, formats: &[FormatInfo]) -> Result<(), CodecError> {
    w.put_u8(formats.len() as u8);
    for format in formats {
        w.put_format_info(format)?;
    }
    Ok(())
}

/// An output device
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sink {
    pub index: u32,
    pub name: String,
    pub description: Option<String>,
    pub sample_spec: SampleSpec,
    pub channel_map: ChannelMap,
    pub owner_module: Option<u32>,
    pub volume: CVolume,
    pub mute: bool,
    pub monitor_source: Option<u32>,
    pub monitor_source_name: Option<String>,
    pub latency_usec: u64,
    pub driver: Option<String>,
    pub flags: u32,
    pub proplist: Proplist,
    pub configured_latency_usec: u64,
    pub base_volume: u32,
    pub state: DeviceState,
    pub n_volume_steps: u32,
    pub card: Option<u32>,
    pub ports: Vec<Port>,
    pub active_port: Option<String>,
    pub formats: Vec<FormatInfo>,
}

impl Sink {
    pub fn read(r: &mut TagReader<'_>, version: u32) -> Result<Self, CodecError> {
        let mut sink = Sink {
            index: r.read_u32()?,
            name: r.read_required_string()?,
            description: r.read_string()?,
            sample_spec: r.read_sample_spec()?,
            channel_map: r.read_channel_map()?,
            owner_module: optional_index(r.read_u32()?),
            volume: r.read_cvolume()?,
            mute: r.read_bool()?,
            monitor_source: optional_index(r.read_u32()?),
            monitor_source_name: r.read_string()?,
            latency_usec: r.read_usec()?,
            driver: r.read_string()?,
            flags: r.read_u32()?,
            ..Default::default()
        };

        if version >= 13 {
            sink.proplist = r.read_proplist()?;
            sink.configured_latency_usec = r.read_usec()?;
        }
        if version >= 15 {
            sink.base_volume = r.read_volume()?;
            sink.state = DeviceState::from_u32(r.read_u32()?);
            sink.n_volume_steps = r.read_u32()?;
            sink.card = optional_index(r.read_u32()?);
        }
        if version >= 16 {
            (sink.ports, sink.active_port) = read_ports(r, version)?;
        }
        if version >= 21 {
            sink.formats = read_formats(r)?;
        }
        Ok(sink)
    }

    pub fn write(&self, w: &mut TagWriter, version: u32) -> Result<(), CodecError> {
        w.put_u32(self.index)
            .put_string(Some(self.name.as_str()))?
            .put_string(self.description.as_deref())?
            .put_sample_spec(&self.sample_spec)
            .put_channel_map(&self.channel_map)
            .put_u32(raw_index(self.owner_module))
            .put_cvolume(&self.volume)
            .put_bool(self.mute)
            .put_u32(raw_index(self.monitor_source))
            .put_string(self.monitor_source_name.as_deref())?
            .put_usec(self.latency_usec)
            .put_string(self.driver.as_deref())?
            .put_u32(self.flags);

        if version >= 13 {
            w.put_proplist(&self.proplist)?
                .put_usec(self.configured_latency_usec);
        }
        if version >= 15 {
            w.put_volume(self.base_volume)
                .put_u32(self.state.to_u32())
                .put_u32(self.n_volume_steps)
                .put_u32(raw_index(self.card));
        }
        if version >= 16 {
            write_ports(w, &self.ports, self.active_port.as_deref(), version)?;
        }
        if version >= 21 {
            write_formats(w, &self.formats)?;
        }
        Ok(())
    }

    /// Per-channel volumes, one entry per channel
    pub fn channel_volumes(&self) -> &[u32] {
        self.volume.values()
    }
}

/// An input device, including monitors of sinks
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Source {
    pub index: u32,
    pub name: String,
    pub description: Option<String>,
    pub sample_spec: SampleSpec,
    pub channel_map: ChannelMap,
    pub owner_module: Option<u32>,
    pub volume: CVolume,
    pub mute: bool,
    /// Set when this source monitors a sink
    pub monitor_of_sink: Option<u32>,
    pub monitor_of_sink_name: Option<String>,
    pub latency_usec: u64,
    pub driver: Option<String>,
    pub flags: u32,
    pub proplist: Proplist,
    pub configured_latency_usec: u64,
    pub base_volume: u32,
    pub state: DeviceState,
    pub n_volume_steps: u32,
    pub card: Option<u32>,
    pub ports: Vec<Port>,
    pub active_port: Option<String>,
    pub formats: Vec<FormatInfo>,
}

impl Source {
    pub fn read(r: &mut TagReader<'_>, version: u32) -> Result<Self, CodecError> {
        let mut source = Source {
            index: r.read_u32()?,
            name: r.read_required_string()?,
            description: r.read_string()?,
            sample_spec: r.read_sample_spec()?,
            channel_map: r.read_channel_map()?,
            owner_module: optional_index(r.read_u32()?),
            volume: r.read_cvolume()?,
            mute: r.read_bool()?,
            monitor_of_sink: optional_index(r.read_u32()?),
            monitor_of_sink_name: r.read_string()?,
            latency_usec: r.read_usec()?,
            driver: r.read_string()?,
            flags: r.read_u32()?,
            ..Default::default()
        };

        if version >= 13 {
            source.proplist = r.read_proplist()?;
            source.configured_latency_usec = r.read_usec()?;
        }
        if version >= 15 {
            source.base_volume = r.read_volume()?;
            source.state = DeviceState::from_u32(r.read_u32()?);
            source.n_volume_steps = r.read_u32()?;
            source.card = optional_index(r.read_u32()?);
        }
        if version >= 16 {
            (source.ports, source.active_port) = read_ports(r, version)?;
        }
        if version >= 22 {
            source.formats = read_formats(r)?;
        }
        Ok(source)
    }

    pub fn write(&self, w: &mut TagWriter, version: u32) -> Result<(), CodecError> {
        w.put_u32(self.index)
            .put_string(Some(self.name.as_str()))?
            .put_string(self.description.as_deref())?
            .put_sample_spec(&self.sample_spec)
            .put_channel_map(&self.channel_map)
            .put_u32(raw_index(self.owner_module))
            .put_cvolume(&self.volume)
            .put_bool(self.mute)
            .put_u32(raw_index(self.monitor_of_sink))
            .put_string(self.monitor_of_sink_name.as_deref())?
            .put_usec(self.latency_usec)
            .put_string(self.driver.as_deref())?
            .put_u32(self.flags);

        if version >= 13 {
            w.put_proplist(&self.proplist)?
                .put_usec(self.configured_latency_usec);
        }
        if version >= 15 {
            w.put_volume(self.base_volume)
                .put_u32(self.state.to_u32())
                .put_u32(self.n_volume_steps)
                .put_u32(raw_index(self.card));
        }
        if version >= 16 {
            write_ports(w, &self.ports, self.active_port.as_deref(), version)?;
        }
        if version >= 22 {
            write_formats(w, &self.formats)?;
        }
        Ok(())
    }

    pub fn channel_volumes(&self) -> &[u32] {
        self.volume.values()
    }
}

/// A playback stream attached to a sink
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SinkInput {
    pub index: u32,
    pub name: Option<String>,
    pub owner_module: Option<u32>,
    pub client: Option<u32>,
    pub sink: u32,
    pub sample_spec: SampleSpec,
    pub channel_map: ChannelMap,
    pub volume: CVolume,
    pub buffer_usec: u64,
    pub sink_usec: u64,
    pub resample_method: Option<String>,
    pub driver: Option<String>,
    pub mute: bool,
    pub proplist: Proplist,
    pub corked: bool,
    pub has_volume: bool,
    pub volume_writable: bool,
    pub format: FormatInfo,
}

impl SinkInput {
    pub fn read(r: &mut TagReader<'_>, version: u32) -> Result<Self, CodecError> {
        let mut input = SinkInput {
            index: r.read_u32()?,
            name: r.read_string()?,
            owner_module: optional_index(r.read_u32()?),
            client: optional_index(r.read_u32()?),
            sink: r.read_u32()?,
            sample_spec: r.read_sample_spec()?,
            channel_map: r.read_channel_map()?,
            volume: r.read_cvolume()?,
            buffer_usec: r.read_usec()?,
            sink_usec: r.read_usec()?,
            resample_method: r.read_string()?,
            driver: r.read_string()?,
            // Streams from servers without volume flags always carry one
            has_volume: true,
            volume_writable: true,
            ..Default::default()
        };

        if version >= 11 {
            input.mute = r.read_bool()?;
        }
        if version >= 13 {
            input.proplist = r.read_proplist()?;
        }
        if version >= 19 {
            input.corked = r.read_bool()?;
        }
        if version >= 20 {
            input.has_volume = r.read_bool()?;
            input.volume_writable = r.read_bool()?;
        }
        if version >= 21 {
            input.format = r.read_format_info()?;
        }
        Ok(input)
    }

    pub fn write(&self, w: &mut TagWriter, version: u32) -> Result<(), CodecError> {
        w.put_u32(self.index)
            .put_string(self.name.as_deref())?
            .put_u32(raw_index(self.owner_module))
            .put_u32(raw_index(self.client))
            .put_u32(self.sink)
            .put_sample_spec(&self.sample_spec)
            .put_channel_map(&self.channel_map)
            .put_cvolume(&self.volume)
            .put_usec(self.buffer_usec)
            .put_usec(self.sink_usec)
            .put_string(self.resample_method.as_deref())?
            .put_string(self.driver.as_deref())?;

        if version >= 11 {
            w.put_bool(self.mute);
        }
        if version >= 13 {
            w.put_proplist(&self.proplist)?;
        }
        if version >= 19 {
            w.put_bool(self.corked);
        }
        if version >= 20 {
            w.put_bool(self.has_volume).put_bool(self.volume_writable);
        }
        if version >= 21 {
            w.put_format_info(&self.format)?;
        }
        Ok(())
    }

    pub fn channel_volumes(&self) -> &[u32] {
        self.volume.values()
    }
}

/// A recording stream attached to a source
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceOutput {
    pub index: u32,
    pub name: Option<String>,
    pub owner_module: Option<u32>,
    pub client: Option<u32>,
    pub source: u32,
    pub sample_spec: SampleSpec,
    pub channel_map: ChannelMap,
    pub buffer_usec: u64,
    pub source_usec: u64,
    pub resample_method: Option<String>,
    pub driver: Option<String>,
    pub proplist: Proplist,
    pub corked: bool,
    /// Only reported by servers speaking version 22 or later
    pub volume: CVolume,
    pub mute: bool,
    pub has_volume: bool,
    pub volume_writable: bool,
    pub format: FormatInfo,
}

impl SourceOutput {
    pub fn read(r: &mut TagReader<'_>, version: u32) -> Result<Self, CodecError> {
        let mut output = SourceOutput {
            index: r.read_u32()?,
            name: r.read_string()?,
            owner_module: optional_index(r.read_u32()?),
            client: optional_index(r.read_u32()?),
            source: r.read_u32()?,
            sample_spec: r.read_sample_spec()?,
            channel_map: r.read_channel_map()?,
            buffer_usec: r.read_usec()?,
            source_usec: r.read_usec()?,
            resample_method: r.read_string()?,
            driver: r.read_string()?,
            ..Default::default()
        };

        if version >= 13 {
            output.proplist = r.read_proplist()?;
        }
        if version >= 19 {
            output.corked = r.read_bool()?;
        }
        if version >= 22 {
            output.volume = r.read_cvolume()?;
            output.mute = r.read_bool()?;
            output.has_volume = r.read_bool()?;
            output.volume_writable = r.read_bool()?;
            output.format = r.read_format_info()?;
        }
        Ok(output)
    }

    pub fn write(&self, w: &mut TagWriter, version: u32) -> Result<(), CodecError> {
        w.put_u32(self.index)
            .put_string(self.name.as_deref())?
            .put_u32(raw_index(self.owner_module))
            .put_u32(raw_index(self.client))
            .put_u32(self.source)
            .put_sample_spec(&self.sample_spec)
            .put_channel_map(&self.channel_map)
            .put_usec(self.buffer_usec)
            .put_usec(self.source_usec)
            .put_string(self.resample_method.as_deref())?
            .put_string(self.driver.as_deref())?;

        if version >= 13 {
            w.put_proplist(&self.proplist)?;
        }
        if version >= 19 {
            w.put_bool(self.corked);
        }
        if version >= 22 {
            w.put_cvolume(&self.volume)
                .put_bool(self.mute)
                .put_bool(self.has_volume)
                .put_bool(self.volume_writable)
                .put_format_info(&self.format)?;
        }
        Ok(())
    }

    pub fn channel_volumes(&self) -> &[u32] {
        self.volume.values()
    }
}

/// A loaded server module
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Module {
    pub index: u32,
    pub name: String,
    pub argument: Option<String>,
    /// Usage counter, `None` when the server doesn't track it
    pub n_used: Option<u32>,
    pub proplist: Proplist,
    /// Only sent by servers older than version 15
    pub auto_unload: bool,
}

impl Module {
    pub fn read(r: &mut TagReader<'_>, version: u32) -> Result<Self, CodecError> {
        let mut module = Module {
            index: r.read_u32()?,
            name: r.read_required_string()?,
            argument: r.read_string()?,
            n_used: optional_index(r.read_u32()?),
            ..Default::default()
        };
        if version < 15 {
            module.auto_unload = r.read_bool()?;
        } else {
            module.proplist = r.read_proplist()?;
        }
        Ok(module)
    }

    pub fn write(&self, w: &mut TagWriter, version: u32) -> Result<(), CodecError> {
        w.put_u32(self.index)
            .put_string(Some(self.name.as_str()))?
            .put_string(self.argument.as_deref())?
            .put_u32(raw_index(self.n_used));
        if version < 15 {
            w.put_bool(self.auto_unload);
        } else {
            w.put_proplist(&self.proplist)?;
        }
        Ok(())
    }
}

/// Another connected client, this one included
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientInfo {
    pub index: u32,
    pub name: String,
    pub owner_module: Option<u32>,
    pub driver: Option<String>,
    pub proplist: Proplist,
}

impl ClientInfo {
    pub fn read(r: &mut TagReader<'_>, version: u32) -> Result<Self, CodecError> {
        let mut client = ClientInfo {
            index: r.read_u32()?,
            name: r.read_required_string()?,
            owner_module: optional_index(r.read_u32()?),
            driver: r.read_string()?,
            ..Default::default()
        };
        if version >= 13 {
            client.proplist = r.read_proplist()?;
        }
        Ok(client)
    }

    pub fn write(&self, w: &mut TagWriter, version: u32) -> Result<(), CodecError> {
        w.put_u32(self.index)
            .put_string(Some(self.name.as_str()))?
            .put_u32(raw_index(self.owner_module))
            .put_string(self.driver.as_deref())?;
        if version >= 13 {
            w.put_proplist(&self.proplist)?;
        }
        Ok(())
    }
}

/// Server identity and defaults
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerInfo {
    pub user_name: Option<String>,
    pub host_name: Option<String>,
    pub server_version: Option<String>,
    pub server_name: Option<String>,
    pub sample_spec: SampleSpec,
    pub default_sink_name: Option<String>,
    pub default_source_name: Option<String>,
    pub cookie: u32,
    pub channel_map: ChannelMap,
}

impl ServerInfo {
    pub fn read(r: &mut TagReader<'_>, version: u32) -> Result<Self, CodecError> {
        let mut info = ServerInfo {
            user_name: r.read_string()?,
            host_name: r.read_string()?,
            server_version: r.read_string()?,
            server_name: r.read_string()?,
            sample_spec: r.read_sample_spec()?,
            default_sink_name: r.read_string()?,
            default_source_name: r.read_string()?,
            cookie: r.read_u32()?,
            ..Default::default()
        };
        if version >= 15 {
            info.channel_map = r.read_channel_map()?;
        }
        Ok(info)
    }

    pub fn write(&self, w: &mut TagWriter, version: u32) -> Result<(), CodecError> {
        w.put_string(self.user_name.as_deref())?
            .put_string(self.host_name.as_deref())?
            .put_string(self.server_version.as_deref())?
            .put_string(self.server_name.as_deref())?
            .put_sample_spec(&self.sample_spec)
            .put_string(self.default_sink_name.as_deref())?
            .put_string(self.default_source_name.as_deref())?
            .put_u32(self.cookie);
        if version >= 15 {
            w.put_channel_map(&self.channel_map);
        }
        Ok(())
    }
}
