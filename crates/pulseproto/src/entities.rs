//! Typed operations on server entities
//!
//! Each operation is a thin composition: check what can be checked locally,
//! send one request, unpack the reply. Server `NOENTITY` answers become
//! [`ClientError::NotFound`].
//!
//! Addressing by name is resolved client-side where the protocol only takes
//! an index, by listing and matching first. That resolution is not atomic
//! with the command that follows; if the entity disappears in between, the
//! command fails with an ordinary `NotFound`.

use tracing::debug;

use crate::client::Client;
use crate::domain::{ClientInfo, Module, Port, ServerInfo, Sink, SinkInput, Source, SourceOutput};
use crate::error::{ClientError, Result};
use crate::request::{Request, Target};
use crate::responses::Reply;
use crate::tagstruct::CVolume;

/// Volume vector for an entity with `channels` channels
fn checked_volume(channels: usize, volumes: &[u32]) -> Result<CVolume> {
    if volumes.len() != channels {
        return Err(ClientError::ChannelCountMismatch {
            expected: channels,
            actual: volumes.len(),
        });
    }
    Ok(CVolume::new(volumes.to_vec())?)
}

impl Client {
    /// Send a request about one entity, mapping `NOENTITY` to `NotFound(what)`
    async fn request_entity(&self, request: Request, what: impl FnOnce() -> String) -> Result<Reply> {
        match self.request(request).await {
            Err(e) if e.is_no_entity() => Err(ClientError::NotFound(what())),
            other => other,
        }
    }

    pub async fn server_info(&self) -> Result<ServerInfo> {
        self.request(Request::GetServerInfo)
            .await?
            .into_server_info()
    }

    // Sinks

    pub async fn sinks(&self) -> Result<Vec<Sink>> {
        self.request(Request::GetSinkInfoList).await?.into_sinks()
    }

    pub async fn sink(&self, target: impl Into<Target>) -> Result<Sink> {
        let target = target.into();
        let what = || format!("sink {}", target);
        self.request_entity(Request::GetSinkInfo(target.clone()), what)
            .await?
            .into_sink()
    }

    pub async fn sink_by_index(&self, index: u32) -> Result<Sink> {
        self.sink(Target::Index(index)).await
    }

    pub async fn sink_by_name(&self, name: &str) -> Result<Sink> {
        self.sink(Target::from(name)).await
    }

    pub async fn sink_ports(&self, target: impl Into<Target>) -> Result<Vec<Port>> {
        Ok(self.sink(target).await?.ports)
    }

    /// Index of a sink, resolving names through the sink list
    async fn resolve_sink(&self, target: Target) -> Result<u32> {
        match target {
            Target::Index(index) => Ok(index),
            Target::Name(name) => {
                let sinks = self.sinks().await?;
                let index = sinks
                    .iter()
                    .find(|sink| sink.name == name)
                    .map(|sink| sink.index)
                    .ok_or_else(|| ClientError::NotFound(format!("sink {:?}", name)))?;
                debug!("{}: Resolved sink {:?} to #{}", self.name(), name, index);
                Ok(index)
            }
        }
    }

    // Sources

    pub async fn sources(&self) -> Result<Vec<Source>> {
        self.request(Request::GetSourceInfoList).await?.into_sources()
    }

    pub async fn source(&self, target: impl Into<Target>) -> Result<Source> {
        let target = target.into();
        let what = || format!("source {}", target);
        self.request_entity(Request::GetSourceInfo(target.clone()), what)
            .await?
            .into_source()
    }

    pub async fn source_by_index(&self, index: u32) -> Result<Source> {
        self.source(Target::Index(index)).await
    }

    pub async fn source_by_name(&self, name: &str) -> Result<Source> {
        self.source(Target::from(name)).await
    }

    pub async fn source_ports(&self, target: impl Into<Target>) -> Result<Vec<Port>> {
        Ok(self.source(target).await?.ports)
    }

    async fn resolve_source(&self, target: Target) -> Result<u32> {
        match target {
            Target::Index(index) => Ok(index),
            Target::Name(name) => {
                let sources = self.sources().await?;
                let index = sources
                    .iter()
                    .find(|source| source.name == name)
                    .map(|source| source.index)
                    .ok_or_else(|| ClientError::NotFound(format!("source {:?}", name)))?;
                debug!("{}: Resolved source {:?} to #{}", self.name(), name, index);
                Ok(index)
            }
        }
    }

    // Streams

    pub async fn sink_inputs(&self) -> Result<Vec<SinkInput>> {
        self.request(Request::GetSinkInputInfoList)
            .await?
            .into_sink_inputs()
    }

    pub async fn sink_input_by_index(&self, index: u32) -> Result<SinkInput> {
        self.request_entity(Request::GetSinkInputInfo(index), || {
            format!("sink input #{}", index)
        })
        .await?
        .into_sink_input()
    }

    /// First sink input with this name
    pub async fn sink_input_by_name(&self, name: &str) -> Result<SinkInput> {
        self.sink_inputs()
            .await?
            .into_iter()
            .find(|input| input.name.as_deref() == Some(name))
            .ok_or_else(|| ClientError::NotFound(format!("sink input {:?}", name)))
    }

    pub async fn source_outputs(&self) -> Result<Vec<SourceOutput>> {
        self.request(Request::GetSourceOutputInfoList)
            .await?
            .into_source_outputs()
    }

    pub async fn source_output_by_index(&self, index: u32) -> Result<SourceOutput> {
        self.request_entity(Request::GetSourceOutputInfo(index), || {
            format!("source output #{}", index)
        })
        .await?
        .into_source_output()
    }

    /// First source output with this name
    pub async fn source_output_by_name(&self, name: &str) -> Result<SourceOutput> {
        self.source_outputs()
            .await?
            .into_iter()
            .find(|output| output.name.as_deref() == Some(name))
            .ok_or_else(|| ClientError::NotFound(format!("source output {:?}", name)))
    }

    // Modules and clients

    pub async fn modules(&self) -> Result<Vec<Module>> {
        self.request(Request::GetModuleInfoList).await?.into_modules()
    }

    pub async fn module_by_index(&self, index: u32) -> Result<Module> {
        self.request_entity(Request::GetModuleInfo(index), || format!("module #{}", index))
            .await?
            .into_module()
    }

    /// First loaded instance of a module
    pub async fn module_by_name(&self, name: &str) -> Result<Module> {
        self.modules()
            .await?
            .into_iter()
            .find(|module| module.name == name)
            .ok_or_else(|| ClientError::NotFound(format!("module {:?}", name)))
    }

    pub async fn clients(&self) -> Result<Vec<ClientInfo>> {
        self.request(Request::GetClientInfoList).await?.into_clients()
    }

    pub async fn client_by_index(&self, index: u32) -> Result<ClientInfo> {
        self.request_entity(Request::GetClientInfo(index), || format!("client #{}", index))
            .await?
            .into_client()
    }

    pub async fn client_by_name(&self, name: &str) -> Result<ClientInfo> {
        self.clients()
            .await?
            .into_iter()
            .find(|client| client.name == name)
            .ok_or_else(|| ClientError::NotFound(format!("client {:?}", name)))
    }

    /// Load a module; returns the new module's index
    pub async fn load_module(&self, name: &str, argument: &str) -> Result<u32> {
        let index = self
            .request(Request::LoadModule {
                name: name.to_string(),
                argument: Some(argument.to_string()),
            })
            .await?
            .into_index()?;
        debug!("{}: Loaded {} as module #{}", self.name(), name, index);
        Ok(index)
    }

    /// Unload by index. Not idempotent: an absent index is `NotFound`.
    pub async fn unload_module(&self, index: u32) -> Result<()> {
        self.request_entity(Request::UnloadModule(index), || format!("module #{}", index))
            .await?
            .into_empty()
    }

    // Routing

    /// Move a recording stream to another source.
    ///
    /// A name is resolved through the source list before the move is sent.
    pub async fn move_source_output(&self, index: u32, source: impl Into<Target>) -> Result<()> {
        let source = self.resolve_source(source.into()).await?;
        self.request_entity(
            Request::MoveSourceOutput {
                index,
                source: Target::Index(source),
            },
            || format!("source output #{} or source #{}", index, source),
        )
        .await?
        .into_empty()
    }

    /// Move a playback stream to another sink.
    ///
    /// A name is resolved through the sink list before the move is sent.
    pub async fn move_sink_input(&self, index: u32, sink: impl Into<Target>) -> Result<()> {
        let sink = self.resolve_sink(sink.into()).await?;
        self.request_entity(
            Request::MoveSinkInput {
                index,
                sink: Target::Index(sink),
            },
            || format!("sink input #{} or sink #{}", index, sink),
        )
        .await?
        .into_empty()
    }

    pub async fn set_default_sink(&self, name: &str) -> Result<()> {
        self.request_entity(Request::SetDefaultSink(name.to_string()), || {
            format!("sink {:?}", name)
        })
        .await?
        .into_empty()
    }

    pub async fn set_default_source(&self, name: &str) -> Result<()> {
        self.request_entity(Request::SetDefaultSource(name.to_string()), || {
            format!("source {:?}", name)
        })
        .await?
        .into_empty()
    }

    // Ports

    pub async fn set_sink_port(&self, sink: impl Into<Target>, port: &str) -> Result<()> {
        let target = sink.into();
        let what = || format!("sink {} or port {:?}", target, port);
        self.request_entity(
            Request::SetSinkPort {
                target: target.clone(),
                port: port.to_string(),
            },
            what,
        )
        .await?
        .into_empty()
    }

    pub async fn set_source_port(&self, source: impl Into<Target>, port: &str) -> Result<()> {
        let target = source.into();
        let what = || format!("source {} or port {:?}", target, port);
        self.request_entity(
            Request::SetSourcePort {
                target: target.clone(),
                port: port.to_string(),
            },
            what,
        )
        .await?
        .into_empty()
    }

    // Volumes

    /// Set per-channel volumes on a sink.
    ///
    /// Fetches the sink first; a vector of the wrong length fails with
    /// `ChannelCountMismatch` before anything mutating is sent.
    pub async fn set_sink_volumes(&self, index: u32, volumes: &[u32]) -> Result<()> {
        let sink = self.sink_by_index(index).await?;
        self.set_sink_volumes_for(&sink, volumes).await
    }

    /// Same as [`Client::set_sink_volumes`], checked against a snapshot the
    /// caller already holds
    pub async fn set_sink_volumes_for(&self, sink: &Sink, volumes: &[u32]) -> Result<()> {
        let volume = checked_volume(sink.volume.channels(), volumes)?;
        let index = sink.index;
        self.request_entity(
            Request::SetSinkVolume {
                target: Target::Index(index),
                volume,
            },
            || format!("sink #{}", index),
        )
        .await?
        .into_empty()
    }

    pub async fn set_source_volumes(&self, index: u32, volumes: &[u32]) -> Result<()> {
        let source = self.source_by_index(index).await?;
        self.set_source_volumes_for(&source, volumes).await
    }

    pub async fn set_source_volumes_for(&self, source: &Source, volumes: &[u32]) -> Result<()> {
        let volume = checked_volume(source.volume.channels(), volumes)?;
        let index = source.index;
        self.request_entity(
            Request::SetSourceVolume {
                target: Target::Index(index),
                volume,
            },
            || format!("source #{}", index),
        )
        .await?
        .into_empty()
    }

    pub async fn set_sink_input_volumes(&self, index: u32, volumes: &[u32]) -> Result<()> {
        let input = self.sink_input_by_index(index).await?;
        self.set_sink_input_volumes_for(&input, volumes).await
    }

    pub async fn set_sink_input_volumes_for(
        &self,
        input: &SinkInput,
        volumes: &[u32],
    ) -> Result<()> {
        let volume = checked_volume(input.volume.channels(), volumes)?;
        let index = input.index;
        self.request_entity(Request::SetSinkInputVolume { index, volume }, || {
            format!("sink input #{}", index)
        })
        .await?
        .into_empty()
    }

    /// Needs protocol version 22 for the server to report the current volume
    pub async fn set_source_output_volumes(&self, index: u32, volumes: &[u32]) -> Result<()> {
        let output = self.source_output_by_index(index).await?;
        self.set_source_output_volumes_for(&output, volumes).await
    }

    pub async fn set_source_output_volumes_for(
        &self,
        output: &SourceOutput,
        volumes: &[u32],
    ) -> Result<()> {
        let volume = checked_volume(output.volume.channels(), volumes)?;
        let index = output.index;
        self.request_entity(Request::SetSourceOutputVolume { index, volume }, || {
            format!("source output #{}", index)
        })
        .await?
        .into_empty()
    }

    // Mute and suspend

    pub async fn set_sink_mute(&self, sink: impl Into<Target>, mute: bool) -> Result<()> {
        let target = sink.into();
        let what = || format!("sink {}", target);
        self.request_entity(
            Request::SetSinkMute {
                target: target.clone(),
                mute,
            },
            what,
        )
        .await?
        .into_empty()
    }

    pub async fn set_source_mute(&self, source: impl Into<Target>, mute: bool) -> Result<()> {
        let target = source.into();
        let what = || format!("source {}", target);
        self.request_entity(
            Request::SetSourceMute {
                target: target.clone(),
                mute,
            },
            what,
        )
        .await?
        .into_empty()
    }

    pub async fn set_sink_input_mute(&self, index: u32, mute: bool) -> Result<()> {
        self.request_entity(Request::SetSinkInputMute { index, mute }, || {
            format!("sink input #{}", index)
        })
        .await?
        .into_empty()
    }

    pub async fn set_source_output_mute(&self, index: u32, mute: bool) -> Result<()> {
        self.request_entity(Request::SetSourceOutputMute { index, mute }, || {
            format!("source output #{}", index)
        })
        .await?
        .into_empty()
    }

    pub async fn suspend_sink(&self, sink: impl Into<Target>, suspend: bool) -> Result<()> {
        let target = sink.into();
        let what = || format!("sink {}", target);
        self.request_entity(
            Request::SuspendSink {
                target: target.clone(),
                suspend,
            },
            what,
        )
        .await?
        .into_empty()
    }

    pub async fn suspend_source(&self, source: impl Into<Target>, suspend: bool) -> Result<()> {
        let target = source.into();
        let what = || format!("source {}", target);
        self.request_entity(
            Request::SuspendSource {
                target: target.clone(),
                suspend,
            },
            what,
        )
        .await?
        .into_empty()
    }

    // Kills

    pub async fn kill_client(&self, index: u32) -> Result<()> {
        self.request_entity(Request::KillClient(index), || format!("client #{}", index))
            .await?
            .into_empty()
    }

    pub async fn kill_sink_input(&self, index: u32) -> Result<()> {
        self.request_entity(Request::KillSinkInput(index), || {
            format!("sink input #{}", index)
        })
        .await?
        .into_empty()
    }

    pub async fn kill_source_output(&self, index: u32) -> Result<()> {
        self.request_entity(Request::KillSourceOutput(index), || {
            format!("source output #{}", index)
        })
        .await?
        .into_empty()
    }
}
