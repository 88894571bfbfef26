//! Reply shapes and decoded replies
//!
//! A pending request remembers the [`ReplyShape`] its command expects. When
//! the matching `REPLY` arrives the body is decoded against that shape and
//! must be consumed exactly; leftover bytes mean the two sides disagree on
//! the layout and are reported instead of ignored.

use crate::domain::{ClientInfo, Module, ServerInfo, Sink, SinkInput, Source, SourceOutput};
use crate::error::ClientError;
use crate::tagstruct::{CodecError, TagReader};

/// Expected layout of a successful reply body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// No fields
    Empty,
    /// A single `L` index
    Index,
    ServerInfo,
    Sink,
    SinkList,
    Source,
    SourceList,
    SinkInput,
    SinkInputList,
    SourceOutput,
    SourceOutputList,
    Module,
    ModuleList,
    Client,
    ClientList,
}

/// Read records until the body is exhausted
fn read_list<T>(
    r: &mut TagReader<'_>,
    version: u32,
    read: fn(&mut TagReader<'_>, u32) -> Result<T, CodecError>,
) -> Result<Vec<T>, CodecError> {
    let mut items = Vec::new();
    while !r.is_empty() {
        items.push(read(r, version)?);
    }
    Ok(items)
}

impl ReplyShape {
    /// Decode a reply body negotiated at `version`
    pub fn decode(self, r: &mut TagReader<'_>, version: u32) -> Result<Reply, CodecError> {
        let reply = match self {
            ReplyShape::Empty => Reply::Empty,
            ReplyShape::Index => Reply::Index(r.read_u32()?),
            ReplyShape::ServerInfo => Reply::ServerInfo(ServerInfo::read(r, version)?),
            ReplyShape::Sink => Reply::Sink(Sink::read(r, version)?),
            ReplyShape::SinkList => Reply::Sinks(read_list(r, version, Sink::read)?),
            ReplyShape::Source => Reply::Source(Source::read(r, version)?),
            ReplyShape::SourceList => Reply::Sources(read_list(r, version, Source::read)?),
            ReplyShape::SinkInput => Reply::SinkInput(SinkInput::read(r, version)?),
            ReplyShape::SinkInputList => {
                Reply::SinkInputs(read_list(r, version, SinkInput::read)?)
            }
            ReplyShape::SourceOutput => Reply::SourceOutput(SourceOutput::read(r, version)?),
            ReplyShape::SourceOutputList => {
                Reply::SourceOutputs(read_list(r, version, SourceOutput::read)?)
            }
            ReplyShape::Module => Reply::Module(Module::read(r, version)?),
            ReplyShape::ModuleList => Reply::Modules(read_list(r, version, Module::read)?),
            ReplyShape::Client => Reply::Client(ClientInfo::read(r, version)?),
            ReplyShape::ClientList => Reply::Clients(read_list(r, version, ClientInfo::read)?),
        };
        r.expect_end()?;
        Ok(reply)
    }
}

/// A decoded successful reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Empty,
    Index(u32),
    ServerInfo(ServerInfo),
    Sink(Sink),
    Sinks(Vec<Sink>),
    Source(Source),
    Sources(Vec<Source>),
    SinkInput(SinkInput),
    SinkInputs(Vec<SinkInput>),
    SourceOutput(SourceOutput),
    SourceOutputs(Vec<SourceOutput>),
    Module(Module),
    Modules(Vec<Module>),
    Client(ClientInfo),
    Clients(Vec<ClientInfo>),
}

macro_rules! reply_accessors {
    ($($method:ident => $variant:ident($ty:ty),)+) => {
        impl Reply {
            $(
                pub fn $method(self) -> Result<$ty, ClientError> {
                    match self {
                        Reply::$variant(value) => Ok(value),
                        _ => Err(ClientError::UnexpectedReply),
                    }
                }
            )+

            pub fn into_empty(self) -> Result<(), ClientError> {
                match self {
                    Reply::Empty => Ok(()),
                    _ => Err(ClientError::UnexpectedReply),
                }
            }
        }
    };
}

reply_accessors! {
    into_index => Index(u32),
    into_server_info => ServerInfo(ServerInfo),
    into_sink => Sink(Sink),
    into_sinks => Sinks(Vec<Sink>),
    into_source => Source(Source),
    into_sources => Sources(Vec<Source>),
    into_sink_input => SinkInput(SinkInput),
    into_sink_inputs => SinkInputs(Vec<SinkInput>),
    into_source_output => SourceOutput(SourceOutput),
    into_source_outputs => SourceOutputs(Vec<SourceOutput>),
    into_module => Module(Module),
    into_modules => Modules(Vec<Module>),
    into_client => Client(ClientInfo),
    into_clients => Clients(Vec<ClientInfo>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tagstruct::{Proplist, TagWriter};
    use pretty_assertions::assert_eq;

    fn module(index: u32, name: &str) -> Module {
        Module {
            index,
            name: name.to_string(),
            argument: None,
            n_used: None,
            proplist: Proplist::new(),
            auto_unload: false,
        }
    }

    #[test]
    fn list_reads_until_exhausted() {
        let modules = vec![module(0, "module-native-protocol-unix"), module(4, "module-null-sink")];
        let mut w = TagWriter::new();
        for m in &modules {
            m.write(&mut w, 32).unwrap();
        }
        let bytes = w.finish();

        let reply = ReplyShape::ModuleList
            .decode(&mut TagReader::new(&bytes), 32)
            .unwrap();
        assert_eq!(reply.into_modules().unwrap(), modules);
    }

    #[test]
    fn empty_list() {
        let reply = ReplyShape::SinkList
            .decode(&mut TagReader::new(&[]), 32)
            .unwrap();
        assert_eq!(reply, Reply::Sinks(Vec::new()));
    }

    #[test]
    fn trailing_fields_fail_the_decode() {
        let mut w = TagWriter::new();
        w.put_u32(7).put_u32(8);
        let bytes = w.finish();
        assert_eq!(
            ReplyShape::Index.decode(&mut TagReader::new(&bytes), 32),
            Err(CodecError::TrailingData(5))
        );
    }

    #[test]
    fn empty_shape_rejects_fields() {
        let mut w = TagWriter::new();
        w.put_bool(true);
        let bytes = w.finish();
        assert!(ReplyShape::Empty
            .decode(&mut TagReader::new(&bytes), 32)
            .is_err());
    }

    #[test]
    fn accessor_mismatch() {
        assert!(matches!(
            Reply::Index(3).into_sink(),
            Err(ClientError::UnexpectedReply)
        ));
        assert_eq!(Reply::Index(3).into_index().unwrap(), 3);
        Reply::Empty.into_empty().unwrap();
    }
}
