//! Connection handshake
//!
//! ```text
//! Disconnected --AUTH(version, cookie)--> VersionSent
//! VersionSent  --REPLY(server version)--> AuthSent   (after SET_CLIENT_NAME goes out)
//! AuthSent     --REPLY(client index)----> Ready
//! any state    --error/timeout/EOF------> Failed
//! ```
//!
//! The cookie travels with the version in the first packet; the server
//! rejects a bad cookie with an `ACCESS` error reply. The server's version
//! word carries capability flags in its upper half, which this client masks
//! off: it never negotiates shared memory.
//!
//! A failed handshake is final. Callers reconnect from scratch.

use std::path::Path;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::command::{Command, Packet};
use crate::error::HandshakeError;
use crate::frame::{Frame, FrameCodec};
use crate::tagstruct::Proplist;

/// Highest protocol version this client speaks
pub const PROTOCOL_VERSION: u32 = 32;

/// Oldest server version accepted
pub const MIN_PROTOCOL_VERSION: u32 = 13;

/// Canonical cookie length
pub const COOKIE_LENGTH: usize = 256;

const VERSION_MASK: u32 = 0x0000_FFFF;

/// Tags used during the handshake; the dispatcher starts after them
pub(crate) const AUTH_TAG: u32 = 0;
pub(crate) const CLIENT_NAME_TAG: u32 = 1;
pub(crate) const FIRST_SESSION_TAG: u32 = 2;

/// Shared secret presented to the server
#[derive(Clone, PartialEq, Eq)]
pub struct Cookie(Vec<u8>);

impl Cookie {
    /// Bytes are sent verbatim, whatever their length
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// All-zero cookie, accepted by servers running with auth-anonymous
    pub fn anonymous() -> Self {
        Self(vec![0; COOKIE_LENGTH])
    }

    pub async fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        if bytes.len() != COOKIE_LENGTH {
            warn!(
                "Cookie {} is {} bytes, expected {}",
                path.as_ref().display(),
                bytes.len(),
                COOKIE_LENGTH
            );
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Cookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cookie(<{} bytes>)", self.0.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Disconnected,
    VersionSent,
    AuthSent,
    Ready,
    Failed,
}

/// Outcome of a successful handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Established {
    /// min(ours, server's); governs every info layout afterwards
    pub protocol_version: u32,
    /// Server's version with capability flags removed
    pub server_version: u32,
    /// Our index among the server's clients
    pub client_index: u32,
}

/// Drives one handshake over an already framed transport
#[derive(Debug)]
pub struct Handshake {
    name: String,
    local_version: u32,
    timeout: Duration,
    state: HandshakeState,
}

impl Handshake {
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            local_version: PROTOCOL_VERSION,
            timeout,
            state: HandshakeState::Disconnected,
        }
    }

    /// Advertise an older version than [`PROTOCOL_VERSION`]
    pub fn with_local_version(mut self, version: u32) -> Self {
        self.local_version = version;
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run the exchange. On any error the state is `Failed`.
    pub async fn run<R, W>(
        &mut self,
        reader: &mut FramedRead<R, FrameCodec>,
        writer: &mut FramedWrite<W, FrameCodec>,
        cookie: &Cookie,
    ) -> Result<Established, HandshakeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if self.state != HandshakeState::Disconnected {
            return Err(HandshakeError::Unexpected(format!(
                "handshake already in state {:?}",
                self.state
            )));
        }

        let result = match tokio::time::timeout(self.timeout, self.exchange(reader, writer, cookie))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(HandshakeError::Timeout),
        };

        match &result {
            Ok(established) => {
                self.state = HandshakeState::Ready;
                info!(
                    "{}: Connected (protocol {}, server {}, client #{})",
                    self.name,
                    established.protocol_version,
                    established.server_version,
                    established.client_index
                );
            }
            Err(e) => {
                warn!("{}: Handshake failed in {:?}: {}", self.name, self.state, e);
                self.state = HandshakeState::Failed;
            }
        }
        result
    }

    async fn exchange<R, W>(
        &mut self,
        reader: &mut FramedRead<R, FrameCodec>,
        writer: &mut FramedWrite<W, FrameCodec>,
        cookie: &Cookie,
    ) -> Result<Established, HandshakeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut auth = Packet::begin(Command::Auth, AUTH_TAG);
        auth.put_u32(self.local_version)
            .put_arbitrary(cookie.as_bytes());
        writer.send(Frame::control(auth.finish())).await?;
        self.state = HandshakeState::VersionSent;
        debug!("{}: AUTH sent (version {})", self.name, self.local_version);

        let reply = next_reply(reader, AUTH_TAG, "auth").await?;
        let mut r = reply.reader();
        let server_version = r.read_u32()? & VERSION_MASK;
        r.expect_end()?;

        if server_version < MIN_PROTOCOL_VERSION {
            return Err(HandshakeError::VersionTooOld(server_version));
        }
        let protocol_version = self.local_version.min(server_version);
        debug!(
            "{}: Server speaks version {}, using {}",
            self.name, server_version, protocol_version
        );

        let mut set_name = Packet::begin(Command::SetClientName, CLIENT_NAME_TAG);
        set_name.put_proplist(&client_proplist(&self.name))?;
        writer.send(Frame::control(set_name.finish())).await?;
        self.state = HandshakeState::AuthSent;

        let reply = next_reply(reader, CLIENT_NAME_TAG, "set client name").await?;
        let mut r = reply.reader();
        let client_index = r.read_u32()?;
        r.expect_end()?;

        Ok(Established {
            protocol_version,
            server_version,
            client_index,
        })
    }
}

/// Properties announced with SET_CLIENT_NAME
fn client_proplist(name: &str) -> Proplist {
    let mut props = Proplist::new();
    props.insert_str("application.name", name);
    props.insert_str("application.process.id", &std::process::id().to_string());
    if let Some(binary) = std::env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
    {
        props.insert_str("application.process.binary", &binary);
    }
    props
}

/// Wait for the reply to `tag`, turning error replies into `Rejected`
async fn next_reply<R>(
    reader: &mut FramedRead<R, FrameCodec>,
    tag: u32,
    stage: &'static str,
) -> Result<Packet, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let frame = match reader.next().await {
        Some(frame) => frame?,
        None => return Err(HandshakeError::ConnectionClosed),
    };
    if !frame.is_control() {
        return Err(HandshakeError::Unexpected(format!(
            "frame on channel {}",
            frame.channel
        )));
    }

    let packet = Packet::parse(frame.payload)?;
    if packet.tag != tag {
        return Err(HandshakeError::Unexpected(format!(
            "tag {} while waiting for {}",
            packet.tag, tag
        )));
    }

    match packet.command() {
        Some(Command::Reply) => Ok(packet),
        Some(Command::Error) => {
            let code = packet.reader().read_u32()?;
            Err(HandshakeError::Rejected { stage, code })
        }
        _ => Err(HandshakeError::Unexpected(format!(
            "command {} during {}",
            packet.command, stage
        ))),
    }
}
