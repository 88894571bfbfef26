//! pulseproto - PulseAudio native protocol client
//!
//! Speaks the sound server's binary control protocol directly over its local
//! socket, without the server's own client library. Lists and mutates sinks,
//! sources, streams, modules and ports, and receives change notifications.
//!
//! ## Layers
//!
//! Leaf first:
//! - `tagstruct`: the self-describing tagged value codec
//! - `frame`: 20-byte descriptor framing and reassembly
//! - `command`: command numbers and the `L command | L tag` envelope
//! - `handshake`: version negotiation, cookie auth, client name
//! - `client`: the session, its reactor task and request/reply correlation
//! - `events`: subscription masks and the notification router
//! - `entities`: typed operations on [`Client`]
//!
//! The codec layers have no runtime dependencies and build without the
//! default `client` feature.
//!
//! ## Wire Format
//!
//! ```text
//! frame    = length:u32 channel:u32 offset_hi:u32 offset_lo:u32 flags:u32 payload
//! payload  = 'L' command:u32 'L' tag:u32 fields...
//! reply    = REPLY(2) with the request's tag, then reply fields
//! error    = ERROR(0) with the request's tag, then 'L' code
//! event    = SUBSCRIBE_EVENT(66) with tag 0xFFFFFFFF, then 'L' event 'L' index
//! ```
//!
//! ## Errors
//!
//! Transport loss and protocol violations close the session and fail every
//! pending request with `ConnectionClosed`. Server error replies, decode
//! failures of one reply, lookups and local checks fail only their own call.
//! Server error codes are surfaced verbatim.

pub mod command;
pub mod domain;
pub mod error;
pub mod events;
pub mod frame;
pub mod request;
pub mod responses;
pub mod tagstruct;

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "client")]
mod entities;
#[cfg(feature = "client")]
pub mod handshake;

pub use command::{Command, Packet, EVENT_TAG};
pub use domain::{
    ClientInfo, DeviceState, Module, Port, PortAvailable, ServerInfo, Sink, SinkInput, Source,
    SourceOutput,
};
pub use error::{error_code_name, ClientError, HandshakeError};
pub use events::{ChangeKind, ChangeNotification, Facility, SubscriptionMask};
pub use frame::{Frame, FrameCodec, FrameError};
pub use request::{Request, Target};
pub use responses::{Reply, ReplyShape};
pub use tagstruct::{
    CVolume, ChannelMap, CodecError, FormatInfo, Proplist, SampleSpec, TagReader, TagWriter,
    Value, VOLUME_MUTED, VOLUME_NORM,
};

#[cfg(feature = "client")]
pub use client::{Client, ClientConfig, SessionState};
#[cfg(feature = "client")]
pub use events::{EventRouter, ListenerId};
#[cfg(feature = "client")]
pub use handshake::{Cookie, HandshakeState, PROTOCOL_VERSION};
