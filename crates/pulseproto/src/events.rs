//! Change notifications
//!
//! After `SUBSCRIBE` the server pushes `SUBSCRIBE_EVENT` packets tagged with
//! [`EVENT_TAG`](crate::command::EVENT_TAG):
//!
//! ```text
//! L event   facility in the low nibble, change kind in bits 4-5
//! L index   entity the change applies to
//! ```
//!
//! Filtering happens server-side through the subscription mask; the router
//! delivers whatever arrives, in arrival order.

use crate::error::ClientError;
use crate::tagstruct::{CodecError, TagReader};

const FACILITY_MASK: u32 = 0x0F;
const TYPE_MASK: u32 = 0x30;

/// Entity kinds to receive change notifications for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SubscriptionMask(u32);

impl SubscriptionMask {
    pub const NONE: Self = Self(0);
    pub const SINK: Self = Self(0x0001);
    pub const SOURCE: Self = Self(0x0002);
    pub const SINK_INPUT: Self = Self(0x0004);
    pub const SOURCE_OUTPUT: Self = Self(0x0008);
    pub const MODULE: Self = Self(0x0010);
    pub const CLIENT: Self = Self(0x0020);
    pub const SAMPLE_CACHE: Self = Self(0x0040);
    pub const SERVER: Self = Self(0x0080);
    pub const CARD: Self = Self(0x0200);
    pub const ALL: Self = Self(0x02ff);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Build a mask from names like `"sink"` or `"all"`
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ClientError> {
        let mut mask = Self::NONE;
        for name in names {
            mask = mask
                | match name.as_ref().trim() {
                    "sink" => Self::SINK,
                    "source" => Self::SOURCE,
                    "sink_input" => Self::SINK_INPUT,
                    "source_output" => Self::SOURCE_OUTPUT,
                    "module" => Self::MODULE,
                    "client" => Self::CLIENT,
                    "sample_cache" => Self::SAMPLE_CACHE,
                    "server" => Self::SERVER,
                    "card" => Self::CARD,
                    "all" => Self::ALL,
                    other => {
                        return Err(ClientError::InvalidConfig(format!(
                            "unknown subscription kind {:?}",
                            other
                        )))
                    }
                };
        }
        Ok(mask)
    }
}

impl std::ops::BitOr for SubscriptionMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for SubscriptionMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Which kind of entity a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facility {
    Sink,
    Source,
    SinkInput,
    SourceOutput,
    Module,
    Client,
    SampleCache,
    Server,
    Card,
    /// Facility numbers this client has no name for
    Other(u32),
}

impl Facility {
    pub fn from_u32(raw: u32) -> Self {
        match raw {
            0 => Facility::Sink,
            1 => Facility::Source,
            2 => Facility::SinkInput,
            3 => Facility::SourceOutput,
            4 => Facility::Module,
            5 => Facility::Client,
            6 => Facility::SampleCache,
            7 => Facility::Server,
            9 => Facility::Card,
            other => Facility::Other(other),
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            Facility::Sink => 0,
            Facility::Source => 1,
            Facility::SinkInput => 2,
            Facility::SourceOutput => 3,
            Facility::Module => 4,
            Facility::Client => 5,
            Facility::SampleCache => 6,
            Facility::Server => 7,
            Facility::Card => 9,
            Facility::Other(raw) => raw,
        }
    }
}

/// What happened to the entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    New,
    Changed,
    Removed,
}

impl ChangeKind {
    pub fn to_u32(self) -> u32 {
        match self {
            ChangeKind::New => 0x00,
            ChangeKind::Changed => 0x10,
            ChangeKind::Removed => 0x20,
        }
    }
}

/// One change pushed by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeNotification {
    pub facility: Facility,
    pub kind: ChangeKind,
    pub index: u32,
}

impl ChangeNotification {
    /// Split a raw event word into facility and kind.
    ///
    /// Returns `None` for the unused kind value 0x30.
    pub fn from_event(event: u32, index: u32) -> Option<Self> {
        let kind = match event & TYPE_MASK {
            0x00 => ChangeKind::New,
            0x10 => ChangeKind::Changed,
            0x20 => ChangeKind::Removed,
            _ => return None,
        };
        Some(Self {
            facility: Facility::from_u32(event & FACILITY_MASK),
            kind,
            index,
        })
    }

    pub fn event(&self) -> u32 {
        self.facility.to_u32() | self.kind.to_u32()
    }

    /// Decode a `SUBSCRIBE_EVENT` body
    pub fn parse(r: &mut TagReader<'_>) -> Result<Option<Self>, CodecError> {
        let event = r.read_u32()?;
        let index = r.read_u32()?;
        r.expect_end()?;
        Ok(Self::from_event(event, index))
    }
}

#[cfg(feature = "client")]
pub use router::{EventRouter, ListenerId};

#[cfg(feature = "client")]
mod router {
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, RwLock};

    use tokio::sync::broadcast;
    use tracing::{debug, trace, warn};

    use super::ChangeNotification;
    use crate::command::{Command, Packet};
    use crate::tagstruct::CodecError;

    /// Capacity of the broadcast channel behind [`EventRouter::subscribe`]
    const NOTIFICATION_BACKLOG: usize = 256;

    type Listener = Arc<dyn Fn(&ChangeNotification) + Send + Sync>;

    /// Handle returned by [`EventRouter::add_listener`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ListenerId(u64);

    /// Fans notifications out to callbacks and broadcast receivers
    pub struct EventRouter {
        name: String,
        listeners: RwLock<Vec<(ListenerId, Listener)>>,
        next_id: AtomicU64,
        tx: broadcast::Sender<ChangeNotification>,
    }

    impl std::fmt::Debug for EventRouter {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("EventRouter")
                .field("name", &self.name)
                .field("listeners", &self.listener_count())
                .finish()
        }
    }

    impl EventRouter {
        pub fn new(name: impl Into<String>) -> Self {
            let (tx, _) = broadcast::channel(NOTIFICATION_BACKLOG);
            Self {
                name: name.into(),
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                tx,
            }
        }

        /// Register a callback. It runs on the session's reactor task, so it
        /// must not block.
        pub fn add_listener<F>(&self, listener: F) -> ListenerId
        where
            F: Fn(&ChangeNotification) + Send + Sync + 'static,
        {
            let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
            self.listeners
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push((id, Arc::new(listener)));
            id
        }

        /// Returns whether the listener was registered
        pub fn remove_listener(&self, id: ListenerId) -> bool {
            let mut listeners = self
                .listeners
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let before = listeners.len();
            listeners.retain(|(existing, _)| *existing != id);
            listeners.len() != before
        }

        pub fn listener_count(&self) -> usize {
            self.listeners
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len()
        }

        /// A receiver for every notification routed from now on
        pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
            self.tx.subscribe()
        }

        /// Handle an unsolicited packet.
        ///
        /// Only `SUBSCRIBE_EVENT` produces notifications; other pushes are
        /// logged and dropped, as are events of an unknown kind. An event
        /// body that does not decode is returned as an error.
        pub fn route(&self, packet: &Packet) -> Result<(), CodecError> {
            if packet.command() != Some(Command::SubscribeEvent) {
                debug!(
                    "{}: ignoring unsolicited command {}",
                    self.name, packet.command
                );
                return Ok(());
            }

            match ChangeNotification::parse(&mut packet.reader())? {
                Some(notification) => self.deliver(&notification),
                None => warn!("{}: event with unknown change kind dropped", self.name),
            }
            Ok(())
        }

        /// Run every listener, then publish to broadcast receivers
        pub fn deliver(&self, notification: &ChangeNotification) {
            trace!("{}: {:?}", self.name, notification);

            // Snapshot so listeners may register or remove listeners re-entrantly
            let snapshot: Vec<(ListenerId, Listener)> = self
                .listeners
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone();

            for (id, listener) in snapshot {
                if catch_unwind(AssertUnwindSafe(|| listener(notification))).is_err() {
                    warn!("{}: listener {:?} panicked", self.name, id);
                }
            }

            // No receivers is fine
            let _ = self.tx.send(*notification);
        }
    }
}
