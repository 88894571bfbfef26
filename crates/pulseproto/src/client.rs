//! Session client with a reactor task owning the connection.
//!
//! Architecture:
//! - A reader task owns the read half, reassembles frames and pushes them
//!   onto a channel
//! - The reactor task owns the write half, the [`Dispatcher`] and the event
//!   router; it consumes caller commands and incoming frames
//! - Callers hold an `Arc<Client>` and await a oneshot per request
//!
//! No request is ever retried. A mutating command replayed after a lost reply
//! might apply twice, so every failure is surfaced to the caller instead.
//!
//! Usage:
//! ```ignore
//! let client = Client::connect(ClientConfig::new("mixer")).await?;
//! let sinks = client.sinks().await?;
//! client.end().await;
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use pulseconf::PulseConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, trace, warn};

use crate::command::{Command, Packet, EVENT_TAG};
use crate::error::{ClientError, Result};
use crate::events::{ChangeNotification, EventRouter, ListenerId, SubscriptionMask};
use crate::frame::{Frame, FrameCodec, FrameError, DEFAULT_MAX_FRAME_SIZE};
use crate::handshake::{Cookie, Established, Handshake, FIRST_SESSION_TAG, PROTOCOL_VERSION};
use crate::request::Request;
use crate::responses::{Reply, ReplyShape};

/// How long a timed-out request keeps its tag reserved past its deadline,
/// unless the session configures a multiple of its own timeout
const DEFAULT_RETIRE_AFTER: Duration = Duration::from_secs(45);

/// Timed-out tags are released after this many request timeouts
const RETIRE_AFTER_TIMEOUTS: u32 = 9;

/// Time queued frames get to drain when the session closes
const WRITER_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Bound on `Client::end` waiting for the reactor
const END_GRACE: Duration = Duration::from_secs(1);

/// Configuration for [`Client`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Announced as `application.name`; also prefixes log lines
    pub name: String,
    /// Server socket
    pub socket_path: PathBuf,
    /// Explicit cookie; takes precedence over `cookie_path`
    pub cookie: Option<Cookie>,
    /// File to read the cookie from at connect time
    pub cookie_path: Option<PathBuf>,
    /// Per-request deadline, also bounds the handshake
    pub request_timeout: Duration,
    /// Largest frame accepted from the server
    pub max_frame_size: u32,
    /// Subscribed right after the handshake when non-empty
    pub subscribe: SubscriptionMask,
    /// Version advertised in the handshake
    pub protocol_version: u32,
}

impl ClientConfig {
    pub fn new(name: &str) -> Self {
        let paths = pulseconf::PathsConfig::default();
        Self {
            name: name.to_string(),
            socket_path: paths.socket_path,
            cookie: None,
            cookie_path: Some(paths.cookie_path),
            request_timeout: Duration::from_millis(5000),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            subscribe: SubscriptionMask::NONE,
            protocol_version: PROTOCOL_VERSION,
        }
    }

    /// Build from loaded configuration
    pub fn from_config(config: &PulseConfig) -> Result<Self> {
        let session = &config.session;
        if session.max_frame_size == 0 {
            return Err(ClientError::InvalidConfig(
                "max_frame_size must be positive".to_string(),
            ));
        }
        if session.request_timeout_ms == 0 {
            return Err(ClientError::InvalidConfig(
                "request_timeout_ms must be positive".to_string(),
            ));
        }

        Ok(Self {
            name: session.client_name.clone(),
            socket_path: config.infra.paths.socket_path.clone(),
            cookie: None,
            cookie_path: Some(config.infra.paths.cookie_path.clone()),
            request_timeout: Duration::from_millis(session.request_timeout_ms),
            max_frame_size: session.max_frame_size,
            subscribe: SubscriptionMask::from_names(&session.subscribe)?,
            protocol_version: PROTOCOL_VERSION,
        })
    }

    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookie = Some(cookie);
        self
    }

    pub fn with_cookie_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookie_path = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.request_timeout = Duration::from_millis(timeout_ms);
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_subscription(mut self, mask: SubscriptionMask) -> Self {
        self.subscribe = mask;
        self
    }

    pub fn with_protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    /// Explicit cookie, else the cookie file, else anonymous
    async fn resolve_cookie(&self) -> Cookie {
        if let Some(cookie) = &self.cookie {
            return cookie.clone();
        }
        match &self.cookie_path {
            Some(path) => match Cookie::from_file(path).await {
                Ok(cookie) => cookie,
                Err(e) => {
                    warn!(
                        "{}: No cookie at {} ({}), connecting anonymously",
                        self.name,
                        path.display(),
                        e
                    );
                    Cookie::anonymous()
                }
            },
            None => Cookie::anonymous(),
        }
    }

    /// Expiry sweep period: fine enough for the configured timeout
    fn cleanup_period(&self) -> Duration {
        (self.request_timeout / 4).clamp(Duration::from_millis(5), Duration::from_secs(1))
    }
}

/// Whether the session still accepts requests
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Ready = 0,
    Closed = 1,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Ready,
            _ => SessionState::Closed,
        }
    }
}

/// A request waiting for its reply
struct PendingRequest {
    command: Command,
    shape: ReplyShape,
    /// `None` once the caller has been told about a timeout
    response_tx: Option<oneshot::Sender<Result<Reply>>>,
    deadline: Instant,
}

/// What happened to an incoming control packet
#[derive(Debug)]
pub(crate) enum Routed {
    /// Resolved a waiting caller
    Resolved,
    /// Matched a request nobody waits for any more
    Discarded,
    /// Unsolicited; for the event router
    Event(Packet),
}

/// Correlates requests with replies by tag.
///
/// Plain state machine with no I/O so ordering rules can be tested directly.
pub(crate) struct Dispatcher {
    name: String,
    version: u32,
    next_tag: u32,
    pending: HashMap<u32, PendingRequest>,
    /// How long a timed-out entry keeps its tag past the deadline
    retire_after: Duration,
}

impl Dispatcher {
    pub(crate) fn new(name: &str, version: u32) -> Self {
        Self {
            name: name.to_string(),
            version,
            next_tag: FIRST_SESSION_TAG,
            pending: HashMap::new(),
            retire_after: DEFAULT_RETIRE_AFTER,
        }
    }

    pub(crate) fn with_retire_after(mut self, retire_after: Duration) -> Self {
        self.retire_after = retire_after;
        self
    }

    /// Next free tag. Wraps, skipping tags still pending and the event tag.
    pub(crate) fn allocate_tag(&mut self) -> u32 {
        loop {
            let tag = self.next_tag;
            self.next_tag = self.next_tag.wrapping_add(1);
            if tag != EVENT_TAG && !self.pending.contains_key(&tag) {
                return tag;
            }
        }
    }

    pub(crate) fn register(
        &mut self,
        tag: u32,
        request: &Request,
        response_tx: oneshot::Sender<Result<Reply>>,
        deadline: Instant,
    ) {
        self.pending.insert(
            tag,
            PendingRequest {
                command: request.command(),
                shape: request.reply_shape(),
                response_tx: Some(response_tx),
                deadline,
            },
        );
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_pending(&self, tag: u32) -> bool {
        self.pending.contains_key(&tag)
    }

    /// Route one packet. An error means the session is no longer trustworthy.
    pub(crate) fn on_packet(&mut self, packet: Packet) -> Result<Routed> {
        if packet.is_event() {
            return Ok(Routed::Event(packet));
        }

        let Some(entry) = self.pending.remove(&packet.tag) else {
            return Err(ClientError::UnexpectedFrame(format!(
                "command {} for tag {} with no pending request",
                packet.command, packet.tag
            )));
        };

        let result = match packet.command() {
            Some(Command::Reply) => entry
                .shape
                .decode(&mut packet.reader(), self.version)
                .map_err(ClientError::Codec),
            Some(Command::Error) => match packet.reader().read_u32() {
                Ok(code) => Err(ClientError::Command {
                    command: entry.command,
                    code,
                }),
                Err(e) => Err(ClientError::Codec(e)),
            },
            _ => {
                let reason = format!(
                    "command {} in answer to {} (tag {})",
                    packet.command, entry.command, packet.tag
                );
                if let Some(tx) = entry.response_tx {
                    let _ = tx.send(Err(ClientError::UnexpectedFrame(reason.clone())));
                }
                return Err(ClientError::UnexpectedFrame(reason));
            }
        };

        if let Err(e) = &result {
            debug!("{}: {} (tag {}) failed: {}", self.name, entry.command, packet.tag, e);
        }

        // The caller learns what went wrong; the session cannot go on
        if let Err(ClientError::Codec(e)) = &result {
            if e.is_layout_mismatch() {
                let fatal = ClientError::Codec(e.clone());
                if let Some(tx) = entry.response_tx {
                    let _ = tx.send(result);
                }
                return Err(fatal);
            }
        }

        match entry.response_tx {
            Some(tx) => {
                if tx.send(result).is_err() {
                    trace!("{}: Caller for tag {} went away", self.name, packet.tag);
                    return Ok(Routed::Discarded);
                }
                Ok(Routed::Resolved)
            }
            None => {
                debug!(
                    "{}: Late reply for tag {} discarded, tag released",
                    self.name, packet.tag
                );
                Ok(Routed::Discarded)
            }
        }
    }

    /// Fail overdue callers with `Timeout`.
    ///
    /// The entries stay so their tags remain reserved until the server
    /// answers, or until `retire_after` past the deadline, whichever comes
    /// first. Returns how many callers were failed.
    pub(crate) fn expire(&mut self, now: Instant) -> usize {
        let mut expired = 0;
        for (tag, entry) in self.pending.iter_mut() {
            if now < entry.deadline {
                continue;
            }
            if let Some(tx) = entry.response_tx.take() {
                debug!("{}: {} (tag {}) timed out", self.name, entry.command, tag);
                let _ = tx.send(Err(ClientError::Timeout));
                expired += 1;
            }
        }

        let name = &self.name;
        let retire_after = self.retire_after;
        self.pending.retain(|tag, entry| {
            let keep = entry.response_tx.is_some() || now < entry.deadline + retire_after;
            if !keep {
                warn!(
                    "{}: No reply to {} (tag {}) after {:?}, releasing tag",
                    name, entry.command, tag, retire_after
                );
            }
            keep
        });
        expired
    }

    /// Fail every pending request with `ConnectionClosed`
    pub(crate) fn fail_all(&mut self) -> usize {
        let count = self.pending.len();
        for (tag, entry) in self.pending.drain() {
            if let Some(tx) = entry.response_tx {
                let _ = tx.send(Err(ClientError::ConnectionClosed));
                trace!("{}: Failed tag {} on close", self.name, tag);
            }
        }
        count
    }
}

/// Command sent to the reactor task
enum ReactorCommand {
    Request {
        request: Request,
        response_tx: oneshot::Sender<Result<Reply>>,
    },
    Shutdown,
}

/// What the reader and writer tasks report to the reactor
enum Incoming {
    Frame(Frame),
    Failed(FrameError),
    Eof,
}

/// Reads frames until EOF or error, handing each to the reactor
async fn reader_task<R>(
    mut reader: FramedRead<R, FrameCodec>,
    frame_tx: mpsc::Sender<Incoming>,
    name: String,
) where
    R: AsyncRead + Unpin,
{
    debug!("{}: Reader task started", name);
    loop {
        let incoming = match reader.next().await {
            Some(Ok(frame)) => Incoming::Frame(frame),
            Some(Err(e)) => Incoming::Failed(e),
            None => Incoming::Eof,
        };
        let last = !matches!(incoming, Incoming::Frame(_));
        if frame_tx.send(incoming).await.is_err() || last {
            break;
        }
    }
    debug!("{}: Reader task exiting", name);
}

/// Writes queued frames in order. A failed write is reported like a read
/// failure; a peer that stops reading only ever blocks this task.
async fn writer_task<W>(
    mut writer: FramedWrite<W, FrameCodec>,
    mut out_rx: mpsc::UnboundedReceiver<Frame>,
    frame_tx: mpsc::Sender<Incoming>,
    name: String,
) where
    W: AsyncWrite + Unpin,
{
    debug!("{}: Writer task started", name);
    while let Some(frame) = out_rx.recv().await {
        if let Err(e) = writer.send(frame).await {
            let _ = frame_tx.send(Incoming::Failed(e)).await;
            return;
        }
    }
    let _ = writer.close().await;
    debug!("{}: Writer task exiting", name);
}

/// The reactor task - owns all session state.
///
/// Interleaves caller commands, incoming frames and timeout sweeps. Never
/// waits on the socket itself: frames go to the writer task through an
/// unbounded queue. Any protocol violation or transport failure fails all
/// pending requests and ends the session.
#[allow(clippy::too_many_arguments)]
async fn reactor_task(
    out_tx: mpsc::UnboundedSender<Frame>,
    mut cmd_rx: mpsc::Receiver<ReactorCommand>,
    mut frame_rx: mpsc::Receiver<Incoming>,
    mut dispatcher: Dispatcher,
    router: Arc<EventRouter>,
    state: Arc<AtomicU8>,
    reader: JoinHandle<()>,
    mut writer: JoinHandle<()>,
    timeout: Duration,
    cleanup_period: Duration,
    name: String,
) {
    let mut cleanup_interval = tokio::time::interval(cleanup_period);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    debug!("{}: Reactor task started", name);

    loop {
        tokio::select! {
            // Drain replies before taking new work so abandoned tags free up
            biased;

            incoming = frame_rx.recv() => {
                let frame = match incoming {
                    Some(Incoming::Frame(frame)) => frame,
                    Some(Incoming::Failed(e)) => {
                        warn!("{}: Transport error, closing session: {}", name, e);
                        break;
                    }
                    Some(Incoming::Eof) | None => {
                        info!("{}: Server closed the connection", name);
                        break;
                    }
                };

                if !frame.is_control() {
                    warn!("{}: Frame on channel {} without streams, closing session", name, frame.channel);
                    break;
                }

                let routed = Packet::parse(frame.payload)
                    .map_err(ClientError::Codec)
                    .and_then(|packet| dispatcher.on_packet(packet));
                let routed = match routed {
                    Ok(Routed::Event(packet)) => router.route(&packet).map_err(ClientError::Codec),
                    Ok(Routed::Resolved) | Ok(Routed::Discarded) => Ok(()),
                    Err(e) => Err(e),
                };
                if let Err(e) = routed {
                    warn!("{}: Protocol violation, closing session: {}", name, e);
                    break;
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ReactorCommand::Request { request, response_tx }) => {
                        let tag = dispatcher.allocate_tag();
                        let payload = match request.to_payload(tag) {
                            Ok(payload) => payload,
                            Err(e) => {
                                let _ = response_tx.send(Err(ClientError::Codec(e)));
                                continue;
                            }
                        };

                        trace!("{}: Sending {} as tag {}", name, request.command(), tag);
                        dispatcher.register(tag, &request, response_tx, Instant::now() + timeout);

                        if out_tx.send(Frame::control(payload)).is_err() {
                            warn!("{}: Writer task gone, closing session", name);
                            break;
                        }
                    }
                    Some(ReactorCommand::Shutdown) => {
                        info!("{}: Session ending, failing {} pending requests", name, dispatcher.pending_count());
                        break;
                    }
                    None => {
                        debug!("{}: All client handles dropped", name);
                        break;
                    }
                }
            }

            _ = cleanup_interval.tick() => {
                let expired = dispatcher.expire(Instant::now());
                if expired > 0 {
                    debug!("{}: Timed out {} requests, {} tags reserved", name, expired, dispatcher.pending_count());
                }
            }
        }
    }

    state.store(SessionState::Closed as u8, Ordering::SeqCst);
    let failed = dispatcher.fail_all();
    if failed > 0 {
        debug!("{}: Failed {} pending requests with ConnectionClosed", name, failed);
    }
    cmd_rx.close();
    while let Ok(cmd) = cmd_rx.try_recv() {
        if let ReactorCommand::Request { response_tx, .. } = cmd {
            let _ = response_tx.send(Err(ClientError::ConnectionClosed));
        }
    }
    reader.abort();

    // Let queued frames drain, but not into a peer that stopped reading
    drop(out_tx);
    if tokio::time::timeout(WRITER_DRAIN_GRACE, &mut writer).await.is_err() {
        debug!("{}: Writer still blocked, aborting it", name);
        writer.abort();
    }

    debug!("{}: Reactor task exiting", name);
}

/// A connected, authenticated session.
///
/// Cheap to share behind `Arc`; requests from many tasks are multiplexed over
/// the one connection and resolve independently.
pub struct Client {
    config: ClientConfig,
    cmd_tx: mpsc::Sender<ReactorCommand>,
    state: Arc<AtomicU8>,
    established: Established,
    router: Arc<EventRouter>,
    reactor: Mutex<Option<JoinHandle<()>>>,
    /// Reader and writer tasks, for teardown when the reactor is stuck
    transport: Vec<AbortHandle>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .field("established", &self.established)
            .finish()
    }
}

impl Client {
    /// Connect to the configured socket and complete the handshake
    pub async fn connect(config: ClientConfig) -> Result<Arc<Self>> {
        debug!(
            "{}: Connecting to {}",
            config.name,
            config.socket_path.display()
        );
        let stream = tokio::net::UnixStream::connect(&config.socket_path).await?;
        Self::connect_with(stream, config).await
    }

    /// Run a session over any byte stream
    pub async fn connect_with<S>(stream: S, config: ClientConfig) -> Result<Arc<Self>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FramedRead::new(read_half, FrameCodec::new(config.max_frame_size));
        let mut writer = FramedWrite::new(write_half, FrameCodec::new(config.max_frame_size));

        let cookie = config.resolve_cookie().await;
        let mut handshake = Handshake::new(config.name.clone(), config.request_timeout)
            .with_local_version(config.protocol_version);
        let established = handshake.run(&mut reader, &mut writer, &cookie).await?;

        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (frame_tx, frame_rx) = mpsc::channel(256);
        let state = Arc::new(AtomicU8::new(SessionState::Ready as u8));
        let router = Arc::new(EventRouter::new(config.name.clone()));

        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(reader_task(reader, frame_tx.clone(), config.name.clone()));
        let writer = tokio::spawn(writer_task(writer, out_rx, frame_tx, config.name.clone()));
        let transport = vec![reader.abort_handle(), writer.abort_handle()];
        let dispatcher = Dispatcher::new(&config.name, established.protocol_version)
            .with_retire_after(config.request_timeout * RETIRE_AFTER_TIMEOUTS);
        let reactor = tokio::spawn(reactor_task(
            out_tx,
            cmd_rx,
            frame_rx,
            dispatcher,
            router.clone(),
            state.clone(),
            reader,
            writer,
            config.request_timeout,
            config.cleanup_period(),
            config.name.clone(),
        ));

        let subscribe = config.subscribe;
        let client = Arc::new(Self {
            config,
            cmd_tx,
            state,
            established,
            router,
            reactor: Mutex::new(Some(reactor)),
            transport,
        });

        if !subscribe.is_empty() {
            client.subscribe(subscribe).await?;
        }
        Ok(client)
    }

    /// Send one request and wait for its reply. Never retried.
    ///
    /// The deadline is enforced here as well as in the reactor's sweep, so a
    /// caller never waits longer than the request timeout.
    pub async fn request(&self, request: Request) -> Result<Reply> {
        if self.state() == SessionState::Closed {
            return Err(ClientError::ConnectionClosed);
        }

        let (response_tx, response_rx) = oneshot::channel();
        let exchange = async {
            self.cmd_tx
                .send(ReactorCommand::Request {
                    request,
                    response_tx,
                })
                .await
                .map_err(|_| ClientError::ConnectionClosed)?;

            response_rx
                .await
                .map_err(|_| ClientError::ConnectionClosed)?
        };

        match tokio::time::timeout(self.config.request_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Close the session. Pending requests fail with `ConnectionClosed`.
    ///
    /// Bounded: a reactor that does not stop within a second is aborted
    /// along with the transport tasks.
    pub async fn end(&self) {
        let _ = tokio::time::timeout(END_GRACE, self.cmd_tx.send(ReactorCommand::Shutdown)).await;
        let handle = self
            .reactor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(END_GRACE, &mut handle).await.is_err() {
                warn!("{}: Reactor did not stop, aborting session", self.config.name);
                handle.abort();
            }
        }
        for task in &self.transport {
            task.abort();
        }
        self.state.store(SessionState::Closed as u8, Ordering::SeqCst);
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Version both sides agreed on
    pub fn protocol_version(&self) -> u32 {
        self.established.protocol_version
    }

    pub fn server_protocol_version(&self) -> u32 {
        self.established.server_version
    }

    /// This connection's index among the server's clients
    pub fn client_index(&self) -> u32 {
        self.established.client_index
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Replace the server-side subscription mask
    pub async fn subscribe(&self, mask: SubscriptionMask) -> Result<()> {
        debug!("{}: Subscribing to {:#x}", self.config.name, mask.bits());
        self.request(Request::Subscribe(mask)).await?.into_empty()
    }

    /// Receiver for notifications routed after this call
    pub fn notifications(&self) -> broadcast::Receiver<ChangeNotification> {
        self.router.subscribe()
    }

    /// Callback run on the reactor task for every notification
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ChangeNotification) + Send + Sync + 'static,
    {
        self.router.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.router.remove_listener(id)
    }
}
