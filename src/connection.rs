use crate::error::{GatewayError, Result};
use crate::protocol::{Codec, Command, InboundEvent, LineBuffer};
use crate::subscription::StateSink;
use crate::types::{ConnectionState, GatewayTarget, ZoneField, ZoneId, ZoneValue};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Gap between writes; the serial bridge drops commands sent back-to-back
const COMMAND_SPACING: Duration = Duration::from_millis(40);
const READ_BUFFER_SIZE: usize = 1024;

fn default_reconnect_schedule() -> Vec<Duration> {
    [1, 2, 5, 10, 30].into_iter().map(Duration::from_secs).collect()
}

/// Tuning knobs for a gateway connection
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Upper bound on a single TCP connect attempt
    pub connect_timeout: Duration,
    /// Pause after each command written to the socket
    pub command_spacing: Duration,
    /// Reconnect delays indexed by attempt; the last entry repeats
    pub reconnect_schedule: Vec<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            command_spacing: COMMAND_SPACING,
            reconnect_schedule: default_reconnect_schedule(),
        }
    }
}

impl ConnectionOptions {
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_command_spacing(mut self, command_spacing: Duration) -> Self {
        self.command_spacing = command_spacing;
        self
    }

    /// Replace the reconnect schedule (an empty schedule keeps the default)
    pub fn with_reconnect_schedule(mut self, schedule: Vec<Duration>) -> Self {
        if !schedule.is_empty() {
            self.reconnect_schedule = schedule;
        }
        self
    }

    /// Delay before reconnect attempt number `attempt` (0-based)
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let schedule = &self.reconnect_schedule;
        let index = (attempt as usize).min(schedule.len().saturating_sub(1));
        schedule.get(index).copied().unwrap_or(Duration::from_secs(30))
    }
}

/// Who asked for a connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Caller,
    Reconnect,
}

/// Mutable connection state, guarded by a sync mutex that is never held across `.await`
struct Inner {
    state: ConnectionState,
    queue: VecDeque<Command>,
    draining: bool,
    writer: Option<Arc<tokio::sync::Mutex<OwnedWriteHalf>>>,
    reader: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    reconnect_attempt: u32,
    /// Bumped for every connect and disconnect so events from an old socket are ignored
    generation: u64,
    /// Set by `disconnect()`, cleared by the next caller `connect()`
    suspended: bool,
}

struct Shared {
    target: GatewayTarget,
    codec: Arc<Codec>,
    sink: Arc<dyn StateSink>,
    options: ConnectionOptions,
    inner: Mutex<Inner>,
}

/// Persistent connection to one Russound gateway
///
/// Owns the socket, the reconnect state machine and the outbound queue.
/// Commands are written one at a time with a fixed gap between them, and
/// survive disconnects: anything still queued is sent, in order, once the
/// connection is back.
///
/// The queue is unbounded and commands never expire, so a gateway that stays
/// unreachable accumulates commands for as long as callers keep sending.
///
/// # Example
///
/// ```no_run
/// use russound_cam::{Codec, ConnectionOptions, GatewayConnection, GatewayTarget, NullSink};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let connection = GatewayConnection::new(
///         GatewayTarget::new("192.168.1.40", 9621),
///         Arc::new(Codec::new()),
///         Arc::new(NullSink),
///         ConnectionOptions::default(),
///     );
///     connection.connect().await?;
///     connection.set_power(2, true);
///     connection.set_volume(2, 35.0);
///     Ok(())
/// }
/// ```
pub struct GatewayConnection {
    shared: Arc<Shared>,
}

impl GatewayConnection {
    /// Create an idle connection; nothing is opened until [`connect`](Self::connect)
    pub fn new(
        target: GatewayTarget,
        codec: Arc<Codec>,
        sink: Arc<dyn StateSink>,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                target,
                codec,
                sink,
                options,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    queue: VecDeque::new(),
                    draining: false,
                    writer: None,
                    reader: None,
                    reconnect_timer: None,
                    reconnect_attempt: 0,
                    generation: 0,
                    suspended: false,
                }),
            }),
        }
    }

    /// Open the TCP connection
    ///
    /// Returns immediately if already connected and fails with
    /// `ConnectInProgress` if another attempt is in flight. A failed attempt
    /// is returned to the caller and also schedules a reconnect.
    pub async fn connect(&self) -> Result<()> {
        self.shared.connect(Trigger::Caller).await
    }

    /// Close the connection and stop reconnecting
    ///
    /// Queued commands are kept and go out after the next `connect()`.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// Queue a command for transmission; no-op commands are dropped silently
    pub fn enqueue(&self, command: Command) {
        if command.is_noop() {
            tracing::trace!(gateway = %self.shared.target, "Skipping no-op command");
            return;
        }
        self.shared.lock().queue.push_back(command);
        self.shared.trigger_drain();
    }

    /// Switch a zone on or off
    pub fn set_power(&self, zone: ZoneId, on: bool) {
        self.enqueue(self.shared.codec.power(zone, on));
    }

    /// Mute or unmute a zone
    pub fn set_mute(&self, zone: ZoneId, on: bool) {
        self.enqueue(self.shared.codec.mute(zone, on));
    }

    /// Select source 1..=6 for a zone (rounded and clamped)
    pub fn set_source(&self, zone: ZoneId, source: f64) {
        self.enqueue(self.shared.codec.source(zone, source));
    }

    /// Set a zone volume 0..=100 (rounded and clamped)
    pub fn set_volume(&self, zone: ZoneId, volume: f64) {
        self.enqueue(self.shared.codec.volume(zone, volume));
    }

    /// Power off every zone
    pub fn send_all_off(&self) {
        self.enqueue(self.shared.codec.all_off());
    }

    /// Set bass -10..=10; ignored unless bass is enabled in the codec
    pub fn set_bass(&self, zone: ZoneId, bass: f64) {
        self.enqueue(self.shared.codec.bass(zone, bass));
    }

    /// Set treble -10..=10; ignored unless treble is enabled in the codec
    pub fn set_treble(&self, zone: ZoneId, treble: f64) {
        self.enqueue(self.shared.codec.treble(zone, treble));
    }

    /// Set balance -10..=10; ignored unless balance is enabled in the codec
    pub fn set_balance(&self, zone: ZoneId, balance: f64) {
        self.enqueue(self.shared.codec.balance(zone, balance));
    }

    /// Switch loudness; ignored unless loudness is enabled in the codec
    pub fn set_loudness(&self, zone: ZoneId, on: bool) {
        self.enqueue(self.shared.codec.loudness(zone, on));
    }

    /// Request zone status; currently always a no-op
    pub fn query_zone(&self, zone: ZoneId) {
        self.enqueue(self.shared.codec.query_zone(zone));
    }

    /// The gateway this connection talks to
    pub fn target(&self) -> &GatewayTarget {
        &self.shared.target
    }

    /// The codec used for encoding and event mapping
    pub fn codec(&self) -> &Codec {
        &self.shared.codec
    }

    /// Current socket state
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// True while the socket is up
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Commands waiting to be written
    pub fn queue_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Reconnects scheduled since the last successful connect
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock().reconnect_attempt
    }

    /// Push a value to the state sink without waiting for the device
    pub(crate) fn report(&self, zone: ZoneId, field: ZoneField, value: ZoneValue) {
        self.shared.sink.on_zone_event(zone, field, value);
    }
}

impl Drop for GatewayConnection {
    fn drop(&mut self) {
        // Background tasks hold the shared state; stop them with the handle
        self.shared.disconnect();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn connect(self: &Arc<Self>, trigger: Trigger) -> Result<()> {
        let generation = {
            let mut inner = self.lock();

            if trigger == Trigger::Reconnect {
                if inner.suspended {
                    return Err(GatewayError::Cancelled);
                }
                // This is the timer task itself; just forget its handle
                inner.reconnect_timer = None;
            }

            match inner.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => return Err(GatewayError::ConnectInProgress),
                ConnectionState::Disconnected => {}
            }

            if trigger == Trigger::Caller {
                if let Some(timer) = inner.reconnect_timer.take() {
                    timer.abort();
                }
                inner.suspended = false;
            }

            inner.state = ConnectionState::Connecting;
            inner.generation += 1;
            inner.generation
        };

        tracing::debug!(gateway = %self.target, "Connecting");

        let address = (self.target.host.as_str(), self.target.port);
        let result = match timeout(self.options.connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(GatewayError::Connect {
                target: self.target.to_string(),
                source,
            }),
            Err(_) => Err(GatewayError::ConnectTimeout {
                target: self.target.to_string(),
            }),
        };

        match result {
            Ok(stream) => self.on_connected(stream, generation),
            Err(e) => {
                {
                    let mut inner = self.lock();
                    if inner.generation != generation {
                        return Err(GatewayError::Cancelled);
                    }
                    inner.state = ConnectionState::Disconnected;
                }
                self.schedule_reconnect();
                Err(e)
            }
        }
    }

    fn on_connected(self: &Arc<Self>, stream: TcpStream, generation: u64) -> Result<()> {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(gateway = %self.target, "Failed to set TCP_NODELAY: {}", e);
        }
        let (read_half, write_half) = stream.into_split();

        {
            let mut inner = self.lock();
            if inner.generation != generation {
                // disconnect() won the race; the socket is dropped here
                return Err(GatewayError::Cancelled);
            }
            inner.state = ConnectionState::Connected;
            inner.reconnect_attempt = 0;
            inner.writer = Some(Arc::new(tokio::sync::Mutex::new(write_half)));

            let shared = Arc::clone(self);
            inner.reader = Some(tokio::spawn(async move {
                shared.read_loop(read_half, generation).await;
            }));
        }

        tracing::info!(gateway = %self.target, "TCP connected");
        self.trigger_drain();
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf, generation: u64) {
        let mut lines = LineBuffer::new();
        let mut buf = [0u8; READ_BUFFER_SIZE];

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    tracing::debug!(gateway = %self.target, "Socket closed by gateway");
                    break;
                }
                Ok(n) => self.dispatch(lines.push(&buf[..n])),
                Err(e) => {
                    tracing::warn!(gateway = %self.target, "Socket error: {}", e);
                    break;
                }
            }
        }

        self.handle_close(generation);
    }

    fn dispatch(&self, events: Vec<InboundEvent>) {
        for event in events {
            tracing::debug!(gateway = %self.target, "Received: {}", event.raw);
            self.sink.on_inbound(&event);

            match self.codec.map_event(&event) {
                Some(update) => self.sink.on_zone_event(update.zone, update.field, update.value),
                None => tracing::trace!(gateway = %self.target, "No mapping for {}", event.raw),
            }
        }
    }

    /// Socket closed or failed: drop it and start reconnecting
    fn handle_close(self: &Arc<Self>, generation: u64) {
        let (was_connected, reader) = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return;
            }
            let was_connected = inner.state == ConnectionState::Connected;
            inner.state = ConnectionState::Disconnected;
            inner.writer = None;
            (was_connected, inner.reader.take())
        };

        if let Some(reader) = reader {
            reader.abort();
        }
        if was_connected {
            tracing::info!(gateway = %self.target, "TCP disconnected");
        }

        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let mut inner = self.lock();
        if inner.suspended || inner.reconnect_timer.is_some() {
            return;
        }

        let delay = self.options.reconnect_delay(inner.reconnect_attempt);
        inner.reconnect_attempt += 1;

        if inner.reconnect_attempt == 1 {
            tracing::info!(gateway = %self.target, "Scheduling reconnect in {:?}", delay);
        } else {
            tracing::debug!(
                gateway = %self.target,
                attempt = inner.reconnect_attempt,
                "Scheduling reconnect in {:?}",
                delay
            );
        }

        let shared = Arc::clone(self);
        inner.reconnect_timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            match shared.connect(Trigger::Reconnect).await {
                Ok(()) | Err(GatewayError::ConnectInProgress) | Err(GatewayError::Cancelled) => {}
                // connect() has already scheduled the next attempt
                Err(e) => tracing::error!(gateway = %shared.target, "Reconnect failed: {}", e),
            }
        }));
    }

    fn disconnect(&self) {
        let (was_connected, reader, timer) = {
            let mut inner = self.lock();
            inner.suspended = true;
            inner.reconnect_attempt = 0;
            inner.generation += 1;
            let was_connected = inner.state == ConnectionState::Connected;
            inner.state = ConnectionState::Disconnected;
            inner.writer = None;
            (was_connected, inner.reader.take(), inner.reconnect_timer.take())
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(reader) = reader {
            reader.abort();
        }
        if was_connected {
            tracing::info!(gateway = %self.target, "TCP disconnected");
        }
    }

    /// Put `command` back at the head of the queue and treat the socket as closed
    ///
    /// If a newer socket is already up, the drain loop restarts on it.
    fn write_failed(self: &Arc<Self>, command: Command, generation: u64) {
        {
            let mut inner = self.lock();
            inner.queue.push_front(command);
            inner.draining = false;
        }
        self.handle_close(generation);
        self.trigger_drain();
    }

    /// Start the drain loop unless it is already running
    fn trigger_drain(self: &Arc<Self>) {
        {
            let mut inner = self.lock();
            if inner.draining || inner.state != ConnectionState::Connected || inner.queue.is_empty() {
                return;
            }
            inner.draining = true;
        }

        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.drain().await });
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let (command, writer, generation) = {
                let mut inner = self.lock();
                let writer = match inner.state {
                    ConnectionState::Connected => inner.writer.clone(),
                    _ => None,
                };
                let Some(writer) = writer else {
                    inner.draining = false;
                    return;
                };
                let Some(command) = inner.queue.pop_front() else {
                    inner.draining = false;
                    return;
                };
                (command, writer, inner.generation)
            };

            let result = {
                let mut writer = writer.lock().await;
                writer.write_all(command.as_bytes()).await
            };

            if let Err(e) = result {
                tracing::warn!(gateway = %self.target, "Write failed: {}", e);
                self.write_failed(command, generation);
                return;
            }

            tracing::debug!(gateway = %self.target, "Sent: {}", command);
            sleep(self.options.command_spacing).await;
        }
    }
}
