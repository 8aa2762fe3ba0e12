//! The dual-socket network engine.
//!
//! Owns the multicast data socket, the unicast command socket and the two receiver
//! threads. Network i/o never runs on the consumer thread: each receiver loops on a
//! bounded-timeout `recv`, runs arriving datagrams through the wire codec and hands the
//! assembled frames to the delivery pipeline.
//!
//! All cross-thread state lives in [`Shared`]: the pipeline behind one mutex with a
//! condvar, the model-definition snapshot behind a second, and the flags, latched
//! versions and the data-rate estimate as atomics.

use crate::client::assemble::assemble;
use crate::client::error::ClientError;
use crate::client::pipeline::{update_data_rate, Pipeline};
use crate::client::Config;
use crate::frame::Frame;
use crate::protocol::frame::FrameOfData;
use crate::protocol::model::{ModelDef, ModelDefinitions};
use crate::protocol::{
    message_id, request_packet, Header, ProtocolVersion, ReadFromBytes, Sender,
    MAX_PACKET_SIZE,
};
use glam::Mat4;
use log::{debug, error, info, warn};
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Receive-loop readiness timeout; also the pace of shutdown checks.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// PING attempts before `connect` gives up.
const HANDSHAKE_ATTEMPTS: u32 = 3;

/// Requested socket buffer size. Best-effort: kernels may clamp it.
const SOCKET_BUFFER_SIZE: usize = 0x0010_0000;

/// Consecutive receive failures before a socket is declared unusable.
const FATAL_ERROR_LIMIT: u32 = 10;

/// Largest datagram the receive loops accept: envelope plus maximum payload.
const RECV_BUFFER_LEN: usize = MAX_PACKET_SIZE + 4;

/// A hook invoked with each frame. See the threading notes on the registration sites.
pub(crate) type FrameHook = Box<dyn FnMut(&Frame) + Send>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Settings the consumer writes and the receiver reads for every decoded frame.
pub(crate) struct Settings {
    pub transform: Mat4,
    pub removal_distance: f32,
}

/// State shared between the receiver threads and the consumer.
pub(crate) struct Shared {
    epoch: Instant,
    running: AtomicBool,
    /// A PINGRESPONSE has been received and versions are latched.
    handshook: AtomicBool,
    /// Latched `[major, minor, build, revision]`, packed little-endian.
    natnet_version: AtomicU32,
    server_version: AtomicU32,
    /// The latched version exceeds what this implementation can parse.
    unsupported_version: AtomicBool,
    // One-shot log latches; decode problems repeat at packet rate otherwise.
    warned_unlatched: AtomicBool,
    warned_unsupported: AtomicBool,
    warned_malformed: AtomicBool,
    /// Arrival time of the last data packet, microseconds on the engine clock.
    last_arrival_us: AtomicU64,
    /// Packet-rate EMA, stored as f32 bits.
    data_rate_bits: AtomicU32,
    pub pipeline: Mutex<Pipeline>,
    pub frame_ready: Condvar,
    models: Mutex<Arc<ModelDefinitions>>,
    settings: Mutex<Settings>,
    receive_hook: Mutex<Option<FrameHook>>,
    subscribers: Mutex<Vec<SyncSender<Arc<Frame>>>>,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    pub fn new() -> Self {
        Shared {
            epoch: Instant::now(),
            running: AtomicBool::new(true),
            handshook: AtomicBool::new(false),
            natnet_version: AtomicU32::new(0),
            server_version: AtomicU32::new(0),
            unsupported_version: AtomicBool::new(false),
            warned_unlatched: AtomicBool::new(false),
            warned_unsupported: AtomicBool::new(false),
            warned_malformed: AtomicBool::new(false),
            last_arrival_us: AtomicU64::new(0),
            data_rate_bits: AtomicU32::new(0),
            pipeline: Mutex::new(Pipeline::new()),
            frame_ready: Condvar::new(),
            models: Mutex::new(Arc::new(ModelDefinitions::default())),
            settings: Mutex::new(Settings {
                transform: Mat4::IDENTITY,
                removal_distance: 0.0,
            }),
            receive_hook: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
            last_error: Mutex::new(None),
        }
    }

    /// Seconds elapsed on the engine's monotonic clock.
    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn handshook(&self) -> bool {
        self.handshook.load(Ordering::Relaxed)
    }

    pub fn version(&self) -> ProtocolVersion {
        let bytes = self.natnet_version.load(Ordering::Relaxed).to_le_bytes();
        ProtocolVersion::new(bytes[0], bytes[1])
    }

    pub fn server_version_bytes(&self) -> [u8; 4] {
        self.server_version.load(Ordering::Relaxed).to_le_bytes()
    }

    pub fn unsupported_version(&self) -> bool {
        self.unsupported_version.load(Ordering::Relaxed)
    }

    pub fn force_version(&self, major: u8, minor: u8) {
        let packed = u32::from_le_bytes([major, minor, 0, 0]);
        self.natnet_version.store(packed, Ordering::Relaxed);
    }

    pub fn last_arrival(&self) -> f64 {
        self.last_arrival_us.load(Ordering::Relaxed) as f64 / 1e6
    }

    pub fn data_rate(&self) -> f32 {
        f32::from_bits(self.data_rate_bits.load(Ordering::Relaxed))
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    pub fn models(&self) -> Arc<ModelDefinitions> {
        lock(&self.models).clone()
    }

    pub fn set_transform(&self, transform: Mat4) {
        lock(&self.settings).transform = transform;
    }

    pub fn transform(&self) -> Mat4 {
        lock(&self.settings).transform
    }

    pub fn set_removal_distance(&self, distance: f32) {
        lock(&self.settings).removal_distance = distance.max(0.0);
    }

    pub fn set_receive_hook(&self, hook: Option<FrameHook>) {
        *lock(&self.receive_hook) = hook;
    }

    pub fn subscribe(&self, sender: SyncSender<Arc<Frame>>) {
        lock(&self.subscribers).push(sender);
    }

    /// Record a fatal condition: the engine keeps running but reports disconnected.
    fn fail(&self, message: String) {
        error!("{}", message);
        *lock(&self.last_error) = Some(message);
        self.handshook.store(false, Ordering::Relaxed);
    }

    /// Update the arrival bookkeeping for one data packet.
    fn note_arrival(&self, now: f64) {
        let previous_us = self
            .last_arrival_us
            .swap((now * 1e6) as u64, Ordering::Relaxed);
        if previous_us > 0 {
            let dt = now - previous_us as f64 / 1e6;
            let rate = update_data_rate(self.data_rate(), dt);
            self.data_rate_bits.store(rate.to_bits(), Ordering::Relaxed);
        }
    }

    fn note_malformed(&self, detail: &str) {
        // One warning per session, debug level after that.
        if !self.warned_malformed.swap(true, Ordering::Relaxed) {
            warn!("malformed packet dropped: {}", detail);
        } else {
            debug!("malformed packet dropped: {}", detail);
        }
    }

    /// Decode one datagram and act on it. Called from both receiver threads and, during
    /// the handshake, from the connecting thread.
    pub fn ingest(&self, datagram: &[u8], now: f64) {
        let mut reader = datagram;
        let header = match Header::read_from_bytes(&mut reader) {
            Ok(header) => header,
            Err(_) => {
                self.note_malformed("datagram shorter than the packet header");
                return;
            }
        };
        if reader.len() != header.num_data_bytes as usize {
            self.note_malformed("datagram length disagrees with num_data_bytes");
            return;
        }
        match header.message_id {
            message_id::PING_RESPONSE => self.ingest_ping_response(reader, now),
            message_id::FRAMEOFDATA => self.ingest_frame(reader, now),
            message_id::MODELDEF => self.ingest_model_def(reader),
            message_id::MESSAGE_STRING => {
                if let Ok(text) = crate::protocol::read_name(reader) {
                    debug!("server message: {}", text);
                }
            }
            message_id::UNRECOGNIZED_REQUEST => {
                debug!("server did not recognize our last request");
            }
            other => self.note_malformed(&format!("unrecognized message id {}", other)),
        }
    }

    fn ingest_ping_response(&self, payload: &[u8], now: f64) {
        let sender = match Sender::read_from_bytes(payload) {
            Ok(sender) => sender,
            Err(_) => {
                self.note_malformed("truncated ping response");
                return;
            }
        };
        self.natnet_version.store(
            u32::from_le_bytes(sender.natnet_version),
            Ordering::Relaxed,
        );
        self.server_version
            .store(u32::from_le_bytes(sender.version), Ordering::Relaxed);
        self.handshook.store(true, Ordering::Relaxed);
        // Grace period: liveness counts from the handshake until data flows.
        self.last_arrival_us
            .store((now * 1e6) as u64, Ordering::Relaxed);
        info!(
            "connected to {:?}: NatNet v{}.{}, server v{}.{}",
            sender.name,
            sender.natnet_version[0],
            sender.natnet_version[1],
            sender.version[0],
            sender.version[1],
        );
    }

    fn ingest_frame(&self, payload: &[u8], now: f64) {
        let version = self.version();
        if !version.is_latched() {
            if !self.warned_unlatched.swap(true, Ordering::Relaxed) {
                error!("initialize failed: no ping response has latched a NatNet version");
            }
            return;
        }
        if version.exceeds_supported() {
            self.unsupported_version.store(true, Ordering::Relaxed);
            if !self.warned_unsupported.swap(true, Ordering::Relaxed) {
                warn!(
                    "server streams NatNet {} but this parser stops at {}; dropping frames",
                    version,
                    ProtocolVersion::SUPPORTED,
                );
            }
            return;
        }
        let raw = match FrameOfData::decode(payload, version) {
            Ok(raw) => raw,
            Err(err) => {
                self.note_malformed(&err.to_string());
                return;
            }
        };
        let (transform, removal_distance) = {
            let settings = lock(&self.settings);
            (settings.transform, settings.removal_distance)
        };
        let models = self.models();
        let frame = Arc::new(assemble(
            raw,
            version,
            &transform,
            &models,
            removal_distance,
            now,
        ));
        // Receiver-thread hook first, then the channels, then the pipeline.
        if let Some(hook) = lock(&self.receive_hook).as_mut() {
            hook(&frame);
        }
        lock(&self.subscribers).retain(|tx| match tx.try_send(frame.clone()) {
            Ok(()) => true,
            // A slow subscriber misses frames rather than stalling the receiver.
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
        lock(&self.pipeline).push(frame);
        self.frame_ready.notify_all();
    }

    fn ingest_model_def(&self, payload: &[u8]) {
        let version = self.version();
        if !version.is_latched() {
            if !self.warned_unlatched.swap(true, Ordering::Relaxed) {
                error!("initialize failed: no ping response has latched a NatNet version");
            }
            return;
        }
        match ModelDef::decode(payload, version) {
            Ok(def) => {
                let definitions = ModelDefinitions::from_model_def(def);
                debug!(
                    "model definitions: {} marker sets, {} rigid bodies, {} skeletons",
                    definitions.marker_sets.len(),
                    definitions.rigid_bodies.len(),
                    definitions.skeletons.len(),
                );
                // Replaced whole; readers only ever see a complete snapshot.
                *lock(&self.models) = Arc::new(definitions);
            }
            Err(err) => self.note_malformed(&err.to_string()),
        }
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.handshook.store(false, Ordering::Relaxed);
        self.natnet_version.store(0, Ordering::Relaxed);
        self.server_version.store(0, Ordering::Relaxed);
        lock(&self.pipeline).clear();
        self.frame_ready.notify_all();
    }
}

/// Resolve the interface argument: a literal IPv4 address, or a NIC name to look up.
fn resolve_interface(interface: &str) -> Result<Ipv4Addr, ClientError> {
    if let Ok(addr) = interface.parse::<Ipv4Addr>() {
        return Ok(addr);
    }
    let interfaces = NetworkInterface::show().map_err(|err| {
        ClientError::Configuration(format!("could not enumerate network interfaces: {}", err))
    })?;
    for itf in &interfaces {
        if itf.name != interface {
            continue;
        }
        for addr in &itf.addr {
            if let Addr::V4(v4) = addr {
                return Ok(v4.ip);
            }
        }
    }
    Err(ClientError::Configuration(format!(
        "'{}' is neither an IPv4 address nor the name of an interface with one",
        interface
    )))
}

fn set_buffer_sizes(socket: &Socket, recv: bool, send: bool) {
    // Best-effort; several platforms cap unprivileged buffer sizes.
    if recv {
        if let Err(err) = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE) {
            debug!("could not grow receive buffer: {}", err);
        }
    }
    if send {
        if let Err(err) = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE) {
            debug!("could not grow send buffer: {}", err);
        }
    }
}

/// The network engine: sockets plus receiver threads around a [`Shared`] core.
pub(crate) struct Engine {
    shared: Arc<Shared>,
    command_socket: Arc<UdpSocket>,
    data_port: u16,
    threads: Vec<thread::JoinHandle<()>>,
}

impl Engine {
    /// Open both sockets, run the handshake and start the receiver threads.
    pub fn connect(config: &Config) -> Result<Engine, ClientError> {
        let interface = resolve_interface(&config.interface)?;
        let server: Ipv4Addr = config.server.parse().map_err(|_| {
            ClientError::Configuration(format!("'{}' is not an IPv4 address", config.server))
        })?;

        // Data socket: wildcard-bound, joined to the multicast group on the interface.
        let data_socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        data_socket.set_reuse_address(true)?;
        set_buffer_sizes(&data_socket, true, false);
        data_socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.data_port).into())?;
        data_socket.join_multicast_v4(&config.multicast_group, &interface)?;
        let data_socket: UdpSocket = data_socket.into();
        data_socket.set_read_timeout(Some(POLL_TIMEOUT))?;
        let data_port = data_socket.local_addr()?.port();

        // Command socket: bound to the interface, connected to the server.
        let command_socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        command_socket.set_reuse_address(true)?;
        command_socket.set_broadcast(true)?;
        set_buffer_sizes(&command_socket, true, true);
        command_socket.bind(&SocketAddrV4::new(interface, 0).into())?;
        command_socket.connect(&SocketAddrV4::new(server, config.command_port).into())?;
        let command_socket: UdpSocket = command_socket.into();

        let shared = Arc::new(Shared::new());
        handshake(&command_socket, &shared, config.handshake_timeout)?;

        // Fire-and-forget; the command receiver picks up the reply.
        if let Err(err) = command_socket.send(&request_packet(message_id::REQUEST_MODELDEF)) {
            debug!("model definition request failed: {}", err);
        }

        command_socket.set_read_timeout(Some(POLL_TIMEOUT))?;
        let command_socket = Arc::new(command_socket);

        let mut threads = Vec::with_capacity(2);
        {
            let shared = shared.clone();
            threads.push(
                thread::Builder::new()
                    .name("natnet-data".to_string())
                    .spawn(move || receive_loop(shared, &data_socket, true))
                    .map_err(ClientError::Socket)?,
            );
        }
        {
            let shared = shared.clone();
            let socket = command_socket.clone();
            threads.push(
                thread::Builder::new()
                    .name("natnet-command".to_string())
                    .spawn(move || receive_loop(shared, &socket, false))
                    .map_err(ClientError::Socket)?,
            );
        }

        Ok(Engine {
            shared,
            command_socket,
            data_port,
            threads,
        })
    }

    pub fn shared(&self) -> Arc<Shared> {
        self.shared.clone()
    }

    /// The local port the data socket bound. Useful when `Config::data_port` was 0.
    pub fn data_port(&self) -> u16 {
        self.data_port
    }

    pub fn send_ping(&self) {
        if let Err(err) = self.command_socket.send(&request_packet(message_id::PING)) {
            debug!("ping failed: {}", err);
        }
    }

    pub fn send_request_model_def(&self) {
        let packet = request_packet(message_id::REQUEST_MODELDEF);
        if let Err(err) = self.command_socket.send(&packet) {
            debug!("model definition request failed: {}", err);
        }
    }

    /// Stop the receiver threads and forget the latched versions. Idempotent.
    pub fn disconnect(&mut self) {
        self.shared.shutdown();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("a receiver thread panicked during shutdown");
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// PING the server until it identifies itself, up to [`HANDSHAKE_ATTEMPTS`] times with
/// one read timeout per attempt.
fn handshake(
    socket: &UdpSocket,
    shared: &Shared,
    timeout: Duration,
) -> Result<(), ClientError> {
    socket.set_read_timeout(Some(timeout))?;
    let mut buf = [0u8; 1024];
    for attempt in 1..=HANDSHAKE_ATTEMPTS {
        socket.send(&request_packet(message_id::PING))?;
        match socket.recv(&mut buf) {
            Ok(n) => {
                shared.ingest(&buf[..n], shared.now());
                if shared.handshook() {
                    return Ok(());
                }
            }
            Err(err) if is_timeout(&err) => {
                warn!(
                    "no ping response (attempt {}/{})",
                    attempt, HANDSHAKE_ATTEMPTS
                );
            }
            Err(err) => return Err(ClientError::Socket(err)),
        }
    }
    Err(ClientError::HandshakeTimeout)
}

/// Drain one socket until the run flag clears. `is_data` selects the arrival-time and
/// rate bookkeeping that only data packets feed.
fn receive_loop(shared: Arc<Shared>, socket: &UdpSocket, is_data: bool) {
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    let mut consecutive_errors = 0u32;
    while shared.running() {
        match socket.recv(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                consecutive_errors = 0;
                let now = shared.now();
                if is_data {
                    shared.note_arrival(now);
                }
                shared.ingest(&buf[..n], now);
            }
            Err(err) if is_timeout(&err) => {}
            Err(err) => {
                // Transient failures are logged and the loop continues; a socket that
                // only ever errors is declared unusable.
                consecutive_errors += 1;
                warn!("socket receive failed: {}", err);
                if consecutive_errors >= FATAL_ERROR_LIMIT {
                    shared.fail(format!("socket unusable: {}", err));
                    break;
                }
                thread::sleep(POLL_TIMEOUT);
            }
        }
    }
}
