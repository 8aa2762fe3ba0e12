//! ## The NatNet client.
//!
//! [`NatNetClient`] is the consumer-facing surface: construct one with
//! [`NatNetClient::connect`], call [`NatNetClient::update`] once per tick of your main
//! loop, and read the newest [`Frame`] through [`NatNetClient::frame`].
//!
//! The client exclusively owns the network engine; dropping the client disconnects.
//! Behind the scenes two receiver threads drain the multicast data socket and the
//! unicast command socket, decode packets with the version latched during the
//! handshake, and hand immutable `Arc<Frame>` snapshots to the delivery pipeline.
//!
//! ## Threading contract
//!
//! - `on_frame_update` fires on the consumer thread, inside `update`.
//! - `on_frame_receive` fires on the *receiver* thread immediately after decode; the
//!   callback must be re-entrancy safe and must not call back into the client. Consumers
//!   that cannot tolerate this should use [`NatNetClient::frames`], which delivers the
//!   same snapshots over a bounded channel instead.

mod assemble;
mod engine;
mod error;
mod pipeline;

pub use self::error::ClientError;

use self::engine::{lock, Engine, Shared};
use crate::frame::Frame;
use crate::protocol::model::{
    MarkerSetDescription, ModelDefinitions, RigidBodyDescription, SkeletonDescription,
};
use crate::protocol::{ProtocolVersion, COMMAND_PORT, DATA_PORT, MULTICAST_ADDR};
use glam::{Mat4, Vec3};
use std::net::Ipv4Addr;
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

/// How often `update` re-sends PING and REQUEST_MODELDEF to keep the server talking.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Liveness window before `is_connected` reports false, in seconds.
const DEFAULT_TIMEOUT: f32 = 0.1;

/// Capacity of the channel handed out by [`NatNetClient::frames`].
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 100;

/// Connection parameters for [`NatNetClient::connect`].
#[derive(Clone, Debug)]
pub struct Config {
    /// The NIC that joins the multicast group and originates command traffic: either a
    /// literal IPv4 address or an interface name such as `"en0"`. IPv6 is not supported.
    pub interface: String,
    /// The server's IPv4 address, the peer for command datagrams.
    pub server: String,
    /// The group frame-of-data packets are multicast on.
    pub multicast_group: Ipv4Addr,
    pub command_port: u16,
    /// Pass `0` to let the OS pick; see [`NatNetClient::data_port`].
    pub data_port: u16,
    /// Per-attempt handshake read timeout. `connect` sends up to three PINGs, one read
    /// timeout each. (NatNet clients have historically disagreed between three and ten
    /// attempts; this implementation settles on three.)
    pub handshake_timeout: Duration,
}

impl Config {
    /// A configuration with the protocol's default ports and multicast group.
    pub fn new(interface: impl Into<String>, server: impl Into<String>) -> Self {
        Config {
            interface: interface.into(),
            server: server.into(),
            multicast_group: Ipv4Addr::from(MULTICAST_ADDR),
            command_port: COMMAND_PORT,
            data_port: DATA_PORT,
            handshake_timeout: Duration::from_millis(500),
        }
    }
}

/// A connected NatNet client.
///
/// Construction performs the socket setup and handshake; dropping the value
/// disconnects and joins the receiver threads.
pub struct NatNetClient {
    engine: Engine,
    shared: Arc<Shared>,
    timeout: f32,
    latest: Option<Arc<Frame>>,
    frame_new: bool,
    last_keepalive: Instant,
    update_hook: Option<engine::FrameHook>,
}

impl NatNetClient {
    /// Open the sockets, perform the PING handshake and start receiving.
    ///
    /// Fails with [`ClientError::Configuration`] when the interface or server address
    /// cannot be used, [`ClientError::HandshakeTimeout`] when the server never
    /// identifies itself, and [`ClientError::Socket`] when socket setup fails.
    pub fn connect(config: &Config) -> Result<Self, ClientError> {
        let engine = Engine::connect(config)?;
        let shared = engine.shared();
        Ok(NatNetClient {
            engine,
            shared,
            timeout: DEFAULT_TIMEOUT,
            latest: None,
            frame_new: false,
            last_keepalive: Instant::now(),
            update_hook: None,
        })
    }

    /// Stop the receiver threads and forget the session. Idempotent; also runs on drop.
    pub fn disconnect(&mut self) {
        self.engine.disconnect();
        self.latest = None;
        self.frame_new = false;
    }

    /// Drain the pipeline and publish the newest frame. Call once per consumer tick.
    ///
    /// Never fails; steady-state network problems surface through
    /// [`NatNetClient::is_connected`] and [`NatNetClient::last_error`] instead.
    pub fn update(&mut self) {
        self.update_inner(None);
    }

    /// Like [`NatNetClient::update`], but first waits up to `frame_timeout` for a frame
    /// to become pending when the queue is empty.
    pub fn update_wait(&mut self, frame_timeout: Duration) {
        self.update_inner(Some(frame_timeout));
    }

    fn update_inner(&mut self, wait: Option<Duration>) {
        if self.last_keepalive.elapsed() >= KEEPALIVE_INTERVAL {
            self.engine.send_ping();
            self.engine.send_request_model_def();
            self.last_keepalive = Instant::now();
        }

        let mut pipeline = lock(&self.shared.pipeline);
        if let Some(timeout) = wait {
            if pipeline.pending_len() == 0 {
                let (guard, _timed_out) = self
                    .shared
                    .frame_ready
                    .wait_timeout(pipeline, timeout)
                    .unwrap_or_else(PoisonError::into_inner);
                pipeline = guard;
            }
        }
        let now = self.shared.now();
        let released = pipeline.release(now);
        self.frame_new = released > 0;
        if self.frame_new {
            self.latest = pipeline.latest().cloned();
        }
        drop(pipeline);

        if !self.is_connected() {
            // Liveness lost: present an empty snapshot. The sockets stay open and the
            // engine keeps trying to receive.
            self.latest = None;
            self.frame_new = false;
        }

        if self.frame_new {
            if let (Some(hook), Some(frame)) = (self.update_hook.as_mut(), self.latest.as_ref()) {
                hook(frame);
            }
        }
    }

    /// The newest published frame, if any.
    pub fn frame(&self) -> Option<&Frame> {
        self.latest.as_deref()
    }

    /// Whether the last `update` published a frame that had not been seen before.
    pub fn is_frame_new(&self) -> bool {
        self.frame_new
    }

    /// True while the handshake holds and data packets keep arriving within the
    /// timeout window (see [`NatNetClient::set_timeout`]).
    pub fn is_connected(&self) -> bool {
        self.shared.handshook()
            && (self.shared.now() - self.shared.last_arrival()) < self.timeout as f64
    }

    /// Replace the coordinate transform applied to every incoming position and
    /// orientation. Takes effect from the next decoded frame.
    pub fn set_transform(&self, transform: Mat4) {
        self.shared.set_transform(transform);
    }

    pub fn transform(&self) -> Mat4 {
        self.shared.transform()
    }

    /// Shorthand for a uniform-scale transform, the common millimetre/metre fix-up.
    pub fn set_scale(&self, scale: f32) {
        self.shared.set_transform(Mat4::from_scale(Vec3::splat(scale)));
    }

    pub fn scale(&self) -> Vec3 {
        self.shared.transform().to_scale_rotation_translation().0
    }

    /// Fixed delivery delay in seconds; clamped to `[0, 10]`. Zero publishes frames
    /// immediately, anything larger smooths jitter at the cost of latency.
    pub fn set_buffer_time(&self, seconds: f32) {
        lock(&self.shared.pipeline).set_buffer_time(seconds);
    }

    pub fn buffer_time(&self) -> f32 {
        lock(&self.shared.pipeline).buffer_time()
    }

    /// The liveness window used by [`NatNetClient::is_connected`], in seconds.
    pub fn set_timeout(&mut self, seconds: f32) {
        self.timeout = seconds.max(0.0);
    }

    /// Markers closer than this (in user coordinates) to a rigid-body member marker are
    /// removed from `filtered_markers`. Zero disables the filter.
    pub fn set_duplicated_point_removal_distance(&self, distance: f32) {
        self.shared.set_removal_distance(distance);
    }

    /// Fire-and-forget PING; the reply re-latches versions when it arrives.
    pub fn send_ping(&self) {
        self.engine.send_ping();
    }

    /// Fire-and-forget model-definition request; the reply replaces the tables.
    pub fn send_request_model_def(&self) {
        self.engine.send_request_model_def();
    }

    /// The current model-definition snapshot.
    pub fn model_definitions(&self) -> Arc<ModelDefinitions> {
        self.shared.models()
    }

    pub fn marker_set_descriptions(&self) -> Vec<MarkerSetDescription> {
        self.shared.models().marker_sets.clone()
    }

    pub fn rigid_body_descriptions(&self) -> Vec<RigidBodyDescription> {
        self.shared.models().rigid_bodies.clone()
    }

    pub fn skeleton_descriptions(&self) -> Vec<SkeletonDescription> {
        self.shared.models().skeletons.clone()
    }

    /// The NatNet revision latched from the server's PingResponse.
    pub fn natnet_version(&self) -> ProtocolVersion {
        self.shared.version()
    }

    /// The server application's `[major, minor, build, revision]`.
    pub fn server_version(&self) -> [u8; 4] {
        self.shared.server_version_bytes()
    }

    /// Whether the server streams a NatNet revision newer than this parser supports.
    /// While set, frame-of-data packets are dropped.
    pub fn is_version_unsupported(&self) -> bool {
        self.shared.unsupported_version()
    }

    /// Override the latched NatNet version, for servers that never answer PING.
    pub fn force_set_version(&self, major: u8, minor: u8) {
        self.shared.force_version(major, minor);
    }

    /// Exponential moving average of the data-packet rate, in packets per second.
    pub fn data_rate(&self) -> f32 {
        self.shared.data_rate()
    }

    /// Arrival time of the last data packet, seconds on the client's monotonic clock.
    pub fn last_packet_arrival(&self) -> f64 {
        self.shared.last_arrival()
    }

    /// The most recent fatal engine condition, if one occurred.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error()
    }

    /// The local port the data socket bound; useful with `Config { data_port: 0, .. }`.
    pub fn data_port(&self) -> u16 {
        self.engine.data_port()
    }

    /// Register a callback fired on the consumer thread, inside `update`, whenever a
    /// new frame is published.
    pub fn on_frame_update(&mut self, hook: impl FnMut(&Frame) + Send + 'static) {
        self.update_hook = Some(Box::new(hook));
    }

    /// Register a callback fired on the *receiver* thread immediately after each frame
    /// is decoded. The callback must be re-entrancy safe and must not call back into
    /// this client; prefer [`NatNetClient::frames`] when in doubt.
    pub fn on_frame_receive(&self, hook: impl FnMut(&Frame) + Send + 'static) {
        self.shared.set_receive_hook(Some(Box::new(hook)));
    }

    /// Remove the receiver-thread callback.
    pub fn clear_frame_receive(&self) {
        self.shared.set_receive_hook(None);
    }

    /// A bounded channel receiving every decoded frame, the re-entrancy-safe
    /// alternative to [`NatNetClient::on_frame_receive`]. A receiver that falls more
    /// than 100 frames behind misses frames rather than stalling the engine.
    pub fn frames(&self) -> Receiver<Arc<Frame>> {
        let (tx, rx) = sync_channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.shared.subscribe(tx);
        rx
    }
}
