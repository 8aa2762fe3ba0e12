//! A client implementation of **NatNet** - the protocol OptiTrack motion-capture
//! systems stream rigid-body, marker and skeleton data over.
//!
//! The server publishes frame-of-data packets to a UDP multicast group and answers
//! requests (PING, model definitions) on a unicast command port. This crate joins the
//! group, performs the handshake that latches the server's protocol revision, decodes
//! the versioned binary format (NatNet 2.0 through 3.1) and hands your application an
//! immutable snapshot of every tracked entity each frame.
//!
//! The [`protocol`] module is the pure wire codec; [`client`] owns the sockets, the
//! receiver threads and the delivery pipeline; [`frame`] is the data your application
//! consumes, with the configured coordinate transform already applied.
//!
//! ```no_run
//! use natnet::{Config, NatNetClient};
//!
//! fn main() -> Result<(), natnet::ClientError> {
//!     let mut client = NatNetClient::connect(&Config::new("en0", "192.168.1.10"))?;
//!     // Motive streams metres; this application wants millimetres.
//!     client.set_scale(1000.0);
//!     loop {
//!         client.update();
//!         if client.is_frame_new() {
//!             if let Some(frame) = client.frame() {
//!                 println!(
//!                     "frame {}: {} rigid bodies, {} markers",
//!                     frame.frame_number,
//!                     frame.rigid_bodies.len(),
//!                     frame.markers.len(),
//!                 );
//!             }
//!         }
//!     }
//! }
//! ```

pub mod client;
pub mod frame;
pub mod protocol;

pub use crate::client::{ClientError, Config, NatNetClient};
pub use crate::frame::Frame;
