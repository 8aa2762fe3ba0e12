use std::io;
use thiserror::Error;

/// Errors raised synchronously from [`NatNetClient::connect`](crate::client::NatNetClient::connect).
///
/// Once connected, transient receive and send failures are logged and swallowed by the
/// engine; they surface only through `is_connected` and `last_error`, never as values of
/// this type, and `update` never fails.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The interface name/address, server address or port could not be used.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// No PINGRESPONSE arrived within three attempts.
    #[error("handshake timed out waiting for a ping response")]
    HandshakeTimeout,
    /// Socket construction failed, or a socket became unusable.
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),
}
