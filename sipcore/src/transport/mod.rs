//! Transport layer.
//!
//! The signaling core only needs a connection it can push text messages
//! into and that reports when it goes up or down. Any transport implements
//! the [`SipTransport`] trait; events flow back to the user agent as
//! [`TransportEvent`]s.
//!
//! # Available Transports
//!
//! - [`ws`]: SIP over WebSocket (RFC 7118) with weighted server selection
//!   and reconnection backoff.

use std::sync::Arc;

use async_trait::async_trait;

pub mod ws;

pub use ws::{Socket, WebSocketTransport};

/// Keep-alive ping.
pub const KEEPALIVE_REQUEST: &str = "\r\n\r\n";

/// Keep-alive pong.
pub const KEEPALIVE_RESPONSE: &str = "\r\n";

/// Trait for all transport implementations.
#[async_trait]
pub trait SipTransport: Send + Sync + 'static {
    /// Starts connecting. The outcome is reported as a
    /// [`TransportEvent::Connected`] or [`TransportEvent::Disconnected`].
    async fn connect(&self);

    /// Closes the connection without reconnecting.
    async fn disconnect(&self);

    /// Queues `message` for sending. Returns `false` if the transport
    /// cannot take it, in which case the caller handles a transport error.
    fn send(&self, message: &str) -> bool;

    /// Transport token used in Via headers, e.g. `WSS`.
    fn via_transport(&self) -> String;

    /// A SIP URI for the server we are connected to, used as preloaded
    /// route.
    fn sip_uri(&self) -> String;

    /// Returns `true` if the transport is reliable.
    fn is_reliable(&self) -> bool {
        true
    }

    fn is_connected(&self) -> bool;
}

/// A shared handle to a transport.
pub type Transport = Arc<dyn SipTransport>;

/// What a transport reports to the user agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    /// The connection was lost or could not be established. `error` is
    /// `false` for a clean close.
    Disconnected { error: bool },
    /// A complete SIP message.
    Data(String),
}
