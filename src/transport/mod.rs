//! Duplex channel to the voice server
//!
//! Text messages carry JSON directives and events; binary messages carry raw
//! PCM16 audio in both directions.

pub mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::AudioFrame;
use crate::error::TransportError;
use crate::protocol::Directive;

pub use websocket::{WebSocketConnector, WebSocketTransport};

/// Message delivered by the transport's reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
    /// Peer closed the connection
    Closed,
    /// Read failure; the connection is unusable
    Error(String),
}

/// Sender half handed to the connector for inbound messages
pub type InboundSink = mpsc::UnboundedSender<Inbound>;

/// An open connection
///
/// Sends are fire-and-forget: they queue the message and return without
/// waiting for the network. A failure that happens later is reported through
/// `Inbound::Error`.
#[async_trait]
pub trait Transport: Send {
    fn send_directive(&mut self, directive: &Directive) -> Result<(), TransportError>;

    fn send_audio(&mut self, frame: &AudioFrame) -> Result<(), TransportError>;

    /// Flush queued messages and close the connection
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens connections
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self, inbound: InboundSink) -> Result<Box<dyn Transport>, TransportError>;
}
