use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{Inbound, InboundSink, Transport, TransportConnector};
use crate::audio::AudioFrame;
use crate::error::TransportError;
use crate::protocol::Directive;

/// How long `close` waits for queued messages to drain
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Connects to the voice server over WebSocket
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    api_key: Option<String>,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            url: url.into(),
            api_key,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn connect_error(&self, reason: impl ToString) -> TransportError {
        TransportError::Connect {
            url: self.url.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn connect(&self, inbound: InboundSink) -> Result<Box<dyn Transport>, TransportError> {
        info!("Connecting to voice server at {}", self.url);

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| self.connect_error(e))?;

        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| self.connect_error(e))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| self.connect_error(e))?;

        info!("Connected to voice server");

        let (mut sink, mut stream) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let writer_errors = inbound.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    warn!("WebSocket send failed: {}", e);
                    let _ = writer_errors.send(Inbound::Error(e.to_string()));
                    return;
                }
            }

            // Sender dropped: close politely
            if let Err(e) = sink.close().await {
                debug!("WebSocket close failed: {}", e);
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let forwarded = match message {
                    Ok(Message::Text(text)) => inbound.send(Inbound::Text(text)),
                    Ok(Message::Binary(bytes)) => inbound.send(Inbound::Binary(bytes)),
                    Ok(Message::Close(frame)) => {
                        debug!("WebSocket closed by peer: {:?}", frame);
                        let _ = inbound.send(Inbound::Closed);
                        return;
                    }
                    Ok(_) => Ok(()),
                    Err(e) => {
                        let _ = inbound.send(Inbound::Error(e.to_string()));
                        return;
                    }
                };

                if forwarded.is_err() {
                    // Nobody is listening anymore
                    return;
                }
            }

            let _ = inbound.send(Inbound::Closed);
        });

        Ok(Box::new(WebSocketTransport {
            outbound: Some(outbound),
            writer: Some(writer),
            reader,
        }))
    }
}

/// Open WebSocket connection
///
/// Outbound messages go through an unbounded queue drained by a writer task;
/// inbound messages are forwarded by a reader task.
pub struct WebSocketTransport {
    outbound: Option<mpsc::UnboundedSender<Message>>,
    writer: Option<JoinHandle<()>>,
    reader: JoinHandle<()>,
}

impl WebSocketTransport {
    fn queue(&self, message: Message) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        outbound.send(message).map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn send_directive(&mut self, directive: &Directive) -> Result<(), TransportError> {
        let json =
            serde_json::to_string(directive).map_err(|e| TransportError::Send(e.to_string()))?;

        debug!("Sending {}", directive.name());
        self.queue(Message::Text(json))
    }

    fn send_audio(&mut self, frame: &AudioFrame) -> Result<(), TransportError> {
        self.queue(Message::Binary(frame.to_pcm_bytes()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Dropping the sender lets the writer flush and send Close
        self.outbound.take();

        if let Some(writer) = self.writer.take() {
            if tokio::time::timeout(CLOSE_GRACE, writer).await.is_err() {
                warn!("WebSocket writer did not finish within {:?}", CLOSE_GRACE);
            }
        }

        self.reader.abort();
        info!("Voice server connection closed");

        Ok(())
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(writer) = &self.writer {
            writer.abort();
        }
        self.reader.abort();
    }
}
