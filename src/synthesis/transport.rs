use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};
use uuid::Uuid;

use super::protocol::{decode, encode, Frame};
use super::SynthesisConfig;
use crate::error::{VoiceError, VoiceResult};

/// Outgoing half of a duplex byte-frame connection
pub type FrameSink = Pin<Box<dyn Sink<Vec<u8>, Error = VoiceError> + Send>>;

/// Incoming half; ends when the peer closes
pub type FrameSource = Pin<Box<dyn Stream<Item = VoiceResult<Vec<u8>>> + Send>>;

/// Opens connections to the synthesis provider
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> VoiceResult<(FrameSink, FrameSource)>;
}

/// WebSocket transport with the provider's authentication headers
pub struct WebSocketConnector {
    config: SynthesisConfig,
}

impl WebSocketConnector {
    pub fn new(config: SynthesisConfig) -> Self {
        Self { config }
    }
}

fn header_value(name: &str, value: &str) -> VoiceResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| VoiceError::Config(format!("invalid value for {}: {}", name, e)))
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> VoiceResult<(FrameSink, FrameSource)> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| VoiceError::Config(format!("invalid synthesis url: {}", e)))?;

        let connect_id = Uuid::new_v4().to_string();
        let headers = request.headers_mut();
        headers.insert("X-Api-App-Key", header_value("app_id", &self.config.app_id)?);
        headers.insert(
            "X-Api-Access-Key",
            header_value("access_token", &self.config.access_token)?,
        );
        headers.insert(
            "X-Api-Resource-Id",
            header_value("resource_id", &self.config.resource_id)?,
        );
        headers.insert("X-Api-Connect-Id", header_value("connect_id", &connect_id)?);

        info!("Connecting to synthesis provider at {}", self.config.url);
        let (socket, _response) = connect_async(request)
            .await
            .map_err(|e| VoiceError::ConnectionFailed(e.to_string()))?;
        debug!("WebSocket connected (connect id {})", connect_id);

        let (write, read) = socket.split();

        let sink = write
            .sink_map_err(VoiceError::from)
            .with(|bytes: Vec<u8>| future::ready(Ok::<_, VoiceError>(Message::Binary(bytes))));

        let source = read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Binary(bytes)) => Some(Ok(bytes)),
                Ok(Message::Text(text)) => Some(Err(VoiceError::Protocol(format!(
                    "unexpected text message: {}",
                    text
                )))),
                Ok(Message::Close(reason)) => Some(Err(VoiceError::ConnectionFailed(format!(
                    "closed by provider: {:?}",
                    reason
                )))),
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            })
        });

        Ok((Box::pin(sink), Box::pin(source)))
    }
}

/// In-process transport; the other end is handed to a `MemoryServer`
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<ServerConnection>,
    connects: Arc<AtomicUsize>,
}

/// Accepts connections opened through a `MemoryConnector`
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<ServerConnection>,
}

impl MemoryConnector {
    pub fn pair() -> (MemoryConnector, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            MemoryConnector {
                accept_tx,
                connects: Arc::new(AtomicUsize::new(0)),
            },
            MemoryServer { accept_rx },
        )
    }

    /// Connections opened so far
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> VoiceResult<(FrameSink, FrameSource)> {
        let (client_tx, server_rx) = fmpsc::unbounded::<Vec<u8>>();
        let (server_tx, client_rx) = fmpsc::unbounded::<VoiceResult<Vec<u8>>>();

        self.accept_tx
            .send(ServerConnection {
                incoming: server_rx,
                outgoing: server_tx,
            })
            .map_err(|_| VoiceError::ConnectionFailed("memory server is gone".to_string()))?;
        self.connects.fetch_add(1, Ordering::SeqCst);

        let sink = client_tx.sink_map_err(|e| VoiceError::ConnectionFailed(e.to_string()));
        Ok((Box::pin(sink), Box::pin(client_rx)))
    }
}

impl MemoryServer {
    pub async fn accept(&mut self) -> Option<ServerConnection> {
        self.accept_rx.recv().await
    }
}

/// Server end of one in-memory connection
///
/// Dropping it closes the connection from the client's point of view.
pub struct ServerConnection {
    incoming: fmpsc::UnboundedReceiver<Vec<u8>>,
    outgoing: fmpsc::UnboundedSender<VoiceResult<Vec<u8>>>,
}

impl ServerConnection {
    /// Next frame from the client; `None` once the client hangs up
    pub async fn recv(&mut self) -> Option<VoiceResult<Frame>> {
        let bytes = self.incoming.next().await?;
        Some(decode(&bytes))
    }

    pub fn send(&self, frame: &Frame) -> VoiceResult<()> {
        self.send_raw(encode(frame)?)
    }

    pub fn send_raw(&self, bytes: Vec<u8>) -> VoiceResult<()> {
        self.outgoing
            .unbounded_send(Ok(bytes))
            .map_err(|_| VoiceError::ConnectionFailed("client is gone".to_string()))
    }

    /// Deliver a transport error to the client
    pub fn fail(&self, error: VoiceError) {
        let _ = self.outgoing.unbounded_send(Err(error));
    }
}
