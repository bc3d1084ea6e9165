//! Gemini Live API transport.
//!
//! - Endpoint: `wss://generativelanguage.googleapis.com/ws/...BidiGenerateContent?key=<api key>`
//! - Protocol: WebSocket with JSON messages (the server frames them as text or binary)
//! - Audio: PCM 16-bit little-endian mono, 16kHz in / 24kHz out, base64 encoded

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use super::client::{ChannelEvent, LiveChannel, LiveTransport, INBOUND_CAPACITY, OUTBOUND_CAPACITY};
use super::messages::{ClientMessage, ServerMessage, Setup};
use crate::error::{LiveError, LiveResult};

/// Default Live API WebSocket endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// WebSocket transport to the Gemini Live API
#[derive(Debug, Clone)]
pub struct GeminiTransport {
    endpoint: String,
    api_key: String,
    setup_timeout: Duration,
}

impl GeminiTransport {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        setup_timeout: Duration,
    ) -> LiveResult<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(LiveError::ConnectionFailed("API key is required".to_string()));
        }

        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            setup_timeout,
        })
    }

    /// Build the WebSocket URL with the key parameter.
    pub fn build_ws_url(&self) -> LiveResult<Url> {
        Url::parse_with_params(&self.endpoint, &[("key", self.api_key.as_str())])
            .map_err(|e| LiveError::ConnectionFailed(format!("invalid endpoint: {}", e)))
    }

    /// Wait for `setupComplete`, rejecting on close or error.
    async fn await_setup(source: &mut WsSource) -> LiveResult<()> {
        while let Some(frame) = source.next().await {
            match frame {
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                        .unwrap_or_else(|| "closed during setup".to_string());
                    return Err(LiveError::ChannelRejected(reason));
                }
                Ok(msg) => match parse_frame(&msg) {
                    Some(Ok(server)) if server.is_setup_complete() => return Ok(()),
                    Some(Ok(_)) => debug!("Ignoring message received before setupComplete"),
                    Some(Err(e)) => warn!("Failed to parse setup response: {}", e),
                    None => {}
                },
                Err(e) => return Err(LiveError::ConnectionFailed(e.to_string())),
            }
        }
        Err(LiveError::ChannelRejected("connection ended during setup".to_string()))
    }
}

#[async_trait::async_trait]
impl LiveTransport for GeminiTransport {
    async fn open(&self, setup: Setup) -> LiveResult<LiveChannel> {
        let url = self.build_ws_url()?;
        info!("Connecting to Live API ({})", setup.model);

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

        let (mut sink, mut source) = ws_stream.split();

        let json = serde_json::to_string(&ClientMessage::Setup(setup))
            .map_err(|e| LiveError::ConnectionFailed(format!("Failed to serialize setup: {}", e)))?;
        sink.send(Message::Text(json.into()))
            .await
            .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

        tokio::time::timeout(self.setup_timeout, Self::await_setup(&mut source))
            .await
            .map_err(|_| LiveError::ChannelRejected("timed out waiting for setupComplete".to_string()))??;

        info!("Live API session setup complete");

        let (out_tx, out_rx) = mpsc::channel::<ClientMessage>(OUTBOUND_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<ChannelEvent>(INBOUND_CAPACITY);
        tokio::spawn(pump(sink, source, out_rx, in_tx));

        Ok(LiveChannel::new(out_tx, in_rx))
    }

    fn name(&self) -> &str {
        "gemini-live"
    }
}

fn parse_frame(msg: &Message) -> Option<Result<ServerMessage, serde_json::Error>> {
    match msg {
        Message::Text(text) => Some(serde_json::from_str(text.as_str())),
        Message::Binary(data) => Some(serde_json::from_slice(data)),
        _ => None,
    }
}

/// Moves messages between the socket and the session until either side ends.
async fn pump(
    mut sink: WsSink,
    mut source: WsSource,
    mut outbound: mpsc::Receiver<ClientMessage>,
    inbound: mpsc::Sender<ChannelEvent>,
) {
    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    // Session closed its side
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };

                let json = match serde_json::to_string(&message) {
                    Ok(j) => j,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };

                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    error!("Failed to send WebSocket message: {}", e);
                    let _ = inbound.send(ChannelEvent::Failed(e.to_string())).await;
                    break;
                }
            }

            frame = source.next() => {
                match frame {
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                            .unwrap_or_else(|| "closed by server".to_string());
                        info!("WebSocket closed by server: {}", reason);
                        let _ = inbound.send(ChannelEvent::Closed(reason)).await;
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(msg)) => match parse_frame(&msg) {
                        Some(Ok(server)) => {
                            if inbound.send(ChannelEvent::Message(server)).await.is_err() {
                                debug!("Session stopped listening");
                                break;
                            }
                        }
                        Some(Err(e)) => warn!("Failed to parse server message: {}", e),
                        None => {}
                    },
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        let _ = inbound.send(ChannelEvent::Failed(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = inbound.send(ChannelEvent::Closed("stream ended".to_string())).await;
                        break;
                    }
                }
            }
        }
    }

    info!("Live API connection task ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_required() {
        let result = GeminiTransport::new(GEMINI_LIVE_URL, "", Duration::from_secs(10));
        assert!(matches!(result, Err(LiveError::ConnectionFailed(_))));
    }

    #[test]
    fn test_build_ws_url() {
        let transport =
            GeminiTransport::new(GEMINI_LIVE_URL, "abc 123", Duration::from_secs(10)).unwrap();
        let url = transport.build_ws_url().unwrap();
        assert!(url.as_str().starts_with("wss://generativelanguage.googleapis.com/ws/"));
        assert_eq!(url.query(), Some("key=abc+123"));
    }
}
