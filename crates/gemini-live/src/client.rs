use crate::types::{ClientMessage, ServerMessage, Setup, TransportEvent};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::protocol::Message};

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Close code reported when the socket goes away without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    endpoint: String,
    api_key: String,
    capacity: usize,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            capacity: 256,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }
}

/// One open stream. Dropping `outbound` closes the socket; dropping
/// `inbound` stops the reader.
pub struct LiveLink {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens a stream and sends the setup message. The server answers with
/// `setupComplete` on `inbound` once the session is usable.
pub async fn connect(config: &ClientConfig, setup: Setup) -> Result<LiveLink> {
    let (ws_stream, _) = connect_async(config.url())
        .await
        .context("Failed to connect to Gemini Live WebSocket")?;
    tracing::info!(endpoint = %config.endpoint, "Connected to Gemini Live WebSocket.");

    let (mut write, mut read) = ws_stream.split();

    let setup_payload = serde_json::to_string(&ClientMessage::Setup(setup))?;
    write
        .send(Message::Text(setup_payload.into()))
        .await
        .context("Failed to send setup message")?;

    let (c_tx, mut c_rx) = mpsc::channel::<ClientMessage>(config.capacity);
    let (s_tx, s_rx) = mpsc::channel::<TransportEvent>(config.capacity);

    // Writer: drains outbound messages in order until every sender is gone.
    tokio::spawn(async move {
        while let Some(message) = c_rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(text) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        tracing::error!("failed to send message: {}", e);
                        break;
                    }
                }
                Err(e) => tracing::error!("failed to serialize message: {}", e),
            }
        }
        if let Err(e) = write.close().await {
            tracing::debug!("close after writer shutdown failed: {}", e);
        }
    });

    // Reader: forwards server events until the socket closes or nobody listens.
    tokio::spawn(async move {
        let closed = loop {
            let Some(message) = read.next().await else {
                break TransportEvent::Closed {
                    code: ABNORMAL_CLOSURE,
                    reason: "stream ended".to_string(),
                    was_clean: false,
                };
            };
            let event = match message {
                Ok(Message::Text(text)) => parse_server_message(&text),
                // The server frames JSON as binary messages too.
                Ok(Message::Binary(bin)) => match std::str::from_utf8(&bin) {
                    Ok(text) => parse_server_message(text),
                    Err(_) => {
                        tracing::warn!(len = bin.len(), "unexpected non-UTF-8 binary message");
                        None
                    }
                },
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "Gemini Live WebSocket closed by server.");
                    break match frame {
                        Some(frame) => TransportEvent::Closed {
                            code: u16::from(frame.code),
                            reason: frame.reason.as_str().to_string(),
                            was_clean: true,
                        },
                        None => TransportEvent::Closed {
                            code: 1005,
                            reason: String::new(),
                            was_clean: true,
                        },
                    };
                }
                Ok(_) => None,
                Err(e) => {
                    tracing::error!("Error reading from Gemini Live WebSocket: {}", e);
                    if s_tx.send(TransportEvent::Error(e.to_string())).await.is_err() {
                        return;
                    }
                    break TransportEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: e.to_string(),
                        was_clean: false,
                    };
                }
            };
            if let Some(event) = event {
                if s_tx.send(event).await.is_err() {
                    tracing::debug!("inbound receiver dropped, stopping reader");
                    return;
                }
            }
        };
        let _ = s_tx.send(closed).await;
    });

    Ok(LiveLink {
        outbound: c_tx,
        inbound: s_rx,
    })
}

fn parse_server_message(text: &str) -> Option<TransportEvent> {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => Some(TransportEvent::Message(message)),
        Err(e) => {
            tracing::error!("failed to deserialize server message: {}, text=> {:?}", e, text);
            None
        }
    }
}

/// True when the connection attempt was refused for bad credentials, which
/// retrying cannot fix.
pub fn is_auth_error(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<tungstenite::Error>() {
        Some(tungstenite::Error::Http(response)) => {
            matches!(response.status().as_u16(), 401 | 403)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_carries_key() {
        let config = ClientConfig::new("secret").with_endpoint("wss://localhost/live");
        assert_eq!(config.url(), "wss://localhost/live?key=secret");
        assert_eq!(config.endpoint(), "wss://localhost/live");
    }

    #[test]
    fn test_parse_server_message() {
        assert!(matches!(
            parse_server_message(r#"{ "setupComplete": {} }"#),
            Some(TransportEvent::Message(_))
        ));
        assert!(parse_server_message("not json").is_none());
    }

    #[test]
    fn test_is_auth_error_ignores_other_errors() {
        let err = anyhow::anyhow!("something else");
        assert!(!is_auth_error(&err));
    }
}
