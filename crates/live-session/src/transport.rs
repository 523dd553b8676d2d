//! The seam between the engine and the live stream.

use crate::error::ConnectError;
use async_trait::async_trait;
use gemini_live::types::Setup;
use gemini_live::{ClientConfig, LiveLink};

/// Opens one live stream with the given setup.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, setup: Setup) -> Result<LiveLink, ConnectError>;
}

pub struct GeminiConnector {
    config: ClientConfig,
}

impl GeminiConnector {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for GeminiConnector {
    async fn connect(&self, setup: Setup) -> Result<LiveLink, ConnectError> {
        tracing::info!(endpoint = %self.config.endpoint(), model = %setup.model, "Opening live stream");
        gemini_live::connect(&self.config, setup)
            .await
            .map_err(|e| {
                if gemini_live::is_auth_error(&e) {
                    ConnectError::Unauthorized(format!("{e:#}"))
                } else {
                    ConnectError::Transport(format!("{e:#}"))
                }
            })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use gemini_live::types::{ClientMessage, ServerMessage, TransportEvent};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// The server side of one fake stream.
    pub struct FakeServer {
        pub setup: Setup,
        pub from_client: mpsc::Receiver<ClientMessage>,
        pub to_client: mpsc::Sender<TransportEvent>,
    }

    impl FakeServer {
        pub async fn send(&self, message: ServerMessage) {
            self.to_client
                .send(TransportEvent::Message(message))
                .await
                .expect("engine stopped listening");
        }

        pub async fn setup_complete(&self) {
            self.send(ServerMessage {
                setup_complete: Some(serde_json::json!({})),
                ..ServerMessage::default()
            })
            .await;
        }

        pub async fn close(&self, code: u16, was_clean: bool) {
            let _ = self
                .to_client
                .send(TransportEvent::Closed {
                    code,
                    reason: String::new(),
                    was_clean,
                })
                .await;
        }

        /// The next message that is not streamed microphone audio.
        pub async fn next_non_audio(&mut self) -> Option<ClientMessage> {
            loop {
                match self.from_client.recv().await? {
                    ClientMessage::RealtimeInput(input) if input.audio.is_some() => continue,
                    other => return Some(other),
                }
            }
        }
    }

    /// Hands each accepted connection to the test, or fails with a scripted
    /// error.
    pub struct FakeConnector {
        servers: mpsc::UnboundedSender<FakeServer>,
        failures: Mutex<VecDeque<ConnectError>>,
    }

    impl FakeConnector {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<FakeServer>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Self {
                    servers: tx,
                    failures: Mutex::new(VecDeque::new()),
                },
                rx,
            )
        }

        pub fn fail_next(&self, error: ConnectError) {
            self.failures.lock().unwrap().push_back(error);
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, setup: Setup) -> Result<LiveLink, ConnectError> {
            if let Some(error) = self.failures.lock().unwrap().pop_front() {
                return Err(error);
            }
            let (c_tx, c_rx) = mpsc::channel(256);
            let (s_tx, s_rx) = mpsc::channel(256);
            let _ = self.servers.send(FakeServer {
                setup,
                from_client: c_rx,
                to_client: s_tx,
            });
            Ok(LiveLink {
                outbound: c_tx,
                inbound: s_rx,
            })
        }
    }
}
