//! The public handle of a live lecture session.
//!
//! `LiveSession::spawn` moves the engine onto its own task. The handle only
//! sends commands; everything the engine observes comes back as
//! `SessionEvent`s and through the state watch.

use crate::capture::Microphone;
use crate::dispatcher::LectureHost;
use crate::engine::Engine;
use crate::error::SessionError;
use crate::messages::MAX_CLIENT_CONTENT_BYTES;
use crate::pending::NavigationReply;
use crate::playback::AudioOutputFactory;
use crate::resumption::ResumptionStore;
use crate::state::SessionState;
use crate::transport::Connector;
use crate::audio::CAPTURE_FRAME_SIZE;
use lecture_core::{
    Attachment, CanvasBlock, Lecture, LectureConfig, SessionSnapshot, TranscriptEntry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Exponential backoff for automatic reconnects after a dropped stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay: Duration::from_millis(800),
            max_delay: Duration::from_secs(30),
            max_attempts: 12,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before the 1-based `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Scopes the stored resumption handle; `None` shares the default slot.
    pub session_id: Option<String>,
    pub frame_size: usize,
    pub start_muted: bool,
    pub snapshot_debounce: Duration,
    pub reconnect: ReconnectPolicy,
    /// Replaces the built-in system prompt template.
    pub prompt_template: Option<String>,
    /// Transcript lines replayed when reconnecting without a handle.
    pub context_lines: usize,
    pub max_client_content_bytes: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            frame_size: CAPTURE_FRAME_SIZE,
            start_muted: false,
            snapshot_debounce: Duration::from_secs(1),
            reconnect: ReconnectPolicy::disabled(),
            prompt_template: None,
            context_lines: 10,
            max_client_content_bytes: MAX_CLIENT_CONTENT_BYTES,
        }
    }
}

/// Where a session picks up: the lecture plus any restored progress.
#[derive(Debug, Clone)]
pub struct SessionSeed {
    pub lecture: Lecture,
    pub transcript: Vec<TranscriptEntry>,
    pub current_slide_index: usize,
}

impl From<Lecture> for SessionSeed {
    fn from(lecture: Lecture) -> Self {
        Self {
            lecture,
            transcript: Vec::new(),
            current_slide_index: 0,
        }
    }
}

/// The engine's outside world.
pub struct Collaborators {
    pub connector: Arc<dyn Connector>,
    pub microphone: Arc<dyn Microphone>,
    pub output: Arc<dyn AudioOutputFactory>,
    pub resumption: ResumptionStore,
    pub host: Box<dyn LectureHost>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// Entry `index` was appended or rewritten.
    Transcript {
        index: usize,
        entry: TranscriptEntry,
    },
    SlideChanged(usize),
    Canvas(Vec<CanvasBlock>),
    /// A user-facing message, e.g. why the session stopped.
    Notice(String),
    Snapshot(SessionSnapshot),
}

pub(crate) enum Command {
    Start {
        config: Option<LectureConfig>,
    },
    End,
    Reconnect,
    SetMuted(bool),
    SendText {
        text: String,
        attachments: Vec<Attachment>,
        canvas_context: Option<String>,
    },
    Navigate {
        index: usize,
        reply: NavigationReply,
    },
    StopSpeaking,
    ReportRenderError {
        payload: String,
        error: String,
    },
}

#[derive(Clone)]
pub struct LiveSession {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
}

impl LiveSession {
    /// Starts the engine task. It runs until every handle is dropped.
    pub fn spawn(
        seed: impl Into<SessionSeed>,
        options: SessionOptions,
        collaborators: Collaborators,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (engine, internal_rx) = Engine::new(seed.into(), options, collaborators, events_tx);
        let state = engine.subscribe_state();
        tokio::spawn(engine.run(commands_rx, internal_rx));
        (
            Self {
                commands: commands_tx,
                state,
            },
            events_rx,
        )
    }

    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::EngineStopped)
    }

    /// Opens a new stream, tearing down any existing one first.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.send(Command::Start { config: None }).await
    }

    pub async fn start_with(&self, config: LectureConfig) -> Result<(), SessionError> {
        self.send(Command::Start {
            config: Some(config),
        })
        .await
    }

    pub async fn end(&self) -> Result<(), SessionError> {
        self.send(Command::End).await
    }

    pub async fn reconnect(&self) -> Result<(), SessionError> {
        self.send(Command::Reconnect).await
    }

    pub async fn set_muted(&self, muted: bool) -> Result<(), SessionError> {
        self.send(Command::SetMuted(muted)).await
    }

    pub async fn send_text(
        &self,
        text: impl Into<String>,
        attachments: Vec<Attachment>,
        canvas_context: Option<String>,
    ) -> Result<(), SessionError> {
        self.send(Command::SendText {
            text: text.into(),
            attachments,
            canvas_context,
        })
        .await
    }

    /// Moves to the slide at the 0-based `index` and tells the model.
    /// Resolves once the model reacts, or fails if the connection goes away
    /// first.
    pub async fn navigate_to_slide(&self, index: usize) -> Result<usize, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Navigate { index, reply }).await?;
        rx.await.map_err(|_| SessionError::EngineStopped)?
    }

    /// Silences the model locally.
    pub async fn stop_speaking(&self) -> Result<(), SessionError> {
        self.send(Command::StopSpeaking).await
    }

    /// Feeds a canvas payload that failed to render back to the model.
    pub async fn report_render_error(
        &self,
        payload: impl Into<String>,
        error: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.send(Command::ReportRenderError {
            payload: payload.into(),
            error: error.into(),
        })
        .await
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(800));
        assert_eq!(policy.delay(2), Duration::from_millis(1600));
        assert_eq!(policy.delay(4), Duration::from_millis(6400));
        assert_eq!(policy.delay(7), Duration::from_secs(30));
        assert_eq!(policy.delay(12), Duration::from_secs(30));
    }

    #[test]
    fn test_default_options() {
        let options = SessionOptions::default();
        assert_eq!(options.frame_size, 4096);
        assert!(!options.reconnect.enabled);
        assert_eq!(options.snapshot_debounce, Duration::from_secs(1));
    }
}
