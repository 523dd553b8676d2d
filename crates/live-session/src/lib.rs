//! Lecture Live
//!
//! The session engine behind a spoken lecture: it holds one live stream to
//! the model, streams the microphone up, schedules the model's audio for
//! gapless playback, executes the model's tool calls against the lecture
//! host and keeps the transcript and resumption handle current.

pub mod audio;
pub mod capture;
pub mod dispatcher;
mod engine;
pub mod error;
pub mod messages;
pub mod pending;
pub mod playback;
pub mod resumption;
pub mod session;
pub mod state;
pub mod transport;

pub use capture::{AudioCaptureEncoder, CaptureHandle, MicStream, Microphone};
pub use dispatcher::{LectureHost, ToolCallDispatcher, ToolEffect};
pub use error::{
    CaptureError, ConnectError, HostError, PlaybackError, SessionError, StoreError,
    TransitionError,
};
pub use playback::{AudioOutput, AudioOutputFactory, PlaybackScheduler};
pub use resumption::{Clock, FileStore, KeyValueStore, MemoryStore, ResumptionStore, SystemClock};
pub use session::{
    Collaborators, LiveSession, ReconnectPolicy, SessionEvent, SessionOptions, SessionSeed,
};
pub use state::{SessionState, SessionStateMachine};
pub use transport::{Connector, GeminiConnector};
