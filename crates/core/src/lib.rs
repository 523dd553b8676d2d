//! Lecture Core
//!
//! Provider-independent building blocks of a live lecture: the lecture data
//! model, transcript aggregation, the tools offered to the model and the
//! system instruction it is given.

pub mod lecture;
pub mod prompt;
pub mod tools;
pub mod transcript;

pub use lecture::{Lecture, LectureConfig, SessionSnapshot, Slide, SlideImage};
pub use tools::{CanvasBlock, ToolCall, ToolOutcome, ToolResponse};
pub use transcript::{Attachment, Speaker, TranscriptAggregator, TranscriptEntry, TranscriptUpdate};
