//! Lecture Data Model
//!
//! The host owns the lecture: its slides, free-text background and the
//! per-lecture settings. The live engine only reads these values and reports
//! changes (current slide, transcript) back through events.

use crate::transcript::TranscriptEntry;
use serde::{Deserialize, Serialize};

/// A rasterized slide image, base64 encoded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlideImage {
    pub mime_type: String,
    pub data: String,
}

/// One page of the uploaded deck.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Slide {
    /// 1-based page number inside the source document.
    pub page_number: u32,
    #[serde(default)]
    pub image: Option<SlideImage>,
    /// Textual summary of what the slide shows.
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub is_important: bool,
    /// Markdown the model previously placed on the canvas for this slide.
    #[serde(default)]
    pub canvas_content: Option<String>,
}

/// Per-lecture settings chosen by the user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LectureConfig {
    /// BCP-47 language code the lecture is delivered in, e.g. `en-US`.
    pub language: String,
    pub voice: String,
    pub model: String,
    #[serde(default)]
    pub custom_instructions: Option<String>,
}

impl Default for LectureConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            voice: "Puck".to_string(),
            model: "models/gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            custom_instructions: None,
        }
    }
}

/// Everything the engine needs to deliver one lecture.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lecture {
    pub slides: Vec<Slide>,
    /// Free-text background the user supplied about the deck or audience.
    #[serde(default)]
    pub general_info: String,
    #[serde(default)]
    pub config: LectureConfig,
}

impl Lecture {
    pub fn slide_count(&self) -> usize {
        self.slides.len()
    }

    /// Looks up a slide by its 0-based index.
    pub fn slide(&self, index: usize) -> Option<&Slide> {
        self.slides.get(index)
    }
}

/// The state handed to the persistence collaborator.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub slides: Vec<Slide>,
    pub transcript: Vec<TranscriptEntry>,
    pub current_slide_index: usize,
}
