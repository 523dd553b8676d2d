//! Builders for the messages the engine sends to the model.

use gemini_live::types::{
    AudioTranscriptionConfig, Blob, ClientContent, ClientMessage, Content,
    ContextWindowCompression, FunctionDeclaration, FunctionResponse, GenerationConfig, Part,
    PrebuiltVoiceConfig, RealtimeInput, ResponseModality, SessionResumptionConfig, Setup,
    SpeechConfig, Tool, ToolResponse as WireToolResponse, VoiceConfig,
};
use lecture_core::tools;
use lecture_core::{Attachment, Lecture, ToolResponse, TranscriptEntry};
use std::fmt::Write;

/// Structured turns larger than this are sent piecewise instead.
pub const MAX_CLIENT_CONTENT_BYTES: usize = 8 * 1024 * 1024;

pub fn setup(lecture: &Lecture, system_instruction: String, handle: Option<String>) -> Setup {
    let config = &lecture.config;
    Setup {
        model: config.model.clone(),
        generation_config: GenerationConfig {
            response_modalities: vec![ResponseModality::Audio],
            speech_config: Some(SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: config.voice.clone(),
                    },
                },
                language_code: Some(config.language.clone()),
            }),
        },
        system_instruction: Some(Content::instruction(system_instruction)),
        tools: vec![Tool {
            function_declarations: tools::declarations()
                .into_iter()
                .map(|d| FunctionDeclaration {
                    name: d.name.to_string(),
                    description: d.description.to_string(),
                    parameters: d.parameters,
                })
                .collect(),
        }],
        input_audio_transcription: Some(AudioTranscriptionConfig::default()),
        output_audio_transcription: Some(AudioTranscriptionConfig::default()),
        context_window_compression: Some(ContextWindowCompression::default()),
        session_resumption: Some(SessionResumptionConfig { handle }),
    }
}

/// The first turn of a brand new lecture.
pub fn initial_turn(lecture: &Lecture, current: usize) -> ClientContent {
    let mut text = format!(
        "The lecture is starting. We are on slide {} of {}.",
        current + 1,
        lecture.slide_count()
    );
    push_slide_summary(&mut text, lecture, current);
    text.push_str("\nGreet the student briefly, then present this slide.");
    user_turn_with_slide(text, lecture, current)
}

/// The first turn after reconnecting. With a resumption handle the model
/// still has the conversation, so only the position is restated; without
/// one, the slide and the tail of the transcript are resent.
pub fn resumption_turn(
    lecture: &Lecture,
    current: usize,
    recent: Option<&[TranscriptEntry]>,
) -> ClientContent {
    let mut text = format!(
        "The connection was re-established. We are on slide {} of {}.",
        current + 1,
        lecture.slide_count()
    );
    let Some(recent) = recent else {
        text.push_str(" Continue the lecture from where you left off.");
        return single_text_turn(text);
    };

    push_slide_summary(&mut text, lecture, current);
    if !recent.is_empty() {
        text.push_str("\n\nThe conversation so far ended with:");
        for entry in recent {
            let _ = write!(text, "\n{}: {}", entry.speaker, entry.text);
        }
    }
    text.push_str("\n\nContinue the lecture from where it left off.");
    user_turn_with_slide(text, lecture, current)
}

/// The student moved to another slide themselves.
pub fn navigation_turn(lecture: &Lecture, index: usize) -> ClientContent {
    let mut text = format!(
        "The student navigated to slide {} of {}.",
        index + 1,
        lecture.slide_count()
    );
    push_slide_summary(&mut text, lecture, index);
    text.push_str("\nContinue the lecture from this slide.");
    user_turn_with_slide(text, lecture, index)
}

/// A typed message with its attachments and, if the canvas is showing
/// something, its content for reference.
pub fn user_turn(text: &str, attachments: &[Attachment], canvas_context: Option<&str>) -> ClientContent {
    let mut message = text.to_string();
    if let Some(canvas) = canvas_context.filter(|c| !c.trim().is_empty()) {
        let _ = write!(message, "\n\n[The canvas currently shows]\n{canvas}");
    }
    let mut parts = vec![Part::text(message)];
    parts.extend(attachments.iter().map(|a| {
        Part::inline(Blob {
            mime_type: a.mime_type.clone(),
            data: a.data.clone(),
        })
    }));
    ClientContent {
        turns: vec![Content::user(parts)],
        turn_complete: true,
    }
}

/// Hands a failed canvas render back to the model so it can reissue it.
pub fn render_repair_turn(payload: &str, error: &str) -> ClientContent {
    single_text_turn(format!(
        "The canvas content you provided failed to render.\n\nError: {error}\n\nContent:\n{payload}\n\nCall {} again with corrected content.",
        tools::PROVIDE_CANVAS_MARKDOWN
    ))
}

pub fn tool_response(response: &ToolResponse) -> ClientMessage {
    ClientMessage::ToolResponse(WireToolResponse {
        function_responses: vec![FunctionResponse {
            id: response.id.clone(),
            name: response.name.clone(),
            response: response.response_value(),
        }],
    })
}

pub fn audio_frame(blob: Blob) -> ClientMessage {
    ClientMessage::RealtimeInput(RealtimeInput::audio(blob))
}

/// Serialized size of a message, or `None` if it does not serialize.
pub fn encoded_len(message: &ClientMessage) -> Option<usize> {
    serde_json::to_string(message).ok().map(|s| s.len())
}

/// The piecewise form of a structured turn: every text part, then every
/// inline blob, as realtime input, followed by an empty turn that marks the
/// end of the user's turn.
pub fn fallback_inputs(content: &ClientContent) -> Vec<ClientMessage> {
    let parts = content.turns.iter().flat_map(|turn| turn.parts.iter());
    let texts = parts
        .clone()
        .filter_map(|p| p.text.as_ref())
        .map(|t| ClientMessage::RealtimeInput(RealtimeInput::text(t.clone())));
    let blobs = parts.filter_map(|p| p.inline_data.clone()).map(|blob| {
        if blob.mime_type.starts_with("audio/") {
            ClientMessage::RealtimeInput(RealtimeInput::audio(blob))
        } else {
            ClientMessage::RealtimeInput(RealtimeInput::image(blob))
        }
    });
    texts
        .chain(blobs)
        .chain(std::iter::once(ClientMessage::ClientContent(ClientContent {
            turns: Vec::new(),
            turn_complete: content.turn_complete,
        })))
        .collect()
}

fn push_slide_summary(text: &mut String, lecture: &Lecture, index: usize) {
    if let Some(slide) = lecture.slide(index).filter(|s| !s.summary.trim().is_empty()) {
        let _ = write!(text, "\nSlide summary: {}", slide.summary.trim());
    }
}

fn user_turn_with_slide(text: String, lecture: &Lecture, index: usize) -> ClientContent {
    let mut parts = vec![Part::text(text)];
    if let Some(image) = lecture.slide(index).and_then(|s| s.image.as_ref()) {
        parts.push(Part::inline(Blob {
            mime_type: image.mime_type.clone(),
            data: image.data.clone(),
        }));
    }
    ClientContent {
        turns: vec![Content::user(parts)],
        turn_complete: true,
    }
}

fn single_text_turn(text: String) -> ClientContent {
    ClientContent {
        turns: vec![Content::user(vec![Part::text(text)])],
        turn_complete: true,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use lecture_core::{Lecture, LectureConfig, Slide, SlideImage};

    pub fn lecture(slides: usize) -> Lecture {
        Lecture {
            slides: (1..=slides as u32)
                .map(|n| Slide {
                    page_number: n,
                    image: Some(SlideImage {
                        mime_type: "image/png".to_string(),
                        data: format!("c2xpZGU{n}"),
                    }),
                    summary: format!("Summary of slide {n}"),
                    is_important: n == 1,
                    canvas_content: None,
                })
                .collect(),
            general_info: "Thermodynamics 101".to_string(),
            config: LectureConfig::default(),
        }
    }
}
