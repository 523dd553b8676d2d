//! Wire types of the Gemini Live bidirectional streaming protocol.
//!
//! Every client message is a JSON object with exactly one top-level key
//! (`setup`, `clientContent`, `realtimeInput`, `toolResponse`). Server
//! messages carry one or more optional top-level fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Outgoing messages ---

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    ClientContent(ClientContent),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window_compression: Option<ContextWindowCompression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_resumption: Option<SessionResumptionConfig>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Text,
    Audio,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Enables transcription; the server takes no options, so this is `{}`.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct AudioTranscriptionConfig {}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextWindowCompression {
    pub sliding_window: SlidingWindow,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct SlidingWindow {}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct SessionResumptionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts,
        }
    }

    /// A role-less content block, as used for the system instruction.
    pub fn instruction(text: impl Into<String>) -> Self {
        Self {
            role: None,
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn inline(blob: Blob) -> Self {
        Self {
            text: None,
            inline_data: Some(blob),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl RealtimeInput {
    pub fn audio(blob: Blob) -> Self {
        Self {
            audio: Some(blob),
            ..Self::default()
        }
    }

    /// Images travel on the video channel, one frame per message.
    pub fn image(blob: Blob) -> Self {
        Self {
            video: Some(blob),
            ..Self::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

// --- Incoming messages ---

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCallMessage>,
    #[serde(default)]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default)]
    pub session_resumption_update: Option<SessionResumptionUpdate>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
    #[serde(default)]
    pub interrupted: Option<bool>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMessage {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumptionUpdate {
    #[serde(default)]
    pub new_handle: Option<String>,
    #[serde(default)]
    pub resumable: Option<bool>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: Option<u64>,
    #[serde(default)]
    pub response_token_count: Option<u64>,
    #[serde(default)]
    pub total_token_count: Option<u64>,
}

/// What the transport hands to its consumer, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(ServerMessage),
    /// A socket or protocol error. A `Closed` event follows.
    Error(String),
    Closed {
        code: u16,
        reason: String,
        was_clean: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_setup_serialization() {
        let setup = ClientMessage::Setup(Setup {
            model: "models/test".to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec![ResponseModality::Audio],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: "Puck".to_string(),
                        },
                    },
                    language_code: Some("en-US".to_string()),
                }),
            },
            system_instruction: Some(Content::instruction("be nice")),
            tools: vec![],
            input_audio_transcription: Some(AudioTranscriptionConfig {}),
            output_audio_transcription: Some(AudioTranscriptionConfig {}),
            context_window_compression: Some(ContextWindowCompression::default()),
            session_resumption: Some(SessionResumptionConfig {
                handle: Some("h-1".to_string()),
            }),
        });

        let value = serde_json::to_value(&setup).unwrap();
        assert_eq!(
            value,
            json!({
                "setup": {
                    "model": "models/test",
                    "generationConfig": {
                        "responseModalities": ["AUDIO"],
                        "speechConfig": {
                            "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": "Puck" } },
                            "languageCode": "en-US"
                        }
                    },
                    "systemInstruction": { "parts": [{ "text": "be nice" }] },
                    "inputAudioTranscription": {},
                    "outputAudioTranscription": {},
                    "contextWindowCompression": { "slidingWindow": {} },
                    "sessionResumption": { "handle": "h-1" }
                }
            })
        );
    }

    #[test]
    fn test_realtime_audio_serialization() {
        let msg = ClientMessage::RealtimeInput(RealtimeInput::audio(Blob {
            mime_type: "audio/pcm;rate=16000".to_string(),
            data: "AAA=".to_string(),
        }));
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "realtimeInput": { "audio": { "mimeType": "audio/pcm;rate=16000", "data": "AAA=" } } })
        );
    }

    #[test]
    fn test_tool_response_serialization() {
        let msg = ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                id: "c1".to_string(),
                name: "setActiveSlide".to_string(),
                response: json!({ "result": "OK" }),
            }],
        });
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "toolResponse": { "functionResponses": [
                { "id": "c1", "name": "setActiveSlide", "response": { "result": "OK" } }
            ] } })
        );
    }

    #[test]
    fn test_server_content_deserialization() {
        let text = r#"{
            "serverContent": {
                "modelTurn": { "parts": [{ "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAAA" } }] },
                "outputTranscription": { "text": "Hello" },
                "interrupted": true
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(text).unwrap();
        let content = msg.server_content.unwrap();
        assert_eq!(content.interrupted, Some(true));
        assert_eq!(content.output_transcription.unwrap().text.as_deref(), Some("Hello"));
        let part = &content.model_turn.unwrap().parts[0];
        assert_eq!(part.inline_data.as_ref().unwrap().data, "AAAA");
    }

    #[test]
    fn test_tool_call_and_resumption_deserialization() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{ "toolCall": { "functionCalls": [{ "id": "x", "name": "setActiveSlide", "args": { "slideNumber": 2 } }] } }"#,
        )
        .unwrap();
        let call = &msg.tool_call.unwrap().function_calls[0];
        assert_eq!(call.args["slideNumber"], 2);

        let msg: ServerMessage = serde_json::from_str(
            r#"{ "sessionResumptionUpdate": { "newHandle": "abc", "resumable": true } }"#,
        )
        .unwrap();
        assert_eq!(
            msg.session_resumption_update.unwrap().new_handle.as_deref(),
            Some("abc")
        );

        let msg: ServerMessage = serde_json::from_str(r#"{ "setupComplete": {} }"#).unwrap();
        assert!(msg.setup_complete.is_some());
    }
}
