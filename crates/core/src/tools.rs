//! Model-Callable Tools
//!
//! Declarations of the functions the model may call during a lecture, the
//! argument types they are validated against, and the call/response records
//! exchanged with the model.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const SET_ACTIVE_SLIDE: &str = "setActiveSlide";
pub const PROVIDE_CANVAS_MARKDOWN: &str = "provideCanvasMarkdown";
/// Older name of `provideCanvasMarkdown`, still accepted from the model.
pub const RENDER_CANVAS: &str = "renderCanvas";

/// A function invocation issued by the model.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Result(String),
    Error(String),
}

/// The single reply owed for every `ToolCall`, matched by id.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub id: String,
    pub name: String,
    pub outcome: ToolOutcome,
}

impl ToolResponse {
    pub fn ok(call: &ToolCall, result: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            outcome: ToolOutcome::Result(result.into()),
        }
    }

    pub fn error(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            outcome: ToolOutcome::Error(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error(_))
    }

    /// The `response` object sent back to the model: `{result}` or `{error}`.
    pub fn response_value(&self) -> Value {
        match &self.outcome {
            ToolOutcome::Result(result) => json!({ "result": result }),
            ToolOutcome::Error(error) => json!({ "error": error }),
        }
    }
}

/// Arguments of `setActiveSlide`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetActiveSlideArgs {
    /// 1-based slide number.
    pub slide_number: i64,
}

/// A function the model is told it can call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDeclaration {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// The tool set offered to the model at session setup.
pub fn declarations() -> Vec<ToolDeclaration> {
    vec![
        ToolDeclaration {
            name: SET_ACTIVE_SLIDE,
            description: "Changes the slide shown to the user. Call this before talking about a different slide.",
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "slideNumber": {
                        "type": "INTEGER",
                        "description": "The 1-based number of the slide to show."
                    }
                },
                "required": ["slideNumber"]
            }),
        },
        ToolDeclaration {
            name: PROVIDE_CANVAS_MARKDOWN,
            description: "Shows supplementary content on the canvas next to the slide: markdown, math, tables or mermaid diagrams.",
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "content": {
                        "type": "STRING",
                        "description": "Markdown to render on the canvas."
                    }
                },
                "required": ["content"]
            }),
        },
    ]
}

/// One renderable unit on the canvas.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CanvasBlock {
    pub markdown: String,
}

impl CanvasBlock {
    pub fn new(markdown: impl Into<String>) -> Self {
        Self {
            markdown: markdown.into(),
        }
    }
}

/// Pulls the canvas payload out of the call arguments. The model has been
/// seen to use `content`, `markdown` and `contentBlocks` interchangeably, and
/// to send the payload bare instead of wrapped in an object.
pub fn canvas_payload(args: &Value) -> Option<&Value> {
    match args {
        Value::Object(map) => ["content", "markdown", "contentBlocks", "blocks"]
            .iter()
            .find_map(|key| map.get(*key))
            .filter(|v| !v.is_null()),
        Value::Null => None,
        other => Some(other),
    }
}

/// Normalizes whatever the model sent into canvas blocks: a string or object
/// becomes one block, an array becomes one block per element. Returns `None`
/// only when there is nothing that could be rendered at all.
pub fn normalize_canvas_content(payload: &Value) -> Option<Vec<CanvasBlock>> {
    let blocks: Vec<CanvasBlock> = match payload {
        Value::Array(items) => items.iter().filter_map(block_from_value).collect(),
        other => block_from_value(other).into_iter().collect(),
    };
    if blocks.is_empty() { None } else { Some(blocks) }
}

fn block_from_value(value: &Value) -> Option<CanvasBlock> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(CanvasBlock::new(s.clone())),
        Value::Object(map) => {
            let text = ["markdown", "content", "text"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str));
            match text {
                Some(text) if !text.trim().is_empty() => Some(CanvasBlock::new(text)),
                _ => {
                    let pretty = serde_json::to_string_pretty(value).ok()?;
                    Some(CanvasBlock::new(format!("```json\n{}\n```", pretty)))
                }
            }
        }
        Value::Array(_) => {
            let pretty = serde_json::to_string_pretty(value).ok()?;
            Some(CanvasBlock::new(format!("```json\n{}\n```", pretty)))
        }
        other => Some(CanvasBlock::new(other.to_string())),
    }
}
