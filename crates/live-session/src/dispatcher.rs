//! Executes the model's function calls against the lecture host.
//!
//! Every call gets exactly one response with the call's id: either a result
//! string the model can relay, or an error string it can correct itself from.

use crate::error::HostError;
use lecture_core::tools::{
    self, CanvasBlock, PROVIDE_CANVAS_MARKDOWN, RENDER_CANVAS, SET_ACTIVE_SLIDE,
    SetActiveSlideArgs,
};
use lecture_core::{ToolCall, ToolResponse};
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// The UI side of a lecture, as seen by tool calls.
#[cfg_attr(test, mockall::automock)]
pub trait LectureHost: Send {
    /// Shows the slide at the 0-based `index`.
    fn set_current_slide(&mut self, index: usize) -> Result<(), HostError>;
    fn render_canvas(&mut self, blocks: Vec<CanvasBlock>) -> Result<(), HostError>;
}

/// What a successful call changed, for the engine to mirror.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEffect {
    SlideChanged(usize),
    CanvasRendered(Vec<CanvasBlock>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub response: ToolResponse,
    pub effect: Option<ToolEffect>,
}

pub struct ToolCallDispatcher {
    slide_count: usize,
    answered: HashSet<String>,
    cancelled: HashSet<String>,
}

impl ToolCallDispatcher {
    pub fn new(slide_count: usize) -> Self {
        Self {
            slide_count,
            answered: HashSet::new(),
            cancelled: HashSet::new(),
        }
    }

    /// Marks calls the server withdrew; they will not be executed or answered.
    pub fn cancel<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            let id = id.into();
            tracing::info!(%id, "Tool call cancelled by server");
            self.cancelled.insert(id);
        }
    }

    /// Runs one call. Returns `None` for a call that was cancelled or whose
    /// id was already answered.
    pub fn dispatch(&mut self, call: &ToolCall, host: &mut dyn LectureHost) -> Option<Dispatched> {
        if !call.id.is_empty() {
            if self.cancelled.contains(&call.id) {
                tracing::debug!(id = %call.id, name = %call.name, "Skipping cancelled tool call");
                return None;
            }
            if !self.answered.insert(call.id.clone()) {
                tracing::warn!(id = %call.id, name = %call.name, "Duplicate tool call id ignored");
                return None;
            }
        }

        tracing::info!(id = %call.id, name = %call.name, args = %call.args, "Executing tool call");
        let dispatched = match call.name.as_str() {
            SET_ACTIVE_SLIDE => self.set_active_slide(call, host),
            PROVIDE_CANVAS_MARKDOWN | RENDER_CANVAS => self.render_canvas(call, host),
            other => Dispatched {
                response: ToolResponse::error(call, format!("Unknown function: {other}")),
                effect: None,
            },
        };
        if dispatched.response.is_error() {
            tracing::warn!(id = %call.id, name = %call.name, response = %dispatched.response.response_value(), "Tool call failed");
        }
        Some(dispatched)
    }

    fn set_active_slide(&self, call: &ToolCall, host: &mut dyn LectureHost) -> Dispatched {
        let args: SetActiveSlideArgs = match serde_json::from_value(call.args.clone()) {
            Ok(args) => args,
            Err(e) => {
                return failed(
                    call,
                    format!(
                        "Invalid arguments for {SET_ACTIVE_SLIDE}: {e}. Expected {{\"slideNumber\": 1..={}}}.",
                        self.slide_count
                    ),
                );
            }
        };

        let number = args.slide_number;
        if number < 1 || number as u64 > self.slide_count as u64 {
            return failed(
                call,
                format!(
                    "Invalid slide number: {number}. There are only {} slides.",
                    self.slide_count
                ),
            );
        }

        let index = (number - 1) as usize;
        match guarded(|| host.set_current_slide(index)) {
            Ok(()) => Dispatched {
                response: ToolResponse::ok(call, format!("OK. Changed to slide {number}.")),
                effect: Some(ToolEffect::SlideChanged(index)),
            },
            Err(e) => failed(call, format!("Failed to change slide: {e}")),
        }
    }

    fn render_canvas(&self, call: &ToolCall, host: &mut dyn LectureHost) -> Dispatched {
        let Some(payload) = tools::canvas_payload(&call.args) else {
            return failed(
                call,
                "No canvas content provided. Pass markdown in the `content` argument.".to_string(),
            );
        };
        let Some(blocks) = tools::normalize_canvas_content(payload) else {
            return failed(call, "Canvas content is empty.".to_string());
        };

        let count = blocks.len();
        let rendered = blocks.clone();
        match guarded(move || host.render_canvas(blocks)) {
            Ok(()) => Dispatched {
                response: ToolResponse::ok(call, format!("OK. Canvas updated with {count} block(s).")),
                effect: Some(ToolEffect::CanvasRendered(rendered)),
            },
            Err(e) => failed(call, format!("Failed to render canvas: {e}")),
        }
    }
}

fn failed(call: &ToolCall, message: String) -> Dispatched {
    Dispatched {
        response: ToolResponse::error(call, message),
        effect: None,
    }
}

/// Runs a host callback, turning a panic into an ordinary failure.
fn guarded<F>(f: F) -> Result<(), HostError>
where
    F: FnOnce() -> Result<(), HostError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "host callback panicked".to_string());
            Err(HostError::Rejected(message))
        }
    }
}
