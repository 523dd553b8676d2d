use lecture_core::CanvasBlock;
use lecture_live::{HostError, LectureHost};
use std::sync::{Arc, Mutex};

/// What the terminal currently shows.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Stage {
    pub current_slide: usize,
    pub canvas: Vec<CanvasBlock>,
}

/// Lecture host backed by the terminal. The binary reads the same `Stage`
/// to answer `/canvas` and to label typed messages.
#[derive(Clone)]
pub struct ConsoleHost {
    slide_count: usize,
    stage: Arc<Mutex<Stage>>,
}

impl ConsoleHost {
    pub fn new(slide_count: usize, current_slide: usize) -> Self {
        Self {
            slide_count,
            stage: Arc::new(Mutex::new(Stage {
                current_slide,
                canvas: Vec::new(),
            })),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
            .lock()
            .map(|stage| stage.clone())
            .unwrap_or_default()
    }

    /// The canvas as one markdown document, for `send_text`'s canvas context.
    pub fn canvas_markdown(&self) -> Option<String> {
        let stage = self.stage();
        if stage.canvas.is_empty() {
            return None;
        }
        Some(
            stage
                .canvas
                .iter()
                .map(|block| block.markdown.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    }

    fn with_stage<T>(&self, f: impl FnOnce(&mut Stage) -> T) -> Result<T, HostError> {
        let mut stage = self
            .stage
            .lock()
            .map_err(|_| HostError::Rejected("host state poisoned".to_string()))?;
        Ok(f(&mut stage))
    }
}

impl LectureHost for ConsoleHost {
    fn set_current_slide(&mut self, index: usize) -> Result<(), HostError> {
        if index >= self.slide_count {
            return Err(HostError::Rejected(format!(
                "slide {} does not exist",
                index + 1
            )));
        }
        self.with_stage(|stage| stage.current_slide = index)?;
        tracing::debug!(index, "Host moved to slide");
        Ok(())
    }

    fn render_canvas(&mut self, blocks: Vec<CanvasBlock>) -> Result<(), HostError> {
        let count = blocks.len();
        self.with_stage(|stage| stage.canvas = blocks)?;
        tracing::debug!(blocks = count, "Host rendered canvas");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slide_changes_are_shared() {
        let host = ConsoleHost::new(3, 0);
        let mut engine_side = host.clone();

        engine_side.set_current_slide(2).unwrap();
        assert_eq!(host.stage().current_slide, 2);

        let err = engine_side.set_current_slide(3).unwrap_err();
        assert_eq!(err, HostError::Rejected("slide 4 does not exist".to_string()));
        assert_eq!(host.stage().current_slide, 2);
    }

    #[test]
    fn test_canvas_markdown_joins_blocks() {
        let host = ConsoleHost::new(1, 0);
        assert_eq!(host.canvas_markdown(), None);

        let mut engine_side = host.clone();
        engine_side
            .render_canvas(vec![CanvasBlock::new("# Heat"), CanvasBlock::new("Q = mcΔT")])
            .unwrap();
        assert_eq!(host.canvas_markdown().as_deref(), Some("# Heat\n\nQ = mcΔT"));
    }
}
