//! System instruction rendering for the live lecture model.

use crate::lecture::Lecture;

/// Built-in system prompt. Hosts may replace it with their own template using
/// the same placeholders.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an engaging university lecturer presenting a slide deck to a single student.
Speak in {language}. Explain each slide in your own words instead of reading it out.
The deck has {slide_count} slides. Always call setActiveSlide before you start talking about a different slide.
Use provideCanvasMarkdown to show formulas, tables, code or diagrams that help your explanation.
If the student interrupts, answer their question and then continue where you left off.

# Background from the student
{general_info}

# Slides
{slides}";

/// Renders the prompt template against the lecture. The lecture's custom
/// instructions, when present, are appended under their own heading.
pub fn render_system_instruction(lecture: &Lecture, template: Option<&str>) -> String {
    let template = template.unwrap_or(DEFAULT_SYSTEM_PROMPT);
    let general_info = if lecture.general_info.trim().is_empty() {
        "(none provided)"
    } else {
        lecture.general_info.trim()
    };

    let mut prompt = template
        .replace("{language}", &lecture.config.language)
        .replace("{slide_count}", &lecture.slide_count().to_string())
        .replace("{general_info}", general_info)
        .replace("{slides}", &render_slide_list(lecture));

    if let Some(custom) = lecture
        .config
        .custom_instructions
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        prompt.push_str("\n\n# Additional instructions\n");
        prompt.push_str(custom);
    }
    prompt
}

fn render_slide_list(lecture: &Lecture) -> String {
    lecture
        .slides
        .iter()
        .enumerate()
        .map(|(index, slide)| {
            let marker = if slide.is_important { " (important)" } else { "" };
            format!("Slide {}{}: {}", index + 1, marker, slide.summary.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lecture::{LectureConfig, Slide};

    fn lecture() -> Lecture {
        Lecture {
            slides: vec![
                Slide {
                    page_number: 1,
                    image: None,
                    summary: "Title".to_string(),
                    is_important: false,
                    canvas_content: None,
                },
                Slide {
                    page_number: 2,
                    image: None,
                    summary: "Key theorem".to_string(),
                    is_important: true,
                    canvas_content: None,
                },
            ],
            general_info: String::new(),
            config: LectureConfig {
                language: "de-DE".to_string(),
                custom_instructions: Some("Be brief.".to_string()),
                ..LectureConfig::default()
            },
        }
    }

    #[test]
    fn test_default_template_is_filled() {
        let prompt = render_system_instruction(&lecture(), None);
        assert!(prompt.contains("Speak in de-DE."));
        assert!(prompt.contains("The deck has 2 slides."));
        assert!(prompt.contains("Slide 2 (important): Key theorem"));
        assert!(prompt.contains("(none provided)"));
        assert!(prompt.ends_with("# Additional instructions\nBe brief."));
    }

    #[test]
    fn test_custom_template() {
        let prompt = render_system_instruction(&lecture(), Some("{slide_count} in {language}"));
        assert!(prompt.starts_with("2 in de-DE"));
    }
}
