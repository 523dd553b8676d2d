//! Typed commands and printed events for the terminal front end.

use lecture_core::Speaker;
use lecture_live::SessionEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Mute,
    Unmute,
    /// Silence the lecturer without ending the turn on the server.
    Stop,
    /// 1-based, as shown to the user.
    Slide(usize),
    Reconnect,
    Canvas,
    Help,
    Quit,
    Say(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Unknown command: /{0}. Type /help for the list.")]
    Unknown(String),
    #[error("Usage: /slide <number>")]
    SlideUsage,
}

pub const HELP: &str = "\
Commands:
  /mute, /unmute     toggle the microphone
  /stop              silence the lecturer
  /slide <n>         jump to slide n
  /reconnect         reopen the live stream
  /canvas            show the canvas
  /quit              end the lecture
Anything else is sent to the lecturer as a question.";

/// Parses one line of input. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(ConsoleCommand::Say(line.to_string())));
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default().to_lowercase();
    let command = match name.as_str() {
        "mute" => ConsoleCommand::Mute,
        "unmute" => ConsoleCommand::Unmute,
        "stop" => ConsoleCommand::Stop,
        "reconnect" => ConsoleCommand::Reconnect,
        "canvas" => ConsoleCommand::Canvas,
        "help" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        "slide" => {
            let number = words
                .next()
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .ok_or(ParseError::SlideUsage)?;
            ConsoleCommand::Slide(number)
        }
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// A line to print for an event. Snapshots are handled by the caller.
pub fn render_event(event: &SessionEvent, slide_count: usize) -> Option<String> {
    match event {
        SessionEvent::StateChanged(state) => Some(format!("[{state}]")),
        SessionEvent::Transcript { entry, .. } => {
            let who = match entry.speaker {
                Speaker::Ai => "lecturer",
                Speaker::User => "you",
            };
            Some(format!("{who}: {}", entry.text))
        }
        SessionEvent::SlideChanged(index) => {
            Some(format!("-- slide {} of {} --", index + 1, slide_count))
        }
        SessionEvent::Canvas(blocks) => Some(format!(
            "-- canvas updated ({} block{}) --",
            blocks.len(),
            if blocks.len() == 1 { "" } else { "s" }
        )),
        SessionEvent::Notice(message) => Some(format!("! {message}")),
        SessionEvent::Snapshot(_) => None,
    }
}
