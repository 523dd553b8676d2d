//! Transcript Aggregation
//!
//! Speech transcriptions arrive as a stream of fragments whose framing is not
//! fully specified: some transports send cumulative snapshots of the current
//! utterance, others send pure increments, and re-deliveries happen. The
//! aggregator folds those fragments into stable transcript entries.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Ai,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Ai => write!(f, "ai"),
        }
    }
}

/// An image or document the user attached to a typed message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub name: Option<String>,
    pub mime_type: String,
    /// Base64 encoded payload.
    pub data: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl TranscriptEntry {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            slide_number: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_slide_number(mut self, slide_number: Option<u32>) -> Self {
        self.slide_number = slide_number;
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// What a single fragment did to the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptUpdate {
    /// A new entry was pushed at this index.
    Appended(usize),
    /// The entry at this index was replaced or extended.
    Updated(usize),
    /// The fragment was empty, a re-delivery, or already covered.
    Unchanged,
}

impl TranscriptUpdate {
    pub fn changed(&self) -> bool {
        !matches!(self, TranscriptUpdate::Unchanged)
    }
}

#[derive(Debug, Default, Clone)]
pub struct TranscriptAggregator {
    entries: Vec<TranscriptEntry>,
    /// Speakers whose last entry may still be merged into.
    open_turns: HashSet<Speaker>,
    /// 1-based slide number stamped on new entries.
    current_slide: Option<u32>,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the aggregator with a transcript restored by the host. All
    /// restored entries are closed.
    pub fn with_entries(entries: Vec<TranscriptEntry>) -> Self {
        Self {
            entries,
            ..Self::default()
        }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_current_slide(&mut self, slide_number: Option<u32>) {
        self.current_slide = slide_number;
    }

    #[cfg(test)]
    pub fn is_turn_open(&self, speaker: Speaker) -> bool {
        self.open_turns.contains(&speaker)
    }

    /// Folds one transcription fragment into the transcript.
    ///
    /// A continuation only merges into the last entry when that entry belongs
    /// to the same speaker and the speaker's turn is still open. Merge rules,
    /// in order: a fragment already at the tail is a re-delivery; a fragment
    /// extending the entry replaces it; a fragment the entry already contains
    /// is stale; anything else is an increment and is appended.
    pub fn append_delta(
        &mut self,
        speaker: Speaker,
        delta: &str,
        is_streaming_update: bool,
    ) -> TranscriptUpdate {
        if delta.trim().is_empty() {
            return TranscriptUpdate::Unchanged;
        }

        if is_streaming_update && self.open_turns.contains(&speaker) {
            let last_index = self.entries.len().saturating_sub(1);
            if let Some(last) = self.entries.last_mut().filter(|e| e.speaker == speaker) {
                if last.text.ends_with(delta) {
                    return TranscriptUpdate::Unchanged;
                }
                if delta.starts_with(last.text.as_str()) {
                    last.text = delta.to_string();
                    return TranscriptUpdate::Updated(last_index);
                }
                if last.text.contains(delta) {
                    return TranscriptUpdate::Unchanged;
                }
                last.text.push_str(delta);
                return TranscriptUpdate::Updated(last_index);
            }
        }

        self.entries.push(
            TranscriptEntry::new(speaker, delta).with_slide_number(self.current_slide),
        );
        if is_streaming_update {
            self.open_turns.insert(speaker);
        } else {
            self.open_turns.remove(&speaker);
        }
        TranscriptUpdate::Appended(self.entries.len() - 1)
    }

    /// Inserts a complete entry ahead of server confirmation, e.g. text the
    /// user typed. The entry keeps its own slide number and attachments, and
    /// closes the speaker's open turn.
    pub fn insert_local(&mut self, entry: TranscriptEntry) -> TranscriptUpdate {
        if entry.text.trim().is_empty() && entry.attachments.is_empty() {
            return TranscriptUpdate::Unchanged;
        }
        self.open_turns.remove(&entry.speaker);
        self.entries.push(entry);
        TranscriptUpdate::Appended(self.entries.len() - 1)
    }

    pub fn end_turn(&mut self, speaker: Speaker) {
        self.open_turns.remove(&speaker);
    }

    pub fn end_all_turns(&mut self) {
        self.open_turns.clear();
    }

    /// The last `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> &[TranscriptEntry] {
        let start = self.entries.len().saturating_sub(limit);
        &self.entries[start..]
    }
}
