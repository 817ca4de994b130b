use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::delta::{AccumulatedToolCall, DeltaAccumulator, ToolCallDelta};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Speaker {
    /// Recognized microphone speech (transcript track)
    User,
    /// Assistant reply (response track)
    Assistant,
}

/// A finalized conversational turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// When the first fragment of this turn arrived
    pub timestamp: DateTime<Utc>,
    pub speaker: Speaker,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<AccumulatedToolCall>,
}

/// In-flight accumulation for one speaker
#[derive(Debug, Clone)]
struct PendingTurn {
    text: String,
    started_at: DateTime<Utc>,
    tool_calls: DeltaAccumulator,
}

impl PendingTurn {
    fn new() -> Self {
        Self {
            text: String::new(),
            started_at: Utc::now(),
            tool_calls: DeltaAccumulator::new(),
        }
    }
}

/// Reassembles streamed transcript and response fragments into turns
///
/// The user and assistant tracks are independent and may interleave; within
/// a track, fragments are applied strictly in arrival order.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    user: Option<PendingTurn>,
    assistant: Option<PendingTurn>,
    transcript: Vec<ChatTurn>,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a partial frame
    ///
    /// Returns the merged tool-call view when the frame carried tool calls,
    /// for progressive display.
    pub fn on_partial(
        &mut self,
        speaker: Speaker,
        text: &str,
        deltas: &[ToolCallDelta],
    ) -> Option<Vec<AccumulatedToolCall>> {
        let pending = self.track(speaker).get_or_insert_with(PendingTurn::new);
        pending.text.push_str(text);

        if deltas.is_empty() {
            return None;
        }

        pending.tool_calls.apply_all(deltas);
        Some(pending.tool_calls.merged_view())
    }

    /// Apply the finishing frame and close the speaker's track
    ///
    /// Returns the appended turn, or None when the turn was empty or a
    /// duplicate of the last transcript entry.
    pub fn on_final(
        &mut self,
        speaker: Speaker,
        text: &str,
        deltas: &[ToolCallDelta],
    ) -> Option<ChatTurn> {
        let pending = self.track(speaker).take().unwrap_or_else(PendingTurn::new);

        let mut content = pending.text;
        content.push_str(text);

        let tool_calls = if deltas.is_empty() {
            pending.tool_calls.merged_view()
        } else {
            pending.tool_calls.resolve(deltas)
        };

        if content.trim().is_empty() && tool_calls.is_empty() {
            debug!("Discarding empty {:?} turn", speaker);
            return None;
        }

        if let Some(last) = self.transcript.last() {
            if last.speaker == speaker && last.content == content {
                debug!("Suppressing duplicate {:?} turn", speaker);
                return None;
            }
        }

        let turn = ChatTurn {
            timestamp: pending.started_at,
            speaker,
            content,
            tool_calls,
        };
        self.transcript.push(turn.clone());

        Some(turn)
    }

    /// Text accumulated so far for the speaker's open turn
    pub fn pending_text(&self, speaker: Speaker) -> Option<&str> {
        self.track_ref(speaker).map(|p| p.text.as_str())
    }

    /// Current merged tool-call view of the speaker's open turn
    pub fn pending_tool_calls(&self, speaker: Speaker) -> Vec<AccumulatedToolCall> {
        self.track_ref(speaker)
            .map(|p| p.tool_calls.merged_view())
            .unwrap_or_default()
    }

    pub fn has_pending(&self) -> bool {
        self.user.is_some() || self.assistant.is_some()
    }

    /// Finalized turns, oldest first
    pub fn transcript(&self) -> &[ChatTurn] {
        &self.transcript
    }

    /// Drop in-flight turns; the transcript is kept
    pub fn reset(&mut self) {
        self.user = None;
        self.assistant = None;
    }

    /// Drop in-flight turns and the transcript
    pub fn clear(&mut self) {
        self.reset();
        self.transcript.clear();
    }

    fn track(&mut self, speaker: Speaker) -> &mut Option<PendingTurn> {
        match speaker {
            Speaker::User => &mut self.user,
            Speaker::Assistant => &mut self.assistant,
        }
    }

    fn track_ref(&self, speaker: Speaker) -> Option<&PendingTurn> {
        match speaker {
            Speaker::User => self.user.as_ref(),
            Speaker::Assistant => self.assistant.as_ref(),
        }
    }
}
