//! Streaming response aggregation
//!
//! The server streams user transcripts and assistant replies as small text
//! and tool-call fragments. This module stitches them back into finished
//! `ChatTurn`s:
//! - `DeltaAccumulator` concatenates tool-call fragments per index
//! - `StreamAggregator` tracks one pending turn per speaker and owns the transcript

mod aggregator;
mod delta;

pub use aggregator::{ChatTurn, Speaker, StreamAggregator};
pub use delta::{AccumulatedToolCall, DeltaAccumulator, ToolCallDelta};
