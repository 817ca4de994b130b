use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Partial contribution to one tool call, keyed by its index within a turn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id_fragment: String,
    pub name_fragment: Option<String>,
    pub arguments_fragment: String,
    /// Call type as sent by the server (usually "function")
    pub kind: Option<String>,
}

/// A tool call assembled from every fragment seen for its index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatedToolCall {
    pub index: u32,
    pub id: String,
    pub name: Option<String>,
    pub arguments: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Concatenated fragments for one index
#[derive(Debug, Clone, Default)]
struct Slot {
    id: String,
    name: String,
    arguments: String,
    /// Last numeric index reported for this slot
    index: u32,
    /// Latest delta received, used as the shape of the merged view
    shape: ToolCallDelta,
}

/// Per-index accumulation table for the tool calls of one streaming turn
///
/// Fields only ever grow while the turn is open: non-empty fragments are
/// appended in arrival order and empty fragments are ignored.
#[derive(Debug, Clone, Default)]
pub struct DeltaAccumulator {
    slots: BTreeMap<u32, Slot>,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn apply(&mut self, delta: &ToolCallDelta) {
        let slot = self.slots.entry(delta.index).or_default();

        if !delta.id_fragment.is_empty() {
            slot.id.push_str(&delta.id_fragment);
        }
        if let Some(name) = delta.name_fragment.as_deref().filter(|n| !n.is_empty()) {
            slot.name.push_str(name);
        }
        if !delta.arguments_fragment.is_empty() {
            slot.arguments.push_str(&delta.arguments_fragment);
        }

        slot.index = delta.index;
        slot.shape = delta.clone();
    }

    pub fn apply_all(&mut self, deltas: &[ToolCallDelta]) {
        for delta in deltas {
            self.apply(delta);
        }
    }

    /// Every index seen so far, with accumulated strings substituted
    pub fn merged_view(&self) -> Vec<AccumulatedToolCall> {
        self.slots
            .values()
            .map(|slot| merge(&slot.shape, Some(slot)))
            .collect()
    }

    /// Resolve a final tool-call list against the accumulated fragments
    pub fn resolve(&self, calls: &[ToolCallDelta]) -> Vec<AccumulatedToolCall> {
        calls
            .iter()
            .map(|call| merge(call, self.slots.get(&call.index)))
            .collect()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

/// Accumulated strings win over the frame's own fragment whenever non-empty
fn merge(call: &ToolCallDelta, slot: Option<&Slot>) -> AccumulatedToolCall {
    let pick = |accumulated: Option<&String>, own: &str| -> String {
        match accumulated {
            Some(acc) if !acc.is_empty() => acc.clone(),
            _ => own.to_string(),
        }
    };

    let name = match slot.map(|s| &s.name) {
        Some(acc) if !acc.is_empty() => Some(acc.clone()),
        _ => call.name_fragment.clone(),
    };

    AccumulatedToolCall {
        index: slot.map_or(call.index, |s| s.index),
        id: pick(slot.map(|s| &s.id), &call.id_fragment),
        name,
        arguments: pick(slot.map(|s| &s.arguments), &call.arguments_fragment),
        kind: call.kind.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(index: u32, id: &str, name: Option<&str>, args: &str) -> ToolCallDelta {
        ToolCallDelta {
            index,
            id_fragment: id.to_string(),
            name_fragment: name.map(str::to_string),
            arguments_fragment: args.to_string(),
            kind: Some("function".to_string()),
        }
    }

    #[test]
    fn test_arguments_concatenate_in_order() {
        let mut acc = DeltaAccumulator::new();
        for fragment in ["{\"q\":", "", "\"rust", "\"}"] {
            acc.apply(&delta(0, "", None, fragment));
        }

        let view = acc.merged_view();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].arguments, "{\"q\":\"rust\"}");
    }

    #[test]
    fn test_empty_fragment_does_not_reset() {
        let mut acc = DeltaAccumulator::new();
        acc.apply(&delta(0, "call_1", Some("search"), "{}"));
        acc.apply(&delta(0, "", Some(""), ""));

        let view = acc.merged_view();
        assert_eq!(view[0].id, "call_1");
        assert_eq!(view[0].name.as_deref(), Some("search"));
        assert_eq!(view[0].arguments, "{}");
    }

    #[test]
    fn test_merged_view_covers_all_indices() {
        let mut acc = DeltaAccumulator::new();
        acc.apply(&delta(1, "b", Some("lookup"), "{"));
        acc.apply(&delta(0, "a", Some("search"), "{"));
        acc.apply(&delta(1, "", None, "}"));

        let view = acc.merged_view();
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].index, 0);
        assert_eq!(view[0].id, "a");
        assert_eq!(view[1].index, 1);
        assert_eq!(view[1].arguments, "{}");
        assert_eq!(view[1].name.as_deref(), Some("lookup"));
    }

    #[test]
    fn test_resolve_prefers_accumulated_values() {
        let mut acc = DeltaAccumulator::new();
        acc.apply(&delta(0, "call_", Some("get_"), "{\"city\":"));
        acc.apply(&delta(0, "9", Some("weather"), "\"Oslo\"}"));

        let resolved = acc.resolve(&[delta(0, "9", None, "\"Oslo\"}")]);
        assert_eq!(resolved[0].id, "call_9");
        assert_eq!(resolved[0].name.as_deref(), Some("get_weather"));
        assert_eq!(resolved[0].arguments, "{\"city\":\"Oslo\"}");
    }

    #[test]
    fn test_resolve_unknown_index_keeps_own_fields() {
        let acc = DeltaAccumulator::new();
        let resolved = acc.resolve(&[delta(3, "x", Some("noop"), "{}")]);

        assert_eq!(
            resolved[0],
            AccumulatedToolCall {
                index: 3,
                id: "x".to_string(),
                name: Some("noop".to_string()),
                arguments: "{}".to_string(),
                kind: Some("function".to_string()),
            }
        );
    }
}
