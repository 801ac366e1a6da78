//! Tool call tracking for decoded responses
//!
//! The decoder emits argument text at-least-once and never joins it. This
//! tracker is the consumer-side reduction: `ToolCallArguments` fragments are
//! appended onto the most recently opened call at the same index.

use std::collections::HashMap;

use crate::llm::{MessageFragment, ToolCall};

/// Tracks tool calls across a fragment sequence, in the order they opened
#[derive(Debug, Default)]
pub struct ToolCallTracker {
    /// Calls in emission order
    calls: Vec<ToolCall>,
    /// Upstream index -> position in `calls` of the latest call at that index
    open_by_index: HashMap<usize, usize>,
}

impl ToolCallTracker {
    /// Create a new tool call tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tool call
    ///
    /// Calls without an index (reconstructed from embedded tags) are complete
    /// as given and never receive argument fragments.
    pub fn start_call(&mut self, id: &str, name: &str, arguments: &str, index: Option<usize>) {
        self.calls.push(ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        });
        if let Some(index) = index {
            self.open_by_index.insert(index, self.calls.len() - 1);
        }
    }

    /// Append an argument fragment to the call opened at `index`
    ///
    /// Returns `false` when no call was opened at that index yet.
    pub fn append_args(&mut self, index: usize, delta: &str) -> bool {
        match self.open_by_index.get(&index) {
            Some(&position) => {
                self.calls[position].arguments.push_str(delta);
                true
            }
            None => {
                tracing::warn!("Received tool call arguments for unknown index: {}", index);
                false
            }
        }
    }

    /// Feed one fragment; textual fragments are ignored
    pub fn observe(&mut self, fragment: &MessageFragment) {
        match fragment {
            MessageFragment::ToolCall {
                id,
                name,
                arguments,
                index,
            } => self.start_call(id, name, arguments, *index),
            MessageFragment::ToolCallArguments { index, delta } => {
                self.append_args(*index, delta);
            }
            MessageFragment::Text { .. } | MessageFragment::Think { .. } => {}
        }
    }

    /// Consume the tracker and return the joined calls in emission order
    pub fn into_calls(self) -> Vec<ToolCall> {
        self.calls
    }

    /// Get the number of tracked calls
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Check if the tracker is empty
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
