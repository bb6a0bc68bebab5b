//! Repair of tool-input fragments that lost their opening brace.
//!
//! Some gateways translating OpenAI `tool_calls` into Anthropic streaming
//! events drop the leading `{` from the first `input_json_delta` of a content
//! block. Later fragments concatenate correctly, so only the first fragment per
//! block index is ever a candidate, and the rewrite touches nothing but the
//! start of the `partial_json` string literal.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::value::RawValue;

use super::event::{DATA_FIELD, Event};

pub const CONTENT_BLOCK_DELTA: &str = "content_block_delta";
pub const INPUT_JSON_DELTA: &str = "input_json_delta";

#[derive(Deserialize)]
struct DeltaEnvelope<'a> {
    #[serde(rename = "type")]
    kind: Option<String>,
    index: Option<u64>,
    #[serde(borrow)]
    delta: Option<&'a RawValue>,
}

#[derive(Deserialize)]
struct InputJsonDelta<'a> {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(borrow)]
    partial_json: Option<&'a RawValue>,
}

/// What [`PatchState::apply`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Not an `input_json_delta` event, or its payload did not parse.
    Untouched,
    /// A later fragment for an index that was already checked.
    AlreadyHandled { index: u64 },
    /// First fragment for the index; it needed no repair.
    Checked { index: u64 },
    /// First fragment for the index; `{` was prepended.
    Prepended { index: u64 },
}

impl PatchOutcome {
    pub fn is_patched(&self) -> bool {
        matches!(self, Self::Prepended { .. })
    }
}

/// A located first-fragment candidate inside a `data:` line.
struct Fragment {
    index: u64,
    /// Byte offset in the line where `{` must be inserted, if a repair is due.
    insert_at: Option<usize>,
}

/// Content-block indices already checked within one response stream.
///
/// One value per relayed response; it is never shared between requests.
#[derive(Debug, Default)]
pub struct PatchState {
    handled: HashSet<u64>,
}

impl PatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_handled(&self, index: u64) -> bool {
        self.handled.contains(&index)
    }

    /// Inspect `event` and repair its fragment in place when it is the first
    /// `input_json_delta` seen for its block and lacks the opening brace.
    pub fn apply(&mut self, event: &mut Event) -> PatchOutcome {
        let Some(line_idx) = event.data_line_index() else {
            return PatchOutcome::Untouched;
        };
        let Some(line) = event.line_mut(line_idx) else {
            return PatchOutcome::Untouched;
        };
        let Some(fragment) = locate_fragment(line) else {
            return PatchOutcome::Untouched;
        };

        let index = fragment.index;
        if !self.handled.insert(index) {
            return PatchOutcome::AlreadyHandled { index };
        }
        match fragment.insert_at {
            Some(at) => {
                line.insert(at, '{');
                tracing::debug!(index, "prepended missing '{{' to first input_json_delta");
                PatchOutcome::Prepended { index }
            }
            None => PatchOutcome::Checked { index },
        }
    }
}

/// Parse a `data:` line and, for an `input_json_delta`, work out whether and
/// where a brace belongs. `None` means the line is not a candidate at all.
fn locate_fragment(line: &str) -> Option<Fragment> {
    let payload = line.strip_prefix(DATA_FIELD)?;
    let envelope: DeltaEnvelope<'_> = serde_json::from_str(payload).ok()?;
    if envelope.kind.as_deref() != Some(CONTENT_BLOCK_DELTA) {
        return None;
    }
    let delta: InputJsonDelta<'_> = serde_json::from_str(envelope.delta?.get()).ok()?;
    if delta.kind.as_deref() != Some(INPUT_JSON_DELTA) {
        return None;
    }

    let index = envelope.index.unwrap_or(0);
    let insert_at = delta.partial_json.and_then(|raw| {
        let text: String = serde_json::from_str(raw.get()).ok()?;
        if text.is_empty() || text.starts_with('{') {
            return None;
        }
        // Raw values borrow from `line`, so the pointer distance is a byte
        // offset into it. `+ 1` steps past the literal's opening quote.
        let start = raw.get().as_ptr() as usize - line.as_ptr() as usize;
        Some(start + 1)
    });
    Some(Fragment { index, insert_at })
}
