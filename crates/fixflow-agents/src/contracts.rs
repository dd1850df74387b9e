//! Response validation for generation output.
//!
//! The generation capability is untrusted: every stage re-validates what it
//! gets back before anything downstream sees it. Violations become
//! `PipelineError::MalformedOutput` (or `KeySetMismatch` for closed-set
//! mappings), never a silently defaulted value.
//!
//! ## Rules
//!
//! ```text
//! structured stages:  exactly one JSON object, optionally wrapped in a single
//!                     markdown fence, deserialised into a closed wire type
//!                     (deny_unknown_fields on every level)
//! closed mappings:    key set == expected key set, no more, no less
//! raw-text stages:    at most one wrapping fence is removed; stray ``` at
//!                     either edge afterwards is a violation
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::{self, DeserializeOwned, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::stages::{PathSetMismatch, PipelineError, Stage};

const FENCE: &str = "```";

/// A whole response wrapped in one markdown fence, with optional info string.
static WRAPPING_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A\s*```[\w+#.-]*[ \t]*\r?\n(.*?)\r?\n?[ \t]*```\s*\z")
        .expect("WRAPPING_FENCE_RE regex should compile")
});

/// Body of a single fence wrapping the entire text, if there is one.
pub fn strip_wrapping_fence(text: &str) -> Option<&str> {
    let captures = WRAPPING_FENCE_RE.captures(text)?;
    let inner = captures.get(1)?.as_str();
    // A second fence inside means the wrapper was not a single block.
    if inner.contains(FENCE) {
        return None;
    }
    Some(inner)
}

/// True if the text starts or ends (ignoring whitespace) with a fence marker.
pub fn has_fence_edges(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with(FENCE) || trimmed.ends_with(FENCE)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Generation text with one wrapping fence removed; empty output is rejected.
fn response_body(stage: Stage, raw: &str) -> Result<&str, PipelineError> {
    let body = strip_wrapping_fence(raw).unwrap_or(raw).trim();
    if body.is_empty() {
        return Err(reject(stage, "output is empty"));
    }
    Ok(body)
}

/// Parse generation text as exactly one JSON object of type `T`.
pub fn parse_closed<T: DeserializeOwned>(stage: Stage, raw: &str) -> Result<T, PipelineError> {
    let body = response_body(stage, raw)?;

    let value: Value = serde_json::from_str(body)
        .map_err(|e| reject(stage, format!("output is not a single JSON value: {e}")))?;

    if !value.is_object() {
        return Err(reject(
            stage,
            format!("expected a JSON object, got {}", json_kind(&value)),
        ));
    }

    serde_json::from_value(value)
        .map_err(|e| reject(stage, format!("output does not match the declared shape: {e}")))
}

/// String-to-string JSON object that refuses repeated keys.
struct UniqueStringMap(BTreeMap<String, String>);

impl<'de> Deserialize<'de> for UniqueStringMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MapVisitor;

        impl<'de> Visitor<'de> for MapVisitor {
            type Value = UniqueStringMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object of string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = BTreeMap::new();
                while let Some((key, value)) = access.next_entry::<String, String>()? {
                    if map.contains_key(&key) {
                        return Err(de::Error::custom(format!("duplicate key '{key}'")));
                    }
                    map.insert(key, value);
                }
                Ok(UniqueStringMap(map))
            }
        }

        deserializer.deserialize_map(MapVisitor)
    }
}

/// Parse a closed string-to-string mapping whose keys must equal `expected`.
///
/// Parsed straight from text: a repeated key is a violation, not last-wins.
pub fn parse_closed_map<'a>(
    stage: Stage,
    raw: &str,
    expected: impl IntoIterator<Item = &'a str>,
) -> Result<BTreeMap<String, String>, PipelineError> {
    let body = response_body(stage, raw)?;
    let UniqueStringMap(map) = serde_json::from_str(body)
        .map_err(|e| reject(stage, format!("output is not a closed string mapping: {e}")))?;
    if let Some(mismatch) = PathSetMismatch::between(expected, map.keys().map(String::as_str)) {
        warn!(%stage, %mismatch, "closed key set violated");
        return Err(PipelineError::KeySetMismatch {
            stage,
            missing: mismatch.missing,
            unexpected: mismatch.unexpected,
        });
    }
    Ok(map)
}

/// Reject blank values for a mandatory text field.
pub fn require_non_blank(stage: Stage, field: &str, value: &str) -> Result<(), PipelineError> {
    if value.trim().is_empty() {
        return Err(reject(stage, format!("field '{field}' is blank")));
    }
    Ok(())
}

/// Keep the first occurrence of each key, preserving order. Returns how many
/// items were dropped.
pub fn dedupe_by_key<T, F>(items: &mut Vec<T>, mut key: F) -> usize
where
    F: FnMut(&T) -> String,
{
    let before = items.len();
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(key(item)));
    before - items.len()
}

fn reject(stage: Stage, reason: impl Into<String>) -> PipelineError {
    let reason = reason.into();
    warn!(%stage, %reason, "generation output rejected");
    PipelineError::malformed(stage, reason)
}
