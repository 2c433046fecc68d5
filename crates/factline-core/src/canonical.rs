//! Deterministic JSON serialization for hash payloads.
//!
//! Anchor and block hashes are computed over a canonical rendering of their
//! fields: object keys sorted lexicographically at every level, no
//! whitespace between tokens, strings escaped exactly as `serde_json` does.
//! Two payloads with the same field values therefore always hash the same,
//! independent of insertion order.

use std::fmt::Write as _;

use serde_json::Value;
use thiserror::Error;

/// Maximum nesting depth accepted during canonicalization.
///
/// Caller-supplied metadata flows into hash payloads; the depth cap keeps a
/// hostile value from overflowing the stack.
pub const MAX_DEPTH: usize = 128;

/// Errors that can occur during canonicalization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CanonicalError {
    /// The value is nested deeper than [`MAX_DEPTH`] levels.
    #[error("max depth exceeded: value nested deeper than {max_depth} levels")]
    MaxDepthExceeded {
        /// The depth limit that was exceeded.
        max_depth: usize,
    },
}

/// Renders a JSON value in canonical form.
///
/// # Errors
///
/// Returns [`CanonicalError::MaxDepthExceeded`] if the value nests deeper
/// than [`MAX_DEPTH`] levels.
pub fn to_canonical_string(value: &Value) -> Result<String, CanonicalError> {
    let mut out = String::new();
    write_value(&mut out, value, 0)?;
    Ok(out)
}

fn write_value(out: &mut String, value: &Value, depth: usize) -> Result<(), CanonicalError> {
    if depth > MAX_DEPTH {
        return Err(CanonicalError::MaxDepthExceeded {
            max_depth: MAX_DEPTH,
        });
    }

    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => write_escaped(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item, depth + 1)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            // serde_json's default map is a BTreeMap, but sort explicitly so
            // canonical output does not depend on a feature flag.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(out, key);
                out.push(':');
                write_value(out, &map[key.as_str()], depth + 1)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_escaped(out: &mut String, s: &str) {
    // serde_json cannot fail serializing a plain string.
    let escaped = serde_json::to_string(s).unwrap_or_default();
    out.push_str(&escaped);
}
