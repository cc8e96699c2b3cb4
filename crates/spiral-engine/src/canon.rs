//! Content-addressable canonicalisation (spec.md §4.7), exposed to external
//! collaborators (JSON (de)serialisers, synthesizers) for producing stable
//! content digests of a document.
//!
//! Three things are pinned down, RFC-8785-adjacent but not a full
//! implementation of it: keys sorted lexicographically by UTF-16 code
//! unit (not by Rust's native UTF-8 byte order, which can disagree with
//! UTF-16 ordering for characters outside the Basic Multilingual Plane),
//! no whitespace anywhere, and `-0` canonicalising to `0` for numbers —
//! exactly the same canonicalisation spec.md §3 already requires of
//! `Value::Float` for hashing. Unrecognised top-level document fields
//! (anything outside `version`/`capabilities`/`functionSigs`/`airDefs`/
//! `nodes`/`result`) are stripped before serialising, per spec.md §3.

use sha2::{Digest, Sha256};
use spiral_value::{ErrorKind, SpiralError};

/// The document's recognised top-level fields (spec.md §3).
const RECOGNIZED_TOP_LEVEL_FIELDS: &[&str] =
    &["version", "capabilities", "functionSigs", "airDefs", "nodes", "result"];

/// Drops any top-level field not in [`RECOGNIZED_TOP_LEVEL_FIELDS`]. A
/// non-object input (or a nested object further down the tree) passes
/// through unchanged — only a document's own top level is filtered.
pub fn strip_unrecognized_fields(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for key in RECOGNIZED_TOP_LEVEL_FIELDS {
                if let Some(v) = map.get(*key) {
                    out.insert((*key).to_string(), v.clone());
                }
            }
            serde_json::Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Serialises `value` to its canonical byte string: no whitespace, object
/// keys sorted by UTF-16 code unit, numbers in canonical form.
pub fn canonical_json(value: &serde_json::Value) -> Result<String, SpiralError> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &serde_json::Value, out: &mut String) -> Result<(), SpiralError> {
    match value {
        serde_json::Value::Null => out.push_str("null"),
        serde_json::Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        serde_json::Value::Number(n) => out.push_str(&canonical_number(n)?),
        serde_json::Value::String(s) => write_json_string(s, out),
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                write_canonical(&map[key], out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

/// Canonical number form (spec.md §4.7: "ECMAScript-toString semantics,
/// −0 ⇒ 0, reject non-finite"). `serde_json::Number` can never itself hold
/// NaN/Infinity (JSON has no literal for them), so the "reject non-finite"
/// branch only fires for an `f64` that was smuggled in via
/// `Number::from_f64` bypassing that guarantee — defensive, not reachable
/// through ordinary parsed JSON.
fn canonical_number(n: &serde_json::Number) -> Result<String, SpiralError> {
    if let Some(i) = n.as_i64() {
        return Ok(i.to_string());
    }
    if let Some(u) = n.as_u64() {
        return Ok(u.to_string());
    }
    let f = n
        .as_f64()
        .ok_or_else(|| SpiralError::new(ErrorKind::ValidationError, "number is neither integral nor f64"))?;
    if !f.is_finite() {
        return Err(SpiralError::new(
            ErrorKind::ValidationError,
            "canonical form rejects non-finite numbers",
        ));
    }
    Ok(ecma_number_to_string(f))
}

/// Best-effort ECMAScript `Number::toString` (spec.md §9 notes this level
/// of detail is "deliberately left vague" upstream): `-0` canonicalises to
/// `0`, and Rust's shortest-round-trip `f64` formatting agrees with V8's
/// algorithm for every value that doesn't need exponential notation, which
/// covers every number this evaluator is expected to digest.
fn ecma_number_to_string(f: f64) -> String {
    if f == 0.0 {
        return "0".to_string();
    }
    format!("{f}")
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// A SHA-256 hex digest of `value`'s canonical form, after stripping
/// unrecognised top-level fields (spec.md §8 property 8: "digest(D)
/// depends only on canon(D)"). `sha2` is already part of this workspace's
/// dependency tree; reusing it here is more natural than hand-rolling a
/// hash.
pub fn digest(value: &serde_json::Value) -> Result<String, SpiralError> {
    let stripped = strip_unrecognized_fields(value);
    let canon = canonical_json(&stripped)?;
    let mut hasher = Sha256::new();
    hasher.update(canon.as_bytes());
    let bytes = hasher.finalize();
    Ok(bytes.iter().map(|b| format!("{b:02x}")).collect())
}
