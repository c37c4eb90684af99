//! Keyed array codec.
//!
//! `serde_json` takes care of the records themselves; this module deals with
//! where the array sits in the document. Arrays are read and written through a
//! synthetic `{"array": [...]}` container, either at the document root or
//! renamed to an arbitrary key such as `"sensori"`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

// ---

/// Field name of the synthetic container.
const ARRAY_FIELD: &str = "array";

pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("key '{0}' not found or not followed by an array")]
    KeyNotFound(String),

    #[error("array under key '{0}' is never closed")]
    UnterminatedArray(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct Wrapper<T> {
    array: Vec<T>,
}

#[derive(Serialize)]
struct WrapperRef<'a, T> {
    array: &'a [T],
}

/// Decode a document whose root is an array of `T`.
pub fn decode_root<T: DeserializeOwned>(json: &str) -> Result<Vec<T>> {
    // ---
    let wrapped = format!("{{ \"{ARRAY_FIELD}\": {json}}}");
    let wrapper: Wrapper<T> = serde_json::from_str(&wrapped)?;
    Ok(wrapper.array)
}

/// Decode the array of `T` stored under `key`.
pub fn decode_keyed<T: DeserializeOwned>(json: &str, key: &str) -> Result<Vec<T>> {
    // ---
    let array = locate_keyed_array(json, key)?;
    decode_root(array)
}

/// Encode `items` as `{"array": [...]}`.
pub fn encode_root<T: Serialize>(items: &[T], pretty: bool) -> Result<String> {
    // ---
    let wrapper = WrapperRef { array: items };
    let json = if pretty {
        serde_json::to_string_pretty(&wrapper)?
    } else {
        serde_json::to_string(&wrapper)?
    };
    Ok(json)
}

/// Encode `items` as `{"<key>": [...]}`.
///
/// The container field is renamed on the serialized tree, so record values
/// that happen to contain the text `array` are left alone.
pub fn encode_keyed<T: Serialize>(items: &[T], key: &str, pretty: bool) -> Result<String> {
    // ---
    let mut tree = serde_json::to_value(WrapperRef { array: items })?;

    if let serde_json::Value::Object(fields) = &mut tree {
        if let Some(array) = fields.remove(ARRAY_FIELD) {
            fields.insert(key.to_string(), array);
        }
    }

    let json = if pretty {
        serde_json::to_string_pretty(&tree)?
    } else {
        serde_json::to_string(&tree)?
    };
    Ok(json)
}

/// Find the array literal stored under `key` and return it as a slice of
/// `json`, brackets included.
///
/// The key is located textually: the first `"<key>"` followed by `:` and `[`
/// wins. The closing bracket is found by tracking nesting depth, ignoring
/// brackets inside string literals.
pub fn locate_keyed_array<'a>(json: &'a str, key: &str) -> Result<&'a str> {
    // ---
    let needle = format!("\"{key}\"");
    let mut search_from = 0;

    while let Some(found) = json[search_from..].find(&needle) {
        let after_key = search_from + found + needle.len();

        if let Some(start) = array_start_after(json, after_key) {
            let end = matching_bracket(json, start)
                .ok_or_else(|| CodecError::UnterminatedArray(key.to_string()))?;
            return Ok(&json[start..=end]);
        }

        search_from = after_key;
    }

    Err(CodecError::KeyNotFound(key.to_string()))
}

/// Byte offset of the `[` opening the value that follows a key ending at
/// `pos`, if that value is an array.
fn array_start_after(json: &str, pos: usize) -> Option<usize> {
    let rest = json[pos..].trim_start();
    let rest = rest.strip_prefix(':')?.trim_start();
    rest.starts_with('[').then(|| json.len() - rest.len())
}

fn matching_bracket(json: &str, start: usize) -> Option<usize> {
    // ---
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in json.as_bytes()[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }

    None
}
