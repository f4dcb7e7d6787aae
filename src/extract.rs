//! JSON-object extraction from free-form model output.
//!
//! Models wrap their answer in prose, markdown fences, or step-by-step
//! reasoning that may itself contain illustrative JSON. [`json_objects`]
//! finds every top-level object in the text without trying to understand
//! the surrounding prose.

use serde_json::{Deserializer, Map, Value};

/// Lazily yield every JSON object found in `text`, left to right.
///
/// At each `{` a strict decode is attempted that consumes exactly one
/// balanced value. On success the object is yielded and scanning resumes
/// after it; on failure scanning resumes one byte later, so an object nested
/// inside a malformed region is still found. Arrays and scalars outside an
/// object are never yielded.
///
/// The iterator is `Clone`; cloning it (or calling this again) restarts the
/// scan and produces the same sequence.
///
/// Decoding is strict RFC 8259 JSON as implemented by `serde_json`. An
/// object is skipped (though objects nested inside it may still be found)
/// when it contains `NaN` or `Infinity`, a number too large for `f64` such
/// as `1e400`, or a string with an unpaired surrogate escape such as
/// `"\ud800"`. Integers beyond the `u64`/`i64` range decode as floats and
/// therefore do not satisfy an `int` field.
///
/// # Examples
///
/// ```
/// use lmflow::extract::json_objects;
/// use serde_json::json;
///
/// let found: Vec<_> = json_objects(r#"{"a":1}garbage{"b":2}"#).collect();
/// assert_eq!(found.len(), 2);
/// assert_eq!(found[1]["b"], json!(2));
///
/// let found: Vec<_> = json_objects(r#"{bad {"x":1}"#).collect();
/// assert_eq!(found[0]["x"], json!(1));
/// ```
pub fn json_objects(text: &str) -> JsonObjects<'_> {
    JsonObjects { text, pos: 0 }
}

/// The last JSON object in `text`, if any.
///
/// Reasoning-style replies often show example JSON before the final answer,
/// so the last object found is taken as the answer.
pub fn last_json_object(text: &str) -> Option<Map<String, Value>> {
    json_objects(text).last()
}

/// Iterator returned by [`json_objects`].
#[derive(Debug, Clone)]
pub struct JsonObjects<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> JsonObjects<'a> {
    /// Decode one value starting at byte offset `start` (which holds a `{`).
    /// Returns the object and the number of bytes it spans.
    fn decode_at(&self, start: usize) -> Option<(Map<String, Value>, usize)> {
        let mut stream = Deserializer::from_str(&self.text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(map))) => Some((map, stream.byte_offset())),
            _ => None,
        }
    }
}

impl<'a> Iterator for JsonObjects<'a> {
    type Item = Map<String, Value>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.text.len() {
            let start = self.pos + self.text[self.pos..].find('{')?;
            match self.decode_at(start) {
                Some((map, consumed)) => {
                    self.pos = start + consumed;
                    return Some(map);
                }
                None => self.pos = start + 1,
            }
        }
        None
    }
}
