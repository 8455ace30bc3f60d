//! Rich-text change descriptions.
//!
//! A [`Delta`] is the retain/insert/delete form browser rich-text editors
//! emit and accept:
//!
//! ```text
//! [{"retain": 5}, {"insert": " world", "attributes": {"bold": true}}, {"delete": 2}]
//! ```
//!
//! All positions and lengths are UTF-16 code units, matching the offsets the
//! shared text container is created with.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use yrs::types::{Attrs, Delta as YDelta};
use yrs::{Any, Out, ReadTxn};

/// Formatting marks attached to a run. A `null` value removes the mark.
pub type Attributes = BTreeMap<String, Value>;

/// One step of a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeltaOp {
    Insert {
        insert: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
    },
    Retain {
        retain: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
    },
    Delete {
        delete: u32,
    },
}

impl DeltaOp {
    pub fn insert(text: impl Into<String>) -> Self {
        DeltaOp::Insert {
            insert: text.into(),
            attributes: None,
        }
    }

    pub fn retain(len: u32) -> Self {
        DeltaOp::Retain {
            retain: len,
            attributes: None,
        }
    }

    pub fn delete(len: u32) -> Self {
        DeltaOp::Delete { delete: len }
    }

    /// Convert a yrs text event delta into our representation.
    pub(crate) fn from_yrs<T: ReadTxn>(delta: &YDelta, txn: &T) -> Self {
        match delta {
            YDelta::Inserted(value, attrs) => DeltaOp::Insert {
                insert: out_to_string(value, txn),
                attributes: attrs.as_deref().map(attrs_to_json),
            },
            YDelta::Retain(len, attrs) => DeltaOp::Retain {
                retain: *len,
                attributes: attrs.as_deref().map(attrs_to_json),
            },
            YDelta::Deleted(len) => DeltaOp::Delete { delete: *len },
        }
    }
}

/// An ordered batch of [`DeltaOp`]s describing one edit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Delta {
    ops: Vec<DeltaOp>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ops(ops: Vec<DeltaOp>) -> Self {
        Self { ops }
    }

    /// Append a retain. Zero-length retains are dropped.
    pub fn retain(mut self, len: u32) -> Self {
        if len > 0 {
            self.ops.push(DeltaOp::retain(len));
        }
        self
    }

    /// Append a retain that applies formatting over `len` units.
    pub fn retain_with(mut self, len: u32, attributes: Attributes) -> Self {
        if len > 0 {
            self.ops.push(DeltaOp::Retain {
                retain: len,
                attributes: Some(attributes),
            });
        }
        self
    }

    pub fn insert(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.is_empty() {
            self.ops.push(DeltaOp::insert(text));
        }
        self
    }

    pub fn insert_with(mut self, text: impl Into<String>, attributes: Attributes) -> Self {
        let text = text.into();
        if !text.is_empty() {
            self.ops.push(DeltaOp::Insert {
                insert: text,
                attributes: Some(attributes),
            });
        }
        self
    }

    pub fn delete(mut self, len: u32) -> Self {
        if len > 0 {
            self.ops.push(DeltaOp::delete(len));
        }
        self
    }

    pub fn ops(&self) -> &[DeltaOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Net change in length, in UTF-16 units, this delta causes.
    pub fn length_change(&self) -> i64 {
        self.ops
            .iter()
            .map(|op| match op {
                DeltaOp::Insert { insert, .. } => i64::from(utf16_len(insert)),
                DeltaOp::Delete { delete } => -i64::from(*delete),
                DeltaOp::Retain { .. } => 0,
            })
            .sum()
    }

    /// Rebase `other` so it applies after `self`.
    ///
    /// Both deltas must describe edits to the same starting text. With
    /// `priority`, `self` is taken to have happened first: its inserts land
    /// before `other`'s at the same position and its marks win. Applying
    /// `self` then `self.transform(other, p)` gives the same text as applying
    /// `other` then `other.transform(self, !p)`.
    pub fn transform(&self, other: &Delta, priority: bool) -> Delta {
        let mut mine = OpCursor::new(&self.ops);
        let mut theirs = OpCursor::new(&other.ops);
        let mut out = Delta::new();

        while !mine.is_done() || !theirs.is_done() {
            if mine.peek_is_insert() && (priority || !theirs.peek_is_insert()) {
                out = out.push(DeltaOp::retain(mine.take_insert_len()));
            } else if theirs.peek_is_insert() {
                if let Some(op) = theirs.take_whole() {
                    out = out.push(op);
                }
            } else {
                let len = match (mine.peek_len(), theirs.peek_len()) {
                    (Some(a), Some(b)) => a.min(b),
                    (Some(n), None) | (None, Some(n)) => n,
                    (None, None) => break,
                };
                match (mine.advance(len), theirs.advance(len)) {
                    // Already gone on our side.
                    (Step::Delete, _) => {}
                    (_, Step::Delete) => out = out.push(DeltaOp::delete(len)),
                    (Step::Retain(ours), Step::Retain(their_marks)) => {
                        out = out.push(DeltaOp::Retain {
                            retain: len,
                            attributes: transform_marks(ours, their_marks, priority),
                        });
                    }
                }
            }
        }
        out.chop()
    }

    /// Append `op`, merging it into the last op when both are the same kind.
    fn push(mut self, op: DeltaOp) -> Self {
        let merged = match (self.ops.last_mut(), &op) {
            (Some(DeltaOp::Delete { delete }), DeltaOp::Delete { delete: more }) => {
                *delete += more;
                true
            }
            (
                Some(DeltaOp::Retain {
                    retain,
                    attributes: last,
                }),
                DeltaOp::Retain {
                    retain: more,
                    attributes,
                },
            ) if last == attributes => {
                *retain += more;
                true
            }
            (
                Some(DeltaOp::Insert {
                    insert,
                    attributes: last,
                }),
                DeltaOp::Insert {
                    insert: more,
                    attributes,
                },
            ) if last == attributes => {
                insert.push_str(more);
                true
            }
            _ => false,
        };
        let empty = match &op {
            DeltaOp::Insert { insert, .. } => insert.is_empty(),
            DeltaOp::Retain { retain, .. } => *retain == 0,
            DeltaOp::Delete { delete } => *delete == 0,
        };
        if !merged && !empty {
            self.ops.push(op);
        }
        self
    }

    /// Drop trailing retains that carry no formatting.
    fn chop(mut self) -> Self {
        while let Some(DeltaOp::Retain {
            attributes: None, ..
        }) = self.ops.last()
        {
            self.ops.pop();
        }
        self
    }

    /// Concatenated inserted text, ignoring retains and deletes.
    pub fn inserted_text(&self) -> String {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DeltaOp::Insert { insert, .. } => Some(insert.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl From<Vec<DeltaOp>> for Delta {
    fn from(ops: Vec<DeltaOp>) -> Self {
        Self::from_ops(ops)
    }
}

impl IntoIterator for Delta {
    type Item = DeltaOp;
    type IntoIter = std::vec::IntoIter<DeltaOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

/// What a retain/delete slice of a delta does over a span.
enum Step<'a> {
    Retain(Option<&'a Attributes>),
    Delete,
}

/// Walks a delta's ops, splitting retains and deletes on demand.
///
/// Past the end it behaves like an endless plain retain.
struct OpCursor<'a> {
    ops: &'a [DeltaOp],
    index: usize,
    offset: u32,
}

impl<'a> OpCursor<'a> {
    fn new(ops: &'a [DeltaOp]) -> Self {
        Self {
            ops,
            index: 0,
            offset: 0,
        }
    }

    fn is_done(&self) -> bool {
        self.index >= self.ops.len()
    }

    fn peek_is_insert(&self) -> bool {
        matches!(self.ops.get(self.index), Some(DeltaOp::Insert { .. }))
    }

    /// Units left in the current retain or delete; `None` past the end.
    fn peek_len(&self) -> Option<u32> {
        match self.ops.get(self.index)? {
            DeltaOp::Retain { retain: n, .. } | DeltaOp::Delete { delete: n } => {
                Some(n - self.offset)
            }
            DeltaOp::Insert { insert, .. } => Some(utf16_len(insert)),
        }
    }

    fn take_insert_len(&mut self) -> u32 {
        let len = match self.ops.get(self.index) {
            Some(DeltaOp::Insert { insert, .. }) => utf16_len(insert),
            _ => 0,
        };
        self.index += 1;
        self.offset = 0;
        len
    }

    fn take_whole(&mut self) -> Option<DeltaOp> {
        let op = self.ops.get(self.index)?.clone();
        self.index += 1;
        self.offset = 0;
        Some(op)
    }

    /// Consume `len` units of the current retain or delete.
    fn advance(&mut self, len: u32) -> Step<'a> {
        let ops: &'a [DeltaOp] = self.ops;
        let Some(op) = ops.get(self.index) else {
            return Step::Retain(None);
        };
        let (total, step) = match op {
            DeltaOp::Retain { retain, attributes } => (*retain, Step::Retain(attributes.as_ref())),
            DeltaOp::Delete { delete } => (*delete, Step::Delete),
            DeltaOp::Insert { insert, attributes } => {
                (utf16_len(insert), Step::Retain(attributes.as_ref()))
            }
        };
        if self.offset + len >= total {
            self.index += 1;
            self.offset = 0;
        } else {
            self.offset += len;
        }
        step
    }
}

/// Marks `theirs` sets once `ours` has been applied over the same span.
fn transform_marks(
    ours: Option<&Attributes>,
    theirs: Option<&Attributes>,
    priority: bool,
) -> Option<Attributes> {
    let theirs = theirs?;
    let Some(ours) = ours.filter(|_| priority) else {
        return Some(theirs.clone());
    };
    let kept: Attributes = theirs
        .iter()
        .filter(|(key, _)| !ours.contains_key(*key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    (!kept.is_empty()).then_some(kept)
}

/// Length of `s` in UTF-16 code units.
pub fn utf16_len(s: &str) -> u32 {
    s.encode_utf16().count() as u32
}

fn out_to_string<T: ReadTxn>(value: &Out, txn: &T) -> String {
    match value {
        Out::Any(Any::String(s)) => s.to_string(),
        other => other.clone().to_string(txn),
    }
}

pub(crate) fn attrs_to_json(attrs: &Attrs) -> Attributes {
    attrs
        .iter()
        .map(|(k, v)| (k.to_string(), any_to_json(v)))
        .collect()
}

pub(crate) fn json_to_attrs(attributes: &Attributes) -> Attrs {
    attributes
        .iter()
        .map(|(k, v)| (Arc::<str>::from(k.as_str()), json_to_any(v)))
        .collect()
}

fn any_to_json(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Any::BigInt(i) => Value::from(*i),
        Any::String(s) => Value::String(s.to_string()),
        Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), any_to_json(v)))
                .collect(),
        ),
        _ => Value::Null,
    }
}

fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        // Integers stay integers so `{"header": 1}` survives a round trip.
        Value::Number(n) => match n.as_i64() {
            Some(i) => Any::BigInt(i),
            None => Any::Number(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Any::String(Arc::from(s.as_str())),
        Value::Array(items) => Any::Array(items.iter().map(json_to_any).collect::<Vec<_>>().into()),
        Value::Object(map) => Any::Map(Arc::new(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_any(v)))
                .collect::<HashMap<String, Any>>(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_skips_empty_ops() {
        let delta = Delta::new().retain(0).insert("").delete(0).insert("a");
        assert_eq!(delta.ops(), &[DeltaOp::insert("a")]);
    }

    #[test]
    fn test_length_change() {
        let delta = Delta::new().retain(3).insert("abc").delete(5);
        assert_eq!(delta.length_change(), -2);
    }

    #[test]
    fn test_utf16_len_counts_surrogates() {
        assert_eq!(utf16_len("abc"), 3);
        assert_eq!(utf16_len("é"), 1);
        assert_eq!(utf16_len("😀"), 2);
    }

    #[test]
    fn test_json_shape_matches_editor_format() {
        let mut bold = Attributes::new();
        bold.insert("bold".into(), json!(true));
        let delta = Delta::new().retain(5).insert_with("hi", bold).delete(1);

        let value = serde_json::to_value(&delta).unwrap();
        assert_eq!(
            value,
            json!([
                {"retain": 5},
                {"insert": "hi", "attributes": {"bold": true}},
                {"delete": 1}
            ])
        );

        let parsed: Delta = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, delta);
    }

    #[test]
    fn test_attribute_conversion_preserves_integers() {
        let mut attrs = Attributes::new();
        attrs.insert("header".into(), json!(1));
        attrs.insert("color".into(), json!("#ff0000"));
        attrs.insert("bold".into(), Value::Null);

        let back = attrs_to_json(&json_to_attrs(&attrs));
        assert_eq!(back, attrs);
    }

    #[test]
    fn test_transform_concurrent_inserts() {
        let a = Delta::new().insert("A");
        let b = Delta::new().insert("B");

        assert_eq!(a.transform(&b, true), Delta::new().retain(1).insert("B"));
        assert_eq!(a.transform(&b, false), Delta::new().insert("B"));
    }

    #[test]
    fn test_transform_insert_after_remote_delete() {
        // Base "hello world": remote deletes "hello ", local types "!" at the end.
        let remote = Delta::new().delete(6);
        let local = Delta::new().retain(11).insert("!");

        assert_eq!(remote.transform(&local, true), Delta::new().retain(5).insert("!"));
        assert_eq!(local.transform(&remote, false), Delta::new().delete(6));
    }

    #[test]
    fn test_transform_overlapping_deletes() {
        let a = Delta::new().retain(1).delete(3);
        let b = Delta::new().retain(2).delete(3);

        assert_eq!(a.transform(&b, true), Delta::new().retain(1).delete(1));
        assert_eq!(b.transform(&a, false), Delta::new().retain(1).delete(1));
    }

    #[test]
    fn test_transform_marks_with_priority() {
        let mut bold = Attributes::new();
        bold.insert("bold".into(), json!(true));
        let mut plain = Attributes::new();
        plain.insert("bold".into(), Value::Null);
        let mut italic_plain = plain.clone();
        italic_plain.insert("italic".into(), json!(true));

        let a = Delta::new().retain_with(2, bold);
        let b = Delta::new().retain_with(2, italic_plain.clone());

        let mut italic = Attributes::new();
        italic.insert("italic".into(), json!(true));
        assert_eq!(a.transform(&b, true), Delta::new().retain_with(2, italic));
        assert_eq!(a.transform(&b, false), Delta::new().retain_with(2, italic_plain));
    }

    #[test]
    fn test_inserted_text() {
        let delta = Delta::new().insert("he").retain(2).insert("llo");
        assert_eq!(delta.inserted_text(), "hello");
    }
}
