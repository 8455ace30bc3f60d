//! The rich-text editing surface a binding drives.
//!
//! [`EditorSurface`] is the seam to whatever UI component renders the text.
//! It is mutated only through deltas so the component keeps its own
//! invariants (selection, history). [`RichTextBuffer`] is a headless
//! implementation used by the CLI and by tests.

use crate::delta::{Attributes, Delta, DeltaOp};
use crate::error::EditorError;

/// Who caused an editor change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// A person typing. Bindings forward these.
    User,
    /// Programmatic change. Listeners are told, bindings ignore it.
    Api,
    /// Programmatic change that notifies nobody.
    Silent,
}

/// A change reported by the editor's change stream.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorChange {
    pub delta: Delta,
    pub source: ChangeSource,
    /// Editor length after the change, in UTF-16 units.
    pub len_after: u32,
}

pub type ChangeListener = Box<dyn Fn(&EditorChange) + Send + Sync>;

/// Imperative API of a rich-text editor component.
pub trait EditorSurface: Send {
    /// Plain text content.
    fn contents(&self) -> String;

    /// Length in UTF-16 units.
    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the whole buffer with the inserts of `delta`.
    fn set_contents(&mut self, delta: &Delta, source: ChangeSource) -> Result<(), EditorError>;

    /// Apply `delta` on top of the current buffer.
    fn update_contents(&mut self, delta: &Delta, source: ChangeSource) -> Result<(), EditorError>;

    /// Register a listener on the change stream.
    fn on_change(&mut self, listener: ChangeListener);
}

#[derive(Debug, Clone, PartialEq)]
struct Glyph {
    ch: char,
    attributes: Attributes,
}

/// Headless rich-text buffer: characters plus per-character marks.
#[derive(Default)]
pub struct RichTextBuffer {
    glyphs: Vec<Glyph>,
    listeners: Vec<ChangeListener>,
}

impl RichTextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `text` at UTF-16 offset `index`.
    pub fn insert_text(
        &mut self,
        index: u32,
        text: &str,
        source: ChangeSource,
    ) -> Result<(), EditorError> {
        self.update_contents(&Delta::new().retain(index).insert(text), source)
    }

    pub fn delete_text(
        &mut self,
        index: u32,
        len: u32,
        source: ChangeSource,
    ) -> Result<(), EditorError> {
        self.update_contents(&Delta::new().retain(index).delete(len), source)
    }

    pub fn format_text(
        &mut self,
        index: u32,
        len: u32,
        attributes: Attributes,
        source: ChangeSource,
    ) -> Result<(), EditorError> {
        self.update_contents(
            &Delta::new().retain(index).retain_with(len, attributes),
            source,
        )
    }

    /// Marks on the character starting at UTF-16 offset `index`.
    pub fn attributes_at(&self, index: u32) -> Option<&Attributes> {
        let i = glyph_index(&self.glyphs, 0, index).ok()?;
        self.glyphs.get(i).map(|g| &g.attributes)
    }

    /// Content as a delta of inserts, one per run of equal marks.
    pub fn to_delta(&self) -> Delta {
        let mut delta = Delta::new();
        let mut run = String::new();
        let mut run_attrs: Option<&Attributes> = None;
        for glyph in &self.glyphs {
            if run_attrs.is_some_and(|a| a != &glyph.attributes) {
                delta = push_run(delta, std::mem::take(&mut run), run_attrs);
            }
            run_attrs = Some(&glyph.attributes);
            run.push(glyph.ch);
        }
        push_run(delta, run, run_attrs)
    }

    fn notify(&self, delta: &Delta, source: ChangeSource) {
        if source == ChangeSource::Silent {
            return;
        }
        let change = EditorChange {
            delta: delta.clone(),
            source,
            len_after: self.len(),
        };
        for listener in &self.listeners {
            listener(&change);
        }
    }
}

fn push_run(delta: Delta, run: String, attrs: Option<&Attributes>) -> Delta {
    match attrs {
        Some(a) if !a.is_empty() => delta.insert_with(run, a.clone()),
        _ => delta.insert(run),
    }
}

/// Walk `units` UTF-16 units forward from glyph `from`.
fn glyph_index(glyphs: &[Glyph], from: usize, units: u32) -> Result<usize, EditorError> {
    let mut remaining = units as usize;
    let mut i = from;
    let mut position: u32 = glyphs[..from.min(glyphs.len())]
        .iter()
        .map(|g| g.ch.len_utf16() as u32)
        .sum();
    while remaining > 0 {
        let glyph = glyphs.get(i).ok_or(EditorError::OutOfRange {
            position: position.saturating_add(remaining as u32),
            len: position,
        })?;
        let width = glyph.ch.len_utf16();
        if width > remaining {
            return Err(EditorError::SplitCharacter { position });
        }
        remaining -= width;
        position += width as u32;
        i += 1;
    }
    Ok(i)
}

fn merge_marks(target: &mut Attributes, changes: &Attributes) {
    for (key, value) in changes {
        if value.is_null() {
            target.remove(key);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn apply_ops(glyphs: &mut Vec<Glyph>, delta: &Delta) -> Result<(), EditorError> {
    let mut pos = 0usize;
    for op in delta.ops() {
        match op {
            DeltaOp::Retain { retain, attributes } => {
                let end = glyph_index(glyphs, pos, *retain)?;
                if let Some(changes) = attributes {
                    for glyph in &mut glyphs[pos..end] {
                        merge_marks(&mut glyph.attributes, changes);
                    }
                }
                pos = end;
            }
            DeltaOp::Insert { insert, attributes } => {
                let mut marks = Attributes::new();
                if let Some(changes) = attributes {
                    merge_marks(&mut marks, changes);
                }
                let inserted: Vec<Glyph> = insert
                    .chars()
                    .map(|ch| Glyph {
                        ch,
                        attributes: marks.clone(),
                    })
                    .collect();
                let n = inserted.len();
                glyphs.splice(pos..pos, inserted);
                pos += n;
            }
            DeltaOp::Delete { delete } => {
                let end = glyph_index(glyphs, pos, *delete)?;
                glyphs.drain(pos..end);
            }
        }
    }
    Ok(())
}

impl EditorSurface for RichTextBuffer {
    fn contents(&self) -> String {
        self.glyphs.iter().map(|g| g.ch).collect()
    }

    fn len(&self) -> u32 {
        self.glyphs.iter().map(|g| g.ch.len_utf16() as u32).sum()
    }

    fn set_contents(&mut self, delta: &Delta, source: ChangeSource) -> Result<(), EditorError> {
        let inserts = Delta::from_ops(
            delta
                .ops()
                .iter()
                .filter(|op| matches!(op, DeltaOp::Insert { .. }))
                .cloned()
                .collect(),
        );
        let mut glyphs = Vec::new();
        apply_ops(&mut glyphs, &inserts)?;
        let removed = self.len();
        self.glyphs = glyphs;
        let change = Delta::from_ops(
            Delta::new()
                .delete(removed)
                .into_iter()
                .chain(inserts)
                .collect(),
        );
        self.notify(&change, source);
        Ok(())
    }

    fn update_contents(&mut self, delta: &Delta, source: ChangeSource) -> Result<(), EditorError> {
        // Work on a copy so a bad delta leaves the buffer untouched.
        let mut glyphs = self.glyphs.clone();
        apply_ops(&mut glyphs, delta)?;
        self.glyphs = glyphs;
        log::trace!("editor applied {:?} ({} ops)", source, delta.ops().len());
        self.notify(delta, source);
        Ok(())
    }

    fn on_change(&mut self, listener: ChangeListener) {
        self.listeners.push(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn recording(buffer: &mut RichTextBuffer) -> Arc<Mutex<Vec<EditorChange>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        buffer.on_change(Box::new(move |c| sink.lock().unwrap().push(c.clone())));
        seen
    }

    #[test]
    fn test_insert_and_delete() {
        let mut buffer = RichTextBuffer::new();
        buffer.insert_text(0, "hello", ChangeSource::User).unwrap();
        buffer.insert_text(5, " world", ChangeSource::User).unwrap();
        buffer.delete_text(0, 6, ChangeSource::User).unwrap();
        assert_eq!(buffer.contents(), "world");
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_silent_changes_do_not_notify() {
        let mut buffer = RichTextBuffer::new();
        let seen = recording(&mut buffer);

        buffer.insert_text(0, "a", ChangeSource::Silent).unwrap();
        buffer.insert_text(1, "b", ChangeSource::Api).unwrap();
        buffer.insert_text(2, "c", ChangeSource::User).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].source, ChangeSource::Api);
        assert_eq!(seen[1].source, ChangeSource::User);
        assert_eq!(seen[1].len_after, 3);
    }

    #[test]
    fn test_out_of_range_leaves_buffer_untouched() {
        let mut buffer = RichTextBuffer::new();
        buffer.insert_text(0, "abc", ChangeSource::Silent).unwrap();
        let err = buffer
            .update_contents(&Delta::new().insert("x").retain(10), ChangeSource::User)
            .unwrap_err();
        assert!(matches!(err, EditorError::OutOfRange { .. }));
        assert_eq!(buffer.contents(), "abc");
    }

    #[test]
    fn test_retain_near_u32_max_is_out_of_range() {
        let mut buffer = RichTextBuffer::new();
        buffer.insert_text(0, "abc", ChangeSource::Silent).unwrap();
        let err = buffer
            .update_contents(&Delta::new().insert("x").retain(u32::MAX), ChangeSource::User)
            .unwrap_err();
        assert_eq!(
            err,
            EditorError::OutOfRange {
                position: u32::MAX,
                len: 4
            }
        );
        assert_eq!(buffer.contents(), "abc");
    }

    #[test]
    fn test_surrogate_split_is_rejected() {
        let mut buffer = RichTextBuffer::new();
        buffer.insert_text(0, "😀", ChangeSource::Silent).unwrap();
        let err = buffer.insert_text(1, "x", ChangeSource::User).unwrap_err();
        assert_eq!(err, EditorError::SplitCharacter { position: 0 });
    }

    #[test]
    fn test_formatting_runs() {
        let mut buffer = RichTextBuffer::new();
        buffer.insert_text(0, "hello world", ChangeSource::Silent).unwrap();

        let mut bold = Attributes::new();
        bold.insert("bold".into(), json!(true));
        buffer.format_text(0, 5, bold.clone(), ChangeSource::User).unwrap();

        assert_eq!(buffer.attributes_at(0), Some(&bold));
        assert_eq!(
            buffer.to_delta(),
            Delta::new().insert_with("hello", bold).insert(" world")
        );

        let mut unbold = Attributes::new();
        unbold.insert("bold".into(), serde_json::Value::Null);
        buffer.format_text(0, 5, unbold, ChangeSource::User).unwrap();
        assert_eq!(buffer.to_delta(), Delta::new().insert("hello world"));
    }

    #[test]
    fn test_set_contents_replaces_everything() {
        let mut buffer = RichTextBuffer::new();
        buffer.insert_text(0, "old", ChangeSource::Silent).unwrap();
        let seen = recording(&mut buffer);

        buffer
            .set_contents(&Delta::new().insert("new text"), ChangeSource::Api)
            .unwrap();
        assert_eq!(buffer.contents(), "new text");

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].delta, Delta::new().delete(3).insert("new text"));
    }
}
