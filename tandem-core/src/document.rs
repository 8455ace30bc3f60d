//! Document handle and shared text containers.
//!
//! Every mutation goes through a yrs transaction tagged with the
//! [`ProducerId`] of whoever made it. Once a transaction commits, its
//! update is published as an [`UpdateBatch`] so network providers can
//! forward it without re-reading the document.
//!
//! ```text
//!  EditorBinding ──apply_delta(tag)──┐
//!                                    ▼
//!                              yrs::Doc (UTF-16)
//!  Provider ─────apply_update(tag)──▲  │
//!                                      ▼
//!                         broadcast<UpdateBatch> ──► Provider(s)
//! ```
//!
//! Text observers run while the committing transaction still holds the
//! document, so they must not block on anything another writer may hold.
//! Work that needs other locks belongs in an [`TextContainer::on_commit`]
//! hook, which runs on the committing thread once the transaction is
//! released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::broadcast;
use yrs::types::text::{TextEvent, YChange};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Doc, GetString, Observable, OffsetKind, Options, Origin, ReadTxn, StateVector, Subscription,
    Text, TextRef, Transact, TransactionMut, Update,
};

use crate::delta::{json_to_attrs, Attributes, Delta, DeltaOp};
use crate::error::DocumentError;

/// A v1 update that carries no structs and no deletions.
pub const EMPTY_UPDATE: &[u8] = &[0, 0];

/// Buffered update batches per subscriber before it starts lagging.
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

static NEXT_PRODUCER: AtomicU64 = AtomicU64::new(1);

/// Identity of a component that produces operations on a document.
///
/// Bindings and providers each take one at construction; the id travels
/// as the transaction origin so listeners can tell who made a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProducerId(u64);

impl ProducerId {
    /// Allocate a process-unique producer id.
    pub fn next() -> Self {
        Self(NEXT_PRODUCER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub(crate) fn to_origin(self) -> Origin {
        Origin::from(&self.0.to_be_bytes()[..])
    }

    pub(crate) fn from_origin(origin: &Origin) -> Option<Self> {
        let bytes: [u8; 8] = origin.as_ref().try_into().ok()?;
        Some(Self(u64::from_be_bytes(bytes)))
    }
}

impl std::fmt::Display for ProducerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "producer#{}", self.0)
    }
}

/// One committed transaction, encoded as a yrs v1 update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateBatch {
    /// Who produced it. `None` for untagged local changes.
    pub producer: Option<ProducerId>,
    pub update: Arc<[u8]>,
}

/// A change observed on a text container.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChange {
    pub producer: Option<ProducerId>,
    pub delta: Delta,
    /// Container length after the change, in UTF-16 units.
    pub len: u32,
}

type CommitHook = Arc<dyn Fn(Option<ProducerId>) + Send + Sync>;

#[derive(Default)]
struct CommitHooks {
    next_id: AtomicU64,
    hooks: Mutex<Vec<(u64, CommitHook)>>,
}

impl CommitHooks {
    fn lock(&self) -> MutexGuard<'_, Vec<(u64, CommitHook)>> {
        match self.hooks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Keeps an [`TextContainer::on_commit`] hook registered until dropped.
pub struct CommitSubscription {
    hooks: Weak<CommitHooks>,
    id: u64,
}

impl Drop for CommitSubscription {
    fn drop(&mut self) {
        if let Some(hooks) = self.hooks.upgrade() {
            hooks.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

/// The yrs document plus the channel its committed updates go out on.
#[derive(Clone)]
struct Replica {
    doc: Doc,
    updates: broadcast::Sender<UpdateBatch>,
    hooks: Arc<CommitHooks>,
}

impl Replica {
    fn transact(&self, producer: Option<ProducerId>) -> TransactionMut<'_> {
        match producer {
            Some(p) => self.doc.transact_mut_with(p.to_origin()),
            None => self.doc.transact_mut(),
        }
    }

    fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>, DocumentError> {
        let sv = StateVector::decode_v1(remote_state_vector)?;
        let txn = self.doc.transact();
        Ok(txn.encode_diff_v1(&sv))
    }

    fn apply_update(
        &self,
        producer: Option<ProducerId>,
        update: &[u8],
    ) -> Result<Option<Vec<u8>>, DocumentError> {
        if update == EMPTY_UPDATE {
            return Ok(None);
        }
        let decoded = Update::decode_v1(update)?;
        let before = {
            let txn = self.doc.transact();
            txn.state_vector()
        };
        {
            let mut txn = self.transact(producer);
            txn.apply_update(decoded)
                .map_err(|e| DocumentError::Apply(e.to_string()))?;
        }
        self.after_commit(producer);
        let diff = {
            let txn = self.doc.transact();
            txn.encode_diff_v1(&before)
        };
        if diff.as_slice() == EMPTY_UPDATE {
            return Ok(None);
        }
        self.publish(producer, diff.clone());
        Ok(Some(diff))
    }

    /// Run commit hooks. Must be called with no transaction held.
    fn after_commit(&self, producer: Option<ProducerId>) {
        let hooks: Vec<CommitHook> = self
            .hooks
            .lock()
            .iter()
            .map(|(_, hook)| hook.clone())
            .collect();
        for hook in hooks {
            hook(producer);
        }
    }

    fn publish(&self, producer: Option<ProducerId>, update: Vec<u8>) {
        if update.as_slice() == EMPTY_UPDATE {
            return;
        }
        log::trace!("publishing {} byte update from {producer:?}", update.len());
        // No subscribers is fine; nobody is forwarding yet.
        let _ = self.updates.send(UpdateBatch {
            producer,
            update: update.into(),
        });
    }
}

struct DocumentInner {
    replica: Replica,
    texts: Mutex<HashMap<String, TextContainer>>,
}

/// Owns one replicated document. Cheap to clone; clones share the document.
#[derive(Clone)]
pub struct DocumentHandle {
    inner: Arc<DocumentInner>,
}

impl DocumentHandle {
    /// Create a fresh document with no network identity.
    pub fn new() -> Self {
        Self::with_options(Options {
            offset_kind: OffsetKind::Utf16,
            ..Options::default()
        })
    }

    /// Create a document with a fixed client id (deterministic tests).
    pub fn with_client_id(client_id: u64) -> Self {
        Self::with_options(Options {
            client_id,
            offset_kind: OffsetKind::Utf16,
            ..Options::default()
        })
    }

    fn with_options(options: Options) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(DocumentInner {
                replica: Replica {
                    doc: Doc::with_options(options),
                    updates,
                    hooks: Arc::default(),
                },
                texts: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Return the named text container, creating it on first use.
    ///
    /// Repeated calls with the same name return the same container.
    pub fn text(&self, name: &str) -> TextContainer {
        let mut texts = match self.inner.texts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        texts
            .entry(name.to_string())
            .or_insert_with(|| TextContainer {
                inner: Arc::new(TextInner {
                    name: name.to_string(),
                    text: self.inner.replica.doc.get_or_insert_text(name),
                    replica: self.inner.replica.clone(),
                }),
            })
            .clone()
    }

    pub fn client_id(&self) -> u64 {
        self.inner.replica.doc.client_id()
    }

    /// Subscribe to every committed update batch from now on.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<UpdateBatch> {
        self.inner.replica.updates.subscribe()
    }

    /// Encoded state vector (what this replica has seen).
    pub fn state_vector(&self) -> Vec<u8> {
        self.inner.replica.state_vector()
    }

    /// Everything this replica has that `remote_state_vector` lacks.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>, DocumentError> {
        self.inner.replica.encode_diff(remote_state_vector)
    }

    /// The whole document as one update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        let txn = self.inner.replica.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Merge an encoded update through the library's merge path.
    ///
    /// Returns the diff the update actually contributed, or `None` when it
    /// was empty or already known. The contribution is published under
    /// `producer` so the provider that received it can skip echoing it.
    pub fn apply_update(
        &self,
        producer: Option<ProducerId>,
        update: &[u8],
    ) -> Result<Option<Vec<u8>>, DocumentError> {
        self.inner.replica.apply_update(producer, update)
    }
}

impl Default for DocumentHandle {
    fn default() -> Self {
        Self::new()
    }
}

struct TextInner {
    name: String,
    text: TextRef,
    replica: Replica,
}

/// A named shared text inside a [`DocumentHandle`].
#[derive(Clone)]
pub struct TextContainer {
    inner: Arc<TextInner>,
}

impl TextContainer {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether two handles refer to the same underlying container.
    pub fn same_container(&self, other: &TextContainer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Length in UTF-16 units.
    pub fn len(&self) -> u32 {
        let txn = self.inner.replica.doc.transact();
        self.inner.text.len(&txn)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Plain text content.
    pub fn content(&self) -> String {
        let txn = self.inner.replica.doc.transact();
        self.inner.text.get_string(&txn)
    }

    /// Current content as a delta of formatted inserts.
    pub fn to_delta(&self) -> Delta {
        let txn = self.inner.replica.doc.transact();
        self.delta_in(&txn)
    }

    /// Run `f` on the current length while holding a read transaction.
    ///
    /// No change can commit until `f` returns.
    pub fn len_with<R>(&self, f: impl FnOnce(u32) -> R) -> R {
        let txn = self.inner.replica.doc.transact();
        f(self.inner.text.len(&txn))
    }

    /// Run `f` on the current content and length while holding a read
    /// transaction.
    ///
    /// No change can commit until `f` returns.
    pub fn snapshot_with<R>(&self, f: impl FnOnce(Delta, u32) -> R) -> R {
        let txn = self.inner.replica.doc.transact();
        let delta = self.delta_in(&txn);
        f(delta, self.inner.text.len(&txn))
    }

    fn delta_in<T: ReadTxn>(&self, txn: &T) -> Delta {
        let diffs = self.inner.text.diff(txn, YChange::identity);
        Delta::from_ops(
            diffs
                .into_iter()
                .map(|d| {
                    DeltaOp::from_yrs(&yrs::types::Delta::Inserted(d.insert, d.attributes), txn)
                })
                .collect(),
        )
    }

    pub fn insert(
        &self,
        producer: Option<ProducerId>,
        index: u32,
        chunk: &str,
    ) -> Result<(), DocumentError> {
        self.apply_delta(producer, &Delta::new().retain(index).insert(chunk))
    }

    pub fn delete(
        &self,
        producer: Option<ProducerId>,
        index: u32,
        len: u32,
    ) -> Result<(), DocumentError> {
        self.apply_delta(producer, &Delta::new().retain(index).delete(len))
    }

    pub fn format(
        &self,
        producer: Option<ProducerId>,
        index: u32,
        len: u32,
        attributes: Attributes,
    ) -> Result<(), DocumentError> {
        self.apply_delta(
            producer,
            &Delta::new().retain(index).retain_with(len, attributes),
        )
    }

    /// Apply a whole delta as one transaction, producing one update batch.
    ///
    /// The delta is checked against the current length before anything is
    /// written, so a rejected delta leaves the container untouched.
    pub fn apply_delta(
        &self,
        producer: Option<ProducerId>,
        delta: &Delta,
    ) -> Result<(), DocumentError> {
        if delta.is_empty() {
            return Ok(());
        }
        self.apply_delta_with(producer, || delta.clone())
    }

    /// Like [`apply_delta`](Self::apply_delta), but the delta is produced by
    /// `build` inside the write transaction.
    ///
    /// Nothing else can commit between `build` returning and the delta being
    /// written, so `build` can rebase an edit onto the container's exact
    /// current state.
    pub fn apply_delta_with<F>(&self, producer: Option<ProducerId>, build: F) -> Result<(), DocumentError>
    where
        F: FnOnce() -> Delta,
    {
        let update = {
            let mut txn = self.inner.replica.transact(producer);
            let delta = build();
            if delta.is_empty() {
                return Ok(());
            }
            check_bounds(&delta, self.inner.text.len(&txn))?;
            self.write(&mut txn, &delta);
            txn.encode_update_v1()
        };
        self.inner.replica.after_commit(producer);
        self.inner.replica.publish(producer, update);
        Ok(())
    }

    fn write(&self, txn: &mut TransactionMut<'_>, delta: &Delta) {
        let text = &self.inner.text;
        let mut index = 0u32;
        for op in delta.ops() {
            match op {
                DeltaOp::Retain { retain, attributes } => {
                    if let Some(attrs) = attributes {
                        text.format(txn, index, *retain, json_to_attrs(attrs));
                    }
                    index += retain;
                }
                DeltaOp::Insert { insert, attributes } => {
                    match attributes {
                        Some(attrs) if !attrs.is_empty() => {
                            text.insert_with_attributes(txn, index, insert, json_to_attrs(attrs))
                        }
                        _ => text.insert(txn, index, insert),
                    }
                    index += crate::delta::utf16_len(insert);
                }
                DeltaOp::Delete { delete } => {
                    text.remove_range(txn, index, *delete);
                }
            }
        }
    }

    /// Register a listener for every change batch on this container.
    ///
    /// The listener runs synchronously while the transaction commits. The
    /// returned subscription unregisters it when dropped.
    pub fn observe<F>(&self, f: F) -> Subscription
    where
        F: Fn(TextChange) + Send + Sync + 'static,
    {
        self.inner.text.observe(move |txn, event: &TextEvent| {
            let producer = txn.origin().and_then(ProducerId::from_origin);
            let delta = Delta::from_ops(
                event
                    .delta(txn)
                    .iter()
                    .map(|d| DeltaOp::from_yrs(d, txn))
                    .collect(),
            );
            let len = event.target().len(txn);
            f(TextChange {
                producer,
                delta,
                len,
            })
        })
    }

    /// Register `hook` to run after every transaction on the owning document
    /// commits, with the transaction's producer.
    ///
    /// Hooks run on the committing thread once the transaction is released,
    /// in registration order. They may take other locks and open new
    /// transactions.
    pub fn on_commit<F>(&self, hook: F) -> CommitSubscription
    where
        F: Fn(Option<ProducerId>) + Send + Sync + 'static,
    {
        let hooks = &self.inner.replica.hooks;
        let id = hooks.next_id.fetch_add(1, Ordering::Relaxed);
        hooks.lock().push((id, Arc::new(hook)));
        CommitSubscription {
            hooks: Arc::downgrade(hooks),
            id,
        }
    }

    /// The owning document's state vector.
    pub fn state_vector(&self) -> Vec<u8> {
        self.inner.replica.state_vector()
    }

    /// The owning document's diff against `remote_state_vector`.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>, DocumentError> {
        self.inner.replica.encode_diff(remote_state_vector)
    }

    /// Merge an update into the owning document.
    pub fn merge_update(
        &self,
        producer: Option<ProducerId>,
        update: &[u8],
    ) -> Result<Option<Vec<u8>>, DocumentError> {
        self.inner.replica.apply_update(producer, update)
    }
}

/// Reject deltas that walk past the end of the text.
fn check_bounds(delta: &Delta, text_len: u32) -> Result<(), DocumentError> {
    let mut index = 0u32;
    let mut len = text_len;
    for op in delta.ops() {
        let span = match op {
            DeltaOp::Retain { retain, .. } => *retain,
            DeltaOp::Insert { insert, .. } => crate::delta::utf16_len(insert),
            DeltaOp::Delete { delete } => *delete,
        };
        let out_of_range = DocumentError::OutOfRange {
            index,
            len: span,
            text_len: len,
        };
        match op {
            DeltaOp::Retain { .. } => {
                index = index
                    .checked_add(span)
                    .filter(|end| *end <= len)
                    .ok_or(out_of_range)?;
            }
            DeltaOp::Insert { .. } => {
                (index, len) = index
                    .checked_add(span)
                    .zip(len.checked_add(span))
                    .ok_or(out_of_range)?;
            }
            DeltaOp::Delete { .. } => {
                index
                    .checked_add(span)
                    .filter(|end| *end <= len)
                    .ok_or(out_of_range)?;
                len -= span;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_lookup_is_idempotent() {
        let doc = DocumentHandle::new();
        let a = doc.text("quill");
        let b = doc.text("quill");
        let other = doc.text("other");

        assert!(a.same_container(&b));
        assert!(!a.same_container(&other));

        a.insert(None, 0, "shared").unwrap();
        assert_eq!(b.content(), "shared");
    }

    #[test]
    fn test_insert_delete_format() {
        let doc = DocumentHandle::new();
        let text = doc.text("quill");
        text.insert(None, 0, "hello world").unwrap();
        text.delete(None, 5, 6).unwrap();
        assert_eq!(text.content(), "hello");

        let mut bold = Attributes::new();
        bold.insert("bold".into(), json!(true));
        text.format(None, 0, 5, bold.clone()).unwrap();

        assert_eq!(text.to_delta(), Delta::new().insert_with("hello", bold));
    }

    #[test]
    fn test_out_of_range_delta_is_rejected_untouched() {
        let doc = DocumentHandle::new();
        let text = doc.text("quill");
        text.insert(None, 0, "abc").unwrap();

        let err = text
            .apply_delta(None, &Delta::new().insert("x").retain(2).delete(5))
            .unwrap_err();
        assert!(matches!(err, DocumentError::OutOfRange { .. }));
        assert_eq!(text.content(), "abc");
    }

    #[test]
    fn test_retain_past_u32_max_is_rejected() {
        let doc = DocumentHandle::new();
        let text = doc.text("quill");
        text.insert(None, 0, "abc").unwrap();

        let err = text
            .apply_delta(None, &Delta::new().insert("x").retain(u32::MAX))
            .unwrap_err();
        assert!(matches!(err, DocumentError::OutOfRange { index: 1, .. }));
        let err = text
            .apply_delta(None, &Delta::new().retain(2).delete(u32::MAX))
            .unwrap_err();
        assert!(matches!(err, DocumentError::OutOfRange { .. }));
        assert_eq!(text.content(), "abc");
    }

    #[test]
    fn test_commit_hooks_run_after_the_transaction() {
        let doc = DocumentHandle::new();
        let text = doc.text("quill");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let reader = text.clone();
        // Reading from the hook would block if the write were still open.
        let hook = text.on_commit(move |producer| {
            sink.lock().unwrap().push((producer, reader.content()));
        });

        let producer = ProducerId::next();
        text.insert(Some(producer), 0, "hi").unwrap();
        let remote = DocumentHandle::new();
        remote.text("quill").insert(None, 0, "yo").unwrap();
        doc.apply_update(None, &remote.encode_state_as_update()).unwrap();

        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[0], (Some(producer), "hi".to_string()));
            assert_eq!(seen[1].0, None);
            assert_eq!(seen[1].1.len(), 4);
        }

        drop(hook);
        text.insert(None, 0, "!").unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_apply_delta_with_builds_against_current_length() {
        let doc = DocumentHandle::new();
        let text = doc.text("quill");
        text.insert(None, 0, "abc").unwrap();

        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let _sub = text.observe(move |change| *sink.lock().unwrap() = Some(change.len));
        text.apply_delta_with(None, || Delta::new().retain(3).insert("d"))
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(4));
        // An empty build commits nothing.
        text.apply_delta_with(None, Delta::new).unwrap();
        assert_eq!(text.content(), "abcd");
        text.snapshot_with(|delta, len| {
            assert_eq!(delta, Delta::new().insert("abcd"));
            assert_eq!(len, 4);
        });
    }

    #[test]
    fn test_utf16_positions() {
        let doc = DocumentHandle::new();
        let text = doc.text("quill");
        text.insert(None, 0, "😀b").unwrap();
        assert_eq!(text.len(), 3);
        text.insert(None, 2, "a").unwrap();
        assert_eq!(text.content(), "😀ab");
    }

    #[test]
    fn test_local_edit_publishes_one_batch() {
        let doc = DocumentHandle::new();
        let text = doc.text("quill");
        let mut rx = doc.subscribe_updates();
        let producer = ProducerId::next();

        text.apply_delta(Some(producer), &Delta::new().insert("hi").insert(" there"))
            .unwrap();

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.producer, Some(producer));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_apply_update_converges_and_reports_contribution() {
        let a = DocumentHandle::new();
        let b = DocumentHandle::new();
        a.text("quill").insert(None, 0, "hello").unwrap();

        let update = a.encode_state_as_update();
        let contributed = b.apply_update(None, &update).unwrap();
        assert!(contributed.is_some());
        assert_eq!(b.text("quill").content(), "hello");

        // Second delivery adds nothing new.
        assert!(b.apply_update(None, &update).unwrap().is_none());
    }

    #[test]
    fn test_empty_update_is_ignored() {
        let doc = DocumentHandle::new();
        let mut rx = doc.subscribe_updates();
        assert!(doc.apply_update(None, EMPTY_UPDATE).unwrap().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_garbage_update_is_decode_error() {
        let doc = DocumentHandle::new();
        let err = doc.apply_update(None, &[0xFF, 0xFE, 0xFD]).unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Decode(_) | DocumentError::Apply(_)
        ));
    }

    #[test]
    fn test_encode_diff_against_state_vector() {
        let a = DocumentHandle::new();
        let b = DocumentHandle::new();
        a.text("quill").insert(None, 0, "abc").unwrap();

        let diff = a.encode_diff(&b.state_vector()).unwrap();
        b.apply_update(None, &diff).unwrap();
        assert_eq!(b.text("quill").content(), "abc");
    }

    #[test]
    fn test_observer_sees_producer_tag() {
        let doc = DocumentHandle::new();
        let text = doc.text("quill");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = text.observe(move |change| sink.lock().unwrap().push(change));

        let producer = ProducerId::next();
        text.insert(Some(producer), 0, "x").unwrap();
        text.insert(None, 1, "y").unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].producer, Some(producer));
        assert_eq!(seen[0].delta, Delta::new().insert("x"));
        assert_eq!(seen[0].len, 1);
        assert_eq!(seen[1].producer, None);
        assert_eq!(seen[1].delta, Delta::new().retain(1).insert("y"));
    }

    #[test]
    fn test_producer_origin_roundtrip() {
        let id = ProducerId::next();
        assert_eq!(ProducerId::from_origin(&id.to_origin()), Some(id));
    }
}
