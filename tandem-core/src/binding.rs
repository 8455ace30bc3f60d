//! Two-way binding between a shared text container and an editor.
//!
//! ```text
//!   editor (User change) ──► apply_delta(tag = binding id) ──► TextContainer
//!                                                                 │ observe
//!                                                                 ▼
//!   editor ◄── update_contents(Silent) ◄── on_commit drain ◄── inbox
//! ```
//!
//! Every batch written by the binding carries its [`ProducerId`]. The
//! container listener runs every change through [`should_apply`] and only
//! queues batches produced by someone else, so a local edit is written
//! once and never echoed back into the editor.
//!
//! The listener runs inside the committing transaction and never touches
//! the editor. Queued changes are drained into the editor by a commit hook
//! once the transaction is released, so locks are always taken in the
//! order editor, then document. A local edit that races a queued remote
//! change is rebased onto it inside the write transaction, and the queued
//! change is rebased past the local edit before it reaches the editor.
//!
//! After each drain the editor and container lengths are compared. A
//! mismatch means the translation is broken; the binding records it, logs
//! it and refuses every further local edit rather than spreading a
//! corrupted document to peers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use yrs::Subscription;

use crate::delta::Delta;
use crate::document::{CommitSubscription, ProducerId, TextChange, TextContainer};
use crate::editor::{ChangeSource, EditorChange, EditorSurface};
use crate::error::{BindingError, SyncDirection};

/// Whether a container change must be replayed into the editor bound by `own`.
pub fn should_apply(own: ProducerId, change: &TextChange) -> bool {
    change.producer != Some(own) && !change.delta.is_empty()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Shared between the binding and the listeners it registers.
#[derive(Default)]
struct BindingHealth {
    divergence: Mutex<Option<BindingError>>,
    detached: AtomicBool,
}

impl BindingHealth {
    fn fail(&self, error: BindingError) {
        log::error!("editor binding failed: {error}");
        // Keep the first failure; later ones are consequences.
        lock(&self.divergence).get_or_insert(error);
    }

    fn check(&self) -> Result<(), BindingError> {
        match lock(&self.divergence).as_ref() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn verify(&self, editor_len: u32, container_len: u32, direction: SyncDirection) {
        if editor_len != container_len {
            self.fail(BindingError::Diverged {
                editor_len,
                container_len,
                direction,
            });
        }
    }
}

/// Remote changes committed to the container but not yet in the editor.
///
/// Each entry applies on top of the editor state left by the one before.
#[derive(Default)]
struct Inbox {
    pending: Mutex<VecDeque<Delta>>,
}

impl Inbox {
    fn push(&self, delta: Delta) {
        lock(&self.pending).push_back(delta);
    }

    fn pop(&self) -> Option<Delta> {
        lock(&self.pending).pop_front()
    }

    fn is_empty(&self) -> bool {
        lock(&self.pending).is_empty()
    }

    fn clear(&self) {
        lock(&self.pending).clear();
    }

    /// Rebase a local edit, made on an editor that has not seen the queued
    /// changes, onto the container. The queued changes are rebased past it
    /// in turn. Must run inside the write transaction.
    fn rebase(&self, local: &Delta) -> Delta {
        let mut pending = lock(&self.pending);
        let mut local = local.clone();
        for queued in pending.iter_mut() {
            let rebased = queued.transform(&local, true);
            *queued = local.transform(queued, false);
            local = rebased;
        }
        local
    }
}

/// Keeps one editor and one text container convergent.
pub struct EditorBinding<E: EditorSurface + 'static> {
    id: ProducerId,
    text: TextContainer,
    editor: Arc<Mutex<E>>,
    health: Arc<BindingHealth>,
    _subscription: Subscription,
    _drain: CommitSubscription,
}

impl<E: EditorSurface + 'static> EditorBinding<E> {
    /// Bind `editor` to `text`.
    ///
    /// The editor is first reset to the container's content; only then are
    /// local edits forwarded. Remote changes that commit while binding are
    /// queued and reach the editor right after.
    ///
    /// Whoever holds the editor's lock must not edit another editor bound to
    /// the same document until it lets go.
    pub fn bind(text: TextContainer, editor: Arc<Mutex<E>>) -> Result<Self, BindingError> {
        let id = ProducerId::next();
        let health = Arc::new(BindingHealth::default());
        let inbox = Arc::new(Inbox::default());

        let queue = inbox.clone();
        let subscription = text.observe(move |change| {
            if should_apply(id, &change) {
                queue.push(change.delta);
            }
        });

        let drain = {
            let (editor, inbox, text, health) =
                (editor.clone(), inbox.clone(), text.clone(), health.clone());
            // Our own commits happen under the editor lock; skip them.
            text.clone().on_commit(move |producer| {
                if producer != Some(id) {
                    drain_remote(&editor, &inbox, &text, &health);
                }
            })
        };

        {
            let mut surface = editor.lock().map_err(|_| BindingError::Poisoned)?;
            // Everything queued so far is already in the snapshot.
            let (initial, container_len) = text.snapshot_with(|delta, len| {
                inbox.clear();
                (delta, len)
            });
            surface.set_contents(&initial, ChangeSource::Silent)?;
            let editor_len = surface.len();
            if editor_len != container_len {
                return Err(BindingError::Diverged {
                    editor_len,
                    container_len,
                    direction: SyncDirection::DocumentToEditor,
                });
            }

            let (text, inbox, health) = (text.clone(), inbox.clone(), health.clone());
            surface.on_change(Box::new(move |change: &EditorChange| {
                forward_local_change(id, &text, &inbox, &health, change);
            }));
        }

        log::debug!("bound editor to text '{}' as {id}", text.name());
        Ok(Self {
            id,
            text,
            editor,
            health,
            _subscription: subscription,
            _drain: drain,
        })
    }

    /// The origin tag written on every batch this binding produces.
    pub fn id(&self) -> ProducerId {
        self.id
    }

    pub fn text(&self) -> &TextContainer {
        &self.text
    }

    pub fn editor(&self) -> &Arc<Mutex<E>> {
        &self.editor
    }

    /// `Err` once the binding has seen the buffers diverge.
    pub fn check(&self) -> Result<(), BindingError> {
        self.health.check()
    }
}

impl<E: EditorSurface + 'static> Drop for EditorBinding<E> {
    fn drop(&mut self) {
        // The editor keeps the listener; make it inert.
        self.health.detached.store(true, Ordering::Release);
    }
}

/// Editor → container. Runs inside the editor's change notification, so
/// the editor lock is held.
fn forward_local_change(
    id: ProducerId,
    text: &TextContainer,
    inbox: &Inbox,
    health: &BindingHealth,
    change: &EditorChange,
) {
    if change.source != ChangeSource::User || health.detached.load(Ordering::Acquire) {
        return;
    }
    if let Err(error) = health.check() {
        log::error!("dropping local edit, binding is unusable: {error}");
        return;
    }
    match text.apply_delta_with(Some(id), || inbox.rebase(&change.delta)) {
        // With remote changes still queued the lengths legitimately differ;
        // the drain compares them once the queue is empty.
        Ok(()) => {
            if let Some(container_len) = text.len_with(|len| inbox.is_empty().then_some(len)) {
                health.verify(change.len_after, container_len, SyncDirection::EditorToDocument);
            }
        }
        Err(error) => health.fail(error.into()),
    }
}

/// Container → editor. Runs from a commit hook, outside any transaction.
fn drain_remote<E: EditorSurface>(
    editor: &Mutex<E>,
    inbox: &Inbox,
    text: &TextContainer,
    health: &BindingHealth,
) {
    if inbox.is_empty() || health.detached.load(Ordering::Acquire) {
        return;
    }
    let Ok(mut surface) = editor.lock() else {
        health.fail(BindingError::Poisoned);
        return;
    };
    while let Some(delta) = inbox.pop() {
        if let Err(error) = surface.update_contents(&delta, ChangeSource::Silent) {
            health.fail(error.into());
            return;
        }
    }
    let editor_len = surface.len();
    if let Some(container_len) = text.len_with(|len| inbox.is_empty().then_some(len)) {
        health.verify(editor_len, container_len, SyncDirection::DocumentToEditor);
    }
}
