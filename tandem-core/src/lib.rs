//! # tandem-core — shared document and editor binding
//!
//! ```text
//! ┌────────────────┐  User deltas   ┌────────────────┐
//! │ EditorSurface  │ ─────────────► │ EditorBinding  │
//! │ (rich text UI) │ ◄───────────── │ (origin tags)  │
//! └────────────────┘ Silent deltas  └───────┬────────┘
//!                                           │
//!                                           ▼
//!                                  ┌─────────────────┐
//!                                  │ DocumentHandle  │──► UpdateBatch stream
//!                                  │  └ TextContainer│◄── merged remote updates
//!                                  └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`document`] — yrs document, named text containers, update stream
//! - [`delta`] — retain/insert/delete change descriptions
//! - [`editor`] — editor seam and a headless rich-text buffer
//! - [`binding`] — keeps an editor and a text container convergent
//! - [`replica`] — contract shared by every replica implementation

pub mod binding;
pub mod delta;
#[cfg(feature = "diagnostics")]
pub mod diagnostics;
pub mod document;
pub mod editor;
pub mod error;
pub mod replica;

pub use binding::{should_apply, EditorBinding};
pub use delta::{utf16_len, Attributes, Delta, DeltaOp};
#[cfg(feature = "diagnostics")]
pub use diagnostics::{ConnectionSnapshot, DiagnosticSnapshot};
pub use document::{
    CommitSubscription, DocumentHandle, ProducerId, TextChange, TextContainer, UpdateBatch,
    EMPTY_UPDATE,
};
pub use editor::{ChangeListener, ChangeSource, EditorChange, EditorSurface, RichTextBuffer};
pub use error::{BindingError, DocumentError, EditorError, SyncDirection};
pub use replica::{exchange, OperationLog, ReplicaText};

/// Name of the shared text container editors bind to.
pub const DEFAULT_TEXT_NAME: &str = "quill";
