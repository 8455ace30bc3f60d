use thiserror::Error;

/// Failures while reading or mutating a replicated document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DocumentError {
    #[error("failed to decode update: {0}")]
    Decode(String),
    #[error("failed to apply update: {0}")]
    Apply(String),
    #[error("position {index}+{len} is outside text of length {text_len}")]
    OutOfRange { index: u32, len: u32, text_len: u32 },
    /// The replica lives elsewhere and can no longer be reached.
    #[error("replica unavailable: {0}")]
    Unavailable(String),
}

impl From<yrs::encoding::read::Error> for DocumentError {
    fn from(e: yrs::encoding::read::Error) -> Self {
        DocumentError::Decode(e.to_string())
    }
}

/// Failures raised by an editor surface when a delta cannot be applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditorError {
    #[error("delta reaches position {position} but the editor holds {len} units")]
    OutOfRange { position: u32, len: u32 },
    #[error("delta boundary at {position} splits a surrogate pair")]
    SplitCharacter { position: u32 },
}

/// Which way an edit was travelling when the buffers were found to differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    EditorToDocument,
    DocumentToEditor,
}

/// Failures of an editor binding.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindingError {
    /// The editor and the shared text no longer agree. Never repaired.
    #[error(
        "editor ({editor_len} units) and shared text ({container_len} units) diverged after {direction:?}"
    )]
    Diverged {
        editor_len: u32,
        container_len: u32,
        direction: SyncDirection,
    },
    #[error("editor rejected delta: {0}")]
    Editor(#[from] EditorError),
    #[error("document rejected delta: {0}")]
    Document(#[from] DocumentError),
    #[error("editor lock poisoned")]
    Poisoned,
}
