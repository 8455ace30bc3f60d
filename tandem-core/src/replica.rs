//! The contract every replica of the shared text must satisfy.
//!
//! The primary process and the sandboxed participant each host their own
//! replica. Both implement [`ReplicaText`]; an [`OperationLog`] replayed into
//! either one must produce the same content, and updates exchanged between
//! them must merge to the same result.

use serde::{Deserialize, Serialize};

use crate::delta::Delta;
use crate::document::TextContainer;
use crate::error::DocumentError;

/// Text-container API plus the encode/merge operations replication needs.
pub trait ReplicaText {
    /// Apply a local edit as one operation batch.
    fn apply_delta(&self, delta: &Delta) -> Result<(), DocumentError>;

    fn content(&self) -> String;

    fn state_vector(&self) -> Result<Vec<u8>, DocumentError>;

    fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>, DocumentError>;

    fn merge_update(&self, update: &[u8]) -> Result<(), DocumentError>;
}

impl ReplicaText for TextContainer {
    fn apply_delta(&self, delta: &Delta) -> Result<(), DocumentError> {
        TextContainer::apply_delta(self, None, delta)
    }

    fn content(&self) -> String {
        TextContainer::content(self)
    }

    fn state_vector(&self) -> Result<Vec<u8>, DocumentError> {
        Ok(TextContainer::state_vector(self))
    }

    fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>, DocumentError> {
        TextContainer::encode_diff(self, remote_state_vector)
    }

    fn merge_update(&self, update: &[u8]) -> Result<(), DocumentError> {
        self.merge_update(None, update).map(|_| ())
    }
}

/// Bring two replicas up to date with each other.
pub fn exchange<A, B>(a: &A, b: &B) -> Result<(), DocumentError>
where
    A: ReplicaText + ?Sized,
    B: ReplicaText + ?Sized,
{
    let for_b = a.encode_diff(&b.state_vector()?)?;
    let for_a = b.encode_diff(&a.state_vector()?)?;
    b.merge_update(&for_b)?;
    a.merge_update(&for_a)?;
    Ok(())
}

/// An ordered record of edit batches that can be replayed into any replica.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationLog {
    batches: Vec<Delta>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: Delta) {
        self.batches.push(delta);
    }

    pub fn batches(&self) -> &[Delta] {
        &self.batches
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Apply every batch in order. Stops at the first rejected batch.
    pub fn replay<R: ReplicaText + ?Sized>(&self, replica: &R) -> Result<(), DocumentError> {
        for delta in &self.batches {
            replica.apply_delta(delta)?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
