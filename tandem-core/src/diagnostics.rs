//! Read-only inspection snapshot of a running participant.
//!
//! Built on demand from the owning components; nothing here is shared or
//! mutable after construction.

use serde::Serialize;

use crate::document::{DocumentHandle, ProducerId, TextContainer};

/// Connection details a provider contributes to a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSnapshot {
    pub url: String,
    pub room: String,
    pub should_connect: bool,
    pub state: String,
    pub queued_batches: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticSnapshot {
    pub client_id: u64,
    pub text_name: String,
    pub content: String,
    pub state_vector_len: usize,
    pub binding: Option<u64>,
    pub connection: Option<ConnectionSnapshot>,
}

impl DiagnosticSnapshot {
    pub fn capture(doc: &DocumentHandle, text: &TextContainer, binding: Option<ProducerId>) -> Self {
        Self {
            client_id: doc.client_id(),
            text_name: text.name().to_string(),
            content: text.content(),
            state_vector_len: doc.state_vector().len(),
            binding: binding.map(ProducerId::get),
            connection: None,
        }
    }

    pub fn with_connection(mut self, connection: ConnectionSnapshot) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture() {
        let doc = DocumentHandle::with_client_id(7);
        let text = doc.text("quill");
        text.insert(None, 0, "abc").unwrap();

        let snapshot = DiagnosticSnapshot::capture(&doc, &text, None);
        assert_eq!(snapshot.client_id, 7);
        assert_eq!(snapshot.content, "abc");
        assert!(snapshot.connection.is_none());
        assert!(snapshot.to_json_pretty().unwrap().contains("\"quill\""));
    }
}
