use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One line of the conversation attached to a result. Never interpreted by
/// the workflow; it is stored and handed back as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatNote {
    pub speaker: String,
    pub text: String,
}

impl ChatNote {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatAnnotations {
    notes: IndexMap<String, Vec<ChatNote>>,
}

impl ChatAnnotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, key: &str, note: ChatNote) {
        self.notes.entry(key.to_string()).or_default().push(note);
    }

    pub fn notes(&self, key: &str) -> &[ChatNote] {
        self.notes.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.notes.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.notes.values().all(Vec::is_empty)
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }
}
