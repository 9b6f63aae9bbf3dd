//! Core data models used throughout docsift.
//!
//! These types represent the documents, watermarks, and vector entries that
//! flow from connectors through the ingestion queue into the indices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// What a document represents in its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Document,
    Page,
    Message,
    Task,
    Comment,
}

/// Content format hint for a document body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Markdown,
    Text,
    Html,
    Pdf,
    Unknown,
}

impl FileType {
    /// Guess a file type from a path or file name extension.
    pub fn from_extension(name: &str) -> Self {
        let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("md") | Some("markdown") => FileType::Markdown,
            Some("txt") | Some("text") | Some("rst") => FileType::Text,
            Some("html") | Some("htm") => FileType::Html,
            Some("pdf") => FileType::Pdf,
            _ => FileType::Unknown,
        }
    }
}

/// Normalized document produced by a connector.
///
/// Documents are never mutated after creation. A changed item arrives as a
/// new value with the same `id` and a newer `modified_at`, and indexing it
/// overwrites the earlier entry in both indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier, unique within `source_id`.
    pub id: String,
    /// Owning source instance (e.g. `"filesystem:docs"`).
    pub source_id: String,
    pub kind: DocumentKind,
    pub title: String,
    pub content: String,
    pub author: String,
    pub author_image_url: String,
    pub location: String,
    pub url: String,
    pub modified_at: DateTime<Utc>,
    pub file_type: FileType,
}

impl Document {
    /// Key used by indices that are shared across sources.
    pub fn key(&self) -> String {
        document_key(&self.source_id, &self.id)
    }

    /// Text handed to the embedding provider: content, or the title when
    /// the content is empty.
    pub fn embedding_text(&self) -> &str {
        if self.content.trim().is_empty() {
            &self.title
        } else {
            &self.content
        }
    }

    /// Text handed to the lexical index.
    pub fn lexical_text(&self) -> String {
        match (self.title.trim().is_empty(), self.content.trim().is_empty()) {
            (false, false) => format!("{}\n\n{}", self.title, self.content),
            (false, true) => self.title.clone(),
            _ => self.content.clone(),
        }
    }

    /// Check that the document carries enough to be indexed.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.id.trim().is_empty() {
            return Err(IngestError::MalformedDocument(format!(
                "document from '{}' has an empty id",
                self.source_id
            )));
        }
        if self.title.trim().is_empty() && self.content.trim().is_empty() {
            return Err(IngestError::MalformedDocument(format!(
                "document '{}' has neither title nor content",
                self.key()
            )));
        }
        Ok(())
    }
}

/// Build the cross-source key for a document: `"{source_id}:{id}"`.
pub fn document_key(source_id: &str, id: &str) -> String {
    format!("{}:{}", source_id, id)
}

/// Per-source cursor: the most recent successfully enqueued modification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark {
    pub last_index_time: DateTime<Utc>,
}

impl Watermark {
    pub fn new(last_index_time: DateTime<Utc>) -> Self {
        Self { last_index_time }
    }

    /// Move the watermark forward to `candidate`. Never moves backwards.
    pub fn advance(&mut self, candidate: DateTime<Utc>) -> bool {
        if candidate > self.last_index_time {
            self.last_index_time = candidate;
            true
        } else {
            false
        }
    }

    /// True when `ts` is strictly older than this watermark.
    pub fn is_stale(&self, ts: DateTime<Utc>) -> bool {
        ts < self.last_index_time
    }
}

/// A single `(numeric_id, embedding)` pair for a vector backend.
///
/// The namespace is a property of the [`VectorIndex`](crate::vector::VectorIndex)
/// handle that writes the entry.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub numeric_id: u64,
    pub embedding: Vec<f32>,
}

impl VectorEntry {
    pub fn new(numeric_id: u64, embedding: Vec<f32>) -> Self {
        Self {
            numeric_id,
            embedding,
        }
    }
}

/// A document in flight between a poller and the indexer.
///
/// `watermark` is the watermark the fetch cycle ran against; the indexer
/// uses it as the staleness floor for this document.
#[derive(Debug, Clone)]
pub struct QueuedDocument {
    pub document: Document,
    pub watermark: Option<DateTime<Utc>>,
}

impl QueuedDocument {
    pub fn new(document: Document, watermark: Option<DateTime<Utc>>) -> Self {
        Self {
            document,
            watermark,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_document(source_id: &str, id: &str, content: &str) -> Document {
    Document {
        id: id.to_string(),
        source_id: source_id.to_string(),
        kind: DocumentKind::Document,
        title: format!("title {}", id),
        content: content.to_string(),
        author: String::new(),
        author_image_url: String::new(),
        location: String::new(),
        url: String::new(),
        modified_at: chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 1, 2, 0, 0, 0).unwrap(),
        file_type: FileType::Markdown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_validate_rejects_empty_id() {
        let mut doc = test_document("fs", "a", "body");
        doc.id = "  ".to_string();
        assert!(matches!(
            doc.validate(),
            Err(IngestError::MalformedDocument(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_title_and_content() {
        let mut doc = test_document("fs", "a", "");
        doc.title.clear();
        assert!(doc.validate().is_err());
    }

    #[test]
    fn test_embedding_text_falls_back_to_title() {
        let doc = test_document("fs", "a", "");
        assert_eq!(doc.embedding_text(), "title a");
        let doc = test_document("fs", "b", "real body");
        assert_eq!(doc.embedding_text(), "real body");
    }

    #[test]
    fn test_watermark_never_moves_backwards() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t0 = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let mut wm = Watermark::new(t1);
        assert!(!wm.advance(t0));
        assert_eq!(wm.last_index_time, t1);
        assert!(wm.is_stale(t0));
        assert!(!wm.is_stale(t1));
    }

    #[test]
    fn test_file_type_from_extension() {
        assert_eq!(FileType::from_extension("notes/a.MD"), FileType::Markdown);
        assert_eq!(FileType::from_extension("b.txt"), FileType::Text);
        assert_eq!(FileType::from_extension("noext"), FileType::Unknown);
    }
}
