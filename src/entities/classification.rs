// 🏷️ Classification Record - groups a subject's transactions
//
// Matched by `(title == lookup key, row == discriminant)`. The store does the
// matching through `ClassificationRecord::query`; the id comes from the
// document, not from its body.

use crate::error::StoreError;
use crate::store::{Document, Query};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    #[serde(skip)]
    pub id: String,

    #[serde(default)]
    pub title: String,

    /// Discriminant distinguishing project categories from other rows.
    /// Stored as a plain JSON number, so `3` and `3.0` are the same row.
    #[serde(default)]
    pub row: Option<f64>,
}

impl ClassificationRecord {
    /// Live query for the classifications matching `lookup_key` on `row`
    pub fn query(collection: &str, lookup_key: &str, row: i64) -> Query {
        Query::new(collection)
            .where_eq("title", lookup_key)
            .where_eq("row", row)
    }

    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let mut record: ClassificationRecord = doc.decode()?;
        record.id = doc.id.clone();
        Ok(record)
    }
}

/// Id of the first classification in store order.
///
/// The documents come from `ClassificationRecord::query`, so they already
/// match; bodies are not decoded again here.
pub fn first_id(docs: &[Document]) -> Option<String> {
    docs.first().map(|doc| doc.id.clone())
}
