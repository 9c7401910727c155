// 💸 Transaction Record - one money movement tagged with a classification
//
// Only records whose `type` equals the expense tag contribute to the general
// expense, and they contribute their absolute amount.

use crate::error::StoreError;
use crate::store::Document;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    #[serde(default)]
    pub category_id: String,

    /// "expense", "income", ...
    #[serde(rename = "type")]
    pub kind: String,

    /// Signed amount (expenses are usually negative)
    pub amount: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TransactionRecord {
    pub fn new(category_id: &str, kind: &str, amount: f64) -> Self {
        TransactionRecord {
            category_id: category_id.to_string(),
            kind: kind.to_string(),
            amount,
            description: None,
        }
    }

    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        doc.decode()
    }

    pub fn is_expense(&self, expense_type: &str) -> bool {
        self.kind == expense_type
    }
}

/// Sum of `|amount|` over every expense in the result set.
///
/// Recomputed from scratch on each snapshot. Undecodable documents are
/// skipped with a warning.
pub fn sum_expenses(docs: &[Document], expense_type: &str) -> f64 {
    docs.iter()
        .filter_map(|doc| match TransactionRecord::from_document(doc) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(doc_id = %doc.id, error = %e, "skipping malformed transaction");
                None
            }
        })
        .filter(|record| record.is_expense(expense_type))
        .map(|record| record.amount.abs())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sum_expenses_excludes_income() {
        let docs = vec![
            Document::new("t1", json!({ "categoryId": "cat1", "type": "expense", "amount": -200000 })),
            Document::new("t2", json!({ "categoryId": "cat1", "type": "expense", "amount": -50000 })),
            Document::new("t3", json!({ "categoryId": "cat1", "type": "income", "amount": 100000 })),
        ];

        assert_eq!(sum_expenses(&docs, "expense"), 250_000.0);
    }

    #[test]
    fn test_positive_expense_counts_as_absolute() {
        let docs = vec![
            Document::new("t1", json!({ "type": "expense", "amount": 1500 })),
            Document::new("t2", json!({ "type": "expense", "amount": -500 })),
        ];

        assert_eq!(sum_expenses(&docs, "expense"), 2000.0);
    }

    #[test]
    fn test_malformed_transactions_are_skipped() {
        let docs = vec![
            Document::new("t1", json!({ "type": "expense", "amount": "lots" })),
            Document::new("t2", json!({ "type": "expense", "amount": -10 })),
        ];

        assert_eq!(sum_expenses(&docs, "expense"), 10.0);
        assert_eq!(sum_expenses(&[], "expense"), 0.0);
    }
}
