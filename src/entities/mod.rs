// Entity Models - the documents the engine reads
//
// Each record is decoded from a store `Document`. Identity (the document id)
// lives outside the body, so records that need it carry it explicitly.

pub mod subject;
pub mod classification;
pub mod transaction;
pub mod estimate;

pub use subject::Subject;
pub use classification::ClassificationRecord;
pub use transaction::{sum_expenses, TransactionRecord};
pub use estimate::{EstimateDocument, LineItem, LineItemDocument};
