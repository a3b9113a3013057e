//! Persistence for images and case records.

mod cases;
mod images;
mod traits;

pub use cases::{CaseLead, CaseRecord, ObjectCaseStore};
pub use images::ObjectImageStore;
pub use traits::{CaseStore, ImageStore};
