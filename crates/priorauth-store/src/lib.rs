//! Storage layer: versioned JSON rule files and hyperedge export.

mod error;
mod files;

pub use error::StoreError;
pub use files::{FORMAT_VERSION, RuleFile, export_hyperedges, import_hyperedges};
