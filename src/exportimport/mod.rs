//! Stage M: bucketed, gzip-compressed export and the matching two-phase
//! import.

pub mod export;
pub mod import;

pub use export::{export_bucketed, ExportMetadata};
pub use import::{commit as commit_import, validate as validate_import};
