mod decode;
pub mod diagnostics;
pub mod document;
pub mod paths;

pub use diagnostics::{load_diagnostic_table, DiagnosticEntry, DiagnosticIndex, TableError};
pub use document::{
    load_document, parse_document, save_document, summarize_document, validate_document,
    DocumentError, DocumentSummary, ValidationReport, ValidationSeverity,
};
pub use paths::{
    load_filter_list, load_path_list, scan_json_files, write_path_csv, PathList, PathListError,
};
