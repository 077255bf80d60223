//! Batch driver: loads the path list and the diagnostic table, corrects each
//! referenced document in sequence and reports per-file and global results.
//!
//! Files are isolated from each other: a document that fails to load or save
//! is reported and the run moves on.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::completer::{Completer, CompletionStats};
use crate::data::diagnostics::{
    load_diagnostic_table, DiagnosticIndex, TableError, DEFAULT_DIAGNOSTICS_CSV,
};
use crate::data::document::{load_document, save_document, summarize_document, DocumentError};
use crate::data::paths::{load_filter_list, load_path_list, PathListError, DEFAULT_PATHS_CSV};

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub paths_csv: String,
    pub diagnostics_csv: String,
    /// Optional list restricting the run to the files it names.
    pub filter_csv: Option<String>,
    pub make_backups: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            paths_csv: DEFAULT_PATHS_CSV.to_string(),
            diagnostics_csv: DEFAULT_DIAGNOSTICS_CSV.to_string(),
            filter_csv: None,
            make_backups: true,
        }
    }
}

#[derive(Debug)]
pub enum BatchError {
    PathList(PathListError),
    FilterList(PathListError),
    Table(TableError),
    NoFiles,
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PathList(err) => write!(f, "path list: {err}"),
            Self::FilterList(err) => write!(f, "filter list: {err}"),
            Self::Table(err) => write!(f, "{err}"),
            Self::NoFiles => write!(f, "no valid JSON files to process"),
        }
    }
}

impl std::error::Error for BatchError {}

#[derive(Debug, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub succeeded: bool,
    pub stats: CompletionStats,
    pub backup: Option<PathBuf>,
    pub error: Option<String>,
    pub blank_before: usize,
    pub blank_after: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
    pub totals: CompletionStats,
    /// Path list entries that were missing on disk or not JSON files.
    pub skipped_paths: Vec<String>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.files.iter().filter(|file| file.succeeded).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.succeeded()
    }

    pub fn any_succeeded(&self) -> bool {
        self.succeeded() > 0
    }
}

/// Run the full batch: path list, optional filter, diagnostic table, then
/// one correction pass per file in list order.
pub fn run_batch(options: &BatchOptions) -> Result<BatchReport, BatchError> {
    info!(
        "batch started: {}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
    );
    info!("loading path list: {}", options.paths_csv);
    let mut paths = load_path_list(&options.paths_csv).map_err(BatchError::PathList)?;
    info!(
        "{} valid files, {} unusable entries",
        paths.valid.len(),
        paths.invalid.len()
    );

    if let Some(filter_csv) = &options.filter_csv {
        let filter = load_filter_list(filter_csv).map_err(BatchError::FilterList)?;
        let before = paths.valid.len();
        paths.retain_filtered(&filter);
        info!(
            "filter '{}' kept {} of {before} files",
            filter_csv,
            paths.valid.len()
        );
    }

    if paths.valid.is_empty() {
        return Err(BatchError::NoFiles);
    }

    let index = load_diagnostic_table(&options.diagnostics_csv).map_err(BatchError::Table)?;

    if options.make_backups {
        warn!("originals will be replaced in place, .backup siblings kept");
    } else {
        warn!("originals will be replaced in place, backups disabled");
    }

    let mut report = BatchReport {
        skipped_paths: paths.invalid.clone(),
        ..Default::default()
    };

    let total = paths.valid.len();
    for (i, path) in paths.valid.iter().enumerate() {
        info!("processing file {}/{total}: {}", i + 1, path.display());
        let file_report = match correct_file(path, &index, options.make_backups) {
            Ok(file_report) => file_report,
            Err(err) => {
                error!("{}: {err}", path.display());
                FileReport {
                    path: path.to_path_buf(),
                    succeeded: false,
                    stats: CompletionStats::default(),
                    backup: None,
                    error: Some(err.to_string()),
                    blank_before: 0,
                    blank_after: 0,
                }
            }
        };
        report.totals.merge(&file_report.stats);
        report.files.push(file_report);
    }

    info!(
        "batch finished: {} ({}/{} files ok, {} field changes)",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        report.succeeded(),
        report.files.len(),
        report.totals.total_changes()
    );
    Ok(report)
}

/// Correct a single document in place: load, repair, save (with optional
/// backup), and compare blank-diagnosis counts before and after.
pub fn correct_file(
    path: &Path,
    index: &DiagnosticIndex,
    make_backup: bool,
) -> Result<FileReport, DocumentError> {
    let mut document = load_document(path)?;

    let before = summarize_document(&document);
    info!(
        "{}: {} usuarios, {} servicios, {} blank diagnoses",
        path.display(),
        before.total_users,
        before.total_services,
        before.blank_diagnoses
    );

    let mut completer = Completer::new(index);
    completer.complete_document(&mut document);

    let backup = save_document(&document, path, make_backup)?;

    let after = summarize_document(&document);
    info!(
        "{}: blank diagnoses {} -> {}, {} field changes",
        path.display(),
        before.blank_diagnoses,
        after.blank_diagnoses,
        completer.stats.total_changes()
    );

    Ok(FileReport {
        path: path.to_path_buf(),
        succeeded: true,
        stats: completer.stats,
        backup,
        error: None,
        blank_before: before.blank_diagnoses,
        blank_after: after.blank_diagnoses,
    })
}

/// Human-readable run summary on stdout, one block per file.
pub fn print_summary(report: &BatchReport) {
    println!("{}", "=".repeat(70));
    println!("BATCH SUMMARY");
    println!("{}", "=".repeat(70));
    println!("files processed:     {}", report.files.len());
    println!("files succeeded:     {}", report.succeeded());
    println!("files failed:        {}", report.failed());
    println!("usuarios processed:  {}", report.totals.users_processed);
    println!("servicios processed: {}", report.totals.services_processed);
    println!("diagnoses found:     {}", report.totals.diagnoses_found);
    println!("diagnoses completed: {}", report.totals.diagnoses_completed);
    println!("total field changes: {}", report.totals.total_changes());
    if !report.skipped_paths.is_empty() {
        println!("skipped path entries: {}", report.skipped_paths.len());
    }
    println!();

    for (i, file) in report.files.iter().enumerate() {
        let status = if file.succeeded { "ok    " } else { "FAILED" };
        let name = file
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("?");
        println!("{:>3}. {status} {name}", i + 1);
        println!(
            "     usuarios: {}, servicios: {}, changes: {}, blank diagnoses: {} -> {}",
            file.stats.users_processed,
            file.stats.services_processed,
            file.stats.total_changes(),
            file.blank_before,
            file.blank_after
        );
        if let Some(backup) = &file.backup {
            println!("     backup: {}", backup.display());
        }
        if let Some(error) = &file.error {
            println!("     error: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use serde_json::{json, Value};

    use super::*;
    use crate::data::diagnostics::DiagnosticEntry;

    fn unique_temp_dir(tag: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("ripsfix-{tag}-{stamp}"));
        fs::create_dir_all(&dir).expect("temp dir should be created");
        dir
    }

    fn index_for(doc_type: &str, doc_number: &str, code: &str) -> DiagnosticIndex {
        let mut index = DiagnosticIndex::default();
        index.insert_first(
            doc_type,
            doc_number,
            DiagnosticEntry {
                code: code.to_string(),
                professional_doc_type: None,
                professional_doc_number: None,
            },
        );
        index
    }

    #[test]
    fn correct_file_rewrites_in_place_with_backup() {
        let dir = unique_temp_dir("correct");
        let path = dir.join("factura.json");
        let doc = json!({
            "usuarios": [{
                "tipoDocumentoIdentificacion": "CC",
                "numDocumentoIdentificacion": "111",
                "servicios": { "consultas": [{ "codDiagnosticoPrincipal": "" }] }
            }]
        });
        fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

        let index = index_for("CC", "111", "A09X");
        let report = correct_file(&path, &index, true).expect("file should process");

        assert!(report.succeeded);
        assert_eq!(report.blank_before, 1);
        assert_eq!(report.blank_after, 0);
        assert_eq!(report.stats.diagnoses_completed, 1);
        assert_eq!(report.backup.as_deref(), Some(dir.join("factura.json.backup").as_path()));

        let rewritten: Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            rewritten["usuarios"][0]["servicios"]["consultas"][0]["codDiagnosticoPrincipal"],
            json!("A09X")
        );
    }

    #[test]
    fn correct_file_surfaces_load_errors() {
        let dir = unique_temp_dir("correct-bad");
        let path = dir.join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let index = DiagnosticIndex::default();
        let err = correct_file(&path, &index, true).unwrap_err();
        assert!(matches!(err, DocumentError::Parse(_)));
        assert!(
            !dir.join("broken.json.backup").exists(),
            "failed loads leave no backup behind"
        );
    }

    #[test]
    fn batch_report_counts() {
        let ok = FileReport {
            path: PathBuf::from("a.json"),
            succeeded: true,
            stats: CompletionStats::default(),
            backup: None,
            error: None,
            blank_before: 0,
            blank_after: 0,
        };
        let failed = FileReport {
            path: PathBuf::from("b.json"),
            succeeded: false,
            stats: CompletionStats::default(),
            backup: None,
            error: Some("boom".to_string()),
            blank_before: 0,
            blank_after: 0,
        };
        let report = BatchReport {
            files: vec![ok, failed],
            totals: CompletionStats::default(),
            skipped_paths: vec![],
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert!(report.any_succeeded());
    }
}
