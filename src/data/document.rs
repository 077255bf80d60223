//! Loading, validation and persistence of RIPS billing documents.
//!
//! Documents are handled as raw `serde_json::Value` trees: files in the wild
//! carry extra top-level keys and per-service fields that must survive a
//! rewrite byte-for-byte in meaning, so no fixed schema is imposed beyond the
//! `usuarios` / `servicios` skeleton.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::decode::decode_text;

/// Service sections walked inside each user's `servicios` object.
pub const SERVICE_SECTIONS: [&str; 4] = [
    "consultas",
    "procedimientos",
    "medicamentos",
    "otrosServicios",
];

#[derive(Debug)]
pub enum DocumentError {
    Read(io::Error),
    Empty(String),
    Parse(serde_json::Error),
    Structure(String),
    Write(io::Error),
    Verify(String),
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(err) => write!(f, "failed to read document: {err}"),
            Self::Empty(path) => write!(f, "document '{path}' is empty"),
            Self::Parse(err) => write!(f, "failed to parse document JSON: {err}"),
            Self::Structure(msg) => write!(f, "document structure invalid: {msg}"),
            Self::Write(err) => write!(f, "failed to write document: {err}"),
            Self::Verify(msg) => write!(f, "saved document failed verification: {msg}"),
        }
    }
}

impl std::error::Error for DocumentError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: ValidationSeverity,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn push(&mut self, severity: ValidationSeverity, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity,
            message: message.into(),
        });
    }

    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| issue.severity == ValidationSeverity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| issue.severity == ValidationSeverity::Warning)
            .count()
    }

    pub fn is_valid(&self) -> bool {
        self.error_count() == 0
    }

    fn first_error(&self) -> Option<&str> {
        self.issues
            .iter()
            .find(|issue| issue.severity == ValidationSeverity::Error)
            .map(|issue| issue.message.as_str())
    }
}

/// Render a JSON value the way the correction rules see it: strings trimmed,
/// null as the empty string, everything else via its JSON form.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// A principal diagnosis counts as blank when it is missing, null, a known
/// empty marker or the literal zero the upstream biller emits.
pub fn is_blank_code(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "" | "none" | "null" | "nan" | "nat" | "0"
    )
}

/// Read and parse a billing document without structural checks, tolerating
/// UTF-8 (with BOM) and Latin-1 input. Fails on empty files and malformed
/// JSON.
pub fn parse_document(path: &Path) -> Result<Value, DocumentError> {
    debug!("loading document: {}", path.display());
    let bytes = fs::read(path).map_err(DocumentError::Read)?;
    if bytes.is_empty() {
        return Err(DocumentError::Empty(path.display().to_string()));
    }

    let content = decode_text(&bytes);
    if content.trim().is_empty() {
        return Err(DocumentError::Empty(path.display().to_string()));
    }

    serde_json::from_str(&content).map_err(DocumentError::Parse)
}

/// Load a billing document and gate it on structural validation. Structural
/// warnings are logged and do not block processing.
pub fn load_document(path: &Path) -> Result<Value, DocumentError> {
    let value = parse_document(path)?;

    let report = validate_document(&value);
    for issue in &report.issues {
        match issue.severity {
            ValidationSeverity::Error => error!("{}", issue.message),
            ValidationSeverity::Warning => warn!("{}", issue.message),
        }
    }
    if !report.is_valid() {
        return Err(DocumentError::Structure(
            report.first_error().unwrap_or("unknown").to_string(),
        ));
    }

    Ok(value)
}

/// Structural checks over a parsed document. Shape violations are errors;
/// missing identity fields are warnings since the correction pass fills some
/// of them in.
pub fn validate_document(value: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();

    let Some(root) = value.as_object() else {
        report.push(ValidationSeverity::Error, "root is not a JSON object");
        return report;
    };

    let Some(users) = root.get("usuarios") else {
        report.push(ValidationSeverity::Error, "missing 'usuarios' key");
        return report;
    };
    let Some(users) = users.as_array() else {
        report.push(ValidationSeverity::Error, "'usuarios' is not an array");
        return report;
    };

    for (idx, user) in users.iter().enumerate() {
        let ordinal = idx + 1;
        let Some(user) = user.as_object() else {
            report.push(
                ValidationSeverity::Error,
                format!("usuario {ordinal} is not an object"),
            );
            continue;
        };

        for field in ["tipoDocumentoIdentificacion", "numDocumentoIdentificacion"] {
            if !user.contains_key(field) {
                report.push(
                    ValidationSeverity::Warning,
                    format!("usuario {ordinal} has no '{field}'"),
                );
            }
        }

        let Some(services) = user.get("servicios") else {
            continue;
        };
        let Some(services) = services.as_object() else {
            report.push(
                ValidationSeverity::Error,
                format!("usuario {ordinal}: 'servicios' is not an object"),
            );
            continue;
        };
        for section in SERVICE_SECTIONS {
            if let Some(entries) = services.get(section) {
                if !entries.is_array() {
                    report.push(
                        ValidationSeverity::Error,
                        format!("usuario {ordinal}: '{section}' is not an array"),
                    );
                }
            }
        }
    }

    report
}

/// Counts describing a loaded document, logged before and after a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentSummary {
    pub total_users: usize,
    pub valid_users: usize,
    pub invalid_users: usize,
    pub users_with_services: usize,
    pub total_services: usize,
    pub services_per_section: [usize; 4],
    pub blank_diagnoses: usize,
}

pub fn summarize_document(value: &Value) -> DocumentSummary {
    let mut summary = DocumentSummary::default();
    let users = value
        .get("usuarios")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    summary.total_users = users.len();

    for user in users {
        let Some(user) = user.as_object() else {
            summary.invalid_users += 1;
            continue;
        };
        summary.valid_users += 1;

        let Some(services) = user.get("servicios").and_then(Value::as_object) else {
            continue;
        };

        let mut has_services = false;
        for (section_idx, section) in SERVICE_SECTIONS.iter().enumerate() {
            let Some(entries) = services.get(*section).and_then(Value::as_array) else {
                continue;
            };
            if entries.is_empty() {
                continue;
            }
            has_services = true;
            summary.services_per_section[section_idx] += entries.len();
            summary.total_services += entries.len();

            for entry in entries {
                let Some(entry) = entry.as_object() else {
                    continue;
                };
                let code = entry
                    .get("codDiagnosticoPrincipal")
                    .map(value_text)
                    .unwrap_or_default();
                if is_blank_code(&code) {
                    summary.blank_diagnoses += 1;
                }
            }
        }
        if has_services {
            summary.users_with_services += 1;
        }
    }

    summary
}

fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".backup");
    PathBuf::from(name)
}

/// Write a document back to disk as 2-space-indented UTF-8. When
/// `make_backup` is set and the target already exists, the original is first
/// copied to a `.backup` sibling; the written file is re-read to confirm it
/// parses. Returns the backup path when one was created.
pub fn save_document(
    value: &Value,
    path: &Path,
    make_backup: bool,
) -> Result<Option<PathBuf>, DocumentError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(DocumentError::Write)?;
        }
    }

    let backup = if make_backup && path.exists() {
        let backup = backup_path_for(path);
        fs::copy(path, &backup).map_err(DocumentError::Write)?;
        info!("backup written: {}", backup.display());
        Some(backup)
    } else {
        None
    };

    let body = serde_json::to_string_pretty(value)
        .map_err(|err| DocumentError::Write(io::Error::new(io::ErrorKind::InvalidData, err)))?;
    fs::write(path, body).map_err(DocumentError::Write)?;

    let written = fs::read(path)
        .map_err(|err| DocumentError::Verify(format!("re-read {}: {err}", path.display())))?;
    serde_json::from_slice::<Value>(&written)
        .map_err(|err| DocumentError::Verify(format!("re-parse {}: {err}", path.display())))?;

    debug!("document saved: {} ({} bytes)", path.display(), written.len());
    Ok(backup)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use serde_json::json;

    use super::*;

    fn unique_temp_dir(tag: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("ripsfix-{tag}-{stamp}"));
        fs::create_dir_all(&dir).expect("temp dir should be created");
        dir
    }

    #[test]
    fn load_rejects_empty_and_malformed_files() {
        let dir = unique_temp_dir("doc-load");
        let empty = dir.join("empty.json");
        fs::write(&empty, "").unwrap();
        assert!(matches!(
            load_document(&empty).unwrap_err(),
            DocumentError::Empty(_)
        ));

        let blank = dir.join("blank.json");
        fs::write(&blank, "   \n").unwrap();
        assert!(matches!(
            load_document(&blank).unwrap_err(),
            DocumentError::Empty(_)
        ));

        let broken = dir.join("broken.json");
        fs::write(&broken, "{\"usuarios\": [").unwrap();
        assert!(matches!(
            load_document(&broken).unwrap_err(),
            DocumentError::Parse(_)
        ));
    }

    #[test]
    fn load_rejects_wrong_shapes() {
        let dir = unique_temp_dir("doc-shape");

        let array_root = dir.join("array.json");
        fs::write(&array_root, "[1, 2]").unwrap();
        assert!(matches!(
            load_document(&array_root).unwrap_err(),
            DocumentError::Structure(_)
        ));

        let no_users = dir.join("nousers.json");
        fs::write(&no_users, "{\"numFactura\": \"F1\"}").unwrap();
        assert!(matches!(
            load_document(&no_users).unwrap_err(),
            DocumentError::Structure(_)
        ));
    }

    #[test]
    fn load_accepts_bom_prefixed_utf8() {
        let dir = unique_temp_dir("doc-bom");
        let path = dir.join("bom.json");
        let mut bytes = vec![0xef, 0xbb, 0xbf];
        bytes.extend_from_slice(b"{\"usuarios\": []}");
        fs::write(&path, bytes).unwrap();

        let value = load_document(&path).expect("BOM file should load");
        assert_eq!(value["usuarios"], json!([]));
    }

    #[test]
    fn validate_flags_missing_identity_as_warning_only() {
        let doc = json!({
            "usuarios": [
                { "servicios": { "consultas": [] } },
                "not-an-object"
            ]
        });
        let report = validate_document(&doc);
        assert!(!report.is_valid(), "non-object user is an error");
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.warning_count(), 2, "both identity fields missing");
    }

    #[test]
    fn summarize_counts_sections_and_blank_diagnoses() {
        let doc = json!({
            "usuarios": [
                {
                    "tipoDocumentoIdentificacion": "CC",
                    "numDocumentoIdentificacion": "123",
                    "servicios": {
                        "consultas": [
                            { "codDiagnosticoPrincipal": "" },
                            { "codDiagnosticoPrincipal": "J440" }
                        ],
                        "medicamentos": [
                            { "codDiagnosticoPrincipal": "0" },
                            { "codDiagnosticoPrincipal": null }
                        ]
                    }
                },
                { "tipoDocumentoIdentificacion": "CC", "numDocumentoIdentificacion": "9" },
                17
            ]
        });

        let summary = summarize_document(&doc);
        assert_eq!(summary.total_users, 3);
        assert_eq!(summary.valid_users, 2);
        assert_eq!(summary.invalid_users, 1);
        assert_eq!(summary.users_with_services, 1);
        assert_eq!(summary.total_services, 4);
        assert_eq!(summary.services_per_section, [2, 0, 2, 0]);
        assert_eq!(summary.blank_diagnoses, 3);
    }

    #[test]
    fn save_creates_backup_sibling_and_verifies() {
        let dir = unique_temp_dir("doc-save");
        let path = dir.join("factura.json");
        fs::write(&path, "{\"usuarios\": [], \"v\": 1}").unwrap();

        let doc = json!({ "usuarios": [], "v": 2 });
        let backup = save_document(&doc, &path, true)
            .expect("save should succeed")
            .expect("backup should be created");

        assert_eq!(backup, dir.join("factura.json.backup"));
        let original: Value =
            serde_json::from_str(&fs::read_to_string(&backup).unwrap()).unwrap();
        assert_eq!(original["v"], json!(1), "backup keeps pre-save content");
        let replaced: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(replaced["v"], json!(2));
    }

    #[test]
    fn save_without_backup_leaves_no_sibling() {
        let dir = unique_temp_dir("doc-save-nb");
        let path = dir.join("factura.json");
        fs::write(&path, "{\"usuarios\": []}").unwrap();

        let doc = json!({ "usuarios": [] });
        let backup = save_document(&doc, &path, false).expect("save should succeed");
        assert!(backup.is_none());
        assert!(!dir.join("factura.json.backup").exists());
    }

    #[test]
    fn value_text_and_blank_code_classification() {
        assert_eq!(value_text(&json!(null)), "");
        assert_eq!(value_text(&json!("  J44.0 ")), "J44.0");
        assert_eq!(value_text(&json!(0)), "0");

        assert!(is_blank_code(""));
        assert!(is_blank_code("None"));
        assert!(is_blank_code("NULL"));
        assert!(is_blank_code("nan"));
        assert!(is_blank_code("0"));
        assert!(!is_blank_code("00"), "placeholder 00 is not a blank code");
        assert!(!is_blank_code("J440"));
    }
}
