//! Patient-keyed diagnostic lookup table.
//!
//! The table arrives as a CSV of unknown delimiter and encoding, or as an
//! Excel workbook. Rows are keyed by (document type, document number) and the
//! first row per key wins. Lookups fall back from the exact key to
//! progressively looser matches so formatting drift between the table and the
//! billing files still resolves.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use calamine::Reader;
use tracing::{debug, info, warn};

use super::decode::decode_text;

pub const DEFAULT_DIAGNOSTICS_CSV: &str = "Bases/RIPS_3.csv";

/// Delimiters tried against the header row, in order.
const TABLE_DELIMITERS: [u8; 4] = [b';', b',', b'\t', b'|'];

/// Required columns come first; the professional columns are optional.
const REQUIRED_COLUMNS: usize = 3;

const COLUMN_PATTERNS: [&[&str]; 5] = [
    &["tipodocumentopaciente", "tipo_documento_paciente"],
    &["numerodocumentopaciente", "numero_documento_paciente"],
    &["coddiagnostico", "codigo_diagnostico"],
    &["tipodocumentoprofesional", "tipo_documento_profesional"],
    &["numdocumentoidentificacion", "numero_documento_profesional"],
];

const COLUMN_LABELS: [&str; 5] = [
    "TipoDocumentoPaciente",
    "NumeroDocumentoPaciente",
    "CodDiagnostico",
    "TipoDocumentoProfesional",
    "numDocumentoIdentificacion",
];

#[derive(Debug)]
pub enum TableError {
    Read(io::Error),
    Parse(String),
    MissingColumns(String),
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(err) => write!(f, "failed to read diagnostic table: {err}"),
            Self::Parse(msg) => write!(f, "failed to parse diagnostic table: {msg}"),
            Self::MissingColumns(msg) => {
                write!(f, "diagnostic table is missing required columns: {msg}")
            }
        }
    }
}

impl std::error::Error for TableError {}

/// One patient's row: the principal diagnosis code plus the treating
/// professional's document data when the table carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEntry {
    pub code: String,
    pub professional_doc_type: Option<String>,
    pub professional_doc_number: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosticIndex {
    entries: BTreeMap<(String, String), DiagnosticEntry>,
}

impl DiagnosticIndex {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert unless the key is already present. Returns false on duplicates.
    pub fn insert_first(
        &mut self,
        doc_type: &str,
        doc_number: &str,
        entry: DiagnosticEntry,
    ) -> bool {
        let key = (doc_type.to_string(), doc_number.to_string());
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, entry);
        true
    }

    /// Resolve a patient document against the table. Stages, in order:
    /// exact (type, number) key, known aliases of the document type with the
    /// same number, same number under any type, then shared last six digits
    /// (both numbers longer than six).
    pub fn lookup(&self, doc_type: &str, doc_number: &str) -> Option<&DiagnosticEntry> {
        let key = (doc_type.to_string(), doc_number.to_string());
        if let Some(entry) = self.entries.get(&key) {
            debug!("exact match: {doc_type} {doc_number}");
            return Some(entry);
        }

        for variant in doc_type_variants(doc_type) {
            let key = (variant.to_string(), doc_number.to_string());
            if let Some(entry) = self.entries.get(&key) {
                info!("matched via document type alias: {doc_type} -> {variant}");
                return Some(entry);
            }
        }

        for ((_, number), entry) in &self.entries {
            if number == doc_number {
                info!("matched by document number alone: {doc_number}");
                return Some(entry);
            }
        }

        if doc_number.len() > 6 {
            if let Some(suffix) = doc_number.get(doc_number.len() - 6..) {
                for ((_, number), entry) in &self.entries {
                    if number.len() > 6 && number.contains(suffix) {
                        info!("partial match on last digits: {doc_number} -> {number}");
                        return Some(entry);
                    }
                }
            }
        }

        None
    }
}

fn doc_type_variants(doc_type: &str) -> &'static [&'static str] {
    match doc_type {
        "CC" => &["CC", "CEDULA", "C.C.", "CI"],
        "TI" => &["TI", "TARJETA", "T.I."],
        "CE" => &["CE", "C.E.", "EXTRANJERIA"],
        "RC" => &["RC", "R.C.", "REGISTRO"],
        "PA" => &["PA", "PASAPORTE"],
        _ => &[],
    }
}

/// Strip the separators that creep into manually entered document numbers
/// and diagnosis codes: dots, dashes, spaces and commas.
pub fn clean_document_number(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '.' | '-' | ' ' | ','))
        .collect()
}

fn is_blankish(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "" | "null" | "none" | "nan" | "nat"
    )
}

/// Load the lookup table from CSV or an Excel workbook, keyed by patient
/// document. A workbook that fails to open is retried as CSV.
pub fn load_diagnostic_table(path: &str) -> Result<DiagnosticIndex, TableError> {
    info!("loading diagnostic table: {path}");
    let path_ref = Path::new(path);
    let is_workbook = path_ref.extension().map_or(false, |ext| {
        ext.eq_ignore_ascii_case("xlsx") || ext.eq_ignore_ascii_case("xls")
    });

    let rows = if is_workbook {
        match read_xlsx_rows(path_ref) {
            Ok(rows) => rows,
            Err(err) => {
                warn!("workbook read failed, retrying as CSV: {err}");
                read_csv_rows(path_ref)?
            }
        }
    } else {
        read_csv_rows(path_ref)?
    };

    build_index(rows, path)
}

fn read_csv_rows(path: &Path) -> Result<Vec<Vec<String>>, TableError> {
    let bytes = fs::read(path).map_err(TableError::Read)?;
    let text = decode_text(&bytes);

    for delimiter in TABLE_DELIMITERS {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(text.as_bytes());

        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut parsed = true;
        for result in reader.records() {
            match result {
                Ok(record) => rows.push(record.iter().map(|cell| cell.to_string()).collect()),
                Err(_) => {
                    parsed = false;
                    break;
                }
            }
        }
        // A delimiter counts only if it actually splits the header.
        if parsed && rows.first().map_or(false, |header| header.len() > 2) {
            info!("table read as CSV with delimiter '{}'", delimiter as char);
            return Ok(rows);
        }
    }

    Err(TableError::Parse(format!(
        "could not split '{}' into more than two columns with any known delimiter",
        path.display()
    )))
}

fn read_xlsx_rows(path: &Path) -> Result<Vec<Vec<String>>, TableError> {
    let mut workbook = calamine::open_workbook_auto(path)
        .map_err(|err| TableError::Parse(format!("open workbook {}: {err}", path.display())))?;
    let names = workbook.sheet_names();
    let sheet = names
        .first()
        .cloned()
        .ok_or_else(|| TableError::Parse(format!("workbook {} has no sheets", path.display())))?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|err| TableError::Parse(format!("sheet '{sheet}': {err}")))?;
    info!("table read from workbook sheet '{sheet}'");
    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

fn cell_text(cell: &calamine::Data) -> String {
    match cell {
        calamine::Data::String(s) => s.trim().to_string(),
        calamine::Data::Int(i) => i.to_string(),
        // Document numbers come through as floats; keep them integral.
        calamine::Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        calamine::Data::Float(f) => f.to_string(),
        calamine::Data::Bool(b) => b.to_string(),
        calamine::Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn normalize_header(raw: &str) -> String {
    raw.trim().to_lowercase().replace([' ', '_'], "")
}

/// Map header cells to the five known columns: exact matches on the
/// normalized name first, substring matches to fill the gaps.
fn identify_columns(headers: &[String]) -> [Option<usize>; 5] {
    let mut mapping = [None; 5];

    for (idx, header) in headers.iter().enumerate() {
        let normalized = normalize_header(header);
        for (slot, patterns) in COLUMN_PATTERNS.iter().enumerate() {
            if mapping[slot].is_none()
                && patterns.iter().any(|p| normalize_header(p) == normalized)
            {
                mapping[slot] = Some(idx);
                debug!("column '{}' mapped to '{header}'", COLUMN_LABELS[slot]);
            }
        }
    }

    for (idx, header) in headers.iter().enumerate() {
        let lowered = header.trim().to_lowercase();
        for (slot, patterns) in COLUMN_PATTERNS.iter().enumerate() {
            if mapping[slot].is_none()
                && patterns
                    .iter()
                    .any(|p| lowered.contains(p) || p.contains(lowered.as_str()))
            {
                mapping[slot] = Some(idx);
                debug!(
                    "column '{}' mapped to '{header}' (partial match)",
                    COLUMN_LABELS[slot]
                );
            }
        }
    }

    mapping
}

fn build_index(rows: Vec<Vec<String>>, source: &str) -> Result<DiagnosticIndex, TableError> {
    let Some((header, data_rows)) = rows.split_first() else {
        return Err(TableError::Parse(format!("'{source}' has no header row")));
    };

    let mapping = identify_columns(header);
    let missing: Vec<&str> = mapping
        .iter()
        .zip(COLUMN_LABELS)
        .take(REQUIRED_COLUMNS)
        .filter(|(found, _)| found.is_none())
        .map(|(_, label)| label)
        .collect();
    if !missing.is_empty() {
        return Err(TableError::MissingColumns(format!(
            "{} (available: {})",
            missing.join(", "),
            header.join(", ")
        )));
    }

    let cell = |row: &[String], slot: usize| -> String {
        mapping[slot]
            .and_then(|idx| row.get(idx))
            .map(|value| value.trim().to_string())
            .unwrap_or_default()
    };

    let mut index = DiagnosticIndex::default();
    let mut skipped = 0usize;

    for row in data_rows {
        let doc_type = cell(row, 0).to_uppercase();
        let doc_number = clean_document_number(&cell(row, 1));
        let code = clean_document_number(&cell(row, 2).to_uppercase());

        if is_blankish(&doc_type) || doc_number.is_empty() || is_blankish(&code) {
            skipped += 1;
            continue;
        }

        let professional_doc_type =
            Some(cell(row, 3).to_uppercase()).filter(|value| !is_blankish(value));
        let professional_doc_number =
            Some(clean_document_number(&cell(row, 4))).filter(|value| !is_blankish(value));

        let entry = DiagnosticEntry {
            code,
            professional_doc_type,
            professional_doc_number,
        };
        if !index.insert_first(&doc_type, &doc_number, entry) {
            debug!("duplicate patient key skipped: {doc_type} {doc_number}");
        }
    }

    if skipped > 0 {
        debug!("{skipped} incomplete rows skipped");
    }
    if index.is_empty() {
        warn!("diagnostic table '{source}' produced no usable entries");
    } else {
        info!("diagnostic table loaded: {} patients", index.len());
    }
    Ok(index)
}
