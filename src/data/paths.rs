//! Path-list handling: the one-column CSV of JSON files to process, the
//! directory scan that generates it, and the optional filter list
//! restricting a run to known-bad files.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

pub const DEFAULT_PATHS_CSV: &str = "Bases/Rutas_Json.csv";
pub const DEFAULT_FILTER_CSV: &str = "Bases/Codigos.csv";
pub const DEFAULT_SCAN_DEPTH: usize = 3;

/// Path list loaded from CSV, split into entries that point at existing
/// `.json` files and entries that were skipped (kept for reporting).
#[derive(Debug, Clone, Default)]
pub struct PathList {
    pub valid: Vec<PathBuf>,
    pub invalid: Vec<String>,
}

impl PathList {
    /// Drop valid entries not named by `filter` (full path or file name).
    pub fn retain_filtered(&mut self, filter: &HashSet<String>) {
        self.valid.retain(|path| filter_matches(path, filter));
    }
}

#[derive(Debug)]
pub enum PathListError {
    Read(io::Error),
    Parse(csv::Error),
    Write(csv::Error),
    Empty(String),
}

impl fmt::Display for PathListError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(err) => write!(f, "failed to read path list: {err}"),
            Self::Parse(err) => write!(f, "failed to parse path list CSV: {err}"),
            Self::Write(err) => write!(f, "failed to write path CSV: {err}"),
            Self::Empty(path) => write!(f, "path list '{path}' has no usable entries"),
        }
    }
}

impl std::error::Error for PathListError {}

/// Pick the column delimiter from the first line: first of `;`, tab, `,`
/// present wins, `,` otherwise. Path lists are single-column, so this only
/// matters when the CSV carries extra columns.
fn sniff_delimiter(text: &str) -> u8 {
    let first_line = text.lines().next().unwrap_or("");
    for candidate in [b';', b'\t', b','] {
        if first_line.contains(candidate as char) {
            return candidate;
        }
    }
    b','
}

fn is_nanish(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("nan")
}

fn has_json_extension(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"))
}

/// Load JSON file paths from the first column of a CSV (no header row).
/// Blank and `nan` entries are skipped silently; entries that are missing on
/// disk or lack a `.json` extension land in `invalid` with a warning.
/// Errors when the file is unreadable or no usable entry remains.
pub fn load_path_list(csv_path: &str) -> Result<PathList, PathListError> {
    let raw = fs::read_to_string(csv_path).map_err(PathListError::Read)?;
    let delimiter = sniff_delimiter(&raw);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(raw.as_bytes());

    let mut list = PathList::default();
    let mut total_rows = 0usize;

    for result in reader.records() {
        let record = result.map_err(PathListError::Parse)?;
        let Some(cell) = record.get(0) else {
            continue;
        };
        let entry = cell.trim();
        if is_nanish(entry) {
            continue;
        }
        total_rows += 1;

        let path = PathBuf::from(entry);
        if path.is_file() && has_json_extension(&path) {
            debug!("path list entry ok: {entry}");
            list.valid.push(path);
        } else {
            warn!("path list entry missing or not a JSON file: {entry}");
            list.invalid.push(entry.to_string());
        }
    }

    if total_rows == 0 {
        return Err(PathListError::Empty(csv_path.to_string()));
    }
    Ok(list)
}

/// Load the optional filter list (files with errors): first CSV column,
/// trimmed, blanks skipped. Entries may be full paths or bare file names.
pub fn load_filter_list(csv_path: &str) -> Result<HashSet<String>, PathListError> {
    let raw = fs::read_to_string(csv_path).map_err(PathListError::Read)?;
    let delimiter = sniff_delimiter(&raw);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(raw.as_bytes());

    let mut filter = HashSet::new();
    for result in reader.records() {
        let record = result.map_err(PathListError::Parse)?;
        if let Some(cell) = record.get(0) {
            let entry = cell.trim();
            if !is_nanish(entry) {
                filter.insert(entry.to_string());
            }
        }
    }
    Ok(filter)
}

/// True when `filter` names this path, either by full path string or by
/// bare file name.
pub fn filter_matches(path: &Path, filter: &HashSet<String>) -> bool {
    if filter.contains(&path.display().to_string()) {
        return true;
    }
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or(false, |name| filter.contains(name))
}

/// Collect `.json` files under `root`, descending at most `max_depth`
/// directory levels below it. Entries are sorted per directory so the
/// result is stable across runs.
pub fn scan_json_files(root: &Path, max_depth: usize) -> Vec<PathBuf> {
    let mut found = Vec::new();
    if !root.is_dir() {
        warn!("scan root is not a directory: {}", root.display());
        return found;
    }
    scan_dir(root, 0, max_depth, &mut found);
    found
}

fn scan_dir(dir: &Path, depth: usize, max_depth: usize, found: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("cannot read directory {}: {err}", dir.display());
            return;
        }
    };

    let mut paths: Vec<PathBuf> = entries.flatten().map(|entry| entry.path()).collect();
    paths.sort();

    for path in paths {
        if path.is_file() && has_json_extension(&path) {
            debug!("found: {}", path.display());
            found.push(path);
        } else if path.is_dir() && depth < max_depth {
            scan_dir(&path, depth + 1, max_depth, found);
        }
    }
}

/// Write paths to a one-column CSV (no header), one row per path,
/// creating parent directories as needed. Replaces any existing file.
pub fn write_path_csv(paths: &[PathBuf], out_path: &Path) -> Result<(), PathListError> {
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| PathListError::Write(err.into()))?;
        }
    }
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(out_path)
        .map_err(PathListError::Write)?;
    for path in paths {
        writer
            .write_record([path.display().to_string()])
            .map_err(PathListError::Write)?;
    }
    writer
        .flush()
        .map_err(|err| PathListError::Write(err.into()))?;
    Ok(())
}
