//! Scan a directory tree for RIPS JSON files and write the path list CSV the
//! batch run reads. Usage: scan_json_paths [root] [depth] [out.csv].
//! Defaults: current directory, depth 3, Bases/Rutas_Json.csv.

use std::path::{Path, PathBuf};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let root = std::env::args().nth(1).unwrap_or_else(|| ".".to_string());
    let depth = match std::env::args().nth(2) {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| format!("invalid depth '{raw}'"))?,
        None => ripsfix::data::paths::DEFAULT_SCAN_DEPTH,
    };
    let out = std::env::args()
        .nth(3)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(ripsfix::data::paths::DEFAULT_PATHS_CSV));

    let found = ripsfix::data::paths::scan_json_files(Path::new(&root), depth);
    if found.is_empty() {
        return Err(format!("no JSON files under '{root}' (depth {depth})").into());
    }

    ripsfix::data::paths::write_path_csv(&found, &out)?;
    println!("Wrote {} paths to {}", found.len(), out.display());
    Ok(())
}
