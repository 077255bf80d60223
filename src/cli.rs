use std::path::Path;

use crate::batch::{print_summary, run_batch, BatchOptions};
use crate::data::document::{
    load_document, parse_document, summarize_document, validate_document, ValidationSeverity,
    SERVICE_SECTIONS,
};
use crate::data::paths::{
    scan_json_files, write_path_csv, DEFAULT_FILTER_CSV, DEFAULT_PATHS_CSV, DEFAULT_SCAN_DEPTH,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Complete,
    Inspect,
    Validate,
    Scan,
}

pub fn parse_command(args: &[String]) -> Option<Command> {
    match args.get(1).map(String::as_str) {
        Some("complete") => Some(Command::Complete),
        Some("inspect") => Some(Command::Inspect),
        Some("validate") => Some(Command::Validate),
        Some("scan") => Some(Command::Scan),
        _ => None,
    }
}

pub fn run_with_args(args: &[String]) -> i32 {
    match parse_command(args) {
        Some(Command::Complete) => handle_complete(args),
        Some(Command::Inspect) => handle_inspect(args),
        Some(Command::Validate) => handle_validate(args),
        Some(Command::Scan) => handle_scan(args),
        None => {
            eprintln!("usage: ripsfix <complete|inspect|validate|scan>");
            2
        }
    }
}

fn handle_complete(args: &[String]) -> i32 {
    let mut options = BatchOptions::default();
    let mut as_json = false;
    let mut positional = 0usize;

    let mut rest = args.iter().skip(2).peekable();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--no-backup" => options.make_backups = false,
            "--json" => as_json = true,
            "--filter" => {
                // value optional, conventional list used when omitted
                let value = rest
                    .peek()
                    .filter(|value| !value.starts_with("--"))
                    .map(|value| value.to_string());
                options.filter_csv = Some(match value {
                    Some(value) => {
                        rest.next();
                        value
                    }
                    None => DEFAULT_FILTER_CSV.to_string(),
                });
            }
            value if value.starts_with("--") => {
                eprintln!("unknown flag '{value}'");
                eprintln!(
                    "usage: ripsfix complete [paths.csv] [table.csv|.xlsx] \
                     [--filter [codes.csv]] [--no-backup] [--json]"
                );
                return 2;
            }
            value => {
                match positional {
                    0 => options.paths_csv = value.to_string(),
                    1 => options.diagnostics_csv = value.to_string(),
                    _ => {
                        eprintln!("unexpected argument '{value}'");
                        return 2;
                    }
                }
                positional += 1;
            }
        }
    }

    match run_batch(&options) {
        Ok(report) => {
            if as_json {
                match serde_json::to_string_pretty(&report) {
                    Ok(payload) => println!("{payload}"),
                    Err(err) => {
                        eprintln!("failed to serialize batch report: {err}");
                        return 1;
                    }
                }
            } else {
                print_summary(&report);
            }
            if report.any_succeeded() {
                0
            } else {
                1
            }
        }
        Err(err) => {
            eprintln!("batch failed: {err}");
            1
        }
    }
}

fn handle_inspect(args: &[String]) -> i32 {
    let Some(path) = args.get(2) else {
        eprintln!("usage: ripsfix inspect <file.json>");
        return 2;
    };

    match load_document(Path::new(path)) {
        Ok(document) => {
            let summary = summarize_document(&document);
            println!("{path}");
            println!(
                "usuarios: {} ({} valid, {} invalid, {} with servicios)",
                summary.total_users,
                summary.valid_users,
                summary.invalid_users,
                summary.users_with_services
            );
            println!("servicios: {}", summary.total_services);
            for (section, count) in SERVICE_SECTIONS.iter().zip(summary.services_per_section) {
                println!("  {section}: {count}");
            }
            println!("blank principal diagnoses: {}", summary.blank_diagnoses);
            0
        }
        Err(err) => {
            eprintln!("inspect failed: {err}");
            1
        }
    }
}

fn handle_validate(args: &[String]) -> i32 {
    let Some(path) = args.get(2) else {
        eprintln!("usage: ripsfix validate <file.json>");
        return 2;
    };

    let document = match parse_document(Path::new(path)) {
        Ok(document) => document,
        Err(err) => {
            eprintln!("validation failed: {err}");
            return 1;
        }
    };

    let report = validate_document(&document);
    for issue in &report.issues {
        let tag = match issue.severity {
            ValidationSeverity::Error => "error",
            ValidationSeverity::Warning => "warning",
        };
        println!("{tag}: {}", issue.message);
    }

    if report.is_valid() {
        println!(
            "validation passed: {path} ({} warning(s))",
            report.warning_count()
        );
        0
    } else {
        eprintln!(
            "validation failed: {} error(s), {} warning(s)",
            report.error_count(),
            report.warning_count()
        );
        1
    }
}

fn handle_scan(args: &[String]) -> i32 {
    let Some(root) = args.get(2) else {
        eprintln!("usage: ripsfix scan <root-dir> [depth] [out.csv]");
        return 2;
    };
    let depth = parse_usize_arg(args.get(3), "depth", DEFAULT_SCAN_DEPTH);
    let out = args.get(4).map(String::as_str).unwrap_or(DEFAULT_PATHS_CSV);

    let found = scan_json_files(Path::new(root), depth);
    if found.is_empty() {
        eprintln!("no JSON files under '{root}' (depth {depth})");
        return 1;
    }

    match write_path_csv(&found, Path::new(out)) {
        Ok(()) => {
            println!("{} JSON file(s) written to {out}", found.len());
            0
        }
        Err(err) => {
            eprintln!("scan failed: {err}");
            1
        }
    }
}

fn parse_usize_arg(raw: Option<&String>, name: &str, default: usize) -> usize {
    raw.and_then(|value| value.parse::<usize>().ok())
        .unwrap_or_else(|| {
            if let Some(value) = raw {
                eprintln!("invalid {name} '{value}', defaulting to {default}");
            }
            default
        })
}
