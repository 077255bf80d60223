//! Batch correction of RIPS billing JSON files.
//!
//! Reads a CSV of file paths and a patient-keyed diagnostic lookup table
//! (CSV or XLSX), completes missing principal diagnosis codes and applies
//! the standard RIPS field repairs to each file, replacing it in place with
//! a `.backup` sibling. All activity is mirrored into
//! `diagnostic_completion_debug.log`.

pub mod batch;
pub mod cli;
pub mod completer;
pub mod data;
pub mod logging;
