// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::filter::{MergedExport, Record};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const EXPORT_SUFFIX: &str = "_filtered.json";

/// `<table>_filtered.json`, with path separators and reserved characters replaced.
pub fn export_file_name(table: &str) -> String {
    format!("{}{EXPORT_SUFFIX}", file_stem(table))
}

fn file_stem(table: &str) -> String {
    let sanitized = table
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect::<String>();
    if sanitized.trim_matches('.').is_empty() {
        "table".to_owned()
    } else {
        sanitized
    }
}

/// Hands out export file names, suffixing `_2`, `_3`, ... when two tables
/// sanitize to the same name. Names compare case-insensitively.
#[derive(Debug, Default)]
struct ExportNames {
    taken: HashSet<String>,
}

impl ExportNames {
    fn claim(&mut self, table: &str) -> String {
        let stem = file_stem(table);
        let mut name = format!("{stem}{EXPORT_SUFFIX}");
        let mut counter = 2_usize;
        while !self.taken.insert(name.to_lowercase()) {
            name = format!("{stem}_{counter}{EXPORT_SUFFIX}");
            counter += 1;
        }
        name
    }
}

pub fn records_to_json(records: &[Record]) -> Result<String> {
    serde_json::to_string_pretty(records).context("encode export records")
}

/// Writes one pretty-printed JSON array per exported table into `dir`. Tables
/// whose names sanitize alike get numbered files instead of overwriting.
pub fn write_filtered_exports(dir: &Path, export: &MergedExport) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("create export directory {}", dir.display()))?;

    let mut names = ExportNames::default();
    let mut written = Vec::with_capacity(export.tables().len());
    for table in export.tables() {
        let path = dir.join(names.claim(&table.table));
        let body = records_to_json(&table.records)?;
        fs::write(&path, body).with_context(|| format!("write export {}", path.display()))?;
        info!(
            table = %table.table,
            rows = table.records.len(),
            path = %path.display(),
            "wrote export"
        );
        written.push(path);
    }
    Ok(written)
}
