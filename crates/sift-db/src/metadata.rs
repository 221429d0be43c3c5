// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use sift_app::Table;

/// Body returned by the upload service, success or failure.
#[derive(Debug, Deserialize)]
pub(crate) struct UploadResponse {
    tables_metadata: Option<Vec<RawTable>>,
    pub(crate) error: Option<String>,
    pub(crate) details: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTable {
    name: String,
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<Vec<Cell>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Cell {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
    Null,
}

impl Cell {
    fn into_string(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Number(number) => number.to_string(),
            Self::Bool(flag) => flag.to_string(),
            Self::Null => String::new(),
        }
    }
}

/// Validates a `{"tables_metadata": [...]}` document and coerces every cell
/// to a string. Nested arrays or objects in cells are rejected.
pub fn parse_tables_metadata(body: &str) -> Result<Vec<Table>> {
    let response: UploadResponse =
        serde_json::from_str(body).context("decode tables_metadata response")?;
    tables_from_response(response)
}

pub(crate) fn tables_from_response(response: UploadResponse) -> Result<Vec<Table>> {
    let Some(raw_tables) = response.tables_metadata else {
        if let Some(error) = response.error {
            bail!("upload service reported an error: {error}");
        }
        bail!("response has no tables_metadata -- is this an upload service response?");
    };

    raw_tables
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let data = raw
                .data
                .into_iter()
                .map(|row| row.into_iter().map(Cell::into_string).collect())
                .collect();
            Table::new(&raw.name, raw.columns, data)
                .with_context(|| format!("validate tables_metadata[{index}]"))
        })
        .collect()
}
