// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, bail};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use sift_app::Table;
use std::path::Path;
use tracing::{debug, info};

/// Read-only view of a SQLite export file.
pub struct ExportReader {
    conn: Connection,
}

impl ExportReader {
    pub fn open(path: &Path) -> Result<Self> {
        let printable = path.to_string_lossy().to_string();
        validate_db_path(&printable)?;
        if !path.is_file() {
            bail!("{} is not a file -- pass the path of a SQLite export", path.display());
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("open SQLite export at {}", path.display()))?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// User tables in catalogue order. SQLite's own `sqlite_*` tables and
    /// blank names are skipped.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT name
                FROM sqlite_master
                WHERE type = 'table'
                  AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
                ORDER BY rowid ASC
                ",
            )
            .context("prepare table names query -- is this a SQLite database?")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("query table names")?;
        let names = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("collect table names")?;
        Ok(names
            .into_iter()
            .filter(|name| !name.trim().is_empty())
            .collect())
    }

    pub fn read_table(&self, name: &str) -> Result<Table> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {}", quote_identifier(name)))
            .with_context(|| format!("prepare select for table {name:?}"))?;
        let columns = stmt
            .column_names()
            .iter()
            .map(|column| (*column).to_owned())
            .collect::<Vec<_>>();
        let mut rows = stmt
            .query([])
            .with_context(|| format!("select rows from {name:?}"))?;

        let mut data = Vec::new();
        while let Some(row) = rows
            .next()
            .with_context(|| format!("scan rows of {name:?}"))?
        {
            let mut cells = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                let value = row
                    .get_ref(index)
                    .map(value_ref_to_string)
                    .with_context(|| format!("read column {index} of {name:?}"))?;
                cells.push(value);
            }
            data.push(cells);
        }
        debug!(table = name, rows = data.len(), "read table");

        Table::new(name, columns, data).with_context(|| format!("load table {name:?}"))
    }

    pub fn read_all(&self) -> Result<Vec<Table>> {
        self.table_names()?
            .iter()
            .map(|name| self.read_table(name))
            .collect()
    }
}

/// Every user table of the SQLite file at `path`, each cell as a string.
pub fn read_sqlite_export(path: &Path) -> Result<Vec<Table>> {
    let tables = ExportReader::open(path)?.read_all()?;
    info!(path = %path.display(), tables = tables.len(), "read SQLite export");
    Ok(tables)
}

pub fn validate_db_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("database path must not be empty");
    }

    if let Some(index) = path.find("://")
        && index > 0
    {
        let scheme = &path[..index];
        if scheme.chars().all(char::is_alphabetic) {
            bail!(
                "database path {path:?} looks like a URI ({scheme}://); pass a filesystem path instead"
            );
        }
    }

    if path.starts_with("file:") {
        bail!("database path {path:?} uses file: URI syntax; pass a plain filesystem path");
    }

    Ok(())
}

fn value_ref_to_string(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(value) => value.to_string(),
        ValueRef::Real(value) => format_real(value),
        ValueRef::Text(value) => String::from_utf8_lossy(value).into_owned(),
        ValueRef::Blob(value) => format!("<blob {} bytes>", value.len()),
    }
}

/// Whole reals keep a trailing `.0` so they read as decimals, not integers.
fn format_real(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::{ExportReader, format_real, quote_identifier, value_ref_to_string};
    use anyhow::Result;
    use rusqlite::Connection;
    use rusqlite::types::ValueRef;

    #[test]
    fn cells_are_stringified() {
        assert_eq!(value_ref_to_string(ValueRef::Null), "");
        assert_eq!(value_ref_to_string(ValueRef::Integer(-4)), "-4");
        assert_eq!(value_ref_to_string(ValueRef::Text(b"caf\xc3\xa9")), "café");
        assert_eq!(value_ref_to_string(ValueRef::Blob(&[1, 2, 3])), "<blob 3 bytes>");
    }

    #[test]
    fn reals_keep_a_decimal_point() {
        assert_eq!(format_real(40.0), "40.0");
        assert_eq!(format_real(12.5), "12.5");
        assert_eq!(format_real(-0.25), "-0.25");
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_identifier("orders"), "\"orders\"");
        assert_eq!(quote_identifier("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn tables_with_awkward_names_are_readable() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "
            CREATE TABLE \"order items\" (\"unit price\" REAL, qty INTEGER);
            INSERT INTO \"order items\" VALUES (1.5, 2), (NULL, 3);
            ",
        )?;
        let reader = ExportReader::from_connection(conn);

        assert_eq!(reader.table_names()?, vec!["order items".to_owned()]);
        let table = reader.read_table("order items")?;
        assert_eq!(table.columns, vec!["unit price".to_owned(), "qty".to_owned()]);
        assert_eq!(
            table.data,
            vec![
                vec!["1.5".to_owned(), "2".to_owned()],
                vec![String::new(), "3".to_owned()],
            ]
        );
        Ok(())
    }
}
