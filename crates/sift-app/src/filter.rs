// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::model::{ColumnSelection, FilterSet, Table};
use icu_collator::{Collator, CollatorOptions, Strength};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use tracing::{debug, warn};

/// One exported row: visible column name to cell value, in column order.
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    UnknownTable(String),
    UnknownColumn { table: String, column: String },
    ZeroRowsPerPage,
}

impl std::fmt::Display for FilterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTable(table) => write!(f, "unknown table {table:?}"),
            Self::UnknownColumn { table, column } => {
                write!(f, "table {table:?} has no column {column:?}")
            }
            Self::ZeroRowsPerPage => f.write_str("rows per page must be positive"),
        }
    }
}

impl std::error::Error for FilterError {}

pub type FilterResult<T> = std::result::Result<T, FilterError>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnFilter {
    index: usize,
    lowered_terms: Vec<String>,
}

/// Indices of the visible columns of `table`, in declared column order.
pub fn visible_columns(table: &Table, selection: &ColumnSelection) -> FilterResult<Vec<usize>> {
    for column in selection.selected(&table.name) {
        ensure_column(table, column)?;
    }

    Ok((0..table.column_count())
        .filter(|&index| selection.is_visible(&table.name, &table.columns[index]))
        .collect())
}

fn ensure_column(table: &Table, column: &str) -> FilterResult<usize> {
    table
        .column_index(column)
        .ok_or_else(|| FilterError::UnknownColumn {
            table: table.name.clone(),
            column: column.to_owned(),
        })
}

fn active_filters(
    table: &Table,
    filters: &FilterSet,
    visible: &[usize],
) -> FilterResult<Vec<ColumnFilter>> {
    for column in filters.active_columns(&table.name) {
        ensure_column(table, column)?;
    }

    Ok(visible
        .iter()
        .filter_map(|&index| {
            let terms = filters.terms(&table.name, &table.columns[index]);
            if terms.is_empty() {
                return None;
            }
            Some(ColumnFilter {
                index,
                lowered_terms: terms.iter().map(|term| term.to_lowercase()).collect(),
            })
        })
        .collect())
}

/// Orders cell text by root-locale collation at secondary strength: case is
/// ignored, accents are not, and scripts sort in Unicode collation order.
pub struct CellCollator {
    collator: Option<Collator>,
}

impl CellCollator {
    pub fn new() -> Self {
        let mut options = CollatorOptions::new();
        options.strength = Some(Strength::Secondary);
        let collator = match Collator::try_new(&Default::default(), options) {
            Ok(collator) => Some(collator),
            Err(err) => {
                warn!(error = %err, "collation data unavailable; sorting by lowercase text");
                None
            }
        };
        Self { collator }
    }

    pub fn compare(&self, left: &str, right: &str) -> Ordering {
        match &self.collator {
            Some(collator) => collator.compare(left, right),
            None => left.to_lowercase().cmp(&right.to_lowercase()),
        }
    }
}

impl Default for CellCollator {
    fn default() -> Self {
        Self::new()
    }
}

/// Case-insensitive: true when any term is a substring of `cell`.
pub fn cell_matches(cell: &str, terms: &[String]) -> bool {
    let lowered = cell.to_lowercase();
    terms
        .iter()
        .any(|term| lowered.contains(term.to_lowercase().as_str()))
}

fn row_passes(row: &[String], active: &[ColumnFilter]) -> bool {
    active.iter().all(|filter| {
        row.get(filter.index).is_some_and(|cell| {
            let lowered = cell.to_lowercase();
            filter
                .lowered_terms
                .iter()
                .any(|term| lowered.contains(term.as_str()))
        })
    })
}

/// Rows of `table` that pass every visible column's filter (OR within a
/// column, AND across columns). When any filter is active the result is
/// stably sorted by the filtered columns, left to right, using
/// [`CellCollator`].
pub fn filter_rows<'t>(
    table: &'t Table,
    filters: &FilterSet,
    selection: &ColumnSelection,
) -> FilterResult<Vec<&'t [String]>> {
    let visible = visible_columns(table, selection)?;
    let active = active_filters(table, filters, &visible)?;

    let mut rows = table
        .data
        .iter()
        .map(Vec::as_slice)
        .filter(|row| row_passes(row, &active))
        .collect::<Vec<_>>();

    if !active.is_empty() {
        let collator = CellCollator::new();
        rows.sort_by(|left, right| {
            active
                .iter()
                .map(|filter| collator.compare(&left[filter.index], &right[filter.index]))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });
    }

    Ok(rows)
}

pub fn page_count(total_rows: usize, rows_per_page: usize) -> FilterResult<usize> {
    if rows_per_page == 0 {
        return Err(FilterError::ZeroRowsPerPage);
    }
    Ok(total_rows.div_ceil(rows_per_page))
}

/// The 1-based `page` of `rows`. Page zero or a page past the end is empty.
pub fn page_slice<T>(rows: &[T], page: usize, rows_per_page: usize) -> FilterResult<&[T]> {
    if rows_per_page == 0 {
        return Err(FilterError::ZeroRowsPerPage);
    }
    if page == 0 {
        return Ok(&[]);
    }

    let start = (page - 1).saturating_mul(rows_per_page);
    if start >= rows.len() {
        return Ok(&[]);
    }
    let end = start.saturating_add(rows_per_page).min(rows.len());
    Ok(&rows[start..end])
}

pub fn project_records(table: &Table, rows: &[&[String]], visible: &[usize]) -> Vec<Record> {
    rows.iter()
        .map(|row| {
            visible
                .iter()
                .map(|&index| {
                    (
                        table.columns[index].clone(),
                        Value::String(row[index].clone()),
                    )
                })
                .collect::<Record>()
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableExport {
    pub table: String,
    pub records: Vec<Record>,
}

/// Filtered rows of every table that has visible columns and at least one
/// active filter, in table load order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedExport {
    tables: Vec<TableExport>,
}

impl MergedExport {
    pub fn tables(&self) -> &[TableExport] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn get(&self, table: &str) -> Option<&TableExport> {
        self.tables.iter().find(|export| export.table == table)
    }

    /// `{ "<table>": [ { "<column>": "<value>" }, ... ] }`
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.tables
                .iter()
                .map(|export| {
                    (
                        export.table.clone(),
                        Value::Array(
                            export
                                .records
                                .iter()
                                .cloned()
                                .map(Value::Object)
                                .collect(),
                        ),
                    )
                })
                .collect(),
        )
    }
}

pub fn merged_export(
    tables: &[Table],
    filters: &FilterSet,
    selection: &ColumnSelection,
) -> FilterResult<MergedExport> {
    let mut merged = MergedExport::default();
    for table in tables {
        let visible = visible_columns(table, selection)?;
        if visible.is_empty() || !filters.has_active_filters(&table.name) {
            continue;
        }

        let rows = filter_rows(table, filters, selection)?;
        debug!(table = %table.name, rows = rows.len(), "export table");
        merged.tables.push(TableExport {
            table: table.name.clone(),
            records: project_records(table, &rows, &visible),
        });
    }
    Ok(merged)
}
