// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_ROWS_PER_PAGE: usize = 10;

/// A named table loaded from an export. Every row has exactly one cell per column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub data: Vec<Vec<String>>,
}

impl Table {
    pub fn new(name: &str, columns: Vec<String>, data: Vec<Vec<String>>) -> Result<Self> {
        if name.trim().is_empty() {
            bail!("table name must not be empty");
        }

        let mut seen = BTreeSet::new();
        for column in &columns {
            if !seen.insert(column.as_str()) {
                bail!("table {name:?} has duplicate column {column:?}");
            }
        }

        for (index, row) in data.iter().enumerate() {
            if row.len() != columns.len() {
                bail!(
                    "table {name:?} row {index} has {} cells, expected {}",
                    row.len(),
                    columns.len()
                );
            }
        }

        Ok(Self {
            name: name.to_owned(),
            columns,
            data,
        })
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|name| name == column)
    }

    pub fn row_count(&self) -> usize {
        self.data.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// Substring filter terms keyed by table, then column. An absent or empty
/// term list means the column is unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    tables: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_terms<I, S>(mut self, table: &str, column: &str, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_terms(table, column, terms.into_iter().map(Into::into).collect());
        self
    }

    pub fn set_terms(&mut self, table: &str, column: &str, terms: Vec<String>) {
        if terms.is_empty() {
            self.clear_column(table, column);
            return;
        }
        self.tables
            .entry(table.to_owned())
            .or_default()
            .insert(column.to_owned(), terms);
    }

    pub fn add_term(&mut self, table: &str, column: &str, term: &str) {
        self.tables
            .entry(table.to_owned())
            .or_default()
            .entry(column.to_owned())
            .or_default()
            .push(term.to_owned());
    }

    pub fn terms(&self, table: &str, column: &str) -> &[String] {
        self.tables
            .get(table)
            .and_then(|columns| columns.get(column))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn clear_column(&mut self, table: &str, column: &str) {
        if let Some(columns) = self.tables.get_mut(table) {
            columns.remove(column);
            if columns.is_empty() {
                self.tables.remove(table);
            }
        }
    }

    pub fn clear_table(&mut self, table: &str) {
        self.tables.remove(table);
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    /// Columns of `table` carrying at least one term.
    pub fn active_columns<'a>(
        &'a self,
        table: &str,
    ) -> impl Iterator<Item = &'a str> + use<'a> {
        self.tables
            .get(table)
            .into_iter()
            .flat_map(|columns| columns.iter())
            .filter(|(_, terms)| !terms.is_empty())
            .map(|(column, _)| column.as_str())
    }

    pub fn has_active_filters(&self, table: &str) -> bool {
        self.active_columns(table).next().is_some()
    }
}

/// Per-table set of visible column names. Tables start with every column hidden.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSelection {
    visible: BTreeMap<String, BTreeSet<String>>,
}

impl ColumnSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visible<I, S>(mut self, table: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for column in columns {
            self.set_visible(table, column.as_ref(), true);
        }
        self
    }

    pub fn set_visible(&mut self, table: &str, column: &str, visible: bool) {
        if visible {
            self.visible
                .entry(table.to_owned())
                .or_default()
                .insert(column.to_owned());
        } else if let Some(columns) = self.visible.get_mut(table) {
            columns.remove(column);
            if columns.is_empty() {
                self.visible.remove(table);
            }
        }
    }

    pub fn is_visible(&self, table: &str, column: &str) -> bool {
        self.visible
            .get(table)
            .is_some_and(|columns| columns.contains(column))
    }

    pub(crate) fn selected<'a>(
        &'a self,
        table: &str,
    ) -> impl Iterator<Item = &'a str> + use<'a> {
        self.visible
            .get(table)
            .into_iter()
            .flat_map(|columns| columns.iter())
            .map(String::as_str)
    }

    pub fn clear_table(&mut self, table: &str) {
        self.visible.remove(table);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageState {
    pub page: usize,
    pub rows_per_page: usize,
}

impl Default for PageState {
    fn default() -> Self {
        Self {
            page: 1,
            rows_per_page: DEFAULT_ROWS_PER_PAGE,
        }
    }
}
