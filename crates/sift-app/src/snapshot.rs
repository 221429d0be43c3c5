// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::filter::{
    FilterError, FilterResult, MergedExport, filter_rows, merged_export, page_count, page_slice,
    visible_columns,
};
use crate::model::{ColumnSelection, FilterSet, PageState, Table};
use std::collections::BTreeMap;

static NO_PAGES: BTreeMap<String, PageState> = BTreeMap::new();

/// Read-only view over tables, filters, column selection and pagination.
/// Queries never mutate the borrowed state.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisSnapshot<'a> {
    pub tables: &'a [Table],
    pub filters: &'a FilterSet,
    pub selection: &'a ColumnSelection,
    pages: &'a BTreeMap<String, PageState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePage {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub page: usize,
    pub rows_per_page: usize,
    pub page_count: usize,
    pub total_rows: usize,
}

impl<'a> AnalysisSnapshot<'a> {
    pub fn new(
        tables: &'a [Table],
        filters: &'a FilterSet,
        selection: &'a ColumnSelection,
    ) -> Self {
        Self {
            tables,
            filters,
            selection,
            pages: &NO_PAGES,
        }
    }

    pub(crate) fn with_pages(mut self, pages: &'a BTreeMap<String, PageState>) -> Self {
        self.pages = pages;
        self
    }

    pub fn table(&self, name: &str) -> FilterResult<&'a Table> {
        self.tables
            .iter()
            .find(|table| table.name == name)
            .ok_or_else(|| FilterError::UnknownTable(name.to_owned()))
    }

    pub fn page_state(&self, name: &str) -> PageState {
        self.pages.get(name).copied().unwrap_or_default()
    }

    pub fn visible_column_names(&self, name: &str) -> FilterResult<Vec<&'a str>> {
        let table = self.table(name)?;
        Ok(visible_columns(table, self.selection)?
            .into_iter()
            .map(|index| table.columns[index].as_str())
            .collect())
    }

    pub fn filtered_rows(&self, name: &str) -> FilterResult<Vec<&'a [String]>> {
        filter_rows(self.table(name)?, self.filters, self.selection)
    }

    pub fn filtered_count(&self, name: &str) -> FilterResult<usize> {
        self.filtered_rows(name).map(|rows| rows.len())
    }

    /// The current page of `name` using its stored pagination state.
    pub fn page(&self, name: &str) -> FilterResult<TablePage> {
        let state = self.page_state(name);
        self.page_at(name, state.page, state.rows_per_page)
    }

    pub fn page_at(
        &self,
        name: &str,
        page: usize,
        rows_per_page: usize,
    ) -> FilterResult<TablePage> {
        let table = self.table(name)?;
        let visible = visible_columns(table, self.selection)?;
        let rows = filter_rows(table, self.filters, self.selection)?;
        let slice = page_slice(&rows, page, rows_per_page)?;

        Ok(TablePage {
            table: table.name.clone(),
            columns: visible
                .iter()
                .map(|&index| table.columns[index].clone())
                .collect(),
            rows: slice
                .iter()
                .map(|row| visible.iter().map(|&index| row[index].clone()).collect())
                .collect(),
            page,
            rows_per_page,
            page_count: page_count(rows.len(), rows_per_page)?,
            total_rows: rows.len(),
        })
    }

    pub fn merged_export(&self) -> FilterResult<MergedExport> {
        merged_export(self.tables, self.filters, self.selection)
    }
}

#[cfg(test)]
mod tests {
    use super::AnalysisSnapshot;
    use crate::filter::FilterError;
    use crate::model::{ColumnSelection, FilterSet, Table};
    use anyhow::Result;

    fn numbers(count: usize) -> Result<Table> {
        Table::new(
            "numbers",
            vec!["n".to_owned(), "parity".to_owned()],
            (1..=count)
                .map(|n| {
                    let parity = if n % 2 == 0 { "even" } else { "odd" };
                    vec![n.to_string(), parity.to_owned()]
                })
                .collect(),
        )
    }

    #[test]
    fn page_projects_visible_columns_of_filtered_rows() -> Result<()> {
        let tables = [numbers(25)?];
        let filters = FilterSet::new().with_terms("numbers", "parity", ["even"]);
        let selection = ColumnSelection::new().with_visible("numbers", ["n", "parity"]);
        let snapshot = AnalysisSnapshot::new(&tables, &filters, &selection);

        let page = snapshot.page_at("numbers", 2, 5)?;
        assert_eq!(page.columns, vec!["n".to_owned(), "parity".to_owned()]);
        assert_eq!(page.total_rows, 12);
        assert_eq!(page.page_count, 3);
        assert_eq!(page.rows.len(), 5);
        assert_eq!(page.rows[0], vec!["12".to_owned(), "even".to_owned()]);
        Ok(())
    }

    #[test]
    fn default_page_state_is_first_page_of_ten() -> Result<()> {
        let tables = [numbers(25)?];
        let filters = FilterSet::new();
        let selection = ColumnSelection::new().with_visible("numbers", ["n"]);
        let snapshot = AnalysisSnapshot::new(&tables, &filters, &selection);

        let page = snapshot.page("numbers")?;
        assert_eq!(page.page, 1);
        assert_eq!(page.rows.len(), 10);
        assert_eq!(page.page_count, 3);
        assert_eq!(page.rows[9], vec!["10".to_owned()]);
        Ok(())
    }

    #[test]
    fn out_of_range_page_is_empty() -> Result<()> {
        let tables = [numbers(3)?];
        let filters = FilterSet::new();
        let selection = ColumnSelection::new().with_visible("numbers", ["n"]);
        let snapshot = AnalysisSnapshot::new(&tables, &filters, &selection);

        let page = snapshot.page_at("numbers", 9, 10)?;
        assert!(page.rows.is_empty());
        assert_eq!(page.page_count, 1);
        Ok(())
    }

    #[test]
    fn unknown_table_is_reported() {
        let filters = FilterSet::new();
        let selection = ColumnSelection::new();
        let snapshot = AnalysisSnapshot::new(&[], &filters, &selection);
        assert_eq!(
            snapshot.page("missing").expect_err("missing table"),
            FilterError::UnknownTable("missing".to_owned())
        );
    }
}
