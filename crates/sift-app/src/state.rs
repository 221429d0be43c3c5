// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::model::{ColumnSelection, DEFAULT_ROWS_PER_PAGE, FilterSet, PageState, Table};
use crate::snapshot::AnalysisSnapshot;
use std::collections::BTreeMap;

/// UI-owned analysis state. All mutation goes through [`AnalysisState::dispatch`];
/// queries run against [`AnalysisState::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisState {
    tables: Vec<Table>,
    filters: FilterSet,
    selection: ColumnSelection,
    pages: BTreeMap<String, PageState>,
    default_rows_per_page: usize,
}

impl Default for AnalysisState {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            filters: FilterSet::default(),
            selection: ColumnSelection::default(),
            pages: BTreeMap::new(),
            default_rows_per_page: DEFAULT_ROWS_PER_PAGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisCommand {
    LoadTables(Vec<Table>),
    ToggleColumn {
        table: String,
        column: String,
    },
    SetColumnVisible {
        table: String,
        column: String,
        visible: bool,
    },
    SetFilterTerms {
        table: String,
        column: String,
        terms: Vec<String>,
    },
    ClearFilters {
        table: Option<String>,
    },
    SetPage {
        table: String,
        page: usize,
    },
    SetRowsPerPage {
        table: String,
        rows_per_page: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisEvent {
    TablesLoaded(usize),
    ColumnVisibilityChanged {
        table: String,
        column: String,
        visible: bool,
    },
    FiltersChanged {
        table: Option<String>,
    },
    PageChanged {
        table: String,
        page: usize,
    },
    RowsPerPageChanged {
        table: String,
        rows_per_page: usize,
    },
    Rejected(String),
}

impl AnalysisState {
    pub fn with_rows_per_page(rows_per_page: usize) -> Self {
        Self {
            default_rows_per_page: rows_per_page.max(1),
            ..Self::default()
        }
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn selection(&self) -> &ColumnSelection {
        &self.selection
    }

    pub fn snapshot(&self) -> AnalysisSnapshot<'_> {
        AnalysisSnapshot::new(&self.tables, &self.filters, &self.selection).with_pages(&self.pages)
    }

    pub fn dispatch(&mut self, command: AnalysisCommand) -> Vec<AnalysisEvent> {
        match command {
            AnalysisCommand::LoadTables(tables) => self.load_tables(tables),
            AnalysisCommand::ToggleColumn { table, column } => {
                let visible = !self.selection.is_visible(&table, &column);
                self.set_column_visible(table, column, visible)
            }
            AnalysisCommand::SetColumnVisible {
                table,
                column,
                visible,
            } => self.set_column_visible(table, column, visible),
            AnalysisCommand::SetFilterTerms {
                table,
                column,
                terms,
            } => {
                if let Some(rejected) = self.check_column(&table, &column) {
                    return vec![rejected];
                }
                self.filters.set_terms(&table, &column, terms);
                vec![AnalysisEvent::FiltersChanged { table: Some(table) }]
            }
            AnalysisCommand::ClearFilters { table: Some(table) } => {
                if let Some(rejected) = self.check_table(&table) {
                    return vec![rejected];
                }
                self.filters.clear_table(&table);
                vec![AnalysisEvent::FiltersChanged { table: Some(table) }]
            }
            AnalysisCommand::ClearFilters { table: None } => {
                self.filters.clear();
                vec![AnalysisEvent::FiltersChanged { table: None }]
            }
            AnalysisCommand::SetPage { table, page } => {
                if let Some(rejected) = self.check_table(&table) {
                    return vec![rejected];
                }
                if page == 0 {
                    return vec![AnalysisEvent::Rejected(
                        "pages are numbered from 1".to_owned(),
                    )];
                }
                self.page_state_mut(&table).page = page;
                vec![AnalysisEvent::PageChanged { table, page }]
            }
            AnalysisCommand::SetRowsPerPage {
                table,
                rows_per_page,
            } => {
                if let Some(rejected) = self.check_table(&table) {
                    return vec![rejected];
                }
                if rows_per_page == 0 {
                    return vec![AnalysisEvent::Rejected(
                        "rows per page must be positive".to_owned(),
                    )];
                }
                let state = self.page_state_mut(&table);
                state.rows_per_page = rows_per_page;
                state.page = 1;
                vec![
                    AnalysisEvent::RowsPerPageChanged {
                        table: table.clone(),
                        rows_per_page,
                    },
                    AnalysisEvent::PageChanged { table, page: 1 },
                ]
            }
        }
    }

    fn load_tables(&mut self, tables: Vec<Table>) -> Vec<AnalysisEvent> {
        self.filters.clear();
        self.selection = ColumnSelection::default();
        self.pages = tables
            .iter()
            .map(|table| {
                (
                    table.name.clone(),
                    PageState {
                        page: 1,
                        rows_per_page: self.default_rows_per_page,
                    },
                )
            })
            .collect();
        let count = tables.len();
        self.tables = tables;
        vec![AnalysisEvent::TablesLoaded(count)]
    }

    fn set_column_visible(
        &mut self,
        table: String,
        column: String,
        visible: bool,
    ) -> Vec<AnalysisEvent> {
        if let Some(rejected) = self.check_column(&table, &column) {
            return vec![rejected];
        }

        self.selection.set_visible(&table, &column, visible);
        let mut events = Vec::with_capacity(2);
        if !visible && !self.filters.terms(&table, &column).is_empty() {
            self.filters.clear_column(&table, &column);
            events.push(AnalysisEvent::FiltersChanged {
                table: Some(table.clone()),
            });
        }
        events.insert(
            0,
            AnalysisEvent::ColumnVisibilityChanged {
                table,
                column,
                visible,
            },
        );
        events
    }

    fn page_state_mut(&mut self, table: &str) -> &mut PageState {
        let default_rows_per_page = self.default_rows_per_page;
        self.pages
            .entry(table.to_owned())
            .or_insert_with(|| PageState {
                page: 1,
                rows_per_page: default_rows_per_page,
            })
    }

    fn check_table(&self, table: &str) -> Option<AnalysisEvent> {
        if self.tables.iter().any(|candidate| candidate.name == table) {
            None
        } else {
            Some(AnalysisEvent::Rejected(format!("unknown table {table:?}")))
        }
    }

    fn check_column(&self, table: &str, column: &str) -> Option<AnalysisEvent> {
        let Some(found) = self.tables.iter().find(|candidate| candidate.name == table) else {
            return self.check_table(table);
        };
        if found.column_index(column).is_some() {
            return None;
        }
        Some(AnalysisEvent::Rejected(format!(
            "table {table:?} has no column {column:?}"
        )))
    }
}
