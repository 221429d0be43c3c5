// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use sift_app::{
    AnalysisSnapshot, CellCollator, ColumnSelection, FilterSet, Table, filter_rows, merged_export,
    page_count, page_slice,
};
use sift_testkit::TableFaker;
use std::cmp::Ordering;

/// Visible columns and filter terms drawn from the faker. Filters only land
/// on visible columns.
fn random_view(faker: &mut TableFaker, table: &Table) -> (ColumnSelection, FilterSet) {
    let mut selection = ColumnSelection::new();
    let mut filters = FilterSet::new();
    for column in &table.columns {
        if faker.int_n(3) == 0 {
            continue;
        }
        selection.set_visible(&table.name, column, true);
        if column != "id" && faker.int_n(2) == 0 {
            for _ in 0..=faker.int_n(2) {
                filters.add_term(&table.name, column, &faker.term());
            }
        }
    }
    (selection, filters)
}

fn naive_passes(
    table: &Table,
    row: &[String],
    filters: &FilterSet,
    selection: &ColumnSelection,
) -> bool {
    table.columns.iter().enumerate().all(|(index, column)| {
        let terms = filters.terms(&table.name, column);
        if terms.is_empty() || !selection.is_visible(&table.name, column) {
            return true;
        }
        let cell = row[index].to_lowercase();
        terms.iter().any(|term| cell.contains(&term.to_lowercase()))
    })
}

#[test]
fn filtered_rows_match_naive_predicate() -> Result<()> {
    for seed in 1_u64..=40 {
        let mut faker = TableFaker::new(seed);
        let table = faker.orders("orders", 80)?;
        let (selection, filters) = random_view(&mut faker, &table);

        let mut got = filter_rows(&table, &filters, &selection)?
            .iter()
            .map(|row| row[0].clone())
            .collect::<Vec<_>>();
        let mut expected = table
            .data
            .iter()
            .filter(|row| naive_passes(&table, row, &filters, &selection))
            .map(|row| row[0].clone())
            .collect::<Vec<_>>();
        got.sort();
        expected.sort();
        assert_eq!(got, expected, "seed {seed}");
    }
    Ok(())
}

#[test]
fn filtered_rows_are_sorted_by_active_columns() -> Result<()> {
    for seed in 1_u64..=40 {
        let mut faker = TableFaker::new(seed);
        let table = faker.orders("orders", 80)?;
        let (selection, filters) = random_view(&mut faker, &table);
        let active = table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, column)| {
                selection.is_visible(&table.name, column)
                    && !filters.terms(&table.name, column).is_empty()
            })
            .map(|(index, _)| index)
            .collect::<Vec<_>>();
        if active.is_empty() {
            continue;
        }

        let rows = filter_rows(&table, &filters, &selection)?;
        let collator = CellCollator::new();
        for pair in rows.windows(2) {
            let ordering = active
                .iter()
                .map(|&index| collator.compare(&pair[0][index], &pair[1][index]))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal);
            assert!(ordering.is_le(), "seed {seed}: {:?} before {:?}", pair[0], pair[1]);
        }
    }
    Ok(())
}

#[test]
fn filters_on_hidden_columns_impose_nothing() -> Result<()> {
    let table = TableFaker::new(9).orders("orders", 30)?;
    let selection = ColumnSelection::new().with_visible("orders", ["id"]);
    let filters = FilterSet::new().with_terms("orders", "status", ["no such status"]);

    assert_eq!(filter_rows(&table, &filters, &selection)?.len(), 30);
    Ok(())
}

#[test]
fn pages_partition_the_filtered_rows() -> Result<()> {
    for seed in 1_u64..=20 {
        let mut faker = TableFaker::new(seed);
        let row_count = 1 + faker.int_n(70);
        let table = faker.orders("orders", row_count)?;
        let (selection, filters) = random_view(&mut faker, &table);
        let rows = filter_rows(&table, &filters, &selection)?;

        for rows_per_page in [1, 3, 10, 100] {
            let pages = page_count(rows.len(), rows_per_page)?;
            assert_eq!(pages, rows.len().div_ceil(rows_per_page));

            let mut rejoined = Vec::new();
            for page in 1..=pages {
                let slice = page_slice(&rows, page, rows_per_page)?;
                assert!(!slice.is_empty() && slice.len() <= rows_per_page);
                rejoined.extend_from_slice(slice);
            }
            assert_eq!(rejoined, rows, "seed {seed}, rows_per_page {rows_per_page}");
            assert!(page_slice(&rows, pages + 1, rows_per_page)?.is_empty());
            assert!(page_slice(&rows, 0, rows_per_page)?.is_empty());
        }
    }
    Ok(())
}

#[test]
fn merged_export_covers_only_filtered_tables_with_visible_columns() -> Result<()> {
    let mut faker = TableFaker::new(4);
    let tables = vec![
        faker.orders("north", 25)?,
        faker.orders("south", 25)?,
        faker.orders("west", 25)?,
    ];
    let selection = ColumnSelection::new()
        .with_visible("north", ["id", "city"])
        .with_visible("south", ["status"]);
    let filters = FilterSet::new()
        .with_terms("north", "city", ["o"])
        .with_terms("west", "city", ["o"]);

    let merged = merged_export(&tables, &filters, &selection)?;
    assert_eq!(
        merged
            .tables()
            .iter()
            .map(|export| export.table.as_str())
            .collect::<Vec<_>>(),
        vec!["north"]
    );

    let snapshot = AnalysisSnapshot::new(&tables, &filters, &selection);
    let north = merged.get("north").map(|export| export.records.len());
    assert_eq!(north, Some(snapshot.filtered_count("north")?));
    for record in &merged.tables()[0].records {
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["id", "city"]);
    }
    Ok(())
}
