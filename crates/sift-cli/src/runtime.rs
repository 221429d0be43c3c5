// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::config::Config;
use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use sift_app::{AnalysisCommand, AnalysisEvent, AnalysisState, Table, TablePage};
use sift_db::UploadClient;
use sift_llm::{CancelToken, Client, Conversation, DecodeOutcome, DecodeSink};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    Sqlite(PathBuf),
    Upload(PathBuf),
    Metadata(PathBuf),
}

/// `--filter <table>:<column>=<term>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterArg {
    pub table: String,
    pub column: String,
    pub term: String,
}

/// `--column <table>:<column>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnArg {
    pub table: String,
    pub column: String,
}

/// Everything the command line asks of the analysis view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewOptions {
    pub columns: Vec<ColumnArg>,
    pub filters: Vec<FilterArg>,
    pub show: Option<String>,
    pub page: Option<usize>,
    pub rows_per_page: Option<usize>,
}

pub fn parse_column_arg(raw: &str) -> Result<ColumnArg> {
    let (table, column) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("--column expects <table>:<column>, got {raw:?}"))?;
    if table.is_empty() || column.is_empty() {
        bail!("--column expects <table>:<column>, got {raw:?}");
    }
    Ok(ColumnArg {
        table: table.to_owned(),
        column: column.to_owned(),
    })
}

pub fn parse_filter_arg(raw: &str) -> Result<FilterArg> {
    let invalid = || anyhow!("--filter expects <table>:<column>=<term>, got {raw:?}");
    let (table, rest) = raw.split_once(':').ok_or_else(invalid)?;
    let (column, term) = rest.split_once('=').ok_or_else(invalid)?;
    if table.is_empty() || column.is_empty() || term.is_empty() {
        return Err(invalid());
    }
    Ok(FilterArg {
        table: table.to_owned(),
        column: column.to_owned(),
        term: term.to_owned(),
    })
}

pub fn load_tables(source: &DataSource, config: &Config) -> Result<Vec<Table>> {
    match source {
        DataSource::Sqlite(path) => sift_db::read_sqlite_export(path).with_context(|| {
            format!(
                "read SQLite export {} -- pass a SQLite file or use --upload",
                path.display()
            )
        }),
        DataSource::Upload(path) => {
            let client = UploadClient::new(config.upload_url(), config.connect_timeout()?)?
                .with_request_timeout(config.upload_timeout()?)?;
            info!(url = client.url(), path = %path.display(), "uploading export");
            client.upload(path)
        }
        DataSource::Metadata(path) => {
            let body = fs::read_to_string(path)
                .with_context(|| format!("read metadata file {}", path.display()))?;
            sift_db::parse_tables_metadata(&body)
                .with_context(|| format!("validate metadata file {}", path.display()))
        }
    }
}

/// Applies one command and turns a rejection into an error.
pub fn apply(state: &mut AnalysisState, command: AnalysisCommand) -> Result<Vec<AnalysisEvent>> {
    let events = state.dispatch(command);
    if let Some(reason) = events.iter().find_map(|event| match event {
        AnalysisEvent::Rejected(reason) => Some(reason.clone()),
        _ => None,
    }) {
        bail!("{reason}");
    }
    debug!(?events, "applied analysis command");
    Ok(events)
}

pub fn build_state(
    tables: Vec<Table>,
    view: &ViewOptions,
    default_rows_per_page: usize,
) -> Result<AnalysisState> {
    let mut state = AnalysisState::with_rows_per_page(default_rows_per_page);
    apply(&mut state, AnalysisCommand::LoadTables(tables))?;

    for column in &view.columns {
        apply(
            &mut state,
            AnalysisCommand::SetColumnVisible {
                table: column.table.clone(),
                column: column.column.clone(),
                visible: true,
            },
        )?;
    }

    let mut grouped: Vec<(&str, &str, Vec<String>)> = Vec::new();
    for filter in &view.filters {
        match grouped
            .iter_mut()
            .find(|(table, column, _)| *table == filter.table && *column == filter.column)
        {
            Some((_, _, terms)) => terms.push(filter.term.clone()),
            None => grouped.push((&filter.table, &filter.column, vec![filter.term.clone()])),
        }
    }
    for (table, column, terms) in grouped {
        apply(
            &mut state,
            AnalysisCommand::SetFilterTerms {
                table: table.to_owned(),
                column: column.to_owned(),
                terms,
            },
        )?;
    }

    if view.show.is_none() && (view.page.is_some() || view.rows_per_page.is_some()) {
        bail!("--page and --rows-per-page need --show <table>");
    }
    if let Some(table) = &view.show {
        if let Some(rows_per_page) = view.rows_per_page {
            apply(
                &mut state,
                AnalysisCommand::SetRowsPerPage {
                    table: table.clone(),
                    rows_per_page,
                },
            )?;
        }
        if let Some(page) = view.page {
            apply(
                &mut state,
                AnalysisCommand::SetPage {
                    table: table.clone(),
                    page,
                },
            )?;
        }
    }
    Ok(state)
}

pub fn write_table_list<W: Write>(out: &mut W, state: &AnalysisState) -> Result<()> {
    let snapshot = state.snapshot();
    for table in state.tables() {
        write!(
            out,
            "{}\t{} rows\tcolumns: {}",
            table.name,
            table.row_count(),
            table.columns.join(", ")
        )?;
        if state.filters().has_active_filters(&table.name) {
            write!(out, "\t{} match filters", snapshot.filtered_count(&table.name)?)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

pub fn write_page<W: Write>(out: &mut W, page: &TablePage) -> Result<()> {
    writeln!(
        out,
        "{}: page {}/{} ({} rows)",
        page.table,
        page.page,
        page.page_count.max(1),
        page.total_rows
    )?;
    if page.columns.is_empty() {
        writeln!(
            out,
            "no visible columns -- mark some with --column {}:<column>",
            page.table
        )?;
        return Ok(());
    }
    writeln!(out, "{}", page.columns.join(" | "))?;
    for row in &page.rows {
        writeln!(out, "{}", row.join(" | "))?;
    }
    Ok(())
}

pub fn export(state: &AnalysisState, dir: &Path) -> Result<Vec<PathBuf>> {
    let merged = state.snapshot().merged_export()?;
    if merged.is_empty() {
        bail!("nothing to export -- mark columns with --column and add at least one --filter");
    }
    sift_app::write_filtered_exports(dir, &merged)
}

/// JSON of the merged export, for `--include-data`.
pub fn analysis_data(state: &AnalysisState) -> Result<Value> {
    Ok(state.snapshot().merged_export()?.to_json())
}

/// Prints each channel's new text as it arrives: display to `out`,
/// think to `err`.
pub struct TerminalSink<O, E> {
    out: O,
    err: E,
    display_written: usize,
    think_written: usize,
}

impl<O: Write, E: Write> TerminalSink<O, E> {
    pub fn new(out: O, err: E) -> Self {
        Self {
            out,
            err,
            display_written: 0,
            think_written: 0,
        }
    }

    #[cfg(test)]
    pub fn into_parts(self) -> (O, E) {
        (self.out, self.err)
    }
}

fn write_suffix<W: Write>(writer: &mut W, text: &str, written: &mut usize) {
    let fresh = text.get(*written..).unwrap_or_default();
    if fresh.is_empty() {
        return;
    }
    // Terminal write failures must not abort the decode.
    let _ = writer.write_all(fresh.as_bytes());
    let _ = writer.flush();
    *written = text.len();
}

impl<O: Write, E: Write> DecodeSink for TerminalSink<O, E> {
    fn on_think_content(&mut self, text: &str) {
        write_suffix(&mut self.err, text, &mut self.think_written);
    }

    fn on_display_content(&mut self, text: &str) {
        write_suffix(&mut self.out, text, &mut self.display_written);
    }

    fn on_complete(&mut self) {
        if self.think_written > 0 {
            let _ = writeln!(self.err);
        }
        if self.display_written > 0 {
            let _ = writeln!(self.out);
        }
    }
}

pub fn build_client(config: &Config, config_path: &Path) -> Result<Client> {
    let endpoint = config.api_endpoint().ok_or_else(|| {
        anyhow!(
            "no [api].endpoint in {}; run `sift --print-example-config` for a template",
            config_path.display()
        )
    })?;
    let model = config.api_model().ok_or_else(|| {
        anyhow!(
            "no [api].model in {}; set the model name the endpoint serves",
            config_path.display()
        )
    })?;
    Ok(Client::new(
        endpoint,
        &config.api_key(),
        model,
        config.connect_timeout()?,
    )?
    .with_decoder_options(config.decoder_options()))
}

/// Runs one question through a conversation, streaming to the terminal.
/// `history` continues a saved conversation; `save_dir` writes the history
/// back out afterwards, including the new exchange.
pub fn ask(
    client: &Client,
    question: &str,
    analysis: Option<&Value>,
    history: Option<&Path>,
    save_dir: Option<&Path>,
) -> Result<DecodeOutcome> {
    let mut conversation = match history {
        Some(path) => Conversation::load(path)?,
        None => Conversation::new(),
    };
    let cancel = CancelToken::new();
    let mut sink = TerminalSink::new(io::stdout(), io::stderr());
    let result = conversation.ask(client, question, analysis, &cancel, &mut sink);

    if let Some(dir) = save_dir {
        let path = conversation.save(dir, OffsetDateTime::now_utc().date())?;
        eprintln!("saved chat history to {}", path.display());
    }

    let outcome = result?;
    if outcome == DecodeOutcome::Failed {
        let reason = conversation
            .entries()
            .iter()
            .rev()
            .find(|entry| entry.is_error)
            .map(|entry| entry.content.clone())
            .unwrap_or_else(|| "Error: stream failed".to_owned());
        bail!("{reason}");
    }
    Ok(outcome)
}
