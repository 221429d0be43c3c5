// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod config;
mod logging;
mod runtime;

use anyhow::{Context, Result, anyhow, bail};
use config::Config;
use runtime::{ColumnArg, DataSource, FilterArg, ViewOptions};
use sift_db::UploadClient;
use std::env;
use std::io::{self, Write};
use std::path::PathBuf;

fn main() {
    if let Err(error) = run() {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = parse_cli_args(env::args().skip(1), Config::default_path()?)?;
    if options.show_help {
        print_help();
        return Ok(());
    }

    if options.print_config_path {
        println!("{}", options.config_path.display());
        return Ok(());
    }

    if options.print_example {
        print!("{}", Config::example_config(&options.config_path));
        return Ok(());
    }

    let config = Config::load(&options.config_path).with_context(|| {
        format!(
            "load config {}; run `sift --print-example-config` to generate a v1 template",
            options.config_path.display()
        )
    })?;
    logging::init_logging(config.log_filter());

    if options.check_only {
        let timeout = config.connect_timeout()?;
        UploadClient::new(config.upload_url(), timeout).with_context(|| {
            format!(
                "invalid [data] config in {}; fix upload_url",
                options.config_path.display()
            )
        })?;
        if config.api_endpoint().is_some() {
            runtime::build_client(&config, &options.config_path).with_context(|| {
                format!(
                    "invalid [api] config in {}; fix endpoint/model/connect_timeout values",
                    options.config_path.display()
                )
            })?;
        }
        println!("config ok: {}", options.config_path.display());
        return Ok(());
    }

    let state = match &options.source {
        Some(source) => {
            let tables = runtime::load_tables(source, &config)?;
            Some(runtime::build_state(
                tables,
                &options.view,
                config.rows_per_page(),
            )?)
        }
        None => None,
    };

    let needs_data = options.list
        || options.view.show.is_some()
        || options.export_dir.is_some()
        || options.include_data;
    let state = match state {
        Some(state) => state,
        None if needs_data || options.view != ViewOptions::default() => {
            bail!("no data loaded -- pass --sqlite <file>, --upload <file> or --metadata <file>")
        }
        None if options.question.is_none() => {
            print_help();
            return Ok(());
        }
        None => sift_app::AnalysisState::default(),
    };

    let mut stdout = io::stdout().lock();
    let has_action = options.view.show.is_some()
        || options.export_dir.is_some()
        || options.question.is_some();
    if options.list || (options.source.is_some() && !has_action) {
        runtime::write_table_list(&mut stdout, &state)?;
    }
    if let Some(table) = &options.view.show {
        let page = state.snapshot().page(table)?;
        runtime::write_page(&mut stdout, &page)?;
    }
    if let Some(dir) = &options.export_dir {
        for path in runtime::export(&state, dir)? {
            writeln!(stdout, "wrote {}", path.display())?;
        }
    }
    drop(stdout);

    if let Some(question) = &options.question {
        let client = runtime::build_client(&config, &options.config_path)?;
        let analysis = if options.include_data {
            Some(runtime::analysis_data(&state)?)
        } else {
            None
        };
        runtime::ask(
            &client,
            question,
            analysis.as_ref(),
            options.chat_history.as_deref(),
            options.save_chat_dir.as_deref(),
        )?;
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    config_path: PathBuf,
    source: Option<DataSource>,
    view: ViewOptions,
    list: bool,
    export_dir: Option<PathBuf>,
    question: Option<String>,
    include_data: bool,
    chat_history: Option<PathBuf>,
    save_chat_dir: Option<PathBuf>,
    print_config_path: bool,
    print_example: bool,
    check_only: bool,
    show_help: bool,
}

fn parse_cli_args<I, S>(args: I, default_config_path: PathBuf) -> Result<CliOptions>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = CliOptions {
        config_path: default_config_path,
        source: None,
        view: ViewOptions::default(),
        list: false,
        export_dir: None,
        question: None,
        include_data: false,
        chat_history: None,
        save_chat_dir: None,
        print_config_path: false,
        print_example: false,
        check_only: false,
        show_help: false,
    };

    let mut iter = args.into_iter().map(|arg| arg.as_ref().to_owned());
    while let Some(arg) = iter.next() {
        let mut value_for = |what: &str| -> Result<String> {
            iter.next().ok_or_else(|| anyhow!("{arg} requires {what}"))
        };
        match arg.as_str() {
            "--config" => {
                options.config_path = PathBuf::from(value_for("a file path")?);
            }
            "--sqlite" | "--upload" | "--metadata" => {
                if options.source.is_some() {
                    bail!("pass only one of --sqlite, --upload or --metadata");
                }
                let path = PathBuf::from(value_for("a file path")?);
                options.source = Some(match arg.as_str() {
                    "--sqlite" => DataSource::Sqlite(path),
                    "--upload" => DataSource::Upload(path),
                    _ => DataSource::Metadata(path),
                });
            }
            "--list" => {
                options.list = true;
            }
            "--show" => {
                options.view.show = Some(value_for("a table name")?);
            }
            "--column" => {
                let raw = value_for("<table>:<column>")?;
                let column: ColumnArg = runtime::parse_column_arg(&raw)?;
                options.view.columns.push(column);
            }
            "--filter" => {
                let raw = value_for("<table>:<column>=<term>")?;
                let filter: FilterArg = runtime::parse_filter_arg(&raw)?;
                options.view.filters.push(filter);
            }
            "--page" => {
                options.view.page = Some(parse_positive("--page", &value_for("a number")?)?);
            }
            "--rows-per-page" => {
                let raw = value_for("a number")?;
                options.view.rows_per_page = Some(parse_positive("--rows-per-page", &raw)?);
            }
            "--export" => {
                options.export_dir = Some(PathBuf::from(value_for("a directory")?));
            }
            "--ask" => {
                let question = value_for("a question")?;
                if question.trim().is_empty() {
                    bail!("--ask requires a non-empty question");
                }
                options.question = Some(question);
            }
            "--include-data" => {
                options.include_data = true;
            }
            "--chat-history" => {
                options.chat_history = Some(PathBuf::from(value_for("a file path")?));
            }
            "--save-chat" => {
                options.save_chat_dir = Some(PathBuf::from(value_for("a directory")?));
            }
            "--print-config-path" => {
                options.print_config_path = true;
            }
            "--print-example-config" => {
                options.print_example = true;
            }
            "--check" => {
                options.check_only = true;
            }
            "--help" | "-h" => {
                options.show_help = true;
            }
            unknown => {
                return Err(anyhow!(
                    "unknown argument {unknown:?}; run with --help to see supported options"
                ));
            }
        }
    }

    let chat_flags =
        options.include_data || options.chat_history.is_some() || options.save_chat_dir.is_some();
    if chat_flags && options.question.is_none() {
        bail!(
            "--include-data, --chat-history and --save-chat only apply together with --ask <question>"
        );
    }

    Ok(options)
}

fn parse_positive(flag: &str, raw: &str) -> Result<usize> {
    match raw.parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        _ => bail!("{flag} expects a positive whole number, got {raw:?}"),
    }
}

fn print_help() {
    println!("sift: browse, filter and discuss tables from a SQLite export");
    println!("  --config <path>               Use a specific config path");
    println!("  --sqlite <file>               Read tables from a local SQLite file");
    println!("  --upload <file>               Send a SQLite file to the upload service");
    println!("  --metadata <file>             Read a saved upload response (tables_metadata JSON)");
    println!("  --list                        List tables and row counts");
    println!("  --show <table>                Print one page of a table");
    println!("  --column <table>:<column>     Mark a column visible (repeatable)");
    println!("  --filter <table>:<col>=<term> Add a substring filter term (repeatable)");
    println!("  --page <n>                    Page of --show to print (from 1)");
    println!("  --rows-per-page <n>           Rows per page for --show");
    println!("  --export <dir>                Write <table>_filtered.json for filtered tables");
    println!("  --ask <question>              Stream an answer from the configured API");
    println!("  --include-data                Attach the filtered data to --ask");
    println!("  --chat-history <file>         Continue a saved conversation with --ask");
    println!("  --save-chat <dir>             Save the conversation after --ask");
    println!("  --print-config-path           Print resolved config path");
    println!("  --print-example-config        Print a v1 config template");
    println!("  --check                       Validate config and exit");
    println!("  --help                        Show this help");
}
