// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use sift_app::Table;
use std::collections::VecDeque;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

const CITIES: [&str; 8] = [
    "Amsterdam",
    "Berlin",
    "Lisbon",
    "London",
    "Oslo",
    "Porto",
    "Vienna",
    "Zagreb",
];

const STATUSES: [&str; 5] = ["open", "Closed", "pending", "OPEN", "refunded"];

const PRODUCTS: [&str; 10] = [
    "anchor bolt",
    "bearing",
    "Cable tie",
    "drill bit",
    "gasket",
    "hinge",
    "Lock nut",
    "pipe clamp",
    "spring",
    "washer",
];

/// Row counts written by [`write_sqlite_fixture`].
pub const SQLITE_FIXTURE_CUSTOMERS: usize = 3;
pub const SQLITE_FIXTURE_ORDERS: usize = 3;

#[derive(Debug, Clone)]
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
        if state == 0 {
            state = 0xA409_3822_299F_31D0;
        }
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);

        let mut x = self.state;
        x ^= x >> 13;
        x ^= x << 7;
        x ^= x >> 17;
        x
    }

    fn int_n(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        (self.next_u64() % (n as u64)) as usize
    }

    fn pick<'a>(&mut self, values: &[&'a str]) -> &'a str {
        values[self.int_n(values.len())]
    }
}

/// Seeded generator of order-like tables with mixed-case text, repeated
/// values and empty cells, for exercising filters and sorting.
#[derive(Debug, Clone)]
pub struct TableFaker {
    rng: DeterministicRng,
}

impl TableFaker {
    pub fn new(seed: u64) -> Self {
        let normalized = if seed == 0 { 1 } else { seed };
        Self {
            rng: DeterministicRng::new(normalized),
        }
    }

    pub fn int_n(&mut self, n: usize) -> usize {
        self.rng.int_n(n)
    }

    pub fn orders(&mut self, name: &str, rows: usize) -> Result<Table> {
        let columns = ["id", "product", "city", "status", "quantity"]
            .map(str::to_owned)
            .to_vec();
        let data = (1..=rows)
            .map(|id| {
                let city = if self.rng.int_n(7) == 0 {
                    String::new()
                } else {
                    self.rng.pick(&CITIES).to_owned()
                };
                vec![
                    id.to_string(),
                    self.rng.pick(&PRODUCTS).to_owned(),
                    city,
                    self.rng.pick(&STATUSES).to_owned(),
                    (1 + self.rng.int_n(40)).to_string(),
                ]
            })
            .collect();
        Table::new(name, columns, data)
    }

    /// A term likely to hit some rows of an [`orders`](Self::orders) table.
    pub fn term(&mut self) -> String {
        let word = match self.rng.int_n(3) {
            0 => self.rng.pick(&CITIES),
            1 => self.rng.pick(&STATUSES),
            _ => self.rng.pick(&PRODUCTS),
        };
        let start = self.rng.int_n(word.len().saturating_sub(2));
        let mut term = word[start..(start + 3).min(word.len())].to_owned();
        if self.rng.int_n(2) == 0 {
            term = term.to_uppercase();
        }
        term
    }
}

fn table(name: &str, columns: &[&str], rows: &[&[&str]]) -> Result<Table> {
    Table::new(
        name,
        columns.iter().map(|column| (*column).to_owned()).collect(),
        rows.iter()
            .map(|row| row.iter().map(|cell| (*cell).to_owned()).collect())
            .collect(),
    )
}

/// Two small tables shared across crates: `customers` and `orders`.
pub fn sample_tables() -> Result<Vec<Table>> {
    Ok(vec![
        table(
            "customers",
            &["id", "name", "city"],
            &[
                &["1", "Ada", "London"],
                &["2", "Grace", ""],
                &["3", "Linus", "Helsinki"],
                &["4", "Barbara", "london"],
            ],
        )?,
        table(
            "orders",
            &["id", "customer_id", "status", "total"],
            &[
                &["10", "1", "open", "12.5"],
                &["11", "3", "closed", "40.0"],
                &["12", "1", "Open", "7.25"],
                &["13", "4", "refunded", "3.0"],
            ],
        )?,
    ])
}

/// `{"tables_metadata": [...]}` as the upload service returns it.
pub fn tables_metadata_json(tables: &[Table]) -> String {
    serde_json::json!({
        "tables_metadata": tables
            .iter()
            .map(|table| {
                serde_json::json!({
                    "name": table.name,
                    "columns": table.columns,
                    "data": table.data,
                })
            })
            .collect::<Vec<_>>()
    })
    .to_string()
}

pub fn temp_db_path() -> Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let db_path = dir.path().join("export.db");
    Ok((dir, db_path))
}

/// Writes a SQLite file with `customers` (AUTOINCREMENT, so the file also
/// carries `sqlite_sequence`) and `orders` holding integers, reals, text,
/// NULLs and a blob.
pub fn write_sqlite_fixture(path: &Path) -> Result<()> {
    let conn = Connection::open(path)
        .with_context(|| format!("open fixture database {}", path.display()))?;
    conn.execute_batch(
        "
        CREATE TABLE customers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            city TEXT
        );
        CREATE TABLE orders (
            id INTEGER PRIMARY KEY,
            customer_id INTEGER,
            total REAL,
            note TEXT,
            receipt BLOB
        );
        ",
    )
    .context("create fixture schema")?;

    for (name, city) in [
        ("Ada", Some("London")),
        ("Grace", None),
        ("Linus", Some("Helsinki")),
    ] {
        conn.execute(
            "INSERT INTO customers (name, city) VALUES (?1, ?2)",
            params![name, city],
        )
        .context("insert fixture customer")?;
    }

    let receipt: &[u8] = &[0xDE, 0xAD, 0xBE, 0xEF];
    conn.execute(
        "INSERT INTO orders VALUES (1, 1, 12.5, 'first order', ?1)",
        params![receipt],
    )
    .context("insert fixture order")?;
    conn.execute_batch(
        "
        INSERT INTO orders VALUES (2, 3, 40.0, NULL, NULL);
        INSERT INTO orders VALUES (3, 1, 7.25, 'Repeat', NULL);
        ",
    )
    .context("insert fixture orders")?;
    Ok(())
}

/// One SSE `data:` line carrying `content` as the first choice's delta.
pub fn sse_data_line(content: &str) -> String {
    let token = serde_json::json!({
        "choices": [{ "delta": { "content": content }, "finish_reason": null }]
    });
    format!("data: {token}\n")
}

pub fn sse_finish_line(reason: &str) -> String {
    let token = serde_json::json!({ "choices": [{ "delta": {}, "finish_reason": reason }] });
    format!("data: {token}\n")
}

/// A complete stream body: one data line per delta, then `data: [DONE]`.
pub fn sse_body(contents: &[&str]) -> String {
    let mut body = contents
        .iter()
        .map(|content| sse_data_line(content))
        .collect::<String>();
    body.push_str("data: [DONE]\n");
    body
}

/// Serves fixed byte chunks one `read` at a time, optionally failing once
/// the chunks run out.
#[derive(Debug, Clone, Default)]
pub struct ChunkedReader {
    chunks: VecDeque<Vec<u8>>,
    failure: Option<io::ErrorKind>,
    reads: usize,
}

impl ChunkedReader {
    pub fn new<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Splits `body` into pieces of `size` bytes, ignoring character
    /// boundaries on purpose.
    pub fn split_every(body: &[u8], size: usize) -> Self {
        Self::new(body.chunks(size.max(1)).map(<[u8]>::to_vec))
    }

    pub fn then_fail(mut self, kind: io::ErrorKind) -> Self {
        self.failure = Some(kind);
        self
    }

    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads += 1;
        let Some(mut chunk) = self.chunks.pop_front() else {
            return match self.failure.take() {
                Some(kind) => Err(io::Error::new(kind, "fixture stream failure")),
                None => Ok(0),
            };
        };
        if chunk.len() > buf.len() {
            let rest = chunk.split_off(buf.len());
            self.chunks.push_front(rest);
        }
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}

#[cfg(test)]
mod tests {
    use super::{ChunkedReader, TableFaker, sample_tables, sse_body, tables_metadata_json};
    use std::collections::BTreeSet;
    use std::io::{self, Read};

    #[test]
    fn faker_is_deterministic_per_seed() -> anyhow::Result<()> {
        let first = TableFaker::new(7).orders("orders", 20)?;
        let second = TableFaker::new(7).orders("orders", 20)?;
        assert_eq!(first, second);
        assert_eq!(first.row_count(), 20);
        assert_eq!(first.column_count(), 5);
        Ok(())
    }

    #[test]
    fn variety_across_seeds() -> anyhow::Result<()> {
        let mut products = BTreeSet::new();
        for seed in 0_u64..20_u64 {
            let table = TableFaker::new(seed).orders("orders", 1)?;
            products.insert(table.data[0][1].clone());
        }
        assert!(products.len() >= 4, "got {}", products.len());
        Ok(())
    }

    #[test]
    fn terms_are_short_fragments() {
        let mut faker = TableFaker::new(3);
        for _ in 0..50 {
            let term = faker.term();
            assert!(!term.is_empty() && term.len() <= 3, "term {term:?}");
        }
    }

    #[test]
    fn sse_body_ends_with_done() {
        let body = sse_body(&["a", "b"]);
        assert_eq!(body.lines().count(), 3);
        assert!(body.ends_with("data: [DONE]\n"));
    }

    #[test]
    fn chunked_reader_respects_small_buffers_then_fails() {
        let mut reader =
            ChunkedReader::new([b"hello".to_vec()]).then_fail(io::ErrorKind::BrokenPipe);
        let mut buf = [0_u8; 3];
        assert_eq!(reader.read(&mut buf).ok(), Some(3));
        assert_eq!(&buf, b"hel");
        assert_eq!(reader.read(&mut buf).ok(), Some(2));
        let error = reader.read(&mut buf).expect_err("failure after chunks");
        assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(reader.read(&mut buf).ok(), Some(0));
        assert_eq!(reader.reads(), 4);
    }

    #[test]
    fn metadata_json_matches_upload_shape() -> anyhow::Result<()> {
        let tables = sample_tables()?;
        let parsed: serde_json::Value = serde_json::from_str(&tables_metadata_json(&tables))?;
        assert_eq!(parsed["tables_metadata"][0]["name"], "customers");
        assert_eq!(parsed["tables_metadata"][1]["data"][0][2], "open");
        Ok(())
    }
}
