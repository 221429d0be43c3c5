// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

//! Boundary ingestion: everything that turns outside data into validated
//! [`sift_app::Table`]s.

mod metadata;
mod sqlite;
mod upload;

pub use metadata::parse_tables_metadata;
pub use sqlite::{ExportReader, read_sqlite_export, validate_db_path};
pub use upload::{DEFAULT_UPLOAD_URL, UploadClient};
