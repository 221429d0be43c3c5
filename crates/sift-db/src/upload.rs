// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::metadata::{UploadResponse, tables_from_response};
use anyhow::{Context, Result, anyhow, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client as HttpClient;
use reqwest::blocking::multipart::Form;
use sift_app::Table;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};
use url::Url;

pub const DEFAULT_UPLOAD_URL: &str = "http://localhost:5000/upload";

/// Client for the upload service that turns a SQLite file into
/// `tables_metadata`.
#[derive(Debug, Clone)]
pub struct UploadClient {
    url: String,
    connect_timeout: Duration,
    request_timeout: Option<Duration>,
    http: HttpClient,
}

impl UploadClient {
    /// Only connecting is bounded by default: the service may take a long
    /// time to parse a large export before it answers.
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self> {
        let url = url.trim();
        let parsed = Url::parse(url)
            .with_context(|| format!("data.upload_url {url:?} is not a valid URL"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!(
                "data.upload_url must use http or https, got {:?}",
                parsed.scheme()
            );
        }

        Ok(Self {
            url: url.to_owned(),
            connect_timeout,
            request_timeout: None,
            http: build_http(connect_timeout, None)?,
        })
    }

    /// Bounds the whole request, upload and server-side parsing included.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Result<Self> {
        self.http = build_http(self.connect_timeout, timeout)?;
        self.request_timeout = timeout;
        Ok(self)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends `path` as multipart field `file` and validates the tables in
    /// the response.
    pub fn upload(&self, path: &Path) -> Result<Vec<Table>> {
        if !path.is_file() {
            bail!("{} is not a file -- pass the path of a SQLite export", path.display());
        }
        let form = Form::new()
            .file("file", path)
            .with_context(|| format!("attach {} to upload", path.display()))?;

        let response = self
            .http
            .post(&self.url)
            .multipart(form)
            .send()
            .map_err(|error| self.send_error(error))?;

        let status = response.status();
        let body = response.text().context("read upload response")?;
        if !status.is_success() {
            error!(url = %self.url, status = status.as_u16(), "upload rejected");
            return Err(upload_error(status, &body));
        }

        let parsed: UploadResponse =
            serde_json::from_str(&body).context("decode tables_metadata response")?;
        let tables = tables_from_response(parsed)?;
        info!(file = %path.display(), tables = tables.len(), "uploaded SQLite export");
        Ok(tables)
    }

    fn send_error(&self, error: reqwest::Error) -> anyhow::Error {
        error!(url = %self.url, %error, "upload failed");
        if error.is_connect() {
            return anyhow!(
                "cannot reach upload service at {} -- start it or set [data].upload_url ({})",
                self.url,
                error
            );
        }
        if error.is_timeout() {
            return match self.request_timeout {
                Some(timeout) => anyhow!(
                    "upload to {} timed out after {:?} -- the service may still be parsing the export; raise or remove [data].upload_timeout",
                    self.url,
                    timeout
                ),
                None => anyhow!("upload to {} timed out ({})", self.url, error),
            };
        }
        anyhow!("upload to {} failed ({})", self.url, error)
    }
}

fn build_http(connect_timeout: Duration, request_timeout: Option<Duration>) -> Result<HttpClient> {
    HttpClient::builder()
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .build()
        .context("build HTTP client")
}

fn upload_error(status: StatusCode, body: &str) -> anyhow::Error {
    if let Ok(parsed) = serde_json::from_str::<UploadResponse>(body)
        && let Some(message) = parsed.error
    {
        return match parsed.details {
            Some(details) if !details.is_empty() => anyhow!(
                "upload failed ({}): {} ({})",
                status.as_u16(),
                message,
                details
            ),
            _ => anyhow!("upload failed ({}): {}", status.as_u16(), message),
        };
    }
    anyhow!("upload failed ({})", status.as_u16())
}
