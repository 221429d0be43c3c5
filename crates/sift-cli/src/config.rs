// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use sift_app::DEFAULT_ROWS_PER_PAGE;
use sift_db::DEFAULT_UPLOAD_URL;
use sift_llm::DecoderOptions;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "sift";
const CONFIG_VERSION: i64 = 1;
const DEFAULT_CONNECT_TIMEOUT: &str = "10s";
const DEFAULT_LOG_FILTER: &str = "warn";
const CONFIG_PATH_ENV: &str = "SIFT_CONFIG_PATH";
const API_KEY_ENV: &str = "SIFT_API_KEY";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub version: i64,
    #[serde(default)]
    pub api: Api,
    #[serde(default)]
    pub data: Data,
    #[serde(default)]
    pub decoder: Decoder,
    #[serde(default)]
    pub log: Log,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            api: Api::default(),
            data: Data::default(),
            decoder: Decoder::default(),
            log: Log::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Api {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub connect_timeout: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Data {
    pub upload_url: Option<String>,
    /// Unset means uploads may take as long as the service needs.
    pub upload_timeout: Option<String>,
    pub rows_per_page: Option<i64>,
}

impl Default for Data {
    fn default() -> Self {
        Self {
            upload_url: Some(DEFAULT_UPLOAD_URL.to_owned()),
            upload_timeout: None,
            rows_per_page: Some(DEFAULT_ROWS_PER_PAGE as i64),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Decoder {
    pub carry_partial_tags: Option<bool>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self {
            carry_partial_tags: Some(true),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    pub filter: Option<String>,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            filter: Some(DEFAULT_LOG_FILTER.to_owned()),
        }
    }
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        let config_root = dirs::config_dir().ok_or_else(|| {
            anyhow!("cannot resolve config directory; set {CONFIG_PATH_ENV} to the config file")
        })?;
        Ok(config_root.join(APP_NAME).join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let value: toml::Value = toml::from_str(&raw)
            .with_context(|| format!("parse TOML config {}", path.display()))?;

        let version = value
            .get("version")
            .and_then(toml::Value::as_integer)
            .ok_or_else(|| {
                anyhow!(
                    "config file {} is not versioned. Add `version = 1` and put values under [api], [data], [decoder], and [log]",
                    path.display()
                )
            })?;

        if version != CONFIG_VERSION {
            bail!(
                "unsupported config version {} in {}; expected version = 1",
                version,
                path.display()
            );
        }

        let config: Config = value
            .try_into()
            .with_context(|| format!("decode config {}", path.display()))?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if let Some(timeout) = &self.api.connect_timeout {
            let parsed = parse_duration(timeout)?;
            if parsed <= Duration::ZERO {
                bail!(
                    "api.connect_timeout in {} must be positive, got {}",
                    path.display(),
                    timeout
                );
            }
        }

        if let Some(timeout) = &self.data.upload_timeout
            && parse_duration(timeout)? <= Duration::ZERO
        {
            bail!(
                "data.upload_timeout in {} must be positive, got {}; remove it for no limit",
                path.display(),
                timeout
            );
        }

        if let Some(rows) = self.data.rows_per_page
            && rows <= 0
        {
            bail!(
                "data.rows_per_page in {} must be positive, got {}",
                path.display(),
                rows
            );
        }

        if let Some(filter) = &self.log.filter
            && filter.trim().is_empty()
        {
            bail!(
                "log.filter in {} must not be empty; use \"warn\" for the default",
                path.display()
            );
        }

        Ok(())
    }

    pub fn api_endpoint(&self) -> Option<&str> {
        non_empty(self.api.endpoint.as_deref())
    }

    pub fn api_model(&self) -> Option<&str> {
        non_empty(self.api.model.as_deref())
    }

    /// `SIFT_API_KEY` wins over `[api].api_key`.
    pub fn api_key(&self) -> String {
        env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.api.api_key.clone())
            .unwrap_or_default()
    }

    pub fn connect_timeout(&self) -> Result<Duration> {
        parse_duration(
            self.api
                .connect_timeout
                .as_deref()
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        )
    }

    pub fn upload_url(&self) -> &str {
        non_empty(self.data.upload_url.as_deref()).unwrap_or(DEFAULT_UPLOAD_URL)
    }

    pub fn upload_timeout(&self) -> Result<Option<Duration>> {
        non_empty(self.data.upload_timeout.as_deref())
            .map(parse_duration)
            .transpose()
    }

    pub fn rows_per_page(&self) -> usize {
        self.data
            .rows_per_page
            .and_then(|rows| usize::try_from(rows).ok())
            .filter(|rows| *rows > 0)
            .unwrap_or(DEFAULT_ROWS_PER_PAGE)
    }

    pub fn decoder_options(&self) -> DecoderOptions {
        DecoderOptions {
            carry_partial_tags: self.decoder.carry_partial_tags.unwrap_or(true),
        }
    }

    pub fn log_filter(&self) -> &str {
        non_empty(self.log.filter.as_deref()).unwrap_or(DEFAULT_LOG_FILTER)
    }

    pub fn example_config(path: &Path) -> String {
        format!(
            "# sift config\n# Place this file at: {}\n\nversion = 1\n\n[api]\n# Full chat-completions URL, for example https://api.deepseek.com/chat/completions\n# endpoint = \"\"\n# Prefer the {} environment variable over storing the key here.\n# api_key = \"\"\n# model = \"deepseek-reasoner\"\nconnect_timeout = \"{}\"\n\n[data]\nupload_url = \"{}\"\n# Limit for upload plus server-side parsing; unset waits indefinitely.\n# upload_timeout = \"10m\"\nrows_per_page = {}\n\n[decoder]\n# Recognize <think> tags split across streamed tokens.\ncarry_partial_tags = true\n\n[log]\n# tracing filter directive; {} overrides it.\nfilter = \"{}\"\n",
            path.display(),
            API_KEY_ENV,
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_UPLOAD_URL,
            DEFAULT_ROWS_PER_PAGE,
            crate::logging::LOG_ENV,
            DEFAULT_LOG_FILTER,
        )
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// `<N>ms`, `<N>s` or `<N>m`.
fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let millis_per_unit: u64 = match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        _ => bail!(
            "invalid duration {raw:?}; use one of: <N>ms, <N>s, <N>m (for example 500ms or 10s)"
        ),
    };
    let count: u64 = digits.parse().with_context(|| {
        format!("invalid duration {raw:?}; expected a whole number before {unit:?}")
    })?;
    let millis = count
        .checked_mul(millis_per_unit)
        .ok_or_else(|| anyhow!("duration {raw:?} is too large"))?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::{Config, parse_duration};
    use anyhow::Result;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    fn write_config(content: &str) -> Result<(tempfile::TempDir, PathBuf)> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.toml");
        std::fs::write(&path, content)?;
        Ok((temp, path))
    }

    pub(crate) fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[test]
    fn missing_config_uses_defaults() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let config = Config::load(&temp.path().join("missing.toml"))?;
        assert_eq!(config.version, 1);
        assert_eq!(config.rows_per_page(), 10);
        assert_eq!(config.upload_url(), "http://localhost:5000/upload");
        assert_eq!(config.upload_timeout()?, None);
        assert_eq!(config.connect_timeout()?, Duration::from_secs(10));
        assert!(config.decoder_options().carry_partial_tags);
        assert_eq!(config.log_filter(), "warn");
        assert_eq!(config.api_endpoint(), None);
        Ok(())
    }

    #[test]
    fn unversioned_config_is_rejected_with_actionable_message() -> Result<()> {
        let (_temp, path) = write_config("[api]\nmodel=\"deepseek-chat\"\n")?;
        let error = Config::load(&path).expect_err("unversioned config should fail");
        let message = error.to_string();
        assert!(message.contains("version = 1"));
        assert!(message.contains("[api], [data], [decoder], and [log]"));
        Ok(())
    }

    #[test]
    fn v1_config_parses() -> Result<()> {
        let (_temp, path) = write_config(
            "version = 1\n[api]\nendpoint = \"https://api.example.com/v1/chat/completions\"\nmodel = \"deepseek-reasoner\"\nconnect_timeout = \"500ms\"\n[data]\nrows_per_page = 25\nupload_timeout = \"2m\"\n[decoder]\ncarry_partial_tags = false\n[log]\nfilter = \"sift=debug\"\n",
        )?;

        let config = Config::load(&path)?;
        assert_eq!(
            config.api_endpoint(),
            Some("https://api.example.com/v1/chat/completions")
        );
        assert_eq!(config.api_model(), Some("deepseek-reasoner"));
        assert_eq!(config.connect_timeout()?, Duration::from_millis(500));
        assert_eq!(config.rows_per_page(), 25);
        assert_eq!(config.upload_timeout()?, Some(Duration::from_secs(120)));
        assert!(!config.decoder_options().carry_partial_tags);
        assert_eq!(config.log_filter(), "sift=debug");
        Ok(())
    }

    #[test]
    fn malformed_config_returns_parse_error() -> Result<()> {
        let (_temp, path) = write_config("{{not toml")?;
        let error = Config::load(&path).expect_err("malformed config should fail");
        assert!(error.to_string().contains("parse TOML config"));
        Ok(())
    }

    #[test]
    fn unsupported_config_version_is_rejected() -> Result<()> {
        let (_temp, path) = write_config("version = 2\n")?;
        let error = Config::load(&path).expect_err("v2 config should fail");
        assert!(error.to_string().contains("unsupported config version 2"));
        Ok(())
    }

    #[test]
    fn invalid_values_are_rejected() -> Result<()> {
        for (content, expected) in [
            ("version = 1\n[data]\nrows_per_page = 0\n", "must be positive"),
            ("version = 1\n[api]\nconnect_timeout = \"0s\"\n", "must be positive"),
            ("version = 1\n[data]\nupload_timeout = \"0ms\"\n", "must be positive"),
            ("version = 1\n[api]\nconnect_timeout = \"soon\"\n", "invalid duration"),
            ("version = 1\n[log]\nfilter = \" \"\n", "must not be empty"),
        ] {
            let (_temp, path) = write_config(content)?;
            let error = Config::load(&path).expect_err(content);
            assert!(error.to_string().contains(expected), "{content}: {error}");
        }
        Ok(())
    }

    #[test]
    fn default_path_honors_env_override() -> Result<()> {
        let _guard = env_lock();
        let temp = tempfile::tempdir()?;
        let override_path = temp.path().join("custom-config.toml");
        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::set_var("SIFT_CONFIG_PATH", &override_path);
        }
        let resolved = Config::default_path()?;
        // SAFETY: test cleanup for process-local env mutation.
        unsafe {
            std::env::remove_var("SIFT_CONFIG_PATH");
        }
        assert_eq!(resolved, override_path);
        Ok(())
    }

    #[test]
    fn default_path_uses_config_toml_suffix_when_no_env_override() -> Result<()> {
        let _guard = env_lock();
        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::remove_var("SIFT_CONFIG_PATH");
        }
        let path = Config::default_path()?;
        assert!(path.ends_with("sift/config.toml"));
        Ok(())
    }

    #[test]
    fn api_key_env_overrides_config_value() -> Result<()> {
        let _guard = env_lock();
        let (_temp, path) = write_config("version = 1\n[api]\napi_key = \"from-config\"\n")?;
        let config = Config::load(&path)?;

        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::remove_var("SIFT_API_KEY");
        }
        assert_eq!(config.api_key(), "from-config");

        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::set_var("SIFT_API_KEY", "from-env");
        }
        let resolved = config.api_key();
        // SAFETY: test cleanup for process-local env mutation.
        unsafe {
            std::env::remove_var("SIFT_API_KEY");
        }
        assert_eq!(resolved, "from-env");
        Ok(())
    }

    #[test]
    fn timeout_parses_ms_seconds_and_minutes() -> Result<()> {
        assert_eq!(parse_duration("500ms")?, Duration::from_millis(500));
        assert_eq!(parse_duration("5s")?, Duration::from_secs(5));
        assert_eq!(parse_duration("2m")?, Duration::from_secs(120));
        Ok(())
    }

    #[test]
    fn example_config_round_trips_through_load() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.toml");
        std::fs::write(&path, Config::example_config(&path))?;

        let config = Config::load(&path)?;
        assert_eq!(config.rows_per_page(), 10);
        assert_eq!(config.api_endpoint(), None);
        Ok(())
    }
}
