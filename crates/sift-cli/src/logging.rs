// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_ENV: &str = "SIFT_LOG";
const FALLBACK_FILTER: &str = "warn";

/// Picks the filter directive: `SIFT_LOG`, then the config value, then `warn`.
/// Directives that fail to parse are skipped.
fn resolve_filter<'a>(env_value: Option<&'a str>, config_filter: &'a str) -> &'a str {
    [env_value, Some(config_filter)]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .find(|directive| EnvFilter::try_new(directive).is_ok())
        .unwrap_or(FALLBACK_FILTER)
}

/// Installs the stderr subscriber. A second call is a no-op.
pub fn init_logging(config_filter: &str) {
    let env_value = std::env::var(LOG_ENV).ok();
    let directive = resolve_filter(env_value.as_deref(), config_filter);
    let filter =
        EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .try_init();
}
