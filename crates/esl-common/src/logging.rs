//! Logging setup for the bridge binaries
//!
//! `LOG_FORMAT=json` switches to one JSON object per line; anything else
//! gives human-readable output. `RUST_LOG` filters as usual and defaults to
//! `info` with the HTTP stack kept at `warn`.
//!
//! ```rust,ignore
//! esl_common::logging::init_logging("esl-bridge");
//! tracing::info!(host = %host, "Heartbeat received");
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_DIRECTIVES: &str = "info,hyper=warn,tower_http=warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }

    pub fn from_env() -> Self {
        std::env::var("LOG_FORMAT")
            .map(|v| Self::parse(&v))
            .unwrap_or(LogFormat::Text)
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(service_name: &str) {
    let format = LogFormat::from_env();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_target(true))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_ansi(true))
            .try_init(),
    };

    if installed.is_ok() {
        tracing::info!(service = service_name, format = ?format, "Logging initialized");
    }
}
