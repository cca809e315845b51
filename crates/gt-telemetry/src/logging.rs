use tracing_subscriber::{fmt, EnvFilter};

/// Output format selector, matching `general.log_format` in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

impl LogFormat {
    /// Anything other than `"json"` falls back to human-readable output.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Human
        }
    }

    fn label(&self) -> &'static str {
        match self {
            LogFormat::Human => "human-readable",
            LogFormat::Json => "json",
        }
    }
}

/// Install the global subscriber.
///
/// Uses the `RUST_LOG` environment variable if set, otherwise falls back
/// to `default_level` (e.g. "info", "debug", "gt_tracker=debug,warn").
///
/// Safe to call multiple times (e.g. in tests) -- only the first call
/// installs a subscriber, later ones are no-ops.
pub fn init(service_name: &str, default_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true);

    let installed = match format {
        LogFormat::Human => builder.with_thread_ids(false).try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    if installed.is_ok() {
        tracing::info!(service = service_name, format = format.label(), "logging initialised");
    }
}

/// Human-readable output.
pub fn init_logging(service_name: &str, default_level: &str) {
    init(service_name, default_level, LogFormat::Human);
}

/// One JSON object per line.
pub fn init_logging_json(service_name: &str, default_level: &str) {
    init(service_name, default_level, LogFormat::Json);
}
