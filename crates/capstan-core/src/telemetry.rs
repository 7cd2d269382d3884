//! Tracing initialisation for Capstan binaries.
//!
//! Call [`init_tracing`] once at program start. When `RUST_LOG` is unset the
//! default filter runs Capstan crates at the requested level while keeping
//! the chatty storage and HTTP dependencies at `warn`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// * `json` — when `true`, emit newline-delimited JSON log lines.
/// * `level` — default verbosity when `RUST_LOG` is not set.
///
/// Returns whether this call installed the subscriber; `false` means one was
/// already set (subsequent calls are no-ops).
pub fn init_tracing(json: bool, level: Level) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},surrealdb=warn,reqwest=warn")));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .is_ok()
    }
}
