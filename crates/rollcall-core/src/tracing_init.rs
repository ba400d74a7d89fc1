//! Shared tracing/logging initialization.
//!
//! Binaries call this once at startup. Tests that spin up several hosts in
//! one process may call it repeatedly; only the first call installs a
//! subscriber.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- filter used when `RUST_LOG` is unset or invalid
///   (e.g. `"rollcall_host=info,rollcall_client=info"`).
/// * `log_json` -- when `true`, emit flattened JSON lines so the structured
///   fields (`session_id`, `account_id`, `reason`) are top-level keys.
pub fn init_tracing(default_filter: &str, log_json: bool) -> Result<(), TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(env_filter);
    let fmt = tracing_subscriber::fmt::layer().with_target(true);
    if log_json {
        registry.with(fmt.json().flatten_event(true)).try_init()
    } else {
        registry.with(fmt.compact()).try_init()
    }
}
