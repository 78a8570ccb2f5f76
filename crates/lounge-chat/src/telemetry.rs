//! Tracing initialisation for processes embedding the chat core.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "lounge_chat=debug,lounge_store=info,warn";

/// Install the global `fmt` subscriber. Honours `RUST_LOG` and falls back
/// to a filter that is verbose for the chat crates only.
///
/// Calling this more than once is harmless: later calls leave the first
/// subscriber in place.
pub fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}
