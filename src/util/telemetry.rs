//! Tracing bootstrap for pool diagnostics.

/// Filter applied when `RUST_LOG` is unset: pool lifecycle and routing
/// decisions at `info`, everything else silent.
const DEFAULT_FILTER: &str = "procpool=info";

/// Install an env-filter subscriber for the pool's tracing output.
///
/// Honors `RUST_LOG` when set (e.g. `RUST_LOG=procpool=trace` to watch
/// individual routing decisions) and falls back to [`DEFAULT_FILTER`]
/// otherwise. Embedders that already installed their own subscriber are
/// left alone.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Like [`init_tracing`], but with an explicit filter directive (e.g.
/// `"procpool=debug"`), ignoring `RUST_LOG` entirely.
pub fn init_tracing_with_filter(filter: &str) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .try_init();
}
