//! Logging setup for the binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when neither `LEDGERCHECK_LOG` nor `RUST_LOG` is set.
const DEFAULT_FILTER: &str = "ledgercheck=info,warn";

fn env_filter() -> EnvFilter {
    std::env::var("LEDGERCHECK_LOG")
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Logs go to stderr so stdout only carries
/// command output.
pub fn init(json: bool) {
    let registry = tracing_subscriber::registry().with(env_filter());
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("Failed to init logging: {}", e);
    }
}
