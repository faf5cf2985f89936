//! Process-wide tracing setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber
///
/// Logs go to stderr; stdout carries command output. `RUST_LOG` overrides the
/// default filter.
pub fn init_tracing(json: bool, debug: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            "debug,hyper=warn,reqwest=warn".into()
        } else {
            "info,hyper=warn,reqwest=warn".into()
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    // A subscriber may already be installed (tests, embedding hosts)
    let _ = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
}
