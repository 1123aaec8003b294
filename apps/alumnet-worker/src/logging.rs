//! Log setup for the worker process.

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppEnvironment;

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `filter` is used. Production emits
/// flattened JSON with the enclosing command span on every line; development
/// uses the compact text format.
pub fn init_logging(filter: &str, env: AppEnvironment) {
    let filter_layer =
        match EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(filter)) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("FATAL: Failed to create log filter: {e}");
                std::process::exit(1);
            }
        };

    let registry = tracing_subscriber::registry().with(filter_layer);
    if env.is_production() {
        registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

/// Root span for one invocation. Events logged inside it carry the
/// subcommand name.
pub fn command_span(command: &'static str) -> Span {
    tracing::info_span!("worker", command)
}
