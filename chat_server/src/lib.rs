#[macro_use]
extern crate tracing;

use tracing_subscriber::fmt::format::FmtSpan;

pub mod task;

/// Install the fmt subscriber, `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,warp=info".to_owned());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .init();
}
