use std::str::FromStr;

use tracing_subscriber::{
    prelude::*,
    EnvFilter,
};

use util::bootstrap;

#[cfg(not(debug_assertions))]
const DEFAULT_FILTER: &str =
    "warn,strapsync=info,strapsync_runtime=info,strapsync_message=info,strapsync_util=info";

#[cfg(debug_assertions)]
const DEFAULT_FILTER: &str =
    "info,strapsync=debug,strapsync_runtime=debug,strapsync_message=debug,strapsync_util=debug";

/// Install the global subscriber. Pretty output in debug builds, JSON lines in release.
///
/// `RUST_LOG` overrides the default filter. Calling this twice is harmless.
pub fn init() {
    let level_filter = mk_level_filter();
    bootstrap!("enabling tracing with filter directive: {}", level_filter);

    let stderr_layer =
        tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false);

    let s = tracing_subscriber::registry();

    #[allow(clippy::needless_late_init)]
    let res;

    cfg_if::cfg_if! {
        if #[cfg(debug_assertions)] {
            res = s.with(stderr_layer.pretty().with_filter(level_filter)).try_init();
        } else {
            res = s
                .with(
                    stderr_layer
                        .json()
                        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::NONE)
                        .with_filter(level_filter),
                )
                .try_init();
        }
    };

    if let Err(e) = res {
        bootstrap!("subscriber already installed: {}", e);
        return;
    }

    tracing::info!(
        package = util::build::PACKAGE,
        version = util::build::VERSION,
        commit = util::build::COMMIT_HASH,
        built = util::build::BUILD_TIMESTAMP,
        "tracing initialized"
    );
}

fn mk_level_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::from_str(DEFAULT_FILTER).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}
