//! provides logging helpers

use once_cell::sync::OnceCell;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// initiate the global tracing subscriber for a test binary
///
/// Output goes through the libtest capture writer, so it only shows up for
/// failing tests or with `--nocapture`. Safe to call from every test; only the
/// first call installs the subscriber.
pub fn init() {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| {
        let env_filter = filter::EnvFilter::builder()
            .with_default_directive(filter::LevelFilter::INFO.into())
            .from_env_lossy();

        let fmt_layer = layer()
            .with_test_writer()
            .with_target(true)
            .with_filter(env_filter);

        // another subscriber (e.g. from test-log) may already be installed
        if registry().with(fmt_layer).try_init().is_err() {
            tracing::debug!("global tracing subscriber already set");
        }
    });
}
