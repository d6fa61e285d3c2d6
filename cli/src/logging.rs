//! Diagnostics go to stderr so stdout carries only the rendered report.
//!
//! `RUST_LOG` overrides the default level, which is WARN, or INFO with `--verbose`.

use tracing_subscriber::filter::{EnvFilter, LevelFilter};

pub fn init(verbose: bool) {
    let default = if verbose { LevelFilter::INFO } else { LevelFilter::WARN };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();
    // ok if already initialized in tests
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
