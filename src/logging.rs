//! Tracing setup for the bridge binary.
//!
//! The library only emits events through the `tracing` macros; installing a
//! subscriber is left to the program. `serial-bridge` calls [`init`] once at
//! startup.

use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

/// Installs a formatting subscriber on stderr.
///
/// Filtering follows `RUST_LOG`, with `info` as the default level. Stdout
/// stays free for the JSON reply stream.
pub fn init() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}
