// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
pub mod arena;

pub use arena::{Arena, ArenaError};

/// Installs the process-wide subscriber on stderr. `RUST_LOG` wins; otherwise
/// `info`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

/// `n` MiB in bytes, saturating at `usize::MAX`.
pub const fn mib(n: usize) -> usize {
    n.saturating_mul(1024 * 1024)
}
