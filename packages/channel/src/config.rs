//! Environment driven defaults.
//!
//! Values are read once, on first use.

use std::sync::LazyLock;

use moosicbox_env_utils::default_env_usize;

/// Capacity used by [`crate::Capacity::Buffered`] when not overridden.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64;

/// Overrides [`DEFAULT_BUFFER_CAPACITY`].
pub const BUFFER_CAPACITY_ENV: &str = "SWITCHY_CHANNEL_BUFFER";

/// Reads a positive `usize` from the environment, warning and falling back to
/// `default` on anything else.
#[must_use]
pub fn positive_env_usize(name: &str, default: usize) -> usize {
    match default_env_usize(name, default) {
        Ok(0) => {
            log::warn!("{name} must be greater than 0, using {default}");
            default
        }
        Ok(value) => value,
        Err(e) => {
            log::warn!("invalid {name} ({e}), using {default}");
            default
        }
    }
}

static BUFFER_CAPACITY: LazyLock<usize> =
    LazyLock::new(|| positive_env_usize(BUFFER_CAPACITY_ENV, DEFAULT_BUFFER_CAPACITY));

/// The capacity [`crate::Capacity::Buffered`] resolves to.
#[must_use]
pub fn buffered_capacity() -> usize {
    *BUFFER_CAPACITY
}
