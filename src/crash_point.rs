//! Crash point injection for durability testing
//!
//! A crash point is enabled by naming it in the `REDOCORE_CRASH_POINT`
//! environment variable. When execution reaches an enabled point the
//! process aborts immediately: no cleanup, no unwinding, no buffered redo
//! written out.
//!
//! ```bash
//! REDOCORE_CRASH_POINT=checkpoint_after_switch cargo test --test checkpoint_hooks
//! ```

use std::sync::OnceLock;

/// Environment variable naming the enabled crash point.
pub const CRASH_POINT_ENV: &str = "REDOCORE_CRASH_POINT";

static CRASH_POINT: OnceLock<Option<String>> = OnceLock::new();

#[inline]
fn configured() -> Option<&'static str> {
    CRASH_POINT
        .get_or_init(|| std::env::var(CRASH_POINT_ENV).ok())
        .as_deref()
}

/// Returns true if `name` is the configured crash point.
#[inline]
pub fn crash_point_enabled(name: &str) -> bool {
    configured() == Some(name)
}

/// Aborts the process if `name` is the configured crash point.
#[inline]
pub fn maybe_crash(name: &str) {
    if crash_point_enabled(name) {
        eprintln!("[CRASH] Triggering crash at point: {}", name);
        std::process::abort();
    }
}

/// Defined crash point names.
pub mod points {
    // Redo file
    pub const REDO_BEFORE_SYNC: &str = "redo_before_sync";
    pub const REDO_AFTER_SYNC: &str = "redo_after_sync";
    pub const REDO_AFTER_ROTATE: &str = "redo_after_rotate";

    // Checkpoint
    pub const CHECKPOINT_START: &str = "checkpoint_start";
    pub const CHECKPOINT_AFTER_SWITCH: &str = "checkpoint_after_switch";
    pub const CHECKPOINT_BEFORE_HEADER: &str = "checkpoint_before_header";
    pub const CHECKPOINT_AFTER_HEADER: &str = "checkpoint_after_header";

    pub fn all() -> &'static [&'static str] {
        &[
            REDO_BEFORE_SYNC,
            REDO_AFTER_SYNC,
            REDO_AFTER_ROTATE,
            CHECKPOINT_START,
            CHECKPOINT_AFTER_SWITCH,
            CHECKPOINT_BEFORE_HEADER,
            CHECKPOINT_AFTER_HEADER,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_by_default() {
        assert!(!crash_point_enabled("not_a_point"));
        maybe_crash("not_a_point");
    }

    #[test]
    fn test_names_are_unique_snake_case() {
        let all = points::all();
        for (i, point) in all.iter().enumerate() {
            assert!(point.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
            assert!(!all[i + 1..].contains(point), "duplicate crash point {}", point);
        }
    }
}
