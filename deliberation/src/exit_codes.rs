//! Stable exit codes for deliberation CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed due to an unreadable state directory, invalid config, or other errors.
pub const INVALID: i32 = 1;
/// `deliberation validate` found invariant violations.
pub const VIOLATIONS: i32 = 2;
