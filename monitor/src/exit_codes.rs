//! Stable exit codes for monitor CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config or credentials, or another startup failure.
pub const INVALID: i32 = 1;
/// `monitor tick` ran but the tick failed (the previous record was kept).
pub const TICK_FAILED: i32 = 2;
