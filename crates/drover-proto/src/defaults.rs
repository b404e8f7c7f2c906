//! Tunable operational defaults for the drover client.
//!
//! Wire-level constants (error codes, query flags) live with their types;
//! this module centralizes the timing and retry knobs.

// ─── Network / Port Defaults ────────────────────────────────────────────────

/// Default server listen port, used when an address string carries no port.
pub const DEFAULT_DB_PORT: u16 = 5710;

/// Connect timeout for monitor probe connections (seconds).
pub const PROBE_CONNECT_TIMEOUT_SECS: u64 = 5;

// ─── Monitor Tuning ─────────────────────────────────────────────────────────

/// Interval between background rechecks of every registered set (seconds).
pub const WATCHER_INTERVAL_SECS: u64 = 10;

/// Delay before the second pass of a full primary recheck (seconds).
pub const RECHECK_RETRY_DELAY_SECS: u64 = 1;

/// Number of outer passes a full primary recheck performs.
pub const RECHECK_PASSES: u32 = 2;

/// Full rotations attempted when selecting a secondary before degrading
/// to any live node.
pub const SECONDARY_SELECT_PASSES: u32 = 3;

// ─── Client Tuning ──────────────────────────────────────────────────────────

/// Attempts against distinct secondaries before a read falls back to the
/// primary.
pub const SECONDARY_READ_ATTEMPTS: u32 = 3;

/// Retry budget for a pipelined (send-then-receive-later) operation.
pub const PIPELINE_MAX_RETRIES: u32 = 3;
