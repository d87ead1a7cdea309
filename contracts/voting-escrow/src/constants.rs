pub const DAY: u64 = 24 * 60 * 60;

/// Epoch granularity for lock ends and gauge weights.
pub const WEEK: u64 = 7 * DAY;

pub const MIN_LOCK_DURATION: u64 = WEEK;
pub const MAX_LOCK_DURATION: u64 = 4 * 365 * DAY; // 126_144_000

/// Fixed-point scale applied to bias and slope so that small locks still
/// carry a nonzero slope.
pub const VOTE_SCALE: i128 = 1_000_000_000;
