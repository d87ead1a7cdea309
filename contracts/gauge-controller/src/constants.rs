use voting_escrow::DAY;

/// Fixed-point scale of relative weights (1.0 == 10^18).
pub const WEIGHT_SCALE: u128 = 1_000_000_000_000_000_000;

/// Full voting power, in basis points.
pub const MAX_BPS: u64 = 10_000;

/// Minimum time between two votes of one account on the same gauge.
pub const DEFAULT_VOTE_COOLDOWN: u64 = 10 * DAY;
