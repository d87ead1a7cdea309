use voting_escrow::{Address, GaugeId};

/// Stake bookkeeping of the gauges' deposit side.
///
/// Implementors must have the minter settle an account (user checkpoint)
/// before its stake in a gauge changes.
pub trait StakeAccounting {
    fn stake_of(&self, gauge: &GaugeId, account: &Address) -> u128;

    fn total_staked(&self, gauge: &GaugeId) -> u128;
}
