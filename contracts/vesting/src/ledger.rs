use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;
use voting_escrow::{require, Address};

use crate::error::VestingError;
use crate::state::{VestingEvent, VestingRecord, VestingTranche};

type Result<T> = std::result::Result<T, VestingError>;

/// Linear release of credited emission. Every credit vests over
/// `duration` seconds from the time it was credited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VestingLedger {
    duration: u64,
    records: BTreeMap<Address, VestingRecord>,
    #[serde(skip)]
    events: Vec<VestingEvent>,
}

impl VestingLedger {
    pub fn new(duration: u64) -> Result<Self> {
        require!(duration > 0, VestingError::InvalidDuration);
        Ok(Self {
            duration,
            records: BTreeMap::new(),
            events: Vec::new(),
        })
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Credit `amount` as a new tranche starting at `now`
    pub fn lock(&mut self, account: &Address, amount: u128, now: u64) -> Result<()> {
        require!(amount > 0, VestingError::InvalidAmount);

        let record = self.records.entry(account.clone()).or_default();
        record.total_locked = record
            .total_locked
            .checked_add(amount)
            .ok_or(VestingError::Overflow)?;

        // Credits in the same second share a tranche
        match record.tranches.last_mut() {
            Some(tranche) if tranche.start_time == now => {
                tranche.amount = tranche
                    .amount
                    .checked_add(amount)
                    .ok_or(VestingError::Overflow)?;
            }
            _ => record.tranches.push(VestingTranche {
                amount,
                start_time: now,
            }),
        }

        info!(
            "Vesting {} for {} (total locked: {}, tranches: {})",
            amount,
            account,
            record.total_locked,
            record.tranches.len()
        );

        self.events.push(VestingEvent::Locked {
            account: account.clone(),
            amount,
            timestamp: now,
        });

        Ok(())
    }

    /// Amount released at `t` and not yet claimed
    pub fn claimable(&self, account: &Address, t: u64) -> u128 {
        let Some(record) = self.records.get(account) else {
            return 0;
        };
        self.vested(record, t).saturating_sub(record.total_claimed)
    }

    /// Release everything claimable. Returns zero when nothing is due.
    pub fn claim(&mut self, account: &Address, now: u64) -> Result<u128> {
        let amount = self.claimable(account, now);
        if amount == 0 {
            return Ok(0);
        }

        let duration = self.duration;
        let record = self
            .records
            .get_mut(account)
            .ok_or(VestingError::InvalidAmount)?;
        record.total_claimed = record
            .total_claimed
            .checked_add(amount)
            .ok_or(VestingError::Overflow)?;

        let mut matured = record.matured;
        for tranche in &record.tranches {
            if now.saturating_sub(tranche.start_time) >= duration {
                matured = matured
                    .checked_add(tranche.amount)
                    .ok_or(VestingError::Overflow)?;
            }
        }
        record.matured = matured;
        record
            .tranches
            .retain(|tranche| now.saturating_sub(tranche.start_time) < duration);

        info!("Released {} vested tokens to {}", amount, account);

        self.events.push(VestingEvent::Released {
            account: account.clone(),
            amount,
            timestamp: now,
        });

        Ok(amount)
    }

    /// `(still locked, claimable)` at `t`
    pub fn vesting_amount(&self, account: &Address, t: u64) -> (u128, u128) {
        let Some(record) = self.records.get(account) else {
            return (0, 0);
        };
        let vested = self.vested(record, t);
        (
            record.total_locked.saturating_sub(vested),
            vested.saturating_sub(record.total_claimed),
        )
    }

    pub fn record(&self, account: &Address) -> Option<&VestingRecord> {
        self.records.get(account)
    }

    pub fn drain_events(&mut self) -> Vec<VestingEvent> {
        std::mem::take(&mut self.events)
    }

    /// Sum over tranches, bounded by `total_locked`
    fn vested(&self, record: &VestingRecord, t: u64) -> u128 {
        let duration = U256::from(self.duration);
        let vested = record
            .tranches
            .iter()
            .filter(|tranche| t > tranche.start_time)
            .fold(U256::from(record.matured), |acc, tranche| {
                let elapsed = (t - tranche.start_time).min(self.duration);
                acc + U256::from(tranche.amount) * U256::from(elapsed) / duration
            });
        vested.min(U256::from(record.total_locked)).low_u128()
    }
}
