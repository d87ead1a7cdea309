use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::constants::*;
use crate::error::VotingEscrowError;
use crate::require;
use crate::round_to_week;
use crate::state::{Address, DepositKind, EscrowEvent, LockedBalance, Point};

type Result<T> = std::result::Result<T, VotingEscrowError>;

/// Vote-escrow ledger state: locks, account point histories, the global
/// point history and the schedule of future global slope changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingEscrow {
    supply: u128,
    locked: BTreeMap<Address, LockedBalance>,
    point_history: Vec<Point>,
    user_point_history: BTreeMap<Address, Vec<Point>>,
    slope_changes: BTreeMap<u64, i128>,
    #[serde(skip)]
    events: Vec<EscrowEvent>,
}

impl VotingEscrow {
    /// Create an empty ledger whose global history starts at `now`.
    pub fn new(now: u64) -> Self {
        Self {
            supply: 0,
            locked: BTreeMap::new(),
            point_history: vec![Point {
                bias: 0,
                slope: 0,
                ts: now,
            }],
            user_point_history: BTreeMap::new(),
            slope_changes: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    /// Record global data to checkpoint
    pub fn checkpoint(&mut self, now: u64) -> Result<()> {
        self.checkpoint_inner(None, now)
    }

    /// Deposit `value` tokens for `account` and lock until `unlock_time`
    pub fn create_lock(
        &mut self,
        account: &Address,
        value: u128,
        unlock_time: u64,
        now: u64,
    ) -> Result<()> {
        let locked = self.locked(account);

        require!(value > 0, VotingEscrowError::InvalidAmount);
        require!(locked.amount == 0, VotingEscrowError::LockAlreadyExists);
        require!(
            unlock_time >= now.saturating_add(MIN_LOCK_DURATION),
            VotingEscrowError::InvalidDuration
        );

        // Locktime is rounded down to weeks
        let end = round_to_week(unlock_time);
        require!(end > now, VotingEscrowError::InvalidDuration);
        require!(
            end <= now + MAX_LOCK_DURATION,
            VotingEscrowError::InvalidDuration
        );

        self.deposit_inner(account, value, end, locked, DepositKind::CreateLock, now)
    }

    /// Deposit `value` additional tokens for `account` without modifying the
    /// unlock time
    pub fn increase_amount(&mut self, account: &Address, value: u128, now: u64) -> Result<()> {
        let locked = self.locked(account);
        self.require_active(&locked, value, now)?;

        self.deposit_inner(
            account,
            value,
            0,
            locked,
            DepositKind::IncreaseLockAmount,
            now,
        )
    }

    /// Deposit `value` tokens into someone else's existing lock.
    /// Anyone may top up a lock, but nobody can extend it on the owner's behalf.
    pub fn deposit_for(&mut self, account: &Address, value: u128, now: u64) -> Result<()> {
        let locked = self.locked(account);
        self.require_active(&locked, value, now)?;

        self.deposit_inner(account, value, 0, locked, DepositKind::DepositFor, now)
    }

    /// Extend the unlock time of an existing lock
    pub fn increase_unlock_time(
        &mut self,
        account: &Address,
        unlock_time: u64,
        now: u64,
    ) -> Result<()> {
        let locked = self.locked(account);
        let end = round_to_week(unlock_time);

        require!(locked.amount > 0, VotingEscrowError::NoExistingLock);
        require!(locked.end > now, VotingEscrowError::LockExpired);
        require!(end > locked.end, VotingEscrowError::CanOnlyIncreaseDuration);
        require!(
            end <= now + MAX_LOCK_DURATION,
            VotingEscrowError::InvalidDuration
        );

        self.deposit_inner(account, 0, end, locked, DepositKind::IncreaseUnlockTime, now)
    }

    /// Lock `value` tokens for `account` for `duration` seconds from now.
    ///
    /// Creates the lock when the account has none; otherwise tops up the
    /// existing lock and pushes its end out to `now + duration` when that is
    /// later than the current end.
    pub fn lock_for(
        &mut self,
        account: &Address,
        value: u128,
        duration: u64,
        now: u64,
    ) -> Result<()> {
        require!(value > 0, VotingEscrowError::InvalidAmount);
        require!(
            (MIN_LOCK_DURATION..=MAX_LOCK_DURATION).contains(&duration),
            VotingEscrowError::InvalidDuration
        );

        let locked = self.locked(account);
        let end = round_to_week(now + duration);

        if locked.amount == 0 {
            return self.deposit_inner(account, value, end, locked, DepositKind::LockFor, now);
        }

        require!(locked.end > now, VotingEscrowError::LockExpired);
        let unlock_time = if end > locked.end { end } else { 0 };
        self.deposit_inner(account, value, unlock_time, locked, DepositKind::LockFor, now)
    }

    /// Withdraw all tokens of an expired lock. Returns the released amount;
    /// the caller moves it out of custody.
    pub fn withdraw(&mut self, account: &Address, now: u64) -> Result<u128> {
        let locked = self.locked(account);
        require!(locked.amount > 0, VotingEscrowError::NoExistingLock);
        require!(now >= locked.end, VotingEscrowError::LockNotExpired);

        let value = locked.amount;
        let supply_before = self.supply;

        self.locked.insert(account.clone(), LockedBalance::default());
        self.supply = supply_before
            .checked_sub(value)
            .ok_or(VotingEscrowError::Overflow)?;

        self.checkpoint_inner(Some((account, locked, LockedBalance::default())), now)?;

        info!("Withdrew {} tokens for {}", value, account);

        self.events.push(EscrowEvent::Withdraw {
            provider: account.clone(),
            value,
            timestamp: now,
        });
        self.events.push(EscrowEvent::Supply {
            prev_supply: supply_before,
            supply: self.supply,
        });

        Ok(value)
    }

    /// Voting power of `account` at timestamp `t`
    pub fn voting_power_at(&self, account: &Address, t: u64) -> u128 {
        let Some(history) = self.user_point_history.get(account) else {
            return 0;
        };

        // Latest point at or before t
        let idx = history.partition_point(|p| p.ts <= t);
        if idx == 0 {
            return 0;
        }
        let point = history[idx - 1];

        descale(decay(point.bias, point.slope, (t - point.ts) as i128))
    }

    /// Total voting power at timestamp `t`
    pub fn total_voting_power_at(&self, t: u64) -> u128 {
        let idx = self.point_history.partition_point(|p| p.ts <= t);
        if idx == 0 {
            return 0;
        }
        let point = self.point_history[idx - 1];
        self.supply_at(point, t)
    }

    /// Replay slope changes forward from `point` to `t`.
    fn supply_at(&self, point: Point, t: u64) -> u128 {
        let mut last_point = point;
        let mut t_i = round_to_week(last_point.ts);

        loop {
            t_i = t_i.saturating_add(WEEK);
            let mut d_slope = 0;
            if t_i > t {
                t_i = t;
            } else {
                d_slope = self.slope_change(t_i);
            }

            let elapsed = (t_i - last_point.ts) as i128;
            last_point.bias = decay(last_point.bias, last_point.slope, elapsed);
            // Power never grows back, so a spent supply ends the replay
            if t_i == t || last_point.bias == 0 {
                break;
            }
            // Slope changes are never positive and sum to at most the slope
            last_point.slope = last_point.slope.saturating_add(d_slope).max(0);
            last_point.ts = t_i;
        }

        descale(last_point.bias)
    }

    pub fn locked(&self, account: &Address) -> LockedBalance {
        self.locked.get(account).copied().unwrap_or_default()
    }

    pub fn locked_end(&self, account: &Address) -> u64 {
        self.locked(account).end
    }

    /// Most recently recorded slope for `account`
    pub fn last_user_slope(&self, account: &Address) -> i128 {
        self.user_point_history
            .get(account)
            .and_then(|history| history.last())
            .map(|point| point.slope)
            .unwrap_or(0)
    }

    pub fn user_point_epoch(&self, account: &Address) -> usize {
        self.user_point_history
            .get(account)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn user_point_history(&self, account: &Address, idx: usize) -> Option<Point> {
        self.user_point_history
            .get(account)
            .and_then(|history| history.get(idx))
            .copied()
    }

    /// Index of the latest global point
    pub fn epoch(&self) -> usize {
        self.point_history.len() - 1
    }

    pub fn point_history(&self, idx: usize) -> Option<Point> {
        self.point_history.get(idx).copied()
    }

    pub fn slope_change(&self, t: u64) -> i128 {
        self.slope_changes.get(&t).copied().unwrap_or(0)
    }

    /// Total locked token units
    pub fn supply(&self) -> u128 {
        self.supply
    }

    /// Take the events recorded since the last drain.
    pub fn drain_events(&mut self) -> Vec<EscrowEvent> {
        std::mem::take(&mut self.events)
    }

    fn require_active(&self, locked: &LockedBalance, value: u128, now: u64) -> Result<()> {
        require!(value > 0, VotingEscrowError::InvalidAmount);
        require!(locked.amount > 0, VotingEscrowError::NoExistingLock);
        require!(locked.end > now, VotingEscrowError::LockExpired);
        Ok(())
    }

    /// Deposit and lock tokens for a user. `unlock_time == 0` keeps the
    /// current end.
    fn deposit_inner(
        &mut self,
        account: &Address,
        value: u128,
        unlock_time: u64,
        locked: LockedBalance,
        kind: DepositKind,
        now: u64,
    ) -> Result<()> {
        let supply_before = self.supply;
        let old_locked = locked;

        let mut new_locked = locked;
        new_locked.amount = new_locked
            .amount
            .checked_add(value)
            .ok_or(VotingEscrowError::Overflow)?;
        if unlock_time != 0 {
            new_locked.end = unlock_time;
        }

        self.supply = supply_before
            .checked_add(value)
            .ok_or(VotingEscrowError::Overflow)?;

        self.checkpoint_inner(Some((account, old_locked, new_locked)), now)?;
        self.locked.insert(account.clone(), new_locked);

        info!(
            "Locked {} tokens for {} until {} ({:?})",
            value, account, new_locked.end, kind
        );

        self.events.push(EscrowEvent::Deposit {
            provider: account.clone(),
            value,
            locktime: new_locked.end,
            kind,
            timestamp: now,
        });
        self.events.push(EscrowEvent::Supply {
            prev_supply: supply_before,
            supply: self.supply,
        });

        Ok(())
    }

    /// Record global and per-user data to checkpoint.
    fn checkpoint_inner(
        &mut self,
        user: Option<(&Address, LockedBalance, LockedBalance)>,
        now: u64,
    ) -> Result<()> {
        let mut u_old = Point::default();
        let mut u_new = Point::default();
        let mut old_dslope = 0i128;
        let mut new_dslope = 0i128;

        if let Some((_, old_locked, new_locked)) = user {
            // Expired locks contribute nothing
            if old_locked.is_active(now) {
                u_old.slope = slope_for(old_locked.amount)?;
                u_old.bias = bias_for(u_old.slope, old_locked.end - now)?;
            }
            if new_locked.is_active(now) {
                u_new.slope = slope_for(new_locked.amount)?;
                u_new.bias = bias_for(u_new.slope, new_locked.end - now)?;
            }

            // Scheduled changes at both ends, before this lock is accounted for
            old_dslope = self.slope_change(old_locked.end);
            if new_locked.end != 0 {
                new_dslope = if new_locked.end == old_locked.end {
                    old_dslope
                } else {
                    self.slope_change(new_locked.end)
                };
            }
        }

        let mut last_point = *self
            .point_history
            .last()
            .ok_or(VotingEscrowError::CorruptHistory)?;
        require!(last_point.ts <= now, VotingEscrowError::CorruptHistory);

        // Decay the last point week by week up to now
        let mut last_checkpoint = last_point.ts;
        let mut t_i = round_to_week(last_checkpoint);
        loop {
            t_i += WEEK;
            let mut d_slope = 0;
            if t_i > now {
                t_i = now;
            } else {
                d_slope = self.slope_change(t_i);
            }

            let decay = bias_for(last_point.slope, t_i - last_checkpoint)?;
            last_point.bias = last_point
                .bias
                .checked_sub(decay)
                .ok_or(VotingEscrowError::Overflow)?;
            last_point.slope = last_point
                .slope
                .checked_add(d_slope)
                .ok_or(VotingEscrowError::Overflow)?;
            require!(
                last_point.bias >= 0 && last_point.slope >= 0,
                VotingEscrowError::CorruptHistory
            );

            last_checkpoint = t_i;
            last_point.ts = t_i;

            if t_i == now {
                break;
            }
            self.point_history.push(last_point);
        }

        if user.is_some() {
            // Fold the user's slope and bias change into the global point
            last_point.slope = last_point
                .slope
                .checked_add(u_new.slope - u_old.slope)
                .ok_or(VotingEscrowError::Overflow)?;
            last_point.bias = last_point
                .bias
                .checked_add(u_new.bias - u_old.bias)
                .ok_or(VotingEscrowError::Overflow)?;
            require!(
                last_point.bias >= 0 && last_point.slope >= 0,
                VotingEscrowError::CorruptHistory
            );
        }

        self.point_history.push(last_point);
        debug!(
            "Global checkpoint at {}: bias={}, slope={}, epoch={}",
            now,
            last_point.bias,
            last_point.slope,
            self.point_history.len() - 1
        );

        if let Some((account, old_locked, new_locked)) = user {
            // Move this lock's slope drop from the old end to the new one
            if old_locked.end > now {
                old_dslope += u_old.slope;
                if new_locked.end == old_locked.end {
                    old_dslope -= u_new.slope;
                }
                self.slope_changes.insert(old_locked.end, old_dslope);
            }

            if new_locked.end > now && new_locked.end > old_locked.end {
                new_dslope -= u_new.slope;
                self.slope_changes.insert(new_locked.end, new_dslope);
            }

            u_new.ts = now;
            self.user_point_history
                .entry(account.clone())
                .or_default()
                .push(u_new);
        }

        Ok(())
    }
}

fn slope_for(amount: u128) -> Result<i128> {
    let amount = i128::try_from(amount).map_err(|_| VotingEscrowError::Overflow)?;
    amount
        .checked_mul(VOTE_SCALE)
        .map(|scaled| scaled / MAX_LOCK_DURATION as i128)
        .ok_or(VotingEscrowError::Overflow)
}

fn bias_for(slope: i128, dt: u64) -> Result<i128> {
    slope
        .checked_mul(dt as i128)
        .ok_or(VotingEscrowError::Overflow)
}

/// `bias - slope * elapsed`, floored at zero. Slopes are never negative, so
/// a product too large for `i128` exceeds any bias.
fn decay(bias: i128, slope: i128, elapsed: i128) -> i128 {
    slope
        .checked_mul(elapsed)
        .and_then(|drop| bias.checked_sub(drop))
        .map_or(0, |left| left.max(0))
}

fn descale(bias: i128) -> u128 {
    if bias <= 0 {
        0
    } else {
        (bias / VOTE_SCALE) as u128
    }
}
