use primitive_types::{U256, U512};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};
use voting_escrow::{require, round_to_week, Address, GaugeId, VotingEscrow, VOTE_SCALE, WEEK};

use crate::constants::*;
use crate::error::GaugeControllerError;
use crate::history::{TypeWeightHistory, WeightHistory};
use crate::state::{ControllerEvent, TypeId, VotedSlope};

type Result<T> = std::result::Result<T, GaugeControllerError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GaugeType {
    name: String,
    weight: TypeWeightHistory,
    sum: WeightHistory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Gauge {
    gauge_type: TypeId,
    weight: WeightHistory,
}

/// Gauge registry and vote aggregation.
///
/// Gauge weights are kept in escrow bias units (voting power scaled by
/// `VOTE_SCALE`); admin-supplied gauge weights are given in voting power
/// units and scaled on the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaugeController {
    admin: Address,
    vote_cooldown: u64,
    types: Vec<GaugeType>,
    gauges: BTreeMap<GaugeId, Gauge>,
    vote_user_slopes: BTreeMap<Address, BTreeMap<GaugeId, VotedSlope>>,
    vote_user_power: BTreeMap<Address, u64>,
    last_user_vote: BTreeMap<Address, BTreeMap<GaugeId, u64>>,
    points_total: BTreeMap<u64, U256>,
    time_total: u64,
    #[serde(skip)]
    events: Vec<ControllerEvent>,
}

impl GaugeController {
    pub fn new(admin: Address, vote_cooldown: u64, now: u64) -> Self {
        Self {
            admin,
            vote_cooldown,
            types: Vec::new(),
            gauges: BTreeMap::new(),
            vote_user_slopes: BTreeMap::new(),
            vote_user_power: BTreeMap::new(),
            last_user_vote: BTreeMap::new(),
            points_total: BTreeMap::new(),
            time_total: round_to_week(now),
            events: Vec::new(),
        }
    }

    fn ensure_admin(&self, caller: &Address) -> Result<()> {
        require!(*caller == self.admin, GaugeControllerError::Unauthorized);
        Ok(())
    }

    pub fn admin(&self) -> &Address {
        &self.admin
    }

    /// Add a gauge type with the given weight. Zero is allowed.
    pub fn add_type(
        &mut self,
        caller: &Address,
        name: &str,
        weight: u128,
        now: u64,
    ) -> Result<TypeId> {
        self.ensure_admin(caller)?;

        let type_id = self.types.len();
        self.types.push(GaugeType {
            name: name.to_string(),
            weight: TypeWeightHistory::default(),
            sum: WeightHistory::default(),
        });
        if weight != 0 {
            self.change_type_weight_inner(type_id, weight, now)?;
        }

        info!("Gauge type {} added: {} (weight {})", type_id, name, weight);

        self.events.push(ControllerEvent::AddType {
            name: name.to_string(),
            type_id,
        });

        Ok(type_id)
    }

    /// Change the weight of a gauge type from the next week on
    pub fn change_type_weight(
        &mut self,
        caller: &Address,
        type_id: TypeId,
        weight: u128,
        now: u64,
    ) -> Result<()> {
        self.ensure_admin(caller)?;
        require!(type_id < self.types.len(), GaugeControllerError::UnknownType);
        self.change_type_weight_inner(type_id, weight, now)
    }

    fn change_type_weight_inner(&mut self, type_id: TypeId, weight: u128, now: u64) -> Result<()> {
        let old_weight = self.types[type_id].weight.fill(now);
        let old_sum = self.types[type_id].sum.fill(now);
        let total_weight = self.fill_total(now)?;
        let next_time = next_week(now);

        let total_weight = add_weighted(total_weight, old_sum, weight)?
            .checked_sub(weighted(old_sum, old_weight)?)
            .ok_or(GaugeControllerError::Overflow)?;

        self.points_total.insert(next_time, total_weight);
        self.time_total = next_time;
        self.types[type_id].weight.set(next_time, weight);

        info!(
            "Type {} weight set to {} from {}",
            type_id, weight, next_time
        );

        self.events.push(ControllerEvent::NewTypeWeight {
            type_id,
            time: now,
            weight,
            total_weight,
        });

        Ok(())
    }

    /// Register `gauge` under `gauge_type` with an initial weight
    pub fn add_gauge(
        &mut self,
        caller: &Address,
        gauge: &GaugeId,
        gauge_type: TypeId,
        weight: u128,
        now: u64,
    ) -> Result<()> {
        self.ensure_admin(caller)?;
        require!(
            gauge_type < self.types.len(),
            GaugeControllerError::UnknownType
        );
        require!(
            !self.gauges.contains_key(gauge),
            GaugeControllerError::DuplicateGauge
        );

        let next_time = next_week(now);
        let scaled = scale(weight)?;
        let mut history = WeightHistory::default();

        if scaled > 0 {
            let type_weight = self.types[gauge_type].weight.fill(now);
            let old_sum = self.types[gauge_type].sum.fill(now);
            let old_total = self.fill_total(now)?;

            let sum = &mut self.types[gauge_type].sum;
            sum.point_mut(next_time).bias = old_sum
                .checked_add(scaled)
                .ok_or(GaugeControllerError::Overflow)?;
            sum.set_last(next_time);

            self.points_total
                .insert(next_time, add_weighted(old_total, scaled, type_weight)?);
            self.time_total = next_time;

            history.point_mut(next_time).bias = scaled;
        }

        let sum = &mut self.types[gauge_type].sum;
        if sum.last() == 0 {
            sum.set_last(next_time);
        }
        history.set_last(next_time);

        self.gauges.insert(
            gauge.clone(),
            Gauge {
                gauge_type,
                weight: history,
            },
        );

        info!(
            "Gauge {} added with type {} and weight {}",
            gauge, gauge_type, weight
        );

        self.events.push(ControllerEvent::NewGauge {
            gauge: gauge.clone(),
            gauge_type,
            weight,
        });

        Ok(())
    }

    /// Overwrite the weight of a gauge from the next week on
    pub fn change_gauge_weight(
        &mut self,
        caller: &Address,
        gauge: &GaugeId,
        weight: u128,
        now: u64,
    ) -> Result<()> {
        self.ensure_admin(caller)?;
        let gauge_type = self.gauge_type(gauge)?;
        let scaled = scale(weight)?;

        let old_gauge_weight = self.gauge_mut(gauge)?.weight.fill(now);
        let type_weight = self.types[gauge_type].weight.fill(now);
        let old_sum = self.types[gauge_type].sum.fill(now);
        let total_weight = self.fill_total(now)?;
        let next_time = next_week(now);

        let history = &mut self.gauge_mut(gauge)?.weight;
        history.point_mut(next_time).bias = scaled;
        history.set_last(next_time);

        let new_sum = old_sum
            .checked_add(scaled)
            .and_then(|sum| sum.checked_sub(old_gauge_weight))
            .ok_or(GaugeControllerError::Overflow)?;
        let sum = &mut self.types[gauge_type].sum;
        sum.point_mut(next_time).bias = new_sum;
        sum.set_last(next_time);

        let total_weight = add_weighted(total_weight, new_sum, type_weight)?
            .checked_sub(weighted(old_sum, type_weight)?)
            .ok_or(GaugeControllerError::Overflow)?;
        self.points_total.insert(next_time, total_weight);
        self.time_total = next_time;

        info!("Gauge {} weight set to {} from {}", gauge, weight, next_time);

        self.events.push(ControllerEvent::NewGaugeWeight {
            gauge: gauge.clone(),
            time: now,
            weight,
            total_weight,
        });

        Ok(())
    }

    /// Allocate `user_weight` bps of the account's voting power to `gauge`.
    ///
    /// The allocation replaces the account's previous vote on that gauge and
    /// takes effect at the next week boundary.
    pub fn vote_for_gauge_weights(
        &mut self,
        user: &Address,
        gauge: &GaugeId,
        user_weight: u64,
        escrow: &VotingEscrow,
        now: u64,
    ) -> Result<()> {
        require!(user_weight <= MAX_BPS, GaugeControllerError::InvalidPower);
        let gauge_type = self.gauge_type(gauge)?;

        let slope = u128::try_from(escrow.last_user_slope(user))
            .map_err(|_| GaugeControllerError::Overflow)?;
        let lock_end = escrow.locked_end(user);
        let next_time = next_week(now);
        require!(
            lock_end > next_time,
            GaugeControllerError::LockExpiresTooSoon
        );

        let last_vote = self.last_user_vote(user, gauge);
        require!(
            last_vote == 0 || now >= last_vote.saturating_add(self.vote_cooldown),
            GaugeControllerError::VoteTooSoon
        );

        let old_slope = self.vote_user_slope(user, gauge);
        let old_dt = old_slope.end.saturating_sub(next_time);
        let old_bias = mul(old_slope.slope, old_dt as u128)?;

        let new_slope = VotedSlope {
            slope: mul(slope, user_weight as u128)? / MAX_BPS as u128,
            power: user_weight,
            end: lock_end,
        };
        let new_bias = mul(new_slope.slope, (lock_end - next_time) as u128)?;

        let power_used = (self.vote_user_power(user) + new_slope.power)
            .checked_sub(old_slope.power)
            .ok_or(GaugeControllerError::Overflow)?;
        require!(
            power_used <= MAX_BPS,
            GaugeControllerError::AllocationExceeded
        );

        // Swap the old vote's contribution for the new one
        let old_weight_bias = self.gauge_mut(gauge)?.weight.fill(now);
        let old_sum_bias = self.types[gauge_type].sum.fill(now);

        let old_still_active = old_slope.end > next_time;
        let cancel_old_change = old_slope.end > now;

        let history = &mut self.gauge_mut(gauge)?.weight;
        apply_vote(
            history,
            next_time,
            old_weight_bias,
            (old_bias, new_bias),
            (&old_slope, &new_slope),
            old_still_active,
            cancel_old_change,
        )?;

        let sum = &mut self.types[gauge_type].sum;
        apply_vote(
            sum,
            next_time,
            old_sum_bias,
            (old_bias, new_bias),
            (&old_slope, &new_slope),
            old_still_active,
            cancel_old_change,
        )?;

        self.fill_total(now)?;

        self.vote_user_power.insert(user.clone(), power_used);
        self.vote_user_slopes
            .entry(user.clone())
            .or_default()
            .insert(gauge.clone(), new_slope);
        self.last_user_vote
            .entry(user.clone())
            .or_default()
            .insert(gauge.clone(), now);

        info!(
            "{} voted {} bps for gauge {} (power used: {})",
            user, user_weight, gauge, power_used
        );

        self.events.push(ControllerEvent::VoteForGauge {
            time: now,
            user: user.clone(),
            gauge: gauge.clone(),
            weight: user_weight,
        });

        Ok(())
    }

    /// Checkpoint to fill data common for all gauges
    pub fn checkpoint(&mut self, now: u64) -> Result<()> {
        self.fill_total(now)?;
        Ok(())
    }

    /// Checkpoint to fill data for both a specific gauge and common for all
    /// gauges
    pub fn checkpoint_gauge(&mut self, gauge: &GaugeId, now: u64) -> Result<()> {
        self.gauge_mut(gauge)?.weight.fill(now);
        self.fill_total(now)?;
        Ok(())
    }

    pub fn checkpoint_type(&mut self, type_id: TypeId, now: u64) -> Result<()> {
        let gauge_type = self
            .types
            .get_mut(type_id)
            .ok_or(GaugeControllerError::UnknownType)?;
        gauge_type.weight.fill(now);
        gauge_type.sum.fill(now);
        Ok(())
    }

    /// Share of total emission going to `gauge` in the week containing `t`,
    /// scaled by `WEIGHT_SCALE`. Zero for unknown gauges and while the total
    /// weight is zero.
    pub fn gauge_relative_weight(&self, gauge: &GaugeId, t: u64) -> Result<u128> {
        let Some(entry) = self.gauges.get(gauge) else {
            return Ok(0);
        };

        let total = self.total_weight_raw(t)?;
        if total.is_zero() {
            return Ok(0);
        }

        let type_weight = self.types[entry.gauge_type].weight.weight_at(t);
        let gauge_weight = entry.weight.bias_at(t);

        // 512-bit product, so any pair of u128 weights is representable
        let relative = weighted(gauge_weight, type_weight)?.full_mul(U256::from(WEIGHT_SCALE))
            / U512::from(total);

        debug!(
            "Relative weight of {} at {}: {}",
            gauge,
            round_to_week(t),
            relative
        );

        Ok(relative.min(U512::from(WEIGHT_SCALE)).low_u128())
    }

    /// Gauge weight at the week containing `t`, in voting power units
    pub fn gauge_weight(&self, gauge: &GaugeId, t: u64) -> u128 {
        self.gauges
            .get(gauge)
            .map(|entry| entry.weight.bias_at(t) / VOTE_SCALE as u128)
            .unwrap_or(0)
    }

    pub fn type_weight(&self, type_id: TypeId, t: u64) -> u128 {
        self.types
            .get(type_id)
            .map(|gauge_type| gauge_type.weight.weight_at(t))
            .unwrap_or(0)
    }

    /// Sum of gauge weights within a type, in voting power units
    pub fn weights_sum_per_type(&self, type_id: TypeId, t: u64) -> u128 {
        self.types
            .get(type_id)
            .map(|gauge_type| gauge_type.sum.bias_at(t) / VOTE_SCALE as u128)
            .unwrap_or(0)
    }

    /// Sum of type weight times type sum over all types, in voting power
    /// units
    pub fn total_weight(&self, t: u64) -> Result<U256> {
        Ok(self.total_weight_raw(t)? / U256::from(VOTE_SCALE as u128))
    }

    fn total_weight_raw(&self, t: u64) -> Result<U256> {
        let t = round_to_week(t);
        if t <= self.time_total {
            return Ok(self.points_total.get(&t).copied().unwrap_or_default());
        }

        self.types.iter().try_fold(U256::zero(), |total, gauge_type| {
            add_weighted(
                total,
                gauge_type.sum.bias_at(t),
                gauge_type.weight.weight_at(t),
            )
        })
    }

    pub fn gauge_type(&self, gauge: &GaugeId) -> Result<TypeId> {
        self.gauges
            .get(gauge)
            .map(|entry| entry.gauge_type)
            .ok_or(GaugeControllerError::GaugeNotAdded)
    }

    pub fn is_gauge(&self, gauge: &GaugeId) -> bool {
        self.gauges.contains_key(gauge)
    }

    pub fn vote_user_power(&self, user: &Address) -> u64 {
        self.vote_user_power.get(user).copied().unwrap_or(0)
    }

    pub fn vote_user_slope(&self, user: &Address, gauge: &GaugeId) -> VotedSlope {
        self.vote_user_slopes
            .get(user)
            .and_then(|slopes| slopes.get(gauge))
            .copied()
            .unwrap_or_default()
    }

    pub fn last_user_vote(&self, user: &Address, gauge: &GaugeId) -> u64 {
        self.last_user_vote
            .get(user)
            .and_then(|votes| votes.get(gauge))
            .copied()
            .unwrap_or(0)
    }

    pub fn n_gauge_types(&self) -> usize {
        self.types.len()
    }

    pub fn n_gauges(&self) -> usize {
        self.gauges.len()
    }

    pub fn type_name(&self, type_id: TypeId) -> Option<&str> {
        self.types.get(type_id).map(|gauge_type| gauge_type.name.as_str())
    }

    pub fn vote_cooldown(&self) -> u64 {
        self.vote_cooldown
    }

    pub fn drain_events(&mut self) -> Vec<ControllerEvent> {
        std::mem::take(&mut self.events)
    }

    fn gauge_mut(&mut self, gauge: &GaugeId) -> Result<&mut Gauge> {
        self.gauges
            .get_mut(gauge)
            .ok_or(GaugeControllerError::GaugeNotAdded)
    }

    /// Fill type histories and the total weight up to the week after `now`
    fn fill_total(&mut self, now: u64) -> Result<U256> {
        let mut t = self.time_total;
        if t > now {
            // Already filled through next week; recompute it
            t -= WEEK;
        }
        let mut pt = self.points_total.get(&t).copied().unwrap_or_default();

        for gauge_type in self.types.iter_mut() {
            gauge_type.sum.fill(now);
            gauge_type.weight.fill(now);
        }

        while t <= now {
            t += WEEK;
            pt = self.types.iter().try_fold(U256::zero(), |total, gauge_type| {
                add_weighted(
                    total,
                    gauge_type.sum.point(t).bias,
                    gauge_type.weight.weight_at(t),
                )
            })?;
            self.points_total.insert(t, pt);
            if t > now {
                self.time_total = t;
            }
        }

        Ok(pt)
    }
}

/// Move one vote's contribution within a weight history: replace the old
/// bias and slope at `next_time`, then reschedule the slope change from the
/// old vote end to the new one.
fn apply_vote(
    history: &mut WeightHistory,
    next_time: u64,
    old_weight_bias: u128,
    (old_bias, new_bias): (u128, u128),
    (old_slope, new_slope): (&VotedSlope, &VotedSlope),
    old_still_active: bool,
    cancel_old_change: bool,
) -> Result<()> {
    let old_weight_slope = history.point(next_time).slope;

    let point = history.point_mut(next_time);
    point.bias = old_weight_bias
        .checked_add(new_bias)
        .ok_or(GaugeControllerError::Overflow)?
        .max(old_bias)
        - old_bias;
    point.slope = if old_still_active {
        old_weight_slope
            .checked_add(new_slope.slope)
            .ok_or(GaugeControllerError::Overflow)?
            .max(old_slope.slope)
            - old_slope.slope
    } else {
        old_weight_slope
            .checked_add(new_slope.slope)
            .ok_or(GaugeControllerError::Overflow)?
    };

    if cancel_old_change {
        // Old vote expires in the future; drop its pending change
        let change = history.change_mut(old_slope.end);
        *change = change.saturating_sub(old_slope.slope);
    }

    let change = history.change_mut(new_slope.end);
    *change = change
        .checked_add(new_slope.slope)
        .ok_or(GaugeControllerError::Overflow)?;

    Ok(())
}

fn next_week(now: u64) -> u64 {
    round_to_week(now + WEEK)
}

fn scale(weight: u128) -> Result<u128> {
    weight
        .checked_mul(VOTE_SCALE as u128)
        .ok_or(GaugeControllerError::Overflow)
}

fn mul(a: u128, b: u128) -> Result<u128> {
    a.checked_mul(b).ok_or(GaugeControllerError::Overflow)
}

fn weighted(bias: u128, weight: u128) -> Result<U256> {
    U256::from(bias)
        .checked_mul(U256::from(weight))
        .ok_or(GaugeControllerError::Overflow)
}

/// `total + bias * weight`
fn add_weighted(total: U256, bias: u128, weight: u128) -> Result<U256> {
    total
        .checked_add(weighted(bias, weight)?)
        .ok_or(GaugeControllerError::Overflow)
}
