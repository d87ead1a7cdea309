use gauge_controller::{GaugeController, WEIGHT_SCALE};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};
use vesting::{Payout, RewardRouter, VestingLedger};
use voting_escrow::{require, round_to_week, Address, GaugeId, VotingEscrow, WEEK};

use crate::error::MinterError;
use crate::math::mul_div;
use crate::schedule::EmissionSchedule;
use crate::stake::StakeAccounting;
use crate::state::{GaugeIntegral, MintReceipt, MinterEvent, UserAccrual};

type Result<T> = std::result::Result<T, MinterError>;

/// Destinations a minted amount can be routed to
pub struct Payees<'a> {
    pub escrow: &'a mut VotingEscrow,
    pub router: &'a RewardRouter,
    pub vesting: Option<&'a mut VestingLedger>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Minter {
    schedule: EmissionSchedule,
    integrals: BTreeMap<GaugeId, GaugeIntegral>,
    accruals: BTreeMap<GaugeId, BTreeMap<Address, UserAccrual>>,
    #[serde(skip)]
    events: Vec<MinterEvent>,
}

impl Minter {
    pub fn new(schedule: EmissionSchedule) -> Self {
        Self {
            schedule,
            integrals: BTreeMap::new(),
            accruals: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn update_mining_parameters(&mut self, now: u64) -> u64 {
        self.schedule.update_mining_parameters(now, &mut self.events)
    }

    pub fn rate_at(&self, t: u64) -> u128 {
        self.schedule.rate_at(t)
    }

    /// Advance the integral of `gauge` to `upto`, with `total_staked` held
    /// constant over the interval. Returns the integral.
    pub fn checkpoint_gauge_integral(
        &mut self,
        gauge: &GaugeId,
        upto: u64,
        controller: &GaugeController,
        total_staked: u128,
    ) -> Result<u128> {
        require!(controller.is_gauge(gauge), MinterError::GaugeNotAdded);
        // Only an explicit update starts emission; until then the rate is zero
        if self.schedule.mining_epoch().is_some() {
            self.update_mining_parameters(upto);
        }

        let current = self.integral_state(gauge);
        let Some(last) = current.last_checkpoint else {
            // First checkpoint only records the time
            self.integrals.insert(
                gauge.clone(),
                GaugeIntegral {
                    integral: 0,
                    last_checkpoint: Some(upto),
                },
            );
            return Ok(0);
        };
        if upto <= last {
            return Ok(current.integral);
        }

        let delta = self.integrate(gauge, last, upto, controller, total_staked)?;
        let integral = current
            .integral
            .checked_add(delta)
            .ok_or(MinterError::Overflow)?;
        self.integrals.insert(
            gauge.clone(),
            GaugeIntegral {
                integral,
                last_checkpoint: Some(upto),
            },
        );

        debug!(
            "Gauge {} integral checkpointed to {}: {} (+{})",
            gauge, upto, integral, delta
        );

        Ok(integral)
    }

    /// Settle `account`'s accrual in `gauge` up to `now`. Must run before the
    /// account's stake changes.
    pub fn user_checkpoint<S: StakeAccounting + ?Sized>(
        &mut self,
        account: &Address,
        gauge: &GaugeId,
        controller: &GaugeController,
        stakes: &S,
        now: u64,
    ) -> Result<UserAccrual> {
        let integral =
            self.checkpoint_gauge_integral(gauge, now, controller, stakes.total_staked(gauge))?;

        let accrual = self.accrual(account, gauge);
        let settled = settle(accrual, stakes.stake_of(gauge, account), integral)?;
        self.accruals
            .entry(gauge.clone())
            .or_default()
            .insert(account.clone(), settled);

        Ok(settled)
    }

    /// Pay out everything `account` has earned in `gauge` and not yet been
    /// paid. Nothing owed is a successful zero payout.
    pub fn mint<S: StakeAccounting + ?Sized>(
        &mut self,
        account: &Address,
        gauge: &GaugeId,
        controller: &GaugeController,
        stakes: &S,
        payees: Payees<'_>,
        now: u64,
    ) -> Result<MintReceipt> {
        require!(controller.is_gauge(gauge), MinterError::GaugeNotAdded);
        require!(
            stakes.stake_of(gauge, account) > 0 || self.accrual(account, gauge).owed() > 0,
            MinterError::NoStake
        );

        let accrual = self.user_checkpoint(account, gauge, controller, stakes, now)?;
        let owed = accrual.owed();
        if owed == 0 {
            return Ok(MintReceipt {
                payout: Payout::Direct { amount: 0 },
                total_minted: accrual.minted,
            });
        }

        let payout = payees
            .router
            .route(account, owed, payees.escrow, payees.vesting, now)?;

        let minted = accrual.accrued;
        if let Some(entry) = self
            .accruals
            .get_mut(gauge)
            .and_then(|accounts| accounts.get_mut(account))
        {
            entry.minted = minted;
        }

        info!(
            "Minted {} for {} from gauge {} ({:?})",
            owed, account, gauge, payout
        );

        self.events.push(MinterEvent::Minted {
            recipient: account.clone(),
            gauge: gauge.clone(),
            amount: owed,
            minted,
            payout,
        });

        Ok(MintReceipt {
            payout,
            total_minted: minted,
        })
    }

    /// Amount `mint` would pay out at `now`, without changing any state
    pub fn claimable<S: StakeAccounting + ?Sized>(
        &self,
        account: &Address,
        gauge: &GaugeId,
        controller: &GaugeController,
        stakes: &S,
        now: u64,
    ) -> Result<u128> {
        require!(controller.is_gauge(gauge), MinterError::GaugeNotAdded);

        let current = self.integral_state(gauge);
        let integral = match current.last_checkpoint {
            Some(last) if now > last => {
                let delta =
                    self.integrate(gauge, last, now, controller, stakes.total_staked(gauge))?;
                current
                    .integral
                    .checked_add(delta)
                    .ok_or(MinterError::Overflow)?
            }
            _ => current.integral,
        };

        let settled = settle(
            self.accrual(account, gauge),
            stakes.stake_of(gauge, account),
            integral,
        )?;
        Ok(settled.owed())
    }

    /// Total paid out to `account` from `gauge`
    pub fn minted(&self, account: &Address, gauge: &GaugeId) -> u128 {
        self.accrual(account, gauge).minted
    }

    pub fn integral(&self, gauge: &GaugeId) -> u128 {
        self.integral_state(gauge).integral
    }

    pub fn integral_state(&self, gauge: &GaugeId) -> GaugeIntegral {
        self.integrals.get(gauge).copied().unwrap_or_default()
    }

    pub fn accrual(&self, account: &Address, gauge: &GaugeId) -> UserAccrual {
        self.accruals
            .get(gauge)
            .and_then(|accounts| accounts.get(account))
            .copied()
            .unwrap_or_default()
    }

    pub fn schedule(&self) -> &EmissionSchedule {
        &self.schedule
    }

    pub fn drain_events(&mut self) -> Vec<MinterEvent> {
        std::mem::take(&mut self.events)
    }

    /// Emission per unit of stake over `[from, to)`. The interval is split at
    /// week boundaries (relative weight changes) and rate epoch boundaries.
    fn integrate(
        &self,
        gauge: &GaugeId,
        from: u64,
        to: u64,
        controller: &GaugeController,
        total_staked: u128,
    ) -> Result<u128> {
        if total_staked == 0 {
            return Ok(0);
        }

        let mut delta: u128 = 0;
        let mut t = from;
        while t < to {
            let mut end = (round_to_week(t) + WEEK).min(to);
            if let Some(change) = self.schedule.next_rate_change(t) {
                end = end.min(change);
            }

            let rate = self.schedule.rate_at(t);
            let weight = controller.gauge_relative_weight(gauge, t)?;
            if rate > 0 && weight > 0 {
                let emitted = U256::from(rate) * U256::from(end - t);
                let piece = mul_div(emitted, U256::from(weight), U256::from(total_staked))?;
                delta = delta.checked_add(piece).ok_or(MinterError::Overflow)?;
            }
            t = end;
        }

        Ok(delta)
    }
}

/// Credit `stake * (integral - snapshot)` and move the snapshot
fn settle(mut accrual: UserAccrual, stake: u128, integral: u128) -> Result<UserAccrual> {
    let delta = integral.saturating_sub(accrual.integral_snapshot);
    let earned = mul_div(U256::from(stake), U256::from(delta), U256::from(WEIGHT_SCALE))?;
    accrual.accrued = accrual
        .accrued
        .checked_add(earned)
        .ok_or(MinterError::Overflow)?;
    accrual.integral_snapshot = integral;
    Ok(accrual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauge_controller::DEFAULT_VOTE_COOLDOWN;
    use std::collections::HashMap;
    use vesting::VestingLedger;
    use voting_escrow::{DAY, MAX_LOCK_DURATION};

    const T0: u64 = 1_700_000_000;
    const UNIT: u128 = 1_000_000_000_000_000_000;
    const RATE: u128 = 10 * UNIT;
    const YEAR: u64 = 365 * DAY;

    #[derive(Default)]
    struct Stakes(HashMap<(GaugeId, Address), u128>);

    impl Stakes {
        fn set(&mut self, gauge: &GaugeId, account: &Address, amount: u128) {
            self.0.insert((gauge.clone(), account.clone()), amount);
        }
    }

    impl StakeAccounting for Stakes {
        fn stake_of(&self, gauge: &GaugeId, account: &Address) -> u128 {
            self.0
                .get(&(gauge.clone(), account.clone()))
                .copied()
                .unwrap_or(0)
        }

        fn total_staked(&self, gauge: &GaugeId) -> u128 {
            self.0
                .iter()
                .filter(|((g, _), _)| g == gauge)
                .map(|(_, amount)| *amount)
                .sum()
        }
    }

    fn admin() -> Address {
        Address::from("admin")
    }

    fn alice() -> Address {
        Address::from("alice")
    }

    fn bob() -> Address {
        Address::from("bob")
    }

    fn pool() -> GaugeId {
        GaugeId::from("gauge-pool")
    }

    struct World {
        minter: Minter,
        controller: GaugeController,
        escrow: VotingEscrow,
        router: RewardRouter,
        stakes: Stakes,
    }

    impl World {
        fn new(gauge_weight: u128) -> Self {
            let mut controller = GaugeController::new(admin(), DEFAULT_VOTE_COOLDOWN, T0);
            let type_id = controller.add_type(&admin(), "Liquidity", RATE, T0).unwrap();
            controller
                .add_gauge(&admin(), &pool(), type_id, gauge_weight, T0)
                .unwrap();

            let schedule = EmissionSchedule::new(RATE, YEAR, 4, 5).unwrap();
            let mut minter = Minter::new(schedule);
            minter.update_mining_parameters(round_to_week(T0) + WEEK);
            Self {
                minter,
                controller,
                escrow: VotingEscrow::new(T0),
                router: RewardRouter::new(),
                stakes: Stakes::default(),
            }
        }

        fn stake(&mut self, account: &Address, amount: u128, now: u64) {
            self.minter
                .user_checkpoint(account, &pool(), &self.controller, &self.stakes, now)
                .unwrap();
            let current = self.stakes.stake_of(&pool(), account);
            self.stakes.set(&pool(), account, current + amount);
        }

        fn mint(&mut self, account: &Address, now: u64) -> Result<MintReceipt> {
            let payees = Payees {
                escrow: &mut self.escrow,
                router: &self.router,
                vesting: None,
            };
            self.minter
                .mint(account, &pool(), &self.controller, &self.stakes, payees, now)
        }
    }

    #[test]
    fn test_zero_weight_gauge_pays_nothing() {
        let mut world = World::new(0);
        world.stake(&alice(), 1_000 * UNIT, T0);

        let receipt = world.mint(&alice(), T0 + 7 * DAY).unwrap();
        assert_eq!(receipt.amount(), 0);
        assert_eq!(world.minter.minted(&alice(), &pool()), 0);
    }

    #[test]
    fn test_mint_requires_stake() {
        let mut world = World::new(1);
        assert_eq!(world.mint(&alice(), T0 + DAY), Err(MinterError::NoStake));

        let payees = Payees {
            escrow: &mut world.escrow,
            router: &world.router,
            vesting: None,
        };
        let result = world.minter.mint(
            &alice(),
            &GaugeId::from("missing"),
            &world.controller,
            &world.stakes,
            payees,
            T0,
        );
        assert_eq!(result, Err(MinterError::GaugeNotAdded));
    }

    #[test]
    fn test_single_staker_receives_full_emission() {
        let mut world = World::new(1);
        let start = round_to_week(T0) + WEEK;
        world.stake(&alice(), 1_000 * UNIT, start);

        let receipt = world.mint(&alice(), start + DAY).unwrap();
        // Sole gauge with full relative weight
        let expected = RATE * DAY as u128;
        assert!(receipt.amount() <= expected);
        assert!(expected - receipt.amount() < 1_000_000);
        assert_eq!(receipt.payout, Payout::Direct { amount: receipt.amount() });

        // Nothing left until time passes
        assert_eq!(world.mint(&alice(), start + DAY).unwrap().amount(), 0);
    }

    #[test]
    fn test_emission_split_by_stake() {
        let mut world = World::new(1);
        let start = round_to_week(T0) + WEEK;
        world.stake(&alice(), 300 * UNIT, start);
        world.stake(&bob(), 100 * UNIT, start);

        let alice_paid = world.mint(&alice(), start + DAY).unwrap().amount();
        let bob_paid = world.mint(&bob(), start + DAY).unwrap().amount();
        assert!(alice_paid.abs_diff(3 * bob_paid) <= 3);
    }

    #[test]
    fn test_later_depositor_does_not_dilute_past() {
        let mut world = World::new(1);
        let start = round_to_week(T0) + WEEK;
        world.stake(&alice(), 100 * UNIT, start);

        let preview = world
            .minter
            .claimable(&alice(), &pool(), &world.controller, &world.stakes, start + DAY)
            .unwrap();
        world.stake(&bob(), 900 * UNIT, start + DAY);

        let paid = world.mint(&alice(), start + DAY).unwrap().amount();
        assert_eq!(paid, preview);
    }

    #[test]
    fn test_no_emission_before_first_update() {
        let mut world = World::new(1);
        world.minter = Minter::new(EmissionSchedule::new(RATE, YEAR, 4, 5).unwrap());
        let start = round_to_week(T0) + WEEK;
        world.stake(&alice(), UNIT, start);

        assert_eq!(world.minter.schedule().mining_epoch(), None);
        assert_eq!(world.mint(&alice(), start + WEEK).unwrap().amount(), 0);
        assert_eq!(world.minter.integral_state(&pool()).last_checkpoint, Some(start + WEEK));

        // Emission counts from the update, not from the first checkpoint
        assert_eq!(world.minter.update_mining_parameters(start + WEEK), 1);
        let paid = world.mint(&alice(), start + WEEK + DAY).unwrap().amount();
        let expected = RATE * DAY as u128;
        assert!(paid <= expected);
        assert!(expected - paid < 1_000_000);
    }

    #[test]
    fn test_integral_checkpoint_idempotent() {
        let mut world = World::new(1);
        let start = round_to_week(T0) + WEEK;
        let total = 1_000 * UNIT;

        world
            .minter
            .checkpoint_gauge_integral(&pool(), start, &world.controller, total)
            .unwrap();
        let integral = world
            .minter
            .checkpoint_gauge_integral(&pool(), start + DAY, &world.controller, total)
            .unwrap();
        assert!(integral > 0);

        for upto in [start + DAY, start + 10, start] {
            let again = world
                .minter
                .checkpoint_gauge_integral(&pool(), upto, &world.controller, total)
                .unwrap();
            assert_eq!(again, integral);
        }
    }

    #[test]
    fn test_integral_splits_at_rate_epochs() {
        let mut world = World::new(1);
        let start = round_to_week(T0) + WEEK;
        let total = UNIT;

        world
            .minter
            .checkpoint_gauge_integral(&pool(), start, &world.controller, total)
            .unwrap();
        let integral = world
            .minter
            .checkpoint_gauge_integral(&pool(), start + YEAR + DAY, &world.controller, total)
            .unwrap();

        // One full epoch at RATE, one day at 4/5 RATE, per unit of stake
        let expected = RATE * YEAR as u128 + RATE * 4 / 5 * DAY as u128;
        assert!(integral <= expected);
        assert!(expected - integral < UNIT);
        assert_eq!(world.minter.schedule().mining_epoch(), Some(1));
    }

    #[test]
    fn test_compound_mint_grows_lock() {
        let mut world = World::new(1);
        world
            .escrow
            .create_lock(&alice(), 100 * UNIT, T0 + MAX_LOCK_DURATION, T0)
            .unwrap();
        world.router.register_compound(&alice());

        let start = round_to_week(T0) + WEEK;
        world.stake(&alice(), UNIT, start);
        let receipt = world.mint(&alice(), start + DAY).unwrap();

        assert!(matches!(receipt.payout, Payout::Compounded { .. }));
        assert_eq!(
            world.escrow.locked(&alice()).amount,
            100 * UNIT + receipt.amount()
        );
    }

    #[test]
    fn test_vested_mint() {
        let mut world = World::new(1);
        let mut ledger = VestingLedger::new(DAY).unwrap();
        let start = round_to_week(T0) + WEEK;
        world.stake(&alice(), UNIT, start);

        let payees = Payees {
            escrow: &mut world.escrow,
            router: &world.router,
            vesting: Some(&mut ledger),
        };
        let receipt = world
            .minter
            .mint(&alice(), &pool(), &world.controller, &world.stakes, payees, start + DAY)
            .unwrap();

        assert!(matches!(receipt.payout, Payout::Vested { .. }));
        assert_eq!(
            ledger.record(&alice()).unwrap().total_locked,
            receipt.amount()
        );
        assert_eq!(ledger.claimable(&alice(), start + DAY), 0);
    }

    mod proptest_integral {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_integral_monotonic(
                steps in proptest::collection::vec(0u64..3 * WEEK, 1..8),
                total in UNIT..1_000_000_000 * UNIT,
            ) {
                let mut world = World::new(1);
                let mut now = round_to_week(T0) + WEEK;
                let mut previous = world
                    .minter
                    .checkpoint_gauge_integral(&pool(), now, &world.controller, total)
                    .unwrap();

                for step in steps {
                    now += step;
                    let integral = world
                        .minter
                        .checkpoint_gauge_integral(&pool(), now, &world.controller, total)
                        .unwrap();
                    prop_assert!(integral >= previous);
                    previous = integral;
                }
            }
        }
    }
}
