use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use gauge_controller::{GaugeController, TypeId};
use minter::{
    EmissionSchedule, MintReceipt, Minter, MinterError, Payees, StakeAccounting, UserAccrual,
};
use vesting::{Payout, RewardRouter, VestingLedger};
use voting_escrow::{Address, GaugeId, VotingEscrow};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::event::EngineEvent;
use crate::ledger::{LedgerOp, TokenLedger};
use crate::memory::MemoryStakes;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Everything a transaction may change. Cloned before each transaction and
/// restored when it fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CoreState {
    escrow: VotingEscrow,
    controller: GaugeController,
    minter: Minter,
    router: RewardRouter,
    vesting: Option<VestingLedger>,
    custody: Address,
    last_timestamp: u64,
}

impl CoreState {
    /// Ledger call that delivers a routed payout
    fn payout_op(&self, account: &Address, payout: Payout) -> Option<LedgerOp> {
        if payout.amount() == 0 {
            return None;
        }
        let to = match payout {
            Payout::Direct { .. } => account.clone(),
            Payout::Vested { .. } | Payout::Compounded { .. } => self.custody.clone(),
        };
        Some(LedgerOp::Mint {
            to,
            amount: payout.amount(),
        })
    }
}

/// Single-writer runtime over the lock ledger, gauge controller, minter and
/// vesting layer.
///
/// Each public mutating method is one transaction: it reads the clock once,
/// applies the state transition, then performs the token ledger calls the
/// transition produced. A failure at any step restores the state from
/// before the transaction.
pub struct Engine<L, S, C> {
    state: CoreState,
    ledger: L,
    stakes: S,
    clock: C,
    events: Vec<EngineEvent>,
}

impl<L: TokenLedger, S: StakeAccounting, C: Clock> Engine<L, S, C> {
    pub fn new(config: &EngineConfig, ledger: L, stakes: S, clock: C) -> Result<Self> {
        let now = clock.unix_timestamp();
        let emission = &config.emission;
        let schedule = EmissionSchedule::new(
            emission.initial_rate,
            emission.epoch_duration,
            emission.reduction_numerator,
            emission.reduction_denominator,
        )?;
        let vesting = config.vesting.duration.map(VestingLedger::new).transpose()?;

        info!(
            "Engine started at {} (admin: {}, vesting: {:?})",
            now, config.admin, config.vesting.duration
        );

        Ok(Self {
            state: CoreState {
                escrow: VotingEscrow::new(now),
                controller: GaugeController::new(
                    Address::new(config.admin.clone()),
                    config.controller.vote_cooldown,
                    now,
                ),
                minter: Minter::new(schedule),
                router: RewardRouter::new(),
                vesting,
                custody: Address::new(config.custody.clone()),
                last_timestamp: now,
            },
            ledger,
            stakes,
            clock,
            events: Vec::new(),
        })
    }

    // Lock ledger

    pub fn create_lock(&mut self, account: &Address, amount: u128, unlock_time: u64) -> Result<()> {
        self.transact("create_lock", |state, _, now| {
            state.escrow.create_lock(account, amount, unlock_time, now)?;
            Ok(((), vec![transfer_in(account, amount)]))
        })
    }

    pub fn increase_amount(&mut self, account: &Address, amount: u128) -> Result<()> {
        self.transact("increase_amount", |state, _, now| {
            state.escrow.increase_amount(account, amount, now)?;
            Ok(((), vec![transfer_in(account, amount)]))
        })
    }

    /// `payer` tops up `account`'s existing lock
    pub fn deposit_for(&mut self, payer: &Address, account: &Address, amount: u128) -> Result<()> {
        self.transact("deposit_for", |state, _, now| {
            state.escrow.deposit_for(account, amount, now)?;
            Ok(((), vec![transfer_in(payer, amount)]))
        })
    }

    pub fn increase_unlock_time(&mut self, account: &Address, unlock_time: u64) -> Result<()> {
        self.transact("increase_unlock_time", |state, _, now| {
            state.escrow.increase_unlock_time(account, unlock_time, now)?;
            Ok(((), Vec::new()))
        })
    }

    /// `payer` locks `amount` for `account` for `duration` seconds
    pub fn lock_for(
        &mut self,
        payer: &Address,
        account: &Address,
        amount: u128,
        duration: u64,
    ) -> Result<()> {
        self.transact("lock_for", |state, _, now| {
            state.escrow.lock_for(account, amount, duration, now)?;
            Ok(((), vec![transfer_in(payer, amount)]))
        })
    }

    pub fn withdraw(&mut self, account: &Address) -> Result<u128> {
        self.transact("withdraw", |state, _, now| {
            let amount = state.escrow.withdraw(account, now)?;
            Ok((
                amount,
                vec![LedgerOp::TransferOut {
                    to: account.clone(),
                    amount,
                }],
            ))
        })
    }

    /// Advance the global voting power and gauge weight histories
    pub fn checkpoint(&mut self) -> Result<()> {
        self.transact("checkpoint", |state, _, now| {
            state.escrow.checkpoint(now)?;
            state.controller.checkpoint(now)?;
            Ok(((), Vec::new()))
        })
    }

    // Gauge controller

    pub fn add_type(&mut self, caller: &Address, name: &str, weight: u128) -> Result<TypeId> {
        self.transact("add_type", |state, _, now| {
            let type_id = state.controller.add_type(caller, name, weight, now)?;
            Ok((type_id, Vec::new()))
        })
    }

    pub fn change_type_weight(&mut self, caller: &Address, type_id: TypeId, weight: u128) -> Result<()> {
        self.transact("change_type_weight", |state, _, now| {
            state.controller.change_type_weight(caller, type_id, weight, now)?;
            Ok(((), Vec::new()))
        })
    }

    pub fn add_gauge(
        &mut self,
        caller: &Address,
        gauge: &GaugeId,
        gauge_type: TypeId,
        weight: u128,
    ) -> Result<()> {
        self.transact("add_gauge", |state, _, now| {
            state.controller.add_gauge(caller, gauge, gauge_type, weight, now)?;
            Ok(((), Vec::new()))
        })
    }

    pub fn change_gauge_weight(&mut self, caller: &Address, gauge: &GaugeId, weight: u128) -> Result<()> {
        self.transact("change_gauge_weight", |state, _, now| {
            state.controller.change_gauge_weight(caller, gauge, weight, now)?;
            Ok(((), Vec::new()))
        })
    }

    pub fn vote_for_gauge_weights(&mut self, account: &Address, gauge: &GaugeId, power_bps: u64) -> Result<()> {
        self.transact("vote_for_gauge_weights", |state, _, now| {
            state
                .controller
                .vote_for_gauge_weights(account, gauge, power_bps, &state.escrow, now)?;
            Ok(((), Vec::new()))
        })
    }

    pub fn checkpoint_gauge(&mut self, gauge: &GaugeId) -> Result<()> {
        self.transact("checkpoint_gauge", |state, _, now| {
            state.controller.checkpoint_gauge(gauge, now)?;
            Ok(((), Vec::new()))
        })
    }

    pub fn checkpoint_type(&mut self, type_id: TypeId) -> Result<()> {
        self.transact("checkpoint_type", |state, _, now| {
            state.controller.checkpoint_type(type_id, now)?;
            Ok(((), Vec::new()))
        })
    }

    // Emission

    pub fn update_mining_parameters(&mut self) -> Result<u64> {
        self.transact("update_mining_parameters", |state, _, now| {
            Ok((state.minter.update_mining_parameters(now), Vec::new()))
        })
    }

    /// Advance the integral of `gauge` to now
    pub fn checkpoint_gauge_integral(&mut self, gauge: &GaugeId) -> Result<u128> {
        self.transact("checkpoint_gauge_integral", |state, stakes, now| {
            state.controller.checkpoint_gauge(gauge, now)?;
            let integral = state.minter.checkpoint_gauge_integral(
                gauge,
                now,
                &state.controller,
                stakes.total_staked(gauge),
            )?;
            Ok((integral, Vec::new()))
        })
    }

    /// Settle `account` in `gauge`. Stake collaborators call this before a
    /// stake changes.
    pub fn user_checkpoint(&mut self, account: &Address, gauge: &GaugeId) -> Result<UserAccrual> {
        self.transact("user_checkpoint", |state, stakes, now| {
            state.controller.checkpoint_gauge(gauge, now)?;
            let accrual = state
                .minter
                .user_checkpoint(account, gauge, &state.controller, stakes, now)?;
            Ok((accrual, Vec::new()))
        })
    }

    pub fn mint(&mut self, account: &Address, gauge: &GaugeId) -> Result<MintReceipt> {
        self.transact("mint", |state, stakes, now| {
            let receipt = mint_in(state, stakes, account, gauge, now)?;
            let ops = state.payout_op(account, receipt.payout).into_iter().collect();
            Ok((receipt, ops))
        })
    }

    /// Mint from several gauges in one transaction
    pub fn mint_many(&mut self, account: &Address, gauges: &[GaugeId]) -> Result<Vec<MintReceipt>> {
        self.transact("mint_many", |state, stakes, now| {
            let mut receipts = Vec::with_capacity(gauges.len());
            let mut totals: BTreeMap<Address, u128> = BTreeMap::new();

            for gauge in gauges {
                let receipt = mint_in(state, stakes, account, gauge, now)?;
                if let Some(LedgerOp::Mint { to, amount }) = state.payout_op(account, receipt.payout) {
                    let total = totals.entry(to).or_insert(0);
                    *total = total.checked_add(amount).ok_or(MinterError::Overflow)?;
                }
                receipts.push(receipt);
            }

            let ops = totals
                .into_iter()
                .map(|(to, amount)| LedgerOp::Mint { to, amount })
                .collect();
            Ok((receipts, ops))
        })
    }

    // Vesting and compounding

    /// Release `account`'s vested emission. Zero when nothing is due or
    /// vesting is not configured.
    pub fn claim_vested(&mut self, account: &Address) -> Result<u128> {
        self.transact("claim_vested", |state, _, now| {
            let Some(vesting) = state.vesting.as_mut() else {
                return Ok((0, Vec::new()));
            };
            let amount = vesting.claim(account, now)?;
            let ops = if amount > 0 {
                vec![LedgerOp::TransferOut {
                    to: account.clone(),
                    amount,
                }]
            } else {
                Vec::new()
            };
            Ok((amount, ops))
        })
    }

    pub fn register_compound(&mut self, account: &Address) -> Result<()> {
        self.transact("register_compound", |state, _, _| {
            state.router.register_compound(account);
            Ok(((), Vec::new()))
        })
    }

    pub fn unregister_compound(&mut self, account: &Address) -> Result<()> {
        self.transact("unregister_compound", |state, _, _| {
            state.router.unregister_compound(account);
            Ok(((), Vec::new()))
        })
    }

    // Queries

    pub fn voting_power(&self, account: &Address) -> u128 {
        self.state.escrow.voting_power_at(account, self.observed_now())
    }

    pub fn voting_power_at(&self, account: &Address, t: u64) -> u128 {
        self.state.escrow.voting_power_at(account, t)
    }

    pub fn total_voting_power_at(&self, t: u64) -> u128 {
        self.state.escrow.total_voting_power_at(t)
    }

    pub fn gauge_relative_weight(&self, gauge: &GaugeId, t: u64) -> Result<u128> {
        Ok(self.state.controller.gauge_relative_weight(gauge, t)?)
    }

    /// What `mint` would pay `account` from `gauge` now
    pub fn claimable(&self, account: &Address, gauge: &GaugeId) -> Result<u128> {
        let owed = self.state.minter.claimable(
            account,
            gauge,
            &self.state.controller,
            &self.stakes,
            self.observed_now(),
        )?;
        Ok(owed)
    }

    pub fn vested_claimable(&self, account: &Address) -> u128 {
        self.state
            .vesting
            .as_ref()
            .map(|vesting| vesting.claimable(account, self.observed_now()))
            .unwrap_or(0)
    }

    pub fn escrow(&self) -> &VotingEscrow {
        &self.state.escrow
    }

    pub fn controller(&self) -> &GaugeController {
        &self.state.controller
    }

    pub fn minter(&self) -> &Minter {
        &self.state.minter
    }

    pub fn router(&self) -> &RewardRouter {
        &self.state.router
    }

    pub fn vesting(&self) -> Option<&VestingLedger> {
        self.state.vesting.as_ref()
    }

    pub fn custody(&self) -> &Address {
        &self.state.custody
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Direct access for funding and approvals; the engine never keeps
    /// ledger state of its own.
    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    pub fn stakes(&self) -> &S {
        &self.stakes
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Take the events of all transactions committed since the last drain
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    /// Serialize the whole contract state
    pub fn export_state(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.state)?)
    }

    /// Replace the contract state with a snapshot from `export_state`
    pub fn import_state(&mut self, bytes: &[u8]) -> Result<()> {
        let state: CoreState = bincode::deserialize(bytes)?;
        info!(
            "Imported state (epoch {}, {} gauges)",
            state.escrow.epoch(),
            state.controller.n_gauges()
        );
        self.state = state;
        Ok(())
    }

    fn observed_now(&self) -> u64 {
        self.clock.unix_timestamp().max(self.state.last_timestamp)
    }

    fn transact<T, F>(&mut self, name: &str, apply: F) -> Result<T>
    where
        F: FnOnce(&mut CoreState, &S, u64) -> Result<(T, Vec<LedgerOp>)>,
    {
        let now = self.clock.unix_timestamp();
        if now < self.state.last_timestamp {
            return Err(EngineError::ClockRegression {
                last: self.state.last_timestamp,
                now,
            });
        }

        let snapshot = self.state.clone();
        self.state.last_timestamp = now;

        // State is fully committed before the ledger is called
        let result = apply(&mut self.state, &self.stakes, now).and_then(|(value, ops)| {
            for op in &ops {
                op.execute(&mut self.ledger)?;
            }
            Ok(value)
        });

        match result {
            Ok(value) => {
                self.collect_events();
                Ok(value)
            }
            Err(err) => {
                warn!("{} rolled back at {}: {}", name, now, err);
                self.state = snapshot;
                Err(err)
            }
        }
    }

    fn collect_events(&mut self) {
        let state = &mut self.state;
        self.events
            .extend(state.escrow.drain_events().into_iter().map(EngineEvent::Escrow));
        self.events.extend(
            state
                .controller
                .drain_events()
                .into_iter()
                .map(EngineEvent::Controller),
        );
        self.events
            .extend(state.minter.drain_events().into_iter().map(EngineEvent::Minter));
        self.events
            .extend(state.router.drain_events().into_iter().map(EngineEvent::Vesting));
        if let Some(vesting) = state.vesting.as_mut() {
            self.events
                .extend(vesting.drain_events().into_iter().map(EngineEvent::Vesting));
        }
    }
}

impl<L: TokenLedger, C: Clock> Engine<L, MemoryStakes, C> {
    /// Add to `account`'s stake in `gauge`, settling it first
    pub fn deposit_stake(&mut self, account: &Address, gauge: &GaugeId, amount: u128) -> Result<()> {
        self.user_checkpoint(account, gauge)?;
        self.stakes.increase(gauge, account, amount)?;
        info!("{} staked {} in {}", account, amount, gauge);
        Ok(())
    }

    /// Remove from `account`'s stake in `gauge`, settling it first
    pub fn withdraw_stake(&mut self, account: &Address, gauge: &GaugeId, amount: u128) -> Result<()> {
        let have = self.stakes.stake_of(gauge, account);
        if have < amount {
            return Err(EngineError::InsufficientStake { need: amount, have });
        }
        self.user_checkpoint(account, gauge)?;
        self.stakes.decrease(gauge, account, amount);
        info!("{} unstaked {} from {}", account, amount, gauge);
        Ok(())
    }
}

fn mint_in<S: StakeAccounting>(
    state: &mut CoreState,
    stakes: &S,
    account: &Address,
    gauge: &GaugeId,
    now: u64,
) -> Result<MintReceipt> {
    state.controller.checkpoint_gauge(gauge, now)?;
    let payees = Payees {
        escrow: &mut state.escrow,
        router: &state.router,
        vesting: state.vesting.as_mut(),
    };
    let receipt = state
        .minter
        .mint(account, gauge, &state.controller, stakes, payees, now)?;
    Ok(receipt)
}

fn transfer_in(from: &Address, amount: u128) -> LedgerOp {
    LedgerOp::TransferIn {
        from: from.clone(),
        amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::{LedgerError, MockTokenLedger};
    use mockall::predicate::*;
    use voting_escrow::{MAX_LOCK_DURATION, WEEK};

    const T0: u64 = 1_700_000_000;
    const UNIT: u128 = 1_000_000_000_000_000_000;

    fn alice() -> Address {
        Address::from("alice")
    }

    fn admin() -> Address {
        Address::from("admin")
    }

    fn pool() -> GaugeId {
        GaugeId::from("gauge-pool")
    }

    fn engine(ledger: MockTokenLedger) -> (Engine<MockTokenLedger, MemoryStakes, ManualClock>, ManualClock) {
        let clock = ManualClock::new(T0);
        let engine = Engine::new(
            &EngineConfig::default(),
            ledger,
            MemoryStakes::new(),
            clock.clone(),
        )
        .unwrap();
        (engine, clock)
    }

    #[test]
    fn test_rejected_transfer_rolls_back_lock() {
        let mut ledger = MockTokenLedger::new();
        ledger.expect_transfer_in().times(1).returning(|_, amount| {
            Err(LedgerError::InsufficientAllowance {
                need: amount,
                approved: 0,
            })
        });
        let (mut engine, _) = engine(ledger);

        let err = engine
            .create_lock(&alice(), 1_000_000, T0 + MAX_LOCK_DURATION)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Ledger(LedgerError::InsufficientAllowance { .. })
        ));
        assert_eq!(engine.escrow().locked(&alice()).amount, 0);
        assert_eq!(engine.escrow().supply(), 0);
        assert_eq!(engine.escrow().epoch(), 0);
        assert!(engine.drain_events().is_empty());
    }

    #[test]
    fn test_validation_error_never_reaches_ledger() {
        let mut ledger = MockTokenLedger::new();
        ledger.expect_transfer_in().never();
        let (mut engine, _) = engine(ledger);

        let err = engine.lock_for(&alice(), &alice(), 1_000_000, 1).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn test_compound_payout_mints_to_custody() {
        let mut ledger = MockTokenLedger::new();
        ledger.expect_transfer_in().returning(|_, _| Ok(()));
        ledger
            .expect_mint()
            .with(eq(Address::from("custody")), always())
            .times(1)
            .returning(|_, _| Ok(()));
        let (mut engine, clock) = engine(ledger);

        engine
            .create_lock(&alice(), 100 * UNIT, T0 + MAX_LOCK_DURATION)
            .unwrap();
        engine.register_compound(&alice()).unwrap();
        let type_id = engine.add_type(&admin(), "Liquidity", UNIT).unwrap();
        engine.add_gauge(&admin(), &pool(), type_id, 1).unwrap();
        engine.update_mining_parameters().unwrap();
        engine.deposit_stake(&alice(), &pool(), UNIT).unwrap();

        clock.advance(2 * WEEK);
        let receipt = engine.mint(&alice(), &pool()).unwrap();

        assert!(matches!(receipt.payout, Payout::Compounded { .. }));
        assert_eq!(
            engine.escrow().locked(&alice()).amount,
            100 * UNIT + receipt.amount()
        );
    }

    #[test]
    fn test_failed_mint_restores_accrual() {
        let mut ledger = MockTokenLedger::new();
        ledger
            .expect_mint()
            .times(1)
            .returning(|_, _| Err(LedgerError::NotAuthorizedMinter));
        let (mut engine, clock) = engine(ledger);

        let type_id = engine.add_type(&admin(), "Liquidity", UNIT).unwrap();
        engine.add_gauge(&admin(), &pool(), type_id, 1).unwrap();
        engine.update_mining_parameters().unwrap();
        engine.deposit_stake(&alice(), &pool(), UNIT).unwrap();

        clock.advance(2 * WEEK);
        let before = engine.claimable(&alice(), &pool()).unwrap();
        assert!(before > 0);

        let err = engine.mint(&alice(), &pool()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Authorization);
        assert_eq!(engine.minter().minted(&alice(), &pool()), 0);
        assert_eq!(engine.claimable(&alice(), &pool()).unwrap(), before);
    }

    #[test]
    fn test_clock_regression_is_fatal() {
        let (mut engine, clock) = engine(MockTokenLedger::new());
        clock.advance(100);
        engine.checkpoint().unwrap();

        clock.set(T0 + 50);
        let err = engine.checkpoint().unwrap_err();
        assert!(matches!(
            err,
            EngineError::ClockRegression {
                last,
                now
            } if last == T0 + 100 && now == T0 + 50
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_export_import_roundtrip() {
        let mut ledger = MockTokenLedger::new();
        ledger.expect_transfer_in().returning(|_, _| Ok(()));
        let (mut engine, clock) = engine(ledger);

        engine
            .create_lock(&alice(), 100 * UNIT, T0 + MAX_LOCK_DURATION)
            .unwrap();
        let type_id = engine.add_type(&admin(), "Liquidity", UNIT).unwrap();
        engine.add_gauge(&admin(), &pool(), type_id, 0).unwrap();
        engine.vote_for_gauge_weights(&alice(), &pool(), 10_000).unwrap();
        let bytes = engine.export_state().unwrap();

        let (mut restored, restored_clock) = self::engine(MockTokenLedger::new());
        restored.import_state(&bytes).unwrap();
        clock.advance(3 * WEEK);
        restored_clock.advance(3 * WEEK);

        let t = T0 + 3 * WEEK;
        assert_eq!(restored.voting_power_at(&alice(), t), engine.voting_power_at(&alice(), t));
        assert_eq!(
            restored.gauge_relative_weight(&pool(), t).unwrap(),
            engine.gauge_relative_weight(&pool(), t).unwrap()
        );
        assert_eq!(restored.controller().vote_user_power(&alice()), 10_000);
    }
}
