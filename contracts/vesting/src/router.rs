use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};
use voting_escrow::{Address, VotingEscrow};

use crate::error::VestingError;
use crate::ledger::VestingLedger;
use crate::state::{Payout, RewardMode, VestingEvent};

/// Per-account payout mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RewardRouter {
    compound: BTreeSet<Address>,
    #[serde(skip)]
    events: Vec<VestingEvent>,
}

impl RewardRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_compound(&mut self, account: &Address) {
        if self.compound.insert(account.clone()) {
            info!("{} registered for compounding", account);
            self.events.push(VestingEvent::CompoundRegistered {
                account: account.clone(),
            });
        }
    }

    pub fn unregister_compound(&mut self, account: &Address) {
        if self.compound.remove(account) {
            info!("{} unregistered from compounding", account);
            self.events.push(VestingEvent::CompoundUnregistered {
                account: account.clone(),
            });
        }
    }

    pub fn is_compound(&self, account: &Address) -> bool {
        self.compound.contains(account)
    }

    pub fn mode(&self, account: &Address) -> RewardMode {
        if self.is_compound(account) {
            RewardMode::Compound
        } else {
            RewardMode::Standard
        }
    }

    /// Send `amount` owed to `account` where its mode says.
    ///
    /// Compounding requires an unexpired lock and pays out directly
    /// otherwise. Standard accounts vest when a vesting ledger is given.
    pub fn route(
        &self,
        account: &Address,
        amount: u128,
        escrow: &mut VotingEscrow,
        vesting: Option<&mut VestingLedger>,
        now: u64,
    ) -> Result<Payout, VestingError> {
        if amount == 0 {
            return Ok(Payout::Direct { amount });
        }

        let payout = match self.mode(account) {
            RewardMode::Compound if escrow.locked(account).is_active(now) => {
                escrow.deposit_for(account, amount, now)?;
                Payout::Compounded { amount }
            }
            RewardMode::Compound => Payout::Direct { amount },
            RewardMode::Standard => match vesting {
                Some(ledger) => {
                    ledger.lock(account, amount, now)?;
                    Payout::Vested { amount }
                }
                None => Payout::Direct { amount },
            },
        };

        debug!("Routed {} to {}: {:?}", amount, account, payout);

        Ok(payout)
    }

    pub fn drain_events(&mut self) -> Vec<VestingEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voting_escrow::MAX_LOCK_DURATION;

    const T0: u64 = 1_700_000_000;

    fn alice() -> Address {
        Address::from("alice")
    }

    fn locked_escrow() -> VotingEscrow {
        let mut escrow = VotingEscrow::new(T0);
        escrow
            .create_lock(&alice(), 1_000, T0 + MAX_LOCK_DURATION, T0)
            .unwrap();
        escrow
    }

    #[test]
    fn test_standard_without_vesting_is_direct() {
        let router = RewardRouter::new();
        let mut escrow = locked_escrow();
        let payout = router.route(&alice(), 50, &mut escrow, None, T0).unwrap();
        assert_eq!(payout, Payout::Direct { amount: 50 });
        assert_eq!(escrow.locked(&alice()).amount, 1_000);
    }

    #[test]
    fn test_standard_with_vesting_is_vested() {
        let router = RewardRouter::new();
        let mut escrow = locked_escrow();
        let mut ledger = VestingLedger::new(86_400).unwrap();

        let payout = router
            .route(&alice(), 50, &mut escrow, Some(&mut ledger), T0)
            .unwrap();
        assert_eq!(payout, Payout::Vested { amount: 50 });
        assert_eq!(ledger.record(&alice()).unwrap().total_locked, 50);
    }

    #[test]
    fn test_compound_grows_lock() {
        let mut router = RewardRouter::new();
        router.register_compound(&alice());
        let mut escrow = locked_escrow();
        let mut ledger = VestingLedger::new(86_400).unwrap();

        let payout = router
            .route(&alice(), 50, &mut escrow, Some(&mut ledger), T0 + 10)
            .unwrap();
        assert_eq!(payout, Payout::Compounded { amount: 50 });
        assert_eq!(escrow.locked(&alice()).amount, 1_050);
        assert!(ledger.record(&alice()).is_none());
    }

    #[test]
    fn test_compound_without_lock_falls_back_to_direct() {
        let mut router = RewardRouter::new();
        let bob = Address::from("bob");
        router.register_compound(&bob);
        let mut escrow = locked_escrow();

        let payout = router.route(&bob, 50, &mut escrow, None, T0).unwrap();
        assert_eq!(payout, Payout::Direct { amount: 50 });
        assert_eq!(escrow.locked(&bob).amount, 0);
    }

    #[test]
    fn test_toggle_records_events_once() {
        let mut router = RewardRouter::new();
        router.register_compound(&alice());
        router.register_compound(&alice());
        assert!(router.is_compound(&alice()));
        router.unregister_compound(&alice());
        assert_eq!(router.mode(&alice()), RewardMode::Standard);

        assert_eq!(
            router.drain_events(),
            vec![
                VestingEvent::CompoundRegistered { account: alice() },
                VestingEvent::CompoundUnregistered { account: alice() },
            ]
        );
    }
}
