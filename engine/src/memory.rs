//! In-memory collaborators for simulations and tests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::ledger::{LedgerError, TokenLedger};
use minter::StakeAccounting;
use voting_escrow::{Address, GaugeId};

/// Token balances with allowances toward a single custody account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryLedger {
    custody: Address,
    balances: BTreeMap<Address, u128>,
    allowances: BTreeMap<Address, u128>,
    total_supply: u128,
    minter_revoked: bool,
}

impl MemoryLedger {
    pub fn new(custody: Address) -> Self {
        Self {
            custody,
            ..Self::default()
        }
    }

    pub fn balance_of(&self, account: &Address) -> u128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn allowance(&self, owner: &Address) -> u128 {
        self.allowances.get(owner).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    pub fn custody(&self) -> &Address {
        &self.custody
    }

    /// Let custody pull up to `amount` from `owner`
    pub fn approve(&mut self, owner: &Address, amount: u128) {
        self.allowances.insert(owner.clone(), amount);
    }

    /// Credit `amount` outside of the minting path
    pub fn fund(&mut self, account: &Address, amount: u128) -> Result<(), LedgerError> {
        self.issue(account, amount)
    }

    pub fn set_minter_revoked(&mut self, revoked: bool) {
        self.minter_revoked = revoked;
    }

    fn debit(&mut self, account: &Address, amount: u128) -> Result<(), LedgerError> {
        let have = self.balance_of(account);
        if have < amount {
            return Err(LedgerError::InsufficientBalance { need: amount, have });
        }
        self.balances.insert(account.clone(), have - amount);
        Ok(())
    }

    /// Balances sum to `total_supply`, so only `issue` can overflow here
    fn credit(&mut self, account: &Address, amount: u128) -> Result<(), LedgerError> {
        let balance = self.balances.entry(account.clone()).or_insert(0);
        *balance = balance.checked_add(amount).ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    /// Credit new tokens, growing the supply
    fn issue(&mut self, account: &Address, amount: u128) -> Result<(), LedgerError> {
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        self.credit(account, amount)?;
        self.total_supply = supply;
        Ok(())
    }
}

impl TokenLedger for MemoryLedger {
    fn transfer_in(&mut self, from: &Address, amount: u128) -> Result<(), LedgerError> {
        let approved = self.allowance(from);
        if approved < amount {
            return Err(LedgerError::InsufficientAllowance {
                need: amount,
                approved,
            });
        }
        self.debit(from, amount)?;
        self.allowances.insert(from.clone(), approved - amount);
        let custody = self.custody.clone();
        self.credit(&custody, amount)?;

        debug!("Transferred {} from {} into custody", amount, from);
        Ok(())
    }

    fn transfer_out(&mut self, to: &Address, amount: u128) -> Result<(), LedgerError> {
        let custody = self.custody.clone();
        self.debit(&custody, amount)?;
        self.credit(to, amount)?;

        debug!("Transferred {} out of custody to {}", amount, to);
        Ok(())
    }

    fn mint(&mut self, to: &Address, amount: u128) -> Result<(), LedgerError> {
        if self.minter_revoked {
            return Err(LedgerError::NotAuthorizedMinter);
        }
        self.issue(to, amount)?;

        debug!("Minted {} to {}", amount, to);
        Ok(())
    }
}

/// Per-gauge deposits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStakes {
    stakes: BTreeMap<GaugeId, BTreeMap<Address, u128>>,
}

impl MemoryStakes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails when the gauge total would overflow, which also bounds
    /// every single stake
    pub(crate) fn increase(
        &mut self,
        gauge: &GaugeId,
        account: &Address,
        amount: u128,
    ) -> Result<(), LedgerError> {
        self.total_staked(gauge)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        let stake = self
            .stakes
            .entry(gauge.clone())
            .or_default()
            .entry(account.clone())
            .or_insert(0);
        *stake += amount;
        Ok(())
    }

    pub(crate) fn decrease(&mut self, gauge: &GaugeId, account: &Address, amount: u128) {
        if let Some(stake) = self
            .stakes
            .get_mut(gauge)
            .and_then(|accounts| accounts.get_mut(account))
        {
            *stake = stake.saturating_sub(amount);
        }
    }
}

impl StakeAccounting for MemoryStakes {
    fn stake_of(&self, gauge: &GaugeId, account: &Address) -> u128 {
        self.stakes
            .get(gauge)
            .and_then(|accounts| accounts.get(account))
            .copied()
            .unwrap_or(0)
    }

    fn total_staked(&self, gauge: &GaugeId) -> u128 {
        self.stakes
            .get(gauge)
            .map(|accounts| accounts.values().sum())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custody() -> Address {
        Address::from("custody")
    }

    fn alice() -> Address {
        Address::from("alice")
    }

    #[test]
    fn test_transfer_in_requires_allowance() {
        let mut ledger = MemoryLedger::new(custody());
        ledger.fund(&alice(), 1_000).unwrap();

        assert_eq!(
            ledger.transfer_in(&alice(), 500),
            Err(LedgerError::InsufficientAllowance {
                need: 500,
                approved: 0
            })
        );

        ledger.approve(&alice(), 500);
        ledger.transfer_in(&alice(), 500).unwrap();
        assert_eq!(ledger.balance_of(&alice()), 500);
        assert_eq!(ledger.balance_of(&custody()), 500);
        assert_eq!(ledger.allowance(&alice()), 0);
    }

    #[test]
    fn test_transfer_in_requires_balance() {
        let mut ledger = MemoryLedger::new(custody());
        ledger.approve(&alice(), 500);
        assert_eq!(
            ledger.transfer_in(&alice(), 500),
            Err(LedgerError::InsufficientBalance { need: 500, have: 0 })
        );
        assert_eq!(ledger.allowance(&alice()), 500);
    }

    #[test]
    fn test_mint_and_revoke() {
        let mut ledger = MemoryLedger::new(custody());
        ledger.mint(&alice(), 42).unwrap();
        assert_eq!(ledger.total_supply(), 42);

        ledger.set_minter_revoked(true);
        assert_eq!(ledger.mint(&alice(), 1), Err(LedgerError::NotAuthorizedMinter));
    }

    #[test]
    fn test_stakes_totals() {
        let gauge = GaugeId::from("gauge");
        let mut stakes = MemoryStakes::new();
        stakes.increase(&gauge, &alice(), 10).unwrap();
        stakes.increase(&gauge, &Address::from("bob"), 30).unwrap();
        stakes.decrease(&gauge, &alice(), 4);

        assert_eq!(stakes.stake_of(&gauge, &alice()), 6);
        assert_eq!(stakes.total_staked(&gauge), 36);
        assert_eq!(stakes.total_staked(&GaugeId::from("other")), 0);
    }

    #[test]
    fn test_overflowing_credit_is_rejected() {
        let mut ledger = MemoryLedger::new(custody());
        ledger.fund(&alice(), u128::MAX).unwrap();
        assert_eq!(ledger.mint(&Address::from("bob"), 1), Err(LedgerError::Overflow));
        assert_eq!(ledger.fund(&alice(), 1), Err(LedgerError::Overflow));
        assert_eq!(ledger.total_supply(), u128::MAX);
        assert_eq!(ledger.balance_of(&Address::from("bob")), 0);
    }

    #[test]
    fn test_stake_total_overflow_rejected() {
        let gauge = GaugeId::from("gauge");
        let mut stakes = MemoryStakes::new();
        stakes.increase(&gauge, &alice(), u128::MAX - 1).unwrap();
        assert_eq!(
            stakes.increase(&gauge, &Address::from("bob"), 2),
            Err(LedgerError::Overflow)
        );
        assert_eq!(stakes.stake_of(&gauge, &Address::from("bob")), 0);
        assert_eq!(stakes.total_staked(&gauge), u128::MAX - 1);
    }
}
