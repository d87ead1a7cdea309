use thiserror::Error;
use voting_escrow::Address;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient allowance: need {need}, approved {approved}")]
    InsufficientAllowance { need: u128, approved: u128 },

    #[error("Insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: u128, have: u128 },

    #[error("Engine is not an authorized minter")]
    NotAuthorizedMinter,

    #[error("Balance overflow")]
    Overflow,
}

/// Fungible token ledger the engine settles against.
///
/// `transfer_in` and `transfer_out` move tokens between an account and the
/// engine's custody; `mint` creates new tokens.
#[cfg_attr(test, mockall::automock)]
pub trait TokenLedger {
    fn transfer_in(&mut self, from: &Address, amount: u128) -> Result<(), LedgerError>;

    fn transfer_out(&mut self, to: &Address, amount: u128) -> Result<(), LedgerError>;

    fn mint(&mut self, to: &Address, amount: u128) -> Result<(), LedgerError>;
}

/// A ledger call recorded during a transition and executed once it is
/// complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LedgerOp {
    TransferIn { from: Address, amount: u128 },
    TransferOut { to: Address, amount: u128 },
    Mint { to: Address, amount: u128 },
}

impl LedgerOp {
    pub(crate) fn execute<L: TokenLedger + ?Sized>(&self, ledger: &mut L) -> Result<(), LedgerError> {
        match self {
            LedgerOp::TransferIn { from, amount } => ledger.transfer_in(from, *amount),
            LedgerOp::TransferOut { to, amount } => ledger.transfer_out(to, *amount),
            LedgerOp::Mint { to, amount } => ledger.mint(to, *amount),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_allowance_message() {
        let err = LedgerError::InsufficientAllowance {
            need: 1000,
            approved: 0,
        };
        assert!(err.to_string().contains("1000"));
        assert!(err.to_string().contains("allowance"));
    }
}
