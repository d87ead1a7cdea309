use thiserror::Error;

use crate::ledger::LedgerError;
use gauge_controller::GaugeControllerError;
use minter::MinterError;
use vesting::VestingError;
use voting_escrow::VotingEscrowError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Lock ledger: {0}")]
    Escrow(#[from] VotingEscrowError),

    #[error("Gauge controller: {0}")]
    Controller(#[from] GaugeControllerError),

    #[error("Minter: {0}")]
    Minter(#[from] MinterError),

    #[error("Vesting: {0}")]
    Vesting(#[from] VestingError),

    #[error("Token ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Clock went backwards: last {last}, now {now}")]
    ClockRegression { last: u64, now: u64 },

    #[error("Insufficient stake: need {need}, have {have}")]
    InsufficientStake { need: u128, have: u128 },

    #[error("State snapshot error: {0}")]
    Snapshot(#[from] bincode::Error),
}

/// Error classes callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before any state change
    Validation,
    Authorization,
    /// Valid input the current state does not allow
    Precondition,
    NotFound,
    /// Accounting invariants broke; the transaction was aborted
    Fatal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        use ErrorKind::*;

        match self {
            EngineError::Escrow(err) => match err {
                VotingEscrowError::InvalidAmount | VotingEscrowError::InvalidDuration => Validation,
                VotingEscrowError::LockAlreadyExists
                | VotingEscrowError::LockExpired
                | VotingEscrowError::LockNotExpired
                | VotingEscrowError::CanOnlyIncreaseDuration => Precondition,
                VotingEscrowError::NoExistingLock => NotFound,
                VotingEscrowError::Overflow | VotingEscrowError::CorruptHistory => Fatal,
            },
            EngineError::Controller(err) => match err {
                GaugeControllerError::InvalidPower => Validation,
                GaugeControllerError::Unauthorized => Authorization,
                GaugeControllerError::DuplicateGauge
                | GaugeControllerError::LockExpiresTooSoon
                | GaugeControllerError::VoteTooSoon
                | GaugeControllerError::AllocationExceeded => Precondition,
                GaugeControllerError::UnknownType | GaugeControllerError::GaugeNotAdded => NotFound,
                GaugeControllerError::Overflow => Fatal,
            },
            EngineError::Minter(err) => match err {
                MinterError::InvalidSchedule => Validation,
                MinterError::NoStake => Precondition,
                MinterError::GaugeNotAdded => NotFound,
                MinterError::Overflow => Fatal,
                MinterError::Payout(err) => vesting_kind(err),
                MinterError::Weight(err) => EngineError::Controller(err.clone()).kind(),
            },
            EngineError::Vesting(err) => vesting_kind(err),
            EngineError::Ledger(err) => match err {
                LedgerError::NotAuthorizedMinter => Authorization,
                LedgerError::InsufficientAllowance { .. }
                | LedgerError::InsufficientBalance { .. } => Precondition,
                LedgerError::Overflow => Fatal,
            },
            EngineError::InsufficientStake { .. } => Precondition,
            EngineError::ClockRegression { .. } | EngineError::Snapshot(_) => Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

fn vesting_kind(err: &VestingError) -> ErrorKind {
    match err {
        VestingError::InvalidDuration | VestingError::InvalidAmount => ErrorKind::Validation,
        VestingError::Overflow => ErrorKind::Fatal,
        VestingError::Escrow(inner) => EngineError::Escrow(inner.clone()).kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err: EngineError = VotingEscrowError::InvalidDuration.into();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err: EngineError = GaugeControllerError::Unauthorized.into();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let err: EngineError = GaugeControllerError::VoteTooSoon.into();
        assert_eq!(err.kind(), ErrorKind::Precondition);

        let err: EngineError = MinterError::GaugeNotAdded.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = EngineError::ClockRegression { last: 10, now: 5 };
        assert!(err.is_fatal());
    }

    #[test]
    fn test_nested_payout_error_kind() {
        let err: EngineError =
            MinterError::Payout(VestingError::Escrow(VotingEscrowError::CorruptHistory)).into();
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_clock_regression_message() {
        let err = EngineError::ClockRegression { last: 10, now: 5 };
        assert_eq!(err.to_string(), "Clock went backwards: last 10, now 5");
    }

    #[test]
    fn test_ledger_error_wrapped() {
        let err: EngineError = LedgerError::NotAuthorizedMinter.into();
        assert!(err.to_string().starts_with("Token ledger:"));
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let err: EngineError = LedgerError::Overflow.into();
        assert!(err.is_fatal());
    }
}
