use thiserror::Error;
use voting_escrow::VotingEscrowError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VestingError {
    #[error("Invalid vesting duration: must be greater than 0")]
    InvalidDuration,

    #[error("Invalid amount: must be greater than 0")]
    InvalidAmount,

    #[error("Arithmetic overflow")]
    Overflow,

    #[error("Compound failed: {0}")]
    Escrow(#[from] VotingEscrowError),
}
