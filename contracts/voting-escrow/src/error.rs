use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VotingEscrowError {
    #[error("Invalid amount: must be greater than 0")]
    InvalidAmount,

    #[error("Invalid lock duration: must be between 7 days and 4 years")]
    InvalidDuration,

    #[error("Withdraw old tokens first")]
    LockAlreadyExists,

    #[error("No existing lock found")]
    NoExistingLock,

    #[error("Cannot add to expired lock. Withdraw")]
    LockExpired,

    #[error("The lock didn't expire")]
    LockNotExpired,

    #[error("Can only increase lock duration")]
    CanOnlyIncreaseDuration,

    #[error("Arithmetic overflow")]
    Overflow,

    #[error("Point history is out of order")]
    CorruptHistory,
}
