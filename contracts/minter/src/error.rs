use gauge_controller::GaugeControllerError;
use thiserror::Error;
use vesting::VestingError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MinterError {
    #[error("Gauge is not added")]
    GaugeNotAdded,

    #[error("No stake in gauge")]
    NoStake,

    #[error("Invalid emission schedule: epoch duration must be positive and reduction below 1")]
    InvalidSchedule,

    #[error("Arithmetic overflow")]
    Overflow,

    #[error(transparent)]
    Payout(#[from] VestingError),

    #[error(transparent)]
    Weight(#[from] GaugeControllerError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use voting_escrow::VotingEscrowError;

    #[test]
    fn test_payout_error_is_transparent() {
        let err: MinterError = VestingError::Escrow(VotingEscrowError::Overflow).into();
        assert_eq!(err.to_string(), "Compound failed: Arithmetic overflow");
    }

    #[test]
    fn test_weight_error_is_transparent() {
        let err: MinterError = GaugeControllerError::Overflow.into();
        assert_eq!(err.to_string(), GaugeControllerError::Overflow.to_string());
    }
}
