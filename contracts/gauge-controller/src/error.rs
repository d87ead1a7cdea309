use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GaugeControllerError {
    #[error("Unauthorized: admin only")]
    Unauthorized,

    #[error("Unknown gauge type")]
    UnknownType,

    #[error("Cannot add the same gauge twice")]
    DuplicateGauge,

    #[error("Gauge not added")]
    GaugeNotAdded,

    #[error("Invalid vote power: must be between 0 and 10000 bps")]
    InvalidPower,

    #[error("Your token lock expires too soon")]
    LockExpiresTooSoon,

    #[error("Cannot vote so often")]
    VoteTooSoon,

    #[error("Used too much power")]
    AllocationExceeded,

    #[error("Arithmetic overflow")]
    Overflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_expires_message() {
        assert_eq!(
            GaugeControllerError::LockExpiresTooSoon.to_string(),
            "Your token lock expires too soon"
        );
    }

    #[test]
    fn test_invalid_power_message() {
        let err = GaugeControllerError::InvalidPower;
        assert!(err.to_string().contains("10000 bps"));
    }
}
