use serde::{Deserialize, Serialize};
use tracing::info;
use voting_escrow::require;

use crate::error::MinterError;
use crate::state::MinterEvent;

/// Global emission rate, constant within an epoch and reduced by
/// `reduction_numerator / reduction_denominator` at every epoch boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionSchedule {
    initial_rate: u128, // tokens per second
    rate: u128,
    mining_epoch: Option<u64>,
    start_epoch_time: u64,
    epoch_duration: u64,
    reduction_numerator: u128,
    reduction_denominator: u128,
    /// `(epoch start, rate)`, one entry per epoch entered
    rate_history: Vec<(u64, u128)>,
}

impl EmissionSchedule {
    pub fn new(
        initial_rate: u128,
        epoch_duration: u64,
        reduction_numerator: u128,
        reduction_denominator: u128,
    ) -> Result<Self, MinterError> {
        require!(epoch_duration > 0, MinterError::InvalidSchedule);
        require!(
            reduction_numerator < reduction_denominator,
            MinterError::InvalidSchedule
        );

        Ok(Self {
            initial_rate,
            rate: 0,
            mining_epoch: None,
            start_epoch_time: 0,
            epoch_duration,
            reduction_numerator,
            reduction_denominator,
            rate_history: Vec::new(),
        })
    }

    /// Start emission on the first call, then reduce the rate once per
    /// elapsed epoch. Returns the number of epochs entered.
    pub fn update_mining_parameters(&mut self, now: u64, events: &mut Vec<MinterEvent>) -> u64 {
        let Some(mut epoch) = self.mining_epoch else {
            self.rate = self.initial_rate;
            self.start_epoch_time = now;
            self.mining_epoch = Some(0);
            self.rate_history.push((now, self.rate));

            info!("Emission started at {} with rate {}", now, self.rate);
            events.push(MinterEvent::MiningParametersUpdated {
                time: now,
                rate: self.rate,
                epoch: 0,
            });
            return 1;
        };

        let mut entered = 0;
        while now >= self.start_epoch_time.saturating_add(self.epoch_duration) {
            self.start_epoch_time += self.epoch_duration;
            self.rate = self.reduce(self.rate);
            epoch += 1;
            entered += 1;
            self.rate_history.push((self.start_epoch_time, self.rate));

            info!("Mining epoch {} started with rate {}", epoch, self.rate);
            events.push(MinterEvent::MiningParametersUpdated {
                time: self.start_epoch_time,
                rate: self.rate,
                epoch,
            });
        }
        self.mining_epoch = Some(epoch);

        entered
    }

    /// Emission rate at `t`. Zero before emission started; epochs not yet
    /// entered are extrapolated.
    pub fn rate_at(&self, t: u64) -> u128 {
        let idx = self.rate_history.partition_point(|(start, _)| *start <= t);
        if idx == 0 {
            return 0;
        }

        let (start, mut rate) = self.rate_history[idx - 1];
        let mut epochs = (t - start) / self.epoch_duration;
        while epochs > 0 && rate > 0 {
            rate = self.reduce(rate);
            epochs -= 1;
        }
        rate
    }

    /// First rate change strictly after `t`
    pub fn next_rate_change(&self, t: u64) -> Option<u64> {
        let (first, _) = *self.rate_history.first()?;
        if t < first {
            return Some(first);
        }
        let epochs = (t - first) / self.epoch_duration + 1;
        Some(first + epochs * self.epoch_duration)
    }

    pub fn rate(&self) -> u128 {
        self.rate
    }

    pub fn initial_rate(&self) -> u128 {
        self.initial_rate
    }

    pub fn mining_epoch(&self) -> Option<u64> {
        self.mining_epoch
    }

    pub fn start_epoch_time(&self) -> u64 {
        self.start_epoch_time
    }

    pub fn epoch_duration(&self) -> u64 {
        self.epoch_duration
    }

    pub fn rate_history(&self) -> &[(u64, u128)] {
        &self.rate_history
    }

    fn reduce(&self, rate: u128) -> u128 {
        // Divide first only when the product overflows
        rate.checked_mul(self.reduction_numerator)
            .map(|scaled| scaled / self.reduction_denominator)
            .unwrap_or(rate / self.reduction_denominator * self.reduction_numerator)
    }
}
