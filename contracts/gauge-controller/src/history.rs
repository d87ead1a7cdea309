use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use voting_escrow::{round_to_week, WEEK};

use crate::state::WeightPoint;

/// Week-indexed weight points with scheduled slope decreases.
///
/// Points are stored for every week from the first one written up to
/// `last`, which is always the week boundary after the latest fill.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightHistory {
    points: BTreeMap<u64, WeightPoint>,
    changes: BTreeMap<u64, u128>,
    last: u64,
}

impl WeightHistory {
    pub fn point(&self, t: u64) -> WeightPoint {
        self.points.get(&t).copied().unwrap_or_default()
    }

    pub fn point_mut(&mut self, t: u64) -> &mut WeightPoint {
        self.points.entry(t).or_default()
    }

    pub fn change(&self, t: u64) -> u128 {
        self.changes.get(&t).copied().unwrap_or(0)
    }

    pub fn change_mut(&mut self, t: u64) -> &mut u128 {
        self.changes.entry(t).or_insert(0)
    }

    pub fn last(&self) -> u64 {
        self.last
    }

    pub fn set_last(&mut self, t: u64) {
        self.last = t;
    }

    /// Fill missing weeks up to the boundary after `now` and return the
    /// bias there.
    pub fn fill(&mut self, now: u64) -> u128 {
        let mut t = self.last;
        if t == 0 {
            return 0;
        }

        let mut pt = self.point(t);
        while t <= now {
            t += WEEK;
            pt = decay(pt, self.change(t));
            self.points.insert(t, pt);
            if t > now {
                self.last = t;
            }
        }
        pt.bias
    }

    /// Bias at the week containing `t`, carrying the last stored point
    /// forward without writing.
    pub fn bias_at(&self, t: u64) -> u128 {
        let t = round_to_week(t);
        if self.last == 0 {
            return 0;
        }
        if t <= self.last {
            return self.point(t).bias;
        }

        let mut t_i = self.last;
        let mut pt = self.point(t_i);
        while t_i < t && pt != WeightPoint::default() {
            t_i += WEEK;
            pt = decay(pt, self.change(t_i));
        }
        pt.bias
    }
}

fn decay(pt: WeightPoint, d_slope: u128) -> WeightPoint {
    let d_bias = pt.slope.saturating_mul(WEEK as u128);
    if pt.bias > d_bias {
        WeightPoint {
            bias: pt.bias - d_bias,
            slope: pt.slope.saturating_sub(d_slope),
        }
    } else {
        WeightPoint::default()
    }
}

/// Week-indexed type weight. Constant between changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeWeightHistory {
    points: BTreeMap<u64, u128>,
    last: u64,
}

impl TypeWeightHistory {
    pub fn set(&mut self, t: u64, weight: u128) {
        self.points.insert(t, weight);
        self.last = t;
    }

    /// Fill missing weeks up to the boundary after `now` and return the
    /// weight there.
    pub fn fill(&mut self, now: u64) -> u128 {
        let mut t = self.last;
        if t == 0 {
            return 0;
        }

        let weight = self.points.get(&t).copied().unwrap_or(0);
        while t <= now {
            t += WEEK;
            self.points.insert(t, weight);
            if t > now {
                self.last = t;
            }
        }
        weight
    }

    pub fn weight_at(&self, t: u64) -> u128 {
        let t = round_to_week(t);
        if self.last == 0 {
            return 0;
        }
        let t = t.min(self.last);
        self.points.get(&t).copied().unwrap_or(0)
    }
}
