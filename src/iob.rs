//! Insulin-on-board ledger: a decaying record of administered doses still
//! acting on the body.
//!
//! Two views exist over the same ledger. [`IobTracker::iob`] reports the
//! insulin still active in units and is what the decision engine subtracts
//! to avoid dose stacking. [`IobTracker::current_effect`] estimates the
//! glucose impact (mg/dL) attributable to one sampling interval and drives
//! the simulated body model.

/// One administered dose, owned exclusively by the tracker's ledger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveDose {
    pub amount_u: f64,
    pub start_time_s: u64,
}

#[derive(Debug)]
pub struct IobTracker {
    ledger: Vec<ActiveDose>,
    insulin_sensitivity_factor: f64,
    action_duration_s: u64,
    /// Per-call floor on the summed glucose effect, so overlapping doses
    /// cannot compound into an unrealistic single-step crash.
    max_effect_per_interval_mgdl: f64,
}

impl IobTracker {
    pub fn new(
        insulin_sensitivity_factor: f64,
        action_duration_s: u64,
        max_effect_per_interval_mgdl: f64,
    ) -> Self {
        debug_assert!(action_duration_s > 0, "insulin action duration must be non-zero");
        Self {
            ledger: Vec::new(),
            insulin_sensitivity_factor,
            action_duration_s,
            max_effect_per_interval_mgdl,
        }
    }

    pub fn record(&mut self, dose: ActiveDose) {
        self.ledger.push(dose);
    }

    pub fn active_doses(&self) -> usize {
        self.ledger.len()
    }

    /// Total insulin still active (U): `Σ amount * (1 - elapsed/D)` over
    /// doses with `elapsed < D`. Decays monotonically to zero.
    pub fn iob(&self, now_s: u64) -> f64 {
        let duration = self.action_duration_s as f64;
        self.ledger
            .iter()
            .filter_map(|dose| {
                let elapsed = now_s.saturating_sub(dose.start_time_s) as f64;
                if elapsed < duration {
                    Some(dose.amount_u * (1.0 - elapsed / duration))
                } else {
                    None
                }
            })
            .sum()
    }

    /// Glucose reduction (mg/dL, <= 0) attributable to the sampling interval
    /// ending at `now_s`. Each active dose contributes
    /// `amount * ISF * interval/D`; expired doses are evicted as a side
    /// effect, and the total is clamped to the configured floor.
    pub fn current_effect(&mut self, now_s: u64, interval_s: u64) -> f64 {
        let duration = self.action_duration_s;
        self.ledger
            .retain(|dose| now_s.saturating_sub(dose.start_time_s) < duration);

        let fraction = interval_s as f64 / duration as f64;
        let reduction: f64 = self
            .ledger
            .iter()
            .map(|dose| dose.amount_u * self.insulin_sensitivity_factor * fraction)
            .sum();

        -reduction.min(self.max_effect_per_interval_mgdl)
    }
}
