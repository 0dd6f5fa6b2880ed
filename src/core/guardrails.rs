//! Guyton-Klinger spending guardrails.

use super::types::{GuardrailAdjustment, GuardrailConfig};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GuardrailEvent {
    pub year_index: u32,
    pub adjustment: GuardrailAdjustment,
}

/// Per-trial spending state. Spending is nominal.
#[derive(Clone, Debug, Default)]
pub struct GuardrailState {
    initial_rate: Option<f64>,
    spending: Option<f64>,
    history: Vec<GuardrailEvent>,
}

impl GuardrailState {
    pub fn initial_rate(&self) -> Option<f64> {
        self.initial_rate
    }

    pub fn history(&self) -> &[GuardrailEvent] {
        &self.history
    }

    /// Permanent change to the spending base, e.g. after the first death.
    pub fn scale_spending(&mut self, factor: f64) {
        if let Some(spending) = self.spending.as_mut() {
            *spending *= factor;
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct GuardrailYear {
    pub year_index: u32,
    pub opening_spending: f64,
    pub inflation: f64,
    pub prior_return: Option<f64>,
    pub other_expenses: f64,
    pub guaranteed_income: f64,
    pub portfolio_value: f64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GuardrailDecision {
    pub spending: f64,
    pub adjustment: Option<GuardrailAdjustment>,
    pub inflation_skipped: bool,
    pub withdrawal_rate: f64,
}

fn planned_rate(spending: f64, year: &GuardrailYear) -> f64 {
    if year.portfolio_value <= 0.0 {
        return 0.0;
    }
    let need = (spending + year.other_expenses - year.guaranteed_income).max(0.0);
    need / year.portfolio_value
}

#[derive(Copy, Clone, Debug)]
pub struct GuardrailPolicy {
    config: GuardrailConfig,
}

impl GuardrailPolicy {
    pub fn new(config: GuardrailConfig) -> Self {
        Self { config }
    }

    /// Fixes this year's spending. Call once per retired year, after the
    /// year's return has been applied and before withdrawals.
    pub fn evaluate(&self, state: &mut GuardrailState, year: &GuardrailYear) -> GuardrailDecision {
        let cfg = self.config;
        let (mut spending, inflation_skipped) = match state.spending {
            None => (year.opening_spending, false),
            Some(prev) => {
                let skip = cfg.enabled && year.prior_return.is_some_and(|r| r < 0.0);
                if skip {
                    (prev, true)
                } else {
                    (prev * (1.0 + year.inflation), false)
                }
            }
        };

        let mut adjustment = None;
        if cfg.enabled && year.portfolio_value > 0.0 {
            if let Some(initial) = state.initial_rate {
                let rate = planned_rate(spending, year);
                if rate > cfg.upper_threshold * initial {
                    spending *= 1.0 - cfg.cut;
                    adjustment = Some(GuardrailAdjustment::CapitalPreservation);
                } else if rate < cfg.lower_threshold * initial {
                    spending *= 1.0 + cfg.raise;
                    adjustment = Some(GuardrailAdjustment::Prosperity);
                }
            }
        }

        let withdrawal_rate = planned_rate(spending, year);
        if state.initial_rate.is_none() && withdrawal_rate > 0.0 && withdrawal_rate.is_finite() {
            state.initial_rate = Some(withdrawal_rate);
        }
        state.spending = Some(spending);
        if let Some(adjustment) = adjustment {
            state.history.push(GuardrailEvent {
                year_index: year.year_index,
                adjustment,
            });
        }

        GuardrailDecision {
            spending,
            adjustment,
            inflation_skipped,
            withdrawal_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn year(index: u32, portfolio: f64) -> GuardrailYear {
        GuardrailYear {
            year_index: index,
            opening_spending: 40_000.0,
            inflation: 0.03,
            prior_return: Some(0.05),
            other_expenses: 0.0,
            guaranteed_income: 0.0,
            portfolio_value: portfolio,
        }
    }

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn first_year_sets_initial_rate_without_adjusting() {
        let policy = GuardrailPolicy::new(GuardrailConfig::default());
        let mut state = GuardrailState::default();
        let d = policy.evaluate(&mut state, &year(0, 1_000_000.0));
        assert_eq!(d.adjustment, None);
        assert_approx(d.spending, 40_000.0);
        assert_approx(state.initial_rate().unwrap_or_default(), 0.04);
    }

    #[test]
    fn falling_portfolio_triggers_capital_preservation() {
        let policy = GuardrailPolicy::new(GuardrailConfig::default());
        let mut state = GuardrailState::default();
        policy.evaluate(&mut state, &year(0, 1_000_000.0));
        let d = policy.evaluate(&mut state, &year(1, 700_000.0));
        assert_eq!(d.adjustment, Some(GuardrailAdjustment::CapitalPreservation));
        assert_approx(d.spending, 40_000.0 * 1.03 * 0.9);
        assert_eq!(state.history().len(), 1);
    }

    #[test]
    fn rising_portfolio_triggers_prosperity() {
        let policy = GuardrailPolicy::new(GuardrailConfig::default());
        let mut state = GuardrailState::default();
        policy.evaluate(&mut state, &year(0, 1_000_000.0));
        let d = policy.evaluate(&mut state, &year(1, 1_500_000.0));
        assert_eq!(d.adjustment, Some(GuardrailAdjustment::Prosperity));
        assert_approx(d.spending, 40_000.0 * 1.03 * 1.1);
    }

    #[test]
    fn capital_preservation_wins_when_both_rules_hold() {
        let config = GuardrailConfig {
            upper_threshold: 0.5,
            lower_threshold: 2.0,
            ..GuardrailConfig::default()
        };
        let policy = GuardrailPolicy::new(config);
        let mut state = GuardrailState::default();
        policy.evaluate(&mut state, &year(0, 1_000_000.0));
        let d = policy.evaluate(&mut state, &year(1, 1_000_000.0));
        assert_eq!(d.adjustment, Some(GuardrailAdjustment::CapitalPreservation));
        assert_approx(d.spending, 40_000.0 * 1.03 * 0.9);
    }

    #[test]
    fn negative_prior_return_skips_inflation() {
        let policy = GuardrailPolicy::new(GuardrailConfig::default());
        let mut state = GuardrailState::default();
        policy.evaluate(&mut state, &year(0, 1_000_000.0));
        let mut y = year(1, 1_000_000.0);
        y.prior_return = Some(-0.10);
        let d = policy.evaluate(&mut state, &y);
        assert!(d.inflation_skipped);
        assert_eq!(d.adjustment, None);
        assert_approx(d.spending, 40_000.0);
    }

    #[test]
    fn disabled_policy_is_flat_inflation_adjusted() {
        let config = GuardrailConfig {
            enabled: false,
            ..GuardrailConfig::default()
        };
        let policy = GuardrailPolicy::new(config);
        let mut state = GuardrailState::default();
        policy.evaluate(&mut state, &year(0, 1_000_000.0));
        let mut y = year(1, 300_000.0);
        y.prior_return = Some(-0.5);
        let d = policy.evaluate(&mut state, &y);
        assert_eq!(d.adjustment, None);
        assert!(!d.inflation_skipped);
        assert_approx(d.spending, 41_200.0);
    }

    #[test]
    fn no_adjustment_until_positive_rate_exists() {
        let policy = GuardrailPolicy::new(GuardrailConfig::default());
        let mut state = GuardrailState::default();
        let mut y = year(0, 1_000_000.0);
        y.guaranteed_income = 100_000.0;
        policy.evaluate(&mut state, &y);
        assert_eq!(state.initial_rate(), None);
        y.year_index = 1;
        y.portfolio_value = 10.0;
        let d = policy.evaluate(&mut state, &y);
        assert_eq!(d.adjustment, None);
    }

    #[test]
    fn survivor_scaling_carries_forward() {
        let policy = GuardrailPolicy::new(GuardrailConfig {
            enabled: false,
            ..GuardrailConfig::default()
        });
        let mut state = GuardrailState::default();
        policy.evaluate(&mut state, &year(0, 1_000_000.0));
        state.scale_spending(0.5);
        let d = policy.evaluate(&mut state, &year(1, 1_000_000.0));
        assert_approx(d.spending, 20_000.0 * 1.03);
    }
}
