//! Tax-aware withdrawal sequencing.
//!
//! The required distribution comes out first. The rest of the need is drawn
//! cash, then capital gains, then tax-deferred, then tax-free. Taxes depend on
//! the mix that is drawn and the draw has to cover the taxes, so the gross
//! amount is found by fixed-point iteration.

use super::tax::{TaxContext, TaxableIncome, household_tax};
use super::types::{AssetBuckets, Bucket, TaxBreakdown, WITHDRAWAL_ORDER};

const MAX_ITERATIONS: u32 = 50;
const TOLERANCE: f64 = 0.005;
/// Rounding slack allowed when flooring balances after a draw.
const BALANCE_EPS: f64 = 1e-6;

#[derive(Copy, Clone, Debug)]
pub struct WithdrawalRequest<'a> {
    pub expenses: f64,
    pub guaranteed_income: f64,
    pub base_income: TaxableIncome,
    pub rmd: f64,
    pub balances: AssetBuckets,
    pub capital_gains_basis: f64,
    pub tax: TaxContext<'a>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
struct Draw {
    withdrawals: AssetBuckets,
    reinvested: f64,
    realized_gains: f64,
    basis_used: f64,
    shortfall: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct WithdrawalPlan {
    pub rmd: f64,
    pub withdrawals: AssetBuckets,
    /// RMD in excess of the need, put back into the capital-gains bucket.
    pub reinvested: f64,
    pub realized_gains: f64,
    pub basis_used: f64,
    pub taxes: TaxBreakdown,
    pub unmet_need: f64,
    pub iterations: u32,
}

impl WithdrawalPlan {
    pub fn total(&self) -> f64 {
        self.withdrawals.total()
    }

    pub fn net_withdrawal(&self) -> f64 {
        self.total() - self.reinvested
    }
}

/// Takes `amount` of spendable cash from the buckets. The RMD is always
/// taken in full; whatever of it is not needed is reinvested.
fn draw_in_order(amount: f64, rmd: f64, balances: &AssetBuckets, basis: f64) -> Draw {
    let mut withdrawals = AssetBuckets::default();
    let mut remaining = amount.max(0.0);

    let rmd = rmd.clamp(0.0, balances.tax_deferred);
    withdrawals.tax_deferred = rmd;
    let rmd_used = rmd.min(remaining);
    remaining -= rmd_used;
    let reinvested = rmd - rmd_used;

    for bucket in WITHDRAWAL_ORDER {
        if remaining <= 0.0 {
            break;
        }
        let available = (balances.get(bucket) - withdrawals.get(bucket)).max(0.0);
        let take = remaining.min(available);
        *withdrawals.get_mut(bucket) += take;
        remaining -= take;
    }

    let (realized_gains, basis_used) = if balances.capital_gains > 0.0 {
        let basis_share = (basis / balances.capital_gains).clamp(0.0, 1.0);
        let sold = withdrawals.capital_gains;
        (sold * (1.0 - basis_share), sold * basis_share)
    } else {
        (0.0, 0.0)
    };

    Draw {
        withdrawals,
        reinvested,
        realized_gains,
        basis_used,
        shortfall: remaining.max(0.0),
    }
}

fn taxes_for(req: &WithdrawalRequest<'_>, draw: &Draw) -> TaxBreakdown {
    let income = TaxableIncome {
        ordinary: req.base_income.ordinary + draw.withdrawals.tax_deferred,
        social_security: req.base_income.social_security,
        capital_gains: req.base_income.capital_gains + draw.realized_gains,
        retirement_income: req.base_income.retirement_income + draw.withdrawals.tax_deferred,
    };
    household_tax(&income, &req.tax)
}

/// Works out what to draw from each bucket so the household can pay its
/// expenses and all of the year's taxes.
pub fn plan_withdrawals(req: &WithdrawalRequest<'_>) -> WithdrawalPlan {
    let mut gross = (req.expenses - req.guaranteed_income).max(0.0);
    let mut iterations = 0;
    let (draw, taxes) = loop {
        let draw = draw_in_order(gross, req.rmd, &req.balances, req.capital_gains_basis);
        let taxes = taxes_for(req, &draw);
        iterations += 1;

        let target = (req.expenses + taxes.total() - req.guaranteed_income).max(0.0);
        if (target - gross).abs() <= TOLERANCE || iterations >= MAX_ITERATIONS {
            break (draw, taxes);
        }
        gross = target;
    };

    WithdrawalPlan {
        rmd: req.rmd.clamp(0.0, req.balances.tax_deferred),
        withdrawals: draw.withdrawals,
        reinvested: draw.reinvested,
        realized_gains: draw.realized_gains,
        basis_used: draw.basis_used,
        taxes,
        unmet_need: draw.shortfall,
        iterations,
    }
}

pub fn apply_plan(balances: &mut AssetBuckets, basis: &mut f64, plan: &WithdrawalPlan) {
    for bucket in WITHDRAWAL_ORDER {
        let value = balances.get_mut(bucket);
        *value -= plan.withdrawals.get(bucket);
        if *value < 0.0 && *value > -BALANCE_EPS {
            *value = 0.0;
        }
    }
    *basis -= plan.basis_used;
    *basis += plan.reinvested;
    *balances.get_mut(Bucket::CapitalGains) += plan.reinvested;
    *basis = basis.clamp(0.0, balances.capital_gains.max(0.0));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FilingStatus, TaxSetting};

    fn flat(rate: f64) -> TaxSetting {
        TaxSetting::Flat { rate }
    }

    fn request(setting: &TaxSetting, expenses: f64, balances: AssetBuckets) -> WithdrawalRequest<'_> {
        WithdrawalRequest {
            expenses,
            guaranteed_income: 0.0,
            base_income: TaxableIncome::default(),
            rmd: 0.0,
            balances,
            capital_gains_basis: balances.capital_gains,
            tax: TaxContext {
                setting,
                filing_status: FilingStatus::Single,
                senior_filers: 0,
                retired: true,
                price_index: 1.0,
            },
        }
    }

    fn buckets(cash: f64, gains: f64, deferred: f64, free: f64) -> AssetBuckets {
        AssetBuckets {
            tax_deferred: deferred,
            tax_free: free,
            capital_gains: gains,
            cash_equivalents: cash,
        }
    }

    #[test]
    fn draws_cash_then_gains_then_deferred_then_free() {
        let setting = flat(0.0);
        let req = request(&setting, 35_000.0, buckets(10_000.0, 10_000.0, 10_000.0, 10_000.0));
        let plan = plan_withdrawals(&req);
        assert_eq!(plan.withdrawals.cash_equivalents, 10_000.0);
        assert_eq!(plan.withdrawals.capital_gains, 10_000.0);
        assert_eq!(plan.withdrawals.tax_deferred, 10_000.0);
        assert_eq!(plan.withdrawals.tax_free, 5_000.0);
        assert_eq!(plan.unmet_need, 0.0);
    }

    #[test]
    fn excess_rmd_is_reinvested_with_basis() {
        let setting = flat(0.0);
        let mut req = request(&setting, 0.0, buckets(0.0, 0.0, 100_000.0, 0.0));
        req.rmd = 10_000.0;
        let plan = plan_withdrawals(&req);
        assert_eq!(plan.withdrawals.tax_deferred, 10_000.0);
        assert_eq!(plan.reinvested, 10_000.0);
        assert_eq!(plan.net_withdrawal(), 0.0);

        let mut balances = req.balances;
        let mut basis = 0.0;
        apply_plan(&mut balances, &mut basis, &plan);
        assert_eq!(balances.tax_deferred, 90_000.0);
        assert_eq!(balances.capital_gains, 10_000.0);
        assert_eq!(basis, 10_000.0);
        assert_eq!(balances.total(), 100_000.0);
    }

    #[test]
    fn rmd_counts_toward_the_need() {
        let setting = flat(0.0);
        let mut req = request(&setting, 30_000.0, buckets(5_000.0, 0.0, 100_000.0, 0.0));
        req.rmd = 10_000.0;
        let plan = plan_withdrawals(&req);
        assert_eq!(plan.withdrawals.cash_equivalents, 5_000.0);
        assert_eq!(plan.withdrawals.tax_deferred, 25_000.0);
        assert_eq!(plan.reinvested, 0.0);
    }

    #[test]
    fn gross_up_covers_tax_on_the_withdrawal() {
        let setting = flat(0.25);
        let req = request(&setting, 30_000.0, buckets(0.0, 0.0, 1_000_000.0, 0.0));
        let plan = plan_withdrawals(&req);
        assert!((plan.withdrawals.tax_deferred - 40_000.0).abs() < 0.01);
        assert!((plan.taxes.total() - 10_000.0).abs() < 0.01);
        assert_eq!(plan.unmet_need, 0.0);
    }

    #[test]
    fn tax_free_draws_need_no_gross_up() {
        let setting = flat(0.25);
        let req = request(&setting, 30_000.0, buckets(0.0, 0.0, 0.0, 100_000.0));
        let plan = plan_withdrawals(&req);
        assert_eq!(plan.withdrawals.tax_free, 30_000.0);
        assert_eq!(plan.taxes.total(), 0.0);
    }

    #[test]
    fn realized_gain_is_the_share_above_basis() {
        let setting = flat(0.0);
        let mut req = request(&setting, 20_000.0, buckets(0.0, 100_000.0, 0.0, 0.0));
        req.capital_gains_basis = 50_000.0;
        let plan = plan_withdrawals(&req);
        assert!((plan.realized_gains - 10_000.0).abs() < 1e-9);
        assert!((plan.basis_used - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn shortfall_is_reported_as_unmet_need() {
        let setting = flat(0.0);
        let req = request(&setting, 50_000.0, buckets(10_000.0, 0.0, 0.0, 0.0));
        let plan = plan_withdrawals(&req);
        assert_eq!(plan.withdrawals.cash_equivalents, 10_000.0);
        assert!((plan.unmet_need - 40_000.0).abs() < 1e-9);

        let mut balances = req.balances;
        let mut basis = 0.0;
        apply_plan(&mut balances, &mut basis, &plan);
        assert_eq!(balances.total(), 0.0);
    }

    #[test]
    fn surplus_income_pays_the_tax_bill() {
        let setting = flat(0.1);
        let mut req = request(&setting, 40_000.0, AssetBuckets::default());
        req.guaranteed_income = 60_000.0;
        req.base_income.ordinary = 60_000.0;
        let plan = plan_withdrawals(&req);
        assert_eq!(plan.total(), 0.0);
        assert_eq!(plan.unmet_need, 0.0);
        assert!((plan.taxes.total() - 6_000.0).abs() < 1e-9);
    }
}
