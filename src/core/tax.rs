//! 2024 US tax tables and the per-year household tax computation.
//!
//! Every table is expressed in today's dollars. Callers in later years pass a
//! price index and the thresholds move with it.

use super::types::{FilingStatus, TaxBreakdown, TaxSetting};

const TOP: f64 = f64::INFINITY;

static FEDERAL_SINGLE: [(f64, f64); 7] = [
    (11_600.0, 0.10),
    (47_150.0, 0.12),
    (100_525.0, 0.22),
    (191_950.0, 0.24),
    (243_725.0, 0.32),
    (609_350.0, 0.35),
    (TOP, 0.37),
];

static FEDERAL_JOINT: [(f64, f64); 7] = [
    (23_200.0, 0.10),
    (94_300.0, 0.12),
    (201_050.0, 0.22),
    (383_900.0, 0.24),
    (487_450.0, 0.32),
    (731_200.0, 0.35),
    (TOP, 0.37),
];

static FEDERAL_SEPARATE: [(f64, f64); 7] = [
    (11_600.0, 0.10),
    (47_150.0, 0.12),
    (100_525.0, 0.22),
    (191_950.0, 0.24),
    (243_725.0, 0.32),
    (365_600.0, 0.35),
    (TOP, 0.37),
];

static FEDERAL_HEAD: [(f64, f64); 7] = [
    (16_550.0, 0.10),
    (63_100.0, 0.12),
    (100_500.0, 0.22),
    (191_950.0, 0.24),
    (243_700.0, 0.32),
    (609_350.0, 0.35),
    (TOP, 0.37),
];

const NIIT_RATE: f64 = 0.038;

const IRMAA_MONTHLY: [(f64, f64); 6] = [
    (0.0, 0.0),
    (69.90, 12.90),
    (174.70, 33.30),
    (279.50, 53.80),
    (384.30, 74.20),
    (419.30, 81.00),
];

fn federal_brackets(filing: FilingStatus) -> &'static [(f64, f64)] {
    match filing {
        FilingStatus::Single => &FEDERAL_SINGLE,
        FilingStatus::MarriedFilingJointly => &FEDERAL_JOINT,
        FilingStatus::MarriedFilingSeparately => &FEDERAL_SEPARATE,
        FilingStatus::HeadOfHousehold => &FEDERAL_HEAD,
    }
}

pub fn standard_deduction(filing: FilingStatus, senior_filers: u32) -> f64 {
    let (base, senior_addition) = match filing {
        FilingStatus::Single => (14_600.0, 1_950.0),
        FilingStatus::MarriedFilingJointly => (29_200.0, 1_550.0),
        FilingStatus::MarriedFilingSeparately => (14_600.0, 1_550.0),
        FilingStatus::HeadOfHousehold => (21_900.0, 1_950.0),
    };
    let max_seniors = if filing.is_joint() { 2 } else { 1 };
    base + senior_addition * senior_filers.min(max_seniors) as f64
}

fn progressive(income: f64, brackets: &[(f64, f64)], scale: f64) -> f64 {
    if income <= 0.0 {
        return 0.0;
    }
    let mut tax = 0.0;
    let mut lower = 0.0;
    for &(upper, rate) in brackets {
        let upper = upper * scale;
        if income <= upper {
            return tax + (income - lower) * rate;
        }
        tax += (upper - lower) * rate;
        lower = upper;
    }
    tax
}

pub fn federal_tax(income: f64, filing: FilingStatus, senior_filers: u32) -> f64 {
    let taxable = income - standard_deduction(filing, senior_filers);
    progressive(taxable, federal_brackets(filing), 1.0)
}

#[derive(Copy, Clone, Debug)]
enum StateSchedule {
    Flat(f64),
    Brackets(&'static [(f64, f64)]),
}

#[derive(Copy, Clone, Debug)]
enum RetirementExclusion {
    None,
    Full,
    /// Per filer, in today's dollars.
    Capped(f64),
}

#[derive(Copy, Clone, Debug)]
struct StateRule {
    code: &'static str,
    schedule: StateSchedule,
    deduction: f64,
    exclusion: RetirementExclusion,
}

static CA_BRACKETS: [(f64, f64); 9] = [
    (10_756.0, 0.01),
    (25_499.0, 0.02),
    (40_245.0, 0.04),
    (55_866.0, 0.06),
    (70_606.0, 0.08),
    (360_659.0, 0.093),
    (432_787.0, 0.103),
    (721_314.0, 0.113),
    (TOP, 0.123),
];

static NY_BRACKETS: [(f64, f64); 9] = [
    (8_500.0, 0.04),
    (11_700.0, 0.045),
    (13_900.0, 0.0525),
    (80_650.0, 0.055),
    (215_400.0, 0.06),
    (1_077_550.0, 0.0685),
    (5_000_000.0, 0.0965),
    (25_000_000.0, 0.103),
    (TOP, 0.109),
];

const fn flat(code: &'static str, rate: f64, exclusion: RetirementExclusion) -> StateRule {
    StateRule {
        code,
        schedule: StateSchedule::Flat(rate),
        deduction: 0.0,
        exclusion,
    }
}

static NO_INCOME_TAX: [&str; 9] = ["AK", "FL", "NV", "NH", "SD", "TN", "TX", "WA", "WY"];

static STATE_RULES: [StateRule; 14] = [
    flat("IL", 0.0495, RetirementExclusion::Full),
    flat("PA", 0.0307, RetirementExclusion::Full),
    flat("MS", 0.047, RetirementExclusion::Full),
    flat("GA", 0.0539, RetirementExclusion::Capped(65_000.0)),
    flat("CO", 0.044, RetirementExclusion::Capped(24_000.0)),
    flat("KY", 0.040, RetirementExclusion::Capped(31_110.0)),
    flat("NC", 0.045, RetirementExclusion::None),
    flat("UT", 0.0465, RetirementExclusion::None),
    flat("AZ", 0.025, RetirementExclusion::None),
    flat("IN", 0.0305, RetirementExclusion::None),
    flat("MI", 0.0425, RetirementExclusion::None),
    flat("MA", 0.05, RetirementExclusion::None),
    StateRule {
        code: "CA",
        schedule: StateSchedule::Brackets(&CA_BRACKETS),
        deduction: 5_540.0,
        exclusion: RetirementExclusion::None,
    },
    StateRule {
        code: "NY",
        schedule: StateSchedule::Brackets(&NY_BRACKETS),
        deduction: 8_000.0,
        exclusion: RetirementExclusion::Capped(20_000.0),
    },
];

fn state_rule(code: &str) -> Option<&'static StateRule> {
    let code = code.trim();
    if NO_INCOME_TAX.iter().any(|c| c.eq_ignore_ascii_case(code)) {
        return None;
    }
    STATE_RULES
        .iter()
        .find(|rule| rule.code.eq_ignore_ascii_case(code))
}

pub fn is_known_state(code: &str) -> bool {
    let code = code.trim();
    NO_INCOME_TAX.iter().any(|c| c.eq_ignore_ascii_case(code))
        || STATE_RULES
            .iter()
            .any(|rule| rule.code.eq_ignore_ascii_case(code))
}

/// State income tax. `retirement_income` is the part of `taxable_income` that
/// a state may exclude once the household is retired. Unknown codes are
/// treated as a state without income tax.
pub fn state_tax(
    taxable_income: f64,
    retirement_income: f64,
    state: &str,
    filing: FilingStatus,
    is_retired: bool,
) -> f64 {
    let Some(rule) = state_rule(state) else {
        return 0.0;
    };
    if taxable_income <= 0.0 {
        return 0.0;
    }

    let scale = if filing.is_joint() { 2.0 } else { 1.0 };
    let retirement_income = retirement_income.clamp(0.0, taxable_income);
    let excluded = if is_retired {
        match rule.exclusion {
            RetirementExclusion::None => 0.0,
            RetirementExclusion::Full => retirement_income,
            RetirementExclusion::Capped(cap) => retirement_income.min(cap * scale),
        }
    } else {
        0.0
    };

    let taxable = taxable_income - excluded - rule.deduction * scale;
    match rule.schedule {
        StateSchedule::Flat(rate) => taxable.max(0.0) * rate,
        StateSchedule::Brackets(brackets) => progressive(taxable, brackets, scale),
    }
}

fn capital_gains_bands(filing: FilingStatus) -> (f64, f64) {
    match filing {
        FilingStatus::Single => (47_025.0, 518_900.0),
        FilingStatus::MarriedFilingJointly => (94_050.0, 583_750.0),
        FilingStatus::HeadOfHousehold => (63_000.0, 551_350.0),
        FilingStatus::MarriedFilingSeparately => (47_025.0, 291_850.0),
    }
}

fn niit_threshold(filing: FilingStatus) -> f64 {
    match filing {
        FilingStatus::MarriedFilingJointly => 250_000.0,
        FilingStatus::MarriedFilingSeparately => 125_000.0,
        _ => 200_000.0,
    }
}

/// Long-term gains tax with `gains` stacked on top of the ordinary part of
/// `total_taxable_income`, plus NIIT on the gains above the threshold.
pub fn capital_gains_tax(gains: f64, total_taxable_income: f64, filing: FilingStatus) -> f64 {
    if gains <= 0.0 {
        return 0.0;
    }
    let total = total_taxable_income.max(gains);
    let ordinary = total - gains;
    let (zero_top, fifteen_top) = capital_gains_bands(filing);

    let band = |lo: f64, hi: f64| (total.min(hi) - ordinary.max(lo)).max(0.0);
    let at_fifteen = band(zero_top, fifteen_top);
    let at_twenty = band(fifteen_top, TOP);

    let niit_base = gains.min((total - niit_threshold(filing)).max(0.0));
    at_fifteen * 0.15 + at_twenty * 0.20 + niit_base * NIIT_RATE
}

fn irmaa_tier(magi: f64, filing: FilingStatus) -> usize {
    let (bounds, top) = match filing {
        FilingStatus::MarriedFilingJointly => ([206_000.0, 258_000.0, 322_000.0, 386_000.0], 750_000.0),
        FilingStatus::MarriedFilingSeparately => {
            return if magi >= 397_000.0 {
                5
            } else if magi > 103_000.0 {
                4
            } else {
                0
            };
        }
        _ => ([103_000.0, 129_000.0, 161_000.0, 193_000.0], 500_000.0),
    };
    if magi >= top {
        return 5;
    }
    bounds.iter().filter(|bound| magi > **bound).count()
}

/// Annual Medicare surcharge per beneficiary for the given MAGI.
pub fn irmaa_surcharge(magi: f64, filing: FilingStatus) -> f64 {
    let (part_b, part_d) = IRMAA_MONTHLY[irmaa_tier(magi, filing)];
    12.0 * (part_b + part_d)
}

pub fn taxable_social_security(benefit: f64, other_income: f64, filing: FilingStatus) -> f64 {
    if benefit <= 0.0 {
        return 0.0;
    }
    let (base, adjusted) = match filing {
        FilingStatus::MarriedFilingJointly => (32_000.0, 44_000.0),
        FilingStatus::MarriedFilingSeparately => (0.0, 0.0),
        _ => (25_000.0, 34_000.0),
    };
    let provisional = other_income.max(0.0) + 0.5 * benefit;
    if provisional <= base {
        return 0.0;
    }
    if provisional <= adjusted {
        return (0.5 * (provisional - base)).min(0.5 * benefit);
    }
    let first_tier = (0.5 * benefit).min(0.5 * (adjusted - base));
    (0.85 * (provisional - adjusted) + first_tier).min(0.85 * benefit)
}

/// Income for one year, nominal.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TaxableIncome {
    pub ordinary: f64,
    pub social_security: f64,
    pub capital_gains: f64,
    /// Pension and tax-deferred withdrawals, eligible for state exclusions.
    pub retirement_income: f64,
}

#[derive(Copy, Clone, Debug)]
pub struct TaxContext<'a> {
    pub setting: &'a TaxSetting,
    pub filing_status: FilingStatus,
    pub senior_filers: u32,
    pub retired: bool,
    /// Cumulative inflation since the first simulated year.
    pub price_index: f64,
}

pub fn household_tax(income: &TaxableIncome, ctx: &TaxContext<'_>) -> TaxBreakdown {
    let p = if ctx.price_index > 0.0 {
        ctx.price_index
    } else {
        1.0
    };
    let ordinary = income.ordinary.max(0.0) / p;
    let gains = income.capital_gains.max(0.0) / p;
    let ss = taxable_social_security(
        income.social_security.max(0.0) / p,
        ordinary + gains,
        ctx.filing_status,
    );
    let gross_ordinary = ordinary + ss;
    let magi = (gross_ordinary + gains) * p;

    match ctx.setting {
        TaxSetting::Flat { rate } => TaxBreakdown {
            federal: gross_ordinary * rate * p,
            state: 0.0,
            capital_gains: gains * rate * p,
            magi,
        },
        TaxSetting::Progressive { state } => {
            let federal = federal_tax(gross_ordinary, ctx.filing_status, ctx.senior_filers);
            let deduction = standard_deduction(ctx.filing_status, ctx.senior_filers);
            let total_taxable = (gross_ordinary + gains - deduction).max(0.0);
            let capital_gains =
                capital_gains_tax(gains.min(total_taxable), total_taxable, ctx.filing_status);
            let state_tax = state_tax(
                gross_ordinary + gains,
                income.retirement_income.max(0.0) / p,
                state,
                ctx.filing_status,
                ctx.retired,
            );
            let mut breakdown = TaxBreakdown {
                federal,
                state: state_tax,
                capital_gains,
                magi: 0.0,
            }
            .scaled(p);
            breakdown.magi = magi;
            breakdown
        }
    }
}
