use super::error::{FieldError, FieldIssue, ValidationError};
use super::tax::is_known_state;
use super::types::{
    AllocationPolicy, AssetClassAssumptions, Bucket, ClassAssumption, HouseholdProfile, Person,
    RegimeModel, StatisticalWarning, TaxSetting,
};

const LOW_ASSETS: f64 = 10_000.0;
const LOW_EXPENSES: f64 = 20_000.0;
const HIGH_STOCKS: f64 = 0.95;

#[derive(Default)]
struct Checker {
    errors: Vec<FieldError>,
}

impl Checker {
    fn fail(&mut self, field: impl Into<String>, issue: FieldIssue) {
        self.errors.push(FieldError::new(field, issue));
    }

    fn finite(&mut self, field: &str, value: f64) -> bool {
        if value.is_finite() {
            true
        } else {
            self.fail(field, FieldIssue::NotFinite);
            false
        }
    }

    fn range(&mut self, field: &str, value: f64, min: f64, max: f64) {
        if self.finite(field, value) && !(min..=max).contains(&value) {
            self.fail(field, FieldIssue::OutOfRange { value, min, max });
        }
    }

    fn non_negative(&mut self, field: &str, value: f64) {
        if self.finite(field, value) && value < 0.0 {
            self.fail(field, FieldIssue::Negative { value });
        }
    }

    fn age(&mut self, field: &str, value: u32, min: u32, max: u32) {
        if !(min..=max).contains(&value) {
            self.fail(
                field,
                FieldIssue::OutOfRange {
                    value: value as f64,
                    min: min as f64,
                    max: max as f64,
                },
            );
        }
    }
}

fn check_person(c: &mut Checker, prefix: &str, person: &Person) {
    c.age(&format!("{prefix}.currentAge"), person.current_age, 18, 100);
    c.age(&format!("{prefix}.retirementAge"), person.retirement_age, 50, 80);
    c.age(&format!("{prefix}.lifeExpectancy"), person.life_expectancy, 70, 120);
    if person.life_expectancy <= person.current_age {
        c.fail(
            format!("{prefix}.lifeExpectancy"),
            FieldIssue::Inconsistent("must be greater than current age".to_string()),
        );
    }
    c.non_negative(&format!("{prefix}.salary"), person.salary);
    if let Some(ss) = person.social_security {
        c.non_negative(
            &format!("{prefix}.socialSecurity.annualBenefitAtFra"),
            ss.annual_benefit_at_fra,
        );
        c.age(&format!("{prefix}.socialSecurity.claimAge"), ss.claim_age, 62, 70);
    }
}

fn check_class(c: &mut Checker, name: &str, class: &ClassAssumption) {
    c.range(&format!("market.assetClasses.{name}.cagr"), class.cagr, -0.10, 0.20);
    c.range(
        &format!("market.assetClasses.{name}.volatility"),
        class.volatility,
        0.0,
        0.50,
    );
}

fn check_asset_classes(c: &mut Checker, classes: &AssetClassAssumptions) {
    check_class(c, "stocks", &classes.stocks);
    check_class(c, "bonds", &classes.bonds);
    check_class(c, "cash", &classes.cash);
    let m = &classes.correlation;
    for i in 0..3 {
        for j in 0..3 {
            let field = format!("market.assetClasses.correlation[{i}][{j}]");
            if i == j {
                if (m[i][j] - 1.0).abs() > 1e-9 {
                    c.fail(field, FieldIssue::Inconsistent("diagonal must be 1".to_string()));
                }
            } else {
                c.range(&field, m[i][j], -1.0, 1.0);
                if (m[i][j] - m[j][i]).abs() > 1e-9 {
                    c.fail(field, FieldIssue::Inconsistent("matrix must be symmetric".to_string()));
                }
            }
        }
    }
}

fn check_regimes(c: &mut Checker, model: &RegimeModel) {
    for (i, row) in model.transitions.iter().enumerate() {
        let field = format!("market.regimes.transitions[{i}]");
        if row.iter().any(|p| !p.is_finite() || *p < 0.0) || row.iter().sum::<f64>() <= 0.0 {
            c.fail(
                field,
                FieldIssue::Inconsistent("probabilities must be >= 0 with a positive sum".to_string()),
            );
        }
    }
    for (i, params) in model.params.iter().enumerate() {
        c.range(
            &format!("market.regimes.params[{i}].meanShift"),
            params.mean_shift,
            -0.5,
            0.5,
        );
        c.range(
            &format!("market.regimes.params[{i}].volatilityMultiplier"),
            params.volatility_multiplier,
            0.0,
            5.0,
        );
    }
    c.range(
        "market.regimes.sequenceRiskMultiplier",
        model.sequence_risk_multiplier,
        0.0,
        10.0,
    );
}

/// Checks a profile and the trial count. Returns the non-fatal warnings on
/// success and every field-level problem on failure.
pub fn validate_profile(
    profile: &HouseholdProfile,
    trials: u32,
) -> Result<Vec<StatisticalWarning>, ValidationError> {
    let mut c = Checker::default();

    check_person(&mut c, "user", &profile.user);
    if let Some(spouse) = profile.spouse.as_ref() {
        check_person(&mut c, "spouse", spouse);
    }

    for (bucket, value) in profile.buckets.iter() {
        let name = match bucket {
            Bucket::TaxDeferred => "buckets.taxDeferred",
            Bucket::TaxFree => "buckets.taxFree",
            Bucket::CapitalGains => "buckets.capitalGains",
            Bucket::CashEquivalents => "buckets.cashEquivalents",
        };
        c.non_negative(name, value);
    }
    c.non_negative("capitalGainsBasis", profile.capital_gains_basis);
    for (name, value) in [
        ("contributions.taxDeferred", profile.contributions.tax_deferred),
        ("contributions.taxFree", profile.contributions.tax_free),
        ("contributions.capitalGains", profile.contributions.capital_gains),
        ("contributions.cashEquivalents", profile.contributions.cash_equivalents),
    ] {
        c.non_negative(name, value);
    }
    c.range("contributions.growthRate", profile.contributions.growth_rate, -0.10, 0.20);

    c.non_negative("annualExpenses", profile.annual_expenses);
    c.range("survivorExpenseRatio", profile.survivor_expense_ratio, 0.0, 1.0);
    c.non_negative("healthcare.annualCost", profile.healthcare.annual_cost);
    c.range("healthcare.inflationRate", profile.healthcare.inflation_rate, -0.05, 0.20);

    let ltc = &profile.long_term_care;
    c.non_negative("longTermCare.annualPremium", ltc.annual_premium);
    c.non_negative("longTermCare.annualCareCost", ltc.annual_care_cost);
    c.range(
        "longTermCare.annualOnsetProbability",
        ltc.annual_onset_probability,
        0.0,
        1.0,
    );

    if let Some(pension) = profile.pension {
        c.non_negative("pension.annualAmount", pension.annual_amount);
        c.range("pension.cola", pension.cola, -0.05, 0.15);
        c.range("pension.survivorPct", pension.survivor_pct, 0.0, 1.0);
    }
    if let Some(pt) = profile.part_time {
        c.non_negative("partTime.annualAmount", pt.annual_amount);
        if pt.end_age < pt.start_age {
            c.fail(
                "partTime.endAge",
                FieldIssue::Inconsistent("must not be before start age".to_string()),
            );
        }
    }

    let market = &profile.market;
    c.range("market.expectedReturn", market.expected_return, -0.10, 0.20);
    c.range("market.volatility", market.volatility, 0.0, 0.50);
    c.range("market.inflationRate", market.inflation_rate, -0.05, 0.15);
    c.range("market.inflationVolatility", market.inflation_volatility, 0.0, 0.20);

    for mix in market.allocation.anchor_mixes() {
        let sum = mix.sum();
        if mix.as_array().iter().any(|w| !w.is_finite() || *w < 0.0) {
            c.fail(
                "market.allocation",
                FieldIssue::Inconsistent("weights must be finite and >= 0".to_string()),
            );
        } else if !(0.99..=1.01).contains(&sum) {
            c.fail("market.allocation", FieldIssue::AllocationSum { sum });
        }
    }
    if let AllocationPolicy::GlidePath {
        start_age, end_age, ..
    } = market.allocation
    {
        if end_age < start_age {
            c.fail(
                "market.allocation.endAge",
                FieldIssue::Inconsistent("glide path must not end before it starts".to_string()),
            );
        }
    }
    if let Some(classes) = market.asset_classes.as_ref() {
        check_asset_classes(&mut c, classes);
    }
    if let Some(model) = market.regimes.as_ref() {
        check_regimes(&mut c, model);
    }

    if let TaxSetting::Flat { rate } = profile.tax {
        c.range("taxRate", rate, 0.0, 0.60);
    }
    c.range("withdrawalRate", profile.withdrawal_rate, 0.01, 0.15);

    let g = &profile.guardrails;
    c.range("guardrails.upperThreshold", g.upper_threshold, 0.0, 10.0);
    c.range("guardrails.lowerThreshold", g.lower_threshold, 0.0, 10.0);
    c.range("guardrails.cut", g.cut, 0.0, 1.0);
    c.range("guardrails.raise", g.raise, 0.0, 1.0);

    if trials == 0 {
        c.fail(
            "trials",
            FieldIssue::OutOfRange {
                value: 0.0,
                min: 1.0,
                max: u32::MAX as f64,
            },
        );
    }

    if !c.errors.is_empty() {
        return Err(ValidationError { errors: c.errors });
    }
    Ok(warnings(profile))
}

fn warnings(profile: &HouseholdProfile) -> Vec<StatisticalWarning> {
    let mut out = Vec::new();
    let mut warn = |field: &str, message: String| {
        out.push(StatisticalWarning::Input {
            field: field.to_string(),
            message,
        });
    };

    let assets = profile.buckets.total();
    if assets < LOW_ASSETS {
        warn(
            "buckets",
            format!("total assets of ${assets:.0} are below ${LOW_ASSETS:.0}"),
        );
    }
    if profile.annual_expenses < LOW_EXPENSES {
        warn(
            "annualExpenses",
            format!(
                "annual expenses of ${:.0} are below ${LOW_EXPENSES:.0}",
                profile.annual_expenses
            ),
        );
    }
    let max_stocks = profile
        .market
        .allocation
        .anchor_mixes()
        .iter()
        .map(|mix| mix.stocks)
        .fold(0.0, f64::max);
    if max_stocks > HIGH_STOCKS {
        warn(
            "market.allocation",
            format!("stock allocation of {:.0}% is above 95%", max_stocks * 100.0),
        );
    }
    if let TaxSetting::Progressive { state } = &profile.tax {
        if !is_known_state(state) {
            warn(
                "state",
                format!("state '{state}' is not modelled; no state income tax applied"),
            );
        }
    }
    out
}
