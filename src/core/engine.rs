use super::error::ComputationError;
use super::guardrails::{GuardrailPolicy, GuardrailState, GuardrailYear};
use super::returns::{DrawContext, RandomSource, ReturnGenerator, Rng, derive_seed};
use super::rmd::required_minimum_distribution;
use super::tax::{TaxContext, TaxableIncome, irmaa_surcharge};
use super::types::{
    AssetBuckets, ExpenseBreakdown, FilingStatus, HouseholdProfile, IncomeBreakdown,
    LongTermCare, MarketRegime, Person, TaxBreakdown, YearlyCashFlow,
};
use super::withdrawal::{WithdrawalRequest, apply_plan, plan_withdrawals};

/// Unmet need (nominal dollars) above which a year counts as depleted.
pub const DEPLETION_EPS: f64 = 0.01;
const NEGATIVE_EPS: f64 = 1e-6;
const MEDICARE_AGE: u32 = 65;
const SURVIVOR_BENEFIT_AGE: u32 = 60;
const SURVIVOR_MAX_REDUCTION: f64 = 0.285;
const IRMAA_LOOKBACK_YEARS: u32 = 2;

const MARKET_STREAM: u32 = 0;
const EVENT_STREAM: u32 = 1;

/// Summary of one lifetime trajectory. Balances are in today's dollars.
#[derive(Clone, Debug, PartialEq)]
pub struct TrialOutcome {
    pub trial: u32,
    pub success: bool,
    pub ending_balance: f64,
    pub yearly_balances: Vec<f64>,
    pub depletion_year: Option<u32>,
    pub depletion_age: Option<u32>,
    pub clamped_draws: u32,
}

/// Random sources for a trial. With antithetic pairing, trials `2k` and
/// `2k + 1` share seeds and the odd one mirrors every draw.
pub fn trial_rngs(master_seed: u64, trial: u32, antithetic: bool) -> (Rng, Rng) {
    let (index, mirrored) = if antithetic {
        (trial / 2, trial % 2 == 1)
    } else {
        (trial, false)
    };
    let make = |stream: u32| {
        let seed = derive_seed(master_seed, stream, index);
        if mirrored {
            Rng::antithetic(seed)
        } else {
            Rng::new(seed)
        }
    };
    (make(MARKET_STREAM), make(EVENT_STREAM))
}

pub fn simulate_trial(
    profile: &HouseholdProfile,
    master_seed: u64,
    trial: u32,
    antithetic: bool,
    trace: Option<&mut Vec<YearlyCashFlow>>,
) -> Result<TrialOutcome, ComputationError> {
    let (mut market, mut events) = trial_rngs(master_seed, trial, antithetic);
    ScenarioRunner::new(profile).run(trial, &mut market, &mut events, trace)
}

pub fn full_retirement_age_months(birth_year: i32) -> u32 {
    match birth_year {
        ..=1937 => 65 * 12,
        1938..=1942 => 65 * 12 + 2 * (birth_year - 1937) as u32,
        1943..=1954 => 66 * 12,
        1955..=1959 => 66 * 12 + 2 * (birth_year - 1954) as u32,
        _ => 67 * 12,
    }
}

/// Benefit multiplier for claiming at `claim_age` instead of full retirement
/// age. Claim ages are clamped to 62..=70.
pub fn claim_adjustment(birth_year: i32, claim_age: u32) -> f64 {
    let fra = full_retirement_age_months(birth_year);
    let claim = claim_age.clamp(62, 70) * 12;
    if claim < fra {
        let early = fra - claim;
        let first = early.min(36) as f64;
        let rest = early.saturating_sub(36) as f64;
        1.0 - first * 5.0 / 900.0 - rest * 5.0 / 1200.0
    } else {
        1.0 + (claim - fra) as f64 * 2.0 / 300.0
    }
}

/// Share of the deceased's benefit paid to a survivor who starts it at
/// `claim_age`; 71.5% at 60 rising linearly to 100% at full retirement age.
pub fn survivor_reduction(birth_year: i32, claim_age: u32) -> f64 {
    let fra = full_retirement_age_months(birth_year);
    let claim = claim_age.max(SURVIVOR_BENEFIT_AGE) * 12;
    if claim >= fra {
        return 1.0;
    }
    let earliest = SURVIVOR_BENEFIT_AGE * 12;
    1.0 - SURVIVOR_MAX_REDUCTION * (fra - claim) as f64 / (fra - earliest) as f64
}

// The survivor benefit starts at the first death, or at 60 if that comes later.
fn survivor_claim_age(survivor: &Person, deceased: &Person) -> u32 {
    let years_to_death = deceased.life_expectancy.saturating_sub(deceased.current_age);
    (survivor.current_age + years_to_death).max(SURVIVOR_BENEFIT_AGE)
}

fn full_benefit(person: &Person, birth_year: i32, price_index: f64) -> f64 {
    person.social_security.map_or(0.0, |ss| {
        ss.annual_benefit_at_fra.max(0.0) * claim_adjustment(birth_year, ss.claim_age) * price_index
    })
}

fn own_benefit(person: &Person, birth_year: i32, age: u32, price_index: f64) -> f64 {
    match person.social_security {
        Some(ss) if age >= ss.claim_age.clamp(62, 70) => full_benefit(person, birth_year, price_index),
        _ => 0.0,
    }
}

#[derive(Copy, Clone, Debug)]
struct YearAges {
    user: u32,
    spouse: Option<u32>,
    user_alive: bool,
    spouse_alive: bool,
}

impl YearAges {
    fn at(profile: &HouseholdProfile, year: u32) -> Self {
        let user = profile.user.current_age + year;
        let spouse = profile.spouse.as_ref().map(|s| s.current_age + year);
        Self {
            user,
            spouse,
            user_alive: user < profile.user.life_expectancy,
            spouse_alive: profile
                .spouse
                .as_ref()
                .zip(spouse)
                .is_some_and(|(s, age)| age < s.life_expectancy),
        }
    }

    fn is_survivor(&self) -> bool {
        self.spouse.is_some() && self.user_alive != self.spouse_alive
    }

    fn living_ages(&self) -> impl Iterator<Item = u32> + '_ {
        [
            self.user_alive.then_some(self.user),
            self.spouse.filter(|_| self.spouse_alive),
        ]
        .into_iter()
        .flatten()
    }

    fn seniors(&self) -> u32 {
        self.living_ages().filter(|age| *age >= MEDICARE_AGE).count() as u32
    }

    fn oldest_living(&self) -> Option<u32> {
        self.living_ages().max()
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct CareState {
    remaining_years: u32,
    occurred: bool,
}

impl CareState {
    /// Nominal long-term-care cost for the year. `roll` is always consumed so
    /// the event stream stays aligned across trials.
    fn cost(&mut self, ltc: &LongTermCare, oldest: Option<u32>, roll: f64, price_index: f64) -> f64 {
        let eligible = ltc.annual_care_cost > 0.0
            && !self.occurred
            && oldest.is_some_and(|age| age >= ltc.onset_age);
        if self.remaining_years == 0 && eligible && roll < ltc.annual_onset_probability {
            self.remaining_years = ltc.care_years.max(1);
            self.occurred = true;
        }

        if self.remaining_years > 0 {
            self.remaining_years -= 1;
            if ltc.insured {
                0.0
            } else {
                ltc.annual_care_cost * price_index
            }
        } else if ltc.insured {
            ltc.annual_premium.max(0.0) * price_index
        } else {
            0.0
        }
    }
}

#[derive(Debug)]
struct TrialState {
    balances: AssetBuckets,
    basis: f64,
    price_index: f64,
    health_index: f64,
    regime: Option<MarketRegime>,
    guardrails: GuardrailState,
    /// MAGI per simulated year in today's dollars.
    real_magi: Vec<f64>,
    care: CareState,
    prior_return: Option<f64>,
    first_retired_year: Option<u32>,
    survivor: bool,
    depleted: bool,
}

pub struct ScenarioRunner<'a> {
    profile: &'a HouseholdProfile,
    returns: ReturnGenerator<'a>,
    guardrails: GuardrailPolicy,
    user_birth_year: i32,
    spouse_birth_year: Option<i32>,
    horizon: u32,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(profile: &'a HouseholdProfile) -> Self {
        Self {
            profile,
            returns: ReturnGenerator::new(&profile.market),
            guardrails: GuardrailPolicy::new(profile.guardrails),
            user_birth_year: profile.birth_year(),
            spouse_birth_year: profile.spouse_birth_year(),
            horizon: profile.horizon_years(),
        }
    }

    pub fn horizon_years(&self) -> u32 {
        self.horizon
    }

    pub fn run<R: RandomSource>(
        &self,
        trial: u32,
        market_rng: &mut R,
        event_rng: &mut R,
        mut trace: Option<&mut Vec<YearlyCashFlow>>,
    ) -> Result<TrialOutcome, ComputationError> {
        let profile = self.profile;
        let mut state = TrialState {
            balances: profile.buckets,
            basis: profile
                .capital_gains_basis
                .clamp(0.0, profile.buckets.capital_gains.max(0.0)),
            price_index: 1.0,
            health_index: 1.0,
            regime: None,
            guardrails: GuardrailState::default(),
            real_magi: Vec::with_capacity(self.horizon as usize),
            care: CareState::default(),
            prior_return: None,
            first_retired_year: None,
            survivor: false,
            depleted: false,
        };

        let mut yearly_balances = Vec::with_capacity(self.horizon as usize);
        let mut depletion: Option<(u32, u32)> = None;
        let mut clamped_draws = 0_u32;

        for year in 0..self.horizon {
            let ages = YearAges::at(profile, year);
            let row = if state.depleted {
                depleted_row(year, &ages, state.price_index)
            } else {
                let (row, clamped) =
                    self.simulate_year(trial, year, &ages, &mut state, market_rng, event_rng)?;
                clamped_draws += clamped;
                row
            };

            if row.depleted && depletion.is_none() {
                depletion = Some((year, ages.user));
            }
            yearly_balances.push(row.ending_balance / state.price_index);
            if let Some(trace) = trace.as_deref_mut() {
                trace.push(row);
            }
        }

        let ending_balance = if state.depleted {
            0.0
        } else {
            state.balances.total() / state.price_index
        };

        Ok(TrialOutcome {
            trial,
            success: depletion.is_none(),
            ending_balance,
            yearly_balances,
            depletion_year: depletion.map(|(year, _)| year),
            depletion_age: depletion.map(|(_, age)| age),
            clamped_draws,
        })
    }

    fn simulate_year<R: RandomSource>(
        &self,
        trial: u32,
        year: u32,
        ages: &YearAges,
        state: &mut TrialState,
        market_rng: &mut R,
        event_rng: &mut R,
    ) -> Result<(YearlyCashFlow, u32), ComputationError> {
        let profile = self.profile;
        let retired = !ages.user_alive || ages.user >= profile.user.retirement_age;
        if retired && state.first_retired_year.is_none() {
            state.first_retired_year = Some(year);
        }

        let draw = self.returns.draw(
            market_rng,
            DrawContext {
                age: ages.user,
                retirement_year: state.first_retired_year.map(|first| year - first),
            },
            &mut state.regime,
        );
        let care_roll = event_rng.next_f64();

        state.price_index *= 1.0 + draw.inflation;
        if year > 0 {
            state.health_index *= 1.0 + profile.healthcare.inflation_rate;
        }
        let prior_tax_deferred = state.balances.tax_deferred;
        state.balances = state.balances.scaled(1.0 + draw.portfolio_return);

        let survivor = ages.is_survivor();
        let survivor_event = survivor && !state.survivor;
        if survivor_event {
            state.guardrails.scale_spending(profile.survivor_expense_ratio);
        }
        state.survivor = survivor;
        let filing_status = if survivor {
            FilingStatus::Single
        } else {
            profile.filing_status
        };

        let mut row = YearlyCashFlow {
            year_index: year,
            age: ages.user,
            spouse_age: ages.spouse,
            retired,
            income: IncomeBreakdown::default(),
            contributions: 0.0,
            expenses: ExpenseBreakdown::default(),
            rmd: 0.0,
            withdrawals: AssetBuckets::default(),
            withdrawal_total: 0.0,
            reinvested: 0.0,
            taxes: TaxBreakdown::default(),
            portfolio_return: draw.portfolio_return,
            inflation: draw.inflation,
            price_index: state.price_index,
            ending_balances: AssetBuckets::default(),
            ending_balance: 0.0,
            guardrail: None,
            inflation_skipped: false,
            market_regime: draw.regime,
            survivor_event,
            depleted: false,
        };

        if retired {
            self.retired_year(year, ages, state, filing_status, prior_tax_deferred, care_roll, &mut row);
        } else {
            self.working_year(year, ages, state, &mut row);
        }

        check_balances(trial, year, &mut state.balances)?;
        if !state.basis.is_finite() {
            return Err(ComputationError::NonFinite {
                trial,
                year,
                what: "cost basis",
            });
        }

        state.prior_return = Some(draw.portfolio_return);
        row.ending_balances = state.balances;
        row.ending_balance = state.balances.total();
        row.depleted = state.depleted;
        Ok((row, draw.clamped))
    }

    fn working_year(&self, year: u32, ages: &YearAges, state: &mut TrialState, row: &mut YearlyCashFlow) {
        let profile = self.profile;
        let scale = state.price_index * (1.0 + profile.contributions.growth_rate).powi(year as i32);
        let contributions = profile.contributions.as_buckets().scaled(scale);

        state.balances.tax_deferred += contributions.tax_deferred;
        state.balances.tax_free += contributions.tax_free;
        state.balances.capital_gains += contributions.capital_gains;
        state.balances.cash_equivalents += contributions.cash_equivalents;
        state.basis += contributions.capital_gains;

        let salaries = self.working_salaries(ages, true) * state.price_index;
        state.real_magi.push(salaries / state.price_index);
        row.income.salary = salaries;
        row.contributions = contributions.total();
    }

    /// Real salary of everyone still working; the user only counts when
    /// `include_user` is set.
    fn working_salaries(&self, ages: &YearAges, include_user: bool) -> f64 {
        let profile = self.profile;
        let user = if include_user && ages.user_alive && ages.user < profile.user.retirement_age {
            profile.user.salary.max(0.0)
        } else {
            0.0
        };
        let spouse = match (profile.spouse.as_ref(), ages.spouse) {
            (Some(s), Some(age)) if ages.spouse_alive && age < s.retirement_age => s.salary.max(0.0),
            _ => 0.0,
        };
        user + spouse
    }

    fn social_security(&self, ages: &YearAges, price_index: f64) -> f64 {
        let profile = self.profile;
        let user = own_benefit(&profile.user, self.user_birth_year, ages.user, price_index);
        let (Some(spouse), Some(spouse_age), Some(spouse_birth)) =
            (profile.spouse.as_ref(), ages.spouse, self.spouse_birth_year)
        else {
            return if ages.user_alive { user } else { 0.0 };
        };
        let spouse_own = own_benefit(spouse, spouse_birth, spouse_age, price_index);

        match (ages.user_alive, ages.spouse_alive) {
            (true, true) => user + spouse_own,
            (true, false) => {
                let inherited = if ages.user >= SURVIVOR_BENEFIT_AGE {
                    let claim_age = survivor_claim_age(&profile.user, spouse);
                    full_benefit(spouse, spouse_birth, price_index)
                        * survivor_reduction(self.user_birth_year, claim_age)
                } else {
                    0.0
                };
                user.max(inherited)
            }
            (false, true) => {
                let inherited = if spouse_age >= SURVIVOR_BENEFIT_AGE {
                    let claim_age = survivor_claim_age(spouse, &profile.user);
                    full_benefit(&profile.user, self.user_birth_year, price_index)
                        * survivor_reduction(spouse_birth, claim_age)
                } else {
                    0.0
                };
                spouse_own.max(inherited)
            }
            (false, false) => 0.0,
        }
    }

    fn guaranteed_income(&self, ages: &YearAges, survivor: bool, price_index: f64) -> IncomeBreakdown {
        let profile = self.profile;
        let pension = profile.pension.map_or(0.0, |pension| {
            if ages.user < pension.start_age {
                return 0.0;
            }
            let years_paid = (ages.user - pension.start_age) as i32;
            let share = if survivor { pension.survivor_pct } else { 1.0 };
            pension.annual_amount.max(0.0) * (1.0 + pension.cola).powi(years_paid) * share
        });
        let part_time = match profile.part_time {
            Some(pt) if ages.user_alive => pt.annual_amount.max(0.0) * pt.phase_factor(ages.user) * price_index,
            _ => 0.0,
        };

        IncomeBreakdown {
            salary: self.working_salaries(ages, false) * price_index,
            social_security: self.social_security(ages, price_index),
            pension,
            part_time,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn retired_year(
        &self,
        year: u32,
        ages: &YearAges,
        state: &mut TrialState,
        filing_status: FilingStatus,
        prior_tax_deferred: f64,
        care_roll: f64,
        row: &mut YearlyCashFlow,
    ) {
        let profile = self.profile;
        let p = state.price_index;
        let survivor = state.survivor;

        let income = self.guaranteed_income(ages, survivor, p);

        let healthcare_share = if survivor { 0.5 } else { 1.0 };
        let healthcare = profile.healthcare.annual_cost.max(0.0) * state.health_index * healthcare_share;
        let irmaa = year
            .checked_sub(IRMAA_LOOKBACK_YEARS)
            .and_then(|lookback| state.real_magi.get(lookback as usize))
            .map_or(0.0, |magi| irmaa_surcharge(*magi, filing_status) * ages.seniors() as f64 * p);
        let long_term_care = state
            .care
            .cost(&profile.long_term_care, ages.oldest_living(), care_roll, p);
        let other_expenses = healthcare + irmaa + long_term_care;

        let survivor_ratio = if survivor {
            profile.survivor_expense_ratio
        } else {
            1.0
        };
        let decision = self.guardrails.evaluate(
            &mut state.guardrails,
            &GuardrailYear {
                year_index: year,
                opening_spending: profile.annual_expenses.max(0.0) * p * survivor_ratio,
                inflation: row.inflation,
                prior_return: state.prior_return,
                other_expenses,
                guaranteed_income: income.total(),
                portfolio_value: state.balances.total(),
            },
        );

        // A surviving spouse takes the account over as their own.
        let rmd = if ages.user_alive {
            required_minimum_distribution(
                prior_tax_deferred,
                state.balances.tax_deferred,
                ages.user,
                self.user_birth_year,
                ages.spouse.filter(|_| ages.spouse_alive),
            )
        } else {
            required_minimum_distribution(
                prior_tax_deferred,
                state.balances.tax_deferred,
                ages.spouse.unwrap_or(ages.user),
                self.spouse_birth_year.unwrap_or(self.user_birth_year),
                None,
            )
        };

        let expenses = ExpenseBreakdown {
            spending: decision.spending,
            healthcare,
            irmaa,
            long_term_care,
        };
        let plan = plan_withdrawals(&WithdrawalRequest {
            expenses: expenses.total(),
            guaranteed_income: income.total(),
            base_income: TaxableIncome {
                ordinary: income.salary + income.pension + income.part_time,
                social_security: income.social_security,
                capital_gains: 0.0,
                retirement_income: income.pension,
            },
            rmd,
            balances: state.balances,
            capital_gains_basis: state.basis,
            tax: TaxContext {
                setting: &profile.tax,
                filing_status,
                senior_filers: ages.seniors(),
                retired: true,
                price_index: p,
            },
        });
        apply_plan(&mut state.balances, &mut state.basis, &plan);
        state.real_magi.push(plan.taxes.magi / p);

        if plan.unmet_need > DEPLETION_EPS {
            state.depleted = true;
            state.balances = AssetBuckets::default();
            state.basis = 0.0;
        }

        row.income = income;
        row.expenses = expenses;
        row.rmd = plan.rmd;
        row.withdrawals = plan.withdrawals;
        row.withdrawal_total = plan.total();
        row.reinvested = plan.reinvested;
        row.taxes = plan.taxes;
        row.guardrail = decision.adjustment;
        row.inflation_skipped = decision.inflation_skipped;
    }
}

fn check_balances(trial: u32, year: u32, balances: &mut AssetBuckets) -> Result<(), ComputationError> {
    for (bucket, value) in balances.iter() {
        if !value.is_finite() {
            return Err(ComputationError::NonFinite {
                trial,
                year,
                what: "bucket balance",
            });
        }
        if value < -NEGATIVE_EPS {
            return Err(ComputationError::NegativeBalance {
                trial,
                year,
                bucket,
                value,
            });
        }
    }
    balances.floor_at_zero();
    Ok(())
}

fn depleted_row(year: u32, ages: &YearAges, price_index: f64) -> YearlyCashFlow {
    YearlyCashFlow {
        year_index: year,
        age: ages.user,
        spouse_age: ages.spouse,
        retired: true,
        income: IncomeBreakdown::default(),
        contributions: 0.0,
        expenses: ExpenseBreakdown::default(),
        rmd: 0.0,
        withdrawals: AssetBuckets::default(),
        withdrawal_total: 0.0,
        reinvested: 0.0,
        taxes: TaxBreakdown::default(),
        portfolio_return: 0.0,
        inflation: 0.0,
        price_index,
        ending_balances: AssetBuckets::default(),
        ending_balance: 0.0,
        guardrail: None,
        inflation_skipped: false,
        market_regime: None,
        survivor_event: false,
        depleted: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::{sample_profile, zero_volatility_profile};
    use crate::core::types::{PartTimeIncome, Pension, SocialSecurityBenefit, TaxSetting};
    use proptest::prelude::{prop_assert, proptest};

    fn trace(profile: &HouseholdProfile, seed: u64) -> (TrialOutcome, Vec<YearlyCashFlow>) {
        let mut rows = Vec::new();
        let outcome = simulate_trial(profile, seed, 0, false, Some(&mut rows)).expect("trial");
        (outcome, rows)
    }

    #[test]
    fn identical_seed_gives_identical_rows() {
        let profile = sample_profile();
        let (a, rows_a) = trace(&profile, 11);
        let (b, rows_b) = trace(&profile, 11);
        assert_eq!(a, b);
        assert_eq!(rows_a, rows_b);
        let (_, rows_c) = trace(&profile, 12);
        assert_ne!(rows_a, rows_c);
    }

    #[test]
    fn one_row_per_year_until_last_life_expectancy() {
        let profile = sample_profile();
        let (outcome, rows) = trace(&profile, 3);
        assert_eq!(rows.len() as u32, profile.horizon_years());
        assert_eq!(outcome.yearly_balances.len(), rows.len());
        assert_eq!(rows[0].age, profile.user.current_age);
    }

    #[test]
    fn zero_volatility_matches_compound_withdrawal_formula() {
        let profile = zero_volatility_profile();
        let (outcome, rows) = trace(&profile, 1);
        let a: f64 = 1_000_000.0;
        let e = 40_000.0;
        let r: f64 = 0.05;
        let n = 25;
        let growth = (1.0 + r).powi(n);
        let expected = a * growth - e * (growth - 1.0) / r;
        let last = rows.last().map(|row| row.ending_balance).unwrap_or_default();
        assert!((last - expected).abs() < 1e-6 * expected, "{last} vs {expected}");
        assert!(outcome.success);
    }

    #[test]
    fn buckets_are_conserved_each_year() {
        let profile = sample_profile();
        let (_, rows) = trace(&profile, 5);
        let mut prior = profile.buckets.total();
        for row in &rows {
            if row.depleted {
                break;
            }
            let expected =
                prior * (1.0 + row.portfolio_return) + row.contributions - row.withdrawal_total
                    + row.reinvested;
            assert!(
                (row.ending_balance - expected).abs() < 1e-6 * expected.abs().max(1.0),
                "year {}: {} vs {}",
                row.year_index,
                row.ending_balance,
                expected
            );
            for (_, value) in row.ending_balances.iter() {
                assert!(value >= 0.0);
            }
            prior = row.ending_balance;
        }
    }

    #[test]
    fn rmd_starts_at_cohort_age() {
        let mut profile = zero_volatility_profile();
        profile.current_year = 2026;
        profile.user.current_age = 72; // born 1954
        profile.user.retirement_age = 65;
        profile.buckets = AssetBuckets {
            tax_deferred: 1_000_000.0,
            ..AssetBuckets::default()
        };
        let (_, rows) = trace(&profile, 1);
        assert_eq!(rows[0].rmd, 0.0);
        let prior = rows[0].ending_balances.tax_deferred;
        assert!((rows[1].rmd - prior / 26.5).abs() < 1e-6);
    }

    #[test]
    fn guaranteed_income_covering_expenses_never_depletes() {
        let mut profile = zero_volatility_profile();
        profile.buckets = AssetBuckets::default();
        profile.capital_gains_basis = 0.0;
        profile.pension = Some(Pension {
            annual_amount: 60_000.0,
            start_age: 60,
            cola: 0.0,
            survivor_pct: 1.0,
        });
        let (outcome, rows) = trace(&profile, 9);
        assert!(outcome.success);
        assert_eq!(outcome.ending_balance, 0.0);
        assert!(rows.iter().all(|row| !row.depleted));
    }

    #[test]
    fn heavy_withdrawals_deplete_early() {
        let mut profile = zero_volatility_profile();
        profile.buckets = AssetBuckets {
            tax_free: 100_000.0,
            ..AssetBuckets::default()
        };
        profile.annual_expenses = 50_000.0;
        let (outcome, rows) = trace(&profile, 2);
        assert!(!outcome.success);
        assert_eq!(outcome.depletion_year, Some(2));
        assert!(rows[2..].iter().all(|row| row.depleted && row.ending_balance == 0.0));
        assert_eq!(outcome.ending_balance, 0.0);
    }

    #[test]
    fn contributions_accumulate_before_retirement() {
        let mut profile = zero_volatility_profile();
        profile.market.expected_return = 0.0;
        profile.user.current_age = 60;
        profile.user.retirement_age = 62;
        profile.contributions.tax_free = 10_000.0;
        let (_, rows) = trace(&profile, 4);
        assert!(!rows[0].retired);
        assert_eq!(rows[0].contributions, 10_000.0);
        assert_eq!(rows[1].ending_balance, 1_020_000.0);
        assert!(rows[2].retired);
        assert_eq!(rows[2].withdrawal_total, 40_000.0);
    }

    #[test]
    fn survivor_event_scales_spending_and_switches_filing() {
        let mut profile = zero_volatility_profile();
        profile.filing_status = FilingStatus::MarriedFilingJointly;
        profile.spouse = Some(Person {
            current_age: 65,
            retirement_age: 65,
            life_expectancy: 70,
            salary: 0.0,
            social_security: Some(SocialSecurityBenefit {
                annual_benefit_at_fra: 30_000.0,
                claim_age: 62,
            }),
        });
        let (_, rows) = trace(&profile, 8);
        assert!(!rows[4].survivor_event);
        assert!(rows[5].survivor_event);
        assert!(rows.iter().filter(|row| row.survivor_event).count() == 1);
        assert!((rows[5].expenses.spending - 40_000.0 * 0.75).abs() < 1e-6);
        // The user has no benefit of their own and inherits the spouse's.
        assert!(rows[5].income.social_security > 0.0);
        assert_eq!(rows[4].income.social_security, rows[5].income.social_security);
    }

    #[test]
    fn spending_follows_annual_expenses_not_withdrawal_rate() {
        let profile = zero_volatility_profile();
        let mut higher = profile.clone();
        higher.withdrawal_rate = 0.10;
        let (a, rows_a) = trace(&profile, 5);
        let (b, rows_b) = trace(&higher, 5);
        assert_eq!(a, b);
        assert_eq!(rows_a, rows_b);
        assert!((rows_b[0].expenses.spending - 40_000.0).abs() < 1e-6);
    }

    #[test]
    fn claim_adjustment_follows_fra_cohorts() {
        assert_eq!(full_retirement_age_months(1954), 66 * 12);
        assert_eq!(full_retirement_age_months(1955), 66 * 12 + 2);
        assert_eq!(full_retirement_age_months(1960), 67 * 12);
        assert!((claim_adjustment(1960, 62) - 0.70).abs() < 1e-12);
        assert!((claim_adjustment(1960, 67) - 1.0).abs() < 1e-12);
        assert!((claim_adjustment(1960, 70) - 1.24).abs() < 1e-12);
        assert!((claim_adjustment(1960, 75) - 1.24).abs() < 1e-12);
        assert!((claim_adjustment(1955, 66) - (1.0 - 2.0 * 5.0 / 900.0)).abs() < 1e-12);
    }

    #[test]
    fn antithetic_partner_sees_mirrored_market() {
        let profile = sample_profile();
        let mut a = Vec::new();
        let mut b = Vec::new();
        simulate_trial(&profile, 21, 0, true, Some(&mut a)).expect("trial");
        simulate_trial(&profile, 21, 1, true, Some(&mut b)).expect("trial");
        assert_ne!(a[0].portfolio_return, b[0].portfolio_return);
        let mean = 0.06 + 0.12 * 0.12 / 2.0;
        assert!((a[0].portfolio_return + b[0].portfolio_return - 2.0 * mean).abs() < 1e-9);
    }

    #[test]
    fn flat_tax_grosses_up_withdrawals() {
        let mut profile = zero_volatility_profile();
        profile.tax = TaxSetting::Flat { rate: 0.2 };
        profile.buckets = AssetBuckets {
            tax_deferred: 1_000_000.0,
            ..AssetBuckets::default()
        };
        let (_, rows) = trace(&profile, 1);
        assert!((rows[0].withdrawal_total - 50_000.0).abs() < 0.01);
        assert!((rows[0].taxes.total() - 10_000.0).abs() < 0.01);
    }

    fn couple_with_short_lived_spouse() -> HouseholdProfile {
        let mut profile = zero_volatility_profile();
        profile.filing_status = FilingStatus::MarriedFilingJointly;
        profile.spouse = Some(Person {
            current_age: 65,
            retirement_age: 65,
            life_expectancy: 70,
            salary: 0.0,
            social_security: None,
        });
        profile
    }

    #[test]
    fn irmaa_charges_on_salary_from_two_years_earlier() {
        let mut profile = zero_volatility_profile();
        profile.user.current_age = 63;
        profile.user.retirement_age = 65;
        profile.user.salary = 300_000.0;
        let (_, rows) = trace(&profile, 1);
        assert_eq!(rows[0].expenses.irmaa, 0.0);
        assert_eq!(rows[1].expenses.irmaa, 0.0);
        let surcharge = irmaa_surcharge(300_000.0, FilingStatus::Single);
        assert!((surcharge - 5_502.0).abs() < 1e-6);
        assert!(rows[2].retired);
        assert!((rows[2].expenses.irmaa - surcharge).abs() < 1e-6);
        assert!((rows[3].expenses.irmaa - surcharge).abs() < 1e-6);
        // Tax-free withdrawals add nothing to MAGI.
        assert_eq!(rows[4].expenses.irmaa, 0.0);
    }

    #[test]
    fn pension_drops_to_survivor_share_after_first_death() {
        let mut profile = couple_with_short_lived_spouse();
        profile.pension = Some(Pension {
            annual_amount: 20_000.0,
            start_age: 65,
            cola: 0.0,
            survivor_pct: 0.5,
        });
        let (_, rows) = trace(&profile, 6);
        assert_eq!(rows[4].income.pension, 20_000.0);
        assert!(rows[5].survivor_event);
        assert_eq!(rows[5].income.pension, 10_000.0);
        assert_eq!(rows[6].income.pension, 10_000.0);
    }

    #[test]
    fn part_time_income_phases_out_linearly() {
        let mut profile = zero_volatility_profile();
        profile.part_time = Some(PartTimeIncome {
            annual_amount: 10_000.0,
            start_age: 65,
            end_age: 70,
            phase_out_years: 4,
        });
        let (_, rows) = trace(&profile, 2);
        for (row, factor) in rows.iter().zip([1.0, 0.8, 0.6, 0.4, 0.2]) {
            assert!(
                (row.income.part_time - 10_000.0 * factor).abs() < 1e-6,
                "age {}: {}",
                row.age,
                row.income.part_time
            );
        }
        assert_eq!(rows[5].income.part_time, 0.0);
    }

    #[test]
    fn insured_care_pays_premium_every_year() {
        let mut profile = zero_volatility_profile();
        profile.long_term_care = LongTermCare {
            insured: true,
            annual_premium: 3_000.0,
            ..LongTermCare::default()
        };
        let (_, rows) = trace(&profile, 3);
        assert!(rows.iter().all(|row| row.expenses.long_term_care == 3_000.0));
    }

    #[test]
    fn uninsured_care_episode_costs_care_years_once() {
        let mut profile = zero_volatility_profile();
        profile.long_term_care = LongTermCare {
            insured: false,
            annual_premium: 0.0,
            annual_care_cost: 50_000.0,
            onset_age: 80,
            annual_onset_probability: 1.0,
            care_years: 3,
        };
        let (outcome, rows) = trace(&profile, 4);
        assert!(outcome.success);
        for row in &rows {
            let expected = if (80..83).contains(&row.age) { 50_000.0 } else { 0.0 };
            assert_eq!(row.expenses.long_term_care, expected, "age {}", row.age);
        }
    }

    #[test]
    fn survivor_reduction_scales_to_full_retirement_age() {
        assert!((survivor_reduction(1960, 60) - 0.715).abs() < 1e-12);
        assert!((survivor_reduction(1960, 55) - 0.715).abs() < 1e-12);
        assert!((survivor_reduction(1960, 64) - (1.0 - 0.285 * 36.0 / 84.0)).abs() < 1e-12);
        assert_eq!(survivor_reduction(1960, 67), 1.0);
        assert_eq!(survivor_reduction(1950, 66), 1.0);
    }

    #[test]
    fn early_survivor_benefit_is_reduced() {
        let mut profile = zero_volatility_profile();
        profile.filing_status = FilingStatus::MarriedFilingJointly;
        profile.user.current_age = 58; // born 1968
        profile.user.retirement_age = 58;
        profile.spouse = Some(Person {
            current_age: 62, // born 1964
            retirement_age: 62,
            life_expectancy: 64,
            salary: 0.0,
            social_security: Some(SocialSecurityBenefit {
                annual_benefit_at_fra: 30_000.0,
                claim_age: 62,
            }),
        });
        let (_, rows) = trace(&profile, 7);
        assert!((rows[1].income.social_security - 21_000.0).abs() < 1e-6);
        assert!(rows[2].survivor_event);
        // Widowed at 60, so the inherited benefit starts at 71.5%.
        let reduced = 21_000.0 * 0.715;
        assert!((rows[2].income.social_security - reduced).abs() < 1e-6);
        assert!((rows[3].income.social_security - reduced).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn prop_balances_never_negative(seed in 0u64..500) {
            let profile = sample_profile();
            let mut rows = Vec::new();
            let outcome = simulate_trial(&profile, seed, 0, false, Some(&mut rows));
            prop_assert!(outcome.is_ok());
            for row in rows {
                prop_assert!(row.ending_balance >= 0.0);
                for (_, value) in row.ending_balances.iter() {
                    prop_assert!(value >= 0.0);
                }
            }
        }
    }
}
