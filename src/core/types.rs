use serde::Serialize;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilingStatus {
    Single,
    MarriedFilingJointly,
    MarriedFilingSeparately,
    HeadOfHousehold,
}

impl FilingStatus {
    pub fn is_joint(self) -> bool {
        self == FilingStatus::MarriedFilingJointly
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bucket {
    CashEquivalents,
    CapitalGains,
    TaxDeferred,
    TaxFree,
}

pub const WITHDRAWAL_ORDER: [Bucket; 4] = [
    Bucket::CashEquivalents,
    Bucket::CapitalGains,
    Bucket::TaxDeferred,
    Bucket::TaxFree,
];

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetBuckets {
    pub tax_deferred: f64,
    pub tax_free: f64,
    pub capital_gains: f64,
    pub cash_equivalents: f64,
}

impl AssetBuckets {
    pub fn total(&self) -> f64 {
        self.tax_deferred + self.tax_free + self.capital_gains + self.cash_equivalents
    }

    pub fn get(&self, bucket: Bucket) -> f64 {
        match bucket {
            Bucket::TaxDeferred => self.tax_deferred,
            Bucket::TaxFree => self.tax_free,
            Bucket::CapitalGains => self.capital_gains,
            Bucket::CashEquivalents => self.cash_equivalents,
        }
    }

    pub fn get_mut(&mut self, bucket: Bucket) -> &mut f64 {
        match bucket {
            Bucket::TaxDeferred => &mut self.tax_deferred,
            Bucket::TaxFree => &mut self.tax_free,
            Bucket::CapitalGains => &mut self.capital_gains,
            Bucket::CashEquivalents => &mut self.cash_equivalents,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Bucket, f64)> + '_ {
        WITHDRAWAL_ORDER.iter().map(move |b| (*b, self.get(*b)))
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            tax_deferred: self.tax_deferred * factor,
            tax_free: self.tax_free * factor,
            capital_gains: self.capital_gains * factor,
            cash_equivalents: self.cash_equivalents * factor,
        }
    }

    pub fn floor_at_zero(&mut self) {
        for bucket in WITHDRAWAL_ORDER {
            let v = self.get_mut(bucket);
            if *v < 0.0 {
                *v = 0.0;
            }
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SocialSecurityBenefit {
    /// Annual benefit at full retirement age, today's dollars.
    pub annual_benefit_at_fra: f64,
    pub claim_age: u32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Person {
    pub current_age: u32,
    pub retirement_age: u32,
    pub life_expectancy: u32,
    /// Salary in today's dollars; only counted as income once the household is
    /// retired and this person is still working.
    pub salary: f64,
    pub social_security: Option<SocialSecurityBenefit>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Pension {
    /// Nominal annual amount in the first payment year.
    pub annual_amount: f64,
    pub start_age: u32,
    pub cola: f64,
    pub survivor_pct: f64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PartTimeIncome {
    /// Annual amount in today's dollars.
    pub annual_amount: f64,
    pub start_age: u32,
    pub end_age: u32,
    pub phase_out_years: u32,
}

impl PartTimeIncome {
    /// Share of the full amount earned at `age` (0 outside the working window).
    pub fn phase_factor(&self, age: u32) -> f64 {
        if age < self.start_age || age >= self.end_age {
            return 0.0;
        }
        let years_left = (self.end_age - age) as f64;
        (years_left / (self.phase_out_years as f64 + 1.0)).min(1.0)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ContributionSchedule {
    pub tax_deferred: f64,
    pub tax_free: f64,
    pub capital_gains: f64,
    pub cash_equivalents: f64,
    pub growth_rate: f64,
}

impl ContributionSchedule {
    pub fn as_buckets(&self) -> AssetBuckets {
        AssetBuckets {
            tax_deferred: self.tax_deferred.max(0.0),
            tax_free: self.tax_free.max(0.0),
            capital_gains: self.capital_gains.max(0.0),
            cash_equivalents: self.cash_equivalents.max(0.0),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HealthcareCosts {
    /// Household annual cost in today's dollars while both members are alive.
    pub annual_cost: f64,
    pub inflation_rate: f64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LongTermCare {
    pub insured: bool,
    /// Annual premium in today's dollars, paid while insured and not in care.
    pub annual_premium: f64,
    /// Annual uninsured care cost in today's dollars; 0 disables care events.
    pub annual_care_cost: f64,
    pub onset_age: u32,
    pub annual_onset_probability: f64,
    pub care_years: u32,
}

impl Default for LongTermCare {
    fn default() -> Self {
        Self {
            insured: false,
            annual_premium: 0.0,
            annual_care_cost: 0.0,
            onset_age: 80,
            annual_onset_probability: 0.03,
            care_years: 3,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMix {
    pub stocks: f64,
    pub bonds: f64,
    pub cash: f64,
}

impl AssetMix {
    pub fn sum(&self) -> f64 {
        self.stocks + self.bonds + self.cash
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.stocks, self.bonds, self.cash]
    }

    fn lerp(&self, other: &AssetMix, t: f64) -> AssetMix {
        AssetMix {
            stocks: self.stocks + (other.stocks - self.stocks) * t,
            bonds: self.bonds + (other.bonds - self.bonds) * t,
            cash: self.cash + (other.cash - self.cash) * t,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum AllocationPolicy {
    Fixed(AssetMix),
    GlidePath {
        start: AssetMix,
        end: AssetMix,
        start_age: u32,
        end_age: u32,
    },
}

impl AllocationPolicy {
    pub fn weights_at(&self, age: u32) -> AssetMix {
        match *self {
            AllocationPolicy::Fixed(mix) => mix,
            AllocationPolicy::GlidePath {
                start,
                end,
                start_age,
                end_age,
            } => {
                if age <= start_age || end_age <= start_age {
                    return if age >= end_age { end } else { start };
                }
                if age >= end_age {
                    return end;
                }
                let t = (age - start_age) as f64 / (end_age - start_age) as f64;
                start.lerp(&end, t)
            }
        }
    }

    pub fn anchor_mixes(&self) -> Vec<AssetMix> {
        match *self {
            AllocationPolicy::Fixed(mix) => vec![mix],
            AllocationPolicy::GlidePath { start, end, .. } => vec![start, end],
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClassAssumption {
    /// Geometric mean annual return.
    pub cagr: f64,
    pub volatility: f64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AssetClassAssumptions {
    pub stocks: ClassAssumption,
    pub bonds: ClassAssumption,
    pub cash: ClassAssumption,
    /// Correlation matrix in stocks/bonds/cash order.
    pub correlation: [[f64; 3]; 3],
}

impl Default for AssetClassAssumptions {
    fn default() -> Self {
        Self {
            stocks: ClassAssumption {
                cagr: 0.07,
                volatility: 0.17,
            },
            bonds: ClassAssumption {
                cagr: 0.035,
                volatility: 0.06,
            },
            cash: ClassAssumption {
                cagr: 0.02,
                volatility: 0.01,
            },
            correlation: [[1.0, 0.1, 0.0], [0.1, 1.0, 0.2], [0.0, 0.2, 1.0]],
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketRegime {
    Bull,
    Normal,
    Bear,
    Crisis,
}

impl MarketRegime {
    pub const ALL: [MarketRegime; 4] = [
        MarketRegime::Bull,
        MarketRegime::Normal,
        MarketRegime::Bear,
        MarketRegime::Crisis,
    ];

    pub fn index(self) -> usize {
        match self {
            MarketRegime::Bull => 0,
            MarketRegime::Normal => 1,
            MarketRegime::Bear => 2,
            MarketRegime::Crisis => 3,
        }
    }

    pub fn is_adverse(self) -> bool {
        matches!(self, MarketRegime::Bear | MarketRegime::Crisis)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RegimeParams {
    pub mean_shift: f64,
    pub volatility_multiplier: f64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RegimeModel {
    /// Row = current regime, column = next regime, in `MarketRegime::ALL` order.
    pub transitions: [[f64; 4]; 4],
    pub params: [RegimeParams; 4],
    pub initial: MarketRegime,
    pub sequence_risk_years: u32,
    pub sequence_risk_multiplier: f64,
}

impl Default for RegimeModel {
    fn default() -> Self {
        Self {
            transitions: [
                [0.70, 0.25, 0.04, 0.01],
                [0.15, 0.70, 0.12, 0.03],
                [0.10, 0.45, 0.40, 0.05],
                [0.20, 0.40, 0.25, 0.15],
            ],
            params: [
                RegimeParams {
                    mean_shift: 0.04,
                    volatility_multiplier: 0.8,
                },
                RegimeParams {
                    mean_shift: 0.0,
                    volatility_multiplier: 1.0,
                },
                RegimeParams {
                    mean_shift: -0.08,
                    volatility_multiplier: 1.3,
                },
                RegimeParams {
                    mean_shift: -0.20,
                    volatility_multiplier: 1.8,
                },
            ],
            initial: MarketRegime::Normal,
            sequence_risk_years: 5,
            sequence_risk_multiplier: 1.5,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MarketAssumptions {
    pub expected_return: f64,
    pub volatility: f64,
    pub inflation_rate: f64,
    pub inflation_volatility: f64,
    pub allocation: AllocationPolicy,
    pub asset_classes: Option<AssetClassAssumptions>,
    pub regimes: Option<RegimeModel>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TaxSetting {
    Flat { rate: f64 },
    Progressive { state: String },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GuardrailConfig {
    pub enabled: bool,
    pub upper_threshold: f64,
    pub lower_threshold: f64,
    pub cut: f64,
    pub raise: f64,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            upper_threshold: 1.2,
            lower_threshold: 0.8,
            cut: 0.10,
            raise: 0.10,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HouseholdProfile {
    pub current_year: i32,
    pub user: Person,
    pub spouse: Option<Person>,
    pub buckets: AssetBuckets,
    pub capital_gains_basis: f64,
    pub contributions: ContributionSchedule,
    pub pension: Option<Pension>,
    pub part_time: Option<PartTimeIncome>,
    /// Base annual spending in today's dollars, excluding healthcare.
    pub annual_expenses: f64,
    pub survivor_expense_ratio: f64,
    pub healthcare: HealthcareCosts,
    pub long_term_care: LongTermCare,
    pub market: MarketAssumptions,
    pub filing_status: FilingStatus,
    pub tax: TaxSetting,
    /// Rate `annual_expenses` was derived from. Only validated; the year loop
    /// spends `annual_expenses`.
    pub withdrawal_rate: f64,
    pub guardrails: GuardrailConfig,
}

impl HouseholdProfile {
    pub fn birth_year(&self) -> i32 {
        self.current_year - self.user.current_age as i32
    }

    pub fn spouse_birth_year(&self) -> Option<i32> {
        self.spouse
            .as_ref()
            .map(|s| self.current_year - s.current_age as i32)
    }

    pub fn horizon_years(&self) -> u32 {
        let user = self
            .user
            .life_expectancy
            .saturating_sub(self.user.current_age);
        let spouse = self
            .spouse
            .as_ref()
            .map(|s| s.life_expectancy.saturating_sub(s.current_age))
            .unwrap_or(0);
        user.max(spouse)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GuardrailAdjustment {
    CapitalPreservation,
    Prosperity,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeBreakdown {
    pub salary: f64,
    pub social_security: f64,
    pub pension: f64,
    pub part_time: f64,
}

impl IncomeBreakdown {
    pub fn total(&self) -> f64 {
        self.salary + self.social_security + self.pension + self.part_time
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseBreakdown {
    pub spending: f64,
    pub healthcare: f64,
    pub irmaa: f64,
    pub long_term_care: f64,
}

impl ExpenseBreakdown {
    pub fn total(&self) -> f64 {
        self.spending + self.healthcare + self.irmaa + self.long_term_care
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBreakdown {
    pub federal: f64,
    pub state: f64,
    pub capital_gains: f64,
    /// Modified adjusted gross income, used for IRMAA two years later.
    pub magi: f64,
}

impl TaxBreakdown {
    pub fn total(&self) -> f64 {
        self.federal + self.state + self.capital_gains
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            federal: self.federal * factor,
            state: self.state * factor,
            capital_gains: self.capital_gains * factor,
            magi: self.magi * factor,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyCashFlow {
    pub year_index: u32,
    pub age: u32,
    pub spouse_age: Option<u32>,
    pub retired: bool,
    pub income: IncomeBreakdown,
    pub contributions: f64,
    pub expenses: ExpenseBreakdown,
    pub rmd: f64,
    pub withdrawals: AssetBuckets,
    pub withdrawal_total: f64,
    pub reinvested: f64,
    pub taxes: TaxBreakdown,
    pub portfolio_return: f64,
    pub inflation: f64,
    pub price_index: f64,
    pub ending_balances: AssetBuckets,
    pub ending_balance: f64,
    pub guardrail: Option<GuardrailAdjustment>,
    pub inflation_skipped: bool,
    pub market_regime: Option<MarketRegime>,
    pub survivor_event: bool,
    pub depleted: bool,
}

impl YearlyCashFlow {
    pub fn net_withdrawal(&self) -> f64 {
        self.withdrawal_total - self.reinvested
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
pub struct PercentileSet {
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearPercentileBand {
    pub year_index: u32,
    pub age: u32,
    pub balance: PercentileSet,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepletionSummary {
    pub depleted_trials: u32,
    pub years: Option<PercentileSet>,
    pub ages: Option<PercentileSet>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StatisticalWarning {
    ClampedDraws { count: u64 },
    SmallSample { trials: u32 },
    Input { field: String, message: String },
    SafeWithdrawalUnresolved { message: String },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub antithetic: bool,
    pub clamped_draws: u64,
    pub success_ci_half_width: f64,
    pub warnings: Vec<StatisticalWarning>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub probability_of_success: f64,
    pub trials: u32,
    pub seed: u64,
    /// Ending balances in today's dollars.
    pub ending_balance: PercentileSet,
    pub yearly_bands: Vec<YearPercentileBand>,
    pub years_until_depletion: Option<f64>,
    pub depletion: DepletionSummary,
    pub safe_withdrawal_rate: Option<f64>,
    pub yearly_cash_flows: Option<Vec<YearlyCashFlow>>,
    pub metadata: ResultMetadata,
}

impl SimulationResult {
    pub fn median_ending_balance(&self) -> f64 {
        self.ending_balance.p50
    }
}
