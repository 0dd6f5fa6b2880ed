use axum::{
    Router,
    extract::{Json, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    AllocationPolicy, AssetBuckets, AssetClassAssumptions, AssetMix, ContributionSchedule,
    FilingStatus, GuardrailConfig, HealthcareCosts, HouseholdProfile, LongTermCare,
    MarketAssumptions, PartTimeIncome, Pension, Person, RegimeModel, SimulationError,
    SimulationOptions, SimulationPool, SimulationResult, SocialSecurityBenefit, TaxSetting,
};

// Payload fallbacks, applied in `normalise`:
//
// | field                  | when absent                                        |
// |------------------------|----------------------------------------------------|
// | currentYear            | this calendar year                                 |
// | currentAge             | 40                                                 |
// | retirementAge          | 65                                                 |
// | lifeExpectancy         | 90                                                 |
// | salary                 | 0                                                  |
// | socialSecurityClaimAge | 67 (benefit only modelled when a benefit is given) |
// | spouse.*               | same defaults as the user                          |
// | taxDeferred            | `assets` when no bucket is given, else 0           |
// | capitalGainsBasis      | the capital-gains balance                          |
// | pension*               | `guaranteedIncome` as a pension starting at        |
// |                        | retirement, COLA = inflation, 100% survivor        |
// | annualExpenses         | withdrawalRate x total assets                      |
// | survivorExpenseRatio   | 0.75                                               |
// | healthcareInflation    | 0.05                                               |
// | expectedReturn         | 0.06 (CAGR)                                        |
// | volatility             | 0.12                                               |
// | inflationRate          | 0.025                                              |
// | inflationVolatility    | 0                                                  |
// | allocation             | 60% stocks, 35% bonds, 5% cash                     |
// | tax                    | flat when `taxRate` is given, else progressive     |
// | filingStatus           | married-filing-jointly with a spouse, else single  |
// | state                  | TX                                                 |
// | withdrawalRate         | 0.04                                               |
// | guardrails             | enabled                                            |
// | trials / seed          | 1000 / 42                                          |
//
// Rates are decimals (0.06 is 6%).

const DEFAULT_CURRENT_AGE: u32 = 40;
const DEFAULT_RETIREMENT_AGE: u32 = 65;
const DEFAULT_LIFE_EXPECTANCY: u32 = 90;
const DEFAULT_CLAIM_AGE: u32 = 67;
const DEFAULT_SURVIVOR_EXPENSE_RATIO: f64 = 0.75;
const DEFAULT_HEALTHCARE_INFLATION: f64 = 0.05;
const DEFAULT_EXPECTED_RETURN: f64 = 0.06;
const DEFAULT_VOLATILITY: f64 = 0.12;
const DEFAULT_INFLATION: f64 = 0.025;
const DEFAULT_STATE: &str = "TX";
const DEFAULT_WITHDRAWAL_RATE: f64 = 0.04;
const DEFAULT_MIX: AssetMix = AssetMix {
    stocks: 0.60,
    bonds: 0.35,
    cash: 0.05,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApiFilingStatus {
    Single,
    #[serde(alias = "marriedFilingJointly", alias = "married_filing_jointly", alias = "mfj")]
    MarriedFilingJointly,
    #[serde(alias = "marriedFilingSeparately", alias = "married_filing_separately", alias = "mfs")]
    MarriedFilingSeparately,
    #[serde(alias = "headOfHousehold", alias = "head_of_household", alias = "hoh")]
    HeadOfHousehold,
}

impl From<ApiFilingStatus> for FilingStatus {
    fn from(value: ApiFilingStatus) -> Self {
        match value {
            ApiFilingStatus::Single => FilingStatus::Single,
            ApiFilingStatus::MarriedFilingJointly => FilingStatus::MarriedFilingJointly,
            ApiFilingStatus::MarriedFilingSeparately => FilingStatus::MarriedFilingSeparately,
            ApiFilingStatus::HeadOfHousehold => FilingStatus::HeadOfHousehold,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersonPayload {
    pub current_age: Option<u32>,
    pub retirement_age: Option<u32>,
    pub life_expectancy: Option<u32>,
    pub salary: Option<f64>,
    pub social_security_benefit: Option<f64>,
    pub social_security_claim_age: Option<u32>,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixPayload {
    pub stocks: f64,
    pub bonds: f64,
    pub cash: f64,
}

impl From<MixPayload> for AssetMix {
    fn from(value: MixPayload) -> Self {
        AssetMix {
            stocks: value.stocks,
            bonds: value.bonds,
            cash: value.cash,
        }
    }
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlidePathPayload {
    pub end: MixPayload,
    pub start_age: u32,
    pub end_age: u32,
}

/// Loose request body shared by `POST /api/simulate` and `firesim simulate`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulatePayload {
    pub current_year: Option<i32>,
    #[serde(flatten)]
    pub user: PersonPayload,
    pub spouse: Option<PersonPayload>,

    pub assets: Option<f64>,
    pub tax_deferred: Option<f64>,
    pub tax_free: Option<f64>,
    pub capital_gains: Option<f64>,
    pub cash_equivalents: Option<f64>,
    pub capital_gains_basis: Option<f64>,

    pub tax_deferred_contribution: Option<f64>,
    pub tax_free_contribution: Option<f64>,
    pub capital_gains_contribution: Option<f64>,
    pub cash_contribution: Option<f64>,
    pub contribution_growth: Option<f64>,

    pub guaranteed_income: Option<f64>,
    pub pension_amount: Option<f64>,
    pub pension_start_age: Option<u32>,
    pub pension_cola: Option<f64>,
    pub pension_survivor_pct: Option<f64>,

    pub part_time_income: Option<f64>,
    pub part_time_start_age: Option<u32>,
    pub part_time_end_age: Option<u32>,
    pub part_time_phase_out_years: Option<u32>,

    pub annual_expenses: Option<f64>,
    pub survivor_expense_ratio: Option<f64>,
    pub healthcare_cost: Option<f64>,
    pub healthcare_inflation: Option<f64>,
    pub ltc_insured: Option<bool>,
    pub ltc_premium: Option<f64>,
    pub ltc_care_cost: Option<f64>,

    pub expected_return: Option<f64>,
    pub volatility: Option<f64>,
    pub inflation_rate: Option<f64>,
    pub inflation_volatility: Option<f64>,
    pub stock_allocation: Option<f64>,
    pub bond_allocation: Option<f64>,
    pub cash_allocation: Option<f64>,
    pub glide_path: Option<GlidePathPayload>,
    pub use_asset_classes: Option<bool>,
    pub use_regimes: Option<bool>,

    pub filing_status: Option<ApiFilingStatus>,
    pub state: Option<String>,
    pub tax_rate: Option<f64>,
    pub withdrawal_rate: Option<f64>,
    pub guardrails: Option<bool>,

    pub trials: Option<u32>,
    pub seed: Option<u64>,
    pub antithetic: Option<bool>,
    pub year_bands: Option<bool>,
    pub include_cash_flows: Option<bool>,
    pub solve_safe_withdrawal_rate: Option<bool>,
    pub swr_target_success: Option<f64>,
}

fn person_from(payload: &PersonPayload) -> Person {
    Person {
        current_age: payload.current_age.unwrap_or(DEFAULT_CURRENT_AGE),
        retirement_age: payload.retirement_age.unwrap_or(DEFAULT_RETIREMENT_AGE),
        life_expectancy: payload.life_expectancy.unwrap_or(DEFAULT_LIFE_EXPECTANCY),
        salary: payload.salary.unwrap_or(0.0),
        social_security: payload
            .social_security_benefit
            .map(|annual_benefit_at_fra| SocialSecurityBenefit {
                annual_benefit_at_fra,
                claim_age: payload.social_security_claim_age.unwrap_or(DEFAULT_CLAIM_AGE),
            }),
    }
}

/// Turns a loose payload into a typed profile plus run options. Range checks
/// happen later, in one pass, when the profile is validated.
pub fn normalise(payload: &SimulatePayload, current_year: i32) -> (HouseholdProfile, SimulationOptions) {
    let user = person_from(&payload.user);
    let spouse = payload.spouse.as_ref().map(person_from);

    let any_bucket = payload.tax_deferred.is_some()
        || payload.tax_free.is_some()
        || payload.capital_gains.is_some()
        || payload.cash_equivalents.is_some();
    let buckets = AssetBuckets {
        tax_deferred: payload
            .tax_deferred
            .unwrap_or(if any_bucket { 0.0 } else { payload.assets.unwrap_or(0.0) }),
        tax_free: payload.tax_free.unwrap_or(0.0),
        capital_gains: payload.capital_gains.unwrap_or(0.0),
        cash_equivalents: payload.cash_equivalents.unwrap_or(0.0),
    };

    let inflation_rate = payload.inflation_rate.unwrap_or(DEFAULT_INFLATION);
    let withdrawal_rate = payload.withdrawal_rate.unwrap_or(DEFAULT_WITHDRAWAL_RATE);

    let pension = payload
        .pension_amount
        .or(payload.guaranteed_income)
        .map(|annual_amount| Pension {
            annual_amount,
            start_age: payload.pension_start_age.unwrap_or(user.retirement_age),
            cola: payload.pension_cola.unwrap_or(inflation_rate),
            survivor_pct: payload.pension_survivor_pct.unwrap_or(1.0),
        });

    let part_time = payload.part_time_income.map(|annual_amount| {
        let start_age = payload.part_time_start_age.unwrap_or(user.retirement_age);
        PartTimeIncome {
            annual_amount,
            start_age,
            end_age: payload.part_time_end_age.unwrap_or(start_age + 5),
            phase_out_years: payload.part_time_phase_out_years.unwrap_or(0),
        }
    });

    let long_term_care = LongTermCare {
        insured: payload.ltc_insured.unwrap_or(false),
        annual_premium: payload.ltc_premium.unwrap_or(0.0),
        annual_care_cost: payload.ltc_care_cost.unwrap_or(0.0),
        ..LongTermCare::default()
    };

    let mix = if payload.stock_allocation.is_some()
        || payload.bond_allocation.is_some()
        || payload.cash_allocation.is_some()
    {
        AssetMix {
            stocks: payload.stock_allocation.unwrap_or(0.0),
            bonds: payload.bond_allocation.unwrap_or(0.0),
            cash: payload.cash_allocation.unwrap_or(0.0),
        }
    } else {
        DEFAULT_MIX
    };
    let allocation = match payload.glide_path {
        Some(glide) => AllocationPolicy::GlidePath {
            start: mix,
            end: glide.end.into(),
            start_age: glide.start_age,
            end_age: glide.end_age,
        },
        None => AllocationPolicy::Fixed(mix),
    };

    let tax = match payload.tax_rate {
        Some(rate) => TaxSetting::Flat { rate },
        None => TaxSetting::Progressive {
            state: payload
                .state
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(DEFAULT_STATE)
                .to_ascii_uppercase(),
        },
    };
    let filing_status = payload.filing_status.map(FilingStatus::from).unwrap_or(
        if spouse.is_some() {
            FilingStatus::MarriedFilingJointly
        } else {
            FilingStatus::Single
        },
    );

    let profile = HouseholdProfile {
        current_year: payload.current_year.unwrap_or(current_year),
        user,
        spouse,
        buckets,
        capital_gains_basis: payload.capital_gains_basis.unwrap_or(buckets.capital_gains),
        contributions: ContributionSchedule {
            tax_deferred: payload.tax_deferred_contribution.unwrap_or(0.0),
            tax_free: payload.tax_free_contribution.unwrap_or(0.0),
            capital_gains: payload.capital_gains_contribution.unwrap_or(0.0),
            cash_equivalents: payload.cash_contribution.unwrap_or(0.0),
            growth_rate: payload.contribution_growth.unwrap_or(0.0),
        },
        pension,
        part_time,
        annual_expenses: payload
            .annual_expenses
            .unwrap_or(withdrawal_rate * buckets.total()),
        survivor_expense_ratio: payload
            .survivor_expense_ratio
            .unwrap_or(DEFAULT_SURVIVOR_EXPENSE_RATIO),
        healthcare: HealthcareCosts {
            annual_cost: payload.healthcare_cost.unwrap_or(0.0),
            inflation_rate: payload
                .healthcare_inflation
                .unwrap_or(DEFAULT_HEALTHCARE_INFLATION),
        },
        long_term_care,
        market: MarketAssumptions {
            expected_return: payload.expected_return.unwrap_or(DEFAULT_EXPECTED_RETURN),
            volatility: payload.volatility.unwrap_or(DEFAULT_VOLATILITY),
            inflation_rate,
            inflation_volatility: payload.inflation_volatility.unwrap_or(0.0),
            allocation,
            asset_classes: payload
                .use_asset_classes
                .unwrap_or(false)
                .then(AssetClassAssumptions::default),
            regimes: payload.use_regimes.unwrap_or(false).then(RegimeModel::default),
        },
        filing_status,
        tax,
        withdrawal_rate,
        guardrails: GuardrailConfig {
            enabled: payload.guardrails.unwrap_or(true),
            ..GuardrailConfig::default()
        },
    };

    let defaults = SimulationOptions::default();
    let options = SimulationOptions {
        trials: payload.trials.unwrap_or(defaults.trials),
        seed: payload.seed.unwrap_or(defaults.seed),
        antithetic: payload.antithetic.unwrap_or(defaults.antithetic),
        year_bands: payload.year_bands.unwrap_or(defaults.year_bands),
        include_cash_flows: payload
            .include_cash_flows
            .unwrap_or(defaults.include_cash_flows),
        solve_safe_withdrawal_rate: payload
            .solve_safe_withdrawal_rate
            .unwrap_or(defaults.solve_safe_withdrawal_rate),
        swr_target_success: payload
            .swr_target_success
            .unwrap_or(defaults.swr_target_success),
        ..defaults
    };

    (profile, options)
}

pub fn current_year() -> i32 {
    chrono::Utc::now().year()
}

/// The one place a 0-1 probability becomes a percent string.
pub fn format_probability(p: f64) -> String {
    format!("{:.1}%", p.clamp(0.0, 1.0) * 100.0)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateResponse {
    #[serde(flatten)]
    pub result: SimulationResult,
    pub probability_of_success_display: String,
}

impl From<SimulationResult> for SimulateResponse {
    fn from(result: SimulationResult) -> Self {
        Self {
            probability_of_success_display: format_probability(result.probability_of_success),
            result,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FieldErrorResponse {
    field: String,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: String,
    field_errors: Vec<FieldErrorResponse>,
}

#[derive(Clone)]
struct AppState {
    pool: SimulationPool,
}

pub fn router(pool: SimulationPool) -> Router {
    Router::new()
        .route("/api/simulate", post(simulate_handler))
        .route("/healthz", get(health_handler))
        .fallback(not_found_handler)
        .with_state(AppState { pool })
}

pub async fn run_http_server(port: u16, threads: Option<usize>) -> std::io::Result<()> {
    let pool = SimulationPool::new(threads).map_err(std::io::Error::other)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, threads = pool.threads(), "firesim HTTP API listening");

    axum::serve(listener, router(pool)).await
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found".to_string(), Vec::new())
}

async fn simulate_handler(
    State(state): State<AppState>,
    payload: Result<Json<SimulatePayload>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "rejected simulate payload");
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text(), Vec::new());
        }
    };

    let (profile, options) = normalise(&payload, current_year());
    info!(trials = options.trials, seed = options.seed, "simulate request");

    match state.pool.submit(profile, options).await {
        Ok(result) => json_response(StatusCode::OK, SimulateResponse::from(result)),
        Err(err) => simulation_error_response(err),
    }
}

fn simulation_error_response(err: SimulationError) -> Response {
    match err {
        SimulationError::Validation(validation) => {
            warn!(issues = validation.errors.len(), "invalid household profile");
            let field_errors = validation
                .errors
                .iter()
                .map(|e| FieldErrorResponse {
                    field: e.field.clone(),
                    message: e.issue.to_string(),
                })
                .collect();
            error_response(StatusCode::BAD_REQUEST, validation.to_string(), field_errors)
        }
        SimulationError::Cancelled => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string(), Vec::new())
        }
        SimulationError::Computation(_) | SimulationError::WorkerLost => {
            tracing::error!(error = %err, "simulation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string(), Vec::new())
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, error: String, field_errors: Vec<FieldErrorResponse>) -> Response {
    json_response(
        status,
        ErrorResponse {
            error,
            field_errors,
        },
    )
}
