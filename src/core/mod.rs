mod aggregate;
mod engine;
mod error;
mod guardrails;
mod pool;
mod returns;
mod rmd;
mod solver;
mod tax;
mod types;
mod validate;
mod withdrawal;

#[cfg(test)]
pub(crate) mod test_support;

pub use aggregate::{
    SimulationOptions, percentile, percentile_set, run_simulation, run_simulation_with_cancel,
};
pub use engine::{ScenarioRunner, TrialOutcome, simulate_trial, trial_rngs};
pub use error::{ComputationError, FieldError, FieldIssue, SimulationError, ValidationError};
pub use guardrails::{GuardrailDecision, GuardrailEvent, GuardrailPolicy, GuardrailState};
pub use pool::{CancellationToken, SimulationHandle, SimulationPool};
pub use returns::{RandomSource, ReturnGenerator, Rng, aagr_to_cagr, cagr_to_aagr, derive_seed};
pub use rmd::{required_minimum_distribution, rmd_start_age};
pub use solver::{
    SafeWithdrawalConfig, SafeWithdrawalIteration, SafeWithdrawalResult,
    solve_safe_withdrawal_rate,
};
pub use tax::{
    TaxContext, TaxableIncome, capital_gains_tax, federal_tax, household_tax, irmaa_surcharge,
    is_known_state, standard_deduction, state_tax, taxable_social_security,
};
pub use types::{
    AllocationPolicy, AssetBuckets, AssetClassAssumptions, AssetMix, Bucket, ContributionSchedule,
    FilingStatus, GuardrailConfig, HealthcareCosts, HouseholdProfile, LongTermCare,
    MarketAssumptions, MarketRegime, PartTimeIncome, Pension, Person, PercentileSet, RegimeModel,
    SimulationResult, SocialSecurityBenefit, StatisticalWarning, TaxSetting, YearlyCashFlow,
};
pub use validate::validate_profile;
pub use withdrawal::{WithdrawalPlan, WithdrawalRequest, plan_withdrawals};
