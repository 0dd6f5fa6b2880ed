use std::time::Instant;

use rayon::prelude::*;
use tracing::{info, warn};

use super::engine::{ScenarioRunner, TrialOutcome, simulate_trial, trial_rngs};
use super::error::SimulationError;
use super::pool::CancellationToken;
use super::solver::{SafeWithdrawalConfig, binomial_ci_half_width, solve_safe_withdrawal_rate};
use super::types::{
    DepletionSummary, HouseholdProfile, PercentileSet, ResultMetadata, SimulationResult,
    StatisticalWarning, YearPercentileBand,
};
use super::validate::validate_profile;

/// Below this many trials the success estimate is flagged as noisy.
const SMALL_SAMPLE: u32 = 100;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SimulationOptions {
    pub trials: u32,
    pub seed: u64,
    pub antithetic: bool,
    pub parallel: bool,
    pub year_bands: bool,
    pub include_cash_flows: bool,
    pub solve_safe_withdrawal_rate: bool,
    pub swr_target_success: f64,
    pub swr_trials: u32,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            trials: 1_000,
            seed: 42,
            antithetic: false,
            parallel: true,
            year_bands: true,
            include_cash_flows: false,
            solve_safe_withdrawal_rate: true,
            swr_target_success: 0.90,
            swr_trials: 250,
        }
    }
}

pub fn run_simulation(
    profile: &HouseholdProfile,
    options: &SimulationOptions,
) -> Result<SimulationResult, SimulationError> {
    run_simulation_with_cancel(profile, options, &CancellationToken::new())
}

/// Validates the profile, runs every trial and aggregates. Either the whole
/// result comes back or an error does.
pub fn run_simulation_with_cancel(
    profile: &HouseholdProfile,
    options: &SimulationOptions,
    cancel: &CancellationToken,
) -> Result<SimulationResult, SimulationError> {
    let input_warnings = validate_profile(profile, options.trials)?;
    for warning in &input_warnings {
        if let StatisticalWarning::Input { field, message } = warning {
            warn!(field = %field, "{message}");
        }
    }

    let started = Instant::now();
    info!(
        trials = options.trials,
        seed = options.seed,
        antithetic = options.antithetic,
        "simulation started"
    );

    let outcomes = run_trials(
        profile,
        options.seed,
        options.trials,
        options.antithetic,
        options.parallel,
        cancel,
    )?;

    let mut result = summarise(profile, options, &outcomes);
    let mut warnings = input_warnings;
    warnings.append(&mut result.metadata.warnings);
    result.metadata.warnings = warnings;

    if options.include_cash_flows {
        let representative = median_trial(&outcomes);
        let mut rows = Vec::with_capacity(outcomes.first().map_or(0, |o| o.yearly_balances.len()));
        simulate_trial(profile, options.seed, representative, options.antithetic, Some(&mut rows))?;
        result.yearly_cash_flows = Some(rows);
    }

    if options.solve_safe_withdrawal_rate {
        if profile.buckets.total() > 0.0 {
            let solved = solve_safe_withdrawal_rate(
                profile,
                &SafeWithdrawalConfig {
                    target_success: options.swr_target_success,
                    trials: options.swr_trials,
                    seed: options.seed,
                    antithetic: options.antithetic,
                    parallel: options.parallel,
                    ..SafeWithdrawalConfig::default()
                },
                cancel,
            )?;
            if solved.rate.is_none() || !solved.converged {
                result
                    .metadata
                    .warnings
                    .push(StatisticalWarning::SafeWithdrawalUnresolved {
                        message: solved.message.clone(),
                    });
            }
            result.safe_withdrawal_rate = solved.rate;
        } else {
            result
                .metadata
                .warnings
                .push(StatisticalWarning::SafeWithdrawalUnresolved {
                    message: "no assets to withdraw from".to_string(),
                });
        }
    }

    info!(
        probability_of_success = result.probability_of_success,
        median_ending_balance = result.median_ending_balance(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "simulation finished"
    );
    Ok(result)
}

/// Runs `trials` trials in trial order. Cancellation is checked before each
/// trial starts.
pub(crate) fn run_trials(
    profile: &HouseholdProfile,
    seed: u64,
    trials: u32,
    antithetic: bool,
    parallel: bool,
    cancel: &CancellationToken,
) -> Result<Vec<TrialOutcome>, SimulationError> {
    if cancel.is_cancelled() {
        return Err(SimulationError::Cancelled);
    }
    let runner = ScenarioRunner::new(profile);
    let run_one = |trial: u32| -> Result<TrialOutcome, SimulationError> {
        if cancel.is_cancelled() {
            return Err(SimulationError::Cancelled);
        }
        let (mut market, mut events) = trial_rngs(seed, trial, antithetic);
        Ok(runner.run(trial, &mut market, &mut events, None)?)
    };

    if parallel {
        (0..trials).into_par_iter().map(run_one).collect()
    } else {
        (0..trials).map(run_one).collect()
    }
}

fn summarise(
    profile: &HouseholdProfile,
    options: &SimulationOptions,
    outcomes: &[TrialOutcome],
) -> SimulationResult {
    let n = outcomes.len() as u32;
    let successes = outcomes.iter().filter(|o| o.success).count() as u32;
    let probability = if n == 0 {
        0.0
    } else {
        successes as f64 / n as f64
    };

    let mut endings: Vec<f64> = outcomes.iter().map(|o| o.ending_balance).collect();
    let ending_balance = percentile_set(&mut endings);

    let yearly_bands = if options.year_bands {
        year_bands(profile, outcomes)
    } else {
        Vec::new()
    };

    let mut depletion_years: Vec<f64> = outcomes
        .iter()
        .filter_map(|o| o.depletion_year.map(f64::from))
        .collect();
    let mut depletion_ages: Vec<f64> = outcomes
        .iter()
        .filter_map(|o| o.depletion_age.map(f64::from))
        .collect();
    let years_until_depletion =
        (!depletion_years.is_empty()).then(|| percentile(&mut depletion_years, 50.0));
    let depletion = DepletionSummary {
        depleted_trials: depletion_years.len() as u32,
        years: (!depletion_years.is_empty()).then(|| percentile_set(&mut depletion_years)),
        ages: (!depletion_ages.is_empty()).then(|| percentile_set(&mut depletion_ages)),
    };

    let clamped_draws: u64 = outcomes.iter().map(|o| o.clamped_draws as u64).sum();
    let mut warnings = Vec::new();
    if clamped_draws > 0 {
        warnings.push(StatisticalWarning::ClampedDraws {
            count: clamped_draws,
        });
    }
    if n < SMALL_SAMPLE {
        warnings.push(StatisticalWarning::SmallSample { trials: n });
    }

    SimulationResult {
        probability_of_success: probability,
        trials: n,
        seed: options.seed,
        ending_balance,
        yearly_bands,
        years_until_depletion,
        depletion,
        safe_withdrawal_rate: None,
        yearly_cash_flows: None,
        metadata: ResultMetadata {
            antithetic: options.antithetic,
            clamped_draws,
            success_ci_half_width: binomial_ci_half_width(probability, n),
            warnings,
        },
    }
}

fn year_bands(profile: &HouseholdProfile, outcomes: &[TrialOutcome]) -> Vec<YearPercentileBand> {
    let years = outcomes
        .iter()
        .map(|o| o.yearly_balances.len())
        .max()
        .unwrap_or(0);
    let mut column = Vec::with_capacity(outcomes.len());
    (0..years)
        .map(|idx| {
            column.clear();
            column.extend(
                outcomes
                    .iter()
                    .map(|o| o.yearly_balances.get(idx).copied().unwrap_or(0.0)),
            );
            YearPercentileBand {
                year_index: idx as u32,
                age: profile.user.current_age + idx as u32,
                balance: percentile_set(&mut column),
            }
        })
        .collect()
}

/// Trial whose ending balance sits at the median rank (lower median for even N).
fn median_trial(outcomes: &[TrialOutcome]) -> u32 {
    let mut ranked: Vec<&TrialOutcome> = outcomes.iter().collect();
    ranked.sort_by(|a, b| {
        a.ending_balance
            .total_cmp(&b.ending_balance)
            .then(a.trial.cmp(&b.trial))
    });
    ranked
        .get(ranked.len().saturating_sub(1) / 2)
        .map_or(0, |o| o.trial)
}

pub fn percentile_set(values: &mut [f64]) -> PercentileSet {
    PercentileSet {
        p10: percentile(values, 10.0),
        p25: percentile(values, 25.0),
        p50: percentile(values, 50.0),
        p75: percentile(values, 75.0),
        p90: percentile(values, 90.0),
    }
}

/// Linear interpolation between closest ranks. Sorts `values` in place.
pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
