use tracing::debug;

use super::aggregate::run_trials;
use super::error::SimulationError;
use super::pool::CancellationToken;
use super::types::HouseholdProfile;
use super::validate::validate_profile;

#[derive(Debug, Clone, Copy)]
pub struct SafeWithdrawalConfig {
    pub target_success: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    /// Trials per candidate rate. Every candidate reuses `seed`.
    pub trials: u32,
    pub seed: u64,
    pub antithetic: bool,
    pub parallel: bool,
}

impl Default for SafeWithdrawalConfig {
    fn default() -> Self {
        Self {
            target_success: 0.90,
            search_min: 0.01,
            search_max: 0.15,
            tolerance: 0.0005,
            max_iterations: 20,
            trials: 250,
            seed: 42,
            antithetic: false,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SafeWithdrawalIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_rate: f64,
    pub success_rate: f64,
    pub success_ci_half_width: f64,
}

#[derive(Debug, Clone)]
pub struct SafeWithdrawalResult {
    /// Highest initial rate meeting the target, `None` when even the lower
    /// bound misses it.
    pub rate: Option<f64>,
    pub achieved_success: Option<f64>,
    pub success_ci_half_width: Option<f64>,
    pub iterations: Vec<SafeWithdrawalIteration>,
    pub converged: bool,
    pub feasible: bool,
    pub message: String,
}

/// Bisects on the initial withdrawal rate. Each candidate spends
/// `rate x total assets` in the first year and grows it with inflation.
pub fn solve_safe_withdrawal_rate(
    profile: &HouseholdProfile,
    config: &SafeWithdrawalConfig,
    cancel: &CancellationToken,
) -> Result<SafeWithdrawalResult, SimulationError> {
    validate_profile(profile, config.trials)?;

    let evaluate = |rate: f64| -> Result<CandidateEval, SimulationError> {
        let candidate = with_rate(profile, rate);
        let trials = config.trials.max(1);
        let outcomes = run_trials(
            &candidate,
            config.seed,
            trials,
            config.antithetic,
            config.parallel,
            cancel,
        )?;
        let successes = outcomes.iter().filter(|o| o.success).count();
        let success_rate = successes as f64 / trials as f64;
        Ok(CandidateEval {
            success_rate,
            success_ci_half_width: binomial_ci_half_width(success_rate, trials),
        })
    };

    let meets = |eval: &CandidateEval| eval.success_rate + 1e-12 >= config.target_success;

    let mut iterations = Vec::with_capacity(config.max_iterations as usize);
    let low_eval = evaluate(config.search_min)?;
    if !meets(&low_eval) {
        return Ok(SafeWithdrawalResult {
            rate: None,
            achieved_success: None,
            success_ci_half_width: None,
            iterations,
            converged: false,
            feasible: false,
            message: "No sustainable withdrawal rate found within the search bounds.".to_string(),
        });
    }

    let high_eval = evaluate(config.search_max)?;
    if meets(&high_eval) {
        return Ok(SafeWithdrawalResult {
            rate: Some(config.search_max),
            achieved_success: Some(high_eval.success_rate),
            success_ci_half_width: Some(high_eval.success_ci_half_width),
            iterations,
            converged: true,
            feasible: true,
            message: "Upper rate bound is still sustainable; increase search max for a higher rate."
                .to_string(),
        });
    }

    let mut lo = config.search_min;
    let mut hi = config.search_max;
    let mut best = low_eval;
    let mut converged = false;
    let mut it = 0;
    while it < config.max_iterations {
        it += 1;
        let mid = (lo + hi) * 0.5;
        let eval = evaluate(mid)?;
        iterations.push(SafeWithdrawalIteration {
            iteration: it,
            lower_bound: lo,
            upper_bound: hi,
            candidate_rate: mid,
            success_rate: eval.success_rate,
            success_ci_half_width: eval.success_ci_half_width,
        });
        debug!(iteration = it, rate = mid, success = eval.success_rate, "swr candidate");

        if meets(&eval) {
            lo = mid;
            best = eval;
        } else {
            hi = mid;
        }

        if (hi - lo).abs() <= config.tolerance {
            converged = true;
            break;
        }
    }

    Ok(SafeWithdrawalResult {
        rate: Some(lo),
        achieved_success: Some(best.success_rate),
        success_ci_half_width: Some(best.success_ci_half_width),
        iterations,
        converged,
        feasible: true,
        message: if converged {
            "Solved safe withdrawal rate.".to_string()
        } else {
            "Reached max iterations before tolerance was met; returning best estimate.".to_string()
        },
    })
}

#[derive(Debug, Clone, Copy)]
struct CandidateEval {
    success_rate: f64,
    success_ci_half_width: f64,
}

fn with_rate(profile: &HouseholdProfile, rate: f64) -> HouseholdProfile {
    let mut candidate = profile.clone();
    candidate.annual_expenses = rate * profile.buckets.total();
    candidate.withdrawal_rate = rate;
    candidate
}

/// 95% normal-approximation half width for a success proportion.
pub(crate) fn binomial_ci_half_width(p: f64, n: u32) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    1.96 * (p * (1.0 - p) / n as f64).sqrt()
}
