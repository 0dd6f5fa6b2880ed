//! Required minimum distributions.

/// IRS Uniform Lifetime Table divisors for ages 72 through 119.
const UNIFORM_LIFETIME: [f64; 48] = [
    27.4, 26.5, 25.5, 24.6, 23.7, 22.9, 22.0, 21.1, // 72-79
    20.2, 19.4, 18.5, 17.7, 16.8, 16.0, 15.2, 14.4, 13.7, 12.9, // 80-89
    12.2, 11.5, 10.8, 10.1, 9.5, 8.9, 8.4, 7.8, 7.3, 6.8, // 90-99
    6.4, 6.0, 5.6, 5.2, 4.9, 4.6, 4.3, 4.1, 3.9, 3.7, // 100-109
    3.5, 3.4, 3.3, 3.1, 3.0, 2.9, 2.8, 2.7, 2.5, 2.3, // 110-119
];
const UNIFORM_FIRST_AGE: u32 = 72;
const UNIFORM_FLOOR: f64 = 2.0;

/// Spouse age gap above which the joint-life divisor replaces the uniform one.
pub const JOINT_LIFE_GAP: u32 = 10;

// Gompertz mortality approximating the IRS single-life table.
const GOMPERTZ_MODE: f64 = 90.0;
const GOMPERTZ_DISPERSION: f64 = 9.0;

/// First RMD age under SECURE 2.0 for an account owner born in `birth_year`.
pub fn rmd_start_age(birth_year: i32) -> u32 {
    match birth_year {
        ..=1950 => 72,
        1951..=1959 => 73,
        _ => 75,
    }
}

pub fn uniform_lifetime_divisor(age: u32) -> Option<f64> {
    if age < UNIFORM_FIRST_AGE {
        return None;
    }
    let idx = (age - UNIFORM_FIRST_AGE) as usize;
    Some(UNIFORM_LIFETIME.get(idx).copied().unwrap_or(UNIFORM_FLOOR))
}

fn survival(age: f64, years: f64) -> f64 {
    let hazard = ((age - GOMPERTZ_MODE) / GOMPERTZ_DISPERSION).exp();
    (hazard * (1.0 - (years / GOMPERTZ_DISPERSION).exp())).exp()
}

fn last_survivor_expectancy(age_a: f64, age_b: f64) -> f64 {
    let mut total = 0.5;
    for t in 1..=150 {
        let t = t as f64;
        let a = survival(age_a, t);
        let b = survival(age_b, t);
        let either = a + b - a * b;
        if either < 1e-9 {
            break;
        }
        total += either;
    }
    total
}

/// Approximate joint and last survivor divisor for an owner with a much
/// younger spouse.
///
/// Anchored on the uniform table, which assumes a beneficiary exactly ten
/// years younger, and widened by the extra last-survivor expectancy of the
/// actual spouse. Never below the uniform divisor.
pub fn joint_life_divisor(owner_age: u32, spouse_age: u32) -> Option<f64> {
    let uniform = uniform_lifetime_divisor(owner_age)?;
    let owner = owner_age as f64;
    let reference = owner - JOINT_LIFE_GAP as f64;
    let extra = last_survivor_expectancy(owner, spouse_age as f64)
        - last_survivor_expectancy(owner, reference);
    Some((uniform + extra).max(uniform))
}

pub fn rmd_divisor(owner_age: u32, living_spouse_age: Option<u32>) -> Option<f64> {
    match living_spouse_age {
        Some(spouse) if owner_age > spouse + JOINT_LIFE_GAP => joint_life_divisor(owner_age, spouse),
        _ => uniform_lifetime_divisor(owner_age),
    }
}

/// This year's required distribution from the prior year-end balance, capped at
/// what is currently in the account.
pub fn required_minimum_distribution(
    prior_year_balance: f64,
    current_balance: f64,
    owner_age: u32,
    owner_birth_year: i32,
    living_spouse_age: Option<u32>,
) -> f64 {
    if owner_age < rmd_start_age(owner_birth_year) || prior_year_balance <= 0.0 {
        return 0.0;
    }
    let Some(divisor) = rmd_divisor(owner_age, living_spouse_age) else {
        return 0.0;
    };
    (prior_year_balance / divisor).min(current_balance.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_age_follows_birth_cohort() {
        assert_eq!(rmd_start_age(1949), 72);
        assert_eq!(rmd_start_age(1950), 72);
        assert_eq!(rmd_start_age(1951), 73);
        assert_eq!(rmd_start_age(1954), 73);
        assert_eq!(rmd_start_age(1959), 73);
        assert_eq!(rmd_start_age(1960), 75);
        assert_eq!(rmd_start_age(1964), 75);
    }

    #[test]
    fn uniform_table_spot_checks() {
        assert_eq!(uniform_lifetime_divisor(71), None);
        assert_eq!(uniform_lifetime_divisor(72), Some(27.4));
        assert_eq!(uniform_lifetime_divisor(80), Some(20.2));
        assert_eq!(uniform_lifetime_divisor(90), Some(12.2));
        assert_eq!(uniform_lifetime_divisor(100), Some(6.4));
        assert_eq!(uniform_lifetime_divisor(119), Some(2.3));
        assert_eq!(uniform_lifetime_divisor(125), Some(2.0));
    }

    #[test]
    fn uniform_table_is_decreasing() {
        for pair in UNIFORM_LIFETIME.windows(2) {
            assert!(pair[1] < pair[0]);
        }
    }

    #[test]
    fn no_distribution_before_start_age() {
        // Born 1954, age 72 in 2026: start age 73.
        assert_eq!(
            required_minimum_distribution(1_000_000.0, 1_000_000.0, 72, 1954, None),
            0.0
        );
        let rmd = required_minimum_distribution(1_000_000.0, 1_000_000.0, 73, 1954, None);
        assert!((rmd - 1_000_000.0 / 26.5).abs() < 1e-6);
    }

    #[test]
    fn distribution_is_capped_by_current_balance() {
        let rmd = required_minimum_distribution(500_000.0, 1_000.0, 90, 1940, None);
        assert_eq!(rmd, 1_000.0);
    }

    #[test]
    fn joint_divisor_applies_only_beyond_ten_year_gap() {
        assert_eq!(rmd_divisor(75, Some(65)), Some(24.6));
        assert_eq!(rmd_divisor(75, Some(70)), Some(24.6));
        let joint = rmd_divisor(75, Some(55)).unwrap_or_default();
        assert!(joint > 24.6, "joint divisor {joint}");
    }

    #[test]
    fn joint_divisor_grows_as_spouse_gets_younger() {
        let mut last = 0.0;
        for spouse in (40..64).rev() {
            let d = joint_life_divisor(75, spouse).unwrap_or_default();
            assert!(d >= last);
            last = d;
        }
        let anchored = joint_life_divisor(75, 65).unwrap_or_default();
        assert!((anchored - 24.6).abs() < 1e-9);
    }
}
