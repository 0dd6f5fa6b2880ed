use super::types::{
    AllocationPolicy, AssetBuckets, AssetMix, ContributionSchedule, FilingStatus, GuardrailConfig,
    HealthcareCosts, HouseholdProfile, LongTermCare, MarketAssumptions, Person,
    SocialSecurityBenefit, TaxSetting,
};

pub(crate) fn sample_profile() -> HouseholdProfile {
    HouseholdProfile {
        current_year: 2026,
        user: Person {
            current_age: 60,
            retirement_age: 65,
            life_expectancy: 90,
            salary: 100_000.0,
            social_security: Some(SocialSecurityBenefit {
                annual_benefit_at_fra: 30_000.0,
                claim_age: 67,
            }),
        },
        spouse: None,
        buckets: AssetBuckets {
            tax_deferred: 600_000.0,
            tax_free: 200_000.0,
            capital_gains: 150_000.0,
            cash_equivalents: 50_000.0,
        },
        capital_gains_basis: 100_000.0,
        contributions: ContributionSchedule {
            tax_deferred: 20_000.0,
            growth_rate: 0.01,
            ..ContributionSchedule::default()
        },
        pension: None,
        part_time: None,
        annual_expenses: 60_000.0,
        survivor_expense_ratio: 0.75,
        healthcare: HealthcareCosts {
            annual_cost: 8_000.0,
            inflation_rate: 0.05,
        },
        long_term_care: LongTermCare::default(),
        market: MarketAssumptions {
            expected_return: 0.06,
            volatility: 0.12,
            inflation_rate: 0.025,
            inflation_volatility: 0.01,
            allocation: AllocationPolicy::Fixed(AssetMix {
                stocks: 0.6,
                bonds: 0.35,
                cash: 0.05,
            }),
            asset_classes: None,
            regimes: None,
        },
        filing_status: FilingStatus::Single,
        tax: TaxSetting::Progressive {
            state: "TX".to_string(),
        },
        withdrawal_rate: 0.04,
        guardrails: GuardrailConfig::default(),
    }
}

/// Retired at 65 with $1M tax-free, $40k flat spending, a fixed 5% return and
/// no inflation, taxes or healthcare.
pub(crate) fn zero_volatility_profile() -> HouseholdProfile {
    let mut profile = sample_profile();
    profile.user = Person {
        current_age: 65,
        retirement_age: 65,
        life_expectancy: 90,
        salary: 0.0,
        social_security: None,
    };
    profile.buckets = AssetBuckets {
        tax_free: 1_000_000.0,
        ..AssetBuckets::default()
    };
    profile.capital_gains_basis = 0.0;
    profile.contributions = ContributionSchedule::default();
    profile.annual_expenses = 40_000.0;
    profile.healthcare = HealthcareCosts {
        annual_cost: 0.0,
        inflation_rate: 0.0,
    };
    profile.market.expected_return = 0.05;
    profile.market.volatility = 0.0;
    profile.market.inflation_rate = 0.0;
    profile.market.inflation_volatility = 0.0;
    profile.tax = TaxSetting::Flat { rate: 0.0 };
    profile.guardrails = GuardrailConfig {
        enabled: false,
        ..GuardrailConfig::default()
    };
    profile
}
