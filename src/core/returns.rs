use std::f64::consts::PI;

use super::types::{AllocationPolicy, MarketAssumptions, MarketRegime, RegimeModel};

const RETURN_FLOOR: f64 = -0.95;
const RETURN_CAP: f64 = 2.5;
const INFLATION_FLOOR: f64 = -0.05;
const INFLATION_CAP: f64 = 0.20;

/// Random numbers for one trial. Implementations must be deterministic for a
/// given construction so a trial can be replayed.
pub trait RandomSource {
    /// Uniform in the open interval (0, 1).
    fn next_f64(&mut self) -> f64;
    fn standard_normal(&mut self) -> f64;
}

/// Arithmetic mean that reproduces a geometric mean under lognormal-ish drag.
pub fn cagr_to_aagr(cagr: f64, volatility: f64) -> f64 {
    cagr + volatility * volatility / 2.0
}

pub fn aagr_to_cagr(aagr: f64, volatility: f64) -> f64 {
    aagr - volatility * volatility / 2.0
}

pub fn derive_seed(master_seed: u64, stream: u32, trial: u32) -> u64 {
    let mixed = master_seed ^ ((stream as u64) << 32) ^ trial as u64;
    splitmix64(mixed)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// xorshift64* with a cached Box-Muller pair.
///
/// The antithetic twin of a generator returns `1 - u` for every uniform and
/// `-z` for every normal, so paired trials see mirrored markets.
#[derive(Debug, Clone)]
pub struct Rng {
    state: u64,
    cached_normal: Option<f64>,
    antithetic: bool,
}

impl Rng {
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            0xA5A5_A5A5_A5A5_A5A5
        } else {
            seed
        };
        Self {
            state,
            cached_normal: None,
            antithetic: false,
        }
    }

    pub fn antithetic(seed: u64) -> Self {
        Self {
            antithetic: true,
            ..Self::new(seed)
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    fn raw_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    fn raw_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }

        let u1 = self.raw_f64().max(1e-12);
        let u2 = self.raw_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        self.cached_normal = Some(r * theta.sin());
        r * theta.cos()
    }
}

impl RandomSource for Rng {
    fn next_f64(&mut self) -> f64 {
        let u = self.raw_f64();
        if self.antithetic { 1.0 - u } else { u }
    }

    fn standard_normal(&mut self) -> f64 {
        let z = self.raw_normal();
        if self.antithetic { -z } else { z }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct DrawContext {
    pub age: u32,
    pub retirement_year: Option<u32>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MarketDraw {
    pub portfolio_return: f64,
    pub inflation: f64,
    pub regime: Option<MarketRegime>,
    pub clamped: u32,
}

pub struct ReturnGenerator<'a> {
    market: &'a MarketAssumptions,
    cholesky: Option<[[f64; 3]; 3]>,
}

impl<'a> ReturnGenerator<'a> {
    pub fn new(market: &'a MarketAssumptions) -> Self {
        let cholesky = market
            .asset_classes
            .as_ref()
            .map(|classes| cholesky3(&classes.correlation));
        Self { market, cholesky }
    }

    pub fn allocation(&self) -> &AllocationPolicy {
        &self.market.allocation
    }

    /// Draws one year. Always consumes four normals and, with a regime model,
    /// one uniform, so the stream position never depends on the inputs.
    pub fn draw<R: RandomSource>(
        &self,
        rng: &mut R,
        ctx: DrawContext,
        regime_state: &mut Option<MarketRegime>,
    ) -> MarketDraw {
        let z = [
            rng.standard_normal(),
            rng.standard_normal(),
            rng.standard_normal(),
        ];
        let z_inflation = rng.standard_normal();

        let regime = self.market.regimes.as_ref().map(|model| {
            let u = rng.next_f64();
            let current = regime_state.unwrap_or(model.initial);
            let stressed = ctx
                .retirement_year
                .is_some_and(|year| year < model.sequence_risk_years);
            let next = next_regime(model, current, u, stressed);
            *regime_state = Some(next);
            next
        });

        let weights = self.market.allocation.weights_at(ctx.age);
        let (shift, vol_mult) = match (regime, self.market.regimes.as_ref()) {
            (Some(r), Some(model)) => {
                let p = model.params[r.index()];
                (p.mean_shift * weights.stocks, p.volatility_multiplier)
            }
            _ => (0.0, 1.0),
        };

        let raw_return = match (&self.market.asset_classes, &self.cholesky) {
            (Some(classes), Some(l)) => {
                let correlated = mul_lower(l, &z);
                let assumptions = [classes.stocks, classes.bonds, classes.cash];
                weights
                    .as_array()
                    .iter()
                    .zip(assumptions.iter())
                    .zip(correlated.iter())
                    .map(|((w, a), zc)| {
                        w * (cagr_to_aagr(a.cagr, a.volatility) + a.volatility * vol_mult * zc)
                    })
                    .sum::<f64>()
                    + shift
            }
            _ => {
                let vol = self.market.volatility;
                cagr_to_aagr(self.market.expected_return, vol) + shift + vol * vol_mult * z[0]
            }
        };

        let raw_inflation =
            self.market.inflation_rate + self.market.inflation_volatility * z_inflation;

        let portfolio_return = raw_return.clamp(RETURN_FLOOR, RETURN_CAP);
        let inflation = raw_inflation.clamp(INFLATION_FLOOR, INFLATION_CAP);
        let clamped = (portfolio_return != raw_return) as u32 + (inflation != raw_inflation) as u32;

        MarketDraw {
            portfolio_return,
            inflation,
            regime,
            clamped,
        }
    }
}

/// Samples the next regime. When `stressed`, bear and crisis transitions are
/// scaled by the model's sequence-risk multiplier and the row is renormalised.
pub fn next_regime(model: &RegimeModel, current: MarketRegime, u: f64, stressed: bool) -> MarketRegime {
    let mut row = model.transitions[current.index()];
    if stressed {
        for (idx, regime) in MarketRegime::ALL.iter().enumerate() {
            if regime.is_adverse() {
                row[idx] *= model.sequence_risk_multiplier.max(0.0);
            }
        }
    }
    let total: f64 = row.iter().map(|p| p.max(0.0)).sum();
    if total <= 0.0 {
        return current;
    }

    let mut acc = 0.0;
    for (idx, p) in row.iter().enumerate() {
        acc += p.max(0.0) / total;
        if u < acc {
            return MarketRegime::ALL[idx];
        }
    }
    MarketRegime::ALL[3]
}

/// Lower-triangular factor of a 3x3 correlation matrix. Non-positive pivots
/// are clamped to zero so a slightly inconsistent matrix still produces draws.
fn cholesky3(m: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut l = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                l[i][j] = (m[i][i] - sum).max(0.0).sqrt();
            } else if l[j][j] > 1e-12 {
                l[i][j] = (m[i][j] - sum) / l[j][j];
            }
        }
    }
    l
}

fn mul_lower(l: &[[f64; 3]; 3], z: &[f64; 3]) -> [f64; 3] {
    let mut out = [0.0; 3];
    for i in 0..3 {
        out[i] = (0..=i).map(|k| l[i][k] * z[k]).sum();
    }
    out
}
