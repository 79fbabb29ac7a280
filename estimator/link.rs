//! # Probit Link Utilities
//!
//! Stateless elementwise functions of the standardized linear predictor
//! `U = Xβ / σ` shared by the one-step estimator and the probit fit used for
//! initialization.
//!
//! The normal CDF and its complement are both evaluated through `erfc`, so the
//! upper tail keeps full relative precision instead of collapsing to `1 - 1`.
//! Hazard ratios switch to the asymptotic Mills-ratio expansion once the tail
//! probability is too small to divide by, which keeps every score and
//! curvature term finite for arbitrarily large `|U|`.

use ndarray::{Array, ArrayBase, Data, Dimension, Zip};
use statrs::function::erf::erfc;
use std::f64::consts::SQRT_2;

const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;

/// Beyond this magnitude the tail mass is approximated by the Mills expansion.
const TAIL_CUTOFF: f64 = 30.0;

/// Floor applied to `Φ` and `1 - Φ` wherever they appear as a divisor.
const PROB_FLOOR: f64 = 1e-300;

/// Standard normal density φ(x).
#[inline]
pub fn normal_pdf(x: f64) -> f64 {
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Standard normal CDF Φ(x).
#[inline]
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Upper tail `1 - Φ(x)`, computed directly.
#[inline]
pub fn normal_sf(x: f64) -> f64 {
    0.5 * erfc(x / SQRT_2)
}

/// Hazard `φ(x) / (1 - Φ(x))` (inverse Mills ratio).
#[inline]
pub fn upper_hazard(x: f64) -> f64 {
    if x > TAIL_CUTOFF {
        let inv_sq = 1.0 / (x * x);
        // 1 - Φ(x) ≈ φ(x)/x · (1 - 1/x² + 3/x⁴ - 15/x⁶)
        let series = 1.0 - inv_sq + 3.0 * inv_sq * inv_sq - 15.0 * inv_sq * inv_sq * inv_sq;
        x / series
    } else {
        normal_pdf(x) / normal_sf(x).max(PROB_FLOOR)
    }
}

/// Reversed hazard `φ(x) / Φ(x)`.
#[inline]
pub fn lower_hazard(x: f64) -> f64 {
    upper_hazard(-x)
}

/// Elementwise φ(U).
pub fn phi<S, D>(u: &ArrayBase<S, D>) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    u.mapv(normal_pdf)
}

/// Elementwise Φ(U).
pub fn cdf<S, D>(u: &ArrayBase<S, D>) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    u.mapv(normal_cdf)
}

/// Elementwise `1 - Φ(U)`.
pub fn cdf_minus<S, D>(u: &ArrayBase<S, D>) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    u.mapv(normal_sf)
}

/// Derivative of the density, `φ'(U) = -U · φ(U)`.
pub fn phi_dot<S, D>(u: &ArrayBase<S, D>) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    u.mapv(|x| -x * normal_pdf(x))
}

/// Elementwise `ρ = φ / Φ`.
pub fn rho<S, D>(u: &ArrayBase<S, D>) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    u.mapv(lower_hazard)
}

/// Elementwise `ρ₋ = φ / (1 - Φ)`.
pub fn rho_minus<S, D>(u: &ArrayBase<S, D>) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    u.mapv(upper_hazard)
}

/// Residual ratio `Δ = (Y - Φ) / (Φ · (1 - Φ))` with both probabilities floored.
///
/// For binary labels `Δφ = Y·ρ - (1-Y)·ρ₋`, and the estimators work from that
/// hazard form ([`ProbitTerms::score_weights`]) because it stays finite where
/// `Φ · (1 - Φ)` underflows. `Δ` is the reference the hazard form is checked against.
pub fn residual_ratio<S1, S2, S3, D>(
    y: &ArrayBase<S1, D>,
    cdf: &ArrayBase<S2, D>,
    cdf_minus: &ArrayBase<S3, D>,
) -> Array<f64, D>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
    S3: Data<Elem = f64>,
    D: Dimension,
{
    Zip::from(y)
        .and(cdf)
        .and(cdf_minus)
        .map_collect(|&yi, &p, &q| (yi - p) / (p.max(PROB_FLOOR) * q.max(PROB_FLOOR)))
}

/// All link quantities for one standardized predictor.
#[derive(Clone, Debug)]
pub struct ProbitTerms<D: Dimension> {
    pub u: Array<f64, D>,
    pub phi: Array<f64, D>,
    pub cdf: Array<f64, D>,
    pub cdf_minus: Array<f64, D>,
    pub phi_dot: Array<f64, D>,
    pub rho: Array<f64, D>,
    pub rho_minus: Array<f64, D>,
}

impl<D: Dimension> ProbitTerms<D> {
    pub fn from_predictor(u: Array<f64, D>) -> Self {
        Self {
            phi: phi(&u),
            cdf: cdf(&u),
            cdf_minus: cdf_minus(&u),
            phi_dot: phi_dot(&u),
            rho: rho(&u),
            rho_minus: rho_minus(&u),
            u,
        }
    }

    /// Per-entry score weight `Y·ρ - (1 - Y)·ρ₋`.
    ///
    /// For binary labels this is exactly `Δ·φ`, the derivative of the probit
    /// log-likelihood with respect to `U`.
    pub fn score_weights<S>(&self, y: &ArrayBase<S, D>) -> Array<f64, D>
    where
        S: Data<Elem = f64>,
    {
        Zip::from(y)
            .and(&self.rho)
            .and(&self.rho_minus)
            .map_collect(|&yi, &r, &rm| yi * r - (1.0 - yi) * rm)
    }

    /// Per-entry curvature `Δ·φ' - (Δ·φ)²` expressed through the score weights.
    ///
    /// With `s = Δ·φ` and `φ' = -U·φ` the curvature is `-U·s - s²`, which avoids
    /// forming `Δ` itself in the tails.
    pub fn curvature(&self, score_weights: &Array<f64, D>) -> Array<f64, D> {
        Zip::from(&self.u)
            .and(score_weights)
            .map_collect(|&u, &s| -u * s - s * s)
    }

    /// Probit log-likelihood contribution of each entry, `log Φ` or `log(1 - Φ)`.
    pub fn log_likelihood<S>(&self, y: &ArrayBase<S, D>) -> Array<f64, D>
    where
        S: Data<Elem = f64>,
    {
        Zip::from(y)
            .and(&self.cdf)
            .and(&self.cdf_minus)
            .map_collect(|&yi, &p, &q| {
                yi * p.max(PROB_FLOOR).ln() + (1.0 - yi) * q.max(PROB_FLOOR).ln()
            })
    }
}
