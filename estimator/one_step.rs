//! # One-Step Estimator
//!
//! Starts from cheap per-annotator probit fits and applies a single Newton
//! correction to β and then to σ under the binary probit annotation model
//!
//! ```text
//! P(Y[i,m] = 1) = Φ(X_i β / σ_m)
//! ```
//!
//! Only `(i, m)` pairs with `A[i,m] = 1` enter any sum. The reference
//! annotator's scale is fixed at one throughout.

use crate::data::AnnotationData;
use crate::estimate::{EstimationError, mean_squared_error};
use crate::link::ProbitTerms;
use crate::model::ProbitConfig;
use crate::probit::fit_probit;
use crate::types::{Coefficients, REFERENCE_ANNOTATOR, Scales};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use ndarray_linalg::Solve;

/// Convergence diagnostics of one `run`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OneStepDiagnostics {
    /// Mean squared difference between β before and after `update_beta`.
    pub beta_mse: f64,
    /// Mean squared difference of the non-reference scales in `update_sigma`.
    pub sigma_mse: f64,
}

/// Per-annotator second-order terms of the σ update.
#[derive(Clone, Debug)]
pub struct ScaleTerms {
    /// `2 Σ_i A·U·(Y·ρ - (1-Y)·ρ₋) / σ²`
    pub first: Array1<f64>,
    /// `Σ_i A·U²·(Δφ' - (Δφ)²) / σ²`
    pub second: Array1<f64>,
    /// `Σ_i A·U·(-Y·ρ + (1-Y)·ρ₋) / σ`, the score with respect to σ.
    pub score: Array1<f64>,
}

pub struct OneStepEstimator<'a> {
    data: &'a AnnotationData,
    /// Labels with unannotated entries zeroed.
    labels: Array2<f64>,
    probit: ProbitConfig,
    beta_initial: Coefficients,
    beta_hat: Coefficients,
    sigma_initial: Scales,
    sigma_hat: Scales,
}

impl<'a> OneStepEstimator<'a> {
    /// Validates binary labels and runs both probit initializations.
    pub fn new(data: &'a AnnotationData, probit: ProbitConfig) -> Result<Self, EstimationError> {
        let mut estimator = Self::from_initial(
            data,
            Array1::zeros(data.num_features()),
            Array1::ones(data.num_annotators()),
        )?;
        estimator.probit = probit;
        estimator.initialize_beta()?;
        estimator.initialize_sigma()?;
        Ok(estimator)
    }

    /// Starts from caller-supplied values instead of probit fits.
    ///
    /// `sigma[0]` is overwritten with one.
    pub fn from_initial(
        data: &'a AnnotationData,
        beta: Array1<f64>,
        sigma: Array1<f64>,
    ) -> Result<Self, EstimationError> {
        data.require_classes(1)?;
        if beta.len() != data.num_features() || sigma.len() != data.num_annotators() {
            return Err(EstimationError::InvalidParameters(format!(
                "expected β of length {} and σ of length {}, got {} and {}",
                data.num_features(),
                data.num_annotators(),
                beta.len(),
                sigma.len()
            )));
        }
        if sigma.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err(EstimationError::InvalidParameters(
                "initial scales must be finite and non-zero".to_string(),
            ));
        }
        let beta = Coefficients::new(beta);
        let sigma = Scales::normalized(sigma);
        Ok(Self {
            data,
            labels: data.masked_labels(),
            probit: ProbitConfig::default(),
            beta_initial: beta.clone(),
            beta_hat: beta,
            sigma_initial: sigma.clone(),
            sigma_hat: sigma,
        })
    }

    /// Probit fit of annotator 0's labels on X over the rows it annotated.
    pub fn initialize_beta(&mut self) -> Result<(), EstimationError> {
        let (x0, y0) = self.data.annotator_subset(REFERENCE_ANNOTATOR);
        let y0 = Array1::from_vec(y0);
        let fit = fit_probit(x0.view(), y0.view(), REFERENCE_ANNOTATOR, &self.probit)?;
        log::debug!(
            "initial β from annotator {REFERENCE_ANNOTATOR}: {} iterations, loglik {:.4}",
            fit.iterations,
            fit.log_likelihood
        );
        self.beta_initial = Coefficients::new(fit.coefficients);
        self.beta_hat = self.beta_initial.clone();
        Ok(())
    }

    /// σ[m] = 1 / (probit slope of annotator m's labels on Xβ̂), σ[0] = 1.
    pub fn initialize_sigma(&mut self) -> Result<(), EstimationError> {
        let z = self.data.x().dot(&*self.beta_hat);
        let mut sigma = Scales::ones(self.data.num_annotators());
        for annotator in 0..self.data.num_annotators() {
            if annotator == REFERENCE_ANNOTATOR {
                continue;
            }
            let rows: Vec<usize> = self
                .data
                .a()
                .column(annotator)
                .indexed_iter()
                .filter(|(_, v)| **v == 1.0)
                .map(|(i, _)| i)
                .collect();
            let zi = z.select(Axis(0), &rows).insert_axis(Axis(1));
            let yi = self.data.y().column(annotator).select(Axis(0), &rows);
            let fit = fit_probit(zi.view(), yi.view(), annotator, &self.probit)?;
            let slope = fit.coefficients[0];
            if slope == 0.0 || !slope.is_finite() {
                return Err(EstimationError::ZeroScaleCoefficient { annotator });
            }
            sigma.set(annotator, 1.0 / slope);
        }
        self.sigma_initial = sigma;
        self.sigma_hat = self.sigma_initial.clone();
        Ok(())
    }

    /// Link terms at the current estimate, `U[i,m] = X_i β̂ / σ̂_m`.
    fn link_terms(&self) -> ProbitTerms<ndarray::Ix2> {
        let eta = self.data.x().dot(&*self.beta_hat);
        let sigma = self.sigma_hat.as_view();
        let u = &eta.view().insert_axis(Axis(1)) / &sigma.insert_axis(Axis(0));
        ProbitTerms::from_predictor(u)
    }

    /// Masked log-likelihood `Σ A·(Y log Φ + (1-Y) log(1-Φ))` at the current estimate.
    pub fn log_likelihood(&self) -> f64 {
        let terms = self.link_terms();
        (&terms.log_likelihood(&self.labels) * &self.data.a()).sum()
    }

    /// Score vector and Hessian with respect to β.
    pub fn beta_score_and_hessian(&self) -> (Array1<f64>, Array2<f64>) {
        let terms = self.link_terms();
        let a = self.data.a();
        let x = self.data.x();
        let sigma = self.sigma_hat.as_view();
        let inv_sigma = sigma.mapv(|s| 1.0 / s).insert_axis(Axis(0));
        let inv_sigma_sq = sigma.mapv(|s| 1.0 / (s * s)).insert_axis(Axis(0));

        let weights = terms.score_weights(&self.labels);
        let curvature = terms.curvature(&weights);

        let per_example_hessian = (&a * &curvature * &inv_sigma_sq).sum_axis(Axis(1));
        let weighted_x = &x * &per_example_hessian.insert_axis(Axis(1));
        let hessian = x.t().dot(&weighted_x);

        let per_example_score = (&a * &weights * &inv_sigma).sum_axis(Axis(1));
        let score = x.t().dot(&per_example_score);
        (score, hessian)
    }

    /// Aggregates feeding the per-annotator σ update.
    pub fn scale_terms(&self) -> ScaleTerms {
        let terms = self.link_terms();
        let a = self.data.a();
        let sigma = self.sigma_hat.as_view();
        let inv_sigma = sigma.mapv(|s| 1.0 / s).insert_axis(Axis(0));
        let inv_sigma_sq = sigma.mapv(|s| 1.0 / (s * s)).insert_axis(Axis(0));

        let weights = terms.score_weights(&self.labels);
        let curvature = terms.curvature(&weights);
        let u = &terms.u;

        let first = (&a * u * &weights * &inv_sigma_sq).sum_axis(Axis(0)) * 2.0;
        let second = (&a * &u.mapv(|v| v * v) * &curvature * &inv_sigma_sq).sum_axis(Axis(0));
        let score = (&a * u * &weights.mapv(|w| -w) * &inv_sigma).sum_axis(Axis(0));
        ScaleTerms {
            first,
            second,
            score,
        }
    }

    /// One Newton step on β. Returns the mean squared change.
    pub fn update_beta(&mut self) -> Result<f64, EstimationError> {
        let (score, hessian) = self.beta_score_and_hessian();
        let step = hessian
            .solve(&score)
            .map_err(EstimationError::LinearSystemSolveFailed)?;
        let new_beta = &*self.beta_hat - &step;
        let beta_mse = mean_squared_error(new_beta.view(), self.beta_hat.as_view());
        self.beta_hat = Coefficients::new(new_beta);
        Ok(beta_mse)
    }

    /// One scalar Newton step per annotator on σ. Returns the mean squared
    /// change over the non-reference annotators.
    pub fn update_sigma(&mut self) -> Result<f64, EstimationError> {
        let ScaleTerms {
            first,
            second,
            score,
        } = self.scale_terms();
        let mut new_sigma = self.sigma_hat.clone();
        for annotator in 0..self.data.num_annotators() {
            if annotator == REFERENCE_ANNOTATOR {
                continue;
            }
            let curvature = first[annotator] + second[annotator];
            if curvature == 0.0 || !curvature.is_finite() {
                return Err(EstimationError::NonFiniteCurvature { annotator });
            }
            new_sigma.set(
                annotator,
                self.sigma_hat[annotator] - score[annotator] / curvature,
            );
        }
        let sigma_mse = mean_squared_error(new_sigma.free(), self.sigma_hat.free());
        self.sigma_hat = new_sigma;
        Ok(sigma_mse)
    }

    /// The one-step correction: exactly one β update followed by one σ update.
    pub fn run(&mut self) -> Result<OneStepDiagnostics, EstimationError> {
        log::info!("================= OS Algorithm =================");
        let beta_mse = self.update_beta()?;
        log::info!("update_beta: beta mse({beta_mse:.4})");
        let sigma_mse = self.update_sigma()?;
        log::info!("update_sigma: sigma mse({sigma_mse:.4})");
        Ok(OneStepDiagnostics {
            beta_mse,
            sigma_mse,
        })
    }

    pub fn beta_initial(&self) -> ArrayView1<'_, f64> {
        self.beta_initial.as_view()
    }

    pub fn beta_hat(&self) -> ArrayView1<'_, f64> {
        self.beta_hat.as_view()
    }

    pub fn sigma_initial(&self) -> ArrayView1<'_, f64> {
        self.sigma_initial.as_view()
    }

    pub fn sigma_hat(&self) -> ArrayView1<'_, f64> {
        self.sigma_hat.as_view()
    }
}
