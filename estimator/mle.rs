//! # Full Maximum-Likelihood Estimator
//!
//! Annotator `m` reports class `k ∈ {0, …, K}` for example `i` with probability
//!
//! ```text
//! p[i,k,m] = exp(X_i β_k / σ_m) / (1 + Σ_k' exp(X_i β_k' / σ_m)),   k ≥ 1
//! p[i,0,m] = 1 - Σ_k p[i,k,m]
//! ```
//!
//! The joint parameter θ = (vec(β), σ) is fitted by Newton-Raphson (or plain
//! gradient ascent) on the masked log-likelihood `Σ A·onehot(Y)·log p / n`.
//!
//! ## Hessian layout
//!
//! The β–β block is dense, the σ–σ block diagonal. The β–σ cross block is
//! zero unless `HessianStructure::Full` is selected. σ[0] and the scale of any
//! annotator without annotations are pinned: zero gradient, unit curvature,
//! so every solver step leaves them where they are.

use crate::blocks::{BlockLayout, BlockMatrix};
use crate::data::AnnotationData;
use crate::estimate::EstimationError;
use crate::model::{GradientAscentConfig, HessianStructure, NewtonConfig};
use crate::types::{JointParameters, REFERENCE_ANNOTATOR};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, s};
use ndarray_linalg::Solve;

/// Added to every class probability before renormalizing in the likelihood.
const PROBABILITY_EPS: f64 = 1e-10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DerivativeOrder {
    /// Gradient only.
    First,
    /// Gradient and Hessian.
    Second,
}

#[derive(Clone, Debug)]
pub struct Derivatives {
    pub gradient: Array1<f64>,
    pub hessian: Option<Array2<f64>>,
}

/// Why an iterative solver stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The update norm fell below epsilon.
    Converged,
    /// The step counter exceeded the configured maximum.
    MaxStepsExceeded,
    /// The update norm or the likelihood was not a number; the last finite θ was kept.
    NumericalBreakdown,
    /// The likelihood fell below the previous step's; the previous θ was restored.
    LikelihoodDecreased,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Converged => "converged",
            StopReason::MaxStepsExceeded => "max-steps-exceeded",
            StopReason::NumericalBreakdown => "numerical-breakdown",
            StopReason::LikelihoodDecreased => "likelihood-decreased",
        }
    }
}

/// Result of an iterative solve.
#[derive(Clone, Debug)]
pub struct SolveOutcome {
    /// Final coefficients flattened row-major, `K · p` entries.
    pub beta: Array1<f64>,
    pub sigma: Array1<f64>,
    pub reason: StopReason,
    pub steps: usize,
    /// Euclidean norm of each applied or rejected update.
    pub update_norms: Vec<f64>,
}

pub struct MleEstimator<'a> {
    data: &'a AnnotationData,
    classes: usize,
    /// `y_onehot[i, k, m] = 1` iff annotator `m` labeled example `i` as class `k + 1`.
    y_onehot: Array3<f64>,
    layout: BlockLayout,
    params: JointParameters,
    pinned: Vec<usize>,
    steps: usize,
    likelihood_history: Vec<f64>,
}

impl<'a> MleEstimator<'a> {
    /// `initial_beta` is `classes × p`, `initial_sigma` has one entry per
    /// annotator. `initial_sigma[0]` is replaced by one.
    pub fn new(
        data: &'a AnnotationData,
        classes: usize,
        initial_beta: ArrayView2<f64>,
        initial_sigma: ArrayView1<f64>,
    ) -> Result<Self, EstimationError> {
        if classes == 0 {
            return Err(EstimationError::InvalidParameters(
                "at least one non-reference class is required".to_string(),
            ));
        }
        if initial_beta.dim() != (classes, data.num_features())
            || initial_sigma.len() != data.num_annotators()
        {
            return Err(EstimationError::InvalidParameters(format!(
                "expected β of shape {}x{} and σ of length {}, got {:?} and {}",
                classes,
                data.num_features(),
                data.num_annotators(),
                initial_beta.dim(),
                initial_sigma.len()
            )));
        }
        if initial_sigma.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err(EstimationError::InvalidParameters(
                "initial scales must be finite and non-zero".to_string(),
            ));
        }
        data.require_classes(classes)?;

        let mut sigma = initial_sigma.to_owned();
        sigma[REFERENCE_ANNOTATOR] = 1.0;
        let layout = BlockLayout::new(classes, data.num_features(), data.num_annotators());
        let pinned = data
            .annotation_counts()
            .iter()
            .enumerate()
            .filter(|(m, count)| *m == REFERENCE_ANNOTATOR || **count == 0)
            .map(|(m, _)| layout.scale_index(m))
            .collect();

        Ok(Self {
            data,
            classes,
            y_onehot: compute_y_onehot(data, classes),
            layout,
            params: JointParameters::from_parts(initial_beta, sigma.view()),
            pinned,
            steps: 0,
            likelihood_history: Vec::new(),
        })
    }

    pub fn parameters(&self) -> &JointParameters {
        &self.params
    }

    /// Replaces θ. The reference scale is reset to one.
    pub fn set_parameters(&mut self, params: JointParameters) {
        self.params = params;
        let reference = self.layout.scale_index(REFERENCE_ANNOTATOR);
        self.params.theta_mut()[reference] = 1.0;
    }

    pub fn beta(&self) -> ArrayView2<'_, f64> {
        self.params.beta()
    }

    pub fn sigma(&self) -> ArrayView1<'_, f64> {
        self.params.sigma()
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn likelihood_history(&self) -> &[f64] {
        &self.likelihood_history
    }

    pub fn pinned_indices(&self) -> &[usize] {
        &self.pinned
    }

    /// `X βᵗ`, shape `(n, K)`.
    fn linear_predictors(&self) -> Array2<f64> {
        self.data.x().dot(&self.params.beta().t())
    }

    /// Non-reference class probabilities, shape `(n, K, M)`.
    pub fn compute_pikm(&self) -> Array3<f64> {
        let eta = self.linear_predictors();
        let sigma = self.params.sigma();
        let (n, k, m) = (eta.nrows(), self.classes, sigma.len());
        let mut p = Array3::<f64>::zeros((n, k, m));
        let mut scaled = vec![0.0; k];

        for i in 0..n {
            for annotator in 0..m {
                let scale = sigma[annotator];
                for class in 0..k {
                    scaled[class] = eta[[i, class]] / scale;
                }
                // Shift by the largest exponent, counting class 0's implicit zero.
                let shift = scaled.iter().fold(0.0_f64, |acc, &v| acc.max(v));
                let mut total = (-shift).exp();
                for class in 0..k {
                    let value = (scaled[class] - shift).exp();
                    p[[i, class, annotator]] = value;
                    total += value;
                }
                for class in 0..k {
                    p[[i, class, annotator]] /= total;
                }
            }
        }
        p
    }

    /// All `K + 1` class probabilities, stabilized: class 0 takes the remaining
    /// mass, then `PROBABILITY_EPS` is added and each `(i, ·, m)` fibre is
    /// renormalized.
    pub fn class_probabilities(&self) -> Array3<f64> {
        let pikm = self.compute_pikm();
        let (n, k, m) = pikm.dim();
        let mut full = Array3::<f64>::zeros((n, k + 1, m));
        full.slice_mut(s![.., 1.., ..]).assign(&pikm);
        let remaining = pikm.sum_axis(Axis(1)).mapv(|total| 1.0 - total);
        full.slice_mut(s![.., 0, ..]).assign(&remaining);
        full.mapv_inplace(|v| v + PROBABILITY_EPS);
        let totals = full.sum_axis(Axis(1)).insert_axis(Axis(1));
        full /= &totals;
        full
    }

    /// Masked multinomial log-likelihood averaged over examples.
    pub fn compute_likelihood(&self) -> f64 {
        let probabilities = self.class_probabilities();
        let a = self.data.a();
        let y = self.data.y();
        let mut total = 0.0;
        for ((i, annotator), &indicator) in a.indexed_iter() {
            if indicator == 1.0 {
                let class = y[[i, annotator]] as usize;
                total += probabilities[[i, class, annotator]].ln();
            }
        }
        total / self.data.num_examples() as f64
    }

    /// `A · (onehot - p)`, shape `(n, K, M)`.
    fn masked_residuals(&self, pikm: &Array3<f64>) -> Array3<f64> {
        let a = self.data.a().insert_axis(Axis(1));
        &(&self.y_onehot - pikm) * &a
    }

    /// Analytic gradient and, for `DerivativeOrder::Second`, the Hessian of
    /// the summed (not averaged) log-likelihood.
    pub fn derivatives(&self, order: DerivativeOrder, structure: HessianStructure) -> Derivatives {
        let x = self.data.x();
        let a = self.data.a();
        let sigma = self.params.sigma();
        let eta = self.linear_predictors();
        let pikm = self.compute_pikm();
        let residuals = self.masked_residuals(&pikm);
        let (n, k, m) = pikm.dim();

        // ∂β: Xᵗ · Σ_m residual / σ_m
        let inv_sigma = sigma.mapv(|v| 1.0 / v);
        let delta = (&residuals * &inv_sigma.view().insert_axis(Axis(0)).insert_axis(Axis(0)))
            .sum_axis(Axis(2));
        let partial_beta = delta.t().dot(&x);

        // ∂σ: Σ_{i,k} -residual · (X_i β_k) / σ_m²
        let inv_sigma_sq = sigma.mapv(|v| 1.0 / (v * v));
        let mut partial_sigma = Array1::<f64>::zeros(m);
        for annotator in 0..m {
            let column = residuals.slice(s![.., .., annotator]);
            partial_sigma[annotator] = -(&column * &eta).sum() * inv_sigma_sq[annotator];
        }

        let mut gradient = Array1::<f64>::zeros(self.layout.total_len());
        gradient
            .slice_mut(s![..self.layout.coefficient_len()])
            .assign(&Array1::from_iter(partial_beta.iter().copied()));
        gradient
            .slice_mut(s![self.layout.coefficient_len()..])
            .assign(&partial_sigma);

        if order == DerivativeOrder::First {
            return Derivatives {
                gradient,
                hessian: None,
            };
        }

        let mut hessian = BlockMatrix::zeros(self.layout);
        let mut scale_diagonal = Array1::from_shape_fn(m, |v| -2.0 * partial_sigma[v] / sigma[v]);

        for j in 0..k {
            for l in 0..k {
                // -A·(1[j=l]·p_j - p_j·p_l) / σ², shape (n, M)
                let pj = pikm.slice(s![.., j, ..]);
                let pl = pikm.slice(s![.., l, ..]);
                let mut weights = &pj * &pl * -1.0;
                if j == l {
                    weights += &pj;
                }
                weights *= &a;
                weights *= -1.0;
                weights *= &inv_sigma_sq.view().insert_axis(Axis(0));

                let per_example = weights.sum_axis(Axis(1));
                let weighted_x = &x * &per_example.view().insert_axis(Axis(1));
                hessian
                    .coefficient_block_mut(j, l)
                    .assign(&x.t().dot(&weighted_x));

                let eta_product = &eta.column(j) * &eta.column(l);
                let quadratic = weights.t().dot(&eta_product);
                scale_diagonal += &(&quadratic * &inv_sigma_sq);

                if structure == HessianStructure::Full {
                    // Σ_i X_i · w_jl[i,m] · (X_i β_l) / σ_m
                    let cross = x.t().dot(&(&weights * &eta.column(l).insert_axis(Axis(1))));
                    let offset = self.layout.class_offset(j);
                    for annotator in 0..m {
                        let col = self.layout.scale_index(annotator);
                        let contribution = cross.column(annotator).mapv(|v| -v / sigma[annotator]);
                        hessian.add_cross_column(offset, col, &contribution);
                    }
                }
            }

            if structure == HessianStructure::Full {
                // -Σ_i X_i · residual[i,j,m] / σ_m²
                let residual_j = residuals.slice(s![.., j, ..]);
                let cross = x.t().dot(&(&residual_j * &inv_sigma_sq.view().insert_axis(Axis(0))));
                let offset = self.layout.class_offset(j);
                for annotator in 0..m {
                    let col = self.layout.scale_index(annotator);
                    let contribution = cross.column(annotator).mapv(|v| -v);
                    hessian.add_cross_column(offset, col, &contribution);
                }
            }
        }
        hessian.set_scale_diagonal(&scale_diagonal);
        log::trace!("assembled {n}x{k}x{m} Hessian with {structure:?} structure");

        Derivatives {
            gradient,
            hessian: Some(hessian.into_inner()),
        }
    }

    /// Restores `previous` when the newest likelihood is not finite or dropped
    /// below its predecessor.
    fn record_likelihood(&mut self, previous: Option<&JointParameters>) -> Option<StopReason> {
        let likelihood = self.compute_likelihood();
        let before = self
            .likelihood_history
            .last()
            .copied()
            .unwrap_or(f64::NEG_INFINITY);
        self.likelihood_history.push(likelihood);
        log::debug!("[Step {}] likelihood: {likelihood:.6}", self.steps);
        if !likelihood.is_finite() {
            if let Some(previous) = previous {
                self.params = previous.clone();
            }
            return Some(StopReason::NumericalBreakdown);
        }
        if likelihood < before {
            if let Some(previous) = previous {
                self.params = previous.clone();
            }
            return Some(StopReason::LikelihoodDecreased);
        }
        None
    }

    fn zero_pinned(&self, gradient: &mut Array1<f64>) {
        for &index in &self.pinned {
            gradient[index] = 0.0;
        }
    }

    /// Newton-Raphson on θ with the step `-H⁻¹g` computed from the
    /// per-example averaged gradient and Hessian.
    pub fn newton_raphson(&mut self, config: &NewtonConfig) -> Result<SolveOutcome, EstimationError> {
        let n = self.data.num_examples() as f64;
        let mut previous: Option<JointParameters> = None;
        let mut update_norms = Vec::new();

        let reason = loop {
            self.steps += 1;
            if let Some(reason) = self.record_likelihood(previous.as_ref()) {
                break reason;
            }

            let derivatives = self.derivatives(DerivativeOrder::Second, config.hessian);
            let mut gradient = derivatives.gradient / n;
            self.zero_pinned(&mut gradient);
            let hessian = derivatives.hessian.ok_or_else(|| {
                EstimationError::InvalidParameters("second-order derivatives were not computed".to_string())
            })? / n;

            let mut blocks = BlockMatrix::from_dense(self.layout, hessian);
            for &index in &self.pinned {
                blocks.pin(index);
            }
            if config.ridge != 0.0 {
                blocks.shift_diagonal(-config.ridge, &self.pinned);
            }

            let step = blocks
                .as_array()
                .solve(&gradient)
                .map_err(EstimationError::LinearSystemSolveFailed)?
                .mapv(|v| -v);
            let norm = step.dot(&step).sqrt();
            update_norms.push(norm);
            if norm.is_nan() {
                log::warn!("[Step {}] update norm is NaN; keeping the last valid θ", self.steps);
                break StopReason::NumericalBreakdown;
            }

            previous = Some(self.params.clone());
            *self.params.theta_mut() += &step;
            log::info!("[Step {}] theta difference norm:{norm:.5}", self.steps);

            if norm < config.epsilon {
                break StopReason::Converged;
            }
            if self.steps > config.max_steps {
                break StopReason::MaxStepsExceeded;
            }
        };

        Ok(self.outcome(reason, update_norms))
    }

    /// First-order alternative: `θ ← θ + η·g/n - 2λ·β`.
    pub fn gradient_ascent(&mut self, config: &GradientAscentConfig) -> SolveOutcome {
        let n = self.data.num_examples() as f64;
        let coefficient_len = self.layout.coefficient_len();
        let mut previous: Option<JointParameters> = None;
        let mut update_norms = Vec::new();

        let reason = loop {
            self.steps += 1;
            if let Some(reason) = self.record_likelihood(previous.as_ref()) {
                break reason;
            }

            let mut gradient = self
                .derivatives(DerivativeOrder::First, HessianStructure::BlockDiagonal)
                .gradient
                / n;
            self.zero_pinned(&mut gradient);

            let mut update = gradient * config.learning_rate;
            let penalty = self
                .params
                .theta()
                .slice(s![..coefficient_len])
                .mapv(|b| -2.0 * config.penalty * b);
            update.slice_mut(s![..coefficient_len]).zip_mut_with(&penalty, |u, p| *u += p);

            let norm = update.dot(&update).sqrt();
            update_norms.push(norm);
            if norm.is_nan() {
                break StopReason::NumericalBreakdown;
            }

            previous = Some(self.params.clone());
            *self.params.theta_mut() += &update;
            log::debug!("[Step {}] gradient step norm:{norm:.5}", self.steps);

            if norm < config.epsilon {
                break StopReason::Converged;
            }
            if self.steps > config.max_steps {
                break StopReason::MaxStepsExceeded;
            }
        };

        self.outcome(reason, update_norms)
    }

    fn outcome(&self, reason: StopReason, update_norms: Vec<f64>) -> SolveOutcome {
        let (beta, sigma) = self.params.split();
        log::info!(
            "MLE stopped after {} steps ({})",
            self.steps,
            reason.as_str()
        );
        SolveOutcome {
            beta: Array1::from_iter(beta.iter().copied()),
            sigma,
            reason,
            steps: self.steps,
            update_norms,
        }
    }
}

/// `(n, K, M)` indicator of `Y[i,m] == k + 1`; unannotated entries are zero.
fn compute_y_onehot(data: &AnnotationData, classes: usize) -> Array3<f64> {
    let labels = data.masked_labels();
    let (n, m) = labels.dim();
    Array3::from_shape_fn((n, classes, m), |(i, k, annotator)| {
        if data.a()[[i, annotator]] == 1.0 && labels[[i, annotator]] == (k + 1) as f64 {
            1.0
        } else {
            0.0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{SyntheticConfig, simulate_softmax};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn small_problem() -> (AnnotationData, Array2<f64>, Array1<f64>) {
        let config = SyntheticConfig {
            examples: 300,
            seed: 3,
            beta: array![[0.8, -0.5], [-0.4, 0.9]],
            sigma: array![1.0, 0.7, 1.6],
            annotation_rate: 0.8,
        };
        let data = simulate_softmax(&config).unwrap();
        (data, array![[0.6, -0.3], [-0.2, 0.7]], array![1.0, 0.9, 1.3])
    }

    #[test]
    fn probabilities_sum_to_one_with_class_zero() {
        let (data, beta, sigma) = small_problem();
        let estimator = MleEstimator::new(&data, 2, beta.view(), sigma.view()).unwrap();
        let pikm = estimator.compute_pikm();
        let remaining = pikm.sum_axis(Axis(1)).mapv(|t| 1.0 - t);
        assert!(remaining.iter().all(|&r| r > 0.0 && r < 1.0));

        let full = estimator.class_probabilities();
        for total in full.sum_axis(Axis(1)).iter() {
            assert_abs_diff_eq!(*total, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn extreme_scales_do_not_overflow() {
        let (data, _, _) = small_problem();
        let beta = array![[80.0, -50.0], [-40.0, 90.0]];
        let sigma = array![1.0, 0.01, 100.0];
        let estimator = MleEstimator::new(&data, 2, beta.view(), sigma.view()).unwrap();
        assert!(estimator.compute_pikm().iter().all(|v| v.is_finite()));
        assert!(estimator.compute_likelihood().is_finite());
    }

    #[test]
    fn gradient_matches_finite_differences_of_the_likelihood() {
        let (data, beta, sigma) = small_problem();
        let mut estimator = MleEstimator::new(&data, 2, beta.view(), sigma.view()).unwrap();
        let n = data.num_examples() as f64;
        let gradient = estimator
            .derivatives(DerivativeOrder::First, HessianStructure::BlockDiagonal)
            .gradient
            / n;
        let theta = estimator.parameters().theta().to_owned();

        let h = 1e-6;
        // Index 4 is σ[0], which `set_parameters` pins; skip it.
        for idx in [0, 1, 2, 3, 5, 6] {
            let mut plus = theta.clone();
            plus[idx] += h;
            estimator.set_parameters(JointParameters::from_theta(plus, 2, 2));
            let lp = estimator.compute_likelihood();
            let mut minus = theta.clone();
            minus[idx] -= h;
            estimator.set_parameters(JointParameters::from_theta(minus, 2, 2));
            let lm = estimator.compute_likelihood();
            assert_abs_diff_eq!(gradient[idx], (lp - lm) / (2.0 * h), epsilon = 1e-5);
        }
    }

    fn finite_difference_hessian(estimator: &mut MleEstimator<'_>, theta: &Array1<f64>) -> Array2<f64> {
        let h = 1e-5;
        let len = theta.len();
        let mut numeric = Array2::<f64>::zeros((len, len));
        for col in 0..len {
            let mut plus = theta.clone();
            plus[col] += h;
            estimator.params = JointParameters::from_theta(plus, 2, 2);
            let gp = estimator
                .derivatives(DerivativeOrder::First, HessianStructure::BlockDiagonal)
                .gradient;
            let mut minus = theta.clone();
            minus[col] -= h;
            estimator.params = JointParameters::from_theta(minus, 2, 2);
            let gm = estimator
                .derivatives(DerivativeOrder::First, HessianStructure::BlockDiagonal)
                .gradient;
            numeric.column_mut(col).assign(&((&gp - &gm) / (2.0 * h)));
        }
        estimator.params = JointParameters::from_theta(theta.clone(), 2, 2);
        numeric
    }

    #[test]
    fn block_diagonal_hessian_matches_finite_differences_on_its_blocks() {
        let (data, beta, sigma) = small_problem();
        let mut estimator = MleEstimator::new(&data, 2, beta.view(), sigma.view()).unwrap();
        let theta = estimator.parameters().theta().to_owned();
        let analytic = estimator
            .derivatives(DerivativeOrder::Second, HessianStructure::BlockDiagonal)
            .hessian
            .unwrap();
        let numeric = finite_difference_hessian(&mut estimator, &theta);

        let scale = numeric.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
        for r in 0..4 {
            for c in 0..4 {
                assert_abs_diff_eq!(analytic[[r, c]], numeric[[r, c]], epsilon = 1e-5 * scale);
            }
        }
        for d in 4..7 {
            assert_abs_diff_eq!(analytic[[d, d]], numeric[[d, d]], epsilon = 1e-5 * scale);
        }
        // The omitted cross block really is zero.
        assert_eq!(analytic.slice(s![..4, 4..]).sum(), 0.0);
    }

    #[test]
    fn full_hessian_matches_finite_differences_everywhere() {
        let (data, beta, sigma) = small_problem();
        let mut estimator = MleEstimator::new(&data, 2, beta.view(), sigma.view()).unwrap();
        let theta = estimator.parameters().theta().to_owned();
        let analytic = estimator
            .derivatives(DerivativeOrder::Second, HessianStructure::Full)
            .hessian
            .unwrap();
        let numeric = finite_difference_hessian(&mut estimator, &theta);

        let scale = numeric.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
        for r in 0..7 {
            for c in 0..7 {
                // The scale block is diagonal by construction: σ_m and σ_m'
                // never share a term.
                assert_abs_diff_eq!(analytic[[r, c]], numeric[[r, c]], epsilon = 1e-5 * scale);
            }
        }
    }

    #[test]
    fn zeroed_annotator_column_contributes_nothing() {
        let (data, beta, sigma) = small_problem();
        let mut a = data.a().to_owned();
        a.column_mut(2).fill(0.0);
        let mut y_low = data.y().to_owned();
        y_low.column_mut(2).fill(0.0);
        let mut y_high = data.y().to_owned();
        y_high.column_mut(2).fill(2.0);

        let low = AnnotationData::new(data.x().to_owned(), y_low, a.clone()).unwrap();
        let high = AnnotationData::new(data.x().to_owned(), y_high, a).unwrap();
        let e_low = MleEstimator::new(&low, 2, beta.view(), sigma.view()).unwrap();
        let e_high = MleEstimator::new(&high, 2, beta.view(), sigma.view()).unwrap();

        let d_low = e_low.derivatives(DerivativeOrder::Second, HessianStructure::Full);
        let d_high = e_high.derivatives(DerivativeOrder::Second, HessianStructure::Full);
        assert_eq!(d_low.gradient, d_high.gradient);
        assert_eq!(d_low.hessian, d_high.hessian);
        assert_eq!(e_low.compute_likelihood(), e_high.compute_likelihood());

        let sigma_index = 2 * 2 + 2;
        assert_eq!(d_low.gradient[sigma_index], 0.0);
        let hessian = d_low.hessian.unwrap();
        assert!(hessian.row(sigma_index).iter().all(|&v| v == 0.0));
        assert!(e_low.pinned_indices().contains(&sigma_index));
    }

    #[test]
    fn newton_keeps_reference_scale_and_monotone_history() {
        let (data, beta, sigma) = small_problem();
        let mut estimator = MleEstimator::new(&data, 2, beta.view(), sigma.view()).unwrap();
        let outcome = estimator
            .newton_raphson(&NewtonConfig {
                max_steps: 20,
                ..NewtonConfig::default()
            })
            .unwrap();

        assert_eq!(outcome.sigma[0], 1.0);
        assert_eq!(estimator.sigma()[0], 1.0);
        let history = estimator.likelihood_history();
        assert_eq!(history.len(), outcome.steps);
        for pair in history[..history.len() - 1].windows(2) {
            assert!(pair[1] >= pair[0], "likelihood decreased before termination: {pair:?}");
        }
        if outcome.reason == StopReason::LikelihoodDecreased {
            assert!(history.len() >= 2);
            assert_eq!(estimator.compute_likelihood(), history[history.len() - 2]);
        }
    }

    #[test]
    fn gradient_ascent_improves_the_likelihood() {
        let (data, beta, sigma) = small_problem();
        let mut estimator = MleEstimator::new(&data, 2, beta.view(), sigma.view()).unwrap();
        let start = estimator.compute_likelihood();
        let outcome = estimator.gradient_ascent(&GradientAscentConfig {
            max_steps: 30,
            learning_rate: 0.05,
            penalty: 0.0,
            ..GradientAscentConfig::default()
        });
        assert_eq!(outcome.sigma[0], 1.0);
        assert!(estimator.compute_likelihood() > start);
    }

    #[test]
    fn rejects_mismatched_initial_values() {
        let (data, _, sigma) = small_problem();
        let beta = Array2::<f64>::zeros((3, 2));
        assert!(matches!(
            MleEstimator::new(&data, 2, beta.view(), sigma.view()),
            Err(EstimationError::InvalidParameters(_))
        ));
    }
}
