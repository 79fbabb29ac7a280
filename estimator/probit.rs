//! Probit regression without intercept, fitted by Newton-Raphson.
//!
//! This is the auxiliary fit the one-step estimator uses for its starting
//! values: once on annotator 0's labels against the full design matrix, and
//! once per remaining annotator against the single predictor `Xβ̂`.

use crate::estimate::EstimationError;
use crate::link::ProbitTerms;
use crate::model::ProbitConfig;
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::Solve;

#[derive(Clone, Debug)]
pub struct ProbitFit {
    pub coefficients: Array1<f64>,
    pub log_likelihood: f64,
    pub iterations: usize,
    /// Largest absolute coefficient step of the final iteration.
    pub last_change: f64,
}

const MAX_STEP_HALVINGS: usize = 30;

fn probit_log_likelihood(x: ArrayView2<f64>, y: ArrayView1<f64>, beta: &Array1<f64>) -> f64 {
    ProbitTerms::from_predictor(x.dot(beta)).log_likelihood(&y).sum()
}

/// Fits `P(y = 1 | x) = Φ(xᵗβ)` by Newton-Raphson with step halving.
///
/// `annotator` is only used to label errors. Fails when there are no rows,
/// when the labels do not vary, or when the iterations do not converge.
pub fn fit_probit(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    annotator: usize,
    options: &ProbitConfig,
) -> Result<ProbitFit, EstimationError> {
    if x.nrows() == 0 {
        return Err(EstimationError::DegenerateAnnotator {
            annotator,
            reason: "no annotated examples".to_string(),
        });
    }
    let positives = y.iter().filter(|&&v| v == 1.0).count();
    if positives == 0 || positives == y.len() {
        return Err(EstimationError::DegenerateAnnotator {
            annotator,
            reason: format!("all {} labels are identical", y.len()),
        });
    }

    let mut beta = Array1::<f64>::zeros(x.ncols());
    let mut log_likelihood = probit_log_likelihood(x, y, &beta);
    let mut last_change = f64::INFINITY;

    for iteration in 1..=options.max_iterations {
        let terms = ProbitTerms::from_predictor(x.dot(&beta));
        let weights = terms.score_weights(&y);
        let curvature = terms.curvature(&weights);

        let score = x.t().dot(&weights);
        let weighted_x = &x * &curvature.view().insert_axis(Axis(1));
        let hessian = x.t().dot(&weighted_x);

        // Newton direction for a maximization: -H⁻¹g.
        let direction = hessian
            .solve(&score)
            .map_err(EstimationError::LinearSystemSolveFailed)?
            .mapv(|v| -v);

        let mut step = 1.0_f64;
        let mut candidate = &beta + &direction;
        let mut candidate_ll = probit_log_likelihood(x, y, &candidate);
        let mut halvings = 0;
        while !(candidate_ll.is_finite() && candidate_ll >= log_likelihood - 1e-12)
            && halvings < MAX_STEP_HALVINGS
        {
            step *= 0.5;
            candidate = &beta + &(step * &direction);
            candidate_ll = probit_log_likelihood(x, y, &candidate);
            halvings += 1;
        }

        last_change = (&candidate - &beta)
            .iter()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        beta = candidate;
        log_likelihood = candidate_ll;

        if options.silent {
            log::trace!(
                "probit annotator {annotator} iteration {iteration}: loglik {log_likelihood:.6}, step {last_change:.3e}"
            );
        } else {
            log::debug!(
                "probit annotator {annotator} iteration {iteration}: loglik {log_likelihood:.6}, step {last_change:.3e}"
            );
        }

        if last_change < options.tolerance {
            return Ok(ProbitFit {
                coefficients: beta,
                log_likelihood,
                iterations: iteration,
                last_change,
            });
        }
    }

    log::warn!(
        "probit fit for annotator {annotator} stopped after {} iterations (last step {last_change:.3e})",
        options.max_iterations
    );
    Err(EstimationError::ProbitDidNotConverge {
        annotator,
        iterations: options.max_iterations,
        last_change,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::normal_cdf;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    #[test]
    fn recovers_coefficients_from_probit_data() {
        let n = 20_000;
        let mut rng = StdRng::seed_from_u64(7);
        let x = Array2::from_shape_fn((n, 2), |_| rng.sample::<f64, _>(StandardNormal));
        let truth = array![0.8, -1.2];
        let eta = x.dot(&truth);
        let y = eta.mapv(|e| if rng.r#gen::<f64>() < normal_cdf(e) { 1.0 } else { 0.0 });

        let fit = fit_probit(x.view(), y.view(), 0, &ProbitConfig::default()).unwrap();
        assert!(fit.iterations < 35);
        assert_abs_diff_eq!(fit.coefficients[0], 0.8, epsilon = 0.06);
        assert_abs_diff_eq!(fit.coefficients[1], -1.2, epsilon = 0.08);
        assert!(fit.log_likelihood < 0.0);
    }

    #[test]
    fn constant_labels_are_degenerate() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![1.0, 1.0, 1.0];
        let err = fit_probit(x.view(), y.view(), 4, &ProbitConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            EstimationError::DegenerateAnnotator { annotator: 4, .. }
        ));
    }

    #[test]
    fn empty_subset_is_degenerate() {
        let x = Array2::<f64>::zeros((0, 2));
        let y = Array1::<f64>::zeros(0);
        assert!(matches!(
            fit_probit(x.view(), y.view(), 2, &ProbitConfig::default()),
            Err(EstimationError::DegenerateAnnotator { annotator: 2, .. })
        ));
    }

    #[test]
    fn iteration_budget_exhaustion_is_an_error() {
        let x = array![[1.0], [-1.0], [0.5], [-0.3]];
        let y = array![1.0, 0.0, 0.0, 1.0];
        let options = ProbitConfig {
            max_iterations: 1,
            tolerance: 0.0,
            silent: false,
        };
        assert!(matches!(
            fit_probit(x.view(), y.view(), 0, &options),
            Err(EstimationError::ProbitDidNotConverge { iterations: 1, .. })
        ));
    }
}
