//! # Estimation Entry Points
//!
//! `fit_one_step` and `fit_mle` validate the input once, run the chosen
//! estimator and return owned results. Everything that can go wrong during
//! estimation is reported through `EstimationError`.

use crate::data::{AnnotationData, DataError};
use crate::mle::{MleEstimator, SolveOutcome, StopReason};
use crate::model::{EstimatorConfig, MleSolver};
use crate::one_step::{OneStepDiagnostics, OneStepEstimator};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use thiserror::Error;

/// Probit coefficients rescaled to the logistic scale of the multinomial model.
pub const PROBIT_TO_LOGIT: f64 = 1.702;

#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("A linear system solve failed. The Hessian may be singular. Error: {0}")]
    LinearSystemSolveFailed(ndarray_linalg::error::LinalgError),

    #[error(
        "The probit fit for annotator {annotator} did not converge within {iterations} iterations. Last coefficient change was {last_change:.6e}."
    )]
    ProbitDidNotConverge {
        annotator: usize,
        iterations: usize,
        last_change: f64,
    },

    #[error("Annotator {annotator} cannot be fitted: {reason}")]
    DegenerateAnnotator { annotator: usize, reason: String },

    #[error("The probit slope of annotator {annotator} is zero or not finite, so its scale is undefined.")]
    ZeroScaleCoefficient { annotator: usize },

    #[error("The σ curvature of annotator {annotator} is zero or not finite.")]
    NonFiniteCurvature { annotator: usize },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid input data: {0}")]
    Data(#[from] DataError),
}

/// Mean of squared element-wise differences. Zero for empty inputs.
pub fn mean_squared_error(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let diff = &a - &b;
    diff.dot(&diff) / a.len() as f64
}

#[derive(Clone, Debug)]
pub struct OneStepFit {
    pub beta: Array1<f64>,
    pub sigma: Array1<f64>,
    pub beta_initial: Array1<f64>,
    pub sigma_initial: Array1<f64>,
    pub diagnostics: OneStepDiagnostics,
}

#[derive(Clone, Debug)]
pub struct MleFit {
    /// `classes × p`.
    pub beta: Array2<f64>,
    pub sigma: Array1<f64>,
    pub reason: StopReason,
    pub steps: usize,
    pub likelihood_history: Vec<f64>,
    pub update_norms: Vec<f64>,
}

/// Starting point of the multinomial fit.
#[derive(Clone, Debug)]
pub enum MleInitialization {
    /// β and σ all ones.
    Ones,
    /// One-step fit on the labels collapsed to "class 0 vs the rest", with
    /// every class row set to the rescaled one-step β.
    OneStep,
    Provided { beta: Array2<f64>, sigma: Array1<f64> },
}

/// Probit initialization followed by the one-step correction.
pub fn fit_one_step(
    data: &AnnotationData,
    config: &EstimatorConfig,
) -> Result<OneStepFit, EstimationError> {
    log::info!(
        "Starting one-step estimation: {} examples, {} features, {} annotators.",
        data.num_examples(),
        data.num_features(),
        data.num_annotators()
    );
    let mut estimator = OneStepEstimator::new(data, config.probit)?;
    let diagnostics = estimator.run()?;
    Ok(OneStepFit {
        beta: estimator.beta_hat().to_owned(),
        sigma: estimator.sigma_hat().to_owned(),
        beta_initial: estimator.beta_initial().to_owned(),
        sigma_initial: estimator.sigma_initial().to_owned(),
        diagnostics,
    })
}

/// Fits the multinomial model with `classes` non-reference classes.
pub fn fit_mle(
    data: &AnnotationData,
    classes: usize,
    initialization: MleInitialization,
    config: &EstimatorConfig,
) -> Result<MleFit, EstimationError> {
    let (beta, sigma) = match initialization {
        MleInitialization::Ones => (
            Array2::ones((classes, data.num_features())),
            Array1::ones(data.num_annotators()),
        ),
        MleInitialization::OneStep => one_step_initialization(data, classes, config)?,
        MleInitialization::Provided { beta, sigma } => (beta, sigma),
    };
    log::info!(
        "Starting MLE with {classes} classes and the {:?} solver.",
        config.solver
    );

    let mut estimator = MleEstimator::new(data, classes, beta.view(), sigma.view())?;
    let SolveOutcome {
        beta,
        sigma,
        reason,
        steps,
        update_norms,
    } = match config.solver {
        MleSolver::NewtonRaphson => estimator.newton_raphson(&config.newton)?,
        MleSolver::GradientAscent => estimator.gradient_ascent(&config.gradient_ascent),
    };

    let beta = beta
        .into_shape_with_order((classes, data.num_features()))
        .map_err(|e| EstimationError::InvalidParameters(e.to_string()))?;
    Ok(MleFit {
        beta,
        sigma,
        reason,
        steps,
        likelihood_history: estimator.likelihood_history().to_vec(),
        update_norms,
    })
}

fn one_step_initialization(
    data: &AnnotationData,
    classes: usize,
    config: &EstimatorConfig,
) -> Result<(Array2<f64>, Array1<f64>), EstimationError> {
    let binary = data.masked_labels().mapv(|y| if y > 0.0 { 1.0 } else { 0.0 });
    let collapsed = AnnotationData::new(data.x().to_owned(), binary, data.a().to_owned())?;
    let fit = fit_one_step(&collapsed, config)?;

    let row = fit.beta.mapv(|b| b * PROBIT_TO_LOGIT);
    let mut beta = Array2::zeros((classes, data.num_features()));
    for mut class_row in beta.axis_iter_mut(Axis(0)) {
        class_row.assign(&row);
    }
    Ok((beta, fit.sigma))
}
