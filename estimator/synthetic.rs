//! Synthetic crowdsourcing data for tests, benchmarks and the `simulate` command.
//!
//! Draw order is fixed (features, then annotation indicators, then labels), so
//! a given seed always yields the same data.

use crate::data::{AnnotationData, DataError};
use crate::link::normal_cdf;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub examples: usize,
    pub seed: u64,
    /// `K × p` coefficients. The probit simulator uses the first row only.
    pub beta: Array2<f64>,
    /// One scale per annotator.
    pub sigma: Array1<f64>,
    /// Probability that any given `(example, annotator)` pair is annotated.
    pub annotation_rate: f64,
}

/// Scales for the two-level benchmark: annotator 0 at one, the first half of
/// the rest at 0.1 and the second half at 10.
pub fn two_level_scales(annotators: usize) -> Array1<f64> {
    Array1::from_shape_fn(annotators, |m| match m {
        0 => 1.0,
        m if m < annotators / 2 => 0.1,
        _ => 10.0,
    })
}

/// `n × p` matrix of independent standard normal draws.
pub fn design_matrix(examples: usize, features: usize, rng: &mut StdRng) -> Array2<f64> {
    Array2::from_shape_fn((examples, features), |_| rng.sample(StandardNormal))
}

/// `A[i,m] ~ Bernoulli(rate)`.
pub fn annotation_mask(examples: usize, annotators: usize, rate: f64, rng: &mut StdRng) -> Array2<f64> {
    Array2::from_shape_fn((examples, annotators), |_| {
        if rng.r#gen::<f64>() < rate { 1.0 } else { 0.0 }
    })
}

/// Binary labels with `P(Y[i,m] = 1) = Φ(X_i β / σ_m)`. Unannotated entries are `NaN`.
pub fn probit_annotations(
    x: ArrayView2<f64>,
    beta: ArrayView1<f64>,
    sigma: ArrayView1<f64>,
    a: ArrayView2<f64>,
    rng: &mut StdRng,
) -> Array2<f64> {
    let eta = x.dot(&beta);
    Array2::from_shape_fn(a.dim(), |(i, m)| {
        if a[[i, m]] == 0.0 {
            return f64::NAN;
        }
        if rng.r#gen::<f64>() < normal_cdf(eta[i] / sigma[m]) {
            1.0
        } else {
            0.0
        }
    })
}

/// Categorical labels in `0..=K` drawn from the multinomial logit with
/// class 0 as the reference. Unannotated entries are `NaN`.
pub fn softmax_annotations(
    x: ArrayView2<f64>,
    beta: ArrayView2<f64>,
    sigma: ArrayView1<f64>,
    a: ArrayView2<f64>,
    rng: &mut StdRng,
) -> Array2<f64> {
    let eta = x.dot(&beta.t());
    let classes = beta.nrows();
    let mut weights = vec![0.0; classes + 1];
    Array2::from_shape_fn(a.dim(), |(i, m)| {
        if a[[i, m]] == 0.0 {
            return f64::NAN;
        }
        let scaled: Vec<f64> = (0..classes).map(|k| eta[[i, k]] / sigma[m]).collect();
        let shift = scaled.iter().fold(0.0_f64, |acc, &v| acc.max(v));
        weights[0] = (-shift).exp();
        for (k, value) in scaled.iter().enumerate() {
            weights[k + 1] = (value - shift).exp();
        }
        let total: f64 = weights.iter().sum();

        let draw = rng.r#gen::<f64>() * total;
        let mut cumulative = 0.0;
        for (class, weight) in weights.iter().enumerate() {
            cumulative += weight;
            if draw < cumulative {
                return class as f64;
            }
        }
        classes as f64
    })
}

fn check_config(config: &SyntheticConfig) -> Result<(), DataError> {
    if config.beta.nrows() == 0 {
        return Err(DataError::Empty("coefficient matrix".to_string()));
    }
    if config.sigma.is_empty() {
        return Err(DataError::Empty("scale vector".to_string()));
    }
    Ok(())
}

/// Binary data under the probit annotation model.
pub fn simulate_probit(config: &SyntheticConfig) -> Result<AnnotationData, DataError> {
    check_config(config)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let x = design_matrix(config.examples, config.beta.ncols(), &mut rng);
    let a = annotation_mask(config.examples, config.sigma.len(), config.annotation_rate, &mut rng);
    let y = probit_annotations(
        x.view(),
        config.beta.row(0),
        config.sigma.view(),
        a.view(),
        &mut rng,
    );
    AnnotationData::new(x, y, a)
}

/// Categorical data with `config.beta.nrows()` non-reference classes.
pub fn simulate_softmax(config: &SyntheticConfig) -> Result<AnnotationData, DataError> {
    check_config(config)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let x = design_matrix(config.examples, config.beta.ncols(), &mut rng);
    let a = annotation_mask(config.examples, config.sigma.len(), config.annotation_rate, &mut rng);
    let y = softmax_annotations(
        x.view(),
        config.beta.view(),
        config.sigma.view(),
        a.view(),
        &mut rng,
    );
    AnnotationData::new(x, y, a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn config() -> SyntheticConfig {
        SyntheticConfig {
            examples: 2000,
            seed: 42,
            beta: array![[1.0, -1.0], [0.5, 0.5]],
            sigma: array![1.0, 3.0],
            annotation_rate: 0.25,
        }
    }

    #[test]
    fn same_seed_gives_identical_data() {
        let first = simulate_softmax(&config()).unwrap();
        let second = simulate_softmax(&config()).unwrap();
        assert_eq!(first.x(), second.x());
        assert_eq!(first.a(), second.a());
        assert_eq!(first.masked_labels(), second.masked_labels());
    }

    #[test]
    fn unannotated_labels_are_nan_and_rate_is_respected() {
        let data = simulate_probit(&config()).unwrap();
        for ((i, m), &indicator) in data.a().indexed_iter() {
            assert_eq!(data.y()[[i, m]].is_nan(), indicator == 0.0);
        }
        let rate = data.a().mean().unwrap();
        assert_abs_diff_eq!(rate, 0.25, epsilon = 0.03);
        assert!(data.require_classes(1).is_ok());
    }

    #[test]
    fn softmax_labels_cover_every_class() {
        let data = simulate_softmax(&config()).unwrap();
        assert!(data.require_classes(2).is_ok());
        let labels = data.masked_labels();
        for class in 0..=2 {
            let count = labels
                .indexed_iter()
                .filter(|(idx, v)| data.a()[*idx] == 1.0 && **v == class as f64)
                .count();
            assert!(count > 0, "class {class} never drawn");
        }
    }

    #[test]
    fn two_level_scales_split_the_annotators() {
        assert_eq!(two_level_scales(6).to_vec(), vec![1.0, 0.1, 0.1, 10.0, 10.0, 10.0]);
        assert_eq!(two_level_scales(1).to_vec(), vec![1.0]);
    }

    #[test]
    fn empty_coefficients_are_rejected() {
        let mut bad = config();
        bad.beta = Array2::zeros((0, 2));
        assert!(matches!(simulate_probit(&bad), Err(DataError::Empty(_))));
    }
}
