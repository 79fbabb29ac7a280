use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use std::ops::Deref;

/// Index of the annotator whose scale is fixed to one.
pub const REFERENCE_ANNOTATOR: usize = 0;

/// Binary-link coefficient vector β (length p).
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct Coefficients(pub Array1<f64>);

impl Coefficients {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    pub fn as_view(&self) -> ArrayView1<'_, f64> {
        self.0.view()
    }
}

impl Deref for Coefficients {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Per-annotator scale vector σ.
///
/// The reference annotator's entry is pinned to exactly `1.0`; every
/// constructor and mutator re-establishes that, so `σ[0] == 1` holds for any
/// value of this type.
#[derive(Clone, Debug, PartialEq)]
pub struct Scales(Array1<f64>);

impl Scales {
    /// Builds scales from raw values, overwriting the reference entry with one.
    pub fn normalized(mut values: Array1<f64>) -> Self {
        if let Some(reference) = values.get_mut(REFERENCE_ANNOTATOR) {
            *reference = 1.0;
        }
        Self(values)
    }

    pub fn ones(num_annotators: usize) -> Self {
        Self(Array1::ones(num_annotators))
    }

    pub fn as_view(&self) -> ArrayView1<'_, f64> {
        self.0.view()
    }

    /// Sets a non-reference entry. Writes to the reference entry are ignored.
    pub fn set(&mut self, annotator: usize, value: f64) {
        if annotator != REFERENCE_ANNOTATOR {
            self.0[annotator] = value;
        }
    }

    /// Values excluding the reference annotator.
    pub fn free(&self) -> ArrayView1<'_, f64> {
        self.0.slice(s![REFERENCE_ANNOTATOR + 1..])
    }
}

impl Deref for Scales {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Joint parameter vector θ = (vec(β), σ) of the multinomial estimator.
///
/// `β` is a `classes × features` matrix stored row-major in the first
/// `classes · features` entries; σ occupies the trailing `annotators` entries.
#[derive(Clone, Debug, PartialEq)]
pub struct JointParameters {
    theta: Array1<f64>,
    classes: usize,
    features: usize,
}

impl JointParameters {
    pub fn from_parts(beta: ArrayView2<f64>, sigma: ArrayView1<f64>) -> Self {
        let (classes, features) = beta.dim();
        let mut theta = Array1::zeros(classes * features + sigma.len());
        theta
            .slice_mut(s![..classes * features])
            .assign(&Array1::from_iter(beta.iter().copied()));
        theta.slice_mut(s![classes * features..]).assign(&sigma);
        Self {
            theta,
            classes,
            features,
        }
    }

    pub fn from_theta(theta: Array1<f64>, classes: usize, features: usize) -> Self {
        Self {
            theta,
            classes,
            features,
        }
    }

    pub fn coefficient_len(&self) -> usize {
        self.classes * self.features
    }

    pub fn len(&self) -> usize {
        self.theta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.theta.is_empty()
    }

    pub fn theta(&self) -> ArrayView1<'_, f64> {
        self.theta.view()
    }

    pub fn theta_mut(&mut self) -> &mut Array1<f64> {
        &mut self.theta
    }

    /// Coefficient view reshaped to `classes × features`.
    pub fn beta(&self) -> ArrayView2<'_, f64> {
        self.theta
            .slice(s![..self.coefficient_len()])
            .into_shape_with_order((self.classes, self.features))
            .expect("coefficient segment is contiguous and sized classes * features")
    }

    pub fn sigma(&self) -> ArrayView1<'_, f64> {
        self.theta.slice(s![self.coefficient_len()..])
    }

    /// Splits θ into owned `(β, σ)`.
    pub fn split(&self) -> (Array2<f64>, Array1<f64>) {
        (self.beta().to_owned(), self.sigma().to_owned())
    }

    pub fn into_theta(self) -> Array1<f64> {
        self.theta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn scales_always_pin_the_reference_annotator() {
        let mut scales = Scales::normalized(array![3.0, 0.5, 2.0]);
        assert_eq!(scales[0], 1.0);
        scales.set(0, 9.0);
        scales.set(2, 4.0);
        assert_eq!(scales[0], 1.0);
        assert_eq!(scales[2], 4.0);
        assert_eq!(scales.free().to_vec(), vec![0.5, 4.0]);
    }

    #[test]
    fn theta_split_and_concatenate_round_trip_exactly() {
        let beta = array![[0.1, -2.5, 3.25], [1.0e-7, 4.0, -0.0]];
        let sigma = array![1.0, 0.3, 7.5, 12.0];
        let joint = JointParameters::from_parts(beta.view(), sigma.view());
        assert_eq!(joint.len(), 2 * 3 + 4);
        assert_eq!(joint.theta()[3], 1.0e-7);

        let (b, s) = joint.split();
        assert_eq!(b, beta);
        assert_eq!(s, sigma);

        let rebuilt = JointParameters::from_parts(b.view(), s.view());
        assert_eq!(rebuilt.theta(), joint.theta());
        let again = JointParameters::from_theta(rebuilt.into_theta(), 2, 3);
        assert_eq!(again, joint);
    }
}
