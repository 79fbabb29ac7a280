use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use crowdprobit::data::AnnotationData;
use crowdprobit::mle::{DerivativeOrder, MleEstimator};
use crowdprobit::model::HessianStructure;
use crowdprobit::one_step::OneStepEstimator;
use crowdprobit::synthetic::{SyntheticConfig, simulate_probit, simulate_softmax};
use ndarray::{Array1, Array2, array};

fn softmax_data(examples: usize) -> AnnotationData {
    simulate_softmax(&SyntheticConfig {
        examples,
        seed: 0x5EED + examples as u64,
        beta: array![[1.0, -0.5, 0.5, 0.2], [-0.5, 1.0, 0.25, -0.3]],
        sigma: array![1.0, 0.5, 1.5, 0.8, 2.0],
        annotation_rate: 0.5,
    })
    .expect("synthetic data")
}

fn probit_data(examples: usize) -> AnnotationData {
    simulate_probit(&SyntheticConfig {
        examples,
        seed: 0x5EED + examples as u64,
        beta: Array2::ones((1, 4)),
        sigma: array![1.0, 0.5, 1.5, 0.8, 2.0],
        annotation_rate: 0.5,
    })
    .expect("synthetic data")
}

fn benchmark_derivatives(c: &mut Criterion) {
    let sizes = [1_000_usize, 10_000];
    let datasets: Vec<_> = sizes.iter().map(|&n| (n, softmax_data(n))).collect();
    let beta = Array2::<f64>::ones((2, 4));
    let sigma = Array1::<f64>::ones(5);

    let mut group = c.benchmark_group("mle_derivatives");
    for (examples, data) in datasets.iter() {
        group.throughput(Throughput::Elements(*examples as u64));
        let estimator =
            MleEstimator::new(data, 2, beta.view(), sigma.view()).expect("valid start");

        for structure in [HessianStructure::BlockDiagonal, HessianStructure::Full] {
            let id = BenchmarkId::new(format!("{structure:?}"), examples);
            group.bench_with_input(id, &estimator, |b, input| {
                b.iter(|| {
                    let derivatives = input.derivatives(DerivativeOrder::Second, black_box(structure));
                    black_box(derivatives);
                });
            });
        }
    }
    group.finish();
}

fn benchmark_one_step(c: &mut Criterion) {
    let data = probit_data(10_000);
    let mut group = c.benchmark_group("one_step");
    group.throughput(Throughput::Elements(10_000));
    group.bench_function("beta_score_and_hessian", |b| {
        let estimator =
            OneStepEstimator::from_initial(&data, Array1::ones(4), Array1::ones(5)).expect("valid start");
        b.iter(|| black_box(estimator.beta_score_and_hessian()));
    });
    group.finish();
}

criterion_group!(newton_step, benchmark_derivatives, benchmark_one_step);
criterion_main!(newton_step);
