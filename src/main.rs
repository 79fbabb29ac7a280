use crowdprobit::data::AnnotationData;
use crowdprobit::estimate::{MleInitialization, fit_mle, fit_one_step, mean_squared_error};
use crowdprobit::model::{EstimatorConfig, FitReport, ReportDiagnostics};
use crowdprobit::synthetic::{SyntheticConfig, simulate_probit, simulate_softmax, two_level_scales};

use clap::{Parser, Subcommand, ValueEnum};
use ndarray::{Array1, Array2, Axis};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;

const TRUTH_FILE: &str = "truth.toml";

#[derive(Parser)]
#[command(
    name = "crowdprobit",
    about = "Estimate a shared classifier and per-annotator precision from crowdsourced labels",
    long_about = "Fits the probit annotation model with the one-step estimator, or the \
                  multinomial model by full maximum likelihood, from tab-separated \
                  features.tsv, labels.tsv and annotations.tsv files."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InitKind {
    /// One-step fit on the labels collapsed to binary
    Os,
    /// β and σ all ones
    Ones,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic dataset together with its true parameters
    #[command(about = "Simulate annotations (outputs: features.tsv, labels.tsv, annotations.tsv, truth.toml)")]
    Simulate {
        /// Directory the files are written to
        out_dir: PathBuf,

        #[arg(long, default_value = "10000")]
        examples: usize,

        #[arg(long, default_value = "5")]
        features: usize,

        #[arg(long, default_value = "10")]
        annotators: usize,

        /// Non-reference classes. Zero draws binary probit labels.
        #[arg(long, default_value = "0")]
        classes: usize,

        /// Probability that an annotator labels a given example
        #[arg(long, default_value = "0.1")]
        rate: f64,

        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Run the one-step estimator on binary labels
    #[command(about = "One-step estimation of β and σ")]
    Os {
        /// Directory holding the three input matrices
        data_dir: PathBuf,

        /// TOML file overriding estimator settings
        #[arg(long)]
        config: Option<PathBuf>,

        /// Where to write the fit report
        #[arg(long)]
        report: Option<PathBuf>,

        /// Report written by `simulate`, used to print the estimation error
        #[arg(long)]
        truth: Option<PathBuf>,
    },

    /// Fit the multinomial model by maximum likelihood
    #[command(about = "Maximum-likelihood estimation of β and σ")]
    Mle {
        data_dir: PathBuf,

        /// Number of non-reference classes
        #[arg(long)]
        classes: usize,

        #[arg(long, value_enum, default_value = "os")]
        init: InitKind,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        report: Option<PathBuf>,

        #[arg(long)]
        truth: Option<PathBuf>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate {
            out_dir,
            examples,
            features,
            annotators,
            classes,
            rate,
            seed,
        } => simulate_command(&out_dir, examples, features, annotators, classes, rate, seed),
        Commands::Os {
            data_dir,
            config,
            report,
            truth,
        } => os_command(&data_dir, config.as_deref(), report.as_deref(), truth.as_deref()),
        Commands::Mle {
            data_dir,
            classes,
            init,
            config,
            report,
            truth,
        } => mle_command(
            &data_dir,
            classes,
            init,
            config.as_deref(),
            report.as_deref(),
            truth.as_deref(),
        ),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn simulate_command(
    out_dir: &Path,
    examples: usize,
    features: usize,
    annotators: usize,
    classes: usize,
    rate: f64,
    seed: u64,
) -> Result<(), Box<dyn Error>> {
    let config = SyntheticConfig {
        examples,
        seed,
        beta: Array2::ones((classes.max(1), features)),
        sigma: two_level_scales(annotators),
        annotation_rate: rate,
    };
    println!(
        "Simulating {examples} examples, {features} features, {annotators} annotators (seed {seed})"
    );
    let (data, estimator) = if classes == 0 {
        (simulate_probit(&config)?, "truth-probit")
    } else {
        (simulate_softmax(&config)?, "truth-softmax")
    };
    data.save_dir(out_dir)?;

    let truth = FitReport::new(
        estimator,
        (examples, features, annotators),
        &config.beta,
        &config.sigma,
        ReportDiagnostics::default(),
    );
    truth.save(&out_dir.join(TRUTH_FILE))?;
    println!("Data written to: {}", out_dir.display());
    Ok(())
}

fn load_inputs(
    data_dir: &Path,
    config_path: Option<&Path>,
) -> Result<(AnnotationData, EstimatorConfig), Box<dyn Error>> {
    let config = match config_path {
        Some(path) => {
            println!("Loading configuration from: {}", path.display());
            EstimatorConfig::load(path)?
        }
        None => EstimatorConfig::default(),
    };
    println!("Loading data from: {}", data_dir.display());
    let data = AnnotationData::load_dir(data_dir)?;
    println!(
        "Loaded {} examples with {} features from {} annotators",
        data.num_examples(),
        data.num_features(),
        data.num_annotators()
    );
    Ok((data, config))
}

fn print_against_truth(truth_path: &Path, beta: &Array2<f64>, sigma: &Array1<f64>) -> Result<(), Box<dyn Error>> {
    let truth = FitReport::load(truth_path)?;
    let true_beta: Vec<f64> = truth.beta.iter().flatten().copied().collect();
    let estimated: Vec<f64> = beta.iter().copied().collect();
    if true_beta.len() != estimated.len() || truth.sigma.len() != sigma.len() {
        return Err(format!("{} does not match the fitted dimensions", truth_path.display()).into());
    }
    let beta_mse = mean_squared_error(Array1::from(true_beta).view(), Array1::from(estimated).view());
    let sigma_mse = mean_squared_error(Array1::from(truth.sigma).view(), sigma.view());
    println!("------------- beta --------------");
    println!("final MSE: {beta_mse:.6}");
    println!("------------- sigma -------------");
    println!("final MSE: {sigma_mse:.6}");
    Ok(())
}

fn os_command(
    data_dir: &Path,
    config_path: Option<&Path>,
    report_path: Option<&Path>,
    truth_path: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let (data, config) = load_inputs(data_dir, config_path)?;
    let fit = fit_one_step(&data, &config)?;
    println!("update_beta: beta mse({:.4})", fit.diagnostics.beta_mse);
    println!("update_sigma: sigma mse({:.4})", fit.diagnostics.sigma_mse);
    println!("estimate beta: {}", fit.beta);
    println!("estimate sigma: {}", fit.sigma);

    let beta = fit.beta.clone().insert_axis(Axis(0));
    if let Some(path) = truth_path {
        print_against_truth(path, &beta, &fit.sigma)?;
    }
    if let Some(path) = report_path {
        let report = FitReport::new(
            "one-step",
            (data.num_examples(), data.num_features(), data.num_annotators()),
            &beta,
            &fit.sigma,
            ReportDiagnostics {
                beta_mse: Some(fit.diagnostics.beta_mse),
                sigma_mse: Some(fit.diagnostics.sigma_mse),
                ..Default::default()
            },
        );
        report.save(path)?;
        println!("Report saved to: {}", path.display());
    }
    Ok(())
}

fn mle_command(
    data_dir: &Path,
    classes: usize,
    init: InitKind,
    config_path: Option<&Path>,
    report_path: Option<&Path>,
    truth_path: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let (data, config) = load_inputs(data_dir, config_path)?;
    let initialization = match init {
        InitKind::Os => MleInitialization::OneStep,
        InitKind::Ones => MleInitialization::Ones,
    };
    let fit = fit_mle(&data, classes, initialization, &config)?;
    println!("Stopped after {} steps: {}", fit.steps, fit.reason.as_str());
    println!("estimate beta: {}", fit.beta);
    println!("estimate sigma: {}", fit.sigma);

    if let Some(path) = truth_path {
        print_against_truth(path, &fit.beta, &fit.sigma)?;
    }
    if let Some(path) = report_path {
        let report = FitReport::new(
            "mle",
            (data.num_examples(), data.num_features(), data.num_annotators()),
            &fit.beta,
            &fit.sigma,
            ReportDiagnostics {
                steps: Some(fit.steps),
                stop_reason: Some(fit.reason.as_str().to_string()),
                likelihood_history: fit.likelihood_history.clone(),
                ..Default::default()
            },
        );
        report.save(path)?;
        println!("Report saved to: {}", path.display());
    }
    Ok(())
}
