use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

// --- Configuration ---
// Every field has a default so a partial TOML file (or none at all) is valid.

/// Settings of the auxiliary probit fits used for initialization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbitConfig {
    pub max_iterations: usize,
    /// Convergence threshold on the largest absolute coefficient step.
    pub tolerance: f64,
    /// Demotes per-iteration progress from `debug` to `trace`.
    pub silent: bool,
}

impl Default for ProbitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 35,
            tolerance: 1e-8,
            silent: true,
        }
    }
}

/// Which blocks of the multinomial Hessian are assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HessianStructure {
    /// β–β block and σ–σ diagonal only; the β–σ cross block is left at zero.
    BlockDiagonal,
    /// Adds the analytic β–σ cross block.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonConfig {
    pub max_steps: usize,
    /// Stop once the Euclidean norm of the θ update falls below this value.
    pub epsilon: f64,
    /// Ridge subtracted from the Hessian diagonal of every free coordinate.
    pub ridge: f64,
    pub hessian: HessianStructure,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            epsilon: 1e-5,
            ridge: 0.0,
            hessian: HessianStructure::BlockDiagonal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientAscentConfig {
    pub max_steps: usize,
    pub epsilon: f64,
    pub learning_rate: f64,
    /// Ridge penalty weight on the coefficients.
    pub penalty: f64,
}

impl Default for GradientAscentConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            epsilon: 1e-5,
            learning_rate: 0.01,
            penalty: 0.01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MleSolver {
    NewtonRaphson,
    GradientAscent,
}

/// The complete estimator configuration, loadable from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub probit: ProbitConfig,
    pub solver: MleSolver,
    pub newton: NewtonConfig,
    pub gradient_ascent: GradientAscentConfig,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            probit: ProbitConfig::default(),
            solver: MleSolver::NewtonRaphson,
            newton: NewtonConfig::default(),
            gradient_ascent: GradientAscentConfig::default(),
        }
    }
}

/// Custom error type for configuration loading and report writing.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize report to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

impl EstimatorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

// --- Fit report ---
// Human-readable summary written by the command-line driver.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    pub estimator: String,
    pub num_examples: usize,
    pub num_features: usize,
    pub num_annotators: usize,
    /// One row per class; the one-step estimator reports a single row.
    pub beta: Vec<Vec<f64>>,
    pub sigma: Vec<f64>,
    pub diagnostics: ReportDiagnostics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportDiagnostics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beta_mse: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sigma_mse: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub likelihood_history: Vec<f64>,
}

impl FitReport {
    pub fn new(
        estimator: &str,
        dims: (usize, usize, usize),
        beta: &Array2<f64>,
        sigma: &Array1<f64>,
        diagnostics: ReportDiagnostics,
    ) -> Self {
        let (num_examples, num_features, num_annotators) = dims;
        Self {
            estimator: estimator.to_string(),
            num_examples,
            num_features,
            num_annotators,
            beta: beta.rows().into_iter().map(|r| r.to_vec()).collect(),
            sigma: sigma.to_vec(),
            diagnostics,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        let mut writer = BufWriter::new(fs::File::create(path)?);
        writer.write_all(text.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}
