use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// How a partition function is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PfuncMethod {
    /// Bounding tree refined where the gap between its bounds is largest.
    #[default]
    MarkStar,
    /// Conformations enumerated in A* order and minimized one after another.
    Traditional,
}

/// Order in which equally ranked sequences are considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TieBreak {
    /// Earlier-created sequences first.
    #[default]
    Forward,
    /// Later-created sequences first.
    Reverse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceParams {
    /// Required separation, in log10 units, between the worst lower bound of the top
    /// sequences and the best upper bound of the rest.
    pub margin_log10: f64,
    /// Keep refining top sequences after the ranking is certified until each is terminal.
    pub require_converged_top: bool,
    pub tie_break: TieBreak,
    /// Upper limit on sequence refinement steps.
    pub max_steps: Option<usize>,
}

impl Default for ConfidenceParams {
    fn default() -> Self {
        Self {
            margin_log10: 0.0,
            require_converged_top: true,
            tie_break: TieBreak::Forward,
            max_steps: None,
        }
    }
}

/// Per-estimator refinement settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorSettings {
    /// Target bound ratio: converged once `Z_hi / Z_lo <= 1 + epsilon`.
    pub epsilon: f64,
    /// Minimizations merged per refinement step.
    pub confs_per_batch: usize,
    pub max_minimizations: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BbkStarConfig {
    pub num_best_sequences: usize,
    pub estimator: EstimatorSettings,
    pub method: PfuncMethod,
    /// Maximum destabilization of an unbound state relative to wild type, in kcal/mol.
    pub stability_threshold: Option<f64>,
    pub max_simultaneous_mutations: Option<usize>,
    pub confidence: ConfidenceParams,
    pub matrix_cache_dir: Option<PathBuf>,
}

#[derive(Default)]
pub struct BbkStarConfigBuilder {
    num_best_sequences: Option<usize>,
    epsilon: Option<f64>,
    confs_per_batch: Option<usize>,
    max_minimizations: Option<usize>,
    method: Option<PfuncMethod>,
    stability_threshold: Option<f64>,
    max_simultaneous_mutations: Option<usize>,
    confidence: Option<ConfidenceParams>,
    matrix_cache_dir: Option<PathBuf>,
}

impl BbkStarConfigBuilder {
    pub const DEFAULT_CONFS_PER_BATCH: usize = 8;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_best_sequences(mut self, n: usize) -> Self {
        self.num_best_sequences = Some(n);
        self
    }
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = Some(epsilon);
        self
    }
    pub fn confs_per_batch(mut self, n: usize) -> Self {
        self.confs_per_batch = Some(n);
        self
    }
    pub fn max_minimizations(mut self, n: Option<usize>) -> Self {
        self.max_minimizations = n;
        self
    }
    pub fn method(mut self, method: PfuncMethod) -> Self {
        self.method = Some(method);
        self
    }
    pub fn stability_threshold(mut self, threshold: Option<f64>) -> Self {
        self.stability_threshold = threshold;
        self
    }
    pub fn max_simultaneous_mutations(mut self, n: Option<usize>) -> Self {
        self.max_simultaneous_mutations = n;
        self
    }
    pub fn confidence(mut self, confidence: ConfidenceParams) -> Self {
        self.confidence = Some(confidence);
        self
    }
    pub fn matrix_cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.matrix_cache_dir = dir;
        self
    }

    pub fn build(self) -> Result<BbkStarConfig, ConfigError> {
        let num_best_sequences = self
            .num_best_sequences
            .ok_or(ConfigError::MissingParameter("num_best_sequences"))?;
        if num_best_sequences == 0 {
            return Err(invalid("num_best_sequences", "must be at least 1"));
        }

        let epsilon = self
            .epsilon
            .ok_or(ConfigError::MissingParameter("epsilon"))?;
        if !epsilon.is_finite() || epsilon <= 0.0 {
            return Err(invalid("epsilon", format!("must be positive and finite, got {epsilon}")));
        }

        let confs_per_batch = self
            .confs_per_batch
            .unwrap_or(Self::DEFAULT_CONFS_PER_BATCH);
        if confs_per_batch == 0 {
            return Err(invalid("confs_per_batch", "must be at least 1"));
        }

        if self.max_minimizations == Some(0) {
            return Err(invalid("max_minimizations", "must be at least 1 when set"));
        }

        if let Some(threshold) = self.stability_threshold {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(invalid(
                    "stability_threshold",
                    format!("must be non-negative and finite, got {threshold}"),
                ));
            }
        }

        let confidence = self.confidence.unwrap_or_default();
        if !confidence.margin_log10.is_finite() || confidence.margin_log10 < 0.0 {
            return Err(invalid(
                "margin",
                format!("must be non-negative and finite, got {}", confidence.margin_log10),
            ));
        }
        if confidence.max_steps == Some(0) {
            return Err(invalid("max_steps", "must be at least 1 when set"));
        }

        Ok(BbkStarConfig {
            num_best_sequences,
            estimator: EstimatorSettings {
                epsilon,
                confs_per_batch,
                max_minimizations: self.max_minimizations,
            },
            method: self.method.unwrap_or_default(),
            stability_threshold: self.stability_threshold,
            max_simultaneous_mutations: self.max_simultaneous_mutations,
            confidence,
            matrix_cache_dir: self.matrix_cache_dir,
        })
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}
