use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, ensure};
use serde::Deserialize;
use toml::Value;

use crate::model::AwdLstmConfig;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DatasetConfig {
    pub path: PathBuf,
    #[serde(default = "default_train_file")]
    pub train: String,
    #[serde(default = "default_valid_file")]
    pub valid: String,
    #[serde(default = "default_test_file")]
    pub test: String,
    #[serde(default = "default_output")]
    pub output: String,
}

impl DatasetConfig {
    /// Checkpoint base path; the recorder appends `.bin`.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.path.join(&self.output)
    }

    pub fn loss_history_path(&self) -> PathBuf {
        self.path.join(format!("{}.csv", self.output))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.path.join(format!("{}.txt", self.output))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrainingHyperparameters {
    pub batch_size: usize,
    pub eval_batch_size: usize,
    pub bptt: usize,
    #[serde(default)]
    pub variable_bptt: bool,
    pub epochs: usize,
    pub clip: f64,
    #[serde(default)]
    pub alpha: f64,
    #[serde(default)]
    pub beta: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_log_frequency")]
    pub log_frequency: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OptimizerConfig {
    pub learning_rate: f64,
    #[serde(default = "default_anneal_factor")]
    pub anneal_factor: f64,
    #[serde(default)]
    pub weight_decay: f32,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct ModelOverrides {
    pub emb_dim: Option<usize>,
    pub hidden_dim: Option<usize>,
    pub num_layers: Option<usize>,
    pub emb_dp: Option<f64>,
    pub hidden_dp: Option<f64>,
    pub input_dp: Option<f64>,
    pub weight_dp: Option<f64>,
    pub out_dp: Option<f64>,
    pub initrange: Option<f64>,
    pub tie_weights: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrainingConfig {
    pub dataset: DatasetConfig,
    pub training: TrainingHyperparameters,
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub model: ModelOverrides,
}

impl TrainingConfig {
    /// Model hyperparameters for a vocabulary of `vocab_size` words.
    pub fn model_config(&self, vocab_size: usize) -> AwdLstmConfig {
        build_model_config(&self.model, vocab_size)
    }

    /// Rejects combinations that cannot train, before any data is touched.
    pub fn validate(&self) -> Result<()> {
        let training = &self.training;
        ensure!(training.batch_size > 0, "training.batch_size must be positive");
        ensure!(
            training.eval_batch_size > 0,
            "training.eval_batch_size must be positive"
        );
        ensure!(training.bptt > 0, "training.bptt must be positive");
        ensure!(training.clip > 0.0, "training.clip must be positive");
        ensure!(
            training.alpha >= 0.0 && training.beta >= 0.0,
            "AR/TAR weights must be non-negative (alpha={}, beta={})",
            training.alpha,
            training.beta
        );

        let optimizer = &self.optimizer;
        ensure!(
            optimizer.learning_rate > 0.0,
            "optimizer.learning_rate must be positive"
        );
        ensure!(
            optimizer.anneal_factor > 0.0,
            "optimizer.anneal_factor must be positive"
        );
        ensure!(
            optimizer.weight_decay >= 0.0,
            "optimizer.weight_decay must be non-negative"
        );

        ensure!(
            !self.dataset.output.is_empty(),
            "dataset.output must name the run artifacts"
        );

        // Vocabulary size is unknown until the corpus is read; any positive value
        // exercises the same dimension checks.
        self.model_config(1).validate()
    }
}

pub fn load_training_config(paths: &[PathBuf]) -> Result<TrainingConfig> {
    if paths.is_empty() {
        return Err(anyhow!("at least one configuration path is required"));
    }

    let mut iter = paths.iter();
    let first_path = iter
        .next()
        .ok_or_else(|| anyhow!("configuration iterator unexpectedly empty"))?;
    let mut value = load_value(first_path)?;

    for path in iter {
        let overlay = load_value(path)?;
        merge_values(&mut value, overlay);
    }

    value
        .try_into::<TrainingConfig>()
        .map_err(|err| anyhow!(err))
}

pub fn build_model_config(overrides: &ModelOverrides, vocab_size: usize) -> AwdLstmConfig {
    let mut model_config = AwdLstmConfig {
        vocab_size,
        ..AwdLstmConfig::default()
    };

    if let Some(emb_dim) = overrides.emb_dim {
        model_config.emb_dim = emb_dim;
    }
    if let Some(hidden_dim) = overrides.hidden_dim {
        model_config.hidden_dim = hidden_dim;
    }
    if let Some(num_layers) = overrides.num_layers {
        model_config.num_layers = num_layers;
    }
    if let Some(emb_dp) = overrides.emb_dp {
        model_config.emb_dp = emb_dp;
    }
    if let Some(hidden_dp) = overrides.hidden_dp {
        model_config.hidden_dp = hidden_dp;
    }
    if let Some(input_dp) = overrides.input_dp {
        model_config.input_dp = input_dp;
    }
    if let Some(weight_dp) = overrides.weight_dp {
        model_config.weight_dp = weight_dp;
    }
    if let Some(out_dp) = overrides.out_dp {
        model_config.out_dp = out_dp;
    }
    if let Some(initrange) = overrides.initrange {
        model_config.initrange = initrange;
    }
    if let Some(tie_weights) = overrides.tie_weights {
        model_config.tie_weights = tie_weights;
    }

    model_config
}

fn load_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;
    let table: toml::value::Table = toml::from_str(&content)
        .with_context(|| format!("failed to parse {} as TOML", path.display()))?;
    Ok(Value::Table(table))
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_table), Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(base_value) => merge_values(base_value, overlay_value),
                    None => {
                        base_table.insert(key, overlay_value);
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value;
        }
    }
}

fn default_train_file() -> String {
    "wiki.train.tokens".to_string()
}

fn default_valid_file() -> String {
    "wiki.valid.tokens".to_string()
}

fn default_test_file() -> String {
    "wiki.test.tokens".to_string()
}

fn default_output() -> String {
    "awd_lstm".to_string()
}

fn default_seed() -> u64 {
    42
}

fn default_log_frequency() -> usize {
    200
}

fn default_anneal_factor() -> f64 {
    4.0
}
