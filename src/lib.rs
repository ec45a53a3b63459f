#![recursion_limit = "512"]

pub mod config;
pub mod dataset;
pub mod model;
pub mod trainer;

pub use config::{
    DatasetConfig, ModelOverrides, OptimizerConfig, TrainingConfig, TrainingHyperparameters,
    build_model_config, load_training_config,
};
pub use dataset::{BpttSchedule, Corpus, Dictionary, SequenceBatch, TokenStream};
pub use model::{AwdLstmConfig, EncoderState, RnnModel, language_model_loss};
pub use trainer::{
    BinFileCheckpointStore, CheckpointStore, EpochScheduler, LearningRateContext, SplitStreams,
    TrainingReport, evaluate, fit, train_epoch,
};
