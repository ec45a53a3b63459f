use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use awd_lstm::dataset::{BpttSchedule, WindowPlanner};
use awd_lstm::trainer::{EpochOutcome, LearningRateContext, StepSettings, train_epoch};
use awd_lstm::{
    AwdLstmConfig, BinFileCheckpointStore, DatasetConfig, ModelOverrides, OptimizerConfig,
    RnnModel, SplitStreams, TokenStream, TrainingConfig, TrainingHyperparameters, evaluate, fit,
};
use burn::LearningRate;
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::backend::Backend as BackendTrait;
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use rand::prelude::*;
use rand::rngs::StdRng;
use tempfile::tempdir;

type Backend = Autodiff<NdArray<f32>>;

const VOCAB: usize = 50;

/// Skewed unigram stream: low ids are far more frequent than high ones.
fn skewed_tokens(len: usize, seed: u64) -> Vec<u32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| {
            let u: f64 = rng.r#gen();
            ((u * u * u) * VOCAB as f64) as u32
        })
        .collect()
}

/// Forwards every step to `inner` and remembers the rate it was given.
struct RateRecorder<O> {
    inner: O,
    rates: Vec<LearningRate>,
}

impl<M, B, O> Optimizer<M, B> for RateRecorder<O>
where
    M: AutodiffModule<B>,
    B: AutodiffBackend,
    O: Optimizer<M, B>,
{
    type Record = O::Record;

    fn step(&mut self, lr: LearningRate, module: M, grads: GradientsParams) -> M {
        self.rates.push(lr);
        self.inner.step(lr, module, grads)
    }

    fn to_record(&self) -> Self::Record {
        self.inner.to_record()
    }

    fn load_record(self, record: Self::Record) -> Self {
        Self {
            inner: self.inner.load_record(record),
            rates: self.rates,
        }
    }
}

fn streams() -> SplitStreams {
    SplitStreams {
        train: TokenStream::batchify(&skewed_tokens(1_000, 1), 4).expect("train"),
        valid: TokenStream::batchify(&skewed_tokens(400, 2), 2).expect("valid"),
        test: TokenStream::batchify(&skewed_tokens(400, 3), 2).expect("test"),
    }
}

fn config(path: PathBuf) -> TrainingConfig {
    TrainingConfig {
        dataset: DatasetConfig {
            path,
            train: "train.txt".to_string(),
            valid: "valid.txt".to_string(),
            test: "test.txt".to_string(),
            output: "tiny".to_string(),
        },
        training: TrainingHyperparameters {
            batch_size: 4,
            eval_batch_size: 2,
            bptt: 10,
            variable_bptt: false,
            epochs: 1,
            clip: 0.25,
            alpha: 0.0,
            beta: 0.0,
            seed: 5,
            log_frequency: 10,
        },
        optimizer: OptimizerConfig {
            learning_rate: 4.0,
            anneal_factor: 4.0,
            weight_decay: 0.0,
        },
        model: ModelOverrides::default(),
    }
}

fn model(device: &<Backend as BackendTrait>::Device) -> RnnModel<Backend> {
    AwdLstmConfig {
        vocab_size: VOCAB,
        emb_dim: 16,
        hidden_dim: 24,
        num_layers: 2,
        emb_dp: 0.0,
        hidden_dp: 0.0,
        input_dp: 0.0,
        weight_dp: 0.0,
        out_dp: 0.0,
        initrange: 0.1,
        tie_weights: false,
    }
    .init(device)
    .expect("model")
}

#[test]
fn one_epoch_lowers_validation_loss() {
    <Backend as BackendTrait>::seed(0);
    let dir = tempdir().expect("tempdir");
    let device = Default::default();
    let config = config(dir.path().to_path_buf());
    let streams = streams();

    let model = model(&device);
    let before = evaluate(&model.valid(), &streams.valid, 10, &device).expect("initial loss");

    let mut optim = SgdConfig::new().init::<Backend, RnnModel<Backend>>();
    let mut store = BinFileCheckpointStore::new(config.dataset.checkpoint_path());
    let interrupt = AtomicBool::new(false);
    let (_model, report) = fit(
        model,
        &mut optim,
        &streams,
        &config,
        &mut store,
        &interrupt,
        &device,
    )
    .expect("fit");

    assert_eq!(report.valid_losses.len(), 1);
    assert!(
        report.valid_losses[0] < before,
        "validation loss {} did not drop below {before}",
        report.valid_losses[0]
    );
    assert_eq!(report.best_epoch, 1);
    assert!(!report.interrupted);
    assert!(report.test_loss.is_finite());
    assert!(dir.path().join("tiny.bin").is_file());
}

#[test]
fn interrupt_skips_to_test_evaluation() {
    let dir = tempdir().expect("tempdir");
    let device = Default::default();
    let config = TrainingConfig {
        training: TrainingHyperparameters {
            epochs: 3,
            ..config(dir.path().to_path_buf()).training
        },
        ..config(dir.path().to_path_buf())
    };

    let mut optim = SgdConfig::new().init::<Backend, RnnModel<Backend>>();
    let mut store = BinFileCheckpointStore::new(config.dataset.checkpoint_path());
    let interrupt = AtomicBool::new(true);
    let (_model, report) = fit(
        model(&device),
        &mut optim,
        &streams(),
        &config,
        &mut store,
        &interrupt,
        &device,
    )
    .expect("fit");

    assert!(report.interrupted);
    assert!(report.train_losses.is_empty());
    assert_eq!(report.best_epoch, 0);
    assert!(report.test_loss.is_finite());
    assert!(!dir.path().join("tiny.bin").exists());
}

#[test]
fn variable_windows_leave_the_base_rate_untouched() {
    let device = Default::default();
    let streams = streams();
    let mut optim = SgdConfig::new().init::<Backend, RnnModel<Backend>>();
    let mut lr = LearningRateContext::new(4.0);
    let settings = StepSettings {
        clip: 0.25,
        alpha: 2.0,
        beta: 1.0,
        log_frequency: 100,
    };
    let interrupt = AtomicBool::new(false);

    let (_model, outcome) = train_epoch(
        model(&device),
        &mut optim,
        &streams.train,
        BpttSchedule::variable(10),
        9,
        &mut lr,
        &settings,
        &interrupt,
        &device,
    )
    .expect("epoch");

    match outcome {
        EpochOutcome::Completed(loss) => assert!(loss.is_finite()),
        EpochOutcome::Interrupted => panic!("no interrupt was raised"),
    }
    assert_eq!(lr.rate(), 4.0);
}

#[test]
fn each_window_steps_at_its_scaled_rate() {
    let device = Default::default();
    let streams = streams();
    let schedule = BpttSchedule::variable(20);
    let seed = 13;
    let mut optim = RateRecorder {
        inner: SgdConfig::new().init::<Backend, RnnModel<Backend>>(),
        rates: Vec::new(),
    };
    let mut lr = LearningRateContext::new(3.0);
    let settings = StepSettings {
        clip: 0.25,
        alpha: 0.0,
        beta: 0.0,
        log_frequency: 100,
    };
    let interrupt = AtomicBool::new(false);

    train_epoch(
        model(&device),
        &mut optim,
        &streams.train,
        schedule,
        seed,
        &mut lr,
        &settings,
        &interrupt,
        &device,
    )
    .expect("epoch");

    let expected: Vec<f64> = WindowPlanner::new(schedule, streams.train.steps(), seed)
        .expect("planner")
        .map(|window| 3.0 * (window.len as f64 / 20.0))
        .collect();
    assert_eq!(optim.rates.len(), expected.len());
    for (rate, want) in optim.rates.iter().zip(&expected) {
        assert!((rate - want).abs() < 1e-12, "stepped at {rate}, expected {want}");
    }
    assert!(
        expected.iter().any(|rate| (rate - 3.0).abs() > 1e-12),
        "some window must differ from the base length"
    );
    assert_eq!(lr.rate(), 3.0);
}
