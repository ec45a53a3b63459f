pub mod checkpoint;
pub mod clip;
pub mod lr;
pub mod report;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Result, ensure};
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::ElementConversion;
use burn::tensor::backend::{AutodiffBackend, Backend};
use tracing::{debug, info, warn};

use crate::config::{TrainingConfig, TrainingHyperparameters};
use crate::dataset::{BpttSchedule, TokenStream};
use crate::model::{
    RnnModel, activation_regularization, language_model_loss, temporal_activation_regularization,
};

pub use checkpoint::{BinFileCheckpointStore, CheckpointStore, load_checkpoint};
pub use clip::clip_grad_norm;
pub use lr::{LearningRateContext, ScopedLearningRate};
pub use report::TrainingReport;

/// Per-window loss weights and limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSettings {
    pub clip: f64,
    pub alpha: f64,
    pub beta: f64,
    pub log_frequency: usize,
}

impl From<&TrainingHyperparameters> for StepSettings {
    fn from(training: &TrainingHyperparameters) -> Self {
        Self {
            clip: training.clip,
            alpha: training.alpha,
            beta: training.beta,
            log_frequency: training.log_frequency,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EpochOutcome {
    /// Mean raw cross-entropy over the epoch's windows.
    Completed(f64),
    Interrupted,
}

/// The three batchified splits of a run.
#[derive(Debug, Clone)]
pub struct SplitStreams {
    pub train: TokenStream,
    pub valid: TokenStream,
    pub test: TokenStream,
}

/// One pass over `stream` starting from a zero state.
///
/// Each window runs at `lr * lr_scale` and the base rate is back in place before
/// the next window starts. The interrupt flag is polled between windows.
#[allow(clippy::too_many_arguments)]
pub fn train_epoch<B, O>(
    mut model: RnnModel<B>,
    optim: &mut O,
    stream: &TokenStream,
    schedule: BpttSchedule,
    seed: u64,
    lr: &mut LearningRateContext,
    settings: &StepSettings,
    interrupt: &AtomicBool,
    device: &B::Device,
) -> Result<(RnnModel<B>, EpochOutcome)>
where
    B: AutodiffBackend,
    O: Optimizer<RnnModel<B>, B>,
{
    let mut state = model.reset_hidden(stream.batch_size(), device);
    let expected = stream.estimated_windows(schedule.base);
    let log_every = settings.log_frequency.max(1);

    let mut total = 0.0;
    let mut windows = 0usize;
    let mut interval_total = 0.0;
    let started = Instant::now();

    for batch in stream.windows::<B>(schedule, seed, device)? {
        if interrupt.load(Ordering::SeqCst) {
            warn!("interrupt received after {windows} windows; leaving the epoch");
            return Ok((model, EpochOutcome::Interrupted));
        }

        let scoped = lr.scoped(batch.lr_scale);
        let output = model.forward_with_activations(batch.inputs, Some(state));

        let raw_loss = language_model_loss(output.logits, batch.targets);
        let mut loss = raw_loss.clone();
        if settings.alpha > 0.0 {
            if let Some(dropped) = output.dropped_outputs.last() {
                loss = loss + activation_regularization(dropped.clone(), settings.alpha);
            }
        }
        if settings.beta > 0.0 {
            if let Some(raw) = output.raw_outputs.last() {
                loss = loss + temporal_activation_regularization(raw.clone(), settings.beta);
            }
        }

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        let (grads, norm) = clip_grad_norm(&model, grads, settings.clip);
        debug!(window = windows, seq_len = batch.seq_len, grad_norm = norm, "clipped gradients");

        model = optim.step(scoped.rate(), model, grads);
        drop(scoped);
        state = output.state.detach();

        let value = raw_loss.into_scalar().elem::<f64>();
        total += value;
        interval_total += value;
        windows += 1;

        if windows % log_every == 0 {
            let interval = interval_total / log_every as f64;
            info!(
                "window {windows}/~{expected} | loss {interval:.4} | ppl {:.2} | lr {:.4} | {:.1}s",
                interval.exp(),
                lr.rate(),
                started.elapsed().as_secs_f64()
            );
            interval_total = 0.0;
        }
    }

    ensure!(windows > 0, "training stream produced no windows");
    Ok((model, EpochOutcome::Completed(total / windows as f64)))
}

/// Mean cross-entropy over fixed-length windows, from a zero state and without
/// regularization. Pass an evaluation-mode model (`model.valid()`).
pub fn evaluate<B: Backend>(
    model: &RnnModel<B>,
    stream: &TokenStream,
    bptt: usize,
    device: &B::Device,
) -> Result<f64> {
    let mut state = model.reset_hidden(stream.batch_size(), device);
    let mut total = 0.0;
    let mut windows = 0usize;

    for batch in stream.windows::<B>(BpttSchedule::fixed(bptt), 0, device)? {
        let (logits, next) = model.forward(batch.inputs, Some(state));
        total += language_model_loss(logits, batch.targets)
            .into_scalar()
            .elem::<f64>();
        windows += 1;
        state = next;
    }

    ensure!(windows > 0, "evaluation stream produced no windows");
    Ok(total / windows as f64)
}

/// Tracks the best validation loss across epochs.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochScheduler {
    best_loss: f64,
    best_epoch: usize,
    anneal_factor: f64,
    variable_bptt: bool,
}

impl EpochScheduler {
    pub fn new(anneal_factor: f64, variable_bptt: bool) -> Self {
        Self {
            best_loss: f64::INFINITY,
            best_epoch: 0,
            anneal_factor,
            variable_bptt,
        }
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    /// Checkpoints on improvement. Otherwise anneals the learning rate, unless
    /// window lengths are variable. Returns whether the epoch improved.
    pub fn end_epoch<B: Backend, S: CheckpointStore<B>>(
        &mut self,
        epoch: usize,
        valid_loss: f64,
        model: &RnnModel<B>,
        lr: &mut LearningRateContext,
        store: &mut S,
    ) -> Result<bool> {
        if valid_loss < self.best_loss {
            store.save(epoch, model)?;
            self.best_loss = valid_loss;
            self.best_epoch = epoch;
            return Ok(true);
        }

        if !self.variable_bptt {
            lr.anneal(self.anneal_factor);
            info!("validation loss did not improve; learning rate now {:.4}", lr.rate());
        }
        Ok(false)
    }
}

/// Runs the epoch loop, then evaluates the in-memory parameters on the test
/// split. An interrupt ends the loop early and skips straight to testing.
pub fn fit<B, O, S>(
    mut model: RnnModel<B>,
    optim: &mut O,
    streams: &SplitStreams,
    config: &TrainingConfig,
    store: &mut S,
    interrupt: &AtomicBool,
    device: &B::Device,
) -> Result<(RnnModel<B>, TrainingReport)>
where
    B: AutodiffBackend,
    O: Optimizer<RnnModel<B>, B>,
    S: CheckpointStore<B>,
{
    let training = &config.training;
    let schedule = if training.variable_bptt {
        BpttSchedule::variable(training.bptt)
    } else {
        BpttSchedule::fixed(training.bptt)
    };
    let settings = StepSettings::from(training);
    let mut lr = LearningRateContext::new(config.optimizer.learning_rate);
    let mut scheduler = EpochScheduler::new(config.optimizer.anneal_factor, training.variable_bptt);

    let mut train_losses = Vec::with_capacity(training.epochs);
    let mut valid_losses = Vec::with_capacity(training.epochs);
    let mut interrupted = false;

    for epoch in 1..=training.epochs {
        let started = Instant::now();
        let (next, outcome) = train_epoch(
            model,
            optim,
            &streams.train,
            schedule,
            training.seed.wrapping_add(epoch as u64),
            &mut lr,
            &settings,
            interrupt,
            device,
        )?;
        model = next;

        let train_loss = match outcome {
            EpochOutcome::Completed(loss) => loss,
            EpochOutcome::Interrupted => {
                interrupted = true;
                break;
            }
        };

        let valid_loss = evaluate(&model.valid(), &streams.valid, training.bptt, device)?;
        train_losses.push(train_loss);
        valid_losses.push(valid_loss);
        scheduler.end_epoch(epoch, valid_loss, &model, &mut lr, store)?;

        info!(
            "Epoch {epoch:3} | Train Loss {train_loss:.4} | Train Ppl {:.4} | Valid Loss {valid_loss:.4} | Valid Ppl {:.4} | LR {:.4} | {:.1}s",
            train_loss.exp(),
            valid_loss.exp(),
            lr.rate(),
            started.elapsed().as_secs_f64()
        );
    }

    if interrupted {
        warn!("exiting training early");
    }

    let test_loss = evaluate(&model.valid(), &streams.test, training.bptt, device)?;
    info!("Test Loss {test_loss:.4} | Test Ppl {:.4}", test_loss.exp());

    let report = TrainingReport {
        train_losses,
        valid_losses,
        best_loss: scheduler.best_loss(),
        best_epoch: scheduler.best_epoch(),
        test_loss,
        interrupted,
    };
    Ok((model, report))
}
