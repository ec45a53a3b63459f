#![recursion_limit = "512"]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use burn::module::Module;
use burn::optim::SgdConfig;
use burn::optim::decay::WeightDecayConfig;
use burn::tensor::backend::AutodiffBackend;
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::{Wgpu, WgpuDevice};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "cuda")]
use burn_cuda::{Cuda, CudaDevice};

use awd_lstm::{
    BinFileCheckpointStore, Corpus, RnnModel, SplitStreams, TokenStream, TrainingConfig, fit,
    load_training_config,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Train an AWD-LSTM word-level language model")]
struct Args {
    /// Additional configuration files applied in order (later files override earlier ones).
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Vec<PathBuf>,
    /// Backend to use for training.
    #[arg(long, value_enum, default_value_t = BackendArg::Wgpu)]
    backend: BackendArg,
    /// Accelerator index for the wgpu and cuda backends.
    #[arg(long, default_value_t = 0)]
    gpu: usize,
    #[arg(long)]
    epochs: Option<usize>,
    #[arg(long)]
    lr: Option<f64>,
    #[arg(long)]
    seed: Option<u64>,
    /// Sample window lengths around the configured bptt.
    #[arg(long)]
    use_var_bptt: bool,
    /// Share the embedding table with the decoder.
    #[arg(long)]
    tie_weights: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum BackendArg {
    Ndarray,
    Wgpu,
    Cuda,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let mut config_paths = vec![PathBuf::from("config/base.toml")];
    config_paths.extend(args.config.iter().cloned());
    let mut config = load_training_config(&config_paths)?;
    apply_cli_overrides(&mut config, &args);
    config.validate()?;

    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupt);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("failed to install interrupt handler")?;

    match args.backend {
        BackendArg::Ndarray => train_backend::<Autodiff<NdArray<f32>>>(
            &config,
            NdArrayDevice::Cpu,
            "ndarray",
            &interrupt,
        ),
        BackendArg::Wgpu => train_backend::<Autodiff<Wgpu<f32>>>(
            &config,
            WgpuDevice::DiscreteGpu(args.gpu),
            "wgpu",
            &interrupt,
        ),
        BackendArg::Cuda => {
            #[cfg(feature = "cuda")]
            {
                train_backend::<Autodiff<Cuda<f32>>>(
                    &config,
                    CudaDevice::new(args.gpu),
                    "cuda",
                    &interrupt,
                )
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(anyhow::anyhow!(
                    "cuda backend selected but this build lacks `cuda` feature; rebuild with `--features cuda`"
                ))
            }
        }
    }
}

fn apply_cli_overrides(config: &mut TrainingConfig, args: &Args) {
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(lr) = args.lr {
        config.optimizer.learning_rate = lr;
    }
    if let Some(seed) = args.seed {
        config.training.seed = seed;
    }
    if args.use_var_bptt {
        config.training.variable_bptt = true;
    }
    if args.tie_weights {
        config.model.tie_weights = Some(true);
    }
}

fn train_backend<B>(
    config: &TrainingConfig,
    device: B::Device,
    backend_name: &str,
    interrupt: &AtomicBool,
) -> Result<()>
where
    B: AutodiffBackend,
{
    B::seed(config.training.seed);

    let dataset = &config.dataset;
    let corpus = Corpus::load_or_build(&dataset.path, &dataset.train, &dataset.valid, &dataset.test)
        .with_context(|| format!("failed to prepare corpus in {}", dataset.path.display()))?;
    info!(
        "corpus: {} words | train {} | valid {} | test {} tokens",
        corpus.vocab_size(),
        corpus.train.len(),
        corpus.valid.len(),
        corpus.test.len()
    );

    let training = &config.training;
    let streams = SplitStreams {
        train: TokenStream::batchify(&corpus.train, training.batch_size)
            .context("failed to batchify training split")?,
        valid: TokenStream::batchify(&corpus.valid, training.eval_batch_size)
            .context("failed to batchify validation split")?,
        test: TokenStream::batchify(&corpus.test, training.eval_batch_size)
            .context("failed to batchify test split")?,
    };

    let model_config = config.model_config(corpus.vocab_size());
    let model: RnnModel<B> = model_config.init(&device)?;
    info!(
        "[train:{backend_name}] {} layers | emb {} | hidden {} | tied {} | {} parameters",
        model_config.num_layers,
        model_config.emb_dim,
        model_config.hidden_dim,
        model_config.tie_weights,
        model.num_params()
    );

    let weight_decay = config.optimizer.weight_decay;
    let mut optim = SgdConfig::new()
        .with_weight_decay((weight_decay > 0.0).then(|| WeightDecayConfig::new(weight_decay)))
        .init::<B, RnnModel<B>>();

    let mut store = BinFileCheckpointStore::new(dataset.checkpoint_path());
    let (_model, report) = fit(
        model,
        &mut optim,
        &streams,
        config,
        &mut store,
        interrupt,
        &device,
    )?;

    report.write_loss_history(&dataset.loss_history_path())?;
    report.write_summary(&dataset.summary_path())?;
    info!("{}", report.summary_line());

    Ok(())
}
