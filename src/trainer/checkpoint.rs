use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::Backend;
use tracing::info;

use crate::model::{AwdLstmConfig, RnnModel};

/// Destination for the best-so-far parameters.
pub trait CheckpointStore<B: Backend> {
    fn save(&mut self, epoch: usize, model: &RnnModel<B>) -> Result<()>;
}

/// Writes full-precision burn records; the recorder adds the `.bin` extension.
#[derive(Debug, Clone)]
pub struct BinFileCheckpointStore {
    base: PathBuf,
}

impl BinFileCheckpointStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl<B: Backend> CheckpointStore<B> for BinFileCheckpointStore {
    fn save(&mut self, epoch: usize, model: &RnnModel<B>) -> Result<()> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        Recorder::<B>::record(&recorder, model.clone().into_record(), self.base.clone())
            .with_context(|| format!("failed to write checkpoint {}.bin", self.base.display()))?;
        info!("saved epoch {epoch} checkpoint to {}.bin", self.base.display());
        Ok(())
    }
}

/// Rebuilds a model from `config` and fills it with the record at `base`.
pub fn load_checkpoint<B: Backend>(
    config: &AwdLstmConfig,
    base: &Path,
    device: &B::Device,
) -> Result<RnnModel<B>> {
    let model = config.init::<B>(device)?;
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let record = recorder
        .load::<<RnnModel<B> as Module<B>>::Record>(base.to_path_buf(), device)
        .with_context(|| format!("failed to load checkpoint {}.bin", base.display()))?;
    Ok(model.load_record(record))
}
