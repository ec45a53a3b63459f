use anyhow::{Result, anyhow, ensure};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

/// Chance that a variable-length window is drawn around half the base length.
pub const SHORT_WINDOW_PROB: f64 = 0.05;
/// Standard deviation of the variable window length, in tokens.
pub const WINDOW_LEN_STD: f64 = 5.0;
/// Floor on sampled window lengths (the final window may still be shorter).
pub const MIN_VARIABLE_WINDOW: usize = 5;

/// A split laid out as `batch_size` contiguous rows that are read in parallel.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenStream {
    data: Vec<i64>,
    batch_size: usize,
    steps: usize,
}

impl TokenStream {
    /// Trims `tokens` to a multiple of `batch_size` and splits it into rows;
    /// row `r` holds tokens `r * steps .. (r + 1) * steps`.
    pub fn batchify(tokens: &[u32], batch_size: usize) -> Result<Self> {
        ensure!(batch_size > 0, "batch size must be positive");
        let steps = tokens.len() / batch_size;
        ensure!(
            steps >= 2,
            "{} tokens cannot fill {batch_size} rows of at least two tokens",
            tokens.len()
        );

        let data = tokens[..steps * batch_size]
            .iter()
            .map(|&token| token as i64)
            .collect();
        Ok(Self {
            data,
            batch_size,
            steps,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Tokens per row.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn row(&self, index: usize) -> &[i64] {
        &self.data[index * self.steps..(index + 1) * self.steps]
    }

    /// Lazily yields the windows of one pass over the stream. The batcher is
    /// consumed by iteration; call again for another pass.
    pub fn windows<B: Backend>(
        &self,
        schedule: BpttSchedule,
        seed: u64,
        device: &B::Device,
    ) -> Result<BpttBatcher<'_, B>> {
        Ok(BpttBatcher {
            stream: self,
            planner: WindowPlanner::new(schedule, self.steps, seed)?,
            device: device.clone(),
        })
    }

    /// Number of windows a fixed-length pass produces.
    pub fn estimated_windows(&self, bptt: usize) -> usize {
        self.steps.saturating_sub(1).div_ceil(bptt.max(1))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BpttSchedule {
    pub base: usize,
    pub variable: bool,
}

impl BpttSchedule {
    pub fn fixed(base: usize) -> Self {
        Self {
            base,
            variable: false,
        }
    }

    pub fn variable(base: usize) -> Self {
        Self {
            base,
            variable: true,
        }
    }

    /// Learning-rate multiplier for a window of `seq_len` tokens.
    pub fn lr_scale(&self, seq_len: usize) -> f64 {
        if self.variable {
            seq_len as f64 / self.base as f64
        } else {
            1.0
        }
    }
}

/// Position and length of one window along every row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub len: usize,
}

/// Walks a row of `steps` tokens from the start, emitting windows that leave
/// room for the shifted target.
pub struct WindowPlanner {
    schedule: BpttSchedule,
    steps: usize,
    position: usize,
    rng: StdRng,
    jitter: Normal<f64>,
}

impl WindowPlanner {
    pub fn new(schedule: BpttSchedule, steps: usize, seed: u64) -> Result<Self> {
        ensure!(schedule.base > 0, "bptt length must be positive");
        let jitter = Normal::new(0.0, WINDOW_LEN_STD)
            .map_err(|err| anyhow!("invalid window length distribution: {err}"))?;

        Ok(Self {
            schedule,
            steps,
            position: 0,
            rng: StdRng::seed_from_u64(seed),
            jitter,
        })
    }

    fn sample_len(&mut self) -> usize {
        if !self.schedule.variable {
            return self.schedule.base;
        }

        let center = if self.rng.gen_bool(1.0 - SHORT_WINDOW_PROB) {
            self.schedule.base
        } else {
            (self.schedule.base / 2).max(1)
        };
        let sampled = center as f64 + self.jitter.sample(&mut self.rng);
        sampled.round().max(MIN_VARIABLE_WINDOW as f64) as usize
    }
}

impl Iterator for WindowPlanner {
    type Item = Window;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.steps.saturating_sub(self.position);
        if remaining < 2 {
            return None;
        }

        let len = self.sample_len().min(remaining - 1);
        let window = Window {
            start: self.position,
            len,
        };
        self.position += len;
        Some(window)
    }
}

/// Batched inputs and next-token targets for one BPTT window.
#[derive(Clone, Debug)]
pub struct SequenceBatch<B: Backend> {
    pub inputs: Tensor<B, 2, Int>,
    pub targets: Tensor<B, 2, Int>,
    pub seq_len: usize,
    /// Multiplier the caller applies to the learning rate for this window only.
    pub lr_scale: f64,
}

pub struct BpttBatcher<'a, B: Backend> {
    stream: &'a TokenStream,
    planner: WindowPlanner,
    device: B::Device,
}

impl<B: Backend> BpttBatcher<'_, B> {
    fn batch_at(&self, window: Window) -> SequenceBatch<B> {
        let batch_size = self.stream.batch_size;
        let Window { start, len } = window;

        let mut inputs = Vec::with_capacity(batch_size * len);
        let mut targets = Vec::with_capacity(batch_size * len);
        for row_idx in 0..batch_size {
            let row = self.stream.row(row_idx);
            inputs.extend_from_slice(&row[start..start + len]);
            targets.extend_from_slice(&row[start + 1..start + len + 1]);
        }

        SequenceBatch {
            inputs: Tensor::from_data(TensorData::new(inputs, [batch_size, len]), &self.device),
            targets: Tensor::from_data(TensorData::new(targets, [batch_size, len]), &self.device),
            seq_len: len,
            lr_scale: self.planner.schedule.lr_scale(len),
        }
    }
}

impl<B: Backend> Iterator for BpttBatcher<'_, B> {
    type Item = SequenceBatch<B>;

    fn next(&mut self) -> Option<Self::Item> {
        let window = self.planner.next()?;
        Some(self.batch_at(window))
    }
}
