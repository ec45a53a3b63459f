use anyhow::{Result, ensure};
use burn::tensor::backend::Backend;

use super::decoder::DropoutLinearDecoder;
use super::encoder::AwdLstmEncoder;
use super::rnn::RnnModel;

#[derive(Clone, Debug, PartialEq)]
pub struct AwdLstmConfig {
    pub vocab_size: usize,
    pub emb_dim: usize,
    pub hidden_dim: usize,
    pub num_layers: usize,
    /// Probability of dropping a whole embedding row.
    pub emb_dp: f64,
    /// Variational dropout between stacked layers.
    pub hidden_dp: f64,
    /// Variational dropout on the embedded input.
    pub input_dp: f64,
    /// DropConnect on every layer's hidden-to-hidden weight.
    pub weight_dp: f64,
    /// Variational dropout on the last layer's output.
    pub out_dp: f64,
    pub initrange: f64,
    pub tie_weights: bool,
}

impl Default for AwdLstmConfig {
    fn default() -> Self {
        Self {
            vocab_size: 10_000,
            emb_dim: 400,
            hidden_dim: 1150,
            num_layers: 3,
            emb_dp: 0.1,
            hidden_dp: 0.3,
            input_dp: 0.3,
            weight_dp: 0.5,
            out_dp: 0.4,
            initrange: 0.05,
            tie_weights: false,
        }
    }
}

impl AwdLstmConfig {
    /// `(input, hidden)` size of every recurrent layer, bottom first.
    ///
    /// With tied weights the top layer emits embedding-sized vectors so the
    /// decoder can reuse the embedding table.
    pub fn layer_dims(&self) -> Vec<(usize, usize)> {
        (0..self.num_layers)
            .map(|layer| {
                let input = if layer == 0 {
                    self.emb_dim
                } else {
                    self.hidden_dim
                };
                let hidden = if layer + 1 == self.num_layers && self.tie_weights {
                    self.emb_dim
                } else {
                    self.hidden_dim
                };
                (input, hidden)
            })
            .collect()
    }

    pub fn decoder_input_dim(&self) -> usize {
        if self.tie_weights {
            self.emb_dim
        } else {
            self.hidden_dim
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.vocab_size > 0, "vocabulary must not be empty");
        ensure!(self.emb_dim > 0, "emb_dim must be positive");
        ensure!(self.hidden_dim > 0, "hidden_dim must be positive");
        ensure!(self.num_layers > 0, "num_layers must be at least 1");
        ensure!(self.initrange > 0.0, "initrange must be positive");
        for (name, prob) in [
            ("emb_dp", self.emb_dp),
            ("hidden_dp", self.hidden_dp),
            ("input_dp", self.input_dp),
            ("weight_dp", self.weight_dp),
            ("out_dp", self.out_dp),
        ] {
            ensure!(
                (0.0..1.0).contains(&prob),
                "{name} must lie in [0, 1), got {prob}"
            );
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<RnnModel<B>> {
        self.validate()?;
        let encoder = AwdLstmEncoder::new(self, device);
        let decoder = DropoutLinearDecoder::new(
            self.decoder_input_dim(),
            self.vocab_size,
            self.out_dp,
            !self.tie_weights,
            device,
        );
        RnnModel::new(encoder, decoder, self.tie_weights, self.initrange)
    }
}
