use burn::module::{Module, Param};
use burn::tensor::backend::Backend;
use burn::tensor::module::embedding;
use burn::tensor::{Int, Tensor};

use super::config::AwdLstmConfig;
use super::dropout::{EmbeddingDropout, VariationalDropout};
use super::ParamIds;
use super::state::EncoderState;
use super::uniform_param;
use super::weight_drop::WeightDropLstm;

/// Output of one encoder pass over a BPTT window.
#[derive(Debug, Clone)]
pub struct EncoderOutput<B: Backend> {
    /// Top layer output, `[batch, time, top_hidden]`.
    pub output: Tensor<B, 3>,
    pub state: EncoderState<B>,
    /// Every layer's output before hidden dropout.
    pub raw_outputs: Vec<Tensor<B, 3>>,
    /// Every layer's output after hidden dropout; the top layer is not dropped
    /// here, so its entry equals the raw one.
    pub dropped_outputs: Vec<Tensor<B, 3>>,
}

#[derive(Module, Debug)]
pub struct AwdLstmEncoder<B: Backend> {
    embedding: Param<Tensor<B, 2>>,
    layers: Vec<WeightDropLstm<B>>,
    embedding_dropout: EmbeddingDropout,
    input_dropout: VariationalDropout,
    hidden_dropout: VariationalDropout,
    vocab_size: usize,
    emb_dim: usize,
}

impl<B: Backend> AwdLstmEncoder<B> {
    pub fn new(config: &AwdLstmConfig, device: &B::Device) -> Self {
        let layers = config
            .layer_dims()
            .into_iter()
            .map(|(input, hidden)| WeightDropLstm::new(input, hidden, config.weight_dp, device))
            .collect();

        Self {
            embedding: uniform_param([config.vocab_size, config.emb_dim], config.initrange, device),
            layers,
            embedding_dropout: EmbeddingDropout::new(config.emb_dp),
            input_dropout: VariationalDropout::new(config.input_dp),
            hidden_dropout: VariationalDropout::new(config.hidden_dp),
            vocab_size: config.vocab_size,
            emb_dim: config.emb_dim,
        }
    }

    /// Redraws the embedding table uniformly from `[-initrange, initrange]`.
    pub fn with_embedding_init(mut self, initrange: f64) -> Self {
        let device = self.embedding.val().device();
        self.embedding = uniform_param([self.vocab_size, self.emb_dim], initrange, &device);
        self
    }

    /// Embedding table, `[vocab, emb_dim]`. With tied weights this is also the
    /// decoder projection.
    pub fn embedding_weight(&self) -> Tensor<B, 2> {
        self.embedding.val()
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn emb_dim(&self) -> usize {
        self.emb_dim
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[WeightDropLstm<B>] {
        &self.layers
    }

    pub fn output_dim(&self) -> usize {
        self.layers
            .last()
            .map(WeightDropLstm::hidden_size)
            .unwrap_or(self.emb_dim)
    }

    pub(crate) fn collect_param_ids(&self, ids: &mut ParamIds) {
        ids.matrices.push(self.embedding.id);
        for layer in &self.layers {
            layer.collect_param_ids(ids);
        }
    }

    /// Zeroed state for every layer.
    pub fn init_state(&self, batch: usize, device: &B::Device) -> EncoderState<B> {
        let sizes: Vec<usize> = self.layers.iter().map(WeightDropLstm::hidden_size).collect();
        EncoderState::zeros(&sizes, batch, device)
    }

    /// Encodes `tokens` (`[batch, time]`) starting from `state`, or from zeros
    /// when no state is carried in.
    pub fn forward(
        &self,
        tokens: Tensor<B, 2, Int>,
        state: Option<EncoderState<B>>,
    ) -> EncoderOutput<B> {
        let [batch, _time] = tokens.dims();
        let device = tokens.device();
        let state = state.unwrap_or_else(|| self.init_state(batch, &device));
        debug_assert_eq!(
            state.num_layers(),
            self.layers.len(),
            "carried state must have one entry per layer"
        );

        let table = self.embedding_dropout.forward(self.embedding.val());
        let mut output = self.input_dropout.forward(embedding(table, tokens));

        let top = self.layers.len().saturating_sub(1);
        let mut next_layers = Vec::with_capacity(self.layers.len());
        let mut raw_outputs = Vec::with_capacity(self.layers.len());
        let mut dropped_outputs = Vec::with_capacity(self.layers.len());

        for (index, (layer, layer_state)) in self.layers.iter().zip(state.layers).enumerate() {
            let (raw, next) = layer.forward(output, layer_state);
            next_layers.push(next);
            raw_outputs.push(raw.clone());

            output = if index == top {
                raw
            } else {
                self.hidden_dropout.forward(raw)
            };
            dropped_outputs.push(output.clone());
        }

        EncoderOutput {
            output,
            state: EncoderState::new(next_layers),
            raw_outputs,
            dropped_outputs,
        }
    }
}
