use anyhow::{Result, ensure};
use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

use super::ParamIds;
use super::decoder::DropoutLinearDecoder;
use super::encoder::AwdLstmEncoder;
use super::state::EncoderState;

/// Everything the training step needs from one forward pass.
#[derive(Debug, Clone)]
pub struct ModelOutput<B: Backend> {
    pub logits: Tensor<B, 3>,
    pub state: EncoderState<B>,
    /// Per-layer outputs before hidden dropout (TAR input).
    pub raw_outputs: Vec<Tensor<B, 3>>,
    /// Per-layer outputs after dropout; the last entry is the decoder input
    /// after output dropout (AR input).
    pub dropped_outputs: Vec<Tensor<B, 3>>,
}

#[derive(Module, Debug)]
pub struct RnnModel<B: Backend> {
    encoder: AwdLstmEncoder<B>,
    decoder: DropoutLinearDecoder<B>,
    tie_weights: bool,
}

impl<B: Backend> RnnModel<B> {
    /// Composes `encoder` and `decoder`, then applies the initialization policy:
    /// embedding and decoder weight uniform in `[-initrange, initrange]`,
    /// decoder bias zero.
    pub fn new(
        encoder: AwdLstmEncoder<B>,
        decoder: DropoutLinearDecoder<B>,
        tie_weights: bool,
        initrange: f64,
    ) -> Result<Self> {
        ensure!(
            encoder.vocab_size() == decoder.vocab_size(),
            "encoder vocabulary ({}) and decoder vocabulary ({}) differ",
            encoder.vocab_size(),
            decoder.vocab_size()
        );
        ensure!(
            encoder.output_dim() == decoder.input_dim(),
            "encoder emits {} features but the decoder expects {}",
            encoder.output_dim(),
            decoder.input_dim()
        );
        if tie_weights {
            ensure!(
                decoder.input_dim() == encoder.emb_dim(),
                "weight tying needs decoder input ({}) equal to embedding size ({})",
                decoder.input_dim(),
                encoder.emb_dim()
            );
            ensure!(
                !decoder.owns_weight(),
                "weight tying needs a decoder without its own projection"
            );
        } else {
            ensure!(
                decoder.owns_weight(),
                "untied decoder has no projection weight"
            );
        }

        Ok(Self {
            encoder: encoder.with_embedding_init(initrange),
            decoder: decoder.with_init(initrange),
            tie_weights,
        })
    }

    pub fn encoder(&self) -> &AwdLstmEncoder<B> {
        &self.encoder
    }

    pub fn decoder(&self) -> &DropoutLinearDecoder<B> {
        &self.decoder
    }

    pub fn tie_weights(&self) -> bool {
        self.tie_weights
    }

    pub fn vocab_size(&self) -> usize {
        self.encoder.vocab_size()
    }

    /// Projection used by the decoder: the embedding table when tied.
    pub fn decoder_weight(&self) -> Tensor<B, 2> {
        self.tied_weight()
            .or_else(|| self.decoder.weight())
            .expect("untied decoder owns its weight")
    }

    /// Every trainable parameter once; the tied table appears only as the
    /// embedding.
    pub fn param_ids(&self) -> ParamIds {
        let mut ids = ParamIds::default();
        self.encoder.collect_param_ids(&mut ids);
        self.decoder.collect_param_ids(&mut ids);
        ids
    }

    /// Fresh zero state; the start of every pass over a split.
    pub fn reset_hidden(&self, batch: usize, device: &B::Device) -> EncoderState<B> {
        self.encoder.init_state(batch, device)
    }

    pub fn forward(
        &self,
        tokens: Tensor<B, 2, Int>,
        state: Option<EncoderState<B>>,
    ) -> (Tensor<B, 3>, EncoderState<B>) {
        let encoded = self.encoder.forward(tokens, state);
        let decoded = self.decoder.forward(encoded.output, self.tied_weight());
        (decoded.logits, encoded.state)
    }

    pub fn forward_with_activations(
        &self,
        tokens: Tensor<B, 2, Int>,
        state: Option<EncoderState<B>>,
    ) -> ModelOutput<B> {
        let encoded = self.encoder.forward(tokens, state);
        let decoded = self.decoder.forward(encoded.output, self.tied_weight());

        let mut dropped_outputs = encoded.dropped_outputs;
        if let Some(top) = dropped_outputs.last_mut() {
            *top = decoded.dropped;
        }

        ModelOutput {
            logits: decoded.logits,
            state: encoded.state,
            raw_outputs: encoded.raw_outputs,
            dropped_outputs,
        }
    }

    fn tied_weight(&self) -> Option<Tensor<B, 2>> {
        self.tie_weights.then(|| self.encoder.embedding_weight())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AwdLstmConfig, language_model_loss};
    use burn::optim::{GradientsParams, Optimizer, SgdConfig};
    use burn::tensor::TensorData;
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;

    type Eval = NdArray<f32>;
    type Train = Autodiff<NdArray<f32>>;

    fn quiet_config(tie_weights: bool) -> AwdLstmConfig {
        AwdLstmConfig {
            vocab_size: 12,
            emb_dim: 6,
            hidden_dim: 10,
            num_layers: 2,
            emb_dp: 0.0,
            hidden_dp: 0.0,
            input_dp: 0.0,
            weight_dp: 0.0,
            out_dp: 0.0,
            initrange: 0.1,
            tie_weights,
        }
    }

    fn constant_tokens<B: Backend>(id: i64, device: &B::Device) -> Tensor<B, 2, Int> {
        Tensor::from_data(TensorData::new(vec![id; 2 * 4], [2, 4]), device)
    }

    fn values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
        tensor
            .into_data()
            .convert::<f32>()
            .into_vec::<f32>()
            .expect("tensor values")
    }

    fn unused_row_gradient(tie_weights: bool) -> f32 {
        let device = Default::default();
        let model = quiet_config(tie_weights)
            .init::<Train>(&device)
            .expect("model");

        let (logits, _) = model.forward(constant_tokens(0, &device), None);
        let loss = language_model_loss(logits, constant_tokens(1, &device));
        let grads = loss.backward();

        let grad = model
            .encoder()
            .embedding_weight()
            .grad(&grads)
            .expect("embedding receives a gradient");
        values(grad.slice_dim(0, 5..6).abs().sum())[0]
    }

    #[test]
    fn tied_decoder_gradient_reaches_the_embedding() {
        assert!(unused_row_gradient(true) > 0.0);
        assert_eq!(unused_row_gradient(false), 0.0);
    }

    #[test]
    fn tied_update_is_visible_through_both_slots() {
        let device = Default::default();
        let mut model = quiet_config(true).init::<Train>(&device).expect("model");
        let before = values(model.decoder_weight());

        let mut optim = SgdConfig::new().init::<Train, RnnModel<Train>>();
        let (logits, _) = model.forward(constant_tokens(3, &device), None);
        let grads = language_model_loss(logits, constant_tokens(4, &device)).backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optim.step(1.0, model, grads);

        let embedding = values(model.encoder().embedding_weight());
        let decoder = values(model.decoder_weight());
        assert_eq!(embedding, decoder);
        assert_ne!(decoder, before);
    }

    #[test]
    fn tying_with_mismatched_sizes_fails() {
        let device = Default::default();
        let config = quiet_config(false);
        let encoder = AwdLstmEncoder::<Eval>::new(&config, &device);
        let decoder = DropoutLinearDecoder::<Eval>::new(config.hidden_dim, 12, 0.0, false, &device);

        let err = RnnModel::new(encoder, decoder, true, 0.1).expect_err("sizes differ");
        assert!(err.to_string().contains("weight tying"));
    }

    #[test]
    fn init_policy_bounds_weights_and_zeroes_bias() {
        let device = Default::default();
        let model = AwdLstmConfig {
            initrange: 0.02,
            ..quiet_config(false)
        }
        .init::<Eval>(&device)
        .expect("model");

        assert!(values(model.encoder().embedding_weight()).iter().all(|v| v.abs() <= 0.02));
        assert!(values(model.decoder_weight()).iter().all(|v| v.abs() <= 0.02));
        assert!(values(model.decoder().bias()).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn activations_expose_decoder_input_as_top_dropped_output() {
        let device = Default::default();
        let model = quiet_config(false).init::<Eval>(&device).expect("model");

        let out = model.forward_with_activations(constant_tokens(2, &device), None);
        assert_eq!(out.logits.dims(), [2, 4, 12]);
        assert_eq!(out.raw_outputs.len(), 2);
        assert_eq!(out.dropped_outputs.len(), 2);
        assert_eq!(out.dropped_outputs[1].dims(), [2, 4, 10]);

        let ids = model.param_ids();
        // embedding, 2 x (weight_ih, weight_hh), decoder weight
        assert_eq!(ids.matrices.len(), 6);
        // 2 x lstm bias, decoder bias
        assert_eq!(ids.vectors.len(), 3);

        let state = model.reset_hidden(2, &device);
        assert_eq!(state.num_layers(), 2);
        assert!(values(state.layers[0].hidden.clone()).iter().all(|v| *v == 0.0));
    }
}
