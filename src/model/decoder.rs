use burn::module::{Module, Param};
use burn::tensor::Tensor;
use burn::tensor::backend::Backend;

use super::ParamIds;
use super::dropout::VariationalDropout;
use super::uniform_param;

#[derive(Debug, Clone)]
pub struct DecoderOutput<B: Backend> {
    /// `[batch, time, vocab]`
    pub logits: Tensor<B, 3>,
    /// Decoder input after output dropout.
    pub dropped: Tensor<B, 3>,
}

/// Output dropout followed by a projection onto the vocabulary.
///
/// When the model ties weights the decoder owns no projection and is handed the
/// embedding table on every call instead.
#[derive(Module, Debug)]
pub struct DropoutLinearDecoder<B: Backend> {
    weight: Option<Param<Tensor<B, 2>>>,
    bias: Param<Tensor<B, 1>>,
    output_dropout: VariationalDropout,
    input_dim: usize,
    vocab_size: usize,
}

impl<B: Backend> DropoutLinearDecoder<B> {
    /// `owns_weight = false` builds a decoder that expects a tied weight.
    pub fn new(
        input_dim: usize,
        vocab_size: usize,
        out_dp: f64,
        owns_weight: bool,
        device: &B::Device,
    ) -> Self {
        let bound = 1.0 / (input_dim as f64).sqrt();
        Self {
            weight: owns_weight.then(|| uniform_param([vocab_size, input_dim], bound, device)),
            bias: Param::from_tensor(Tensor::zeros([vocab_size], device)),
            output_dropout: VariationalDropout::new(out_dp),
            input_dim,
            vocab_size,
        }
    }

    /// Uniform weight in `[-initrange, initrange]` and a zero bias.
    pub fn with_init(mut self, initrange: f64) -> Self {
        let device = self.bias.val().device();
        if self.weight.is_some() {
            self.weight = Some(uniform_param(
                [self.vocab_size, self.input_dim],
                initrange,
                &device,
            ));
        }
        self.bias = Param::from_tensor(Tensor::zeros([self.vocab_size], &device));
        self
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn owns_weight(&self) -> bool {
        self.weight.is_some()
    }

    /// Projection weight `[vocab, input_dim]`, if the decoder owns one.
    pub fn weight(&self) -> Option<Tensor<B, 2>> {
        self.weight.as_ref().map(Param::val)
    }

    pub fn bias(&self) -> Tensor<B, 1> {
        self.bias.val()
    }

    pub(crate) fn collect_param_ids(&self, ids: &mut ParamIds) {
        if let Some(weight) = &self.weight {
            ids.matrices.push(weight.id);
        }
        ids.vectors.push(self.bias.id);
    }

    /// Projects `input` with `tied_weight` when given, else with the owned weight.
    ///
    /// # Panics
    ///
    /// If the decoder owns no weight and `tied_weight` is `None`.
    pub fn forward(&self, input: Tensor<B, 3>, tied_weight: Option<Tensor<B, 2>>) -> DecoderOutput<B> {
        let weight = tied_weight
            .or_else(|| self.weight())
            .expect("decoder needs either its own weight or a tied one");

        let dropped = self.output_dropout.forward(input);
        let [batch, time, dim] = dropped.dims();
        let logits = dropped
            .clone()
            .reshape([batch * time, dim])
            .matmul(weight.transpose())
            .add(self.bias.val().unsqueeze::<2>())
            .reshape([batch, time, self.vocab_size]);

        DecoderOutput { logits, dropped }
    }
}
