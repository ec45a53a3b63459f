mod config;
mod decoder;
mod dropout;
mod encoder;
mod loss;
mod rnn;
mod state;
mod weight_drop;

use burn::module::{Param, ParamId};
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor};

pub use config::AwdLstmConfig;
pub use decoder::{DecoderOutput, DropoutLinearDecoder};
pub use dropout::{EmbeddingDropout, VariationalDropout};
pub use encoder::{AwdLstmEncoder, EncoderOutput};
pub use loss::{
    activation_regularization, language_model_loss, temporal_activation_regularization,
};
pub use rnn::{ModelOutput, RnnModel};
pub use state::{EncoderState, LstmState};
pub use weight_drop::WeightDropLstm;

/// Ids of a module's float parameters, grouped by rank.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamIds {
    pub matrices: Vec<ParamId>,
    pub vectors: Vec<ParamId>,
}

impl ParamIds {
    pub fn len(&self) -> usize {
        self.matrices.len() + self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn uniform_param<B: Backend, const D: usize>(
    shape: [usize; D],
    bound: f64,
    device: &B::Device,
) -> Param<Tensor<B, D>> {
    Param::from_tensor(Tensor::<B, D>::random(
        shape,
        Distribution::Uniform(-bound, bound),
        device,
    ))
}
