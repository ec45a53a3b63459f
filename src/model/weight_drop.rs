use burn::module::{Module, Param};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, activation};

use super::dropout::keep_mask;
use super::ParamIds;
use super::state::LstmState;
use super::uniform_param;

/// Single-layer LSTM with DropConnect on its hidden-to-hidden weight.
///
/// The recurrent weight is masked once per [`WeightDropLstm::forward`] call and
/// the same masked copy drives every time step of that call. Gate order along
/// the `4 * hidden` axis is input, forget, cell, output.
#[derive(Module, Debug)]
pub struct WeightDropLstm<B: Backend> {
    weight_ih: Param<Tensor<B, 2>>,
    weight_hh: Param<Tensor<B, 2>>,
    bias: Param<Tensor<B, 1>>,
    weight_dp: f64,
    input_size: usize,
    hidden_size: usize,
}

impl<B: Backend> WeightDropLstm<B> {
    pub fn new(input_size: usize, hidden_size: usize, weight_dp: f64, device: &B::Device) -> Self {
        let bound = 1.0 / (hidden_size as f64).sqrt();
        Self {
            weight_ih: uniform_param([input_size, 4 * hidden_size], bound, device),
            weight_hh: uniform_param([hidden_size, 4 * hidden_size], bound, device),
            bias: uniform_param([4 * hidden_size], bound, device),
            weight_dp,
            input_size,
            hidden_size,
        }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn weight_dp(&self) -> f64 {
        self.weight_dp
    }

    /// Unmasked recurrent weight, `[hidden, 4 * hidden]`.
    pub fn weight_hh(&self) -> Tensor<B, 2> {
        self.weight_hh.val()
    }

    pub(crate) fn collect_param_ids(&self, ids: &mut ParamIds) {
        ids.matrices.push(self.weight_ih.id);
        ids.matrices.push(self.weight_hh.id);
        ids.vectors.push(self.bias.id);
    }

    /// Recurrent weight to use for one forward call.
    pub fn sample_weight_hh(&self) -> Tensor<B, 2> {
        let weight = self.weight_hh.val();
        if !B::ad_enabled() || self.weight_dp <= 0.0 {
            return weight;
        }
        if self.weight_dp >= 1.0 {
            return weight.zeros_like();
        }

        let mask = keep_mask::<B, 2>(weight.dims(), self.weight_dp, &weight.device());
        weight * mask
    }

    pub fn forward(&self, input: Tensor<B, 3>, state: LstmState<B>) -> (Tensor<B, 3>, LstmState<B>) {
        let weight_hh = self.sample_weight_hh();
        self.forward_with_weight(input, state, weight_hh)
    }

    /// Runs the recurrence over `input` (`[batch, time, input_size]`) with an
    /// explicit recurrent weight.
    pub fn forward_with_weight(
        &self,
        input: Tensor<B, 3>,
        state: LstmState<B>,
        weight_hh: Tensor<B, 2>,
    ) -> (Tensor<B, 3>, LstmState<B>) {
        let [batch, time, features] = input.dims();
        debug_assert_eq!(features, self.input_size);
        let gates_dim = 4 * self.hidden_size;

        let input_proj = input
            .reshape([batch * time, features])
            .matmul(self.weight_ih.val())
            .add(self.bias.val().unsqueeze::<2>())
            .reshape([batch, time, gates_dim]);

        let LstmState {
            mut hidden,
            mut cell,
        } = state;
        let mut outputs = Vec::with_capacity(time);

        for step in 0..time {
            let gates = input_proj
                .clone()
                .slice_dim(1, step..step + 1)
                .reshape([batch, gates_dim])
                + hidden.matmul(weight_hh.clone());

            let input_gate = activation::sigmoid(self.gate(&gates, 0));
            let forget_gate = activation::sigmoid(self.gate(&gates, 1));
            let candidate = self.gate(&gates, 2).tanh();
            let output_gate = activation::sigmoid(self.gate(&gates, 3));

            cell = forget_gate * cell + input_gate * candidate;
            hidden = output_gate * cell.clone().tanh();
            outputs.push(hidden.clone());
        }

        let output = Tensor::stack::<3>(outputs, 1);
        (output, LstmState::new(hidden, cell))
    }

    fn gate(&self, gates: &Tensor<B, 2>, index: usize) -> Tensor<B, 2> {
        let start = index * self.hidden_size;
        gates.clone().slice_dim(1, start..start + self.hidden_size)
    }
}
