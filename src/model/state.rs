use burn::tensor::Tensor;
use burn::tensor::backend::Backend;

#[derive(Debug, Clone)]
pub struct LstmState<B: Backend> {
    pub hidden: Tensor<B, 2>,
    pub cell: Tensor<B, 2>,
}

impl<B: Backend> LstmState<B> {
    pub fn new(hidden: Tensor<B, 2>, cell: Tensor<B, 2>) -> Self {
        Self { hidden, cell }
    }

    pub fn zeros(batch: usize, hidden_size: usize, device: &B::Device) -> Self {
        Self {
            hidden: Tensor::zeros([batch, hidden_size], device),
            cell: Tensor::zeros([batch, hidden_size], device),
        }
    }

    pub fn detach(self) -> Self {
        Self {
            hidden: self.hidden.detach(),
            cell: self.cell.detach(),
        }
    }
}

/// Recurrent state carried from one BPTT window to the next.
///
/// The encoder never stores it: every forward call takes the previous value and
/// returns the next one. Call [`EncoderState::detach`] between windows so the
/// backward pass stops at the window boundary.
#[derive(Debug, Clone)]
pub struct EncoderState<B: Backend> {
    pub layers: Vec<LstmState<B>>,
}

impl<B: Backend> EncoderState<B> {
    pub fn new(layers: Vec<LstmState<B>>) -> Self {
        Self { layers }
    }

    pub fn zeros(hidden_sizes: &[usize], batch: usize, device: &B::Device) -> Self {
        Self {
            layers: hidden_sizes
                .iter()
                .map(|&hidden| LstmState::zeros(batch, hidden, device))
                .collect(),
        }
    }

    pub fn detach(self) -> Self {
        Self {
            layers: self.layers.into_iter().map(LstmState::detach).collect(),
        }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.layers.first().map(|layer| layer.hidden.dims()[0])
    }
}
