use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor};

/// Dropout whose mask is sampled once per call and shared by every time step.
///
/// Inputs are `[batch, time, features]`; the mask is `[batch, 1, features]`
/// and kept entries are scaled by `1 / (1 - prob)`. Like burn's own `Dropout`,
/// it only acts on autodiff backends, so a model moved to its inner backend with
/// `valid()` sees the identity.
#[derive(Module, Clone, Debug)]
pub struct VariationalDropout {
    prob: f64,
}

impl VariationalDropout {
    pub fn new(prob: f64) -> Self {
        Self { prob }
    }

    pub fn prob(&self) -> f64 {
        self.prob
    }

    pub fn forward<B: Backend>(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        if !B::ad_enabled() || self.prob <= 0.0 {
            return input;
        }
        if self.prob >= 1.0 {
            return input.zeros_like();
        }

        let [batch, _time, features] = input.dims();
        let mask = keep_mask::<B, 3>([batch, 1, features], self.prob, &input.device());
        input * mask
    }
}

/// Drops entire rows of an embedding table, so a dropped word vanishes from
/// every position it occurs at in the window.
#[derive(Module, Clone, Debug)]
pub struct EmbeddingDropout {
    prob: f64,
}

impl EmbeddingDropout {
    pub fn new(prob: f64) -> Self {
        Self { prob }
    }

    pub fn forward<B: Backend>(&self, weight: Tensor<B, 2>) -> Tensor<B, 2> {
        if !B::ad_enabled() || self.prob <= 0.0 {
            return weight;
        }
        if self.prob >= 1.0 {
            return weight.zeros_like();
        }

        let [vocab, _dim] = weight.dims();
        let mask = keep_mask::<B, 2>([vocab, 1], self.prob, &weight.device());
        weight * mask
    }
}

/// Bernoulli keep-mask already divided by the keep probability.
pub(crate) fn keep_mask<B: Backend, const D: usize>(
    shape: [usize; D],
    prob: f64,
    device: &B::Device,
) -> Tensor<B, D> {
    let keep = 1.0 - prob;
    Tensor::<B, D>::random(shape, Distribution::Bernoulli(keep), device).div_scalar(keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;

    type Eval = NdArray<f32>;
    type Train = Autodiff<NdArray<f32>>;

    fn values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
        tensor
            .into_data()
            .convert::<f32>()
            .into_vec::<f32>()
            .expect("tensor values")
    }

    #[test]
    fn eval_mode_is_identity() {
        let device = Default::default();
        let input = Tensor::<Eval, 3>::random([2, 5, 7], Distribution::Default, &device);
        let dropout = VariationalDropout::new(0.5);

        let output = dropout.forward(input.clone());
        assert_eq!(values(output), values(input));
    }

    #[test]
    fn zero_probability_is_identity_in_training() {
        let device = Default::default();
        let input = Tensor::<Train, 3>::random([3, 4, 6], Distribution::Default, &device);
        let dropout = VariationalDropout::new(0.0);

        let output = dropout.forward(input.clone());
        assert_eq!(values(output), values(input));
    }

    #[test]
    fn certain_drop_zeroes_everything() {
        let device = Default::default();
        let input = Tensor::<Train, 3>::ones([2, 3, 4], &device);

        let output = VariationalDropout::new(1.0).forward(input);
        assert!(values(output).iter().all(|value| *value == 0.0));
    }

    #[test]
    fn mask_is_shared_across_time() {
        let device = Default::default();
        let (batch, time, features) = (3, 9, 16);
        let input = Tensor::<Train, 3>::ones([batch, time, features], &device);
        let prob = 0.5;

        let output = values(VariationalDropout::new(prob).forward(input));
        let scaled = (1.0 / (1.0 - prob)) as f32;

        for b in 0..batch {
            for f in 0..features {
                let first = output[b * time * features + f];
                assert!(first == 0.0 || (first - scaled).abs() < 1e-5);
                for t in 1..time {
                    let value = output[b * time * features + t * features + f];
                    assert_eq!(value, first, "mask changed along time at b={b} t={t} f={f}");
                }
            }
        }
    }

    #[test]
    fn embedding_dropout_zeroes_whole_rows() {
        let device = Default::default();
        let (vocab, dim) = (32, 5);
        let weight = Tensor::<Train, 2>::ones([vocab, dim], &device);

        let dropped = values(EmbeddingDropout::new(0.5).forward(weight));
        for row in dropped.chunks(dim) {
            let first = row[0];
            assert!(first == 0.0 || (first - 2.0).abs() < 1e-5);
            assert!(row.iter().all(|value| *value == first));
        }
    }

    #[test]
    fn embedding_dropout_is_identity_in_eval() {
        let device = Default::default();
        let weight = Tensor::<Eval, 2>::random([10, 4], Distribution::Default, &device);

        let dropped = EmbeddingDropout::new(0.9).forward(weight.clone());
        assert_eq!(values(dropped), values(weight));
    }
}
