use burn::nn::loss::CrossEntropyLossConfig;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

pub fn language_model_loss<B: Backend>(
    logits: Tensor<B, 3>,
    targets: Tensor<B, 2, Int>,
) -> Tensor<B, 1> {
    let [batch, time, vocab] = logits.shape().dims();

    let logits_flat = logits.reshape([batch * time, vocab]);
    let targets_flat = targets.reshape([batch * time]);

    let device = logits_flat.device();
    CrossEntropyLossConfig::new()
        .init::<B>(&device)
        .forward(logits_flat, targets_flat)
}

/// AR: `alpha * mean(x^2)` over a `[batch, time, features]` activation.
pub fn activation_regularization<B: Backend>(activations: Tensor<B, 3>, alpha: f64) -> Tensor<B, 1> {
    activations.powf_scalar(2.0).mean().mul_scalar(alpha)
}

/// TAR: `beta * mean((x[:, t] - x[:, t-1])^2)`; zero for single-step windows.
pub fn temporal_activation_regularization<B: Backend>(
    activations: Tensor<B, 3>,
    beta: f64,
) -> Tensor<B, 1> {
    let [_batch, time, _features] = activations.dims();
    if time < 2 {
        return Tensor::zeros([1], &activations.device());
    }

    let next = activations.clone().slice_dim(1, 1..time);
    let prev = activations.slice_dim(1, 0..time - 1);
    (next - prev).powf_scalar(2.0).mean().mul_scalar(beta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type Eval = NdArray<f32>;

    fn scalar(tensor: Tensor<Eval, 1>) -> f32 {
        tensor.into_data().convert::<f32>().into_vec::<f32>().expect("scalar")[0]
    }

    #[test]
    fn uniform_logits_give_log_vocab() {
        let device = Default::default();
        let logits = Tensor::<Eval, 3>::zeros([2, 3, 50], &device);
        let targets = Tensor::<Eval, 2, Int>::from_data(TensorData::new(vec![7i64; 6], [2, 3]), &device);

        let loss = scalar(language_model_loss(logits, targets));
        assert!((loss - 50f32.ln()).abs() < 1e-4);
    }

    #[test]
    fn ar_is_scaled_mean_square() {
        let device = Default::default();
        let activations = Tensor::<Eval, 3>::from_data(
            TensorData::new(vec![1.0f32, -2.0, 3.0, 0.0], [1, 2, 2]),
            &device,
        );

        let penalty = scalar(activation_regularization(activations, 2.0));
        assert!((penalty - 2.0 * 14.0 / 4.0).abs() < 1e-5);
    }

    #[test]
    fn tar_penalizes_change_along_time() {
        let device = Default::default();
        // One sequence, three steps, one feature: 0 -> 1 -> 3.
        let activations =
            Tensor::<Eval, 3>::from_data(TensorData::new(vec![0.0f32, 1.0, 3.0], [1, 3, 1]), &device);

        let penalty = scalar(temporal_activation_regularization(activations, 0.5));
        assert!((penalty - 0.5 * (1.0 + 4.0) / 2.0).abs() < 1e-5);
    }

    #[test]
    fn tar_is_zero_for_constant_or_single_step_input() {
        let device = Default::default();
        let constant = Tensor::<Eval, 3>::ones([2, 4, 3], &device);
        assert_eq!(scalar(temporal_activation_regularization(constant, 1.0)), 0.0);

        let single = Tensor::<Eval, 3>::ones([2, 1, 3], &device);
        assert_eq!(scalar(temporal_activation_regularization(single, 1.0)), 0.0);
    }
}
