use awd_lstm::model::{activation_regularization, temporal_activation_regularization};
use awd_lstm::trainer::clip_grad_norm;
use awd_lstm::{AwdLstmConfig, RnnModel, language_model_loss};
use burn::LearningRate;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::Backend as BackendTrait;
use burn::tensor::{Int, Tensor, TensorData};
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};

fn training_step_bench(c: &mut Criterion) {
    type Backend = Autodiff<NdArray<f32>>;
    <Backend as BackendTrait>::seed(24);
    let device = <Backend as BackendTrait>::Device::default();

    let vocab_size = 1_000;
    let base_model = AwdLstmConfig {
        vocab_size,
        emb_dim: 64,
        hidden_dim: 128,
        ..AwdLstmConfig::default()
    }
    .init::<Backend>(&device)
    .expect("model");

    let batch_size = 8;
    let bptt = 35;
    let input_tokens: Vec<i64> = (0..(batch_size * bptt))
        .map(|idx| (idx % vocab_size) as i64)
        .collect();
    let target_tokens: Vec<i64> = input_tokens
        .iter()
        .map(|tok| (tok + 1) % vocab_size as i64)
        .collect();

    let inputs = Tensor::<Backend, 2, Int>::from_data(
        TensorData::new(input_tokens, [batch_size, bptt]),
        &device,
    );
    let targets = Tensor::<Backend, 2, Int>::from_data(
        TensorData::new(target_tokens, [batch_size, bptt]),
        &device,
    );

    let lr: LearningRate = 30.0;

    c.bench_function("awd_lstm_single_train_step", |b| {
        b.iter_batched(
            || {
                let model = base_model.clone();
                let optimizer = SgdConfig::new().init::<Backend, RnnModel<Backend>>();
                (model, optimizer)
            },
            |(mut model, mut optimizer)| {
                let output = model.forward_with_activations(inputs.clone(), None);
                let mut loss = language_model_loss::<Backend>(output.logits, targets.clone());
                if let Some(dropped) = output.dropped_outputs.last() {
                    loss = loss + activation_regularization(dropped.clone(), 2.0);
                }
                if let Some(raw) = output.raw_outputs.last() {
                    loss = loss + temporal_activation_regularization(raw.clone(), 1.0);
                }
                let grads = GradientsParams::from_grads(loss.backward(), &model);
                let (grads, _norm) = clip_grad_norm(&model, grads, 0.25);
                model = optimizer.step(lr, model, grads);
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, training_step_bench);
criterion_main!(benches);
