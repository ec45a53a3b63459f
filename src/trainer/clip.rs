use burn::module::ParamId;
use burn::optim::GradientsParams;
use burn::tensor::ElementConversion;
use burn::tensor::backend::{AutodiffBackend, Backend};

use crate::model::RnnModel;

const NORM_EPS: f64 = 1e-6;

/// Rescales all gradients together so their global L2 norm is at most
/// `max_norm`. Returns the gradients and the norm measured before clipping.
pub fn clip_grad_norm<B: AutodiffBackend>(
    model: &RnnModel<B>,
    mut grads: GradientsParams,
    max_norm: f64,
) -> (GradientsParams, f64) {
    let ids = model.param_ids();

    let squared: f64 = ids
        .matrices
        .iter()
        .map(|id| squared_norm::<B::InnerBackend, 2>(&grads, *id))
        .chain(
            ids.vectors
                .iter()
                .map(|id| squared_norm::<B::InnerBackend, 1>(&grads, *id)),
        )
        .sum();
    let norm = squared.sqrt();

    let scale = max_norm / (norm + NORM_EPS);
    if scale < 1.0 {
        for id in &ids.matrices {
            rescale::<B::InnerBackend, 2>(&mut grads, *id, scale);
        }
        for id in &ids.vectors {
            rescale::<B::InnerBackend, 1>(&mut grads, *id, scale);
        }
    }

    (grads, norm)
}

fn squared_norm<B: Backend, const D: usize>(grads: &GradientsParams, id: ParamId) -> f64 {
    grads
        .get::<B, D>(id)
        .map(|grad| grad.powf_scalar(2.0).sum().into_scalar().elem::<f64>())
        .unwrap_or(0.0)
}

fn rescale<B: Backend, const D: usize>(grads: &mut GradientsParams, id: ParamId, scale: f64) {
    if let Some(grad) = grads.remove::<B, D>(id) {
        grads.register::<B, D>(id, grad.mul_scalar(scale));
    }
}
