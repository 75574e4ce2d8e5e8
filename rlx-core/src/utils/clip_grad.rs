use candle_core::Result;
use candle_core::backprop::GradStore;
use candle_nn::VarMap;

/// Rescales, inside `grad_store`, the gradients of the variables of `varmap` so that
/// their joint L2 norm does not exceed `max_norm`. Returns the norm before clipping.
pub fn clip_grad_norm(grad_store: &mut GradStore, varmap: &VarMap, max_norm: f32) -> Result<f32> {
    let mut total_norm_squared = 0.0f32;
    let all_vars = varmap.all_vars();
    for var in all_vars.iter() {
        if let Some(grad) = grad_store.get(var.as_tensor()) {
            total_norm_squared += grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
        }
    }
    let total_norm = total_norm_squared.sqrt();
    if total_norm > max_norm {
        let clip_coef = (max_norm / (total_norm + 1e-6)) as f64;
        for var in all_vars.iter() {
            let Some(old_grad) = grad_store.get(var.as_tensor()) else {
                continue;
            };
            let new_grad = old_grad.affine(clip_coef, 0.)?;
            grad_store.insert(var.as_tensor(), new_grad);
        }
    }
    Ok(total_norm)
}
