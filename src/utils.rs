/// Optimal leaf output under the regularized second-order objective.
///
/// With no L1 term this is `-G / (H + lambda)`; with `alpha > 0` the gradient
/// is soft-thresholded first.
pub fn weight(alpha: f64, lambda: f64, grad: f64, hess: f64) -> f64 {
    if alpha == 0.0 {
        -grad / (hess + lambda)
    } else {
        let thresholded = (grad.abs() - alpha).max(0.0);
        -grad.signum() * thresholded / (hess + lambda)
    }
}

/// Regularized loss at a given leaf output.
pub fn loss_at(alpha: f64, lambda: f64, grad: f64, hess: f64, w: f64) -> f64 {
    let l2 = (hess + lambda) * w * w / 2.0 + grad * w;
    if alpha == 0.0 {
        l2
    } else {
        l2 + alpha * w.abs()
    }
}

/// Score of a node: negated loss at the optimal weight. Higher is better.
pub fn weight_and_score(alpha: f64, lambda: f64, grad: f64, hess: f64) -> (f64, f64) {
    let w = weight(alpha, lambda, grad, hess);
    (w, -loss_at(alpha, lambda, grad, hess, w))
}

pub fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}
