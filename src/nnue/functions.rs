//------------------------------------------------------------------------------
// Activation functions

/// Default scale applied inside the sigmoid, so that centipawn evaluations
/// land on the steep part of the curve.
pub const SIGMOID_SCALE: f32 = 2.5 / 1024.0;

/// Scaled sigmoid activation function
///
/// ### Arguments
///
/// * `x`:     input
/// * `scale`: sigmoid scale
///
/// ### Return value
///
/// 1 / (1 + exp(-scale * x))
#[inline]
pub fn sigmoid(x: f32, scale: f32) -> f32 {
  1.0 / (1.0 + (-scale * x).exp())
}

/// Scaled sigmoid derivative
///
/// Note that the argument is the sigmoid *output*, not the input:
/// given y = sigmoid(x), the derivative at x is y * (1 - y) * scale.
///
/// ### Arguments
///
/// * `y`:     sigmoid output value
/// * `scale`: sigmoid scale
///
/// ### Return value
///
/// derivative of the scaled sigmoid, evaluated from its output.
#[inline]
pub fn sigmoid_prime(y: f32, scale: f32) -> f32 {
  y * (1.0 - y) * scale
}

/// ReLU activation function
///
/// ### Arguments
///
/// * `x`: input
///
/// ### Return value
///
/// x if x > 0
/// 0 if x <= 0
#[inline]
pub fn relu(x: f32) -> f32 {
  x.max(0.0)
}

/// ReLU derivative
///
/// ### Arguments
///
/// * `x`: input
///
/// ### Return value
///
/// 1.0 if x > 0, else 0.0
#[inline]
pub fn relu_prime(x: f32) -> f32 {
  if x > 0.0 {
    1.0
  } else {
    0.0
  }
}

//------------------------------------------------------------------------------
// Cost functions

/// Weight of the engine-evaluation target in the blended cost.
pub const COST_EVAL_WEIGHT: f32 = 0.5;
/// Weight of the game-outcome (WDL) target in the blended cost.
pub const COST_WDL_WEIGHT: f32 = 1.0 - COST_EVAL_WEIGHT;

/// Blended squared-error cost for a single sample.
///
/// The prediction is pulled both towards the sigmoid-normalized engine
/// evaluation and towards the actual game outcome.
///
/// ### Arguments
///
/// * `output`:      network prediction, in [0;1]
/// * `eval_target`: sigmoid-normalized engine evaluation
/// * `wdl_target`:  game outcome, one of 0.0 / 0.5 / 1.0
///
/// ### Return value
///
/// ```math
/// c = w_e (output - eval)^2 + w_w (output - wdl)^2
/// ```
#[inline]
pub fn cost(output: f32, eval_target: f32, wdl_target: f32) -> f32 {
  let lhs = COST_EVAL_WEIGHT * (output - eval_target) * (output - eval_target);
  let rhs = COST_WDL_WEIGHT * (output - wdl_target) * (output - wdl_target);
  lhs + rhs
}

/// Derivative of [cost] with respect to the prediction.
///
/// ### Arguments
///
/// * `output`:      network prediction, in [0;1]
/// * `eval_target`: sigmoid-normalized engine evaluation
/// * `wdl_target`:  game outcome, one of 0.0 / 0.5 / 1.0
///
/// ### Return value
///
/// Value of the derivative:
/// $$2 w_e (output - eval) + 2 w_w (output - wdl)$$
#[inline]
pub fn cost_gradient(output: f32, eval_target: f32, wdl_target: f32) -> f32 {
  2.0 * COST_EVAL_WEIGHT * (output - eval_target) + 2.0 * COST_WDL_WEIGHT * (output - wdl_target)
}

//------------------------------------------------------------------------------
// Tests
#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sigmoid() {
    assert_eq!(0.5, sigmoid(0.0, SIGMOID_SCALE));
    // Large evaluations saturate
    assert!(sigmoid(100_000.0, SIGMOID_SCALE) > 0.99);
    assert!(sigmoid(-100_000.0, SIGMOID_SCALE) < 0.01);
    // Symmetry around 0
    let y = sigmoid(345.0, SIGMOID_SCALE) + sigmoid(-345.0, SIGMOID_SCALE);
    assert!((y - 1.0).abs() < 1e-6);
  }

  #[test]
  fn test_sigmoid_prime() {
    // Steepest at the middle of the curve
    let mid = sigmoid_prime(0.5, SIGMOID_SCALE);
    assert_eq!(0.25 * SIGMOID_SCALE, mid);
    assert!(sigmoid_prime(0.99, SIGMOID_SCALE) < mid);
    assert!(sigmoid_prime(0.01, SIGMOID_SCALE) < mid);
  }

  #[test]
  fn test_relu() {
    assert_eq!(0.0, relu(-3.2));
    assert_eq!(0.0, relu(0.0));
    assert_eq!(3.2, relu(3.2));
    assert_eq!(0.0, relu_prime(-3.2));
    assert_eq!(0.0, relu_prime(0.0));
    assert_eq!(1.0, relu_prime(3.2));
  }

  #[test]
  fn test_cost() {
    // Perfect prediction on both targets
    assert_eq!(0.0, cost(0.5, 0.5, 0.5));
    assert_eq!(0.0, cost_gradient(0.5, 0.5, 0.5));

    // Both targets at the same spot: plain squared error
    let c = cost(0.75, 0.5, 0.5);
    assert!((c - 0.0625).abs() < 1e-7);

    // Gradient points towards the targets
    assert!(cost_gradient(0.75, 0.5, 0.5) > 0.0);
    assert!(cost_gradient(0.25, 0.5, 0.5) < 0.0);

    // Split targets: the minimum sits between them
    assert_eq!(0.0, cost_gradient(0.5, 0.0, 1.0));
  }
}
