// C12: Rate control. A GOP-level bit budget, redistributed from a 40-picture
// smoothing window of avg-vs-coded bits, is split across a GOP's pictures by
// a bpp-selected layer-weight table; an alpha/beta lambda model converts that
// per-picture budget to lambda (and hence QP), and is updated after every
// frame from its actual bits spent, closing the feedback loop. Constants and
// formulas follow kvazaar's rate_control.c.

use crate::util::clamp;

pub const SMOOTHING_WINDOW: usize = 40;

/// Relative bit-allocation weight by temporal layer (0 = lowest, coarsest
/// layer), selected by the stream's average bits-per-pixel — lower bpp
/// streams push relatively more bits toward the lowest layer.
fn layer_weights_for_bpp(bits_per_pixel: f64) -> [f64; 4] {
  if bits_per_pixel <= 0.05 {
    [30.0, 8.0, 4.0, 1.0]
  } else if bits_per_pixel <= 0.1 {
    [25.0, 7.0, 4.0, 1.0]
  } else if bits_per_pixel <= 0.2 {
    [20.0, 6.0, 4.0, 1.0]
  } else {
    [15.0, 5.0, 4.0, 1.0]
  }
}

#[derive(Clone, Copy, Debug)]
pub struct LambdaModel {
  alpha: f64,
  beta: f64,
}

impl LambdaModel {
  pub fn new() -> Self {
    Self { alpha: 3.2003, beta: -1.367 }
  }

  /// lambda = alpha * bpp^beta, the standard R-lambda model, clamped to the
  /// same [0.1, 10000] range kvazaar enforces on its lambda values.
  pub fn lambda_for_bpp(&self, bits_per_pixel: f64) -> f64 {
    clamp(self.alpha * bits_per_pixel.max(1e-6).powf(self.beta), 0.1, 10000.0)
  }

  /// Updates alpha/beta from the observed (bits-per-pixel, lambda) pair of a
  /// just-finished frame, with a damping factor so a single outlier frame
  /// doesn't destabilize later estimates.
  pub fn update(&mut self, bits_per_pixel: f64, actual_lambda: f64) {
    if bits_per_pixel <= 0.0 || actual_lambda <= 0.0 {
      return;
    }
    let predicted_ln_lambda = self.alpha.ln() + self.beta * bits_per_pixel.ln();
    let actual_ln_lambda = actual_lambda.ln();
    let error = actual_ln_lambda - predicted_ln_lambda;

    const DAMPING: f64 = 0.1;
    self.alpha = (self.alpha.ln() + DAMPING * error).exp();
    self.beta = clamp(self.beta + DAMPING * error * bits_per_pixel.ln().max(1e-3).recip(), -3.0, -0.1);
  }
}

impl Default for LambdaModel {
  fn default() -> Self {
    Self::new()
  }
}

/// lambda -> QP and QP -> lambda conversions, using kvazaar's calibrated
/// R-lambda constants: `QP = 4.2005 * ln(lambda) + 13.7223`. `qp_to_lambda`
/// clamps its result to [0.1, 10000] as kvazaar does everywhere lambda is
/// derived, which means QPs near 0 don't round-trip exactly — the floor
/// wins, same as the reference implementation.
pub fn lambda_to_qp(lambda: f64) -> i32 {
  clamp((4.2005 * lambda.max(1e-6).ln() + 13.7223).round() as i32, 0, 51)
}

pub fn qp_to_lambda(qp: i32) -> f64 {
  clamp(((qp as f64 - 13.7223) / 4.2005).exp(), 0.1, 10000.0)
}

/// A 40-picture sliding window tracking target vs. actual bits, used to
/// smooth the per-GOP bit budget against bursty content.
pub struct SmoothingWindow {
  target_bits: [f64; SMOOTHING_WINDOW],
  actual_bits: [f64; SMOOTHING_WINDOW],
  cursor: usize,
  filled: usize,
}

impl SmoothingWindow {
  pub fn new() -> Self {
    Self { target_bits: [0.0; SMOOTHING_WINDOW], actual_bits: [0.0; SMOOTHING_WINDOW], cursor: 0, filled: 0 }
  }

  pub fn push(&mut self, target: f64, actual: f64) {
    self.target_bits[self.cursor] = target;
    self.actual_bits[self.cursor] = actual;
    self.cursor = (self.cursor + 1) % SMOOTHING_WINDOW;
    self.filled = (self.filled + 1).min(SMOOTHING_WINDOW);
  }

  /// Accumulated bit surplus (positive) or deficit (negative) over the
  /// window, to be redistributed across the next GOP's per-frame targets.
  pub fn carry_over(&self) -> f64 {
    let n = self.filled;
    (0..n).map(|i| self.target_bits[i] - self.actual_bits[i]).sum()
  }
}

impl Default for SmoothingWindow {
  fn default() -> Self {
    Self::new()
  }
}

pub struct RateControlState {
  pub lambda_model: LambdaModel,
  pub window: SmoothingWindow,
  pub bits_per_second: f64,
  pub frame_rate: f64,
  gop_len: usize,
  pictures_coded: u64,
  bits_coded_total: f64,
  gop_offset: usize,
  cur_gop_target_bits: f64,
}

impl RateControlState {
  pub fn new(bits_per_second: f64, frame_rate: f64, gop_len: usize) -> Self {
    Self {
      lambda_model: LambdaModel::new(),
      window: SmoothingWindow::new(),
      bits_per_second,
      frame_rate,
      gop_len: gop_len.max(1),
      pictures_coded: 0,
      bits_coded_total: 0.0,
      gop_offset: 0,
      cur_gop_target_bits: 0.0,
    }
  }

  fn bits_per_frame(&self) -> f64 {
    self.bits_per_second / self.frame_rate.max(1.0)
  }

  /// Recomputes the current GOP's bit budget: a smoothing window that looks
  /// `SMOOTHING_WINDOW` pictures beyond what's been coded so far, with the
  /// resulting surplus/deficit spread over one GOP. Mirrors kvazaar's
  /// `gop_allocate_bits`, floored at 200 bits.
  fn allocate_gop_bits(&mut self) {
    let avg = self.bits_per_frame();
    let target = (avg * (self.pictures_coded as f64 + SMOOTHING_WINDOW as f64) - self.bits_coded_total) * self.gop_len as f64 / SMOOTHING_WINDOW as f64;
    self.cur_gop_target_bits = target.max(200.0);
  }

  /// Target bit budget for the picture at `layer` (0 = lowest, coarsest
  /// temporal layer) within the current GOP, following kvazaar's
  /// `pic_allocate_bits`: the GOP budget split by a layer-weight table picked
  /// from the stream's average bits-per-pixel, normalized over every picture
  /// in the GOP. This encoder's GOP structure is flat I/P rather than
  /// hierarchical B, so every picture shares layer 0's weight and the split
  /// reduces to an equal share of the GOP budget.
  pub fn target_bits_for_frame(&mut self, width: usize, height: usize, layer: usize) -> f64 {
    if self.gop_offset == 0 {
      self.allocate_gop_bits();
    }
    let bpp = self.bits_per_frame() / (width * height) as f64;
    let weights = layer_weights_for_bpp(bpp);
    let pic_weight = weights[layer.min(weights.len() - 1)];
    self.cur_gop_target_bits * pic_weight / (weights[0] * self.gop_len as f64)
  }

  /// Per-CTU bit allocation within a frame's budget, weighted by each CTU's
  /// estimated activity (sum of absolute source gradients, a cheap proxy for
  /// how costly the CTU will be to code).
  pub fn ctu_targets(&self, frame_target_bits: f64, activity: &[f64]) -> Vec<f64> {
    let total: f64 = activity.iter().sum::<f64>().max(1e-6);
    activity.iter().map(|a| frame_target_bits * a / total).collect()
  }

  pub fn lambda_for_frame(&self, width: usize, height: usize, target_bits: f64) -> f64 {
    let bpp = target_bits / (width * height) as f64;
    self.lambda_model.lambda_for_bpp(bpp)
  }

  pub fn finish_frame(&mut self, width: usize, height: usize, target_bits: f64, actual_bits: f64, actual_lambda: f64) {
    let bpp = actual_bits / (width * height) as f64;
    self.lambda_model.update(bpp.max(1e-9), actual_lambda);
    self.window.push(target_bits, actual_bits);
    self.bits_coded_total += actual_bits;
    self.pictures_coded += 1;
    self.gop_offset = (self.gop_offset + 1) % self.gop_len;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lambda_qp_roundtrip_is_close() {
    // QP 0 doesn't round-trip: its inverse lambda falls below the 0.1 floor
    // kvazaar clamps to, same as the reference implementation.
    for qp in [8, 16, 26, 32, 40, 51] {
      let lambda = qp_to_lambda(qp);
      let recovered = lambda_to_qp(lambda);
      assert!((recovered - qp).abs() <= 1);
    }
  }

  #[test]
  fn lambda_to_qp_clamps_to_the_valid_qp_range() {
    assert_eq!(lambda_to_qp(0.01), 0);
    assert_eq!(lambda_to_qp(1_000_000.0), 51);
  }

  #[test]
  fn smoothing_window_carry_over_is_zero_when_on_target() {
    let mut window = SmoothingWindow::new();
    for _ in 0..10 {
      window.push(1000.0, 1000.0);
    }
    assert_eq!(window.carry_over(), 0.0);
  }

  #[test]
  fn ctu_targets_sum_to_frame_budget() {
    let state = RateControlState::new(2_000_000.0, 30.0, 8);
    let activity = vec![1.0, 2.0, 3.0, 4.0];
    let targets = state.ctu_targets(1000.0, &activity);
    let sum: f64 = targets.iter().sum();
    assert!((sum - 1000.0).abs() < 1e-6);
  }

  #[test]
  fn gop_budget_is_split_evenly_across_a_flat_gop() {
    let mut state = RateControlState::new(2_000_000.0, 30.0, 8);
    let first = state.target_bits_for_frame(1920, 1080, 0);
    for _ in 0..7 {
      let second = state.target_bits_for_frame(1920, 1080, 0);
      assert!((second - first).abs() < 1e-6);
      state.finish_frame(1920, 1080, second, second, qp_to_lambda(30));
    }
  }

  #[test]
  fn rate_control_converges_within_ten_percent_over_a_gop() {
    let mut state = RateControlState::new(2_000_000.0, 30.0, 8);
    let target = state.target_bits_for_frame(1920, 1080, 0);
    for _ in 0..30 {
      let actual = target * 1.02; // consistently slightly over budget
      state.finish_frame(1920, 1080, target, actual, qp_to_lambda(30));
    }
    let carry = state.window.carry_over();
    assert!(carry.abs() < 0.1 * target * SMOOTHING_WINDOW as f64);
  }
}
