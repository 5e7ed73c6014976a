// Integration-level check of spec §8's rate-control convergence property:
// over a GOP's worth of frames coded near their target, the smoothing
// window's carry-over stays bounded relative to the nominal per-frame
// budget (rate control "converges", it doesn't drift unboundedly).

use hevc_core::ratecontrol::{qp_to_lambda, RateControlState, SMOOTHING_WINDOW};

#[test]
fn carry_over_stays_bounded_when_frames_land_near_target() {
  let mut state = RateControlState::new(4_000_000.0, 30.0, 8);
  let target = state.target_bits_for_frame(1920, 1080, 0);

  for i in 0..SMOOTHING_WINDOW {
    // Alternate slightly above/below target so errors mostly cancel.
    let actual = if i % 2 == 0 { target * 1.05 } else { target * 0.95 };
    state.finish_frame(1920, 1080, target, actual, qp_to_lambda(28));
  }

  let carry = state.window.carry_over();
  assert!(carry.abs() < 0.1 * target * SMOOTHING_WINDOW as f64);
}

#[test]
fn lambda_model_update_moves_toward_observed_lambda() {
  let mut state = RateControlState::new(2_000_000.0, 25.0, 8);
  let bpp = 0.05;
  let before = state.lambda_model.lambda_for_bpp(bpp);

  // Feed it a consistently higher observed lambda at this bpp and check the
  // model's prediction shifts toward it rather than staying frozen.
  let observed = before * 2.0;
  for _ in 0..5 {
    state.lambda_model.update(bpp, observed);
  }
  let after = state.lambda_model.lambda_for_bpp(bpp);

  assert!(after > before);
}

#[test]
fn ctu_targets_favor_higher_activity_regions() {
  let state = RateControlState::new(2_000_000.0, 30.0, 8);
  let targets = state.ctu_targets(1000.0, &[1.0, 9.0]);
  assert!(targets[1] > targets[0]);
}
