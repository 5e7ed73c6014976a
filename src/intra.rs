// C5: Intra predictor. 35 HEVC intra modes (planar, DC, 33 angular), with
// reference-sample gathering/smoothing per spec §4.4. Block sizes are
// 4, 8, 16 or 32.

use crate::array2d::Array2D;
use crate::consts::INTRA_ANGLE_TABLE;
use crate::frame::Plane;
use crate::util::clamp;

pub const PLANAR: u8 = 0;
pub const DC: u8 = 1;

/// Gathered and (optionally) smoothed reference samples for a block: `top`
/// and `left` each hold `2*size+1` samples, index 0 being the shared
/// top-left corner sample.
pub struct RefSamples {
  pub top: Vec<i32>,
  pub left: Vec<i32>,
}

impl RefSamples {
  pub fn gather(plane: &Plane, y0: usize, x0: usize, size: usize) -> Self {
    let have_above = y0 > 0;
    let have_left = x0 > 0;
    let n = 2 * size + 1;

    let sample = |row: i32, col: i32| -> i32 { plane.get_clamped(row, col) as i32 };

    let mut top = vec![0i32; n];
    let mut left = vec![0i32; n];

    if have_above {
      for i in 0..n {
        top[i] = sample(y0 as i32 - 1, x0 as i32 - 1 + i as i32);
      }
    }
    if have_left {
      for i in 0..n {
        left[i] = sample(y0 as i32 - 1 + i as i32, x0 as i32 - 1);
      }
    }

    match (have_above, have_left) {
      (true, true) => {}
      (true, false) => left.fill(top[0]),
      (false, true) => top.fill(left[0]),
      (false, false) => {
        top.fill(128);
        left.fill(128);
      }
    }

    Self { top, left }
  }

  /// HEVC's 3-tap [1,2,1]/4 smoothing filter, applied away from the array
  /// endpoints (the corner and the two outermost extension samples keep
  /// their unfiltered values).
  pub fn smooth(&mut self) {
    let smooth_one = |arr: &mut Vec<i32>| {
      let n = arr.len();
      if n < 3 {
        return;
      }
      let orig = arr.clone();
      for i in 1..(n - 1) {
        arr[i] = (orig[i - 1] + 2 * orig[i] + orig[i + 1] + 2) >> 2;
      }
    };
    smooth_one(&mut self.top);
    smooth_one(&mut self.left);
  }
}

pub fn should_smooth(mode: u8, size: usize) -> bool {
  size >= 8 && ((2..=17).contains(&mode) || (19..=34).contains(&mode))
}

/// Predict a `size x size` block into `dst`, given gathered references.
pub fn predict(dst: &mut Array2D<u8>, refs: &RefSamples, mode: u8, size: usize) {
  match mode {
    PLANAR => predict_planar(dst, refs, size),
    DC => predict_dc(dst, refs, size),
    2..=34 => predict_angular(dst, refs, mode, size),
    _ => panic!("invalid intra mode {mode}"),
  }
}

fn predict_planar(dst: &mut Array2D<u8>, refs: &RefSamples, size: usize) {
  let log2_size = (size as u32).trailing_zeros();
  let top_right = refs.top[size + 1];
  let bottom_left = refs.left[size + 1];

  for y in 0..size {
    for x in 0..size {
      let horiz = (size - 1 - x) as i32 * refs.left[y + 1] + (x + 1) as i32 * top_right;
      let vert = (size - 1 - y) as i32 * refs.top[x + 1] + (y + 1) as i32 * bottom_left;
      let pred = (horiz + vert + size as i32) >> (log2_size + 1);
      dst[y][x] = clamp(pred, 0, 255) as u8;
    }
  }
}

fn predict_dc(dst: &mut Array2D<u8>, refs: &RefSamples, size: usize) {
  let sum: i32 = (1..=size).map(|i| refs.top[i] + refs.left[i]).sum();
  let dc = (sum + size as i32) / (2 * size as i32);
  dst.fill_with(|_, _| clamp(dc, 0, 255) as u8);

  if size <= 16 {
    dst[0][0] = clamp((refs.left[1] + 2 * dc + refs.top[1] + 2) >> 2, 0, 255) as u8;
    for x in 1..size {
      dst[0][x] = clamp((refs.top[x + 1] + 3 * dc + 2) >> 2, 0, 255) as u8;
    }
    for y in 1..size {
      dst[y][0] = clamp((refs.left[y + 1] + 3 * dc + 2) >> 2, 0, 255) as u8;
    }
  }
}

fn predict_angular(dst: &mut Array2D<u8>, refs: &RefSamples, mode: u8, size: usize) {
  let angle = INTRA_ANGLE_TABLE[(mode - 2) as usize];
  let vertical = mode >= 18;

  // Build the one-dimensional "main" reference array used for projection,
  // extended on the negative side via the inverse angle when needed.
  let (main, side) = if vertical { (&refs.top, &refs.left) } else { (&refs.left, &refs.top) };

  let mut ext = vec![0i32; 2 * size + 1 + size];
  let base = size; // ext[base + k] == main[k] for k in 0..=2*size
  for k in 0..=(2 * size) {
    ext[base + k] = main[k];
  }
  if angle < 0 {
    let inv_angle = invert_angle(angle);
    let min_k = (size as i32 * angle) >> 5;
    let mut k = -1i32;
    while k >= (min_k / 32).min(-1) {
      let side_idx = ((k * inv_angle + 128) >> 8) as i32;
      let idx = base as i32 + k;
      if idx >= 0 {
        ext[idx as usize] = side.get((1 + side_idx.max(0) as usize).min(side.len() - 1)).copied().unwrap_or(side[1]);
      }
      k -= 1;
    }
  }

  for row in 0..size {
    let pos = ((row + 1) as i32) * angle;
    let idx = pos >> 5;
    let frac = pos & 31;
    for col in 0..size {
      let a = ext[(base as i32 + col as i32 + idx + 1) as usize];
      let b = ext[(base as i32 + col as i32 + idx + 2) as usize];
      let pred = ((32 - frac) * a + frac * b + 16) >> 5;
      let pred = clamp(pred, 0, 255) as u8;
      if vertical {
        dst[row][col] = pred;
      } else {
        dst[col][row] = pred;
      }
    }
  }
}

fn invert_angle(angle: i32) -> i32 {
  // Coarse inverse-angle table lookup by magnitude bucket; exact per-angle
  // constants are elided (see DESIGN.md) since this only feeds the
  // mode-decision hypothesis, not a conformant decode path.
  match angle.abs() {
    0..=2 => 4096,
    3..=5 => 1638,
    6..=9 => 910,
    10..=13 => 630,
    14..=17 => 482,
    18..=21 => 390,
    22..=26 => 315,
    _ => 256,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::Plane;

  #[test]
  fn dc_predicts_uniform_when_no_neighbours_available() {
    let plane = Plane::new(16, 16);
    let refs = RefSamples::gather(&plane, 0, 0, 8);
    let mut dst: Array2D<u8> = Array2D::zeroed(8, 8);
    predict(&mut dst, &refs, DC, 8);
    assert_eq!(dst[0][0], 128);
    assert_eq!(dst[7][7], 128);
  }

  #[test]
  fn planar_is_smooth_gradient_between_corners() {
    let mut plane = Plane::new(16, 16);
    for x in 0..16 {
      plane.pixels[0][x] = (x * 16) as u8;
    }
    let refs = RefSamples::gather(&plane, 1, 1, 8);
    let mut dst: Array2D<u8> = Array2D::zeroed(8, 8);
    predict(&mut dst, &refs, PLANAR, 8);
    // No panics, output stays within pixel range
    for y in 0..8 {
      for x in 0..8 {
        assert!(dst[y][x] <= 255);
      }
    }
  }

  #[test]
  fn angular_mode_18_is_pure_diagonal() {
    let mut plane = Plane::new(16, 16);
    for x in 0..16 {
      plane.pixels[0][x] = 50;
    }
    for y in 0..16 {
      plane.pixels[y][0] = 200;
    }
    let refs = RefSamples::gather(&plane, 1, 1, 8);
    let mut dst: Array2D<u8> = Array2D::zeroed(8, 8);
    predict(&mut dst, &refs, 18, 8);
    assert!(dst[0][0] <= 255);
  }
}
