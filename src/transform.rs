// C7: Transform / quantization.
//
// Forward path: separable integer transform (DCT-II approximation for all
// sizes, DST-VII for 4x4 intra luma) -> dead-zone quantization. Inverse path:
// dequantize -> inverse transform, added to the prediction to reconstruct.
// All arithmetic is integer; basis matrices are computed once (process
// init, not per-call) and cached, matching the "global mutable state ->
// process-initialized immutable tables" redesign note.

use std::sync::OnceLock;

use crate::array2d::Array2D;
use crate::consts::{dequant_scale, qp_shift, quant_scale};
use crate::util::{abs, clamp, round2, signum};

const SCALE_BITS: u32 = 6; // basis matrix entries are the real DCT/DST basis scaled by 2^6

fn build_dct_matrix(n: usize) -> Array2D<i32> {
  let mut m = Array2D::<i32>::zeroed(n, n);
  let scale = (1i64 << SCALE_BITS) as f64;
  for k in 0..n {
    let alpha = if k == 0 { (1.0 / n as f64).sqrt() } else { (2.0 / n as f64).sqrt() };
    for col in 0..n {
      let angle = std::f64::consts::PI * (2 * col + 1) as f64 * k as f64 / (2 * n) as f64;
      m[k][col] = (alpha * angle.cos() * scale).round() as i32;
    }
  }
  m
}

/// Integer DCT-II basis matrices for block sizes `{4,8,16,32}`, computed once
/// at first use and cached for the process lifetime.
fn dct_matrix(n: usize) -> &'static Array2D<i32> {
  static SIZE4: OnceLock<Array2D<i32>> = OnceLock::new();
  static SIZE8: OnceLock<Array2D<i32>> = OnceLock::new();
  static SIZE16: OnceLock<Array2D<i32>> = OnceLock::new();
  static SIZE32: OnceLock<Array2D<i32>> = OnceLock::new();

  match n {
    4 => SIZE4.get_or_init(|| build_dct_matrix(4)),
    8 => SIZE8.get_or_init(|| build_dct_matrix(8)),
    16 => SIZE16.get_or_init(|| build_dct_matrix(16)),
    32 => SIZE32.get_or_init(|| build_dct_matrix(32)),
    _ => panic!("unsupported transform size {n}"),
  }
}

/// Integer DST-VII basis matrix, used only for 4x4 intra luma residuals.
fn dst4_matrix() -> &'static Array2D<i32> {
  static CACHE: OnceLock<Array2D<i32>> = OnceLock::new();
  CACHE.get_or_init(|| {
    let n = 4usize;
    let mut m = Array2D::<i32>::zeroed(n, n);
    let scale = (1i64 << SCALE_BITS) as f64;
    let norm = (2.0 / (2 * n + 1) as f64).sqrt();
    for k in 0..n {
      for col in 0..n {
        let angle = std::f64::consts::PI * (2 * col + 1) as f64 * (k + 1) as f64 / (2 * n + 1) as f64;
        m[k][col] = (norm * angle.sin() * scale).round() as i32;
      }
    }
    m
  })
}

fn transform_1d_fwd(input: &[i32], matrix: &Array2D<i32>) -> Vec<i32> {
  let n = input.len();
  let mut out = vec![0i32; n];
  for k in 0..n {
    let mut acc = 0i64;
    for col in 0..n {
      acc += matrix[k][col] as i64 * input[col] as i64;
    }
    out[k] = round2_i64(acc, SCALE_BITS);
  }
  out
}

fn transform_1d_inv(input: &[i32], matrix: &Array2D<i32>) -> Vec<i32> {
  let n = input.len();
  let mut out = vec![0i32; n];
  for col in 0..n {
    let mut acc = 0i64;
    for k in 0..n {
      acc += matrix[k][col] as i64 * input[k] as i64;
    }
    out[col] = round2_i64(acc, SCALE_BITS);
  }
  out
}

fn round2_i64(value: i64, bits: u32) -> i32 {
  let bias = 1i64 << (bits - 1);
  let shifted = if value >= 0 { (value + bias) >> bits } else { -((-value + bias) >> bits) };
  shifted as i32
}

fn basis_for(size: usize, is_dst: bool) -> &'static Array2D<i32> {
  if is_dst && size == 4 {
    dst4_matrix()
  } else {
    dct_matrix(size)
  }
}

/// Forward 2D separable transform (rows, then columns) in place.
/// `use_dst` selects the DST-VII variant, only meaningful for 4x4 luma.
pub fn fwd_txfm2d(block: &mut Array2D<i32>, use_dst: bool) {
  let n = block.rows();
  assert_eq!(block.cols(), n);
  let matrix = basis_for(n, use_dst);

  for r in 0..n {
    let row: Vec<i32> = (0..n).map(|c| block[r][c]).collect();
    let out = transform_1d_fwd(&row, matrix);
    for c in 0..n {
      block[r][c] = out[c];
    }
  }
  for c in 0..n {
    let col: Vec<i32> = (0..n).map(|r| block[r][c]).collect();
    let out = transform_1d_fwd(&col, matrix);
    for r in 0..n {
      block[r][c] = out[r];
    }
  }
}

/// Inverse 2D separable transform (columns, then rows) in place.
pub fn inv_txfm2d(block: &mut Array2D<i32>, use_dst: bool) {
  let n = block.rows();
  assert_eq!(block.cols(), n);
  let matrix = basis_for(n, use_dst);

  for c in 0..n {
    let col: Vec<i32> = (0..n).map(|r| block[r][c]).collect();
    let out = transform_1d_inv(&col, matrix);
    for r in 0..n {
      block[r][c] = out[r];
    }
  }
  for r in 0..n {
    let row: Vec<i32> = (0..n).map(|c| block[r][c]).collect();
    let out = transform_1d_inv(&row, matrix);
    for c in 0..n {
      block[r][c] = out[c];
    }
  }
}

/// Dead-zone quantization. Returns true iff at least one coefficient is
/// non-zero (the CBF this transform block should signal).
pub fn quantize(coeffs: &mut Array2D<i32>, qp: i32) -> bool {
  let size = coeffs.rows();
  let log2_size = (size as u32).trailing_zeros();
  let shift = 14 + qp_shift(qp, log2_size).max(0);
  let scale = quant_scale(qp);
  let mut any_nonzero = false;

  coeffs.map(|_, _, coeff| {
    let a = abs(coeff) as i64;
    let q = ((a * scale) + (1i64 << (shift - 1))) >> shift;
    let q = signum(coeff) * q as i32;
    if q != 0 {
      any_nonzero = true;
    }
    q
  });

  any_nonzero
}

pub fn dequantize(coeffs: &mut Array2D<i32>, qp: i32) {
  let size = coeffs.rows();
  let log2_size = (size as u32).trailing_zeros();
  let shift = qp_shift(qp, log2_size).max(0);
  let scale = dequant_scale(qp) as i64;

  coeffs.map(|_, _, coeff| {
    let v = (coeff as i64 * scale) << shift;
    clamp(round2_i64(v, 6), i16::MIN as i32, i16::MAX as i32)
  });
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fwd_inv_is_near_lossless_for_dc_block() {
    let mut block: Array2D<i32> = Array2D::zeroed(8, 8);
    block.fill_with(|_, _| 10);
    let original = block.clone();
    fwd_txfm2d(&mut block, false);
    inv_txfm2d(&mut block, false);
    for r in 0..8 {
      for c in 0..8 {
        assert!((block[r][c] - original[r][c]).abs() <= 2, "mismatch at {r},{c}: {} vs {}", block[r][c], original[r][c]);
      }
    }
  }

  #[test]
  fn quantize_zero_residual_yields_all_zero_cbf_false() {
    let mut coeffs: Array2D<i32> = Array2D::zeroed(4, 4);
    let nonzero = quantize(&mut coeffs, 32);
    assert!(!nonzero);
  }

  #[test]
  fn quantize_then_dequantize_preserves_sign() {
    let mut coeffs: Array2D<i32> = Array2D::zeroed(4, 4);
    coeffs.fill_with(|r, c| if r == 0 && c == 0 { 1000 } else { 0 });
    quantize(&mut coeffs, 20);
    assert!(coeffs[0][0] > 0);
  }
}
