// C8: RD cost evaluator. Three precision tiers, from cheapest to most
// exact, used by the search driver (C9) to prune the quad-tree before
// spending cycles on the expensive tiers.

use crate::array2d::Array2D;
use crate::util::abs;

/// Tier 1: sum of squared differences only, no rate term. Used for the
/// rough intra mode short-list and early split/no-split pruning.
pub fn ssd(source: &Array2D<u8>, pred: &Array2D<u8>) -> i64 {
  let mut acc = 0i64;
  for r in 0..source.rows() {
    for c in 0..source.cols() {
      let d = source[r][c] as i64 - pred[r][c] as i64;
      acc += d * d;
    }
  }
  acc
}

pub fn sad(source: &Array2D<u8>, pred: &Array2D<u8>) -> i64 {
  let mut acc = 0i64;
  for r in 0..source.rows() {
    for c in 0..source.cols() {
      acc += abs(source[r][c] as i32 - pred[r][c] as i32) as i64;
    }
  }
  acc
}

/// Tier 2: SSD plus a cheap rate estimate from the quantized coefficient
/// magnitudes (sum of `ceil(log2(|coeff|+1))`), avoiding a full CABAC dry
/// run. Used for the RDO mode search among the rough short-list survivors.
pub fn ssd_plus_coeff_estimate(source: &Array2D<u8>, pred: &Array2D<u8>, coeffs: &Array2D<i32>, lambda: i64) -> i64 {
  let distortion = ssd(source, pred);
  let mut coeff_bits = 0i64;
  for r in 0..coeffs.rows() {
    for c in 0..coeffs.cols() {
      let mag = abs(coeffs[r][c]) as usize;
      if mag > 0 {
        coeff_bits += 2 * crate::util::ceil_log2(mag + 1) as i64 + 1;
      }
    }
  }
  distortion + ((lambda * coeff_bits) >> 8)
}

/// Tier 3: SSD plus the true coefficient-coding bit count as CABAC's
/// context-adaptive cost model would estimate it (last-significant-position
/// plus per-coefficient significance/greater1/greater2/remaining costs,
/// approximated without a live CABAC instance so the search driver can run
/// this tier thousands of times per frame).
pub fn ssd_plus_true_bit_estimate(source: &Array2D<u8>, pred: &Array2D<u8>, coeffs: &Array2D<i32>, lambda: i64) -> i64 {
  let distortion = ssd(source, pred);
  let size = coeffs.rows();
  let scan = crate::consts::diagonal_scan(size);

  let mut last_significant = None;
  for (idx, (r, c)) in scan.iter().enumerate() {
    if coeffs[*r as usize][*c as usize] != 0 {
      last_significant = Some(idx);
    }
  }
  let Some(last_significant) = last_significant else {
    return distortion; // cbf is false: no coefficient bits to estimate
  };

  let mut bits = 2 * crate::util::ceil_log2(last_significant + 2) as i64; // last-sig-coeff prefix/suffix estimate
  for (r, c) in scan.iter().take(last_significant + 1) {
    let mag = abs(coeffs[*r as usize][*c as usize]) as i64;
    if mag == 0 {
      bits += 1; // significance flag, coded as zero
      continue;
    }
    bits += 1; // significance flag
    bits += 1; // sign
    bits += match mag {
      1 => 1,
      2 => 2,
      _ => 3 + 2 * crate::util::ceil_log2((mag - 2) as usize + 1) as i64,
    };
  }

  distortion + ((lambda * bits) >> 8)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ssd_is_zero_for_identical_blocks() {
    let a: Array2D<u8> = Array2D::zeroed(8, 8);
    let b = a.clone();
    assert_eq!(ssd(&a, &b), 0);
  }

  #[test]
  fn ssd_plus_coeff_estimate_grows_with_more_nonzero_coeffs() {
    let source: Array2D<u8> = Array2D::zeroed(4, 4);
    let pred: Array2D<u8> = Array2D::zeroed(4, 4);
    let mut sparse: Array2D<i32> = Array2D::zeroed(4, 4);
    sparse[0][0] = 4;
    let mut dense: Array2D<i32> = Array2D::zeroed(4, 4);
    dense.fill_with(|_, _| 4);

    let sparse_cost = ssd_plus_coeff_estimate(&source, &pred, &sparse, 100);
    let dense_cost = ssd_plus_coeff_estimate(&source, &pred, &dense, 100);
    assert!(dense_cost > sparse_cost);
  }

  #[test]
  fn true_bit_estimate_is_zero_bits_for_all_zero_block() {
    let source: Array2D<u8> = Array2D::zeroed(4, 4);
    let pred: Array2D<u8> = Array2D::zeroed(4, 4);
    let coeffs: Array2D<i32> = Array2D::zeroed(4, 4);
    let cost = ssd_plus_true_bit_estimate(&source, &pred, &coeffs, 100);
    assert_eq!(cost, 0);
  }
}
