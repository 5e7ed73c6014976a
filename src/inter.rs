// C6: Inter predictor. Hexagon-pattern motion search, MV candidate
// (AMVP) and merge lists, fractional-pixel interpolation, and the
// boundary-clamped reference fetch used by both search and reconstruction.

use crate::cu::{CuArray, CuType, MotionVector};
use crate::frame::Plane;
use crate::util::{abs, clamp};

/// HEVC's 8-tap luma interpolation filter, one row per quarter-pel phase
/// (index 0 is the integer position and is never actually applied).
#[rustfmt::skip]
const LUMA_FILTER: [[i32; 8]; 4] = [
  [0, 0, 0, 64, 0, 0, 0, 0],
  [-1, 4, -10, 58, 17, -5, 1, 0],
  [-1, 4, -11, 40, 40, -11, 4, -1],
  [0, 1, -5, 17, 58, -10, 4, -1],
];

/// 4-tap chroma interpolation filter, one row per eighth-pel phase.
#[rustfmt::skip]
const CHROMA_FILTER: [[i32; 4]; 8] = [
  [0, 64, 0, 0],
  [-2, 58, 10, -2],
  [-4, 54, 16, -2],
  [-6, 46, 28, -4],
  [-4, 36, 36, -4],
  [-4, 28, 46, -6],
  [-2, 16, 54, -4],
  [-2, 10, 58, -2],
];

/// Fetch a motion-compensated luma sample at quarter-pel position
/// `(y + dy/4, x + dx/4)`, separable 8-tap filtering horizontally then
/// vertically, with boundary-clamped reads beyond the plane edge.
pub fn interpolate_luma(plane: &Plane, y: i32, x: i32, frac_y: i32, frac_x: i32) -> i32 {
  if frac_x == 0 && frac_y == 0 {
    return plane.get_clamped(y, x) as i32;
  }

  let h_filter = &LUMA_FILTER[frac_x as usize];
  let mut intermediate = [0i32; 8];
  for (row_offset, slot) in intermediate.iter_mut().enumerate() {
    let row = y - 3 + row_offset as i32;
    let mut acc = 0i32;
    for tap in 0..8 {
      acc += h_filter[tap] * plane.get_clamped(row, x - 3 + tap as i32) as i32;
    }
    *slot = acc;
  }

  if frac_y == 0 {
    return (intermediate[3] + 32) >> 6;
  }

  let v_filter = &LUMA_FILTER[frac_y as usize];
  let mut acc = 0i64;
  for tap in 0..8 {
    acc += v_filter[tap] as i64 * intermediate[tap] as i64;
  }
  ((acc + (1 << 11)) >> 12) as i32
}

pub fn interpolate_chroma(plane: &Plane, y: i32, x: i32, frac_y: i32, frac_x: i32) -> i32 {
  if frac_x == 0 && frac_y == 0 {
    return plane.get_clamped(y, x) as i32;
  }

  let h_filter = &CHROMA_FILTER[frac_x as usize];
  let mut intermediate = [0i32; 4];
  for (row_offset, slot) in intermediate.iter_mut().enumerate() {
    let row = y - 1 + row_offset as i32;
    let mut acc = 0i32;
    for tap in 0..4 {
      acc += h_filter[tap] * plane.get_clamped(row, x - 1 + tap as i32) as i32;
    }
    *slot = acc;
  }

  if frac_y == 0 {
    return (intermediate[1] + 32) >> 6;
  }

  let v_filter = &CHROMA_FILTER[frac_y as usize];
  let mut acc = 0i64;
  for tap in 0..4 {
    acc += v_filter[tap] as i64 * intermediate[tap] as i64;
  }
  ((acc + (1 << 11)) >> 12) as i32
}

/// Sum of absolute differences between a predicted block (motion-compensated
/// from `refer` at `mv`) and the source block at `(y0, x0)`.
pub fn mv_sad(source: &Plane, refer: &Plane, y0: usize, x0: usize, size: usize, mv: MotionVector) -> i64 {
  let mut sad = 0i64;
  let base_y = y0 as i32 + (mv.y as i32 >> 2);
  let base_x = x0 as i32 + (mv.x as i32 >> 2);
  let frac_y = mv.y as i32 & 3;
  let frac_x = mv.x as i32 & 3;

  for dy in 0..size {
    for dx in 0..size {
      let src = source.get_clamped(y0 as i32 + dy as i32, x0 as i32 + dx as i32) as i32;
      let pred = interpolate_luma(refer, base_y + dy as i32, base_x + dx as i32, frac_y, frac_x);
      sad += abs(src - clamp(pred, 0, 255)) as i64;
    }
  }
  sad
}

/// Estimated coding cost (in 1/4-bit units, matching the rate-control lambda
/// scale) of a motion vector difference, via a coarse Exp-Golomb bit count.
pub fn mvd_bit_cost(mvd: MotionVector) -> i64 {
  fn eg_bits(v: i16) -> i64 {
    let u = if v <= 0 { (-v as i64) * 2 } else { (v as i64) * 2 - 1 };
    2 * crate::util::ceil_log2((u + 1) as usize) as i64 + 1
  }
  eg_bits(mvd.x) + eg_bits(mvd.y)
}

/// Hexagon search pattern offsets, in quarter-pel units (one full pel step).
const HEXAGON: [(i16, i16); 6] = [(4, 0), (2, -4), (-2, -4), (-4, 0), (-2, 4), (2, 4)];
const SMALL_DIAMOND: [(i16, i16); 4] = [(4, 0), (0, -4), (-4, 0), (0, 4)];

pub struct MotionSearchResult {
  pub mv: MotionVector,
  pub cost: i64,
}

/// Hexagon-pattern motion search starting from `predictor`, minimizing
/// `sad + lambda * mvd_bits` until no hexagon step improves the cost, then
/// refining with a small-diamond pattern.
pub fn hexagon_search(
  source: &Plane,
  refer: &Plane,
  y0: usize,
  x0: usize,
  size: usize,
  predictor: MotionVector,
  lambda: i64,
  search_range: i16,
) -> MotionSearchResult {
  let cost_at = |mv: MotionVector| -> i64 {
    let sad = mv_sad(source, refer, y0, x0, size, mv);
    let mvd = MotionVector::new(mv.x - predictor.x, mv.y - predictor.y);
    sad + ((lambda * mvd_bit_cost(mvd)) >> 2)
  };

  let mut best = predictor;
  let mut best_cost = cost_at(best);

  loop {
    let mut improved = false;
    for &(dx, dy) in &HEXAGON {
      let cand = MotionVector::new(
        clamp(best.x as i32 + dx as i32, -search_range as i32 * 4, search_range as i32 * 4) as i16,
        clamp(best.y as i32 + dy as i32, -search_range as i32 * 4, search_range as i32 * 4) as i16,
      );
      let cost = cost_at(cand);
      if cost < best_cost {
        best = cand;
        best_cost = cost;
        improved = true;
      }
    }
    if !improved {
      break;
    }
  }

  for &(dx, dy) in &SMALL_DIAMOND {
    let cand = MotionVector::new(best.x + dx, best.y + dy);
    let cost = cost_at(cand);
    if cost < best_cost {
      best = cand;
      best_cost = cost;
    }
  }

  MotionSearchResult { mv: best, cost: best_cost }
}

/// Spatial AMVP candidate derivation: left (A0/A1), above (B0/B1/B2), in
/// that priority order, deduplicated, padded with zero motion vectors.
pub fn amvp_candidates(cu_array: &CuArray, mi_row: usize, mi_col: usize, ref_list: usize) -> [MotionVector; 2] {
  let mut candidates = Vec::with_capacity(2);
  let mut push_from = |row: i32, col: i32| {
    if row < 0 || col < 0 {
      return;
    }
    let (row, col) = (row as usize, col as usize);
    if row >= cu_array.mi_rows() || col >= cu_array.mi_cols() {
      return;
    }
    let rec = cu_array.get(row, col);
    if rec.cu_type != CuType::Inter && rec.cu_type != CuType::Skip {
      return;
    }
    if candidates.len() < 2 {
      if let Some(_idx) = rec.inter.ref_idx[ref_list] {
        let mv = rec.inter.mv[ref_list];
        if !candidates.contains(&mv) {
          candidates.push(mv);
        }
      }
    }
  };

  // Left neighbours (A1 then A0), then above (B1, B0, B2).
  push_from(mi_row as i32, mi_col as i32 - 1);
  push_from(mi_row as i32 + 1, mi_col as i32 - 1);
  push_from(mi_row as i32 - 1, mi_col as i32);
  push_from(mi_row as i32 - 1, mi_col as i32 + 1);
  push_from(mi_row as i32 - 1, mi_col as i32 - 1);

  while candidates.len() < 2 {
    candidates.push(MotionVector::ZERO);
  }
  [candidates[0], candidates[1]]
}

/// Merge candidate list: up to 5 spatial candidates (A1, B1, B0, A0, B2)
/// followed by zero-motion padding, per spec §4.5's simplified merge model
/// (no combined bi-predictive or temporal candidates).
pub fn merge_candidates(cu_array: &CuArray, mi_row: usize, mi_col: usize, max_candidates: usize) -> Vec<MotionVector> {
  let mut list = Vec::with_capacity(max_candidates);
  let mut push_from = |row: i32, col: i32, list: &mut Vec<MotionVector>| {
    if list.len() >= max_candidates || row < 0 || col < 0 {
      return;
    }
    let (row, col) = (row as usize, col as usize);
    if row >= cu_array.mi_rows() || col >= cu_array.mi_cols() {
      return;
    }
    let rec = cu_array.get(row, col);
    if rec.cu_type != CuType::Inter && rec.cu_type != CuType::Skip {
      return;
    }
    let mv = rec.inter.mv[0];
    if !list.contains(&mv) {
      list.push(mv);
    }
  };

  push_from(mi_row as i32 + 1, mi_col as i32 - 1, &mut list);
  push_from(mi_row as i32 - 1, mi_col as i32, &mut list);
  push_from(mi_row as i32 - 1, mi_col as i32 + 1, &mut list);
  push_from(mi_row as i32, mi_col as i32 - 1, &mut list);
  push_from(mi_row as i32 - 1, mi_col as i32 - 1, &mut list);

  while list.len() < max_candidates {
    list.push(MotionVector::ZERO);
  }
  list
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cu::{CuRecord, InterRecord};

  #[test]
  fn integer_interpolation_matches_raw_sample() {
    let plane = Plane::new(16, 16);
    assert_eq!(interpolate_luma(&plane, 4, 4, 0, 0), 128);
  }

  #[test]
  fn hexagon_search_finds_zero_mv_for_identical_frames() {
    let source = Plane::new(32, 32);
    let refer = Plane::new(32, 32);
    let result = hexagon_search(&source, &refer, 8, 8, 8, MotionVector::ZERO, 10, 16);
    assert_eq!(result.mv, MotionVector::ZERO);
  }

  #[test]
  fn amvp_pads_with_zero_when_no_neighbours() {
    let cu_array = CuArray::new(16, 16);
    let cand = amvp_candidates(&cu_array, 0, 0, 0);
    assert_eq!(cand, [MotionVector::ZERO, MotionVector::ZERO]);
  }

  #[test]
  fn merge_list_picks_up_left_neighbour_mv() {
    let mut cu_array = CuArray::new(16, 16);
    let mut rec = CuRecord::default();
    rec.cu_type = CuType::Inter;
    rec.inter = InterRecord { ref_idx: [Some(0), None], mv: [MotionVector::new(8, 0), MotionVector::ZERO], ..InterRecord::default() };
    cu_array.set_region(4, 3, 1, 1, &rec);

    let list = merge_candidates(&cu_array, 4, 4, 5);
    assert!(list.contains(&MotionVector::new(8, 0)));
  }
}
