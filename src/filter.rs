// C11: In-loop filters. Deblocking (boundary-strength derivation + edge
// filter) runs first; SAO (band or edge offset search, with merge-left/
// merge-up) runs on the deblocked picture.

use crate::cu::{CuArray, CuType};
use crate::frame::Plane;
use crate::util::{abs, clamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BoundaryStrength {
  None = 0,
  Weak = 1,
  Strong = 2,
}

/// Boundary strength at a 4-sample-aligned vertical or horizontal edge
/// between two neighbouring CUs, per the standard bS derivation: 2 if
/// either side is intra, 1 if either side has a non-zero transform
/// coefficient or the motion differs enough, 0 otherwise.
pub fn boundary_strength(cu_array: &CuArray, a_row: usize, a_col: usize, b_row: usize, b_col: usize) -> BoundaryStrength {
  let a = cu_array.get(a_row, a_col);
  let b = cu_array.get(b_row, b_col);

  if a.cu_type == CuType::Intra || b.cu_type == CuType::Intra {
    return BoundaryStrength::Strong;
  }
  if a.cbf[0] || b.cbf[0] {
    return BoundaryStrength::Weak;
  }

  let mv_a = a.inter.mv[0];
  let mv_b = b.inter.mv[0];
  let mv_diff = abs(mv_a.x as i32 - mv_b.x as i32) >= 4 || abs(mv_a.y as i32 - mv_b.y as i32) >= 4;
  if a.inter.ref_idx[0] != b.inter.ref_idx[0] || mv_diff {
    return BoundaryStrength::Weak;
  }

  BoundaryStrength::None
}

/// Strong/weak luma deblocking filter applied across one vertical 4-sample
/// edge at column `x`, for the 4 rows starting at `y0` (one "line" of the
/// 8x8 deblocking grid). `beta`/`tc` are derived from QP per the standard
/// beta/tc lookup tables, simplified here to a direct QP-linear formula.
pub fn filter_vertical_edge(plane: &mut Plane, y0: usize, x: usize, strength: BoundaryStrength, qp: i32) {
  if strength == BoundaryStrength::None {
    return;
  }
  let (beta, tc) = beta_tc_from_qp(qp, strength);

  for row in y0..(y0 + 4).min(plane.height()) {
    let p = [3, 2, 1, 0].map(|i| plane.pixels[row][x - 1 - i] as i32);
    let q = [0, 1, 2, 3].map(|i| plane.pixels[row][x + i] as i32);

    let dp = abs(p[1] - 2 * p[2] + p[3]);
    let dq = abs(q[2] - 2 * q[1] + q[0]);
    let d = dp + dq;
    if d >= beta {
      continue;
    }

    let delta = clamp((9 * (q[0] - p[0]) - 3 * (q[1] - p[1]) + 8) >> 4, -tc, tc);
    plane.pixels[row][x - 1] = clamp(p[0] + delta, 0, 255) as u8;
    plane.pixels[row][x] = clamp(q[0] - delta, 0, 255) as u8;

    if strength == BoundaryStrength::Strong {
      let delta_p1 = clamp((p[2] + p[0] - 2 * p[1] + 2 * delta) >> 1, -tc / 2, tc / 2);
      let delta_q1 = clamp((q[2] + q[0] - 2 * q[1] - 2 * delta) >> 1, -tc / 2, tc / 2);
      plane.pixels[row][x - 2] = clamp(p[1] + delta_p1, 0, 255) as u8;
      plane.pixels[row][x + 1] = clamp(q[1] + delta_q1, 0, 255) as u8;
    }
  }
}

pub fn filter_horizontal_edge(plane: &mut Plane, y: usize, x0: usize, strength: BoundaryStrength, qp: i32) {
  if strength == BoundaryStrength::None {
    return;
  }
  let (beta, tc) = beta_tc_from_qp(qp, strength);

  for col in x0..(x0 + 4).min(plane.width()) {
    let p = [3, 2, 1, 0].map(|i| plane.pixels[y - 1 - i][col] as i32);
    let q = [0, 1, 2, 3].map(|i| plane.pixels[y + i][col] as i32);

    let dp = abs(p[1] - 2 * p[2] + p[3]);
    let dq = abs(q[2] - 2 * q[1] + q[0]);
    if dp + dq >= beta {
      continue;
    }

    let delta = clamp((9 * (q[0] - p[0]) - 3 * (q[1] - p[1]) + 8) >> 4, -tc, tc);
    plane.pixels[y - 1][col] = clamp(p[0] + delta, 0, 255) as u8;
    plane.pixels[y][col] = clamp(q[0] - delta, 0, 255) as u8;

    if strength == BoundaryStrength::Strong {
      let delta_p1 = clamp((p[2] + p[0] - 2 * p[1] + 2 * delta) >> 1, -tc / 2, tc / 2);
      let delta_q1 = clamp((q[2] + q[0] - 2 * q[1] - 2 * delta) >> 1, -tc / 2, tc / 2);
      plane.pixels[y - 2][col] = clamp(p[1] + delta_p1, 0, 255) as u8;
      plane.pixels[y + 1][col] = clamp(q[1] + delta_q1, 0, 255) as u8;
    }
  }
}

fn beta_tc_from_qp(qp: i32, strength: BoundaryStrength) -> (i32, i32) {
  let q = clamp(qp, 0, 51);
  let beta = clamp((q - 8) * 2, 0, 64);
  let tc_base = clamp((q - 18) / 2 + if strength == BoundaryStrength::Strong { 2 } else { 0 }, 0, 24);
  (beta, tc_base)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaoType {
  None,
  Band,
  Edge { eo_class: u8 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SaoParams {
  pub sao_type: SaoType,
  pub offsets: [i32; 4],
  pub band_position: u8,
}

/// A CTU's final SAO decision: either the merged reuse of a neighbour's
/// parameters (cheap — just the merge flag) or an independent search result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SaoDecision {
  pub params: SaoParams,
  pub merge_left: bool,
  pub merge_up: bool,
}

/// Searches the SAO parameters minimizing SSD for one CTU's luma samples
/// against its source, trying NONE, BAND and all 4 EDGE classes and picking
/// the best; merge-left/merge-up reuse is left to the caller (pipeline/
/// search driver), which compares this result's cost against a neighbour's.
pub fn search_sao(source: &Plane, recon: &Plane, y0: usize, x0: usize, size: usize) -> SaoParams {
  let mut best = SaoParams { sao_type: SaoType::None, offsets: [0; 4], band_position: 0 };
  let mut best_cost = ssd_region(source, recon, y0, x0, size, &best);

  let band = search_band_offset(source, recon, y0, x0, size);
  let band_cost = ssd_region(source, recon, y0, x0, size, &band);
  if band_cost < best_cost {
    best = band;
    best_cost = band_cost;
  }

  for eo_class in 0..4 {
    let edge = search_edge_offset(source, recon, y0, x0, size, eo_class);
    let cost = ssd_region(source, recon, y0, x0, size, &edge);
    if cost < best_cost {
      best = edge;
      best_cost = cost;
    }
  }

  best
}

/// Chooses between an independent SAO search for this CTU and merging the
/// left or above neighbour's already-chosen parameters. Merging only costs a
/// flag bit instead of a full parameter set, so it wins on any tie; the
/// winning parameters are applied to `recon` before returning.
#[allow(clippy::too_many_arguments)]
pub fn decide_and_apply_sao(
  recon: &mut Plane,
  snapshot: &Plane,
  source: &Plane,
  y0: usize,
  x0: usize,
  size: usize,
  left: Option<SaoParams>,
  above: Option<SaoParams>,
  lambda: i64,
) -> SaoDecision {
  let own = search_sao(source, snapshot, y0, x0, size);
  // A full parameter set costs a type index plus up to 4 offsets (and a
  // class/position field); approximate at 8 bypass bits for this RD compare.
  let mut best = SaoDecision { params: own, merge_left: false, merge_up: false };
  let mut best_cost = ssd_region(source, snapshot, y0, x0, size, &own) + lambda * 8;

  if let Some(l) = left {
    let cost = ssd_region(source, snapshot, y0, x0, size, &l) + lambda;
    if cost < best_cost {
      best = SaoDecision { params: l, merge_left: true, merge_up: false };
      best_cost = cost;
    }
  }
  if let Some(a) = above {
    let cost = ssd_region(source, snapshot, y0, x0, size, &a) + lambda;
    if cost < best_cost {
      best = SaoDecision { params: a, merge_left: false, merge_up: true };
      best_cost = cost;
    }
  }

  apply_sao(recon, snapshot, y0, x0, size, &best.params);
  best
}

/// Applies already-decided SAO parameters to one CTU's luma samples. Edge
/// and band categorization is read from `snapshot` (the pre-SAO, post-
/// deblock reconstruction) so that filtering one sample never changes the
/// categorization used for its neighbours.
pub fn apply_sao(recon: &mut Plane, snapshot: &Plane, y0: usize, x0: usize, size: usize, params: &SaoParams) {
  if params.sao_type == SaoType::None {
    return;
  }
  let (dy1, dx1, dy2, dx2) = edge_neighbor_offsets(params.sao_type);
  for dy in 0..size {
    for dx in 0..size {
      let y = (y0 + dy) as i32;
      let x = (x0 + dx) as i32;
      let c = snapshot.get_clamped(y, x) as i32;
      let n1 = snapshot.get_clamped(y + dy1, x + dx1) as i32;
      let n2 = snapshot.get_clamped(y + dy2, x + dx2) as i32;
      let filtered = apply_sao_sample(c, 0, n1, n2, params);
      recon.pixels[(y0 + dy).min(recon.height() - 1)][(x0 + dx).min(recon.width() - 1)] = filtered as u8;
    }
  }
}

fn edge_neighbor_offsets(sao_type: SaoType) -> (i32, i32, i32, i32) {
  match sao_type {
    SaoType::Edge { eo_class: 0 } => (0, -1, 0, 1),
    SaoType::Edge { eo_class: 1 } => (-1, 0, 1, 0),
    SaoType::Edge { eo_class: 2 } => (-1, -1, 1, 1),
    SaoType::Edge { .. } => (-1, 1, 1, -1),
    _ => (0, 0, 0, 0),
  }
}

fn search_band_offset(source: &Plane, recon: &Plane, y0: usize, x0: usize, size: usize) -> SaoParams {
  let mut band_sum = [0i64; 32];
  let mut band_count = [0i64; 32];
  for dy in 0..size {
    for dx in 0..size {
      let r = recon.get_clamped((y0 + dy) as i32, (x0 + dx) as i32) as usize;
      let s = source.get_clamped((y0 + dy) as i32, (x0 + dx) as i32) as i32;
      let band = r >> 3;
      band_sum[band] += (s - r as i32) as i64;
      band_count[band] += 1;
    }
  }

  let mut best_start = 0usize;
  let mut best_gain = i64::MIN;
  for start in 0..=(32 - 4) {
    let gain: i64 = (start..start + 4).map(|b| if band_count[b] > 0 { band_sum[b].abs() } else { 0 }).sum();
    if gain > best_gain {
      best_gain = gain;
      best_start = start;
    }
  }

  let mut offsets = [0i32; 4];
  for (i, slot) in offsets.iter_mut().enumerate() {
    let band = best_start + i;
    *slot = if band_count[band] > 0 { clamp((band_sum[band] / band_count[band]) as i32, -7, 7) } else { 0 };
  }

  SaoParams { sao_type: SaoType::Band, offsets, band_position: best_start as u8 }
}

fn search_edge_offset(source: &Plane, recon: &Plane, y0: usize, x0: usize, size: usize, eo_class: u8) -> SaoParams {
  let (dy1, dx1, dy2, dx2) = edge_neighbor_offsets(SaoType::Edge { eo_class });

  let mut sum = [0i64; 5];
  let mut count = [0i64; 5];
  for dy in 0..size {
    for dx in 0..size {
      let y = (y0 + dy) as i32;
      let x = (x0 + dx) as i32;
      let c = recon.get_clamped(y, x) as i32;
      let n1 = recon.get_clamped(y + dy1, x + dx1) as i32;
      let n2 = recon.get_clamped(y + dy2, x + dx2) as i32;
      let category = edge_category(c, n1, n2);
      let s = source.get_clamped(y, x) as i32;
      sum[category] += (s - c) as i64;
      count[category] += 1;
    }
  }

  let mut offsets = [0i32; 4];
  for (cat, slot) in offsets.iter_mut().enumerate() {
    // Categories 1,2 use positive offsets; 3,4 negative, per the standard's
    // monotonicity constraint on edge offsets.
    let raw = if count[cat + 1] > 0 { sum[cat + 1] / count[cat + 1] } else { 0 };
    *slot = if cat < 2 { clamp(raw.max(0) as i32, 0, 7) } else { clamp(raw.min(0) as i32, -7, 0) };
  }

  SaoParams { sao_type: SaoType::Edge { eo_class }, offsets, band_position: 0 }
}

fn edge_category(c: i32, n1: i32, n2: i32) -> usize {
  if c < n1 && c < n2 {
    1
  } else if c > n1 && c > n2 {
    2
  } else if (c < n1 && c == n2) || (c < n2 && c == n1) {
    3
  } else if (c > n1 && c == n2) || (c > n2 && c == n1) {
    4
  } else {
    0
  }
}

fn apply_sao_sample(recon_sample: i32, source_c: i32, n1: i32, n2: i32, params: &SaoParams) -> i32 {
  match params.sao_type {
    SaoType::None => recon_sample,
    SaoType::Band => {
      let band = (recon_sample >> 3) as u8;
      let offset_idx = band.wrapping_sub(params.band_position);
      if offset_idx < 4 {
        clamp(recon_sample + params.offsets[offset_idx as usize], 0, 255)
      } else {
        recon_sample
      }
    }
    SaoType::Edge { .. } => {
      let category = edge_category(recon_sample, n1, n2);
      let _ = source_c;
      if category == 0 {
        recon_sample
      } else {
        clamp(recon_sample + params.offsets[category - 1], 0, 255)
      }
    }
  }
}

fn ssd_region(source: &Plane, recon: &Plane, y0: usize, x0: usize, size: usize, params: &SaoParams) -> i64 {
  let (dy1, dx1, dy2, dx2) = edge_neighbor_offsets(params.sao_type);

  let mut acc = 0i64;
  for dy in 0..size {
    for dx in 0..size {
      let y = (y0 + dy) as i32;
      let x = (x0 + dx) as i32;
      let c = recon.get_clamped(y, x) as i32;
      let n1 = recon.get_clamped(y + dy1, x + dx1) as i32;
      let n2 = recon.get_clamped(y + dy2, x + dx2) as i32;
      let s = source.get_clamped(y, x) as i32;
      let filtered = apply_sao_sample(c, s, n1, n2, params);
      let d = s - filtered;
      acc += (d * d) as i64;
    }
  }
  acc
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cu::{CuRecord, CuType};

  #[test]
  fn intra_neighbour_forces_strong_boundary() {
    let mut cu_array = CuArray::new(16, 16);
    let mut rec = CuRecord::default();
    rec.cu_type = CuType::Intra;
    cu_array.set_region(0, 0, 2, 2, &rec);
    cu_array.set_region(0, 2, 2, 2, &rec);
    assert_eq!(boundary_strength(&cu_array, 0, 1, 0, 2), BoundaryStrength::Strong);
  }

  #[test]
  fn flat_region_has_no_boundary_strength_effect() {
    let mut plane = Plane::new(16, 16);
    let before = plane.pixels.clone();
    filter_vertical_edge(&mut plane, 4, 8, BoundaryStrength::Strong, 32);
    for r in 4..8 {
      assert_eq!(plane.pixels[r][7], before[r][7]);
    }
  }

  #[test]
  fn sao_search_prefers_none_on_perfectly_matched_planes() {
    let plane = Plane::new(16, 16);
    let result = search_sao(&plane, &plane, 0, 0, 8);
    assert_eq!(result.sao_type, SaoType::None);
  }

  #[test]
  fn merge_left_wins_over_an_equally_good_independent_search() {
    let plane = Plane::new(16, 16);
    let mut recon = Plane::new(16, 16);
    let none_params = SaoParams { sao_type: SaoType::None, offsets: [0; 4], band_position: 0 };
    let decision = decide_and_apply_sao(&mut recon, &plane, &plane, 0, 0, 8, Some(none_params), None, 10);
    // Both the independent search and the merge-left candidate cost zero SSD
    // here, but merging only signals a flag bit, so it must win the tie.
    assert!(decision.merge_left);
    assert_eq!(decision.params, none_params);
  }

  #[test]
  fn apply_sao_band_offset_shifts_samples_in_the_selected_band() {
    let mut recon = Plane::new(16, 16);
    recon.pixels.fill_with(|_, _| 64u8);
    let snapshot = Plane { pixels: recon.pixels.clone() };
    let params = SaoParams { sao_type: SaoType::Band, offsets: [3, 3, 3, 3], band_position: (64u8 >> 3) };
    apply_sao(&mut recon, &snapshot, 0, 0, 8, &params);
    assert_eq!(recon.pixels[0][0], 67);
  }
}
