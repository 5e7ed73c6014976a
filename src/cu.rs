// C4 (data model half): Coding Unit record and the 4x4-granularity CU array.

use crate::array2d::Array2D;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CuType {
  NotSet,
  Intra,
  Inter,
  Skip,
  Pcm,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartMode {
  Part2Nx2N,
  Part2NxN,
  PartNx2N,
  PartNxN,
  Part2NxnU,
  Part2NxnD,
  PartnLx2N,
  PartnRx2N,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MotionVector {
  pub x: i16,
  pub y: i16,
}

impl MotionVector {
  pub const ZERO: MotionVector = MotionVector { x: 0, y: 0 };

  pub fn new(x: i16, y: i16) -> Self {
    Self { x, y }
  }
}

#[derive(Clone, Copy, Debug)]
pub struct InterRecord {
  pub ref_idx: [Option<u8>; 2],
  pub mv: [MotionVector; 2],
  pub mvp_idx: [u8; 2],
  pub mvd: [MotionVector; 2],
  pub merge_idx: Option<u8>,
}

impl Default for InterRecord {
  fn default() -> Self {
    Self {
      ref_idx: [None, None],
      mv: [MotionVector::ZERO; 2],
      mvp_idx: [0, 0],
      mvd: [MotionVector::ZERO; 2],
      merge_idx: None,
    }
  }
}

#[derive(Clone, Debug)]
pub struct CuRecord {
  pub depth: u8,
  pub tr_depth: u8,
  pub cu_type: CuType,
  pub part_mode: PartMode,
  pub cbf: [bool; 3],
  pub merged: bool,
  pub skip: bool,
  /// Four sub-PU intra luma modes; for anything other than intra NxN all four
  /// entries hold the same value.
  pub intra_modes: [u8; 4],
  pub chroma_mode: u8,
  pub inter: InterRecord,
}

impl Default for CuRecord {
  fn default() -> Self {
    Self {
      depth: 0,
      tr_depth: 0,
      cu_type: CuType::NotSet,
      part_mode: PartMode::Part2Nx2N,
      cbf: [false; 3],
      merged: false,
      skip: false,
      intra_modes: [1, 1, 1, 1], // DC_PRED
      chroma_mode: 1,
      inter: InterRecord::default(),
    }
  }
}

/// A tiled grid at 4x4 granularity covering the frame. Every 4x4 cell inside
/// a committed CU's footprint holds an identical copy of that CU's record
/// (the invariant enforced by `set_region`).
pub struct CuArray {
  mi: Array2D<CuRecord>,
}

impl CuArray {
  pub fn new(mi_rows: usize, mi_cols: usize) -> Self {
    Self { mi: Array2D::filled(mi_rows, mi_cols, CuRecord::default()) }
  }

  pub fn mi_rows(&self) -> usize {
    self.mi.rows()
  }

  pub fn mi_cols(&self) -> usize {
    self.mi.cols()
  }

  pub fn get(&self, mi_row: usize, mi_col: usize) -> &CuRecord {
    &self.mi[mi_row][mi_col]
  }

  /// Commit `record` across the whole `(mi_rows x mi_cols)` footprint rooted
  /// at `(mi_row, mi_col)`, clipped to the frame.
  pub fn set_region(&mut self, mi_row: usize, mi_col: usize, mi_rows: usize, mi_cols: usize, record: &CuRecord) {
    let rows = mi_rows.min(self.mi.rows().saturating_sub(mi_row));
    let cols = mi_cols.min(self.mi.cols().saturating_sub(mi_col));
    self.mi.fill_region(mi_row, mi_col, rows, cols, record);
  }

  /// True if every 4x4 cell within the footprint equals `record` (used by the
  /// test suite to check the CU-array commit invariant from spec §8).
  pub fn region_matches(&self, mi_row: usize, mi_col: usize, mi_rows: usize, mi_cols: usize, cu_type: CuType) -> bool {
    for r in mi_row..(mi_row + mi_rows).min(self.mi.rows()) {
      for c in mi_col..(mi_col + mi_cols).min(self.mi.cols()) {
        if self.mi[r][c].cu_type != cu_type {
          return false;
        }
      }
    }
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn set_region_fills_every_cell() {
    let mut arr = CuArray::new(16, 16);
    let mut rec = CuRecord::default();
    rec.cu_type = CuType::Inter;
    rec.skip = true;
    arr.set_region(4, 4, 2, 2, &rec);

    assert!(arr.region_matches(4, 4, 2, 2, CuType::Inter));
    assert_eq!(arr.get(0, 0).cu_type, CuType::NotSet);
  }

  #[test]
  fn set_region_clips_to_frame_bounds() {
    let mut arr = CuArray::new(8, 8);
    let rec = CuRecord::default();
    // Shouldn't panic even though the region extends past the array edge.
    arr.set_region(6, 6, 4, 4, &rec);
  }
}
