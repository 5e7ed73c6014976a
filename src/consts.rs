// Fixed tables shared across components: transform sizes, intra angle table,
// and the QP-derived quantization step scale. Computed once, process-wide
// immutable data rather than module-level mutable globals (see DESIGN.md,
// "Global mutable state").

pub const CTU_SIZE: usize = 64;
pub const MAX_CU_DEPTH: u8 = 3; // 64 -> 32 -> 16 -> 8
pub const MIN_CU_SIZE: usize = 8;

pub const MIN_INTRA_DEPTH: u8 = 0;
pub const MAX_INTRA_DEPTH: u8 = 3;
pub const MIN_INTER_DEPTH: u8 = 0;
pub const MAX_INTER_DEPTH: u8 = 3;

/// `QP % 6 -> {dequant multiplier}`, the standard HEVC level-scale table.
pub const LEVEL_SCALE: [i32; 6] = [40, 45, 51, 57, 64, 72];

/// Forward-quantization scale factor for a given QP, matching the inverse of
/// `LEVEL_SCALE` scaled for the default internal bit depth (8).
pub fn quant_scale(qp: i32) -> i64 {
  const QUANT_SCALE: [i32; 6] = [26214, 23302, 20560, 18396, 16384, 14564];
  QUANT_SCALE[(qp % 6) as usize] as i64
}

pub fn dequant_scale(qp: i32) -> i32 {
  LEVEL_SCALE[(qp % 6) as usize]
}

pub fn qp_shift(qp: i32, log2_tr_size: u32) -> i32 {
  qp / 6 - (log2_tr_size as i32 - 2)
}

/// Per-mode angle, in 1/32-pel units, for HEVC's 33 angular intra modes
/// (modes 2..=34). Index 0 maps to mode 2.
#[rustfmt::skip]
pub static INTRA_ANGLE_TABLE: [i32; 33] = [
  32, 26, 21, 17, 13, 9, 5, 2, 0, -2, -5, -9, -13, -17, -21, -26,
  -32, -26, -21, -17, -13, -9, -5, -2, 0, 2, 5, 9, 13, 17, 21, 26, 32,
];

/// Inverse angle, used when extending the main reference array for negative
/// angles (modes requiring samples from "below" the top-left corner).
#[rustfmt::skip]
pub static INTRA_INV_ANGLE_TABLE: [i32; 8] = [
  -4096, -1638, -910, -630, -482, -390, -315, -256,
];

pub fn diagonal_scan(size: usize) -> Vec<(u16, u16)> {
  let mut order = Vec::with_capacity(size * size);
  for diag in 0..(2 * size - 1) {
    let (row_start, col_start) = if diag < size { (diag, 0) } else { (size - 1, diag - size + 1) };
    let mut row = row_start as i64;
    let mut col = col_start as i64;
    while row >= 0 && (col as usize) < size {
      order.push((row as u16, col as u16));
      row -= 1;
      col += 1;
    }
  }
  order
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn diagonal_scan_covers_every_cell_once() {
    for size in [4usize, 8, 16] {
      let scan = diagonal_scan(size);
      assert_eq!(scan.len(), size * size);
      let mut seen = vec![false; size * size];
      for (r, c) in scan {
        let idx = r as usize * size + c as usize;
        assert!(!seen[idx]);
        seen[idx] = true;
      }
    }
  }

  #[test]
  fn angle_table_is_symmetric_around_mode_18() {
    assert_eq!(INTRA_ANGLE_TABLE[18 - 2], 0); // mode 18 is the pure diagonal
  }
}
