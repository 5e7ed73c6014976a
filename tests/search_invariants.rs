// Integration-level checks of spec §8's search/data-model invariants: every
// committed CU's footprint is internally consistent, and the search driver
// never leaves a coding-unit-array cell unset after encoding a full CTU.

use hevc_core::cu::CuType;
use hevc_core::frame::{Frame, SliceType};
use hevc_core::search::{encode_ctu, SearchParams};

fn encode_one_ctu(width: usize, height: usize, pattern: impl Fn(usize, usize) -> u8) -> Frame {
  let mut frame = Frame::new(0, SliceType::I, width, height);
  for y in 0..height {
    for x in 0..width {
      frame.source[0].pixels[y][x] = pattern(x, y);
    }
  }
  let params = SearchParams { qp: 30, lambda: 150, ctu_log2_size: 6, min_cu_log2_size: 3 };
  encode_ctu(&mut frame, 0, 0, &params);
  frame
}

#[test]
fn every_four_by_four_cell_is_committed_after_one_ctu() {
  let frame = encode_one_ctu(64, 64, |x, y| ((x * 7 + y * 13) % 256) as u8);
  for r in 0..frame.cu_array.mi_rows() {
    for c in 0..frame.cu_array.mi_cols() {
      assert_ne!(frame.cu_array.get(r, c).cu_type, CuType::NotSet);
    }
  }
}

#[test]
fn high_frequency_content_does_not_panic_the_search_driver() {
  // A checkerboard pattern stresses the rough-mode short-list and the RDO
  // tier transitions without relying on a single content profile.
  let frame = encode_one_ctu(64, 64, |x, y| if (x / 2 + y / 2) % 2 == 0 { 16 } else { 235 });
  assert_eq!(frame.cu_array.mi_rows(), 16);
  assert_eq!(frame.cu_array.mi_cols(), 16);
}

#[test]
fn reconstructed_luma_tracks_a_non_flat_source() {
  let frame = encode_one_ctu(64, 64, |x, y| ((x + y) % 256) as u8);
  // A gradient source should not reconstruct to the plane's default
  // mid-gray fill everywhere.
  let mut distinct_values = std::collections::HashSet::new();
  for r in 0..frame.recon[0].pixels.rows() {
    for c in 0..frame.recon[0].pixels.cols() {
      distinct_values.insert(frame.recon[0].pixels[r][c]);
    }
  }
  assert!(distinct_values.len() > 1);
}
