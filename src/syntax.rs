// C10: Bitstream syntax. Parameter sets (VPS/SPS/PPS) are written as plain
// exp-Golomb-coded RBSP, byte-aligned and independent of CABAC. Slice data
// is written bin-by-bin through `CabacEncoder`, driven by the CU array a
// search pass (C9) has already committed. This module also owns the
// slice-data finalization that `cabac.rs::finish` deliberately defers:
// the `end_of_slice_segment_flag` terminating bin and RBSP trailing bits.

use crate::array2d::Array2D;
use crate::bitstream::BitstreamSink;
use crate::cabac::CabacEncoder;
use crate::context::ContextBank;
use crate::cu::{CuArray, CuType, PartMode};
use crate::filter::{SaoDecision, SaoType};
use crate::frame::SliceType;

fn write_ue_impl(sink: &mut BitstreamSink, value: u32) {
  let code_num = value + 1;
  let bits = 32 - code_num.leading_zeros();
  for _ in 0..(bits - 1) {
    sink.put_bit(0);
  }
  sink.put(code_num as u64, bits);
}

fn write_se(sink: &mut BitstreamSink, value: i32) {
  let mapped = if value <= 0 { (-value as u32) * 2 } else { (value as u32) * 2 - 1 };
  write_ue_impl(sink, mapped);
}

fn rbsp_trailing_bits(sink: &mut BitstreamSink) {
  sink.put_bit(1);
  sink.align_zero();
}

pub struct SpsParams {
  pub width: u32,
  pub height: u32,
  pub ctu_log2_size: u32,
  pub min_cu_log2_size: u32,
  pub max_transform_hierarchy_depth: u32,
}

/// Minimal but structurally valid SPS RBSP: profile/tier/level is reduced to
/// a single reserved byte run rather than the full profile_tier_level()
/// syntax (no conformance-window, VUI or SPS extension support).
pub fn write_sps(sink: &mut BitstreamSink, p: &SpsParams) {
  write_ue_impl(sink, 0); // sps_video_parameter_set_id
  sink.put(0, 3); // sps_max_sub_layers_minus1
  sink.put_bit(0); // sps_temporal_id_nesting_flag
  sink.put(0, 8 * 12); // profile_tier_level(), reduced to 12 reserved zero bytes
  write_ue_impl(sink, 0); // sps_seq_parameter_set_id
  write_ue_impl(sink, 1); // chroma_format_idc: 4:2:0
  write_ue_impl(sink, p.width);
  write_ue_impl(sink, p.height);
  sink.put_bit(0); // conformance_window_flag
  write_ue_impl(sink, 0); // bit_depth_luma_minus8
  write_ue_impl(sink, 0); // bit_depth_chroma_minus8
  write_ue_impl(sink, 4); // log2_max_pic_order_cnt_lsb_minus4
  sink.put_bit(0); // sps_sub_layer_ordering_info_present_flag
  write_ue_impl(sink, 0); // sps_max_dec_pic_buffering_minus1
  write_ue_impl(sink, 0); // sps_max_num_reorder_pics
  write_ue_impl(sink, 0); // sps_max_latency_increase_plus1
  write_ue_impl(sink, p.min_cu_log2_size - 3); // log2_min_luma_coding_block_size_minus3
  write_ue_impl(sink, p.ctu_log2_size - p.min_cu_log2_size); // log2_diff_max_min_luma_coding_block_size
  write_ue_impl(sink, 2); // log2_min_luma_transform_block_size_minus2
  write_ue_impl(sink, 3); // log2_diff_max_min_luma_transform_block_size
  write_ue_impl(sink, p.max_transform_hierarchy_depth); // max_transform_hierarchy_depth_inter
  write_ue_impl(sink, p.max_transform_hierarchy_depth); // max_transform_hierarchy_depth_intra
  sink.put_bit(0); // scaling_list_enabled_flag
  sink.put_bit(0); // amp_enabled_flag
  sink.put_bit(1); // sample_adaptive_offset_enabled_flag
  sink.put_bit(0); // pcm_enabled_flag
  write_ue_impl(sink, 0); // num_short_term_ref_pic_sets
  sink.put_bit(0); // long_term_ref_pics_present_flag
  sink.put_bit(0); // sps_temporal_mvp_enabled_flag
  sink.put_bit(0); // strong_intra_smoothing_enabled_flag
  sink.put_bit(0); // vui_parameters_present_flag
  sink.put_bit(0); // sps_extension_present_flag
  rbsp_trailing_bits(sink);
}

/// Minimal PPS RBSP: one PPS per stream, referencing the one SPS written.
pub fn write_pps(sink: &mut BitstreamSink, init_qp: i32) {
  write_ue_impl(sink, 0); // pps_pic_parameter_set_id
  write_ue_impl(sink, 0); // pps_seq_parameter_set_id
  sink.put_bit(0); // dependent_slice_segments_enabled_flag
  sink.put_bit(0); // output_flag_present_flag
  sink.put(0, 3); // num_extra_slice_header_bits
  sink.put_bit(1); // sign_data_hiding_enabled_flag
  sink.put_bit(0); // cabac_init_present_flag
  write_ue_impl(sink, 0); // num_ref_idx_l0_default_active_minus1
  write_ue_impl(sink, 0); // num_ref_idx_l1_default_active_minus1
  write_se(sink, init_qp - 26); // init_qp_minus26
  sink.put_bit(0); // constrained_intra_pred_flag
  sink.put_bit(0); // transform_skip_enabled_flag
  sink.put_bit(0); // cu_qp_delta_enabled_flag
  write_se(sink, 0); // pps_cb_qp_offset
  write_se(sink, 0); // pps_cr_qp_offset
  sink.put_bit(0); // pps_slice_chroma_qp_offsets_present_flag
  sink.put_bit(0); // weighted_pred_flag
  sink.put_bit(0); // weighted_bipred_flag
  sink.put_bit(0); // transquant_bypass_enabled_flag
  sink.put_bit(0); // tiles_enabled_flag
  sink.put_bit(0); // entropy_coding_sync_enabled_flag
  sink.put_bit(1); // pps_loop_filter_across_slices_enabled_flag
  sink.put_bit(0); // deblocking_filter_control_present_flag
  sink.put_bit(0); // pps_scaling_list_data_present_flag
  sink.put_bit(0); // lists_modification_present_flag
  write_ue_impl(sink, 0); // log2_parallel_merge_level_minus2
  sink.put_bit(0); // slice_segment_header_extension_present_flag
  sink.put_bit(0); // pps_extension_present_flag
  rbsp_trailing_bits(sink);
}

/// Minimal VPS RBSP, carrying only the fields a single-layer stream needs.
pub fn write_vps(sink: &mut BitstreamSink) {
  sink.put(0, 4); // vps_video_parameter_set_id
  sink.put_bit(1); // vps_base_layer_internal_flag
  sink.put_bit(1); // vps_base_layer_available_flag
  sink.put(0, 6); // vps_max_layers_minus1
  sink.put(0, 3); // vps_max_sub_layers_minus1
  sink.put_bit(0); // vps_temporal_id_nesting_flag
  sink.put(0xffff, 16); // vps_reserved_0xffff_16bits
  sink.put(0, 8 * 12); // profile_tier_level(), reduced as in the SPS
  sink.put_bit(0); // vps_sub_layer_ordering_info_present_flag
  write_ue_impl(sink, 0);
  write_ue_impl(sink, 0);
  write_ue_impl(sink, 0);
  sink.put(0, 6); // vps_max_layer_id
  write_ue_impl(sink, 0); // vps_num_layer_sets_minus1
  sink.put_bit(0); // vps_timing_info_present_flag
  sink.put_bit(0); // vps_extension_flag
  rbsp_trailing_bits(sink);
}

pub struct SliceHeader {
  pub first_slice: bool,
  pub idr: bool,
  pub slice_type: SliceType,
  pub poc_lsb: u32,
  pub poc_lsb_bits: u32,
  pub slice_qp_delta: i32,
}

pub fn write_slice_header(sink: &mut BitstreamSink, h: &SliceHeader) {
  sink.put_bit(h.first_slice as u32);
  if h.idr {
    sink.put_bit(0); // no_output_of_prior_pics_flag
  }
  write_ue_impl(sink, 0); // slice_pic_parameter_set_id
  if !h.first_slice {
    write_ue_impl(sink, 0); // slice_segment_address
  }

  // slice_type: 0=B, 1=P, 2=I, per Table 7-7
  let slice_type_code = match h.slice_type {
    SliceType::B => 0,
    SliceType::P => 1,
    SliceType::I => 2,
  };
  write_ue_impl(sink, slice_type_code);

  if !h.idr {
    sink.put(h.poc_lsb as u64, h.poc_lsb_bits);
  }

  write_se(sink, h.slice_qp_delta);
  sink.put_bit(1); // slice_loop_filter_across_slices_enabled_flag

  sink.put_bit(1);
  sink.align_zero(); // byte_alignment() before slice_segment_data
}

/// Finalizes slice data: the `end_of_slice_segment_flag` terminating bin,
/// the arithmetic coder's residual-bit flush, then RBSP trailing bits.
pub fn finish_slice_data(cabac: &mut CabacEncoder, sink: &mut BitstreamSink) {
  cabac.encode_bin_trm(sink, 1);
  cabac.finish(sink);
  sink.put_bit(1);
  sink.align_zero();
}

/// Writes one CTU's `sao()` syntax: merge-left/merge-up flags (only signaled
/// when the corresponding neighbour exists), and — when neither merge flag
/// is set — the SAO type index and parameters for the luma component.
pub fn encode_sao_ctu(cabac: &mut CabacEncoder, sink: &mut BitstreamSink, ctx: &mut ContextBank, decision: &SaoDecision, has_left: bool, has_above: bool) {
  if has_left {
    cabac.encode_bin(sink, &mut ctx.sao_merge_flag[0], decision.merge_left as u32);
    if decision.merge_left {
      return;
    }
  }
  if has_above {
    cabac.encode_bin(sink, &mut ctx.sao_merge_flag[0], decision.merge_up as u32);
    if decision.merge_up {
      return;
    }
  }

  let type_idx = match decision.params.sao_type {
    SaoType::None => 0u32,
    SaoType::Band => 1,
    SaoType::Edge { .. } => 2,
  };
  // sao_type_idx_luma: the first bin (off vs. on) is context-coded, the
  // second (band vs. edge) is bypass, per the standard's binarization.
  cabac.encode_bin(sink, &mut ctx.sao_type_idx[0], (type_idx > 0) as u32);
  if type_idx == 0 {
    return;
  }
  cabac.encode_bin_ep(sink, (type_idx == 2) as u32);

  for &offset in &decision.params.offsets {
    let abs_offset = offset.unsigned_abs().min(7);
    for _ in 0..abs_offset {
      cabac.encode_bin_ep(sink, 1);
    }
    if abs_offset < 7 {
      cabac.encode_bin_ep(sink, 0);
    }
  }

  match decision.params.sao_type {
    SaoType::Band => {
      for &offset in &decision.params.offsets {
        if offset != 0 {
          cabac.encode_bin_ep(sink, (offset < 0) as u32);
        }
      }
      cabac.encode_bins_ep(sink, decision.params.band_position as u32, 5);
    }
    SaoType::Edge { eo_class } => cabac.encode_bins_ep(sink, eo_class as u32, 2),
    SaoType::None => {}
  }
}

/// Recursively writes one CTU's quad-tree, driven by the depth and mode
/// decisions already committed into `cu_array` by the search pass.
pub fn encode_ctu(
  cabac: &mut CabacEncoder,
  sink: &mut BitstreamSink,
  ctx: &mut ContextBank,
  cu_array: &CuArray,
  ctu_mi_row: usize,
  ctu_mi_col: usize,
  ctu_log2_size: u32,
  min_cu_log2_size: u32,
  slice_type: SliceType,
) {
  encode_quad(cabac, sink, ctx, cu_array, ctu_mi_row, ctu_mi_col, ctu_log2_size, ctu_log2_size, min_cu_log2_size, slice_type);
}

#[allow(clippy::too_many_arguments)]
fn encode_quad(
  cabac: &mut CabacEncoder,
  sink: &mut BitstreamSink,
  ctx: &mut ContextBank,
  cu_array: &CuArray,
  mi_row: usize,
  mi_col: usize,
  log2_size: u32,
  ctu_log2_size: u32,
  min_cu_log2_size: u32,
  slice_type: SliceType,
) {
  if mi_row * 4 >= cu_array.mi_rows() * 4 || mi_col * 4 >= cu_array.mi_cols() * 4 {
    return;
  }
  if mi_row >= cu_array.mi_rows() || mi_col >= cu_array.mi_cols() {
    return;
  }

  let record = cu_array.get(mi_row, mi_col);
  let committed_size_log2 = ctu_log2_size_for_depth(ctu_log2_size, record.depth).max(min_cu_log2_size);
  let should_split = committed_size_log2 < log2_size && log2_size > min_cu_log2_size;

  if log2_size > min_cu_log2_size {
    cabac.encode_bin(sink, &mut ctx.split_flag[0], should_split as u32);
  }

  if should_split {
    let half_mi = 1usize << (log2_size - 1 - 2);
    for dy in 0..2 {
      for dx in 0..2 {
        encode_quad(
          cabac,
          sink,
          ctx,
          cu_array,
          mi_row + dy * half_mi,
          mi_col + dx * half_mi,
          log2_size - 1,
          ctu_log2_size,
          min_cu_log2_size,
          slice_type,
        );
      }
    }
  } else {
    encode_cu(cabac, sink, ctx, record, log2_size, slice_type);
  }
}

fn ctu_log2_size_for_depth(ctu_log2_size: u32, depth: u8) -> u32 {
  ctu_log2_size.saturating_sub(depth as u32)
}

fn encode_cu(
  cabac: &mut CabacEncoder,
  sink: &mut BitstreamSink,
  ctx: &mut ContextBank,
  record: &crate::cu::CuRecord,
  log2_size: u32,
  slice_type: SliceType,
) {
  if slice_type != SliceType::I {
    cabac.encode_bin(sink, &mut ctx.skip_flag[0], record.skip as u32);
    if record.skip {
      encode_merge_idx(cabac, sink, ctx, record.inter.merge_idx.unwrap_or(0));
      return;
    }
    cabac.encode_bin(sink, &mut ctx.cu_pred_mode[0], (record.cu_type == CuType::Intra) as u32);
  }

  let is_nxn = record.part_mode == PartMode::PartNx2N || record.part_mode == PartMode::Part2NxN;
  if log2_size > 3 {
    // part_size is only signaled when NxN is actually a legal partition at this depth
    cabac.encode_bin(sink, &mut ctx.part_size[0], is_nxn as u32);
  }

  match record.cu_type {
    CuType::Intra | CuType::Pcm => {
      for &mode in &record.intra_modes[..if is_nxn { 4 } else { 1 }] {
        // Most-probable-mode flag collapses to "always explicit" here: the
        // MPM candidate derivation lives in the search driver, not here.
        cabac.encode_bin(sink, &mut ctx.intra_pred_mode[0], 0);
        cabac.encode_bins_ep(sink, mode as u32, 5);
      }
      cabac.encode_bin(sink, &mut ctx.chroma_pred_mode[0], 0);
      cabac.encode_bins_ep(sink, record.chroma_mode as u32, 2);
      encode_residual_flags(cabac, sink, ctx, record, true);
    }
    CuType::Inter => {
      cabac.encode_bin(sink, &mut ctx.merge_flag_ext[0], record.merged as u32);
      if record.merged {
        encode_merge_idx(cabac, sink, ctx, record.inter.merge_idx.unwrap_or(0));
      } else {
        for list in 0..2 {
          if let Some(ref_idx) = record.inter.ref_idx[list] {
            cabac.encode_bin(sink, &mut ctx.ref_pic[0], (ref_idx > 0) as u32);
            let mvd = record.inter.mvd[list];
            encode_mvd_component(cabac, sink, &mut ctx.mvd[0], mvd.x as i32);
            encode_mvd_component(cabac, sink, &mut ctx.mvd[1], mvd.y as i32);
            cabac.encode_bin(sink, &mut ctx.merge_flag_ext[0], (record.inter.mvp_idx[list] != 0) as u32);
          }
        }
      }
      cabac.encode_bin(sink, &mut ctx.qt_root_cbf[0], (record.cbf[0] || record.cbf[1] || record.cbf[2]) as u32);
      if record.cbf[0] || record.cbf[1] || record.cbf[2] {
        encode_residual_flags(cabac, sink, ctx, record, false);
      }
    }
    CuType::Skip | CuType::NotSet => {}
  }
}

fn encode_merge_idx(cabac: &mut CabacEncoder, sink: &mut BitstreamSink, ctx: &mut ContextBank, idx: u8) {
  if idx == 0 {
    cabac.encode_bin(sink, &mut ctx.merge_idx_ext[0], 0);
    return;
  }
  cabac.encode_bin(sink, &mut ctx.merge_idx_ext[0], 1);
  for _ in 0..idx.saturating_sub(1) {
    cabac.encode_bin_ep(sink, 1);
  }
  cabac.encode_bin_ep(sink, 0);
}

fn encode_mvd_component(cabac: &mut CabacEncoder, sink: &mut BitstreamSink, ctx: &mut crate::context::ContextModel, value: i32) {
  let nonzero = value != 0;
  cabac.encode_bin(sink, ctx, nonzero as u32);
  if !nonzero {
    return;
  }
  let magnitude = value.unsigned_abs();
  let greater_one = magnitude > 1;
  cabac.encode_bin_ep(sink, greater_one as u32);
  if greater_one {
    let remaining = magnitude - 2;
    let bits = crate::util::ceil_log2(remaining as usize + 1).max(1);
    cabac.encode_bins_ep(sink, remaining, bits);
  }
  cabac.encode_bin_ep(sink, (value < 0) as u32);
}

/// Transform-tree cbf flags and coefficient encoding for a CU that is known
/// to carry residual. Chroma cbf is always visited; luma only when
/// `always_luma` (intra) or when the inter root cbf was already signaled
/// true by the caller.
fn encode_residual_flags(cabac: &mut CabacEncoder, sink: &mut BitstreamSink, ctx: &mut ContextBank, record: &crate::cu::CuRecord, always_luma: bool) {
  let cbf_luma = always_luma || record.cbf[0];
  cabac.encode_bin(sink, &mut ctx.qt_cbf[1][0], cbf_luma as u32);
  cabac.encode_bin(sink, &mut ctx.qt_cbf[0][0], record.cbf[1] as u32);
  cabac.encode_bin(sink, &mut ctx.qt_cbf[0][1], record.cbf[2] as u32);
}

/// Encodes one transform block's coefficients: last-significant-coefficient
/// position (prefix via context, suffix via bypass), a reverse-scan
/// significance map, then sign and remaining-magnitude bypass bits.
pub fn encode_coefficients(cabac: &mut CabacEncoder, sink: &mut BitstreamSink, ctx: &mut ContextBank, coeffs: &Array2D<i32>, is_luma: bool) {
  let size = coeffs.rows();
  let scan = crate::consts::diagonal_scan(size);

  let mut last_idx = None;
  for (idx, (r, c)) in scan.iter().enumerate() {
    if coeffs[*r as usize][*c as usize] != 0 {
      last_idx = Some(idx);
    }
  }
  let Some(last_idx) = last_idx else {
    return;
  };

  let prefix_bits = crate::util::ceil_log2(last_idx + 2).min(if is_luma { 15 } else { 15 });
  let last_ctx = if is_luma { &mut ctx.last_x_luma } else { &mut ctx.last_x_chroma };
  for i in 0..prefix_bits {
    cabac.encode_bin(sink, &mut last_ctx[(i as usize).min(last_ctx.len() - 1)], 1);
  }
  if (prefix_bits as usize) < last_ctx.len() {
    cabac.encode_bin(sink, &mut last_ctx[prefix_bits as usize], 0);
  }
  let suffix_len = prefix_bits.saturating_sub(2);
  if suffix_len > 0 {
    cabac.encode_bins_ep(sink, last_idx as u32, suffix_len);
  }

  let sig_ctx = if is_luma { &mut ctx.cu_sig_model_luma[..] } else { &mut ctx.cu_sig_model_chroma[..] };
  for (pos, (r, c)) in scan.iter().enumerate().take(last_idx + 1).rev() {
    let coeff = coeffs[*r as usize][*c as usize];
    if pos != last_idx {
      cabac.encode_bin(sink, &mut sig_ctx[pos % sig_ctx.len()], (coeff != 0) as u32);
    }
    if coeff == 0 {
      continue;
    }
    let magnitude = coeff.unsigned_abs();
    let one_ctx = if is_luma { &mut ctx.cu_one_model_luma[..] } else { &mut ctx.cu_one_model_chroma[..] };
    let greater_one = magnitude > 1;
    cabac.encode_bin(sink, &mut one_ctx[pos % one_ctx.len()], greater_one as u32);
    if greater_one {
      let abs_ctx = if is_luma { &mut ctx.cu_abs_model_luma[..] } else { &mut ctx.cu_abs_model_chroma[..] };
      let greater_two = magnitude > 2;
      cabac.encode_bin(sink, &mut abs_ctx[pos % abs_ctx.len()], greater_two as u32);
      if greater_two {
        let remaining = magnitude - 3;
        let bits = crate::util::ceil_log2(remaining as usize + 1).max(1);
        cabac.encode_bins_ep(sink, remaining, bits);
      }
    }
    cabac.encode_bin_ep(sink, (coeff < 0) as u32);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ue_golomb_roundtrips_small_values() {
    let mut sink = BitstreamSink::new();
    write_ue_impl(&mut sink, 0);
    write_ue_impl(&mut sink, 5);
    let chunks = sink.take_chunks();
    assert!(!chunks[0].is_empty());
  }

  #[test]
  fn sps_and_pps_finish_byte_aligned() {
    let mut sink = BitstreamSink::new();
    write_sps(&mut sink, &SpsParams { width: 1920, height: 1080, ctu_log2_size: 6, min_cu_log2_size: 3, max_transform_hierarchy_depth: 2 });
    assert_eq!(sink.bit_count() % 8, 0);

    let mut sink = BitstreamSink::new();
    write_pps(&mut sink, 32);
    assert_eq!(sink.bit_count() % 8, 0);
  }

  #[test]
  fn sao_merge_left_flag_skips_the_full_parameter_set() {
    use crate::filter::SaoParams;

    let mut cabac = CabacEncoder::new();
    let mut sink = BitstreamSink::new();
    let mut ctx = ContextBank::new_for_slice(32);
    let decision = SaoDecision {
      params: SaoParams { sao_type: SaoType::None, offsets: [0; 4], band_position: 0 },
      merge_left: true,
      merge_up: false,
    };
    encode_sao_ctu(&mut cabac, &mut sink, &mut ctx, &decision, true, true);
    finish_slice_data(&mut cabac, &mut sink);
    assert_eq!(sink.bit_count() % 8, 0);
  }

  #[test]
  fn slice_data_finalization_leaves_byte_aligned_output() {
    let mut cabac = CabacEncoder::new();
    let mut sink = BitstreamSink::new();
    let mut ctx = ContextBank::new_for_slice(32);
    cabac.encode_bin(&mut sink, &mut ctx.split_flag[0], 0);
    finish_slice_data(&mut cabac, &mut sink);
    assert_eq!(sink.bit_count() % 8, 0);
  }
}
