// C13: Pipeline orchestration. A ring of `owf + 1` encoder states lets up
// to `owf` frames be in flight concurrently; a crossbeam-channel worker
// pool drains a queue of per-frame encode jobs, and completed frames are
// re-ordered back into POC order before NAL units are handed to the
// caller. Reference pictures are frozen into `Arc<Frame>` once their
// loop filters finish, so the reference-picture set's lifetime is just
// `Arc` refcounting — no separate "is this frame still needed" tracking.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info};

use crate::error::{EncoderError, Result};
use crate::filter::{boundary_strength, decide_and_apply_sao, filter_horizontal_edge, filter_vertical_edge, BoundaryStrength, SaoDecision};
use crate::frame::{Frame, Plane, ReferencePictureSet, SliceType};
use crate::nal::{NalUnit, NalUnitType};
use crate::ratecontrol::{lambda_to_qp, RateControlState};
use crate::search::{encode_ctu, SearchParams};
use crate::syntax::{finish_slice_data, write_pps, write_slice_header, write_sps, write_vps, SliceHeader, SpsParams};

/// Partitions a picture into the CTU grid and produces a wavefront
/// processing order: CTUs ordered by antidiagonal (row + col), which is a
/// valid topological order for WPP's "row r, col c needs row r-1, col c+1"
/// dependency — every predecessor of a CTU has a strictly smaller
/// antidiagonal index.
pub struct TileGeometry {
  pub ctu_cols: usize,
  pub ctu_rows: usize,
}

impl TileGeometry {
  pub fn new(width: usize, height: usize, ctu_log2_size: u32) -> Self {
    let ctu_size = 1usize << ctu_log2_size;
    Self { ctu_cols: width.div_ceil(ctu_size), ctu_rows: height.div_ceil(ctu_size) }
  }

  pub fn wavefront_order(&self) -> Vec<(usize, usize)> {
    let mut order = Vec::with_capacity(self.ctu_rows * self.ctu_cols);
    for diag in 0..(self.ctu_rows + self.ctu_cols).saturating_sub(1) {
      for row in 0..self.ctu_rows {
        let col = diag.wrapping_sub(row);
        if col < self.ctu_cols && row + col == diag {
          order.push((row, col));
        }
      }
    }
    order
  }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of worker threads draining a shared job queue, used to
/// encode multiple in-flight frames concurrently (the `owf` axis of
/// parallelism; within one frame, encoding stays sequential over the
/// wavefront order computed above).
pub struct WorkerPool {
  sender: Option<Sender<Job>>,
  handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
  pub fn new(num_workers: usize) -> Self {
    let (sender, receiver): (Sender<Job>, Receiver<Job>) = bounded(num_workers * 4);
    let mut handles = Vec::with_capacity(num_workers);
    for id in 0..num_workers.max(1) {
      let receiver = receiver.clone();
      handles.push(std::thread::spawn(move || {
        debug!(worker = id, "worker started");
        while let Ok(job) = receiver.recv() {
          job();
        }
        debug!(worker = id, "worker shutting down");
      }));
    }
    Self { sender: Some(sender), handles }
  }

  pub fn submit(&self, job: Job) {
    if let Some(sender) = &self.sender {
      let _ = sender.send(job);
    }
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    self.sender = None; // closes the channel, unblocking every worker's recv()
    for handle in self.handles.drain(..) {
      let _ = handle.join();
    }
  }
}

pub struct PipelineConfig {
  pub width: usize,
  pub height: usize,
  pub ctu_log2_size: u32,
  pub min_cu_log2_size: u32,
  pub owf: usize,
  pub num_workers: usize,
  pub qp: i32,
  pub gop_size: usize,
  pub frame_rate: f64,
  pub bitrate: f64,
}

struct FinishedFrame {
  poc: u64,
  frame: Arc<Frame>,
  nal: Vec<u8>,
}

/// The public encoder surface: push source frames, pull NAL units in POC
/// order. Internally frames are dispatched onto the worker pool up to
/// `owf + 1` at a time and their results are held in `pending` until the
/// next-expected POC is ready, then drained into `output_queue`.
pub struct Encoder {
  config: PipelineConfig,
  pool: WorkerPool,
  rps: Mutex<ReferencePictureSet>,
  rate_control: Arc<Mutex<RateControlState>>,
  next_poc: u64,
  next_output_poc: u64,
  results: Arc<Mutex<BTreeMap<u64, FinishedFrame>>>,
  result_ready: Receiver<()>,
  result_ready_tx: Sender<()>,
  in_flight: usize,
  output_queue: std::collections::VecDeque<NalUnit>,
  headers_emitted: bool,
}

impl Encoder {
  pub fn new(config: PipelineConfig) -> Result<Self> {
    if config.width == 0 || config.height == 0 {
      return Err(EncoderError::Config("width and height must be non-zero".into()));
    }
    let num_workers = config.num_workers.max(1);
    let (result_ready_tx, result_ready) = bounded(num_workers * 4 + 4);

    Ok(Self {
      rate_control: Arc::new(Mutex::new(RateControlState::new(config.bitrate, config.frame_rate, config.gop_size))),
      pool: WorkerPool::new(num_workers),
      rps: Mutex::new(ReferencePictureSet::new(16)),
      next_poc: 0,
      next_output_poc: 0,
      results: Arc::new(Mutex::new(BTreeMap::new())),
      result_ready,
      result_ready_tx,
      in_flight: 0,
      output_queue: std::collections::VecDeque::new(),
      headers_emitted: false,
      config,
    })
  }

  fn emit_headers(&mut self) {
    if self.headers_emitted {
      return;
    }
    self.headers_emitted = true;

    let mut sink = crate::bitstream::BitstreamSink::new();
    write_vps(&mut sink);
    self.output_queue.push_back(NalUnit::new(NalUnitType::Vps, sink.take_chunks()));

    let mut sink = crate::bitstream::BitstreamSink::new();
    write_sps(
      &mut sink,
      &SpsParams {
        width: self.config.width as u32,
        height: self.config.height as u32,
        ctu_log2_size: self.config.ctu_log2_size,
        min_cu_log2_size: self.config.min_cu_log2_size,
        max_transform_hierarchy_depth: 2,
      },
    );
    self.output_queue.push_back(NalUnit::new(NalUnitType::Sps, sink.take_chunks()));

    let mut sink = crate::bitstream::BitstreamSink::new();
    write_pps(&mut sink, self.config.qp);
    self.output_queue.push_back(NalUnit::new(NalUnitType::Pps, sink.take_chunks()));
  }

  /// Queues one source picture for encoding. Blocks only long enough to
  /// submit the job; the worker pool runs the actual encode asynchronously,
  /// respecting the `owf` bound by draining completed results first.
  pub fn push_frame(&mut self, mut frame: Frame) -> Result<()> {
    self.emit_headers();

    while self.in_flight > self.config.owf {
      self.drain_one_result()?;
    }

    let poc = self.next_poc;
    self.next_poc += 1;
    frame.poc = poc;

    let refs = {
      let rps = self.rps.lock().unwrap();
      rps.frames.last().cloned().into_iter().collect::<Vec<_>>()
    };
    frame.refs = refs;

    let geometry = TileGeometry::new(self.config.width, self.config.height, self.config.ctu_log2_size);
    let (lambda, qp, target_bits) = {
      let mut rc = self.rate_control.lock().unwrap();
      let target = rc.target_bits_for_frame(self.config.width, self.config.height, 0);
      let lambda = rc.lambda_for_frame(self.config.width, self.config.height, target);
      (lambda, lambda_to_qp(lambda), target)
    };
    let params = SearchParams {
      qp,
      lambda: lambda as i64,
      ctu_log2_size: self.config.ctu_log2_size,
      min_cu_log2_size: self.config.min_cu_log2_size,
    };

    let results = Arc::clone(&self.results);
    let ready_tx = self.result_ready_tx.clone();
    let rate_control = Arc::clone(&self.rate_control);
    let min_cu_log2_size = self.config.min_cu_log2_size;
    let (width, height) = (self.config.width, self.config.height);

    self.in_flight += 1;
    self.pool.submit(Box::new(move || {
      let nal = encode_one_frame(&mut frame, &geometry, &params, min_cu_log2_size);
      rate_control.lock().unwrap().finish_frame(width, height, target_bits, (nal.len() * 8) as f64, lambda);
      let finished = FinishedFrame { poc, frame: Arc::new(frame), nal };
      results.lock().unwrap().insert(poc, finished);
      let _ = ready_tx.send(());
    }));

    Ok(())
  }

  fn drain_one_result(&mut self) -> Result<()> {
    self.result_ready.recv().map_err(|_| EncoderError::Internal("worker pool channel closed unexpectedly".into()))?;
    self.in_flight -= 1;

    let mut results = self.results.lock().unwrap();
    if let Some(finished) = results.remove(&self.next_output_poc) {
      drop(results);
      self.next_output_poc += 1;
      self.output_queue.push_back(NalUnit::new(NalUnitType::TrailR, vec![Arc::from(finished.nal.into_boxed_slice())]));
      let mut rps = self.rps.lock().unwrap();
      rps.push(finished.frame);
    }
    Ok(())
  }

  /// Pops the next ready NAL unit, if any, in emission order.
  pub fn pull_nal(&mut self) -> Option<NalUnit> {
    self.output_queue.pop_front()
  }

  /// Drains every in-flight frame and returns all remaining NAL units in
  /// POC order.
  pub fn flush(&mut self) -> Result<Vec<NalUnit>> {
    while self.in_flight > 0 {
      self.drain_one_result()?;
    }
    info!(frames = self.next_output_poc, "pipeline flushed");
    Ok(self.output_queue.drain(..).collect())
  }
}

fn encode_one_frame(frame: &mut Frame, geometry: &TileGeometry, params: &SearchParams, min_cu_log2_size: u32) -> Vec<u8> {
  let ctu_size = 1usize << params.ctu_log2_size;

  for &(ctu_row, ctu_col) in &geometry.wavefront_order() {
    let mi_row = (ctu_row * ctu_size) / 4;
    let mi_col = (ctu_col * ctu_size) / 4;
    encode_ctu(frame, mi_row, mi_col, params);
  }

  let sao_decisions = apply_in_loop_filters(frame, geometry, ctu_size, params.qp, params.lambda);

  let mut sink = crate::bitstream::BitstreamSink::new();
  let mut cabac = crate::cabac::CabacEncoder::new();
  let mut ctx = crate::context::ContextBank::new_for_slice(params.qp);

  write_slice_header(
    &mut sink,
    &SliceHeader { first_slice: true, idr: frame.refs.is_empty(), slice_type: frame.slice_type, poc_lsb: (frame.poc & 0xff) as u32, poc_lsb_bits: 8, slice_qp_delta: 0 },
  );

  for &(ctu_row, ctu_col) in &geometry.wavefront_order() {
    let mi_row = (ctu_row * ctu_size) / 4;
    let mi_col = (ctu_col * ctu_size) / 4;
    let decision = &sao_decisions[ctu_row * geometry.ctu_cols + ctu_col];
    crate::syntax::encode_sao_ctu(&mut cabac, &mut sink, &mut ctx, decision, ctu_col > 0, ctu_row > 0);
    crate::syntax::encode_ctu(&mut cabac, &mut sink, &mut ctx, &frame.cu_array, mi_row, mi_col, params.ctu_log2_size, min_cu_log2_size, frame.slice_type);
  }
  finish_slice_data(&mut cabac, &mut sink);

  let chunks = sink.take_chunks();
  chunks.iter().flat_map(|c| c.iter().copied()).collect()
}

/// Runs deblocking then SAO over the whole picture, returning each CTU's
/// final SAO decision (raster order) for `encode_sao_ctu` to signal.
fn apply_in_loop_filters(frame: &mut Frame, geometry: &TileGeometry, ctu_size: usize, qp: i32, lambda: i64) -> Vec<SaoDecision> {
  for ctu_row in 0..geometry.ctu_rows {
    for ctu_col in 1..geometry.ctu_cols {
      let x = ctu_col * ctu_size;
      for line in 0..(ctu_size / 4) {
        let y0 = ctu_row * ctu_size + line * 4;
        if y0 >= frame.y_height {
          continue;
        }
        let mi_row = y0 / 4;
        let mi_col_left = (x - 4) / 4;
        let mi_col_right = x / 4;
        if mi_col_left >= frame.cu_array.mi_cols() || mi_col_right >= frame.cu_array.mi_cols() || mi_row >= frame.cu_array.mi_rows() {
          continue;
        }
        let strength = boundary_strength(&frame.cu_array, mi_row, mi_col_left, mi_row, mi_col_right);
        if strength != BoundaryStrength::None {
          filter_vertical_edge(&mut frame.recon[0], y0, x, strength, qp);
        }
      }
    }
  }

  for ctu_col in 0..geometry.ctu_cols {
    for ctu_row in 1..geometry.ctu_rows {
      let y = ctu_row * ctu_size;
      for col_line in 0..(ctu_size / 4) {
        let x0 = ctu_col * ctu_size + col_line * 4;
        if x0 >= frame.y_width {
          continue;
        }
        let mi_col = x0 / 4;
        let mi_row_above = (y - 4) / 4;
        let mi_row_below = y / 4;
        if mi_row_above >= frame.cu_array.mi_rows() || mi_row_below >= frame.cu_array.mi_rows() || mi_col >= frame.cu_array.mi_cols() {
          continue;
        }
        let strength = boundary_strength(&frame.cu_array, mi_row_above, mi_col, mi_row_below, mi_col);
        if strength != BoundaryStrength::None {
          filter_horizontal_edge(&mut frame.recon[0], y, x0, strength, qp);
        }
      }
    }
  }

  // Snapshot the post-deblock, pre-SAO luma plane: SAO's band/edge
  // categorization always reads from this frozen copy so that filtering one
  // CTU never perturbs the categorization its neighbours compute from.
  let snapshot = Plane { pixels: frame.recon[0].pixels.clone() };
  let mut decisions = vec![None; geometry.ctu_rows * geometry.ctu_cols];

  for ctu_row in 0..geometry.ctu_rows {
    for ctu_col in 0..geometry.ctu_cols {
      let y0 = ctu_row * ctu_size;
      let x0 = ctu_col * ctu_size;
      if y0 >= frame.y_height || x0 >= frame.y_width {
        continue;
      }
      let size = ctu_size.min(frame.y_height - y0).min(frame.y_width - x0);
      let left = if ctu_col > 0 { decisions[ctu_row * geometry.ctu_cols + ctu_col - 1].map(|d: SaoDecision| d.params) } else { None };
      let above = if ctu_row > 0 { decisions[(ctu_row - 1) * geometry.ctu_cols + ctu_col].map(|d: SaoDecision| d.params) } else { None };

      let decision = decide_and_apply_sao(&mut frame.recon[0], &snapshot, &frame.source[0], y0, x0, size, left, above, lambda);
      decisions[ctu_row * geometry.ctu_cols + ctu_col] = Some(decision);
    }
  }

  decisions.into_iter().map(|d| d.unwrap_or(SaoDecision { params: crate::filter::SaoParams { sao_type: crate::filter::SaoType::None, offsets: [0; 4], band_position: 0 }, merge_left: false, merge_up: false })).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn wavefront_order_respects_ctu_dependency() {
    let geometry = TileGeometry::new(128, 128, 6);
    let order = geometry.wavefront_order();
    assert_eq!(order.len(), geometry.ctu_rows * geometry.ctu_cols);

    let mut position = std::collections::HashMap::new();
    for (idx, &(r, c)) in order.iter().enumerate() {
      position.insert((r, c), idx);
    }
    for &(r, c) in &order {
      if c > 0 {
        assert!(position[&(r, c - 1)] < position[&(r, c)]);
      }
      if r > 0 {
        assert!(position[&(r - 1, c)] < position[&(r, c)]);
      }
    }
  }

  #[test]
  fn pipeline_emits_headers_and_one_nal_per_frame() {
    let config = PipelineConfig { width: 64, height: 64, ctu_log2_size: 6, min_cu_log2_size: 3, owf: 1, num_workers: 2, qp: 32, gop_size: 1, frame_rate: 30.0, bitrate: 1_000_000.0 };
    let mut encoder = Encoder::new(config).unwrap();

    let frame = Frame::new(0, SliceType::I, 64, 64);
    encoder.push_frame(frame).unwrap();
    let remaining = encoder.flush().unwrap();

    let mut all_nals = remaining;
    while let Some(nal) = encoder.pull_nal() {
      all_nals.push(nal);
    }

    assert!(all_nals.iter().any(|n| n.nal_type == NalUnitType::Vps));
    assert!(all_nals.iter().any(|n| n.nal_type == NalUnitType::Sps));
    assert!(all_nals.iter().any(|n| n.nal_type == NalUnitType::Pps));
    assert!(all_nals.iter().any(|n| n.nal_type == NalUnitType::TrailR));
  }

  #[test]
  fn reference_picture_set_refcount_drops_after_pipeline_drop() {
    let config = PipelineConfig { width: 64, height: 64, ctu_log2_size: 6, min_cu_log2_size: 3, owf: 0, num_workers: 1, qp: 32, gop_size: 1, frame_rate: 30.0, bitrate: 1_000_000.0 };
    let mut encoder = Encoder::new(config).unwrap();
    encoder.push_frame(Frame::new(0, SliceType::I, 64, 64)).unwrap();
    encoder.flush().unwrap();

    let rps = encoder.rps.lock().unwrap();
    assert_eq!(rps.strong_count_total(), rps.frames.len());
  }
}
