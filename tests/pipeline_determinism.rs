// Integration-level checks of spec §8's pipeline properties: encoding the
// same source frames twice produces byte-identical output (no data races or
// nondeterministic ordering leaking out of the worker pool), and every
// pushed frame eventually yields exactly one coded-slice NAL unit, emitted
// in POC order downstream of the VPS/SPS/PPS header NALs.

use hevc_core::frame::{Frame, SliceType};
use hevc_core::nal::NalUnitType;
use hevc_core::{Encoder, PipelineConfig};

fn run_gop(num_frames: u64, owf: usize, num_workers: usize) -> Vec<u8> {
  let config = PipelineConfig {
    width: 64,
    height: 64,
    ctu_log2_size: 6,
    min_cu_log2_size: 3,
    owf,
    num_workers,
    qp: 32,
    gop_size: 4,
    frame_rate: 30.0,
    bitrate: 1_000_000.0,
  };
  let mut encoder = Encoder::new(config).unwrap();
  let mut out = Vec::new();

  for poc in 0..num_frames {
    let slice_type = if poc % 4 == 0 { SliceType::I } else { SliceType::P };
    let mut frame = Frame::new(0, slice_type, 64, 64);
    for y in 0..64 {
      for x in 0..64 {
        frame.source[0].pixels[y][x] = ((x + y + poc as usize * 3) % 256) as u8;
      }
    }
    encoder.push_frame(frame).unwrap();
    while let Some(nal) = encoder.pull_nal() {
      nal.write_annex_b(&mut out, true).unwrap();
    }
  }
  for nal in encoder.flush().unwrap() {
    nal.write_annex_b(&mut out, true).unwrap();
  }
  out
}

#[test]
fn encoding_the_same_gop_twice_is_byte_identical() {
  let a = run_gop(6, 2, 3);
  let b = run_gop(6, 2, 3);
  assert_eq!(a, b);
}

#[test]
fn worker_count_does_not_change_the_coded_bitstream() {
  let single_threaded = run_gop(6, 1, 1);
  let multi_threaded = run_gop(6, 2, 4);
  assert_eq!(single_threaded, multi_threaded);
}

#[test]
fn every_pushed_frame_yields_one_trailing_slice_nal() {
  let config = PipelineConfig { width: 64, height: 64, ctu_log2_size: 6, min_cu_log2_size: 3, owf: 1, num_workers: 2, qp: 30, gop_size: 2, frame_rate: 25.0, bitrate: 500_000.0 };
  let mut encoder = Encoder::new(config).unwrap();

  let num_frames = 5u64;
  for poc in 0..num_frames {
    let slice_type = if poc % 2 == 0 { SliceType::I } else { SliceType::P };
    encoder.push_frame(Frame::new(0, slice_type, 64, 64)).unwrap();
  }

  let mut nals = encoder.flush().unwrap();
  while let Some(nal) = encoder.pull_nal() {
    nals.push(nal);
  }

  let slice_nals = nals.iter().filter(|n| n.nal_type == NalUnitType::TrailR || n.nal_type == NalUnitType::IdrWRadl || n.nal_type == NalUnitType::TrailN).count();
  assert_eq!(slice_nals as u64, num_frames);
}
