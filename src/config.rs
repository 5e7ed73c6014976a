// Ambient stack: CLI configuration surface, parsed with clap's derive API
// the way the rest of this crate's dependency stack expects configuration
// to be handled.

use clap::Parser;

use crate::error::{EncoderError, Result};
use crate::pipeline::PipelineConfig;

#[derive(Parser, Debug)]
#[command(name = "hevc_core", version, about = "A from-scratch HEVC/H.265 encoder core")]
pub struct Cli {
  /// Raw YUV 4:2:0 8-bit input path ('-' for stdin).
  #[arg(long)]
  pub input: String,

  /// Annex B bitstream output path ('-' for stdout).
  #[arg(long)]
  pub output: String,

  #[arg(long)]
  pub width: usize,

  #[arg(long)]
  pub height: usize,

  /// Quantization parameter, 0-51.
  #[arg(long, default_value_t = 32)]
  pub qp: i32,

  /// log2 of the CTU size (5 = 32, 6 = 64).
  #[arg(long, default_value_t = 6)]
  pub ctu_log2_size: u32,

  /// log2 of the minimum coding unit size.
  #[arg(long, default_value_t = 3)]
  pub min_cu_log2_size: u32,

  /// Frames of output-wait latency the encoder is allowed to buffer.
  #[arg(long, default_value_t = 2)]
  pub owf: usize,

  /// Worker threads in the frame-level pipeline pool.
  #[arg(long, default_value_t = 4)]
  pub threads: usize,

  #[arg(long, default_value_t = 8)]
  pub gop_size: usize,

  #[arg(long, default_value_t = 25.0)]
  pub frame_rate: f64,

  /// Target bitrate in bits/second. 0 disables rate control's bit-budget
  /// feedback and uses a fixed QP instead.
  #[arg(long, default_value_t = 0.0)]
  pub bitrate: f64,

  /// Number of frames to encode; 0 means "until input is exhausted".
  #[arg(long, default_value_t = 0)]
  pub frames: usize,

  /// Increase log verbosity (-v, -vv).
  #[arg(short, long, action = clap::ArgAction::Count)]
  pub verbose: u8,
}

impl Cli {
  pub fn validate(&self) -> Result<()> {
    if self.width == 0 || self.height == 0 {
      return Err(EncoderError::Config("width and height must be non-zero".into()));
    }
    if self.width % 2 != 0 || self.height % 2 != 0 {
      return Err(EncoderError::Config("width and height must be even for 4:2:0 chroma".into()));
    }
    if !(0..=51).contains(&self.qp) {
      return Err(EncoderError::Config(format!("qp {} out of range 0..=51", self.qp)));
    }
    if !(3..=6).contains(&self.ctu_log2_size) {
      return Err(EncoderError::Config(format!("ctu_log2_size {} out of range 3..=6", self.ctu_log2_size)));
    }
    if self.min_cu_log2_size < 2 || self.min_cu_log2_size > self.ctu_log2_size {
      return Err(EncoderError::Config("min_cu_log2_size must be in 2..=ctu_log2_size".into()));
    }
    if self.threads == 0 {
      return Err(EncoderError::Config("threads must be at least 1".into()));
    }
    Ok(())
  }

  pub fn to_pipeline_config(&self) -> PipelineConfig {
    PipelineConfig {
      width: self.width,
      height: self.height,
      ctu_log2_size: self.ctu_log2_size,
      min_cu_log2_size: self.min_cu_log2_size,
      owf: self.owf,
      num_workers: self.threads,
      qp: self.qp,
      gop_size: self.gop_size,
      frame_rate: self.frame_rate,
      bitrate: if self.bitrate > 0.0 { self.bitrate } else { estimate_bitrate_from_qp(self.width, self.height, self.frame_rate, self.qp) },
    }
  }
}

fn estimate_bitrate_from_qp(width: usize, height: usize, frame_rate: f64, qp: i32) -> f64 {
  let bits_per_pixel = 0.5 * 2f64.powf((32 - qp) as f64 / 12.0);
  bits_per_pixel * (width * height) as f64 * frame_rate
}

#[cfg(test)]
mod tests {
  use super::*;

  fn base_cli() -> Cli {
    Cli { input: "-".into(), output: "-".into(), width: 64, height: 64, qp: 32, ctu_log2_size: 6, min_cu_log2_size: 3, owf: 2, threads: 4, gop_size: 8, frame_rate: 25.0, bitrate: 0.0, frames: 0, verbose: 0 }
  }

  #[test]
  fn rejects_odd_dimensions() {
    let mut cli = base_cli();
    cli.width = 65;
    assert!(cli.validate().is_err());
  }

  #[test]
  fn rejects_out_of_range_qp() {
    let mut cli = base_cli();
    cli.qp = 60;
    assert!(cli.validate().is_err());
  }

  #[test]
  fn accepts_defaults() {
    assert!(base_cli().validate().is_ok());
  }
}
