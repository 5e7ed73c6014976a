use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};

use clap::Parser;
use tracing::{error, info};

use hevc_core::config::Cli;
use hevc_core::error::{EncoderError, Result};
use hevc_core::frame::{Frame, SliceType};
use hevc_core::pipeline::Encoder;

fn main() {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  if let Err(err) = run(&cli) {
    error!(%err, "encode failed");
    eprintln!("hevc_core: {err}");
    std::process::exit(exit_code_for(&err));
  }
}

fn init_logging(verbose: u8) {
  let level = match verbose {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };
  let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
  tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Every error is fatal in this one-shot driver: log it, map it to an exit
/// code, and let the process end. There is no retry or partial-output path.
fn exit_code_for(err: &EncoderError) -> i32 {
  match err {
    EncoderError::Config(_) => 2,
    EncoderError::Io(_) => 3,
    EncoderError::Alloc(_) => 4,
    EncoderError::Internal(_) => 70,
  }
}

fn open_input(path: &str) -> Result<Box<dyn Read>> {
  if path == "-" {
    Ok(Box::new(BufReader::new(std::io::stdin())))
  } else {
    Ok(Box::new(BufReader::new(File::open(path)?)))
  }
}

fn open_output(path: &str) -> Result<Box<dyn Write>> {
  if path == "-" {
    Ok(Box::new(BufWriter::new(std::io::stdout())))
  } else {
    Ok(Box::new(BufWriter::new(File::create(path)?)))
  }
}

fn run(cli: &Cli) -> Result<()> {
  cli.validate()?;

  let mut input = open_input(&cli.input)?;
  let mut output = open_output(&cli.output)?;
  let mut encoder = Encoder::new(cli.to_pipeline_config())?;

  let frame_bytes = cli.width * cli.height + 2 * (cli.width / 2) * (cli.height / 2);
  let mut buf = vec![0u8; frame_bytes];
  let mut poc = 0u64;
  let gop_size = cli.gop_size.max(1);

  loop {
    if cli.frames != 0 && poc as usize >= cli.frames {
      break;
    }
    match read_exact_or_eof(&mut input, &mut buf)? {
      false => break,
      true => {}
    }

    let slice_type = if poc % gop_size as u64 == 0 { SliceType::I } else { SliceType::P };
    let frame = frame_from_yuv(&buf, cli.width, cli.height, slice_type);
    encoder.push_frame(frame)?;
    poc += 1;

    while let Some(nal) = encoder.pull_nal() {
      nal.write_annex_b(&mut output, true)?;
    }
  }

  for nal in encoder.flush()? {
    nal.write_annex_b(&mut output, true)?;
  }
  output.flush()?;

  info!(frames = poc, "encode complete");
  Ok(())
}

/// Reads exactly `buf.len()` bytes, returning `Ok(false)` only on a clean
/// EOF at a frame boundary. A partial frame at EOF is a truncated-input
/// error, not a silent stop.
fn read_exact_or_eof<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> Result<bool> {
  let mut filled = 0;
  while filled < buf.len() {
    let n = r.read(&mut buf[filled..])?;
    if n == 0 {
      if filled == 0 {
        return Ok(false);
      }
      return Err(EncoderError::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated frame at end of input")));
    }
    filled += n;
  }
  Ok(true)
}

fn frame_from_yuv(buf: &[u8], width: usize, height: usize, slice_type: SliceType) -> Frame {
  let mut frame = Frame::new(0, slice_type, width, height);

  let y_size = width * height;
  for y in 0..height {
    for x in 0..width {
      frame.source[0].pixels[y][x] = buf[y * width + x];
    }
  }

  let uv_width = width / 2;
  let uv_height = height / 2;
  let u_offset = y_size;
  let v_offset = y_size + uv_width * uv_height;
  for y in 0..uv_height {
    for x in 0..uv_width {
      frame.source[1].pixels[y][x] = buf[u_offset + y * uv_width + x];
      frame.source[2].pixels[y][x] = buf[v_offset + y * uv_width + x];
    }
  }

  frame
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frame_from_yuv_copies_luma_plane() {
    let width = 4;
    let height = 4;
    let mut buf = vec![0u8; width * height + 2 * (width / 2) * (height / 2)];
    for (i, b) in buf.iter_mut().take(width * height).enumerate() {
      *b = i as u8;
    }
    let frame = frame_from_yuv(&buf, width, height, SliceType::I);
    assert_eq!(frame.source[0].pixels[0][0], 0);
    assert_eq!(frame.source[0].pixels[1][0], 4);
  }
}
