// C2: CABAC entropy coder.
//
// Context-adaptive binary arithmetic coding with renormalization, carry
// propagation and byte-stuffing. The tables below (LPS range, renormalization
// shift, and the MPS/LPS state-transition tables) are the standard
// table-driven CABAC constants kvazaar's `cabac.c`/`cabac.h` use; they are
// process-wide immutable data rather than module-level mutable globals.

use crate::bitstream::BitstreamSink;
use crate::context::ContextModel;

#[rustfmt::skip]
pub static RANGE_TAB_LPS: [[u16; 4]; 64] = [
  [128, 176, 208, 240], [128, 167, 197, 227], [128, 158, 187, 216], [123, 150, 178, 205],
  [116, 142, 169, 195], [111, 135, 160, 185], [105, 128, 152, 175], [100, 122, 144, 166],
  [ 95, 116, 137, 158], [ 90, 110, 130, 150], [ 85, 104, 123, 142], [ 81,  99, 117, 135],
  [ 77,  94, 111, 128], [ 73,  89, 105, 122], [ 69,  85, 100, 116], [ 66,  80,  95, 110],
  [ 62,  76,  90, 104], [ 59,  72,  86,  99], [ 56,  69,  81,  94], [ 53,  65,  77,  89],
  [ 51,  62,  73,  85], [ 48,  59,  69,  80], [ 46,  56,  66,  76], [ 43,  53,  63,  72],
  [ 41,  50,  59,  69], [ 39,  48,  56,  65], [ 37,  45,  54,  62], [ 35,  43,  51,  59],
  [ 33,  41,  48,  56], [ 32,  39,  46,  53], [ 30,  37,  43,  50], [ 28,  35,  41,  48],
  [ 27,  33,  39,  45], [ 26,  31,  37,  43], [ 24,  30,  35,  41], [ 23,  28,  33,  39],
  [ 22,  27,  32,  37], [ 21,  26,  30,  35], [ 20,  24,  29,  33], [ 19,  23,  27,  31],
  [ 18,  22,  26,  30], [ 17,  21,  25,  28], [ 16,  20,  23,  27], [ 15,  19,  22,  25],
  [ 14,  18,  21,  24], [ 14,  17,  20,  23], [ 13,  16,  19,  22], [ 12,  15,  18,  21],
  [ 12,  14,  17,  20], [ 11,  14,  16,  19], [ 11,  13,  15,  18], [ 10,  12,  15,  17],
  [ 10,  12,  14,  16], [  9,  11,  13,  15], [  9,  11,  12,  14], [  8,  10,  12,  14],
  [  8,   9,  11,  13], [  7,   9,  11,  12], [  7,   9,  10,  12], [  7,   8,  10,  11],
  [  6,   8,   9,  11], [  6,   7,   9,  10], [  6,   7,   8,   9], [  2,   2,   2,   2],
];

#[rustfmt::skip]
pub static RENORM_TABLE: [u8; 32] = [
  6, 5, 4, 4, 3, 3, 3, 3, 2, 2, 2, 2, 2, 2, 2, 2,
  1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
];

#[rustfmt::skip]
pub static NEXT_STATE_MPS: [u8; 64] = [
   1,  2,  3,  4,  5,  6,  7,  8,  9, 10, 11, 12, 13, 14, 15, 16,
  17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32,
  33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48,
  49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 62, 63,
];

#[rustfmt::skip]
pub static NEXT_STATE_LPS: [u8; 64] = [
   0,  0,  1,  2,  2,  4,  4,  5,  6,  7,  8,  9,  9, 11, 11, 12,
  13, 13, 15, 15, 16, 16, 18, 18, 19, 19, 21, 21, 23, 22, 23, 24,
  24, 25, 26, 26, 27, 27, 28, 29, 29, 30, 30, 30, 31, 32, 32, 33,
  33, 33, 34, 34, 35, 35, 35, 36, 36, 36, 37, 37, 37, 38, 38, 63,
];

pub struct CabacEncoder {
  low: u32,
  range: u32,
  bits_left: i32,
  buffered_byte: u8,
  num_buffered: u32,
}

impl CabacEncoder {
  pub fn new() -> Self {
    Self { low: 0, range: 510, bits_left: 23, buffered_byte: 0xff, num_buffered: 0 }
  }

  pub fn range(&self) -> u32 {
    self.range
  }

  /// Encode a regular (context-coded) bin.
  pub fn encode_bin(&mut self, sink: &mut BitstreamSink, ctx: &mut ContextModel, bin: u32) {
    let state = ctx.state() as usize;
    let mps = ctx.mps() as u32;
    let lps = RANGE_TAB_LPS[state][((self.range >> 6) & 3) as usize] as u32;
    self.range -= lps;

    if bin != mps {
      let num_bits = RENORM_TABLE[(lps as usize) >> 3] as i32;
      self.low = self.low.wrapping_add(self.range) << num_bits;
      self.range = lps << num_bits;
      let new_mps = if state == 0 { (1 - mps) as u8 } else { mps as u8 };
      *ctx = ContextModel((NEXT_STATE_LPS[state] << 1) | new_mps);
      self.bits_left -= num_bits;
    } else {
      *ctx = ContextModel((NEXT_STATE_MPS[state] << 1) | mps as u8);
      if self.range < 256 {
        self.low <<= 1;
        self.range <<= 1;
        self.bits_left -= 1;
      }
    }

    debug_assert!((256..=510).contains(&self.range));

    if self.bits_left < 12 {
      self.write(sink);
    }
  }

  /// Encode a bypass (equiprobable) bin.
  pub fn encode_bin_ep(&mut self, sink: &mut BitstreamSink, bin: u32) {
    self.low <<= 1;
    if bin != 0 {
      self.low = self.low.wrapping_add(self.range);
    }
    self.bits_left -= 1;

    if self.bits_left < 12 {
      self.write(sink);
    }
  }

  /// Encode the low `n` bits of `value` (MSB first) as bypass bins, `n <= 32`.
  pub fn encode_bins_ep(&mut self, sink: &mut BitstreamSink, value: u32, n: u32) {
    assert!(n <= 32);
    for i in (0..n).rev() {
      self.encode_bin_ep(sink, (value >> i) & 1);
    }
  }

  /// Encode a terminating bin (`end_of_slice_segment_flag`, `end_of_sub_stream_one_bit`, PCM flag).
  pub fn encode_bin_trm(&mut self, sink: &mut BitstreamSink, bin: u32) {
    self.range -= 2;
    if bin != 0 {
      self.low = self.low.wrapping_add(self.range) << 7;
      self.range = 2 << 7;
      self.bits_left -= 7;
    } else if self.range < 256 {
      self.low <<= 1;
      self.range <<= 1;
      self.bits_left -= 1;
    }

    if self.bits_left < 12 {
      self.write(sink);
    }
  }

  fn write(&mut self, sink: &mut BitstreamSink) {
    let lead_byte = self.low >> (24 - self.bits_left);
    self.bits_left += 8;
    self.low &= 0xffff_ffffu32 >> self.bits_left;

    if lead_byte == 0xff {
      self.num_buffered += 1;
    } else {
      if self.num_buffered > 0 {
        let carry = (lead_byte >> 8) as u8;
        sink.put_byte(self.buffered_byte.wrapping_add(carry));
        let filler = 0xffu8.wrapping_add(carry);
        for _ in 1..self.num_buffered {
          sink.put_byte(filler);
        }
      }
      self.num_buffered = 1;
      self.buffered_byte = (lead_byte & 0xff) as u8;
    }
  }

  /// Flush any residual low bits with carry resolution identical to `write`.
  /// Does not emit the `end_of_slice_segment_flag` terminating bin or RBSP
  /// trailing bits — that is a syntax-level concern handled by the caller.
  pub fn finish(&mut self, sink: &mut BitstreamSink) {
    let carry_out = (self.low >> (32 - self.bits_left).min(31)) != 0;

    if carry_out {
      sink.put_byte(self.buffered_byte.wrapping_add(1));
      for _ in 1..self.num_buffered {
        sink.put_byte(0);
      }
    } else {
      if self.num_buffered > 0 {
        sink.put_byte(self.buffered_byte);
      }
      for _ in 1..self.num_buffered {
        sink.put_byte(0xff);
      }
    }

    let remaining_bits = 24 - self.bits_left;
    if remaining_bits > 0 {
      sink.put((self.low >> 8) as u64, remaining_bits as u32);
    }

    self.num_buffered = 0;
  }
}

impl Default for CabacEncoder {
  fn default() -> Self {
    Self::new()
  }
}

/// A minimal CABAC decoder used only by the test suite to verify that the
/// encoder's bin sequences round-trip; the encoder core never decodes.
#[cfg(test)]
pub struct CabacDecoder<'a> {
  bytes: &'a [u8],
  pos: usize,
  value: u32,
  range: u32,
  bits_needed: i32,
}

#[cfg(test)]
impl<'a> CabacDecoder<'a> {
  pub fn new(bytes: &'a [u8]) -> Self {
    let mut d = Self { bytes, pos: 0, value: 0, range: 510, bits_needed: 8 };
    // Prime with 9 bits (matches the encoder's bits_left=23 <=> 32-23=9 "already valid" bits)
    d.value = (d.next_byte() as u32) << 8;
    d.value |= d.next_byte() as u32;
    d.bits_needed = -8;
    d
  }

  fn next_byte(&mut self) -> u8 {
    let b = self.bytes.get(self.pos).copied().unwrap_or(0xff);
    self.pos += 1;
    b
  }

  pub fn decode_bin(&mut self, ctx: &mut ContextModel) -> u32 {
    let state = ctx.state() as usize;
    let mps = ctx.mps() as u32;
    let lps = RANGE_TAB_LPS[state][((self.range >> 6) & 3) as usize] as u32;
    self.range -= lps;

    let scaled_range = self.range << 7;
    let bin;
    if self.value < scaled_range {
      bin = mps;
      *ctx = ContextModel((NEXT_STATE_MPS[state] << 1) | mps as u8);
      if scaled_range < (256 << 7) {
        self.range = scaled_range >> 6;
        self.value <<= 1;
        self.bits_needed += 1;
        if self.bits_needed == 0 {
          self.bits_needed = -8;
          self.value += self.next_byte() as u32;
        }
      } else {
        self.range = scaled_range >> 7;
      }
    } else {
      bin = 1 - mps;
      self.value -= scaled_range;
      let new_mps = if state == 0 { (1 - mps) as u8 } else { mps as u8 };
      *ctx = ContextModel((NEXT_STATE_LPS[state] << 1) | new_mps);
      let num_bits = RENORM_TABLE[(lps as usize) >> 3] as i32;
      self.range = lps << num_bits;
      self.value <<= num_bits;
      self.bits_needed += num_bits;
      while self.bits_needed >= 0 {
        self.value += (self.next_byte() as u32) << self.bits_needed;
        self.bits_needed -= 8;
      }
    }

    bin
  }

  pub fn decode_bin_ep(&mut self) -> u32 {
    self.value <<= 1;
    self.bits_needed += 1;
    if self.bits_needed >= 0 {
      self.bits_needed = -8;
      self.value += self.next_byte() as u32;
    }

    let scaled_range = self.range << 7;
    if self.value >= scaled_range {
      self.value -= scaled_range;
      1
    } else {
      0
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::ContextModel;

  #[test]
  fn range_stays_in_bounds_through_a_burst_of_bins() {
    let mut enc = CabacEncoder::new();
    let mut sink = BitstreamSink::new();
    let mut ctx = ContextModel::new(32, 154);

    let bins = [0u32, 1, 1, 0, 0, 0, 1, 1, 1, 0, 1, 0, 0, 1, 1, 0, 1, 1, 1, 0];
    for &b in &bins {
      enc.encode_bin(&mut sink, &mut ctx, b);
      assert!((256..=510).contains(&enc.range()));
    }
  }

  #[test]
  fn bypass_roundtrip() {
    let mut enc = CabacEncoder::new();
    let mut sink = BitstreamSink::new();
    let mut ctx = ContextModel::new(30, 154);

    // Prime the coder with a couple of regular bins so the bypass section
    // isn't the very first thing encoded (more representative of real use).
    enc.encode_bin(&mut sink, &mut ctx, 0);
    enc.encode_bin(&mut sink, &mut ctx, 1);
    enc.encode_bins_ep(&mut sink, 0b1011_0110, 8);
    enc.encode_bin_trm(&mut sink, 1);
    enc.finish(&mut sink);

    let chunks = sink.take_chunks();
    let bytes: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();

    let mut dec = CabacDecoder::new(&bytes);
    let mut dctx = ContextModel::new(30, 154);
    assert_eq!(dec.decode_bin(&mut dctx), 0);
    assert_eq!(dec.decode_bin(&mut dctx), 1);

    let mut value = 0u32;
    for _ in 0..8 {
      value = (value << 1) | dec.decode_bin_ep();
    }
    assert_eq!(value, 0b1011_0110);
  }
}
