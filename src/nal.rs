// NAL unit framing: the byte-stream emission contract consumed by C2's
// output and produced by C10. Packaging beyond this contract (muxing into a
// container format) is out of scope.

use std::sync::Arc;

use crate::bitstream::BitstreamSink;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NalUnitType {
  TrailN = 0,
  TrailR = 1,
  IdrWRadl = 19,
  Vps = 32,
  Sps = 33,
  Pps = 34,
  Aud = 35,
}

pub struct NalUnit {
  pub nal_type: NalUnitType,
  pub temporal_id_plus1: u8,
  pub payload: Vec<Arc<[u8]>>,
}

impl NalUnit {
  pub fn new(nal_type: NalUnitType, payload: Vec<Arc<[u8]>>) -> Self {
    Self { nal_type, temporal_id_plus1: 1, payload }
  }

  /// Writes this NAL unit as an Annex B byte-stream element: a start code,
  /// a two-byte NAL unit header, then the (already emulation-prevented)
  /// payload chunks.
  pub fn write_annex_b<W: std::io::Write>(&self, w: &mut W, long_start_code: bool) -> std::io::Result<()> {
    if long_start_code {
      w.write_all(&[0x00, 0x00, 0x00, 0x01])?;
    } else {
      w.write_all(&[0x00, 0x00, 0x01])?;
    }

    let mut header = BitstreamSink::new();
    header.put_bit(0); // forbidden_zero_bit
    header.put(self.nal_type as u64, 6);
    header.put(0, 6); // nuh_layer_id
    header.put(self.temporal_id_plus1 as u64, 3);
    for chunk in header.take_chunks() {
      w.write_all(&chunk)?;
    }

    for chunk in &self.payload {
      w.write_all(chunk)?;
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn header_encodes_nal_type_in_bits_1_to_6() {
    let nal = NalUnit::new(NalUnitType::Sps, vec![Arc::from(vec![0xAB, 0xCD].into_boxed_slice())]);
    let mut out = Vec::new();
    nal.write_annex_b(&mut out, true).unwrap();
    assert_eq!(&out[0..4], &[0x00, 0x00, 0x00, 0x01]);
    // Byte 4 = header byte 0: 0 (forbidden) | nal_type (6 bits) | top bit of layer id
    assert_eq!(out[4] >> 1, NalUnitType::Sps as u8);
    assert_eq!(&out[6..], &[0xAB, 0xCD]);
  }
}
