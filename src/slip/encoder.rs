//! Outbound SLIP framing.
//!
//! The encoder is stateless apart from its flow-control mode: every call to
//! [`Encoder::write_frame`] emits a self-contained wire frame with a leading
//! and a trailing delimiter.

use bytes::BufMut;

use super::{FlowControl, END, ESC};

/// Byte-at-a-time output for the encoder.
///
/// Implementations are plain accumulators. Transmit errors belong to whoever
/// flushes the buffer afterwards, which keeps the stuffing loop infallible.
pub trait ByteSink {
    fn write_byte(&mut self, byte: u8);
}

impl ByteSink for Vec<u8> {
    fn write_byte(&mut self, byte: u8) {
        self.push(byte);
    }
}

impl ByteSink for bytes::BytesMut {
    fn write_byte(&mut self, byte: u8) {
        self.put_u8(byte);
    }
}

/// SLIP frame encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Encoder {
    flow: FlowControl,
}

impl Encoder {
    pub fn new(flow: FlowControl) -> Self {
        Self { flow }
    }

    /// Emit one frame into `sink`: leading END, the stuffed payload, and the
    /// closing END. Returns the number of payload bytes consumed.
    pub fn write_frame<S: ByteSink>(&self, payload: &[u8], sink: &mut S) -> usize {
        sink.write_byte(END);
        for &byte in payload {
            match self.flow.marker_for(byte) {
                Some(marker) => {
                    sink.write_byte(ESC);
                    sink.write_byte(marker);
                }
                None => sink.write_byte(byte),
            }
        }
        sink.write_byte(END);
        payload.len()
    }

    /// Receive-side footprint of `payload`: stuffed bytes plus the sealing
    /// delimiter. A frame fits a reassembly ring of capacity `n` only when
    /// this is at most `n - 1`.
    pub fn wire_len(&self, payload: &[u8]) -> usize {
        let stuffed: usize = payload
            .iter()
            .map(|&b| if self.flow.marker_for(b).is_some() { 2 } else { 1 })
            .sum();
        stuffed + 1
    }
}

/// Encode one frame into a fresh buffer.
pub fn encode_to_vec(payload: &[u8], flow: FlowControl) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    Encoder::new(flow).write_frame(payload, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slip::{ESC_END, ESC_ESC, ESC_XOFF, ESC_XON, XOFF, XON};

    #[test]
    fn plain_payload_is_only_delimited() {
        let wire = encode_to_vec(&[0x41, 0x42, 0x43], FlowControl::None);
        assert_eq!(wire, vec![END, 0x41, 0x42, 0x43, END]);
    }

    #[test]
    fn empty_payload_is_two_delimiters() {
        assert_eq!(encode_to_vec(&[], FlowControl::None), vec![END, END]);
    }

    #[test]
    fn end_and_esc_are_stuffed() {
        let wire = encode_to_vec(&[END, 0x01, ESC], FlowControl::None);
        assert_eq!(wire, vec![END, ESC, ESC_END, 0x01, ESC, ESC_ESC, END]);
    }

    #[test]
    fn flow_bytes_are_stuffed_only_in_xonxoff_mode() {
        let plain = encode_to_vec(&[XON, XOFF], FlowControl::None);
        assert_eq!(plain, vec![END, XON, XOFF, END]);

        let gated = encode_to_vec(&[XON, XOFF], FlowControl::XonXoff);
        assert_eq!(gated, vec![END, ESC, ESC_XON, ESC, ESC_XOFF, END]);
    }

    #[test]
    fn write_frame_reports_payload_length() {
        let mut out = Vec::new();
        let n = Encoder::new(FlowControl::None).write_frame(&[END, END], &mut out);
        assert_eq!(n, 2);
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn wire_len_counts_stuffing_and_seal() {
        let enc = Encoder::new(FlowControl::None);
        assert_eq!(enc.wire_len(&[]), 1);
        assert_eq!(enc.wire_len(&[0x41, 0x42]), 3);
        assert_eq!(enc.wire_len(&[END, ESC]), 5);

        let gated = Encoder::new(FlowControl::XonXoff);
        assert_eq!(gated.wire_len(&[XON]), 3);
    }

    #[test]
    fn bytesmut_sink_matches_vec_sink() {
        let mut vec_out = Vec::new();
        let mut buf_out = bytes::BytesMut::new();
        let enc = Encoder::new(FlowControl::XonXoff);
        enc.write_frame(&[END, XON, 0x7F], &mut vec_out);
        enc.write_frame(&[END, XON, 0x7F], &mut buf_out);
        assert_eq!(vec_out, buf_out.to_vec());
    }
}
