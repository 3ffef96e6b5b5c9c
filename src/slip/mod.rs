//! SLIP (RFC 1055) framing: constants, escape mapping, encoder, and the
//! ring-backed reassembly engine.
//!
//! A frame on the wire is the payload with END (0xC0) and ESC (0xDB)
//! byte-stuffed, terminated by a bare END. Encoders here also emit a leading
//! END so a receiver desynchronized by line noise snaps back to a frame
//! boundary at most one delimiter later.
//!
//! The [`XonXoff`](FlowControl::XonXoff) variant additionally stuffs the two
//! software flow-control bytes, so a bare XON or XOFF on the wire is always a
//! pause/resume signal and never payload. Interpreting those signals is the
//! transport's job; the codec only keeps them unambiguous.

pub mod encoder;
pub mod ring;

pub use encoder::{encode_to_vec, ByteSink, Encoder};
pub use ring::{bounded, ByteFeeder, FrameDrain, RingStats, StatsHandle, WakeHint};

use serde::{Deserialize, Serialize};

/// Frame delimiter.
pub const END: u8 = 0xC0;
/// Escape introducer; the next byte names the escaped value.
pub const ESC: u8 = 0xDB;
/// Escaped stand-in for a payload END.
pub const ESC_END: u8 = 0xDC;
/// Escaped stand-in for a payload ESC.
pub const ESC_ESC: u8 = 0xDD;
/// Escaped stand-in for a payload XON (flow-control links only).
pub const ESC_XON: u8 = 0xDE;
/// Escaped stand-in for a payload XOFF (flow-control links only).
pub const ESC_XOFF: u8 = 0xDF;
/// Software flow control: resume transmission (DC1).
pub const XON: u8 = 0x11;
/// Software flow control: pause transmission (DC3).
pub const XOFF: u8 = 0x13;

/// Whether the link reserves XON/XOFF for in-band flow control.
///
/// Both ends must agree on this; a mismatch makes payload 0x11/0x13 bytes
/// look like flow commands to the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowControl {
    /// Plain RFC 1055: only END and ESC are stuffed.
    #[default]
    None,
    /// END, ESC, XON, and XOFF are stuffed; bare XON/XOFF steer the sender.
    XonXoff,
}

impl FlowControl {
    /// The escape marker for `byte`, or `None` when it rides the wire as-is.
    pub fn marker_for(self, byte: u8) -> Option<u8> {
        match byte {
            END => Some(ESC_END),
            ESC => Some(ESC_ESC),
            XON if self == FlowControl::XonXoff => Some(ESC_XON),
            XOFF if self == FlowControl::XonXoff => Some(ESC_XOFF),
            _ => None,
        }
    }

    /// The payload byte an escape marker stands for, or `None` when the
    /// marker is not valid after ESC in this mode.
    pub fn resolve(self, marker: u8) -> Option<u8> {
        match marker {
            ESC_END => Some(END),
            ESC_ESC => Some(ESC),
            ESC_XON if self == FlowControl::XonXoff => Some(XON),
            ESC_XOFF if self == FlowControl::XonXoff => Some(XOFF),
            _ => None,
        }
    }

    /// Whether `byte` is a bare flow-control signal in this mode.
    pub fn is_flow_signal(self, byte: u8) -> bool {
        self == FlowControl::XonXoff && (byte == XON || byte == XOFF)
    }
}
