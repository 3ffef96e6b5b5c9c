//! # Serial Link Engine
//!
//! Attaches the SLIP codec to a byte transport and runs it. Three tasks
//! cooperate around the reassembly ring:
//!
//! - The **intake pump** pulls chunks from the byte source, feeds them into
//!   the ring one byte at a time, and obeys the ring's wake hints. On
//!   XON/XOFF links it also intercepts bare flow bytes before they reach the
//!   decoder.
//! - The **drain task** wakes when frames are sealed, pulls every queued
//!   frame, classifies it, and forwards it as a [`LinkEvent`]. Afterwards it
//!   reopens the intake gate, which is how overflow backpressure ends.
//! - The **transmit pump** encodes queued payloads and writes them out,
//!   honoring partial writes and a remote XOFF.
//!
//! [`SerialLink::open`] wires all of this to a real serial device;
//! [`SerialLink::from_parts`] accepts any [`ByteSource`]/[`WireSink`] pair,
//! which is how the tests drive the engine with scripted byte streams.

mod pump;

pub use pump::{ByteSource, WireSink};

use std::sync::Arc;

use log::debug;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::backpressure::FlowGate;
use crate::config::LinkConfig;
use crate::slip::ring::{self, RingStats, StatsHandle};
use crate::slip::Encoder;

use pump::{DrainTask, IntakePump, TransmitPump};

#[cfg(feature = "serial")]
use std::sync::Mutex;
#[cfg(feature = "serial")]
use std::time::Duration;
#[cfg(feature = "serial")]
use serialport::SerialPort;
#[cfg(feature = "serial")]
use tokio::time::sleep;

/// Errors surfaced by the link layer.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No device was configured or passed on the command line.
    #[error("no serial port configured; set link.port or pass --port")]
    NoPort,
    /// The configured device could not be opened.
    #[error("cannot open serial port {port}: {reason}")]
    PortOpen { port: String, reason: String },
    /// Serial port enumeration failed.
    #[error("cannot enumerate serial ports: {reason}")]
    Enumerate { reason: String },
    /// The engine has shut down and no longer accepts work.
    #[error("link is closed")]
    Closed,
}

/// Control messages for the link tasks.
#[derive(Debug)]
pub enum ControlMessage {
    Shutdown,
}

/// What a delivered frame looks like, judged by its content.
///
/// The device side of these links mixes data and chatter on one wire:
/// datagrams, boot banners, debug lines, and command traffic all arrive as
/// SLIP frames and are told apart by their leading byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Command frame addressed to the host (leading `!`).
    Command,
    /// Query frame expecting a host response (leading `?`).
    Query,
    /// Device debug line (leading carriage return).
    DebugLine,
    /// Printable diagnostic text that is none of the above.
    Diagnostic,
    /// IPv4 datagram, by its version/IHL byte.
    Ipv4,
    /// IPv6 datagram, by its version nibble.
    Ipv6,
    /// Anything else.
    Opaque,
}

/// Classify a reassembled frame by its leading byte.
///
/// Text checks run before the datagram checks: the IPv4 and IPv6 leading
/// bytes overlap printable ASCII, and a frame that reads as clean text is
/// overwhelmingly likely to be device chatter rather than a datagram.
pub fn classify(frame: &[u8]) -> FrameKind {
    match frame.first() {
        None => FrameKind::Opaque,
        Some(&b'!') => FrameKind::Command,
        Some(&b'?') => FrameKind::Query,
        Some(&b'\r') => FrameKind::DebugLine,
        Some(_) if looks_textual(frame) => FrameKind::Diagnostic,
        Some(b) if (0x45..=0x4F).contains(b) => FrameKind::Ipv4,
        Some(b) if (0x60..=0x6F).contains(b) => FrameKind::Ipv6,
        Some(_) => FrameKind::Opaque,
    }
}

fn looks_textual(frame: &[u8]) -> bool {
    frame
        .iter()
        .all(|&b| (0x20..=0x7E).contains(&b) || b == b'\r' || b == b'\n' || b == b'\t')
}

/// Events delivered to whoever holds the [`SerialLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A fully reassembled inbound frame.
    Frame { kind: FrameKind, data: Vec<u8> },
    /// The byte source ended; no further frames will arrive after the ones
    /// already in flight.
    SourceClosed,
}

/// Cloneable handle for feeding and steering a running link.
#[derive(Clone)]
pub struct LinkHandle {
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    controls: Vec<mpsc::UnboundedSender<ControlMessage>>,
    intake_gate: FlowGate,
    transmit_gate: FlowGate,
    stats: StatsHandle,
}

impl LinkHandle {
    /// Queue one payload for transmission.
    pub fn send_frame(&self, payload: Vec<u8>) -> Result<(), LinkError> {
        self.outbound_tx
            .send(payload)
            .map_err(|_| LinkError::Closed)
    }

    /// Snapshot of the reassembly counters.
    pub fn stats(&self) -> RingStats {
        self.stats.snapshot()
    }

    /// Whether the peer currently holds our transmitter with XOFF.
    pub fn is_transmit_paused(&self) -> bool {
        self.transmit_gate.is_paused()
    }

    /// Ask every link task to stop. Gates are reopened so a parked task can
    /// observe the signal.
    pub fn shutdown(&self) {
        for control in &self.controls {
            let _ = control.send(ControlMessage::Shutdown);
        }
        self.intake_gate.resume();
        self.transmit_gate.resume();
    }
}

/// A running link: the spawned tasks plus the channels to talk to them.
pub struct SerialLink {
    events: mpsc::UnboundedReceiver<LinkEvent>,
    handle: LinkHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl SerialLink {
    /// Open the configured serial device and start the link tasks.
    #[cfg(feature = "serial")]
    pub async fn open(cfg: &LinkConfig) -> Result<SerialLink, LinkError> {
        if cfg.port.is_empty() {
            return Err(LinkError::NoPort);
        }
        let port = open_shared_port(cfg).await?;
        let source = SerialSource { port: port.clone() };
        let sink = SerialSink { port };
        Ok(SerialLink::from_parts(cfg, source, sink))
    }

    /// Assemble the engine over arbitrary byte transports.
    ///
    /// # Panics
    ///
    /// Panics when `cfg.ring_capacity` is below the ring's minimum; validated
    /// configurations never are.
    pub fn from_parts<S, W>(cfg: &LinkConfig, source: S, sink: W) -> SerialLink
    where
        S: ByteSource + 'static,
        W: WireSink + 'static,
    {
        let (feeder, drain) = ring::bounded(cfg.ring_capacity, cfg.flow_control);
        let stats = drain.stats_handle();
        let wake = Arc::new(Notify::new());
        let intake_gate = FlowGate::new();
        let transmit_gate = FlowGate::new();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (intake_control_tx, intake_control_rx) = mpsc::unbounded_channel();
        let (drain_control_tx, drain_control_rx) = mpsc::unbounded_channel();
        let (transmit_control_tx, transmit_control_rx) = mpsc::unbounded_channel();

        let intake = IntakePump {
            source,
            feeder,
            flow: cfg.flow_control,
            intake_gate: intake_gate.clone(),
            transmit_gate: transmit_gate.clone(),
            wake: wake.clone(),
            events: event_tx.clone(),
            control_rx: intake_control_rx,
        };
        let drain_task = DrainTask {
            drain,
            wake,
            intake_gate: intake_gate.clone(),
            events: event_tx,
            control_rx: drain_control_rx,
        };
        let transmit = TransmitPump {
            sink,
            encoder: Encoder::new(cfg.flow_control),
            flow: cfg.flow_control,
            transmit_gate: transmit_gate.clone(),
            outbound_rx,
            control_rx: transmit_control_rx,
        };

        let tasks = vec![
            tokio::spawn(intake.run()),
            tokio::spawn(drain_task.run()),
            tokio::spawn(transmit.run()),
        ];
        debug!(
            "link tasks started (ring {} bytes, flow {:?})",
            cfg.ring_capacity, cfg.flow_control
        );

        SerialLink {
            events: event_rx,
            handle: LinkHandle {
                outbound_tx,
                controls: vec![intake_control_tx, drain_control_tx, transmit_control_tx],
                intake_gate,
                transmit_gate,
                stats,
            },
            tasks,
        }
    }

    pub fn handle(&self) -> LinkHandle {
        self.handle.clone()
    }

    /// Next link event. `None` once every task has stopped.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.events.recv().await
    }

    pub fn send_frame(&self, payload: Vec<u8>) -> Result<(), LinkError> {
        self.handle.send_frame(payload)
    }

    pub fn stats(&self) -> RingStats {
        self.handle.stats()
    }

    /// Stop the tasks and wait for them to finish.
    pub async fn shutdown(mut self) {
        self.handle.shutdown();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

#[cfg(feature = "serial")]
type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

/// Open the device with OS-level flow control off; XON/XOFF, when enabled,
/// is interpreted by the intake pump instead.
#[cfg(feature = "serial")]
async fn open_shared_port(cfg: &LinkConfig) -> Result<SharedPort, LinkError> {
    debug!("Opening serial port {} at {} baud", cfg.port, cfg.baud_rate);

    let mut builder = serialport::new(cfg.port.as_str(), cfg.baud_rate)
        .timeout(Duration::from_millis(cfg.read_timeout_ms))
        .flow_control(serialport::FlowControl::None);
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);
    }
    let mut port = builder.open().map_err(|e| LinkError::PortOpen {
        port: cfg.port.clone(),
        reason: e.to_string(),
    })?;

    // Toggle DTR/RTS so a sleeping device wakes up.
    let _ = port.write_data_terminal_ready(true);
    let _ = port.write_request_to_send(true);
    sleep(Duration::from_millis(150)).await;

    // Drop whatever the device printed while nobody was listening.
    let mut purge = [0u8; 512];
    if let Ok(available) = port.bytes_to_read() {
        if available > 0 {
            let _ = port.read(&mut purge);
        }
    }

    debug!("Serial port initialized");
    Ok(Arc::new(Mutex::new(port)))
}

/// Names of the serial ports visible to this host.
#[cfg(feature = "serial")]
pub fn list_ports() -> Result<Vec<String>, LinkError> {
    let ports = serialport::available_ports().map_err(|e| LinkError::Enumerate {
        reason: e.to_string(),
    })?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(feature = "serial")]
struct SerialSource {
    port: SharedPort,
}

#[cfg(feature = "serial")]
impl ByteSource for SerialSource {
    fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let result = {
            let mut port = self.port.lock().unwrap();
            port.read(buf)
        };
        match result {
            Ok(n) => Ok(n),
            // Timeout means an idle wire, not a problem.
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }
}

#[cfg(feature = "serial")]
struct SerialSink {
    port: SharedPort,
}

#[cfg(feature = "serial")]
impl WireSink for SerialSink {
    fn write_chunk(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut port = self.port.lock().unwrap();
        port.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut port = self.port.lock().unwrap();
        port.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_spots_datagrams() {
        assert_eq!(classify(&[0x45, 0x00, 0x00, 0x1C]), FrameKind::Ipv4);
        assert_eq!(classify(&[0x60, 0x00, 0x00, 0x00, 0xFF]), FrameKind::Ipv6);
    }

    #[test]
    fn classify_prefers_text_over_datagram_lookalikes() {
        // 'E' and '`' sit inside the IPv4/IPv6 leading-byte ranges.
        assert_eq!(classify(b"ERROR: radio off\n"), FrameKind::Diagnostic);
        assert_eq!(classify(b"`uname` not found"), FrameKind::Diagnostic);
    }

    #[test]
    fn classify_spots_command_traffic() {
        assert_eq!(classify(b"!M\x01\x02\x03\x04\x05\x06\x07\x08"), FrameKind::Command);
        assert_eq!(classify(b"?IPA"), FrameKind::Query);
        assert_eq!(classify(b"\rbooted ok"), FrameKind::DebugLine);
    }

    #[test]
    fn classify_falls_back_to_opaque() {
        assert_eq!(classify(&[]), FrameKind::Opaque);
        assert_eq!(classify(&[0x01, 0x02]), FrameKind::Opaque);
        assert_eq!(classify(&[0x8F, 0x45]), FrameKind::Opaque);
    }
}
