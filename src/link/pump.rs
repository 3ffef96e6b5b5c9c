//! The three tasks that run a link: byte intake, frame drain, and transmit.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use log::{debug, trace, warn};
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::time::sleep;

use crate::backpressure::FlowGate;
use crate::logutil::{hex_snippet, text_preview};
use crate::slip::ring::{ByteFeeder, FrameDrain, WakeHint};
use crate::slip::{Encoder, FlowControl, XOFF, XON};

use super::{classify, ControlMessage, FrameKind, LinkEvent};

/// Blocking byte intake.
///
/// `Ok(0)` means the poll window elapsed with nothing to read. A source that
/// is genuinely finished returns `ErrorKind::UnexpectedEof`, which stops the
/// intake pump; any other error is logged and retried.
pub trait ByteSource: Send {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Blocking byte output. Partial writes are expected; the transmit pump
/// keeps going until the frame is fully on the wire.
pub trait WireSink: Send {
    fn write_chunk(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

const READ_CHUNK: usize = 512;

/// Consecutive stalled writes tolerated before a frame is given up on.
const MAX_WRITE_STALLS: u32 = 500;

pub(crate) struct IntakePump<S> {
    pub(crate) source: S,
    pub(crate) feeder: ByteFeeder,
    pub(crate) flow: FlowControl,
    pub(crate) intake_gate: FlowGate,
    pub(crate) transmit_gate: FlowGate,
    pub(crate) wake: Arc<Notify>,
    pub(crate) events: mpsc::UnboundedSender<LinkEvent>,
    pub(crate) control_rx: mpsc::UnboundedReceiver<ControlMessage>,
}

impl<S: ByteSource> IntakePump<S> {
    pub(crate) async fn run(mut self) {
        debug!("intake pump started");
        let mut chunk = [0u8; READ_CHUNK];
        let mut poll = tokio::time::interval(Duration::from_millis(10));

        loop {
            tokio::select! {
                msg = self.control_rx.recv() => {
                    match msg {
                        Some(ControlMessage::Shutdown) | None => {
                            debug!("intake pump received shutdown");
                            break;
                        }
                    }
                }
                _ = poll.tick() => {
                    match self.source.read_chunk(&mut chunk) {
                        Ok(0) => {}
                        Ok(n) => {
                            trace!("rx {} bytes: {}", n, hex_snippet(&chunk[..n], 48));
                            self.feed(&chunk[..n]).await;
                        }
                        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                            debug!("byte source reached end of stream");
                            break;
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                            debug!("byte source interrupted, stopping intake");
                            break;
                        }
                        Err(e) => {
                            warn!("read error (continuing): {}", e);
                            sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }

        // Let the drain task flush stragglers, then tell the listener that
        // no more bytes are coming.
        self.wake.notify_one();
        let _ = self.events.send(LinkEvent::SourceClosed);
        debug!("intake pump stopped");
    }

    /// Feed one received chunk into the ring, honoring wake hints.
    ///
    /// On `BufferFull` the pump parks on the intake gate with the rest of
    /// the chunk in hand; the drain task reopens the gate once it has freed
    /// space, and feeding resumes where it stopped.
    async fn feed(&mut self, bytes: &[u8]) {
        for (i, &byte) in bytes.iter().enumerate() {
            if self.flow.is_flow_signal(byte) {
                if byte == XOFF {
                    debug!("peer sent XOFF, pausing transmit");
                    self.transmit_gate.pause();
                } else if byte == XON {
                    debug!("peer sent XON, resuming transmit");
                    self.transmit_gate.resume();
                }
                continue;
            }
            match self.feeder.feed_byte(byte) {
                WakeHint::None => {}
                WakeHint::FrameSealed => {
                    self.wake.notify_one();
                }
                WakeHint::BufferFull => {
                    debug!(
                        "ring full at byte {}/{}, pausing intake (stats: {:?})",
                        i + 1,
                        bytes.len(),
                        self.feeder.stats()
                    );
                    self.intake_gate.pause();
                    self.wake.notify_one();
                    self.intake_gate.ready().await;
                }
            }
        }
    }
}

pub(crate) struct DrainTask {
    pub(crate) drain: FrameDrain,
    pub(crate) wake: Arc<Notify>,
    pub(crate) intake_gate: FlowGate,
    pub(crate) events: mpsc::UnboundedSender<LinkEvent>,
    pub(crate) control_rx: mpsc::UnboundedReceiver<ControlMessage>,
}

impl DrainTask {
    pub(crate) async fn run(mut self) {
        debug!("drain task started");
        // Any payload fits: it is never larger than its wire footprint,
        // which the ring itself caps.
        let mut frame = vec![0u8; self.drain.capacity()];

        loop {
            tokio::select! {
                msg = self.control_rx.recv() => {
                    match msg {
                        Some(ControlMessage::Shutdown) | None => {
                            debug!("drain task received shutdown");
                            break;
                        }
                    }
                }
                _ = self.wake.notified() => {
                    if !self.drain_all(&mut frame) {
                        break;
                    }
                }
            }
        }
        debug!("drain task stopped");
    }

    /// Pull every queued frame, then reopen the intake gate. Returns false
    /// once nobody is listening for events anymore.
    fn drain_all(&mut self, frame: &mut [u8]) -> bool {
        loop {
            let n = self.drain.drain_frame(frame);
            if n == 0 {
                break;
            }
            let data = frame[..n].to_vec();
            let kind = classify(&data);
            match kind {
                FrameKind::DebugLine => trace!("device: {}", text_preview(&data[1..])),
                FrameKind::Diagnostic => trace!("device: {}", text_preview(&data)),
                _ => trace!("frame {:?}: {} bytes", kind, n),
            }
            if self.events.send(LinkEvent::Frame { kind, data }).is_err() {
                return false;
            }
        }
        self.intake_gate.resume();
        true
    }
}

pub(crate) struct TransmitPump<W> {
    pub(crate) sink: W,
    pub(crate) encoder: Encoder,
    pub(crate) flow: FlowControl,
    pub(crate) transmit_gate: FlowGate,
    pub(crate) outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pub(crate) control_rx: mpsc::UnboundedReceiver<ControlMessage>,
}

impl<W: WireSink> TransmitPump<W> {
    pub(crate) async fn run(mut self) {
        debug!("transmit pump started");
        let mut wire = BytesMut::with_capacity(1024);

        loop {
            tokio::select! {
                msg = self.control_rx.recv() => {
                    match msg {
                        Some(ControlMessage::Shutdown) | None => {
                            debug!("transmit pump received shutdown");
                            break;
                        }
                    }
                }
                payload = self.outbound_rx.recv() => {
                    let Some(payload) = payload else { break };
                    if self.flow == FlowControl::XonXoff && self.transmit_gate.is_paused() {
                        debug!("transmit held by XOFF ({} bytes waiting)", payload.len());
                        self.transmit_gate.ready().await;
                    }
                    wire.clear();
                    self.encoder.write_frame(&payload, &mut wire);
                    trace!("tx frame: {} payload bytes, {} on the wire", payload.len(), wire.len());
                    if let Err(e) = flush_wire(&mut self.sink, &mut wire).await {
                        warn!("write failed, dropping frame: {}", e);
                        sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        }
        debug!("transmit pump stopped");
    }
}

/// Push the buffered wire bytes out, riding over partial writes and brief
/// stalls.
async fn flush_wire<W: WireSink>(sink: &mut W, wire: &mut BytesMut) -> io::Result<()> {
    let mut stalls = 0u32;
    while !wire.is_empty() {
        match sink.write_chunk(&wire[..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "sink accepted no bytes",
                ));
            }
            Ok(n) => {
                wire.advance(n);
                stalls = 0;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                stalls += 1;
                if stalls > MAX_WRITE_STALLS {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "sink stalled"));
                }
                sleep(Duration::from_millis(2)).await;
            }
            Err(e) => return Err(e),
        }
    }
    sink.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Sink that accepts a scripted number of bytes per call.
    struct ChunkySink {
        script: VecDeque<io::Result<usize>>,
        written: Vec<u8>,
        flushed: bool,
    }

    impl ChunkySink {
        fn new(script: Vec<io::Result<usize>>) -> Self {
            ChunkySink {
                script: script.into(),
                written: Vec::new(),
                flushed: false,
            }
        }
    }

    impl WireSink for ChunkySink {
        fn write_chunk(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.script.pop_front() {
                Some(Ok(n)) => {
                    let n = n.min(buf.len());
                    self.written.extend_from_slice(&buf[..n]);
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => {
                    self.written.extend_from_slice(buf);
                    Ok(buf.len())
                }
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushed = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn flush_wire_rides_over_partial_writes() {
        let mut sink = ChunkySink::new(vec![Ok(2), Ok(1), Ok(16)]);
        let mut wire = BytesMut::from(&[0xC0, 0x01, 0x02, 0x03, 0xC0][..]);
        flush_wire(&mut sink, &mut wire).await.unwrap();
        assert_eq!(sink.written, vec![0xC0, 0x01, 0x02, 0x03, 0xC0]);
        assert!(sink.flushed);
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn flush_wire_retries_interrupted_and_stalled_writes() {
        let mut sink = ChunkySink::new(vec![
            Err(io::Error::new(io::ErrorKind::Interrupted, "eintr")),
            Ok(3),
            Err(io::Error::new(io::ErrorKind::WouldBlock, "queue full")),
            Ok(2),
        ]);
        let mut wire = BytesMut::from(&[1, 2, 3, 4, 5][..]);
        flush_wire(&mut sink, &mut wire).await.unwrap();
        assert_eq!(sink.written, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn flush_wire_gives_up_on_dead_sink() {
        let mut sink = ChunkySink::new(vec![Ok(0)]);
        let mut wire = BytesMut::from(&[1, 2, 3][..]);
        let err = flush_wire(&mut sink, &mut wire).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }

    #[tokio::test]
    async fn flush_wire_propagates_hard_errors() {
        let mut sink = ChunkySink::new(vec![
            Ok(1),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")),
        ]);
        let mut wire = BytesMut::from(&[9, 9][..]);
        let err = flush_wire(&mut sink, &mut wire).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(sink.written, vec![9]);
    }
}
