//! # Sliplink - SLIP Framing and Serial Link Engine
//!
//! Sliplink speaks SLIP (RFC 1055) over serial attachments to embedded
//! network nodes. Outbound payloads are byte-stuffed and delimited for the
//! wire; inbound bytes are reassembled into frames through a fixed-capacity
//! ring that a byte-level producer and a frame-level consumer share without
//! locking each other out.
//!
//! ## Features
//!
//! - **RFC 1055 codec**: END/ESC byte stuffing, with an optional XON/XOFF
//!   variant that keeps the two software flow-control bytes out of band.
//! - **Lock-free reassembly**: A single-producer single-consumer ring with
//!   read, seal, and write cursors. The producer never waits on the consumer;
//!   the consumer only ever sees fully delimited frames.
//! - **Backpressure**: Ring exhaustion pauses intake instead of corrupting
//!   frames, and a remote XOFF pauses the transmitter until XON.
//! - **Frame classification**: Delivered frames are tagged as IPv4/IPv6
//!   datagrams, device debug lines, printable diagnostics, or opaque data.
//! - **Async Design**: Built with Tokio; intake, drain, and transmit run as
//!   cooperating tasks joined by channels and wake notifications.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sliplink::config::Config;
//! use sliplink::link::{LinkEvent, SerialLink};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load configuration
//!     let config = Config::load("config.toml").await?;
//!
//!     // Open the serial device and start the link tasks
//!     let mut link = SerialLink::open(&config.link).await?;
//!     while let Some(event) = link.recv().await {
//!         match event {
//!             LinkEvent::Frame { kind, data } => {
//!                 println!("{:?}: {} bytes", kind, data.len());
//!             }
//!             LinkEvent::SourceClosed => break,
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`slip`] - Frame encoder plus the ring-backed reassembly engine
//! - [`link`] - Serial attachment, pump tasks, and frame classification
//! - [`backpressure`] - Pause/resume gates tying buffer state to byte flow
//! - [`config`] - Configuration management and validation
//! - [`logutil`] - Log sanitation helpers for device output
//!
//! ## Architecture
//!
//! ```text
//! serial bytes ──► ┌─────────────┐ feed_byte ┌──────────────┐
//!                  │ intake task │ ────────► │ ring buffer  │
//!                  └─────────────┘           │ read/seal/   │
//!                        ▲ pause/resume      │ write        │
//!                  ┌─────┴───────┐ drain     └──────────────┘
//!                  │ drain task  │ ◄────────────────┘
//!                  └─────────────┘ ──► LinkEvent channel
//!
//!                  ┌──────────────┐ encode ┌────────────┐
//! payloads ──────► │ transmit task│ ─────► │ wire bytes │
//!                  └──────────────┘        └────────────┘
//!                        ▲ XON/XOFF gate
//! ```

pub mod backpressure;
pub mod config;
pub mod link;
pub mod logutil;
pub mod slip;
