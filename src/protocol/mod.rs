//! Application protocol implementation.
//!
//! This module handles:
//! - Framing of outbound text commands
//! - Decoding of inbound telemetry payloads

pub mod framing;
pub mod telemetry;

pub use framing::{encode_frame, FRAME_END, FRAME_START};
pub use telemetry::{decode_samples, Telemetry, TelemetryMode, TelemetryPacket};
