//! Inbound telemetry decoding.
//!
//! RX payloads are laid out as:
//! - Byte 0: sequence/framing byte (not part of the samples)
//! - Bytes 1..: signed 16-bit samples, big-endian
//!
//! A trailing odd byte does not form a sample and is dropped. Payloads shorter
//! than 3 bytes carry no samples.

use tracing::trace;

/// Offset of the first sample byte.
const SAMPLE_OFFSET: usize = 1;

/// Minimum payload length carrying at least one sample.
const MIN_SAMPLE_PAYLOAD: usize = SAMPLE_OFFSET + 2;

/// How RX payloads are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TelemetryMode {
    /// Payload is text.
    #[default]
    Text,
    /// One sample per reading.
    Scalar,
    /// Three samples (x, y, z) per reading.
    Triaxial,
}

impl TelemetryMode {
    /// Parse a mode name as typed by a user.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "scalar" | "int" | "int16" => Some(Self::Scalar),
            "triaxial" | "xyz" | "3axis" => Some(Self::Triaxial),
            _ => None,
        }
    }
}

/// A telemetry payload split into header and samples.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TelemetryPacket {
    /// The leading sequence byte.
    pub sequence: u8,
    /// Decoded samples.
    pub values: Vec<i16>,
}

impl TelemetryPacket {
    /// Split a payload into its sequence byte and samples.
    ///
    /// Returns `None` for an empty payload.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let sequence = *payload.first()?;
        Some(Self {
            sequence,
            values: decode_samples(payload),
        })
    }

    /// Group the samples into (x, y, z) triples; an incomplete triple is dropped.
    pub fn triples(&self) -> Vec<[i16; 3]> {
        self.values
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect()
    }
}

/// A decoded RX payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Telemetry {
    /// Text rendering of the payload.
    Text(String),
    /// Scalar samples.
    Scalar(Vec<i16>),
    /// Three-axis samples.
    Triaxial(Vec<[i16; 3]>),
}

impl Telemetry {
    /// Decode a payload according to `mode`.
    pub fn decode(mode: TelemetryMode, payload: &[u8]) -> Self {
        match mode {
            TelemetryMode::Text => Self::Text(String::from_utf8_lossy(payload).into_owned()),
            TelemetryMode::Scalar => Self::Scalar(decode_samples(payload)),
            TelemetryMode::Triaxial => Self::Triaxial(
                TelemetryPacket::parse(payload)
                    .map(|p| p.triples())
                    .unwrap_or_default(),
            ),
        }
    }

    /// Number of readings (characters for text).
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.chars().count(),
            Self::Scalar(values) => values.len(),
            Self::Triaxial(values) => values.len(),
        }
    }

    /// Check if nothing was decoded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode the big-endian `i16` samples of a payload, skipping the sequence byte.
///
/// # Example
///
/// ```
/// use ble_telemetry_link::protocol::decode_samples;
///
/// assert_eq!(decode_samples(&[0xFF, 0x00, 0x0A, 0x00, 0x14]), vec![10, 20]);
/// ```
pub fn decode_samples(payload: &[u8]) -> Vec<i16> {
    if payload.len() < MIN_SAMPLE_PAYLOAD {
        trace!("Payload too short for samples: {} bytes", payload.len());
        return Vec::new();
    }

    payload[SAMPLE_OFFSET..]
        .chunks_exact(2)
        .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}
