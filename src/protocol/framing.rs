//! Outbound message framing.
//!
//! Every message written to the TX characteristic is framed as
//! `[0x01][UTF-8 bytes][0x0D]`.

/// Start-of-frame byte.
pub const FRAME_START: u8 = 0x01;

/// End-of-frame byte (carriage return).
pub const FRAME_END: u8 = 0x0D;

/// Frame a text message for the TX characteristic.
///
/// # Example
///
/// ```
/// use ble_telemetry_link::protocol::encode_frame;
///
/// assert_eq!(encode_frame("Live"), vec![0x01, 0x4C, 0x69, 0x76, 0x65, 0x0D]);
/// ```
pub fn encode_frame(message: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(message.len() + 2);
    frame.push(FRAME_START);
    frame.extend_from_slice(message.as_bytes());
    frame.push(FRAME_END);
    frame
}
