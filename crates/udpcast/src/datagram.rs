// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datagram records handed to the presentation layer.
//!
//! A [`Datagram`] is produced by the receive loop and consumed exactly once
//! by the datagram handler, then discarded - nothing is persisted. The
//! [`SendRecord`] is the matching per-transmission record.

use std::net::SocketAddr;
use std::time::SystemTime;

/// One received UDP datagram.
#[derive(Debug, Clone)]
pub struct Datagram {
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Sender address and port.
    pub sender: SocketAddr,
    /// Destination address and port the datagram was addressed to. For
    /// multicast traffic this is the group address, recovered from packet
    /// info where the platform supports it.
    pub destination: SocketAddr,
    /// Arrival wall-clock time.
    pub received_at: SystemTime,
}

impl Datagram {
    /// Render the payload as text, falling back to a hex dump when the
    /// bytes are not valid UTF-8.
    #[must_use]
    pub fn payload_display(&self) -> String {
        render_payload(&self.payload)
    }
}

/// One completed transmission.
#[derive(Debug, Clone)]
pub struct SendRecord {
    /// Destination address and port.
    pub destination: SocketAddr,
    /// Local source address and port.
    pub source: SocketAddr,
    /// Payload bytes as sent.
    pub payload: Vec<u8>,
}

impl SendRecord {
    /// Render the payload as text, hex fallback.
    #[must_use]
    pub fn payload_display(&self) -> String {
        render_payload(&self.payload)
    }
}

/// UTF-8 text when valid, otherwise a 16-bytes-per-line hex dump.
fn render_payload(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => hex_dump(payload),
    }
}

fn hex_dump(data: &[u8]) -> String {
    data.chunks(16)
        .map(|chunk| {
            let hex: String = chunk.iter().map(|b| format!("{:02x} ", b)).collect();
            hex.trim_end().to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn sample(payload: &[u8]) -> Datagram {
        Datagram {
            payload: payload.to_vec(),
            sender: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 40000)),
            destination: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 30000)),
            received_at: SystemTime::now(),
        }
    }

    #[test]
    fn test_utf8_payload_renders_as_text() {
        assert_eq!(sample(b"ping").payload_display(), "ping");
    }

    #[test]
    fn test_binary_payload_falls_back_to_hex() {
        let rendered = sample(&[0xff, 0xfe, 0x00]).payload_display();
        assert_eq!(rendered, "ff fe 00");
    }

    #[test]
    fn test_hex_dump_wraps_at_sixteen_bytes() {
        let rendered = sample(&[0xffu8; 17]).payload_display();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "ff");
    }
}
